//! Per-case comparison tables and the host-document splice.

use clap::ValueEnum;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::aggregate::{load_records, AggregatedRecord};
use crate::config::ReportSettings;
use crate::error::{BenchError, IoContext, Result};

/// Text used when there is nothing to splice.
pub const EMPTY_REPORT: &str = "No benchmark results to display at this time.";

const SECTION_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, ValueEnum)]
pub enum ReportMode {
    /// Write section files and update the host document.
    #[default]
    All,
    /// Write section files only.
    TablesOnly,
}

/// Whether the host document was rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SpliceOutcome {
    Updated,
    Unchanged,
}

/// Rendered markdown for one case.
#[derive(Clone, Debug, PartialEq)]
pub struct CaseSection {
    pub case_id: String,
    pub markdown: String,
}

impl CaseSection {
    pub fn file_name(&self) -> String {
        section_file_name(&self.case_id)
    }
}

pub fn section_file_name(case_id: &str) -> String {
    format!("{case_id}_benchmark_section.md")
}

/// Speedup of `candidate` over `baseline` (both mean seconds per iterate).
///
/// Ratios below one are shown as the inverse, tagged `⁻¹`.
pub fn format_speedup(baseline: Option<f64>, candidate: f64) -> String {
    let Some(base) = baseline.filter(|b| b.is_finite() && *b > 0.0) else {
        return "N/A".into();
    };
    if !candidate.is_finite() || candidate <= 0.0 {
        return "N/A".into();
    }
    let speedup = base / candidate;
    if speedup >= 1.0 {
        format!("{speedup:.2}")
    } else {
        format!("({:.2})\u{207B}\u{00B9}", 1.0 / speedup)
    }
}

fn format_fixed(value: Option<f64>) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{v:.4}"),
        _ => "N/A".into(),
    }
}

/// Scientific notation with a signed, two-digit exponent (`1.234e-05`).
pub fn format_scientific(value: Option<f64>) -> String {
    let Some(v) = value.filter(|v| v.is_finite()) else {
        return "N/A".into();
    };
    let formatted = format!("{v:.3e}");
    match formatted.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(d) => ('-', d),
                None => ('+', exp),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => formatted,
    }
}

/// Pipe table with left-aligned, padded columns.
fn render_table(headers: &[String], rows: &[Vec<String>]) -> String {
    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| {
            rows.iter()
                .map(|r| r[i].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let line = |cells: &[String]| {
        let padded: Vec<String> = cells
            .iter()
            .zip(&widths)
            .map(|(c, w)| {
                let pad = w - c.chars().count();
                format!(" {c}{} ", " ".repeat(pad))
            })
            .collect();
        format!("|{}|", padded.join("|"))
    };

    let mut out = Vec::with_capacity(rows.len() + 2);
    out.push(line(headers));
    let rule: Vec<String> = widths.iter().map(|w| format!(":{}", "-".repeat(w + 1))).collect();
    out.push(format!("|{}|", rule.join("|")));
    for row in rows {
        out.push(line(row));
    }
    out.join("\n")
}

/// Header plus table for one case group. Columns beyond the first two appear
/// only when the group's data supports them.
pub fn render_case(records: &[&AggregatedRecord], baseline_package: &str) -> String {
    let Some(first) = records.first() else {
        return String::new();
    };
    let header = format!(
        "### {} (Iter/Run: {}, Num Runs: {})",
        first.description, first.iterates_per_run, first.num_benchmark_runs
    );

    let with_std = records.iter().any(|r| r.std_iter_s.is_some());
    let with_mae = records.iter().any(|r| r.mae.is_some());
    let baseline = records
        .iter()
        .find(|r| r.package == baseline_package)
        .map(|r| r.mean_iter_s);

    let mut headers = vec!["Package".to_string(), "Mean /Iter (s)".to_string()];
    if with_std {
        headers.push("Std /Iter (s)".into());
    }
    if baseline.is_some() {
        headers.push(format!("Speedup (vs {baseline_package})"));
    }
    if with_mae {
        headers.push("MAE".into());
    }

    let rows: Vec<Vec<String>> = records
        .iter()
        .map(|r| {
            let mut row = vec![r.package.clone(), format_fixed(Some(r.mean_iter_s))];
            if with_std {
                row.push(format_fixed(r.std_iter_s));
            }
            if baseline.is_some() {
                row.push(format_speedup(baseline, r.mean_iter_s));
            }
            if with_mae {
                row.push(format_scientific(r.mae));
            }
            row
        })
        .collect();

    format!("{header}\n\n{}", render_table(&headers, &rows))
}

/// One section per case id, in lexicographic order.
pub fn render_sections(records: &[AggregatedRecord], baseline_package: &str) -> Vec<CaseSection> {
    let mut groups: BTreeMap<&str, Vec<&AggregatedRecord>> = BTreeMap::new();
    for r in records {
        groups.entry(r.case_id.as_str()).or_default().push(r);
    }
    groups
        .into_iter()
        .map(|(case_id, group)| CaseSection {
            case_id: case_id.to_string(),
            markdown: render_case(&group, baseline_package),
        })
        .collect()
}

/// Persist each section as `{case}_benchmark_section.md`; returns the written
/// paths in section order. A section that cannot be written is logged and left out.
pub fn write_sections(dir: &Path, sections: &[CaseSection]) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).at(dir)?;
    let mut written = Vec::with_capacity(sections.len());
    for section in sections {
        let path = dir.join(section.file_name());
        match fs::write(&path, &section.markdown) {
            Ok(()) => {
                info!(case = %section.case_id, path = %path.display(), "section written");
                written.push(path);
            }
            Err(e) => warn!(case = %section.case_id, path = %path.display(), error = %e, "could not write section"),
        }
    }
    Ok(written)
}

/// Concatenate persisted sections with a horizontal rule between them.
pub fn assemble_block(section_paths: &[PathBuf]) -> String {
    let contents: Vec<String> = section_paths
        .iter()
        .filter_map(|p| match fs::read_to_string(p) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(path = %p.display(), error = %e, "section file unreadable; skipping");
                None
            }
        })
        .collect();
    if contents.is_empty() {
        return EMPTY_REPORT.to_string();
    }
    contents.join(SECTION_SEPARATOR)
}

fn assembly_error(path: &Path, message: impl Into<String>) -> BenchError {
    BenchError::ReportAssembly {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Replace the text strictly between `start` and `end` with `block`.
///
/// Each marker must occur exactly once, start before end. The document is
/// rewritten only when the result differs from what is on disk.
pub fn splice_document(path: &Path, block: &str, start: &str, end: &str) -> Result<SpliceOutcome> {
    let text = match fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(assembly_error(path, "host document not found"));
        }
        Err(e) => return Err(e).at(path),
    };

    let starts = text.matches(start).count();
    let ends = text.matches(end).count();
    if starts != 1 || ends != 1 {
        return Err(assembly_error(
            path,
            format!("expected exactly one start and one end marker, found {starts} and {ends}"),
        ));
    }
    let (Some(s), Some(e)) = (text.find(start), text.find(end)) else {
        return Err(assembly_error(path, "markers not found"));
    };
    if e < s + start.len() {
        return Err(assembly_error(path, "end marker precedes start marker"));
    }

    let updated = format!(
        "{}{start}\n\n{}\n\n{end}{}",
        &text[..s],
        block.trim(),
        &text[e + end.len()..]
    );
    if updated == text {
        info!(path = %path.display(), "report section already up to date");
        return Ok(SpliceOutcome::Unchanged);
    }

    let final_text = format!("{}\n", updated.trim());
    if final_text == text {
        info!(path = %path.display(), "report section already up to date");
        return Ok(SpliceOutcome::Unchanged);
    }
    fs::write(path, final_text).at(path)?;
    info!(path = %path.display(), "report section updated");
    Ok(SpliceOutcome::Updated)
}

/// What a report run produced.
#[derive(Debug)]
pub struct ReportSummary {
    pub records: usize,
    pub sections: Vec<PathBuf>,
    /// `None` when the host document was not touched.
    pub splice: Option<SpliceOutcome>,
}

/// Aggregate `results_dir`, write per-case sections and, in [`ReportMode::All`],
/// splice them into the host document. With no records nothing is written.
pub fn generate_report(results_dir: &Path, settings: &ReportSettings, mode: ReportMode) -> Result<ReportSummary> {
    let records = load_records(results_dir)?;
    if records.is_empty() {
        warn!(dir = %results_dir.display(), "no benchmark data; report left untouched");
        return Ok(ReportSummary {
            records: 0,
            sections: Vec::new(),
            splice: None,
        });
    }

    let sections = render_sections(&records, &settings.baseline_package);
    let paths = write_sections(&settings.sections_dir, &sections)?;

    let splice = match mode {
        ReportMode::TablesOnly => None,
        ReportMode::All if paths.is_empty() => {
            warn!("no section files were written; host document left untouched");
            None
        }
        ReportMode::All => Some(splice_document(
            &settings.host_document,
            &assemble_block(&paths),
            &settings.start_marker,
            &settings.end_marker,
        )?),
    };

    Ok(ReportSummary {
        records: records.len(),
        sections: paths,
        splice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DEFAULT_END_MARKER, DEFAULT_START_MARKER};
    use serde_json::json;
    use tempfile::tempdir;

    fn record(package: &str, case: &str, mean: f64, std: Option<f64>, mae: Option<f64>) -> AggregatedRecord {
        AggregatedRecord {
            package: package.into(),
            case_id: case.into(),
            description: "Double Gyre FTLE".into(),
            iterates_per_run: 50,
            num_benchmark_runs: 3,
            mean_iter_s: mean,
            std_iter_s: std,
            mae,
        }
    }

    fn host(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("README.md");
        fs::write(
            &path,
            format!("# Title\n\n{DEFAULT_START_MARKER}\n{body}\n{DEFAULT_END_MARKER}\n\nFooter\n"),
        )
        .unwrap();
        path
    }

    #[test]
    fn test_speedup_formatting() {
        assert_eq!(format_speedup(Some(1.0), 0.5), "2.00");
        assert_eq!(format_speedup(Some(1.0), 1.0), "1.00");
        assert_eq!(format_speedup(Some(1.0), 2.0), "(2.00)⁻¹");
        assert_eq!(format_speedup(Some(1.0), 0.0), "N/A");
        assert_eq!(format_speedup(None, 0.5), "N/A");
        assert_eq!(format_speedup(Some(0.0), 0.5), "N/A");
    }

    #[test]
    fn test_scientific_matches_two_digit_exponent() {
        assert_eq!(format_scientific(Some(1.234e-5)), "1.234e-05");
        assert_eq!(format_scientific(Some(0.5)), "5.000e-01");
        assert_eq!(format_scientific(Some(12345.0)), "1.234e+04");
        assert_eq!(format_scientific(None), "N/A");
    }

    #[test]
    fn test_columns_follow_data_per_case() {
        let records = vec![
            record("RK4-Serial", "dg_ftle", 1.0, Some(0.01), None),
            record("RK4-Rayon", "dg_ftle", 0.25, None, None),
            record("LCStool", "qge_ftle", 2.0, None, Some(1.5e-5)),
        ];
        let sections = render_sections(&records, "RK4-Serial");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].case_id, "dg_ftle");
        assert_eq!(sections[1].case_id, "qge_ftle");

        let dg = &sections[0].markdown;
        assert!(dg.starts_with("### Double Gyre FTLE (Iter/Run: 50, Num Runs: 3)\n\n"));
        assert!(dg.contains("| Package    | Mean /Iter (s) | Std /Iter (s) | Speedup (vs RK4-Serial) |"));
        assert!(!dg.contains("MAE"));
        assert!(dg.contains("| RK4-Rayon  | 0.2500         | N/A           | 4.00                    |"));

        let qge = &sections[1].markdown;
        assert!(qge.contains("| Package | Mean /Iter (s) | MAE       |"));
        assert!(qge.contains("1.500e-05"));
        assert!(!qge.contains("Speedup"));
        assert!(!qge.contains("Std"));
    }

    #[test]
    fn test_table_rule_matches_column_widths() {
        let records = vec![record("A", "c", 1.0, None, None)];
        let md = render_case(&records.iter().collect::<Vec<_>>(), "A");
        let lines: Vec<&str> = md.lines().collect();
        assert_eq!(lines[2], "| Package | Mean /Iter (s) | Speedup (vs A) |");
        assert_eq!(lines[3], "|:--------|:---------------|:---------------|");
        assert_eq!(lines[4], "| A       | 1.0000         | 1.00           |");
    }

    #[test]
    fn test_sections_persisted_and_joined_with_rule() {
        let dir = tempdir().unwrap();
        let sections = vec![
            CaseSection { case_id: "a".into(), markdown: "### A".into() },
            CaseSection { case_id: "b".into(), markdown: "### B".into() },
        ];
        let paths = write_sections(&dir.path().join("md_tables"), &sections).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths[0].ends_with("a_benchmark_section.md"));
        assert_eq!(assemble_block(&paths), "### A\n\n---\n\n### B");
        assert_eq!(assemble_block(&[]), EMPTY_REPORT);
    }

    #[test]
    fn test_splice_replaces_between_markers_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let path = host(dir.path(), "stale content");

        let first = splice_document(&path, "  ### New\n", DEFAULT_START_MARKER, DEFAULT_END_MARKER).unwrap();
        assert_eq!(first, SpliceOutcome::Updated);
        let after_first = fs::read_to_string(&path).unwrap();
        assert_eq!(
            after_first,
            format!("# Title\n\n{DEFAULT_START_MARKER}\n\n### New\n\n{DEFAULT_END_MARKER}\n\nFooter\n")
        );

        let second = splice_document(&path, "### New", DEFAULT_START_MARKER, DEFAULT_END_MARKER).unwrap();
        assert_eq!(second, SpliceOutcome::Unchanged);
        assert_eq!(fs::read_to_string(&path).unwrap(), after_first);
    }

    #[test]
    fn test_missing_or_duplicated_markers_fail() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("README.md");
        fs::write(&path, "# No markers here\n").unwrap();
        let err = splice_document(&path, "x", DEFAULT_START_MARKER, DEFAULT_END_MARKER).unwrap_err();
        assert!(matches!(err, BenchError::ReportAssembly { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), "# No markers here\n");

        fs::write(
            &path,
            format!("{DEFAULT_START_MARKER}\n{DEFAULT_START_MARKER}\n{DEFAULT_END_MARKER}\n"),
        )
        .unwrap();
        assert!(splice_document(&path, "x", DEFAULT_START_MARKER, DEFAULT_END_MARKER).is_err());

        fs::write(&path, format!("{DEFAULT_END_MARKER}\n{DEFAULT_START_MARKER}\n")).unwrap();
        assert!(splice_document(&path, "x", DEFAULT_START_MARKER, DEFAULT_END_MARKER).is_err());

        let missing = dir.path().join("absent.md");
        let err = splice_document(&missing, "x", DEFAULT_START_MARKER, DEFAULT_END_MARKER).unwrap_err();
        assert!(matches!(err, BenchError::ReportAssembly { .. }));
    }

    #[test]
    fn test_generate_report_end_to_end() {
        let dir = tempdir().unwrap();
        let results = dir.path().join("results");
        fs::create_dir_all(&results).unwrap();
        let doc = |pkg: &str, mean: f64| {
            json!({
                "parameters": { "iterates_per_run": 5, "num_benchmark_runs": 1 },
                "timings": {
                    "warmup_time": 0.1, "loop_times": [mean * 5.0], "per_iter_times": [mean],
                    "mean_loop_time": mean * 5.0, "mean_per_iter_time": mean,
                    "std_loop_time": 0.0, "std_per_iter_time": 0.0
                },
                "metadata": {
                    "package_name": pkg, "case_id": "dg_ftle",
                    "case_description": "Double Gyre FTLE", "case_flow_type": "predefined"
                }
            })
            .to_string()
        };
        fs::write(results.join("rk4-serial_dg_ftle_results.json"), doc("RK4-Serial", 0.2)).unwrap();
        fs::write(results.join("rk4-rayon_dg_ftle_results.json"), doc("RK4-Rayon", 0.1)).unwrap();

        let settings = ReportSettings {
            baseline_package: "RK4-Serial".into(),
            sections_dir: results.join("md_tables"),
            host_document: host(dir.path(), ""),
            start_marker: DEFAULT_START_MARKER.into(),
            end_marker: DEFAULT_END_MARKER.into(),
        };

        let tables = generate_report(&results, &settings, ReportMode::TablesOnly).unwrap();
        assert_eq!(tables.records, 2);
        assert_eq!(tables.splice, None);
        assert!(results.join("md_tables").join("dg_ftle_benchmark_section.md").is_file());

        let all = generate_report(&results, &settings, ReportMode::All).unwrap();
        assert_eq!(all.splice, Some(SpliceOutcome::Updated));
        let readme = fs::read_to_string(&settings.host_document).unwrap();
        assert!(readme.contains("| RK4-Rayon  | 0.1000         | 0.0000        | 2.00"));
        assert!(readme.ends_with("Footer\n"));

        let again = generate_report(&results, &settings, ReportMode::All).unwrap();
        assert_eq!(again.splice, Some(SpliceOutcome::Unchanged));
        assert_eq!(fs::read_to_string(&settings.host_document).unwrap(), readme);
    }

    #[test]
    fn test_no_records_leaves_host_untouched() {
        let dir = tempdir().unwrap();
        let path = host(dir.path(), "keep me");
        let before = fs::read_to_string(&path).unwrap();
        let settings = ReportSettings {
            baseline_package: "RK4-Serial".into(),
            sections_dir: dir.path().join("md"),
            host_document: path.clone(),
            start_marker: DEFAULT_START_MARKER.into(),
            end_marker: DEFAULT_END_MARKER.into(),
        };
        let summary = generate_report(&dir.path().join("results"), &settings, ReportMode::All).unwrap();
        assert_eq!(summary.records, 0);
        assert_eq!(fs::read_to_string(&path).unwrap(), before);
    }
}
