//! Flatten persisted result documents into report records.
//!
//! Documents come from every provider family, including foreign scripts whose
//! output is never checked at write time, so projection works on raw JSON and
//! only insists on the fields a report row cannot do without.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{BenchError, IoContext, Result};
use crate::schema::{ERROR_MARKER, RESULTS_SUFFIX};

/// One report row.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedRecord {
    pub package: String,
    pub case_id: String,
    pub description: String,
    pub iterates_per_run: u64,
    pub num_benchmark_runs: u64,
    pub mean_iter_s: f64,
    pub std_iter_s: Option<f64>,
    pub mae: Option<f64>,
}

/// `dg_ftle` -> `DG FTLE`.
pub fn default_description(case_id: &str) -> String {
    case_id.replace('_', " ").to_uppercase()
}

fn is_result_file(name: &str) -> bool {
    name.ends_with(RESULTS_SUFFIX) && !name.to_lowercase().contains(ERROR_MARKER)
}

/// Result files directly under `dir`, sorted by path.
pub fn result_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
    {
        let entry = entry.map_err(|e| BenchError::Io {
            path: dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if is_result_file(&name) {
            out.push(entry.path().to_path_buf());
        } else {
            debug!(path = %entry.path().display(), "ignoring non-result file");
        }
    }
    out.sort();
    Ok(out)
}

/// Load every parsable result in `dir`. Bad files are logged and skipped; a
/// missing or empty directory yields no records.
pub fn load_records(dir: &Path) -> Result<Vec<AggregatedRecord>> {
    if !dir.is_dir() {
        warn!(path = %dir.display(), "results directory does not exist");
        return Ok(Vec::new());
    }

    let files = result_files(dir)?;
    let mut records = Vec::with_capacity(files.len());
    for path in files {
        match load_record(&path) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable result"),
        }
    }
    info!(count = records.len(), dir = %dir.display(), "aggregated results");
    Ok(records)
}

/// `Ok(None)` for an error document that landed at a results path.
pub fn load_record(path: &Path) -> Result<Option<AggregatedRecord>> {
    let text = fs::read_to_string(path).at(path)?;
    let value: Value = serde_json::from_str(&text).map_err(|e| parse_error(path, e.to_string()))?;

    if is_error_document(&value) {
        let package = value.get("package").and_then(Value::as_str).unwrap_or("?");
        let reason = value.get("error").and_then(Value::as_str).unwrap_or("");
        warn!(
            path = %path.display(),
            package,
            error = reason,
            "cell failed; skipping its error document"
        );
        return Ok(None);
    }
    project(path, &value).map(Some)
}

fn is_error_document(value: &Value) -> bool {
    value.get("run_config_json_str_received").is_some() && value.get("timings").is_none()
}

fn parse_error(path: &Path, message: impl Into<String>) -> BenchError {
    BenchError::AggregationParse {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

fn project(path: &Path, doc: &Value) -> Result<AggregatedRecord> {
    let str_at = |pointer: &str| {
        doc.pointer(pointer)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| parse_error(path, format!("missing string {pointer}")))
    };
    let u64_at = |pointer: &str| {
        doc.pointer(pointer)
            .and_then(Value::as_u64)
            .ok_or_else(|| parse_error(path, format!("missing integer {pointer}")))
    };
    // Foreign writers may emit NaN as null; that reads as "not available".
    let opt_f64 = |pointer: &str| doc.pointer(pointer).and_then(Value::as_f64);

    let package = str_at("/metadata/package_name")?;
    let case_id = str_at("/metadata/case_id")?;
    let description = doc
        .pointer("/metadata/case_description")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_description(&case_id));
    let mean_iter_s = opt_f64("/timings/mean_per_iter_time")
        .ok_or_else(|| parse_error(path, "missing number /timings/mean_per_iter_time"))?;

    Ok(AggregatedRecord {
        package,
        case_id,
        description,
        iterates_per_run: u64_at("/parameters/iterates_per_run")?,
        num_benchmark_runs: u64_at("/parameters/num_benchmark_runs")?,
        mean_iter_s,
        std_iter_s: opt_f64("/timings/std_per_iter_time"),
        mae: opt_f64("/error/mae"),
    })
}
