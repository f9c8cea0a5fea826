use tracing::info;

use crate::config::{BenchmarkCase, PackageConfig, SuiteConfig};

/// One (package, case) unit of work.
#[derive(Clone, Copy, Debug)]
pub struct Cell<'a> {
    pub package: &'a PackageConfig,
    pub case: &'a BenchmarkCase,
}

impl Cell<'_> {
    /// Stable identity of the cell; reruns regenerate the same name.
    pub fn session_name(&self) -> String {
        format!("bench-{}-{}", self.package.name.to_lowercase(), self.case.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedPair {
    pub package: String,
    pub case_id: String,
}

#[derive(Debug)]
pub struct Matrix<'a> {
    pub cells: Vec<Cell<'a>>,
    pub skipped: Vec<SkippedPair>,
}

/// Cross every package with every case, packages outermost, keeping only pairs
/// the package declares support for. Skips are logged, never raised.
pub fn build_matrix(cfg: &SuiteConfig) -> Matrix<'_> {
    let mut cells = Vec::new();
    let mut skipped = Vec::new();

    for package in &cfg.packages {
        for case in &cfg.cases {
            if !package.supports(&case.id) {
                info!(
                    package = %package.name,
                    case = %case.id,
                    "skipping: package does not support this case"
                );
                skipped.push(SkippedPair {
                    package: package.name.clone(),
                    case_id: case.id.clone(),
                });
                continue;
            }
            cells.push(Cell { package, case });
        }
    }

    Matrix { cells, skipped }
}

impl Matrix<'_> {
    /// Keep only cells matching the optional package/case filters (case-insensitive package).
    pub fn retain(&mut self, package: Option<&str>, case: Option<&str>) {
        self.cells.retain(|cell| {
            package.map_or(true, |p| cell.package.name.eq_ignore_ascii_case(p))
                && case.map_or(true, |c| cell.case.id == c)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_unsupported_pair_is_skipped_not_failed() {
        let mut cfg = SuiteConfig::builtin(Path::new("/repo"));
        cfg.packages.truncate(2); // RK4-Serial supports both cases, RK4-Rayon only dg_ftle

        let matrix = build_matrix(&cfg);
        let qge: Vec<_> = matrix
            .cells
            .iter()
            .filter(|c| c.case.id == "qge_ftle")
            .collect();
        assert_eq!(qge.len(), 1);
        assert_eq!(qge[0].package.name, "RK4-Serial");
        assert_eq!(
            matrix.skipped,
            vec![SkippedPair {
                package: "RK4-Rayon".into(),
                case_id: "qge_ftle".into()
            }]
        );
    }

    #[test]
    fn test_order_is_packages_then_cases() {
        let cfg = SuiteConfig::builtin(Path::new("/repo"));
        let names: Vec<String> = build_matrix(&cfg)
            .cells
            .iter()
            .map(|c| c.session_name())
            .collect();
        assert_eq!(
            names,
            vec![
                "bench-rk4-serial-dg_ftle",
                "bench-rk4-serial-qge_ftle",
                "bench-rk4-rayon-dg_ftle",
                "bench-lcstool-dg_ftle",
                "bench-lcstool-qge_ftle",
            ]
        );
    }

    #[test]
    fn test_retain_filters() {
        let cfg = SuiteConfig::builtin(Path::new("/repo"));
        let mut matrix = build_matrix(&cfg);
        matrix.retain(Some("lcstool"), None);
        assert_eq!(matrix.cells.len(), 2);
        matrix.retain(None, Some("qge_ftle"));
        assert_eq!(matrix.cells.len(), 1);
        assert_eq!(matrix.cells[0].session_name(), "bench-lcstool-qge_ftle");
    }
}
