//! Case and package tables, loaded once and passed by reference.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::{BenchError, IoContext, Result};
use crate::schema::{ErrorData, FlowData, FlowType};

pub const DEFAULT_START_MARKER: &str = "<!-- BENCHMARK_RESULTS_START -->";
pub const DEFAULT_END_MARKER: &str = "<!-- BENCHMARK_RESULTS_END -->";

/// One row of the benchmark matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkCase {
    pub id: String,
    pub description: String,
    pub flow_type: FlowType,
    pub flow_data: FlowData,
    pub iterates_per_run: u32,
    pub num_benchmark_runs: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_data: Option<ErrorData>,
    /// Overrides keyed by lowercase package name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pkg_specific_params: BTreeMap<String, serde_json::Value>,
}

/// Command that starts a direct-invocation adapter. The dispatcher appends
/// `--run-config-json <JSON>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdapterEntry {
    /// Executable; `None` means this binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// How a package's cells are executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionStrategy {
    /// Adapter runnable as one command with the config inline.
    Direct { entry: AdapterEntry },
    /// Adapter is a script for an external numeric environment, fed a config file.
    ExternalInterpreter {
        scripts_dir: PathBuf,
        /// Script file per flow-type variant.
        scripts: BTreeMap<FlowType, String>,
        #[serde(default = "default_interpreter")]
        executable: String,
        /// Install location of the environment; cells are skipped when unset.
        env_var: String,
        #[serde(default = "default_expected_iter_secs")]
        expected_iter_secs: f64,
        #[serde(default = "default_overhead_secs")]
        overhead_secs: f64,
    },
}

fn default_interpreter() -> String {
    "matlab".to_string()
}

fn default_expected_iter_secs() -> f64 {
    200.0
}

fn default_overhead_secs() -> f64 {
    300.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageConfig {
    pub name: String,
    pub strategy: ExecutionStrategy,
    /// Free-form description of the environment the adapter needs.
    #[serde(default)]
    pub environment: String,
    pub supported_cases: Vec<String>,
}

impl PackageConfig {
    pub fn supports(&self, case_id: &str) -> bool {
        self.supported_cases.iter().any(|c| c == case_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSettings {
    pub baseline_package: String,
    /// Where per-case markdown sections are persisted.
    pub sections_dir: PathBuf,
    pub host_document: PathBuf,
    #[serde(default = "default_start_marker")]
    pub start_marker: String,
    #[serde(default = "default_end_marker")]
    pub end_marker: String,
}

fn default_start_marker() -> String {
    DEFAULT_START_MARKER.to_string()
}

fn default_end_marker() -> String {
    DEFAULT_END_MARKER.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteConfig {
    pub results_dir: PathBuf,
    pub report: ReportSettings,
    pub cases: Vec<BenchmarkCase>,
    pub packages: Vec<PackageConfig>,
}

impl SuiteConfig {
    /// Read a suite from JSON. Relative paths are kept as written.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).at(path)?;
        let cfg: SuiteConfig = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Default tables rooted at `root`.
    pub fn builtin(root: &Path) -> Self {
        let data_dir = root.join("data");
        let results_dir = root.join("results");

        let dg = BenchmarkCase {
            id: "dg_ftle".into(),
            description: "Double Gyre FTLE".into(),
            flow_type: FlowType::Predefined,
            flow_data: FlowData {
                flow_str: "double_gyre".into(),
                grid_shape: Some([201, 101]),
                domain: vec![[0.0, 2.0], [0.0, 1.0]],
                t0: 0.0,
                horizon: 16.0,
                dt0: 0.5,
                vel_data_paths: None,
            },
            iterates_per_run: 50,
            num_benchmark_runs: 3,
            error_data: None,
            pkg_specific_params: BTreeMap::from([(
                "rk4-rayon".to_string(),
                serde_json::json!({ "num_threads": 8 }),
            )]),
        };

        let qge = BenchmarkCase {
            id: "qge_ftle".into(),
            description: "QGE FTLE".into(),
            flow_type: FlowType::Data,
            flow_data: FlowData {
                flow_str: "qge".into(),
                grid_shape: None,
                domain: vec![[0.0, 1.0], [0.0, 1.0], [0.0, 2.0]],
                t0: 0.0,
                horizon: 0.1,
                dt0: 0.01,
                vel_data_paths: Some(crate::schema::VelocityPaths {
                    u: data_dir.join("qge_u.fld"),
                    v: data_dir.join("qge_v.fld"),
                }),
            },
            iterates_per_run: 30,
            num_benchmark_runs: 3,
            error_data: None,
            // lcstool wants (t, y, x) axes; dimorder tells the script how to permute.
            pkg_specific_params: BTreeMap::from([(
                "lcstool".to_string(),
                serde_json::json!({ "dimorder": [1, 3, 2] }),
            )]),
        };

        let self_entry = |provider: &str| ExecutionStrategy::Direct {
            entry: AdapterEntry {
                program: None,
                args: vec!["run".into(), "--provider".into(), provider.into()],
            },
        };

        SuiteConfig {
            results_dir: results_dir.clone(),
            report: ReportSettings {
                baseline_package: "RK4-Serial".into(),
                sections_dir: results_dir.join("md_tables"),
                host_document: root.join("README.md"),
                start_marker: default_start_marker(),
                end_marker: default_end_marker(),
            },
            cases: vec![dg, qge],
            packages: vec![
                PackageConfig {
                    name: "RK4-Serial".into(),
                    strategy: self_entry("serial"),
                    environment: "built-in".into(),
                    supported_cases: vec!["dg_ftle".into(), "qge_ftle".into()],
                },
                PackageConfig {
                    name: "RK4-Rayon".into(),
                    strategy: self_entry("rayon"),
                    environment: "built-in".into(),
                    supported_cases: vec!["dg_ftle".into()],
                },
                PackageConfig {
                    name: "LCStool".into(),
                    strategy: ExecutionStrategy::ExternalInterpreter {
                        scripts_dir: root.join("runners").join("matlab_scripts"),
                        scripts: BTreeMap::from([
                            (FlowType::Predefined, "lcstool_dg_benchmark.m".to_string()),
                            (FlowType::Data, "lcstool_data_benchmark.m".to_string()),
                        ]),
                        executable: default_interpreter(),
                        env_var: "LCSTOOL_PATH".into(),
                        expected_iter_secs: default_expected_iter_secs(),
                        overhead_secs: default_overhead_secs(),
                    },
                    environment: "MATLAB with LCStool on the path".into(),
                    supported_cases: vec!["dg_ftle".into(), "qge_ftle".into()],
                },
            ],
        }
    }

    /// Startup checks. Unknown supported-case ids only warn; they can never match.
    pub fn validate(&self) -> Result<()> {
        let mut case_ids = HashSet::new();
        for case in &self.cases {
            if !case_ids.insert(case.id.as_str()) {
                return Err(BenchError::validation(format!(
                    "duplicate case id '{}'",
                    case.id
                )));
            }
            if case.iterates_per_run < 1 || case.num_benchmark_runs < 1 {
                return Err(BenchError::validation(format!(
                    "case '{}': iterates_per_run and num_benchmark_runs must be >= 1",
                    case.id
                )));
            }
        }

        let mut names = HashSet::new();
        for pkg in &self.packages {
            if !names.insert(pkg.name.to_lowercase()) {
                return Err(BenchError::validation(format!(
                    "duplicate package name '{}'",
                    pkg.name
                )));
            }
            for id in &pkg.supported_cases {
                if !case_ids.contains(id.as_str()) {
                    warn!(package = %pkg.name, case = %id, "supported case is not defined");
                }
            }
        }
        Ok(())
    }

    pub fn case(&self, id: &str) -> Option<&BenchmarkCase> {
        self.cases.iter().find(|c| c.id == id)
    }
}
