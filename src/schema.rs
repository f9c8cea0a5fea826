use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Suffix shared by every results document.
pub const RESULTS_SUFFIX: &str = "_results.json";

/// Substring marking a file as an error document rather than a result.
pub const ERROR_MARKER: &str = "_error";

/// Case category; decides which `flow_data` keys a runner requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// Analytic flow identified by name.
    Predefined,
    /// Pre-computed gridded velocity field loaded from disk.
    Data,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Predefined => "predefined",
            FlowType::Data => "data",
        }
    }

    /// Keys `flow_data` must carry for this variant.
    pub fn required_keys(&self) -> &'static [&'static str] {
        match self {
            FlowType::Predefined => &["flow_str", "grid_shape", "t0", "T", "dt0", "domain"],
            FlowType::Data => &["flow_str", "vel_data_paths", "domain", "t0", "T", "dt0"],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityPaths {
    pub u: PathBuf,
    pub v: PathBuf,
}

/// Flow parameters of a case, passed verbatim to providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowData {
    pub flow_str: String,
    /// `(nx, ny)` for predefined flows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grid_shape: Option<[usize; 2]>,
    /// `((x0, x1), (y0, y1))` for predefined flows, `((t0, t1), (x0, x1), (y0, y1))` for data.
    pub domain: Vec<[f64; 2]>,
    pub t0: f64,
    /// Integration horizon.
    #[serde(rename = "T")]
    pub horizon: f64,
    /// Shift of the start time between consecutive iterates.
    pub dt0: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vel_data_paths: Option<VelocityPaths>,
}

/// Reference FTLE field and the window it was computed for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorData {
    pub path: PathBuf,
    pub t0: f64,
    #[serde(rename = "T")]
    pub horizon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub package_name: String,
    pub case_id: String,
    pub case_description: String,
    pub case_flow_type: FlowType,
}

/// Payload handed to a provider adapter for one matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub flow_data: FlowData,
    pub iterates_per_run: u32,
    pub num_benchmark_runs: u32,
    #[serde(
        default,
        deserialize_with = "empty_object_as_none",
        skip_serializing_if = "Option::is_none"
    )]
    pub error_data: Option<ErrorData>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub pkg_specific_params: BTreeMap<String, serde_json::Value>,
    pub output_json_path: PathBuf,
    pub metadata: RunMetadata,
}

impl RunConfig {
    /// Overrides addressed to the running package (keyed by lowercase package name).
    pub fn package_params(&self) -> Option<&serde_json::Value> {
        self.pkg_specific_params
            .get(&self.metadata.package_name.to_lowercase())
    }

    pub fn package_param_u64(&self, key: &str) -> Option<u64> {
        self.package_params()
            .and_then(|p| p.get(key))
            .and_then(|v| v.as_u64())
    }
}

/// `{}` in the case tables means "no error reference".
fn empty_object_as_none<'de, D>(deserializer: D) -> Result<Option<ErrorData>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::Object(map)) if map.is_empty() => Ok(None),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultParameters {
    pub iterates_per_run: u32,
    pub num_benchmark_runs: u32,
}

/// Wall-clock statistics in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub warmup_time: f64,
    pub loop_times: Vec<f64>,
    pub per_iter_times: Vec<f64>,
    pub mean_loop_time: f64,
    pub mean_per_iter_time: f64,
    pub std_loop_time: f64,
    pub std_per_iter_time: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorParams {
    pub path: PathBuf,
    pub t0: f64,
    #[serde(rename = "T")]
    pub horizon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub mae: f64,
    pub error_params: ErrorParams,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    pub parameters: ResultParameters,
    pub timings: Timings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorMetrics>,
    pub metadata: RunMetadata,
}

/// Written in place of a [`ResultDocument`] when a cell fails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDocument {
    pub package: String,
    pub error: String,
    pub run_config_json_str_received: String,
}

/// `{package}_{case}_results.json`, package lowercased.
pub fn result_file_name(package: &str, case_id: &str) -> String {
    format!("{}_{}{}", package.to_lowercase(), case_id, RESULTS_SUFFIX)
}

pub fn result_path(results_dir: &Path, package: &str, case_id: &str) -> PathBuf {
    results_dir.join(result_file_name(package, case_id))
}
