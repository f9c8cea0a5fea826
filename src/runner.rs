//! Runner contract shared by every direct-invocation provider.
//!
//! One invocation walks `parse -> validate -> warmup -> benchmark loops -> write
//! result`. Any failure along the way is turned into an [`ErrorDocument`] written
//! to the intended output path (or a fallback) and reported to the caller, who
//! exits non-zero. Nothing is retried.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::error::{BenchError, IoContext, Result};
use crate::field::load_field;
use crate::harness::{mean_absolute_error, run_loops, summarize, time_once, LoopPlan, TimeWindow};
use crate::providers::{FtleSolver, Provider};
use crate::schema::{
    ErrorDocument, ErrorMetrics, ErrorParams, FlowType, ResultDocument, ResultParameters,
    RunConfig,
};

const REQUIRED_TOP_LEVEL: &[&str] = &[
    "flow_data",
    "iterates_per_run",
    "num_benchmark_runs",
    "output_json_path",
    "metadata",
];

/// Run `provider` against an inline JSON config. Returns the result path.
pub fn run_inline(provider: Provider, raw_config: &str) -> Result<PathBuf> {
    run_with_fallback(provider, raw_config, &provider.default_error_path())
}

/// Like [`run_inline`] with an explicit fallback path for the error document.
pub fn run_with_fallback(provider: Provider, raw_config: &str, fallback: &Path) -> Result<PathBuf> {
    match execute(provider, raw_config) {
        Ok(path) => Ok(path),
        Err(e) => {
            error!(provider = provider.as_str(), error = %e, "benchmark FAILED");
            write_error_document(provider, raw_config, &e, fallback);
            Err(e)
        }
    }
}

fn execute(provider: Provider, raw_config: &str) -> Result<PathBuf> {
    let value: Value = serde_json::from_str(raw_config)?;
    let cfg = validate_run_config(&value)?;

    info!(
        package = %cfg.metadata.package_name,
        case = %cfg.metadata.case_description,
        output = %cfg.output_json_path.display(),
        iterates_per_run = cfg.iterates_per_run,
        runs = cfg.num_benchmark_runs,
        "starting benchmark"
    );

    let solver = provider.build(&cfg)?;

    let (warmup_time, error_metrics) = warmup(&cfg, solver.as_ref())?;
    info!(seconds = warmup_time, "warm-up completed");

    let plan = LoopPlan {
        iterates_per_run: cfg.iterates_per_run,
        num_runs: cfg.num_benchmark_runs,
        t0: cfg.flow_data.t0,
        horizon: cfg.flow_data.horizon,
        dt0: cfg.flow_data.dt0,
    };
    let loop_times = run_loops(&plan, |window| solver.compute(window))?;

    let doc = ResultDocument {
        parameters: ResultParameters {
            iterates_per_run: cfg.iterates_per_run,
            num_benchmark_runs: cfg.num_benchmark_runs,
        },
        timings: summarize(warmup_time, &loop_times, cfg.iterates_per_run),
        error: error_metrics,
        metadata: cfg.metadata.clone(),
    };

    write_result_document(&cfg.output_json_path, &doc)?;
    info!(path = %cfg.output_json_path.display(), "results saved");
    Ok(cfg.output_json_path)
}

fn count_at_least_one(obj: &serde_json::Map<String, Value>, key: &str) -> Result<()> {
    match obj.get(key).and_then(Value::as_u64) {
        Some(n) if n >= 1 && n <= u64::from(u32::MAX) => Ok(()),
        _ => Err(BenchError::validation(format!(
            "{key} must be an integer >= 1, got {}",
            obj.get(key).map(Value::to_string).unwrap_or_default()
        ))),
    }
}

/// Check required keys and counts, then deserialize.
///
/// Required `flow_data` keys depend on `metadata.case_flow_type`; every missing
/// key is named in the error.
pub fn validate_run_config(value: &Value) -> Result<RunConfig> {
    let obj = value
        .as_object()
        .ok_or_else(|| BenchError::validation("run config must be a JSON object"))?;

    let missing: Vec<&str> = REQUIRED_TOP_LEVEL
        .iter()
        .copied()
        .filter(|k| !obj.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(BenchError::validation(format!(
            "run config is missing required keys: {}",
            missing.join(", ")
        )));
    }

    count_at_least_one(obj, "iterates_per_run")?;
    count_at_least_one(obj, "num_benchmark_runs")?;

    let flow_type_value = obj["metadata"]
        .get("case_flow_type")
        .cloned()
        .ok_or_else(|| BenchError::validation("metadata is missing required key: case_flow_type"))?;
    let flow_type: FlowType = serde_json::from_value(flow_type_value).map_err(|e| {
        BenchError::validation(format!("metadata.case_flow_type: {e}"))
    })?;

    let flow_data = obj["flow_data"]
        .as_object()
        .ok_or_else(|| BenchError::validation("flow_data must be a JSON object"))?;
    let missing: Vec<&str> = flow_type
        .required_keys()
        .iter()
        .copied()
        .filter(|k| !flow_data.contains_key(*k))
        .collect();
    if !missing.is_empty() {
        return Err(BenchError::validation(format!(
            "flow_data for '{}' flow is missing required keys: {}",
            flow_type.as_str(),
            missing.join(", ")
        )));
    }

    let cfg: RunConfig = serde_json::from_value(value.clone())
        .map_err(|e| BenchError::validation(format!("malformed run config: {e}")))?;
    if cfg.flow_data.horizon == 0.0 {
        return Err(BenchError::validation("T must be non-zero"));
    }
    Ok(cfg)
}

/// One untimed-for-statistics call; doubles as the accuracy sample when a
/// reference field is configured.
fn warmup(cfg: &RunConfig, solver: &dyn FtleSolver) -> Result<(f64, Option<ErrorMetrics>)> {
    match &cfg.error_data {
        Some(reference) => {
            let (_, truth) = load_field(&reference.path).at(&reference.path)?;
            let window = TimeWindow {
                t0: reference.t0,
                horizon: reference.horizon,
            };
            let (estimate, seconds) = time_once(|| solver.compute(window))?;
            let mae = mean_absolute_error(&truth, &estimate, false)?;
            info!(mae, "accuracy sample taken during warm-up");
            Ok((
                seconds,
                Some(ErrorMetrics {
                    mae,
                    error_params: ErrorParams {
                        path: reference.path.clone(),
                        t0: reference.t0,
                        horizon: reference.horizon,
                    },
                }),
            ))
        }
        None => {
            let window = TimeWindow {
                t0: cfg.flow_data.t0,
                horizon: cfg.flow_data.horizon,
            };
            let (_, seconds) = time_once(|| solver.compute(window))?;
            Ok((seconds, None))
        }
    }
}

pub fn write_result_document(path: &Path, doc: &ResultDocument) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).at(dir)?;
    }
    let json = serde_json::to_string_pretty(doc)?;
    fs::write(path, json).at(path)
}

/// Best-effort: never fails, only logs.
fn write_error_document(provider: Provider, raw_config: &str, err: &BenchError, fallback: &Path) {
    let parsed: Option<Value> = serde_json::from_str(raw_config).ok();
    let path = parsed
        .as_ref()
        .and_then(|v| v.get("output_json_path"))
        .and_then(Value::as_str)
        .map(PathBuf::from)
        .unwrap_or_else(|| fallback.to_path_buf());
    let package = parsed
        .as_ref()
        .and_then(|v| v.pointer("/metadata/package_name"))
        .and_then(Value::as_str)
        .unwrap_or(provider.label())
        .to_string();

    let doc = ErrorDocument {
        package,
        error: err.to_string(),
        run_config_json_str_received: raw_config.to_string(),
    };

    let written = serde_json::to_string_pretty(&doc)
        .map_err(std::io::Error::other)
        .and_then(|json| {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)?;
            }
            fs::write(&path, json)
        });
    match written {
        Ok(()) => info!(path = %path.display(), "error document written"),
        Err(e) => warn!(path = %path.display(), error = %e, "could not write error document"),
    }
}
