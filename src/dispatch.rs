//! Sequential execution of matrix cells.
//!
//! Each cell is handed to the handler of its package's [`ExecutionStrategy`].
//! A failing cell is recorded and the batch moves on; nothing here aborts the
//! matrix.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{error, info, warn};

use crate::config::{AdapterEntry, ExecutionStrategy, SuiteConfig};
use crate::error::{BenchError, IoContext, Result};
use crate::external::{self, ExternalInvocation};
use crate::matrix::{Cell, Matrix};
use crate::schema::{result_path, RunConfig, RunMetadata};

#[derive(Clone, Debug, PartialEq)]
pub enum CellOutcome {
    /// The adapter exited successfully; the document it was told to write.
    Succeeded { result_path: PathBuf },
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Clone, Debug)]
pub struct CellReport {
    pub session: String,
    pub package: String,
    pub case_id: String,
    pub outcome: CellOutcome,
}

type EnvLookup<'a> = Box<dyn Fn(&str) -> Option<OsString> + 'a>;

pub struct Dispatcher<'a> {
    cfg: &'a SuiteConfig,
    self_exe: Option<PathBuf>,
    env_lookup: EnvLookup<'a>,
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}

impl<'a> Dispatcher<'a> {
    pub fn new(cfg: &'a SuiteConfig) -> Self {
        Self {
            cfg,
            self_exe: None,
            env_lookup: Box::new(|key| std::env::var_os(key)),
        }
    }

    /// Program used for adapters whose entry has no explicit program.
    pub fn with_self_exe(mut self, exe: PathBuf) -> Self {
        self.self_exe = Some(exe);
        self
    }

    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<OsString> + 'a) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    pub fn results_dir(&self) -> PathBuf {
        absolutize(&self.cfg.results_dir)
    }

    /// Create the results directory; safe to call repeatedly.
    pub fn ensure_results_dir(&self) -> Result<PathBuf> {
        let dir = self.results_dir();
        fs::create_dir_all(&dir).at(&dir)?;
        Ok(dir)
    }

    /// Payload for one cell: the case's flow parameters plus output path and metadata.
    pub fn run_config(&self, cell: &Cell<'_>) -> RunConfig {
        let case = cell.case;
        RunConfig {
            flow_data: case.flow_data.clone(),
            iterates_per_run: case.iterates_per_run,
            num_benchmark_runs: case.num_benchmark_runs,
            error_data: case.error_data.clone(),
            pkg_specific_params: case.pkg_specific_params.clone(),
            output_json_path: result_path(&self.results_dir(), &cell.package.name, &case.id),
            metadata: RunMetadata {
                package_name: cell.package.name.clone(),
                case_id: case.id.clone(),
                case_description: case.description.clone(),
                case_flow_type: case.flow_type,
            },
        }
    }

    /// Run every cell in order and report each outcome.
    pub fn run_all(&self, matrix: &Matrix<'_>) -> Vec<CellReport> {
        matrix.cells.iter().map(|cell| self.run_cell(cell)).collect()
    }

    pub fn run_cell(&self, cell: &Cell<'_>) -> CellReport {
        let session = cell.session_name();
        info!(session = %session, "running cell");

        let outcome = match self.dispatch(cell) {
            Ok(outcome) => outcome,
            Err(e) => CellOutcome::Failed {
                reason: e.to_string(),
            },
        };
        match &outcome {
            CellOutcome::Succeeded { result_path } => {
                info!(session = %session, result = %result_path.display(), "cell succeeded")
            }
            CellOutcome::Failed { reason } => {
                error!(session = %session, reason = %reason, "cell failed")
            }
            CellOutcome::Skipped { reason } => {
                warn!(session = %session, reason = %reason, "cell skipped")
            }
        }

        CellReport {
            session,
            package: cell.package.name.clone(),
            case_id: cell.case.id.clone(),
            outcome,
        }
    }

    fn dispatch(&self, cell: &Cell<'_>) -> Result<CellOutcome> {
        self.ensure_results_dir()?;
        let run_config = self.run_config(cell);

        match &cell.package.strategy {
            ExecutionStrategy::Direct { entry } => self.run_direct(entry, &run_config),
            ExecutionStrategy::ExternalInterpreter {
                scripts_dir,
                scripts,
                executable,
                env_var,
                expected_iter_secs,
                overhead_secs,
            } => {
                if (self.env_lookup)(env_var).is_none() {
                    return Ok(CellOutcome::Skipped {
                        reason: format!("{env_var} not set"),
                    });
                }
                let flow_type = cell.case.flow_type;
                let Some(script_file) = scripts.get(&flow_type) else {
                    return Ok(CellOutcome::Skipped {
                        reason: format!(
                            "no script for flow '{}' ({})",
                            cell.case.flow_data.flow_str,
                            flow_type.as_str()
                        ),
                    });
                };
                self.run_external(
                    cell,
                    &run_config,
                    scripts_dir.join(script_file),
                    executable,
                    *expected_iter_secs,
                    *overhead_secs,
                )
            }
        }
    }

    fn run_direct(&self, entry: &AdapterEntry, run_config: &RunConfig) -> Result<CellOutcome> {
        let program = match (&entry.program, &self.self_exe) {
            (Some(p), _) => p.clone(),
            (None, Some(exe)) => exe.clone(),
            (None, None) => std::env::current_exe()
                .map_err(|e| BenchError::process(format!("locating own executable: {e}")))?,
        };
        let json = serde_json::to_string(run_config)?;

        let status = Command::new(&program)
            .args(&entry.args)
            .arg("--run-config-json")
            .arg(json)
            .status()
            .map_err(|e| BenchError::process(format!("spawning {}: {e}", program.display())))?;

        if status.success() {
            Ok(CellOutcome::Succeeded {
                result_path: run_config.output_json_path.clone(),
            })
        } else {
            Err(BenchError::process(format!(
                "{} exited with {status}",
                program.display()
            )))
        }
    }

    fn run_external(
        &self,
        cell: &Cell<'_>,
        run_config: &RunConfig,
        script: PathBuf,
        executable: &str,
        expected_iter_secs: f64,
        overhead_secs: f64,
    ) -> Result<CellOutcome> {
        let results_dir = self.results_dir();
        // Removed on drop, whichever way this function returns.
        let mut tmp = tempfile::Builder::new()
            .prefix(&format!(
                "cfg_{}_{}_",
                cell.package.name.to_lowercase(),
                cell.case.id
            ))
            .suffix(".json")
            .tempfile_in(&results_dir)
            .at(&results_dir)?;
        let json = serde_json::to_string_pretty(run_config)?;
        tmp.write_all(json.as_bytes()).at(tmp.path())?;
        tmp.flush().at(tmp.path())?;
        info!(path = %tmp.path().display(), "run config written");

        external::run_script(&ExternalInvocation {
            executable: executable.to_string(),
            script,
            config_path: tmp.path().to_path_buf(),
            expected_iter_secs,
            overhead_secs,
        })?;

        Ok(CellOutcome::Succeeded {
            result_path: run_config.output_json_path.clone(),
        })
    }
}

/// Count outcomes as `(succeeded, failed, skipped)`.
pub fn tally(reports: &[CellReport]) -> (usize, usize, usize) {
    reports
        .iter()
        .fold((0, 0, 0), |(ok, failed, skipped), r| match r.outcome {
            CellOutcome::Succeeded { .. } => (ok + 1, failed, skipped),
            CellOutcome::Failed { .. } => (ok, failed + 1, skipped),
            CellOutcome::Skipped { .. } => (ok, failed, skipped + 1),
        })
}
