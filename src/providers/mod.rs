//! Built-in direct-invocation providers.
//!
//! Both providers share one RK4/FTLE kernel and differ in how they schedule it:
//! `serial` walks the grid on the calling thread, `rayon` spreads grid rows over a
//! dedicated pool sized by the package's `num_threads` override.

pub mod flows;
pub mod ftle;

use clap::ValueEnum;
use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::config::BenchmarkCase;
use crate::error::{BenchError, IoContext, Result};
use crate::field::{linspace, load_field, Field};
use crate::harness::TimeWindow;
use crate::schema::{FlowType, RunConfig, RunMetadata};
use flows::{AnalyticFlow, GriddedVelocity, VelocityField};
use ftle::SeedGrid;

/// Default RK4 steps per flow-map evaluation.
pub const DEFAULT_RK4_STEPS: usize = 100;

/// Default pool size for the rayon provider.
pub const DEFAULT_NUM_THREADS: usize = 8;

/// Opaque compute step the runner times: one FTLE field per window.
pub trait FtleSolver {
    fn compute(&self, window: TimeWindow) -> Result<Field>;
}

/// Provider implementation selected by the `run` subcommand.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Provider {
    /// Single-threaded RK4 flow map + FTLE.
    Serial,
    /// Same kernel, grid rows parallelised with rayon.
    Rayon,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Serial => "serial",
            Provider::Rayon => "rayon",
        }
    }

    /// Label used in error documents when the config never parsed.
    pub fn label(&self) -> &'static str {
        match self {
            Provider::Serial => "RK4-Serial",
            Provider::Rayon => "RK4-Rayon",
        }
    }

    pub fn supports(&self, flow_type: FlowType) -> bool {
        match self {
            Provider::Serial => true,
            Provider::Rayon => flow_type == FlowType::Predefined,
        }
    }

    /// Where the error document goes when no output path can be recovered.
    pub fn default_error_path(&self) -> PathBuf {
        PathBuf::from(format!("{}_error.json", self.as_str()))
    }

    /// Prepare a solver for `cfg`. Data loading and pool creation happen here,
    /// outside the timed section.
    pub fn build(&self, cfg: &RunConfig) -> Result<Box<dyn FtleSolver>> {
        let flow_type = cfg.metadata.case_flow_type;
        if !self.supports(flow_type) {
            return Err(BenchError::UnsupportedFlow {
                provider: self.label().to_string(),
                message: format!("flow type '{}' is not implemented", flow_type.as_str()),
            });
        }

        let steps = cfg
            .package_param_u64("rk4_steps")
            .map(|s| s as usize)
            .unwrap_or(DEFAULT_RK4_STEPS);

        let (field, grid) = match flow_type {
            FlowType::Predefined => predefined_setup(self, cfg)?,
            FlowType::Data => data_setup(cfg)?,
        };

        let pool = match self {
            Provider::Serial => None,
            Provider::Rayon => {
                let threads = cfg
                    .package_param_u64("num_threads")
                    .map(|n| n as usize)
                    .unwrap_or(DEFAULT_NUM_THREADS);
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .build()
                    .map_err(|e| BenchError::validation(format!("thread pool: {e}")))?;
                Some(pool)
            }
        };

        Ok(Box::new(GridSolver {
            field,
            grid,
            steps,
            pool,
        }))
    }
}

/// High-accuracy FTLE field for `case` at its own window, computed with the
/// serial kernel. Used to produce `error_data` references.
pub fn reference_field(case: &BenchmarkCase, rk4_steps: u64) -> Result<Field> {
    const PACKAGE: &str = "reference";
    let cfg = RunConfig {
        flow_data: case.flow_data.clone(),
        iterates_per_run: 1,
        num_benchmark_runs: 1,
        error_data: None,
        pkg_specific_params: BTreeMap::from([(
            PACKAGE.to_string(),
            serde_json::json!({ "rk4_steps": rk4_steps }),
        )]),
        output_json_path: PathBuf::new(),
        metadata: RunMetadata {
            package_name: PACKAGE.to_string(),
            case_id: case.id.clone(),
            case_description: case.description.clone(),
            case_flow_type: case.flow_type,
        },
    };
    Provider::Serial.build(&cfg)?.compute(TimeWindow {
        t0: case.flow_data.t0,
        horizon: case.flow_data.horizon,
    })
}

fn predefined_setup(provider: &Provider, cfg: &RunConfig) -> Result<(VelocityField, SeedGrid)> {
    let flow_data = &cfg.flow_data;
    let flow = AnalyticFlow::from_name(&flow_data.flow_str).ok_or_else(|| {
        BenchError::UnsupportedFlow {
            provider: provider.label().to_string(),
            message: format!(
                "unknown predefined flow '{}' (double_gyre|bickley_jet)",
                flow_data.flow_str
            ),
        }
    })?;
    let [nx, ny] = flow_data
        .grid_shape
        .ok_or_else(|| BenchError::validation("predefined flow requires grid_shape"))?;
    if nx < 2 || ny < 2 {
        return Err(BenchError::validation(format!(
            "grid_shape must be at least 2x2, got {nx}x{ny}"
        )));
    }
    if flow_data.domain.len() != 2 {
        return Err(BenchError::validation(format!(
            "predefined flow domain needs 2 intervals (x, y), got {}",
            flow_data.domain.len()
        )));
    }
    let grid = SeedGrid {
        x: linspace(flow_data.domain[0][0], flow_data.domain[0][1], nx),
        y: linspace(flow_data.domain[1][0], flow_data.domain[1][1], ny),
    };
    Ok((VelocityField::Analytic(flow), grid))
}

fn data_setup(cfg: &RunConfig) -> Result<(VelocityField, SeedGrid)> {
    let paths = cfg
        .flow_data
        .vel_data_paths
        .as_ref()
        .ok_or_else(|| BenchError::validation("data flow requires vel_data_paths"))?;
    let (_, u) = load_field(&paths.u).at(&paths.u)?;
    let (_, v) = load_field(&paths.v).at(&paths.v)?;
    let gridded = GriddedVelocity::new(&cfg.flow_data.domain, u, v)?;
    let grid = SeedGrid {
        x: gridded.x().to_vec(),
        y: gridded.y().to_vec(),
    };
    Ok((VelocityField::Gridded(gridded), grid))
}

struct GridSolver {
    field: VelocityField,
    grid: SeedGrid,
    steps: usize,
    pool: Option<rayon::ThreadPool>,
}

impl FtleSolver for GridSolver {
    fn compute(&self, window: TimeWindow) -> Result<Field> {
        let flow_map = match &self.pool {
            Some(pool) => {
                pool.install(|| ftle::flow_map_par(&self.field, &self.grid, window, self.steps))
            }
            None => ftle::flow_map(&self.field, &self.grid, window, self.steps),
        };
        Ok(ftle::ftle_from_flow_map(&flow_map, &self.grid, window.horizon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FlowData, RunMetadata};
    use std::collections::BTreeMap;

    fn dg_config(package: &str, flow_type: FlowType) -> RunConfig {
        RunConfig {
            flow_data: FlowData {
                flow_str: "double_gyre".into(),
                grid_shape: Some([9, 5]),
                domain: vec![[0.0, 2.0], [0.0, 1.0]],
                t0: 0.0,
                horizon: 2.0,
                dt0: 0.5,
                vel_data_paths: None,
            },
            iterates_per_run: 1,
            num_benchmark_runs: 1,
            error_data: None,
            pkg_specific_params: BTreeMap::new(),
            output_json_path: PathBuf::from("unused.json"),
            metadata: RunMetadata {
                package_name: package.into(),
                case_id: "dg_ftle".into(),
                case_description: "Double Gyre FTLE".into(),
                case_flow_type: flow_type,
            },
        }
    }

    #[test]
    fn test_serial_and_rayon_agree() {
        let mut cfg = dg_config("RK4-Rayon", FlowType::Predefined);
        cfg.pkg_specific_params.insert(
            "rk4-rayon".into(),
            serde_json::json!({ "num_threads": 2, "rk4_steps": 20 }),
        );
        let window = TimeWindow {
            t0: 0.0,
            horizon: 2.0,
        };
        let par = Provider::Rayon.build(&cfg).unwrap().compute(window).unwrap();

        cfg.metadata.package_name = "RK4-Serial".into();
        cfg.pkg_specific_params.insert(
            "rk4-serial".into(),
            serde_json::json!({ "rk4_steps": 20 }),
        );
        let ser = Provider::Serial.build(&cfg).unwrap().compute(window).unwrap();
        assert_eq!(par, ser);
        assert_eq!(ser.shape, vec![9, 5]);
    }

    #[test]
    fn test_reference_field_uses_case_grid() {
        let mut case = crate::config::SuiteConfig::builtin(std::path::Path::new("/repo")).cases[0].clone();
        case.flow_data.grid_shape = Some([6, 4]);
        case.flow_data.horizon = 1.0;
        let field = reference_field(&case, 20).unwrap();
        assert_eq!(field.shape, vec![6, 4]);
        assert!(field.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_rayon_rejects_data_flow() {
        let cfg = dg_config("RK4-Rayon", FlowType::Data);
        let err = Provider::Rayon.build(&cfg).err().unwrap();
        assert!(matches!(err, BenchError::UnsupportedFlow { .. }));
    }

    #[test]
    fn test_unknown_predefined_flow() {
        let mut cfg = dg_config("RK4-Serial", FlowType::Predefined);
        cfg.flow_data.flow_str = "abc_flow".into();
        let err = Provider::Serial.build(&cfg).err().unwrap();
        assert!(err.to_string().contains("abc_flow"));
    }

    #[test]
    fn test_missing_velocity_file_is_io_error() {
        let mut cfg = dg_config("RK4-Serial", FlowType::Data);
        cfg.flow_data.domain = vec![[0.0, 1.0], [0.0, 2.0], [0.0, 1.0]];
        cfg.flow_data.vel_data_paths = Some(crate::schema::VelocityPaths {
            u: PathBuf::from("/definitely/missing/u.fld"),
            v: PathBuf::from("/definitely/missing/v.fld"),
        });
        let err = Provider::Serial.build(&cfg).err().unwrap();
        assert!(matches!(err, BenchError::Io { .. }));
    }
}
