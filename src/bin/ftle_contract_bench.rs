use clap::{Parser, Subcommand};
use ftle_contract_bench::config::SuiteConfig;
use ftle_contract_bench::dispatch::{tally, CellOutcome, Dispatcher};
use ftle_contract_bench::error::{BenchError, Result};
use ftle_contract_bench::external::{self, ExternalInvocation, FOREIGN_FAILURE_EXIT_CODE};
use ftle_contract_bench::field::{self, GenerateConfig};
use ftle_contract_bench::matrix::build_matrix;
use ftle_contract_bench::providers::{self, Provider};
use ftle_contract_bench::report::{self, ReportMode};
use ftle_contract_bench::runner;
use ftle_contract_bench::schema::FlowType;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the benchmark matrix: cells to run and skipped pairs.
    Plan,

    /// Run every matrix cell sequentially. Failed cells do not stop the batch.
    Bench {
        /// Only run this package (case-insensitive).
        #[arg(long)]
        package: Option<String>,

        /// Only run this case id.
        #[arg(long)]
        case: Option<String>,
    },

    /// Direct-invocation runner for the built-in providers.
    Run {
        #[arg(long, value_enum)]
        provider: Provider,

        /// Run configuration as an inline JSON string.
        #[arg(long, value_name = "JSON")]
        run_config_json: String,
    },

    /// Run a benchmark script inside an external numeric environment.
    External {
        /// Script file; its stem is called as a function.
        #[arg(long, value_name = "FILE")]
        script: PathBuf,

        /// JSON run configuration handed to the script.
        #[arg(long, value_name = "FILE")]
        run_config_json_path: PathBuf,

        /// Interpreter executable.
        #[arg(long, default_value = "matlab")]
        executable: String,

        /// Estimated seconds per iterate, used for the timeout.
        #[arg(long, default_value_t = 200.0)]
        expected_iter_time: f64,

        /// Fixed startup allowance added to the timeout, in seconds.
        #[arg(long, default_value_t = 300.0)]
        overhead: f64,
    },

    /// Aggregate results into per-case markdown tables.
    Report {
        /// `all` also updates the host document between its markers.
        #[arg(value_enum, default_value_t = ReportMode::All)]
        mode: ReportMode,
    },

    /// Write synthetic velocity fields for a data case.
    ///
    /// Samples the double gyre on the case's domain, optionally adding
    /// seeded noise, into the case's `vel_data_paths`.
    GenerateData {
        /// Data case whose paths and domain are used.
        #[arg(long, default_value = "qge_ftle")]
        case: String,

        /// Grid size as `NT NX NY`.
        #[arg(long, num_args = 3, value_names = ["NT", "NX", "NY"], default_values_t = [41usize, 101, 51])]
        shape: Vec<usize>,

        /// Amplitude of uniform noise added per sample.
        #[arg(long, default_value_t = 0.0)]
        noise: f64,

        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Also write a reference FTLE field for the case's window.
        #[arg(long, default_value_t = false)]
        reference: bool,

        /// RK4 steps used for the reference field.
        #[arg(long, default_value_t = 1000)]
        reference_steps: u64,
    },

    /// Show the header of a field file.
    FieldInfo {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
}

#[derive(Parser, Debug)]
#[command(name = "ftle-contract-bench")]
#[command(about = "Benchmark matrix runner and report generator for FTLE providers")]
struct Args {
    /// Suite configuration (JSON). Defaults to the built-in tables rooted at the
    /// current directory.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Override the results directory.
    #[arg(long, value_name = "DIR", global = true)]
    results_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

fn load_suite(args: &Args) -> Result<SuiteConfig> {
    let mut cfg = match &args.config {
        Some(path) => SuiteConfig::load(path)?,
        None => {
            let root = std::env::current_dir().map_err(|source| BenchError::Io {
                path: PathBuf::from("."),
                source,
            })?;
            let cfg = SuiteConfig::builtin(&root);
            cfg.validate()?;
            cfg
        }
    };
    if let Some(dir) = &args.results_dir {
        if let Ok(rel) = cfg.report.sections_dir.strip_prefix(&cfg.results_dir) {
            cfg.report.sections_dir = dir.join(rel);
        }
        cfg.results_dir = dir.clone();
    }
    Ok(cfg)
}

fn plan(cfg: &SuiteConfig) {
    let matrix = build_matrix(cfg);
    for cell in &matrix.cells {
        println!("run   {}", cell.session_name());
    }
    for skip in &matrix.skipped {
        println!("skip  {} / {}", skip.package, skip.case_id);
    }
}

fn bench(cfg: &SuiteConfig, package: Option<&str>, case: Option<&str>) -> Result<()> {
    let mut matrix = build_matrix(cfg);
    matrix.retain(package, case);
    if matrix.cells.is_empty() {
        warn!("no cells match the requested filters");
        return Ok(());
    }

    let dispatcher = Dispatcher::new(cfg);
    dispatcher.ensure_results_dir()?;
    let reports = dispatcher.run_all(&matrix);

    for r in &reports {
        let status = match &r.outcome {
            CellOutcome::Succeeded { .. } => "ok".to_string(),
            CellOutcome::Failed { reason } => format!("FAILED: {reason}"),
            CellOutcome::Skipped { reason } => format!("skipped: {reason}"),
        };
        println!("{:<32} {status}", r.session);
    }
    let (ok, failed, skipped) = tally(&reports);
    info!(succeeded = ok, failed, skipped, "benchmark matrix finished");
    Ok(())
}

fn generate_data(
    cfg: &SuiteConfig,
    case_id: &str,
    shape: &[usize],
    noise: f64,
    seed: u64,
    reference: Option<u64>,
) -> Result<()> {
    let case = cfg
        .case(case_id)
        .ok_or_else(|| BenchError::validation(format!("unknown case '{case_id}'")))?;
    if case.flow_type != FlowType::Data {
        return Err(BenchError::validation(format!(
            "case '{case_id}' is not a data case"
        )));
    }
    let paths = case
        .flow_data
        .vel_data_paths
        .as_ref()
        .ok_or_else(|| BenchError::validation(format!("case '{case_id}' has no vel_data_paths")))?;
    let domain: [[f64; 2]; 3] = case.flow_data.domain.as_slice().try_into().map_err(|_| {
        BenchError::validation(format!("case '{case_id}' domain needs (t, x, y) intervals"))
    })?;
    let shape: [usize; 3] = shape
        .try_into()
        .map_err(|_| BenchError::validation("shape takes exactly three values"))?;

    let gen_config = GenerateConfig {
        shape,
        domain,
        noise,
        seed,
    };
    let start = std::time::Instant::now();
    let (u, v) = field::generate_velocity(&gen_config);
    for (path, f) in [(&paths.u, &u), (&paths.v, &v)] {
        write_field_file(path, f, seed)?;
    }
    info!(
        case = case_id,
        shape = ?shape,
        seconds = start.elapsed().as_secs_f64(),
        "velocity fields written"
    );

    if let Some(steps) = reference {
        let truth = providers::reference_field(case, steps)?;
        let dir = paths.u.parent().unwrap_or_else(|| Path::new("."));
        let out = dir.join(format!("{case_id}_true.fld"));
        write_field_file(&out, &truth, seed)?;
        eprintln!("\nReference saved: {}", out.display());
        eprintln!(
            "  error_data: {{ \"path\": \"{}\", \"t0\": {}, \"T\": {} }}",
            out.display(),
            case.flow_data.t0,
            case.flow_data.horizon
        );
    }
    Ok(())
}

fn write_field_file(path: &Path, f: &field::Field, seed: u64) -> Result<()> {
    let io_err = |source| BenchError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(io_err)?;
    }
    field::write_field(path, f, seed).map_err(io_err)?;
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    eprintln!(
        "Wrote {} ({:?}, {:.2} MB)",
        path.display(),
        f.shape,
        size as f64 / 1_048_576.0
    );
    Ok(())
}

fn field_info(path: &Path) -> Result<()> {
    let io_err = |source| BenchError::Io {
        path: path.to_path_buf(),
        source,
    };
    let meta = field::read_field_meta(path).map_err(io_err)?;
    let size = fs::metadata(path).map_err(io_err)?.len();
    eprintln!("Field: {}", path.display());
    eprintln!("  Shape: {:?}", meta.shape);
    eprintln!("  Seed: {}", meta.seed);
    eprintln!("  File size: {:.2} MB", size as f64 / 1_048_576.0);
    Ok(())
}

fn exit_code(err: &BenchError) -> ExitCode {
    match err {
        BenchError::ProcessInvocation {
            exit_code: Some(code),
            ..
        } if *code == FOREIGN_FAILURE_EXIT_CODE => ExitCode::from(FOREIGN_FAILURE_EXIT_CODE as u8),
        _ => ExitCode::FAILURE,
    }
}

fn dispatch(args: &Args) -> Result<()> {
    match &args.cmd {
        Command::Run {
            provider,
            run_config_json,
        } => runner::run_inline(*provider, run_config_json).map(|_| ()),
        Command::External {
            script,
            run_config_json_path,
            executable,
            expected_iter_time,
            overhead,
        } => external::run_script(&ExternalInvocation {
            executable: executable.clone(),
            script: script.clone(),
            config_path: run_config_json_path.clone(),
            expected_iter_secs: *expected_iter_time,
            overhead_secs: *overhead,
        })
        .map(|_| ()),
        Command::FieldInfo { path } => field_info(path),
        Command::Plan => {
            plan(&load_suite(args)?);
            Ok(())
        }
        Command::Bench { package, case } => {
            bench(&load_suite(args)?, package.as_deref(), case.as_deref())
        }
        Command::Report { mode } => {
            let cfg = load_suite(args)?;
            let summary = report::generate_report(&cfg.results_dir, &cfg.report, *mode)?;
            info!(
                records = summary.records,
                sections = summary.sections.len(),
                splice = ?summary.splice,
                "report complete"
            );
            Ok(())
        }
        Command::GenerateData {
            case,
            shape,
            noise,
            seed,
            reference,
            reference_steps,
        } => generate_data(
            &load_suite(args)?,
            case,
            shape,
            *noise,
            *seed,
            reference.then_some(*reference_steps),
        ),
    }
}

fn main() -> ExitCode {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match dispatch(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            exit_code(&e)
        }
    }
}
