//! External-interpreter adapter.
//!
//! Runs a benchmark script inside a foreign numeric environment (MATLAB-style
//! `-batch` invocation). The script reads the JSON config file it is handed and
//! writes its own results document; this side only observes the exit status and
//! captures output for diagnostics. Results are never parsed here.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{error, info, warn};

use crate::error::{BenchError, IoContext, Result};

/// Exit code the generated command uses when the script itself raised.
pub const FOREIGN_FAILURE_EXIT_CODE: i32 = 3;

/// Cap on captured output per stream.
const MAX_CAPTURE_BYTES: usize = 64 * 1024;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long output is still collected once the interpreter is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to run one script.
#[derive(Clone, Debug)]
pub struct ExternalInvocation {
    pub executable: String,
    pub script: PathBuf,
    pub config_path: PathBuf,
    pub expected_iter_secs: f64,
    pub overhead_secs: f64,
}

/// Captured streams of a finished (or killed) interpreter.
#[derive(Debug)]
pub struct ProcessOutput {
    /// Script stem, as called inside the interpreter.
    pub script: String,
    pub timeout: Duration,
    /// `None` when the interpreter was killed at the timeout.
    pub status: Option<ExitStatus>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

/// Quote a string as a single-quoted literal for the foreign environment.
fn quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Build the `-batch` command: change into the script directory, call the script
/// as a function with the config path, and map an internal error to
/// [`FOREIGN_FAILURE_EXIT_CODE`].
pub fn composite_command(script_dir: &Path, script_name: &str, config_path: &Path) -> String {
    let dir = quote(&script_dir.to_string_lossy());
    let cfg = quote(&config_path.to_string_lossy());
    let name = quote(script_name);
    format!(
        "cd({dir}); try; {script_name}({cfg}); \
         catch e; fprintf(2, 'Error in %s: %s\\n', {name}, getReport(e, 'extended', 'hyperlinks', 'off')); \
         exit({FOREIGN_FAILURE_EXIT_CODE}); end; exit(0);"
    )
}

/// `expected_iter_secs * iterates * runs + overhead`, with the counts read back
/// from the config file the script will receive.
pub fn compute_timeout(config_path: &Path, expected_iter_secs: f64, overhead_secs: f64) -> Result<Duration> {
    let text = fs::read_to_string(config_path).at(config_path)?;
    let value: Value = serde_json::from_str(&text)?;
    let count = |key: &str| {
        value
            .get(key)
            .and_then(Value::as_u64)
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                BenchError::validation(format!(
                    "{} has no valid {key}",
                    config_path.display()
                ))
            })
    };
    let iterates = count("iterates_per_run")? as f64;
    let runs = count("num_benchmark_runs")? as f64;
    let secs = expected_iter_secs * iterates * runs + overhead_secs;
    if !secs.is_finite() || secs <= 0.0 {
        return Err(BenchError::validation(format!("invalid timeout {secs}s")));
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Run the script and return its captured output on success.
///
/// Non-zero exit, timeout and a missing executable all come back as
/// [`BenchError::ProcessInvocation`]; output is logged before returning.
pub fn run_script(inv: &ExternalInvocation) -> Result<ProcessOutput> {
    capture_script(inv)?.into_result()
}

/// Run the script and capture whatever it printed, however it ended.
///
/// Only setup and spawn problems are errors here. A timed-out interpreter is
/// killed along with its process group and comes back with `timed_out` set and
/// the output read so far.
pub fn capture_script(inv: &ExternalInvocation) -> Result<ProcessOutput> {
    if !inv.script.is_file() {
        return Err(BenchError::validation(format!(
            "script not found: {}",
            inv.script.display()
        )));
    }
    if !inv.config_path.is_file() {
        return Err(BenchError::validation(format!(
            "run config file not found: {}",
            inv.config_path.display()
        )));
    }

    let script = fs::canonicalize(&inv.script).at(&inv.script)?;
    let config_path = fs::canonicalize(&inv.config_path).at(&inv.config_path)?;
    let script_dir = script.parent().unwrap_or_else(|| Path::new("."));
    let script_name = script
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| BenchError::validation(format!("bad script name: {}", script.display())))?
        .to_string();

    let timeout = compute_timeout(&config_path, inv.expected_iter_secs, inv.overhead_secs)?;
    let command = composite_command(script_dir, &script_name, &config_path);
    info!(
        executable = %inv.executable,
        script = %script.display(),
        config = %config_path.display(),
        timeout_secs = timeout.as_secs_f64(),
        "launching external interpreter"
    );

    let mut cmd = Command::new(&inv.executable);
    cmd.args(["-nodisplay", "-nosplash", "-batch", &command])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let deadline = Instant::now() + timeout;
    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BenchError::process(format!(
                "executable '{}' not found; put it on PATH or pass its full path",
                inv.executable
            ))
        } else {
            BenchError::process(format!("spawning '{}': {e}", inv.executable))
        }
    })?;

    let (tx, rx) = mpsc::channel();
    spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
    spawn_reader(child.stderr.take(), Stream::Stderr, tx);

    let status = match wait_until(&mut child, deadline) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            terminate(&mut child);
            None
        }
        Err(e) => {
            terminate(&mut child);
            return Err(BenchError::process(format!("waiting for interpreter: {e}")));
        }
    };
    let (stdout, stderr) = drain(&rx, Instant::now() + DRAIN_GRACE);

    Ok(ProcessOutput {
        script: script_name,
        timeout,
        status,
        stdout,
        stderr,
        timed_out: status.is_none(),
    })
}

impl ProcessOutput {
    pub fn exit_code(&self) -> Option<i32> {
        self.status.and_then(|s| s.code())
    }

    /// Success for a zero exit; otherwise log the streams and fail the cell.
    pub fn into_result(self) -> Result<ProcessOutput> {
        match self.status {
            Some(s) if s.success() => {
                info!(script = %self.script, "external benchmark completed");
                if !self.stdout.trim().is_empty() {
                    info!(stdout = %self.stdout.trim(), "interpreter stdout");
                }
                Ok(self)
            }
            Some(s) => {
                log_streams(&self);
                let message = if s.code() == Some(FOREIGN_FAILURE_EXIT_CODE) {
                    format!("{} raised an error inside the interpreter", self.script)
                } else {
                    format!("{} failed: {s}", self.script)
                };
                Err(BenchError::ProcessInvocation {
                    message,
                    exit_code: s.code(),
                })
            }
            None => {
                log_streams(&self);
                Err(BenchError::process(format!(
                    "{} timed out after {:.1}s",
                    self.script,
                    self.timeout.as_secs_f64()
                )))
            }
        }
    }
}

fn log_streams(output: &ProcessOutput) {
    if !output.stdout.trim().is_empty() {
        warn!(stdout = %output.stdout.trim(), timed_out = output.timed_out, "interpreter stdout");
    }
    if !output.stderr.trim().is_empty() {
        error!(stderr = %output.stderr.trim(), timed_out = output.timed_out, "interpreter stderr");
    }
}

#[derive(Clone, Copy, Debug)]
enum Stream {
    Stdout,
    Stderr,
}

/// Forward chunks of `stream` until EOF. Bytes past the capture cap are read
/// and dropped so the child never stalls on a full pipe.
fn spawn_reader<R: Read + Send + 'static>(
    stream: Option<R>,
    tag: Stream,
    tx: Sender<(Stream, Vec<u8>)>,
) {
    let Some(mut stream) = stream else { return };
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        let mut forwarded = 0usize;
        loop {
            let n = match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            };
            let keep = n.min(MAX_CAPTURE_BYTES.saturating_sub(forwarded));
            if keep == 0 {
                continue;
            }
            forwarded += keep;
            if tx.send((tag, buf[..keep].to_vec())).is_err() {
                break;
            }
        }
    });
}

/// Collect forwarded output until every reader hits EOF or `until` passes.
/// Descendants that outlive the kill can hold a pipe open; their output is
/// abandoned rather than waited on.
fn drain(rx: &Receiver<(Stream, Vec<u8>)>, until: Instant) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    loop {
        match rx.recv_timeout(until.saturating_duration_since(Instant::now())) {
            Ok((Stream::Stdout, chunk)) => stdout.extend_from_slice(&chunk),
            Ok((Stream::Stderr, chunk)) => stderr.extend_from_slice(&chunk),
            Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                warn!("interpreter output still open after exit; keeping what was read");
                break;
            }
        }
    }
    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Poll the child until it exits or `deadline` passes.
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return Ok(None);
        }
        std::thread::sleep(left.min(POLL_INTERVAL));
    }
}

/// Kill the interpreter and, on unix, every process in its group, then reap.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        // The child leads its own group, so its pid is the group id.
        let group = format!("-{}", child.id());
        let _ = Command::new("kill")
            .args(["-KILL", "--", &group])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_composite_command_shape() {
        let cmd = composite_command(
            Path::new("/opt/scripts"),
            "lcstool_dg_benchmark",
            Path::new("/tmp/cfg_lcstool_dg_ftle_x.json"),
        );
        assert!(cmd.starts_with("cd('/opt/scripts'); try; "));
        assert!(cmd.contains("lcstool_dg_benchmark('/tmp/cfg_lcstool_dg_ftle_x.json');"));
        assert!(cmd.contains("catch e;"));
        assert!(cmd.contains(&format!("exit({FOREIGN_FAILURE_EXIT_CODE}); end; exit(0);")));
    }

    #[test]
    fn test_quote_escapes_single_quotes() {
        assert_eq!(quote("it's"), "'it''s'");
    }

    #[test]
    fn test_timeout_reads_counts_from_config_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(
            &path,
            json!({ "iterates_per_run": 5, "num_benchmark_runs": 3 }).to_string(),
        )
        .unwrap();
        let t = compute_timeout(&path, 2.0, 10.0).unwrap();
        assert_eq!(t, Duration::from_secs(40));
    }

    #[test]
    fn test_timeout_rejects_missing_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, json!({ "iterates_per_run": 5 }).to_string()).unwrap();
        assert!(compute_timeout(&path, 2.0, 10.0).is_err());
    }

    #[test]
    fn test_missing_executable_is_process_error() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("bench.m");
        fs::write(&script, "function bench(p)\nend\n").unwrap();
        let cfg = dir.path().join("cfg.json");
        fs::write(
            &cfg,
            json!({ "iterates_per_run": 1, "num_benchmark_runs": 1 }).to_string(),
        )
        .unwrap();

        let err = run_script(&ExternalInvocation {
            executable: "ftle-bench-no-such-interpreter".into(),
            script,
            config_path: cfg,
            expected_iter_secs: 1.0,
            overhead_secs: 1.0,
        })
        .unwrap_err();
        assert!(matches!(err, BenchError::ProcessInvocation { .. }));
        assert!(err.to_string().contains("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_zero_exit_is_failure() {
        let dir = tempdir().unwrap();
        let script = dir.path().join("bench.m");
        fs::write(&script, "").unwrap();
        let cfg = dir.path().join("cfg.json");
        fs::write(
            &cfg,
            json!({ "iterates_per_run": 1, "num_benchmark_runs": 1 }).to_string(),
        )
        .unwrap();

        let err = run_script(&ExternalInvocation {
            executable: "false".into(),
            script,
            config_path: cfg,
            expected_iter_secs: 1.0,
            overhead_secs: 5.0,
        })
        .unwrap_err();
        assert!(matches!(
            err,
            BenchError::ProcessInvocation {
                exit_code: Some(1),
                ..
            }
        ));
    }

    #[cfg(unix)]
    fn fake_interpreter(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-interpreter");
        fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[test]
    fn test_timeout_kills_interpreter_and_keeps_partial_output() {
        let dir = tempdir().unwrap();
        // A launcher that leaves a background child holding the pipes.
        let exe = fake_interpreter(dir.path(), "echo started\nsleep 8 &\nsleep 8");
        let script = dir.path().join("bench.m");
        fs::write(&script, "").unwrap();
        let cfg = dir.path().join("cfg.json");
        fs::write(
            &cfg,
            json!({ "iterates_per_run": 1, "num_benchmark_runs": 1 }).to_string(),
        )
        .unwrap();

        let start = Instant::now();
        let output = capture_script(&ExternalInvocation {
            executable: exe.to_string_lossy().into_owned(),
            script,
            config_path: cfg,
            expected_iter_secs: 0.0,
            overhead_secs: 0.5,
        })
        .unwrap();
        let elapsed = start.elapsed();

        assert!(output.timed_out);
        assert!(output.status.is_none());
        assert_eq!(output.exit_code(), None);
        assert!(output.stdout.contains("started"), "stdout: {:?}", output.stdout);
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");

        let err = output.into_result().unwrap_err();
        assert!(matches!(err, BenchError::ProcessInvocation { exit_code: None, .. }));
        assert!(err.to_string().contains("bench timed out after 0.5s"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_zero_exit_returns_captured_streams() {
        let dir = tempdir().unwrap();
        let exe = fake_interpreter(dir.path(), "echo out\necho err >&2\nexit 0");
        let script = dir.path().join("bench.m");
        fs::write(&script, "").unwrap();
        let cfg = dir.path().join("cfg.json");
        fs::write(
            &cfg,
            json!({ "iterates_per_run": 1, "num_benchmark_runs": 1 }).to_string(),
        )
        .unwrap();

        let output = run_script(&ExternalInvocation {
            executable: exe.to_string_lossy().into_owned(),
            script,
            config_path: cfg,
            expected_iter_secs: 1.0,
            overhead_secs: 5.0,
        })
        .unwrap();
        assert!(!output.timed_out);
        assert_eq!(output.exit_code(), Some(0));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
