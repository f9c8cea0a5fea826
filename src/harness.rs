use std::hint::black_box;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{BenchError, Result};
use crate::field::Field;
use crate::schema::Timings;

/// Integration window handed to a provider: start time and horizon.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimeWindow {
    pub t0: f64,
    pub horizon: f64,
}

/// Shape of the timed section of one cell.
#[derive(Clone, Debug)]
pub struct LoopPlan {
    pub iterates_per_run: u32,
    pub num_runs: u32,
    pub t0: f64,
    pub horizon: f64,
    pub dt0: f64,
}

impl LoopPlan {
    /// Iterate `k` starts `k` steps of `dt0` after `t0` so repeats differ.
    pub fn window(&self, k: u32) -> TimeWindow {
        TimeWindow {
            t0: self.t0 + f64::from(k) * self.dt0,
            horizon: self.horizon,
        }
    }
}

/// Run `f` once and return its output with the elapsed seconds.
pub fn time_once<T>(f: impl FnOnce() -> Result<T>) -> Result<(T, f64)> {
    let start = Instant::now();
    let out = f()?;
    Ok((out, start.elapsed().as_secs_f64()))
}

/// Execute the outer/inner benchmark loops and return one wall time per outer run.
///
/// The clock is read once per outer run; per-iterate cost is derived later by
/// dividing by `iterates_per_run`.
pub fn run_loops<T>(plan: &LoopPlan, mut f: impl FnMut(TimeWindow) -> Result<T>) -> Result<Vec<f64>> {
    let mut loop_times = Vec::with_capacity(plan.num_runs as usize);
    for run in 0..plan.num_runs {
        debug!(run = run + 1, of = plan.num_runs, "starting benchmark run");
        let start = Instant::now();
        for k in 0..plan.iterates_per_run {
            black_box(f(plan.window(k))?);
        }
        let elapsed = start.elapsed().as_secs_f64();
        info!(
            run = run + 1,
            of = plan.num_runs,
            seconds = elapsed,
            "benchmark run completed"
        );
        loop_times.push(elapsed);
    }
    Ok(loop_times)
}

pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Population standard deviation (divides by `n`).
pub fn population_std(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let m = mean(samples);
    let var = samples.iter().map(|s| (s - m) * (s - m)).sum::<f64>() / samples.len() as f64;
    var.sqrt()
}

/// Reduce raw loop times to the persisted statistics.
///
/// A single outer run reports both standard deviations as exactly `0.0`.
pub fn summarize(warmup_time: f64, loop_times: &[f64], iterates_per_run: u32) -> Timings {
    let iters = f64::from(iterates_per_run.max(1));
    let per_iter_times: Vec<f64> = loop_times.iter().map(|t| t / iters).collect();

    let (std_loop_time, std_per_iter_time) = if loop_times.len() == 1 {
        (0.0, 0.0)
    } else {
        (population_std(loop_times), population_std(&per_iter_times))
    };

    Timings {
        warmup_time,
        mean_loop_time: mean(loop_times),
        mean_per_iter_time: mean(&per_iter_times),
        std_loop_time,
        std_per_iter_time,
        loop_times: loop_times.to_vec(),
        per_iter_times,
    }
}

/// Mean absolute error between two fields of identical shape.
///
/// With `include_edges == false` the outermost ring of every axis is dropped,
/// since finite differences there are one-sided.
pub fn mean_absolute_error(truth: &Field, est: &Field, include_edges: bool) -> Result<f64> {
    if truth.shape != est.shape {
        return Err(BenchError::field(format!(
            "reference shape {:?} does not match computed shape {:?}",
            truth.shape, est.shape
        )));
    }

    let shape = &truth.shape;
    let interior = |flat: usize| -> bool {
        if include_edges {
            return true;
        }
        let mut rem = flat;
        for &extent in shape.iter().rev() {
            let idx = rem % extent;
            rem /= extent;
            if extent > 2 && (idx == 0 || idx == extent - 1) {
                return false;
            }
        }
        true
    };

    let mut sum = 0.0;
    let mut n = 0usize;
    for (i, (a, b)) in truth.values.iter().zip(&est.values).enumerate() {
        if interior(i) {
            sum += (a - b).abs();
            n += 1;
        }
    }
    if n == 0 {
        return Err(BenchError::field("no samples left to compare"));
    }
    Ok(sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_run_std_is_exactly_zero() {
        let t = summarize(0.5, &[3.0], 4);
        assert_eq!(t.std_per_iter_time, 0.0);
        assert_eq!(t.std_loop_time, 0.0);
        assert_eq!(t.mean_per_iter_time, 0.75);
        assert_eq!(t.per_iter_times, vec![0.75]);
        assert_eq!(t.loop_times, vec![3.0]);
    }

    #[test]
    fn test_multi_run_uses_population_std() {
        let t = summarize(0.1, &[2.0, 4.0, 6.0], 2);
        assert_eq!(t.per_iter_times, vec![1.0, 2.0, 3.0]);
        assert!((t.mean_per_iter_time - 2.0).abs() < 1e-12);
        assert!((t.mean_loop_time - 4.0).abs() < 1e-12);
        let expected = (2.0f64 / 3.0).sqrt();
        assert!((t.std_per_iter_time - expected).abs() < 1e-12);
        assert!((t.std_loop_time - 2.0 * expected).abs() < 1e-12);
    }

    #[test]
    fn test_windows_shift_by_dt0() {
        let plan = LoopPlan {
            iterates_per_run: 3,
            num_runs: 2,
            t0: 1.0,
            horizon: 5.0,
            dt0: 0.5,
        };
        let mut seen = Vec::new();
        let times = run_loops(&plan, |w| {
            seen.push(w);
            Ok(())
        })
        .unwrap();
        assert_eq!(times.len(), 2);
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0].t0, 1.0);
        assert_eq!(seen[2].t0, 2.0);
        assert_eq!(seen[3].t0, 1.0);
        assert!(seen.iter().all(|w| w.horizon == 5.0));
    }

    #[test]
    fn test_run_loops_propagates_failure() {
        let plan = LoopPlan {
            iterates_per_run: 2,
            num_runs: 2,
            t0: 0.0,
            horizon: 1.0,
            dt0: 0.1,
        };
        let err = run_loops(&plan, |_| -> Result<()> { Err(BenchError::validation("boom")) });
        assert!(err.is_err());
    }

    #[test]
    fn test_mae_interior_only() {
        let truth = Field::zeros(vec![3, 3]);
        let mut est = Field::zeros(vec![3, 3]);
        // Edges carry large errors, centre has 0.5.
        est.values = vec![9.0, 9.0, 9.0, 9.0, 0.5, 9.0, 9.0, 9.0, 9.0];
        assert_eq!(mean_absolute_error(&truth, &est, false).unwrap(), 0.5);
        assert_eq!(
            mean_absolute_error(&truth, &est, true).unwrap(),
            (8.0 * 9.0 + 0.5) / 9.0
        );
    }

    #[test]
    fn test_mae_shape_mismatch() {
        let a = Field::zeros(vec![3, 3]);
        let b = Field::zeros(vec![3, 4]);
        assert!(mean_absolute_error(&a, &b, false).is_err());
    }
}
