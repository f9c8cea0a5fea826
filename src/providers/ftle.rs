//! RK4 flow map and FTLE kernel shared by the built-in providers.

use rayon::prelude::*;

use super::flows::VelocityField;
use crate::field::Field;
use crate::harness::TimeWindow;

/// Regular seed grid for the flow map.
#[derive(Clone, Debug)]
pub struct SeedGrid {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl SeedGrid {
    pub fn nx(&self) -> usize {
        self.x.len()
    }

    pub fn ny(&self) -> usize {
        self.y.len()
    }

    fn spacing(axis: &[f64]) -> f64 {
        if axis.len() < 2 {
            1.0
        } else {
            axis[1] - axis[0]
        }
    }
}

/// Advect `p` from `t0` over `horizon` with `steps` fixed RK4 steps.
#[inline]
pub fn rk4_endpoint(
    field: &VelocityField,
    mut p: [f64; 2],
    t0: f64,
    horizon: f64,
    steps: usize,
) -> [f64; 2] {
    let steps = steps.max(1);
    let h = horizon / steps as f64;
    let mut t = t0;
    for _ in 0..steps {
        let k1 = field.velocity(t, p);
        let k2 = field.velocity(t + 0.5 * h, [p[0] + 0.5 * h * k1[0], p[1] + 0.5 * h * k1[1]]);
        let k3 = field.velocity(t + 0.5 * h, [p[0] + 0.5 * h * k2[0], p[1] + 0.5 * h * k2[1]]);
        let k4 = field.velocity(t + h, [p[0] + h * k3[0], p[1] + h * k3[1]]);
        p[0] += h / 6.0 * (k1[0] + 2.0 * k2[0] + 2.0 * k3[0] + k4[0]);
        p[1] += h / 6.0 * (k1[1] + 2.0 * k2[1] + 2.0 * k3[1] + k4[1]);
        t += h;
    }
    p
}

fn flow_map_row(
    field: &VelocityField,
    grid: &SeedGrid,
    i: usize,
    window: TimeWindow,
    steps: usize,
) -> Vec<[f64; 2]> {
    grid.y
        .iter()
        .map(|&yj| rk4_endpoint(field, [grid.x[i], yj], window.t0, window.horizon, steps))
        .collect()
}

/// Flow map over the whole grid, row-major `(nx, ny)`.
pub fn flow_map(
    field: &VelocityField,
    grid: &SeedGrid,
    window: TimeWindow,
    steps: usize,
) -> Vec<[f64; 2]> {
    (0..grid.nx())
        .flat_map(|i| flow_map_row(field, grid, i, window, steps))
        .collect()
}

/// Same as [`flow_map`] with rows distributed over the current rayon pool.
pub fn flow_map_par(
    field: &VelocityField,
    grid: &SeedGrid,
    window: TimeWindow,
    steps: usize,
) -> Vec<[f64; 2]> {
    let rows: Vec<Vec<[f64; 2]>> = (0..grid.nx())
        .into_par_iter()
        .map(|i| flow_map_row(field, grid, i, window, steps))
        .collect();
    rows.into_iter().flatten().collect()
}

/// First-order one-sided differences on the edges, central inside.
#[inline]
fn diff(values: impl Fn(usize) -> f64, i: usize, n: usize, h: f64) -> f64 {
    if n < 2 {
        0.0
    } else if i == 0 {
        (values(1) - values(0)) / h
    } else if i == n - 1 {
        (values(n - 1) - values(n - 2)) / h
    } else {
        (values(i + 1) - values(i - 1)) / (2.0 * h)
    }
}

/// FTLE field `ln(sqrt(lambda_max(C))) / |T|` from a flow map.
pub fn ftle_from_flow_map(flow_map: &[[f64; 2]], grid: &SeedGrid, horizon: f64) -> Field {
    let (nx, ny) = (grid.nx(), grid.ny());
    let (dx, dy) = (SeedGrid::spacing(&grid.x), SeedGrid::spacing(&grid.y));
    let at = |i: usize, j: usize| flow_map[i * ny + j];
    let inv_t = if horizon == 0.0 { 0.0 } else { 1.0 / horizon.abs() };

    let mut values = Vec::with_capacity(nx * ny);
    for i in 0..nx {
        for j in 0..ny {
            let dxdx = diff(|k| at(k, j)[0], i, nx, dx);
            let dydx = diff(|k| at(k, j)[1], i, nx, dx);
            let dxdy = diff(|k| at(i, k)[0], j, ny, dy);
            let dydy = diff(|k| at(i, k)[1], j, ny, dy);

            // C = F^T F
            let a = dxdx * dxdx + dydx * dydx;
            let b = dxdx * dxdy + dydx * dydy;
            let c = dxdy * dxdy + dydy * dydy;
            let half_trace = 0.5 * (a + c);
            let disc = (0.25 * (a - c) * (a - c) + b * b).sqrt();
            let lambda_max = (half_trace + disc).max(f64::MIN_POSITIVE);

            values.push(0.5 * lambda_max.ln() * inv_t);
        }
    }

    Field {
        shape: vec![nx, ny],
        values,
    }
}
