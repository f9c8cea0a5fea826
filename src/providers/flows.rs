//! Velocity fields the built-in providers integrate.

use std::f64::consts::PI;

use crate::error::{BenchError, Result};
use crate::field::{linspace, Field};

/// Closed-form 2D flows selectable by `flow_str`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnalyticFlow {
    DoubleGyre,
    BickleyJet,
}

// Double gyre (Shadden et al.)
const DG_A: f64 = 0.1;
const DG_EPS: f64 = 0.25;
const DG_OMEGA: f64 = 0.2 * PI;

// Bickley jet in Mm and days (Rypina et al.)
const BJ_U: f64 = 62.66e-6 * 86_400.0;
const BJ_L: f64 = 1.77;
const BJ_R0: f64 = 6.371;
const BJ_EPS: [f64; 3] = [0.075, 0.4, 0.3];
const BJ_C: [f64; 3] = [0.1446 * BJ_U, 0.205 * BJ_U, 0.461 * BJ_U];

impl AnalyticFlow {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "double_gyre" => Some(AnalyticFlow::DoubleGyre),
            "bickley_jet" => Some(AnalyticFlow::BickleyJet),
            _ => None,
        }
    }

    pub fn velocity(&self, t: f64, p: [f64; 2]) -> [f64; 2] {
        let [x, y] = p;
        match self {
            AnalyticFlow::DoubleGyre => {
                let a = DG_EPS * (DG_OMEGA * t).sin();
                let b = 1.0 - 2.0 * a;
                let f = a * x * x + b * x;
                let df = 2.0 * a * x + b;
                [
                    -PI * DG_A * (PI * f).sin() * (PI * y).cos(),
                    PI * DG_A * (PI * f).cos() * (PI * y).sin() * df,
                ]
            }
            AnalyticFlow::BickleyJet => {
                let s = y / BJ_L;
                let sech2 = 1.0 / s.cosh().powi(2);
                let mut sum_cos = 0.0;
                let mut sum_sin = 0.0;
                for n in 0..3 {
                    let k = 2.0 * (n as f64 + 1.0) / BJ_R0;
                    let phase = k * (x - BJ_C[n] * t);
                    sum_cos += BJ_EPS[n] * phase.cos();
                    sum_sin -= BJ_EPS[n] * k * phase.sin();
                }
                [
                    BJ_U * sech2 * (1.0 + 2.0 * s.tanh() * sum_cos),
                    BJ_U * BJ_L * sech2 * sum_sin,
                ]
            }
        }
    }
}

/// Velocity samples on a regular `(t, x, y)` grid, trilinearly interpolated.
#[derive(Clone, Debug)]
pub struct GriddedVelocity {
    t: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
    u: Vec<f64>,
    v: Vec<f64>,
}

/// Index of the cell containing `q` and the fractional offset inside it.
/// Queries outside the axis are clamped to the boundary.
fn locate(axis: &[f64], q: f64) -> (usize, f64) {
    let n = axis.len();
    if n < 2 {
        return (0, 0.0);
    }
    let lo = axis[0];
    let h = (axis[n - 1] - lo) / (n - 1) as f64;
    if h == 0.0 {
        return (0, 0.0);
    }
    let s = ((q - lo) / h).clamp(0.0, (n - 1) as f64);
    let i = (s.floor() as usize).min(n - 2);
    (i, s - i as f64)
}

impl GriddedVelocity {
    /// `domain` is `((t0, t1), (x0, x1), (y0, y1))`; `u` and `v` are `(nt, nx, ny)`.
    pub fn new(domain: &[[f64; 2]], u: Field, v: Field) -> Result<Self> {
        if domain.len() != 3 {
            return Err(BenchError::validation(format!(
                "data flow domain needs 3 intervals (t, x, y), got {}",
                domain.len()
            )));
        }
        if u.shape.len() != 3 || u.shape != v.shape {
            return Err(BenchError::field(format!(
                "velocity components must share a 3D shape, got {:?} and {:?}",
                u.shape, v.shape
            )));
        }
        if u.shape.iter().any(|&d| d < 2) {
            return Err(BenchError::field(format!(
                "velocity grid needs at least 2 samples per axis, got {:?}",
                u.shape
            )));
        }
        let (nt, nx, ny) = (u.shape[0], u.shape[1], u.shape[2]);
        Ok(Self {
            t: linspace(domain[0][0], domain[0][1], nt),
            x: linspace(domain[1][0], domain[1][1], nx),
            y: linspace(domain[2][0], domain[2][1], ny),
            u: u.values,
            v: v.values,
        })
    }

    pub fn x(&self) -> &[f64] {
        &self.x
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn velocity(&self, t: f64, p: [f64; 2]) -> [f64; 2] {
        let (it, ft) = locate(&self.t, t);
        let (ix, fx) = locate(&self.x, p[0]);
        let (iy, fy) = locate(&self.y, p[1]);
        let (nx, ny) = (self.x.len(), self.y.len());
        let idx = |a: usize, b: usize, c: usize| (a * nx + b) * ny + c;

        let mut out = [0.0; 2];
        for (dt, wt) in [(0usize, 1.0 - ft), (1, ft)] {
            for (dx, wx) in [(0usize, 1.0 - fx), (1, fx)] {
                for (dy, wy) in [(0usize, 1.0 - fy), (1, fy)] {
                    let w = wt * wx * wy;
                    if w == 0.0 {
                        continue;
                    }
                    let k = idx(
                        (it + dt).min(self.t.len() - 1),
                        (ix + dx).min(nx - 1),
                        (iy + dy).min(ny - 1),
                    );
                    out[0] += w * self.u[k];
                    out[1] += w * self.v[k];
                }
            }
        }
        out
    }
}

#[derive(Clone, Debug)]
pub enum VelocityField {
    Analytic(AnalyticFlow),
    Gridded(GriddedVelocity),
}

impl VelocityField {
    #[inline]
    pub fn velocity(&self, t: f64, p: [f64; 2]) -> [f64; 2] {
        match self {
            VelocityField::Analytic(flow) => flow.velocity(t, p),
            VelocityField::Gridded(grid) => grid.velocity(t, p),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_double_gyre_walls_are_impermeable() {
        let flow = AnalyticFlow::DoubleGyre;
        for &t in &[0.0, 2.5, 7.0] {
            for &x in &[0.1, 0.9, 1.7] {
                assert!(flow.velocity(t, [x, 0.0])[1].abs() < 1e-12);
                assert!(flow.velocity(t, [x, 1.0])[1].abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_flow_names() {
        assert_eq!(
            AnalyticFlow::from_name("Double_Gyre"),
            Some(AnalyticFlow::DoubleGyre)
        );
        assert_eq!(
            AnalyticFlow::from_name("bickley_jet"),
            Some(AnalyticFlow::BickleyJet)
        );
        assert_eq!(AnalyticFlow::from_name("abc_flow"), None);
    }

    #[test]
    fn test_gridded_reproduces_linear_field() {
        // u = x + 2y + t, v = -y, sampled exactly; trilinear interpolation is exact.
        let domain = [[0.0, 1.0], [0.0, 2.0], [0.0, 1.0]];
        let (nt, nx, ny) = (3, 5, 4);
        let t = linspace(0.0, 1.0, nt);
        let x = linspace(0.0, 2.0, nx);
        let y = linspace(0.0, 1.0, ny);
        let mut u = Vec::new();
        let mut v = Vec::new();
        for &tk in &t {
            for &xi in &x {
                for &yj in &y {
                    u.push(xi + 2.0 * yj + tk);
                    v.push(-yj);
                }
            }
        }
        let grid = GriddedVelocity::new(
            &domain,
            Field::new(vec![nt, nx, ny], u).unwrap(),
            Field::new(vec![nt, nx, ny], v).unwrap(),
        )
        .unwrap();

        let [gu, gv] = grid.velocity(0.3, [1.1, 0.45]);
        assert!((gu - (1.1 + 0.9 + 0.3)).abs() < 1e-12);
        assert!((gv + 0.45).abs() < 1e-12);
    }

    #[test]
    fn test_gridded_rejects_two_interval_domain() {
        let f = Field::zeros(vec![2, 2, 2]);
        let err = GriddedVelocity::new(&[[0.0, 1.0], [0.0, 1.0]], f.clone(), f).unwrap_err();
        assert!(matches!(err, BenchError::ConfigValidation { .. }));
    }
}
