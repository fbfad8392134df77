//! 2D elliptical Gaussian model and a hand-rolled Levenberg-Marquardt
//! nonlinear least-squares solver for per-island source fitting.
//!
//! No least-squares/optimisation crate is a dependency of this crate, so the
//! solver below is implemented directly over `ndarray` as a plain numeric
//! loop rather than depending on a fabricated crate.

use ndarray::Array2;

use crate::config::{CeresDiffMethod, CeresSolverType};
use crate::error::FitError;

/// A 2D elliptical Gaussian model: `amplitude * exp(-(...))`.
#[derive(Clone, Copy, Debug)]
pub struct Gaussian2D {
    pub amplitude: f64,
    pub x_mean: f64,
    pub y_mean: f64,
    pub x_stddev: f64,
    pub y_stddev: f64,
    pub theta: f64,
}

impl Gaussian2D {
    /// Evaluate the model at pixel coordinate `(x, y)`.
    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        let (s, c) = self.theta.sin_cos();
        let dx = x - self.x_mean;
        let dy = y - self.y_mean;
        let xr = c * dx + s * dy;
        let yr = -s * dx + c * dy;
        let a = xr * xr / (2.0 * self.x_stddev * self.x_stddev);
        let b = yr * yr / (2.0 * self.y_stddev * self.y_stddev);
        self.amplitude * (-(a + b)).exp()
    }

    fn params(&self) -> [f64; 6] {
        [
            self.amplitude,
            self.x_mean,
            self.y_mean,
            self.x_stddev,
            self.y_stddev,
            self.theta,
        ]
    }

    fn from_params(p: &[f64; 6]) -> Self {
        Self {
            amplitude: p[0],
            x_mean: p[1],
            y_mean: p[2],
            x_stddev: p[3],
            y_stddev: p[4],
            theta: p[5],
        }
    }
}

/// Outcome of a fit attempt: either a converged model, or a diagnostic
/// string recorded on the island (non-convergence is not an error, it is a
/// recorded diagnostic).
pub enum FitOutcome {
    Converged(Gaussian2D),
    Failed(String),
}

/// One pixel sample fed to the fitter: position and observed value.
#[derive(Clone, Copy)]
pub struct FitSample {
    pub x: f64,
    pub y: f64,
    pub value: f64,
}

/// Fit a 2D elliptical Gaussian to `samples` (the island's bounding-box
/// pixels restricted to its own label), starting from `initial_guess`.
///
/// `diff_method` selects analytic vs finite-difference Jacobian computation;
/// `solver_type` selects the damping schedule (trust-region LM vs a
/// fixed-damping Gauss-Newton fallback).
pub fn fit_gaussian_2d(
    samples: &[FitSample],
    initial_guess: Gaussian2D,
    diff_method: CeresDiffMethod,
    solver_type: CeresSolverType,
) -> Result<FitOutcome, FitError> {
    if samples.is_empty() {
        return Err(FitError::InvalidInput("no samples provided for fit".into()));
    }

    let analytic = matches!(
        diff_method,
        CeresDiffMethod::AnalyticDiff | CeresDiffMethod::AnalyticDiffSingleResBlk
    );

    let mut params = initial_guess.params();
    let mut lambda = match solver_type {
        CeresSolverType::TrustRegionDenseQr => 1.0e-3,
        CeresSolverType::LinearSearchBfgs | CeresSolverType::LinearSearchLbfgs => 1.0,
    };

    let max_iters = 100;
    let rel_tol = 1e-6;
    let mut prev_cost = residual_cost(samples, &params);

    for _ in 0..max_iters {
        let (jtj, jtr) = if analytic {
            normal_equations_analytic(samples, &params)
        } else {
            normal_equations_numeric(samples, &params)
        };

        let mut damped = jtj.clone();
        for i in 0..6 {
            damped[[i, i]] += lambda * jtj[[i, i]].max(1e-12);
        }

        let delta = match solve_linear_system(&damped, &jtr) {
            Some(d) => d,
            None => return Ok(FitOutcome::Failed("singular normal-equations matrix".into())),
        };

        let mut trial = params;
        for i in 0..6 {
            trial[i] -= delta[i];
        }
        if trial[3] <= 0.0 || trial[4] <= 0.0 {
            lambda *= 10.0;
            continue;
        }

        let new_cost = residual_cost(samples, &trial);
        if new_cost < prev_cost {
            params = trial;
            lambda *= 0.5;
            let rel_change = (prev_cost - new_cost).abs() / prev_cost.max(1e-300);
            prev_cost = new_cost;
            if rel_change < rel_tol {
                return Ok(FitOutcome::Converged(Gaussian2D::from_params(&params)));
            }
        } else {
            lambda *= 10.0;
            if lambda > 1e12 {
                return Ok(FitOutcome::Failed(
                    "damping parameter diverged without reducing cost".into(),
                ));
            }
        }
    }

    Ok(FitOutcome::Converged(Gaussian2D::from_params(&params)))
}

fn residual_cost(samples: &[FitSample], p: &[f64; 6]) -> f64 {
    let model = Gaussian2D::from_params(p);
    samples
        .iter()
        .map(|s| (s.value - model.evaluate(s.x, s.y)).powi(2))
        .sum()
}

fn model_and_analytic_jacobian(p: &[f64; 6], x: f64, y: f64) -> (f64, [f64; 6]) {
    let model = Gaussian2D::from_params(p);
    let (s, c) = model.theta.sin_cos();
    let dx = x - model.x_mean;
    let dy = y - model.y_mean;
    let xr = c * dx + s * dy;
    let yr = -s * dx + c * dy;
    let sx2 = model.x_stddev * model.x_stddev;
    let sy2 = model.y_stddev * model.y_stddev;
    let exponent = -(xr * xr / (2.0 * sx2) + yr * yr / (2.0 * sy2));
    let g = exponent.exp();
    let value = model.amplitude * g;

    let d_amp = g;
    let d_xr = -model.amplitude * g * xr / sx2;
    let d_yr = -model.amplitude * g * yr / sy2;
    let d_x0 = d_xr * (-c) + d_yr * s;
    let d_y0 = d_xr * (-s) + d_yr * (-c);
    let d_sx = model.amplitude * g * xr * xr / (sx2 * model.x_stddev);
    let d_sy = model.amplitude * g * yr * yr / (sy2 * model.y_stddev);
    let d_theta = -model.amplitude * g * xr * yr * (1.0 / sx2 - 1.0 / sy2);

    (value, [d_amp, d_x0, d_y0, d_sx, d_sy, d_theta])
}

fn normal_equations_analytic(samples: &[FitSample], p: &[f64; 6]) -> (Array2<f64>, [f64; 6]) {
    let mut jtj = Array2::<f64>::zeros((6, 6));
    let mut jtr = [0.0_f64; 6];

    for s in samples {
        let (model_val, jac) = model_and_analytic_jacobian(p, s.x, s.y);
        let r = s.value - model_val;
        for i in 0..6 {
            jtr[i] += jac[i] * r;
            for j in 0..6 {
                jtj[[i, j]] += jac[i] * jac[j];
            }
        }
    }
    (jtj, jtr)
}

fn normal_equations_numeric(samples: &[FitSample], p: &[f64; 6]) -> (Array2<f64>, [f64; 6]) {
    let eps = 1e-6;
    let mut jtj = Array2::<f64>::zeros((6, 6));
    let mut jtr = [0.0_f64; 6];

    for s in samples {
        let base = Gaussian2D::from_params(p).evaluate(s.x, s.y);
        let mut jac = [0.0_f64; 6];
        for k in 0..6 {
            let mut pk = *p;
            let h = eps * pk[k].abs().max(1.0);
            pk[k] += h;
            let perturbed = Gaussian2D::from_params(&pk).evaluate(s.x, s.y);
            jac[k] = (perturbed - base) / h;
        }
        let r = s.value - base;
        for i in 0..6 {
            jtr[i] += jac[i] * r;
            for j in 0..6 {
                jtj[[i, j]] += jac[i] * jac[j];
            }
        }
    }
    (jtj, jtr)
}

/// Solve a 6x6 dense linear system via Gauss-Jordan elimination with partial
/// pivoting. Returns `None` if the matrix is numerically singular.
fn solve_linear_system(a: &Array2<f64>, b: &[f64; 6]) -> Option<[f64; 6]> {
    let n = 6;
    let mut aug = Array2::<f64>::zeros((n, n + 1));
    for i in 0..n {
        for j in 0..n {
            aug[[i, j]] = a[[i, j]];
        }
        aug[[i, n]] = b[i];
    }

    for col in 0..n {
        let mut pivot_row = col;
        let mut pivot_val = aug[[col, col]].abs();
        for row in (col + 1)..n {
            if aug[[row, col]].abs() > pivot_val {
                pivot_val = aug[[row, col]].abs();
                pivot_row = row;
            }
        }
        if pivot_val < 1e-14 {
            return None;
        }
        if pivot_row != col {
            for j in 0..=n {
                aug.swap((col, j), (pivot_row, j));
            }
        }
        let pivot = aug[[col, col]];
        for j in 0..=n {
            aug[[col, j]] /= pivot;
        }
        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = aug[[row, col]];
            if factor == 0.0 {
                continue;
            }
            for j in 0..=n {
                aug[[row, j]] -= factor * aug[[col, j]];
            }
        }
    }

    let mut out = [0.0_f64; 6];
    for i in 0..n {
        out[i] = aug[[i, n]];
    }
    Some(out)
}
