//! Newton solver driving the problem's residual/Jacobian callbacks.
//!
//! Solves R(u) = 0 by Newton iteration with an optional backtracking line
//! search. Non-convergence is not an error at this level; it is reported
//! through the `ConvergenceStatus` so the caller (a time stepper, a user
//! application) can decide what to do.

use crate::backend::LinearSolver;
use crate::error::Result;
use crate::la::{Matrix, Vector};
use crate::problem::FeProblem;
use crate::transient::TimeSpec;
use serde::{Deserialize, Serialize};

/// Newton solver configuration
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NonlinearConfig {
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Absolute residual tolerance
    pub atol: f64,
    /// Residual tolerance relative to the initial residual
    pub rtol: f64,
    /// Step-size tolerance
    pub stol: f64,
    /// Residual growth factor treated as divergence
    pub divergence_factor: f64,
    /// Backtracking line search
    pub use_line_search: bool,
    pub max_line_search: usize,
}

impl Default for NonlinearConfig {
    fn default() -> Self {
        NonlinearConfig {
            max_iterations: 50,
            atol: 1e-12,
            rtol: 1e-10,
            stol: 1e-14,
            divergence_factor: 10.0,
            use_line_search: true,
            max_line_search: 5,
        }
    }
}

/// Outcome of a nonlinear solve
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    NotConverged,
    Diverged,
}

/// Newton iteration results
#[derive(Debug, Clone)]
pub struct NonlinearResults {
    pub num_iterations: usize,
    pub residual_norm: f64,
    pub status: ConvergenceStatus,
    pub iteration_history: Vec<f64>,
}

fn residual_norm_at(
    problem: &FeProblem,
    time: f64,
    time_spec: Option<&TimeSpec>,
    x: &Vector,
) -> Result<f64> {
    let local = problem.build_local(x);
    let (shift, x_t) = time_parts(time_spec, &local);
    let mut r = Vector::new(problem.get_dof_count());
    problem.compute_residual_local(time, shift, &local, x_t.as_deref(), &mut r)?;
    Ok(r.norm())
}

fn time_parts(time_spec: Option<&TimeSpec>, local: &[f64]) -> (f64, Option<Vec<f64>>) {
    match time_spec {
        Some(ts) => {
            let x_t = local
                .iter()
                .zip(&ts.c_local)
                .map(|(&x, &c)| ts.shift * x + c)
                .collect();
            (ts.shift, Some(x_t))
        }
        None => (0.0, None),
    }
}

/// Solve the (possibly transient-stage) nonlinear system at `time` and
/// store the converged state back into the problem
pub fn solve_nonlinear(
    problem: &mut FeProblem,
    time: f64,
    time_spec: Option<&TimeSpec>,
    config: &NonlinearConfig,
    backend: &dyn LinearSolver,
) -> Result<NonlinearResults> {
    let n = problem.get_dof_count();
    let mut x = problem.solution().clone();
    let mut history = Vec::new();
    let mut status = ConvergenceStatus::NotConverged;

    for iter in 0..config.max_iterations {
        let local = problem.build_local(&x);
        let (shift, x_t) = time_parts(time_spec, &local);
        let mut r = Vector::new(n);
        problem.compute_residual_local(time, shift, &local, x_t.as_deref(), &mut r)?;
        let r_norm = r.norm();
        history.push(r_norm);
        log::debug!("newton iteration {}: |r| = {:.6e}", iter, r_norm);

        let r0 = history[0];
        if r_norm < config.atol || (r0 > 0.0 && r_norm / r0 < config.rtol) {
            status = ConvergenceStatus::Converged;
            break;
        }
        if iter > 0 && r_norm > history[iter - 1] * config.divergence_factor {
            status = ConvergenceStatus::Diverged;
            log::warn!(
                "newton diverged at iteration {} (|r| = {:.3e})",
                iter,
                r_norm
            );
            break;
        }

        let mut j = Matrix::new(n, n);
        problem.compute_jacobian_local(time, shift, &local, x_t.as_deref(), &mut j, None)?;
        r.scale(-1.0);
        let (delta, _) = backend.solve(&j, &r)?;

        let alpha = if config.use_line_search {
            line_search(problem, time, time_spec, &x, &delta, r_norm, config)?
        } else {
            1.0
        };
        let step_norm = alpha * delta.norm();
        x.axpy(alpha, &delta);

        if step_norm / x.norm().max(1.0) < config.stol {
            status = ConvergenceStatus::Converged;
            history.push(residual_norm_at(problem, time, time_spec, &x)?);
            break;
        }
    }

    let residual_norm = history.last().copied().unwrap_or(0.0);
    let num_iterations = history.len();
    problem.set_solution(x);
    Ok(NonlinearResults {
        num_iterations,
        residual_norm,
        status,
        iteration_history: history,
    })
}

/// Backtracking line search: halve the step until the residual decreases
fn line_search(
    problem: &FeProblem,
    time: f64,
    time_spec: Option<&TimeSpec>,
    x: &Vector,
    delta: &Vector,
    r0_norm: f64,
    config: &NonlinearConfig,
) -> Result<f64> {
    let mut alpha = 1.0;
    for _ in 0..config.max_line_search {
        let mut trial = x.clone();
        trial.axpy(alpha, delta);
        let r_trial = residual_norm_at(problem, time, time_spec, &trial)?;
        if r_trial < r0_norm || r_trial < config.atol {
            return Ok(alpha);
        }
        alpha *= 0.5;
    }
    Ok(1.0)
}
