//! Implicit time integration.
//!
//! A thin wrapper around the Newton solver: each step solves the stage
//! system with the scheme's shift factor and the local time derivative
//! `x_t = shift * x + c`, where `c` is built from the previous state.
//! Backward Euler uses `x_t = (x - x_prev)/dt` (shift `1/dt`);
//! Crank-Nicolson uses the one-leg trapezoid
//! `x_t = 2 (x - x_prev)/dt - x_t_prev` (shift `2/dt`).
//!
//! Configuration is validated before the first step with the offending
//! option names in the message; the converged reason is stored after every
//! step and can be inspected afterwards.

use crate::backend::LinearSolver;
use crate::error::{Error, Result};
use crate::nonlinear::{ConvergenceStatus, NonlinearConfig, solve_nonlinear};
use crate::problem::FeProblem;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Implicit scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeScheme {
    #[serde(rename = "beuler")]
    BackwardEuler,
    #[serde(rename = "cn")]
    CrankNicolson,
}

impl FromStr for TimeScheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "beuler" => Ok(TimeScheme::BackwardEuler),
            "cn" => Ok(TimeScheme::CrankNicolson),
            _ => Err(Error::Config(
                "The 'scheme' parameter can be either 'beuler' or 'cn'.".into(),
            )),
        }
    }
}

/// Time-stepping configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransientConfig {
    pub scheme: TimeScheme,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: Option<f64>,
    #[serde(default)]
    pub num_steps: Option<usize>,
    pub dt: f64,
}

impl TransientConfig {
    /// Check option consistency; reports the offending option names
    pub fn validate(&self) -> Result<()> {
        match (self.end_time, self.num_steps) {
            (Some(_), Some(_)) => {
                return Err(Error::Config(
                    "Cannot provide 'end_time' and 'num_steps' together. \
                     Specify one or the other."
                        .into(),
                ));
            }
            (None, None) => {
                return Err(Error::Config(
                    "Provide either 'end_time' or 'num_steps' parameter.".into(),
                ));
            }
            _ => {}
        }
        if self.dt <= 0.0 {
            return Err(Error::Config("The 'dt' parameter must be positive.".into()));
        }
        if let Some(end) = self.end_time {
            if self.start_time >= end {
                return Err(Error::Config(
                    "The 'start_time' parameter must be smaller than 'end_time'.".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Why the stepper stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeConvergedReason {
    Iterating,
    ConvergedTime,
    ConvergedIts,
    ConvergedUser,
    DivergedNonlinearSolve,
}

impl TimeConvergedReason {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            TimeConvergedReason::ConvergedTime
                | TimeConvergedReason::ConvergedIts
                | TimeConvergedReason::ConvergedUser
        )
    }
}

/// Stage data handed to the Newton solver: `x_t = shift * x + c_local`
pub struct TimeSpec {
    pub shift: f64,
    pub c_local: Vec<f64>,
}

/// Implicit time stepper
#[derive(Debug)]
pub struct TransientSolver {
    config: TransientConfig,
    newton: NonlinearConfig,
    reason: TimeConvergedReason,
    time: f64,
    steps_taken: usize,
}

impl TransientSolver {
    pub fn new(config: TransientConfig, newton: NonlinearConfig) -> Result<Self> {
        config.validate()?;
        let time = config.start_time;
        Ok(TransientSolver {
            config,
            newton,
            reason: TimeConvergedReason::Iterating,
            time,
            steps_taken: 0,
        })
    }

    pub fn converged_reason(&self) -> TimeConvergedReason {
        self.reason
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn steps_taken(&self) -> usize {
        self.steps_taken
    }

    pub fn time_step(&self) -> f64 {
        self.config.dt
    }

    pub fn max_time(&self) -> Option<f64> {
        self.config.end_time
    }

    /// March the problem from `start_time` until the end condition
    pub fn solve(&mut self, problem: &mut FeProblem, backend: &dyn LinearSolver) -> Result<()> {
        let dt = self.config.dt;
        let n_steps = match self.config.num_steps {
            Some(n) => n,
            None => {
                let end = self.config.end_time.expect("validated");
                ((end - self.config.start_time) / dt).ceil() as usize
            }
        };
        let mut x_t_prev = vec![0.0; problem.local_size()];
        for step in 0..n_steps {
            let t_new = self.time + dt;
            // previous state in its own boundary data, then re-project
            let x_prev_local = problem.build_local(problem.solution());
            problem.update_essential_projections(t_new);
            let (shift, c_local) = match self.config.scheme {
                TimeScheme::BackwardEuler => {
                    let shift = 1.0 / dt;
                    let c = x_prev_local.iter().map(|&x| -x / dt).collect();
                    (shift, c)
                }
                TimeScheme::CrankNicolson => {
                    let shift = 2.0 / dt;
                    let c = x_prev_local
                        .iter()
                        .zip(&x_t_prev)
                        .map(|(&x, &xt)| -2.0 * x / dt - xt)
                        .collect();
                    (shift, c)
                }
            };
            let spec = TimeSpec { shift, c_local };
            let results = solve_nonlinear(problem, t_new, Some(&spec), &self.newton, backend)?;
            if results.status != ConvergenceStatus::Converged {
                log::warn!(
                    "time step {} at t = {} failed to converge (|r| = {:.3e})",
                    step,
                    t_new,
                    results.residual_norm
                );
                self.reason = TimeConvergedReason::DivergedNonlinearSolve;
                return Ok(());
            }
            let x_new_local = problem.build_local(problem.solution());
            for ((xt, &x), &c) in x_t_prev.iter_mut().zip(&x_new_local).zip(&spec.c_local) {
                *xt = spec.shift * x + c;
            }
            self.time = t_new;
            self.steps_taken += 1;
            log::debug!(
                "step {} done: t = {}, {} newton iterations",
                self.steps_taken,
                self.time,
                results.num_iterations
            );
        }
        self.reason = if self.config.num_steps.is_some() {
            TimeConvergedReason::ConvergedIts
        } else {
            TimeConvergedReason::ConvergedTime
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> TransientConfig {
        TransientConfig {
            scheme: TimeScheme::BackwardEuler,
            start_time: 0.0,
            end_time: Some(20.0),
            num_steps: None,
            dt: 5.0,
        }
    }

    #[test]
    fn accepts_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn rejects_end_time_and_num_steps_together() {
        let mut cfg = base_config();
        cfg.num_steps = Some(2);
        let msg = format!("{}", cfg.validate().unwrap_err());
        assert!(msg.contains("'end_time'"));
        assert!(msg.contains("'num_steps'"));
    }

    #[test]
    fn rejects_missing_end_condition() {
        let mut cfg = base_config();
        cfg.end_time = None;
        let msg = format!("{}", cfg.validate().unwrap_err());
        assert!(msg.contains("either 'end_time' or 'num_steps'"));
    }

    #[test]
    fn rejects_nonpositive_dt() {
        let mut cfg = base_config();
        cfg.dt = 0.0;
        assert!(format!("{}", cfg.validate().unwrap_err()).contains("'dt'"));
    }

    #[test]
    fn rejects_reversed_time_interval() {
        let mut cfg = base_config();
        cfg.start_time = 30.0;
        assert!(
            format!("{}", cfg.validate().unwrap_err()).contains("'start_time'")
        );
    }

    #[test]
    fn scheme_parsing() {
        assert_eq!(
            TimeScheme::from_str("beuler").unwrap(),
            TimeScheme::BackwardEuler
        );
        assert_eq!(TimeScheme::from_str("cn").unwrap(), TimeScheme::CrankNicolson);
        let msg = format!("{}", TimeScheme::from_str("asdf").unwrap_err());
        assert!(msg.contains("'beuler' or 'cn'"));
    }
}
