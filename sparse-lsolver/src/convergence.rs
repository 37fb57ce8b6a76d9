//! Solver state machine and the scalar checks that drive it. Nothing here
//! touches a device.

use crate::control::{PrintMode, SolverControl};
use sparse_core::Real;

/// How a solve ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    MaxIterReached,
    /// A recurrence denominator vanished or stopped being finite.
    Breakdown { quantity: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveReport {
    pub status: SolveStatus,
    pub iterations: usize,
    pub residual_norm: f64,
    pub initial_residual_norm: f64,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolverPhase {
    Init,
    /// `iteration` iterations have completed.
    Iterating { iteration: usize },
    Converged,
    MaxIterReached,
    Breakdown { quantity: &'static str },
}

impl SolverPhase {
    pub fn is_terminal(&self) -> bool {
        self.status().is_some()
    }

    pub fn status(&self) -> Option<SolveStatus> {
        match *self {
            SolverPhase::Init | SolverPhase::Iterating { .. } => None,
            SolverPhase::Converged => Some(SolveStatus::Converged),
            SolverPhase::MaxIterReached => Some(SolveStatus::MaxIterReached),
            SolverPhase::Breakdown { quantity } => Some(SolveStatus::Breakdown { quantity }),
        }
    }
}

/// `true` when `value` cannot be divided by: zero, subnormal, NaN or infinite.
pub fn is_breakdown<T: Real>(value: T) -> bool {
    !value.is_finite() || value.abs() < T::min_positive_value()
}

/// `numerator / denominator`, or the breakdown phase naming `quantity`.
pub fn guarded_ratio<T: Real>(
    numerator: T,
    denominator: T,
    quantity: &'static str,
) -> Result<T, SolverPhase> {
    if is_breakdown(denominator) {
        return Err(SolverPhase::Breakdown { quantity });
    }
    let ratio = numerator / denominator;
    if !ratio.is_finite() {
        return Err(SolverPhase::Breakdown { quantity });
    }
    Ok(ratio)
}

/// Convergence policy of one solve: `‖r‖ ≤ max(abs_tol, rel_tol·‖b‖)`,
/// checked once per iteration, at most `max_iters` iterations.
#[derive(Debug, Clone)]
pub struct Convergence {
    threshold: f64,
    max_iters: usize,
    print_mode: PrintMode,
    solver: &'static str,
}

impl Convergence {
    pub fn new(solver: &'static str, control: &SolverControl, b_norm: f64) -> Self {
        Self {
            threshold: control.threshold(b_norm),
            max_iters: control.max_iters,
            print_mode: control.print_mode,
            solver,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_converged(&self, residual_norm: f64) -> bool {
        residual_norm <= self.threshold
    }

    /// Phase after the initial residual is known.
    pub fn start(&self, initial_residual: f64) -> SolverPhase {
        if self.print_mode != PrintMode::Quiet {
            log::info!(
                "{}: initial residual norm {:e}, threshold {:e}",
                self.solver,
                initial_residual,
                self.threshold
            );
        }
        self.next(0, initial_residual)
    }

    /// Phase after `iteration` iterations left a residual of `residual_norm`.
    pub fn step(&self, iteration: usize, residual_norm: f64) -> SolverPhase {
        if self.print_mode != PrintMode::Quiet {
            log::info!(
                "{}: iteration {} residual norm {:e}",
                self.solver,
                iteration,
                residual_norm
            );
        }
        self.next(iteration, residual_norm)
    }

    fn next(&self, iteration: usize, residual_norm: f64) -> SolverPhase {
        if residual_norm.is_nan() {
            SolverPhase::Breakdown {
                quantity: "residual_norm",
            }
        } else if self.is_converged(residual_norm) {
            SolverPhase::Converged
        } else if iteration >= self.max_iters {
            SolverPhase::MaxIterReached
        } else {
            SolverPhase::Iterating { iteration }
        }
    }

    /// Logs a recurrence scalar in verbose mode.
    pub fn trace<T: Real>(&self, iteration: usize, name: &str, value: T) {
        if self.print_mode == PrintMode::Verbose {
            log::debug!(
                "{}: iteration {} {} = {:e}",
                self.solver,
                iteration,
                name,
                value.into_f64()
            );
        }
    }

    /// Closes the solve and logs its outcome.
    pub fn finish(
        &self,
        phase: SolverPhase,
        iterations: usize,
        residual_norm: f64,
        initial_residual_norm: f64,
    ) -> SolveReport {
        let status = phase.status().unwrap_or(SolveStatus::MaxIterReached);
        match status {
            SolveStatus::Converged => {
                if self.print_mode != PrintMode::Quiet {
                    log::info!(
                        "{} converged in {} iterations, residual norm {:e}",
                        self.solver,
                        iterations,
                        residual_norm
                    );
                }
            }
            SolveStatus::MaxIterReached => log::warn!(
                "{} reached {} iterations without converging, residual norm {:e}",
                self.solver,
                iterations,
                residual_norm
            ),
            SolveStatus::Breakdown { quantity } => log::warn!(
                "{} broke down at iteration {}: {} vanished",
                self.solver,
                iterations,
                quantity
            ),
        }
        SolveReport {
            status,
            iterations,
            residual_norm,
            initial_residual_norm,
        }
    }
}
