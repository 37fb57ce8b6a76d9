use serde::{Deserialize, Serialize};

/// Preconditioner applied by the Krylov solvers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preconditioner {
    #[default]
    None,
    /// Jacobi: scale by the inverse of the matrix diagonal.
    Diagonal,
}

/// How much solver progress is logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrintMode {
    Quiet,
    /// Residual norm of every iteration at info level.
    #[default]
    Normal,
    /// Also the scalar recurrences, at debug level.
    Verbose,
}

/// Parameters of an iterative solve. Not modified by the solvers, so one
/// control can drive any number of solves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverControl {
    pub preconditioner: Preconditioner,
    pub max_iters: usize,
    /// Tolerance relative to `‖b‖`.
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub print_mode: PrintMode,
}

impl Default for SolverControl {
    fn default() -> Self {
        Self {
            preconditioner: Preconditioner::None,
            max_iters: 1000,
            rel_tol: 1e-6,
            abs_tol: 1e-12,
            print_mode: PrintMode::Normal,
        }
    }
}

impl SolverControl {
    pub fn new(
        preconditioner: Preconditioner,
        max_iters: usize,
        rel_tol: f64,
        abs_tol: f64,
    ) -> Self {
        Self {
            preconditioner,
            max_iters,
            rel_tol,
            abs_tol,
            ..Self::default()
        }
    }

    pub fn with_preconditioner(mut self, preconditioner: Preconditioner) -> Self {
        self.preconditioner = preconditioner;
        self
    }

    pub fn with_max_iters(mut self, max_iters: usize) -> Self {
        self.max_iters = max_iters;
        self
    }

    pub fn with_rel_tol(mut self, rel_tol: f64) -> Self {
        self.rel_tol = rel_tol;
        self
    }

    pub fn with_abs_tol(mut self, abs_tol: f64) -> Self {
        self.abs_tol = abs_tol;
        self
    }

    pub fn with_print_mode(mut self, print_mode: PrintMode) -> Self {
        self.print_mode = print_mode;
        self
    }

    /// Residual norm at or below which a solve has converged.
    pub fn threshold(&self, b_norm: f64) -> f64 {
        self.abs_tol.max(self.rel_tol * b_norm)
    }
}
