//! Krylov solvers for `A x = b` over any [`Device`].

use crate::control::SolverControl;
use crate::convergence::SolveReport;
use num_traits::One;
use sparse_core::{Device, Matrix, Result, SparseError, Vector};
use std::future::Future;

pub mod bicgstab;
pub mod cg;

pub use bicgstab::BiCGStab;
pub use cg::ConjugateGradient;

/// An iterative method for `A x = b`.
///
/// `x` holds the initial guess on entry and the latest iterate on return,
/// whatever the outcome. Non-convergence is reported in the
/// [`SolveReport`]; errors are reserved for bad arguments and device
/// failures, and argument errors leave `x` untouched.
pub trait SolveAlgorithm<D: Device> {
    fn name(&self) -> &'static str;

    fn solve(
        &self,
        device: &D,
        a: &D::CsrMatrix,
        x: &mut D::Vector,
        b: &D::Vector,
        control: &SolverControl,
    ) -> impl Future<Output = Result<SolveReport>>;

    fn validate_inputs(&self, a: &D::CsrMatrix, x: &D::Vector, b: &D::Vector) -> Result<()> {
        let (rows, cols) = a.dims();
        if !a.is_square() {
            return Err(SparseError::InvalidArgument(format!(
                "Matrix A must be square (dims: {}x{})",
                rows, cols
            )));
        }
        if rows != b.len() {
            return Err(SparseError::DimensionMismatch(format!(
                "Matrix A rows ({}) must match RHS vector b length ({})",
                rows,
                b.len()
            )));
        }
        if rows != x.len() {
            return Err(SparseError::DimensionMismatch(format!(
                "Matrix A columns ({}) must match solution vector x length ({})",
                cols,
                x.len()
            )));
        }
        Ok(())
    }
}

/// `r = b - A x`
pub(crate) async fn residual<D: Device>(
    device: &D,
    a: &D::CsrMatrix,
    x: &D::Vector,
    b: &D::Vector,
    r: &mut D::Vector,
) -> Result<()> {
    device.copy(b, r).await?;
    device
        .csrmv(-D::Value::one(), a, x, D::Value::one(), r)
        .await
}
