use crate::error::Result;
use crate::traits::{Matrix, Real, Vector};
use std::future::Future;

/// Element-wise binary operation `z = x op y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementwiseOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ElementwiseOp {
    #[inline]
    pub fn apply<T: Real>(self, x: T, y: T) -> T {
        match self {
            ElementwiseOp::Add => x + y,
            ElementwiseOp::Sub => x - y,
            ElementwiseOp::Mul => x * y,
            ElementwiseOp::Div => x / y,
        }
    }

    /// Opcode understood by the elementwise shader.
    #[cfg_attr(not(feature = "gpu"), allow(dead_code))]
    pub(crate) fn code(self) -> u32 {
        match self {
            ElementwiseOp::Add => 0,
            ElementwiseOp::Sub => 1,
            ElementwiseOp::Mul => 2,
            ElementwiseOp::Div => 3,
        }
    }
}

/// An execution device (CPU thread pool, GPU).
///
/// Every operation checks its arguments before any work is dispatched, so a
/// failed call leaves its outputs untouched. Operations that produce a host
/// scalar resolve once the device work they depend on has completed.
pub trait Device: std::fmt::Debug {
    type Value: Real;
    type Vector: Vector<Value = Self::Value>;
    type CsrMatrix: Matrix<Value = Self::Value>;
    type CooMatrix: Matrix<Value = Self::Value>;

    // --- Resources ---

    fn create_vector(&self, label: &str, data: &[Self::Value]) -> Result<Self::Vector>;

    fn create_zeros(&self, label: &str, len: usize) -> Result<Self::Vector>;

    /// Makes a host CSR matrix (and any current row-block metadata) available
    /// to the device.
    fn upload_csr(&self, matrix: &crate::CsrMatrix<Self::Value>) -> Result<Self::CsrMatrix>;

    fn upload_coo(&self, matrix: &crate::CooMatrix<Self::Value>) -> Result<Self::CooMatrix>;

    fn read_vector(
        &self,
        v: &Self::Vector,
    ) -> impl Future<Output = Result<Vec<Self::Value>>>;

    fn write_vector(
        &self,
        v: &mut Self::Vector,
        data: &[Self::Value],
    ) -> impl Future<Output = Result<()>>;

    // --- BLAS-1 ---

    /// `dst = src`
    fn copy(&self, src: &Self::Vector, dst: &mut Self::Vector) -> impl Future<Output = Result<()>>;

    fn fill(&self, value: Self::Value, y: &mut Self::Vector) -> impl Future<Output = Result<()>>;

    /// `y = alpha * y`
    fn scale(&self, alpha: Self::Value, y: &mut Self::Vector) -> impl Future<Output = Result<()>>;

    /// `y = alpha * x + y`
    fn axpy(
        &self,
        alpha: Self::Value,
        x: &Self::Vector,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// `y = alpha * x + beta * y`
    fn axpby(
        &self,
        alpha: Self::Value,
        x: &Self::Vector,
        beta: Self::Value,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    fn dot(
        &self,
        x: &Self::Vector,
        y: &Self::Vector,
    ) -> impl Future<Output = Result<Self::Value>>;

    /// Sum of absolute values.
    fn nrm1(&self, x: &Self::Vector) -> impl Future<Output = Result<Self::Value>>;

    /// Euclidean norm.
    fn nrm2(&self, x: &Self::Vector) -> impl Future<Output = Result<Self::Value>>;

    /// Sum of the elements.
    fn reduce(&self, x: &Self::Vector) -> impl Future<Output = Result<Self::Value>>;

    /// `z = x op y`
    fn elementwise(
        &self,
        op: ElementwiseOp,
        x: &Self::Vector,
        y: &Self::Vector,
        z: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    // --- Sparse ---

    /// `y = alpha * A * x + beta * y`. Uses the adaptive row-block kernel when
    /// `A` carries metadata, the row-per-unit kernel otherwise.
    fn csrmv(
        &self,
        alpha: Self::Value,
        a: &Self::CsrMatrix,
        x: &Self::Vector,
        beta: Self::Value,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// `y = alpha * A * x + beta * y` for a COO matrix.
    fn coomv(
        &self,
        alpha: Self::Value,
        a: &Self::CooMatrix,
        x: &Self::Vector,
        beta: Self::Value,
        y: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;

    /// Writes `A[i][i]` (zero when not stored) into `out[i]`.
    fn extract_diagonal(
        &self,
        a: &Self::CsrMatrix,
        out: &mut Self::Vector,
    ) -> impl Future<Output = Result<()>>;
}
