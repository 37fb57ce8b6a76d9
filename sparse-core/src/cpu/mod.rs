//! CPU execution device backed by a rayon thread pool.

mod atomic;
mod blas1;
mod spmm;
mod spmv;

use crate::coo::CooMatrix;
use crate::csr::CsrMatrix;
use crate::dense::{DenseMatrix, DenseVector};
use crate::device::{Device, ElementwiseOp};
use crate::error::{Result, SparseError};
use crate::partition::RowBlocks;
use crate::traits::{Matrix, Real, Vector};
use std::marker::PhantomData;
use std::sync::Arc;

/// Configuration of a [`CpuDevice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuConfig {
    /// Worker threads; 0 lets rayon pick one per CPU.
    pub threads: usize,
    /// Lanes per tile for in-tile reductions. Rounded up to a power of two.
    pub lanes: usize,
    /// Minimum elements per task for vector primitives.
    pub tile: usize,
}

impl Default for CpuConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            lanes: 32,
            tile: 4096,
        }
    }
}

impl CpuConfig {
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes;
        self
    }

    pub fn with_tile(mut self, tile: usize) -> Self {
        self.tile = tile;
        self
    }
}

/// Executes every operation on a dedicated rayon pool, on host memory.
#[derive(Debug, Clone)]
pub struct CpuDevice<T> {
    pool: Arc<rayon::ThreadPool>,
    lanes: usize,
    tile: usize,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Real> CpuDevice<T> {
    pub fn new() -> Result<Self> {
        Self::with_config(CpuConfig::default())
    }

    pub fn with_config(config: CpuConfig) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|idx| format!("sparse-cpu-{idx}"))
            .build()
            .map_err(|e| SparseError::DeviceFailure(format!("Failed to build thread pool: {}", e)))?;
        let lanes = config.lanes.max(1).next_power_of_two();
        log::info!(
            "CpuDevice created with {} threads, {} lanes per tile",
            pool.current_num_threads(),
            lanes
        );
        Ok(Self {
            pool: Arc::new(pool),
            lanes,
            tile: config.tile.max(1),
            _marker: PhantomData,
        })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// `C = alpha * A * B + beta * C` for dense `B`, `C`.
    pub fn csrmm(
        &self,
        alpha: T,
        a: &CsrMatrix<T>,
        b: &DenseMatrix<T>,
        beta: T,
        c: &mut DenseMatrix<T>,
    ) -> Result<()> {
        spmm::csrmm(&self.pool, alpha, a, b, beta, c)
    }

    /// Sparse product `A * B`.
    pub fn spgemm(&self, a: &CsrMatrix<T>, b: &CsrMatrix<T>) -> Result<CsrMatrix<T>> {
        spmm::spgemm(&self.pool, a, b)
    }
}

fn check_len(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected != actual {
        return Err(SparseError::dims(what, expected, actual));
    }
    Ok(())
}

impl<T: Real> Device for CpuDevice<T> {
    type Value = T;
    type Vector = DenseVector<T>;
    type CsrMatrix = CsrMatrix<T>;
    type CooMatrix = CooMatrix<T>;

    fn create_vector(&self, _label: &str, data: &[T]) -> Result<DenseVector<T>> {
        Ok(DenseVector::from_vec(data.to_vec()))
    }

    fn create_zeros(&self, _label: &str, len: usize) -> Result<DenseVector<T>> {
        Ok(DenseVector::zeros(len))
    }

    fn upload_csr(&self, matrix: &CsrMatrix<T>) -> Result<CsrMatrix<T>> {
        Ok(matrix.clone())
    }

    fn upload_coo(&self, matrix: &CooMatrix<T>) -> Result<CooMatrix<T>> {
        Ok(matrix.clone())
    }

    async fn read_vector(&self, v: &DenseVector<T>) -> Result<Vec<T>> {
        Ok(v.to_vec())
    }

    async fn write_vector(&self, v: &mut DenseVector<T>, data: &[T]) -> Result<()> {
        check_len("data", v.len(), data.len())?;
        v.as_mut_slice().copy_from_slice(data);
        Ok(())
    }

    async fn copy(&self, src: &DenseVector<T>, dst: &mut DenseVector<T>) -> Result<()> {
        check_len("copy destination", src.len(), dst.len())?;
        dst.as_mut_slice().copy_from_slice(src.as_slice());
        Ok(())
    }

    async fn fill(&self, value: T, y: &mut DenseVector<T>) -> Result<()> {
        blas1::fill(&self.pool, self.tile, value, y.as_mut_slice());
        Ok(())
    }

    async fn scale(&self, alpha: T, y: &mut DenseVector<T>) -> Result<()> {
        blas1::scale(&self.pool, self.tile, alpha, y.as_mut_slice());
        Ok(())
    }

    async fn axpy(&self, alpha: T, x: &DenseVector<T>, y: &mut DenseVector<T>) -> Result<()> {
        check_len("y", x.len(), y.len())?;
        blas1::axpy(&self.pool, self.tile, alpha, x.as_slice(), y.as_mut_slice());
        Ok(())
    }

    async fn axpby(
        &self,
        alpha: T,
        x: &DenseVector<T>,
        beta: T,
        y: &mut DenseVector<T>,
    ) -> Result<()> {
        check_len("y", x.len(), y.len())?;
        blas1::axpby(&self.pool, self.tile, alpha, x.as_slice(), beta, y.as_mut_slice());
        Ok(())
    }

    async fn dot(&self, x: &DenseVector<T>, y: &DenseVector<T>) -> Result<T> {
        check_len("y", x.len(), y.len())?;
        Ok(blas1::dot(&self.pool, self.tile, x.as_slice(), y.as_slice()))
    }

    async fn nrm1(&self, x: &DenseVector<T>) -> Result<T> {
        Ok(blas1::nrm1(&self.pool, self.tile, x.as_slice()))
    }

    async fn nrm2(&self, x: &DenseVector<T>) -> Result<T> {
        Ok(blas1::nrm2(&self.pool, self.tile, x.as_slice()))
    }

    async fn reduce(&self, x: &DenseVector<T>) -> Result<T> {
        Ok(blas1::reduce(&self.pool, self.tile, x.as_slice()))
    }

    async fn elementwise(
        &self,
        op: ElementwiseOp,
        x: &DenseVector<T>,
        y: &DenseVector<T>,
        z: &mut DenseVector<T>,
    ) -> Result<()> {
        check_len("y", x.len(), y.len())?;
        check_len("z", x.len(), z.len())?;
        blas1::elementwise(
            &self.pool,
            self.tile,
            op,
            x.as_slice(),
            y.as_slice(),
            z.as_mut_slice(),
        );
        Ok(())
    }

    async fn csrmv(
        &self,
        alpha: T,
        a: &CsrMatrix<T>,
        x: &DenseVector<T>,
        beta: T,
        y: &mut DenseVector<T>,
    ) -> Result<()> {
        check_len("x", a.cols(), x.len())?;
        check_len("y", a.rows(), y.len())?;
        match a.row_blocks() {
            Some(blocks) if blocks.is_empty() => Err(SparseError::InvalidArgument(
                "Matrix carries row block metadata with zero blocks".to_string(),
            )),
            Some(blocks) if blocks.version() != a.version() => {
                log::warn!(
                    "Row blocks were computed for pattern version {}, matrix is at {}; repartitioning",
                    blocks.version(),
                    a.version()
                );
                let fresh = RowBlocks::compute(a, blocks.config())?;
                spmv::csrmv_adaptive(
                    &self.pool,
                    self.lanes,
                    alpha,
                    a,
                    &fresh,
                    x.as_slice(),
                    beta,
                    y.as_mut_slice(),
                )
            }
            Some(blocks) => {
                blocks.validate(a.rows())?;
                spmv::csrmv_adaptive(
                    &self.pool,
                    self.lanes,
                    alpha,
                    a,
                    blocks,
                    x.as_slice(),
                    beta,
                    y.as_mut_slice(),
                )
            }
            None => {
                spmv::csrmv_rows(&self.pool, alpha, a, x.as_slice(), beta, y.as_mut_slice());
                Ok(())
            }
        }
    }

    async fn coomv(
        &self,
        alpha: T,
        a: &CooMatrix<T>,
        x: &DenseVector<T>,
        beta: T,
        y: &mut DenseVector<T>,
    ) -> Result<()> {
        check_len("x", a.cols(), x.len())?;
        check_len("y", a.rows(), y.len())?;
        spmv::coomv(
            &self.pool,
            self.tile,
            alpha,
            a,
            x.as_slice(),
            beta,
            y.as_mut_slice(),
        );
        Ok(())
    }

    async fn extract_diagonal(&self, a: &CsrMatrix<T>, out: &mut DenseVector<T>) -> Result<()> {
        check_len("diagonal", a.rows(), out.len())?;
        spmv::extract_diagonal(&self.pool, a, out.as_mut_slice());
        Ok(())
    }
}
