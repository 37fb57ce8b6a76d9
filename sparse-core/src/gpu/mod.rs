//! wgpu execution device. Single precision only: WGSL has no portable `f64`.

mod context;
mod kernels;
mod matrix;
mod ops;
mod vector;

pub use matrix::{GpuCooMatrix, GpuCsrMatrix};
pub use vector::{GpuScalar, GpuVector};

use crate::coo::CooMatrix;
use crate::csr::CsrMatrix;
use crate::device::{Device, ElementwiseOp};
use crate::error::{Result, SparseError};
use crate::traits::Vector;
use context::GpuContext;
use kernels::PipelineCache;
use ops::ReduceMode;
use std::sync::Arc;

/// Bytes moved between host and device since creation or the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    pub bytes_to_gpu: u64,
    pub bytes_from_gpu: u64,
}

#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub(crate) context: GpuContext,
    pub(crate) pipelines: Arc<PipelineCache>,
}

impl GpuDevice {
    pub async fn new() -> Result<Self> {
        let context = GpuContext::new().await?;
        let pipelines = Arc::new(PipelineCache::new(context.device.clone()));
        Ok(Self { context, pipelines })
    }

    #[cfg(feature = "native")]
    pub fn new_blocking() -> Result<Self> {
        pollster::block_on(Self::new())
    }

    pub fn transfer_stats(&self) -> TransferStats {
        let (bytes_to_gpu, bytes_from_gpu) = self.context.get_transfer_stats();
        TransferStats {
            bytes_to_gpu,
            bytes_from_gpu,
        }
    }

    pub fn reset_transfer_stats(&self) {
        self.context.reset_transfer_stats();
    }

    /// Uploads all of `data` and returns the window of `len` elements that
    /// starts at `offset`. Elements outside the window are never touched by
    /// operations on the returned vector.
    pub fn create_vector_with_offset(
        &self,
        label: &str,
        data: &[f32],
        offset: usize,
        len: usize,
    ) -> Result<GpuVector> {
        GpuVector::with_offset(&self.context, label, data, offset, len)
    }

    /// Allocates `count` device-resident scalar slots sharing one buffer.
    pub fn create_scalars(&self, label: &str, count: usize) -> Vec<GpuScalar> {
        GpuScalar::block(&self.context, label, count)
    }

    /// `out = x · y` without reading the result back.
    pub async fn dot_into(&self, x: &GpuVector, y: &GpuVector, out: &GpuScalar) -> Result<()> {
        self.reduce_into(ReduceMode::Dot, x, Some(y), out).await
    }

    pub async fn nrm1_into(&self, x: &GpuVector, out: &GpuScalar) -> Result<()> {
        self.reduce_into(ReduceMode::AbsSum, x, None, out).await
    }

    pub async fn nrm2_into(&self, x: &GpuVector, out: &GpuScalar) -> Result<()> {
        self.reduce_into(ReduceMode::Norm2, x, None, out).await
    }

    pub async fn reduce_sum_into(&self, x: &GpuVector, out: &GpuScalar) -> Result<()> {
        self.reduce_into(ReduceMode::Sum, x, None, out).await
    }

    async fn reduce_to_host(
        &self,
        mode: ReduceMode,
        x: &GpuVector,
        y: Option<&GpuVector>,
    ) -> Result<f32> {
        let out = self
            .create_scalars("reduce_result", 1)
            .pop()
            .ok_or_else(|| SparseError::Internal("Scalar allocation returned nothing".to_string()))?;
        self.reduce_into(mode, x, y, &out).await?;
        out.read().await
    }
}

impl Device for GpuDevice {
    type Value = f32;
    type Vector = GpuVector;
    type CsrMatrix = GpuCsrMatrix;
    type CooMatrix = GpuCooMatrix;

    fn create_vector(&self, label: &str, data: &[f32]) -> Result<GpuVector> {
        Ok(GpuVector::from_slice(&self.context, label, data))
    }

    fn create_zeros(&self, label: &str, len: usize) -> Result<GpuVector> {
        Ok(GpuVector::zeros(&self.context, label, len))
    }

    fn upload_csr(&self, matrix: &CsrMatrix<f32>) -> Result<GpuCsrMatrix> {
        GpuCsrMatrix::upload(&self.context, matrix)
    }

    fn upload_coo(&self, matrix: &CooMatrix<f32>) -> Result<GpuCooMatrix> {
        GpuCooMatrix::upload(&self.context, matrix)
    }

    async fn read_vector(&self, v: &GpuVector) -> Result<Vec<f32>> {
        log::trace!("Reading back '{}' ({} values)", v.label(), v.len());
        self.context
            .read_buffer_to_cpu(v.buffer(), v.byte_offset(), v.len())
            .await
    }

    async fn write_vector(&self, v: &mut GpuVector, data: &[f32]) -> Result<()> {
        if data.len() != v.len() {
            return Err(SparseError::dims(v.label(), v.len(), data.len()));
        }
        self.context.write_buffer(v.buffer(), v.byte_offset(), data)
    }

    async fn copy(&self, src: &GpuVector, dst: &mut GpuVector) -> Result<()> {
        self.copy_vector(src, dst).await
    }

    async fn fill(&self, value: f32, y: &mut GpuVector) -> Result<()> {
        self.fill_vector(value, y).await
    }

    async fn scale(&self, alpha: f32, y: &mut GpuVector) -> Result<()> {
        self.scale_vector(alpha, y).await
    }

    async fn axpy(&self, alpha: f32, x: &GpuVector, y: &mut GpuVector) -> Result<()> {
        self.axpby_vector(alpha, x, 1.0, y).await
    }

    async fn axpby(&self, alpha: f32, x: &GpuVector, beta: f32, y: &mut GpuVector) -> Result<()> {
        self.axpby_vector(alpha, x, beta, y).await
    }

    async fn dot(&self, x: &GpuVector, y: &GpuVector) -> Result<f32> {
        self.reduce_to_host(ReduceMode::Dot, x, Some(y)).await
    }

    async fn nrm1(&self, x: &GpuVector) -> Result<f32> {
        self.reduce_to_host(ReduceMode::AbsSum, x, None).await
    }

    async fn nrm2(&self, x: &GpuVector) -> Result<f32> {
        self.reduce_to_host(ReduceMode::Norm2, x, None).await
    }

    async fn reduce(&self, x: &GpuVector) -> Result<f32> {
        self.reduce_to_host(ReduceMode::Sum, x, None).await
    }

    async fn elementwise(
        &self,
        op: ElementwiseOp,
        x: &GpuVector,
        y: &GpuVector,
        z: &mut GpuVector,
    ) -> Result<()> {
        self.elementwise_vector(op, x, y, z).await
    }

    async fn csrmv(
        &self,
        alpha: f32,
        a: &GpuCsrMatrix,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<()> {
        self.csrmv_matrix(alpha, a, x, beta, y).await
    }

    async fn coomv(
        &self,
        alpha: f32,
        a: &GpuCooMatrix,
        x: &GpuVector,
        beta: f32,
        y: &mut GpuVector,
    ) -> Result<()> {
        self.coomv_matrix(alpha, a, x, beta, y).await
    }

    async fn extract_diagonal(&self, a: &GpuCsrMatrix, out: &mut GpuVector) -> Result<()> {
        self.extract_diagonal_matrix(a, out).await
    }
}

#[cfg(all(test, feature = "native"))]
mod tests {
    use super::*;
    use crate::partition::PartitionConfig;
    use crate::traits::Matrix;
    use pollster::block_on;

    fn device() -> Option<GpuDevice> {
        let _ = env_logger::builder().is_test(true).try_init();
        match GpuDevice::new_blocking() {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("Skipping GPU test, no device available: {}", e);
                None
            }
        }
    }

    fn scenario() -> CsrMatrix<f32> {
        CsrMatrix::from_csr(
            4,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            vec![0, 2, 3, 1, 0, 2, 3, 1, 3],
            vec![0, 3, 4, 7, 9],
        )
        .unwrap()
    }

    fn host_spmv(a: &CsrMatrix<f32>, x: &[f32]) -> Vec<f32> {
        (0..a.rows())
            .map(|row| {
                a.row_range(row)
                    .map(|k| a.values()[k] * x[a.col_indices()[k]])
                    .sum()
            })
            .collect()
    }

    fn assert_close(actual: &[f32], expected: &[f32], tol: f32) {
        assert_eq!(actual.len(), expected.len());
        for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
            assert!(
                (a - e).abs() <= tol * e.abs().max(1.0),
                "index {}: {} vs {}",
                i,
                a,
                e
            );
        }
    }

    #[test]
    fn csrmv_fallback_and_adaptive_agree_on_small_matrix() {
        let Some(device) = device() else { return };
        let mut host = scenario();
        let x = device.create_vector("x", &[1.0, 1.0, 1.0, 1.0]).unwrap();

        let a = device.upload_csr(&host).unwrap();
        let mut y = device.create_zeros("y", 4).unwrap();
        block_on(device.csrmv(1.0, &a, &x, 0.0, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![6.0, 4.0, 18.0, 17.0]);

        host.compute_row_blocks().unwrap();
        let a = device.upload_csr(&host).unwrap();
        assert!(a.row_block_count().unwrap() >= 1);
        let mut y = device.create_vector("y", &[1.0, 1.0, 1.0, 1.0]).unwrap();
        block_on(device.csrmv(2.0, &a, &x, 1.0, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![13.0, 9.0, 37.0, 35.0]);
    }

    #[test]
    fn scaled_product_on_both_paths() {
        let Some(device) = device() else { return };
        let mut host = scenario();
        let x = device.create_vector("x", &[10.0, 20.0, 30.0, 40.0]).unwrap();
        for adaptive in [false, true] {
            if adaptive {
                host.compute_row_blocks().unwrap();
            }
            let a = device.upload_csr(&host).unwrap();
            let mut y = device.create_vector("y", &[50.0, 60.0, 70.0, 80.0]).unwrap();
            block_on(device.csrmv(2.0, &a, &x, 3.0, &mut y)).unwrap();
            assert_eq!(
                block_on(device.read_vector(&y)).unwrap(),
                vec![530.0, 340.0, 1230.0, 1280.0]
            );
        }
    }

    /// Whole backing buffer of `v`, guard elements included.
    fn read_backing(device: &GpuDevice, v: &GpuVector) -> Vec<f32> {
        block_on(device.context.read_buffer_to_cpu(v.buffer(), 0, v.capacity())).unwrap()
    }

    #[test]
    fn vector_windows_are_respected() {
        let Some(device) = device() else { return };
        let mut host = scenario();
        let x = device
            .create_vector_with_offset("x", &[0.0, 10.0, 20.0, 30.0, 40.0], 1, 4)
            .unwrap();
        assert_eq!(x.offset(), 1);
        for adaptive in [false, true] {
            if adaptive {
                host.compute_row_blocks().unwrap();
            }
            let a = device.upload_csr(&host).unwrap();
            let mut y = device
                .create_vector_with_offset("y", &[-1.0, -1.0, 50.0, 60.0, 70.0, 80.0, -1.0], 2, 4)
                .unwrap();
            block_on(device.csrmv(2.0, &a, &x, 3.0, &mut y)).unwrap();
            assert_eq!(
                block_on(device.read_vector(&y)).unwrap(),
                vec![530.0, 340.0, 1230.0, 1280.0]
            );
            assert_eq!(
                read_backing(&device, &y),
                vec![-1.0, -1.0, 530.0, 340.0, 1230.0, 1280.0, -1.0]
            );
        }

        let coo = device.upload_coo(&host.to_coo().unwrap()).unwrap();
        let mut y = device
            .create_vector_with_offset("y", &[-1.0, 50.0, 60.0, 70.0, 80.0, -1.0], 1, 4)
            .unwrap();
        block_on(device.coomv(2.0, &coo, &x, 3.0, &mut y)).unwrap();
        assert_eq!(
            read_backing(&device, &y),
            vec![-1.0, 530.0, 340.0, 1230.0, 1280.0, -1.0]
        );
    }

    #[test]
    fn views_share_the_buffer() {
        let Some(device) = device() else { return };
        let whole = device
            .create_vector("whole", &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();
        let head = whole.view(0, 3).unwrap();
        let mut tail = whole.view(3, 3).unwrap();
        assert_eq!(tail.label(), "whole[3..6]");
        assert!(whole.view(4, 3).is_err());

        assert_eq!(block_on(device.dot(&head, &tail)).unwrap(), 32.0);
        assert_eq!(block_on(device.reduce(&tail)).unwrap(), 15.0);
        let other = device.create_vector("other", &[1.0, 2.0, 3.0]).unwrap();
        block_on(device.axpby(1.0, &other, 2.0, &mut tail)).unwrap();
        assert_eq!(
            block_on(device.read_vector(&whole)).unwrap(),
            vec![1.0, 2.0, 3.0, 9.0, 12.0, 15.0]
        );

        let mut middle = whole.view(2, 2).unwrap();
        block_on(device.write_vector(&mut middle, &[-3.0, -9.0])).unwrap();
        block_on(device.scale(2.0, &mut middle)).unwrap();
        let mut window = tail.view(0, 2).unwrap();
        block_on(device.fill(0.5, &mut window)).unwrap();
        assert_eq!(
            block_on(device.read_vector(&whole)).unwrap(),
            vec![1.0, 2.0, -6.0, 0.5, 0.5, 15.0]
        );

        let mut copy = device.create_zeros("copy", 2).unwrap();
        block_on(device.copy(&whole.view(4, 2).unwrap(), &mut copy)).unwrap();
        assert_eq!(block_on(device.read_vector(&copy)).unwrap(), vec![0.5, 15.0]);

        let mut z = device.create_vector_with_offset("z", &[0.0; 4], 2, 2).unwrap();
        block_on(device.elementwise(
            ElementwiseOp::Mul,
            &whole.view(4, 2).unwrap(),
            &head.view(0, 2).unwrap(),
            &mut z,
        ))
        .unwrap();
        assert_eq!(read_backing(&device, &z), vec![0.0, 0.0, 0.5, 30.0]);
    }

    #[test]
    fn csrmv_adaptive_handles_split_rows() {
        let Some(device) = device() else { return };
        let mut rng = fastrand::Rng::with_seed(11);
        let cols = 8000;
        let mut triplets = Vec::new();
        // Row 3 is long enough to be split into several slices.
        for col in 0..cols {
            triplets.push(crate::Triplet::new(3, col, rng.f32() - 0.5));
        }
        for row in 0..300 {
            for _ in 0..rng.usize(0..20) {
                triplets.push(crate::Triplet::new(row, rng.usize(0..cols), rng.f32()));
            }
        }
        let mut host = CsrMatrix::from_triplets(300, cols, &triplets).unwrap();
        host.compute_row_blocks_with(&PartitionConfig::default()).unwrap();
        assert!(!host.row_blocks().unwrap().split_rows().is_empty());

        let xs: Vec<f32> = (0..cols).map(|_| rng.f32()).collect();
        let expected = host_spmv(&host, &xs);

        let a = device.upload_csr(&host).unwrap();
        let x = device.create_vector("x", &xs).unwrap();
        let mut y = device.create_vector("y", &vec![f32::NAN; 300]).unwrap();
        block_on(device.csrmv(1.0, &a, &x, 0.0, &mut y)).unwrap();
        assert_close(&block_on(device.read_vector(&y)).unwrap(), &expected, 1e-3);

        // Partials are cleared between products.
        block_on(device.csrmv(1.0, &a, &x, 0.0, &mut y)).unwrap();
        assert_close(&block_on(device.read_vector(&y)).unwrap(), &expected, 1e-3);
    }

    #[test]
    fn csrmv_rejects_empty_metadata() {
        let Some(device) = device() else { return };
        let mut host = scenario();
        let version = host.version();
        host.set_row_blocks(crate::RowBlocks::new(Vec::new(), version, PartitionConfig::default()));
        let a = device.upload_csr(&host).unwrap();
        let x = device.create_zeros("x", 4).unwrap();
        let mut y = device.create_zeros("y", 4).unwrap();
        assert!(matches!(
            block_on(device.csrmv(1.0, &a, &x, 0.0, &mut y)),
            Err(SparseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn csrmv_dimension_mismatch() {
        let Some(device) = device() else { return };
        let a = device.upload_csr(&scenario()).unwrap();
        let x = device.create_zeros("x", 3).unwrap();
        let mut y = device.create_zeros("y", 4).unwrap();
        assert!(matches!(
            block_on(device.csrmv(1.0, &a, &x, 0.0, &mut y)),
            Err(SparseError::DimensionMismatch(_))
        ));
    }

    #[test]
    fn coomv_matches_csr() {
        let Some(device) = device() else { return };
        let host = scenario().to_coo().unwrap();
        let a = device.upload_coo(&host).unwrap();
        let x = device.create_vector("x", &[1.0, 1.0, 1.0, 1.0]).unwrap();
        let mut y = device.create_vector("y", &[1.0, 1.0, 1.0, 1.0]).unwrap();
        block_on(device.coomv(2.0, &a, &x, 1.0, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![13.0, 9.0, 37.0, 35.0]);

        let mut y = device.create_vector("y", &[f32::NAN; 4]).unwrap();
        block_on(device.coomv(1.0, &a, &x, 0.0, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![6.0, 4.0, 18.0, 17.0]);
    }

    #[test]
    fn blas1_operations() {
        let Some(device) = device() else { return };
        let x = device.create_vector("x", &[1.0, -2.0, 3.0]).unwrap();
        let mut y = device.create_vector("y", &[4.0, 5.0, 6.0]).unwrap();

        assert_eq!(block_on(device.dot(&x, &y)).unwrap(), 12.0);
        assert_eq!(block_on(device.nrm1(&x)).unwrap(), 6.0);
        assert_eq!(block_on(device.reduce(&x)).unwrap(), 2.0);
        assert!((block_on(device.nrm2(&x)).unwrap() - 14f32.sqrt()).abs() < 1e-6);

        block_on(device.axpby(2.0, &x, 0.5, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![4.0, -1.5, 9.0]);

        block_on(device.axpy(-1.0, &x, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![3.0, 0.5, 6.0]);

        block_on(device.scale(2.0, &mut y)).unwrap();
        assert_eq!(block_on(device.read_vector(&y)).unwrap(), vec![6.0, 1.0, 12.0]);

        let mut z = device.create_zeros("z", 3).unwrap();
        block_on(device.elementwise(ElementwiseOp::Div, &y, &x, &mut z)).unwrap();
        assert_eq!(block_on(device.read_vector(&z)).unwrap(), vec![6.0, -0.5, 4.0]);

        block_on(device.copy(&x, &mut z)).unwrap();
        assert_eq!(block_on(device.read_vector(&z)).unwrap(), vec![1.0, -2.0, 3.0]);

        block_on(device.fill(7.0, &mut z)).unwrap();
        assert_eq!(block_on(device.read_vector(&z)).unwrap(), vec![7.0; 3]);
    }

    #[test]
    fn long_reductions_span_many_workgroups() {
        let Some(device) = device() else { return };
        let n = 100_000;
        let x = device.create_vector("x", &vec![1.0; n]).unwrap();
        assert_eq!(block_on(device.reduce(&x)).unwrap(), n as f32);
        assert_eq!(block_on(device.dot(&x, &x)).unwrap(), n as f32);
    }

    #[test]
    fn reductions_into_scalar_slots() {
        let Some(device) = device() else { return };
        let x = device.create_vector("x", &[3.0, 4.0]).unwrap();
        let slots = device.create_scalars("slots", 3);
        block_on(device.nrm2_into(&x, &slots[1])).unwrap();
        block_on(device.dot_into(&x, &x, &slots[2])).unwrap();
        assert_eq!(block_on(slots[0].read()).unwrap(), 0.0);
        assert_eq!(block_on(slots[1].read()).unwrap(), 5.0);
        assert_eq!(block_on(slots[2].read()).unwrap(), 25.0);
    }

    #[test]
    fn empty_vectors() {
        let Some(device) = device() else { return };
        let x = device.create_zeros("x", 0).unwrap();
        assert_eq!(block_on(device.nrm2(&x)).unwrap(), 0.0);
        assert!(block_on(device.read_vector(&x)).unwrap().is_empty());
    }

    #[test]
    fn extract_diagonal_reads_stored_entries() {
        let Some(device) = device() else { return };
        let a = device.upload_csr(&scenario()).unwrap();
        let mut d = device.create_zeros("d", 4).unwrap();
        block_on(device.extract_diagonal(&a, &mut d)).unwrap();
        assert_eq!(block_on(device.read_vector(&d)).unwrap(), vec![1.0, 4.0, 6.0, 9.0]);
    }

    #[test]
    fn transfer_stats_count_uploads_and_readbacks() {
        let Some(device) = device() else { return };
        device.reset_transfer_stats();
        let x = device.create_vector("x", &[1.0, 2.0]).unwrap();
        let _ = block_on(device.read_vector(&x)).unwrap();
        let stats = device.transfer_stats();
        assert_eq!(stats.bytes_to_gpu, 8);
        assert_eq!(stats.bytes_from_gpu, 8);
    }
}
