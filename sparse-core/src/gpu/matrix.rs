use super::context::GpuContext;
use crate::coo::CooMatrix;
use crate::csr::CsrMatrix;
use crate::error::{Result, SparseError};
use crate::partition::RowBlocks;
use crate::traits::Matrix;

const MATRIX_USAGE: wgpu::BufferUsages =
    wgpu::BufferUsages::STORAGE.union(wgpu::BufferUsages::COPY_DST);

fn to_u32(what: &str, indices: &[usize]) -> Result<Vec<u32>> {
    indices
        .iter()
        .map(|&i| {
            u32::try_from(i).map_err(|_| {
                SparseError::InvalidArgument(format!("{} index {} does not fit in 32 bits", what, i))
            })
        })
        .collect()
}

/// Row-block metadata in device form.
#[derive(Debug)]
pub(crate) struct GpuRowBlocks {
    /// Packed descriptors, read as `(unit, row)` pairs.
    pub(crate) descriptors: wgpu::Buffer,
    pub(crate) count: u32,
    /// Rows whose slices meet in `partials`.
    pub(crate) split_rows: wgpu::Buffer,
    pub(crate) split_count: u32,
    /// One accumulator per matrix row, cleared before each product.
    pub(crate) partials: wgpu::Buffer,
    pub(crate) capacity: u32,
    pub(crate) rows_for_vector: u32,
}

impl GpuRowBlocks {
    fn upload(context: &GpuContext, rows: usize, blocks: &RowBlocks) -> Result<Self> {
        if !blocks.is_empty() {
            blocks.validate(rows)?;
        }
        let packed = blocks.pack();
        let split: Vec<usize> = blocks.split_rows().into_iter().map(|(row, _)| row).collect();
        let split = to_u32("split row", &split)?;
        let capacity = u32::try_from(blocks.split_capacity()).map_err(|_| {
            SparseError::InvalidArgument("Split capacity does not fit in 32 bits".to_string())
        })?;
        Ok(Self {
            descriptors: context.create_gpu_buffer_with_data(
                "row_blocks",
                bytemuck::cast_slice(&packed),
                MATRIX_USAGE,
            ),
            count: packed.len() as u32,
            split_rows: context.create_gpu_buffer_with_data(
                "split_rows",
                bytemuck::cast_slice(&split),
                MATRIX_USAGE,
            ),
            split_count: split.len() as u32,
            partials: context.create_empty_buffer(
                "split_partials",
                if split.is_empty() { 0 } else { (rows * 4) as u64 },
                MATRIX_USAGE,
            ),
            capacity,
            rows_for_vector: blocks.config().rows_for_vector as u32,
        })
    }
}

/// CSR matrix in GPU storage buffers, with 32-bit indices.
#[derive(Debug)]
pub struct GpuCsrMatrix {
    rows: usize,
    cols: usize,
    nnz: usize,
    pub(crate) row_offsets: wgpu::Buffer,
    pub(crate) col_indices: wgpu::Buffer,
    pub(crate) values: wgpu::Buffer,
    pub(crate) row_blocks: Option<GpuRowBlocks>,
}

impl GpuCsrMatrix {
    pub(crate) fn upload(context: &GpuContext, matrix: &CsrMatrix<f32>) -> Result<Self> {
        log::debug!(
            "Uploading {}x{} CSR matrix with {} nnz",
            matrix.rows(),
            matrix.cols(),
            matrix.nnz()
        );
        let row_offsets = to_u32("row offset", matrix.row_offsets())?;
        let col_indices = to_u32("column", matrix.col_indices())?;

        let row_blocks = match matrix.row_blocks() {
            None => None,
            Some(blocks) if blocks.version() != matrix.version() => {
                log::warn!(
                    "Row blocks were computed for pattern version {}, matrix is at {}; repartitioning",
                    blocks.version(),
                    matrix.version()
                );
                let fresh = RowBlocks::compute(matrix, blocks.config())?;
                Some(GpuRowBlocks::upload(context, matrix.rows(), &fresh)?)
            }
            Some(blocks) => Some(GpuRowBlocks::upload(context, matrix.rows(), blocks)?),
        };

        Ok(Self {
            rows: matrix.rows(),
            cols: matrix.cols(),
            nnz: matrix.nnz(),
            row_offsets: context.create_gpu_buffer_with_data(
                "csr_row_offsets",
                bytemuck::cast_slice(&row_offsets),
                MATRIX_USAGE,
            ),
            col_indices: context.create_gpu_buffer_with_data(
                "csr_col_indices",
                bytemuck::cast_slice(&col_indices),
                MATRIX_USAGE,
            ),
            values: context.create_gpu_buffer_with_data(
                "csr_values",
                bytemuck::cast_slice(matrix.values()),
                MATRIX_USAGE,
            ),
            row_blocks,
        })
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }

    /// Number of row-block descriptors, if the matrix carries any.
    pub fn row_block_count(&self) -> Option<usize> {
        self.row_blocks.as_ref().map(|b| b.count as usize)
    }
}

impl Matrix for GpuCsrMatrix {
    type Value = f32;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// COO matrix in GPU storage buffers.
#[derive(Debug)]
pub struct GpuCooMatrix {
    rows: usize,
    cols: usize,
    nnz: usize,
    pub(crate) row_indices: wgpu::Buffer,
    pub(crate) col_indices: wgpu::Buffer,
    pub(crate) values: wgpu::Buffer,
}

impl GpuCooMatrix {
    pub(crate) fn upload(context: &GpuContext, matrix: &CooMatrix<f32>) -> Result<Self> {
        log::debug!(
            "Uploading {}x{} COO matrix with {} nnz",
            matrix.rows(),
            matrix.cols(),
            matrix.nnz()
        );
        let row_indices = to_u32("row", matrix.row_indices())?;
        let col_indices = to_u32("column", matrix.col_indices())?;
        Ok(Self {
            rows: matrix.rows(),
            cols: matrix.cols(),
            nnz: matrix.nnz(),
            row_indices: context.create_gpu_buffer_with_data(
                "coo_row_indices",
                bytemuck::cast_slice(&row_indices),
                MATRIX_USAGE,
            ),
            col_indices: context.create_gpu_buffer_with_data(
                "coo_col_indices",
                bytemuck::cast_slice(&col_indices),
                MATRIX_USAGE,
            ),
            values: context.create_gpu_buffer_with_data(
                "coo_values",
                bytemuck::cast_slice(matrix.values()),
                MATRIX_USAGE,
            ),
        })
    }

    pub fn nnz(&self) -> usize {
        self.nnz
    }
}

impl Matrix for GpuCooMatrix {
    type Value = f32;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}
