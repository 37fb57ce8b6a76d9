//! # Sparse Core Library
//!
//! Sparse matrix formats, the row-block partitioner behind the adaptive CSR
//! SpMV, and the execution devices (rayon thread pool, wgpu GPU) that run the
//! sparse and dense vector kernels.

pub mod convert;
pub mod coo;
pub mod cpu;
pub mod csr;
pub mod dense;
pub mod device;
pub mod error;
#[cfg(feature = "gpu")]
pub mod gpu;
pub mod partition;
pub mod traits;

pub use coo::CooMatrix;
pub use cpu::{CpuConfig, CpuDevice};
pub use csr::{CsrMatrix, Triplet};
pub use dense::{DenseMatrix, DenseVector, Layout};
pub use device::{Device, ElementwiseOp};
pub use error::{Result, SparseError};
#[cfg(feature = "gpu")]
pub use gpu::{GpuCooMatrix, GpuCsrMatrix, GpuDevice, GpuScalar, GpuVector, TransferStats};
pub use partition::{
    compute_meta, compute_meta_size, Block, PartitionConfig, RowBlock, RowBlockKind, RowBlocks,
};
pub use traits::{Matrix, Real, Vector};
