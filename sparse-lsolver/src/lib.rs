//! `sparse-lsolver`: iterative Krylov solvers for sparse systems `A x = b`.
//!
//! The solvers are written once against the [`sparse_core::Device`] trait, so
//! the same Conjugate Gradient and BiCGStab loops run on the rayon CPU device
//! and on the wgpu GPU device.

pub mod algorithms;
pub mod control;
pub mod convergence;
mod preconditioner;

pub use algorithms::{BiCGStab, ConjugateGradient, SolveAlgorithm};
pub use control::{Preconditioner, PrintMode, SolverControl};
pub use convergence::{SolveReport, SolveStatus, SolverPhase};

pub use sparse_core::{CpuDevice, CsrMatrix, Device, Matrix, Result, SparseError, Vector};
#[cfg(feature = "gpu")]
pub use sparse_core::GpuDevice;
