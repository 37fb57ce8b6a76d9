use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparseError {
    /// Malformed dimensions, zero-sized buffers, unsorted COO input,
    /// inconsistent row-block metadata.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Vector or matrix sizes that do not fit together.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The execution substrate (thread pool, wgpu device) reported an error.
    #[error("Device failure: {0}")]
    DeviceFailure(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, SparseError>;

impl SparseError {
    pub(crate) fn dims(what: &str, expected: usize, actual: usize) -> Self {
        SparseError::DimensionMismatch(format!(
            "{} must have length {}, got {}",
            what, expected, actual
        ))
    }
}
