use bytemuck::{Pod, Zeroable};
use num_traits::Float;
use std::fmt::{Debug, Display};
use std::iter::Sum;
use std::ops::AddAssign;

/// Element type of every host-side matrix and vector.
///
/// Implemented for `f32` and `f64`, the single and double precision variants
/// of each operation.
pub trait Real:
    Float + Pod + Zeroable + Default + Debug + Display + Send + Sync + AddAssign + Sum + 'static
{
    /// Lossy conversion from `f64` (tolerances, literals).
    fn cast_f64(v: f64) -> Self;

    /// Widening conversion used by cross-tile accumulators and reports.
    fn into_f64(self) -> f64;
}

impl Real for f32 {
    fn cast_f64(v: f64) -> Self {
        v as f32
    }

    fn into_f64(self) -> f64 {
        self as f64
    }
}

impl Real for f64 {
    fn cast_f64(v: f64) -> Self {
        v
    }

    fn into_f64(self) -> f64 {
        self
    }
}

/// Generic trait representing a matrix.
/// Implementations can be sparse, dense, CPU-based, GPU-based.
pub trait Matrix: Debug {
    /// The underlying numeric type of the matrix elements.
    type Value: Real;

    /// Returns the dimensions of the matrix as (rows, columns).
    fn dims(&self) -> (usize, usize);

    /// Returns the number of rows.
    fn rows(&self) -> usize {
        self.dims().0
    }

    /// Returns the number of columns.
    fn cols(&self) -> usize {
        self.dims().1
    }

    /// Checks if the matrix is square.
    fn is_square(&self) -> bool {
        let (rows, cols) = self.dims();
        rows == cols
    }
}

/// Generic trait representing a vector.
/// Implementations can be CPU-based or GPU-based.
pub trait Vector: Debug {
    /// The underlying numeric type of the vector elements.
    type Value: Real;

    /// Returns the number of elements in the vector.
    fn len(&self) -> usize;

    /// Checks if the vector is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
