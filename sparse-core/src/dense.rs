use crate::error::{Result, SparseError};
use crate::traits::{Matrix, Real, Vector};

/// A dense vector: a window of `len` elements starting at `offset` inside an
/// owned buffer. Operations only ever touch the window, so one allocation can
/// host several logical vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseVector<T> {
    values: Vec<T>,
    offset: usize,
    len: usize,
}

impl<T: Real> DenseVector<T> {
    /// Wraps a whole buffer.
    pub fn from_vec(values: Vec<T>) -> Self {
        let len = values.len();
        Self {
            values,
            offset: 0,
            len,
        }
    }

    pub fn zeros(len: usize) -> Self {
        Self::from_vec(vec![T::zero(); len])
    }

    pub fn filled(len: usize, value: T) -> Self {
        Self::from_vec(vec![value; len])
    }

    /// Creates a view of `len` elements starting at `offset` in `values`.
    pub fn with_offset(values: Vec<T>, offset: usize, len: usize) -> Result<Self> {
        if offset.checked_add(len).map_or(true, |end| end > values.len()) {
            return Err(SparseError::InvalidArgument(format!(
                "Vector window [{}, {}+{}) exceeds buffer length {}",
                offset,
                offset,
                len,
                values.len()
            )));
        }
        Ok(Self {
            values,
            offset,
            len,
        })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// The elements of the window.
    pub fn as_slice(&self) -> &[T] {
        &self.values[self.offset..self.offset + self.len]
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.values[self.offset..self.offset + self.len]
    }

    /// The whole backing buffer, including elements outside the window.
    pub fn buffer(&self) -> &[T] {
        &self.values
    }

    /// Copies the window out.
    pub fn to_vec(&self) -> Vec<T> {
        self.as_slice().to_vec()
    }

    /// Returns the backing buffer.
    pub fn into_buffer(self) -> Vec<T> {
        self.values
    }
}

impl<T: Real> From<Vec<T>> for DenseVector<T> {
    fn from(values: Vec<T>) -> Self {
        Self::from_vec(values)
    }
}

impl<T: Real> Vector for DenseVector<T> {
    type Value = T;

    fn len(&self) -> usize {
        self.len
    }
}

/// Storage order of a dense matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    RowMajor,
    ColMajor,
}

/// A dense matrix view with a leading dimension.
///
/// Element `(r, c)` lives at `offset + r * ld + c` in row-major order and at
/// `offset + c * ld + r` in column-major order. `ld` may exceed the
/// contiguous extent so that sub-matrices of a larger allocation can be
/// addressed in place.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix<T> {
    values: Vec<T>,
    rows: usize,
    cols: usize,
    ld: usize,
    offset: usize,
    layout: Layout,
}

impl<T: Real> DenseMatrix<T> {
    /// Packed matrix (`ld` equals the contiguous extent, no offset).
    pub fn new(rows: usize, cols: usize, layout: Layout, values: Vec<T>) -> Result<Self> {
        let ld = match layout {
            Layout::RowMajor => cols,
            Layout::ColMajor => rows,
        };
        Self::with_stride(rows, cols, layout, ld, 0, values)
    }

    pub fn zeros(rows: usize, cols: usize, layout: Layout) -> Self {
        let ld = match layout {
            Layout::RowMajor => cols,
            Layout::ColMajor => rows,
        };
        Self {
            values: vec![T::zero(); rows * cols],
            rows,
            cols,
            ld,
            offset: 0,
            layout,
        }
    }

    /// Strided view. Validates that every addressed element is inside `values`.
    pub fn with_stride(
        rows: usize,
        cols: usize,
        layout: Layout,
        ld: usize,
        offset: usize,
        values: Vec<T>,
    ) -> Result<Self> {
        let (outer, inner) = match layout {
            Layout::RowMajor => (rows, cols),
            Layout::ColMajor => (cols, rows),
        };
        if ld < inner {
            return Err(SparseError::InvalidArgument(format!(
                "Leading dimension ({}) is smaller than the contiguous extent ({})",
                ld, inner
            )));
        }
        let required = if outer == 0 || inner == 0 {
            offset
        } else {
            offset + (outer - 1) * ld + inner
        };
        if required > values.len() {
            return Err(SparseError::InvalidArgument(format!(
                "Dense matrix {}x{} (ld {}, offset {}) needs {} elements, buffer has {}",
                rows,
                cols,
                ld,
                offset,
                required,
                values.len()
            )));
        }
        Ok(Self {
            values,
            rows,
            cols,
            ld,
            offset,
            layout,
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn ld(&self) -> usize {
        self.ld
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Buffer position of element `(row, col)`.
    #[inline]
    pub fn index_of(&self, row: usize, col: usize) -> usize {
        match self.layout {
            Layout::RowMajor => self.offset + row * self.ld + col,
            Layout::ColMajor => self.offset + col * self.ld + row,
        }
    }

    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        Some(self.values[self.index_of(row, col)])
    }

    /// Sets element `(row, col)`; out-of-range coordinates are rejected.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(SparseError::InvalidArgument(format!(
                "Element ({}, {}) is outside a {}x{} matrix",
                row, col, self.rows, self.cols
            )));
        }
        let idx = self.index_of(row, col);
        self.values[idx] = value;
        Ok(())
    }

    /// The whole backing buffer.
    pub fn buffer(&self) -> &[T] {
        &self.values
    }

    pub(crate) fn buffer_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    /// Copies the logical matrix out as nested rows (testing/debugging helper).
    pub fn to_rows(&self) -> Vec<Vec<T>> {
        (0..self.rows)
            .map(|r| (0..self.cols).map(|c| self.values[self.index_of(r, c)]).collect())
            .collect()
    }
}

impl<T: Real> Matrix for DenseMatrix<T> {
    type Value = T;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_window_only_exposes_its_elements() {
        let v = DenseVector::with_offset(vec![9.0f64, 1.0, 2.0, 3.0, 9.0], 1, 3).unwrap();
        assert_eq!(v.len(), 3);
        assert_eq!(v.as_slice(), &[1.0, 2.0, 3.0]);
        assert_eq!(v.buffer().len(), 5);
    }

    #[test]
    fn vector_window_out_of_bounds_is_rejected() {
        let err = DenseVector::with_offset(vec![0.0f32; 4], 2, 3).unwrap_err();
        assert!(matches!(err, SparseError::InvalidArgument(_)));
    }

    #[test]
    fn strided_views_address_the_right_elements() {
        // 2x2 sub-matrix at offset 1 of a 3-wide row-major buffer.
        let buffer = vec![0.0f64, 1.0, 2.0, 0.0, 3.0, 4.0];
        let m = DenseMatrix::with_stride(2, 2, Layout::RowMajor, 3, 1, buffer).unwrap();
        assert_eq!(m.to_rows(), vec![vec![1.0, 2.0], vec![3.0, 4.0]]);

        let col = DenseMatrix::new(2, 3, Layout::ColMajor, vec![1.0f32, 4.0, 2.0, 5.0, 3.0, 6.0])
            .unwrap();
        assert_eq!(col.get(0, 2), Some(3.0));
        assert_eq!(col.get(1, 0), Some(4.0));
        assert_eq!(col.get(2, 0), None);
    }

    #[test]
    fn too_small_leading_dimension_is_rejected() {
        let err = DenseMatrix::with_stride(2, 3, Layout::RowMajor, 2, 0, vec![0.0f64; 6]);
        assert!(matches!(err, Err(SparseError::InvalidArgument(_))));
    }
}
