use crate::csr::Triplet;
use crate::error::{Result, SparseError};
use crate::traits::{Matrix, Real};

/// A sparse matrix in coordinate (COO) format, entries sorted by (row, col).
#[derive(Debug, Clone, PartialEq)]
pub struct CooMatrix<T> {
    rows: usize,
    cols: usize,
    pub(crate) row_indices: Vec<usize>,
    pub(crate) col_indices: Vec<usize>,
    pub(crate) values: Vec<T>,
}

impl<T: Real> CooMatrix<T> {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            row_indices: Vec::new(),
            col_indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Takes explicit coordinate arrays. They must already be sorted by
    /// (row, col); unsorted input is rejected rather than reordered.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        row_indices: Vec<usize>,
        col_indices: Vec<usize>,
        values: Vec<T>,
    ) -> Result<Self> {
        if row_indices.len() != values.len() || col_indices.len() != values.len() {
            return Err(SparseError::InvalidArgument(format!(
                "COO arrays differ in length (rows {}, cols {}, values {})",
                row_indices.len(),
                col_indices.len(),
                values.len()
            )));
        }
        if let Some(k) = (0..values.len()).find(|&k| row_indices[k] >= rows || col_indices[k] >= cols)
        {
            return Err(SparseError::InvalidArgument(format!(
                "Entry {} at ({}, {}) is outside a {}x{} matrix",
                k, row_indices[k], col_indices[k], rows, cols
            )));
        }
        if let Some(k) = (1..values.len()).find(|&k| {
            (row_indices[k - 1], col_indices[k - 1]) > (row_indices[k], col_indices[k])
        }) {
            return Err(SparseError::InvalidArgument(format!(
                "COO entries must be sorted by (row, col); entry {} is out of order",
                k
            )));
        }
        Ok(Self {
            rows,
            cols,
            row_indices,
            col_indices,
            values,
        })
    }

    /// Builds a matrix from triplets in any order.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[Triplet<T>]) -> Result<Self> {
        let mut sorted = triplets.to_vec();
        sorted.sort_by_key(|t| (t.row, t.col));
        Self::from_parts(
            rows,
            cols,
            sorted.iter().map(|t| t.row).collect(),
            sorted.iter().map(|t| t.col).collect(),
            sorted.iter().map(|t| t.value).collect(),
        )
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn iter(&self) -> impl Iterator<Item = Triplet<T>> + '_ {
        (0..self.nnz()).map(move |k| Triplet {
            row: self.row_indices[k],
            col: self.col_indices[k],
            value: self.values[k],
        })
    }
}

impl<T: Real> Matrix for CooMatrix<T> {
    type Value = T;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}
