//! Conversions between the CSR, COO and dense representations.

use crate::coo::CooMatrix;
use crate::csr::CsrMatrix;
use crate::dense::{DenseMatrix, Layout};
use crate::error::Result;
use crate::traits::{Matrix, Real};

impl<T: Real> CooMatrix<T> {
    /// Compresses the row indices into offsets. Entries keep their order, so
    /// the CSR result has sorted columns within each row.
    pub fn to_csr(&self) -> Result<CsrMatrix<T>> {
        let (rows, cols) = self.dims();
        let mut row_offsets = vec![0usize; rows + 1];
        for &r in &self.row_indices {
            row_offsets[r + 1] += 1;
        }
        for i in 1..=rows {
            row_offsets[i] += row_offsets[i - 1];
        }
        log::debug!("COO -> CSR: {}x{} with {} nnz", rows, cols, self.nnz());
        CsrMatrix::from_csr(
            rows,
            cols,
            self.values.clone(),
            self.col_indices.clone(),
            row_offsets,
        )
    }
}

impl<T: Real> CsrMatrix<T> {
    /// Expands the row offsets into explicit row indices.
    ///
    /// Fails when a row holds unsorted columns, since COO requires
    /// (row, col) order.
    pub fn to_coo(&self) -> Result<CooMatrix<T>> {
        let (rows, cols) = self.dims();
        let mut row_indices = Vec::with_capacity(self.nnz());
        for row in 0..rows {
            row_indices.extend(std::iter::repeat(row).take(self.row_range(row).len()));
        }
        log::debug!("CSR -> COO: {}x{} with {} nnz", rows, cols, self.nnz());
        CooMatrix::from_parts(
            rows,
            cols,
            row_indices,
            self.col_indices.clone(),
            self.values.clone(),
        )
    }

    /// Materialises the matrix densely. Duplicate entries are summed.
    pub fn to_dense(&self, layout: Layout) -> DenseMatrix<T> {
        let (rows, cols) = self.dims();
        let mut dense = DenseMatrix::zeros(rows, cols, layout);
        for t in self.iter() {
            let idx = dense.index_of(t.row, t.col);
            dense.buffer_mut()[idx] += t.value;
        }
        dense
    }

    /// Collects the non-zero elements of a dense matrix (any layout or stride).
    pub fn from_dense(dense: &DenseMatrix<T>) -> Result<Self> {
        let (rows, cols) = dense.dims();
        let mut values = Vec::new();
        let mut col_indices = Vec::new();
        let mut row_offsets = Vec::with_capacity(rows + 1);
        row_offsets.push(0);
        for r in 0..rows {
            for c in 0..cols {
                let v = dense.buffer()[dense.index_of(r, c)];
                if v != T::zero() {
                    values.push(v);
                    col_indices.push(c);
                }
            }
            row_offsets.push(values.len());
        }
        CsrMatrix::from_csr(rows, cols, values, col_indices, row_offsets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SparseError;

    fn scenario() -> CsrMatrix<f64> {
        CsrMatrix::from_csr(
            4,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0],
            vec![0, 2, 3, 1, 0, 2, 3, 1, 3],
            vec![0, 3, 4, 7, 9],
        )
        .unwrap()
    }

    #[test]
    fn csr_coo_csr_round_trip_is_exact() {
        let csr = scenario();
        let coo = csr.to_coo().unwrap();
        assert_eq!(coo.row_indices(), &[0, 0, 0, 1, 2, 2, 2, 3, 3]);
        let back = coo.to_csr().unwrap();
        assert_eq!(back.values(), csr.values());
        assert_eq!(back.col_indices(), csr.col_indices());
        assert_eq!(back.row_offsets(), csr.row_offsets());
    }

    #[test]
    fn round_trip_keeps_empty_rows() {
        let csr = CsrMatrix::from_csr(5, 3, vec![1.0f32, 2.0], vec![2, 0], vec![0, 0, 1, 1, 2, 2])
            .unwrap();
        let back = csr.to_coo().unwrap().to_csr().unwrap();
        assert_eq!(back.row_offsets(), csr.row_offsets());
        assert_eq!(back.col_indices(), csr.col_indices());
    }

    #[test]
    fn unsorted_csr_rows_cannot_become_coo() {
        let csr = CsrMatrix::from_csr(1, 3, vec![1.0f32, 2.0], vec![2, 0], vec![0, 2]).unwrap();
        assert!(matches!(csr.to_coo(), Err(SparseError::InvalidArgument(_))));
    }

    #[test]
    fn dense_round_trip_in_both_layouts() {
        let csr = scenario();
        for layout in [Layout::RowMajor, Layout::ColMajor] {
            let dense = csr.to_dense(layout);
            assert_eq!(
                dense.to_rows(),
                vec![
                    vec![1.0, 0.0, 2.0, 3.0],
                    vec![0.0, 4.0, 0.0, 0.0],
                    vec![5.0, 0.0, 6.0, 7.0],
                    vec![0.0, 8.0, 0.0, 9.0],
                ]
            );
            let back = CsrMatrix::from_dense(&dense).unwrap();
            assert_eq!(back.row_offsets(), csr.row_offsets());
            assert_eq!(back.col_indices(), csr.col_indices());
            assert_eq!(back.values(), csr.values());
        }
    }

    #[test]
    fn from_dense_honours_leading_dimension() {
        // 2x2 view with ld 3 inside a padded buffer.
        let dense = DenseMatrix::with_stride(
            2,
            2,
            Layout::RowMajor,
            3,
            0,
            vec![0.0f32, 1.0, 99.0, 2.0, 0.0, 99.0],
        )
        .unwrap();
        let csr = CsrMatrix::from_dense(&dense).unwrap();
        assert_eq!(csr.values(), &[1.0, 2.0]);
        assert_eq!(csr.col_indices(), &[1, 0]);
        assert_eq!(csr.row_offsets(), &[0, 1, 2]);
    }
}
