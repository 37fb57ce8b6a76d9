//! Sparse × dense and sparse × sparse products.

use super::spmv::blend;
use crate::csr::CsrMatrix;
use crate::dense::DenseMatrix;
use crate::error::{Result, SparseError};
use crate::traits::{Matrix, Real};
use rayon::prelude::*;

/// `C = alpha * A * B + beta * C` with dense `B` and `C` in any layout.
pub(crate) fn csrmm<T: Real>(
    pool: &rayon::ThreadPool,
    alpha: T,
    a: &CsrMatrix<T>,
    b: &DenseMatrix<T>,
    beta: T,
    c: &mut DenseMatrix<T>,
) -> Result<()> {
    if b.rows() != a.cols() {
        return Err(SparseError::DimensionMismatch(format!(
            "B has {} rows, A has {} columns",
            b.rows(),
            a.cols()
        )));
    }
    if c.dims() != (a.rows(), b.cols()) {
        return Err(SparseError::DimensionMismatch(format!(
            "C is {:?}, expected ({}, {})",
            c.dims(),
            a.rows(),
            b.cols()
        )));
    }
    let n = b.cols();
    let products: Vec<Vec<T>> = pool.install(|| {
        (0..a.rows())
            .into_par_iter()
            .map(|row| {
                let mut acc = vec![T::zero(); n];
                for k in a.row_range(row) {
                    let (col, v) = (a.col_indices[k], a.values[k]);
                    for (j, slot) in acc.iter_mut().enumerate() {
                        *slot += v * b.buffer()[b.index_of(col, j)];
                    }
                }
                acc
            })
            .collect()
    });
    for (row, acc) in products.into_iter().enumerate() {
        for (j, dot) in acc.into_iter().enumerate() {
            let idx = c.index_of(row, j);
            let buf = c.buffer_mut();
            buf[idx] = blend(alpha, dot, beta, buf[idx]);
        }
    }
    Ok(())
}

/// `A * B` row by row with a dense accumulator. Columns of the result are
/// sorted within each row.
pub(crate) fn spgemm<T: Real>(
    pool: &rayon::ThreadPool,
    a: &CsrMatrix<T>,
    b: &CsrMatrix<T>,
) -> Result<CsrMatrix<T>> {
    if a.cols() != b.rows() {
        return Err(SparseError::DimensionMismatch(format!(
            "Cannot multiply {:?} by {:?}",
            a.dims(),
            b.dims()
        )));
    }
    let n = b.cols();
    let rows: Vec<(Vec<usize>, Vec<T>)> = pool.install(|| {
        (0..a.rows())
            .into_par_iter()
            .map_init(
                || (vec![T::zero(); n], vec![false; n]),
                |(acc, seen), row| {
                    let mut cols = Vec::new();
                    for k in a.row_range(row) {
                        let (mid, av) = (a.col_indices[k], a.values[k]);
                        for kb in b.row_range(mid) {
                            let col = b.col_indices[kb];
                            if !seen[col] {
                                seen[col] = true;
                                cols.push(col);
                            }
                            acc[col] += av * b.values[kb];
                        }
                    }
                    cols.sort_unstable();
                    let values = cols
                        .iter()
                        .map(|&col| {
                            let v = acc[col];
                            acc[col] = T::zero();
                            seen[col] = false;
                            v
                        })
                        .collect();
                    (cols, values)
                },
            )
            .collect()
    });

    let nnz = rows.iter().map(|(cols, _)| cols.len()).sum();
    let mut values = Vec::with_capacity(nnz);
    let mut col_indices = Vec::with_capacity(nnz);
    let mut row_offsets = Vec::with_capacity(a.rows() + 1);
    row_offsets.push(0);
    for (cols, vals) in rows {
        col_indices.extend(cols);
        values.extend(vals);
        row_offsets.push(values.len());
    }
    log::debug!(
        "spgemm {:?} x {:?} produced {} nnz",
        a.dims(),
        b.dims(),
        nnz
    );
    CsrMatrix::from_csr(a.rows(), n, values, col_indices, row_offsets)
}
