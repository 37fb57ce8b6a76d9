//! SpMV kernels for the CPU device.
//!
//! A tile is one rayon task; the lanes of a tile are the iterations of its
//! inner loop, sharing a tile-local scratch buffer for reductions.

use super::atomic::AtomicF64;
use crate::coo::CooMatrix;
use crate::csr::CsrMatrix;
use crate::error::{Result, SparseError};
use crate::partition::{slice_range, Block, RowBlocks};
use crate::traits::Real;
use rayon::prelude::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// `alpha * dot + beta * y`, with `beta == 0` treating `y` as write-only.
#[inline]
pub(crate) fn blend<T: Real>(alpha: T, dot: T, beta: T, y: T) -> T {
    if beta == T::zero() {
        alpha * dot
    } else {
        alpha * dot + beta * y
    }
}

/// Serial dot product of one row with `x`, accumulated in `f64`.
#[inline]
fn row_dot<T: Real>(a: &CsrMatrix<T>, range: std::ops::Range<usize>, x: &[T]) -> f64 {
    let mut sum = 0.0f64;
    for k in range {
        sum += a.values[k].into_f64() * x[a.col_indices[k]].into_f64();
    }
    sum
}

/// Lanes stride over `range`, then fold pairwise until lane 0 holds the sum.
fn tile_reduce<T: Real>(
    a: &CsrMatrix<T>,
    range: std::ops::Range<usize>,
    x: &[T],
    scratch: &mut [f64],
) -> f64 {
    let lanes = scratch.len();
    for (lane, slot) in scratch.iter_mut().enumerate() {
        let mut sum = 0.0f64;
        let mut k = range.start + lane;
        while k < range.end {
            sum += a.values[k].into_f64() * x[a.col_indices[k]].into_f64();
            k += lanes;
        }
        *slot = sum;
    }
    let mut width = lanes;
    while width > 1 {
        let half = width / 2;
        for lane in 0..half {
            let other = scratch[lane + half];
            scratch[lane] += other;
        }
        width = half;
    }
    scratch[0]
}

/// Completion state of a row shared by several tiles.
struct SplitRow<'y, T> {
    partial: AtomicF64,
    remaining: AtomicU32,
    y: Mutex<&'y mut T>,
}

enum Work<'a, 'y, T> {
    Rows { start: usize, y: &'y mut [T] },
    Slice { row: usize, unit: usize, units: usize, target: &'a SplitRow<'y, T> },
}

/// Adaptive CSR kernel: one tile per row block.
#[allow(clippy::too_many_arguments)]
pub(crate) fn csrmv_adaptive<T: Real>(
    pool: &rayon::ThreadPool,
    lanes: usize,
    alpha: T,
    a: &CsrMatrix<T>,
    blocks: &RowBlocks,
    x: &[T],
    beta: T,
    y: &mut [T],
) -> Result<()> {
    let decoded: Vec<Block> = blocks.blocks().collect();
    let rows_for_vector = blocks.config().rows_for_vector;
    let capacity = blocks.split_capacity();

    // Hand every tile exclusive access to the part of `y` it finalises.
    let mut whole: Vec<(usize, &mut [T])> = Vec::new();
    let mut split: Vec<SplitRow<'_, T>> = Vec::new();
    let mut slices: Vec<(usize, usize, usize, usize)> = Vec::new();
    let mut rest = y;
    let mut next_row = 0usize;
    for block in &decoded {
        match *block {
            Block::Rows { start, end } => {
                if start != next_row || end < start {
                    return Err(inconsistent(block));
                }
                let (head, tail) = std::mem::take(&mut rest).split_at_mut(end - start);
                whole.push((start, head));
                rest = tail;
                next_row = end;
            }
            Block::Slice { row, unit, units } => {
                if unit == 0 {
                    if row != next_row || rest.is_empty() {
                        return Err(inconsistent(block));
                    }
                    let (head, tail) = std::mem::take(&mut rest).split_at_mut(1);
                    split.push(SplitRow {
                        partial: AtomicF64::new(0.0),
                        remaining: AtomicU32::new(units as u32),
                        y: Mutex::new(&mut head[0]),
                    });
                    rest = tail;
                    next_row = row + 1;
                } else if row + 1 != next_row {
                    return Err(inconsistent(block));
                }
                slices.push((row, unit, units, split.len() - 1));
            }
        }
    }
    if next_row != a.row_offsets.len() - 1 {
        return Err(SparseError::InvalidArgument(format!(
            "Row blocks cover {} rows, matrix has {}",
            next_row,
            a.row_offsets.len() - 1
        )));
    }

    let mut work: Vec<Work<'_, '_, T>> = whole
        .into_iter()
        .map(|(start, y)| Work::Rows { start, y })
        .collect();
    work.extend(slices.into_iter().map(|(row, unit, units, idx)| Work::Slice {
        row,
        unit,
        units,
        target: &split[idx],
    }));
    log::trace!(
        "Adaptive csrmv: {} tiles ({} split rows)",
        work.len(),
        split.len()
    );

    pool.install(|| {
        work.into_par_iter().try_for_each_init(
            || vec![0.0f64; lanes],
            |scratch, item| -> Result<()> {
                match item {
                    Work::Rows { start, y } if y.len() > rows_for_vector => {
                        for (i, yi) in y.iter_mut().enumerate() {
                            let dot = T::cast_f64(row_dot(a, a.row_range(start + i), x));
                            *yi = blend(alpha, dot, beta, *yi);
                        }
                    }
                    Work::Rows { start, y } => {
                        for (i, yi) in y.iter_mut().enumerate() {
                            let dot =
                                T::cast_f64(tile_reduce(a, a.row_range(start + i), x, scratch));
                            *yi = blend(alpha, dot, beta, *yi);
                        }
                    }
                    Work::Slice {
                        row,
                        unit,
                        units,
                        target,
                    } => {
                        let (lo, hi) = slice_range(
                            a.row_offsets[row],
                            a.row_offsets[row + 1],
                            unit,
                            units,
                            capacity,
                        );
                        let partial = tile_reduce(a, lo..hi, x, scratch);
                        target.partial.fetch_add(partial);
                        // The tile that brings the counter to zero sees every
                        // other tile's partial and owns the final write.
                        if target.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                            let sum = T::cast_f64(target.partial.load());
                            let mut yi = target.y.lock().map_err(|_| {
                                SparseError::Internal("Split row lock poisoned".to_string())
                            })?;
                            **yi = blend(alpha, sum, beta, **yi);
                        }
                    }
                }
                Ok(())
            },
        )
    })
}

fn inconsistent(block: &Block) -> SparseError {
    SparseError::InvalidArgument(format!(
        "Row block {:?} does not continue the preceding blocks",
        block
    ))
}

/// Row-per-unit CSR kernel used when no row blocks are available.
pub(crate) fn csrmv_rows<T: Real>(
    pool: &rayon::ThreadPool,
    alpha: T,
    a: &CsrMatrix<T>,
    x: &[T],
    beta: T,
    y: &mut [T],
) {
    pool.install(|| {
        y.par_iter_mut().enumerate().for_each(|(row, yi)| {
            let dot = T::cast_f64(row_dot(a, a.row_range(row), x));
            *yi = blend(alpha, dot, beta, *yi);
        })
    });
}

/// COO kernel: a prescale pass over `y`, then one atomic contribution per
/// stored entry.
pub(crate) fn coomv<T: Real>(
    pool: &rayon::ThreadPool,
    tile: usize,
    alpha: T,
    a: &CooMatrix<T>,
    x: &[T],
    beta: T,
    y: &mut [T],
) {
    pool.install(|| {
        let acc: Vec<AtomicF64> = y
            .par_iter()
            .map(|&yi| {
                let scaled = if beta == T::zero() { T::zero() } else { beta * yi };
                AtomicF64::new(scaled.into_f64())
            })
            .collect();

        a.row_indices
            .par_chunks(tile)
            .zip(a.col_indices.par_chunks(tile))
            .zip(a.values.par_chunks(tile))
            .for_each(|((rows, cols), values)| {
                for ((&r, &c), &v) in rows.iter().zip(cols).zip(values) {
                    acc[r].fetch_add(alpha.into_f64() * v.into_f64() * x[c].into_f64());
                }
            });

        y.par_iter_mut()
            .zip(acc.par_iter())
            .for_each(|(yi, sum)| *yi = T::cast_f64(sum.load()));
    });
}

/// Diagonal of `a`; duplicated diagonal entries are summed.
pub(crate) fn extract_diagonal<T: Real>(
    pool: &rayon::ThreadPool,
    a: &CsrMatrix<T>,
    out: &mut [T],
) {
    pool.install(|| {
        out.par_iter_mut().enumerate().for_each(|(row, d)| {
            *d = a
                .row_range(row)
                .filter(|&k| a.col_indices[k] == row)
                .map(|k| a.values[k])
                .fold(T::zero(), |acc, v| acc + v);
        })
    });
}
