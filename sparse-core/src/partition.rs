//! Row-block partitioning for the CSR-adaptive SpMV.
//!
//! A CSR matrix is cut into row blocks whose nonzero counts stay close to a
//! fixed capacity, so that every tile of a dispatch receives a comparable
//! amount of work even when row lengths are very uneven.
//!
//! Each [`RowBlock`] descriptor marks the *end* boundary of one unit of
//! parallel work. Block `k` starts where descriptor `k - 1` ended (or at row 0
//! for the first block). A block is one of:
//!
//! * a run of whole rows `[start, end)`,
//! * one slice of a row whose length alone exceeds the block size. Such a row
//!   is split into `units` slices of `block_size * block_multiplier` nonzeros
//!   (the last slice takes the remainder).
//!
//! The final descriptor always records the row count of the matrix.

use crate::csr::CsrMatrix;
use crate::error::{Result, SparseError};
use crate::traits::{Matrix, Real};
use serde::{Deserialize, Serialize};

/// Nonzeros one tile handles when it reduces whole rows.
pub const BLOCKSIZE: usize = 1024;
/// Factor applied to `BLOCKSIZE` for the slices of a split row.
pub const BLOCK_MULTIPLIER: usize = 3;
/// Blocks with more rows than this use one lane per row.
pub const ROWS_FOR_VECTOR: usize = 1;
/// Width of the unit field in the packed descriptor.
pub const WG_BITS: u32 = 24;
/// Width of the row field in the packed descriptor.
pub const ROW_BITS: u32 = 32;

const LONG_ROW: usize = 128;
const SHORT_ROW: usize = 32;
const UNIT_MASK: u64 = (1 << WG_BITS) - 1;
const MAX_UNITS: usize = 1 << WG_BITS;

/// Tuning knobs of the partitioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionConfig {
    pub block_size: usize,
    pub block_multiplier: usize,
    pub rows_for_vector: usize,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            block_size: BLOCKSIZE,
            block_multiplier: BLOCK_MULTIPLIER,
            rows_for_vector: ROWS_FOR_VECTOR,
        }
    }
}

/// Kind of work a descriptor closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowBlockKind {
    /// End of a block of whole rows (also used by the terminator).
    Rows,
    /// End of slice `unit - 1` of a split row; the row has `units` slices.
    Split { unit: u32, units: u32 },
}

/// One row-block descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowBlock {
    pub row: u32,
    pub kind: RowBlockKind,
}

impl RowBlock {
    pub const fn rows(row: u32) -> Self {
        Self {
            row,
            kind: RowBlockKind::Rows,
        }
    }

    /// Slice index carried in the low bits of the packed form.
    pub fn unit(&self) -> u32 {
        match self.kind {
            RowBlockKind::Rows => 0,
            RowBlockKind::Split { unit, .. } => unit,
        }
    }

    /// `row << 32 | unit`.
    pub fn pack(&self) -> u64 {
        ((self.row as u64) << ROW_BITS) | (self.unit() as u64 & UNIT_MASK)
    }
}

/// One unit of parallel work, decoded from two consecutive descriptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Block {
    /// Whole rows `[start, end)`.
    Rows { start: usize, end: usize },
    /// Slice `unit` of `units` of a single long row.
    Slice { row: usize, unit: usize, units: usize },
}

/// Row-block metadata attached to a CSR matrix, stamped with the pattern
/// version of the matrix it was computed for.
#[derive(Debug, Clone, PartialEq)]
pub struct RowBlocks {
    descriptors: Vec<RowBlock>,
    version: u64,
    config: PartitionConfig,
}

impl RowBlocks {
    pub fn new(descriptors: Vec<RowBlock>, version: u64, config: PartitionConfig) -> Self {
        Self {
            descriptors,
            version,
            config,
        }
    }

    /// Partitions `matrix` with `config`, sizing and filling in two passes.
    pub fn compute<T: Real>(matrix: &CsrMatrix<T>, config: &PartitionConfig) -> Result<Self> {
        let size = config.meta_size(matrix.row_offsets())?;
        let mut descriptors = vec![RowBlock::rows(0); size];
        config.fill(matrix.row_offsets(), &mut descriptors)?;
        log::debug!(
            "Partitioned {} rows ({} nnz) into {} row blocks",
            matrix.rows(),
            matrix.nnz(),
            size
        );
        Ok(Self::new(descriptors, matrix.version(), *config))
    }

    /// Rebuilds typed descriptors from their packed form.
    ///
    /// The slice count of a split row is not stored in the packed word; it is
    /// recovered from the run of split descriptors that share the row.
    pub fn from_packed(packed: &[u64], version: u64, config: PartitionConfig) -> Result<Self> {
        let mut descriptors = Vec::with_capacity(packed.len());
        let mut prev_row = 0u32;
        for &word in packed {
            if (word >> WG_BITS) & ((1 << (ROW_BITS - WG_BITS)) - 1) != 0 {
                return Err(SparseError::InvalidArgument(format!(
                    "Row block {:#x} has bits set outside the unit field",
                    word
                )));
            }
            let row = (word >> ROW_BITS) as u32;
            if row < prev_row {
                return Err(SparseError::InvalidArgument(format!(
                    "Row block rows must be non-decreasing ({} after {})",
                    row, prev_row
                )));
            }
            prev_row = row;
            let unit = (word & UNIT_MASK) as u32;
            let kind = if unit == 0 {
                RowBlockKind::Rows
            } else {
                RowBlockKind::Split { unit, units: 0 }
            };
            descriptors.push(RowBlock { row, kind });
        }

        // Patch the slice counts backwards: the last descriptor of a split run
        // has unit == units - 1.
        let mut run_units = 0u32;
        let mut run_row = None;
        for desc in descriptors.iter_mut().rev() {
            if let RowBlockKind::Split { unit, units } = &mut desc.kind {
                if run_row != Some(desc.row) {
                    run_row = Some(desc.row);
                    run_units = *unit + 1;
                }
                *units = run_units;
            } else {
                run_row = None;
            }
        }
        Ok(Self::new(descriptors, version, config))
    }

    pub fn pack(&self) -> Vec<u64> {
        self.descriptors.iter().map(RowBlock::pack).collect()
    }

    pub fn descriptors(&self) -> &[RowBlock] {
        &self.descriptors
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn config(&self) -> &PartitionConfig {
        &self.config
    }

    /// Nonzeros covered by one slice of a split row.
    pub fn split_capacity(&self) -> usize {
        self.config.split_capacity()
    }

    /// Checks that the descriptors describe a partition of `rows` rows.
    pub fn validate(&self, rows: usize) -> Result<()> {
        let last = self.descriptors.last().ok_or_else(|| {
            SparseError::InvalidArgument("Row block metadata is present but empty".to_string())
        })?;
        if last.row as usize != rows || last.kind != RowBlockKind::Rows {
            return Err(SparseError::InvalidArgument(format!(
                "Last row block must terminate at row {}, found {:?}",
                rows, last
            )));
        }
        let mut prev = 0u32;
        for desc in &self.descriptors {
            if desc.row < prev {
                return Err(SparseError::InvalidArgument(format!(
                    "Row block rows must be non-decreasing ({} after {})",
                    desc.row, prev
                )));
            }
            if let RowBlockKind::Split { unit, units } = desc.kind {
                if unit == 0 || unit >= units {
                    return Err(SparseError::InvalidArgument(format!(
                        "Split row block {:?} has an inconsistent unit",
                        desc
                    )));
                }
            }
            prev = desc.row;
        }
        Ok(())
    }

    /// Decoded work list, one entry per descriptor.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        let starts = std::iter::once(RowBlock::rows(0)).chain(self.descriptors.iter().copied());
        starts
            .zip(self.descriptors.iter().copied())
            .map(|(start, end)| decode(start, end))
    }

    /// Rows split across several tiles, with their slice counts.
    pub fn split_rows(&self) -> Vec<(usize, usize)> {
        let mut rows: Vec<(usize, usize)> = Vec::new();
        for desc in &self.descriptors {
            if let RowBlockKind::Split { units, .. } = desc.kind {
                if rows.last().map(|&(r, _)| r) != Some(desc.row as usize) {
                    rows.push((desc.row as usize, units as usize));
                }
            }
        }
        rows
    }
}

fn decode(start: RowBlock, end: RowBlock) -> Block {
    match (start.kind, end.kind) {
        // Last slice of a split row: the run of split descriptors ends here.
        (RowBlockKind::Split { unit, units }, RowBlockKind::Rows) => Block::Slice {
            row: start.row as usize,
            unit: unit as usize,
            units: units as usize,
        },
        (_, RowBlockKind::Split { unit, units }) if end.row == start.row => Block::Slice {
            row: start.row as usize,
            unit: unit as usize - 1,
            units: units as usize,
        },
        _ => Block::Rows {
            start: start.row as usize,
            end: end.row as usize,
        },
    }
}

/// Nonzero range of slice `unit` of a split row `[row_start, row_end)`.
pub fn slice_range(
    row_start: usize,
    row_end: usize,
    unit: usize,
    units: usize,
    capacity: usize,
) -> (usize, usize) {
    let begin = (row_start + unit * capacity).min(row_end);
    let end = if unit + 1 == units {
        row_end
    } else {
        (begin + capacity).min(row_end)
    };
    (begin, end)
}

impl PartitionConfig {
    pub fn split_capacity(&self) -> usize {
        self.block_size * self.block_multiplier
    }

    /// Sizing pass: number of descriptors needed for `row_offsets`.
    pub fn meta_size(&self, row_offsets: &[usize]) -> Result<usize> {
        self.scan(row_offsets, |_| {})
    }

    /// Fill pass. The count is derived again and must match `out.len()`.
    pub fn fill(&self, row_offsets: &[usize], out: &mut [RowBlock]) -> Result<()> {
        let expected = self.meta_size(row_offsets)?;
        if expected != out.len() {
            return Err(SparseError::InvalidArgument(format!(
                "Row block buffer holds {} descriptors but the matrix needs {}",
                out.len(),
                expected
            )));
        }
        let mut next = 0usize;
        self.scan(row_offsets, |desc| {
            out[next] = desc;
            next += 1;
        })?;
        Ok(())
    }

    fn scan<F: FnMut(RowBlock)>(&self, row_offsets: &[usize], mut emit: F) -> Result<usize> {
        if self.block_size == 0 || self.block_multiplier == 0 {
            return Err(SparseError::InvalidArgument(
                "Block size and multiplier must be positive".to_string(),
            ));
        }
        let rows = row_offsets.len().checked_sub(1).ok_or_else(|| {
            SparseError::InvalidArgument("Row offsets must hold at least one entry".to_string())
        })?;
        if rows > u32::MAX as usize {
            return Err(SparseError::InvalidArgument(format!(
                "{} rows do not fit in {} bits",
                rows, ROW_BITS
            )));
        }

        let mut sink = Sink {
            emit: &mut emit,
            count: 0,
            last: None,
        };

        let block_size = self.block_size;
        let mut sum = 0usize;
        let mut last_i = 0usize;
        let mut consecutive_long_rows: i64 = 0;
        let mut i = 1usize;
        while i <= rows {
            let (lo, hi) = (row_offsets[i - 1], row_offsets[i]);
            if hi < lo {
                return Err(SparseError::InvalidArgument(format!(
                    "Row offsets decrease at row {} ({} -> {})",
                    i - 1,
                    lo,
                    hi
                )));
            }
            let row_length = hi - lo;
            sum += row_length;

            // Keep runs of long rows apart from runs of short rows.
            if row_length > LONG_ROW {
                consecutive_long_rows += 1;
            } else if consecutive_long_rows > 0 {
                if row_length < SHORT_ROW {
                    consecutive_long_rows = -1;
                } else {
                    consecutive_long_rows += 1;
                }
            }

            if consecutive_long_rows == 1 {
                if i - last_i > 1 {
                    sink.push(RowBlock::rows((i - 1) as u32));
                    last_i = i - 1;
                    sum = row_length;
                }
            } else if consecutive_long_rows == -1 {
                sink.push(RowBlock::rows((i - 1) as u32));
                last_i = i - 1;
                sum = row_length;
                consecutive_long_rows = 0;
            }

            if i - last_i == 1 && sum > block_size {
                let units = row_length
                    .div_ceil(self.split_capacity())
                    .clamp(1, MAX_UNITS);
                for unit in 1..units {
                    sink.push(RowBlock {
                        row: (i - 1) as u32,
                        kind: RowBlockKind::Split {
                            unit: unit as u32,
                            units: units as u32,
                        },
                    });
                }
                sink.push(RowBlock::rows(i as u32));
                last_i = i;
                sum = 0;
                consecutive_long_rows = 0;
            } else if i - last_i > 1 && sum > block_size {
                // This row does not fit; close the block before it and rescan it.
                i -= 1;
                sink.push(RowBlock::rows(i as u32));
                last_i = i;
                sum = 0;
                consecutive_long_rows = 0;
            } else if sum == block_size {
                sink.push(RowBlock::rows(i as u32));
                last_i = i;
                sum = 0;
                consecutive_long_rows = 0;
            }
            i += 1;
        }

        let terminator = RowBlock::rows(rows as u32);
        if sink.last != Some(terminator) {
            sink.push(terminator);
        }
        Ok(sink.count)
    }
}

struct Sink<'a, F> {
    emit: &'a mut F,
    count: usize,
    last: Option<RowBlock>,
}

impl<F: FnMut(RowBlock)> Sink<'_, F> {
    fn push(&mut self, desc: RowBlock) {
        (self.emit)(desc);
        self.count += 1;
        self.last = Some(desc);
    }
}

/// Number of descriptors [`compute_meta`] will write for `matrix`.
pub fn compute_meta_size<T: Real>(matrix: &CsrMatrix<T>) -> Result<usize> {
    PartitionConfig::default().meta_size(matrix.row_offsets())
}

/// Writes the descriptors for `matrix` into `row_blocks`, which must have been
/// sized with [`compute_meta_size`].
pub fn compute_meta<T: Real>(matrix: &CsrMatrix<T>, row_blocks: &mut [RowBlock]) -> Result<()> {
    PartitionConfig::default().fill(matrix.row_offsets(), row_blocks)
}
