use crate::error::{Result, SparseError};
use crate::partition::{PartitionConfig, RowBlocks};
use crate::traits::{Matrix, Real};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_PATTERN_VERSION: AtomicU64 = AtomicU64::new(1);

/// Hands out pattern versions. Versions are unique across matrices, so
/// row-block metadata can never match a matrix it was not computed for.
fn next_version() -> u64 {
    NEXT_PATTERN_VERSION.fetch_add(1, Ordering::Relaxed)
}

/// A sparse matrix in Compressed Sparse Row (CSR) format on the CPU.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix<T> {
    /// Number of rows.
    rows: usize,
    /// Number of columns.
    cols: usize,
    /// The non-zero values of the matrix.
    pub(crate) values: Vec<T>,
    /// Column index of every value. Unsorted within a row is allowed.
    pub(crate) col_indices: Vec<usize>,
    /// `row_offsets[i]` is where row `i` starts in `values`;
    /// `row_offsets[rows]` is the number of non-zeros.
    pub(crate) row_offsets: Vec<usize>,
    /// Bumped on every change to the sparsity pattern.
    version: u64,
    row_blocks: Option<RowBlocks>,
}

/// A `(row, col, value)` entry.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet<T> {
    pub row: usize,
    pub col: usize,
    pub value: T,
}

impl<T> Triplet<T> {
    pub fn new(row: usize, col: usize, value: T) -> Self {
        Triplet { row, col, value }
    }
}

impl<T: Real> CsrMatrix<T> {
    /// Creates an empty matrix (no non-zeros) with the given dimensions.
    pub fn new(rows: usize, cols: usize) -> Self {
        CsrMatrix {
            rows,
            cols,
            values: Vec::new(),
            col_indices: Vec::new(),
            row_offsets: vec![0; rows + 1],
            version: next_version(),
            row_blocks: None,
        }
    }

    /// Builds a matrix from unsorted triplets. Duplicate coordinates are summed.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[Triplet<T>]) -> Result<Self> {
        if let Some(t) = triplets.iter().find(|t| t.row >= rows || t.col >= cols) {
            return Err(SparseError::InvalidArgument(format!(
                "Triplet ({}, {}) is outside a {}x{} matrix",
                t.row, t.col, rows, cols
            )));
        }
        let mut coords = triplets.to_vec();
        coords.sort_unstable_by_key(|t| (t.row, t.col));
        coords.dedup_by(|next, kept| {
            if next.row == kept.row && next.col == kept.col {
                kept.value += next.value;
                true
            } else {
                false
            }
        });

        let mut row_offsets = vec![0usize; rows + 1];
        for t in &coords {
            row_offsets[t.row + 1] += 1;
        }
        for i in 1..=rows {
            row_offsets[i] += row_offsets[i - 1];
        }
        let values = coords.iter().map(|t| t.value).collect();
        let col_indices = coords.iter().map(|t| t.col).collect();

        Ok(CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_offsets,
            version: next_version(),
            row_blocks: None,
        })
    }

    /// Creates a matrix from CSR components, validating their consistency.
    pub fn from_csr(
        rows: usize,
        cols: usize,
        values: Vec<T>,
        col_indices: Vec<usize>,
        row_offsets: Vec<usize>,
    ) -> Result<Self> {
        validate_csr(rows, cols, &values, &col_indices, &row_offsets)?;
        Ok(CsrMatrix {
            rows,
            cols,
            values,
            col_indices,
            row_offsets,
            version: next_version(),
            row_blocks: None,
        })
    }

    /// Returns the number of non-zero elements.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Gets the value at a specific row and column.
    /// This is inefficient for sparse matrices, primarily for testing/debugging.
    pub fn get(&self, row: usize, col: usize) -> Option<T> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        let range = self.row_range(row);
        self.col_indices[range.clone()]
            .iter()
            .position(|&c| c == col)
            .map(|pos| self.values[range.start + pos])
    }

    /// Overwrites an entry, inserting it when it is not stored yet.
    ///
    /// Inserting changes the sparsity pattern and invalidates row-block
    /// metadata; overwriting an existing entry does not.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        if row >= self.rows || col >= self.cols {
            return Err(SparseError::InvalidArgument(format!(
                "Element ({}, {}) is outside a {}x{} matrix",
                row, col, self.rows, self.cols
            )));
        }
        let range = self.row_range(row);
        if let Some(pos) = self.col_indices[range.clone()].iter().position(|&c| c == col) {
            self.values[range.start + pos] = value;
            return Ok(());
        }
        self.values.insert(range.end, value);
        self.col_indices.insert(range.end, col);
        for offset in &mut self.row_offsets[row + 1..] {
            *offset += 1;
        }
        self.touch_pattern();
        Ok(())
    }

    /// Replaces the whole sparsity pattern and values.
    pub fn replace_pattern(
        &mut self,
        values: Vec<T>,
        col_indices: Vec<usize>,
        row_offsets: Vec<usize>,
    ) -> Result<()> {
        validate_csr(self.rows, self.cols, &values, &col_indices, &row_offsets)?;
        self.values = values;
        self.col_indices = col_indices;
        self.row_offsets = row_offsets;
        self.touch_pattern();
        Ok(())
    }

    fn touch_pattern(&mut self) {
        self.version = next_version();
        log::trace!("CSR pattern changed, version now {}", self.version);
    }

    /// Range of `row` inside `values` / `col_indices`.
    #[inline]
    pub fn row_range(&self, row: usize) -> std::ops::Range<usize> {
        self.row_offsets[row]..self.row_offsets[row + 1]
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    /// Mutable access to the values. The pattern is unchanged, so row-block
    /// metadata stays valid.
    pub fn values_mut(&mut self) -> &mut [T] {
        &mut self.values
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn row_offsets(&self) -> &[usize] {
        &self.row_offsets
    }

    /// Current pattern version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Attached row-block metadata, stale or not.
    pub fn row_blocks(&self) -> Option<&RowBlocks> {
        self.row_blocks.as_ref()
    }

    /// Attached row-block metadata if it was computed for the current pattern.
    pub fn current_row_blocks(&self) -> Option<&RowBlocks> {
        self.row_blocks
            .as_ref()
            .filter(|blocks| blocks.version() == self.version)
    }

    /// Attaches externally computed metadata.
    pub fn set_row_blocks(&mut self, row_blocks: RowBlocks) {
        self.row_blocks = Some(row_blocks);
    }

    pub fn clear_row_blocks(&mut self) -> Option<RowBlocks> {
        self.row_blocks.take()
    }

    /// Partitions the matrix with the default configuration and attaches the
    /// result.
    pub fn compute_row_blocks(&mut self) -> Result<()> {
        self.compute_row_blocks_with(&PartitionConfig::default())
    }

    pub fn compute_row_blocks_with(&mut self, config: &PartitionConfig) -> Result<()> {
        let blocks = RowBlocks::compute(self, config)?;
        self.row_blocks = Some(blocks);
        Ok(())
    }

    /// Iterates the stored entries in row order.
    pub fn iter(&self) -> CsrIter<'_, T> {
        CsrIter {
            matrix: self,
            row: 0,
            pos: 0,
        }
    }
}

fn validate_csr<T>(
    rows: usize,
    cols: usize,
    values: &[T],
    col_indices: &[usize],
    row_offsets: &[usize],
) -> Result<()> {
    if row_offsets.len() != rows + 1 {
        return Err(SparseError::InvalidArgument(format!(
            "row_offsets length must be rows + 1 ({}), got {}",
            rows + 1,
            row_offsets.len()
        )));
    }
    if values.len() != col_indices.len() {
        return Err(SparseError::InvalidArgument(format!(
            "values and col_indices must have the same length ({} != {})",
            values.len(),
            col_indices.len()
        )));
    }
    if row_offsets[0] != 0 {
        return Err(SparseError::InvalidArgument(
            "First element of row_offsets must be 0".to_string(),
        ));
    }
    if let Some(row) = row_offsets.windows(2).position(|w| w[1] < w[0]) {
        return Err(SparseError::InvalidArgument(format!(
            "row_offsets must be non-decreasing (row {})",
            row
        )));
    }
    if row_offsets[rows] != values.len() {
        return Err(SparseError::InvalidArgument(
            "Last element of row_offsets must equal the number of non-zero values".to_string(),
        ));
    }
    if col_indices.iter().any(|&c| c >= cols) {
        return Err(SparseError::InvalidArgument(
            "Column index out of bounds".to_string(),
        ));
    }
    Ok(())
}

pub struct CsrIter<'a, T> {
    matrix: &'a CsrMatrix<T>,
    row: usize,
    pos: usize,
}

impl<T: Real> Iterator for CsrIter<'_, T> {
    type Item = Triplet<T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.matrix.nnz() {
            return None;
        }
        while self.matrix.row_offsets[self.row + 1] <= self.pos {
            self.row += 1;
        }
        let item = Triplet {
            row: self.row,
            col: self.matrix.col_indices[self.pos],
            value: self.matrix.values[self.pos],
        };
        self.pos += 1;
        Some(item)
    }
}

impl<T: Real> Matrix for CsrMatrix<T> {
    type Value = T;

    fn dims(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::RowBlock;

    fn sample() -> CsrMatrix<f32> {
        // [ 1.0, 0.0, 2.0, 0.0 ]
        // [ 0.0, 3.0, 0.0, 4.0 ]
        // [ 0.0, 0.0, 5.0, 0.0 ]
        CsrMatrix::from_csr(
            3,
            4,
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![0, 2, 1, 3, 2],
            vec![0, 2, 4, 5],
        )
        .unwrap()
    }

    #[test]
    fn test_csr_new() {
        let matrix: CsrMatrix<f64> = CsrMatrix::new(3, 4);
        assert_eq!(matrix.dims(), (3, 4));
        assert_eq!(matrix.nnz(), 0);
        assert_eq!(matrix.row_offsets(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_csr_from_csr_invalid_row_offsets_len() {
        let matrix = CsrMatrix::from_csr(3, 4, vec![1.0f32], vec![0], vec![0, 1]);
        match matrix.err().unwrap() {
            SparseError::InvalidArgument(msg) => assert!(msg.contains("row_offsets length")),
            e => panic!("Expected InvalidArgument, got {:?}", e),
        }
    }

    #[test]
    fn test_csr_from_csr_invalid_last_offset() {
        let matrix = CsrMatrix::from_csr(3, 4, vec![1.0f32, 2.0], vec![0, 1], vec![0, 1, 1, 1]);
        match matrix.err().unwrap() {
            SparseError::InvalidArgument(msg) => assert!(msg.contains("Last element")),
            e => panic!("Expected InvalidArgument, got {:?}", e),
        }
    }

    #[test]
    fn test_csr_from_csr_decreasing_offsets() {
        let matrix = CsrMatrix::from_csr(3, 4, vec![1.0f64, 2.0], vec![0, 1], vec![0, 2, 1, 2]);
        match matrix.err().unwrap() {
            SparseError::InvalidArgument(msg) => assert!(msg.contains("non-decreasing")),
            e => panic!("Expected InvalidArgument, got {:?}", e),
        }
    }

    #[test]
    fn test_csr_from_csr_invalid_col_index() {
        let matrix = CsrMatrix::from_csr(2, 3, vec![1.0f32, 2.0], vec![0, 3], vec![0, 1, 2]);
        match matrix.err().unwrap() {
            SparseError::InvalidArgument(msg) => assert!(msg.contains("Column index out of bounds")),
            e => panic!("Expected InvalidArgument, got {:?}", e),
        }
    }

    #[test]
    fn test_csr_from_csr_mismatch_values_indices() {
        let matrix = CsrMatrix::from_csr(2, 3, vec![1.0f32, 2.0], vec![0], vec![0, 1, 1]);
        match matrix.err().unwrap() {
            SparseError::InvalidArgument(msg) => assert!(msg.contains("values and col_indices")),
            e => panic!("Expected InvalidArgument, got {:?}", e),
        }
    }

    #[test]
    fn test_csr_get() {
        let matrix = sample();
        assert_eq!(matrix.get(0, 0), Some(1.0));
        assert_eq!(matrix.get(0, 2), Some(2.0));
        assert_eq!(matrix.get(1, 1), Some(3.0));
        assert_eq!(matrix.get(1, 3), Some(4.0));
        assert_eq!(matrix.get(2, 2), Some(5.0));
        assert_eq!(matrix.get(0, 1), None);
        assert_eq!(matrix.get(2, 3), None);
        assert_eq!(matrix.get(3, 0), None);
        assert_eq!(matrix.get(0, 4), None);
    }

    #[test]
    fn test_from_triplets_sorts_and_sums_duplicates() {
        let triplets = vec![
            Triplet::new(1, 3, 4.0),
            Triplet::new(0, 2, 2.0),
            Triplet::new(2, 2, 5.0),
            Triplet::new(0, 0, 1.0),
            Triplet::new(1, 1, 1.0),
            Triplet::new(1, 1, 2.0),
        ];
        let matrix = CsrMatrix::<f32>::from_triplets(3, 4, &triplets).unwrap();
        assert_eq!(matrix, CsrMatrix { version: matrix.version, ..sample() });
    }

    #[test]
    fn test_from_triplets_out_of_bounds() {
        let err = CsrMatrix::<f64>::from_triplets(2, 2, &[Triplet::new(2, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, SparseError::InvalidArgument(_)));
    }

    #[test]
    fn test_iter_visits_entries_in_row_order() {
        let matrix = CsrMatrix::from_csr(
            4,
            2,
            vec![1.0f64, 2.0, 3.0],
            vec![1, 0, 1],
            vec![0, 1, 1, 1, 3],
        )
        .unwrap();
        let entries: Vec<_> = matrix.iter().map(|t| (t.row, t.col)).collect();
        assert_eq!(entries, vec![(0, 1), (3, 0), (3, 1)]);
    }

    #[test]
    fn test_pattern_change_invalidates_row_blocks() {
        let mut matrix = sample();
        matrix.compute_row_blocks().unwrap();
        assert!(matrix.current_row_blocks().is_some());

        // Overwriting a stored value keeps the pattern.
        matrix.set(0, 0, 10.0).unwrap();
        assert!(matrix.current_row_blocks().is_some());

        matrix.set(2, 0, 7.0).unwrap();
        assert_eq!(matrix.get(2, 0), Some(7.0));
        assert_eq!(matrix.row_offsets(), &[0, 2, 4, 6]);
        assert!(matrix.row_blocks().is_some());
        assert!(matrix.current_row_blocks().is_none());
    }

    #[test]
    fn test_versions_are_unique_across_matrices() {
        let a = CsrMatrix::<f32>::new(2, 2);
        let b = CsrMatrix::<f32>::new(2, 2);
        assert_ne!(a.version(), b.version());

        let mut c = sample();
        c.compute_row_blocks().unwrap();
        assert_eq!(
            c.current_row_blocks().unwrap().descriptors(),
            &[RowBlock::rows(3)]
        );
    }
}
