use crate::layout::BlockLayout;
use nalgebra::{DMatrix, RealField};
use nalgebra_sparse::{CsrMatrix, SparseFormatError};
use std::fmt;

/// How the nonzero structure of a matrix added with [`SparseBlock::axpy`] relates to the
/// structure of the block it is added to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MatStructure {
    /// Both matrices have identical sparsity patterns.
    SameNonzeroPattern,
    /// The added matrix's pattern is contained in the block's pattern. The block's
    /// structure is never changed.
    SubsetNonzeroPattern,
    /// The block's pattern is extended to the union of both patterns.
    DifferentNonzeroPattern,
}

/// Statistics about a block, in the spirit of a sparse backend's matrix info query.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub nrows: usize,
    pub ncols: usize,
    /// Number of stored entries.
    pub nz_allocated: usize,
    /// Number of entries the block can store without reallocating.
    pub nz_reserved: usize,
    /// Stored entries whose value is exactly zero.
    pub nz_unneeded: usize,
    /// Number of times the block was marked assembled.
    pub assemblies: usize,
    /// Number of times the pattern outgrew the reserved storage.
    pub mallocs: usize,
}

/// A sparse matrix block with row and column layouts.
///
/// The pattern of a block only changes when explicitly requested through
/// [`MatStructure::DifferentNonzeroPattern`] or [`SparseBlock::set_matrix`]. Zeroing keeps the
/// pattern intact, so a block can be refilled across nonlinear iterations without
/// reallocation.
#[derive(Debug, Clone)]
pub struct SparseBlock<T> {
    row_layout: BlockLayout,
    col_layout: BlockLayout,
    matrix: CsrMatrix<T>,
    nnz_guess: Option<usize>,
    reserved: usize,
    assemblies: usize,
    mallocs: usize,
}

impl<T: RealField + Copy> SparseBlock<T> {
    /// An empty block (no stored entries) with the given layouts.
    ///
    /// Storage for `nnz_guess` nonzeros per row (at most the row length) is reserved, so
    /// pattern growth within that bound does not count as a reallocation.
    pub fn zeros(row_layout: BlockLayout, col_layout: BlockLayout, nnz_guess: Option<usize>) -> Self {
        let (nrows, ncols) = (row_layout.local_size(), col_layout.local_size());
        let reserved = nnz_guess.map_or(0, |per_row| nrows * per_row.min(ncols));
        let offsets = vec![0; nrows + 1];
        let matrix = CsrMatrix::try_from_csr_data(
            nrows,
            ncols,
            offsets,
            Vec::with_capacity(reserved),
            Vec::with_capacity(reserved),
        )
        .unwrap_or_else(|_| CsrMatrix::zeros(nrows, ncols));
        Self {
            row_layout,
            col_layout,
            matrix,
            nnz_guess,
            reserved,
            assemblies: 0,
            mallocs: 0,
        }
    }

    pub fn from_csr(
        row_layout: BlockLayout,
        col_layout: BlockLayout,
        matrix: CsrMatrix<T>,
    ) -> Result<Self, BlockError> {
        let expected = (row_layout.local_size(), col_layout.local_size());
        if (matrix.nrows(), matrix.ncols()) != expected {
            return Err(BlockError::ShapeMismatch {
                expected,
                actual: (matrix.nrows(), matrix.ncols()),
            });
        }
        Ok(Self {
            row_layout,
            col_layout,
            reserved: matrix.nnz(),
            matrix,
            nnz_guess: None,
            assemblies: 0,
            mallocs: 0,
        })
    }

    pub fn row_layout(&self) -> &BlockLayout {
        &self.row_layout
    }

    pub fn col_layout(&self) -> &BlockLayout {
        &self.col_layout
    }

    pub fn nrows(&self) -> usize {
        self.matrix.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn nnz(&self) -> usize {
        self.matrix.nnz()
    }

    pub fn nnz_guess(&self) -> Option<usize> {
        self.nnz_guess
    }

    pub fn csr(&self) -> &CsrMatrix<T> {
        &self.matrix
    }

    /// Mutable access to the stored values. The pattern can not be changed this way.
    pub fn values_mut(&mut self) -> &mut [T] {
        self.matrix.values_mut()
    }

    /// Replaces the stored matrix, which must match the block's local shape.
    pub fn set_matrix(&mut self, matrix: CsrMatrix<T>) -> Result<(), BlockError> {
        let expected = (self.row_layout.local_size(), self.col_layout.local_size());
        if (matrix.nrows(), matrix.ncols()) != expected {
            return Err(BlockError::ShapeMismatch {
                expected,
                actual: (matrix.nrows(), matrix.ncols()),
            });
        }
        if matrix.nnz() > self.reserved {
            self.mallocs += 1;
            self.reserved = matrix.nnz();
        }
        self.matrix = matrix;
        Ok(())
    }

    /// Sets every stored value to zero while keeping the sparsity pattern.
    pub fn zero_entries(&mut self) {
        self.matrix.values_mut().iter_mut().for_each(|v| *v = T::zero());
    }

    /// Marks the block as assembled.
    pub fn assemble(&mut self) {
        self.assemblies += 1;
    }

    /// Computes `self <- self + alpha * other`.
    pub fn axpy(&mut self, alpha: T, other: &CsrMatrix<T>, structure: MatStructure) -> Result<(), BlockError> {
        if (other.nrows(), other.ncols()) != (self.nrows(), self.ncols()) {
            return Err(BlockError::ShapeMismatch {
                expected: (self.nrows(), self.ncols()),
                actual: (other.nrows(), other.ncols()),
            });
        }

        match structure {
            MatStructure::SameNonzeroPattern => {
                if other.pattern() != self.matrix.pattern() {
                    return Err(BlockError::PatternMismatch);
                }
                for (v, w) in self.matrix.values_mut().iter_mut().zip(other.values()) {
                    *v += alpha * *w;
                }
                Ok(())
            }
            MatStructure::SubsetNonzeroPattern => {
                for i in 0..other.nrows() {
                    let other_row = other.row(i);
                    let mut row = self.matrix.row_mut(i);
                    let (cols, values) = row.cols_and_values_mut();
                    for (j, w) in other_row.col_indices().iter().zip(other_row.values()) {
                        match cols.binary_search(j) {
                            Ok(pos) => values[pos] += alpha * *w,
                            Err(_) => return Err(BlockError::NotSubset { row: i, col: *j }),
                        }
                    }
                }
                Ok(())
            }
            MatStructure::DifferentNonzeroPattern => {
                let merged = merge_scaled(&self.matrix, alpha, other, self.reserved)?;
                if merged.nnz() > self.reserved {
                    self.mallocs += 1;
                    self.reserved = merged.nnz();
                }
                self.matrix = merged;
                Ok(())
            }
        }
    }

    /// All stored entries as `(row, col, value)` triplets in local indices.
    pub fn triplets(&self) -> Vec<(usize, usize, T)> {
        self.matrix
            .triplet_iter()
            .map(|(i, j, v)| (i, j, *v))
            .collect()
    }

    pub fn to_dense(&self) -> DMatrix<T> {
        let mut dense = DMatrix::zeros(self.nrows(), self.ncols());
        for (i, j, v) in self.matrix.triplet_iter() {
            dense[(i, j)] += *v;
        }
        dense
    }

    pub fn info(&self) -> BlockInfo {
        BlockInfo {
            nrows: self.nrows(),
            ncols: self.ncols(),
            nz_allocated: self.nnz(),
            nz_reserved: self.reserved,
            nz_unneeded: self.matrix.values().iter().filter(|v| **v == T::zero()).count(),
            assemblies: self.assemblies,
            mallocs: self.mallocs,
        }
    }
}

/// Returns `a + alpha * b` with the union of both patterns. Entries present in either
/// pattern are kept, even if their value is zero. At least `capacity` entries are reserved.
fn merge_scaled<T: RealField + Copy>(
    a: &CsrMatrix<T>,
    alpha: T,
    b: &CsrMatrix<T>,
    capacity: usize,
) -> Result<CsrMatrix<T>, BlockError> {
    let capacity = capacity.max(a.nnz()).max(b.nnz());
    let mut offsets = Vec::with_capacity(a.nrows() + 1);
    let mut indices = Vec::with_capacity(capacity);
    let mut values = Vec::with_capacity(capacity);
    offsets.push(0);

    for i in 0..a.nrows() {
        let (row_a, row_b) = (a.row(i), b.row(i));
        let (cols_a, vals_a) = (row_a.col_indices(), row_a.values());
        let (cols_b, vals_b) = (row_b.col_indices(), row_b.values());
        let (mut p, mut q) = (0, 0);
        while p < cols_a.len() || q < cols_b.len() {
            let next_a = cols_a.get(p).copied().unwrap_or(usize::MAX);
            let next_b = cols_b.get(q).copied().unwrap_or(usize::MAX);
            if next_a < next_b {
                indices.push(next_a);
                values.push(vals_a[p]);
                p += 1;
            } else if next_b < next_a {
                indices.push(next_b);
                values.push(alpha * vals_b[q]);
                q += 1;
            } else {
                indices.push(next_a);
                values.push(vals_a[p] + alpha * vals_b[q]);
                p += 1;
                q += 1;
            }
        }
        offsets.push(indices.len());
    }

    CsrMatrix::try_from_csr_data(a.nrows(), a.ncols(), offsets, indices, values).map_err(BlockError::Format)
}

#[derive(Debug)]
pub enum BlockError {
    ShapeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },
    /// The matrices were declared to share a pattern, but do not.
    PatternMismatch,
    /// An entry of the added matrix is not in the block's pattern.
    NotSubset { row: usize, col: usize },
    Format(SparseFormatError),
}

impl fmt::Display for BlockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ShapeMismatch { expected, actual } => write!(
                f,
                "block shape mismatch: expected {}x{}, got {}x{}",
                expected.0, expected.1, actual.0, actual.1
            ),
            Self::PatternMismatch => write!(f, "sparsity patterns differ but were declared identical"),
            Self::NotSubset { row, col } => write!(
                f,
                "entry ({}, {}) is not part of the existing nonzero pattern",
                row, col
            ),
            Self::Format(err) => write!(f, "invalid sparse data: {}", err),
        }
    }
}

impl std::error::Error for BlockError {}
