use crate::block::SparseBlock;
use crate::layout::BlockLayout;
use crate::operator::{csr_diagonal, LinearOperator};
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use std::error::Error;

/// A square grid of sparse blocks. Block `(i, j)` couples row layout `i` with column layout `j`.
#[derive(Debug, Clone)]
pub struct NestMatrix<T> {
    dim: usize,
    blocks: Vec<SparseBlock<T>>,
}

impl<T: RealField + Copy> NestMatrix<T> {
    /// Creates a nest matrix from `dim * dim` blocks given in row-major order.
    ///
    /// Panics if the number of blocks is not a square or if block shapes are inconsistent
    /// within a block row or block column.
    pub fn from_blocks(blocks: Vec<SparseBlock<T>>) -> Self {
        let dim = (blocks.len() as f64).sqrt().round() as usize;
        assert_eq!(dim * dim, blocks.len(), "Nest matrix requires a square grid of blocks.");
        for i in 0..dim {
            for j in 0..dim {
                let block = &blocks[i * dim + j];
                assert_eq!(block.nrows(), blocks[i * dim].nrows(), "Inconsistent block row sizes.");
                assert_eq!(block.ncols(), blocks[j].ncols(), "Inconsistent block column sizes.");
            }
        }
        Self { dim, blocks }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn block(&self, i: usize, j: usize) -> &SparseBlock<T> {
        &self.blocks[i * self.dim + j]
    }

    pub fn block_mut(&mut self, i: usize, j: usize) -> &mut SparseBlock<T> {
        &mut self.blocks[i * self.dim + j]
    }

    pub fn blocks(&self) -> &[SparseBlock<T>] {
        &self.blocks
    }

    pub fn row_layouts(&self) -> Vec<&BlockLayout> {
        (0..self.dim).map(|i| self.block(i, 0).row_layout()).collect()
    }

    /// Offsets of each block row within the flattened (local) vector.
    pub fn row_offsets(&self) -> Vec<usize> {
        offsets((0..self.dim).map(|i| self.block(i, 0).nrows()))
    }

    pub fn col_offsets(&self) -> Vec<usize> {
        offsets((0..self.dim).map(|j| self.block(0, j).ncols()))
    }

    pub fn nrows(&self) -> usize {
        (0..self.dim).map(|i| self.block(i, 0).nrows()).sum()
    }

    pub fn ncols(&self) -> usize {
        (0..self.dim).map(|j| self.block(0, j).ncols()).sum()
    }

    /// Marks every block as assembled.
    pub fn assemble(&mut self) {
        self.blocks.iter_mut().for_each(SparseBlock::assemble);
    }

    pub fn zero_entries(&mut self) {
        self.blocks.iter_mut().for_each(SparseBlock::zero_entries);
    }

    /// Flattens the nest into a single CSR matrix over the concatenated local indices.
    pub fn to_csr(&self) -> CsrMatrix<T> {
        let row_offsets = self.row_offsets();
        let col_offsets = self.col_offsets();
        let mut coo = CooMatrix::new(self.nrows(), self.ncols());
        for i in 0..self.dim {
            for j in 0..self.dim {
                for (r, c, v) in self.block(i, j).csr().triplet_iter() {
                    coo.push(row_offsets[i] + r, col_offsets[j] + c, *v);
                }
            }
        }
        CsrMatrix::from(&coo)
    }

    pub fn diagonal(&self) -> DVector<T> {
        let mut diagonal = DVector::zeros(self.nrows());
        let row_offsets = self.row_offsets();
        for i in 0..self.dim {
            let block_diagonal = csr_diagonal(self.block(i, i).csr());
            diagonal
                .rows_mut(row_offsets[i], block_diagonal.len())
                .copy_from(&block_diagonal);
        }
        diagonal
    }
}

impl<T: RealField + Copy> LinearOperator<T> for NestMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        if x.len() != self.ncols() || y.len() != self.nrows() {
            return Err(Box::from("nest matrix applied to vector of incompatible size"));
        }
        let row_offsets = self.row_offsets();
        let col_offsets = self.col_offsets();
        y.fill(T::zero());
        for i in 0..self.dim {
            for j in 0..self.dim {
                let block = self.block(i, j);
                if block.nnz() == 0 {
                    continue;
                }
                let mut y_i = y.rows_mut(row_offsets[i], block.nrows());
                let x_j = x.rows(col_offsets[j], block.ncols());
                spmm_csr_dense(T::one(), &mut y_i, T::one(), Op::NoOp(block.csr()), Op::NoOp(&x_j));
            }
        }
        Ok(())
    }
}

/// A vector split into blocks, one per block row of a nest system.
#[derive(Debug, Clone, PartialEq)]
pub struct NestVector<T: RealField> {
    blocks: Vec<DVector<T>>,
}

impl<T: RealField + Copy> NestVector<T> {
    pub fn zeros(sizes: &[usize]) -> Self {
        Self {
            blocks: sizes.iter().map(|n| DVector::zeros(*n)).collect(),
        }
    }

    pub fn from_blocks(blocks: Vec<DVector<T>>) -> Self {
        Self { blocks }
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, i: usize) -> &DVector<T> {
        &self.blocks[i]
    }

    pub fn block_mut(&mut self, i: usize) -> &mut DVector<T> {
        &mut self.blocks[i]
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.blocks.iter().map(|b| b.len()).collect()
    }

    pub fn len(&self) -> usize {
        self.blocks.iter().map(|b| b.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn zero_entries(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.fill(T::zero()));
    }

    pub fn norm(&self) -> T {
        self.blocks
            .iter()
            .fold(T::zero(), |acc, b| acc + b.norm_squared())
            .sqrt()
    }

    pub fn to_flat(&self) -> DVector<T> {
        let mut flat = DVector::zeros(self.len());
        self.copy_to_flat(&mut flat);
        flat
    }

    /// Writes the concatenated blocks into `flat`, which must have length [`Self::len`].
    pub fn copy_to_flat<'a>(&self, flat: impl Into<DVectorViewMut<'a, T>>) {
        let mut flat = flat.into();
        assert_eq!(flat.len(), self.len());
        let mut offset = 0;
        for b in &self.blocks {
            flat.rows_mut(offset, b.len()).copy_from(b);
            offset += b.len();
        }
    }

    /// Splits `flat` into the blocks of this vector.
    pub fn copy_from_flat<'a>(&mut self, flat: impl Into<DVectorView<'a, T>>) {
        let flat = flat.into();
        assert_eq!(flat.len(), self.len());
        let mut offset = 0;
        for b in &mut self.blocks {
            let n = b.len();
            b.copy_from(&flat.rows(offset, n));
            offset += n;
        }
    }
}

fn offsets(sizes: impl Iterator<Item = usize>) -> Vec<usize> {
    sizes
        .scan(0, |sum, n| {
            let current = *sum;
            *sum += n;
            Some(current)
        })
        .collect()
}
