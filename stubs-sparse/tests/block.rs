use matrixcompare::assert_matrix_eq;
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use stubs_sparse::block::{BlockError, MatStructure, SparseBlock};
use stubs_sparse::layout::{BlockLayout, IndexMap};
use stubs_sparse::nest::{NestMatrix, NestVector};
use stubs_sparse::operator::LinearOperator;
use nalgebra::DVector;

fn csr_from_triplets(nrows: usize, ncols: usize, triplets: &[(usize, usize, f64)]) -> CsrMatrix<f64> {
    let mut coo = CooMatrix::new(nrows, ncols);
    for &(i, j, v) in triplets {
        coo.push(i, j, v);
    }
    CsrMatrix::from(&coo)
}

#[test]
fn zero_entries_preserves_pattern() {
    let layout = BlockLayout::serial(3, 1);
    let csr = csr_from_triplets(3, 3, &[(0, 0, 1.0), (1, 2, 2.0), (2, 1, 3.0)]);
    let mut block = SparseBlock::from_csr(layout.clone(), layout, csr.clone()).unwrap();
    block.zero_entries();

    assert_eq!(block.csr().pattern(), csr.pattern());
    assert!(block.csr().values().iter().all(|v| *v == 0.0));
    assert_eq!(block.info().nz_unneeded, 3);
}

#[test]
fn axpy_subset_accumulates_into_existing_pattern() {
    let layout = BlockLayout::serial(3, 1);
    let full = csr_from_triplets(3, 3, &[(0, 0, 1.0), (0, 1, 1.0), (1, 1, 1.0), (2, 2, 1.0)]);
    let mut block = SparseBlock::from_csr(layout.clone(), layout, full).unwrap();
    block.zero_entries();

    let sub = csr_from_triplets(3, 3, &[(0, 1, 2.0), (2, 2, -1.0)]);
    block.axpy(1.0, &sub, MatStructure::SubsetNonzeroPattern).unwrap();
    block.axpy(0.5, &sub, MatStructure::SubsetNonzeroPattern).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        0.0, 3.0, 0.0,
        0.0, 0.0, 0.0,
        0.0, 0.0, -1.5,
    ]);
    assert_matrix_eq!(block.to_dense(), expected, comp = abs, tol = 1e-14);
    assert_eq!(block.nnz(), 4);
    assert_eq!(block.info().mallocs, 0);
}

#[test]
fn axpy_subset_rejects_entries_outside_pattern() {
    let layout = BlockLayout::serial(2, 1);
    let diag = csr_from_triplets(2, 2, &[(0, 0, 1.0), (1, 1, 1.0)]);
    let mut block = SparseBlock::from_csr(layout.clone(), layout, diag).unwrap();

    let off_diag = csr_from_triplets(2, 2, &[(0, 1, 1.0)]);
    let result = block.axpy(1.0, &off_diag, MatStructure::SubsetNonzeroPattern);
    assert!(matches!(result, Err(BlockError::NotSubset { row: 0, col: 1 })));
}

#[test]
fn axpy_different_pattern_merges_and_keeps_explicit_zeros() {
    let layout = BlockLayout::serial(2, 1);
    let mut block = SparseBlock::zeros(layout.clone(), layout, Some(20));
    assert_eq!(block.nnz(), 0);

    let a = csr_from_triplets(2, 2, &[(0, 0, 1.0)]);
    let mut b = csr_from_triplets(2, 2, &[(1, 0, 1.0), (1, 1, 4.0)]);
    b.values_mut()[0] = 0.0;

    block.axpy(1.0, &a, MatStructure::DifferentNonzeroPattern).unwrap();
    block.axpy(2.0, &b, MatStructure::DifferentNonzeroPattern).unwrap();

    assert_eq!(block.nnz(), 3);
    assert_eq!(block.triplets(), vec![(0, 0, 1.0), (1, 0, 0.0), (1, 1, 8.0)]);
    assert_eq!(block.nnz_guess(), Some(20));
    // The guess is capped at the row length, and growth stays within the reservation
    assert_eq!(block.info().nz_reserved, 4);
    assert_eq!(block.info().mallocs, 0);
}

#[test]
fn pattern_growth_beyond_reservation_counts_mallocs() {
    let layout = BlockLayout::serial(3, 1);
    let mut block = SparseBlock::zeros(layout.clone(), layout.clone(), None);
    assert_eq!(block.info().nz_reserved, 0);

    let diagonal = csr_from_triplets(3, 3, &[(0, 0, 1.0), (1, 1, 1.0), (2, 2, 1.0)]);
    let corner = csr_from_triplets(3, 3, &[(0, 2, 1.0)]);
    block.axpy(1.0, &diagonal, MatStructure::DifferentNonzeroPattern).unwrap();
    block.axpy(1.0, &corner, MatStructure::DifferentNonzeroPattern).unwrap();
    assert_eq!(block.info().mallocs, 2);
    assert_eq!(block.info().nz_reserved, 4);

    let mut preallocated = SparseBlock::zeros(layout.clone(), layout, Some(2));
    assert_eq!(preallocated.info().nz_reserved, 6);
    preallocated.axpy(1.0, &diagonal, MatStructure::DifferentNonzeroPattern).unwrap();
    preallocated.axpy(1.0, &corner, MatStructure::DifferentNonzeroPattern).unwrap();
    assert_eq!(preallocated.info().mallocs, 0);
    assert_eq!(preallocated.nnz(), 4);
}

#[test]
fn axpy_rejects_shape_mismatch() {
    let mut block = SparseBlock::<f64>::zeros(BlockLayout::serial(2, 1), BlockLayout::serial(3, 1), None);
    let wrong = CsrMatrix::zeros(3, 2);
    assert!(matches!(
        block.axpy(1.0, &wrong, MatStructure::DifferentNonzeroPattern),
        Err(BlockError::ShapeMismatch { .. })
    ));
}

#[test]
fn layout_block_indices() {
    let map = IndexMap::contiguous(4, 6);
    assert_eq!(map.block_indices(2), Some(vec![2, 3, 4]));
    assert_eq!(map.block_indices(4), None);

    let layout = BlockLayout::distributed(4, 10, 2, 4, IndexMap::new(vec![4, 5, 6, 7, 0, 1])).unwrap();
    assert_eq!(layout.ownership_range(), (4, 8));
    assert!(BlockLayout::distributed(4, 6, 1, 4, IndexMap::contiguous(4, 4)).is_err());
}

#[test]
fn nest_operator_matches_flattened_matrix() {
    let (l0, l1) = (BlockLayout::serial(2, 1), BlockLayout::serial(3, 1));
    let a00 = csr_from_triplets(2, 2, &[(0, 0, 2.0), (1, 1, 3.0)]);
    let a01 = csr_from_triplets(2, 3, &[(0, 2, 1.0)]);
    let a10 = CsrMatrix::zeros(3, 2);
    let a11 = csr_from_triplets(3, 3, &[(0, 0, 1.0), (1, 0, -1.0), (2, 2, 5.0)]);

    let nest = NestMatrix::from_blocks(vec![
        SparseBlock::from_csr(l0.clone(), l0.clone(), a00).unwrap(),
        SparseBlock::from_csr(l0.clone(), l1.clone(), a01).unwrap(),
        SparseBlock::from_csr(l1.clone(), l0.clone(), a10).unwrap(),
        SparseBlock::from_csr(l1.clone(), l1.clone(), a11).unwrap(),
    ]);

    let x = DVector::from_column_slice(&[1.0, -2.0, 0.5, 3.0, 4.0]);
    let mut y = DVector::zeros(5);
    nest.apply((&mut y).into(), (&x).into()).unwrap();

    let flat = nest.to_csr();
    let mut y_flat = DVector::zeros(5);
    flat.apply((&mut y_flat).into(), (&x).into()).unwrap();

    assert_matrix_eq!(y, y_flat, comp = abs, tol = 1e-14);
    assert_eq!(y, DVector::from_column_slice(&[6.0, -6.0, 0.5, -0.5, 20.0]));
    assert_eq!(nest.diagonal(), DVector::from_column_slice(&[2.0, 3.0, 1.0, 0.0, 5.0]));
}

#[test]
fn nest_vector_flat_roundtrip_preserves_block_order() {
    let mut v = NestVector::zeros(&[2, 0, 3]);
    let flat = DVector::from_column_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
    v.copy_from_flat(&flat);
    assert_eq!(v.block(0).as_slice(), &[1.0, 2.0]);
    assert!(v.block(1).is_empty());
    assert_eq!(v.block(2).as_slice(), &[3.0, 4.0, 5.0]);
    assert_eq!(v.to_flat(), flat);
}
