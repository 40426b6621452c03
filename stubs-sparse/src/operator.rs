use nalgebra::base::constraint::AreMultipliable;
use nalgebra::constraint::{DimEq, ShapeConstraint};
use nalgebra::storage::Storage;
use nalgebra::{ClosedAdd, ClosedMul, DVector, DVectorView, DVectorViewMut, Dim, Dyn, Matrix, RealField, Scalar, U1};
use nalgebra_sparse::ops::serial::spmm_csr_dense;
use nalgebra_sparse::ops::Op;
use nalgebra_sparse::CsrMatrix;
use num::{One, Zero};
use std::error::Error;

pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T, R, C, S> LinearOperator<T> for Matrix<T, R, C, S>
where
    T: Scalar + One + Zero + ClosedMul + ClosedAdd,
    R: Dim,
    C: Dim,
    S: Storage<T, R, C>,
    ShapeConstraint: DimEq<Dyn, R> + DimEq<C, Dyn> + AreMultipliable<R, C, Dyn, U1>,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T> LinearOperator<T> for CsrMatrix<T>
where
    T: Scalar + Zero + One + ClosedMul + ClosedAdd,
{
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        if self.ncols() != x.len() || self.nrows() != y.len() {
            return Err(Box::from(format!(
                "operator of shape {}x{} applied to vector of length {} (output length {})",
                self.nrows(),
                self.ncols(),
                x.len(),
                y.len()
            )));
        }
        spmm_csr_dense(T::zero(), &mut y, T::one(), Op::NoOp(self), Op::NoOp(&x));
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        y.copy_from(&x);
        Ok(())
    }
}

/// Diagonal (Jacobi) preconditioner `y = D^{-1} x`.
///
/// Zero diagonal entries are treated as ones, so rows without a diagonal entry pass through
/// unchanged.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Scalar> {
    inverse_diagonal: DVector<T>,
}

impl<T: RealField + Copy> JacobiPreconditioner<T> {
    pub fn from_diagonal(diagonal: &DVector<T>) -> Self {
        let inverse_diagonal = diagonal.map(|d| if d == T::zero() { T::one() } else { T::one() / d });
        Self { inverse_diagonal }
    }

    pub fn from_csr(matrix: &CsrMatrix<T>) -> Self {
        Self::from_diagonal(&csr_diagonal(matrix))
    }
}

impl<T: RealField + Copy> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), Box<dyn Error>> {
        if x.len() != self.inverse_diagonal.len() {
            return Err(Box::from("Jacobi preconditioner dimension mismatch"));
        }
        y.copy_from(&x.component_mul(&self.inverse_diagonal));
        Ok(())
    }
}

/// Extracts the diagonal of a square CSR matrix. Missing entries are zero.
pub fn csr_diagonal<T: RealField + Copy>(matrix: &CsrMatrix<T>) -> DVector<T> {
    let n = matrix.nrows().min(matrix.ncols());
    let mut diagonal = DVector::zeros(n);
    for i in 0..n {
        let row = matrix.row(i);
        if let Ok(pos) = row.col_indices().binary_search(&i) {
            diagonal[i] = row.values()[pos];
        }
    }
    diagonal
}
