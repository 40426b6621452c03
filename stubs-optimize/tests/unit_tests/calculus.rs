use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::error::Error;
use stubs_optimize::calculus::{approximate_jacobian, VectorFunction};

/// `F(x, y) = (x^2 y, 3x + y^3)`
struct PolynomialMap;

impl VectorFunction<f64> for PolynomialMap {
    fn dimension(&self) -> usize {
        2
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        f[0] = x[0] * x[0] * x[1];
        f[1] = 3.0 * x[0] + x[1] * x[1] * x[1];
        Ok(())
    }
}

#[test]
fn approximate_jacobian_of_polynomial_map() {
    let x = DVector::from_column_slice(&[1.5, -2.0]);
    let jacobian = approximate_jacobian(PolynomialMap, &x, &1e-6).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2, &[
        2.0 * 1.5 * -2.0, 1.5 * 1.5,
        3.0,              3.0 * 4.0,
    ]);
    assert_matrix_eq!(jacobian, expected, comp = abs, tol = 1e-6);
}

#[test]
fn approximate_jacobian_through_mutable_reference() {
    let mut map = PolynomialMap;
    let x = DVector::from_column_slice(&[0.0, 1.0]);
    let jacobian = approximate_jacobian(&mut map, &x, &1e-6).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2, &[
        0.0, 0.0,
        3.0, 3.0,
    ]);
    assert_matrix_eq!(jacobian, expected, comp = abs, tol = 1e-6);
}
