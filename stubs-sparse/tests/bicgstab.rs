use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use stubs_sparse::bicgstab::{BiCGStab, BiCGStabWorkspace, ResidualCriterion, SolveErrorKind};
use stubs_sparse::operator::JacobiPreconditioner;

/// Upwinded 1D convection-diffusion operator, which is nonsymmetric but diagonally dominant.
fn convection_diffusion(n: usize) -> DMatrix<f64> {
    let mut a = DMatrix::zeros(n, n);
    for i in 0..n {
        a[(i, i)] = 4.0;
        if i > 0 {
            a[(i, i - 1)] = -2.5;
        }
        if i + 1 < n {
            a[(i, i + 1)] = -0.5;
        }
    }
    a
}

#[test]
fn bicgstab_solves_nonsymmetric_system() {
    let n = 30;
    let dense = convection_diffusion(n);
    let a = CsrMatrix::from(&dense);
    let x_expected = DVector::from_fn(n, |i, _| (i as f64 * 0.3).sin() + 1.0);
    let b = &dense * &x_expected;

    let mut x = DVector::zeros(n);
    let output = BiCGStab::new()
        .with_operator(&a)
        .with_stopping_criterion(ResidualCriterion::relative(1e-12))
        .with_max_iter(200)
        .solve_with_guess(&b, &mut x)
        .unwrap();

    assert!(output.num_iterations > 0);
    assert_matrix_eq!(x, x_expected, comp = abs, tol = 1e-8);
}

#[test]
fn bicgstab_with_jacobi_and_shared_workspace() {
    let n = 25;
    let mut dense = convection_diffusion(n);
    // Badly scaled rows are handled by the diagonal preconditioner
    for j in 0..n {
        dense[(3, j)] *= 1e3;
    }
    let a = CsrMatrix::from(&dense);
    let preconditioner = JacobiPreconditioner::from_csr(&a);

    let mut workspace = BiCGStabWorkspace::default();
    for scale in [1.0, 2.0, -3.0] {
        let x_expected = DVector::repeat(n, scale);
        let b = &dense * &x_expected;
        let mut x = DVector::zeros(n);
        BiCGStab::with_workspace(&mut workspace)
            .with_operator(&a)
            .with_preconditioner(&preconditioner)
            .with_stopping_criterion(ResidualCriterion::relative(1e-12))
            .with_max_iter(200)
            .solve_with_guess(&b, &mut x)
            .unwrap();
        assert_matrix_eq!(x, x_expected, comp = abs, tol = 1e-8);
    }
}

#[test]
fn bicgstab_zero_rhs_gives_zero_solution() {
    let a = CsrMatrix::from(&convection_diffusion(5));
    let b = DVector::zeros(5);
    let mut x = DVector::repeat(5, 7.0);
    let output = BiCGStab::new()
        .with_operator(&a)
        .with_stopping_criterion(ResidualCriterion::default())
        .solve_with_guess(&b, &mut x)
        .unwrap();
    assert_eq!(output.num_iterations, 0);
    assert_eq!(x, DVector::zeros(5));
}

#[test]
fn bicgstab_reports_max_iterations() {
    let a = CsrMatrix::from(&convection_diffusion(40));
    let b = DVector::repeat(40, 1.0);
    let mut x = DVector::zeros(40);
    let err = BiCGStab::new()
        .with_operator(&a)
        .with_stopping_criterion(ResidualCriterion::relative(1e-14))
        .with_max_iter(1)
        .solve_with_guess(&b, &mut x)
        .unwrap_err();
    assert!(matches!(err.kind, SolveErrorKind::MaxIterationsReached { max_iter: 1 }));
}
