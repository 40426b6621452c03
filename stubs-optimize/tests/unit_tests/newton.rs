use nalgebra::{DVector, DVectorView, DVectorViewMut, Matrix3, Vector3};
use numeric_literals::replace_numeric_literals;
use std::error::Error;
use stubs_optimize::calculus::{DifferentiableVectorFunction, VectorFunction};
use stubs_optimize::newton::*;

struct MockLinearVectorFunction;

impl VectorFunction<f64> for MockLinearVectorFunction {
    fn dimension(&self) -> usize {
        3
    }

    #[replace_numeric_literals(f64::from(literal))]
    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        let a = Matrix3::new(5, 1, 2, 1, 4, 2, 2, 2, 4);
        let b = Vector3::new(1, 2, 3);
        let r = a * x - b;
        f.copy_from(&r);
        Ok(())
    }
}

impl DifferentiableVectorFunction<f64> for MockLinearVectorFunction {
    #[replace_numeric_literals(f64::from(literal))]
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        _x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        let a = Matrix3::new(5, 1, 2, 1, 4, 2, 2, 2, 4);
        let a_inv = a.try_inverse().unwrap();
        sol.copy_from(&(a_inv * rhs));
        Ok(())
    }
}

/// F(x) = x^2 - 2 componentwise, scaled by the index to avoid a trivially uniform system.
struct ComponentwiseQuadratic;

impl VectorFunction<f64> for ComponentwiseQuadratic {
    fn dimension(&self) -> usize {
        2
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        for i in 0..2 {
            f[i] = (i as f64 + 1.0) * (x[i] * x[i] - 2.0);
        }
        Ok(())
    }
}

impl DifferentiableVectorFunction<f64> for ComponentwiseQuadratic {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        for i in 0..2 {
            let jii = (i as f64 + 1.0) * 2.0 * x[i];
            if jii == 0.0 {
                return Err(Box::from("singular Jacobian"));
            }
            sol[i] = rhs[i] / jii;
        }
        Ok(())
    }
}

#[test]
fn newton_converges_in_single_iteration_for_linear_system() {
    let expected_solution = Vector3::new(-0.125, 0.16666667, 0.72916667);

    let settings = NewtonSettings {
        max_iterations: Some(2),
        absolute_tolerance: Vector3::new(1.0, 2.0, 3.0).norm() * 1e-6,
        relative_tolerance: 0.0,
    };

    let mut f = DVector::zeros(3);
    let mut x = DVector::zeros(3);
    let mut dx = DVector::zeros(3);

    let output =
        newton(MockLinearVectorFunction, &mut x, &mut f, &mut dx, settings).expect("Newton iterations must succeed");
    let diff = x - expected_solution;
    assert!(diff.norm() < 1e-6);
    assert_eq!(output.iterations, 1);
}

#[test]
fn newton_with_backtracking_converges_for_quadratic() {
    let settings = NewtonSettings {
        max_iterations: Some(50),
        absolute_tolerance: 1e-12,
        relative_tolerance: 1e-14,
    };

    let mut f = DVector::zeros(2);
    let mut x = DVector::from_column_slice(&[10.0, 0.5]);
    let mut dx = DVector::zeros(2);

    let output = newton_line_search(
        ComponentwiseQuadratic,
        &mut x,
        &mut f,
        &mut dx,
        settings,
        &mut BacktrackingLineSearch::default(),
    )
    .unwrap();

    assert!(output.iterations > 1);
    assert!(output.residual_norm <= 1e-12);
    assert!((x[0] - 2f64.sqrt()).abs() < 1e-10);
    assert!((x[1] - 2f64.sqrt()).abs() < 1e-10);
}

#[test]
fn newton_relative_tolerance_stops_early() {
    let settings = NewtonSettings {
        max_iterations: Some(50),
        absolute_tolerance: 0.0,
        relative_tolerance: 1e-2,
    };

    let mut f = DVector::zeros(2);
    let mut x = DVector::from_column_slice(&[3.0, 3.0]);
    let mut dx = DVector::zeros(2);

    let output = newton(ComponentwiseQuadratic, &mut x, &mut f, &mut dx, settings).unwrap();
    assert!(output.residual_norm <= 1e-2 * output.initial_residual_norm);
    assert!(output.residual_norm > 1e-12);
}

#[test]
fn newton_reports_jacobian_failure() {
    let settings = NewtonSettings {
        max_iterations: Some(5),
        absolute_tolerance: 1e-12,
        relative_tolerance: 0.0,
    };
    let mut f = DVector::zeros(2);
    let mut x = DVector::zeros(2);
    let mut dx = DVector::zeros(2);

    let result = newton(ComponentwiseQuadratic, &mut x, &mut f, &mut dx, settings);
    assert!(matches!(result, Err(NewtonError::JacobianError(_))));
}
