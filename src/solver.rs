//! Newton solves of a [`BlockProblem`] and adaptive time stepping.
use crate::config::{LinearMethod, LinearSolverConfig, NonlinearMethod, NonlinearSolverConfig, SolverSystem};
use crate::problem::{BlockProblem, SystemMatrix};
use log::{debug, info};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use std::collections::VecDeque;
use std::error::Error;
use stubs_optimize::calculus::{DifferentiableVectorFunction, VectorFunction};
use stubs_optimize::newton::{
    newton_line_search, BacktrackingLineSearch, NewtonError, NewtonOutput, NewtonSettings, NoLineSearch,
};
use stubs_sparse::bicgstab::{BiCGStab, ResidualCriterion};
use stubs_sparse::operator::JacobiPreconditioner;

/// Times closer than this are considered equal.
const TIME_EPSILON: f64 = 1e-12;

/// Adapts a [`BlockProblem`] to the vector function interface of the Newton solver.
#[derive(Debug)]
pub struct NonlinearSystem<'a> {
    problem: &'a mut BlockProblem,
    linear: &'a LinearSolverConfig,
    method: NonlinearMethod,
    linear_iterations: usize,
}

impl<'a> NonlinearSystem<'a> {
    pub fn new(problem: &'a mut BlockProblem, linear: &'a LinearSolverConfig, method: NonlinearMethod) -> Self {
        Self {
            problem,
            linear,
            method,
            linear_iterations: 0,
        }
    }

    /// Total number of linear iterations performed so far.
    pub fn linear_iterations(&self) -> usize {
        self.linear_iterations
    }
}

impl<'a> VectorFunction<f64> for NonlinearSystem<'a> {
    fn dimension(&self) -> usize {
        self.problem.dimension()
    }

    fn eval_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        self.problem.assemble_residual_into(f, x)?;
        Ok(())
    }
}

impl<'a> DifferentiableVectorFunction<f64> for NonlinearSystem<'a> {
    fn solve_jacobian_system(
        &mut self,
        sol: &mut DVectorViewMut<f64>,
        x: &DVectorView<f64>,
        rhs: &DVectorView<f64>,
    ) -> Result<(), Box<dyn Error>> {
        if self.method == NonlinearMethod::Imex {
            // Nonlinear terms are linearized around the latest iterate
            self.problem.copy_u(x)?;
            self.problem.update_prior_iterate();
        }
        let matrix = self.problem.assemble_jacobian(x)?;
        let iterations = solve_linear_system(matrix, self.linear, sol, rhs)?;
        self.linear_iterations += iterations;
        Ok(())
    }
}

/// Solves `A sol = rhs` and returns the number of iterations used.
pub fn solve_linear_system(
    matrix: &SystemMatrix,
    config: &LinearSolverConfig,
    sol: &mut DVectorViewMut<f64>,
    rhs: &DVectorView<f64>,
) -> Result<usize, Box<dyn Error>> {
    match config.method {
        LinearMethod::Lu => {
            let dense = DMatrix::from(&matrix.to_csr());
            let solution = dense
                .lu()
                .solve(&rhs.clone_owned())
                .ok_or("LU factorization of the Jacobian is singular")?;
            sol.copy_from(&solution);
            Ok(1)
        }
        LinearMethod::Bicgstab => {
            let diagonal = if config.jacobi_preconditioner {
                matrix.diagonal()
            } else {
                DVector::repeat(matrix.nrows(), 1.0)
            };
            sol.fill(0.0);
            let output = BiCGStab::new()
                .with_operator(matrix)
                .with_preconditioner(JacobiPreconditioner::from_diagonal(&diagonal))
                .with_stopping_criterion(ResidualCriterion::new(
                    config.relative_tolerance,
                    config.absolute_tolerance,
                ))
                .with_max_iter(config.max_iterations)
                .solve_with_guess(rhs, &mut *sol)?;
            debug!("BiCGStab converged in {} iterations", output.num_iterations);
            Ok(output.num_iterations)
        }
    }
}

/// Solves the nonlinear system of the current time step, starting from the current iterate.
///
/// On success the solution is left in the current iterate of every compartment.
pub fn solve_nonlinear(problem: &mut BlockProblem, solver: &SolverSystem) -> Result<NewtonOutput<f64>, NewtonError> {
    let nonlinear = &solver.nonlinear;
    let settings = NewtonSettings {
        max_iterations: Some(nonlinear.max_iterations),
        absolute_tolerance: nonlinear.absolute_tolerance,
        relative_tolerance: nonlinear.relative_tolerance,
    };
    let n = problem.dimension();
    let mut x = problem.state();
    let mut f = DVector::zeros(n);
    let mut dx = DVector::zeros(n);

    let output = {
        let mut system = NonlinearSystem::new(problem, &solver.linear, nonlinear.method);
        let output = if nonlinear.line_search {
            newton_line_search(
                &mut system,
                &mut x,
                &mut f,
                &mut dx,
                settings,
                &mut BacktrackingLineSearch::default(),
            )
        } else {
            newton_line_search(&mut system, &mut x, &mut f, &mut dx, settings, &mut NoLineSearch)
        };
        debug!("{} linear iterations", system.linear_iterations());
        output?
    };

    problem
        .copy_u(&DVectorView::from(&x))
        .map_err(|err| NewtonError::FunctionError(Box::new(err)))?;
    Ok(output)
}

/// Step size after a converged step that took `iterations` Newton iterations.
pub fn adapt_dt(dt: f64, iterations: usize, config: &NonlinearSolverConfig) -> f64 {
    if iterations <= config.min_newton {
        dt * config.dt_increase_factor
    } else if iterations >= config.max_newton {
        dt * config.dt_decrease_factor
    } else {
        dt
    }
}

/// Simulation time and step size, honouring scheduled step sizes and the final time.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeStepper {
    t: f64,
    dt: f64,
    final_t: f64,
    step: usize,
    /// Pending `(time, dt)` pairs, sorted by time.
    schedule: VecDeque<(f64, f64)>,
}

impl TimeStepper {
    pub fn new(config: &SolverSystem) -> Self {
        let mut schedule = config.adjust_dt.clone();
        schedule.sort_by(|a, b| a.0.total_cmp(&b.0));
        Self {
            t: 0.0,
            dt: config.initial_dt,
            final_t: config.final_t,
            step: 0,
            schedule: schedule.into(),
        }
    }

    pub fn t(&self) -> f64 {
        self.t
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn is_finished(&self) -> bool {
        self.t >= self.final_t - TIME_EPSILON
    }

    /// The step size to attempt next.
    ///
    /// Scheduled step sizes whose time has been reached replace the current one. The step is
    /// shortened so that it ends exactly at the next scheduled time or at the final time.
    pub fn next_dt(&mut self) -> f64 {
        while let Some((time, dt)) = self.schedule.front().copied() {
            if self.t < time - TIME_EPSILON {
                break;
            }
            info!("Setting dt = {} at t = {}", dt, self.t);
            self.dt = dt;
            self.schedule.pop_front();
        }

        let mut dt = self.dt;
        if let Some((time, _)) = self.schedule.front() {
            if self.t + dt > *time {
                dt = time - self.t;
            }
        }
        if self.t + dt > self.final_t {
            dt = self.final_t - self.t;
        }
        dt
    }

    /// Moves time forward by a completed step of size `dt`.
    pub fn advance(&mut self, dt: f64) {
        self.t += dt;
        self.step += 1;
    }
}

/// Summary of one accepted time step.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct StepOutcome {
    pub t: f64,
    pub dt: f64,
    pub newton_iterations: usize,
    pub retries: usize,
}

/// Advances the problem by one time step, retrying with smaller steps on failure.
///
/// `update_parameters(t, dt)` returns the parameter table for a step ending at `t`.
pub fn advance_time_step(
    problem: &mut BlockProblem,
    stepper: &mut TimeStepper,
    solver: &SolverSystem,
    mut update_parameters: impl FnMut(f64, f64) -> eyre::Result<Vec<f64>>,
) -> eyre::Result<StepOutcome> {
    let nonlinear = &solver.nonlinear;
    let mut retries = 0;
    loop {
        let dt = stepper.next_dt();
        let t = stepper.t() + dt;
        problem.set_dt(dt);
        problem.set_parameter_values(update_parameters(t, dt)?);

        match solve_nonlinear(problem, solver) {
            Ok(output) => {
                problem.accept_step();
                stepper.advance(dt);
                let next = adapt_dt(stepper.dt(), output.iterations, nonlinear);
                if next != stepper.dt() {
                    debug!("Newton took {} iterations, dt {} -> {}", output.iterations, stepper.dt(), next);
                }
                stepper.set_dt(next);
                return Ok(StepOutcome {
                    t,
                    dt,
                    newton_iterations: output.iterations,
                    retries,
                });
            }
            Err(err) => {
                problem.reject_step();
                retries += 1;
                if retries > nonlinear.max_retries {
                    return Err(eyre::eyre!(
                        "time step at t = {} failed after {} retries: {}",
                        stepper.t(),
                        nonlinear.max_retries,
                        err
                    ));
                }
                let reduced = stepper.dt() * nonlinear.dt_decrease_factor;
                info!("Newton solve failed ({}). Retrying with dt = {}", err, reduced);
                stepper.set_dt(reduced);
            }
        }
    }
}
