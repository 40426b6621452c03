use crate::operator::{IdentityOperator, LinearOperator};
use core::fmt;
use nalgebra::{DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use num::Zero;
use std::error::Error;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

pub trait StoppingCriterion<T: Scalar> {
    fn has_converged(
        &self,
        b_norm: T,
        iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind>;
}

/// Residual tolerance `||r|| <= max(rel_tol * ||b||, abs_tol)`.
///
/// The residual is the one recurred by BiCGStab, which may drift from the true residual
/// for badly conditioned systems.
#[derive(Debug)]
pub struct ResidualCriterion<T: Scalar> {
    rel_tol: T,
    abs_tol: T,
}

impl<T: Scalar + Zero> ResidualCriterion<T> {
    pub fn new(rel_tol: T, abs_tol: T) -> Self {
        Self { rel_tol, abs_tol }
    }

    pub fn relative(rel_tol: T) -> Self {
        Self::new(rel_tol, T::zero())
    }
}

impl Default for ResidualCriterion<f64> {
    fn default() -> Self {
        Self::relative(1e-10)
    }
}

impl<T: RealField + Copy> StoppingCriterion<T> for ResidualCriterion<T> {
    fn has_converged(
        &self,
        b_norm: T,
        _iteration: usize,
        approx_residual: DVectorView<T>,
    ) -> Result<bool, SolveErrorKind> {
        let tol = (self.rel_tol * b_norm).max(self.abs_tol);
        Ok(approx_residual.norm() <= tol)
    }
}

#[derive(Debug, Clone)]
pub struct BiCGStabWorkspace<T: Scalar> {
    r: DVector<T>,
    r_hat: DVector<T>,
    p: DVector<T>,
    p_hat: DVector<T>,
    v: DVector<T>,
    s: DVector<T>,
    s_hat: DVector<T>,
    t: DVector<T>,
}

struct Buffers<'a, T: Scalar> {
    r: &'a mut DVector<T>,
    r_hat: &'a mut DVector<T>,
    p: &'a mut DVector<T>,
    p_hat: &'a mut DVector<T>,
    v: &'a mut DVector<T>,
    s: &'a mut DVector<T>,
    s_hat: &'a mut DVector<T>,
    t: &'a mut DVector<T>,
}

impl<T: Scalar + Zero> Default for BiCGStabWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            r_hat: DVector::zeros(0),
            p: DVector::zeros(0),
            p_hat: DVector::zeros(0),
            v: DVector::zeros(0),
            s: DVector::zeros(0),
            s_hat: DVector::zeros(0),
            t: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> BiCGStabWorkspace<T> {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers<T> {
        for buffer in [
            &mut self.r,
            &mut self.r_hat,
            &mut self.p,
            &mut self.p_hat,
            &mut self.v,
            &mut self.s,
            &mut self.s_hat,
            &mut self.t,
        ] {
            buffer.resize_vertically_mut(dim, T::zero());
            buffer.fill(T::zero());
        }
        Buffers {
            r: &mut self.r,
            r_hat: &mut self.r_hat,
            p: &mut self.p,
            p_hat: &mut self.p_hat,
            v: &mut self.v,
            s: &mut self.s,
            s_hat: &mut self.s_hat,
            t: &mut self.t,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

/// Right-preconditioned BiCGStab, configured with a builder.
///
/// ```ignore
/// let output = BiCGStab::new()
///     .with_operator(&a)
///     .with_preconditioner(JacobiPreconditioner::from_csr(&a))
///     .with_stopping_criterion(ResidualCriterion::relative(1e-10))
///     .with_max_iter(500)
///     .solve_with_guess(&b, &mut x)?;
/// ```
#[derive(Debug)]
pub struct BiCGStab<'a, T, A, P, Criterion>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, BiCGStabWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    max_iter: Option<usize>,
}

impl<'a, T: Scalar + Zero> BiCGStab<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(BiCGStabWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar> BiCGStab<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut BiCGStabWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar, P, Criterion> BiCGStab<'a, T, (), P, Criterion> {
    pub fn with_operator<A>(self, operator: A) -> BiCGStab<'a, T, A, P, Criterion> {
        BiCGStab {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion> BiCGStab<'a, T, A, P, Criterion> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> BiCGStab<'a, T, A, P2, Criterion> {
        BiCGStab {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P> BiCGStab<'a, T, A, P, ()> {
    pub fn with_stopping_criterion<Criterion>(self, stopping_criterion: Criterion) -> BiCGStab<'a, T, A, P, Criterion> {
        BiCGStab {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(Box<dyn Error>),
    PreconditionerError(Box<dyn Error>),
    StoppingCriterionError(Box<dyn Error>),
    /// One of the inner products of the recurrence vanished.
    Breakdown,
    MaxIterationsReached {
        max_iter: usize,
    },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => {
                write!(f, "Error applying operator: ")?;
                err.fmt(f)
            }
            Self::PreconditionerError(err) => {
                write!(f, "Error applying preconditioner: ")?;
                err.fmt(f)
            }
            Self::StoppingCriterionError(err) => {
                write!(f, "Error evaluating stopping criterion: ")?;
                err.fmt(f)
            }
            Self::Breakdown => write!(f, "BiCGStab breakdown (vanishing inner product)"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "Max iterations ({}) reached.", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: SolveOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: SolveOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BiCGStab solve failed after {} iterations. ", self.output.num_iterations)?;
        write!(f, "Error: {}", self.kind)
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct SolveOutput<T> {
    /// Number of updates made to the solution vector.
    pub num_iterations: usize,
    marker: PhantomData<T>,
}

/// y = Ax
fn apply_operator<'a, T, A>(
    y: impl Into<DVectorViewMut<'a, T>>,
    a: &'a A,
    x: impl Into<DVectorView<'a, T>>,
) -> Result<(), Box<dyn Error>>
where
    T: Scalar,
    A: LinearOperator<T>,
{
    a.apply(y.into(), x.into())
}

impl<'a, T, A, P, Criterion> BiCGStab<'a, T, A, P, Criterion>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: StoppingCriterion<T>,
{
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<SolveOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<SolveOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = SolveOutput {
            num_iterations: 0,
            marker: PhantomData,
        };

        let Buffers {
            r,
            r_hat,
            p,
            p_hat,
            v,
            s,
            s_hat,
            t,
        } = self.workspace.prepare_buffers(x.len());

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        // r = b - Ax
        if let Err(err) = apply_operator(&mut *r, &self.operator, &x) {
            return Err(SolveError::new(output, OperatorError(err)));
        }
        r.axpy(T::one(), &b, -T::one());
        r_hat.copy_from(r);

        let mut rho = T::one();
        let mut alpha = T::one();
        let mut omega = T::one();

        loop {
            let converged = self
                .stopping_criterion
                .has_converged(b_norm, output.num_iterations, (&*r).into())
                .map_err(|kind| SolveError::new(output.clone(), kind))?;
            if converged {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            let rho_next = r_hat.dot(r);
            if rho_next == T::zero() {
                return Err(SolveError::new(output, Breakdown));
            }

            if output.num_iterations == 0 {
                p.copy_from(r);
            } else {
                let beta = (rho_next / rho) * (alpha / omega);
                // p <- r + beta * (p - omega * v)
                p.axpy(-omega, &*v, T::one());
                p.axpy(T::one(), &*r, beta);
            }

            // p_hat = M p, v = A p_hat
            if let Err(err) = apply_operator(&mut *p_hat, &self.preconditioner, &*p) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            if let Err(err) = apply_operator(&mut *v, &self.operator, &*p_hat) {
                return Err(SolveError::new(output, OperatorError(err)));
            }

            let r_hat_v = r_hat.dot(v);
            if r_hat_v == T::zero() {
                return Err(SolveError::new(output, Breakdown));
            }
            alpha = rho_next / r_hat_v;

            // s = r - alpha v
            s.copy_from(r);
            s.axpy(-alpha, &*v, T::one());

            let s_converged = self
                .stopping_criterion
                .has_converged(b_norm, output.num_iterations, (&*s).into())
                .map_err(|kind| SolveError::new(output.clone(), kind))?;
            if s_converged {
                x.axpy(alpha, &*p_hat, T::one());
                r.copy_from(s);
                output.num_iterations += 1;
                break;
            }

            // s_hat = M s, t = A s_hat
            if let Err(err) = apply_operator(&mut *s_hat, &self.preconditioner, &*s) {
                return Err(SolveError::new(output, PreconditionerError(err)));
            }
            if let Err(err) = apply_operator(&mut *t, &self.operator, &*s_hat) {
                return Err(SolveError::new(output, OperatorError(err)));
            }

            let t_t = t.dot(t);
            if t_t == T::zero() {
                return Err(SolveError::new(output, Breakdown));
            }
            omega = t.dot(s) / t_t;

            // x <- x + alpha p_hat + omega s_hat
            x.axpy(alpha, &*p_hat, T::one());
            x.axpy(omega, &*s_hat, T::one());

            // r <- s - omega t
            r.copy_from(s);
            r.axpy(-omega, &*t, T::one());

            rho = rho_next;
            output.num_iterations += 1;

            if omega == T::zero() {
                return Err(SolveError::new(output, Breakdown));
            }
        }

        Ok(output)
    }
}
