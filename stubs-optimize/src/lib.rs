/// Vector function traits and numerical differentiation
pub mod calculus;
/// Newton's method with optional line search
pub mod newton;

use nalgebra::RealField;

/// Scalar types supported by the solvers.
pub trait Real: RealField + Copy {}

impl<T> Real for T where T: RealField + Copy {}
