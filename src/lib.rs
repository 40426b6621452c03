//! Multi-compartment reaction-diffusion models on simplex meshes.
//!
//! Species live in compartments of different topological dimension (volumes, membranes and
//! curves) carved out of a common [`ParentMesh`](mesh::ParentMesh). Reactions couple species
//! within a compartment and across compartment boundaries. A [`Model`](model::Model)
//! expands reactions into per-species fluxes, compiles fluxes into weak forms and assembles
//! the forms into a block nonlinear system ([`BlockProblem`](problem::BlockProblem)) with
//! one block row per active compartment, which is then advanced in time with Newton's
//! method.
pub mod assembly;
pub mod config;
pub mod element;
pub mod error;
pub mod expr;
pub mod io;
pub mod mesh;
pub mod model;
pub mod parallel;
pub mod problem;
pub mod quadrature;
pub mod solver;
pub mod space;
pub mod stopwatch;
pub mod units;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
pub extern crate vtkio;
