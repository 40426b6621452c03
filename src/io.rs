//! Mesh input and solution output.
pub mod msh;
pub mod vtk;
