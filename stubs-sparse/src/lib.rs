//! Block-structured sparse linear algebra used by the `stubs` block system adapter.
//!
//! The building blocks mirror what a distributed sparse backend offers: matrices and vectors
//! with explicit (local, global) sizes and local-to-global index maps, structure-preserving
//! zeroing, accumulation with a declared nonzero-structure relationship, and nest
//! (block-of-blocks) containers that act as a single linear operator.

/// Preconditioned BiCGStab for nonsymmetric systems.
pub mod bicgstab;
/// Single sparse blocks with layouts and structure-aware accumulation.
pub mod block;
/// Local/global size bookkeeping and local-to-global index maps.
pub mod layout;
/// Nest matrices and vectors.
pub mod nest;
/// Linear operator abstraction and simple preconditioners.
pub mod operator;

pub extern crate nalgebra_sparse;
