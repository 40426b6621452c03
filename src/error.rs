//! Error types for model definition, units, expressions and assembly.
use stubs_sparse::block::BlockError;
use stubs_sparse::layout::LayoutError;
use thiserror::Error;

/// Errors raised while parsing or converting physical units.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UnitError {
    #[error("unknown unit `{0}`")]
    UnknownUnit(String),
    #[error("malformed unit expression `{expr}`: {reason}")]
    Malformed { expr: String, reason: String },
    #[error("incompatible dimensions: {from} can not be converted to {to}")]
    Incompatible { from: String, to: String },
}

/// Errors raised while parsing, transforming or evaluating rate expressions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("parse error at position {position} in `{input}`: {message}")]
    Parse {
        input: String,
        position: usize,
        message: String,
    },
    #[error("unknown symbol `{0}`")]
    UnknownSymbol(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("can not add quantities with units {left} and {right}")]
    IncompatibleAddends { left: String, right: String },
    #[error("argument of `{function}` must be dimensionless, got {unit}")]
    DimensionedArgument { function: String, unit: String },
    #[error("exponent of a dimensioned base must be an integer constant")]
    NonIntegerExponent,
    #[error(transparent)]
    Units(#[from] UnitError),
}

/// Errors raised while building a model, before any system is solved.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },
    #[error("species `{name}`: {reason}")]
    InvalidSpecies { name: String, reason: String },
    #[error("compartment `{name}`: {reason}")]
    InvalidCompartment { name: String, reason: String },
    #[error("reaction `{name}`: {reason}")]
    InvalidReaction { name: String, reason: String },
    #[error("{kind} `{name}` is already defined")]
    Duplicate { kind: &'static str, name: String },
    #[error("unknown {kind} `{name}`")]
    Unknown { kind: &'static str, name: String },
    #[error("flux `{flux}` involves {count} compartments ({compartments}), expected one or two")]
    CompartmentCount {
        flux: String,
        count: usize,
        compartments: String,
    },
    #[error("flux `{flux}` has units {derived}, which are not compatible with the expected units {expected}")]
    FluxUnits {
        flux: String,
        derived: String,
        expected: String,
    },
    #[error("internal logic error for flux `{flux}` (species `{species}`, compartment `{compartment}`): {reason}")]
    InternalLogic {
        flux: String,
        species: String,
        compartment: String,
        reason: String,
    },
    #[error("flux `{flux}`: {source}")]
    FluxExpression { flux: String, source: ExprError },
    #[error("mesh: {0}")]
    Mesh(String),
    #[error("model has not been initialized")]
    NotInitialized,
    #[error(transparent)]
    Units(#[from] UnitError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Errors raised while assembling residuals and Jacobians.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("parent vertex {parent_vertex} has no degree of freedom in compartment `{compartment}`")]
    MissingDof {
        parent_vertex: usize,
        compartment: String,
    },
    #[error("state vector has length {actual}, expected {expected}")]
    StateSize { expected: usize, actual: usize },
    #[error("block ({i}, {j}): {source}")]
    Block { i: usize, j: usize, source: BlockError },
    #[error("non-finite value while assembling `{0}`")]
    NonFinite(String),
    #[error("sparsity pattern: {0}")]
    Pattern(String),
    #[error("cell {cell} of compartment `{compartment}` is degenerate")]
    DegenerateCell { compartment: String, cell: usize },
}
