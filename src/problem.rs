//! The block nonlinear system: residual and Jacobian callbacks over all active compartments.
//!
//! Block `(i, j)` of the Jacobian is the derivative of the residual of compartment `i` with
//! respect to the unknowns of compartment `j`. Each block is the sum over integration domains
//! `k` of separately assembled sub-forms. Sparsity patterns are computed on the first
//! assembly and reused afterwards, so the structure of the system never changes during a
//! solve.
use crate::assembly::{AssemblyState, CompiledForms, Domain};
use crate::error::AssemblyError;
use crate::parallel::Communicator;
use crate::space::{CompartmentFunctions, FunctionSpace};
use crate::stopwatch::Stopwatches;
use log::{debug, info};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use std::sync::Arc;
use stubs_sparse::block::{BlockInfo, MatStructure, SparseBlock};
use stubs_sparse::nest::{NestMatrix, NestVector};
use stubs_sparse::operator::{csr_diagonal, LinearOperator};

/// Nonzeros per row reserved for blocks that receive no contributions.
const EMPTY_BLOCK_NNZ_GUESS: usize = 20;

const JACOBIAN_TIMER: &str = "snes jacobian assemble";
const RESIDUAL_TIMER: &str = "snes residual assemble";
const INITIALIZE_TIMER: &str = "snes initialize zero matrices";

/// The assembled Jacobian. Single-compartment systems use a plain matrix.
#[derive(Debug, Clone)]
pub enum SystemMatrix {
    Plain(SparseBlock<f64>),
    Nest(NestMatrix<f64>),
}

impl SystemMatrix {
    pub fn nrows(&self) -> usize {
        match self {
            SystemMatrix::Plain(block) => block.nrows(),
            SystemMatrix::Nest(nest) => nest.nrows(),
        }
    }

    pub fn ncols(&self) -> usize {
        match self {
            SystemMatrix::Plain(block) => block.ncols(),
            SystemMatrix::Nest(nest) => nest.ncols(),
        }
    }

    pub fn is_nest(&self) -> bool {
        matches!(self, SystemMatrix::Nest(_))
    }

    /// Block `(i, j)`. A plain matrix only has the block `(0, 0)`.
    pub fn block(&self, i: usize, j: usize) -> Option<&SparseBlock<f64>> {
        match self {
            SystemMatrix::Plain(block) if i == 0 && j == 0 => Some(block),
            SystemMatrix::Plain(_) => None,
            SystemMatrix::Nest(nest) if i < nest.dim() && j < nest.dim() => Some(nest.block(i, j)),
            SystemMatrix::Nest(_) => None,
        }
    }

    fn block_mut(&mut self, i: usize, j: usize) -> Option<&mut SparseBlock<f64>> {
        match self {
            SystemMatrix::Plain(block) if i == 0 && j == 0 => Some(block),
            SystemMatrix::Plain(_) => None,
            SystemMatrix::Nest(nest) if i < nest.dim() && j < nest.dim() => Some(nest.block_mut(i, j)),
            SystemMatrix::Nest(_) => None,
        }
    }

    /// The whole system as one CSR matrix over the concatenated local dofs.
    pub fn to_csr(&self) -> CsrMatrix<f64> {
        match self {
            SystemMatrix::Plain(block) => block.csr().clone(),
            SystemMatrix::Nest(nest) => nest.to_csr(),
        }
    }

    pub fn diagonal(&self) -> DVector<f64> {
        match self {
            SystemMatrix::Plain(block) => csr_diagonal(block.csr()),
            SystemMatrix::Nest(nest) => nest.diagonal(),
        }
    }
}

impl LinearOperator<f64> for SystemMatrix {
    fn apply(&self, y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), Box<dyn Error>> {
        match self {
            SystemMatrix::Plain(block) => block.csr().apply(y, x),
            SystemMatrix::Nest(nest) => nest.apply(y, x),
        }
    }
}

/// The assembled residual. Single-compartment systems use a plain vector.
#[derive(Debug, Clone, PartialEq)]
pub enum SystemVector {
    Plain(DVector<f64>),
    Nest(NestVector<f64>),
}

impl SystemVector {
    fn zeros(sizes: &[usize]) -> Self {
        if sizes.len() == 1 {
            SystemVector::Plain(DVector::zeros(sizes[0]))
        } else {
            SystemVector::Nest(NestVector::zeros(sizes))
        }
    }

    pub fn is_nest(&self) -> bool {
        matches!(self, SystemVector::Nest(_))
    }

    pub fn len(&self) -> usize {
        match self {
            SystemVector::Plain(v) => v.len(),
            SystemVector::Nest(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn block(&self, i: usize) -> &DVector<f64> {
        match self {
            SystemVector::Plain(v) => v,
            SystemVector::Nest(v) => v.block(i),
        }
    }

    fn block_mut(&mut self, i: usize) -> &mut DVector<f64> {
        match self {
            SystemVector::Plain(v) => v,
            SystemVector::Nest(v) => v.block_mut(i),
        }
    }

    pub fn norm(&self) -> f64 {
        match self {
            SystemVector::Plain(v) => v.norm(),
            SystemVector::Nest(v) => v.norm(),
        }
    }

    pub fn to_flat(&self) -> DVector<f64> {
        match self {
            SystemVector::Plain(v) => v.clone(),
            SystemVector::Nest(v) => v.to_flat(),
        }
    }
}

/// Residual and Jacobian assembly for a block system of compartments.
///
/// The problem owns the discrete functions of every compartment. Both assembly entry points
/// first copy the given state into the current iterate `u` of each compartment, so calls
/// must not be interleaved with other writes to the functions.
#[derive(Debug)]
pub struct BlockProblem {
    spaces: Vec<FunctionSpace>,
    functions: Vec<CompartmentFunctions>,
    domains: Vec<Domain>,
    forms: CompiledForms,
    /// Cached sub-form matrices, indexed by `i * n + j` and domain.
    tensors: Vec<Vec<Option<CsrMatrix<f64>>>>,
    empty_forms: Vec<bool>,
    jacobian_names: Vec<String>,
    matrix: Option<SystemMatrix>,
    residual: SystemVector,
    parameter_values: Vec<f64>,
    dt: f64,
    stopwatches: Stopwatches,
    print_assembly: bool,
    comm: Arc<dyn Communicator>,
}

impl BlockProblem {
    /// Creates the problem and classifies its blocks.
    ///
    /// A block is empty if none of its sub-forms on any domain has a term. Empty blocks are
    /// never assembled and are represented by a zero matrix of the correct shape.
    ///
    /// # Panics
    ///
    /// Panics if the numbers of spaces, functions and compiled forms disagree.
    pub fn new(
        spaces: Vec<FunctionSpace>,
        functions: Vec<CompartmentFunctions>,
        domains: Vec<Domain>,
        forms: CompiledForms,
        parameter_values: Vec<f64>,
        dt: f64,
        comm: Arc<dyn Communicator>,
    ) -> Self {
        let n = spaces.len();
        assert_eq!(functions.len(), n, "Need one set of functions per space.");
        assert_eq!(forms.residual.len(), n, "Need one residual form list per space.");
        assert_eq!(forms.jacobian.len(), n, "Need one row of Jacobian forms per space.");

        let mut empty_forms = Vec::with_capacity(n * n);
        let mut jacobian_names = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                empty_forms.push(forms.jacobian[i][j].iter().all(|form| form.is_empty()));
                jacobian_names.push(format!(
                    "J{}{} = dF[{}]/du[{}]",
                    i,
                    j,
                    spaces[i].compartment_name(),
                    spaces[j].compartment_name()
                ));
            }
        }
        let tensors = (0..n * n).map(|_| vec![None; domains.len()]).collect();
        let sizes: Vec<usize> = spaces.iter().map(FunctionSpace::dim).collect();

        Self {
            spaces,
            functions,
            domains,
            forms,
            tensors,
            empty_forms,
            jacobian_names,
            matrix: None,
            residual: SystemVector::zeros(&sizes),
            parameter_values,
            dt,
            stopwatches: Stopwatches::default(),
            print_assembly: true,
            comm,
        }
    }

    pub fn with_print_assembly(mut self, print_assembly: bool) -> Self {
        self.print_assembly = print_assembly;
        self
    }

    pub fn num_spaces(&self) -> usize {
        self.spaces.len()
    }

    /// Whether a single compartment is solved, in which case plain matrices and vectors are
    /// used instead of nests.
    pub fn is_single_domain(&self) -> bool {
        self.spaces.len() == 1
    }

    /// Total number of local unknowns.
    pub fn dimension(&self) -> usize {
        self.spaces.iter().map(FunctionSpace::dim).sum()
    }

    pub fn spaces(&self) -> &[FunctionSpace] {
        &self.spaces
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn forms(&self) -> &CompiledForms {
        &self.forms
    }

    pub fn functions(&self) -> &[CompartmentFunctions] {
        &self.functions
    }

    pub fn functions_mut(&mut self) -> &mut [CompartmentFunctions] {
        &mut self.functions
    }

    pub fn is_empty_block(&self, i: usize, j: usize) -> bool {
        self.empty_forms[i * self.spaces.len() + j]
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn set_dt(&mut self, dt: f64) {
        self.dt = dt;
    }

    pub fn parameter_values(&self) -> &[f64] {
        &self.parameter_values
    }

    /// Replaces the parameter table, which must keep the order used to compile the forms.
    pub fn set_parameter_values(&mut self, values: Vec<f64>) {
        assert_eq!(values.len(), self.parameter_values.len(), "Parameter table changed size.");
        self.parameter_values = values;
    }

    pub fn stopwatches(&self) -> &Stopwatches {
        &self.stopwatches
    }

    /// The most recently assembled Jacobian, if any.
    pub fn matrix(&self) -> Option<&SystemMatrix> {
        self.matrix.as_ref()
    }

    pub fn residual(&self) -> &SystemVector {
        &self.residual
    }

    pub fn jacobian_name(&self, i: usize, j: usize) -> &str {
        &self.jacobian_names[i * self.spaces.len() + j]
    }

    pub fn sub_jacobian_name(&self, i: usize, j: usize, k: usize) -> String {
        sub_form_label(i, j, k, &self.spaces, &self.domains)
    }

    pub fn residual_name(&self, i: usize, k: usize) -> String {
        format!(
            "F{}{} = F[{}] (domain={})",
            i,
            k,
            self.spaces[i].compartment_name(),
            self.domains[k].name
        )
    }

    /// The concatenated current iterates of all compartments.
    pub fn state(&self) -> DVector<f64> {
        let mut x = DVector::zeros(self.dimension());
        let mut offset = 0;
        for functions in &self.functions {
            x.rows_mut(offset, functions.u.len()).copy_from(&functions.u);
            offset += functions.u.len();
        }
        x
    }

    /// Splits a flat state vector into the current iterates of the compartments.
    pub fn copy_u(&mut self, x: &DVectorView<f64>) -> Result<(), AssemblyError> {
        let expected = self.dimension();
        if x.len() != expected {
            return Err(AssemblyError::StateSize {
                expected,
                actual: x.len(),
            });
        }
        let mut offset = 0;
        for functions in &mut self.functions {
            let n = functions.u.len();
            functions.u.copy_from(&x.rows(offset, n));
            offset += n;
        }
        Ok(())
    }

    /// Sets the prior iterate `k` of every compartment to its current iterate.
    pub fn update_prior_iterate(&mut self) {
        for functions in &mut self.functions {
            functions.k.copy_from(&functions.u);
        }
    }

    /// Accepts the current iterate as the solution of the time step.
    pub fn accept_step(&mut self) {
        for functions in &mut self.functions {
            functions.n.copy_from(&functions.u);
            functions.k.copy_from(&functions.u);
        }
    }

    /// Restores the current iterate to the previous time step's solution.
    pub fn reject_step(&mut self) {
        for functions in &mut self.functions {
            functions.u.copy_from(&functions.n);
            functions.k.copy_from(&functions.n);
        }
    }

    /// Assembles the residual at the state `x`.
    pub fn assemble_residual(&mut self, x: &DVectorView<f64>) -> Result<&SystemVector, AssemblyError> {
        self.copy_u(x)?;
        self.stopwatches.start(RESIDUAL_TIMER);
        let result = self.assemble_residual_blocks();
        self.stopwatches.pause(RESIDUAL_TIMER);
        result?;
        Ok(&self.residual)
    }

    fn assemble_residual_blocks(&mut self) -> Result<(), AssemblyError> {
        let state = AssemblyState {
            spaces: &self.spaces,
            functions: &self.functions,
            parameters: &self.parameter_values,
            dt: self.dt,
        };
        for (i, sub_forms) in self.forms.residual.iter().enumerate() {
            let output = self.residual.block_mut(i);
            output.fill(0.0);
            for (k, sub_form) in sub_forms.iter().enumerate() {
                if sub_form.is_empty() {
                    continue;
                }
                sub_form.assemble_into(output, &self.domains[k], &state)?;
            }
        }
        Ok(())
    }

    /// Assembles the residual at `x` and writes it, flattened, into `f`.
    pub fn assemble_residual_into(&mut self, f: &mut DVectorViewMut<f64>, x: &DVectorView<f64>) -> Result<(), AssemblyError> {
        self.assemble_residual(x)?;
        if f.len() != self.residual.len() {
            return Err(AssemblyError::StateSize {
                expected: self.residual.len(),
                actual: f.len(),
            });
        }
        let mut offset = 0;
        for i in 0..self.spaces.len() {
            let block = self.residual.block(i);
            f.rows_mut(offset, block.len()).copy_from(block);
            offset += block.len();
        }
        Ok(())
    }

    /// Assembles the Jacobian at the state `x`.
    ///
    /// The first call allocates every block from the union of its sub-form patterns. Later
    /// calls zero the blocks in place and add the reassembled sub-forms, which must stay
    /// within the allocated patterns.
    pub fn assemble_jacobian(&mut self, x: &DVectorView<f64>) -> Result<&SystemMatrix, AssemblyError> {
        self.copy_u(x)?;
        let result = if self.matrix.is_none() {
            self.stopwatches.start(INITIALIZE_TIMER);
            let result = self.initialize_matrix();
            self.stopwatches.pause(INITIALIZE_TIMER);
            result
        } else {
            self.stopwatches.start(JACOBIAN_TIMER);
            let result = self.reassemble_matrix();
            self.stopwatches.pause(JACOBIAN_TIMER);
            result
        };
        result?;
        self.matrix
            .as_ref()
            .ok_or_else(|| AssemblyError::Pattern("the Jacobian has not been initialized".to_string()))
    }

    fn initialize_matrix(&mut self) -> Result<(), AssemblyError> {
        let n = self.spaces.len();
        let state = AssemblyState {
            spaces: &self.spaces,
            functions: &self.functions,
            parameters: &self.parameter_values,
            dt: self.dt,
        };

        let mut blocks = Vec::with_capacity(n * n);
        for i in 0..n {
            for j in 0..n {
                let ij = i * n + j;
                let row_layout = self.spaces[i].layout().clone();
                let col_layout = self.spaces[j].layout().clone();
                let block_error = |source| AssemblyError::Block { i, j, source };

                let mut block: Option<SparseBlock<f64>> = None;
                if !self.empty_forms[ij] {
                    for (k, sub_form) in self.forms.jacobian[i][j].iter().enumerate() {
                        if sub_form.is_empty() {
                            continue;
                        }
                        let tensor = sub_form.assemble(&self.domains[k], &state)?;
                        match block.as_mut() {
                            None => {
                                block = Some(
                                    SparseBlock::from_csr(row_layout.clone(), col_layout.clone(), tensor.clone())
                                        .map_err(block_error)?,
                                );
                            }
                            Some(block) => block
                                .axpy(1.0, &tensor, MatStructure::DifferentNonzeroPattern)
                                .map_err(block_error)?,
                        }
                        self.tensors[ij][k] = Some(tensor);
                    }
                }
                let mut block = block
                    .unwrap_or_else(|| SparseBlock::zeros(row_layout, col_layout, Some(EMPTY_BLOCK_NNZ_GUESS)));
                block.assemble();

                if self.print_assembly && self.comm.is_root() {
                    log_block_info(&self.jacobian_names[ij], self.empty_forms[ij], &block.info());
                }
                blocks.push(block);
            }
        }

        self.matrix = Some(if n == 1 {
            SystemMatrix::Plain(blocks.remove(0))
        } else {
            SystemMatrix::Nest(NestMatrix::from_blocks(blocks))
        });
        Ok(())
    }

    fn reassemble_matrix(&mut self) -> Result<(), AssemblyError> {
        let n = self.spaces.len();
        let state = AssemblyState {
            spaces: &self.spaces,
            functions: &self.functions,
            parameters: &self.parameter_values,
            dt: self.dt,
        };
        let matrix = match self.matrix.as_mut() {
            Some(matrix) => matrix,
            None => return Err(AssemblyError::Pattern("the Jacobian has not been initialized".to_string())),
        };

        for i in 0..n {
            for j in 0..n {
                let ij = i * n + j;
                if self.empty_forms[ij] {
                    continue;
                }
                let block = matrix
                    .block_mut(i, j)
                    .ok_or_else(|| AssemblyError::Pattern(format!("block ({}, {}) is missing", i, j)))?;
                block.zero_entries();
                for (k, sub_form) in self.forms.jacobian[i][j].iter().enumerate() {
                    let tensor = match self.tensors[ij][k].as_mut() {
                        Some(tensor) => tensor,
                        None => continue,
                    };
                    sub_form.assemble_into(tensor, &self.domains[k], &state)?;
                    block
                        .axpy(1.0, tensor, MatStructure::SubsetNonzeroPattern)
                        .map_err(|source| AssemblyError::Block { i, j, source })?;
                    if self.print_assembly {
                        debug!("Assembled {}", sub_form_label(i, j, k, &self.spaces, &self.domains));
                    }
                }
                block.assemble();
            }
        }
        Ok(())
    }

    /// Entries of block `(i, j)` as `(row, col, value)` triplets in global indices, together
    /// with the block's global shape.
    pub fn block_triplets(&self, i: usize, j: usize) -> Option<((usize, usize), Vec<(usize, usize, f64)>)> {
        let block = self.matrix.as_ref()?.block(i, j)?;
        let row_map = block.row_layout().lgmap();
        let col_map = block.col_layout().lgmap();
        let shape = (block.row_layout().global_size(), block.col_layout().global_size());
        let triplets = block
            .triplets()
            .into_iter()
            .filter_map(|(r, c, v)| Some((row_map.global(r)?, col_map.global(c)?, v)))
            .collect();
        Some((shape, triplets))
    }

    /// Logs the structure of every block of the assembled Jacobian.
    pub fn print_assembly_info(&self) {
        if !self.comm.is_root() {
            return;
        }
        let matrix = match &self.matrix {
            Some(matrix) => matrix,
            None => {
                info!("The Jacobian has not been assembled yet");
                return;
            }
        };
        let n = self.spaces.len();
        for i in 0..n {
            for j in 0..n {
                if let Some(block) = matrix.block(i, j) {
                    log_block_info(self.jacobian_name(i, j), self.is_empty_block(i, j), &block.info());
                }
                for k in 0..self.domains.len() {
                    if !self.forms.jacobian[i][j][k].is_empty() {
                        info!("  {}", self.sub_jacobian_name(i, j, k));
                    }
                }
            }
            for k in 0..self.domains.len() {
                if !self.forms.residual[i][k].is_empty() {
                    info!("  {}", self.residual_name(i, k));
                }
            }
        }
    }
}

fn sub_form_label(i: usize, j: usize, k: usize, spaces: &[FunctionSpace], domains: &[Domain]) -> String {
    format!(
        "J{}{}{} = dF[{}]/du[{}] (domain={})",
        i,
        j,
        k,
        spaces[i].compartment_name(),
        spaces[j].compartment_name(),
        domains[k].name
    )
}

fn log_block_info(name: &str, empty: bool, info: &BlockInfo) {
    let kind = if empty { " (empty)" } else { "" };
    info!(
        "{}{}: {}x{}, {} nonzeros allocated ({} reserved), {} unneeded, {} assemblies, {} mallocs",
        name,
        kind,
        info.nrows,
        info.ncols,
        info.nz_allocated,
        info.nz_reserved,
        info.nz_unneeded,
        info.assemblies,
        info.mallocs
    );
}
