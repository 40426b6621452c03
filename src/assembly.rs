//! Compilation of weak forms into residual and Jacobian sub-forms, and their assembly.
//!
//! Every sub-form belongs to one integration domain, identified by the compartment whose
//! mesh carries the integral. All compartment meshes are submeshes of the same parent mesh,
//! so a vertex of the integration mesh is mapped to degrees of freedom of any other
//! compartment through its parent vertex index.
//!
//! Element contributions are computed in parallel and scattered into the global vectors and
//! matrices sequentially in cell order, so assembly is deterministic.
use crate::element::p1_mass_entry;
use crate::error::{AssemblyError, ModelError};
use crate::expr::{CompiledExpr, Expr};
use crate::mesh::SimplexMesh;
use crate::model::container::Container;
use crate::model::flux::{Flux, Variant};
use crate::model::form::{Form, FormContainer, FormKind};
use crate::model::parameter::Parameter;
use crate::model::species::Species;
use crate::quadrature::{simplex_degree2, QuadraturePair};
use crate::space::{CompartmentFunctions, FunctionSpace};
use nalgebra::{DVector, Vector3};
use nalgebra_sparse::CsrMatrix;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

/// The source of the value bound to one symbol of a compiled rate law.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Index into the parameter value table.
    Parameter(usize),
    Species {
        space: usize,
        component: usize,
        variant: Variant,
    },
}

/// A compiled rate law, or one of its partial derivatives, with the sources of its symbols.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLaw {
    expr: CompiledExpr,
    bindings: Arc<[Binding]>,
}

impl RateLaw {
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn is_zero(&self) -> bool {
        self.expr.is_zero()
    }
}

/// How a term is integrated over its domain.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Integration {
    /// Cell-wise quadrature.
    Cells,
    /// A sum over the vertices of the domain.
    Vertices,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResidualTerm {
    /// `coefficient * (u - u_n) / dt * v`
    Mass {
        component: usize,
        coefficient: f64,
        integration: Integration,
    },
    /// `coefficient * grad(u) . grad(v)`
    Diffusion { component: usize, coefficient: f64 },
    /// `coefficient * f * v`
    Reaction {
        label: String,
        component: usize,
        coefficient: f64,
        rate: RateLaw,
        integration: Integration,
    },
}

impl ResidualTerm {
    fn integration(&self) -> Integration {
        match self {
            ResidualTerm::Mass { integration, .. } | ResidualTerm::Reaction { integration, .. } => *integration,
            ResidualTerm::Diffusion { .. } => Integration::Cells,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum JacobianTerm {
    Mass {
        component: usize,
        coefficient: f64,
        integration: Integration,
    },
    Stiffness { component: usize, coefficient: f64 },
    /// `coefficient * df/du_col * u_col * v_row`
    ReactionDerivative {
        label: String,
        row_component: usize,
        col_component: usize,
        coefficient: f64,
        derivative: RateLaw,
        integration: Integration,
    },
}

impl JacobianTerm {
    fn integration(&self) -> Integration {
        match self {
            JacobianTerm::Mass { integration, .. } | JacobianTerm::ReactionDerivative { integration, .. } => {
                *integration
            }
            JacobianTerm::Stiffness { .. } => Integration::Cells,
        }
    }
}

/// A compartment mesh over which sub-forms are integrated.
#[derive(Debug, Clone)]
pub struct Domain {
    pub name: String,
    pub mesh: Arc<SimplexMesh>,
}

/// Residual contributions of one function space integrated over one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualSubForm {
    pub row_space: usize,
    pub domain: usize,
    pub terms: Vec<ResidualTerm>,
}

/// Jacobian contributions coupling two function spaces, integrated over one domain.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianSubForm {
    pub row_space: usize,
    pub col_space: usize,
    pub domain: usize,
    pub terms: Vec<JacobianTerm>,
}

impl ResidualSubForm {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl JacobianSubForm {
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

/// Everything that varies between assemblies: the discrete functions, parameter values and
/// the time step.
#[derive(Debug, Copy, Clone)]
pub struct AssemblyState<'a> {
    pub spaces: &'a [FunctionSpace],
    pub functions: &'a [CompartmentFunctions],
    pub parameters: &'a [f64],
    pub dt: f64,
}

/// Sub-forms indexed as `residual[i][k]` and `jacobian[i][j][k]`, with `i`, `j` function
/// spaces and `k` domains.
#[derive(Debug, Clone)]
pub struct CompiledForms {
    pub residual: Vec<Vec<ResidualSubForm>>,
    pub jacobian: Vec<Vec<Vec<JacobianSubForm>>>,
}

struct FormCompiler<'a> {
    fluxes: &'a Container<Flux>,
    species: &'a Container<Species>,
    parameters: &'a Container<Parameter>,
    spaces: &'a [FunctionSpace],
    domains: &'a [Domain],
}

/// Splits every form into sub-forms by row space, column space and integration domain.
///
/// Reaction forms are differentiated symbolically with respect to every species whose
/// variant takes part in the Jacobian. Species evaluated at the previous iterate or time step
/// contribute only to the residual.
pub fn compile_forms(
    forms: &FormContainer,
    fluxes: &Container<Flux>,
    species: &Container<Species>,
    parameters: &Container<Parameter>,
    spaces: &[FunctionSpace],
    domains: &[Domain],
) -> Result<CompiledForms, ModelError> {
    let compiler = FormCompiler {
        fluxes,
        species,
        parameters,
        spaces,
        domains,
    };
    let (n, m) = (spaces.len(), domains.len());

    let mut residual: Vec<Vec<ResidualSubForm>> = (0..n)
        .map(|i| {
            (0..m)
                .map(|k| ResidualSubForm {
                    row_space: i,
                    domain: k,
                    terms: Vec::new(),
                })
                .collect()
        })
        .collect();
    let mut jacobian: Vec<Vec<Vec<JacobianSubForm>>> = (0..n)
        .map(|i| {
            (0..n)
                .map(|j| {
                    (0..m)
                        .map(|k| JacobianSubForm {
                            row_space: i,
                            col_space: j,
                            domain: k,
                            terms: Vec::new(),
                        })
                        .collect()
                })
                .collect()
        })
        .collect();

    for form in forms.iter() {
        let (i, component) = compiler.species_location(&form.species_name)?;
        let k = compiler.domain_index(&form.integration_compartment)?;
        let integration = if form.measure.is_pointwise() {
            Integration::Vertices
        } else {
            Integration::Cells
        };

        match form.kind {
            FormKind::Mass => {
                residual[i][k].terms.push(ResidualTerm::Mass {
                    component,
                    coefficient: form.coefficient,
                    integration,
                });
                jacobian[i][i][k].terms.push(JacobianTerm::Mass {
                    component,
                    coefficient: form.coefficient,
                    integration,
                });
            }
            FormKind::Diffusion => {
                residual[i][k].terms.push(ResidualTerm::Diffusion {
                    component,
                    coefficient: form.coefficient,
                });
                jacobian[i][i][k].terms.push(JacobianTerm::Stiffness {
                    component,
                    coefficient: form.coefficient,
                });
            }
            FormKind::DomainReaction | FormKind::BoundaryReaction => {
                let (rate, derivatives) = compiler.compile_reaction(form)?;
                let label = form.flux_name.clone().unwrap_or_default();
                residual[i][k].terms.push(ResidualTerm::Reaction {
                    label: label.clone(),
                    component,
                    coefficient: form.coefficient,
                    rate,
                    integration,
                });
                for (j, col_component, derivative) in derivatives {
                    jacobian[i][j][k].terms.push(JacobianTerm::ReactionDerivative {
                        label: label.clone(),
                        row_component: component,
                        col_component,
                        coefficient: form.coefficient,
                        derivative,
                        integration,
                    });
                }
            }
        }
    }

    Ok(CompiledForms { residual, jacobian })
}

impl<'a> FormCompiler<'a> {
    fn species_location(&self, name: &str) -> Result<(usize, usize), ModelError> {
        let species = self.species.try_get(name)?;
        let space = self
            .spaces
            .iter()
            .position(|s| s.compartment_name() == species.compartment_name)
            .ok_or_else(|| ModelError::Unknown {
                kind: "function space",
                name: species.compartment_name.clone(),
            })?;
        let component = species.compartment_index.ok_or(ModelError::NotInitialized)?;
        Ok((space, component))
    }

    fn domain_index(&self, compartment: &str) -> Result<usize, ModelError> {
        self.domains
            .iter()
            .position(|d| d.name == compartment)
            .ok_or_else(|| ModelError::Unknown {
                kind: "integration domain",
                name: compartment.to_string(),
            })
    }

    /// Compiles the rate law of a reaction form and its nonzero derivatives, the latter
    /// tagged with the column space and component they belong to.
    #[allow(clippy::type_complexity)]
    fn compile_reaction(&self, form: &Form) -> Result<(RateLaw, Vec<(usize, usize, RateLaw)>), ModelError> {
        let flux_name = form.flux_name.as_deref().unwrap_or_default();
        let flux = self.fluxes.try_get(flux_name)?;
        let properties = flux.properties()?;

        let mut symbols = Vec::new();
        let mut bindings = Vec::new();
        for parameter in &properties.involved_parameters {
            let index = self
                .parameters
                .index_of(parameter)
                .ok_or_else(|| ModelError::Unknown {
                    kind: "parameter",
                    name: parameter.clone(),
                })?;
            symbols.push(parameter.clone());
            bindings.push(Binding::Parameter(index));
        }
        for (species, variant) in &properties.ukeys {
            let (space, component) = self.species_location(species)?;
            symbols.push(species.clone());
            bindings.push(Binding::Species {
                space,
                component,
                variant: *variant,
            });
        }
        let bindings: Arc<[Binding]> = bindings.into();

        let compile = |expr: &Expr| -> Result<RateLaw, ModelError> {
            let expr = expr.compile(&symbols).map_err(|source| ModelError::FluxExpression {
                flux: flux.name.clone(),
                source,
            })?;
            Ok(RateLaw {
                expr,
                bindings: Arc::clone(&bindings),
            })
        };

        let rate = compile(&properties.unit_equation)?;
        let mut derivatives = Vec::new();
        for (species, variant) in &properties.ukeys {
            if !variant.is_differentiated() {
                continue;
            }
            let (space, component) = self.species_location(species)?;
            let derivative = compile(&properties.unit_equation.diff(species))?;
            if !derivative.is_zero() {
                derivatives.push((space, component, derivative));
            }
        }
        Ok((rate, derivatives))
    }
}

/// Geometry and quadrature of one integration unit: a cell, or a single vertex for
/// vertex-wise sums.
struct Patch<'r> {
    /// Parent vertex indices of the unit's vertices.
    parents: Vec<usize>,
    measure: f64,
    gradients: Vec<Vector3<f64>>,
    rule: &'r QuadraturePair,
    lumped: bool,
}

impl<'r> Patch<'r> {
    fn cell(mesh: &SimplexMesh, cell: usize, rule: &'r QuadraturePair, needs_gradients: bool) -> Result<Self, LocalError> {
        let simplex = mesh.simplex(cell);
        let measure = simplex.measure();
        let gradients = if needs_gradients {
            simplex
                .basis_gradients()
                .ok_or(LocalError::Degenerate { cell })?
        } else {
            Vec::new()
        };
        if measure <= 0.0 || measure.is_nan() {
            return Err(LocalError::Degenerate { cell });
        }
        let parents = mesh
            .cell(cell)
            .iter()
            .map(|v| mesh.parent_vertex_indices()[*v])
            .collect();
        Ok(Self {
            parents,
            measure,
            gradients,
            rule,
            lumped: false,
        })
    }

    fn vertex(mesh: &SimplexMesh, vertex: usize, rule: &'r QuadraturePair) -> Self {
        Self {
            parents: vec![mesh.parent_vertex_indices()[vertex]],
            measure: 1.0,
            gradients: Vec::new(),
            rule,
            lumped: true,
        }
    }

    fn num_vertices(&self) -> usize {
        self.parents.len()
    }

    fn mass(&self, a: usize, b: usize) -> f64 {
        if self.lumped {
            if a == b {
                self.measure
            } else {
                0.0
            }
        } else {
            p1_mass_entry(self.num_vertices() - 1, self.measure, a, b)
        }
    }

    fn dofs(&self, state: &AssemblyState, space: usize, component: usize) -> Result<Vec<usize>, LocalError> {
        self.parents
            .iter()
            .map(|p| {
                state.spaces[space]
                    .dof_for_parent(*p, component)
                    .ok_or(LocalError::MissingDof {
                        parent_vertex: *p,
                        space,
                    })
            })
            .collect()
    }

    /// Values of every binding of `law` at every quadrature point, as `[point][binding]`.
    fn quadrature_values(&self, law: &RateLaw, state: &AssemblyState) -> Result<Vec<Vec<f64>>, LocalError> {
        let mut vertex_values = Vec::with_capacity(law.bindings.len());
        for binding in law.bindings.iter() {
            let values = match binding {
                Binding::Parameter(index) => vec![state.parameters[*index]; self.num_vertices()],
                Binding::Species {
                    space,
                    component,
                    variant,
                } => {
                    let vector = state.functions[*space].vector(*variant);
                    self.dofs(state, *space, *component)?
                        .into_iter()
                        .map(|dof| vector[dof])
                        .collect()
                }
            };
            vertex_values.push(values);
        }

        let (_, points) = self.rule;
        Ok(points
            .iter()
            .map(|lambda| {
                vertex_values
                    .iter()
                    .map(|values| values.iter().zip(lambda).map(|(v, l)| v * l).sum())
                    .collect()
            })
            .collect())
    }

    fn residual(&self, terms: &[&ResidualTerm], row_space: usize, state: &AssemblyState) -> Result<Vec<(usize, f64)>, LocalError> {
        let n = self.num_vertices();
        let (weights, points) = self.rule;
        let mut entries = Vec::new();
        for term in terms {
            match term {
                ResidualTerm::Mass {
                    component,
                    coefficient,
                    ..
                } => {
                    let dofs = self.dofs(state, row_space, *component)?;
                    let functions = &state.functions[row_space];
                    for a in 0..n {
                        let value: f64 = (0..n)
                            .map(|b| self.mass(a, b) * (functions.u[dofs[b]] - functions.n[dofs[b]]))
                            .sum();
                        entries.push((dofs[a], coefficient * value / state.dt));
                    }
                }
                ResidualTerm::Diffusion { component, coefficient } => {
                    let dofs = self.dofs(state, row_space, *component)?;
                    let u = &state.functions[row_space].u;
                    let grad_u: Vector3<f64> = (0..n).map(|b| self.gradients[b] * u[dofs[b]]).sum();
                    for a in 0..n {
                        entries.push((dofs[a], coefficient * self.measure * self.gradients[a].dot(&grad_u)));
                    }
                }
                ResidualTerm::Reaction {
                    label,
                    component,
                    coefficient,
                    rate,
                    ..
                } => {
                    let dofs = self.dofs(state, row_space, *component)?;
                    let values = self.quadrature_values(rate, state)?;
                    let mut local = vec![0.0; n];
                    for ((w, lambda), values) in weights.iter().zip(points).zip(&values) {
                        let f = rate.expr.eval(values);
                        if !f.is_finite() {
                            return Err(LocalError::NonFinite { label: label.clone() });
                        }
                        for a in 0..n {
                            local[a] += coefficient * w * self.measure * f * lambda[a];
                        }
                    }
                    entries.extend(dofs.into_iter().zip(local));
                }
            }
        }
        Ok(entries)
    }

    fn jacobian(
        &self,
        terms: &[&JacobianTerm],
        row_space: usize,
        col_space: usize,
        state: &AssemblyState,
    ) -> Result<Vec<(usize, usize, f64)>, LocalError> {
        let n = self.num_vertices();
        let (weights, points) = self.rule;
        let mut entries = Vec::new();
        for term in terms {
            match term {
                JacobianTerm::Mass {
                    component,
                    coefficient,
                    ..
                } => {
                    let dofs = self.dofs(state, row_space, *component)?;
                    for a in 0..n {
                        for b in 0..n {
                            entries.push((dofs[a], dofs[b], coefficient * self.mass(a, b) / state.dt));
                        }
                    }
                }
                JacobianTerm::Stiffness { component, coefficient } => {
                    let dofs = self.dofs(state, row_space, *component)?;
                    for a in 0..n {
                        for b in 0..n {
                            let value = coefficient * self.measure * self.gradients[a].dot(&self.gradients[b]);
                            entries.push((dofs[a], dofs[b], value));
                        }
                    }
                }
                JacobianTerm::ReactionDerivative {
                    label,
                    row_component,
                    col_component,
                    coefficient,
                    derivative,
                    ..
                } => {
                    let rows = self.dofs(state, row_space, *row_component)?;
                    let cols = self.dofs(state, col_space, *col_component)?;
                    let values = self.quadrature_values(derivative, state)?;
                    let mut local = vec![0.0; n * n];
                    for ((w, lambda), values) in weights.iter().zip(points).zip(&values) {
                        let df = derivative.expr.eval(values);
                        if !df.is_finite() {
                            return Err(LocalError::NonFinite { label: label.clone() });
                        }
                        for a in 0..n {
                            for b in 0..n {
                                local[a * n + b] += coefficient * w * self.measure * df * lambda[a] * lambda[b];
                            }
                        }
                    }
                    for a in 0..n {
                        for b in 0..n {
                            entries.push((rows[a], cols[b], local[a * n + b]));
                        }
                    }
                }
            }
        }
        Ok(entries)
    }
}

/// Errors raised inside parallel element loops, converted to [`AssemblyError`] afterwards.
#[derive(Debug)]
enum LocalError {
    MissingDof { parent_vertex: usize, space: usize },
    Degenerate { cell: usize },
    NonFinite { label: String },
}

impl LocalError {
    fn into_assembly_error(self, domain: &Domain, spaces: &[FunctionSpace]) -> AssemblyError {
        match self {
            LocalError::MissingDof { parent_vertex, space } => AssemblyError::MissingDof {
                parent_vertex,
                compartment: spaces[space].compartment_name().to_string(),
            },
            LocalError::Degenerate { cell } => AssemblyError::DegenerateCell {
                compartment: domain.name.clone(),
                cell,
            },
            LocalError::NonFinite { label } => AssemblyError::NonFinite(label),
        }
    }
}

/// Computes local contributions of every cell (or vertex) of the domain in parallel and
/// concatenates them in mesh order.
fn collect_local<E, F>(domain: &Domain, integration: Integration, needs_gradients: bool, local: F) -> Result<Vec<E>, LocalError>
where
    E: Send,
    F: Fn(&Patch) -> Result<Vec<E>, LocalError> + Sync,
{
    let mesh = &domain.mesh;
    let chunks: Vec<Vec<E>> = match integration {
        Integration::Cells => {
            let rule = simplex_degree2(mesh.topological_dim());
            (0..mesh.num_cells())
                .into_par_iter()
                .map(|cell| local(&Patch::cell(mesh, cell, &rule, needs_gradients)?))
                .collect::<Result<Vec<Vec<E>>, LocalError>>()?
        }
        Integration::Vertices => {
            let rule: QuadraturePair = (vec![1.0], vec![vec![1.0]]);
            (0..mesh.num_vertices())
                .into_par_iter()
                .map(|vertex| local(&Patch::vertex(mesh, vertex, &rule)))
                .collect::<Result<Vec<Vec<E>>, LocalError>>()?
        }
    };
    Ok(chunks.into_iter().flatten().collect())
}

impl ResidualSubForm {
    /// Adds the sub-form's contribution to `output`, a vector of the row space.
    pub fn assemble_into(
        &self,
        output: &mut DVector<f64>,
        domain: &Domain,
        state: &AssemblyState,
    ) -> Result<(), AssemblyError> {
        for integration in [Integration::Cells, Integration::Vertices] {
            let terms: Vec<&ResidualTerm> = self
                .terms
                .iter()
                .filter(|t| t.integration() == integration)
                .collect();
            if terms.is_empty() {
                continue;
            }
            let needs_gradients = terms.iter().any(|t| matches!(t, ResidualTerm::Diffusion { .. }));
            let entries = collect_local(domain, integration, needs_gradients, |patch| {
                patch.residual(&terms, self.row_space, state)
            })
            .map_err(|err| err.into_assembly_error(domain, state.spaces))?;
            for (i, value) in entries {
                output[i] += value;
            }
        }
        Ok(())
    }
}

impl JacobianSubForm {
    /// All local contributions as `(row, col, value)` triplets, in mesh order.
    pub fn triplets(&self, domain: &Domain, state: &AssemblyState) -> Result<Vec<(usize, usize, f64)>, AssemblyError> {
        let mut triplets = Vec::new();
        for integration in [Integration::Cells, Integration::Vertices] {
            let terms: Vec<&JacobianTerm> = self
                .terms
                .iter()
                .filter(|t| t.integration() == integration)
                .collect();
            if terms.is_empty() {
                continue;
            }
            let needs_gradients = terms.iter().any(|t| matches!(t, JacobianTerm::Stiffness { .. }));
            let entries = collect_local(domain, integration, needs_gradients, |patch| {
                patch.jacobian(&terms, self.row_space, self.col_space, state)
            })
            .map_err(|err| err.into_assembly_error(domain, state.spaces))?;
            triplets.extend(entries);
        }
        Ok(triplets)
    }

    /// Assembles the sub-form into a new matrix whose pattern contains every entry the
    /// sub-form can produce, regardless of its current value.
    pub fn assemble(&self, domain: &Domain, state: &AssemblyState) -> Result<CsrMatrix<f64>, AssemblyError> {
        let nrows = state.spaces[self.row_space].dim();
        let ncols = state.spaces[self.col_space].dim();
        let triplets = self.triplets(domain, state)?;
        let mut matrix = csr_from_pattern(nrows, ncols, triplets.iter().map(|(i, j, _)| (*i, *j)))?;
        add_triplets_to_csr(&mut matrix, &triplets)?;
        Ok(matrix)
    }

    /// Reassembles the sub-form into a matrix previously created by
    /// [`JacobianSubForm::assemble`], reusing its pattern.
    pub fn assemble_into(
        &self,
        matrix: &mut CsrMatrix<f64>,
        domain: &Domain,
        state: &AssemblyState,
    ) -> Result<(), AssemblyError> {
        let triplets = self.triplets(domain, state)?;
        matrix.values_mut().iter_mut().for_each(|v| *v = 0.0);
        add_triplets_to_csr(matrix, &triplets)
    }
}

/// Builds a zero matrix whose pattern holds exactly the given entries.
pub fn csr_from_pattern(
    nrows: usize,
    ncols: usize,
    entries: impl IntoIterator<Item = (usize, usize)>,
) -> Result<CsrMatrix<f64>, AssemblyError> {
    // The set stores each entry once, however many cells share it
    let matrix_entries: BTreeSet<(usize, usize)> = entries.into_iter().collect();

    let mut offsets = Vec::with_capacity(nrows + 1);
    let mut column_indices = Vec::with_capacity(matrix_entries.len());
    offsets.push(0);
    for (i, j) in matrix_entries {
        while i + 1 > offsets.len() {
            // Consecutive empty rows
            offsets.push(column_indices.len());
        }
        column_indices.push(j);
    }
    while offsets.len() < nrows + 1 {
        offsets.push(column_indices.len());
    }

    let values = vec![0.0; column_indices.len()];
    CsrMatrix::try_from_csr_data(nrows, ncols, offsets, column_indices, values)
        .map_err(|err| AssemblyError::Pattern(err.to_string()))
}

/// Adds triplets to a matrix whose pattern already contains every entry.
pub fn add_triplets_to_csr(matrix: &mut CsrMatrix<f64>, triplets: &[(usize, usize, f64)]) -> Result<(), AssemblyError> {
    for (i, j, v) in triplets {
        let mut row = matrix.row_mut(*i);
        let (cols, values) = row.cols_and_values_mut();
        match cols.binary_search(j) {
            Ok(pos) => values[pos] += *v,
            Err(_) => {
                return Err(AssemblyError::Pattern(format!(
                    "entry ({}, {}) is not part of the pattern",
                    i, j
                )))
            }
        }
    }
    Ok(())
}
