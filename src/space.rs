//! P1 vector function spaces on compartment meshes and the discrete solution vectors.
use crate::error::ModelError;
use crate::mesh::SimplexMesh;
use crate::model::flux::Variant;
use crate::parallel::Communicator;
use nalgebra::DVector;
use rustc_hash::FxHashMap;
use std::iter::StepBy;
use std::ops::Range;
use std::sync::Arc;
use stubs_sparse::layout::{BlockLayout, IndexMap};

/// A continuous piecewise linear space with one component per species of a compartment.
///
/// Degrees of freedom are interleaved by vertex: the dof of component `c` at local vertex
/// `v` is `v * num_species + c`.
#[derive(Debug, Clone)]
pub struct FunctionSpace {
    compartment_name: String,
    mesh: Arc<SimplexMesh>,
    num_species: usize,
    layout: BlockLayout,
    parent_to_local: FxHashMap<usize, usize>,
}

impl FunctionSpace {
    /// Creates the space and its layout. This is a collective operation.
    pub fn new(
        compartment_name: impl Into<String>,
        mesh: Arc<SimplexMesh>,
        num_species: usize,
        comm: &dyn Communicator,
    ) -> Result<Self, ModelError> {
        let local_size = mesh.num_vertices() * num_species;
        let global_size = comm.all_reduce_sum_usize(local_size);
        let start = comm.exclusive_scan_sum_usize(local_size);
        let layout = BlockLayout::distributed(
            local_size,
            global_size,
            num_species,
            start,
            IndexMap::contiguous(start, local_size),
        )?;
        let parent_to_local = mesh
            .parent_vertex_indices()
            .iter()
            .enumerate()
            .map(|(local, parent)| (*parent, local))
            .collect();
        Ok(Self {
            compartment_name: compartment_name.into(),
            mesh,
            num_species,
            layout,
            parent_to_local,
        })
    }

    pub fn compartment_name(&self) -> &str {
        &self.compartment_name
    }

    pub fn mesh(&self) -> &Arc<SimplexMesh> {
        &self.mesh
    }

    pub fn num_species(&self) -> usize {
        self.num_species
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Number of locally stored degrees of freedom.
    pub fn dim(&self) -> usize {
        self.layout.local_size()
    }

    pub fn local_vertex(&self, parent_vertex: usize) -> Option<usize> {
        self.parent_to_local.get(&parent_vertex).copied()
    }

    pub fn dof(&self, local_vertex: usize, component: usize) -> usize {
        local_vertex * self.num_species + component
    }

    /// The dof of `component` at the vertex extracted from `parent_vertex`, if the
    /// compartment contains that vertex.
    pub fn dof_for_parent(&self, parent_vertex: usize, component: usize) -> Option<usize> {
        self.local_vertex(parent_vertex)
            .map(|v| self.dof(v, component))
    }

    /// The dofs of one species, in vertex order.
    pub fn species_dofs(&self, component: usize) -> StepBy<Range<usize>> {
        (component..self.dim()).step_by(self.num_species.max(1))
    }
}

/// Solution vectors of one compartment.
#[derive(Debug, Clone, PartialEq)]
pub struct CompartmentFunctions {
    /// Current iterate, also used for trial, trace and extension variants.
    pub u: DVector<f64>,
    /// Previous nonlinear iterate.
    pub k: DVector<f64>,
    /// Solution at the previous time step.
    pub n: DVector<f64>,
}

impl CompartmentFunctions {
    pub fn zeros(dim: usize) -> Self {
        Self {
            u: DVector::zeros(dim),
            k: DVector::zeros(dim),
            n: DVector::zeros(dim),
        }
    }

    /// Sets all three vectors to the given per-species constants.
    pub fn from_initial_conditions(space: &FunctionSpace, initial: &[f64]) -> Self {
        let mut functions = Self::zeros(space.dim());
        for (component, value) in initial.iter().enumerate() {
            for dof in space.species_dofs(component) {
                functions.u[dof] = *value;
            }
        }
        functions.k.copy_from(&functions.u);
        functions.n.copy_from(&functions.u);
        functions
    }

    pub fn vector(&self, variant: Variant) -> &DVector<f64> {
        match variant {
            Variant::Current | Variant::Trial | Variant::BoundaryTrace | Variant::VolumeExtension => &self.u,
            Variant::PriorIterate => &self.k,
            Variant::PriorStep => &self.n,
        }
    }

    /// Values of one species of the current iterate.
    pub fn species_values(&self, space: &FunctionSpace, component: usize) -> Vec<f64> {
        space
            .species_dofs(component)
            .map(|dof| self.u[dof])
            .collect()
    }
}
