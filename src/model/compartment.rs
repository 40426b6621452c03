use crate::error::ModelError;
use crate::mesh::SimplexMesh;
use crate::model::container::{Named, TableRow};
use crate::model::form::Measure;
use crate::units::Unit;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A region of the parent mesh of a given topological dimension.
#[derive(Debug, Clone)]
pub struct Compartment {
    pub name: String,
    pub dimensionality: usize,
    /// Length unit of mesh coordinates.
    pub compartment_units: Unit,
    /// Cell markers (or facet markers for lower-dimensional compartments). The first marker
    /// identifies the compartment.
    pub cell_markers: Vec<i64>,
    pub num_species: usize,
    pub is_in_a_reaction: bool,
    mesh: Option<Arc<SimplexMesh>>,
    nvolume: Option<f64>,
    /// `nvolume / other.nvolume` for every other compartment.
    pub scale_to: BTreeMap<String, f64>,
}

impl Compartment {
    pub fn new(
        name: impl Into<String>,
        dimensionality: usize,
        compartment_units: &str,
        cell_marker: i64,
    ) -> Result<Self, ModelError> {
        Self::with_markers(name, dimensionality, compartment_units, vec![cell_marker])
    }

    /// A compartment made of several marked regions.
    pub fn with_markers(
        name: impl Into<String>,
        dimensionality: usize,
        compartment_units: &str,
        cell_markers: Vec<i64>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let invalid = |reason: String| ModelError::InvalidCompartment {
            name: name.clone(),
            reason,
        };
        if !(1..=3).contains(&dimensionality) {
            return Err(invalid(format!(
                "dimensionality must be 1, 2 or 3, got {}",
                dimensionality
            )));
        }
        if cell_markers.is_empty() {
            return Err(invalid("at least one cell marker is required".to_string()));
        }
        let compartment_units = Unit::parse(compartment_units)?;
        compartment_units
            .check_dimension("m")
            .map_err(|err| invalid(format!("compartment units: {}", err)))?;

        Ok(Self {
            name,
            dimensionality,
            compartment_units,
            cell_markers,
            num_species: 0,
            is_in_a_reaction: false,
            mesh: None,
            nvolume: None,
            scale_to: BTreeMap::new(),
        })
    }

    /// The representative marker used for submesh extraction and boundary measures.
    pub fn first_index_marker(&self) -> i64 {
        self.cell_markers[0]
    }

    pub fn mesh(&self) -> Result<&Arc<SimplexMesh>, ModelError> {
        self.mesh.as_ref().ok_or_else(|| ModelError::Mesh(format!(
            "compartment `{}` has no mesh",
            self.name
        )))
    }

    pub fn has_mesh(&self) -> bool {
        self.mesh.is_some()
    }

    /// Attaches the compartment mesh and computes its scaled measure.
    pub fn set_mesh(&mut self, mesh: Arc<SimplexMesh>) -> Result<(), ModelError> {
        if mesh.topological_dim() != self.dimensionality {
            return Err(ModelError::InvalidCompartment {
                name: self.name.clone(),
                reason: format!(
                    "mesh has dimension {}, expected {}",
                    mesh.topological_dim(),
                    self.dimensionality
                ),
            });
        }
        self.nvolume = Some(mesh.measure());
        self.mesh = Some(mesh);
        Ok(())
    }

    pub fn num_vertices(&self) -> usize {
        self.mesh.as_ref().map(|m| m.num_vertices()).unwrap_or(0)
    }

    /// Length, area or volume of the compartment in SI units.
    pub fn nvolume(&self) -> Option<f64> {
        let scale = self.compartment_units.powi(self.dimensionality as i32).scale();
        self.nvolume.map(|measure| measure * scale)
    }

    /// The unit in which [`Compartment::nvolume`] is measured, `compartment_units^dim`.
    pub fn nvolume_units(&self) -> Unit {
        self.compartment_units.powi(self.dimensionality as i32)
    }

    pub fn dx(&self) -> Measure {
        Measure::Dx
    }

    /// Facet measure restricted to the facets carrying `marker`.
    pub fn ds(&self, marker: i64) -> Measure {
        Measure::Ds(marker)
    }

    pub fn dp(&self) -> Measure {
        Measure::Dp
    }
}

impl Named for Compartment {
    fn name(&self) -> &str {
        &self.name
    }
}

impl TableRow for Compartment {
    fn headers() -> Vec<&'static str> {
        vec!["name", "dimensionality", "units", "cell_markers", "num_species", "num_vertices"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.dimensionality.to_string(),
            self.compartment_units.to_string(),
            format!("{:?}", self.cell_markers),
            self.num_species.to_string(),
            self.num_vertices().to_string(),
        ]
    }
}
