use crate::error::ModelError;
use crate::model::container::{Named, TableRow};
use crate::units::Unit;

/// A chemical species living in one compartment.
#[derive(Debug, Clone, PartialEq)]
pub struct Species {
    pub name: String,
    pub initial_condition: f64,
    pub concentration_units: Unit,
    /// Diffusion coefficient, in `diffusion_units`.
    pub diffusion: f64,
    pub diffusion_units: Unit,
    pub compartment_name: String,
    pub group: String,
    /// Set by the link pass if some reaction references the species.
    pub is_in_a_reaction: bool,
    /// Position of the species within its compartment's function space. Only species that
    /// take part in a reaction receive an index.
    pub compartment_index: Option<usize>,
}

impl Species {
    /// Creates a species, validating values and units.
    ///
    /// The initial condition and diffusion coefficient must be non-negative, the diffusion
    /// units must be `[length]^2/[time]` and the concentration units `mol/[length]^d` with
    /// `d` in 1..=3.
    pub fn new(
        name: impl Into<String>,
        initial_condition: f64,
        concentration_units: &str,
        diffusion: f64,
        diffusion_units: &str,
        compartment_name: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let invalid = |reason: String| ModelError::InvalidSpecies {
            name: name.clone(),
            reason,
        };

        if !(initial_condition >= 0.0) {
            return Err(invalid(format!(
                "initial condition must be non-negative, got {}",
                initial_condition
            )));
        }
        if !(diffusion >= 0.0) {
            return Err(invalid(format!(
                "diffusion coefficient must be non-negative, got {}",
                diffusion
            )));
        }

        let diffusion_units = Unit::parse(diffusion_units)?;
        diffusion_units
            .check_dimension("m^2/s")
            .map_err(|err| invalid(format!("diffusion units: {}", err)))?;

        let concentration_units = Unit::parse(concentration_units)?;
        if concentration_dimension(&concentration_units).is_none() {
            return Err(invalid(format!(
                "concentration units {} are not of the form mol/[length]^d with d in 1..=3",
                concentration_units.dimension()
            )));
        }

        Ok(Self {
            name,
            initial_condition,
            concentration_units,
            diffusion,
            diffusion_units,
            compartment_name: compartment_name.into(),
            group: String::new(),
            is_in_a_reaction: false,
            compartment_index: None,
        })
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// The `d` in `mol/[length]^d`.
    pub fn concentration_dimension(&self) -> usize {
        concentration_dimension(&self.concentration_units).unwrap_or(0)
    }
}

fn concentration_dimension(unit: &Unit) -> Option<usize> {
    (1..=3).find(|d| unit.check_dimension(&format!("mol/m^{}", d)).is_ok())
}

impl Named for Species {
    fn name(&self) -> &str {
        &self.name
    }
}

impl TableRow for Species {
    fn headers() -> Vec<&'static str> {
        vec![
            "name",
            "compartment",
            "compartment_index",
            "concentration_units",
            "D",
            "initial_condition",
            "group",
        ]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.compartment_name.clone(),
            self.compartment_index
                .map(|i| i.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.concentration_units.to_string(),
            format!("{} {}", self.diffusion, self.diffusion_units),
            self.initial_condition.to_string(),
            self.group.clone(),
        ]
    }
}
