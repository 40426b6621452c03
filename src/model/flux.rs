//! Expansion of reactions into signed per-species fluxes and their classification.
use crate::config::{NonlinearMethod, SolverSystem};
use crate::error::{ExprError, ModelError};
use crate::expr::Expr;
use crate::model::compartment::Compartment;
use crate::model::container::{Container, Named, TableRow};
use crate::model::form::Measure;
use crate::model::parameter::Parameter;
use crate::model::reaction::Reaction;
use crate::model::species::Species;
use crate::units::Unit;
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which discrete representative of a species is bound to a symbol in a rate law.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Variant {
    /// The live solution of the current nonlinear iterate.
    Current,
    /// The unknown of a linear (implicit) term.
    Trial,
    /// The previous nonlinear iterate, held fixed.
    PriorIterate,
    /// The solution at the previous time step, held fixed.
    PriorStep,
    /// A volume unknown restricted to a boundary compartment.
    BoundaryTrace,
    /// A surface unknown seen from an adjacent volume compartment.
    VolumeExtension,
}

impl Variant {
    /// Whether the Jacobian contains derivatives with respect to this variant.
    pub fn is_differentiated(&self) -> bool {
        !matches!(self, Variant::PriorIterate | Variant::PriorStep)
    }

    /// Chooses the variant for a species of dimension `var_dim` appearing in a flux into a
    /// compartment of dimension `dest_dim`.
    ///
    /// `same_compartment` tells whether the species lives in the destination compartment and
    /// `linear_in_destination` whether the flux is linear in the destination compartment's
    /// unknowns. Returns `None` for combinations without a defined variant.
    pub fn resolve(
        method: NonlinearMethod,
        var_dim: usize,
        dest_dim: usize,
        same_compartment: bool,
        linear_in_destination: bool,
    ) -> Option<Variant> {
        match method {
            NonlinearMethod::Newton => Some(if var_dim > dest_dim {
                Variant::BoundaryTrace
            } else if var_dim < dest_dim {
                Variant::VolumeExtension
            } else {
                Variant::Current
            }),
            NonlinearMethod::Imex => {
                if same_compartment {
                    Some(if linear_in_destination {
                        Variant::Trial
                    } else {
                        Variant::PriorIterate
                    })
                } else if var_dim > dest_dim {
                    Some(Variant::BoundaryTrace)
                } else if var_dim < dest_dim {
                    Some(Variant::VolumeExtension)
                } else {
                    None
                }
            }
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Variant::Current => "u",
            Variant::Trial => "t",
            Variant::PriorIterate => "k",
            Variant::PriorStep => "n",
            Variant::BoundaryTrace => "b",
            Variant::VolumeExtension => "v",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Properties derived once compartments, species and parameters are known.
#[derive(Debug, Clone, PartialEq)]
pub struct FluxProperties {
    pub involved_species: BTreeSet<String>,
    pub involved_parameters: BTreeSet<String>,
    /// Compartment name to dimensionality.
    pub involved_compartments: BTreeMap<String, usize>,
    pub source_compartment: String,
    pub destination_compartment: String,
    /// `[source dimension, destination dimension]`.
    pub flux_dimensionality: [usize; 2],
    /// Marker of the source compartment when the flux crosses into a higher dimension.
    pub boundary_marker: Option<i64>,
    pub flux_units: Unit,
    /// Rate law with unit conversion factors between addends.
    pub unit_equation: Expr,
    /// Converts values of `unit_equation` to the units the destination residual is
    /// integrated in.
    pub scale: f64,
    pub is_linear_wrt: BTreeMap<String, bool>,
    pub is_linear_wrt_comp: BTreeMap<String, bool>,
    pub ukeys: BTreeMap<String, Variant>,
    pub measure: Measure,
    /// Compartment whose mesh the flux is integrated on.
    pub integration_compartment: String,
}

/// One signed term of a species' residual, from one direction of one reaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Flux {
    pub name: String,
    pub species_name: String,
    pub reaction_name: String,
    pub direction: Direction,
    pub equation: Expr,
    pub signed_stoich: i32,
    pub explicit_restriction_to_domain: Option<String>,
    pub track: bool,
    pub group: String,
    properties: Option<FluxProperties>,
}

/// Expands a reaction into fluxes: one per unique species and direction with a rate law.
///
/// The stoichiometric magnitude of a species is the larger of its counts on either side.
/// Consumption on the forward branch is negative and the reverse branch has inverted signs.
pub fn reaction_to_fluxes(reaction: &Reaction) -> Vec<Flux> {
    let mut fluxes = Vec::new();
    for species_name in reaction.unique_species() {
        let count = |side: &[String]| side.iter().filter(|s| *s == species_name).count() as i32;
        let stoich = count(&reaction.lhs).max(count(&reaction.rhs));
        let consumed = reaction.lhs.iter().any(|s| s == species_name);
        let track = reaction.track_value.as_deref() == Some(species_name);
        let target = reaction
            .species_map
            .get(species_name)
            .cloned()
            .unwrap_or_else(|| species_name.to_string());

        let branches = [
            (Direction::Forward, reaction.eqn_f(), "f", if consumed { -1 } else { 1 }),
            (Direction::Reverse, reaction.eqn_r(), "r", if consumed { 1 } else { -1 }),
        ];
        for (direction, equation, tag, sign) in branches {
            if let Some(equation) = equation {
                fluxes.push(Flux {
                    name: format!("{}_{}_{}", reaction.name, tag, species_name),
                    species_name: target.clone(),
                    reaction_name: reaction.name.clone(),
                    direction,
                    equation: equation.clone(),
                    signed_stoich: sign * stoich,
                    explicit_restriction_to_domain: reaction.explicit_restriction_to_domain.clone(),
                    track,
                    group: reaction.group.clone(),
                    properties: None,
                });
            }
        }
    }
    fluxes
}

impl Flux {
    pub fn properties(&self) -> Result<&FluxProperties, ModelError> {
        self.properties.as_ref().ok_or(ModelError::NotInitialized)
    }

    pub fn is_boundary_flux(&self) -> bool {
        self.properties
            .as_ref()
            .map(|p| p.boundary_marker.is_some())
            .unwrap_or(false)
    }

    /// Resolves compartments, units, linearity, evaluation variants and the integration
    /// measure of the flux.
    pub fn get_additional_properties(
        &mut self,
        species: &Container<Species>,
        compartments: &Container<Compartment>,
        parameters: &Container<Parameter>,
        solver_system: &SolverSystem,
    ) -> Result<(), ModelError> {
        let destination_species = species.try_get(&self.species_name)?;
        let destination = compartments.try_get(&destination_species.compartment_name)?;

        // Involved species, parameters and compartments
        let mut involved_species = BTreeSet::new();
        let mut involved_parameters = BTreeSet::new();
        for symbol in self.equation.free_symbols() {
            if species.contains(&symbol) {
                involved_species.insert(symbol);
            } else if parameters.contains(&symbol) {
                involved_parameters.insert(symbol);
            } else {
                return Err(self.expression_error(ExprError::UnknownSymbol(symbol)));
            }
        }
        let species_symbols: Vec<String> = involved_species.iter().cloned().collect();
        involved_species.insert(self.species_name.clone());

        let mut involved_compartments = BTreeMap::new();
        for name in &involved_species {
            let compartment = compartments.try_get(&species.try_get(name)?.compartment_name)?;
            involved_compartments.insert(compartment.name.clone(), compartment.dimensionality);
        }
        if let Some(restriction) = &self.explicit_restriction_to_domain {
            let compartment = compartments.try_get(restriction)?;
            involved_compartments.insert(compartment.name.clone(), compartment.dimensionality);
        }
        if !(1..=2).contains(&involved_compartments.len()) {
            return Err(ModelError::CompartmentCount {
                flux: self.name.clone(),
                count: involved_compartments.len(),
                compartments: involved_compartments.keys().join(", "),
            });
        }

        // Flux dimensionality
        let dest_dim = destination.dimensionality;
        let source = involved_compartments
            .iter()
            .find(|(name, _)| **name != destination.name);
        let (source_compartment, source_dim) = match source {
            None => (destination.name.clone(), dest_dim),
            Some((name, dim)) => {
                if (*dim as i64 - dest_dim as i64).abs() != 1 {
                    return Err(self.internal_error(
                        name,
                        "coupled compartments must differ in dimension by exactly one",
                    ));
                }
                (name.clone(), *dim)
            }
        };
        let flux_dimensionality = [source_dim, dest_dim];

        let boundary_marker = if dest_dim > source_dim {
            Some(compartments.try_get(&source_compartment)?.first_index_marker())
        } else {
            None
        };

        // Units
        let comp_units = destination.compartment_units;
        let conc = destination_species.concentration_units;
        let seconds = Unit::parse("s")?;
        let (flux_units, integration_units) = if boundary_marker.is_some() {
            (conc / comp_units * destination_species.diffusion_units, conc * comp_units / seconds)
        } else {
            (conc / seconds, conc / seconds)
        };
        let symbol_units = |s: &str| {
            species
                .get(s)
                .map(|sp| sp.concentration_units)
                .or_else(|| parameters.get(s).map(|p| p.unit))
        };
        let (unit_equation, derived_units) = self
            .equation
            .with_units(&symbol_units)
            .map_err(|err| self.expression_error(err))?;
        let scale = derived_units
            .conversion_factor_to(&integration_units)
            .map_err(|_| ModelError::FluxUnits {
                flux: self.name.clone(),
                derived: derived_units.dimension().to_string(),
                expected: flux_units.dimension().to_string(),
            })?;

        // Linearity
        let is_linear_wrt: BTreeMap<String, bool> = species_symbols
            .iter()
            .map(|s| (s.clone(), self.equation.is_linear_in(s)))
            .collect();
        let compartment_unknown = |compartment: &str| format!("u{}", compartment);
        let substituted = self.equation.substitute(&|s: &str| {
            species
                .get(s)
                .filter(|_| species_symbols.iter().any(|name| name == s))
                .map(|sp| Expr::sym(compartment_unknown(&sp.compartment_name)))
        });
        let is_linear_wrt_comp: BTreeMap<String, bool> = involved_compartments
            .keys()
            .map(|c| (c.clone(), substituted.is_linear_in(&compartment_unknown(c))))
            .collect();

        // Evaluation variants
        let linear_in_destination = is_linear_wrt_comp
            .get(&destination.name)
            .copied()
            .unwrap_or(true);
        let mut ukeys = BTreeMap::new();
        for name in &species_symbols {
            let var = species.try_get(name)?;
            let var_dim = compartments.try_get(&var.compartment_name)?.dimensionality;
            let variant = Variant::resolve(
                solver_system.nonlinear.method,
                var_dim,
                dest_dim,
                var.compartment_name == destination.name,
                linear_in_destination,
            )
            .ok_or_else(|| self.internal_error(&var.compartment_name, "no evaluation variant matches this coupling"))?;
            ukeys.insert(name.clone(), variant);
        }

        // Integration measure
        let dims = compartments.iter().map(|c| c.dimensionality);
        let (min_dim, max_dim) = match dims.minmax().into_option() {
            Some(range) => range,
            None => return Err(self.internal_error(&destination.name, "no compartments")),
        };
        let (measure, integration_compartment) = if let Some(marker) = boundary_marker {
            (destination.ds(marker), source_compartment.clone())
        } else if source_dim == dest_dim && dest_dim == max_dim {
            (destination.dx(), destination.name.clone())
        } else if dest_dim == min_dim && min_dim < max_dim {
            let measure = if solver_system.ignore_surface_diffusion {
                destination.dp()
            } else {
                destination.dx()
            };
            (measure, destination.name.clone())
        } else {
            return Err(self.internal_error(
                &destination.name,
                "no integration measure for a flux with this dimensionality",
            ));
        };

        self.properties = Some(FluxProperties {
            involved_species,
            involved_parameters,
            involved_compartments,
            source_compartment,
            destination_compartment: destination.name.clone(),
            flux_dimensionality,
            boundary_marker,
            flux_units,
            unit_equation,
            scale,
            is_linear_wrt,
            is_linear_wrt_comp,
            ukeys,
            measure,
            integration_compartment,
        });
        Ok(())
    }

    fn expression_error(&self, source: ExprError) -> ModelError {
        ModelError::FluxExpression {
            flux: self.name.clone(),
            source,
        }
    }

    fn internal_error(&self, compartment: &str, reason: &str) -> ModelError {
        ModelError::InternalLogic {
            flux: self.name.clone(),
            species: self.species_name.clone(),
            compartment: compartment.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl Named for Flux {
    fn name(&self) -> &str {
        &self.name
    }
}

impl TableRow for Flux {
    fn headers() -> Vec<&'static str> {
        vec!["name", "species", "equation", "signed_stoich", "dimensionality", "ukeys"]
    }

    fn row(&self) -> Vec<String> {
        let (dimensionality, ukeys) = match &self.properties {
            Some(p) => (
                format!("{:?}", p.flux_dimensionality),
                p.ukeys.iter().map(|(s, v)| format!("{}:{}", s, v)).join(", "),
            ),
            None => (String::new(), String::new()),
        };
        vec![
            self.name.clone(),
            self.species_name.clone(),
            self.equation.to_string(),
            self.signed_stoich.to_string(),
            dimensionality,
            ukeys,
        ]
    }
}
