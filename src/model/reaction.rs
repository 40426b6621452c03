use crate::error::ModelError;
use crate::expr::Expr;
use crate::model::container::{Named, TableRow};
use itertools::Itertools;
use log::info;
use std::collections::BTreeMap;

/// Rate law templates for custom reaction types, keyed by type name.
///
/// Templates refer to parameters and species through the aliases of the reaction's
/// parameter and species maps.
pub type ReactionDatabase = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactionType {
    /// Forward rate `on * prod(lhs)`, reverse rate `off * prod(rhs)`.
    MassAction,
    /// Irreversible mass action, forward rate only.
    MassActionForward,
    /// A template from the reaction database.
    Custom(String),
}

impl ReactionType {
    pub fn from_name(name: &str) -> Self {
        match name {
            "mass_action" => Self::MassAction,
            "mass_action_forward" => Self::MassActionForward,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MassAction => "mass_action",
            Self::MassActionForward => "mass_action_forward",
            Self::Custom(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reaction {
    pub name: String,
    pub lhs: Vec<String>,
    pub rhs: Vec<String>,
    /// Parameter alias to parameter name.
    pub param_map: BTreeMap<String, String>,
    /// Species alias to species name. Every species of `lhs` and `rhs` maps to itself unless
    /// given explicitly.
    pub species_map: BTreeMap<String, String>,
    pub reaction_type: ReactionType,
    pub explicit_restriction_to_domain: Option<String>,
    /// Species whose fluxes are tracked.
    pub track_value: Option<String>,
    pub group: String,
    eqn_f_str: Option<String>,
    eqn_r_str: Option<String>,
    eqn_f: Option<Expr>,
    eqn_r: Option<Expr>,
}

impl Reaction {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        lhs: impl IntoIterator<Item = S>,
        rhs: impl IntoIterator<Item = S>,
        param_map: impl IntoIterator<Item = (S, S)>,
    ) -> Self {
        let lhs: Vec<String> = lhs.into_iter().map(Into::into).collect();
        let rhs: Vec<String> = rhs.into_iter().map(Into::into).collect();
        let species_map = lhs.iter().chain(&rhs).map(|s| (s.clone(), s.clone())).collect();
        Self {
            name: name.into(),
            lhs,
            rhs,
            param_map: param_map
                .into_iter()
                .map(|(alias, name)| (alias.into(), name.into()))
                .collect(),
            species_map,
            reaction_type: ReactionType::MassAction,
            explicit_restriction_to_domain: None,
            track_value: None,
            group: String::new(),
            eqn_f_str: None,
            eqn_r_str: None,
            eqn_f: None,
            eqn_r: None,
        }
    }

    pub fn with_type(mut self, reaction_type: ReactionType) -> Self {
        self.reaction_type = reaction_type;
        self
    }

    /// Adds species aliases. Aliases not given keep mapping species names to themselves.
    pub fn with_species_map<S: Into<String>>(mut self, species_map: impl IntoIterator<Item = (S, S)>) -> Self {
        self.species_map
            .extend(species_map.into_iter().map(|(alias, name)| (alias.into(), name.into())));
        self
    }

    pub fn restricted_to(mut self, compartment: impl Into<String>) -> Self {
        self.explicit_restriction_to_domain = Some(compartment.into());
        self
    }

    pub fn tracking(mut self, species: impl Into<String>) -> Self {
        self.track_value = Some(species.into());
        self
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Overrides the forward rate law.
    pub fn with_forward_equation(mut self, eqn: impl Into<String>) -> Self {
        self.eqn_f_str = Some(eqn.into());
        self
    }

    /// Overrides the reverse rate law.
    pub fn with_reverse_equation(mut self, eqn: impl Into<String>) -> Self {
        self.eqn_r_str = Some(eqn.into());
        self
    }

    pub fn eqn_f(&self) -> Option<&Expr> {
        self.eqn_f.as_ref()
    }

    pub fn eqn_r(&self) -> Option<&Expr> {
        self.eqn_r.as_ref()
    }

    /// Builds the forward and reverse rate expressions in terms of parameter and species names.
    pub fn initialize_flux_equations(&mut self, database: &ReactionDatabase) -> Result<(), ModelError> {
        let (eqn_f, eqn_r) = match &self.reaction_type {
            ReactionType::MassAction => (
                Some(self.mass_action_rate("on", &self.lhs)?),
                Some(self.mass_action_rate("off", &self.rhs)?),
            ),
            ReactionType::MassActionForward => (Some(self.mass_action_rate("on", &self.lhs)?), None),
            ReactionType::Custom(type_name) => {
                let template = database.get(type_name).ok_or_else(|| self.invalid(format!(
                    "unknown reaction type `{}`",
                    type_name
                )))?;
                (Some(self.custom_rate(template)?), None)
            }
        };
        self.eqn_f = eqn_f;
        self.eqn_r = eqn_r;

        if let Some(eqn) = &self.eqn_f_str {
            info!("Reaction {}: using the specified equation for the forward flux: {}", self.name, eqn);
            self.eqn_f = Some(self.custom_rate(eqn)?);
        }
        if let Some(eqn) = &self.eqn_r_str {
            info!("Reaction {}: using the specified equation for the reverse flux: {}", self.name, eqn);
            self.eqn_r = Some(self.custom_rate(eqn)?);
        }
        Ok(())
    }

    fn mass_action_rate(&self, alias: &str, species: &[String]) -> Result<Expr, ModelError> {
        let parameter = self
            .param_map
            .get(alias)
            .ok_or_else(|| self.invalid(format!("mass action requires a parameter alias `{}`", alias)))?;
        let factors = std::iter::once(Expr::sym(parameter.clone())).chain(species.iter().map(|s| {
            Expr::sym(self.species_map.get(s).cloned().unwrap_or_else(|| s.clone()))
        }));
        Ok(Expr::product(factors))
    }

    fn custom_rate(&self, template: &str) -> Result<Expr, ModelError> {
        let expr = Expr::parse(template).map_err(|err| self.invalid(err.to_string()))?;
        Ok(expr.rename(&self.param_map).rename(&self.species_map))
    }

    fn invalid(&self, reason: String) -> ModelError {
        ModelError::InvalidReaction {
            name: self.name.clone(),
            reason,
        }
    }

    /// Species names in order of first appearance in `lhs` followed by `rhs`.
    pub fn unique_species(&self) -> Vec<&str> {
        self.lhs
            .iter()
            .chain(&self.rhs)
            .map(String::as_str)
            .unique()
            .collect()
    }

    /// Names of the species the reaction involves after alias resolution.
    pub fn involved_species(&self) -> Vec<&str> {
        self.species_map.values().map(String::as_str).unique().collect()
    }
}

impl Named for Reaction {
    fn name(&self) -> &str {
        &self.name
    }
}

impl TableRow for Reaction {
    fn headers() -> Vec<&'static str> {
        vec!["name", "lhs", "rhs", "type", "eqn_f", "eqn_r"]
    }

    fn row(&self) -> Vec<String> {
        let show = |e: &Option<Expr>| e.as_ref().map(|e| e.to_string()).unwrap_or_default();
        vec![
            self.name.clone(),
            self.lhs.join(" + "),
            self.rhs.join(" + "),
            self.reaction_type.name().to_string(),
            show(&self.eqn_f),
            show(&self.eqn_r),
        ]
    }
}
