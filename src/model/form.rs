use itertools::Itertools;
use log::info;
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FormKind {
    /// Time derivative `(u - u_n) / dt * v`.
    Mass,
    /// `D grad(u) . grad(v)`.
    Diffusion,
    /// Reaction term integrated over the compartment itself.
    DomainReaction,
    /// Reaction term integrated over a boundary of the compartment.
    BoundaryReaction,
}

impl fmt::Display for FormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            FormKind::Mass => "M",
            FormKind::Diffusion => "D",
            FormKind::DomainReaction => "R",
            FormKind::BoundaryReaction => "B",
        };
        write!(f, "{}", symbol)
    }
}

/// Integration measures over a compartment.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Measure {
    /// The cells of the compartment.
    Dx,
    /// The facets carrying the given marker.
    Ds(i64),
    /// A sum over the vertices of the compartment.
    Dp,
}

impl Measure {
    /// Whether the measure is evaluated vertex by vertex rather than with cell quadrature.
    pub fn is_pointwise(&self) -> bool {
        matches!(self, Measure::Dp)
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Measure::Dx => write!(f, "dx"),
            Measure::Ds(marker) => write!(f, "ds({})", marker),
            Measure::Dp => write!(f, "dP"),
        }
    }
}

/// A weak-form contribution to the residual of one species.
#[derive(Debug, Clone, PartialEq)]
pub struct Form {
    pub kind: FormKind,
    pub species_name: String,
    pub compartment_name: String,
    pub flux_name: Option<String>,
    pub measure: Measure,
    /// Compartment whose mesh carries the integral.
    pub integration_compartment: String,
    /// Diffusion coefficient for diffusion forms, `-signed_stoich * scale` for reaction forms
    /// and one for mass forms.
    pub coefficient: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FormContainer {
    forms: Vec<Form>,
}

impl FormContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, form: Form) {
        self.forms.push(form);
    }

    pub fn iter(&self) -> impl '_ + ExactSizeIterator<Item = &Form> {
        self.forms.iter()
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }

    pub fn select_by_species(&self, species_name: &str) -> Vec<&Form> {
        self.forms
            .iter()
            .filter(|f| f.species_name == species_name)
            .collect()
    }

    pub fn select_by_compartment(&self, compartment_name: &str) -> Vec<&Form> {
        self.forms
            .iter()
            .filter(|f| f.compartment_name == compartment_name)
            .collect()
    }

    pub fn select_by_type(&self, kind: FormKind) -> Vec<&Form> {
        self.forms.iter().filter(|f| f.kind == kind).collect()
    }

    /// Logs the given forms, or all forms if `forms` is `None`.
    pub fn inspect(&self, forms: Option<&[&Form]>) {
        let all: Vec<&Form> = self.forms.iter().collect();
        let forms = forms.unwrap_or(&all);
        for (index, form) in forms.iter().enumerate() {
            info!(
                "Form {}: type {}, species {}, compartment {}, flux {}, integrated {} on {} with coefficient {}",
                index,
                form.kind,
                form.species_name,
                form.compartment_name,
                form.flux_name.as_deref().unwrap_or("-"),
                form.measure,
                form.integration_compartment,
                form.coefficient
            );
        }
        info!(
            "{} forms by type: {}",
            forms.len(),
            forms.iter().map(|f| f.kind).counts().iter().map(|(k, n)| format!("{}={}", k, n)).sorted().join(", ")
        );
    }
}
