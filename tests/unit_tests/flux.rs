use crate::{membrane_binding_model, test_config};
use itertools::Itertools;
use proptest::prelude::*;
use stubs::config::{NonlinearMethod, SolverSystem};
use stubs::error::ModelError;
use stubs::model::compartment::Compartment;
use stubs::model::container::Container;
use stubs::model::flux::{reaction_to_fluxes, Direction, Variant};
use stubs::model::form::{FormKind, Measure};
use stubs::model::parameter::Parameter;
use stubs::model::reaction::{Reaction, ReactionDatabase, ReactionType};
use stubs::model::species::Species;
use util::assert_scalar_close;

fn mass_action(name: &str, lhs: &[&str], rhs: &[&str]) -> Reaction {
    let mut reaction = Reaction::new(name, lhs.to_vec(), rhs.to_vec(), [("on", "kf"), ("off", "kr")]);
    reaction
        .initialize_flux_equations(&ReactionDatabase::new())
        .unwrap();
    reaction
}

fn species_lists() -> impl Strategy<Value = (Vec<&'static str>, Vec<&'static str>)> {
    let names = prop::sample::select(vec!["A", "B", "C", "D"]);
    (
        prop::collection::vec(names.clone(), 1..4),
        prop::collection::vec(names, 1..4),
    )
}

proptest! {
    #[test]
    fn reversible_reactions_emit_signed_flux_pairs((lhs, rhs) in species_lists()) {
        let reaction = mass_action("r", &lhs, &rhs);
        let fluxes = reaction_to_fluxes(&reaction);
        let unique: Vec<&str> = lhs.iter().chain(&rhs).copied().unique().collect();
        prop_assert_eq!(fluxes.len(), 2 * unique.len());

        for flux in &fluxes {
            let count = |side: &[&str]| side.iter().filter(|s| **s == flux.species_name).count() as i32;
            let magnitude = count(&lhs).max(count(&rhs));
            prop_assert_eq!(flux.signed_stoich.abs(), magnitude);

            let consumed = lhs.contains(&flux.species_name.as_str());
            let forward_sign = if consumed { -1 } else { 1 };
            let expected = match flux.direction {
                Direction::Forward => forward_sign * magnitude,
                Direction::Reverse => -forward_sign * magnitude,
            };
            prop_assert_eq!(flux.signed_stoich, expected);
        }
    }
}

#[test]
fn forward_only_reactions_emit_no_reverse_fluxes() {
    let mut reaction = Reaction::new("decay", ["A", "A"], ["B"], [("on", "k")]).with_type(ReactionType::MassActionForward);
    reaction
        .initialize_flux_equations(&ReactionDatabase::new())
        .unwrap();
    let fluxes = reaction_to_fluxes(&reaction);
    assert_eq!(fluxes.len(), 2);
    assert!(fluxes.iter().all(|f| f.direction == Direction::Forward));
    let a = fluxes.iter().find(|f| f.species_name == "A").unwrap();
    assert_eq!(a.signed_stoich, -2);
    assert_eq!(a.name, "decay_f_A");
}

#[test]
fn custom_reactions_use_database_templates_with_aliases() {
    let mut database = ReactionDatabase::new();
    database.insert("hill".to_string(), "V*S^n/(K^n + S^n)".to_string());
    let mut reaction = Reaction::new("uptake", ["A"], ["B"], [("V", "v_max"), ("K", "k_m"), ("n", "hill_n")])
        .with_type(ReactionType::from_name("hill"))
        .with_species_map([("S", "A")]);
    reaction.initialize_flux_equations(&database).unwrap();

    let symbols: Vec<String> = reaction
        .eqn_f()
        .unwrap()
        .free_symbols()
        .into_iter()
        .collect();
    assert_eq!(symbols, ["A", "hill_n", "k_m", "v_max"]);
    assert!(reaction.eqn_r().is_none());
}

#[test]
fn unknown_reaction_type_is_an_error() {
    let mut reaction = Reaction::new("r", ["A"], ["B"], [("on", "k")]).with_type(ReactionType::from_name("nope"));
    let result = reaction.initialize_flux_equations(&ReactionDatabase::new());
    assert!(matches!(result, Err(ModelError::InvalidReaction { .. })));
}

#[test]
fn mass_action_without_rate_alias_is_an_error() {
    let mut reaction = Reaction::new("r", ["A"], ["B"], [("off", "k")]);
    let result = reaction.initialize_flux_equations(&ReactionDatabase::new());
    assert!(matches!(result, Err(ModelError::InvalidReaction { .. })));
}

#[test]
fn variant_table() {
    use NonlinearMethod::{Imex, Newton};
    use Variant::*;

    assert_eq!(Variant::resolve(Newton, 3, 3, true, false), Some(Current));
    assert_eq!(Variant::resolve(Newton, 3, 2, false, true), Some(BoundaryTrace));
    assert_eq!(Variant::resolve(Newton, 2, 3, false, true), Some(VolumeExtension));

    assert_eq!(Variant::resolve(Imex, 3, 3, true, true), Some(Trial));
    assert_eq!(Variant::resolve(Imex, 3, 3, true, false), Some(PriorIterate));
    assert_eq!(Variant::resolve(Imex, 3, 2, false, false), Some(BoundaryTrace));
    assert_eq!(Variant::resolve(Imex, 2, 3, false, false), Some(VolumeExtension));
    assert_eq!(Variant::resolve(Imex, 3, 3, false, true), None);

    assert!(Current.is_differentiated());
    assert!(Trial.is_differentiated());
    assert!(BoundaryTrace.is_differentiated());
    assert!(VolumeExtension.is_differentiated());
    assert!(!PriorIterate.is_differentiated());
    assert!(!PriorStep.is_differentiated());
}

#[test]
fn flux_spanning_three_compartments_is_rejected() {
    let mut compartments = Container::new("compartment");
    compartments
        .add_all([
            Compartment::new("cytosol", 3, "um", 1).unwrap(),
            Compartment::new("pm", 2, "um", 2).unwrap(),
            Compartment::new("er", 3, "um", 3).unwrap(),
        ])
        .unwrap();
    let mut species = Container::new("species");
    species
        .add_all([
            Species::new("A", 1.0, "uM", 1.0, "um^2/s", "cytosol").unwrap(),
            Species::new("B", 1.0, "uM*um", 0.0, "um^2/s", "pm").unwrap(),
            Species::new("C", 1.0, "uM", 1.0, "um^2/s", "er").unwrap(),
        ])
        .unwrap();
    let mut parameters = Container::new("parameter");
    parameters
        .add_all([
            Parameter::new("kf", 1.0, "1/(uM*s)").unwrap(),
            Parameter::new("kr", 1.0, "1/s").unwrap(),
        ])
        .unwrap();

    let reaction = mass_action("r", &["A", "B"], &["C"]);
    let mut flux = reaction_to_fluxes(&reaction)
        .into_iter()
        .find(|f| f.name == "r_f_C")
        .unwrap();
    let result = flux.get_additional_properties(&species, &compartments, &parameters, &SolverSystem::default());
    assert!(matches!(result, Err(ModelError::CompartmentCount { count: 3, .. })));
}

#[test]
fn membrane_binding_fluxes_are_classified() {
    let mut model = membrane_binding_model(1, test_config(1.0, 0.1));
    model.initialize().unwrap();

    let names: Vec<&str> = model.fluxes.names().sorted().collect();
    assert_eq!(names, ["rxn_f_A", "rxn_f_B", "rxn_r_A", "rxn_r_B"]);

    // Binding and unbinding as seen from the cytosol are integrated over the membrane
    for name in ["rxn_f_A", "rxn_r_A"] {
        let flux = model.fluxes.get(name).unwrap();
        let properties = flux.properties().unwrap();
        assert!(flux.is_boundary_flux());
        assert_eq!(properties.boundary_marker, Some(crate::MEMBRANE_MARKER));
        assert_eq!(properties.measure, Measure::Ds(crate::MEMBRANE_MARKER));
        assert_eq!(properties.integration_compartment, "pm");
        assert_eq!(properties.destination_compartment, "cytosol");
        assert_scalar_close!(properties.scale, 1.0, reltol = 1e-12);
    }
    let binding = model.fluxes.get("rxn_f_A").unwrap().properties().unwrap();
    let mut dims = binding.flux_dimensionality;
    dims.sort_unstable();
    assert_eq!(dims, [2, 3]);
    assert_eq!(binding.ukeys.get("A"), Some(&Variant::Current));
    let unbinding = model.fluxes.get("rxn_r_A").unwrap().properties().unwrap();
    assert_eq!(unbinding.ukeys.get("B"), Some(&Variant::VolumeExtension));

    // The membrane species sees the cytosol through a boundary trace
    let gain = model.fluxes.get("rxn_f_B").unwrap();
    let properties = gain.properties().unwrap();
    assert!(!gain.is_boundary_flux());
    assert_eq!(properties.flux_dimensionality, [3, 2]);
    assert_eq!(properties.ukeys.get("A"), Some(&Variant::BoundaryTrace));
    assert_eq!(properties.measure, Measure::Dx);
    assert_eq!(properties.integration_compartment, "pm");
    assert_scalar_close!(properties.scale, 1.0, reltol = 1e-12);

    // Mass forms for both species, diffusion only for A, one reaction form per flux
    assert_eq!(model.forms.select_by_type(FormKind::Mass).len(), 2);
    assert_eq!(model.forms.select_by_type(FormKind::Diffusion).len(), 1);
    assert_eq!(model.forms.select_by_type(FormKind::BoundaryReaction).len(), 2);
    assert_eq!(model.forms.select_by_type(FormKind::DomainReaction).len(), 2);
    let consumption = model
        .forms
        .iter()
        .find(|f| f.flux_name.as_deref() == Some("rxn_f_A"))
        .unwrap();
    assert_scalar_close!(consumption.coefficient, 1.0, reltol = 1e-12);
}

#[test]
fn imex_variants_depend_on_linearity_in_the_destination() {
    let mut config = test_config(1.0, 0.1);
    config.solver.nonlinear.method = NonlinearMethod::Imex;
    let mut model = membrane_binding_model(1, config);
    model.initialize().unwrap();

    let unbinding = model.fluxes.get("rxn_r_B").unwrap().properties().unwrap();
    assert_eq!(unbinding.ukeys.get("B"), Some(&Variant::Trial));
    let gain = model.fluxes.get("rxn_f_B").unwrap().properties().unwrap();
    assert_eq!(gain.ukeys.get("A"), Some(&Variant::BoundaryTrace));
}
