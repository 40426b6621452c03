use crate::{cell_compartments, membrane_binding_model, test_config, unit_cube_parent_mesh};
use stubs::error::ModelError;
use stubs::model::container::Container;
use stubs::model::parameter::Parameter;
use stubs::model::reaction::Reaction;
use stubs::model::species::Species;
use stubs::model::Model;
use util::assert_scalar_close;

fn assert_relative_close(x: f64, y: f64, reltol: f64) {
    let error = (x - y).abs() / y.abs();
    assert!(error <= reltol, "{} and {} differ by relative error {:e}", x, y, error);
}

#[test]
fn membrane_binding_relaxes_to_equilibrium() -> eyre::Result<()> {
    let mut config = test_config(100.0, 0.1);
    config.store_solutions = true;
    let mut model = membrane_binding_model(2, config);
    model.solve()?;

    assert_scalar_close!(model.t(), 100.0, reltol = 1e-12);
    let last = model.solutions().last().unwrap();
    let a = &last.values["A"];
    let b = &last.values["B"];

    // Cytosol vertex of every membrane vertex
    let cytosol_parents = model.compartment_mesh("cytosol")?.parent_vertex_indices();
    let membrane_parents = model.compartment_mesh("pm")?.parent_vertex_indices();
    assert_eq!(b.len(), membrane_parents.len());
    for (local, parent) in membrane_parents.iter().enumerate() {
        let cytosol_local = cytosol_parents
            .iter()
            .position(|p| p == parent)
            .unwrap();
        // k_on A = k_off B on the membrane
        assert_relative_close(a[cytosol_local] / b[local], 0.1, 1e-4);
    }

    // Mass balance fixes the level: A (1 um^3) + B (6 um^2) = 1 uM um^3 with B = 10 A
    for value in a {
        assert_relative_close(*value, 1.0 / 61.0, 1e-3);
    }
    Ok(())
}

#[test]
fn solutions_are_recorded_from_the_initial_state() -> eyre::Result<()> {
    let mut config = test_config(0.3, 0.1);
    config.store_solutions = true;
    let mut model = membrane_binding_model(1, config);
    model.solve()?;

    let solutions = model.solutions();
    assert!(solutions.len() >= 2);
    assert_eq!(solutions[0].t, 0.0);
    assert!(solutions[0].values["A"].iter().all(|v| *v == 1.0));
    assert!(solutions[0].values["B"].iter().all(|v| *v == 0.0));
    assert!(solutions.windows(2).all(|w| w[0].t < w[1].t));
    assert!(solutions.last().unwrap().values["B"].iter().all(|v| *v > 0.0));
    Ok(())
}

#[test]
fn unknown_parameter_alias_is_rejected() {
    let mut parameters = Container::new("parameter");
    parameters
        .add(Parameter::new("k_on", 1.0, "um/s").unwrap())
        .unwrap();
    let mut species = Container::new("species");
    species
        .add_all([
            Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cytosol").unwrap(),
            Species::new("B", 0.0, "uM*um", 0.0, "um^2/s", "pm").unwrap(),
        ])
        .unwrap();
    let mut reactions = Container::new("reaction");
    reactions
        .add(Reaction::new("rxn", ["A"], ["B"], [("on", "k_on"), ("off", "k_missing")]).restricted_to("pm"))
        .unwrap();

    let mut model = Model::new(
        parameters,
        species,
        cell_compartments(),
        reactions,
        unit_cube_parent_mesh(1),
        test_config(1.0, 0.1),
    );
    let result = model.initialize();
    assert!(matches!(result, Err(ModelError::InvalidReaction { .. })));
    assert!(!model.is_initialized());
}

#[test]
fn species_outside_reactions_are_not_solved_for() {
    let mut model = membrane_binding_model(1, test_config(1.0, 0.1));
    model
        .species
        .add(Species::new("spectator", 2.0, "uM", 1.0, "um^2/s", "cytosol").unwrap())
        .unwrap();
    model.initialize().unwrap();

    let spectator = model.species.get("spectator").unwrap();
    assert!(!spectator.is_in_a_reaction);
    assert_eq!(spectator.compartment_index, None);
    assert_eq!(model.species.get("A").unwrap().compartment_index, Some(0));
    assert!(model.species_values("spectator").is_err());

    let cytosol = &model.problem().unwrap().spaces()[0];
    assert_eq!(cytosol.compartment_name(), "cytosol");
    assert_eq!(cytosol.num_species(), 1);
}

#[test]
fn values_require_initialization() {
    let model = membrane_binding_model(1, test_config(1.0, 0.1));
    assert!(matches!(model.species_values("A"), Err(ModelError::NotInitialized)));
    assert!(!model.is_initialized());
}
