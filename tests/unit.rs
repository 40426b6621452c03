use stubs::config::{Config, LinearMethod};
use stubs::mesh::ParentMesh;
use stubs::model::compartment::Compartment;
use stubs::model::container::Container;
use stubs::model::parameter::Parameter;
use stubs::model::reaction::Reaction;
use stubs::model::species::Species;
use stubs::model::Model;

mod unit_tests;

pub const CYTOSOL_MARKER: i64 = 1;
pub const MEMBRANE_MARKER: i64 = 2;

/// Quiet configuration with a direct linear solver, suitable for small test meshes.
pub fn test_config(final_t: f64, initial_dt: f64) -> Config {
    let mut config = Config {
        print_assembly: false,
        ..Config::default()
    };
    config.solver.final_t = final_t;
    config.solver.initial_dt = initial_dt;
    config.solver.linear.method = LinearMethod::Lu;
    config
}

/// The cytosol fills the unit cube and the plasma membrane covers its boundary.
pub fn cell_compartments() -> Container<Compartment> {
    let mut compartments = Container::new("compartment");
    compartments
        .add_all([
            Compartment::new("cytosol", 3, "um", CYTOSOL_MARKER).unwrap(),
            Compartment::new("pm", 2, "um", MEMBRANE_MARKER).unwrap(),
        ])
        .unwrap();
    compartments
}

pub fn unit_cube_parent_mesh(cells_per_dim: usize) -> ParentMesh {
    ParentMesh::unit_cube(cells_per_dim, CYTOSOL_MARKER, MEMBRANE_MARKER)
}

/// Reversible binding of cytosolic `A` to the membrane as `B`.
///
/// With `k_on` in um/s and `k_off` in 1/s both fluxes need no unit conversion, and the
/// steady state satisfies `A / B = k_off / k_on` on the membrane.
pub fn membrane_binding_model(cells_per_dim: usize, config: Config) -> Model {
    let mut parameters = Container::new("parameter");
    parameters
        .add_all([
            Parameter::new("k_on", 1.0, "um/s").unwrap(),
            Parameter::new("k_off", 0.1, "1/s").unwrap(),
        ])
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
        .add(Reaction::new("rxn", ["A"], ["B"], [("on", "k_on"), ("off", "k_off")]).restricted_to("pm"))
        .unwrap();

    Model::new(
        parameters,
        species,
        cell_compartments(),
        reactions,
        unit_cube_parent_mesh(cells_per_dim),
        config,
    )
}
