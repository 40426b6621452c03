use criterion::{criterion_group, criterion_main, Criterion};
use nalgebra::DVectorView;
use std::hint::black_box;
use stubs::config::{Config, LinearMethod};
use stubs::mesh::ParentMesh;
use stubs::model::compartment::Compartment;
use stubs::model::container::Container;
use stubs::model::parameter::Parameter;
use stubs::model::reaction::Reaction;
use stubs::model::species::Species;
use stubs::model::Model;

fn membrane_binding_model(cells_per_dim: usize) -> eyre::Result<Model> {
    let mut parameters = Container::new("parameter");
    parameters.add_all([
        Parameter::new("k_on", 1.0, "um/s")?,
        Parameter::new("k_off", 0.1, "1/s")?,
        Parameter::new("k_d", 0.5, "1/(uM*s)")?,
        Parameter::new("k_u", 0.2, "1/s")?,
    ])?;

    let mut species = Container::new("species");
    species.add_all([
        Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cytosol")?,
        Species::new("C", 0.0, "uM", 5.0, "um^2/s", "cytosol")?,
        Species::new("B", 0.0, "uM*um", 0.5, "um^2/s", "pm")?,
    ])?;

    let mut reactions = Container::new("reaction");
    reactions.add_all([
        Reaction::new("binding", ["A"], ["B"], [("on", "k_on"), ("off", "k_off")]).restricted_to("pm"),
        Reaction::new("dimer", ["A", "A"], ["C"], [("on", "k_d"), ("off", "k_u")]),
    ])?;

    let mut compartments = Container::new("compartment");
    compartments.add_all([
        Compartment::new("cytosol", 3, "um", 1)?,
        Compartment::new("pm", 2, "um", 2)?,
    ])?;

    let mut config = Config {
        print_assembly: false,
        ..Config::default()
    };
    config.solver.linear.method = LinearMethod::Lu;

    let mut model = Model::new(
        parameters,
        species,
        compartments,
        reactions,
        ParentMesh::unit_cube(cells_per_dim, 1, 2),
        config,
    );
    model.initialize()?;
    Ok(model)
}

fn assembly_benchmark(c: &mut Criterion) {
    let mut model = membrane_binding_model(10).expect("benchmark model must initialize");
    let problem = model.problem_mut().expect("model is initialized");
    let x = problem.state();

    // The first assembly allocates the block patterns
    problem
        .assemble_jacobian(&DVectorView::from(&x))
        .expect("initial Jacobian assembly");

    c.bench_function("Jacobian reassembly (unit cube, 10 cells per dim)", |b| {
        b.iter(|| {
            let matrix = problem
                .assemble_jacobian(&DVectorView::from(&x))
                .unwrap();
            black_box(matrix.nrows());
        })
    });

    c.bench_function("Residual assembly (unit cube, 10 cells per dim)", |b| {
        b.iter(|| {
            let residual = problem
                .assemble_residual(&DVectorView::from(&x))
                .unwrap();
            black_box(residual.norm());
        })
    });
}

criterion_group!(benches, assembly_benchmark);
criterion_main!(benches);
