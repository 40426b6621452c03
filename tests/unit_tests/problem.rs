use crate::{cell_compartments, membrane_binding_model, test_config, unit_cube_parent_mesh, CYTOSOL_MARKER};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector, DVectorView};
use stubs::config::NonlinearMethod;
use stubs::model::compartment::Compartment;
use stubs::model::container::Container;
use stubs::model::parameter::Parameter;
use stubs::model::reaction::Reaction;
use stubs::model::species::Species;
use stubs::model::Model;
use stubs::solver::NonlinearSystem;
use stubs_optimize::calculus::approximate_jacobian;
use util::assert_approx_matrix_eq;

/// Membrane binding of `A` together with dimerization `A + A <-> C` in the cytosol, which
/// makes the residual nonlinear in `A`.
fn dimerization_binding_model(cells_per_dim: usize) -> Model {
    let mut parameters = Container::new("parameter");
    parameters
        .add_all([
            Parameter::new("k_on", 1.0, "um/s").unwrap(),
            Parameter::new("k_off", 0.1, "1/s").unwrap(),
            Parameter::new("k_d", 0.5, "1/(uM*s)").unwrap(),
            Parameter::new("k_u", 0.2, "1/s").unwrap(),
        ])
        .unwrap();

    let mut species = Container::new("species");
    species
        .add_all([
            Species::new("A", 1.0, "uM", 10.0, "um^2/s", "cytosol").unwrap(),
            Species::new("C", 0.5, "uM", 5.0, "um^2/s", "cytosol").unwrap(),
            Species::new("B", 0.2, "uM*um", 0.5, "um^2/s", "pm").unwrap(),
        ])
        .unwrap();

    let mut reactions = Container::new("reaction");
    reactions
        .add_all([
            Reaction::new("binding", ["A"], ["B"], [("on", "k_on"), ("off", "k_off")]).restricted_to("pm"),
            Reaction::new("dimer", ["A", "A"], ["C"], [("on", "k_d"), ("off", "k_u")]),
        ])
        .unwrap();

    Model::new(
        parameters,
        species,
        cell_compartments(),
        reactions,
        unit_cube_parent_mesh(cells_per_dim),
        test_config(1.0, 0.1),
    )
}

/// A state away from the initial conditions, so that every term contributes.
fn perturbed_state(model: &Model) -> DVector<f64> {
    let mut x = model.problem().unwrap().state();
    for (i, x_i) in x.iter_mut().enumerate() {
        *x_i += 0.1 * (i % 7) as f64;
    }
    x
}

#[test]
fn single_compartment_problem_bypasses_nesting() {
    let mut compartments = Container::new("compartment");
    compartments
        .add(Compartment::new("cytosol", 3, "um", CYTOSOL_MARKER).unwrap())
        .unwrap();
    let mut parameters = Container::new("parameter");
    parameters
        .add_all([
            Parameter::new("kf", 1.0, "1/s").unwrap(),
            Parameter::new("kr", 0.5, "1/s").unwrap(),
        ])
        .unwrap();
    let mut species = Container::new("species");
    species
        .add_all([
            Species::new("A", 1.0, "uM", 1.0, "um^2/s", "cytosol").unwrap(),
            Species::new("C", 0.0, "uM", 1.0, "um^2/s", "cytosol").unwrap(),
        ])
        .unwrap();
    let mut reactions = Container::new("reaction");
    reactions
        .add(Reaction::new("r", ["A"], ["C"], [("on", "kf"), ("off", "kr")]))
        .unwrap();

    let cells_per_dim = 2;
    let mut model = Model::new(
        parameters,
        species,
        compartments,
        reactions,
        unit_cube_parent_mesh(cells_per_dim),
        test_config(1.0, 0.1),
    );
    model.initialize().unwrap();

    let num_vertices = (cells_per_dim + 1).pow(3);
    let problem = model.problem_mut().unwrap();
    assert!(problem.is_single_domain());
    assert_eq!(problem.num_spaces(), 1);
    assert_eq!(problem.dimension(), 2 * num_vertices);

    let x = problem.state();
    let residual = problem.assemble_residual(&DVectorView::from(&x)).unwrap();
    assert!(!residual.is_nest());
    assert_eq!(residual.len(), 2 * num_vertices);

    let matrix = problem.assemble_jacobian(&DVectorView::from(&x)).unwrap();
    assert!(!matrix.is_nest());
    assert_eq!(matrix.nrows(), 2 * num_vertices);
    assert_eq!(matrix.ncols(), 2 * num_vertices);
}

#[test]
fn jacobian_reassembly_reproduces_initial_assembly() {
    let mut model = dimerization_binding_model(1);
    model.initialize().unwrap();
    let x = perturbed_state(&model);
    let problem = model.problem_mut().unwrap();

    let first = problem
        .assemble_jacobian(&DVectorView::from(&x))
        .unwrap()
        .to_csr();
    let second = problem
        .assemble_jacobian(&DVectorView::from(&x))
        .unwrap()
        .to_csr();

    assert_eq!(first.row_offsets(), second.row_offsets());
    assert_eq!(first.col_indices(), second.col_indices());
    // Same pattern and summation order, so the values agree bit for bit
    let bits = |values: &[f64]| values.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(first.values()), bits(second.values()));
    assert_matrix_eq!(first, second, comp = exact);
}

#[test]
fn uncoupled_compartments_produce_empty_off_diagonal_blocks() {
    let mut parameters = Container::new("parameter");
    parameters
        .add_all([
            Parameter::new("kf", 1.0, "1/s").unwrap(),
            Parameter::new("kr", 0.5, "1/s").unwrap(),
        ])
        .unwrap();
    let mut species = Container::new("species");
    species
        .add_all([
            Species::new("A", 1.0, "uM", 1.0, "um^2/s", "cytosol").unwrap(),
            Species::new("C", 0.0, "uM", 1.0, "um^2/s", "cytosol").unwrap(),
            Species::new("B", 1.0, "uM*um", 0.0, "um^2/s", "pm").unwrap(),
            Species::new("D", 0.0, "uM*um", 0.0, "um^2/s", "pm").unwrap(),
        ])
        .unwrap();
    let mut reactions = Container::new("reaction");
    reactions
        .add_all([
            Reaction::new("volume", ["A"], ["C"], [("on", "kf"), ("off", "kr")]),
            Reaction::new("surface", ["B"], ["D"], [("on", "kf"), ("off", "kr")]),
        ])
        .unwrap();

    let mut model = Model::new(
        parameters,
        species,
        cell_compartments(),
        reactions,
        unit_cube_parent_mesh(1),
        test_config(1.0, 0.1),
    );
    model.initialize().unwrap();
    let problem = model.problem_mut().unwrap();
    assert_eq!(problem.num_spaces(), 2);
    assert!(!problem.is_empty_block(0, 0));
    assert!(problem.is_empty_block(0, 1));
    assert!(problem.is_empty_block(1, 0));
    assert!(!problem.is_empty_block(1, 1));

    let cytosol_dofs = problem.spaces()[0].dim();
    let membrane_dofs = problem.spaces()[1].dim();
    let x = problem.state();
    let matrix = problem.assemble_jacobian(&DVectorView::from(&x)).unwrap();
    assert!(matrix.is_nest());
    assert_eq!(matrix.nrows(), cytosol_dofs + membrane_dofs);

    let coupling = matrix.block(0, 1).unwrap();
    assert_eq!((coupling.nrows(), coupling.ncols()), (cytosol_dofs, membrane_dofs));
    assert!(coupling.to_dense().iter().all(|v| *v == 0.0));
    // Empty blocks reserve storage from the nonzeros-per-row guess
    assert!(coupling.nnz_guess().is_some());
    let per_row = coupling.nnz_guess().unwrap().min(membrane_dofs);
    assert_eq!(coupling.info().nz_reserved, cytosol_dofs * per_row);
    let coupling = matrix.block(1, 0).unwrap();
    assert_eq!((coupling.nrows(), coupling.ncols()), (membrane_dofs, cytosol_dofs));
    assert!(coupling.to_dense().iter().all(|v| *v == 0.0));

    let (shape, triplets) = problem.block_triplets(0, 1).unwrap();
    assert_eq!(shape, (cytosol_dofs, membrane_dofs));
    assert!(triplets.iter().all(|(_, _, v)| *v == 0.0));
    let (shape, triplets) = problem.block_triplets(1, 1).unwrap();
    assert_eq!(shape, (membrane_dofs, membrane_dofs));
    assert!(triplets
        .iter()
        .all(|(r, c, _)| *r < membrane_dofs && *c < membrane_dofs));
    assert!(triplets.iter().any(|(_, _, v)| *v != 0.0));
}

#[test]
fn assembled_jacobian_matches_finite_differences() {
    let mut model = dimerization_binding_model(1);
    model.initialize().unwrap();
    let x = perturbed_state(&model);
    let linear = model.config.solver.linear.clone();
    let problem = model.problem_mut().unwrap();

    let approximate = {
        let mut system = NonlinearSystem::new(problem, &linear, NonlinearMethod::Newton);
        approximate_jacobian(&mut system, &x, &1e-6).unwrap()
    };
    let assembled = DMatrix::from(
        &problem
            .assemble_jacobian(&DVectorView::from(&x))
            .unwrap()
            .to_csr(),
    );

    assert_approx_matrix_eq!(&assembled, &approximate, abstol = 1e-6);
}

#[test]
fn block_and_sub_form_names() {
    let mut model = membrane_binding_model(1, test_config(1.0, 0.1));
    model.initialize().unwrap();
    let problem = model.problem().unwrap();

    let n = problem.num_spaces();
    let mut names = Vec::new();
    for i in 0..n {
        for j in 0..n {
            names.push(problem.jacobian_name(i, j).to_string());
            for k in 0..problem.domains().len() {
                if !problem.forms().jacobian[i][j][k].is_empty() {
                    names.push(problem.sub_jacobian_name(i, j, k));
                }
            }
        }
    }

    insta::assert_snapshot!(names.join("\n"), @r###"
    J00 = dF[cytosol]/du[cytosol]
    J000 = dF[cytosol]/du[cytosol] (domain=cytosol)
    J001 = dF[cytosol]/du[cytosol] (domain=pm)
    J01 = dF[cytosol]/du[pm]
    J011 = dF[cytosol]/du[pm] (domain=pm)
    J10 = dF[pm]/du[cytosol]
    J101 = dF[pm]/du[cytosol] (domain=pm)
    J11 = dF[pm]/du[pm]
    J111 = dF[pm]/du[pm] (domain=pm)
    "###);
}
