//! Reaction-diffusion models: entity containers, the initialization pipeline and the time
//! loop.
//!
//! A [`Model`] owns the declarative description of a system (parameters, species,
//! compartments and reactions) together with the parent mesh all compartments live on.
//! [`Model::initialize`] turns the description into a [`BlockProblem`] by
//!
//! 1. linking reactions to the entities they reference,
//! 2. assigning every reacting species a position in its compartment's function space,
//! 3. extracting compartment meshes and building function spaces,
//! 4. expanding reactions into fluxes and fluxes into forms,
//! 5. compiling the forms into residual and Jacobian sub-forms.
//!
//! [`Model::solve`] then advances the problem in time.
use crate::assembly::{compile_forms, Domain};
use crate::config::Config;
use crate::error::ModelError;
use crate::io::vtk::write_vtk;
use crate::mesh::{ParentMesh, SimplexMesh};
use crate::parallel::{Communicator, SelfCommunicator};
use crate::problem::BlockProblem;
use crate::solver::{advance_time_step, StepOutcome, TimeStepper};
use crate::space::{CompartmentFunctions, FunctionSpace};
use crate::stopwatch::Stopwatches;
use crate::units::Unit;
use eyre::WrapErr;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod compartment;
pub mod container;
pub mod flux;
pub mod form;
pub mod parameter;
pub mod reaction;
pub mod species;

use compartment::Compartment;
use container::Container;
use flux::{reaction_to_fluxes, Flux};
use form::{Form, FormContainer, FormKind};
use parameter::Parameter;
use reaction::{Reaction, ReactionDatabase};
use species::Species;

/// Species values of every active compartment at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub t: f64,
    /// Species name to values in the vertex order of its compartment mesh.
    pub values: BTreeMap<String, Vec<f64>>,
}

#[derive(Debug)]
pub struct Model {
    pub parameters: Container<Parameter>,
    pub species: Container<Species>,
    pub compartments: Container<Compartment>,
    pub reactions: Container<Reaction>,
    pub fluxes: Container<Flux>,
    pub forms: FormContainer,
    pub config: Config,
    reaction_database: ReactionDatabase,
    parent_mesh: ParentMesh,
    comm: Arc<dyn Communicator>,
    problem: Option<BlockProblem>,
    stepper: Option<TimeStepper>,
    solutions: Vec<Snapshot>,
    stopwatches: Stopwatches,
}

impl Model {
    pub fn new(
        parameters: Container<Parameter>,
        species: Container<Species>,
        compartments: Container<Compartment>,
        reactions: Container<Reaction>,
        parent_mesh: ParentMesh,
        config: Config,
    ) -> Self {
        Self {
            parameters,
            species,
            compartments,
            reactions,
            fluxes: Container::new("flux"),
            forms: FormContainer::new(),
            config,
            reaction_database: ReactionDatabase::new(),
            parent_mesh,
            comm: Arc::new(SelfCommunicator),
            problem: None,
            stepper: None,
            solutions: Vec::new(),
            stopwatches: Stopwatches::default(),
        }
    }

    pub fn with_communicator(mut self, comm: Arc<dyn Communicator>) -> Self {
        self.comm = comm;
        self
    }

    /// Templates for the custom reaction types used by the model's reactions.
    pub fn with_reaction_database(mut self, database: ReactionDatabase) -> Self {
        self.reaction_database = database;
        self
    }

    pub fn parent_mesh(&self) -> &ParentMesh {
        &self.parent_mesh
    }

    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.comm
    }

    pub fn is_initialized(&self) -> bool {
        self.problem.is_some()
    }

    pub fn problem(&self) -> Option<&BlockProblem> {
        self.problem.as_ref()
    }

    pub fn problem_mut(&mut self) -> Option<&mut BlockProblem> {
        self.problem.as_mut()
    }

    /// Simulation time of the last accepted step.
    pub fn t(&self) -> f64 {
        self.stepper.as_ref().map(TimeStepper::t).unwrap_or(0.0)
    }

    pub fn stepper(&self) -> Option<&TimeStepper> {
        self.stepper.as_ref()
    }

    /// Stored snapshots, if [`Config::store_solutions`] is set.
    pub fn solutions(&self) -> &[Snapshot] {
        &self.solutions
    }

    pub fn stopwatches(&self) -> &Stopwatches {
        &self.stopwatches
    }

    /// Names of the compartments with at least one reacting species, in container order.
    pub fn active_compartments(&self) -> Vec<&str> {
        self.compartments
            .iter()
            .filter(|c| c.num_species > 0)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Builds fluxes, forms and the block problem from the model description.
    ///
    /// Initializing again discards any previous problem and restarts time at zero.
    pub fn initialize(&mut self) -> Result<(), ModelError> {
        self.stopwatches.start("model initialize");
        let result = self.initialize_pipeline();
        self.stopwatches.pause("model initialize");
        result
    }

    fn initialize_pipeline(&mut self) -> Result<(), ModelError> {
        self.problem = None;
        self.stepper = None;
        self.solutions.clear();

        self.link_reactions()?;
        self.assign_compartment_indices()?;
        self.initialize_meshes()?;
        self.initialize_fluxes()?;
        self.initialize_forms()?;

        let active: Vec<String> = self
            .active_compartments()
            .into_iter()
            .map(str::to_string)
            .collect();
        let mut spaces = Vec::with_capacity(active.len());
        let mut functions = Vec::with_capacity(active.len());
        for name in &active {
            let compartment = self.compartments.try_get(name)?;
            let space = FunctionSpace::new(
                name.clone(),
                Arc::clone(compartment.mesh()?),
                compartment.num_species,
                self.comm.as_ref(),
            )?;
            let mut initial = vec![0.0; compartment.num_species];
            for species in self.species.iter() {
                if let (true, Some(index)) = (&species.compartment_name == name, species.compartment_index) {
                    initial[index] = species.initial_condition;
                }
            }
            functions.push(CompartmentFunctions::from_initial_conditions(&space, &initial));
            spaces.push(space);
        }

        // Active compartments come first so that domain k of a diagonal block is the
        // compartment itself
        let mut domain_names = active.clone();
        for form in self.forms.iter() {
            if !domain_names.contains(&form.integration_compartment) {
                domain_names.push(form.integration_compartment.clone());
            }
        }
        let domains = domain_names
            .into_iter()
            .map(|name| {
                let mesh = Arc::clone(self.compartments.try_get(&name)?.mesh()?);
                Ok(Domain { name, mesh })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let mut parameter_values = Vec::with_capacity(self.parameters.len());
        for parameter in self.parameters.iter_mut() {
            parameter.update_time(0.0, 0.0)?;
            parameter_values.push(parameter.value);
        }

        let compiled = compile_forms(
            &self.forms,
            &self.fluxes,
            &self.species,
            &self.parameters,
            &spaces,
            &domains,
        )?;
        let problem = BlockProblem::new(
            spaces,
            functions,
            domains,
            compiled,
            parameter_values,
            self.config.solver.initial_dt,
            Arc::clone(&self.comm),
        )
        .with_print_assembly(self.config.print_assembly);

        if self.config.print_assembly && self.comm.is_root() {
            self.parameters.print_table();
            self.species.print_table();
            self.compartments.print_table();
            self.reactions.print_table();
            self.fluxes.print_table();
            self.forms.inspect(None);
            problem.print_assembly_info();
        }

        self.problem = Some(problem);
        self.stepper = Some(TimeStepper::new(&self.config.solver));
        info!("Model initialized with {} active compartments", active.len());
        Ok(())
    }

    /// Resolves aliases, builds rate laws and flags every entity that takes part in a
    /// reaction.
    fn link_reactions(&mut self) -> Result<(), ModelError> {
        for reaction in self.reactions.iter_mut() {
            let unknown_alias = |kind: &str, alias: &str, name: &str| ModelError::InvalidReaction {
                name: reaction.name.clone(),
                reason: format!("{} alias `{}` refers to unknown {} `{}`", kind, alias, kind, name),
            };
            if let Some((alias, name)) = reaction
                .param_map
                .iter()
                .find(|(_, name)| !self.parameters.contains(name))
            {
                return Err(unknown_alias("parameter", alias, name));
            }
            if let Some((alias, name)) = reaction
                .species_map
                .iter()
                .find(|(_, name)| !self.species.contains(name))
            {
                return Err(unknown_alias("species", alias, name));
            }
            reaction.initialize_flux_equations(&self.reaction_database)?;
        }

        for species in self.species.iter_mut() {
            species.is_in_a_reaction = false;
        }
        for compartment in self.compartments.iter_mut() {
            compartment.is_in_a_reaction = false;
        }
        for reaction in self.reactions.iter() {
            for name in reaction.involved_species() {
                let species = self.species.try_get_mut(name)?;
                species.is_in_a_reaction = true;
                self.compartments
                    .try_get_mut(&species.compartment_name)?
                    .is_in_a_reaction = true;
            }
        }
        Ok(())
    }

    fn assign_compartment_indices(&mut self) -> Result<(), ModelError> {
        for compartment in self.compartments.iter_mut() {
            compartment.num_species = 0;
        }
        for species in self.species.iter_mut() {
            species.compartment_index = None;
            let compartment = self.compartments.try_get_mut(&species.compartment_name)?;
            if species.concentration_dimension() != compartment.dimensionality {
                return Err(ModelError::InvalidSpecies {
                    name: species.name.clone(),
                    reason: format!(
                        "concentration units {} do not match the {}-dimensional compartment `{}`",
                        species.concentration_units, compartment.dimensionality, compartment.name
                    ),
                });
            }
            if !species.is_in_a_reaction {
                warn!(
                    "Species {} is not part of any reaction and is excluded from the system",
                    species.name
                );
                continue;
            }
            species.compartment_index = Some(compartment.num_species);
            compartment.num_species += 1;
        }
        Ok(())
    }

    fn initialize_meshes(&mut self) -> Result<(), ModelError> {
        for compartment in self.compartments.iter_mut() {
            let marker = compartment.first_index_marker();
            if compartment.cell_markers.len() > 1 {
                self.parent_mesh
                    .coalesce_markers(compartment.dimensionality, &compartment.cell_markers[1..], marker)?;
            }
            let mesh = self
                .parent_mesh
                .extract_submesh(compartment.dimensionality, marker)?;
            debug!(
                "Compartment {}: {} cells, {} vertices",
                compartment.name,
                mesh.num_cells(),
                mesh.num_vertices()
            );
            compartment.set_mesh(Arc::new(mesh))?;
        }

        let volumes: Vec<(String, Option<f64>)> = self
            .compartments
            .iter()
            .map(|c| (c.name.clone(), c.nvolume()))
            .collect();
        for compartment in self.compartments.iter_mut() {
            let own = compartment.nvolume();
            compartment.scale_to = volumes
                .iter()
                .filter(|(name, _)| *name != compartment.name)
                .filter_map(|(name, other)| Some((name.clone(), own? / (*other)?)))
                .collect();
        }
        Ok(())
    }

    fn initialize_fluxes(&mut self) -> Result<(), ModelError> {
        let mut fluxes = Container::new("flux");
        for reaction in self.reactions.iter() {
            for mut flux in reaction_to_fluxes(reaction) {
                flux.get_additional_properties(&self.species, &self.compartments, &self.parameters, &self.config.solver)?;
                fluxes.add(flux)?;
            }
        }
        self.fluxes = fluxes;
        Ok(())
    }

    /// Mass and diffusion forms for every reacting species and one reaction form per flux.
    fn initialize_forms(&mut self) -> Result<(), ModelError> {
        let ignore_surface_diffusion = self.config.solver.ignore_surface_diffusion;
        let max_dim = self
            .compartments
            .iter()
            .map(|c| c.dimensionality)
            .max()
            .unwrap_or(0);
        let seconds = Unit::parse("s")?;

        let mut forms = FormContainer::new();
        for species in self.species.iter().filter(|s| s.compartment_index.is_some()) {
            let compartment = self.compartments.try_get(&species.compartment_name)?;
            let pointwise = ignore_surface_diffusion && compartment.dimensionality < max_dim;
            let form = |kind, measure, coefficient| Form {
                kind,
                species_name: species.name.clone(),
                compartment_name: compartment.name.clone(),
                flux_name: None,
                measure,
                integration_compartment: compartment.name.clone(),
                coefficient,
            };
            let measure = if pointwise { compartment.dp() } else { compartment.dx() };
            forms.add(form(FormKind::Mass, measure, 1.0));

            if species.diffusion > 0.0 && !pointwise {
                let length = compartment.compartment_units;
                let factor = species
                    .diffusion_units
                    .conversion_factor_to(&(length * length / seconds))?;
                forms.add(form(FormKind::Diffusion, compartment.dx(), species.diffusion * factor));
            }
        }

        for flux in self.fluxes.iter() {
            let properties = flux.properties()?;
            let kind = if flux.is_boundary_flux() {
                FormKind::BoundaryReaction
            } else {
                FormKind::DomainReaction
            };
            forms.add(Form {
                kind,
                species_name: flux.species_name.clone(),
                compartment_name: properties.destination_compartment.clone(),
                flux_name: Some(flux.name.clone()),
                measure: properties.measure,
                integration_compartment: properties.integration_compartment.clone(),
                coefficient: -(flux.signed_stoich as f64) * properties.scale,
            });
        }
        self.forms = forms;
        Ok(())
    }

    /// Values of a reacting species at the vertices of its compartment mesh.
    pub fn species_values(&self, name: &str) -> Result<Vec<f64>, ModelError> {
        let problem = self.problem.as_ref().ok_or(ModelError::NotInitialized)?;
        let species = self.species.try_get(name)?;
        let component = species
            .compartment_index
            .ok_or_else(|| ModelError::InvalidSpecies {
                name: name.to_string(),
                reason: "species is not part of the solved system".to_string(),
            })?;
        let position = problem
            .spaces()
            .iter()
            .position(|s| s.compartment_name() == species.compartment_name)
            .ok_or(ModelError::NotInitialized)?;
        Ok(problem.functions()[position].species_values(&problem.spaces()[position], component))
    }

    /// The mesh of a compartment, once the model is initialized.
    pub fn compartment_mesh(&self, name: &str) -> Result<&Arc<SimplexMesh>, ModelError> {
        self.compartments.try_get(name)?.mesh()
    }

    /// Advances the model by one accepted time step.
    pub fn solve_step(&mut self) -> eyre::Result<StepOutcome> {
        let problem = self.problem.as_mut().ok_or(ModelError::NotInitialized)?;
        let stepper = self.stepper.as_mut().ok_or(ModelError::NotInitialized)?;
        let parameters = &mut self.parameters;

        self.stopwatches.start("model time step");
        let outcome = advance_time_step(problem, stepper, &self.config.solver, |t, dt| {
            update_parameters(parameters, t, dt)
        });
        self.stopwatches.pause("model time step");
        let outcome = outcome?;

        if self.comm.is_root() {
            info!(
                "Step {}: t = {:.6}, dt = {:.3e}, {} Newton iterations{}",
                stepper.step(),
                outcome.t,
                outcome.dt,
                outcome.newton_iterations,
                if outcome.retries > 0 {
                    format!(", {} retries", outcome.retries)
                } else {
                    String::new()
                }
            );
        }
        let step = stepper.step();
        self.record(outcome.t, step)?;
        Ok(outcome)
    }

    /// Initializes the model if needed and runs the time loop to the final time.
    pub fn solve(&mut self) -> eyre::Result<()> {
        if self.problem.is_none() {
            self.initialize().wrap_err("failed to initialize model")?;
        }
        let step = self.stepper.as_ref().map(TimeStepper::step).unwrap_or(0);
        self.record(self.t(), step)?;

        while !self
            .stepper
            .as_ref()
            .map(TimeStepper::is_finished)
            .unwrap_or(true)
        {
            self.solve_step()?;
        }

        if self.comm.is_root() {
            info!("Finished at t = {}", self.t());
            self.stopwatches.log_summary();
            if let Some(problem) = &self.problem {
                problem.stopwatches().log_summary();
            }
        }
        Ok(())
    }

    fn record(&mut self, t: f64, step: usize) -> eyre::Result<()> {
        let write_vtk_files = self.config.write_vtk;
        if !self.config.store_solutions && !write_vtk_files {
            return Ok(());
        }

        let mut snapshot = Snapshot {
            t,
            values: BTreeMap::new(),
        };
        for species in self
            .species
            .iter()
            .filter(|s| s.compartment_index.is_some())
        {
            snapshot
                .values
                .insert(species.name.clone(), self.species_values(&species.name)?);
        }

        if write_vtk_files {
            let rank_suffix = if self.comm.size() > 1 {
                format!("_rank{}", self.comm.rank())
            } else {
                String::new()
            };
            for name in self.active_compartments() {
                let point_data: Vec<(&str, &[f64])> = self
                    .species
                    .iter()
                    .filter(|s| s.compartment_name == name)
                    .filter_map(|s| {
                        snapshot
                            .values
                            .get(&s.name)
                            .map(|v| (s.name.as_str(), v.as_slice()))
                    })
                    .collect();
                let path = self
                    .config
                    .output_dir
                    .join(format!("{}{}_{:06}.vtk", name, rank_suffix, step));
                write_vtk(&path, format!("{} at t = {}", name, t), self.compartment_mesh(name)?, &point_data)?;
            }
        }

        if self.config.store_solutions {
            self.solutions.push(snapshot);
        }
        Ok(())
    }
}

/// Updates time-dependent parameters for a step ending at `t` and returns all values in
/// container order.
fn update_parameters(parameters: &mut Container<Parameter>, t: f64, dt: f64) -> eyre::Result<Vec<f64>> {
    let mut values = Vec::with_capacity(parameters.len());
    for parameter in parameters.iter_mut() {
        parameter.update_time(t, dt)?;
        values.push(parameter.value);
    }
    Ok(values)
}
