//! Run configuration and solver settings.
//!
//! All settings deserialize from JSON and fall back to their defaults for missing fields.
use eyre::WrapErr;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Output and diagnostics settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub output_dir: PathBuf,
    /// Logs the block structure of the assembled system at construction.
    pub print_assembly: bool,
    pub write_vtk: bool,
    /// Keeps a copy of every accepted solution in memory.
    pub store_solutions: bool,
    pub solver: SolverSystem,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("output"),
            print_assembly: true,
            write_vtk: false,
            store_solutions: false,
            solver: SolverSystem::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(json: &str) -> eyre::Result<Self> {
        serde_json::from_str(json).wrap_err("failed to parse configuration")
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read configuration file {}", path.display()))?;
        Self::from_json_str(&json).wrap_err_with(|| format!("in configuration file {}", path.display()))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NonlinearMethod {
    Newton,
    #[serde(alias = "IMEX")]
    Imex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NonlinearSolverConfig {
    pub method: NonlinearMethod,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    pub max_iterations: usize,
    /// Factor applied to dt after a step that converged quickly.
    pub dt_increase_factor: f64,
    /// Factor applied to dt after a slow or failed step.
    pub dt_decrease_factor: f64,
    /// dt is increased when a step converges in at most this many iterations.
    pub min_newton: usize,
    /// dt is decreased when a step needs at least this many iterations.
    pub max_newton: usize,
    /// Maximum number of consecutive retries of a failed step.
    pub max_retries: usize,
    pub line_search: bool,
}

impl Default for NonlinearSolverConfig {
    fn default() -> Self {
        Self {
            method: NonlinearMethod::Newton,
            relative_tolerance: 1e-6,
            absolute_tolerance: 1e-8,
            max_iterations: 50,
            dt_increase_factor: 1.05,
            dt_decrease_factor: 0.7,
            min_newton: 2,
            max_newton: 8,
            max_retries: 10,
            line_search: true,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinearMethod {
    #[serde(alias = "BiCGStab")]
    Bicgstab,
    /// Dense LU factorization of the assembled system. Only suitable for small problems.
    #[serde(alias = "LU")]
    Lu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinearSolverConfig {
    pub method: LinearMethod,
    pub relative_tolerance: f64,
    pub absolute_tolerance: f64,
    pub max_iterations: usize,
    pub jacobi_preconditioner: bool,
}

impl Default for LinearSolverConfig {
    fn default() -> Self {
        Self {
            method: LinearMethod::Bicgstab,
            relative_tolerance: 1e-10,
            absolute_tolerance: 1e-14,
            max_iterations: 10000,
            jacobi_preconditioner: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSystem {
    pub final_t: f64,
    pub initial_dt: f64,
    /// `(t, dt)` pairs: once time reaches `t`, the step size is set to `dt`.
    pub adjust_dt: Vec<(f64, f64)>,
    /// Drops diffusion on lower-dimensional compartments and integrates their reactions with
    /// a point measure.
    pub ignore_surface_diffusion: bool,
    pub nonlinear: NonlinearSolverConfig,
    pub linear: LinearSolverConfig,
}

impl Default for SolverSystem {
    fn default() -> Self {
        Self {
            final_t: 1.0,
            initial_dt: 0.01,
            adjust_dt: Vec::new(),
            ignore_surface_diffusion: false,
            nonlinear: NonlinearSolverConfig::default(),
            linear: LinearSolverConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let config = Config::from_json_str(
            r#"{ "write_vtk": true, "solver": { "final_t": 5.0, "nonlinear": { "method": "IMEX" } } }"#,
        )
        .unwrap();
        assert!(config.write_vtk);
        assert_eq!(config.solver.final_t, 5.0);
        assert_eq!(config.solver.initial_dt, 0.01);
        assert_eq!(config.solver.nonlinear.method, NonlinearMethod::Imex);
        assert_eq!(config.solver.nonlinear.max_newton, 8);
        assert_eq!(config.solver.linear.method, LinearMethod::Bicgstab);
    }
}
