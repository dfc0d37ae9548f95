use super::boundary::PrescribedBc;
use crate::error::{MaterialError, Result};
use crate::sim::linalg::{SolveOptions, SolverType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Discretization family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    /// Cell-centered finite volumes (two-point or MPFA, chosen by map kind).
    #[default]
    Fv,
    /// Periodic trilinear finite elements.
    Fe,
}

impl Method {
    /// Default relative residual tolerance.
    pub fn default_tolerance(self) -> f64 {
        match self {
            Method::Fv => 1e-5,
            Method::Fe => 1e-7,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Fv => write!(f, "fv"),
            Method::Fe => write!(f, "fe"),
        }
    }
}

impl FromStr for Method {
    type Err = MaterialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fv" => Ok(Method::Fv),
            "fe" => Ok(Method::Fe),
            other => Err(MaterialError::config(format!(
                "unknown method '{other}' (expected fv or fe)"
            ))),
        }
    }
}

/// Options of a conductivity run.
#[derive(Debug, Clone)]
pub struct ConductivityOptions {
    pub method: Method,
    pub solver: SolverType,
    /// Relative residual tolerance; `None` uses the method default.
    pub tolerance: Option<f64>,
    pub max_iterations: usize,
    pub gmres_restart: usize,
    /// Band storage limit of the direct solver (f64 entries).
    pub direct_max_storage: usize,
    /// Finite elements only: apply the stiffness per element instead of
    /// assembling it. Not compatible with the direct solver.
    pub matrix_free: bool,
    /// Per-voxel temperatures replacing the imposed-direction setup.
    pub prescribed_bc: Option<PrescribedBc>,
}

impl ConductivityOptions {
    pub fn new() -> Self {
        let solve = SolveOptions::default();
        Self {
            method: Method::Fv,
            solver: solve.solver,
            tolerance: None,
            max_iterations: solve.max_iterations,
            gmres_restart: solve.gmres_restart,
            direct_max_storage: solve.direct_max_storage,
            matrix_free: true,
            prescribed_bc: None,
        }
    }

    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn with_solver(mut self, solver: SolverType) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = Some(tolerance);
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_matrix_free(mut self, matrix_free: bool) -> Self {
        self.matrix_free = matrix_free;
        self
    }

    pub fn with_prescribed_bc(mut self, bc: PrescribedBc) -> Self {
        self.prescribed_bc = Some(bc);
        self
    }

    pub fn solve_options(&self) -> SolveOptions {
        SolveOptions {
            solver: self.solver,
            tolerance: self
                .tolerance
                .unwrap_or_else(|| self.method.default_tolerance()),
            max_iterations: self.max_iterations,
            gmres_restart: self.gmres_restart,
            direct_max_storage: self.direct_max_storage,
        }
    }
}

impl Default for ConductivityOptions {
    fn default() -> Self {
        Self::new()
    }
}
