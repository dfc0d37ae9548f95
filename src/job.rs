//! TOML job files for the command-line tool.
//!
//! ```toml
//! [workspace]
//! path = "fibers.json"
//!
//! [orientation]
//! cutoff = [90, 255]
//! sigma = 1.4
//! rho = 0.7
//!
//! [[materials]]
//! range = [0, 89]
//! k = 0.0257
//!
//! [[materials]]
//! range = [90, 255]
//! along = 12.0
//! cross = 0.7
//!
//! [simulation]
//! method = "fv"
//! side_bc = "periodic"
//! solver = "bicgstab"
//! ```
//!
//! Without `simulation.direction` all three axes are run and the full
//! tensor is reported.

use crate::io::{ResultFile, read_workspace};
use crate::sim::conductivity::{
    Axis, ConductivityMap, ConductivityOptions, ConductivityResult, EffectiveTensor, Method,
    SideBc, compute_conductivity_tensor, compute_thermal_conductivity,
};
use crate::sim::linalg::SolverType;
use crate::sim::orientation::compute_orientation_st;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub workspace: WorkspaceSection,
    #[serde(default)]
    pub orientation: Option<OrientationSection>,
    pub materials: Vec<MaterialSection>,
    #[serde(default)]
    pub simulation: SimulationSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceSection {
    /// Workspace JSON file, relative to the job file
    pub path: String,
    /// Overrides the voxel length stored in the file
    #[serde(default)]
    pub voxel_length: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrientationSection {
    pub cutoff: (u16, u16),
    pub sigma: f64,
    pub rho: f64,
}

/// Either `k` (isotropic) or `along` + `cross` (oriented).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaterialSection {
    pub range: (u16, u16),
    #[serde(default)]
    pub k: Option<f64>,
    #[serde(default)]
    pub along: Option<f64>,
    #[serde(default)]
    pub cross: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SimulationSection {
    pub method: Method,
    pub direction: Option<Axis>,
    pub side_bc: SideBc,
    pub solver: SolverType,
    pub tolerance: Option<f64>,
    pub max_iterations: usize,
    pub matrix_free: bool,
}

impl Default for SimulationSection {
    fn default() -> Self {
        let options = ConductivityOptions::new();
        Self {
            method: options.method,
            direction: None,
            side_bc: SideBc::default(),
            solver: options.solver,
            tolerance: None,
            max_iterations: options.max_iterations,
            matrix_free: options.matrix_free,
        }
    }
}

/// What a job produced.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    Single(ConductivityResult),
    Tensor(EffectiveTensor),
}

impl JobOutcome {
    pub fn converged(&self) -> bool {
        match self {
            JobOutcome::Single(run) => run.converged(),
            JobOutcome::Tensor(t) => t.converged(),
        }
    }

    pub fn to_result_file(&self) -> ResultFile {
        match self {
            JobOutcome::Single(run) => ResultFile::from_run(run),
            JobOutcome::Tensor(t) => ResultFile::from_tensor(t),
        }
    }
}

impl JobConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).context("Failed to parse job configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid job file: {}", path.display()))
    }

    pub fn conductivity_map(&self) -> Result<ConductivityMap> {
        let oriented = self.materials.iter().any(|m| m.along.is_some() || m.cross.is_some());
        let mut map = if oriented || self.orientation.is_some() {
            ConductivityMap::anisotropic()
        } else {
            ConductivityMap::isotropic()
        };
        for m in &self.materials {
            match (m.k, m.along, m.cross) {
                (Some(k), None, None) => {
                    map.add_material(m.range, k)?;
                }
                (None, Some(along), Some(cross)) => {
                    map.add_material_to_orient(m.range, along, cross)?;
                }
                _ => bail!(
                    "material {:?} needs either `k` or both `along` and `cross`",
                    m.range
                ),
            }
        }
        Ok(map)
    }

    pub fn options(&self) -> ConductivityOptions {
        let s = &self.simulation;
        let mut options = ConductivityOptions::new()
            .with_method(s.method)
            .with_solver(s.solver)
            .with_max_iterations(s.max_iterations)
            .with_matrix_free(s.matrix_free);
        options.tolerance = s.tolerance;
        options
    }

    /// Loads the workspace (relative to `base_dir`) and runs the job.
    pub fn run(&self, base_dir: &Path) -> Result<JobOutcome> {
        let mut ws = read_workspace(&base_dir.join(&self.workspace.path))?;
        if let Some(h) = self.workspace.voxel_length {
            ws.set_voxel_length(h)?;
        }
        let map = self.conductivity_map()?;
        if let Some(o) = &self.orientation {
            compute_orientation_st(&mut ws, o.cutoff, o.sigma, o.rho)?;
        } else if map.requires_orientation() && ws.orientation().is_none() {
            tracing::warn!("oriented materials but no orientation section or stored field");
        }

        let options = self.options();
        let side_bc = self.simulation.side_bc;
        Ok(match self.simulation.direction {
            Some(axis) => JobOutcome::Single(compute_thermal_conductivity(
                &ws,
                &map,
                Some(axis),
                side_bc,
                &options,
            )?),
            None => JobOutcome::Tensor(compute_conductivity_tensor(&ws, &map, side_bc, &options)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Workspace;
    use crate::io::write_workspace;
    use crate::sim::conductivity::MapKind;
    use tempfile::tempdir;

    const JOB: &str = r#"
[workspace]
path = "sample.json"

[[materials]]
range = [0, 99]
k = 1.0

[[materials]]
range = [100, 255]
k = 3.0

[simulation]
direction = "x"
side_bc = "symmetric"
solver = "cg"
tolerance = 1e-9
"#;

    #[test]
    fn test_parse_defaults() {
        let job = JobConfig::from_toml_str(JOB).unwrap();
        assert_eq!(job.simulation.method, Method::Fv);
        assert_eq!(job.simulation.direction, Some(Axis::X));
        assert_eq!(job.simulation.max_iterations, 10_000);
        assert_eq!(job.conductivity_map().unwrap().kind(), MapKind::Isotropic);
        assert_eq!(job.options().solve_options().tolerance, 1e-9);

        assert!(JobConfig::from_toml_str("[workspace]\npath = 1").is_err());
    }

    #[test]
    fn test_material_needs_complete_conductivity() {
        let raw = JOB.replace("k = 3.0", "along = 3.0");
        let job = JobConfig::from_toml_str(&raw).unwrap();
        assert!(job.conductivity_map().is_err());
    }

    #[test]
    fn test_run_layered_sample() -> Result<()> {
        let dir = tempdir()?;
        // Two layers normal to x: series conduction, harmonic mean.
        let ws = Workspace::from_fn((4, 3, 3), 1e-3, |(i, _, _)| if i < 2 { 0 } else { 200 })?;
        write_workspace(&dir.path().join("sample.json"), &ws)?;

        let job = JobConfig::from_toml_str(JOB)?;
        let JobOutcome::Single(run) = job.run(dir.path())? else {
            bail!("expected a single run");
        };
        assert!(run.converged());
        assert!((run.k_eff[0] - 1.5).abs() < 1e-6, "{:?}", run.k_eff);
        Ok(())
    }
}
