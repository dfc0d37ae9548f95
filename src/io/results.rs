//! Conductivity result JSON format.

use crate::sim::conductivity::{Axis, ConductivityResult, EffectiveTensor};
use crate::sim::linalg::SolveSummary;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Summary of one run; fields are not stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub direction: Option<Axis>,
    pub k_eff: [f64; 3],
    pub report: SolveSummary,
}

impl From<&ConductivityResult> for RunRecord {
    fn from(run: &ConductivityResult) -> Self {
        Self {
            direction: run.direction,
            k_eff: run.k_eff,
            report: run.report,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFile {
    /// Row-major effective tensor, present for three-axis runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tensor: Option<[[f64; 3]; 3]>,
    pub converged: bool,
    pub runs: Vec<RunRecord>,
}

impl ResultFile {
    pub fn from_tensor(tensor: &EffectiveTensor) -> Self {
        Self {
            tensor: Some(tensor.tensor.m),
            converged: tensor.converged(),
            runs: tensor.runs.iter().map(RunRecord::from).collect(),
        }
    }

    pub fn from_run(run: &ConductivityResult) -> Self {
        Self {
            tensor: None,
            converged: run.converged(),
            runs: vec![RunRecord::from(run)],
        }
    }
}

/// Writes a result summary to a JSON file.
pub fn write_result(path: &Path, result: &ResultFile) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer_pretty(writer, result)
        .with_context(|| format!("Failed to serialize result to: {}", path.display()))?;

    Ok(())
}

/// Reads a result summary from a JSON file.
pub fn read_result(path: &Path) -> Result<ResultFile> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize result from: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::linalg::{SolveStatus, SolverType};
    use ndarray::{Array3, Array4};
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_result() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("result.json");

        let run = ConductivityResult {
            direction: Some(Axis::Y),
            k_eff: [0.01, 2.5, -0.02],
            temperature: Array3::zeros((2, 2, 2)),
            flux: Array4::zeros((2, 2, 2, 3)),
            report: SolveSummary {
                iterations: 42,
                residual: 3e-6,
                tolerance: 1e-5,
                status: SolveStatus::Converged,
                solver: SolverType::Gmres,
            },
        };
        let original = ResultFile::from_run(&run);
        write_result(&path, &original)?;

        let loaded = read_result(&path)?;
        assert_eq!(loaded, original);
        assert!(loaded.converged);
        assert_eq!(loaded.runs[0].direction, Some(Axis::Y));

        let text = std::fs::read_to_string(&path)?;
        assert!(text.contains("\"gmres\""));
        assert!(!text.contains("tensor"));
        Ok(())
    }
}
