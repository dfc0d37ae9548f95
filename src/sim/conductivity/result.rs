use super::boundary::Axis;
use crate::Tensor3;
use crate::error::{MaterialError, Result};
use crate::sim::linalg::SolveSummary;
use ndarray::{Array3, Array4};
use std::fmt;

/// Outcome of one conductivity run.
#[derive(Debug, Clone)]
pub struct ConductivityResult {
    /// Imposed direction, `None` for prescribed temperatures.
    pub direction: Option<Axis>,
    /// Effective conductivity column: heat flux components per unit imposed
    /// gradient.
    pub k_eff: [f64; 3],
    /// Temperature at cell centers (FV) or voxel lower corners (FE).
    pub temperature: Array3<f64>,
    /// Flux density per voxel, shape `[nx, ny, nz, 3]`.
    pub flux: Array4<f64>,
    pub report: SolveSummary,
}

impl ConductivityResult {
    pub fn converged(&self) -> bool {
        self.report.converged()
    }

    /// Returns the result only if the solve converged.
    pub fn into_converged(self) -> Result<Self> {
        if self.converged() {
            Ok(self)
        } else {
            Err(MaterialError::Convergence {
                iterations: self.report.iterations,
                residual: self.report.residual,
                tolerance: self.report.tolerance,
            })
        }
    }
}

/// Full effective conductivity tensor from three imposed directions.
///
/// Column `j` holds `k_eff` of the run along axis `j`.
#[derive(Debug, Clone)]
pub struct EffectiveTensor {
    pub tensor: Tensor3,
    pub runs: Vec<ConductivityResult>,
}

impl EffectiveTensor {
    pub(crate) fn from_runs(runs: Vec<ConductivityResult>) -> Self {
        let mut m = [[0.; 3]; 3];
        for (j, run) in runs.iter().enumerate() {
            for (i, row) in m.iter_mut().enumerate() {
                row[j] = run.k_eff[i];
            }
        }
        Self {
            tensor: Tensor3::new(m),
            runs,
        }
    }

    pub fn converged(&self) -> bool {
        self.runs.iter().all(ConductivityResult::converged)
    }

    /// Largest relative asymmetry `|k_ij - k_ji| / max|k|`.
    pub fn asymmetry(&self) -> f64 {
        let scale = self
            .tensor
            .m
            .iter()
            .flatten()
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        if scale == 0. {
            return 0.;
        }
        self.tensor.max_abs_diff(&self.tensor.transpose()) / scale
    }
}

impl fmt::Display for EffectiveTensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Effective thermal conductivity tensor:")?;
        write!(f, "{}", self.tensor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::linalg::{SolveStatus, SolverType};

    fn run(axis: Axis, k_eff: [f64; 3], status: SolveStatus) -> ConductivityResult {
        ConductivityResult {
            direction: Some(axis),
            k_eff,
            temperature: Array3::zeros((1, 1, 1)),
            flux: Array4::zeros((1, 1, 1, 3)),
            report: SolveSummary {
                iterations: 3,
                residual: 1e-3,
                tolerance: 1e-5,
                status,
                solver: SolverType::Bicgstab,
            },
        }
    }

    #[test]
    fn test_columns_and_convergence() {
        let runs = vec![
            run(Axis::X, [1., 0.1, 0.], SolveStatus::Converged),
            run(Axis::Y, [0.1, 2., 0.], SolveStatus::Converged),
            run(Axis::Z, [0., 0., 3.], SolveStatus::MaxIterations),
        ];
        let t = EffectiveTensor::from_runs(runs);
        assert_eq!(t.tensor.get(1, 0), 0.1);
        assert_eq!(t.tensor.get(1, 1), 2.);
        assert_eq!(t.asymmetry(), 0.);
        assert!(!t.converged());

        let err = t.runs[2].clone().into_converged().unwrap_err();
        assert!(matches!(err, MaterialError::Convergence { iterations: 3, .. }));
        assert!(t.runs[0].clone().into_converged().is_ok());
    }
}
