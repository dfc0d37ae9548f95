//! Linear solvers for the assembled (or matrix-free) conduction operators.
//!
//! # Architecture
//!
//! ```text
//! CsrMatrix ─┐
//! FeOperator ├──► dyn LinearOperator ──► solve(op, b, x0, &SolveOptions) ──► SolveReport
//! FnOperator ┘
//! ```
//!
//! The solvers only see [`LinearOperator::apply`], so they do not know whether
//! the operator is an explicit matrix or an implicit per-element rule.

pub mod csr;
pub mod dense;
pub mod direct;
pub mod krylov;

pub use csr::{CsrMatrix, Triplet};

use crate::error::{MaterialError, Result, ensure_config};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Vectors shorter than this are processed sequentially.
const PAR_CHUNK: usize = 8192;

/// Action of a square linear operator on a field.
pub trait LinearOperator: Sync {
    /// Number of unknowns.
    fn len(&self) -> usize;

    /// `y = A x`.
    fn apply(&self, x: &[f64], y: &mut [f64]);

    /// Whether `A` is symmetric (required by CG and MINRES).
    fn is_symmetric(&self) -> bool;

    /// Main diagonal, used for Jacobi preconditioning.
    fn diagonal(&self) -> Option<Vec<f64>> {
        None
    }

    /// Explicit matrix, if the operator stores one (required by the direct solver).
    fn as_csr(&self) -> Option<&CsrMatrix> {
        None
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `b - A x`.
    fn residual(&self, x: &[f64], b: &[f64]) -> Vec<f64> {
        let mut ax = vec![0.0; self.len()];
        self.apply(x, &mut ax);
        b.iter().zip(&ax).map(|(bi, ai)| bi - ai).collect()
    }
}

/// Matrix-free operator defined by a closure.
pub struct FnOperator<F> {
    len: usize,
    symmetric: bool,
    f: F,
}

impl<F> FnOperator<F>
where
    F: Fn(&[f64], &mut [f64]) + Sync,
{
    pub fn new(len: usize, symmetric: bool, f: F) -> Self {
        Self {
            len,
            symmetric,
            f,
        }
    }
}

impl<F> LinearOperator for FnOperator<F>
where
    F: Fn(&[f64], &mut [f64]) + Sync,
{
    fn len(&self) -> usize {
        self.len
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        (self.f)(x, y)
    }

    fn is_symmetric(&self) -> bool {
        self.symmetric
    }
}

/// Solver family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverType {
    /// Conjugate gradient; symmetric positive-definite operators only.
    Cg,
    /// Biconjugate gradient stabilized.
    #[default]
    Bicgstab,
    /// Restarted generalized minimal residual.
    Gmres,
    /// Minimum residual; symmetric operators only.
    Minres,
    /// Banded LU on the explicit matrix.
    Direct,
}

impl SolverType {
    pub fn requires_symmetry(self) -> bool {
        matches!(self, SolverType::Cg | SolverType::Minres)
    }
}

impl fmt::Display for SolverType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SolverType::Cg => "cg",
            SolverType::Bicgstab => "bicgstab",
            SolverType::Gmres => "gmres",
            SolverType::Minres => "minres",
            SolverType::Direct => "direct",
        };
        f.write_str(name)
    }
}

impl FromStr for SolverType {
    type Err = MaterialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cg" => Ok(SolverType::Cg),
            "bicgstab" => Ok(SolverType::Bicgstab),
            "gmres" => Ok(SolverType::Gmres),
            "minres" => Ok(SolverType::Minres),
            "direct" => Ok(SolverType::Direct),
            other => Err(MaterialError::config(format!("unknown solver type '{other}'"))),
        }
    }
}

/// Configuration for [`solve`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveOptions {
    pub solver: SolverType,
    /// Relative residual tolerance `‖b − Ax‖ / ‖b‖`.
    pub tolerance: f64,
    /// Maximum number of iterations (GMRES counts inner iterations).
    pub max_iterations: usize,
    /// GMRES restart length.
    pub gmres_restart: usize,
    /// Largest band storage (in f64 entries) the direct solver may allocate.
    pub direct_max_storage: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            solver: SolverType::default(),
            tolerance: 1e-5,
            max_iterations: 10_000,
            gmres_restart: 50,
            direct_max_storage: 50_000_000,
        }
    }
}

impl SolveOptions {
    pub fn with_solver(mut self, solver: SolverType) -> Self {
        self.solver = solver;
        self
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn validate(&self) -> Result<()> {
        ensure_config!(
            self.tolerance.is_finite() && self.tolerance > 0.,
            "solver tolerance must be finite and > 0, got {}",
            self.tolerance
        );
        ensure_config!(self.max_iterations > 0, "max iterations must be > 0");
        ensure_config!(self.gmres_restart > 0, "GMRES restart must be > 0");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    /// Iteration budget exhausted before reaching the tolerance.
    MaxIterations,
    /// The iteration broke down (zero inner product) or the direct solve
    /// did not reach the tolerance.
    Breakdown,
}

/// Solution together with its convergence diagnostics.
#[derive(Debug, Clone)]
pub struct SolveReport {
    pub x: Vec<f64>,
    pub iterations: usize,
    /// True relative residual of `x`.
    pub residual: f64,
    pub tolerance: f64,
    pub status: SolveStatus,
    pub solver: SolverType,
}

impl SolveReport {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }

    pub fn summary(&self) -> SolveSummary {
        SolveSummary {
            iterations: self.iterations,
            residual: self.residual,
            tolerance: self.tolerance,
            status: self.status,
            solver: self.solver,
        }
    }

    /// Returns the report only if it converged, [`MaterialError::Convergence`] otherwise.
    pub fn into_converged(self) -> Result<Self> {
        if self.converged() {
            Ok(self)
        } else {
            Err(MaterialError::Convergence {
                iterations: self.iterations,
                residual: self.residual,
                tolerance: self.tolerance,
            })
        }
    }
}

/// Convergence diagnostics of a solve, without the solution vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveSummary {
    pub iterations: usize,
    pub residual: f64,
    pub tolerance: f64,
    pub status: SolveStatus,
    pub solver: SolverType,
}

impl SolveSummary {
    pub fn converged(&self) -> bool {
        self.status == SolveStatus::Converged
    }
}

/// Solves `A x = b`, starting from `x0` (zero if `None`).
///
/// Configuration problems are returned as errors before any iteration.
/// Non-convergence is reported through [`SolveReport::status`].
pub fn solve(
    op: &dyn LinearOperator,
    b: &[f64],
    x0: Option<&[f64]>,
    options: &SolveOptions,
) -> Result<SolveReport> {
    options.validate()?;
    let n = op.len();
    if b.len() != n {
        return Err(MaterialError::dimension(format!(
            "right-hand side has length {}, operator has {n} unknowns",
            b.len()
        )));
    }
    if let Some(x0) = x0 {
        if x0.len() != n {
            return Err(MaterialError::dimension(format!(
                "initial guess has length {}, operator has {n} unknowns",
                x0.len()
            )));
        }
    }
    ensure_config!(
        !options.solver.requires_symmetry() || op.is_symmetric(),
        "solver '{}' requires a symmetric operator",
        options.solver
    );
    ensure_config!(
        options.solver != SolverType::Direct || op.as_csr().is_some(),
        "the direct solver requires an explicit matrix (matrix-free operator given)"
    );

    let b_norm = norm(b);
    if b_norm == 0. {
        return Ok(SolveReport {
            x: vec![0.; n],
            iterations: 0,
            residual: 0.,
            tolerance: options.tolerance,
            status: SolveStatus::Converged,
            solver: options.solver,
        });
    }

    let mut x = x0.map_or_else(|| vec![0.; n], <[f64]>::to_vec);
    let (iterations, mut status) = match options.solver {
        SolverType::Cg => krylov::cg(op, b, &mut x, options),
        SolverType::Bicgstab => krylov::bicgstab(op, b, &mut x, options),
        SolverType::Gmres => krylov::gmres(op, b, &mut x, options),
        SolverType::Minres => krylov::minres(op, b, &mut x, options),
        SolverType::Direct => {
            let Some(matrix) = op.as_csr() else {
                return Err(MaterialError::config("direct solver needs an explicit matrix"));
            };
            x = direct::solve_banded(matrix, b, options.direct_max_storage)?;
            (1, SolveStatus::Converged)
        }
    };

    let residual = norm(&op.residual(&x, b)) / b_norm;
    if status == SolveStatus::Converged && residual > options.tolerance {
        status = if options.solver == SolverType::Direct {
            SolveStatus::Breakdown
        } else {
            SolveStatus::MaxIterations
        };
    }
    if status != SolveStatus::Converged {
        tracing::warn!(
            solver = %options.solver,
            iterations,
            residual,
            tolerance = options.tolerance,
            "linear solve did not converge"
        );
    } else {
        tracing::debug!(solver = %options.solver, iterations, residual, "linear solve converged");
    }

    Ok(SolveReport {
        x,
        iterations,
        residual,
        tolerance: options.tolerance,
        status,
        solver: options.solver,
    })
}

/// Deterministic dot product: fixed chunks reduced in order.
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    if a.len() < PAR_CHUNK {
        return a.iter().zip(b).map(|(x, y)| x * y).sum();
    }
    let partial: Vec<f64> = a
        .par_chunks(PAR_CHUNK)
        .zip(b.par_chunks(PAR_CHUNK))
        .map(|(ca, cb)| ca.iter().zip(cb).map(|(x, y)| x * y).sum())
        .collect();
    partial.iter().sum()
}

pub(crate) fn norm(a: &[f64]) -> f64 {
    dot(a, a).sqrt()
}

/// `y += alpha * x`.
pub(crate) fn axpy(alpha: f64, x: &[f64], y: &mut [f64]) {
    if y.len() < PAR_CHUNK {
        y.iter_mut().zip(x).for_each(|(yi, xi)| *yi += alpha * xi);
    } else {
        y.par_iter_mut()
            .zip(x.par_iter())
            .for_each(|(yi, xi)| *yi += alpha * xi);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1D Laplacian with Dirichlet ends: tridiag(-1, 2, -1).
    pub(crate) fn laplacian_1d(n: usize) -> CsrMatrix {
        let mut triplets = Vec::new();
        for i in 0..n {
            triplets.push(Triplet::new(i, i, 2.0));
            if i > 0 {
                triplets.push(Triplet::new(i, i - 1, -1.0));
            }
            if i + 1 < n {
                triplets.push(Triplet::new(i, i + 1, -1.0));
            }
        }
        CsrMatrix::from_triplets(n, triplets)
    }

    #[test]
    fn test_all_solvers_agree_on_spd_system() {
        let a = laplacian_1d(40);
        let b: Vec<f64> = (0..40).map(|i| (i as f64 * 0.3).sin()).collect();
        let reference = solve(&a, &b, None, &SolveOptions::default().with_solver(SolverType::Direct))
            .unwrap();
        assert!(reference.converged());

        for solver in [
            SolverType::Cg,
            SolverType::Bicgstab,
            SolverType::Gmres,
            SolverType::Minres,
        ] {
            let options = SolveOptions::default()
                .with_solver(solver)
                .with_tolerance(1e-10);
            let report = solve(&a, &b, None, &options).unwrap();
            assert!(report.converged(), "{solver} did not converge: {report:?}");
            for (xi, ri) in report.x.iter().zip(&reference.x) {
                assert!((xi - ri).abs() < 1e-7, "{solver}: {xi} vs {ri}");
            }
        }
    }

    #[test]
    fn test_zero_rhs_returns_zero_field() {
        let a = laplacian_1d(5);
        let report = solve(&a, &[0.; 5], None, &SolveOptions::default()).unwrap();
        assert!(report.converged());
        assert_eq!(report.iterations, 0);
        assert_eq!(report.x, vec![0.; 5]);
    }

    #[test]
    fn test_non_convergence_is_reported_not_claimed() {
        let a = laplacian_1d(200);
        let b = vec![1.0; 200];
        let options = SolveOptions::default()
            .with_solver(SolverType::Cg)
            .with_tolerance(1e-12)
            .with_max_iterations(3);
        let report = solve(&a, &b, None, &options).unwrap();
        assert_eq!(report.status, SolveStatus::MaxIterations);
        assert!(report.residual > 1e-12);
        let err = report.into_converged().unwrap_err();
        assert!(matches!(err, MaterialError::Convergence { iterations: 3, .. }));
    }

    #[test]
    fn test_symmetric_solvers_reject_non_symmetric_operator() {
        let op = FnOperator::new(3, false, |x: &[f64], y: &mut [f64]| y.copy_from_slice(x));
        for solver in [SolverType::Cg, SolverType::Minres] {
            let err = solve(&op, &[1.; 3], None, &SolveOptions::default().with_solver(solver))
                .unwrap_err();
            assert!(matches!(err, MaterialError::Configuration(_)), "{err}");
        }
        let report = solve(&op, &[1.; 3], None, &SolveOptions::default()).unwrap();
        assert!(report.converged());
    }

    #[test]
    fn test_direct_rejects_matrix_free_operator() {
        let op = FnOperator::new(2, true, |x: &[f64], y: &mut [f64]| y.copy_from_slice(x));
        let err = solve(
            &op,
            &[1.; 2],
            None,
            &SolveOptions::default().with_solver(SolverType::Direct),
        )
        .unwrap_err();
        assert!(matches!(err, MaterialError::Configuration(_)));
    }

    #[test]
    fn test_dimension_and_option_validation() {
        let a = laplacian_1d(4);
        assert!(matches!(
            solve(&a, &[1.; 3], None, &SolveOptions::default()),
            Err(MaterialError::Dimension(_))
        ));
        assert!(matches!(
            solve(&a, &[1.; 4], Some(&[0.; 2]), &SolveOptions::default()),
            Err(MaterialError::Dimension(_))
        ));
        assert!(matches!(
            solve(&a, &[1.; 4], None, &SolveOptions::default().with_tolerance(0.)),
            Err(MaterialError::Configuration(_))
        ));
    }

    #[test]
    fn test_solver_type_parsing() {
        assert_eq!("BiCGSTAB".parse::<SolverType>().unwrap(), SolverType::Bicgstab);
        assert_eq!(SolverType::Minres.to_string(), "minres");
        assert!("lu".parse::<SolverType>().is_err());
    }

    #[test]
    fn test_parallel_dot_matches_sequential() {
        let a: Vec<f64> = (0..3 * PAR_CHUNK + 17).map(|i| (i % 7) as f64).collect();
        let expected: f64 = a.iter().map(|v| v * v).sum();
        assert_eq!(dot(&a, &a), expected);
    }
}
