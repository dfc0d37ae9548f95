//! Error taxonomy shared by every solver component.
//!
//! - Configuration errors are raised before any assembly starts.
//! - Convergence failures are normally carried as a status on
//!   [`crate::sim::linalg::SolveReport`]; the variant below only appears when a
//!   caller asks for a converged result explicitly.
//! - Dimension errors report shape mismatches between arrays.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MaterialError {
    /// Invalid material range, unresolved voxel value, or an unsupported
    /// solver/method combination.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The iterative solver stopped at `iterations` without reaching `tolerance`.
    #[error(
        "solver did not converge after {iterations} iterations \
         (relative residual {residual:.3e}, tolerance {tolerance:.1e})"
    )]
    Convergence {
        iterations: usize,
        residual: f64,
        tolerance: f64,
    },

    /// Array shapes do not agree.
    #[error("dimension error: {0}")]
    Dimension(String),
}

impl MaterialError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn dimension(msg: impl Into<String>) -> Self {
        Self::Dimension(msg.into())
    }
}

impl From<ndarray::ShapeError> for MaterialError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::Dimension(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MaterialError>;

/// Returns early with a [`MaterialError::Configuration`] if the condition fails.
macro_rules! ensure_config {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::error::MaterialError::Configuration(format!($($arg)+)));
        }
    };
}

pub(crate) use ensure_config;
