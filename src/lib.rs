//! Effective thermal conductivity of voxelized heterogeneous materials.
//!
//! A [`Workspace`] holds a segmented 3D image. A [`ConductivityMap`] assigns
//! a conductivity to each gray-value range, and the solvers in
//! [`sim::conductivity`] turn the pair into an effective conductivity tensor.
//! Fibrous phases can be given an orientation field with
//! [`compute_orientation_st`].

pub mod error;
pub mod geom;
pub mod io;
pub mod job;
pub mod sim;
pub mod workspace;

// Prelude
pub use error::{MaterialError, Result};
pub use geom::tensor::Tensor3;
pub use geom::vector::Vector;
pub use sim::conductivity::{
    Axis, ConductivityMap, ConductivityOptions, ConductivityResult, EffectiveTensor, Method,
    PrescribedBc, SideBc, compute_conductivity_tensor, compute_thermal_conductivity,
};
pub use sim::linalg::SolverType;
pub use sim::orientation::compute_orientation_st;
pub use workspace::Workspace;
