//! Effective thermal conductivity of voxelized media.
//!
//! # Architecture
//!
//! ```text
//! Workspace + ConductivityMap ──► ConductivityField (PhaseTable, orientation)
//!                                        │
//!            Method::Fv, isotropic  ──► Tpfa ─┐
//!            Method::Fv, anisotropic ─► Mpfa ─┼──► LinearOperator ──► solve()
//!            Method::Fe              ─► Fe  ──┘                          │
//!                                                                        ▼
//!                                        ConductivityResult { k_eff, T, q }
//! ```
//!
//! A run imposes a unit temperature difference along one axis (or takes
//! prescribed voxel temperatures), solves steady conduction, and turns the
//! mean heat flux into one column of the effective conductivity tensor.
//! [`compute_conductivity_tensor`] runs all three axes.

pub mod boundary;
pub mod config;
pub mod fe;
pub mod fv_mpfa;
pub mod fv_tpfa;
pub mod grid;
pub mod map;
pub mod result;
pub mod simulation;

pub use boundary::{Axis, PrescribedBc, SideBc};
pub use config::{ConductivityOptions, Method};
pub use map::{Conductivity, ConductivityField, ConductivityMap, MapKind, MaterialEntry, PhaseTable};
pub use result::{ConductivityResult, EffectiveTensor};
pub use simulation::{Scheme, compute_conductivity_tensor, compute_thermal_conductivity};
