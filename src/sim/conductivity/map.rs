//! Conductivity maps: which conductivity each voxel value stands for.

use crate::error::{MaterialError, Result, ensure_config};
use crate::{Tensor3, Vector, Workspace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Conductivity of one material phase.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conductivity {
    /// Same conductivity in every direction.
    Isotropic(f64),
    /// Transversely isotropic phase: `along` the local orientation,
    /// `cross` normal to it.
    Oriented { along: f64, cross: f64 },
}

impl Conductivity {
    /// Conductivity tensor in the global frame.
    ///
    /// Oriented phases without an orientation fall back to the identity
    /// frame (orientation along x).
    pub fn tensor(&self, orientation: Option<Vector>) -> Tensor3 {
        match *self {
            Conductivity::Isotropic(k) => Tensor3::identity() * k,
            Conductivity::Oriented { along, cross } => {
                let axis = orientation
                    .and_then(|v| v.normalize())
                    .unwrap_or(Vector::unit(0));
                Tensor3::transversely_isotropic(along, cross, axis)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapKind {
    /// Scalar conductivities only; solved with the two-point FV scheme.
    Isotropic,
    /// Tensor conductivities; solved with the MPFA FV scheme.
    Anisotropic,
}

/// A value range (inclusive) and the conductivity assigned to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MaterialEntry {
    pub range: (u16, u16),
    pub conductivity: Conductivity,
}

impl MaterialEntry {
    pub fn contains(&self, value: u16) -> bool {
        (self.range.0..=self.range.1).contains(&value)
    }
}

/// Ordered, non-overlapping list of material entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductivityMap {
    kind: MapKind,
    entries: Vec<MaterialEntry>,
}

impl ConductivityMap {
    pub fn isotropic() -> Self {
        Self {
            kind: MapKind::Isotropic,
            entries: Vec::new(),
        }
    }

    pub fn anisotropic() -> Self {
        Self {
            kind: MapKind::Anisotropic,
            entries: Vec::new(),
        }
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn entries(&self) -> &[MaterialEntry] {
        &self.entries
    }

    /// Registers an isotropic material for the inclusive value range.
    pub fn add_material(&mut self, range: (u16, u16), conductivity: f64) -> Result<&mut Self> {
        check_conductivity("conductivity", conductivity)?;
        self.push(range, Conductivity::Isotropic(conductivity))
    }

    /// Registers an isotropic phase in an anisotropic map.
    pub fn add_isotropic_material(
        &mut self,
        range: (u16, u16),
        conductivity: f64,
    ) -> Result<&mut Self> {
        self.add_material(range, conductivity)
    }

    /// Registers a phase with conductivity `along` its local orientation and
    /// `cross` normal to it. Only valid for anisotropic maps.
    pub fn add_material_to_orient(
        &mut self,
        range: (u16, u16),
        along: f64,
        cross: f64,
    ) -> Result<&mut Self> {
        ensure_config!(
            self.kind == MapKind::Anisotropic,
            "oriented materials require an anisotropic conductivity map"
        );
        check_conductivity("along-axis conductivity", along)?;
        check_conductivity("cross-axis conductivity", cross)?;
        self.push(range, Conductivity::Oriented { along, cross })
    }

    fn push(&mut self, range: (u16, u16), conductivity: Conductivity) -> Result<&mut Self> {
        ensure_config!(
            range.0 <= range.1,
            "invalid material range ({}, {}): lower bound exceeds upper bound",
            range.0,
            range.1
        );
        if let Some(other) = self
            .entries
            .iter()
            .find(|e| range.0 <= e.range.1 && e.range.0 <= range.1)
        {
            return Err(MaterialError::config(format!(
                "material range ({}, {}) overlaps registered range ({}, {})",
                range.0, range.1, other.range.0, other.range.1
            )));
        }
        self.entries.push(MaterialEntry {
            range,
            conductivity,
        });
        Ok(self)
    }

    /// Whether any entry needs a local orientation.
    pub fn requires_orientation(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.conductivity, Conductivity::Oriented { .. }))
    }

    /// Entry for a voxel value.
    pub fn resolve(&self, value: u16) -> Result<&MaterialEntry> {
        self.entries
            .iter()
            .find(|e| e.contains(value))
            .ok_or_else(|| {
                MaterialError::config(format!(
                    "voxel value {value} is not covered by any material range"
                ))
            })
    }

    /// Conductivity tensor for a voxel value and optional local orientation.
    pub fn tensor(&self, value: u16, orientation: Option<Vector>) -> Result<Tensor3> {
        Ok(self.resolve(value)?.conductivity.tensor(orientation))
    }
}

fn check_conductivity(name: &str, k: f64) -> Result<()> {
    ensure_config!(
        k.is_finite() && k > 0.,
        "{name} must be finite and > 0, got {k}"
    );
    Ok(())
}

/// Immutable lookup from voxel value to map entry, built once per run.
///
/// Building the table validates every value present in the workspace, so an
/// unresolved voxel is reported before any assembly starts.
#[derive(Debug, Clone)]
pub struct PhaseTable<'a> {
    map: &'a ConductivityMap,
    lookup: Vec<Option<usize>>,
}

impl<'a> PhaseTable<'a> {
    pub fn build(map: &'a ConductivityMap, ws: &Workspace) -> Result<Self> {
        ensure_config!(!map.entries.is_empty(), "conductivity map has no materials");
        let mut present = vec![false; usize::from(ws.max()) + 1];
        for v in ws.values() {
            present[usize::from(v)] = true;
        }
        let mut lookup = vec![None; present.len()];
        for (value, _) in present.iter().enumerate().filter(|(_, p)| **p) {
            let value = value as u16;
            let idx = map
                .entries
                .iter()
                .position(|e| e.contains(value))
                .ok_or_else(|| {
                    MaterialError::config(format!(
                        "voxel value {value} is not covered by any material range"
                    ))
                })?;
            lookup[usize::from(value)] = Some(idx);
        }
        Ok(Self { map, lookup })
    }

    pub fn map(&self) -> &ConductivityMap {
        self.map
    }

    /// Entry for a value that was present when the table was built.
    pub fn entry(&self, value: u16) -> Option<&MaterialEntry> {
        let idx = (*self.lookup.get(usize::from(value))?)?;
        self.map.entries.get(idx)
    }
}

/// Per-voxel conductivities of one simulation run.
#[derive(Debug, Clone, PartialEq)]
pub enum ConductivityField {
    Scalar(Vec<f64>),
    Tensor(Vec<Tensor3>),
}

impl ConductivityField {
    /// Resolves every voxel of the workspace.
    ///
    /// Isotropic maps produce a scalar field, anisotropic maps a tensor field
    /// rotated into the workspace orientation.
    pub fn build(ws: &Workspace, map: &ConductivityMap) -> Result<Self> {
        let table = PhaseTable::build(map, ws)?;
        let values: Vec<u16> = ws.values().collect();
        let missing = |v: u16| {
            MaterialError::config(format!("voxel value {v} is not covered by any material range"))
        };

        match map.kind() {
            MapKind::Isotropic => {
                let k = values
                    .iter()
                    .map(|&v| match table.entry(v) {
                        Some(MaterialEntry {
                            conductivity: Conductivity::Isotropic(k),
                            ..
                        }) => Ok(*k),
                        Some(_) => Err(MaterialError::config(
                            "oriented material in an isotropic conductivity map",
                        )),
                        None => Err(missing(v)),
                    })
                    .collect::<Result<Vec<f64>>>()?;
                Ok(Self::Scalar(k))
            }
            MapKind::Anisotropic => {
                let (_, ny, nz) = ws.shape();
                let orientation = ws.orientation();
                let unoriented = std::sync::atomic::AtomicUsize::new(0);
                let tensors = values
                    .par_iter()
                    .enumerate()
                    .map(|(idx, &v)| {
                        let entry = table.entry(v).ok_or_else(|| missing(v))?;
                        let local = orientation.and_then(|o| {
                            let (i, j, k) = (idx / (ny * nz), (idx / nz) % ny, idx % nz);
                            let dir = Vector::new(o[(i, j, k, 0)], o[(i, j, k, 1)], o[(i, j, k, 2)]);
                            dir.normalize()
                        });
                        if local.is_none()
                            && matches!(entry.conductivity, Conductivity::Oriented { .. })
                        {
                            unoriented.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        }
                        Ok(entry.conductivity.tensor(local))
                    })
                    .collect::<Result<Vec<Tensor3>>>()?;
                let unoriented = unoriented.into_inner();
                if unoriented > 0 {
                    tracing::warn!(
                        voxels = unoriented,
                        "oriented material without orientation; using the identity frame"
                    );
                }
                Ok(Self::Tensor(tensors))
            }
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Scalar(k) => k.len(),
            Self::Tensor(k) => k.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn tensor(&self, idx: usize) -> Tensor3 {
        match self {
            Self::Scalar(k) => Tensor3::identity() * k[idx],
            Self::Tensor(k) => k[idx],
        }
    }

    pub fn scalar(&self, idx: usize) -> Option<f64> {
        match self {
            Self::Scalar(k) => Some(k[idx]),
            Self::Tensor(_) => None,
        }
    }
}
