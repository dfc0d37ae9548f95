//! Voxel workspace JSON format.
//!
//! Voxel values are stored flat in row-major order (`k` fastest), the same
//! order as [`crate::Workspace::values`].

use crate::Workspace;
use anyhow::{Context, Result, anyhow};
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

/// Root structure of a workspace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoxelFile {
    /// `[nx, ny, nz]`
    pub shape: [usize; 3],
    /// Edge length of one voxel in meters
    pub voxel_length: f64,
    /// Flat voxel values, `nx * ny * nz` entries
    pub values: Vec<u16>,
    /// Flat orientation field, `3 * nx * ny * nz` entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Vec<f64>>,
}

impl VoxelFile {
    pub fn from_workspace(ws: &Workspace) -> Self {
        let (nx, ny, nz) = ws.shape();
        Self {
            shape: [nx, ny, nz],
            voxel_length: ws.voxel_length(),
            values: ws.values().collect(),
            orientation: ws.orientation().map(|o| o.iter().copied().collect()),
        }
    }

    pub fn into_workspace(self) -> Result<Workspace> {
        let [nx, ny, nz] = self.shape;
        let matrix = Array3::from_shape_vec((nx, ny, nz), self.values)
            .map_err(|e| anyhow!("Voxel values do not match shape {:?}: {e}", self.shape))?;
        let mut ws = Workspace::from_array(matrix, self.voxel_length)?;
        if let Some(orientation) = self.orientation {
            let field = Array4::from_shape_vec((nx, ny, nz, 3), orientation)
                .map_err(|e| anyhow!("Orientation does not match shape {:?}: {e}", self.shape))?;
            ws.set_orientation(field)?;
        }
        Ok(ws)
    }
}

/// Writes a workspace to a JSON file.
pub fn write_workspace(path: &Path, ws: &Workspace) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    let writer = BufWriter::new(file);

    serde_json::to_writer(writer, &VoxelFile::from_workspace(ws))
        .with_context(|| format!("Failed to serialize workspace to: {}", path.display()))?;

    Ok(())
}

/// Reads a workspace from a JSON file.
pub fn read_workspace(path: &Path) -> Result<Workspace> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let reader = BufReader::new(file);

    let voxels: VoxelFile = serde_json::from_reader(reader)
        .with_context(|| format!("Failed to deserialize workspace from: {}", path.display()))?;

    voxels
        .into_workspace()
        .with_context(|| format!("Invalid workspace in: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Vector;
    use tempfile::tempdir;

    #[test]
    fn test_write_and_read_workspace() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("sample.json");

        let mut original = Workspace::from_fn((3, 2, 4), 0.5, |(i, j, k)| (i * 8 + j * 4 + k) as u16)?;
        original.set_material_orientation((0, 5), Vector::new(0., 0., 1.))?;
        write_workspace(&path, &original)?;

        let loaded = read_workspace(&path)?;
        assert_eq!(loaded, original);
        assert_eq!(loaded.orientation_at(0, 0, 1), Some(Vector::unit(2)));
        assert_eq!(loaded.orientation_at(2, 1, 3), None);
        Ok(())
    }

    #[test]
    fn test_rejects_inconsistent_file() {
        let bad = VoxelFile {
            shape: [2, 2, 2],
            voxel_length: 1.0,
            values: vec![0; 7],
            orientation: None,
        };
        assert!(bad.into_workspace().is_err());

        let dir = tempdir().unwrap();
        assert!(read_workspace(&dir.path().join("missing.json")).is_err());
    }
}
