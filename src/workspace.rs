//! Voxel workspace: the material sample the solvers run on.
//!
//! A [`Workspace`] holds a 3D grid of `u16` grayscale/label values with a
//! physical voxel length, and optionally a per-voxel orientation field
//! (shape `[nx, ny, nz, 3]`, zero vector = undefined).

use crate::Vector;
use crate::error::{MaterialError, Result, ensure_config};
use ndarray::{Array3, Array4, Axis, s};
use std::ops::Range;

#[derive(Debug, Clone, PartialEq)]
pub struct Workspace {
    matrix: Array3<u16>,
    voxel_length: f64,
    orientation: Option<Array4<f64>>,
}

impl Workspace {
    /// Creates a workspace of the given shape filled with `value`.
    pub fn new(shape: (usize, usize, usize), voxel_length: f64, value: u16) -> Result<Self> {
        Self::from_array(Array3::from_elem(shape, value), voxel_length)
    }

    /// Wraps an existing array (e.g. produced by an image importer).
    pub fn from_array(matrix: Array3<u16>, voxel_length: f64) -> Result<Self> {
        let (nx, ny, nz) = matrix.dim();
        if nx == 0 || ny == 0 || nz == 0 {
            return Err(MaterialError::dimension(format!(
                "workspace dimensions must be > 0, got ({nx}, {ny}, {nz})"
            )));
        }
        check_voxel_length(voxel_length)?;
        Ok(Self {
            matrix: matrix.as_standard_layout().into_owned(),
            voxel_length,
            orientation: None,
        })
    }

    /// Builds a workspace by evaluating `f(i, j, k)` for every voxel.
    pub fn from_fn<F>(shape: (usize, usize, usize), voxel_length: f64, f: F) -> Result<Self>
    where
        F: FnMut((usize, usize, usize)) -> u16,
    {
        Self::from_array(Array3::from_shape_fn(shape, f), voxel_length)
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.matrix.dim()
    }

    /// Number of voxels.
    pub fn len(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_empty(&self) -> bool {
        self.matrix.is_empty()
    }

    pub fn voxel_length(&self) -> f64 {
        self.voxel_length
    }

    pub fn set_voxel_length(&mut self, voxel_length: f64) -> Result<()> {
        check_voxel_length(voxel_length)?;
        self.voxel_length = voxel_length;
        Ok(())
    }

    pub fn matrix(&self) -> &Array3<u16> {
        &self.matrix
    }

    /// Voxel values in standard (row-major) order.
    pub fn values(&self) -> impl Iterator<Item = u16> + '_ {
        self.matrix.iter().copied()
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<u16> {
        self.matrix.get((i, j, k)).copied()
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, value: u16) -> Result<()> {
        let shape = self.shape();
        let v = self.matrix.get_mut((i, j, k)).ok_or_else(|| {
            MaterialError::dimension(format!("voxel ({i}, {j}, {k}) outside {shape:?}"))
        })?;
        *v = value;
        Ok(())
    }

    /// Sets every voxel inside the given index ranges to `value`.
    pub fn fill_region(
        &mut self,
        x: Range<usize>,
        y: Range<usize>,
        z: Range<usize>,
        value: u16,
    ) -> Result<()> {
        self.check_ranges(&x, &y, &z)?;
        self.matrix.slice_mut(s![x, y, z]).fill(value);
        Ok(())
    }

    pub fn min(&self) -> u16 {
        self.values().min().unwrap_or(0)
    }

    pub fn max(&self) -> u16 {
        self.values().max().unwrap_or(0)
    }

    /// Fraction of voxels whose value lies in the inclusive range.
    pub fn volume_fraction(&self, range: (u16, u16)) -> f64 {
        let inside = self
            .values()
            .filter(|v| (range.0..=range.1).contains(v))
            .count();
        inside as f64 / self.len() as f64
    }

    /// Crops the workspace (and its orientation field) to the given ranges.
    pub fn crop(&mut self, x: Range<usize>, y: Range<usize>, z: Range<usize>) -> Result<()> {
        self.check_ranges(&x, &y, &z)?;
        ensure_config!(
            !x.is_empty() && !y.is_empty() && !z.is_empty(),
            "crop ranges must not be empty"
        );
        self.matrix = self
            .matrix
            .slice(s![x.clone(), y.clone(), z.clone()])
            .to_owned();
        if let Some(orientation) = &self.orientation {
            self.orientation = Some(orientation.slice(s![x, y, z, ..]).to_owned());
        }
        Ok(())
    }

    /// Rescales the grid by `scale`, adjusting the voxel length accordingly.
    ///
    /// Segmented (label) images are resampled with nearest neighbour,
    /// grayscale images with trilinear interpolation. The orientation field
    /// is discarded.
    pub fn rescale(&mut self, scale: f64, segmented: bool) -> Result<()> {
        ensure_config!(
            scale.is_finite() && scale > 0.,
            "rescale factor must be finite and > 0, got {scale}"
        );
        let (nx, ny, nz) = self.shape();
        let new_dim = |n: usize| ((n as f64 * scale).round() as usize).max(1);
        let shape = (new_dim(nx), new_dim(ny), new_dim(nz));

        let source = &self.matrix;
        let matrix = if segmented {
            Array3::from_shape_fn(shape, |(i, j, k)| {
                let pick = |idx: usize, n: usize| {
                    (((idx as f64 + 0.5) / scale).floor() as usize).min(n - 1)
                };
                source[(pick(i, nx), pick(j, ny), pick(k, nz))]
            })
        } else {
            Array3::from_shape_fn(shape, |(i, j, k)| {
                let (i0, i1, wx) = interp_coord(i, scale, nx);
                let (j0, j1, wy) = interp_coord(j, scale, ny);
                let (k0, k1, wz) = interp_coord(k, scale, nz);
                let lerp = |a: f64, b: f64, w: f64| a + (b - a) * w;
                let v = |a, b, c| f64::from(source[(a, b, c)]);
                let c00 = lerp(v(i0, j0, k0), v(i1, j0, k0), wx);
                let c10 = lerp(v(i0, j1, k0), v(i1, j1, k0), wx);
                let c01 = lerp(v(i0, j0, k1), v(i1, j0, k1), wx);
                let c11 = lerp(v(i0, j1, k1), v(i1, j1, k1), wx);
                let c0 = lerp(c00, c10, wy);
                let c1 = lerp(c01, c11, wy);
                lerp(c0, c1, wz).round().clamp(0., f64::from(u16::MAX)) as u16
            })
        };

        if self.orientation.is_some() {
            tracing::warn!("rescaling discards the orientation field");
        }
        self.voxel_length /= scale;
        self.matrix = matrix;
        self.orientation = None;
        Ok(())
    }

    /// Sets voxels `>= threshold` to 1 and the rest to 0.
    pub fn binarize(&mut self, threshold: u16) {
        self.matrix.mapv_inplace(|v| u16::from(v >= threshold));
    }

    /// Sets voxels inside the inclusive range to 1 and the rest to 0.
    pub fn binarize_range(&mut self, range: (u16, u16)) {
        self.matrix
            .mapv_inplace(|v| u16::from((range.0..=range.1).contains(&v)));
    }

    /// Attaches a per-voxel orientation field of shape `[nx, ny, nz, 3]`.
    pub fn set_orientation(&mut self, orientation: Array4<f64>) -> Result<()> {
        let (nx, ny, nz) = self.shape();
        if orientation.dim() != (nx, ny, nz, 3) {
            return Err(MaterialError::dimension(format!(
                "orientation shape {:?} does not match workspace shape ({nx}, {ny}, {nz}, 3)",
                orientation.dim()
            )));
        }
        self.orientation = Some(orientation.as_standard_layout().into_owned());
        Ok(())
    }

    /// Assigns one orientation to every voxel inside the inclusive range.
    pub fn set_material_orientation(&mut self, range: (u16, u16), direction: Vector) -> Result<()> {
        let unit = direction
            .normalize()
            .ok_or_else(|| MaterialError::config("orientation direction must be non-zero"))?;
        let (nx, ny, nz) = self.shape();
        let mut orientation = self
            .orientation
            .take()
            .unwrap_or_else(|| Array4::zeros((nx, ny, nz, 3)));
        for ((idx, &value), mut lane) in self
            .matrix
            .indexed_iter()
            .zip(orientation.lanes_mut(Axis(3)))
        {
            debug_assert_eq!(lane.len(), 3, "voxel {idx:?}");
            if (range.0..=range.1).contains(&value) {
                lane[0] = unit.dx;
                lane[1] = unit.dy;
                lane[2] = unit.dz;
            }
        }
        self.orientation = Some(orientation);
        Ok(())
    }

    pub fn clear_orientation(&mut self) {
        self.orientation = None;
    }

    pub fn orientation(&self) -> Option<&Array4<f64>> {
        self.orientation.as_ref()
    }

    /// Orientation at a voxel, `None` where it is undefined.
    pub fn orientation_at(&self, i: usize, j: usize, k: usize) -> Option<Vector> {
        let o = self.orientation.as_ref()?;
        let v = Vector::new(
            *o.get((i, j, k, 0))?,
            *o.get((i, j, k, 1))?,
            *o.get((i, j, k, 2))?,
        );
        if v.length() > 0. { Some(v) } else { None }
    }

    fn check_ranges(&self, x: &Range<usize>, y: &Range<usize>, z: &Range<usize>) -> Result<()> {
        let (nx, ny, nz) = self.shape();
        for (axis, r, n) in [("x", x, nx), ("y", y, ny), ("z", z, nz)] {
            if r.start > r.end || r.end > n {
                return Err(MaterialError::dimension(format!(
                    "{axis} range {r:?} outside 0..{n}"
                )));
            }
        }
        Ok(())
    }
}

fn check_voxel_length(voxel_length: f64) -> Result<()> {
    ensure_config!(
        voxel_length.is_finite() && voxel_length > 0.,
        "voxel length must be finite and > 0, got {voxel_length}"
    );
    Ok(())
}

/// Source indices and weight for output index `idx` after scaling by `scale`.
fn interp_coord(idx: usize, scale: f64, n: usize) -> (usize, usize, f64) {
    let x = ((idx as f64 + 0.5) / scale - 0.5).clamp(0., (n - 1) as f64);
    let lo = x.floor() as usize;
    let hi = (lo + 1).min(n - 1);
    (lo, hi, x - lo as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_input() {
        assert!(matches!(
            Workspace::new((0, 2, 2), 1.0, 0),
            Err(MaterialError::Dimension(_))
        ));
        assert!(matches!(
            Workspace::new((2, 2, 2), 0.0, 0),
            Err(MaterialError::Configuration(_))
        ));
        assert!(Workspace::new((2, 2, 2), f64::NAN, 0).is_err());
    }

    #[test]
    fn test_crop_keeps_orientation_in_sync() {
        let mut ws = Workspace::from_fn((4, 4, 4), 1e-6, |(i, _, _)| i as u16).unwrap();
        ws.set_material_orientation((2, 3), Vector::new(0., 0., 2.)).unwrap();
        ws.crop(1..3, 0..2, 0..4).unwrap();
        assert_eq!(ws.shape(), (2, 2, 4));
        assert_eq!(ws.get(0, 0, 0), Some(1));
        assert_eq!(ws.orientation().unwrap().dim(), (2, 2, 4, 3));
        assert_eq!(ws.orientation_at(0, 0, 0), None);
        assert_eq!(ws.orientation_at(1, 0, 0), Some(Vector::unit(2)));
        assert!(ws.crop(0..3, 0..1, 0..1).is_err());
    }

    #[test]
    fn test_rescale_segmented_and_grayscale() {
        let mut ws = Workspace::from_fn((4, 4, 4), 1.0, |(i, _, _)| if i < 2 { 0 } else { 200 })
            .unwrap();
        let mut gray = ws.clone();

        ws.rescale(0.5, true).unwrap();
        assert_eq!(ws.shape(), (2, 2, 2));
        assert_eq!(ws.voxel_length(), 2.0);
        assert_eq!(ws.get(0, 0, 0), Some(0));
        assert_eq!(ws.get(1, 1, 1), Some(200));

        gray.rescale(2.0, false).unwrap();
        assert_eq!(gray.shape(), (8, 8, 8));
        assert_eq!(gray.voxel_length(), 0.5);
        assert_eq!(gray.get(0, 3, 3), Some(0));
        assert_eq!(gray.get(7, 0, 0), Some(200));
        // Voxels straddling the interface are interpolated.
        let mid = gray.get(4, 0, 0).unwrap();
        assert!(mid > 0 && mid < 200, "mid={mid}");
    }

    #[test]
    fn test_binarize() {
        let mut ws = Workspace::from_fn((3, 1, 1), 1.0, |(i, _, _)| 100 * i as u16).unwrap();
        let mut ranged = ws.clone();
        ws.binarize(100);
        assert_eq!(ws.values().collect::<Vec<_>>(), vec![0, 1, 1]);
        ranged.binarize_range((50, 150));
        assert_eq!(ranged.values().collect::<Vec<_>>(), vec![0, 1, 0]);
    }

    #[test]
    fn test_set_orientation_checks_shape() {
        let mut ws = Workspace::new((2, 3, 4), 1.0, 0).unwrap();
        let err = ws.set_orientation(Array4::zeros((2, 3, 4, 2))).unwrap_err();
        assert!(matches!(err, MaterialError::Dimension(_)));
        ws.set_orientation(Array4::zeros((2, 3, 4, 3))).unwrap();
        assert_eq!(ws.orientation_at(1, 1, 1), None);
    }

    #[test]
    fn test_volume_fraction_and_fill() {
        let mut ws = Workspace::new((4, 4, 4), 1.0, 0).unwrap();
        ws.fill_region(0..2, 0..4, 0..4, 255).unwrap();
        assert_eq!(ws.volume_fraction((128, 255)), 0.5);
        assert_eq!((ws.min(), ws.max()), (0, 255));
        assert!(ws.fill_region(0..5, 0..1, 0..1, 1).is_err());
        assert!(ws.set(4, 0, 0, 1).is_err());
    }
}
