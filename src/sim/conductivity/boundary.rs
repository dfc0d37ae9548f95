use crate::error::{MaterialError, Result, ensure_config};
use ndarray::Array3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction along which the unit temperature difference is imposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    /// Array axis index (0, 1 or 2).
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Axis {
    type Err = MaterialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            other => Err(MaterialError::config(format!(
                "unknown direction '{other}' (expected x, y or z)"
            ))),
        }
    }
}

/// Condition on the domain faces normal to the non-imposed axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SideBc {
    /// Opposite faces are connected.
    #[default]
    Periodic,
    /// Zero normal flux (insulated).
    Symmetric,
    /// Linear temperature profile along the imposed axis.
    Dirichlet,
}

impl fmt::Display for SideBc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SideBc::Periodic => "periodic",
            SideBc::Symmetric => "symmetric",
            SideBc::Dirichlet => "dirichlet",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SideBc {
    type Err = MaterialError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "p" | "periodic" => Ok(SideBc::Periodic),
            "s" | "symmetric" => Ok(SideBc::Symmetric),
            "d" | "dirichlet" => Ok(SideBc::Dirichlet),
            other => Err(MaterialError::config(format!(
                "unknown side boundary condition '{other}' (expected periodic, symmetric or dirichlet)"
            ))),
        }
    }
}

/// Per-voxel prescribed temperatures. `NaN` marks a free voxel.
#[derive(Debug, Clone, PartialEq)]
pub struct PrescribedBc {
    values: Array3<f64>,
}

impl PrescribedBc {
    /// All voxels free.
    pub fn new(shape: (usize, usize, usize)) -> Self {
        Self {
            values: Array3::from_elem(shape, f64::NAN),
        }
    }

    pub fn from_array(values: Array3<f64>) -> Result<Self> {
        ensure_config!(
            values.iter().all(|v| v.is_nan() || v.is_finite()),
            "prescribed temperatures must be finite or NaN"
        );
        Ok(Self {
            values: values.as_standard_layout().into_owned(),
        })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    pub fn set(&mut self, i: usize, j: usize, k: usize, temperature: f64) -> Result<()> {
        ensure_config!(
            temperature.is_finite(),
            "prescribed temperature must be finite, got {temperature}"
        );
        let shape = self.shape();
        let v = self.values.get_mut((i, j, k)).ok_or_else(|| {
            MaterialError::dimension(format!("voxel ({i}, {j}, {k}) outside {shape:?}"))
        })?;
        *v = temperature;
        Ok(())
    }

    /// Fixes every voxel of the slice `index` normal to `axis`.
    pub fn set_slice(&mut self, axis: Axis, index: usize, temperature: f64) -> Result<()> {
        ensure_config!(
            temperature.is_finite(),
            "prescribed temperature must be finite, got {temperature}"
        );
        let n = self.values.len_of(ndarray::Axis(axis.index()));
        if index >= n {
            return Err(MaterialError::dimension(format!(
                "slice {index} outside 0..{n} along {axis}"
            )));
        }
        self.values
            .index_axis_mut(ndarray::Axis(axis.index()), index)
            .fill(temperature);
        Ok(())
    }

    pub fn get(&self, i: usize, j: usize, k: usize) -> Option<f64> {
        self.values.get((i, j, k)).copied().filter(|v| !v.is_nan())
    }

    pub fn fixed_count(&self) -> usize {
        self.values.iter().filter(|v| !v.is_nan()).count()
    }

    /// Fixed values in linear voxel order.
    pub(crate) fn to_fixed(&self) -> Vec<Option<f64>> {
        self.values
            .iter()
            .map(|&v| if v.is_nan() { None } else { Some(v) })
            .collect()
    }
}

/// Treatment of the two domain faces normal to one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FaceKind {
    Periodic,
    Insulated,
    Dirichlet,
}

/// Boundary treatment of all six domain faces for one run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DomainBc {
    faces: [FaceKind; 3],
    imposed: Option<usize>,
    shape: [usize; 3],
}

impl DomainBc {
    /// Unit temperature difference along `axis`; `side` on the other faces.
    pub fn imposed(axis: Axis, side: SideBc, shape: (usize, usize, usize)) -> Self {
        let side = match side {
            SideBc::Periodic => FaceKind::Periodic,
            SideBc::Symmetric => FaceKind::Insulated,
            SideBc::Dirichlet => FaceKind::Dirichlet,
        };
        let mut faces = [side; 3];
        faces[axis.index()] = FaceKind::Dirichlet;
        Self {
            faces,
            imposed: Some(axis.index()),
            shape: [shape.0, shape.1, shape.2],
        }
    }

    /// Same condition on every face; temperatures come from prescribed voxels.
    pub fn uniform(side: SideBc, shape: (usize, usize, usize)) -> Result<Self> {
        let face = match side {
            SideBc::Periodic => FaceKind::Periodic,
            SideBc::Symmetric => FaceKind::Insulated,
            SideBc::Dirichlet => {
                return Err(MaterialError::config(
                    "dirichlet side condition needs an imposed direction; \
                     use periodic or symmetric with prescribed temperatures",
                ));
            }
        };
        Ok(Self {
            faces: [face; 3],
            imposed: None,
            shape: [shape.0, shape.1, shape.2],
        })
    }

    pub fn face(&self, axis: usize) -> FaceKind {
        self.faces[axis]
    }

    pub fn is_periodic(&self, axis: usize) -> bool {
        self.faces[axis] == FaceKind::Periodic
    }

    /// Temperature on a Dirichlet boundary face of `cell`.
    ///
    /// On the imposed axis the low face is at 0 and the high face at 1. Side
    /// faces follow the linear profile at the cell's position along the
    /// imposed axis.
    pub fn face_temperature(&self, axis: usize, high: bool, cell: [usize; 3]) -> f64 {
        match self.imposed {
            Some(d) if d == axis => {
                if high {
                    1.
                } else {
                    0.
                }
            }
            Some(d) => (cell[d] as f64 + 0.5) / self.shape[d] as f64,
            None => 0.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        assert_eq!("Y".parse::<Axis>().unwrap(), Axis::Y);
        assert!("w".parse::<Axis>().is_err());
        assert_eq!("s".parse::<SideBc>().unwrap(), SideBc::Symmetric);
        assert_eq!("dirichlet".parse::<SideBc>().unwrap(), SideBc::Dirichlet);
        assert!("q".parse::<SideBc>().is_err());
    }

    #[test]
    fn test_prescribed_slices() {
        let mut bc = PrescribedBc::new((4, 2, 2));
        assert_eq!(bc.fixed_count(), 0);
        bc.set_slice(Axis::X, 0, 0.).unwrap();
        bc.set_slice(Axis::X, 3, 1.).unwrap();
        assert_eq!(bc.fixed_count(), 8);
        assert_eq!(bc.get(3, 1, 1), Some(1.));
        assert_eq!(bc.get(1, 0, 0), None);
        assert!(bc.set_slice(Axis::Y, 2, 0.).is_err());
        assert!(bc.set(0, 0, 0, f64::NAN).is_err());

        let fixed = bc.to_fixed();
        assert_eq!(fixed.len(), 16);
        assert_eq!(fixed[0], Some(0.));
        assert_eq!(fixed[4], None);
    }

    #[test]
    fn test_face_temperatures() {
        let bc = DomainBc::imposed(Axis::X, SideBc::Dirichlet, (4, 3, 3));
        assert_eq!(bc.face(0), FaceKind::Dirichlet);
        assert_eq!(bc.face(1), FaceKind::Dirichlet);
        assert_eq!(bc.face_temperature(0, false, [0, 1, 1]), 0.);
        assert_eq!(bc.face_temperature(0, true, [3, 1, 1]), 1.);
        assert_eq!(bc.face_temperature(1, true, [1, 2, 0]), 0.375);

        let periodic = DomainBc::imposed(Axis::Z, SideBc::Periodic, (2, 2, 2));
        assert!(periodic.is_periodic(0) && !periodic.is_periodic(2));
        assert!(DomainBc::uniform(SideBc::Dirichlet, (2, 2, 2)).is_err());
    }
}
