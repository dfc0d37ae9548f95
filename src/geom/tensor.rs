use crate::geom::vector::Vector;
use std::fmt;
use std::ops::{Add, Mul};

/// Dense 3x3 matrix, row-major.
///
/// Used for conductivity tensors, structure tensors and the effective
/// conductivity tensor.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Tensor3 {
    pub m: [[f64; 3]; 3],
}

impl Tensor3 {
    pub fn new(m: [[f64; 3]; 3]) -> Self {
        Self { m }
    }

    pub fn zeros() -> Self {
        Self { m: [[0.; 3]; 3] }
    }

    pub fn identity() -> Self {
        Self::diagonal(1., 1., 1.)
    }

    pub fn diagonal(a: f64, b: f64, c: f64) -> Self {
        Self {
            m: [[a, 0., 0.], [0., b, 0.], [0., 0., c]],
        }
    }

    /// Symmetric tensor from its six independent components
    /// `[xx, yy, zz, xy, xz, yz]`.
    pub fn from_symmetric(c: [f64; 6]) -> Self {
        let [xx, yy, zz, xy, xz, yz] = c;
        Self {
            m: [[xx, xy, xz], [xy, yy, yz], [xz, yz, zz]],
        }
    }

    /// Outer product `a ⊗ b`.
    pub fn outer(a: Vector, b: Vector) -> Self {
        let a = a.to_array();
        let b = b.to_array();
        let mut m = [[0.; 3]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = a[i] * b[j];
            }
        }
        Self { m }
    }

    /// Transversely isotropic tensor: `along` in direction `axis`, `cross`
    /// in the plane normal to it.
    ///
    /// Equal to `R diag(along, cross, cross) Rᵀ` for any rotation `R` that
    /// maps the x axis onto `axis`.
    pub fn transversely_isotropic(along: f64, cross: f64, axis: Vector) -> Self {
        Self::identity() * cross + Self::outer(axis, axis) * (along - cross)
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.m[i][j]
    }

    pub fn transpose(&self) -> Self {
        let mut m = [[0.; 3]; 3];
        for (i, row) in m.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = self.m[j][i];
            }
        }
        Self { m }
    }

    pub fn mul_vec(&self, v: Vector) -> Vector {
        let v = v.to_array();
        let mut out = [0.; 3];
        for (i, o) in out.iter_mut().enumerate() {
            *o = (0..3).map(|j| self.m[i][j] * v[j]).sum();
        }
        Vector::from_array(out)
    }

    /// Whether the off-diagonal entries vanish (relative to the diagonal).
    pub fn is_diagonal(&self) -> bool {
        let scale = (0..3).map(|i| self.m[i][i].abs()).fold(0., f64::max);
        (0..3).all(|i| (0..3).all(|j| i == j || self.m[i][j].abs() <= 1e-14 * scale))
    }

    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        let mut d = 0.0_f64;
        for i in 0..3 {
            for j in 0..3 {
                d = d.max((self.m[i][j] - other.m[i][j]).abs());
            }
        }
        d
    }

    /// Eigen-decomposition of a symmetric tensor using cyclic Jacobi rotations.
    ///
    /// Returns eigenvalues in ascending order together with the matching unit
    /// eigenvectors. The sort is stable, so equal eigenvalues keep the order
    /// in which the Jacobi sweep produced them. Only the upper triangle of
    /// `self` is read.
    pub fn symmetric_eigen(&self) -> ([f64; 3], [Vector; 3]) {
        let mut a = self.m;
        for i in 0..3 {
            for j in 0..i {
                a[i][j] = a[j][i];
            }
        }
        let mut v = Self::identity().m;

        let scale: f64 = a.iter().flatten().map(|x| x * x).sum::<f64>().sqrt();
        if scale > 0. {
            for _ in 0..64 {
                let off = a[0][1].powi(2) + a[0][2].powi(2) + a[1][2].powi(2);
                if off.sqrt() <= 1e-15 * scale {
                    break;
                }
                for (p, q) in [(0, 1), (0, 2), (1, 2)] {
                    if a[p][q].abs() <= f64::MIN_POSITIVE {
                        continue;
                    }
                    let theta = (a[q][q] - a[p][p]) / (2. * a[p][q]);
                    let t = theta.signum() / (theta.abs() + (theta * theta + 1.).sqrt());
                    let c = 1. / (t * t + 1.).sqrt();
                    let s = t * c;
                    for k in 0..3 {
                        let akp = a[k][p];
                        let akq = a[k][q];
                        a[k][p] = c * akp - s * akq;
                        a[k][q] = s * akp + c * akq;
                    }
                    for k in 0..3 {
                        let apk = a[p][k];
                        let aqk = a[q][k];
                        a[p][k] = c * apk - s * aqk;
                        a[q][k] = s * apk + c * aqk;
                    }
                    for row in v.iter_mut() {
                        let vp = row[p];
                        let vq = row[q];
                        row[p] = c * vp - s * vq;
                        row[q] = s * vp + c * vq;
                    }
                }
            }
        }

        let mut order = [0, 1, 2];
        order.sort_by(|&i, &j| a[i][i].total_cmp(&a[j][j]));
        let values = order.map(|i| a[i][i]);
        let vectors = order.map(|i| {
            let col = Vector::new(v[0][i], v[1][i], v[2][i]);
            col.normalize().unwrap_or(Vector::unit(i))
        });
        (values, vectors)
    }
}

impl Add for Tensor3 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        let mut m = self.m;
        for (i, row) in m.iter_mut().enumerate() {
            for (j, v) in row.iter_mut().enumerate() {
                *v += other.m[i][j];
            }
        }
        Self { m }
    }
}

impl Mul<f64> for Tensor3 {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self {
            m: self.m.map(|row| row.map(|v| v * s)),
        }
    }
}

impl fmt::Display for Tensor3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prec = f.precision().unwrap_or(6);
        for (i, row) in self.m.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(
                f,
                "[ {:.prec$} {:.prec$} {:.prec$} ]",
                row[0],
                row[1],
                row[2],
                prec = prec
            )?;
        }
        Ok(())
    }
}
