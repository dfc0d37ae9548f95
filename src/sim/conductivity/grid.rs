/// Index arithmetic on a regular voxel grid (row-major, `k` fastest).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoxelGrid {
    pub dims: [usize; 3],
    /// Voxel edge length.
    pub step: f64,
}

impl VoxelGrid {
    pub fn new(dims: (usize, usize, usize), step: f64) -> Self {
        Self {
            dims: [dims.0, dims.1, dims.2],
            step,
        }
    }

    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, c: [usize; 3]) -> usize {
        (c[0] * self.dims[1] + c[1]) * self.dims[2] + c[2]
    }

    pub fn coords(&self, idx: usize) -> [usize; 3] {
        let k = idx % self.dims[2];
        let j = (idx / self.dims[2]) % self.dims[1];
        let i = idx / (self.dims[1] * self.dims[2]);
        [i, j, k]
    }

    /// Length of the domain along `axis`.
    pub fn extent(&self, axis: usize) -> f64 {
        self.dims[axis] as f64 * self.step
    }

    /// Neighbor of `c` one step along `axis` (`high` = positive direction).
    ///
    /// Wraps around when `periodic`, otherwise `None` past the boundary.
    pub fn neighbor(&self, c: [usize; 3], axis: usize, high: bool, periodic: bool) -> Option<[usize; 3]> {
        let n = self.dims[axis];
        let mut out = c;
        if high {
            if c[axis] + 1 < n {
                out[axis] += 1;
            } else if periodic {
                out[axis] = 0;
            } else {
                return None;
            }
        } else if c[axis] > 0 {
            out[axis] -= 1;
        } else if periodic {
            out[axis] = n - 1;
        } else {
            return None;
        }
        Some(out)
    }

    /// Resolves a possibly out-of-range signed coordinate.
    pub fn wrap(&self, c: [isize; 3], periodic: [bool; 3]) -> Option<[usize; 3]> {
        let mut out = [0; 3];
        for a in 0..3 {
            let n = self.dims[a] as isize;
            out[a] = if (0..n).contains(&c[a]) {
                c[a] as usize
            } else if periodic[a] {
                c[a].rem_euclid(n) as usize
            } else {
                return None;
            };
        }
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_roundtrip_and_neighbors() {
        let g = VoxelGrid::new((3, 4, 5), 0.5);
        assert_eq!(g.len(), 60);
        assert_eq!(g.index([2, 3, 4]), 59);
        assert_eq!(g.coords(g.index([1, 2, 3])), [1, 2, 3]);
        assert_eq!(g.extent(1), 2.);

        assert_eq!(g.neighbor([2, 0, 0], 0, true, false), None);
        assert_eq!(g.neighbor([2, 0, 0], 0, true, true), Some([0, 0, 0]));
        assert_eq!(g.neighbor([0, 0, 0], 2, false, true), Some([0, 0, 4]));
        assert_eq!(g.neighbor([0, 1, 0], 1, false, false), Some([0, 0, 0]));

        assert_eq!(g.wrap([-1, 0, 5], [true, false, true]), Some([2, 0, 0]));
        assert_eq!(g.wrap([-1, 0, 0], [false, true, true]), None);
    }
}
