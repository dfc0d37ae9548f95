//! Trilinear (Q1) finite elements on the voxel grid, periodic in all
//! directions.
//!
//! Nodes sit on voxel corners; with periodic wrap there are as many nodes as
//! voxels and node `(i, j, k)` is the lower corner of voxel `(i, j, k)`. The
//! temperature is split into a macroscopic linear part `G·x` with
//! `G = e_axis / L` and a periodic fluctuation `t̃` solving
//!
//! ```text
//! ∫ ∇v · K (G + ∇t̃) dV = 0   for all periodic v
//! ```
//!
//! One node is pinned to zero to remove the constant null space. The
//! operator is available matrix-free ([`FeOperator`]) or as an explicit
//! matrix ([`Fe::assemble`]); both give the same action.

use super::grid::VoxelGrid;
use super::map::ConductivityField;
use crate::Tensor3;
use crate::sim::linalg::{CsrMatrix, LinearOperator, Triplet};
use rayon::prelude::*;
use std::ops::Range;

/// Number of element slabs; fixed so that sums do not depend on the thread
/// count.
const SLAB_TASKS: usize = 32;

/// Local node `m = a + 2b + 4c` sits at corner `(a, b, c)`.
fn corner(m: usize, axis: usize) -> usize {
    (m >> axis) & 1
}

/// Integrals of shape-function derivatives on the unit cube.
#[derive(Debug, Clone)]
pub struct ReferenceElement {
    /// `s[a][b][m][n] = ∫ ∂_a N_m ∂_b N_n dξ`
    s: [[[[f64; 8]; 8]; 3]; 3],
    /// `Σ_a s[a][a]`
    s_iso: [[f64; 8]; 8],
    /// `d[a][m] = ∫ ∂_a N_m dξ`
    d: [[f64; 8]; 3],
}

impl ReferenceElement {
    pub fn new() -> Self {
        let g = 0.5 / 3f64.sqrt();
        let points = [0.5 - g, 0.5 + g];

        let shape_1d = |bit: usize, xi: f64| if bit == 1 { xi } else { 1. - xi };
        let dshape_1d = |bit: usize| if bit == 1 { 1. } else { -1. };
        let grad = |m: usize, xi: [f64; 3]| -> [f64; 3] {
            let mut out = [0.; 3];
            for (a, o) in out.iter_mut().enumerate() {
                *o = (0..3)
                    .map(|b| {
                        if a == b {
                            dshape_1d(corner(m, b))
                        } else {
                            shape_1d(corner(m, b), xi[b])
                        }
                    })
                    .product();
            }
            out
        };

        let mut s = [[[[0.; 8]; 8]; 3]; 3];
        let mut d = [[0.; 8]; 3];
        // 2x2x2 Gauss rule, weight 1/8 per point
        for &x in &points {
            for &y in &points {
                for &z in &points {
                    let grads: Vec<[f64; 3]> = (0..8).map(|m| grad(m, [x, y, z])).collect();
                    for a in 0..3 {
                        for m in 0..8 {
                            d[a][m] += 0.125 * grads[m][a];
                            for b in 0..3 {
                                for n in 0..8 {
                                    s[a][b][m][n] += 0.125 * grads[m][a] * grads[n][b];
                                }
                            }
                        }
                    }
                }
            }
        }

        let mut s_iso = [[0.; 8]; 8];
        for (m, row) in s_iso.iter_mut().enumerate() {
            for (n, v) in row.iter_mut().enumerate() {
                *v = (0..3).map(|a| s[a][a][m][n]).sum();
            }
        }
        Self { s, s_iso, d }
    }

    /// Element stiffness for a voxel of edge `h` with conductivity `k`.
    pub fn stiffness(&self, k: &Tensor3, h: f64) -> [[f64; 8]; 8] {
        let mut ke = [[0.; 8]; 8];
        for a in 0..3 {
            for b in 0..3 {
                let kab = k.get(a, b);
                if kab == 0. {
                    continue;
                }
                for (m, row) in ke.iter_mut().enumerate() {
                    for (n, v) in row.iter_mut().enumerate() {
                        *v += h * kab * self.s[a][b][m][n];
                    }
                }
            }
        }
        ke
    }

    fn stiffness_scalar(&self, k: f64, h: f64) -> [[f64; 8]; 8] {
        self.s_iso.map(|row| row.map(|v| h * k * v))
    }
}

impl Default for ReferenceElement {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodic Q1 discretization of one cell problem.
pub struct Fe<'a> {
    grid: VoxelGrid,
    k: &'a ConductivityField,
    reference: ReferenceElement,
    /// Macroscopic gradient `G`.
    gradient: [f64; 3],
    /// Node fixed at zero.
    pinned: usize,
    /// Element slabs (ranges along axis 0) processed as parallel tasks.
    slabs: Vec<Range<usize>>,
}

impl<'a> Fe<'a> {
    /// Cell problem with a unit temperature difference along `axis`.
    pub(crate) fn new(grid: VoxelGrid, k: &'a ConductivityField, axis: usize) -> Self {
        debug_assert_eq!(grid.len(), k.len());
        let mut gradient = [0.; 3];
        gradient[axis] = 1. / grid.extent(axis);

        let nx = grid.dims[0];
        let tasks = SLAB_TASKS.min(nx);
        let slabs = (0..tasks)
            .map(|t| t * nx / tasks..(t + 1) * nx / tasks)
            .filter(|r| !r.is_empty())
            .collect();
        Self {
            grid,
            k,
            reference: ReferenceElement::new(),
            gradient,
            pinned: 0,
            slabs,
        }
    }

    pub fn len(&self) -> usize {
        self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grid.is_empty()
    }

    fn nodes(&self, e: [usize; 3]) -> [usize; 8] {
        let [nx, ny, nz] = self.grid.dims;
        std::array::from_fn(|m| {
            self.grid.index([
                (e[0] + corner(m, 0)) % nx,
                (e[1] + corner(m, 1)) % ny,
                (e[2] + corner(m, 2)) % nz,
            ])
        })
    }

    fn element_stiffness(&self, e: usize) -> [[f64; 8]; 8] {
        match self.k.scalar(e) {
            Some(k) => self.reference.stiffness_scalar(k, self.grid.step),
            None => self.reference.stiffness(&self.k.tensor(e), self.grid.step),
        }
    }

    /// Assembles a nodal vector from per-element contributions.
    ///
    /// Each slab scatters into a private buffer covering its node planes;
    /// buffers are then added in slab order, so the sum is deterministic.
    fn scatter<F>(&self, element: F) -> Vec<f64>
    where
        F: Fn(usize, &[usize; 8]) -> [f64; 8] + Sync,
    {
        let [nx, ny, nz] = self.grid.dims;
        let plane = ny * nz;
        let parts: Vec<Vec<f64>> = self
            .slabs
            .par_iter()
            .map(|slab| {
                let mut buf = vec![0.; (slab.len() + 1) * plane];
                for i in slab.clone() {
                    for j in 0..ny {
                        for k in 0..nz {
                            let e = self.grid.index([i, j, k]);
                            let nodes = self.nodes([i, j, k]);
                            let ye = element(e, &nodes);
                            for (m, v) in ye.into_iter().enumerate() {
                                let local = (i - slab.start + corner(m, 0)) * plane
                                    + ((j + corner(m, 1)) % ny) * nz
                                    + (k + corner(m, 2)) % nz;
                                buf[local] += v;
                            }
                        }
                    }
                }
                buf
            })
            .collect();

        let mut out = vec![0.; self.grid.len()];
        for (slab, buf) in self.slabs.iter().zip(parts) {
            for (r, chunk) in buf.chunks(plane).enumerate() {
                let row = ((slab.start + r) % nx) * plane;
                for (o, v) in out[row..row + plane].iter_mut().zip(chunk) {
                    *o += v;
                }
            }
        }
        out
    }

    /// Right-hand side `-∫ ∇N · K G dV`, zero at the pinned node.
    pub fn rhs(&self) -> Vec<f64> {
        let h = self.grid.step;
        let mut b = self.scatter(|e, _| {
            let kg = self.k.tensor(e).mul_vec(crate::Vector::from_array(self.gradient));
            std::array::from_fn(|m| {
                -h * h * (0..3).map(|a| self.reference.d[a][m] * kg[a]).sum::<f64>()
            })
        });
        b[self.pinned] = 0.;
        b
    }

    /// Matrix-free operator view.
    pub fn operator(&self) -> FeOperator<'_, 'a> {
        FeOperator { fe: self }
    }

    /// Explicit stiffness matrix with the pinned node eliminated.
    pub fn assemble(&self) -> CsrMatrix {
        let [_, ny, nz] = self.grid.dims;
        let chunks: Vec<Vec<Triplet>> = self
            .slabs
            .par_iter()
            .map(|slab| {
                let mut triplets = Vec::with_capacity(64 * slab.len() * ny * nz);
                for i in slab.clone() {
                    for j in 0..ny {
                        for k in 0..nz {
                            let e = self.grid.index([i, j, k]);
                            let nodes = self.nodes([i, j, k]);
                            let ke = self.element_stiffness(e);
                            for (m, row) in ke.iter().enumerate() {
                                for (n, &v) in row.iter().enumerate() {
                                    triplets.push(Triplet::new(nodes[m], nodes[n], v));
                                }
                            }
                        }
                    }
                }
                triplets
            })
            .collect();
        let n = self.grid.len();
        let full = CsrMatrix::from_triplets(n, chunks.into_iter().flatten().collect());
        let mut fixed = vec![None; n];
        fixed[self.pinned] = Some(0.);
        let mut scratch = vec![0.; n];
        full.eliminate_fixed(&fixed, &mut scratch)
    }

    /// Nodal temperature `G·x + t̃`.
    pub fn temperature(&self, fluctuation: &[f64]) -> Vec<f64> {
        let h = self.grid.step;
        fluctuation
            .iter()
            .enumerate()
            .map(|(idx, t)| {
                let c = self.grid.coords(idx);
                t + (0..3).map(|a| self.gradient[a] * c[a] as f64 * h).sum::<f64>()
            })
            .collect()
    }

    /// Element-averaged flux density `-K (G + ∇t̃)`.
    pub fn element_flux(&self, fluctuation: &[f64]) -> Vec<[f64; 3]> {
        let h = self.grid.step;
        (0..self.grid.len())
            .into_par_iter()
            .map(|e| {
                let nodes = self.nodes(self.grid.coords(e));
                let mut grad = self.gradient;
                for (a, g) in grad.iter_mut().enumerate() {
                    *g += nodes
                        .iter()
                        .enumerate()
                        .map(|(m, &node)| self.reference.d[a][m] * fluctuation[node])
                        .sum::<f64>()
                        / h;
                }
                let q = self.k.tensor(e).mul_vec(crate::Vector::from_array(grad));
                [-q.dx, -q.dy, -q.dz]
            })
            .collect()
    }
}

/// Matrix-free action of the periodic stiffness matrix.
///
/// The pinned node behaves as an identity row and column.
pub struct FeOperator<'f, 'a> {
    fe: &'f Fe<'a>,
}

impl LinearOperator for FeOperator<'_, '_> {
    fn len(&self) -> usize {
        self.fe.len()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        let pinned = self.fe.pinned;
        let out = self.fe.scatter(|e, nodes| {
            let ke = self.fe.element_stiffness(e);
            let xe = nodes.map(|n| if n == pinned { 0. } else { x[n] });
            ke.map(|row| row.iter().zip(&xe).map(|(a, b)| a * b).sum::<f64>())
        });
        y.copy_from_slice(&out);
        y[pinned] = x[pinned];
    }

    fn is_symmetric(&self) -> bool {
        true
    }

    fn diagonal(&self) -> Option<Vec<f64>> {
        let mut diag = self.fe.scatter(|e, nodes| {
            let ke = self.fe.element_stiffness(e);
            // Repeated nodes (a single voxel along an axis) couple to themselves.
            std::array::from_fn(|m| {
                (0..8)
                    .filter(|&n| nodes[n] == nodes[m])
                    .map(|n| ke[m][n])
                    .sum::<f64>()
            })
        });
        diag[self.fe.pinned] = 1.;
        Some(diag)
    }
}
