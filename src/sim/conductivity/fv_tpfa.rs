//! Two-point flux approximation for isotropic media.
//!
//! One unknown per voxel (cell-centered temperature). Interior faces use the
//! harmonic conductance `A / (h/(2 k1) + h/(2 k2))`, Dirichlet boundary faces
//! the half-cell conductance `2 k A / h`.

use super::boundary::{DomainBc, FaceKind};
use super::grid::VoxelGrid;
use crate::sim::linalg::{CsrMatrix, Triplet};
use rayon::prelude::*;

/// Cells per parallel assembly task.
pub(crate) const CELL_CHUNK: usize = 4096;

/// Assembled linear system `A T = b`.
#[derive(Debug, Clone)]
pub struct FvSystem {
    pub matrix: CsrMatrix,
    pub rhs: Vec<f64>,
}

/// Assembles one row per cell in parallel.
///
/// `row(idx, triplets)` pushes the entries of row `idx` and returns its
/// right-hand side. Chunks are concatenated in cell order, so the matrix is
/// identical for any number of threads.
pub(crate) fn assemble_rows<F>(n: usize, row: F) -> FvSystem
where
    F: Fn(usize, &mut Vec<Triplet>) -> f64 + Sync,
{
    let chunks: Vec<(Vec<Triplet>, Vec<f64>)> = (0..n.div_ceil(CELL_CHUNK))
        .into_par_iter()
        .map(|c| {
            let cells = c * CELL_CHUNK..((c + 1) * CELL_CHUNK).min(n);
            let mut triplets = Vec::with_capacity(7 * cells.len());
            let rhs = cells.map(|idx| row(idx, &mut triplets)).collect();
            (triplets, rhs)
        })
        .collect();

    let mut triplets = Vec::with_capacity(chunks.iter().map(|(t, _)| t.len()).sum());
    let mut rhs = Vec::with_capacity(n);
    for (t, b) in chunks {
        triplets.extend(t);
        rhs.extend(b);
    }
    FvSystem {
        matrix: CsrMatrix::from_triplets(n, triplets),
        rhs,
    }
}

pub struct Tpfa<'a> {
    grid: VoxelGrid,
    k: &'a [f64],
    bc: DomainBc,
}

impl<'a> Tpfa<'a> {
    pub(crate) fn new(grid: VoxelGrid, k: &'a [f64], bc: DomainBc) -> Self {
        debug_assert_eq!(grid.len(), k.len());
        Self { grid, k, bc }
    }

    /// Conductance between two neighboring cells.
    fn conductance(&self, a: usize, b: usize) -> f64 {
        let (ka, kb) = (self.k[a], self.k[b]);
        2. * self.grid.step * ka * kb / (ka + kb)
    }

    fn boundary_conductance(&self, a: usize) -> f64 {
        2. * self.grid.step * self.k[a]
    }

    pub fn assemble(&self) -> FvSystem {
        assemble_rows(self.grid.len(), |idx, triplets| {
            let c = self.grid.coords(idx);
            let mut diag = 0.;
            let mut rhs = 0.;
            for axis in 0..3 {
                for high in [false, true] {
                    match self
                        .grid
                        .neighbor(c, axis, high, self.bc.is_periodic(axis))
                    {
                        Some(nb) => {
                            let nb = self.grid.index(nb);
                            let g = self.conductance(idx, nb);
                            diag += g;
                            triplets.push(Triplet::new(idx, nb, -g));
                        }
                        None if self.bc.face(axis) == FaceKind::Dirichlet => {
                            let g = self.boundary_conductance(idx);
                            diag += g;
                            rhs += g * self.bc.face_temperature(axis, high, c);
                        }
                        None => {}
                    }
                }
            }
            triplets.push(Triplet::new(idx, idx, diag));
            rhs
        })
    }

    /// Heat flux through the low and high face of `idx` along `axis`, both
    /// counted in the positive axis direction.
    fn face_fluxes(&self, t: &[f64], idx: usize, axis: usize) -> [f64; 2] {
        let c = self.grid.coords(idx);
        let periodic = self.bc.is_periodic(axis);
        let mut out = [0.; 2];
        for (side, high) in [false, true].into_iter().enumerate() {
            let (g, t_other) = match self.grid.neighbor(c, axis, high, periodic) {
                Some(nb) => {
                    let nb = self.grid.index(nb);
                    (self.conductance(idx, nb), t[nb])
                }
                None if self.bc.face(axis) == FaceKind::Dirichlet => (
                    self.boundary_conductance(idx),
                    self.bc.face_temperature(axis, high, c),
                ),
                None => continue,
            };
            out[side] = if high {
                g * (t[idx] - t_other)
            } else {
                g * (t_other - t[idx])
            };
        }
        out
    }

    /// Cell-centered flux density: mean of the two face fluxes per axis.
    pub fn cell_flux(&self, t: &[f64]) -> Vec<[f64; 3]> {
        let area = self.grid.step * self.grid.step;
        (0..self.grid.len())
            .into_par_iter()
            .map(|idx| {
                let mut q = [0.; 3];
                for (axis, qa) in q.iter_mut().enumerate() {
                    let [low, high] = self.face_fluxes(t, idx, axis);
                    *qa = 0.5 * (low + high) / area;
                }
                q
            })
            .collect()
    }
}
