//! Multi-point flux approximation (O-method) for tensor conductivities.
//!
//! Every grid vertex owns an interaction region made of the (up to) eight
//! voxels around it and the twelve sub-faces (area `h²/4`) between them.
//! Inside each voxel octant the temperature is linear; its gradient is
//! expressed through auxiliary temperatures at the sub-face centers.
//! Requiring flux continuity on every sub-face gives a small local system
//! whose solution turns each sub-face flux into a linear combination of the
//! surrounding cell temperatures. Summing sub-face fluxes per cell gives the
//! global (generally non-symmetric) operator.
//!
//! Boundary sub-faces take the imposed temperature (Dirichlet) or carry zero
//! flux (insulated). For diagonal tensors the local systems decouple and the
//! scheme reduces to the two-point harmonic stencil.

use super::boundary::{DomainBc, FaceKind};
use super::fv_tpfa::FvSystem;
use super::grid::VoxelGrid;
use crate::Tensor3;
use crate::error::Result;
use crate::sim::linalg::dense::DenseLu;
use crate::sim::linalg::{CsrMatrix, Triplet};
use rayon::prelude::*;

/// Vertices per parallel task.
const VERTEX_CHUNK: usize = 512;
const SUBFACES: usize = 12;

/// Axis, lower local cell and upper local cell of sub-face `f`.
///
/// Local cell `l` has bit `a` set when it lies on the positive side of the
/// vertex along axis `a`.
fn subface_cells(f: usize) -> (usize, usize, usize) {
    let d = f / 4;
    let combo = f % 4;
    let (p, q) = ((d + 1) % 3, (d + 2) % 3);
    let lower = ((combo & 1) << p) | ((combo >> 1) << q);
    (d, lower, lower | (1 << d))
}

/// Sub-face normal to `axis` touching local cell `l`.
fn subface_of(l: usize, axis: usize) -> usize {
    let (p, q) = ((axis + 1) % 3, (axis + 2) % 3);
    axis * 4 + ((l >> p) & 1) + 2 * ((l >> q) & 1)
}

/// Direction from the center of local cell `l` towards the vertex.
fn toward_vertex(l: usize, axis: usize) -> f64 {
    if (l >> axis) & 1 == 0 { 1. } else { -1. }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SubfaceState {
    /// Both neighbors outside the domain.
    Unused,
    /// Interior sub-face with an unknown auxiliary temperature.
    Interior(usize),
    /// Insulated boundary sub-face: unknown temperature, zero flux.
    Insulated { unknown: usize, cell: usize },
    /// Dirichlet boundary sub-face with a known temperature.
    Fixed { value: f64, cell: usize },
}

/// Linear form over auxiliary and cell temperatures.
#[derive(Debug, Clone, Copy)]
struct LinForm {
    aux: [f64; SUBFACES],
    cell: [f64; 8],
    constant: f64,
}

impl LinForm {
    const ZERO: Self = Self {
        aux: [0.; SUBFACES],
        cell: [0.; 8],
        constant: 0.,
    };

    fn sub(mut self, other: &Self) -> Self {
        self.aux.iter_mut().zip(other.aux).for_each(|(a, b)| *a -= b);
        self.cell.iter_mut().zip(other.cell).for_each(|(a, b)| *a -= b);
        self.constant -= other.constant;
        self
    }
}

/// Sub-face flux (positive along its axis) in terms of cell temperatures.
#[derive(Debug, Clone, Copy)]
struct SubfaceFlux {
    axis: usize,
    lower: usize,
    upper: usize,
    coeff: [f64; 8],
    constant: f64,
}

struct Region {
    cells: [Option<usize>; 8],
    fluxes: Vec<SubfaceFlux>,
}

pub struct Mpfa<'a> {
    grid: VoxelGrid,
    k: &'a [Tensor3],
    bc: DomainBc,
    vertex_dims: [usize; 3],
}

impl<'a> Mpfa<'a> {
    pub(crate) fn new(grid: VoxelGrid, k: &'a [Tensor3], bc: DomainBc) -> Self {
        debug_assert_eq!(grid.len(), k.len());
        let mut vertex_dims = grid.dims;
        for (axis, n) in vertex_dims.iter_mut().enumerate() {
            if !bc.is_periodic(axis) {
                *n += 1;
            }
        }
        Self {
            grid,
            k,
            bc,
            vertex_dims,
        }
    }

    fn vertex_count(&self) -> usize {
        self.vertex_dims.iter().product()
    }

    fn vertex(&self, idx: usize) -> [usize; 3] {
        let [_, ny, nz] = self.vertex_dims;
        [idx / (ny * nz), (idx / nz) % ny, idx % nz]
    }

    /// Builds the interaction region of a vertex and eliminates its
    /// auxiliary unknowns.
    fn region(&self, v: [usize; 3]) -> Result<Region> {
        let periodic = [0, 1, 2].map(|a| self.bc.is_periodic(a));
        let mut coords: [Option<[usize; 3]>; 8] = [None; 8];
        for (l, c) in coords.iter_mut().enumerate() {
            let signed = [0, 1, 2].map(|a| v[a] as isize - 1 + ((l >> a) & 1) as isize);
            *c = self.grid.wrap(signed, periodic);
        }
        let cells = coords.map(|c| c.map(|c| self.grid.index(c)));

        let mut states = [SubfaceState::Unused; SUBFACES];
        let mut unknowns = 0;
        for (f, state) in states.iter_mut().enumerate() {
            let (d, lower, upper) = subface_cells(f);
            *state = match (coords[lower], coords[upper]) {
                (Some(_), Some(_)) => {
                    unknowns += 1;
                    SubfaceState::Interior(unknowns - 1)
                }
                (Some(c), None) | (None, Some(c)) => {
                    let cell = if coords[lower].is_some() { lower } else { upper };
                    match self.bc.face(d) {
                        FaceKind::Dirichlet => SubfaceState::Fixed {
                            value: self.bc.face_temperature(d, cell == lower, c),
                            cell,
                        },
                        _ => {
                            unknowns += 1;
                            SubfaceState::Insulated {
                                unknown: unknowns - 1,
                                cell,
                            }
                        }
                    }
                }
                (None, None) => SubfaceState::Unused,
            };
        }

        let half_step = 0.5 * self.grid.step;
        // Flux through the sub-face normal to `d` seen from local cell `l`:
        // F = -(h/2) Σ_b K_db s_b (u_f(l,b) - u_l)
        let flux_form = |l: usize, d: usize, kt: &Tensor3| {
            let mut form = LinForm::ZERO;
            for b in 0..3 {
                let coef = -half_step * kt.get(d, b) * toward_vertex(l, b);
                if coef == 0. {
                    continue;
                }
                let f = subface_of(l, b);
                match states[f] {
                    SubfaceState::Interior(_) | SubfaceState::Insulated { .. } => {
                        form.aux[f] += coef
                    }
                    SubfaceState::Fixed { value, .. } => form.constant += coef * value,
                    SubfaceState::Unused => continue,
                }
                form.cell[l] -= coef;
            }
            form
        };
        let tensors: [Tensor3; 8] = cells.map(|c| c.map_or(Tensor3::zeros(), |c| self.k[c]));
        let unknown_of = |f: usize| match states[f] {
            SubfaceState::Interior(u) | SubfaceState::Insulated { unknown: u, .. } => Some(u),
            _ => None,
        };

        // Continuity equations: one per unknown auxiliary temperature.
        let mut m = vec![0.; unknowns * unknowns];
        let mut n_cells = vec![[0.; 8]; unknowns];
        let mut c = vec![0.; unknowns];
        for (f, state) in states.iter().enumerate() {
            let (d, lower, upper) = subface_cells(f);
            let (row, eq) = match *state {
                SubfaceState::Interior(u) => (
                    u,
                    flux_form(lower, d, &tensors[lower]).sub(&flux_form(upper, d, &tensors[upper])),
                ),
                SubfaceState::Insulated { unknown, cell } => {
                    (unknown, flux_form(cell, d, &tensors[cell]))
                }
                _ => continue,
            };
            for (g, &a) in eq.aux.iter().enumerate() {
                if let Some(col) = unknown_of(g) {
                    m[row * unknowns + col] += a;
                }
            }
            n_cells[row] = eq.cell;
            c[row] = eq.constant;
        }

        // aux = Σ_l z[l] u_l + z_c
        let lu = DenseLu::new(unknowns, m)?;
        let mut z = [const { Vec::new() }; 8];
        for (l, zl) in z.iter_mut().enumerate() {
            if cells[l].is_none() {
                continue;
            }
            let mut rhs: Vec<f64> = n_cells.iter().map(|row| -row[l]).collect();
            lu.solve_in_place(&mut rhs);
            *zl = rhs;
        }
        let mut z_c: Vec<f64> = c.iter().map(|v| -v).collect();
        lu.solve_in_place(&mut z_c);

        let mut fluxes = Vec::with_capacity(SUBFACES);
        for (f, state) in states.iter().enumerate() {
            let (d, lower, upper) = subface_cells(f);
            let side = match *state {
                SubfaceState::Interior(_) => lower,
                SubfaceState::Fixed { cell, .. } => cell,
                SubfaceState::Insulated { .. } | SubfaceState::Unused => continue,
            };
            let form = flux_form(side, d, &tensors[side]);
            let mut coeff = form.cell;
            let mut constant = form.constant;
            for (g, &a) in form.aux.iter().enumerate() {
                let Some(u) = unknown_of(g) else { continue };
                if a == 0. {
                    continue;
                }
                for (l, cl) in coeff.iter_mut().enumerate() {
                    if cells[l].is_some() {
                        *cl += a * z[l][u];
                    }
                }
                constant += a * z_c[u];
            }
            fluxes.push(SubfaceFlux {
                axis: d,
                lower,
                upper,
                coeff,
                constant,
            });
        }
        Ok(Region { cells, fluxes })
    }

    /// Runs `visit` on every interaction region in parallel chunks and
    /// returns the per-chunk outputs in vertex order.
    fn for_each_region<T, F>(&self, visit: F) -> Result<Vec<T>>
    where
        T: Send + Default,
        F: Fn(&Region, &mut T) + Sync,
    {
        let nv = self.vertex_count();
        (0..nv.div_ceil(VERTEX_CHUNK))
            .into_par_iter()
            .map(|chunk| {
                let mut out = T::default();
                for idx in chunk * VERTEX_CHUNK..((chunk + 1) * VERTEX_CHUNK).min(nv) {
                    let region = self.region(self.vertex(idx))?;
                    visit(&region, &mut out);
                }
                Ok(out)
            })
            .collect()
    }

    pub fn assemble(&self) -> Result<FvSystem> {
        let n = self.grid.len();
        let chunks = self.for_each_region(
            |region, (triplets, rhs): &mut (Vec<Triplet>, Vec<(usize, f64)>)| {
                for sf in &region.fluxes {
                    // Outward flux: +F for the lower cell, -F for the upper one.
                    for (local, sign) in [(sf.lower, 1.), (sf.upper, -1.)] {
                        let Some(row) = region.cells[local] else { continue };
                        for (l, &a) in sf.coeff.iter().enumerate() {
                            if let Some(col) = region.cells[l] {
                                if a != 0. {
                                    triplets.push(Triplet::new(row, col, sign * a));
                                }
                            }
                        }
                        if sf.constant != 0. {
                            rhs.push((row, -sign * sf.constant));
                        }
                    }
                }
            },
        )?;

        let mut triplets = Vec::with_capacity(chunks.iter().map(|(t, _)| t.len()).sum());
        let mut rhs = vec![0.; n];
        for (t, b) in chunks {
            triplets.extend(t);
            for (row, v) in b {
                rhs[row] += v;
            }
        }
        Ok(FvSystem {
            matrix: CsrMatrix::from_triplets(n, triplets),
            rhs,
        })
    }

    /// Cell-centered flux density: mean of the low and high face flux per
    /// axis, each face summing its four sub-faces.
    pub fn cell_flux(&self, t: &[f64]) -> Result<Vec<[f64; 3]>> {
        let chunks = self.for_each_region(|region, out: &mut Vec<(usize, usize, f64)>| {
            for sf in &region.fluxes {
                let mut value = sf.constant;
                for (l, &a) in sf.coeff.iter().enumerate() {
                    if let Some(c) = region.cells[l] {
                        value += a * t[c];
                    }
                }
                if let Some(c) = region.cells[sf.lower] {
                    out.push((c, sf.axis, value));
                }
                if let Some(c) = region.cells[sf.upper] {
                    out.push((c, sf.axis, value));
                }
            }
        })?;

        // Each cell receives its 4 low-face and 4 high-face sub-fluxes per axis.
        let area = self.grid.step * self.grid.step;
        let mut q = vec![[0.; 3]; self.grid.len()];
        for (cell, axis, value) in chunks.into_iter().flatten() {
            q[cell][axis] += 0.5 * value / area;
        }
        Ok(q)
    }
}
