use super::boundary::{Axis, DomainBc, PrescribedBc, SideBc};
use super::config::{ConductivityOptions, Method};
use super::fe::Fe;
use super::fv_mpfa::Mpfa;
use super::fv_tpfa::{FvSystem, Tpfa};
use super::grid::VoxelGrid;
use super::map::{ConductivityField, ConductivityMap, MapKind};
use super::result::{ConductivityResult, EffectiveTensor};
use crate::Workspace;
use crate::error::{MaterialError, Result, ensure_config};
use crate::sim::linalg::{SolveOptions, SolverType, solve};
use ndarray::{Array3, Array4};
use rayon::prelude::*;
use tracing::{info, warn};

/// Discretization chosen for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Two-point finite volumes (isotropic map).
    Tpfa,
    /// Multi-point finite volumes (anisotropic map).
    Mpfa,
    /// Finite elements with an assembled matrix.
    FeExplicit,
    /// Finite elements applied per element.
    FeMatrixFree,
}

impl Scheme {
    pub fn select(map: &ConductivityMap, options: &ConductivityOptions) -> Self {
        match (options.method, map.kind()) {
            (Method::Fv, MapKind::Isotropic) => Scheme::Tpfa,
            (Method::Fv, MapKind::Anisotropic) => Scheme::Mpfa,
            (Method::Fe, _) if options.matrix_free => Scheme::FeMatrixFree,
            (Method::Fe, _) => Scheme::FeExplicit,
        }
    }

    /// Whether the operator is symmetric positive-definite.
    pub fn is_symmetric(self) -> bool {
        self != Scheme::Mpfa
    }

    pub fn has_matrix(self) -> bool {
        self != Scheme::FeMatrixFree
    }
}

/// Validated inputs shared by the runs of one call.
struct Setup {
    scheme: Scheme,
    field: ConductivityField,
    grid: VoxelGrid,
    solve: SolveOptions,
}

fn prepare(ws: &Workspace, map: &ConductivityMap, options: &ConductivityOptions) -> Result<Setup> {
    let solve = options.solve_options();
    solve.validate()?;

    let scheme = Scheme::select(map, options);
    ensure_config!(
        !solve.solver.requires_symmetry() || scheme.is_symmetric(),
        "solver '{}' requires a symmetric operator; the MPFA scheme is not symmetric",
        solve.solver
    );
    ensure_config!(
        solve.solver != SolverType::Direct || scheme.has_matrix(),
        "the direct solver needs an assembled matrix; disable matrix_free"
    );

    if let Some(bc) = &options.prescribed_bc {
        ensure_config!(
            options.method == Method::Fv,
            "prescribed temperatures are only supported by the fv method"
        );
        check_prescribed(bc, ws)?;
    }

    let field = ConductivityField::build(ws, map)?;
    Ok(Setup {
        scheme,
        field,
        grid: VoxelGrid::new(ws.shape(), ws.voxel_length()),
        solve,
    })
}

fn check_prescribed(bc: &PrescribedBc, ws: &Workspace) -> Result<()> {
    if bc.shape() != ws.shape() {
        return Err(MaterialError::dimension(format!(
            "prescribed temperature map shape {:?} does not match workspace shape {:?}",
            bc.shape(),
            ws.shape()
        )));
    }
    let mut fixed = bc.values().iter().filter(|v| !v.is_nan());
    let Some(first) = fixed.next() else {
        return Err(MaterialError::config(
            "prescribed temperature map does not fix any voxel",
        ));
    };
    ensure_config!(
        fixed.any(|v| v != first),
        "prescribed temperatures are all equal; no gradient is imposed"
    );
    Ok(())
}

fn warn_ignored_side_bc(method: Method, side_bc: SideBc) {
    if method == Method::Fe && side_bc != SideBc::Periodic {
        warn!(%side_bc, "fe method is periodic in all directions; side condition ignored");
    }
}

/// Computes one column of the effective conductivity tensor.
///
/// With `direction = Some(axis)`, a unit temperature difference is imposed
/// along `axis` and `side_bc` applies on the remaining faces. With
/// prescribed temperatures in `options`, `direction` must be `None` and
/// `side_bc` applies on every face.
///
/// Every configuration problem is reported before assembly starts.
pub fn compute_thermal_conductivity(
    ws: &Workspace,
    map: &ConductivityMap,
    direction: Option<Axis>,
    side_bc: SideBc,
    options: &ConductivityOptions,
) -> Result<ConductivityResult> {
    let bc = match (direction, &options.prescribed_bc) {
        (Some(axis), None) => DomainBc::imposed(axis, side_bc, ws.shape()),
        (None, Some(_)) => DomainBc::uniform(side_bc, ws.shape())?,
        (Some(_), Some(_)) => {
            return Err(MaterialError::config(
                "direction must be None when prescribed temperatures are given",
            ));
        }
        (None, None) => {
            return Err(MaterialError::config(
                "a direction is required without prescribed temperatures",
            ));
        }
    };
    warn_ignored_side_bc(options.method, side_bc);

    let setup = prepare(ws, map, options)?;
    let fixed = options.prescribed_bc.as_ref().map(PrescribedBc::to_fixed);
    run(&setup, direction, bc, fixed.as_deref())
}

/// Computes the full effective tensor from runs along x, y and z.
///
/// The three runs execute concurrently and share only read-only data.
pub fn compute_conductivity_tensor(
    ws: &Workspace,
    map: &ConductivityMap,
    side_bc: SideBc,
    options: &ConductivityOptions,
) -> Result<EffectiveTensor> {
    ensure_config!(
        options.prescribed_bc.is_none(),
        "prescribed temperatures define a single run; use compute_thermal_conductivity"
    );
    warn_ignored_side_bc(options.method, side_bc);
    let setup = prepare(ws, map, options)?;

    let runs = Axis::ALL
        .par_iter()
        .map(|&axis| run(&setup, Some(axis), DomainBc::imposed(axis, side_bc, ws.shape()), None))
        .collect::<Result<Vec<_>>>()?;
    let tensor = EffectiveTensor::from_runs(runs);
    info!(
        converged = tensor.converged(),
        asymmetry = tensor.asymmetry(),
        "effective conductivity tensor:\n{}",
        tensor.tensor
    );
    Ok(tensor)
}

enum FvScheme<'a> {
    Tpfa(Tpfa<'a>),
    Mpfa(Mpfa<'a>),
}

impl FvScheme<'_> {
    fn assemble(&self) -> Result<FvSystem> {
        match self {
            FvScheme::Tpfa(s) => Ok(s.assemble()),
            FvScheme::Mpfa(s) => s.assemble(),
        }
    }

    fn cell_flux(&self, t: &[f64]) -> Result<Vec<[f64; 3]>> {
        match self {
            FvScheme::Tpfa(s) => Ok(s.cell_flux(t)),
            FvScheme::Mpfa(s) => s.cell_flux(t),
        }
    }
}

fn run(
    setup: &Setup,
    direction: Option<Axis>,
    bc: DomainBc,
    fixed: Option<&[Option<f64>]>,
) -> Result<ConductivityResult> {
    info!(
        direction = ?direction,
        scheme = ?setup.scheme,
        solver = %setup.solve.solver,
        tolerance = setup.solve.tolerance,
        "computing effective thermal conductivity"
    );
    let result = match setup.scheme {
        Scheme::Tpfa | Scheme::Mpfa => run_fv(setup, direction, bc, fixed)?,
        Scheme::FeExplicit | Scheme::FeMatrixFree => {
            let Some(axis) = direction else {
                return Err(MaterialError::config("the fe method needs a direction"));
            };
            run_fe(setup, axis)?
        }
    };
    info!(
        direction = ?direction,
        k_eff = ?result.k_eff,
        iterations = result.report.iterations,
        converged = result.converged(),
        "conductivity run finished"
    );
    Ok(result)
}

fn run_fv(
    setup: &Setup,
    direction: Option<Axis>,
    bc: DomainBc,
    fixed: Option<&[Option<f64>]>,
) -> Result<ConductivityResult> {
    let grid = setup.grid;
    let scheme = match (&setup.field, setup.scheme) {
        (ConductivityField::Scalar(k), Scheme::Tpfa) => FvScheme::Tpfa(Tpfa::new(grid, k, bc)),
        (ConductivityField::Tensor(k), Scheme::Mpfa) => FvScheme::Mpfa(Mpfa::new(grid, k, bc)),
        _ => {
            return Err(MaterialError::config(
                "conductivity field does not match the finite volume scheme",
            ));
        }
    };

    let mut system = scheme.assemble()?;
    tracing::debug!(
        unknowns = system.matrix.n(),
        nnz = system.matrix.nnz(),
        symmetric = system.matrix.check_symmetric(1e-12),
        "finite volume system assembled"
    );
    if let Some(fixed) = fixed {
        system.matrix = system.matrix.eliminate_fixed(fixed, &mut system.rhs);
    }

    let report = solve(&system.matrix, &system.rhs, None, &setup.solve)?;
    let flux = scheme.cell_flux(&report.x)?;

    let k_eff = match direction {
        Some(axis) => {
            let length = grid.extent(axis.index());
            mean(&flux, |_| true).map(|q| -q * length)
        }
        None => {
            let free = |idx: usize| fixed.is_some_and(|f| f[idx].is_none());
            let q = mean(&flux, free);
            let grad = mean(&cell_gradient(&report.x, &grid, &bc), free);
            let norm = grad.iter().map(|g| g * g).sum::<f64>().sqrt();
            if norm > 0. {
                q.map(|q| -q / norm)
            } else {
                warn!("prescribed temperatures give no mean gradient over free voxels");
                [0.; 3]
            }
        }
    };

    Ok(ConductivityResult {
        direction,
        k_eff,
        temperature: Array3::from_shape_vec(dims(&grid), report.x.clone())?,
        flux: flux_array(&grid, flux)?,
        report: report.summary(),
    })
}

fn run_fe(setup: &Setup, axis: Axis) -> Result<ConductivityResult> {
    let grid = setup.grid;
    let fe = Fe::new(grid, &setup.field, axis.index());
    let rhs = fe.rhs();
    let report = match setup.scheme {
        Scheme::FeMatrixFree => solve(&fe.operator(), &rhs, None, &setup.solve)?,
        _ => {
            let matrix = fe.assemble();
            tracing::debug!(unknowns = matrix.n(), nnz = matrix.nnz(), "fe matrix assembled");
            solve(&matrix, &rhs, None, &setup.solve)?
        }
    };

    let flux = fe.element_flux(&report.x);
    let length = grid.extent(axis.index());
    let k_eff = mean(&flux, |_| true).map(|q| -q * length);
    Ok(ConductivityResult {
        direction: Some(axis),
        k_eff,
        temperature: Array3::from_shape_vec(dims(&grid), fe.temperature(&report.x))?,
        flux: flux_array(&grid, flux)?,
        report: report.summary(),
    })
}

fn dims(grid: &VoxelGrid) -> (usize, usize, usize) {
    (grid.dims[0], grid.dims[1], grid.dims[2])
}

fn flux_array(grid: &VoxelGrid, flux: Vec<[f64; 3]>) -> Result<Array4<f64>> {
    let (nx, ny, nz) = dims(grid);
    Ok(Array4::from_shape_vec(
        (nx, ny, nz, 3),
        flux.into_iter().flatten().collect(),
    )?)
}

/// Mean of a per-voxel vector field over the voxels selected by `include`.
fn mean(values: &[[f64; 3]], include: impl Fn(usize) -> bool) -> [f64; 3] {
    let mut sum = [0.; 3];
    let mut count = 0usize;
    for (idx, v) in values.iter().enumerate() {
        if include(idx) {
            for a in 0..3 {
                sum[a] += v[a];
            }
            count += 1;
        }
    }
    if count == 0 {
        return sum;
    }
    sum.map(|s| s / count as f64)
}

/// Finite-difference temperature gradient per voxel: central inside,
/// one-sided at non-periodic borders.
fn cell_gradient(t: &[f64], grid: &VoxelGrid, bc: &DomainBc) -> Vec<[f64; 3]> {
    (0..grid.len())
        .into_par_iter()
        .map(|idx| {
            let c = grid.coords(idx);
            let mut g = [0.; 3];
            for (axis, ga) in g.iter_mut().enumerate() {
                let periodic = bc.is_periodic(axis);
                let lo = grid.neighbor(c, axis, false, periodic);
                let hi = grid.neighbor(c, axis, true, periodic);
                let (a, b, steps) = match (lo, hi) {
                    (Some(lo), Some(hi)) => (grid.index(lo), grid.index(hi), 2.),
                    (None, Some(hi)) => (idx, grid.index(hi), 1.),
                    (Some(lo), None) => (grid.index(lo), idx, 1.),
                    (None, None) => continue,
                };
                *ga = (t[b] - t[a]) / (steps * grid.step);
            }
            g
        })
        .collect()
}
