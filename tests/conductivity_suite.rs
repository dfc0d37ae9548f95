use material3d::sim::linalg::SolveStatus;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use material3d::{
    Axis, ConductivityMap, ConductivityOptions, EffectiveTensor, MaterialError, Method,
    PrescribedBc, SideBc, SolverType, Tensor3, Vector, Workspace, compute_conductivity_tensor,
    compute_orientation_st, compute_thermal_conductivity,
};

const TOL: f64 = 1e-10;

fn assert_tensor_close(got: &Tensor3, expected: &Tensor3, tol: f64) {
    let diff = got.max_abs_diff(expected);
    assert!(diff < tol, "got\n{got}\nexpected\n{expected}\n(diff {diff:.3e})");
}

/// Two layers normal to x: `k = 1` for `i < nx / 2`, `k = 4` above.
fn laminate(shape: (usize, usize, usize)) -> (Workspace, ConductivityMap) {
    let half = shape.0 / 2;
    let ws = Workspace::from_fn(shape, 1e-3, |(i, _, _)| if i < half { 0 } else { 200 }).unwrap();
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 99), 1.).unwrap();
    map.add_material((100, 255), 4.).unwrap();
    (ws, map)
}

/// Cubic inclusion of `k = 10` in a `k = 1` matrix, off-center so that no
/// symmetry makes the problem trivial.
fn inclusion(n: usize) -> (Workspace, ConductivityMap) {
    let ws = Workspace::from_fn((n, n, n), 2e-4, |(i, j, k)| {
        let inside = (1..4).contains(&i) && (2..5).contains(&j) && (1..3).contains(&k);
        if inside { 255 } else { 10 }
    })
    .unwrap();
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 127), 1.).unwrap();
    map.add_material((128, 255), 10.).unwrap();
    (ws, map)
}

fn tensor(
    ws: &Workspace,
    map: &ConductivityMap,
    side_bc: SideBc,
    options: &ConductivityOptions,
) -> EffectiveTensor {
    let result = compute_conductivity_tensor(ws, map, side_bc, options).unwrap();
    assert!(result.converged());
    result
}

#[test]
fn test_homogeneous_domain_gives_k_identity() {
    let ws = Workspace::new((5, 4, 3), 1e-3, 7).unwrap();
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 255), 2.5).unwrap();
    let expected = Tensor3::diagonal(2.5, 2.5, 2.5);

    for side_bc in [SideBc::Periodic, SideBc::Symmetric, SideBc::Dirichlet] {
        let options = ConductivityOptions::new().with_tolerance(TOL);
        assert_tensor_close(&tensor(&ws, &map, side_bc, &options).tensor, &expected, 1e-8);
    }
    for matrix_free in [true, false] {
        let options = ConductivityOptions::new()
            .with_method(Method::Fe)
            .with_matrix_free(matrix_free)
            .with_tolerance(TOL);
        let result = tensor(&ws, &map, SideBc::Periodic, &options);
        assert_tensor_close(&result.tensor, &expected, 1e-8);
        assert_eq!(result.runs[0].temperature.dim(), (5, 4, 3));
        assert_eq!(result.runs[0].flux.dim(), (5, 4, 3, 3));
    }
}

#[test]
fn test_laminate_harmonic_and_arithmetic_means() {
    let (ws, map) = laminate((6, 4, 4));
    // Series across the layers, parallel along them.
    let expected = Tensor3::diagonal(1.6, 2.5, 2.5);

    let fv = ConductivityOptions::new().with_tolerance(TOL);
    assert_tensor_close(&tensor(&ws, &map, SideBc::Periodic, &fv).tensor, &expected, 1e-7);

    for matrix_free in [true, false] {
        let fe = ConductivityOptions::new()
            .with_method(Method::Fe)
            .with_solver(SolverType::Cg)
            .with_matrix_free(matrix_free)
            .with_tolerance(TOL);
        assert_tensor_close(&tensor(&ws, &map, SideBc::Periodic, &fe).tensor, &expected, 1e-7);
    }
}

#[test]
fn test_periodic_sides_keep_inlet_and_outlet_flux_equal() {
    // Layers stacked along y, heat driven along x.
    let ws = Workspace::from_fn((6, 6, 4), 1e-3, |(_, j, _)| if j < 3 { 0 } else { 200 }).unwrap();
    let (_, map) = laminate((2, 1, 1));
    let options = ConductivityOptions::new().with_tolerance(TOL);
    let run =
        compute_thermal_conductivity(&ws, &map, Some(Axis::X), SideBc::Periodic, &options).unwrap();
    assert!(run.converged());

    let slice_flux = |i: usize| -> f64 {
        run.flux
            .slice(ndarray::s![i, .., .., 0])
            .iter()
            .sum()
    };
    let (inlet, outlet) = (slice_flux(0), slice_flux(5));
    assert!(
        (inlet - outlet).abs() < 1e-8 * inlet.abs(),
        "inlet {inlet}, outlet {outlet}"
    );
    // Parallel layers: arithmetic mean, and q = -k_eff / L summed over 24 cells.
    assert!((run.k_eff[0] - 2.5).abs() < 1e-8, "{:?}", run.k_eff);
    assert!((inlet + 2.5 / 6e-3 * 24.).abs() < 1e-6 * inlet.abs());
}

#[test]
fn test_single_direction_matches_tensor_column() {
    let (ws, map) = inclusion(6);
    let options = ConductivityOptions::new().with_tolerance(TOL);
    let full = tensor(&ws, &map, SideBc::Symmetric, &options);

    let run = compute_thermal_conductivity(&ws, &map, Some(Axis::Y), SideBc::Symmetric, &options)
        .unwrap();
    assert_eq!(run.direction, Some(Axis::Y));
    for i in 0..3 {
        assert!((run.k_eff[i] - full.tensor.get(i, 1)).abs() < 1e-12);
    }
    // The inclusion conducts better than the matrix alone.
    assert!(run.k_eff[1] > 1. && run.k_eff[1] < 10.);
}

#[test]
fn test_isotropic_phases_in_anisotropic_map_match_tpfa() {
    let (mut ws, iso) = inclusion(6);
    compute_orientation_st(&mut ws, (128, 255), 0.7, 1.0).unwrap();
    assert!(ws.orientation_at(2, 3, 1).is_some());
    assert!(ws.orientation_at(0, 0, 0).is_none());
    let mut aniso = ConductivityMap::anisotropic();
    aniso.add_isotropic_material((0, 127), 1.).unwrap();
    aniso.add_material_to_orient((128, 255), 10., 10.).unwrap();

    let options = ConductivityOptions::new().with_tolerance(TOL);
    for side_bc in [SideBc::Periodic, SideBc::Symmetric] {
        let tpfa = tensor(&ws, &iso, side_bc, &options);
        let mpfa = tensor(&ws, &aniso, side_bc, &options);
        assert_tensor_close(&mpfa.tensor, &tpfa.tensor, 1e-7);
    }
}

#[test]
fn test_rotated_homogeneous_material_recovers_its_tensor() {
    let mut ws = Workspace::new((5, 5, 5), 1e-3, 100).unwrap();
    let axis = Vector::new(1., 1., 0.).normalize().unwrap();
    ws.set_material_orientation((0, 255), axis).unwrap();
    let mut map = ConductivityMap::anisotropic();
    map.add_material_to_orient((0, 255), 6., 2.).unwrap();
    let expected = Tensor3::transversely_isotropic(6., 2., axis);

    let fv = ConductivityOptions::new().with_tolerance(TOL);
    assert_tensor_close(&tensor(&ws, &map, SideBc::Periodic, &fv).tensor, &expected, 1e-7);

    let fe = ConductivityOptions::new().with_method(Method::Fe).with_tolerance(TOL);
    let result = tensor(&ws, &map, SideBc::Periodic, &fe);
    assert_tensor_close(&result.tensor, &expected, 1e-7);
    assert!(result.asymmetry() < 1e-7);
}

#[test]
fn test_oriented_fibers_along_z() {
    // 2x2 fibers on a 4-voxel pitch: a quarter of the volume.
    let mut ws = Workspace::from_fn((8, 8, 6), 1e-3, |(i, j, _)| {
        if i % 4 < 2 && j % 4 < 2 { 255 } else { 0 }
    })
    .unwrap();
    compute_orientation_st(&mut ws, (128, 255), 0.7, 1.5).unwrap();
    let o = ws.orientation().unwrap();
    for lane in o.lanes(ndarray::Axis(3)) {
        let len: f64 = lane.iter().map(|v| v * v).sum::<f64>().sqrt();
        assert!(len == 0. || (len - 1.).abs() < 1e-12);
    }

    let mut map = ConductivityMap::anisotropic();
    map.add_isotropic_material((0, 127), 1.).unwrap();
    map.add_material_to_orient((128, 255), 10., 1.).unwrap();
    let options = ConductivityOptions::new().with_tolerance(TOL);
    let run =
        compute_thermal_conductivity(&ws, &map, Some(Axis::Z), SideBc::Periodic, &options).unwrap();
    assert!(run.converged());
    assert!((run.k_eff[2] - 3.25).abs() < 1e-6, "{:?}", run.k_eff);
    assert!(run.k_eff[0].abs() < 1e-6 && run.k_eff[1].abs() < 1e-6);
}

#[test]
fn test_prescribed_slices_give_phase_conductivity() {
    let ws = Workspace::new((6, 3, 3), 1e-3, 50).unwrap();
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 255), 2.).unwrap();

    let mut bc = PrescribedBc::new(ws.shape());
    bc.set_slice(Axis::X, 0, 0.).unwrap();
    bc.set_slice(Axis::X, 5, 1.).unwrap();
    assert_eq!(bc.fixed_count(), 18);

    let options = ConductivityOptions::new()
        .with_tolerance(TOL)
        .with_prescribed_bc(bc);
    let run = compute_thermal_conductivity(&ws, &map, None, SideBc::Symmetric, &options).unwrap();
    assert!(run.converged());
    assert_eq!(run.direction, None);
    assert!((run.k_eff[0] - 2.).abs() < 1e-8, "{:?}", run.k_eff);
    assert!(run.k_eff[1].abs() < 1e-8 && run.k_eff[2].abs() < 1e-8);
    // Fixed voxels keep their value.
    assert!((run.temperature[[5, 1, 1]] - 1.).abs() < 1e-8);
    assert!((run.temperature[[2, 0, 2]] - 0.4).abs() < 1e-8);

    // Dirichlet side faces conflict with the prescribed map.
    let err = compute_thermal_conductivity(&ws, &map, None, SideBc::Dirichlet, &options)
        .unwrap_err();
    assert!(matches!(err, MaterialError::Configuration(_)));
    // So does an equal temperature everywhere.
    let mut flat = PrescribedBc::new(ws.shape());
    flat.set_slice(Axis::X, 0, 1.).unwrap();
    flat.set_slice(Axis::X, 5, 1.).unwrap();
    let options = ConductivityOptions::new().with_prescribed_bc(flat);
    assert!(compute_thermal_conductivity(&ws, &map, None, SideBc::Symmetric, &options).is_err());
}

/// Random two-phase medium, half of the voxels in each phase on average.
fn random_two_phase(n: usize, seed: u64) -> (Workspace, ConductivityMap) {
    let mut rng = StdRng::seed_from_u64(seed);
    let ws = Workspace::from_fn((n, n, n), 1e-3, |_| if rng.gen_bool(0.5) { 255 } else { 0 })
        .unwrap();
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 127), 0.5).unwrap();
    map.add_material((128, 255), 5.).unwrap();
    (ws, map)
}

#[test]
fn test_solvers_agree() {
    let (ws, map) = random_two_phase(10, 7);
    let reference = tensor(
        &ws,
        &map,
        SideBc::Symmetric,
        &ConductivityOptions::new().with_solver(SolverType::Direct),
    );
    for solver in [
        SolverType::Cg,
        SolverType::Bicgstab,
        SolverType::Gmres,
        SolverType::Minres,
    ] {
        let options = ConductivityOptions::new()
            .with_solver(solver)
            .with_tolerance(TOL);
        let result = tensor(&ws, &map, SideBc::Symmetric, &options);
        assert_tensor_close(&result.tensor, &reference.tensor, 1e-6);
        assert_eq!(result.runs[0].report.solver, solver);
    }
}

#[test]
fn test_repeated_runs_are_identical() {
    let (mut ws, _) = inclusion(6);
    ws.set_material_orientation((128, 255), Vector::new(1., 2., 3.)).unwrap();
    let mut map = ConductivityMap::anisotropic();
    map.add_isotropic_material((0, 127), 1.).unwrap();
    map.add_material_to_orient((128, 255), 8., 2.).unwrap();

    let fv = ConductivityOptions::new();
    let fe = ConductivityOptions::new().with_method(Method::Fe);
    for options in [fv, fe] {
        let a = tensor(&ws, &map, SideBc::Periodic, &options);
        let b = tensor(&ws, &map, SideBc::Periodic, &options);
        assert_eq!(a.tensor, b.tensor);
        assert_eq!(a.runs[2].temperature, b.runs[2].temperature);
    }
}

#[test]
fn test_unresolved_voxel_value() {
    let (ws, _) = inclusion(5);
    let mut map = ConductivityMap::isotropic();
    map.add_material((0, 127), 1.).unwrap();
    let err = compute_thermal_conductivity(
        &ws,
        &map,
        Some(Axis::X),
        SideBc::Periodic,
        &ConductivityOptions::new(),
    )
    .unwrap_err();
    assert!(matches!(err, MaterialError::Configuration(_)), "{err}");
}

#[test]
fn test_iteration_limit_is_reported() {
    let (ws, map) = inclusion(6);
    let options = ConductivityOptions::new()
        .with_solver(SolverType::Cg)
        .with_tolerance(1e-12)
        .with_max_iterations(1);
    let run = compute_thermal_conductivity(&ws, &map, Some(Axis::X), SideBc::Symmetric, &options)
        .unwrap();
    assert!(!run.converged());
    assert_eq!(run.report.status, SolveStatus::MaxIterations);
    let err = run.into_converged().unwrap_err();
    assert!(matches!(err, MaterialError::Convergence { .. }), "{err}");
}
