//! Local fiber orientation from the structure tensor.
//!
//! The image is smoothed at `sigma`, differentiated, and the outer product
//! of the gradient is smoothed at `rho`. Inside a fiber the gradient varies
//! across the fiber but not along it, so the eigenvector of the smallest
//! eigenvalue points along the fiber.

pub mod gaussian;

use crate::error::{Result, ensure_config};
use crate::{Tensor3, Vector, Workspace};
use gaussian::gaussian_smooth;
use ndarray::Array4;
use rayon::prelude::*;

/// Estimates the orientation of the voxels inside `cutoff` and stores it on
/// the workspace. Voxels outside the cutoff get the zero vector.
pub fn compute_orientation_st(
    ws: &mut Workspace,
    cutoff: (u16, u16),
    sigma: f64,
    rho: f64,
) -> Result<()> {
    let orientation = structure_tensor_orientation(ws, cutoff, sigma, rho)?;
    ws.set_orientation(orientation)
}

/// Orientation field of shape `[nx, ny, nz, 3]` without modifying `ws`.
pub fn structure_tensor_orientation(
    ws: &Workspace,
    cutoff: (u16, u16),
    sigma: f64,
    rho: f64,
) -> Result<Array4<f64>> {
    ensure_config!(
        sigma.is_finite() && sigma >= 0.,
        "sigma must be finite and >= 0, got {sigma}"
    );
    ensure_config!(
        rho.is_finite() && rho >= 0.,
        "rho must be finite and >= 0, got {rho}"
    );
    ensure_config!(
        cutoff.0 <= cutoff.1,
        "invalid cutoff ({}, {}): lower bound exceeds upper bound",
        cutoff.0,
        cutoff.1
    );

    let (nx, ny, nz) = ws.shape();
    let dims = [nx, ny, nz];
    let inside: Vec<bool> = ws
        .values()
        .map(|v| (cutoff.0..=cutoff.1).contains(&v))
        .collect();
    let count = inside.iter().filter(|&&b| b).count();
    tracing::info!(voxels = count, sigma, rho, "computing structure tensor orientation");

    let image: Vec<f64> = ws.values().map(f64::from).collect();
    let smooth = gaussian_smooth(&image, dims, sigma);
    let grad = gradient(&smooth, dims, &inside);

    // xx, yy, zz, xy, xz, yz
    let pairs = [(0, 0), (1, 1), (2, 2), (0, 1), (0, 2), (1, 2)];
    let components: Vec<Vec<f64>> = pairs
        .par_iter()
        .map(|&(a, b)| {
            let product: Vec<f64> = grad.iter().map(|g| g[a] * g[b]).collect();
            gaussian_smooth(&product, dims, rho)
        })
        .collect();

    let vectors: Vec<f64> = (0..image.len())
        .into_par_iter()
        .flat_map_iter(|idx| {
            let v = if inside[idx] {
                let st = Tensor3::from_symmetric(std::array::from_fn(|c| components[c][idx]));
                let (_, vecs) = st.symmetric_eigen();
                vecs[0].canonical_sign()
            } else {
                Vector::ZERO
            };
            v.to_array()
        })
        .collect();
    Ok(Array4::from_shape_vec((nx, ny, nz, 3), vectors)?)
}

/// Central differences (one-sided at borders), zero outside the mask.
fn gradient(data: &[f64], dims: [usize; 3], mask: &[bool]) -> Vec<[f64; 3]> {
    let strides = [dims[1] * dims[2], dims[2], 1];
    (0..data.len())
        .into_par_iter()
        .map(|idx| {
            let mut g = [0.; 3];
            if !mask[idx] {
                return g;
            }
            for (a, ga) in g.iter_mut().enumerate() {
                let n = dims[a];
                if n < 2 {
                    continue;
                }
                let pos = (idx / strides[a]) % n;
                let s = strides[a];
                *ga = if pos == 0 {
                    data[idx + s] - data[idx]
                } else if pos == n - 1 {
                    data[idx] - data[idx - s]
                } else {
                    0.5 * (data[idx + s] - data[idx - s])
                };
            }
            g
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MaterialError;

    /// Square fibers of 2x2 voxels on a 4-voxel pitch, running along `along`.
    fn fibers(along: usize) -> Workspace {
        Workspace::from_fn((8, 8, 8), 1.0, |(i, j, k)| {
            let c = [i, j, k];
            let (p, q) = ((along + 1) % 3, (along + 2) % 3);
            if c[p] % 4 < 2 && c[q] % 4 < 2 { 255 } else { 0 }
        })
        .unwrap()
    }

    #[test]
    fn test_fibers_along_each_axis() {
        for along in 0..3 {
            let mut ws = fibers(along);
            compute_orientation_st(&mut ws, (128, 255), 0.7, 1.5).unwrap();
            let expected = Vector::unit(along);
            for ((i, j, k), &v) in ws.matrix().indexed_iter() {
                let o = ws.orientation_at(i, j, k);
                if v == 255 {
                    let o = o.unwrap();
                    assert!((o.length() - 1.).abs() < 1e-12);
                    assert!(o.is_close(&expected), "along {along}: {o} at ({i}, {j}, {k})");
                } else {
                    assert!(o.is_none());
                }
            }
        }
    }

    #[test]
    fn test_flat_region_gives_unit_vectors() {
        let mut ws = Workspace::new((3, 3, 3), 1.0, 200).unwrap();
        compute_orientation_st(&mut ws, (100, 255), 1.0, 1.0).unwrap();
        let o = ws.orientation().unwrap();
        for lane in o.lanes(ndarray::Axis(3)) {
            let len: f64 = lane.iter().map(|v| v * v).sum::<f64>().sqrt();
            assert!((len - 1.).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_parameters() {
        let mut ws = fibers(2);
        for (cutoff, sigma, rho) in [((10, 5), 1., 1.), ((0, 5), -1., 1.), ((0, 5), 1., f64::NAN)] {
            let err = compute_orientation_st(&mut ws, cutoff, sigma, rho).unwrap_err();
            assert!(matches!(err, MaterialError::Configuration(_)));
        }
        assert!(ws.orientation().is_none());
    }
}
