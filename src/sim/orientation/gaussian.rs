use rayon::prelude::*;

/// Kernel half-width in standard deviations.
const TRUNCATE: f64 = 4.;

/// Normalized 1D Gaussian kernel of radius `round(4 σ)`.
pub fn gaussian_kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as usize;
    let weights: Vec<f64> = (0..=2 * radius)
        .map(|i| {
            let x = i as f64 - radius as f64;
            (-0.5 * x * x / (sigma * sigma)).exp()
        })
        .collect();
    let total: f64 = weights.iter().sum();
    weights.into_iter().map(|w| w / total).collect()
}

/// Half-sample symmetric reflection (`d c b a | a b c d | d c b a`).
fn reflect(idx: isize, n: usize) -> usize {
    let period = 2 * n as isize;
    let m = idx.rem_euclid(period) as usize;
    if m < n { m } else { 2 * n - 1 - m }
}

fn convolve_axis(data: &[f64], dims: [usize; 3], axis: usize, kernel: &[f64]) -> Vec<f64> {
    let radius = (kernel.len() / 2) as isize;
    let n = dims[axis];
    let stride = match axis {
        0 => dims[1] * dims[2],
        1 => dims[2],
        _ => 1,
    };
    (0..data.len())
        .into_par_iter()
        .map(|idx| {
            let pos = (idx / stride) % n;
            let base = idx - pos * stride;
            kernel
                .iter()
                .enumerate()
                .map(|(r, w)| {
                    let src = reflect(pos as isize + r as isize - radius, n);
                    w * data[base + src * stride]
                })
                .sum()
        })
        .collect()
}

/// Separable Gaussian smoothing of a row-major 3D field.
///
/// `sigma == 0` returns the input unchanged.
pub fn gaussian_smooth(data: &[f64], dims: [usize; 3], sigma: f64) -> Vec<f64> {
    if sigma == 0. {
        return data.to_vec();
    }
    let kernel = gaussian_kernel(sigma);
    let mut out = data.to_vec();
    for axis in 0..3 {
        out = convolve_axis(&out, dims, axis, &kernel);
    }
    out
}
