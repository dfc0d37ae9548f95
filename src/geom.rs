pub mod tensor;
pub mod vector;

/// Geometric precision
const EPS: f64 = 1e-13;
