use crate::error::{MaterialError, Result};

/// LU factors of a small dense matrix (Gaussian elimination with partial
/// pivoting).
///
/// Intended for small local systems, e.g. the MPFA interaction regions.
/// Factor once and solve for several right-hand sides.
#[derive(Debug, Clone)]
pub struct DenseLu {
    n: usize,
    lu: Vec<f64>,
    pivots: Vec<usize>,
}

impl DenseLu {
    /// Factorizes the row-major `n x n` matrix `a`.
    pub fn new(n: usize, mut a: Vec<f64>) -> Result<Self> {
        if a.len() != n * n {
            return Err(MaterialError::dimension(format!(
                "dense matrix has {} entries, expected {}",
                a.len(),
                n * n
            )));
        }
        let scale = a.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(f64::MIN_POSITIVE);
        let mut pivots = vec![0; n];

        // Forward elimination
        for col in 0..n {
            // Pivot selection
            let mut pivot_row = col;
            let mut pivot_val = a[col * n + col].abs();
            for r in (col + 1)..n {
                let v = a[r * n + col].abs();
                if v > pivot_val {
                    pivot_val = v;
                    pivot_row = r;
                }
            }
            if pivot_val <= 1e-14 * scale {
                return Err(MaterialError::config(format!(
                    "singular local system (pivot too small) at column {col}"
                )));
            }
            pivots[col] = pivot_row;
            // Multipliers left of `col` stay in place; the solve replays the
            // swaps in the same order.
            if pivot_row != col {
                for c in col..n {
                    a.swap(pivot_row * n + c, col * n + c);
                }
            }

            let pivot = a[col * n + col];
            for r in (col + 1)..n {
                let factor = a[r * n + col] / pivot;
                a[r * n + col] = factor;
                if factor == 0.0 {
                    continue;
                }
                for c in (col + 1)..n {
                    a[r * n + c] -= factor * a[col * n + c];
                }
            }
        }
        Ok(Self { n, lu: a, pivots })
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Overwrites `b` with `A⁻¹ b`.
    pub fn solve_in_place(&self, b: &mut [f64]) {
        let n = self.n;
        for col in 0..n {
            b.swap(col, self.pivots[col]);
            let bc = b[col];
            for r in (col + 1)..n {
                b[r] -= self.lu[r * n + col] * bc;
            }
        }
        // Back substitution
        for i in (0..n).rev() {
            let mut rhs = b[i];
            for j in (i + 1)..n {
                rhs -= self.lu[i * n + j] * b[j];
            }
            b[i] = rhs / self.lu[i * n + i];
        }
    }
}
