use super::LinearOperator;
use rayon::prelude::*;

/// Rows per parallel task in [`CsrMatrix::apply`].
const ROW_CHUNK: usize = 1024;

/// One `(row, col, value)` contribution; duplicates are summed on assembly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub value: f64,
}

impl Triplet {
    pub fn new(row: usize, col: usize, value: f64) -> Self {
        Self { row, col, value }
    }
}

/// Compressed sparse row matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct CsrMatrix {
    n: usize,
    row_ptr: Vec<usize>,
    col_idx: Vec<usize>,
    values: Vec<f64>,
    symmetric: bool,
}

impl CsrMatrix {
    /// Builds an `n x n` matrix from triplets.
    ///
    /// Duplicates are summed in the order they appear, so the result does not
    /// depend on anything but the triplet order. Explicit zeros are kept.
    pub fn from_triplets(n: usize, triplets: Vec<Triplet>) -> Self {
        let mut counts = vec![0usize; n + 1];
        for t in &triplets {
            assert!(
                t.row < n && t.col < n,
                "triplet ({}, {}) outside {n}x{n} matrix",
                t.row,
                t.col
            );
            counts[t.row + 1] += 1;
        }
        for i in 0..n {
            counts[i + 1] += counts[i];
        }

        // Stable bucket sort by row.
        let mut next = counts.clone();
        let mut by_row = vec![(0usize, 0.0f64); triplets.len()];
        for t in &triplets {
            by_row[next[t.row]] = (t.col, t.value);
            next[t.row] += 1;
        }

        let mut row_ptr = Vec::with_capacity(n + 1);
        let mut col_idx = Vec::with_capacity(triplets.len());
        let mut values = Vec::with_capacity(triplets.len());
        row_ptr.push(0);
        for i in 0..n {
            let row = &mut by_row[counts[i]..counts[i + 1]];
            row.sort_by_key(|&(c, _)| c);
            for &(c, v) in row.iter() {
                if col_idx.len() > row_ptr[i] && col_idx.last() == Some(&c) {
                    if let Some(last) = values.last_mut() {
                        *last += v;
                    }
                } else {
                    col_idx.push(c);
                    values.push(v);
                }
            }
            row_ptr.push(col_idx.len());
        }

        let mut matrix = Self {
            n,
            row_ptr,
            col_idx,
            values,
            symmetric: false,
        };
        matrix.symmetric = matrix.check_symmetric(1e-12);
        matrix
    }

    pub fn n(&self) -> usize {
        self.n
    }

    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Column indices and values of row `i`.
    pub fn row(&self, i: usize) -> (&[usize], &[f64]) {
        let range = self.row_ptr[i]..self.row_ptr[i + 1];
        (&self.col_idx[range.clone()], &self.values[range])
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        let (cols, vals) = self.row(i);
        cols.binary_search(&j).map_or(0., |p| vals[p])
    }

    /// Structural and numerical symmetry within a relative tolerance.
    pub fn check_symmetric(&self, rel_tol: f64) -> bool {
        let scale = self.values.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        (0..self.n).into_par_iter().all(|i| {
            let (cols, vals) = self.row(i);
            cols.iter()
                .zip(vals)
                .all(|(&j, &v)| (v - self.get(j, i)).abs() <= rel_tol * scale)
        })
    }

    /// Fixes the unknowns that carry a value in `fixed`.
    ///
    /// Fixed rows become identity rows with the value on the right-hand side;
    /// fixed columns of the remaining rows are moved to the right-hand side.
    /// Symmetry is preserved.
    pub fn eliminate_fixed(&self, fixed: &[Option<f64>], rhs: &mut [f64]) -> Self {
        assert_eq!(fixed.len(), self.n, "fixed-value vector length mismatch");
        let mut triplets = Vec::with_capacity(self.nnz());
        for i in 0..self.n {
            if let Some(v) = fixed[i] {
                triplets.push(Triplet::new(i, i, 1.));
                rhs[i] = v;
                continue;
            }
            let (cols, vals) = self.row(i);
            for (&j, &a) in cols.iter().zip(vals) {
                match fixed[j] {
                    Some(v) => rhs[i] -= a * v,
                    None => triplets.push(Triplet::new(i, j, a)),
                }
            }
        }
        Self::from_triplets(self.n, triplets)
    }
}

impl LinearOperator for CsrMatrix {
    fn len(&self) -> usize {
        self.n
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) {
        y.par_chunks_mut(ROW_CHUNK)
            .enumerate()
            .for_each(|(chunk, ys)| {
                let start = chunk * ROW_CHUNK;
                for (offset, yi) in ys.iter_mut().enumerate() {
                    let (cols, vals) = self.row(start + offset);
                    *yi = cols.iter().zip(vals).map(|(&j, &a)| a * x[j]).sum();
                }
            });
    }

    fn is_symmetric(&self) -> bool {
        self.symmetric
    }

    fn diagonal(&self) -> Option<Vec<f64>> {
        Some((0..self.n).map(|i| self.get(i, i)).collect())
    }

    fn as_csr(&self) -> Option<&CsrMatrix> {
        Some(self)
    }
}
