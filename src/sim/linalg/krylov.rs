//! Krylov-subspace iterations.
//!
//! Every routine updates `x` in place and returns `(iterations, status)`.
//! Convergence is declared on the relative residual `‖r‖ / ‖b‖`; when the
//! recursively updated residual says "converged", the true residual is
//! recomputed and the iteration continues from it if the two disagree.

use super::{LinearOperator, SolveOptions, SolveStatus, axpy, dot, norm};

/// Jacobi scaling `z = D⁻¹ r`, or a copy of `r` without a usable diagonal.
struct Jacobi {
    inv_diag: Option<Vec<f64>>,
}

impl Jacobi {
    fn new(op: &dyn LinearOperator) -> Self {
        let inv_diag = op.diagonal().and_then(|d| {
            if d.iter().all(|v| *v > 1e-300 && v.is_finite()) {
                Some(d.iter().map(|v| 1. / v).collect())
            } else {
                None
            }
        });
        Self { inv_diag }
    }

    fn apply(&self, r: &[f64], z: &mut [f64]) {
        match &self.inv_diag {
            Some(inv) => z
                .iter_mut()
                .zip(r.iter().zip(inv))
                .for_each(|(zi, (ri, di))| *zi = ri * di),
            None => z.copy_from_slice(r),
        }
    }
}

/// Returns the true residual `b - A x` and its relative norm.
fn true_residual(op: &dyn LinearOperator, b: &[f64], x: &[f64], b_norm: f64) -> (Vec<f64>, f64) {
    let r = op.residual(x, b);
    let rel = norm(&r) / b_norm;
    (r, rel)
}

/// Preconditioned conjugate gradients (Jacobi).
pub fn cg(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    options: &SolveOptions,
) -> (usize, SolveStatus) {
    let n = b.len();
    let b_norm = norm(b);
    let tol = options.tolerance;
    let precond = Jacobi::new(op);

    let (mut r, rel) = true_residual(op, b, x, b_norm);
    if rel <= tol {
        return (0, SolveStatus::Converged);
    }

    let mut z = vec![0.0; n];
    precond.apply(&r, &mut z);
    let mut p = z.clone();
    let mut rz_old = dot(&r, &z);
    let mut ap = vec![0.0; n];

    for it in 1..=options.max_iterations {
        op.apply(&p, &mut ap);
        let denom = dot(&p, &ap);
        if denom.abs() < 1e-300 {
            return (it, SolveStatus::Breakdown);
        }

        let alpha = rz_old / denom;
        axpy(alpha, &p, x);
        axpy(-alpha, &ap, &mut r);

        if norm(&r) / b_norm <= tol {
            let (r_true, rel) = true_residual(op, b, x, b_norm);
            if rel <= tol {
                return (it, SolveStatus::Converged);
            }
            // Residual replacement: restart the recurrence from the true residual.
            r = r_true;
            precond.apply(&r, &mut z);
            p.copy_from_slice(&z);
            rz_old = dot(&r, &z);
            continue;
        }

        precond.apply(&r, &mut z);
        let rz_new = dot(&r, &z);
        let beta = rz_new / rz_old;
        for (pi, zi) in p.iter_mut().zip(&z) {
            *pi = zi + beta * *pi;
        }
        rz_old = rz_new;
    }

    (options.max_iterations, SolveStatus::MaxIterations)
}

/// BiCGSTAB with right Jacobi preconditioning.
pub fn bicgstab(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    options: &SolveOptions,
) -> (usize, SolveStatus) {
    let n = b.len();
    let b_norm = norm(b);
    let tol = options.tolerance;
    let precond = Jacobi::new(op);

    let (mut r, rel) = true_residual(op, b, x, b_norm);
    if rel <= tol {
        return (0, SolveStatus::Converged);
    }
    let mut r_hat = r.clone();
    let mut rho_old = 1.0;
    let mut alpha = 1.0;
    let mut omega = 1.0;
    let mut p = vec![0.0; n];
    let mut v = vec![0.0; n];
    let mut p_hat = vec![0.0; n];
    let mut s = vec![0.0; n];
    let mut s_hat = vec![0.0; n];
    let mut t = vec![0.0; n];
    let mut restart = true;

    for it in 1..=options.max_iterations {
        let rho = dot(&r_hat, &r);
        if rho.abs() < 1e-300 {
            return (it, SolveStatus::Breakdown);
        }
        if restart {
            p.copy_from_slice(&r);
            restart = false;
        } else {
            let beta = (rho / rho_old) * (alpha / omega);
            for ((pi, ri), vi) in p.iter_mut().zip(&r).zip(&v) {
                *pi = ri + beta * (*pi - omega * vi);
            }
        }

        precond.apply(&p, &mut p_hat);
        op.apply(&p_hat, &mut v);
        let rv = dot(&r_hat, &v);
        if rv.abs() < 1e-300 {
            return (it, SolveStatus::Breakdown);
        }
        alpha = rho / rv;
        for ((si, ri), vi) in s.iter_mut().zip(&r).zip(&v) {
            *si = ri - alpha * vi;
        }

        if norm(&s) / b_norm <= tol {
            axpy(alpha, &p_hat, x);
            let (r_true, rel) = true_residual(op, b, x, b_norm);
            if rel <= tol {
                return (it, SolveStatus::Converged);
            }
            r = r_true;
            r_hat.copy_from_slice(&r);
            restart = true;
            rho_old = 1.0;
            continue;
        }

        precond.apply(&s, &mut s_hat);
        op.apply(&s_hat, &mut t);
        let tt = dot(&t, &t);
        if tt < 1e-300 {
            return (it, SolveStatus::Breakdown);
        }
        omega = dot(&t, &s) / tt;
        axpy(alpha, &p_hat, x);
        axpy(omega, &s_hat, x);
        for ((ri, si), ti) in r.iter_mut().zip(&s).zip(&t) {
            *ri = si - omega * ti;
        }

        if norm(&r) / b_norm <= tol {
            let (r_true, rel) = true_residual(op, b, x, b_norm);
            if rel <= tol {
                return (it, SolveStatus::Converged);
            }
            r = r_true;
            r_hat.copy_from_slice(&r);
            restart = true;
            rho_old = 1.0;
            continue;
        }
        if omega.abs() < 1e-300 {
            return (it, SolveStatus::Breakdown);
        }
        rho_old = rho;
    }

    (options.max_iterations, SolveStatus::MaxIterations)
}

/// Restarted GMRES(m) with right Jacobi preconditioning and Givens rotations.
pub fn gmres(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    options: &SolveOptions,
) -> (usize, SolveStatus) {
    let n = b.len();
    let b_norm = norm(b);
    let tol = options.tolerance;
    let m = options.gmres_restart.min(n.max(1));
    let precond = Jacobi::new(op);

    let mut total = 0;
    let mut w = vec![0.0; n];
    let mut z = vec![0.0; n];

    while total < options.max_iterations {
        let (r, rel) = true_residual(op, b, x, b_norm);
        if rel <= tol {
            return (total, SolveStatus::Converged);
        }
        let beta = rel * b_norm;

        let mut basis: Vec<Vec<f64>> = Vec::with_capacity(m + 1);
        basis.push(r.iter().map(|v| v / beta).collect());
        // Hessenberg matrix stored by column: h[j] has j + 2 entries.
        let mut h: Vec<Vec<f64>> = Vec::with_capacity(m);
        let mut cs: Vec<f64> = Vec::with_capacity(m);
        let mut sn: Vec<f64> = Vec::with_capacity(m);
        let mut g = vec![0.0; m + 1];
        g[0] = beta;

        let mut k = 0;
        while k < m && total < options.max_iterations {
            total += 1;
            precond.apply(&basis[k], &mut z);
            op.apply(&z, &mut w);

            // Modified Gram-Schmidt.
            let mut col = vec![0.0; k + 2];
            for (i, vi) in basis.iter().enumerate() {
                let hij = dot(&w, vi);
                col[i] = hij;
                axpy(-hij, vi, &mut w);
            }
            let w_norm = norm(&w);
            col[k + 1] = w_norm;

            // Apply previous rotations, then build the new one.
            for i in 0..k {
                let temp = cs[i] * col[i] + sn[i] * col[i + 1];
                col[i + 1] = -sn[i] * col[i] + cs[i] * col[i + 1];
                col[i] = temp;
            }
            let denom = (col[k] * col[k] + col[k + 1] * col[k + 1]).sqrt();
            let (c, s) = if denom < 1e-300 {
                (1.0, 0.0)
            } else {
                (col[k] / denom, col[k + 1] / denom)
            };
            cs.push(c);
            sn.push(s);
            col[k] = c * col[k] + s * col[k + 1];
            col[k + 1] = 0.0;
            g[k + 1] = -s * g[k];
            g[k] *= c;
            h.push(col);
            k += 1;

            if g[k].abs() / b_norm <= tol || w_norm < 1e-300 {
                break;
            }
            basis.push(w.iter().map(|v| v / w_norm).collect());
        }

        // Back substitution for the k x k upper-triangular system.
        let mut y = vec![0.0; k];
        for i in (0..k).rev() {
            let mut sum = g[i];
            for (j, yj) in y.iter().enumerate().skip(i + 1) {
                sum -= h[j][i] * yj;
            }
            y[i] = if h[i][i].abs() < 1e-300 { 0.0 } else { sum / h[i][i] };
        }
        let mut update = vec![0.0; n];
        for (yi, vi) in y.iter().zip(&basis) {
            axpy(*yi, vi, &mut update);
        }
        precond.apply(&update, &mut z);
        axpy(1.0, &z, x);
    }

    let (_, rel) = true_residual(op, b, x, b_norm);
    if rel <= tol {
        (total, SolveStatus::Converged)
    } else {
        (total, SolveStatus::MaxIterations)
    }
}

/// MINRES (Paige & Saunders) with Jacobi preconditioning when the diagonal
/// is positive.
pub fn minres(
    op: &dyn LinearOperator,
    b: &[f64],
    x: &mut [f64],
    options: &SolveOptions,
) -> (usize, SolveStatus) {
    let n = b.len();
    let b_norm = norm(b);
    let tol = options.tolerance;
    let precond = Jacobi::new(op);

    let (r0, rel) = true_residual(op, b, x, b_norm);
    if rel <= tol {
        return (0, SolveStatus::Converged);
    }

    let mut y = vec![0.0; n];
    precond.apply(&r0, &mut y);
    let mut r1 = r0.clone();
    let mut r2 = r0;
    let beta1 = dot(&r1, &y).sqrt();
    let mut beta = beta1;
    let mut old_b = 0.0;
    let mut dbar = 0.0;
    let mut epsln = 0.0;
    let mut phibar = beta1;
    let mut cs = -1.0;
    let mut sn = 0.0;
    let mut w = vec![0.0; n];
    let mut w1 = vec![0.0; n];
    let mut w2 = vec![0.0; n];
    let mut v = vec![0.0; n];

    // Ratio between the preconditioned and the plain residual norm at start,
    // used to translate the recurrence estimate into ‖r‖ / ‖b‖.
    let scale = rel * b_norm / beta1;

    for it in 1..=options.max_iterations {
        let s = 1.0 / beta;
        for (vi, yi) in v.iter_mut().zip(&y) {
            *vi = s * yi;
        }
        op.apply(&v, &mut y);
        if it >= 2 {
            axpy(-beta / old_b, &r1, &mut y);
        }
        let alfa = dot(&v, &y);
        axpy(-alfa / beta, &r2, &mut y);
        std::mem::swap(&mut r1, &mut r2);
        r2.copy_from_slice(&y);
        precond.apply(&r2, &mut y);
        old_b = beta;
        beta = dot(&r2, &y).max(0.).sqrt();

        let old_eps = epsln;
        let delta = cs * dbar + sn * alfa;
        let gbar = sn * dbar - cs * alfa;
        epsln = sn * beta;
        dbar = -cs * beta;
        let gamma = (gbar * gbar + beta * beta).sqrt().max(f64::EPSILON);
        cs = gbar / gamma;
        sn = beta / gamma;
        let phi = cs * phibar;
        phibar *= sn;

        let denom = 1.0 / gamma;
        std::mem::swap(&mut w1, &mut w2);
        std::mem::swap(&mut w2, &mut w);
        for ((wi, vi), (w1i, w2i)) in w.iter_mut().zip(&v).zip(w1.iter().zip(&w2)) {
            *wi = (vi - old_eps * w1i - delta * w2i) * denom;
        }
        axpy(phi, &w, x);

        if phibar.abs() * scale / b_norm <= tol || beta < 1e-300 {
            let (_, rel) = true_residual(op, b, x, b_norm);
            if rel <= tol {
                return (it, SolveStatus::Converged);
            }
            if beta < 1e-300 {
                return (it, SolveStatus::Breakdown);
            }
        }
    }

    (options.max_iterations, SolveStatus::MaxIterations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::linalg::{CsrMatrix, Triplet};

    /// Non-symmetric convection-diffusion chain.
    fn upwind_chain(n: usize) -> CsrMatrix {
        let mut t = Vec::new();
        for i in 0..n {
            t.push(Triplet::new(i, i, 3.0));
            if i > 0 {
                t.push(Triplet::new(i, i - 1, -1.5));
            }
            if i + 1 < n {
                t.push(Triplet::new(i, i + 1, -0.5));
            }
        }
        CsrMatrix::from_triplets(n, t)
    }

    fn check(op: &CsrMatrix, x: &[f64], b: &[f64], tol: f64) {
        let r = op.residual(x, b);
        assert!(norm(&r) / norm(b) <= tol, "residual {}", norm(&r) / norm(b));
    }

    #[test]
    fn test_bicgstab_and_gmres_on_non_symmetric() {
        let a = upwind_chain(60);
        assert!(!a.is_symmetric());
        let b: Vec<f64> = (0..60).map(|i| 1.0 + (i % 3) as f64).collect();
        let options = SolveOptions::default().with_tolerance(1e-9);

        let mut x = vec![0.0; 60];
        let (_, status) = bicgstab(&a, &b, &mut x, &options);
        assert_eq!(status, SolveStatus::Converged);
        check(&a, &x, &b, 1e-9);

        let mut x = vec![0.0; 60];
        let (_, status) = gmres(&a, &b, &mut x, &options);
        assert_eq!(status, SolveStatus::Converged);
        check(&a, &x, &b, 1e-9);
    }

    #[test]
    fn test_gmres_with_short_restart() {
        let a = upwind_chain(80);
        let b = vec![1.0; 80];
        let mut options = SolveOptions::default().with_tolerance(1e-8);
        options.gmres_restart = 5;
        let mut x = vec![0.0; 80];
        let (iterations, status) = gmres(&a, &b, &mut x, &options);
        assert_eq!(status, SolveStatus::Converged);
        assert!(iterations > 5, "iterations={iterations}");
        check(&a, &x, &b, 1e-8);
    }

    #[test]
    fn test_minres_on_symmetric_indefinite() {
        // diag(1, -2, 3, -4, ...) is symmetric but indefinite: MINRES handles it.
        let n = 20;
        let t = (0..n)
            .map(|i| {
                let v = (i + 1) as f64;
                Triplet::new(i, i, if i % 2 == 0 { v } else { -v })
            })
            .collect();
        let a = CsrMatrix::from_triplets(n, t);
        let b = vec![1.0; n];
        let mut x = vec![0.0; n];
        let (_, status) = minres(&a, &b, &mut x, &SolveOptions::default().with_tolerance(1e-10));
        assert_eq!(status, SolveStatus::Converged);
        check(&a, &x, &b, 1e-10);
    }

    #[test]
    fn test_warm_start_converges_immediately() {
        let a = upwind_chain(10);
        let b = vec![2.0; 10];
        let options = SolveOptions::default().with_tolerance(1e-12);
        let mut x = vec![0.0; 10];
        bicgstab(&a, &b, &mut x, &options);
        let (iterations, status) = cg(&a, &b, &mut x, &options);
        assert_eq!((iterations, status), (0, SolveStatus::Converged));
    }
}
