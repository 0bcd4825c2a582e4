//! Linear solvers: `{Richardson, BiCGStab, GMRES(k)}`, each preconditioned
//! and operating on any [`LinearOperator`]. Working vectors are
//! preallocated at construction so the inner loop does no per-iteration
//! heap traffic.

use crate::E;
use crate::linalg::operator::LinearOperator;
use crate::linalg::preconditioner::{PreconditionerKind, PreconditionerOp};
use crate::linalg::vector_ops::{axpy, dot, norm2, scale, sub_into};

/// A solve outcome: the number of iterations actually taken. The caller
/// always gets back its best iterate in `x`, converged or not -- a
/// non-convergent inner solve is not itself an error, only a signal the
/// outer driver may act on.
pub type Iterations = usize;

/// Lets a long inner solve observe the same cancellation signal the outer
/// driver's terminator does, without the Krylov module depending on
/// `terminators` directly.
pub trait IterationObserver {
    /// Called once per outer iteration; `true` requests an early stop.
    fn should_stop(&mut self) -> bool {
        let _ = self;
        false
    }
}

/// No-op observer for call sites that don't need cancellation.
pub struct NoObserver;
impl IterationObserver for NoObserver {}

fn rel_tol_met(r_norm: E, r0_norm: E, tol: E) -> bool {
    if r0_norm == 0.0 {
        r_norm == 0.0
    } else {
        r_norm / r0_norm <= tol
    }
}

/// Stationary Richardson iteration: `x <- x + M^-1 (b - A x)`.
pub struct Richardson {
    dim: usize,
    r: Vec<E>,
    z: Vec<E>,
    ax: Vec<E>,
}

impl Richardson {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            r: vec![0.0; dim],
            z: vec![0.0; dim],
            ax: vec![0.0; dim],
        }
    }

    pub fn solve(
        &mut self,
        op: &dyn LinearOperator,
        pc: &PreconditionerKind,
        b: &[E],
        x: &mut [E],
        tol: E,
        maxit: usize,
        observer: &mut dyn IterationObserver,
    ) -> Iterations {
        debug_assert_eq!(op.dim(), self.dim);
        op.apply(x, &mut self.ax);
        sub_into(b, &self.ax, &mut self.r);
        let r0_norm = norm2(&self.r);
        if rel_tol_met(r0_norm, r0_norm, tol) {
            return 0;
        }

        for it in 1..=maxit {
            pc.apply(&self.r, &mut self.z);
            for i in 0..self.dim {
                x[i] += self.z[i];
            }
            op.apply(x, &mut self.ax);
            sub_into(b, &self.ax, &mut self.r);
            let r_norm = norm2(&self.r);
            if rel_tol_met(r_norm, r0_norm, tol) {
                return it;
            }
            if observer.should_stop() {
                return it;
            }
        }
        maxit
    }
}

/// Preconditioned BiCGStab with breakdown guards (`rho`/`omega` collapsing
/// to ~0 ends the solve early rather than dividing by zero).
pub struct BiCgStab {
    dim: usize,
    r: Vec<E>,
    r_hat: Vec<E>,
    p: Vec<E>,
    v: Vec<E>,
    s: Vec<E>,
    t: Vec<E>,
    p_hat: Vec<E>,
    s_hat: Vec<E>,
}

impl BiCgStab {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            r: vec![0.0; dim],
            r_hat: vec![0.0; dim],
            p: vec![0.0; dim],
            v: vec![0.0; dim],
            s: vec![0.0; dim],
            t: vec![0.0; dim],
            p_hat: vec![0.0; dim],
            s_hat: vec![0.0; dim],
        }
    }

    pub fn solve(
        &mut self,
        op: &dyn LinearOperator,
        pc: &PreconditionerKind,
        b: &[E],
        x: &mut [E],
        tol: E,
        maxit: usize,
        observer: &mut dyn IterationObserver,
    ) -> Iterations {
        debug_assert_eq!(op.dim(), self.dim);
        const BREAKDOWN: E = 1e-300;

        let mut ax = vec![0.0; self.dim];
        op.apply(x, &mut ax);
        sub_into(b, &ax, &mut self.r);
        self.r_hat.copy_from_slice(&self.r);
        let r0_norm = norm2(&self.r);
        if rel_tol_met(r0_norm, r0_norm, tol) {
            return 0;
        }

        let mut rho = 1.0;
        let mut alpha = 1.0;
        let mut omega = 1.0;
        self.p.fill(0.0);
        self.v.fill(0.0);

        for it in 1..=maxit {
            let rho_new = dot(&self.r_hat, &self.r);
            if rho_new.abs() < BREAKDOWN || omega.abs() < BREAKDOWN {
                return it - 1;
            }
            let beta = (rho_new / rho) * (alpha / omega);
            for i in 0..self.dim {
                self.p[i] = self.r[i] + beta * (self.p[i] - omega * self.v[i]);
            }
            rho = rho_new;

            pc.apply(&self.p, &mut self.p_hat);
            op.apply(&self.p_hat, &mut self.v);

            let r_hat_dot_v = dot(&self.r_hat, &self.v);
            if r_hat_dot_v.abs() < BREAKDOWN {
                return it - 1;
            }
            alpha = rho / r_hat_dot_v;

            for i in 0..self.dim {
                self.s[i] = self.r[i] - alpha * self.v[i];
            }
            let s_norm = norm2(&self.s);
            if rel_tol_met(s_norm, r0_norm, tol) {
                axpy(alpha, &self.p_hat, x);
                return it;
            }

            pc.apply(&self.s, &mut self.s_hat);
            let mut t_tmp = vec![0.0; self.dim];
            op.apply(&self.s_hat, &mut t_tmp);
            self.t.copy_from_slice(&t_tmp);

            let t_dot_t = dot(&self.t, &self.t);
            if t_dot_t.abs() < BREAKDOWN {
                axpy(alpha, &self.p_hat, x);
                return it;
            }
            omega = dot(&self.t, &self.s) / t_dot_t;

            axpy(alpha, &self.p_hat, x);
            axpy(omega, &self.s_hat, x);

            for i in 0..self.dim {
                self.r[i] = self.s[i] - omega * self.t[i];
            }
            let r_norm = norm2(&self.r);
            if rel_tol_met(r_norm, r0_norm, tol) {
                return it;
            }
            if observer.should_stop() {
                return it;
            }
        }
        maxit
    }
}

/// Restarted GMRES(k): Arnoldi with modified Gram-Schmidt, least-squares
/// solved incrementally via Givens rotations.
pub struct Gmres {
    dim: usize,
    restart: usize,
}

impl Gmres {
    pub fn new(dim: usize, restart: usize) -> Self {
        Self {
            dim,
            restart: restart.max(1),
        }
    }

    pub fn solve(
        &mut self,
        op: &dyn LinearOperator,
        pc: &PreconditionerKind,
        b: &[E],
        x: &mut [E],
        tol: E,
        maxit: usize,
        observer: &mut dyn IterationObserver,
    ) -> Iterations {
        debug_assert_eq!(op.dim(), self.dim);
        let n = self.dim;
        let m = self.restart;

        let mut ax = vec![0.0; n];
        let mut r = vec![0.0; n];
        op.apply(x, &mut ax);
        sub_into(b, &ax, &mut r);
        let r0_norm = norm2(&r);
        if rel_tol_met(r0_norm, r0_norm, tol) {
            return 0;
        }

        let mut total_it = 0usize;
        let mut beta = r0_norm;

        'outer: while total_it < maxit {
            // Krylov basis V (m+1 columns of length n) and Hessenberg H.
            let mut v: Vec<Vec<E>> = Vec::with_capacity(m + 1);
            let mut h = vec![vec![0.0; m]; m + 1];
            let mut cs = vec![0.0; m];
            let mut sn = vec![0.0; m];
            let mut g = vec![0.0; m + 1];

            let mut v0 = r.clone();
            scale(1.0 / beta, &mut v0);
            v.push(v0);
            g[0] = beta;

            let mut k_used = 0;
            for k in 0..m {
                let mut z = vec![0.0; n];
                pc.apply(&v[k], &mut z);
                let mut w = vec![0.0; n];
                op.apply(&z, &mut w);

                // Modified Gram-Schmidt against the existing basis.
                for j in 0..=k {
                    let hjk = dot(&v[j], &w);
                    h[j][k] = hjk;
                    for i in 0..n {
                        w[i] -= hjk * v[j][i];
                    }
                }
                let h_next = norm2(&w);
                h[k + 1][k] = h_next;

                // Apply previous Givens rotations to the new column.
                for j in 0..k {
                    let temp = cs[j] * h[j][k] + sn[j] * h[j + 1][k];
                    h[j + 1][k] = -sn[j] * h[j][k] + cs[j] * h[j + 1][k];
                    h[j][k] = temp;
                }
                let denom = (h[k][k] * h[k][k] + h_next * h_next).sqrt();
                if denom.abs() < 1e-300 {
                    k_used = k + 1;
                    break;
                }
                cs[k] = h[k][k] / denom;
                sn[k] = h_next / denom;
                h[k][k] = denom;
                h[k + 1][k] = 0.0;

                g[k + 1] = -sn[k] * g[k];
                g[k] = cs[k] * g[k];

                k_used = k + 1;
                total_it += 1;

                if h_next.abs() >= 1e-300 {
                    let mut vk1 = w;
                    scale(1.0 / h_next, &mut vk1);
                    v.push(vk1);
                }

                let resid = g[k + 1].abs();
                let stop_now = rel_tol_met(resid, r0_norm, tol)
                    || total_it >= maxit
                    || observer.should_stop();
                if stop_now || h_next.abs() < 1e-300 {
                    let y = back_solve_upper(&h, &g, k_used);
                    apply_correction(&y, &v, pc, x, n);
                    if stop_now {
                        break 'outer;
                    }
                    break;
                }
            }

            if k_used == 0 {
                break;
            }

            op.apply(x, &mut ax);
            sub_into(b, &ax, &mut r);
            beta = norm2(&r);
            if rel_tol_met(beta, r0_norm, tol) {
                break;
            }
        }
        total_it.min(maxit)
    }
}

/// Back-substitution on the `k x k` upper-triangular part of the rotated
/// Hessenberg, `h[0..k][0..k]`, giving the coefficients `y` of the Krylov
/// basis correction.
fn back_solve_upper(h: &[Vec<E>], g: &[E], k: usize) -> Vec<E> {
    let mut y = vec![0.0; k];
    for i in (0..k).rev() {
        let mut acc = g[i];
        for j in (i + 1)..k {
            acc -= h[i][j] * y[j];
        }
        y[i] = if h[i][i].abs() > 1e-300 { acc / h[i][i] } else { 0.0 };
    }
    y
}

/// `x <- x + M^-1 (sum_i y_i v_i)`, the preconditioned basis correction.
fn apply_correction(y: &[E], v: &[Vec<E>], pc: &PreconditionerKind, x: &mut [E], n: usize) {
    let mut combo = vec![0.0; n];
    for (yi, vi) in y.iter().zip(v) {
        axpy(*yi, vi, &mut combo);
    }
    let mut z = vec![0.0; n];
    pc.apply(&combo, &mut z);
    for i in 0..n {
        x[i] += z[i];
    }
}

/// Tagged union over the three solvers, sized once from the config and
/// reused across every pseudo-time step.
pub enum KrylovSolver {
    Richardson(Richardson),
    BiCgStab(BiCgStab),
    Gmres(Gmres),
}

impl KrylovSolver {
    pub fn richardson(dim: usize) -> Self {
        KrylovSolver::Richardson(Richardson::new(dim))
    }

    pub fn bicgstab(dim: usize) -> Self {
        KrylovSolver::BiCgStab(BiCgStab::new(dim))
    }

    pub fn gmres(dim: usize, restart: usize) -> Self {
        KrylovSolver::Gmres(Gmres::new(dim, restart))
    }

    pub fn solve(
        &mut self,
        op: &dyn LinearOperator,
        pc: &PreconditionerKind,
        b: &[E],
        x: &mut [E],
        tol: E,
        maxit: usize,
        observer: &mut dyn IterationObserver,
    ) -> Iterations {
        match self {
            KrylovSolver::Richardson(s) => s.solve(op, pc, b, x, tol, maxit, observer),
            KrylovSolver::BiCgStab(s) => s.solve(op, pc, b, x, tol, maxit, observer),
            KrylovSolver::Gmres(s) => s.solve(op, pc, b, x, tol, maxit, observer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::block_sparse::BlockSparseMatrix;
    use crate::linalg::operator::AssembledOperator;
    use crate::linalg::preconditioner::{Jacobi, PreconditionerOp};

    fn spd_tridiag(n: usize) -> BlockSparseMatrix {
        let mut m = BlockSparseMatrix::new(n, 1);
        for i in 0..n {
            m.set_block(i, i, &[2.0]).unwrap();
            if i + 1 < n {
                m.set_block(i, i + 1, &[-1.0]).unwrap();
                m.set_block(i + 1, i, &[-1.0]).unwrap();
            }
        }
        m.freeze_pattern();
        m
    }

    #[test]
    fn richardson_converges_with_jacobi_on_diagonally_dominant_system() {
        let m = spd_tridiag(5);
        let op = AssembledOperator { matrix: &m };
        let mut jac = Jacobi::default();
        jac.setup(&m).unwrap();
        let pc = PreconditionerKind::Jacobi(jac);

        let b = vec![1.0; 5];
        let mut x = vec![0.0; 5];
        let mut solver = Richardson::new(5);
        let mut obs = NoObserver;
        let it = solver.solve(&op, &pc, &b, &mut x, 1e-8, 500, &mut obs);
        assert!(it < 500);

        let mut ax = vec![0.0; 5];
        m.apply(&x, &mut ax);
        for i in 0..5 {
            assert!((ax[i] - b[i]).abs() < 1e-4);
        }
    }

    #[test]
    fn bicgstab_solves_tridiagonal_system() {
        let m = spd_tridiag(6);
        let op = AssembledOperator { matrix: &m };
        let pc = PreconditionerKind::default();

        let b = vec![1.0; 6];
        let mut x = vec![0.0; 6];
        let mut solver = BiCgStab::new(6);
        let mut obs = NoObserver;
        let it = solver.solve(&op, &pc, &b, &mut x, 1e-10, 100, &mut obs);
        assert!(it < 100);

        let mut ax = vec![0.0; 6];
        m.apply(&x, &mut ax);
        for i in 0..6 {
            assert!((ax[i] - b[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn gmres_solves_tridiagonal_system() {
        let m = spd_tridiag(6);
        let op = AssembledOperator { matrix: &m };
        let pc = PreconditionerKind::default();

        let b = vec![1.0; 6];
        let mut x = vec![0.0; 6];
        let mut solver = Gmres::new(6, 6);
        let mut obs = NoObserver;
        let it = solver.solve(&op, &pc, &b, &mut x, 1e-10, 50, &mut obs);
        assert!(it > 0);

        let mut ax = vec![0.0; 6];
        m.apply(&x, &mut ax);
        for i in 0..6 {
            assert!((ax[i] - b[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn gmres_restarts_within_small_restart_window() {
        let m = spd_tridiag(10);
        let op = AssembledOperator { matrix: &m };
        let pc = PreconditionerKind::default();

        let b = vec![1.0; 10];
        let mut x = vec![0.0; 10];
        let mut solver = Gmres::new(10, 3);
        let mut obs = NoObserver;
        let it = solver.solve(&op, &pc, &b, &mut x, 1e-10, 200, &mut obs);

        let mut ax = vec![0.0; 10];
        m.apply(&x, &mut ax);
        let mut resid = 0.0;
        for i in 0..10 {
            let d = ax[i] - b[i];
            resid += d * d;
        }
        assert!(resid.sqrt() < 1e-6);
        assert!(it > 0);
    }
}
