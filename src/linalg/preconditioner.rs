//! Preconditioners: `{None, Jacobi, SGS, ILU(0)}`, each exposing
//! `setup()`/`apply(r, z)` meaning `z ~= M^-1 r`.
//!
//! Dispatched through `enum_dispatch` rather than a trait object, the same
//! tagged-variant shape used elsewhere in this crate for a small, closed
//! set of implementations.

use enum_dispatch::enum_dispatch;
use rayon::prelude::*;

use crate::E;
use crate::error::SolverError;
use crate::linalg::block_sparse::{BlockSparseMatrix, invert_block, mat_mul_block, solve_dense_block};

#[enum_dispatch]
pub trait PreconditionerOp {
    /// (Re)builds whatever factorization/cache the preconditioner needs
    /// from the just-reassembled matrix. Invoked once per pseudo-time step.
    fn setup(&mut self, matrix: &BlockSparseMatrix) -> Result<(), SolverError>;

    /// `z <- M^-1 . r`.
    fn apply(&self, r: &[E], z: &mut [E]);
}

#[derive(Debug, Clone, Default)]
pub struct NoOp;

impl PreconditionerOp for NoOp {
    fn setup(&mut self, _matrix: &BlockSparseMatrix) -> Result<(), SolverError> {
        Ok(())
    }

    fn apply(&self, r: &[E], z: &mut [E]) {
        z.copy_from_slice(r);
    }
}

#[derive(Debug, Clone, Default)]
pub struct Jacobi {
    v: usize,
    diag: Vec<E>, // n blocks of V*V, raw (not inverted) diagonal
}

impl PreconditionerOp for Jacobi {
    fn setup(&mut self, matrix: &BlockSparseMatrix) -> Result<(), SolverError> {
        self.v = matrix.n_vars();
        let n = matrix.n_cells();
        self.diag = Vec::with_capacity(n * self.v * self.v);
        for i in 0..n {
            self.diag.extend_from_slice(matrix.diag_block(i));
        }
        Ok(())
    }

    /// Embarrassingly parallel: each cell's inverse applies independently
    /// of every other.
    fn apply(&self, r: &[E], z: &mut [E]) {
        let v = self.v;
        z.par_chunks_mut(v).enumerate().for_each(|(i, zi)| {
            let block = &self.diag[i * v * v..i * v * v + v * v];
            let _ = solve_dense_block(block, &r[i * v..i * v + v], zi);
        });
    }
}

/// Symmetric Gauss-Seidel: forward sweep with the lower triangle (+ diag),
/// then backward sweep with the upper triangle (+ diag). Strictly serial in
/// row order within a sweep.
#[derive(Debug, Clone, Default)]
pub struct SymmetricGaussSeidel {
    v: usize,
    n: usize,
    // row i -> sorted (col, block) pairs, owned copy of the matrix pattern.
    rows: Vec<Vec<(usize, Vec<E>)>>,
}

impl PreconditionerOp for SymmetricGaussSeidel {
    fn setup(&mut self, matrix: &BlockSparseMatrix) -> Result<(), SolverError> {
        self.v = matrix.n_vars();
        self.n = matrix.n_cells();
        self.rows = (0..self.n)
            .map(|i| {
                matrix
                    .row_blocks(i)
                    .into_iter()
                    .map(|(c, b)| (c, b.to_vec()))
                    .collect()
            })
            .collect();
        Ok(())
    }

    fn apply(&self, r: &[E], z: &mut [E]) {
        let v = self.v;
        z.copy_from_slice(r);

        // Forward sweep: z[i] <- D_i^-1 (r[i] - sum_{j<i} M_ij z[j]).
        for i in 0..self.n {
            let mut rhs = r[i * v..i * v + v].to_vec();
            let mut diag: Option<&[E]> = None;
            for (j, block) in &self.rows[i] {
                if *j < i {
                    sub_block_vec(block, &z[j * v..j * v + v], &mut rhs, v);
                } else if *j == i {
                    diag = Some(block.as_slice());
                }
            }
            if let Some(d) = diag {
                let _ = solve_dense_block(d, &rhs, &mut z[i * v..i * v + v]);
            }
        }

        // Backward sweep: z[i] <- D_i^-1 (D_i z[i] - sum_{j>i} M_ij z[j]), i.e.
        // re-solve with the upper triangle folded in, from the result of the
        // forward sweep.
        for i in (0..self.n).rev() {
            let mut rhs = vec![0.0; v];
            let mut diag: Option<&[E]> = None;
            for (j, block) in &self.rows[i] {
                if *j == i {
                    diag = Some(block.as_slice());
                    apply_block_vec(block, &z[i * v..i * v + v], &mut rhs, v);
                } else if *j > i {
                    sub_block_vec(block, &z[j * v..j * v + v], &mut rhs, v);
                }
            }
            if let Some(d) = diag {
                let _ = solve_dense_block(d, &rhs, &mut z[i * v..i * v + v]);
            }
        }
    }
}

fn sub_block_vec(block: &[E], x: &[E], rhs: &mut [E], v: usize) {
    for r in 0..v {
        let mut acc = 0.0;
        for c in 0..v {
            acc += block[r * v + c] * x[c];
        }
        rhs[r] -= acc;
    }
}

fn apply_block_vec(block: &[E], x: &[E], rhs: &mut [E], v: usize) {
    for r in 0..v {
        let mut acc = 0.0;
        for c in 0..v {
            acc += block[r * v + c] * x[c];
        }
        rhs[r] += acc;
    }
}

/// Incomplete LU with the pattern of `M`. `setup` computes block `L`/`U`
/// factors in place over the stored pattern; `apply` does a forward then
/// backward block-triangular solve.
#[derive(Debug, Clone, Default)]
pub struct Ilu0 {
    v: usize,
    n: usize,
    // Row-major copies of A's pattern, progressively overwritten with L
    // (strictly lower, unit diagonal implicit) and U (diag + strictly upper).
    rows: Vec<Vec<(usize, Vec<E>)>>,
}

impl PreconditionerOp for Ilu0 {
    fn setup(&mut self, matrix: &BlockSparseMatrix) -> Result<(), SolverError> {
        self.v = matrix.n_vars();
        self.n = matrix.n_cells();
        self.rows = (0..self.n)
            .map(|i| {
                matrix
                    .row_blocks(i)
                    .into_iter()
                    .map(|(c, b)| (c, b.to_vec()))
                    .collect()
            })
            .collect();

        let v = self.v;
        for i in 0..self.n {
            // Columns j < i present in row i, in increasing order.
            let lower_cols: Vec<usize> = self.rows[i]
                .iter()
                .filter(|(c, _)| *c < i)
                .map(|(c, _)| *c)
                .collect();

            for j in lower_cols {
                let u_jj = self.diag_of(j).to_vec();
                let u_jj_inv = invert_block(&u_jj, v)?;
                // L_ij = A_ij . U_jj^-1, stored back into position (i, j).
                let a_ij = self.block_at(i, j).to_vec();
                let l_ij = mat_mul_block(&a_ij, &u_jj_inv, v);
                self.set_at(i, j, &l_ij);

                // For each k > j stored in row j (upper part of row j),
                // eliminate from row i wherever row i also has column k.
                let row_j_upper: Vec<(usize, Vec<E>)> = self.rows[j]
                    .iter()
                    .filter(|(c, _)| *c > j)
                    .map(|(c, b)| (*c, b.clone()))
                    .collect();
                for (k, u_jk) in row_j_upper {
                    if self.has_at(i, k) {
                        let delta = mat_mul_block(&l_ij, &u_jk, v);
                        self.sub_at(i, k, &delta);
                    }
                }
            }

            let pivot = self.diag_of(i);
            if invert_block(pivot, v).is_err() {
                return Err(SolverError::numerical(format!(
                    "ILU(0) pivot block singular to working precision at row {i}"
                )));
            }
        }

        Ok(())
    }

    fn apply(&self, r: &[E], z: &mut [E]) {
        let v = self.v;
        // Forward solve L y = r (unit diagonal): y[i] = r[i] - sum_{j<i} L_ij y[j].
        let mut y = vec![0.0; self.n * v];
        for i in 0..self.n {
            let mut rhs = r[i * v..i * v + v].to_vec();
            for (j, block) in &self.rows[i] {
                if *j < i {
                    sub_block_vec(block, &y[j * v..j * v + v], &mut rhs, v);
                }
            }
            y[i * v..i * v + v].copy_from_slice(&rhs);
        }

        // Backward solve U z = y: z[i] = U_ii^-1 (y[i] - sum_{j>i} U_ij z[j]).
        for i in (0..self.n).rev() {
            let mut rhs = y[i * v..i * v + v].to_vec();
            let mut diag: Option<&[E]> = None;
            for (j, block) in &self.rows[i] {
                if *j > i {
                    sub_block_vec(block, &z[j * v..j * v + v], &mut rhs, v);
                } else if *j == i {
                    diag = Some(block.as_slice());
                }
            }
            if let Some(d) = diag {
                let _ = solve_dense_block(d, &rhs, &mut z[i * v..i * v + v]);
            }
        }
    }
}

impl Ilu0 {
    fn diag_of(&self, i: usize) -> &[E] {
        self.rows[i]
            .iter()
            .find(|(c, _)| *c == i)
            .map(|(_, b)| b.as_slice())
            .expect("ILU(0) row missing its diagonal block")
    }

    fn block_at(&self, i: usize, j: usize) -> &[E] {
        self.rows[i]
            .iter()
            .find(|(c, _)| *c == j)
            .map(|(_, b)| b.as_slice())
            .expect("ILU(0) elimination touched a slot outside the stored pattern")
    }

    fn has_at(&self, i: usize, j: usize) -> bool {
        self.rows[i].iter().any(|(c, _)| *c == j)
    }

    fn set_at(&mut self, i: usize, j: usize, block: &[E]) {
        if let Some((_, b)) = self.rows[i].iter_mut().find(|(c, _)| *c == j) {
            b.copy_from_slice(block);
        }
    }

    fn sub_at(&mut self, i: usize, j: usize, delta: &[E]) {
        if let Some((_, b)) = self.rows[i].iter_mut().find(|(c, _)| *c == j) {
            for (x, d) in b.iter_mut().zip(delta) {
                *x -= d;
            }
        }
    }
}

#[enum_dispatch(PreconditionerOp)]
#[derive(Debug, Clone)]
pub enum PreconditionerKind {
    NoOp(NoOp),
    Jacobi(Jacobi),
    SymmetricGaussSeidel(SymmetricGaussSeidel),
    Ilu0(Ilu0),
}

impl Default for PreconditionerKind {
    fn default() -> Self {
        PreconditionerKind::NoOp(NoOp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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
    fn jacobi_matches_scalar_diagonal_inverse() {
        let m = spd_tridiag(4);
        let mut pc = Jacobi::default();
        pc.setup(&m).unwrap();
        let r = [1.0, 2.0, 3.0, 4.0];
        let mut z = [0.0; 4];
        pc.apply(&r, &mut z);
        for i in 0..4 {
            assert!((z[i] - r[i] / 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn ilu0_on_tridiagonal_reduces_residual() {
        let m = spd_tridiag(8);
        let mut pc = Ilu0::default();
        pc.setup(&m).unwrap();

        let r = vec![1.0; 8];
        let mut z = vec![0.0; 8];
        pc.apply(&r, &mut z);

        let mut mz = vec![0.0; 8];
        m.apply(&z, &mut mz);
        let mut residual_norm = 0.0;
        for i in 0..8 {
            let d = mz[i] - r[i];
            residual_norm += d * d;
        }
        assert!(residual_norm.sqrt() < 1.0);
    }

    #[test]
    fn sgs_is_exact_for_diagonal_matrix() {
        let mut m = BlockSparseMatrix::new(3, 1);
        for i in 0..3 {
            m.set_block(i, i, &[(i as E) + 2.0]).unwrap();
        }
        m.freeze_pattern();
        let mut pc = SymmetricGaussSeidel::default();
        pc.setup(&m).unwrap();
        let r = [4.0, 9.0, 16.0];
        let mut z = [0.0; 3];
        pc.apply(&r, &mut z);
        for i in 0..3 {
            assert!((z[i] - r[i] / ((i as E) + 2.0)).abs() < 1e-10);
        }
    }
}
