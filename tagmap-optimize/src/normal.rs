use faer::linalg::solvers::Solve;
use faer::sparse::{SparseColMat, Triplet};
use faer::{Mat, Side};
use nalgebra::{DMatrix, DVector, Matrix6};
use std::collections::BTreeMap;

/// Bounds of the diagonal used to scale the damping.
const MIN_DIAGONAL: f64 = 1e-6;
const MAX_DIAGONAL: f64 = 1e32;

/// Gauss-Newton normal equations `H·x = -g` over parameter blocks of six.
///
/// Only the blocks of `H` on or below the block diagonal are stored. An edge couples at most
/// two vertices, so the number of blocks grows with the number of edges rather than with the
/// square of the number of vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalEquations {
    blocks: BTreeMap<(usize, usize), Matrix6<f64>>,
    gradient: DVector<f64>,
}

impl NormalEquations {
    pub fn new(num_blocks: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            gradient: DVector::zeros(6 * num_blocks),
        }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.gradient.len()
    }

    /// Number of stored 6×6 blocks.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn gradient(&self) -> &DVector<f64> {
        &self.gradient
    }

    /// Accumulates `Jᵀ_row·J_col` into block `(row, col)`. Requires `row >= col`.
    pub fn add_hessian(&mut self, row: usize, col: usize, block: &DMatrix<f64>) {
        debug_assert!(row >= col);
        let block = Matrix6::from_iterator(block.iter().copied());
        *self.blocks.entry((row, col)).or_insert_with(Matrix6::zeros) += block;
    }

    /// Accumulates `Jᵀ·r` into the gradient of `block`.
    pub fn add_gradient(&mut self, block: usize, gradient: &DVector<f64>) {
        for (k, value) in gradient.iter().enumerate().take(6) {
            self.gradient[6 * block + k] += value;
        }
    }

    /// Diagonal of `H`, clamped, which scales the damping of each parameter.
    pub fn damping_scale(&self) -> DVector<f64> {
        let mut diagonal = DVector::from_element(self.dim(), MIN_DIAGONAL);
        for (&(row, col), block) in &self.blocks {
            if row == col {
                for k in 0..6 {
                    diagonal[6 * row + k] = block[(k, k)].max(MIN_DIAGONAL).min(MAX_DIAGONAL);
                }
            }
        }
        diagonal
    }

    /// Solves `(H + diag(damping))·x = -g` through a sparse Cholesky factorization.
    ///
    /// Returns `None` when the damped matrix is not positive definite.
    pub fn solve(&self, damping: &DVector<f64>) -> Option<DVector<f64>> {
        let n = self.dim();
        let mut triplets = Vec::with_capacity(72 * self.blocks.len() + n);
        for (&(row, col), block) in &self.blocks {
            for j in 0..6 {
                for i in 0..6 {
                    let (r, c) = (6 * row + i, 6 * col + j);
                    let mut value = block[(i, j)];
                    if r == c {
                        value += damping[r];
                    }
                    triplets.push(Triplet::new(r, c, value));
                    if row != col {
                        triplets.push(Triplet::new(c, r, value));
                    }
                }
            }
        }
        for block in 0..n / 6 {
            if !self.blocks.contains_key(&(block, block)) {
                for k in 6 * block..6 * block + 6 {
                    triplets.push(Triplet::new(k, k, damping[k]));
                }
            }
        }
        let matrix = SparseColMat::<usize, f64>::try_new_from_triplets(n, n, &triplets).ok()?;
        let llt = matrix.as_ref().sp_cholesky(Side::Lower).ok()?;
        let rhs = Mat::from_fn(n, 1, |i, _| -self.gradient[i]);
        let x = llt.solve(&rhs);
        let step = DVector::from_fn(n, |i, _| x[(i, 0)]);
        if step.iter().all(|v| v.is_finite()) {
            Some(step)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn dense(normal: &NormalEquations) -> DMatrix<f64> {
        let mut h = DMatrix::zeros(normal.dim(), normal.dim());
        for (&(row, col), block) in &normal.blocks {
            h.slice_mut((6 * row, 6 * col), (6, 6)).copy_from(block);
            if row != col {
                h.slice_mut((6 * col, 6 * row), (6, 6))
                    .copy_from(&block.transpose());
            }
        }
        h
    }

    /// Two blocks chained to a third, like odometry vertices along a path.
    fn chain() -> NormalEquations {
        let mut normal = NormalEquations::new(3);
        let j0 = DMatrix::from_fn(6, 6, |r, c| if r == c { 2.0 } else { 0.1 * (r + c) as f64 });
        let j1 = DMatrix::from_fn(6, 6, |r, c| if r == c { -1.5 } else { 0.05 * r as f64 });
        let j2 = DMatrix::<f64>::identity(6, 6);
        normal.add_hessian(0, 0, &j0.tr_mul(&j0));
        normal.add_hessian(1, 1, &j1.tr_mul(&j1));
        normal.add_hessian(1, 0, &j1.tr_mul(&j0));
        normal.add_hessian(2, 2, &j2.tr_mul(&j2));
        let r = DVector::from_fn(6, |i, _| i as f64 - 2.5);
        normal.add_gradient(0, &j0.tr_mul(&r));
        normal.add_gradient(1, &j1.tr_mul(&r));
        normal.add_gradient(2, &j2.tr_mul(&r));
        normal
    }

    #[test]
    fn sparse_solve_matches_dense() {
        let normal = chain();
        assert_eq!(normal.num_blocks(), 4);
        let damping = normal.damping_scale() * 1e-3;
        let step = normal.solve(&damping).unwrap();
        let damped = dense(&normal) + DMatrix::from_diagonal(&damping);
        let expected = damped.cholesky().unwrap().solve(&-normal.gradient());
        assert_relative_eq!(step, expected, epsilon = 1e-9);
    }

    #[test]
    fn damping_covers_blocks_without_edges() {
        let mut normal = NormalEquations::new(2);
        normal.add_hessian(0, 0, &DMatrix::identity(6, 6));
        normal.add_gradient(0, &DVector::from_element(6, 1.0));
        let step = normal.solve(&DVector::from_element(12, 1.0)).unwrap();
        assert_relative_eq!(step[0], -0.5, epsilon = 1e-12);
        assert_eq!(step[6], 0.0);
    }

    #[test]
    fn indefinite_system_has_no_solution() {
        let mut normal = NormalEquations::new(1);
        normal.add_hessian(0, 0, &(DMatrix::identity(6, 6) * -1.0));
        assert_eq!(normal.solve(&DVector::zeros(6)), None);
    }
}
