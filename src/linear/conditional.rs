use nalgebra::{DMatrix, DVector};

use crate::key::Key;

/// The result of eliminating one or more frontal variables: an upper
/// triangular `R` over the frontals, an off-diagonal block `S` against the
/// separator, and right-hand side `d`, such that
/// `R·x_F = d − S·x_S` solves for the frontals given the separator. See
/// spec.md §3 "Gaussian conditional" / §4.C.
#[derive(Debug, Clone)]
pub struct GaussianConditional {
    pub frontals: Vec<Key>,
    pub separator: Vec<Key>,
    pub r: DMatrix<f64>,
    pub s: DMatrix<f64>,
    pub d: DVector<f64>,
}

impl GaussianConditional {
    pub fn frontal_dim(&self) -> usize {
        self.r.nrows()
    }

    pub fn separator_dim(&self) -> usize {
        self.s.ncols()
    }

    /// Solve `R·x_F = d − S·x_S` by back-substitution through the upper
    /// triangular `R`.
    pub fn solve(&self, separator_values: &DVector<f64>) -> DVector<f64> {
        let mut rhs = self.d.clone();
        if self.separator_dim() > 0 {
            rhs -= &self.s * separator_values;
        }
        solve_upper_triangular(&self.r, &rhs)
    }

    /// Gradient contribution of this clique's conditional to the whole-tree
    /// gradient: `−(R·Pᵀ)ᵀ·d` for the frontal block (with `P` the local
    /// column permutation — the identity here, since frontals/separator are
    /// already canonically ordered) and `−Sᵀ·d` for the separator block.
    /// See spec.md §4.C.
    pub fn gradient_contribution(&self) -> (DVector<f64>, DVector<f64>) {
        let frontal = -(self.r.transpose() * &self.d);
        let separator = if self.separator_dim() > 0 {
            -(self.s.transpose() * &self.d)
        } else {
            DVector::zeros(0)
        };
        (frontal, separator)
    }
}

/// Back-substitute `R x = rhs` for upper triangular `R` (assumed square,
/// non-singular on the diagonal).
pub fn solve_upper_triangular(r: &DMatrix<f64>, rhs: &DVector<f64>) -> DVector<f64> {
    let n = r.nrows();
    let mut x = DVector::zeros(n);
    for i in (0..n).rev() {
        let mut acc = rhs[i];
        for j in (i + 1)..n {
            acc -= r[(i, j)] * x[j];
        }
        x[i] = acc / r[(i, i)];
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_two_by_two_triangular_system() {
        let r = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 0.0, 3.0]);
        let rhs = DVector::from_vec(vec![4.0, 6.0]);
        let x = solve_upper_triangular(&r, &rhs);
        // 3*x1 = 6 -> x1 = 2; 2*x0 + 1*2 = 4 -> x0 = 1
        assert!((x[1] - 2.0).abs() < 1e-12);
        assert!((x[0] - 1.0).abs() < 1e-12);
    }
}
