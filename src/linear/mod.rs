pub mod conditional;
pub mod hessian;
pub mod jacobian;

use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::error::Isam2Error;
use crate::isam2::params::Factorization;
use crate::key::Key;

pub use conditional::GaussianConditional;
pub use hessian::HessianFactor;
pub use jacobian::JacobianFactor;

/// Either representation a factor-graph edge can be carried in between
/// elimination steps. See spec.md §3 "Linear factor".
#[derive(Debug, Clone, derive_more::IsVariant)]
pub enum LinearFactor {
    Jacobian(JacobianFactor),
    Hessian(HessianFactor),
}

impl LinearFactor {
    pub fn keys(&self) -> &[Key] {
        match self {
            LinearFactor::Jacobian(j) => &j.keys,
            LinearFactor::Hessian(h) => &h.keys,
        }
    }

    pub fn to_hessian(&self) -> HessianFactor {
        match self {
            LinearFactor::Jacobian(j) => HessianFactor::from_jacobian(j),
            LinearFactor::Hessian(h) => h.clone(),
        }
    }

    /// Convert to Jacobian form via a Cholesky square root of the
    /// information matrix. Fails if the information matrix is not positive
    /// definite (a genuinely indefinite cached factor).
    pub fn to_jacobian(&self, dims: &HashMap<Key, usize>) -> Result<JacobianFactor, Isam2Error> {
        match self {
            LinearFactor::Jacobian(j) => Ok(j.clone()),
            LinearFactor::Hessian(h) => {
                if h.info_matrix.nrows() == 0 {
                    return Ok(JacobianFactor::new(vec![], vec![], DVector::zeros(0)));
                }
                let chol = nalgebra::linalg::Cholesky::new(h.info_matrix.clone())
                    .ok_or(Isam2Error::IndefiniteLinearSystem)?;
                let l = chol.l();
                let r = l.transpose();
                // R^T d = eta  =>  L d = eta
                let d = forward_substitute(&l, &h.info_vector);
                Ok(JacobianFactor::from_dense(h.keys.clone(), dims, &r, d))
            }
        }
    }
}

/// Combine a set of linear factors already scoped to `ordered_keys` (the
/// frontal variables followed by the separator, in ascending elimination
/// order) into one joint system, in the representation dictated by
/// `factorization`.
pub fn combine(
    factors: &[LinearFactor],
    ordered_keys: &[Key],
    dims: &HashMap<Key, usize>,
    factorization: Factorization,
) -> Result<LinearFactor, Isam2Error> {
    match factorization {
        Factorization::Qr => {
            let mut jacobians = Vec::with_capacity(factors.len());
            for f in factors {
                jacobians.push(f.to_jacobian(dims)?);
            }
            Ok(LinearFactor::Jacobian(JacobianFactor::combine(
                &jacobians,
                ordered_keys,
                dims,
            )))
        }
        Factorization::Ldl => {
            let hessians: Vec<HessianFactor> = factors.iter().map(LinearFactor::to_hessian).collect();
            Ok(LinearFactor::Hessian(HessianFactor::combine(
                &hessians,
                ordered_keys,
                dims,
            )))
        }
    }
}

/// Eliminate the first `frontal_keys` (in that order) from `combined`,
/// which must already be scoped to exactly `frontal_keys ++ separator_keys`
/// in that column order, producing the clique conditional and — unless the
/// separator is empty — the residual factor to pass up to the parent. See
/// spec.md §4.E step 3.
pub fn eliminate(
    combined: &LinearFactor,
    frontal_keys: &[Key],
    separator_keys: &[Key],
    dims: &HashMap<Key, usize>,
) -> Result<(GaussianConditional, Option<LinearFactor>), Isam2Error> {
    let frontal_dim: usize = frontal_keys.iter().map(|k| dims[k]).sum();
    match combined {
        LinearFactor::Jacobian(j) => {
            let (cond, residual) = eliminate_jacobian(j, frontal_dim, dims)?;
            Ok((cond, residual.map(LinearFactor::Jacobian)))
        }
        LinearFactor::Hessian(h) => {
            let (cond, residual) = eliminate_hessian(h, frontal_dim, dims)?;
            Ok((cond, residual.map(LinearFactor::Hessian)))
        }
    }
}

fn eliminate_jacobian(
    combined: &JacobianFactor,
    frontal_dim: usize,
    dims: &HashMap<Key, usize>,
) -> Result<(GaussianConditional, Option<JacobianFactor>), Isam2Error> {
    let n_frontal_keys = prefix_key_count(combined, frontal_dim, dims);
    let frontal_keys = combined.keys[..n_frontal_keys].to_vec();
    let separator_keys = combined.keys[n_frontal_keys..].to_vec();

    let a = combined.dense();
    let rows = a.nrows();
    let cols = a.ncols();
    if rows < frontal_dim {
        return Err(Isam2Error::IndefiniteLinearSystem);
    }

    let qr = nalgebra::linalg::QR::new(a);
    let r = qr.r();
    let q = qr.q();
    let qtb = q.transpose() * &combined.b;

    for i in 0..frontal_dim {
        if r[(i, i)].abs() < 1e-12 {
            return Err(Isam2Error::IndefiniteLinearSystem);
        }
    }

    let r_ff = r.view((0, 0), (frontal_dim, frontal_dim)).clone_owned();
    let sep_dim = cols - frontal_dim;
    let r_fs = if sep_dim > 0 {
        r.view((0, frontal_dim), (frontal_dim, sep_dim)).clone_owned()
    } else {
        DMatrix::zeros(frontal_dim, 0)
    };
    let d_f = qtb.rows(0, frontal_dim).clone_owned();

    let conditional = GaussianConditional {
        frontals: frontal_keys,
        separator: separator_keys.clone(),
        r: r_ff,
        s: r_fs,
        d: d_f,
    };

    let usable_rows = r.nrows();
    let residual_rows = usable_rows.saturating_sub(frontal_dim);
    let residual = if sep_dim > 0 && residual_rows > 0 {
        let r_ss = r
            .view((frontal_dim, frontal_dim), (residual_rows, sep_dim))
            .clone_owned();
        let d_s = qtb.rows(frontal_dim, residual_rows).clone_owned();
        Some(JacobianFactor::from_dense(separator_keys, dims, &r_ss, d_s))
    } else {
        None
    };

    Ok((conditional, residual))
}

fn eliminate_hessian(
    combined: &HessianFactor,
    frontal_dim: usize,
    dims: &HashMap<Key, usize>,
) -> Result<(GaussianConditional, Option<HessianFactor>), Isam2Error> {
    let n_frontal_keys = prefix_key_count_hessian(combined, frontal_dim, dims);
    let frontal_keys = combined.keys[..n_frontal_keys].to_vec();
    let separator_keys = combined.keys[n_frontal_keys..].to_vec();

    let total = combined.info_matrix.nrows();
    let sep_dim = total - frontal_dim;

    let lambda_ff = combined
        .info_matrix
        .view((0, 0), (frontal_dim, frontal_dim))
        .clone_owned();
    let eta_f = combined.info_vector.rows(0, frontal_dim).clone_owned();

    let chol = nalgebra::linalg::Cholesky::new(lambda_ff).ok_or(Isam2Error::IndefiniteLinearSystem)?;
    let l = chol.l();
    let r_ff = l.transpose();
    let d_f = forward_substitute(&l, &eta_f);

    let (r_fs, residual) = if sep_dim > 0 {
        let lambda_fs = combined
            .info_matrix
            .view((0, frontal_dim), (frontal_dim, sep_dim))
            .clone_owned();
        let eta_s = combined.info_vector.rows(frontal_dim, sep_dim).clone_owned();

        let s = solve_lower_triangular_mat(&l, &lambda_fs);
        let lambda_ss = combined
            .info_matrix
            .view((frontal_dim, frontal_dim), (sep_dim, sep_dim))
            .clone_owned();
        let lambda_ss_prime = lambda_ss - s.transpose() * &s;
        let eta_s_prime = eta_s - s.transpose() * &d_f;

        (
            s,
            Some(HessianFactor::new(separator_keys.clone(), lambda_ss_prime, eta_s_prime)),
        )
    } else {
        (DMatrix::zeros(frontal_dim, 0), None)
    };

    let conditional = GaussianConditional {
        frontals: frontal_keys,
        separator: separator_keys,
        r: r_ff,
        s: r_fs,
        d: d_f,
    };

    Ok((conditional, residual))
}

/// How many leading keys of `factor.keys` are needed to account for
/// exactly `frontal_dim` columns. The caller guarantees `frontal_dim` lands
/// exactly on a key boundary.
fn prefix_key_count(factor: &JacobianFactor, frontal_dim: usize, dims: &HashMap<Key, usize>) -> usize {
    let mut acc = 0;
    for (i, key) in factor.keys.iter().enumerate() {
        if acc == frontal_dim {
            return i;
        }
        acc += dims[key];
    }
    debug_assert_eq!(acc, frontal_dim);
    factor.keys.len()
}

fn prefix_key_count_hessian(factor: &HessianFactor, frontal_dim: usize, dims: &HashMap<Key, usize>) -> usize {
    let mut acc = 0;
    for (i, key) in factor.keys.iter().enumerate() {
        if acc == frontal_dim {
            return i;
        }
        acc += dims[key];
    }
    debug_assert_eq!(acc, frontal_dim);
    factor.keys.len()
}

fn forward_substitute(l: &DMatrix<f64>, rhs: &DVector<f64>) -> DVector<f64> {
    let n = l.nrows();
    let mut x = DVector::zeros(n);
    for i in 0..n {
        let mut acc = rhs[i];
        for j in 0..i {
            acc -= l[(i, j)] * x[j];
        }
        x[i] = acc / l[(i, i)];
    }
    x
}

fn solve_lower_triangular_mat(l: &DMatrix<f64>, rhs: &DMatrix<f64>) -> DMatrix<f64> {
    let mut out = DMatrix::zeros(rhs.nrows(), rhs.ncols());
    for c in 0..rhs.ncols() {
        let col = forward_substitute(l, &rhs.column(c).clone_owned());
        out.set_column(c, &col);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dims_for(keys: &[Key], d: usize) -> HashMap<Key, usize> {
        keys.iter().map(|&k| (k, d)).collect()
    }

    #[test]
    fn eliminate_single_prior_jacobian() {
        let x0 = Key::new('x', 0);
        let dims = dims_for(&[x0], 1);
        let jf = JacobianFactor::new(
            vec![x0],
            vec![DMatrix::from_row_slice(1, 1, &[1.0])],
            DVector::from_vec(vec![2.0]),
        );
        let (cond, residual) = eliminate(&LinearFactor::Jacobian(jf), &[x0], &[], &dims).unwrap();
        assert!(residual.is_none());
        assert_eq!(cond.frontals, vec![x0]);
        let x = cond.solve(&DVector::zeros(0));
        assert!((x[0] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn eliminate_hessian_matches_jacobian() {
        let x0 = Key::new('x', 0);
        let x1 = Key::new('x', 1);
        let dims = dims_for(&[x0, x1], 1);
        let jf = JacobianFactor::new(
            vec![x0, x1],
            vec![
                DMatrix::from_row_slice(1, 1, &[1.0]),
                DMatrix::from_row_slice(1, 1, &[-1.0]),
            ],
            DVector::from_vec(vec![0.5]),
        );
        let hf = HessianFactor::from_jacobian(&jf);
        let (cond_j, _) = eliminate(&LinearFactor::Jacobian(jf), &[x0], &[x1], &dims).unwrap();
        let (cond_h, _) = eliminate(&LinearFactor::Hessian(hf), &[x0], &[x1], &dims).unwrap();
        let sep = DVector::from_vec(vec![1.0]);
        let xj = cond_j.solve(&sep);
        let xh = cond_h.solve(&sep);
        assert!((xj[0] - xh[0]).abs() < 1e-9);
    }

    #[test]
    fn indefinite_hessian_is_reported() {
        let x0 = Key::new('x', 0);
        let dims = dims_for(&[x0], 1);
        let hf = HessianFactor::new(
            vec![x0],
            DMatrix::from_row_slice(1, 1, &[-1.0]),
            DVector::from_vec(vec![0.0]),
        );
        let err = eliminate(&LinearFactor::Hessian(hf), &[x0], &[], &dims).unwrap_err();
        assert!(matches!(err, Isam2Error::IndefiniteLinearSystem));
    }
}
