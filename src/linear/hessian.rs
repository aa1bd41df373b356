use std::collections::HashMap;
use std::ops::AddAssign as _;

use nalgebra::{DMatrix, DVector};

use crate::key::Key;

use super::jacobian::JacobianFactor;

/// A symmetric augmented-information factor: information matrix `Λ` and
/// information vector `η` over `keys`, representing the quadratic
/// `½ xᵀΛx − ηᵀx` (plus an irrelevant additive constant). See spec.md §3.
#[derive(Debug, Clone)]
pub struct HessianFactor {
    pub keys: Vec<Key>,
    pub info_matrix: DMatrix<f64>,
    pub info_vector: DVector<f64>,
}

impl HessianFactor {
    pub fn new(keys: Vec<Key>, info_matrix: DMatrix<f64>, info_vector: DVector<f64>) -> Self {
        debug_assert_eq!(info_matrix.nrows(), info_matrix.ncols());
        debug_assert_eq!(info_matrix.nrows(), info_vector.len());
        Self {
            keys,
            info_matrix,
            info_vector,
        }
    }

    /// `Λ = AᵀA`, `η = Aᵀb` — the information-form equivalent of a
    /// Jacobian factor.
    pub fn from_jacobian(jacobian: &JacobianFactor) -> Self {
        let a = jacobian.dense();
        let info_matrix = a.transpose() * &a;
        let info_vector = a.transpose() * &jacobian.b;
        Self {
            keys: jacobian.keys.clone(),
            info_matrix,
            info_vector,
        }
    }

    /// Sum a set of Hessian factors over `ordered_keys`, zero-extending
    /// missing blocks.
    pub fn combine(
        factors: &[HessianFactor],
        ordered_keys: &[Key],
        dims: &HashMap<Key, usize>,
    ) -> HessianFactor {
        let offsets = block_offsets(ordered_keys, dims);
        let total = offsets.last().map(|&(o, d)| o + d).unwrap_or(0);
        let mut info_matrix = DMatrix::zeros(total, total);
        let mut info_vector = DVector::zeros(total);

        for factor in factors {
            let local_offsets = block_offsets(&factor.keys, dims);
            for (i, &key_i) in factor.keys.iter().enumerate() {
                let (oi, di) = local_offsets[i];
                let gi = global_offset(ordered_keys, &offsets, key_i);
                info_vector
                    .rows_mut(gi, di)
                    .add_assign(&factor.info_vector.rows(oi, di));
                for (j, &key_j) in factor.keys.iter().enumerate() {
                    let (oj, dj) = local_offsets[j];
                    let gj = global_offset(ordered_keys, &offsets, key_j);
                    info_matrix
                        .view_mut((gi, gj), (di, dj))
                        .add_assign(&factor.info_matrix.view((oi, oj), (di, dj)));
                }
            }
        }

        HessianFactor {
            keys: ordered_keys.to_vec(),
            info_matrix,
            info_vector,
        }
    }
}

fn block_offsets(keys: &[Key], dims: &HashMap<Key, usize>) -> Vec<(usize, usize)> {
    let mut out = Vec::with_capacity(keys.len());
    let mut offset = 0;
    for key in keys {
        let d = dims[key];
        out.push((offset, d));
        offset += d;
    }
    out
}

fn global_offset(ordered_keys: &[Key], offsets: &[(usize, usize)], key: Key) -> usize {
    let idx = ordered_keys
        .iter()
        .position(|&k| k == key)
        .expect("combine: key missing from ordered_keys");
    offsets[idx].0
}
