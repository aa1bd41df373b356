use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::key::Key;

/// A whitened Jacobian factor: `‖ Σ_i A_i x_i − b ‖²`, stored as one block
/// per key plus the right-hand side. See spec.md §3 "Linear factor".
#[derive(Debug, Clone)]
pub struct JacobianFactor {
    pub keys: Vec<Key>,
    pub blocks: Vec<DMatrix<f64>>,
    pub b: DVector<f64>,
}

impl JacobianFactor {
    pub fn new(keys: Vec<Key>, blocks: Vec<DMatrix<f64>>, b: DVector<f64>) -> Self {
        debug_assert_eq!(keys.len(), blocks.len());
        for block in &blocks {
            debug_assert_eq!(block.nrows(), b.len());
        }
        Self { keys, blocks, b }
    }

    pub fn rows(&self) -> usize {
        self.b.len()
    }

    pub fn block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys.iter().position(|&k| k == key).map(|i| &self.blocks[i])
    }

    /// The whitened squared error `‖ A x − b ‖²` at the values assembled in
    /// `x` (one entry per key, in `self.keys` order).
    pub fn error(&self, x: &[DVector<f64>]) -> f64 {
        let mut residual = -self.b.clone();
        for (block, xi) in self.blocks.iter().zip(x.iter()) {
            residual += block * xi;
        }
        0.5 * residual.norm_squared()
    }

    /// Stack a set of Jacobian factors into one combined system over
    /// `ordered_keys` (the union of frontal and separator variables, in
    /// the exact column order the elimination step requires). Factors
    /// that do not touch a given key get an implicit zero block.
    pub fn combine(
        factors: &[JacobianFactor],
        ordered_keys: &[Key],
        dims: &HashMap<Key, usize>,
    ) -> JacobianFactor {
        let total_rows: usize = factors.iter().map(|f| f.rows()).sum();
        let col_dims: Vec<usize> = ordered_keys.iter().map(|k| dims[k]).collect();

        let mut blocks: Vec<DMatrix<f64>> = col_dims
            .iter()
            .map(|&d| DMatrix::zeros(total_rows, d))
            .collect();
        let mut b = DVector::zeros(total_rows);

        let mut row_offset = 0;
        for factor in factors {
            let rows = factor.rows();
            b.rows_mut(row_offset, rows).copy_from(&factor.b);
            for (fkey, fblock) in factor.keys.iter().zip(factor.blocks.iter()) {
                let col = ordered_keys
                    .iter()
                    .position(|k| k == fkey)
                    .expect("combine: factor key missing from ordered_keys");
                blocks[col]
                    .view_mut((row_offset, 0), (rows, fblock.ncols()))
                    .copy_from(fblock);
            }
            row_offset += rows;
        }

        JacobianFactor {
            keys: ordered_keys.to_vec(),
            blocks,
            b,
        }
    }

    /// Reconstruct a [`JacobianFactor`] from a dense `rows x total_cols`
    /// matrix, slicing it into per-key blocks according to `dims`.
    pub fn from_dense(keys: Vec<Key>, dims: &HashMap<Key, usize>, dense: &DMatrix<f64>, b: DVector<f64>) -> Self {
        let mut blocks = Vec::with_capacity(keys.len());
        let mut offset = 0;
        for key in &keys {
            let d = dims[key];
            blocks.push(dense.columns(offset, d).clone_owned());
            offset += d;
        }
        JacobianFactor { keys, blocks, b }
    }

    /// The dense `rows x total_cols` matrix with `ordered_keys`' blocks
    /// laid out side by side, in the order they already appear in `self`.
    pub fn dense(&self) -> DMatrix<f64> {
        let rows = self.rows();
        let total_cols: usize = self.blocks.iter().map(|b| b.ncols()).sum();
        let mut out = DMatrix::zeros(rows, total_cols);
        let mut col_offset = 0;
        for block in &self.blocks {
            out.view_mut((0, col_offset), (rows, block.ncols())).copy_from(block);
            col_offset += block.ncols();
        }
        out
    }
}
