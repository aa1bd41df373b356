use crate::bayes_tree::{BayesTree, CliqueId};
use crate::ordering::Ordering;
use crate::vector_values::VectorValues;
use nalgebra::DVector;

/// Partial back-substitution, threshold-gated: a clique whose recomputed
/// frontal values move by at most `threshold` in max-norm, and whose
/// slots are not flagged in `replaced_mask`, is left untouched and its
/// subtree is not visited. See spec.md §4.G.
///
/// Returns the number of slots actually refreshed
/// (`lastBacksubVariableCount`).
pub fn wildfire_update(
    tree: &BayesTree,
    ordering: &Ordering,
    replaced_mask: &mut [bool],
    delta: &mut VectorValues,
    threshold: f64,
) -> usize {
    let mut refreshed = 0;
    let mut stack: Vec<CliqueId> = tree.roots().iter().rev().copied().collect();

    while let Some(id) = stack.pop() {
        let clique = tree.get(id);
        log::trace!("wildfire: visiting clique {id:?} ({} frontals)", clique.frontals().len());

        let sep_dim: usize = clique
            .separator()
            .iter()
            .map(|&k| delta.dim(ordering.slot(k).expect("separator key missing from ordering")))
            .sum();
        let mut sep_values = DVector::zeros(sep_dim);
        let mut offset = 0;
        for &key in clique.separator() {
            let slot = ordering.slot(key).expect("separator key missing from ordering");
            let d = delta.dim(slot);
            sep_values.rows_mut(offset, d).copy_from(&delta.get(slot));
            offset += d;
        }

        let new_frontal = clique.conditional.solve(&sep_values);

        let mut max_diff = 0.0f64;
        let mut any_replaced = false;
        let mut offset = 0;
        for &key in clique.frontals() {
            let slot = ordering.slot(key).expect("frontal key missing from ordering");
            if replaced_mask[slot] {
                any_replaced = true;
            }
            let d = delta.dim(slot);
            let old = delta.get(slot);
            let new_block = new_frontal.rows(offset, d);
            let diff = (new_block - old).amax();
            max_diff = max_diff.max(diff);
            offset += d;
        }

        if max_diff <= threshold && !any_replaced {
            log::trace!("wildfire: short-circuiting clique {id:?}, max_diff={max_diff:.3e}");
            continue;
        }

        let mut offset = 0;
        for &key in clique.frontals() {
            let slot = ordering.slot(key).expect("frontal key missing from ordering");
            let d = delta.dim(slot);
            let new_block = new_frontal.rows(offset, d).clone_owned();
            delta.set(slot, &new_block);
            replaced_mask[slot] = false;
            refreshed += 1;
            offset += d;
        }

        for &child in clique.children.iter().rev() {
            stack.push(child);
        }
    }

    refreshed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clique::Clique;
    use crate::key::Key;
    use crate::linear::GaussianConditional;
    use nalgebra::DMatrix;

    #[test]
    fn short_circuits_when_below_threshold_and_not_replaced() {
        let mut tree = BayesTree::new();
        let x0 = Key::new('x', 0);
        let conditional = GaussianConditional {
            frontals: vec![x0],
            separator: vec![],
            r: DMatrix::identity(1, 1),
            s: DMatrix::zeros(1, 0),
            d: DVector::from_vec(vec![0.0]),
        };
        tree.insert_root(Clique::new(conditional, None));

        let mut ordering = Ordering::new();
        ordering.push(x0);

        let mut delta = VectorValues::zeros(&[1]);
        let mut replaced_mask = vec![false];

        let refreshed = wildfire_update(&tree, &ordering, &mut replaced_mask, &mut delta, 1.0);
        assert_eq!(refreshed, 0);
    }

    #[test]
    fn refreshes_when_replaced_mask_set() {
        let mut tree = BayesTree::new();
        let x0 = Key::new('x', 0);
        let conditional = GaussianConditional {
            frontals: vec![x0],
            separator: vec![],
            r: DMatrix::identity(1, 1),
            s: DMatrix::zeros(1, 0),
            d: DVector::from_vec(vec![3.0]),
        };
        tree.insert_root(Clique::new(conditional, None));

        let mut ordering = Ordering::new();
        ordering.push(x0);

        let mut delta = VectorValues::zeros(&[1]);
        let mut replaced_mask = vec![true];

        let refreshed = wildfire_update(&tree, &ordering, &mut replaced_mask, &mut delta, 1.0);
        assert_eq!(refreshed, 1);
        assert!((delta.get(0)[0] - 3.0).abs() < 1e-12);
        assert!(!replaced_mask[0]);
    }
}
