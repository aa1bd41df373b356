use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};

use crate::clique::Clique;
use crate::error::Isam2Error;
use crate::isam2::params::Factorization;
use crate::key::Key;
use crate::linear::{combine, eliminate as eliminate_linear, GaussianConditional, LinearFactor};

/// One variable's elimination result, before clique aggregation.
struct Step {
    key: Key,
    conditional: GaussianConditional,
    residual: Option<LinearFactor>,
}

/// Eliminate `factors` one variable at a time, in exactly the order given
/// by `ordering`, then fold maximal chains of single-child conditionals
/// into multifrontal cliques. Returns freestanding cliques with no
/// parent/child links set — the caller (the incremental updater, §4.F)
/// wires them into the surviving tree. See spec.md §4.E.
pub fn eliminate_sequential(
    factors: Vec<LinearFactor>,
    ordering: &[Key],
    dims: &HashMap<Key, usize>,
    factorization: Factorization,
) -> Result<Vec<Clique>, Isam2Error> {
    let position: HashMap<Key, usize> = ordering.iter().enumerate().map(|(i, &k)| (k, i)).collect();

    let mut pending = factors;
    let mut steps: Vec<Step> = Vec::with_capacity(ordering.len());

    for &var in ordering {
        let mut at_var = Vec::new();
        let mut rest = Vec::new();
        for f in pending.into_iter() {
            if f.keys().contains(&var) {
                at_var.push(f);
            } else {
                rest.push(f);
            }
        }
        pending = rest;

        if at_var.is_empty() {
            continue;
        }

        let mut separator_keys: Vec<Key> = at_var
            .iter()
            .flat_map(|f| f.keys().iter().copied())
            .filter(|&k| k != var)
            .collect();
        separator_keys.sort_by_key(|k| position.get(k).copied().unwrap_or(usize::MAX));
        separator_keys.dedup();

        let mut ordered_keys = vec![var];
        ordered_keys.extend(separator_keys.iter().copied());

        let combined = combine(&at_var, &ordered_keys, dims, factorization)?;
        let (conditional, residual) = eliminate_linear(&combined, &[var], &separator_keys, dims)?;

        if let Some(r) = residual.clone() {
            pending.push(r);
        }

        steps.push(Step {
            key: var,
            conditional,
            residual,
        });
    }

    debug_assert!(pending.is_empty(), "local factor set referenced a key outside its ordering");

    Ok(aggregate_chains(steps, dims))
}

/// Fold maximal chains of single-child conditionals into multifrontal
/// cliques. A variable `v`'s conditional merges into its parent `p`'s
/// clique iff `p` has exactly one child in the elimination tree and
/// `separator(v) \ {p} == separator(p)` — the standard Bayes-tree
/// construction rule (spec.md §4.E step 4).
fn aggregate_chains(steps: Vec<Step>, dims: &HashMap<Key, usize>) -> Vec<Clique> {
    let index_of: HashMap<Key, usize> = steps.iter().enumerate().map(|(i, s)| (s.key, i)).collect();

    let mut child_count: HashMap<Key, usize> = HashMap::new();
    for step in &steps {
        if let Some(&parent) = step.conditional.separator.first() {
            *child_count.entry(parent).or_insert(0) += 1;
        }
    }

    let n = steps.len();
    let mut representative: Vec<usize> = (0..n).collect();
    let mut chain_members: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    for i in 0..n {
        let rep = representative[i];
        let Some(&parent_key) = steps[i].conditional.separator.first() else {
            continue;
        };
        let Some(&parent_idx) = index_of.get(&parent_key) else {
            continue;
        };
        let eligible = child_count.get(&parent_key).copied().unwrap_or(0) == 1
            && steps[i].conditional.separator[1..] == steps[parent_idx].conditional.separator[..];
        if eligible {
            representative[parent_idx] = rep;
            let members = std::mem::take(&mut chain_members[rep]);
            chain_members[rep] = members;
            chain_members[rep].push(parent_idx);
        }
    }

    let mut seen = vec![false; n];
    let mut cliques = Vec::new();
    for i in 0..n {
        let rep = representative[i];
        if seen[rep] {
            continue;
        }
        seen[rep] = true;
        let member_indices = &chain_members[rep];
        let chain: Vec<&Step> = member_indices.iter().map(|&idx| &steps[idx]).collect();
        cliques.push(merge_chain(&chain, dims));
    }

    cliques
}

fn merge_chain(chain: &[&Step], dims: &HashMap<Key, usize>) -> Clique {
    let m = chain.len();
    let frontal_keys: Vec<Key> = chain.iter().map(|s| s.key).collect();
    let final_separator = chain[m - 1].conditional.separator.clone();
    let frontal_dims: Vec<usize> = frontal_keys.iter().map(|k| dims[k]).collect();
    let sep_dim: usize = final_separator.iter().map(|k| dims[k]).sum();

    let mut frontal_offset = vec![0usize; m];
    {
        let mut acc = 0;
        for i in 0..m {
            frontal_offset[i] = acc;
            acc += frontal_dims[i];
        }
    }
    let total_frontal = frontal_offset.last().copied().unwrap_or(0) + frontal_dims.last().copied().unwrap_or(0);

    let mut r = DMatrix::zeros(total_frontal, total_frontal);
    let mut s = DMatrix::zeros(total_frontal, sep_dim);
    let mut d = DVector::zeros(total_frontal);

    for i in 0..m {
        let di = frontal_dims[i];
        let cond_i = &chain[i].conditional;
        r.view_mut((frontal_offset[i], frontal_offset[i]), (di, di))
            .copy_from(&cond_i.r);
        d.rows_mut(frontal_offset[i], di).copy_from(&cond_i.d);

        let mut col_cursor = 0;
        for j in (i + 1)..m {
            let dj = frontal_dims[j];
            let block = cond_i.s.view((0, col_cursor), (di, dj)).clone_owned();
            r.view_mut((frontal_offset[i], frontal_offset[j]), (di, dj)).copy_from(&block);
            col_cursor += dj;
        }
        if sep_dim > 0 {
            let block = cond_i.s.view((0, col_cursor), (di, sep_dim)).clone_owned();
            s.view_mut((frontal_offset[i], 0), (di, sep_dim)).copy_from(&block);
        }
    }

    let conditional = GaussianConditional {
        frontals: frontal_keys,
        separator: final_separator,
        r,
        s,
        d,
    };
    let cached_factor = chain[m - 1].residual.clone();
    Clique::new(conditional, cached_factor)
}
