use std::collections::{HashMap, HashSet};

use nalgebra::DVector;

use crate::bayes_tree::BayesTree;
use crate::error::Isam2Error;
use crate::factor::NonlinearFactorGraph;
use crate::isam2::params::RelinearizationThreshold;
use crate::isam2::wildfire::wildfire_update;
use crate::key::Key;
use crate::linear::LinearFactor;
use crate::ordering::Ordering;
use crate::values::Values;
use crate::variable_index::VariableIndex;
use crate::vector_values::VectorValues;

/// `mag(s)`, the per-slot ratio of current delta magnitude to threshold —
/// `> 1` means the linear approximation at this variable has drifted too
/// far. See spec.md §4.H step 2.
fn slot_magnitude(key: Key, values: nalgebra::DVectorView<'_, f64>, threshold: &RelinearizationThreshold) -> f64 {
    match threshold {
        RelinearizationThreshold::Scalar(tau) => {
            if *tau <= 0.0 {
                return f64::INFINITY;
            }
            values.iter().fold(0.0f64, |acc, v| acc.max(v.abs())) / tau
        }
        RelinearizationThreshold::PerType(map) => match map.get(&key.tag()) {
            Some(taus) if taus.len() == values.len() => (0..values.len())
                .map(|i| {
                    let tau = taus[i];
                    if tau <= 0.0 {
                        f64::INFINITY
                    } else {
                        values[i].abs() / tau
                    }
                })
                .fold(0.0, f64::max),
            _ => 0.0,
        },
    }
}

/// Bring Δ current (via wildfire), decide the relinearized set R, retract
/// θ for every variable in R and zero its Δ entry, and refresh the linear
/// factor cache for every nonlinear factor touching R. See spec.md §4.H.
///
/// Relinearization is all-or-nothing per factor: a factor straddling R and
/// non-R variables is still relinearized wholesale, since its Jacobian
/// couples the information of all variables it touches (the source this
/// crate follows never relinearizes a factor partially, and no selective
/// alternative is validated — see spec's open question on this).
pub fn relinearize(
    graph: &NonlinearFactorGraph,
    values: &mut Values,
    variable_index: &VariableIndex,
    ordering: &Ordering,
    tree: &BayesTree,
    delta: &mut VectorValues,
    replaced_mask: &mut [bool],
    threshold: &RelinearizationThreshold,
    wildfire_threshold: f64,
    linear_cache: &mut HashMap<usize, LinearFactor>,
) -> Result<HashSet<Key>, Isam2Error> {
    wildfire_update(tree, ordering, replaced_mask, delta, wildfire_threshold);

    let mut relinearized = HashSet::new();
    for key in ordering.keys().iter().copied() {
        let slot = ordering.slot(key).expect("ordering key missing its own slot");
        if slot_magnitude(key, delta.get(slot), threshold) > 1.0 {
            relinearized.insert(key);
        }
    }

    for &key in &relinearized {
        let slot = ordering.slot(key).expect("ordering key missing its own slot");
        let d = delta.dim(slot);
        let step = delta.get(slot).clone_owned();
        values.retract_key(key, &step);
        delta.set(slot, &DVector::zeros(d));
    }

    if !relinearized.is_empty() {
        let touching = variable_index.factors_touching(relinearized.iter());
        for idx in touching {
            if let Some(factor) = graph.get(idx) {
                let linear = factor.linearize(values)?;
                linear_cache.insert(idx, linear);
            }
        }
    }

    Ok(relinearized)
}
