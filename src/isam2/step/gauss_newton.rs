use crate::bayes_tree::BayesTree;
use crate::isam2::params::GaussNewtonParams;
use crate::isam2::wildfire::wildfire_update;
use crate::ordering::Ordering;
use crate::vector_values::VectorValues;

/// Damped Gauss–Newton: the refreshed linear delta from wildfire
/// back-substitution *is* the step, unconditionally. See spec.md §4.I.
pub struct GaussNewtonOutcome {
    pub last_backsub_variable_count: usize,
}

pub fn step(
    tree: &BayesTree,
    ordering: &Ordering,
    replaced_mask: &mut [bool],
    delta: &mut VectorValues,
    params: &GaussNewtonParams,
) -> GaussNewtonOutcome {
    let count = wildfire_update(tree, ordering, replaced_mask, delta, params.wildfire_threshold);
    GaussNewtonOutcome {
        last_backsub_variable_count: count,
    }
}
