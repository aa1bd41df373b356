use std::collections::HashMap;

use crate::key::Key;

/// Per-variable flags populated only when `enableDetailedResults` is set.
/// See spec.md §6.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableDetail {
    pub reeliminated: bool,
    pub above_relin_threshold: bool,
    pub relinearize_involved: bool,
    pub relinearized: bool,
    pub observed: bool,
    pub new: bool,
    pub in_root_clique: bool,
}

/// The outcome of one [`crate::isam2::ISAM2::update`] call. See spec.md §6.
#[derive(Debug, Clone)]
pub struct UpdateResult {
    pub error_before: Option<f64>,
    pub error_after: Option<f64>,
    pub variables_relinearized: usize,
    pub variables_reeliminated: usize,
    pub cliques: usize,
    pub new_factor_indices: Vec<usize>,
    pub detail: Option<HashMap<Key, VariableDetail>>,
}
