pub mod params;
mod relinearize;
mod result;
mod step;
mod update;
mod wildfire;

use std::collections::HashMap;

use nalgebra::DVector;

use crate::bayes_tree::BayesTree;
use crate::factor::NonlinearFactorGraph;
use crate::key::Key;
use crate::linear::LinearFactor;
use crate::ordering::{Ordering, Permuted};
use crate::values::Values;
use crate::variable::Variable;
use crate::variable_index::VariableIndex;
use crate::vector_values::VectorValues;

pub use params::ISAM2Params;
pub use result::{UpdateResult, VariableDetail};

/// Incremental nonlinear least-squares solver over a factor graph,
/// maintaining a Bayes tree so that each [`ISAM2::update`] re-eliminates
/// only the minimal affected subtree. See spec.md §3 for the full set of
/// state this instance owns.
#[derive(Debug)]
pub struct ISAM2 {
    params: ISAM2Params,
    graph: NonlinearFactorGraph,
    values: Values,
    variable_index: VariableIndex,
    dims: HashMap<Key, usize>,
    ordering: Ordering,
    tree: BayesTree,
    delta: VectorValues,
    replaced_mask: Vec<bool>,
    delta_up_to_date: bool,
    linear_cache: HashMap<usize, LinearFactor>,
    call_counter: usize,
    dogleg_radius: f64,
    last_backsub_variable_count: usize,
}

impl ISAM2 {
    pub fn new(params: ISAM2Params) -> Self {
        let dogleg_radius = match params.optimization_params {
            params::OptimizationParams::DogLeg(dl) => dl.initial_delta,
            params::OptimizationParams::GaussNewton(_) => 1.0,
        };
        Self {
            params,
            graph: NonlinearFactorGraph::new(),
            values: Values::new(),
            variable_index: VariableIndex::new(),
            dims: HashMap::new(),
            ordering: Ordering::new(),
            tree: BayesTree::new(),
            delta: VectorValues::zeros(&[]),
            replaced_mask: Vec::new(),
            delta_up_to_date: true,
            linear_cache: HashMap::new(),
            call_counter: 0,
            dogleg_radius,
            last_backsub_variable_count: 0,
        }
    }

    /// The count of slots actually recomputed by the most recent wildfire
    /// back-substitution (spec.md §4.G's `lastBacksubVariableCount`).
    pub fn last_backsub_variable_count(&self) -> usize {
        self.last_backsub_variable_count
    }

    pub fn params(&self) -> &ISAM2Params {
        &self.params
    }

    pub fn get_ordering(&self) -> &Ordering {
        &self.ordering
    }

    pub fn get_factors_unsafe(&self) -> &NonlinearFactorGraph {
        &self.graph
    }

    /// Accessor for the current Bayes tree, exposed alongside
    /// [`ISAM2::get_ordering`]/[`ISAM2::get_factors_unsafe`] so a caller (or
    /// a test) can inspect clique structure — e.g. to check the
    /// running-intersection and coverage invariants of spec.md §3.
    pub fn bayes_tree(&self) -> &BayesTree {
        &self.tree
    }

    /// Accessor for the cached linear delta; refreshes it first if stale.
    /// See spec.md §9 "mutable caching behind const reads".
    pub fn get_delta(&mut self) -> Permuted<&VectorValues> {
        self.refresh_delta_if_stale();
        Permuted::new(&self.delta, crate::ordering::Permutation::identity(self.ordering.len()))
    }

    fn refresh_delta_if_stale(&mut self) {
        if self.delta_up_to_date {
            return;
        }
        let threshold = self.params.optimization_params.wildfire_threshold();
        wildfire::wildfire_update(&self.tree, &self.ordering, &mut self.replaced_mask, &mut self.delta, threshold);
        self.delta_up_to_date = true;
    }

    /// `θ + unpermute(Δ)` for every variable currently tracked. See
    /// spec.md §6.
    pub fn calculate_estimate(&mut self) -> Values {
        self.refresh_delta_if_stale();
        retracted_values(&self.values, &self.ordering, &self.delta)
    }

    /// Faster single-variable form: refreshes only `key`'s slot by forcing
    /// a full back-substitution (the clique chain to the root must be
    /// walked regardless, since Δ at any slot depends on its ancestors'
    /// separator values).
    pub fn calculate_estimate_key(&mut self, key: Key) -> Option<Box<dyn Variable>> {
        self.refresh_delta_if_stale();
        let slot = self.ordering.slot(key)?;
        let step = self.delta.get(slot).clone_owned();
        let current = self.values.get(key)?;
        Some(current.retract(&step))
    }

    /// Forces a full back-substitution ignoring `wildfireThreshold`.
    pub fn calculate_best_estimate(&mut self) -> Values {
        wildfire::wildfire_update(&self.tree, &self.ordering, &mut self.replaced_mask, &mut self.delta, 0.0);
        self.delta_up_to_date = true;
        retracted_values(&self.values, &self.ordering, &self.delta)
    }

    pub fn cliques_count(&self) -> usize {
        self.tree.cliques_count()
    }
}

/// Apply `delta` to `values` via manifold retraction, producing a fresh
/// `Values` without mutating the input — used both for the accepted-step
/// commit in [`update`] and for evaluating a candidate step's nonlinear
/// error in the dog-leg controller.
pub(crate) fn retracted_values(values: &Values, ordering: &Ordering, delta: &VectorValues) -> Values {
    let mut out = values.clone();
    for key in ordering.keys().iter().copied() {
        let slot = ordering.slot(key).expect("ordering key missing its own slot");
        let d = delta.dim(slot);
        if d == 0 || !out.contains(key) {
            continue;
        }
        let step = delta.get(slot).clone_owned();
        out.retract_key(key, &step);
    }
    out
}
