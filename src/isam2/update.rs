use std::collections::{HashMap, HashSet};

use crate::clique::CliqueId;
use crate::elimination::eliminate_sequential;
use crate::error::Isam2Error;
use crate::factor::NonlinearFactor;
use crate::key::Key;
use crate::linear::LinearFactor;
use crate::order::order;

use super::params::Factorization;
use super::step::{dogleg, gauss_newton};
use super::{retracted_values, VariableDetail, ISAM2};
use crate::values::Values;

impl ISAM2 {
    /// The central incremental algorithm: absorb new variables and
    /// factors, decide what needs relinearizing, tear down and rebuild
    /// only the affected portion of the Bayes tree, refresh the linear
    /// delta, and apply the accepted step. See spec.md §4.F.
    ///
    /// Transactional: on `Err`, `self` is left exactly as it was before
    /// the call — every fallible step below runs against local copies,
    /// committed into `self` only once all of them have succeeded.
    pub fn update(
        &mut self,
        new_factors: Vec<Box<dyn NonlinearFactor>>,
        new_values: Values,
        remove_factor_indices: &[usize],
        constrained_keys: &HashSet<Key>,
        force_relinearize: bool,
    ) -> Result<super::UpdateResult, Isam2Error> {
        for key in new_values.keys() {
            if self.values.contains(key) {
                return Err(Isam2Error::PreconditionViolation {
                    reason: format!("newValues already contains {key}"),
                });
            }
        }
        for factor in &new_factors {
            for &key in factor.keys() {
                if !self.values.contains(key) && !new_values.contains(key) {
                    return Err(Isam2Error::PreconditionViolation {
                        reason: format!("newFactors references {key}, missing from newValues"),
                    });
                }
            }
        }
        for key in new_values.keys() {
            if !new_factors.iter().any(|f| f.keys().contains(&key)) {
                return Err(Isam2Error::PreconditionViolation {
                    reason: format!("newValues contains {key}, not referenced by any factor in newFactors"),
                });
            }
        }
        for &idx in remove_factor_indices {
            if !self.graph.is_live(idx) {
                return Err(Isam2Error::PreconditionViolation {
                    reason: format!("removeFactorIndices references unknown or already-removed index {idx}"),
                });
            }
        }

        let mut values = self.values.clone();
        let mut variable_index = self.variable_index.clone();
        let mut dims = self.dims.clone();
        let mut ordering = self.ordering.clone();
        let mut tree = self.tree.clone();
        let mut delta = self.delta.clone();
        let mut replaced_mask = self.replaced_mask.clone();
        let mut linear_cache = self.linear_cache.clone();
        let mut graph = self.graph.clone();
        let call_counter = self.call_counter + 1;

        let error_before = if self.params.evaluate_nonlinear_error {
            Some(graph.total_error(&values))
        } else {
            None
        };

        // 1. Absorb new variables.
        let new_keys: HashSet<Key> = new_values.keys().collect();
        for key in new_values.keys() {
            let var = new_values.get(key).expect("key just collected from new_values");
            dims.insert(key, var.dim());
            values.insert(key, var.clone_box());
            ordering.push(key);
            delta.push_zero(var.dim());
            replaced_mask.push(true);
        }

        // 2. Register factors.
        let mut new_factor_indices = Vec::with_capacity(new_factors.len());
        for factor in new_factors {
            let keys = factor.keys().to_vec();
            let idx = graph.push(factor);
            variable_index.augment(idx, &keys, &dims);
            new_factor_indices.push(idx);
        }

        // 3. Determine observed variables, before tombstoning removed
        // factors (we still need their keys).
        let mut observed: HashSet<Key> = new_keys.iter().copied().collect();
        for &idx in &new_factor_indices {
            if let Some(f) = graph.get(idx) {
                observed.extend(f.keys().iter().copied());
            }
        }
        for &idx in remove_factor_indices {
            if let Some(f) = graph.get(idx) {
                observed.extend(f.keys().iter().copied());
            }
        }
        for &idx in remove_factor_indices {
            graph.remove(idx);
            linear_cache.remove(&idx);
        }
        variable_index.remove(remove_factor_indices);

        // 4. Decide relinearization.
        let should_consider_relinearization = self.params.enable_relinearization
            && (force_relinearize
                || self.params.relinearize_skip == 0
                || call_counter % self.params.relinearize_skip == 0);

        let relinearized_set = if should_consider_relinearization {
            super::relinearize::relinearize(
                &graph,
                &mut values,
                &variable_index,
                &ordering,
                &tree,
                &mut delta,
                &mut replaced_mask,
                &self.params.relinearize_threshold,
                self.params.optimization_params.wildfire_threshold(),
                &mut linear_cache,
            )?
        } else {
            HashSet::new()
        };

        // 5-6. Mark, then detach the subtree above the marked set,
        // harvesting orphans' cached factors as boundary factors.
        let marked: HashSet<Key> = observed.iter().copied().chain(relinearized_set.iter().copied()).collect();
        log::debug!(
            "update: marked {} variables ({} observed, {} relinearized)",
            marked.len(),
            observed.len(),
            relinearized_set.len()
        );
        let detached = tree.detach_subtree_above(&marked);
        log::debug!(
            "update: detached {} cliques, {} orphans carrying {} boundary factors",
            detached.removed_keys.len(),
            detached.orphans.len(),
            detached.boundary_factors.len()
        );
        let local_keys: HashSet<Key> = marked.iter().copied().chain(detached.removed_keys.iter().copied()).collect();

        // 7. Assemble the local factor set.
        let local_factor_indices = variable_index.factors_touching(local_keys.iter());
        let mut local_linear_factors: Vec<LinearFactor> = Vec::with_capacity(local_factor_indices.len() + detached.boundary_factors.len());
        for idx in &local_factor_indices {
            let factor = match graph.get(*idx) {
                Some(f) => f,
                None => continue,
            };
            let touches_relinearized = factor.keys().iter().any(|k| relinearized_set.contains(k));
            let linear = if !touches_relinearized && self.params.cache_linearized_factors {
                match linear_cache.get(idx) {
                    Some(cached) => cached.clone(),
                    None => {
                        let fresh = factor.linearize(&values)?;
                        linear_cache.insert(*idx, fresh.clone());
                        fresh
                    }
                }
            } else {
                let fresh = factor.linearize(&values)?;
                if self.params.cache_linearized_factors {
                    linear_cache.insert(*idx, fresh.clone());
                }
                fresh
            };
            local_linear_factors.push(linear);
        }
        local_linear_factors.extend(detached.boundary_factors.iter().cloned());

        // 8. Local ordering.
        let factor_scopes: Vec<Vec<Key>> = local_linear_factors.iter().map(|f| f.keys().to_vec()).collect();
        let local_order = order(&factor_scopes, constrained_keys);

        // 9. Eliminate locally, retrying under QR if LDL reports an
        // indefinite intermediate system.
        let new_cliques = if self.params.factorization == Factorization::Ldl {
            let fallback_factors = local_linear_factors.clone();
            match eliminate_sequential(local_linear_factors, &local_order, &dims, Factorization::Ldl) {
                Ok(cliques) => cliques,
                Err(Isam2Error::IndefiniteLinearSystem) => {
                    log::warn!("update: LDL elimination hit an indefinite pivot, retrying under QR");
                    eliminate_sequential(fallback_factors, &local_order, &dims, Factorization::Qr)?
                }
                Err(e) => return Err(e),
            }
        } else {
            eliminate_sequential(local_linear_factors, &local_order, &dims, Factorization::Qr)?
        };

        let variables_reeliminated: usize = new_cliques.iter().map(|c| c.frontals().len()).sum();

        let mut new_clique_ids = Vec::with_capacity(new_cliques.len());
        for clique in new_cliques {
            new_clique_ids.push(tree.insert_detached(clique));
        }

        let mut key_to_new_clique: HashMap<Key, CliqueId> = HashMap::new();
        for &id in &new_clique_ids {
            for &key in tree.get(id).frontals() {
                key_to_new_clique.insert(key, id);
            }
        }

        let mut reeliminated_keys: HashSet<Key> = HashSet::new();
        for &id in &new_clique_ids {
            reeliminated_keys.extend(tree.get(id).frontals().iter().copied());
            let separator = tree.get(id).separator().to_vec();
            let parent = separator.first().and_then(|k| key_to_new_clique.get(k)).copied();
            match parent {
                Some(parent_id) if parent_id != id => tree.link(parent_id, id),
                _ => {
                    debug_assert!(
                        separator.is_empty(),
                        "a local elimination root must have an empty separator, got {separator:?}"
                    );
                    tree.promote_orphan_to_root(id);
                }
            }
        }

        // Reattach orphans beneath whichever new clique now covers their
        // separator, preserving the running-intersection property.
        for orphan in detached.orphans {
            let orphan_separator = tree.get(orphan).separator().to_vec();
            let new_parent = orphan_separator.first().and_then(|k| key_to_new_clique.get(k)).copied();
            match new_parent {
                Some(parent_id) => tree.reattach_orphan(orphan, parent_id),
                None => tree.promote_orphan_to_root(orphan),
            }
        }

        tree.check_running_intersection()?;

        // 10. Mark delta stale for every reeliminated slot.
        for &key in &reeliminated_keys {
            if let Some(slot) = ordering.slot(key) {
                replaced_mask[slot] = true;
            }
        }

        // 11. Compute step and apply.
        let (applied_step, last_backsub_variable_count, new_dogleg_radius, step_accepted) =
            match self.params.optimization_params {
                super::params::OptimizationParams::GaussNewton(gn) => {
                    let outcome = gauss_newton::step(&tree, &ordering, &mut replaced_mask, &mut delta, &gn);
                    (delta.clone(), outcome.last_backsub_variable_count, self.dogleg_radius, true)
                }
                super::params::OptimizationParams::DogLeg(dl) => {
                    let outcome = dogleg::step(&tree, &ordering, &mut replaced_mask, &mut delta, &graph, &values, self.dogleg_radius, &dl);
                    (outcome.step, outcome.last_backsub_variable_count, outcome.new_radius, outcome.accepted)
                }
            };

        if !delta.is_finite() || !applied_step.is_finite() {
            return Err(Isam2Error::NumericalOverflow);
        }

        if step_accepted {
            values = retracted_values(&values, &ordering, &applied_step);
            delta = delta.sub(&applied_step);
        }

        let error_after = if self.params.evaluate_nonlinear_error {
            Some(graph.total_error(&values))
        } else {
            None
        };

        let detail = if self.params.enable_detailed_results {
            let root_frontals: HashSet<Key> = tree.roots().iter().flat_map(|&r| tree.get(r).frontals().iter().copied()).collect();
            let mut map = HashMap::new();
            for key in ordering.keys().iter().copied() {
                map.insert(
                    key,
                    VariableDetail {
                        reeliminated: reeliminated_keys.contains(&key),
                        above_relin_threshold: relinearized_set.contains(&key),
                        relinearize_involved: local_keys.contains(&key) && !relinearized_set.is_empty(),
                        relinearized: relinearized_set.contains(&key),
                        observed: observed.contains(&key),
                        new: new_keys.contains(&key),
                        in_root_clique: root_frontals.contains(&key),
                    },
                );
            }
            Some(map)
        } else {
            None
        };

        let variables_relinearized = relinearized_set.len();
        let cliques = tree.cliques_count();

        self.values = values;
        self.variable_index = variable_index;
        self.dims = dims;
        self.ordering = ordering;
        self.tree = tree;
        self.delta = delta;
        self.replaced_mask = replaced_mask;
        self.linear_cache = linear_cache;
        self.graph = graph;
        self.call_counter = call_counter;
        self.dogleg_radius = new_dogleg_radius;
        self.delta_up_to_date = true;
        self.last_backsub_variable_count = last_backsub_variable_count;

        Ok(super::UpdateResult {
            error_before,
            error_after,
            variables_relinearized,
            variables_reeliminated,
            cliques,
            new_factor_indices,
            detail,
        })
    }
}
