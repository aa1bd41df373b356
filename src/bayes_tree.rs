use std::collections::{HashMap, HashSet};

use crate::clique::{Clique, CliqueId};
use crate::error::Isam2Error;
use crate::key::Key;
use crate::linear::LinearFactor;

/// A rooted forest of [`Clique`]s (typically a single tree). Cliques live
/// in an arena `Vec`; parent/child relations are plain [`CliqueId`]
/// indices, sidestepping the cyclic-ownership problem spec.md §9 calls
/// out. See spec.md §3 "Bayes tree" / §4.D.
#[derive(Debug, Default, Clone)]
pub struct BayesTree {
    cliques: Vec<Option<Clique>>,
    roots: Vec<CliqueId>,
    key_to_clique: HashMap<Key, CliqueId>,
}

/// Result of tearing down the subtree covering a marked variable set:
/// the untouched subtrees hanging below the cut ("orphans", still present
/// in the tree but temporarily parentless) and the cached factors
/// harvested from them, which summarize what was discarded. See spec.md
/// §4.D / §4.F step 6.
pub struct Detached {
    pub orphans: Vec<CliqueId>,
    pub boundary_factors: Vec<LinearFactor>,
    /// Every frontal key belonging to a removed clique — the full
    /// ancestor-closed marked set, exposed so the caller can assemble the
    /// local factor set (spec.md §4.F step 7) without recomputing the
    /// ancestor walk itself.
    pub removed_keys: HashSet<Key>,
}

impl BayesTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cliques_count(&self) -> usize {
        self.cliques.iter().filter(|c| c.is_some()).count()
    }

    pub fn roots(&self) -> &[CliqueId] {
        &self.roots
    }

    pub fn get(&self, id: CliqueId) -> &Clique {
        self.cliques[id.0].as_ref().expect("dangling CliqueId")
    }

    pub fn get_mut(&mut self, id: CliqueId) -> &mut Clique {
        self.cliques[id.0].as_mut().expect("dangling CliqueId")
    }

    pub fn clique_of(&self, key: Key) -> Option<CliqueId> {
        self.key_to_clique.get(&key).copied()
    }

    /// Root-first (pre-order) traversal over every clique currently in the
    /// tree.
    pub fn traversal(&self) -> Vec<CliqueId> {
        let mut out = Vec::with_capacity(self.cliques_count());
        let mut stack: Vec<CliqueId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            out.push(id);
            let clique = self.get(id);
            for &child in clique.children.iter().rev() {
                stack.push(child);
            }
        }
        out
    }

    /// Insert a freestanding clique (no parent yet) as a new root. Returns
    /// its id. Used by attach/reattach once elimination produces fresh
    /// cliques.
    pub fn insert_root(&mut self, clique: Clique) -> CliqueId {
        let id = self.insert_detached(clique);
        self.roots.push(id);
        id
    }

    /// Insert a freestanding clique without registering it anywhere in
    /// `roots` — the caller is responsible for wiring parent/child links.
    pub fn insert_detached(&mut self, clique: Clique) -> CliqueId {
        let id = CliqueId(self.cliques.len());
        for &key in clique.frontals() {
            self.key_to_clique.insert(key, id);
        }
        self.cliques.push(Some(clique));
        id
    }

    /// Attach `child` as a child of `parent`, updating both sides.
    pub fn link(&mut self, parent: CliqueId, child: CliqueId) {
        self.get_mut(parent).children.push(child);
        self.get_mut(child).parent = Some(parent);
        self.roots.retain(|&r| r != child);
    }

    /// Detach the subtree covering `marked`: every clique on a
    /// leaf-to-root path touching a marked variable is removed from the
    /// tree; the highest still-intact children of those removed cliques
    /// become orphans, and their cached factors are harvested as boundary
    /// factors. See spec.md §4.D / §4.F step 6.
    pub fn detach_subtree_above(&mut self, marked: &HashSet<Key>) -> Detached {
        let affected: HashSet<CliqueId> = marked
            .iter()
            .filter_map(|key| self.clique_of(*key))
            .collect();

        let mut removed: HashSet<CliqueId> = HashSet::new();
        for &start in &affected {
            let mut cur = Some(start);
            while let Some(id) = cur {
                if !removed.insert(id) {
                    break;
                }
                cur = self.get(id).parent;
            }
        }

        let mut orphans = Vec::new();
        let mut boundary_factors = Vec::new();
        for &id in &removed {
            let children = self.get(id).children.clone();
            for child in children {
                if !removed.contains(&child) {
                    self.get_mut(child).parent = None;
                    if let Some(factor) = self.get(child).cached_factor.clone() {
                        boundary_factors.push(factor);
                    }
                    orphans.push(child);
                }
            }
        }

        let mut removed_keys = HashSet::new();
        for &id in &removed {
            let clique = self.cliques[id.0].take().expect("dangling CliqueId");
            for &key in clique.frontals() {
                self.key_to_clique.remove(&key);
                removed_keys.insert(key);
            }
        }
        self.roots.retain(|r| !removed.contains(r));

        Detached {
            orphans,
            boundary_factors,
            removed_keys,
        }
    }

    /// Reattach `orphan` beneath `new_parent`, preserving the
    /// running-intersection property (the caller must have chosen
    /// `new_parent` such that `orphan`'s separator ⊆ `new_parent`'s
    /// frontals). See spec.md §4.F step 9.
    pub fn reattach_orphan(&mut self, orphan: CliqueId, new_parent: CliqueId) {
        self.link(new_parent, orphan);
    }

    /// Promote `orphan` back to a root, used when no surviving clique's
    /// frontals cover its separator (the orphan's separator was entirely
    /// inside the re-eliminated region).
    pub fn promote_orphan_to_root(&mut self, orphan: CliqueId) {
        self.get_mut(orphan).parent = None;
        if !self.roots.contains(&orphan) {
            self.roots.push(orphan);
        }
    }

    /// Validate the running-intersection property: every non-root clique's
    /// separator must be covered by its parent's frontals ∪ separator. Run
    /// after reattaching orphans in [`crate::isam2::ISAM2::update`] — a
    /// violation indicates a bug in the attach logic rather than bad input.
    /// See spec.md §3 invariant 3.
    pub fn check_running_intersection(&self) -> Result<(), Isam2Error> {
        for id in self.traversal() {
            let clique = self.get(id);
            let Some(parent_id) = clique.parent else { continue };
            let parent = self.get(parent_id);
            let parent_vars: HashSet<Key> = parent.frontals().iter().chain(parent.separator()).copied().collect();
            for key in clique.separator() {
                if !parent_vars.contains(key) {
                    return Err(Isam2Error::InvariantViolation {
                        reason: format!("separator variable {key} of clique {id:?} is not covered by its parent's frontals/separator"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linear::GaussianConditional;
    use nalgebra::{DMatrix, DVector};

    fn trivial_conditional(frontal: Key, separator: Vec<Key>) -> GaussianConditional {
        let fd = 1;
        let sd = separator.len();
        GaussianConditional {
            frontals: vec![frontal],
            separator,
            r: DMatrix::identity(fd, fd),
            s: DMatrix::zeros(fd, sd),
            d: DVector::zeros(fd),
        }
    }

    #[test]
    fn detach_collects_orphans_and_boundary_factors() {
        let mut tree = BayesTree::new();
        let x0 = Key::new('x', 0);
        let x1 = Key::new('x', 1);
        let x2 = Key::new('x', 2);

        let leaf = Clique::new(trivial_conditional(x0, vec![x1]), None);
        let leaf_id = tree.insert_detached(leaf);

        let mid = Clique::new(trivial_conditional(x1, vec![x2]), None);
        let mid_id = tree.insert_detached(mid);
        tree.link(mid_id, leaf_id);

        let root = Clique::new(trivial_conditional(x2, vec![]), None);
        let root_id = tree.insert_root(root);
        tree.link(root_id, mid_id);

        assert_eq!(tree.cliques_count(), 3);

        let marked = HashSet::from([x2]);
        let detached = tree.detach_subtree_above(&marked);
        assert_eq!(tree.cliques_count(), 2);
        assert_eq!(detached.orphans, vec![mid_id]);
        assert!(tree.roots().is_empty());
    }
}
