use std::collections::{HashMap, HashSet};

use crate::key::Key;

/// A fill-reducing elimination ordering is an external collaborator per
/// spec.md §1 ("We assume an opaque `order(factor_graph, constraints)`
/// procedure is available") — a real COLAMD-style symbolic ordering is out
/// of scope. This module supplies a minimal greedy min-degree heuristic so
/// the engine has a working default; a host application is free to swap in
/// a better ordering by calling [`crate::isam2::ISAM2::update`] with an
/// explicit variable order if a future version exposes that seam.
///
/// `factor_scopes` is the set of keys each local factor touches.
/// `constrained_last` must be ordered after every other variable (used so
/// the caller's chosen root-adjacent variables stay root-adjacent). See
/// spec.md §4.F step 8.
pub fn order(factor_scopes: &[Vec<Key>], constrained_last: &HashSet<Key>) -> Vec<Key> {
    let mut adjacency: HashMap<Key, HashSet<Key>> = HashMap::new();
    for scope in factor_scopes {
        for &a in scope {
            adjacency.entry(a).or_default();
            for &b in scope {
                if a != b {
                    adjacency.get_mut(&a).unwrap().insert(b);
                }
            }
        }
    }

    let mut free: HashSet<Key> = adjacency
        .keys()
        .copied()
        .filter(|k| !constrained_last.contains(k))
        .collect();
    let mut ordering = Vec::with_capacity(adjacency.len());

    while !free.is_empty() {
        let pick = *free
            .iter()
            .min_by_key(|&&k| (adjacency[&k].iter().filter(|n| free.contains(n)).count(), k))
            .unwrap();
        free.remove(&pick);

        let neighbors: Vec<Key> = adjacency[&pick]
            .iter()
            .copied()
            .filter(|n| free.contains(n))
            .collect();
        for &a in &neighbors {
            for &b in &neighbors {
                if a != b {
                    adjacency.get_mut(&a).unwrap().insert(b);
                }
            }
        }

        ordering.push(pick);
    }

    let mut tail: Vec<Key> = adjacency
        .keys()
        .copied()
        .filter(|k| constrained_last.contains(k))
        .collect();
    tail.sort();
    ordering.extend(tail);

    ordering
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_every_touched_variable_exactly_once() {
        let x0 = Key::new('x', 0);
        let x1 = Key::new('x', 1);
        let x2 = Key::new('x', 2);
        let scopes = vec![vec![x0], vec![x0, x1], vec![x1, x2]];
        let ordering = order(&scopes, &HashSet::new());
        let mut sorted = ordering.clone();
        sorted.sort();
        assert_eq!(sorted, vec![x0, x1, x2]);
    }

    #[test]
    fn constrained_keys_are_ordered_last() {
        let x0 = Key::new('x', 0);
        let x1 = Key::new('x', 1);
        let scopes = vec![vec![x0, x1]];
        let constrained = HashSet::from([x0]);
        let ordering = order(&scopes, &constrained);
        assert_eq!(ordering.last().copied(), Some(x0));
    }
}
