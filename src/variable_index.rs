use std::collections::{BTreeSet, HashMap};

use crate::key::Key;

/// For every known variable, the (deduplicated) set of factor indices that
/// mention it, plus the variable's tangent-space dimension. See spec.md
/// §4.A.
#[derive(Debug, Default, Clone)]
pub struct VariableIndex {
    entries: HashMap<Key, Entry>,
}

#[derive(Debug, Clone, Default)]
struct Entry {
    dim: usize,
    factors: BTreeSet<usize>,
}

impl VariableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dim(&self, key: Key) -> Option<usize> {
        self.entries.get(&key).map(|e| e.dim)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.entries.contains_key(&key)
    }

    /// Register that `factor_index` touches `keys`, allocating a fresh
    /// dimension entry the first time a key is seen.
    pub fn augment(&mut self, factor_index: usize, keys: &[Key], dims: &HashMap<Key, usize>) {
        for &key in keys {
            let entry = self.entries.entry(key).or_insert_with(|| Entry {
                dim: dims.get(&key).copied().unwrap_or(0),
                factors: BTreeSet::new(),
            });
            entry.factors.insert(factor_index);
        }
    }

    /// Scrub `factor_indices` out of every variable's factor list. Does not
    /// remove the variable itself even if its list becomes empty — a
    /// variable with no remaining factors is still part of `Values` until
    /// explicitly dropped by the caller.
    pub fn remove(&mut self, factor_indices: &[usize]) {
        for entry in self.entries.values_mut() {
            for idx in factor_indices {
                entry.factors.remove(idx);
            }
        }
    }

    /// The union of factor indices touching any key in `keys`.
    pub fn factors_touching<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> BTreeSet<usize> {
        let mut out = BTreeSet::new();
        for key in keys {
            if let Some(entry) = self.entries.get(key) {
                out.extend(entry.factors.iter().copied());
            }
        }
        out
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.entries.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn augment_then_factors_touching() {
        let mut idx = VariableIndex::new();
        let x0 = Key::new('x', 0);
        let x1 = Key::new('x', 1);
        let mut dims = HashMap::new();
        dims.insert(x0, 3);
        dims.insert(x1, 3);
        idx.augment(0, &[x0], &dims);
        idx.augment(1, &[x0, x1], &dims);
        assert_eq!(idx.dim(x0), Some(3));
        assert_eq!(idx.factors_touching(&[x0]), BTreeSet::from([0, 1]));
        assert_eq!(idx.factors_touching(&[x1]), BTreeSet::from([1]));
    }

    #[test]
    fn remove_scrubs_factor_indices() {
        let mut idx = VariableIndex::new();
        let x0 = Key::new('x', 0);
        let mut dims = HashMap::new();
        dims.insert(x0, 3);
        idx.augment(0, &[x0], &dims);
        idx.augment(1, &[x0], &dims);
        idx.remove(&[0]);
        assert_eq!(idx.factors_touching(&[x0]), BTreeSet::from([1]));
    }
}
