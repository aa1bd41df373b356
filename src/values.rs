use std::collections::HashMap;

use crate::key::Key;
use crate::variable::Variable;

/// The current linearization point θ: a mapping from [`Key`] to a manifold
/// element. Mutated only by the incremental updater, after a step has been
/// accepted.
#[derive(Debug, Default)]
pub struct Values {
    map: HashMap<Key, Box<dyn Variable>>,
}

impl Values {
    pub fn new() -> Self {
        Self {
            map: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: Key, value: Box<dyn Variable>) {
        self.map.insert(key, value);
    }

    pub fn get(&self, key: Key) -> Option<&dyn Variable> {
        self.map.get(&key).map(|b| b.as_ref())
    }

    pub fn contains(&self, key: Key) -> bool {
        self.map.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &dyn Variable)> {
        self.map.iter().map(|(k, v)| (*k, v.as_ref()))
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.map.keys().copied()
    }

    /// Retract `key`'s current value by `delta`, replacing it in place.
    pub fn retract_key(&mut self, key: Key, delta: &nalgebra::DVector<f64>) {
        if let Some(value) = self.map.get(&key) {
            let updated = value.retract(delta);
            self.map.insert(key, updated);
        }
    }
}

impl Clone for Values {
    fn clone(&self) -> Self {
        let map = self
            .map
            .iter()
            .map(|(k, v)| (*k, v.clone_box()))
            .collect();
        Self { map }
    }
}
