use std::fmt::Debug;

use crate::error::Isam2Error;
use crate::key::Key;
use crate::linear::LinearFactor;
use crate::values::Values;

/// A nonlinear constraint between one or more variables. Concrete
/// residuals/Jacobians are an external collaborator per the crate's scope
/// (spec.md §1); this trait is the seam they implement against.
/// [`crate::reference`] ships `PriorFactor`/`BetweenFactor` for the
/// crate's own tests.
pub trait NonlinearFactor: Debug {
    /// The variables this factor touches, in a fixed, factor-defined
    /// order (linearization's Jacobian blocks follow this order).
    fn keys(&self) -> &[Key];

    /// Linearize at the given linearization point, producing a whitened
    /// Jacobian factor. Returns `Err` only if `values` is missing one of
    /// `keys()` — callers are expected to have registered every touched
    /// variable first.
    fn linearize(&self, values: &Values) -> Result<LinearFactor, Isam2Error>;

    /// The (whitened, squared) error of this factor at `values`.
    fn error(&self, values: &Values) -> f64;

    fn clone_box(&self) -> Box<dyn NonlinearFactor>;
}

impl Clone for Box<dyn NonlinearFactor> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// An insertion-indexed, append-mostly sequence of nonlinear factors.
/// Removed factors become tombstones (`None`) rather than shifting later
/// indices, per spec.md §3.
#[derive(Debug, Default)]
pub struct NonlinearFactorGraph {
    factors: Vec<Option<Box<dyn NonlinearFactor>>>,
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self { factors: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Append `factor`, returning its (stable) insertion index.
    pub fn push(&mut self, factor: Box<dyn NonlinearFactor>) -> usize {
        let idx = self.factors.len();
        self.factors.push(Some(factor));
        idx
    }

    /// Tombstone `index`. Returns `false` if the index is unknown or
    /// already removed.
    pub fn remove(&mut self, index: usize) -> bool {
        match self.factors.get_mut(index) {
            Some(slot @ Some(_)) => {
                *slot = None;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, index: usize) -> Option<&dyn NonlinearFactor> {
        self.factors.get(index).and_then(|f| f.as_deref())
    }

    pub fn is_live(&self, index: usize) -> bool {
        matches!(self.factors.get(index), Some(Some(_)))
    }

    pub fn iter_live(&self) -> impl Iterator<Item = (usize, &dyn NonlinearFactor)> {
        self.factors
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_deref().map(|f| (i, f)))
    }

    pub fn total_error(&self, values: &Values) -> f64 {
        self.iter_live().map(|(_, f)| f.error(values)).sum()
    }
}

impl Clone for NonlinearFactorGraph {
    fn clone(&self) -> Self {
        Self {
            factors: self
                .factors
                .iter()
                .map(|f| f.as_ref().map(|f| f.clone_box()))
                .collect(),
        }
    }
}
