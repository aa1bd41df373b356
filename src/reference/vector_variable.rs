use nalgebra::{DVector, SVector};

use crate::variable::Variable;

/// A plain Euclidean variable of fixed dimension `N`. Retraction is vector
/// addition — the simplest possible manifold, used to exercise the crate's
/// own tests without pulling in a real Lie-group implementation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VectorVariable<const N: usize>(pub SVector<f64, N>);

impl<const N: usize> VectorVariable<N> {
    pub fn new(values: [f64; N]) -> Self {
        Self(SVector::from(values))
    }
}

impl<const N: usize> Variable for VectorVariable<N> {
    fn dim(&self) -> usize {
        N
    }

    fn retract(&self, delta: &DVector<f64>) -> Box<dyn Variable> {
        debug_assert_eq!(delta.len(), N);
        let mut out = self.0;
        for i in 0..N {
            out[i] += delta[i];
        }
        Box::new(VectorVariable(out))
    }

    fn clone_box(&self) -> Box<dyn Variable> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retract_adds_delta() {
        let v = VectorVariable::new([1.0, 2.0]);
        let delta = DVector::from_vec(vec![0.5, -0.5]);
        let out = v.retract(&delta);
        let out = out.downcast_ref::<VectorVariable<2>>().unwrap();
        assert_eq!(out.0, SVector::<f64, 2>::new(1.5, 1.5));
    }
}
