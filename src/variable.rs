use downcast_rs::{impl_downcast, Downcast};
use nalgebra::DVector;
use std::fmt::Debug;

/// A manifold element that can serve as the current linearization point of
/// a variable. Concrete manifolds (SE2, SE3, Euclidean vectors, ...) are an
/// external collaborator per the crate's scope — this trait is the seam
/// they implement against. [`crate::reference`] ships a minimal Euclidean
/// implementation used by the crate's own tests.
pub trait Variable: Debug + Downcast {
    /// Tangent-space dimension at this point.
    fn dim(&self) -> usize;

    /// Retract a tangent-space `delta` (length [`Variable::dim`]) onto the
    /// manifold, producing the new linearization point `this ⊕ delta`.
    fn retract(&self, delta: &DVector<f64>) -> Box<dyn Variable>;

    /// Clone through the trait object.
    fn clone_box(&self) -> Box<dyn Variable>;
}
impl_downcast!(Variable);

impl Clone for Box<dyn Variable> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}
