use nalgebra::{DMatrix, DVector, SMatrix, SVector};

use crate::error::Isam2Error;
use crate::factor::NonlinearFactor;
use crate::key::Key;
use crate::linear::{JacobianFactor, LinearFactor};
use crate::reference::vector_variable::VectorVariable;
use crate::values::Values;

/// A unary factor pinning one `VectorVariable<N>` near `prior`, whitened
/// by `sqrt_info` (the upper-triangular square root of the measurement's
/// information matrix).
#[derive(Debug, Clone)]
pub struct PriorFactor<const N: usize> {
    keys: [Key; 1],
    prior: SVector<f64, N>,
    sqrt_info: SMatrix<f64, N, N>,
}

impl<const N: usize> PriorFactor<N> {
    pub fn new(key: Key, prior: SVector<f64, N>, sqrt_info: SMatrix<f64, N, N>) -> Self {
        Self {
            keys: [key],
            prior,
            sqrt_info,
        }
    }

    fn linearization_point(&self, values: &Values) -> Result<SVector<f64, N>, Isam2Error> {
        let var = values.get(self.keys[0]).ok_or_else(|| Isam2Error::PreconditionViolation {
            reason: format!("prior factor on {} has no linearization point", self.keys[0]),
        })?;
        let var = var
            .downcast_ref::<VectorVariable<N>>()
            .ok_or_else(|| Isam2Error::PreconditionViolation {
                reason: format!("variable {} is not a VectorVariable<{N}>", self.keys[0]),
            })?;
        Ok(var.0)
    }
}

impl<const N: usize> NonlinearFactor for PriorFactor<N> {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn linearize(&self, values: &Values) -> Result<LinearFactor, Isam2Error> {
        let x = self.linearization_point(values)?;
        let residual = self.sqrt_info * (x - self.prior);
        let block = DMatrix::from_iterator(N, N, self.sqrt_info.iter().copied());
        // Gauss-Newton convention: `A·delta = b` must vanish at delta = 0
        // exactly when the current residual does, so `b` is the negated
        // residual at the linearization point.
        let b = DVector::from_iterator(N, (-residual).iter().copied());
        let jacobian = JacobianFactor::new(self.keys.to_vec(), vec![block], b);
        Ok(LinearFactor::Jacobian(jacobian))
    }

    fn error(&self, values: &Values) -> f64 {
        match self.linearization_point(values) {
            Ok(x) => {
                let residual = self.sqrt_info * (x - self.prior);
                0.5 * residual.norm_squared()
            }
            Err(_) => f64::INFINITY,
        }
    }

    fn clone_box(&self) -> Box<dyn NonlinearFactor> {
        Box::new(self.clone())
    }
}
