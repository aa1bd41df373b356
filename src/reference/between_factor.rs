use nalgebra::{DMatrix, DVector, SMatrix, SVector};

use crate::error::Isam2Error;
use crate::factor::NonlinearFactor;
use crate::key::Key;
use crate::linear::{JacobianFactor, LinearFactor};
use crate::reference::vector_variable::VectorVariable;
use crate::values::Values;

/// A binary factor constraining `x2 − x1` near `measurement`, whitened by
/// `sqrt_info`.
#[derive(Debug, Clone)]
pub struct BetweenFactor<const N: usize> {
    keys: [Key; 2],
    measurement: SVector<f64, N>,
    sqrt_info: SMatrix<f64, N, N>,
}

impl<const N: usize> BetweenFactor<N> {
    pub fn new(key1: Key, key2: Key, measurement: SVector<f64, N>, sqrt_info: SMatrix<f64, N, N>) -> Self {
        Self {
            keys: [key1, key2],
            measurement,
            sqrt_info,
        }
    }

    fn linearization_points(&self, values: &Values) -> Result<(SVector<f64, N>, SVector<f64, N>), Isam2Error> {
        let get = |key: Key| -> Result<SVector<f64, N>, Isam2Error> {
            let var = values.get(key).ok_or_else(|| Isam2Error::PreconditionViolation {
                reason: format!("between factor has no linearization point for {key}"),
            })?;
            let var = var
                .downcast_ref::<VectorVariable<N>>()
                .ok_or_else(|| Isam2Error::PreconditionViolation {
                    reason: format!("variable {key} is not a VectorVariable<{N}>"),
                })?;
            Ok(var.0)
        };
        Ok((get(self.keys[0])?, get(self.keys[1])?))
    }

    fn residual(&self, x1: SVector<f64, N>, x2: SVector<f64, N>) -> SVector<f64, N> {
        self.sqrt_info * ((x2 - x1) - self.measurement)
    }
}

impl<const N: usize> NonlinearFactor for BetweenFactor<N> {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn linearize(&self, values: &Values) -> Result<LinearFactor, Isam2Error> {
        let (x1, x2) = self.linearization_points(values)?;
        let residual = self.residual(x1, x2);

        let neg_sqrt_info = -self.sqrt_info;
        let block1 = DMatrix::from_iterator(N, N, neg_sqrt_info.iter().copied());
        let block2 = DMatrix::from_iterator(N, N, self.sqrt_info.iter().copied());
        let b = DVector::from_iterator(N, (-residual).iter().copied());

        let jacobian = JacobianFactor::new(self.keys.to_vec(), vec![block1, block2], b);
        Ok(LinearFactor::Jacobian(jacobian))
    }

    fn error(&self, values: &Values) -> f64 {
        match self.linearization_points(values) {
            Ok((x1, x2)) => 0.5 * self.residual(x1, x2).norm_squared(),
            Err(_) => f64::INFINITY,
        }
    }

    fn clone_box(&self) -> Box<dyn NonlinearFactor> {
        Box::new(self.clone())
    }
}
