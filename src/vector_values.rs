use nalgebra::{DVector, DVectorView};

/// A mapping from slot to a fixed-size vector: the per-variable portion of
/// the linear delta Δ. Backed by one concatenated [`DVector`] plus a
/// per-slot `(offset, len)` table, per spec.md §3.
#[derive(Debug, Clone)]
pub struct VectorValues {
    storage: DVector<f64>,
    layout: Vec<(usize, usize)>,
}

impl VectorValues {
    /// Build a zeroed `VectorValues` with one block per entry of `dims`
    /// (`dims[slot]` is that slot's dimension).
    pub fn zeros(dims: &[usize]) -> Self {
        let mut layout = Vec::with_capacity(dims.len());
        let mut offset = 0;
        for &d in dims {
            layout.push((offset, d));
            offset += d;
        }
        Self {
            storage: DVector::zeros(offset),
            layout,
        }
    }

    pub fn num_slots(&self) -> usize {
        self.layout.len()
    }

    pub fn dim(&self, slot: usize) -> usize {
        self.layout[slot].1
    }

    pub fn get(&self, slot: usize) -> DVectorView<'_, f64> {
        let (offset, len) = self.layout[slot];
        self.storage.rows(offset, len)
    }

    pub fn set(&mut self, slot: usize, value: &DVector<f64>) {
        let (offset, len) = self.layout[slot];
        assert_eq!(value.len(), len, "dimension mismatch writing slot {slot}");
        self.storage.rows_mut(offset, len).copy_from(value);
    }

    /// Append a new zeroed block for a freshly introduced slot; returns its
    /// slot index.
    pub fn push_zero(&mut self, dim: usize) -> usize {
        let offset = self.storage.len();
        let mut grown = DVector::zeros(offset + dim);
        grown.rows_mut(0, offset).copy_from(&self.storage);
        self.storage = grown;
        self.layout.push((offset, dim));
        self.layout.len() - 1
    }

    pub fn max_norm(&self) -> f64 {
        self.storage.amax()
    }

    pub fn is_finite(&self) -> bool {
        self.storage.iter().all(|v| v.is_finite())
    }

    /// A zeroed `VectorValues` with the same per-slot layout as `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            storage: DVector::zeros(self.storage.len()),
            layout: self.layout.clone(),
        }
    }

    pub fn norm(&self) -> f64 {
        self.storage.norm()
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.storage.dot(&other.storage)
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            storage: &self.storage * factor,
            layout: self.layout.clone(),
        }
    }

    pub fn add(&self, other: &Self) -> Self {
        Self {
            storage: &self.storage + &other.storage,
            layout: self.layout.clone(),
        }
    }

    pub fn sub(&self, other: &Self) -> Self {
        Self {
            storage: &self.storage - &other.storage,
            layout: self.layout.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeros_then_set_and_get() {
        let mut vv = VectorValues::zeros(&[2, 3]);
        vv.set(0, &DVector::from_vec(vec![1.0, 2.0]));
        assert_eq!(vv.get(0), DVector::from_vec(vec![1.0, 2.0]).as_view());
        assert_eq!(vv.get(1), DVector::zeros(3).as_view());
    }

    #[test]
    fn push_zero_grows_storage() {
        let mut vv = VectorValues::zeros(&[2]);
        let slot = vv.push_zero(3);
        assert_eq!(slot, 1);
        assert_eq!(vv.num_slots(), 2);
        assert_eq!(vv.dim(1), 3);
    }
}
