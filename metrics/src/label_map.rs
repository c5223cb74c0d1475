use crate::error::MetricsError;

/// Grid of class indices stored row-major with an explicit shape.
///
/// Both predictions and ground-truth masks use this type, batched maps
/// simply carry a leading batch dimension (`[B, H, W]`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelMap {
    shape: Vec<usize>,
    data: Vec<u32>,
}

impl LabelMap {
    pub fn new(shape: Vec<usize>, data: Vec<u32>) -> Result<Self, MetricsError> {
        let expected = shape.iter().product::<usize>();
        if expected != data.len() {
            return Err(MetricsError::InvalidLength {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// One dimensional map, mostly useful for flattened data and tests.
    pub fn from_vec(data: Vec<u32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Recovers class indices from intensities written as `label / (num_classes - 1)`.
    pub fn from_scaled(
        shape: Vec<usize>,
        values: &[f32],
        num_classes: usize,
    ) -> Result<Self, MetricsError> {
        let max_label = num_classes.saturating_sub(1).max(1) as f32;
        let data = values
            .iter()
            .map(|v| (v.clamp(0.0, 1.0) * max_label).round() as u32)
            .collect();
        Self::new(shape, data)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn ensure_same_shape(&self, other: &LabelMap) -> Result<(), MetricsError> {
        if self.shape != other.shape {
            return Err(MetricsError::ShapeMismatch {
                pred: self.shape.clone(),
                label: other.shape.clone(),
            });
        }
        Ok(())
    }

    /// Sorted distinct class values present in the map.
    pub fn unique(&self) -> Vec<u32> {
        let mut values = self.data.clone();
        values.sort_unstable();
        values.dedup();
        values
    }

    pub fn max_value(&self) -> Option<u32> {
        self.data.iter().copied().max()
    }

    /// Intensities in `[0, 1]` where the highest class maps to 1.0.
    pub fn to_scaled(&self, num_classes: usize) -> Vec<f32> {
        let max_label = num_classes.saturating_sub(1).max(1) as f32;
        self.data
            .iter()
            .map(|&v| (v as f32 / max_label).min(1.0))
            .collect()
    }
}
