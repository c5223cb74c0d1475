use crate::error::MetricsError;
use crate::label_map::LabelMap;

/// Per-class confusion tallies shared by every class metric.
///
/// `true_positive[c]` counts pixels where both maps hold `c`,
/// `predicted[c]` pixels where the prediction holds `c` and
/// `actual[c]` pixels where the ground truth holds `c`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClassCounts {
    true_positive: Vec<u64>,
    predicted: Vec<u64>,
    actual: Vec<u64>,
}

impl ClassCounts {
    pub fn new(num_classes: usize) -> Self {
        Self {
            true_positive: vec![0; num_classes],
            predicted: vec![0; num_classes],
            actual: vec![0; num_classes],
        }
    }

    pub fn from_maps(
        pred: &LabelMap,
        label: &LabelMap,
        num_classes: usize,
    ) -> Result<Self, MetricsError> {
        pred.ensure_same_shape(label)?;

        let mut counts = Self::new(num_classes);
        for (&p, &l) in pred.as_slice().iter().zip(label.as_slice()) {
            let p_idx = class_index(p, num_classes)?;
            let l_idx = class_index(l, num_classes)?;

            counts.predicted[p_idx] += 1;
            counts.actual[l_idx] += 1;
            if p_idx == l_idx {
                counts.true_positive[p_idx] += 1;
            }
        }
        Ok(counts)
    }

    pub fn merge(&mut self, other: &ClassCounts) {
        if other.num_classes() > self.num_classes() {
            let n = other.num_classes();
            self.true_positive.resize(n, 0);
            self.predicted.resize(n, 0);
            self.actual.resize(n, 0);
        }
        for c in 0..other.num_classes() {
            self.true_positive[c] += other.true_positive[c];
            self.predicted[c] += other.predicted[c];
            self.actual[c] += other.actual[c];
        }
    }

    pub fn num_classes(&self) -> usize {
        self.true_positive.len()
    }

    pub fn true_positive(&self, class: usize) -> u64 {
        self.true_positive[class]
    }

    pub fn predicted(&self, class: usize) -> u64 {
        self.predicted[class]
    }

    pub fn actual(&self, class: usize) -> u64 {
        self.actual[class]
    }

    pub fn correct(&self) -> u64 {
        self.true_positive.iter().sum()
    }

    pub fn total(&self) -> u64 {
        self.actual.iter().sum()
    }

    /// Classes present in the ground truth, ascending.
    pub fn present(&self) -> Vec<usize> {
        (0..self.num_classes())
            .filter(|&c| self.actual[c] > 0)
            .collect()
    }

    pub fn precision(&self) -> Vec<f64> {
        (0..self.num_classes())
            .map(|c| ratio(self.true_positive[c], self.predicted[c]))
            .collect()
    }

    pub fn recall(&self) -> Vec<f64> {
        (0..self.num_classes())
            .map(|c| ratio(self.true_positive[c], self.actual[c]))
            .collect()
    }

    pub fn iou(&self) -> Vec<f64> {
        (0..self.num_classes()).map(|c| self.iou_of(c)).collect()
    }

    pub fn iou_of(&self, class: usize) -> f64 {
        let union = self.predicted[class] + self.actual[class] - self.true_positive[class];
        ratio(self.true_positive[class], union)
    }

    pub fn dice(&self, smooth: f64) -> Vec<f64> {
        (0..self.num_classes())
            .map(|c| {
                let intersection = self.true_positive[c] as f64;
                let sizes = (self.predicted[c] + self.actual[c]) as f64;
                (2.0 * intersection + smooth) / (sizes + smooth)
            })
            .collect()
    }
}

fn class_index(value: u32, num_classes: usize) -> Result<usize, MetricsError> {
    let idx = value as usize;
    if idx >= num_classes {
        return Err(MetricsError::ClassOutOfRange { value, num_classes });
    }
    Ok(idx)
}

// Empty denominators yield 0.0 instead of NaN
pub(crate) fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}
