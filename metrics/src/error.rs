use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MetricsError {
    #[error("shape mismatch: prediction {pred:?} vs label {label:?}")]
    ShapeMismatch { pred: Vec<usize>, label: Vec<usize> },

    #[error("label map of shape {shape:?} expects {expected} values, got {actual}")]
    InvalidLength {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("class index {value} is outside of [0, {num_classes})")]
    ClassOutOfRange { value: u32, num_classes: usize },
}
