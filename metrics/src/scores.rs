use crate::counts::{ratio, ClassCounts};
use crate::error::MetricsError;
use crate::label_map::LabelMap;

/// Smoothing term added to both sides of the Dice ratio.
pub const DICE_SMOOTH: f64 = 1e-4;

/// Fraction of positions where prediction and label agree.
pub fn global_accuracy(pred: &LabelMap, label: &LabelMap) -> Result<f64, MetricsError> {
    pred.ensure_same_shape(label)?;

    let correct = pred
        .as_slice()
        .iter()
        .zip(label.as_slice())
        .filter(|(p, l)| p == l)
        .count();

    Ok(ratio(correct as u64, label.len() as u64))
}

/// Correct pixels of each class over the pixels predicted as that class.
pub fn class_accuracies(
    pred: &LabelMap,
    label: &LabelMap,
    num_classes: usize,
) -> Result<Vec<f64>, MetricsError> {
    precision(pred, label, num_classes)
}

pub fn precision(
    pred: &LabelMap,
    label: &LabelMap,
    num_classes: usize,
) -> Result<Vec<f64>, MetricsError> {
    Ok(ClassCounts::from_maps(pred, label, num_classes)?.precision())
}

pub fn recall(
    pred: &LabelMap,
    label: &LabelMap,
    num_classes: usize,
) -> Result<Vec<f64>, MetricsError> {
    Ok(ClassCounts::from_maps(pred, label, num_classes)?.recall())
}

/// IoU for every class value found in `label`, in ascending class order.
pub fn intersection_over_union(
    pred: &LabelMap,
    label: &LabelMap,
) -> Result<Vec<f64>, MetricsError> {
    pred.ensure_same_shape(label)?;

    let span = pred
        .max_value()
        .into_iter()
        .chain(label.max_value())
        .max()
        .map_or(0, |m| m as usize + 1);

    let counts = ClassCounts::from_maps(pred, label, span)?;
    Ok(counts
        .present()
        .into_iter()
        .map(|c| counts.iou_of(c))
        .collect())
}

/// Smoothed Dice coefficient of every class in `[0, num_classes)`.
pub fn dice(
    pred: &LabelMap,
    label: &LabelMap,
    num_classes: usize,
) -> Result<Vec<f64>, MetricsError> {
    Ok(ClassCounts::from_maps(pred, label, num_classes)?.dice(DICE_SMOOTH))
}

/// Smoothed Dice coefficient of two binary masks.
pub fn dice_coefficient(a: &[bool], b: &[bool]) -> f64 {
    let intersection = a.iter().zip(b).filter(|(x, y)| **x && **y).count() as f64;
    let sizes = (a.iter().filter(|x| **x).count() + b.iter().filter(|x| **x).count()) as f64;
    (2.0 * intersection + DICE_SMOOTH) / (sizes + DICE_SMOOTH)
}
