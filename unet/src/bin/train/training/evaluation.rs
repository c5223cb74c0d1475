use candle_core::{Device, Tensor};
use candle_nn::ModuleT;
use metrics::{EvaluationResult, Evaluator, LabelMap};
use std::error::Error;
use std::path::PathBuf;
use unet::dataset::{Batch, DataLoader};
use unet::images::save_label_grid;
use unet::Network;

use crate::utils::loss::weighted_cross_entropy;

/// Scores the network's predictions over every batch of the loader.
pub fn evaluate(
    network: &Network,
    loader: DataLoader,
    device: &Device,
) -> Result<EvaluationResult, Box<dyn Error>> {
    let mut evaluator = Evaluator::new(network.num_classes());

    for batch in loader {
        let batch = batch?;
        let (x, _) = batch.to_tensors(device)?;

        let pred = predicted_labels(network, &x, &batch)?;
        evaluator.push(&pred, &mask_labels(&batch)?)?;
    }

    log::debug!(
        "Evaluated {} pixels, {} correct",
        evaluator.num_pixels(),
        evaluator.num_correct()
    );
    Ok(evaluator.result())
}

/// Mean loss over the batches of the loader, network in inference mode.
pub fn validation_loss(
    network: &Network,
    loader: DataLoader,
    device: &Device,
    class_weights: Option<&Tensor>,
) -> Result<f32, Box<dyn Error>> {
    let mut total_loss = 0.0;
    let mut batches = 0;

    for batch in loader {
        let (x, y) = batch?.to_tensors(device)?;
        let logits = network.forward_t(&x, false)?;
        let loss = weighted_cross_entropy(&logits, &y, class_weights)?;

        total_loss += loss.to_vec0::<f32>()?;
        batches += 1;
    }

    Ok(total_loss / batches.max(1) as f32)
}

/// Writes one prediction grid per batch to the path chosen by `path_for(batch_idx)`.
pub fn save_predictions(
    network: &Network,
    loader: DataLoader,
    device: &Device,
    path_for: impl Fn(usize) -> PathBuf,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut written = Vec::new();

    for batch in loader {
        let batch = batch?;
        let (x, _) = batch.to_tensors(device)?;
        let pred = predicted_labels(network, &x, &batch)?;

        let path = path_for(batch.index);
        save_label_grid(&pred, network.num_classes(), &path)?;
        written.push(path);
    }

    Ok(written)
}

/// Writes the ground-truth masks of every batch as grids.
pub fn save_masks(
    loader: DataLoader,
    num_classes: usize,
    path_for: impl Fn(usize) -> PathBuf,
) -> Result<Vec<PathBuf>, Box<dyn Error>> {
    let mut written = Vec::new();

    for batch in loader {
        let batch = batch?;
        let path = path_for(batch.index);
        save_label_grid(&mask_labels(&batch)?, num_classes, &path)?;
        written.push(path);
    }

    Ok(written)
}

fn predicted_labels(
    network: &Network,
    x: &Tensor,
    batch: &Batch,
) -> Result<LabelMap, Box<dyn Error>> {
    let pred = network.predict(x)?.flatten_all()?.to_vec1::<u32>()?;
    Ok(LabelMap::new(batch_dims(batch), pred)?)
}

fn mask_labels(batch: &Batch) -> Result<LabelMap, Box<dyn Error>> {
    Ok(LabelMap::new(batch_dims(batch), batch.masks.clone())?)
}

fn batch_dims(batch: &Batch) -> Vec<usize> {
    vec![batch.len, batch.shape.height, batch.shape.width]
}
