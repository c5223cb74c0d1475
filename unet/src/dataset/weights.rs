use rayon::prelude::*;

use super::{load_mask, DatasetError, PhantomDataset};

/// Per-class loss weights from the label frequencies of a dataset's masks.
pub fn class_weights(
    dataset: &PhantomDataset,
    multiplier: &[f32],
) -> Result<Vec<f32>, DatasetError> {
    let shape = dataset.shape();
    let num_classes = shape.num_classes;

    let counts = dataset
        .samples()
        .par_iter()
        .map(|pair| -> Result<Vec<u64>, DatasetError> {
            let mask = load_mask(&pair.mask, &shape)?;
            let mut counts = vec![0u64; num_classes];
            for label in mask {
                // load_mask clamps into range
                counts[label as usize] += 1;
            }
            Ok(counts)
        })
        .try_reduce(
            || vec![0u64; num_classes],
            |mut acc, counts| {
                acc.iter_mut().zip(counts).for_each(|(a, c)| *a += c);
                Ok(acc)
            },
        )?;

    let weights = weights_from_counts(&counts, multiplier);
    log::info!("Class weights: {:?}", weights);
    Ok(weights)
}

/// `multiplier[c] / fraction[c]`, with `0.0` for classes that never occur.
pub fn weights_from_counts(counts: &[u64], multiplier: &[f32]) -> Vec<f32> {
    let total: u64 = counts.iter().sum();

    counts
        .iter()
        .enumerate()
        .map(|(c, &count)| {
            if count == 0 || total == 0 {
                return 0.0;
            }
            let fraction = count as f64 / total as f64;
            let m = multiplier.get(c).copied().unwrap_or(1.0) as f64;
            (m / fraction) as f32
        })
        .collect()
}
