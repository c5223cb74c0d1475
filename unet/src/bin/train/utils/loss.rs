use candle_core::{Result, Tensor};
use candle_nn::ops::log_softmax;

/// Pixel-wise cross entropy of `[B, C, H, W]` logits against `[B, H, W]` u32 labels.
///
/// With class weights the result is the weighted mean
/// `sum(w[y] * nll) / sum(w[y])`, otherwise the plain mean over all pixels.
pub fn weighted_cross_entropy(
    logits: &Tensor,
    targets: &Tensor,
    weights: Option<&Tensor>,
) -> Result<Tensor> {
    let log_probs = log_softmax(logits, 1)?;
    let nll = log_probs
        .gather(&targets.unsqueeze(1)?.contiguous()?, 1)?
        .squeeze(1)?
        .neg()?
        .flatten_all()?;

    match weights {
        None => nll.mean_all(),
        Some(weights) => {
            let w = weights.index_select(&targets.flatten_all()?, 0)?;
            let total = (nll * &w)?.sum_all()?;
            total.broadcast_div(&w.sum_all()?)
        }
    }
}
