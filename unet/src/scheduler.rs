use candle_core::{Device, Tensor};
use std::collections::HashMap;

use crate::checkpoint::{scalar, CheckpointError, StateDict};

const FACTOR: f64 = 0.1;
const PATIENCE: usize = 10;
const THRESHOLD: f64 = 1e-4;
const MIN_LR: f64 = 0.0;
const EPS: f64 = 1e-8;

/// Lowers the learning rate when the monitored loss stops improving.
///
/// Improvement is relative: a loss counts as better only when it is below
/// `best * (1 - THRESHOLD)`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    best: f64,
    num_bad_epochs: usize,
    last_lr: f64,
    factor: f64,
    patience: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64) -> Self {
        Self::with_params(initial_lr, FACTOR, PATIENCE)
    }

    pub fn with_params(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            best: f64::INFINITY,
            num_bad_epochs: 0,
            last_lr: initial_lr,
            factor,
            patience,
        }
    }

    /// Feeds one epoch's loss and returns the learning rate to use next.
    pub fn step(&mut self, metric: f64, current_lr: f64) -> f64 {
        self.last_lr = current_lr;

        if metric < self.best * (1.0 - THRESHOLD) {
            self.best = metric;
            self.num_bad_epochs = 0;
        } else {
            self.num_bad_epochs += 1;
        }

        if self.num_bad_epochs > self.patience {
            let new_lr = (current_lr * self.factor).max(MIN_LR);
            if current_lr - new_lr > EPS {
                log::info!("Reducing learning rate to {:.4e}", new_lr);
                self.last_lr = new_lr;
            }
            self.num_bad_epochs = 0;
        }

        self.last_lr
    }

    pub fn last_lr(&self) -> f64 {
        self.last_lr
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    pub fn num_bad_epochs(&self) -> usize {
        self.num_bad_epochs
    }
}

impl StateDict for ReduceLrOnPlateau {
    fn state_dict(&self) -> candle_core::Result<Vec<(String, Tensor)>> {
        let device = Device::Cpu;
        Ok(vec![
            ("best".to_string(), Tensor::new(self.best, &device)?),
            (
                "num_bad_epochs".to_string(),
                Tensor::new(self.num_bad_epochs as f64, &device)?,
            ),
            ("last_lr".to_string(), Tensor::new(self.last_lr, &device)?),
        ])
    }

    fn load_state_dict(
        &mut self,
        tensors: &HashMap<String, Tensor>,
    ) -> Result<(), CheckpointError> {
        self.best = scalar(tensors, "best")?;
        self.num_bad_epochs = scalar(tensors, "num_bad_epochs")? as usize;
        self.last_lr = scalar(tensors, "last_lr")?;
        Ok(())
    }
}
