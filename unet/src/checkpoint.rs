use candle_core::{Device, Tensor, Var};
use candle_nn::VarMap;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::PoisonError;
use thiserror::Error;

use crate::stopping::Action;

pub const MODEL_PREFIX: &str = "state_dict";
pub const OPTIMIZER_PREFIX: &str = "optimizer";
pub const SCHEDULER_PREFIX: &str = "scheduler";

pub const PERIODIC_CHECKPOINT: &str = "my_checkpoint.safetensors";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint is missing key \"{0}\"")]
    MissingKey(String),

    #[error("key \"{0}\" is different from expected \"state_dict\" entries")]
    UnexpectedLayout(String),

    #[error("failed to prepare checkpoint directory {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Candle(#[from] candle_core::Error),
}

/// Which layout a loaded checkpoint turned out to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointForm {
    Bundle,
    ModelOnly,
}

/// Component whose state is persisted alongside the model weights.
pub trait StateDict {
    fn state_dict(&self) -> candle_core::Result<Vec<(String, Tensor)>>;
    fn load_state_dict(&mut self, tensors: &HashMap<String, Tensor>) -> Result<(), CheckpointError>;
}

pub fn best_checkpoint_path(dir: &Path, run: &str) -> PathBuf {
    dir.join(format!("{}_best_checkpoint.safetensors", run))
}

pub fn periodic_checkpoint_path(dir: &Path) -> PathBuf {
    dir.join(PERIODIC_CHECKPOINT)
}

/// Writes model, optimizer and scheduler state into one safetensors file,
/// replacing whatever was stored at `path`.
pub fn save(
    path: &Path,
    varmap: &VarMap,
    optimizer: &dyn StateDict,
    scheduler: Option<&dyn StateDict>,
) -> Result<(), CheckpointError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| CheckpointError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut tensors = HashMap::new();
    for (name, var) in named_vars(varmap) {
        tensors.insert(format!("{}.{}", MODEL_PREFIX, name), var.as_tensor().clone());
    }
    for (name, tensor) in optimizer.state_dict()? {
        tensors.insert(format!("{}.{}", OPTIMIZER_PREFIX, name), tensor);
    }
    if let Some(scheduler) = scheduler {
        for (name, tensor) in scheduler.state_dict()? {
            tensors.insert(format!("{}.{}", SCHEDULER_PREFIX, name), tensor);
        }
    }

    log::debug!("Saving {} tensors to {:?}", tensors.len(), path);
    candle_core::safetensors::save(&tensors, path)?;
    Ok(())
}

/// Carries out the checkpoint side of an early-stopping decision: the bundle
/// is written to `best` on [`Action::SaveCheckpoint`]. Returns `true` once
/// training should stop.
pub fn apply_action(
    action: Action,
    best: &Path,
    varmap: &VarMap,
    optimizer: &dyn StateDict,
    scheduler: Option<&dyn StateDict>,
) -> Result<bool, CheckpointError> {
    match action {
        Action::Continue => Ok(false),
        Action::SaveCheckpoint => {
            log::info!("=> Saving checkpoint {:?}", best);
            save(best, varmap, optimizer, scheduler)?;
            Ok(false)
        }
        Action::Stop => Ok(true),
    }
}

/// Restores a checkpoint written by [`save`], or a bare model state whose keys
/// are the variable names themselves. Optimizer and scheduler state are only
/// restored from the bundled layout.
pub fn load(
    path: &Path,
    varmap: &VarMap,
    optimizer: Option<&mut dyn StateDict>,
    scheduler: Option<&mut dyn StateDict>,
) -> Result<CheckpointForm, CheckpointError> {
    log::info!("=> Loading checkpoint {:?}", path);
    let tensors = candle_core::safetensors::load(path, &Device::Cpu)?;

    let model_prefix = format!("{}.", MODEL_PREFIX);
    if tensors.keys().any(|k| k.starts_with(&model_prefix)) {
        load_vars(varmap, &with_prefix(&tensors, MODEL_PREFIX))?;
        if let Some(optimizer) = optimizer {
            optimizer.load_state_dict(&with_prefix(&tensors, OPTIMIZER_PREFIX))?;
        }
        if let Some(scheduler) = scheduler {
            scheduler.load_state_dict(&with_prefix(&tensors, SCHEDULER_PREFIX))?;
        }
        return Ok(CheckpointForm::Bundle);
    }

    match load_vars(varmap, &tensors) {
        Ok(()) => {
            log::info!("Loaded bare model state, optimizer and scheduler left untouched");
            Ok(CheckpointForm::ModelOnly)
        }
        Err(CheckpointError::MissingKey(key)) => Err(CheckpointError::UnexpectedLayout(key)),
        Err(e) => Err(e),
    }
}

/// Variables of a VarMap sorted by name, giving every run the same order.
pub fn named_vars(varmap: &VarMap) -> Vec<(String, Var)> {
    let data = varmap.data().lock().unwrap_or_else(PoisonError::into_inner);
    let mut vars: Vec<(String, Var)> = data
        .iter()
        .map(|(name, var)| (name.clone(), var.clone()))
        .collect();
    vars.sort_by(|a, b| a.0.cmp(&b.0));
    vars
}

pub fn tensor<'a>(
    tensors: &'a HashMap<String, Tensor>,
    key: &str,
) -> Result<&'a Tensor, CheckpointError> {
    tensors
        .get(key)
        .ok_or_else(|| CheckpointError::MissingKey(key.to_string()))
}

pub fn scalar(tensors: &HashMap<String, Tensor>, key: &str) -> Result<f64, CheckpointError> {
    Ok(tensor(tensors, key)?.to_dtype(candle_core::DType::F64)?.to_scalar::<f64>()?)
}

/// Copies `source` into `var`, moving it to the variable's device and dtype.
pub fn assign(var: &Var, source: &Tensor) -> Result<(), CheckpointError> {
    let value = source.to_device(var.device())?.to_dtype(var.dtype())?;
    var.set(&value)?;
    Ok(())
}

fn load_vars(varmap: &VarMap, tensors: &HashMap<String, Tensor>) -> Result<(), CheckpointError> {
    for (name, var) in named_vars(varmap) {
        assign(&var, tensor(tensors, &name)?)?;
    }
    Ok(())
}

fn with_prefix(tensors: &HashMap<String, Tensor>, prefix: &str) -> HashMap<String, Tensor> {
    let prefix = format!("{}.", prefix);
    tensors
        .iter()
        .filter_map(|(k, t)| k.strip_prefix(&prefix).map(|name| (name.to_string(), t.clone())))
        .collect()
}
