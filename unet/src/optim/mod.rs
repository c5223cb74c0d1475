mod adam;
mod sgd;

pub use adam::{Adam, ParamsAdam};
pub use sgd::{ParamsSgd, Sgd};

use candle_core::{Result as CandleResult, Tensor};
use candle_nn::{Optimizer, VarMap};
use std::collections::HashMap;
use std::str::FromStr;
use thiserror::Error;

use crate::checkpoint::{named_vars, CheckpointError, StateDict};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OptimizerError {
    #[error("optimizer {0} not recognized")]
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl FromStr for OptimizerKind {
    type Err = OptimizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            _ => Err(OptimizerError::Unknown(s.to_string())),
        }
    }
}

/// Optimizer selected by name in the configuration.
pub enum TrainOptimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl TrainOptimizer {
    /// Builds the optimizer over every variable of `varmap`, ordered by name
    /// so that saved state lines up with the same parameters on reload.
    pub fn from_varmap(kind: OptimizerKind, varmap: &VarMap, lr: f64) -> CandleResult<Self> {
        let vars = named_vars(varmap).into_iter().map(|(_, var)| var).collect();

        Ok(match kind {
            OptimizerKind::Adam => Self::Adam(Adam::new(
                vars,
                ParamsAdam {
                    lr,
                    ..Default::default()
                },
            )?),
            OptimizerKind::Sgd => Self::Sgd(Sgd::new(
                vars,
                ParamsSgd {
                    lr,
                    ..Default::default()
                },
            )?),
        })
    }

    pub fn backward_step(&mut self, loss: &Tensor) -> CandleResult<()> {
        match self {
            Self::Adam(opt) => opt.backward_step(loss),
            Self::Sgd(opt) => opt.backward_step(loss),
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match self {
            Self::Adam(opt) => opt.learning_rate(),
            Self::Sgd(opt) => opt.learning_rate(),
        }
    }

    pub fn set_learning_rate(&mut self, lr: f64) {
        match self {
            Self::Adam(opt) => opt.set_learning_rate(lr),
            Self::Sgd(opt) => opt.set_learning_rate(lr),
        }
    }
}

impl StateDict for TrainOptimizer {
    fn state_dict(&self) -> CandleResult<Vec<(String, Tensor)>> {
        match self {
            Self::Adam(opt) => opt.state_dict(),
            Self::Sgd(opt) => opt.state_dict(),
        }
    }

    fn load_state_dict(
        &mut self,
        tensors: &HashMap<String, Tensor>,
    ) -> Result<(), CheckpointError> {
        match self {
            Self::Adam(opt) => opt.load_state_dict(tensors),
            Self::Sgd(opt) => opt.load_state_dict(tensors),
        }
    }
}
