use candle_core::backprop::GradStore;
use candle_core::{Device, Result, Tensor, Var};
use candle_nn::Optimizer;
use std::collections::HashMap;

use crate::checkpoint::{assign, scalar, tensor, CheckpointError, StateDict};

#[derive(Clone, Debug)]
pub struct ParamsAdam {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub weight_decay: f64,
}

impl Default for ParamsAdam {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

#[derive(Debug)]
struct VarAdam {
    var: Var,
    exp_avg: Var,
    exp_avg_sq: Var,
}

/// Adam with L2 weight decay folded into the gradient.
///
/// Moment estimates are kept as variables so they can be checkpointed.
#[derive(Debug)]
pub struct Adam {
    vars: Vec<VarAdam>,
    step_t: usize,
    params: ParamsAdam,
}

impl Optimizer for Adam {
    type Config = ParamsAdam;

    fn new(vars: Vec<Var>, params: ParamsAdam) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let exp_avg = Var::zeros(var.shape(), var.dtype(), var.device())?;
                let exp_avg_sq = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarAdam {
                    var,
                    exp_avg,
                    exp_avg_sq,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            vars,
            step_t: 0,
            params,
        })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        self.step_t += 1;

        let ParamsAdam {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.params;
        let scale_m = 1.0 / (1.0 - beta1.powi(self.step_t as i32));
        let scale_v = 1.0 / (1.0 - beta2.powi(self.step_t as i32));

        for state in self.vars.iter() {
            let theta = &state.var;
            let Some(grad) = grads.get(theta) else {
                continue;
            };

            let grad = if weight_decay > 0.0 {
                (grad + (theta.as_tensor() * weight_decay)?)?
            } else {
                grad.clone()
            };

            let m = ((state.exp_avg.as_tensor() * beta1)? + (&grad * (1.0 - beta1))?)?;
            let v = ((state.exp_avg_sq.as_tensor() * beta2)? + (grad.sqr()? * (1.0 - beta2))?)?;

            let m_hat = (&m * scale_m)?;
            let v_hat = (&v * scale_v)?;
            let update = ((m_hat / (v_hat.sqrt()? + eps)?)? * lr)?;
            let next = (theta.as_tensor() - update)?;

            state.exp_avg.set(&m)?;
            state.exp_avg_sq.set(&v)?;
            theta.set(&next)?;
        }

        Ok(())
    }
}

impl StateDict for Adam {
    fn state_dict(&self) -> Result<Vec<(String, Tensor)>> {
        let device = Device::Cpu;
        let mut state = vec![
            ("lr".to_string(), Tensor::new(self.params.lr, &device)?),
            ("step".to_string(), Tensor::new(self.step_t as f64, &device)?),
        ];
        for (i, var) in self.vars.iter().enumerate() {
            state.push((
                format!("state.{}.exp_avg", i),
                var.exp_avg.as_tensor().clone(),
            ));
            state.push((
                format!("state.{}.exp_avg_sq", i),
                var.exp_avg_sq.as_tensor().clone(),
            ));
        }
        Ok(state)
    }

    fn load_state_dict(
        &mut self,
        tensors: &HashMap<String, Tensor>,
    ) -> std::result::Result<(), CheckpointError> {
        for (i, var) in self.vars.iter().enumerate() {
            assign(&var.exp_avg, tensor(tensors, &format!("state.{}.exp_avg", i))?)?;
            assign(&var.exp_avg_sq, tensor(tensors, &format!("state.{}.exp_avg_sq", i))?)?;
        }
        self.params.lr = scalar(tensors, "lr")?;
        self.step_t = scalar(tensors, "step")? as usize;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    #[test]
    fn test_first_step_moves_by_learning_rate() -> Result<()> {
        // With bias correction the first Adam update is lr * sign(grad)
        let device = Device::Cpu;
        let w = Var::from_slice(&[1f32, -2.0, 3.0], 3, &device)?;
        let mut opt = Adam::new(
            vec![w.clone()],
            ParamsAdam {
                lr: 0.1,
                ..Default::default()
            },
        )?;

        let loss = (w.as_tensor() * 2.0)?.sum_all()?;
        opt.backward_step(&loss)?;

        let values = w.as_tensor().to_vec1::<f32>()?;
        for (got, want) in values.iter().zip([0.9f32, -2.1, 2.9]) {
            assert!((got - want).abs() < 1e-5, "{} vs {}", got, want);
        }
        assert_eq!(opt.step_t, 1);
        Ok(())
    }

    #[test]
    fn test_minimizes_quadratic() -> Result<()> {
        let device = Device::Cpu;
        let w = Var::from_slice(&[4f32, -3.0], 2, &device)?;
        let mut opt = Adam::new(
            vec![w.clone()],
            ParamsAdam {
                lr: 0.1,
                ..Default::default()
            },
        )?;

        for _ in 0..300 {
            let loss = w.as_tensor().sqr()?.sum_all()?;
            opt.backward_step(&loss)?;
        }

        let values = w.as_tensor().to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.abs() < 0.1), "{:?}", values);
        Ok(())
    }

    #[test]
    fn test_skips_integer_vars() -> Result<()> {
        let device = Device::Cpu;
        let ids = Var::zeros(3, DType::U32, &device)?;
        let opt = Adam::new(vec![ids], ParamsAdam::default())?;
        assert!(opt.state_dict()?.len() == 2);
        Ok(())
    }
}
