use candle_core::backprop::GradStore;
use candle_core::{Device, Result, Tensor, Var};
use candle_nn::Optimizer;
use std::collections::HashMap;

use crate::checkpoint::{assign, scalar, tensor, CheckpointError, StateDict};

#[derive(Clone, Debug)]
pub struct ParamsSgd {
    pub lr: f64,
    pub momentum: f64,
    pub nesterov: bool,
    pub weight_decay: f64,
}

impl Default for ParamsSgd {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            momentum: 0.9,
            nesterov: true,
            weight_decay: 1e-4,
        }
    }
}

#[derive(Debug)]
struct VarSgd {
    var: Var,
    momentum_buffer: Var,
}

/// Stochastic gradient descent with (Nesterov) momentum and weight decay.
#[derive(Debug)]
pub struct Sgd {
    vars: Vec<VarSgd>,
    params: ParamsSgd,
}

impl Optimizer for Sgd {
    type Config = ParamsSgd;

    fn new(vars: Vec<Var>, params: ParamsSgd) -> Result<Self> {
        let vars = vars
            .into_iter()
            .filter(|var| var.dtype().is_float())
            .map(|var| {
                let momentum_buffer = Var::zeros(var.shape(), var.dtype(), var.device())?;
                Ok(VarSgd {
                    var,
                    momentum_buffer,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { vars, params })
    }

    fn learning_rate(&self) -> f64 {
        self.params.lr
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.params.lr = lr
    }

    fn step(&mut self, grads: &GradStore) -> Result<()> {
        let ParamsSgd {
            lr,
            momentum,
            nesterov,
            weight_decay,
        } = self.params;

        for state in self.vars.iter() {
            let theta = &state.var;
            let Some(grad) = grads.get(theta) else {
                continue;
            };

            let mut d_p = if weight_decay != 0.0 {
                (grad + (theta.as_tensor() * weight_decay)?)?
            } else {
                grad.clone()
            };

            // A zero buffer makes the first step equal to the plain gradient
            if momentum != 0.0 {
                let buf = ((state.momentum_buffer.as_tensor() * momentum)? + &d_p)?;
                state.momentum_buffer.set(&buf)?;
                d_p = if nesterov {
                    (d_p + (buf * momentum)?)?
                } else {
                    buf
                };
            }

            theta.set(&(theta.as_tensor() - (d_p * lr)?)?)?;
        }

        Ok(())
    }
}

impl StateDict for Sgd {
    fn state_dict(&self) -> Result<Vec<(String, Tensor)>> {
        let mut state = vec![("lr".to_string(), Tensor::new(self.params.lr, &Device::Cpu)?)];
        for (i, var) in self.vars.iter().enumerate() {
            state.push((
                format!("state.{}.momentum_buffer", i),
                var.momentum_buffer.as_tensor().clone(),
            ));
        }
        Ok(state)
    }

    fn load_state_dict(
        &mut self,
        tensors: &HashMap<String, Tensor>,
    ) -> std::result::Result<(), CheckpointError> {
        for (i, var) in self.vars.iter().enumerate() {
            assign(
                &var.momentum_buffer,
                tensor(tensors, &format!("state.{}.momentum_buffer", i))?,
            )?;
        }
        self.params.lr = scalar(tensors, "lr")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_step_without_momentum() -> Result<()> {
        let device = Device::Cpu;
        let w = Var::from_slice(&[1f32, 2.0], 2, &device)?;
        let mut opt = Sgd::new(
            vec![w.clone()],
            ParamsSgd {
                lr: 0.5,
                momentum: 0.0,
                nesterov: false,
                weight_decay: 0.0,
            },
        )?;

        // d/dw sum(3w) = 3
        let loss = (w.as_tensor() * 3.0)?.sum_all()?;
        opt.backward_step(&loss)?;

        let values = w.as_tensor().to_vec1::<f32>()?;
        assert!((values[0] + 0.5).abs() < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_nesterov_first_step() -> Result<()> {
        let device = Device::Cpu;
        let w = Var::from_slice(&[0f32], 1, &device)?;
        let mut opt = Sgd::new(
            vec![w.clone()],
            ParamsSgd {
                lr: 0.1,
                momentum: 0.9,
                nesterov: true,
                weight_decay: 0.0,
            },
        )?;

        // grad = 1, buf = 1, nesterov update = 1 + 0.9 * 1
        let loss = w.as_tensor().sum_all()?;
        opt.backward_step(&loss)?;

        let value = w.as_tensor().to_vec1::<f32>()?[0];
        assert!((value + 0.19).abs() < 1e-6, "{}", value);
        Ok(())
    }

    #[test]
    fn test_state_round_trip() -> Result<()> {
        let device = Device::Cpu;
        let w = Var::from_slice(&[1f32, 1.0], 2, &device)?;
        let mut opt = Sgd::new(vec![w.clone()], ParamsSgd::default())?;
        let loss = w.as_tensor().sqr()?.sum_all()?;
        opt.backward_step(&loss)?;

        let saved: HashMap<String, Tensor> = opt.state_dict()?.into_iter().collect();
        let expected = saved["state.0.momentum_buffer"].to_vec1::<f32>()?;

        let other = Var::from_slice(&[0f32, 0.0], 2, &device)?;
        let mut restored = Sgd::new(vec![other], ParamsSgd::default())?;
        restored.load_state_dict(&saved).expect("state loads");

        let restored_state: HashMap<String, Tensor> = restored.state_dict()?.into_iter().collect();
        assert_eq!(
            restored_state["state.0.momentum_buffer"].to_vec1::<f32>()?,
            expected
        );
        Ok(())
    }
}
