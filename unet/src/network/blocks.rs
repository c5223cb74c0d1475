use candle_core::{Result, Tensor};
use candle_nn::{
    batch_norm, conv2d_no_bias, BatchNorm, BatchNormConfig, Conv2d, Conv2dConfig, ModuleT,
    VarBuilder,
};

/// Two 3x3 same-padded convolutions, each followed by batch norm and ReLU.
pub struct DoubleConv {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
}

impl DoubleConv {
    pub fn new(in_channels: usize, out_channels: usize, vs: VarBuilder) -> Result<Self> {
        let cfg = Conv2dConfig {
            padding: 1,
            ..Default::default()
        };

        Ok(Self {
            conv1: conv2d_no_bias(in_channels, out_channels, 3, cfg, vs.pp("conv1"))?,
            bn1: batch_norm(out_channels, BatchNormConfig::default(), vs.pp("bn1"))?,
            conv2: conv2d_no_bias(out_channels, out_channels, 3, cfg, vs.pp("conv2"))?,
            bn2: batch_norm(out_channels, BatchNormConfig::default(), vs.pp("bn2"))?,
        })
    }
}

impl ModuleT for DoubleConv {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = x.apply(&self.conv1)?.apply_t(&self.bn1, train)?.relu()?;
        x.apply(&self.conv2)?.apply_t(&self.bn2, train)?.relu()
    }
}
