use candle_core::{Result, Tensor};
use candle_nn::{
    conv2d, conv_transpose2d, Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig,
    ModuleT, VarBuilder,
};

use super::{layer_sizes, DoubleConv, POOL_SIZE};

struct UpLevel {
    up: ConvTranspose2d,
    conv: DoubleConv,
}

// Candle U-Net: encoder levels with skip connections, bottleneck, decoder, 1x1 head
pub struct Network {
    downs: Vec<DoubleConv>,
    bottleneck: DoubleConv,
    ups: Vec<UpLevel>,
    head: Conv2d,
    num_classes: usize,
}

impl Network {
    pub fn new(
        vs: &VarBuilder,
        in_channels: usize,
        num_classes: usize,
        min_layer_size: usize,
        max_layer_size: usize,
    ) -> Result<Self> {
        let sizes = layer_sizes(min_layer_size, max_layer_size);

        let mut downs = Vec::with_capacity(sizes.len());
        let mut channels = in_channels;
        for (i, &size) in sizes.iter().enumerate() {
            downs.push(DoubleConv::new(channels, size, vs.pp(format!("downs.{}", i)))?);
            channels = size;
        }

        let bottleneck = DoubleConv::new(channels, max_layer_size, vs.pp("bottleneck"))?;

        let up_cfg = ConvTranspose2dConfig {
            stride: POOL_SIZE,
            ..Default::default()
        };
        let mut ups = Vec::with_capacity(sizes.len());
        let mut channels = max_layer_size;
        for (i, &size) in sizes.iter().rev().enumerate() {
            let vs = vs.pp(format!("ups.{}", i));
            ups.push(UpLevel {
                up: conv_transpose2d(channels, size, POOL_SIZE, up_cfg, vs.pp("up"))?,
                conv: DoubleConv::new(size * 2, size, vs.pp("conv"))?,
            });
            channels = size;
        }

        let head = conv2d(
            channels,
            num_classes,
            1,
            Conv2dConfig::default(),
            vs.pp("head"),
        )?;

        Ok(Self {
            downs,
            bottleneck,
            ups,
            head,
            num_classes,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class index of the highest logit per pixel, `[B, H, W]` as u32.
    pub fn predict(&self, x: &Tensor) -> Result<Tensor> {
        self.forward_t(x, false)?.argmax(1)
    }
}

impl ModuleT for Network {
    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut skips = Vec::with_capacity(self.downs.len());
        let mut x = x.clone();

        for down in &self.downs {
            x = down.forward_t(&x, train)?;
            skips.push(x.clone());
            x = x.max_pool2d(POOL_SIZE)?;
        }

        x = self.bottleneck.forward_t(&x, train)?;

        for (level, skip) in self.ups.iter().zip(skips.iter().rev()) {
            x = x.apply(&level.up)?;
            x = match_spatial(&x, skip)?;
            x = Tensor::cat(&[skip, &x], 1)?;
            x = level.conv.forward_t(&x, train)?;
        }

        x.apply(&self.head)
    }
}

// Odd sizes lose a row/column to pooling; pad (or crop) back to the skip size
fn match_spatial(x: &Tensor, skip: &Tensor) -> Result<Tensor> {
    let (_, _, h, w) = x.dims4()?;
    let (_, _, target_h, target_w) = skip.dims4()?;

    let x = if h < target_h {
        x.pad_with_zeros(2, 0, target_h - h)?
    } else {
        x.narrow(2, 0, target_h)?
    };

    if w < target_w {
        x.pad_with_zeros(3, 0, target_w - w)
    } else {
        x.narrow(3, 0, target_w)
    }
}
