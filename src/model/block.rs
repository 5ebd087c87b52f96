use super::{
    conv::{BlockConv, BlockConvInit},
    params,
    spade::{SpadeNorm, SpadeNormInit},
};
use crate::{common::*, config::NormSpec};

pub fn leaky_relu(xs: &Tensor) -> Tensor {
    xs.maximum(&(xs * params::LEAKY_RELU_SLOPE))
}

/// Residual block with SPADE normalization before each convolution.
#[derive(Debug)]
pub struct SpadeResnetBlock {
    conv_0: BlockConv,
    conv_1: BlockConv,
    norm_0: SpadeNorm,
    norm_1: SpadeNorm,
    shortcut: Option<(BlockConv, SpadeNorm)>,
}

#[derive(Debug, Clone)]
pub struct SpadeResnetBlockInit {
    pub in_channels: i64,
    pub out_channels: i64,
    pub label_channels: i64,
    pub spec: NormSpec,
}

impl SpadeResnetBlockInit {
    pub fn build<'p, P>(self, path: P) -> SpadeResnetBlock
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_channels,
            out_channels,
            label_channels,
            spec,
        } = self;

        let middle_channels = in_channels.min(out_channels);
        let conv = |in_channels, out_channels, kernel_size, bias| BlockConvInit {
            in_channels,
            out_channels,
            kernel_size,
            bias,
            spectral: spec.spectral,
        };

        let conv_0 = conv(in_channels, middle_channels, 3, true).build(path / "conv_0");
        let conv_1 = conv(middle_channels, out_channels, 3, true).build(path / "conv_1");
        let norm_0 = SpadeNormInit::new(in_channels, label_channels, &spec).build(path / "norm_0");
        let norm_1 =
            SpadeNormInit::new(middle_channels, label_channels, &spec).build(path / "norm_1");

        let shortcut = (in_channels != out_channels).then(|| {
            let conv_s = conv(in_channels, out_channels, 1, false).build(path / "conv_s");
            let norm_s =
                SpadeNormInit::new(in_channels, label_channels, &spec).build(path / "norm_s");
            (conv_s, norm_s)
        });

        SpadeResnetBlock {
            conv_0,
            conv_1,
            norm_0,
            norm_1,
            shortcut,
        }
    }
}

impl SpadeResnetBlock {
    pub fn forward(&self, xs: &Tensor, segmap: &Tensor) -> Tensor {
        let skip = match &self.shortcut {
            Some((conv_s, norm_s)) => norm_s.forward(xs, segmap).apply(conv_s),
            None => xs.shallow_clone(),
        };

        let dx = leaky_relu(&self.norm_0.forward(xs, segmap)).apply(&self.conv_0);
        let dx = leaky_relu(&self.norm_1.forward(&dx, segmap)).apply(&self.conv_1);

        skip + dx
    }
}
