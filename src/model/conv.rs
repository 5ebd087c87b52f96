use crate::common::*;

/// 2D convolution whose weight is divided by its spectral norm.
///
/// Parameters follow the training framework's layout: `weight_orig`,
/// the power-iteration vectors `weight_u`/`weight_v`, and `bias`.
/// At inference the stored vectors are used as is.
#[derive(Debug)]
pub struct SpectralConv2D {
    weight_orig: Tensor,
    weight_u: Tensor,
    weight_v: Tensor,
    bias: Option<Tensor>,
    out_channels: i64,
    stride: i64,
    padding: i64,
}

impl SpectralConv2D {
    pub fn weight(&self) -> Tensor {
        let weight_mat = self.weight_orig.view([self.out_channels, -1]);
        let sigma = self.weight_u.dot(&weight_mat.mv(&self.weight_v));
        &self.weight_orig / sigma
    }
}

impl Module for SpectralConv2D {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.conv2d(
            &self.weight(),
            self.bias.as_ref(),
            &[self.stride, self.stride],
            &[self.padding, self.padding],
            &[1, 1],
            1,
        )
    }
}

/// Convolution used inside residual blocks, spectral-normalized or plain
/// depending on the checkpoint's normalization spec.
#[derive(Debug)]
pub enum BlockConv {
    Plain(Conv2D),
    Spectral(SpectralConv2D),
}

#[derive(Debug, Clone)]
pub struct BlockConvInit {
    pub in_channels: i64,
    pub out_channels: i64,
    pub kernel_size: i64,
    pub bias: bool,
    pub spectral: bool,
}

impl BlockConvInit {
    pub fn build<'p, P>(self, path: P) -> BlockConv
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            in_channels,
            out_channels,
            kernel_size,
            bias,
            spectral,
        } = self;
        let padding = (kernel_size - 1) / 2;

        if !spectral {
            let conv = nn::conv2d(
                path,
                in_channels,
                out_channels,
                kernel_size,
                ConvConfig {
                    padding,
                    bias,
                    ..Default::default()
                },
            );
            return BlockConv::Plain(conv);
        }

        let fan_in = in_channels * kernel_size * kernel_size;
        let weight_orig = path.var(
            "weight_orig",
            &[out_channels, in_channels, kernel_size, kernel_size],
            Init::KaimingUniform,
        );
        let weight_u = path.var(
            "weight_u",
            &[out_channels],
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        );
        let weight_v = path.var(
            "weight_v",
            &[fan_in],
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        );
        let bias = bias.then(|| {
            let bound = 1.0 / (fan_in as f64).sqrt();
            path.var(
                "bias",
                &[out_channels],
                Init::Uniform {
                    lo: -bound,
                    up: bound,
                },
            )
        });

        BlockConv::Spectral(SpectralConv2D {
            weight_orig,
            weight_u,
            weight_v,
            bias,
            out_channels,
            stride: 1,
            padding,
        })
    }
}

impl Module for BlockConv {
    fn forward(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Plain(conv) => xs.apply(conv),
            Self::Spectral(conv) => xs.apply(conv),
        }
    }
}
