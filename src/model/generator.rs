use super::{
    block::{leaky_relu, SpadeResnetBlock, SpadeResnetBlockInit},
    params,
};
use crate::{
    common::*,
    config::{CheckpointConfig, NormSpec, UpsamplingLayers},
};

/// The head turning either a latent vector or the downsampled segmentation
/// map into the initial feature map.
#[derive(Debug)]
enum GeneratorHead {
    Latent(nn::Linear),
    Segmap(Conv2D),
}

#[derive(Debug)]
pub struct SpadeGenerator {
    head: GeneratorHead,
    head_0: SpadeResnetBlock,
    g_middle_0: SpadeResnetBlock,
    g_middle_1: SpadeResnetBlock,
    up_blocks: Vec<SpadeResnetBlock>,
    conv_img: Conv2D,
    upsampling: UpsamplingLayers,
    head_channels: i64,
    latent_height: i64,
    latent_width: i64,
    z_dim: i64,
    device: Device,
}

#[derive(Debug, Clone)]
pub struct SpadeGeneratorInit {
    pub semantic_nc: i64,
    pub ngf: i64,
    pub z_dim: i64,
    pub use_vae: bool,
    pub upsampling: UpsamplingLayers,
    pub latent_size: (i64, i64),
    pub norm: NormSpec,
}

impl SpadeGeneratorInit {
    pub fn new(config: &CheckpointConfig) -> Self {
        Self {
            semantic_nc: config.semantic_nc() as i64,
            ngf: config.ngf,
            z_dim: config.z_dim,
            use_vae: config.use_vae,
            upsampling: config.num_upsampling_layers,
            latent_size: config.latent_size(),
            norm: config.norm_g.clone(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> SpadeGenerator
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let device = path.device();

        let Self {
            semantic_nc,
            ngf: nf,
            z_dim,
            use_vae,
            upsampling,
            latent_size: (latent_height, latent_width),
            norm,
        } = self;
        let head_channels = params::HEAD_WIDTH_MULT * nf;

        let head = if use_vae {
            GeneratorHead::Latent(nn::linear(
                path / "fc",
                z_dim,
                head_channels * latent_height * latent_width,
                Default::default(),
            ))
        } else {
            GeneratorHead::Segmap(nn::conv2d(
                path / "fc",
                semantic_nc,
                head_channels,
                3,
                ConvConfig {
                    padding: 1,
                    ..Default::default()
                },
            ))
        };

        let block = |in_channels, out_channels| SpadeResnetBlockInit {
            in_channels,
            out_channels,
            label_channels: semantic_nc,
            spec: norm.clone(),
        };

        let head_0 = block(16 * nf, 16 * nf).build(path / "head_0");
        let g_middle_0 = block(16 * nf, 16 * nf).build(path / "G_middle_0");
        let g_middle_1 = block(16 * nf, 16 * nf).build(path / "G_middle_1");

        let mut widths = vec![16 * nf, 8 * nf, 4 * nf, 2 * nf, nf];
        if upsampling == UpsamplingLayers::Most {
            widths.push(nf / 2);
        }
        let up_blocks = widths
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_channels, &out_channels))| {
                block(in_channels, out_channels).build(path / format!("up_{}", index))
            })
            .collect::<Vec<_>>();

        let final_channels = *widths.last().unwrap_or(&nf);
        let conv_img = nn::conv2d(
            path / "conv_img",
            final_channels,
            3,
            3,
            ConvConfig {
                padding: 1,
                ..Default::default()
            },
        );

        SpadeGenerator {
            head,
            head_0,
            g_middle_0,
            g_middle_1,
            up_blocks,
            conv_img,
            upsampling,
            head_channels,
            latent_height,
            latent_width,
            z_dim,
            device,
        }
    }
}

fn upsample(xs: &Tensor) -> Tensor {
    let size = xs.size();
    xs.upsample_nearest2d(&[size[2] * 2, size[3] * 2], None::<f64>, None::<f64>)
}

impl SpadeGenerator {
    /// Length of the latent vector, when the generator consumes one.
    pub fn latent_dim(&self) -> Option<i64> {
        match self.head {
            GeneratorHead::Latent(_) => Some(self.z_dim),
            GeneratorHead::Segmap(_) => None,
        }
    }

    /// Maps a `[B, semantic_nc, H, W]` conditioning map to `[B, 3, H', W']`
    /// images in `[-1, 1]`. A latent generator samples `z` when none is
    /// given.
    pub fn forward_t(&self, segmap: &Tensor, z: Option<&Tensor>) -> Tensor {
        let mut xs = match &self.head {
            GeneratorHead::Latent(fc) => {
                let batch_size = segmap.size()[0];
                let z = match z {
                    Some(z) => z.shallow_clone(),
                    None => Tensor::randn(&[batch_size, self.z_dim], (Kind::Float, self.device)),
                };
                z.apply(fc).view([
                    -1,
                    self.head_channels,
                    self.latent_height,
                    self.latent_width,
                ])
            }
            GeneratorHead::Segmap(fc) => segmap
                .upsample_nearest2d(&[self.latent_height, self.latent_width], None::<f64>, None::<f64>)
                .apply(fc),
        };

        xs = self.head_0.forward(&xs, segmap);

        xs = upsample(&xs);
        xs = self.g_middle_0.forward(&xs, segmap);

        if self.upsampling != UpsamplingLayers::Normal {
            xs = upsample(&xs);
        }
        xs = self.g_middle_1.forward(&xs, segmap);

        for block in &self.up_blocks {
            xs = upsample(&xs);
            xs = block.forward(&xs, segmap);
        }

        leaky_relu(&xs).apply(&self.conv_img).tanh()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_config(text: &str) -> CheckpointConfig {
        let config: CheckpointConfig = json5::from_str(text).unwrap();
        config.validate().unwrap();
        config
    }

    #[test]
    fn segmap_generator_output_shape() {
        let config = tiny_config(
            "{ label_nc: 3, ngf: 2, crop_size: 32, norm_G: 'spectralspadeinstance3x3' }",
        );
        let vs = VarStore::new(Device::Cpu);
        let generator = SpadeGeneratorInit::new(&config).build(&vs.root());
        assert_eq!(generator.latent_dim(), None);

        let segmap = Tensor::zeros(&[1, 4, 32, 32], (Kind::Float, Device::Cpu));
        let image = tch::no_grad(|| generator.forward_t(&segmap, None));
        assert_eq!(image.size(), vec![1, 3, 32, 32]);
        assert!(image.abs().max().double_value(&[]) <= 1.0);
    }

    #[test]
    fn latent_generator_output_shape() {
        let config = tiny_config(
            "{ label_nc: 2, ngf: 2, crop_size: 64, use_vae: true, z_dim: 8, \
             num_upsampling_layers: 'more', norm_G: 'spadebatch3x3' }",
        );
        let vs = VarStore::new(Device::Cpu);
        let generator = SpadeGeneratorInit::new(&config).build(&vs.root());
        assert_eq!(generator.latent_dim(), Some(8));

        let segmap = Tensor::zeros(&[1, 3, 64, 64], (Kind::Float, Device::Cpu));
        let z = Tensor::zeros(&[1, 8], (Kind::Float, Device::Cpu));
        let image = tch::no_grad(|| generator.forward_t(&segmap, Some(&z)));
        assert_eq!(image.size(), vec![1, 3, 64, 64]);

        let names = vs.variables();
        assert!(names.contains_key("fc.weight"));
        assert!(names.contains_key("G_middle_1.norm_0.param_free_norm.running_var"));
        assert!(names.contains_key("up_3.conv_s.weight"));
        assert!(!names.contains_key("up_4.conv_0.weight"));
    }

    #[test]
    fn most_upsampling_adds_final_block() {
        let config = tiny_config(
            "{ label_nc: 1, ngf: 2, crop_size: 128, num_upsampling_layers: 'most', \
             norm_G: 'spadeinstance3x3' }",
        );
        let vs = VarStore::new(Device::Cpu);
        let generator = SpadeGeneratorInit::new(&config).build(&vs.root());

        let segmap = Tensor::zeros(&[1, 2, 128, 128], (Kind::Float, Device::Cpu));
        let image = tch::no_grad(|| generator.forward_t(&segmap, None));
        assert_eq!(image.size(), vec![1, 3, 128, 128]);
        assert!(vs.variables().contains_key("up_4.conv_0.weight"));
    }
}
