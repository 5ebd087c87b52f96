use super::params;
use crate::{
    common::*,
    config::{NormSpec, ParamFreeNorm},
};

// parameter-free normalization

#[derive(Debug)]
pub enum ParamFreeNormLayer {
    Instance,
    Batch {
        running_mean: Tensor,
        running_var: Tensor,
    },
}

impl ParamFreeNormLayer {
    pub fn new<'p, P>(path: P, kind: ParamFreeNorm, channels: i64) -> Self
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        match kind {
            ParamFreeNorm::Instance => Self::Instance,
            ParamFreeNorm::Batch | ParamFreeNorm::SyncBatch => Self::Batch {
                running_mean: path.zeros_no_train("running_mean", &[channels]),
                running_var: path.ones_no_train("running_var", &[channels]),
            },
        }
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let eps = params::PARAM_FREE_NORM_EPS;

        match self {
            Self::Instance => {
                let mean = xs.mean_dim(&[2, 3], true, Kind::Float);
                let centered = xs - mean;
                let var = (&centered * &centered).mean_dim(&[2, 3], true, Kind::Float);
                centered / (var + eps).sqrt()
            }
            Self::Batch {
                running_mean,
                running_var,
            } => {
                let channels = running_mean.size()[0];
                let mean = running_mean.view([1, channels, 1, 1]);
                let std = (running_var.view([1, channels, 1, 1]) + eps).sqrt();
                (xs - mean) / std
            }
        }
    }
}

// spatially-adaptive normalization

/// Normalizes activations, then modulates them with a per-pixel scale and
/// shift predicted from the segmentation map.
#[derive(Debug)]
pub struct SpadeNorm {
    param_free_norm: ParamFreeNormLayer,
    mlp_shared: Conv2D,
    mlp_gamma: Conv2D,
    mlp_beta: Conv2D,
}

#[derive(Debug, Clone)]
pub struct SpadeNormInit {
    pub norm_channels: i64,
    pub label_channels: i64,
    pub hidden_channels: i64,
    pub spec: NormSpec,
}

impl SpadeNormInit {
    pub fn new(norm_channels: i64, label_channels: i64, spec: &NormSpec) -> Self {
        Self {
            norm_channels,
            label_channels,
            hidden_channels: params::SPADE_HIDDEN_CHANNELS,
            spec: spec.clone(),
        }
    }

    pub fn build<'p, P>(self, path: P) -> SpadeNorm
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();
        let Self {
            norm_channels,
            label_channels,
            hidden_channels,
            spec,
        } = self;

        let conv_config = ConvConfig {
            padding: spec.kernel_size / 2,
            ..Default::default()
        };

        let param_free_norm =
            ParamFreeNormLayer::new(path / "param_free_norm", spec.param_free, norm_channels);
        let mlp_shared = nn::conv2d(
            &(path / "mlp_shared") / "0",
            label_channels,
            hidden_channels,
            spec.kernel_size,
            conv_config,
        );
        let mlp_gamma = nn::conv2d(
            path / "mlp_gamma",
            hidden_channels,
            norm_channels,
            spec.kernel_size,
            conv_config,
        );
        let mlp_beta = nn::conv2d(
            path / "mlp_beta",
            hidden_channels,
            norm_channels,
            spec.kernel_size,
            conv_config,
        );

        SpadeNorm {
            param_free_norm,
            mlp_shared,
            mlp_gamma,
            mlp_beta,
        }
    }
}

impl SpadeNorm {
    pub fn forward(&self, xs: &Tensor, segmap: &Tensor) -> Tensor {
        let normalized = self.param_free_norm.forward(xs);

        let size = xs.size();
        let segmap = segmap.upsample_nearest2d(&[size[2], size[3]], None::<f64>, None::<f64>);
        let actv = segmap.apply(&self.mlp_shared).relu();
        let gamma = actv.apply(&self.mlp_gamma);
        let beta = actv.apply(&self.mlp_beta);

        normalized * (gamma + 1.0) + beta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_norm_zero_mean_unit_variance() {
        let layer = ParamFreeNormLayer::Instance;
        let xs = Tensor::of_slice(&[1_f32, 2., 3., 4., 10., 20., 30., 40.]).view([1, 2, 2, 2]);
        let ys = layer.forward(&xs);

        let mean = ys.mean_dim(&[2, 3], false, Kind::Float);
        let var = (&ys * &ys).mean_dim(&[2, 3], false, Kind::Float);
        for channel in 0..2 {
            assert!(mean.double_value(&[0, channel]).abs() < 1e-5);
            assert!((var.double_value(&[0, channel]) - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn batch_norm_uses_running_stats() {
        let vs = VarStore::new(Device::Cpu);
        let layer = ParamFreeNormLayer::new(&vs.root() / "bn", ParamFreeNorm::SyncBatch, 3);
        let xs = Tensor::ones(&[1, 3, 2, 2], (Kind::Float, Device::Cpu));
        let ys = layer.forward(&xs);

        // zero mean and unit variance are the identity up to eps
        assert!((ys.double_value(&[0, 1, 1, 1]) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn modulation_keeps_activation_shape() {
        let vs = VarStore::new(Device::Cpu);
        let spec: NormSpec = "spadeinstance3x3".parse().unwrap();
        let norm = SpadeNormInit::new(8, 4, &spec).build(&vs.root() / "norm_0");

        let xs = Tensor::randn(&[1, 8, 4, 4], (Kind::Float, Device::Cpu));
        let segmap = Tensor::zeros(&[1, 4, 16, 16], (Kind::Float, Device::Cpu));
        assert_eq!(norm.forward(&xs, &segmap).size(), vec![1, 8, 4, 4]);

        let names = vs.variables().into_keys().sorted().collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "norm_0.mlp_beta.bias",
                "norm_0.mlp_beta.weight",
                "norm_0.mlp_gamma.bias",
                "norm_0.mlp_gamma.weight",
                "norm_0.mlp_shared.0.bias",
                "norm_0.mlp_shared.0.weight",
            ]
        );
    }
}
