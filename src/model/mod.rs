mod block;
mod conv;
mod generator;
pub mod params;
mod spade;

pub use block::{SpadeResnetBlock, SpadeResnetBlockInit};
pub use conv::{BlockConv, BlockConvInit, SpectralConv2D};
pub use generator::{SpadeGenerator, SpadeGeneratorInit};
pub use spade::{ParamFreeNormLayer, SpadeNorm, SpadeNormInit};

use crate::{common::*, config::CheckpointConfig, error::SynthError};

/// A frozen image generator.
///
/// `semantics` is a `[1, C, H, W]` conditioning map; the result is a
/// `[1, 3, H', W']` image tensor with values in `[-1, 1]`.
pub trait Generator {
    /// Length of the latent vector the generator accepts, or `None` when
    /// it has no stochastic style input.
    fn latent_dim(&self) -> Option<i64>;

    fn device(&self) -> Device;

    fn forward(&self, semantics: &Tensor, latent: Option<&Tensor>) -> Result<Tensor, SynthError>;
}

/// The SPADE generator with its weights loaded from a checkpoint.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PretrainedGenerator {
    #[derivative(Debug = "ignore")]
    vs: VarStore,
    net: SpadeGenerator,
}

impl PretrainedGenerator {
    pub fn load<P>(config: &CheckpointConfig, weights: P, device: Device) -> Result<Self, SynthError>
    where
        P: AsRef<Path>,
    {
        let mut vs = VarStore::new(device);
        let net = SpadeGeneratorInit::new(config).build(&vs.root());
        load_weights(&mut vs, weights.as_ref())?;
        vs.freeze();

        Ok(Self { vs, net })
    }

    pub fn num_parameters(&self) -> i64 {
        self.vs
            .variables()
            .values()
            .map(|tensor| tensor.numel() as i64)
            .sum()
    }
}

impl Generator for PretrainedGenerator {
    fn latent_dim(&self) -> Option<i64> {
        self.net.latent_dim()
    }

    fn device(&self) -> Device {
        self.vs.device()
    }

    fn forward(&self, semantics: &Tensor, latent: Option<&Tensor>) -> Result<Tensor, SynthError> {
        Ok(tch::no_grad(|| self.net.forward_t(semantics, latent)))
    }
}

/// Copies every variable of `vs` from the tensors stored at `path`.
///
/// Fails when the file is unreadable, a variable is absent from the file,
/// or a stored tensor does not have the variable's shape.
pub fn load_weights(vs: &mut VarStore, path: &Path) -> Result<(), SynthError> {
    let weights_error = |reason: String| SynthError::WeightsLoad {
        path: path.to_owned(),
        reason,
    };

    if !path.is_file() {
        return Err(weights_error("file does not exist".into()));
    }
    let stored: HashMap<String, Tensor> = Tensor::load_multi(path)
        .map_err(|err| weights_error(err.to_string()))?
        .into_iter()
        .collect();

    let mut variables = vs.variables();
    for (name, var) in variables.iter_mut().sorted_by(|lhs, rhs| lhs.0.cmp(rhs.0)) {
        let src = stored
            .get(name)
            .ok_or_else(|| weights_error(format!("missing tensor '{}'", name)))?;
        if src.size() != var.size() {
            return Err(weights_error(format!(
                "tensor '{}' has shape {:?}, the generator expects {:?}",
                name,
                src.size(),
                var.size()
            )));
        }
        tch::no_grad(|| var.f_copy_(src)).map_err(|err| weights_error(err.to_string()))?;
    }

    let unused = stored
        .keys()
        .filter(|name| !variables.contains_key(*name))
        .count();
    if unused > 0 {
        debug!("ignored {} stored tensors unknown to the generator", unused);
    }

    Ok(())
}
