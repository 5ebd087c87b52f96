use crate::{common::*, error::SynthError, model::Generator, semantics::ConditioningTensor};

/// How many styles a run produces and where their latents come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StylePlan {
    pub requested: usize,
    pub styles: usize,
    /// Latents are drawn from a standard normal per style.
    pub stochastic: bool,
}

impl StylePlan {
    pub fn resolve(latent_dim: Option<i64>, random_latent: bool, requested: usize) -> Self {
        let stochastic = latent_dim.is_some() && random_latent;
        let styles = if stochastic { requested.max(1) } else { 1 };

        Self {
            requested,
            styles,
            stochastic,
        }
    }

    /// The requested style count could not be honoured.
    pub fn is_forced(&self) -> bool {
        self.styles != self.requested
    }
}

/// Runs the frozen generator on conditioning tensors.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct Synthesizer {
    #[derivative(Debug = "ignore")]
    generator: Box<dyn Generator>,
    plan: StylePlan,
}

impl Synthesizer {
    pub fn new(generator: Box<dyn Generator>, random_latent: bool, requested: usize) -> Self {
        let latent_dim = generator.latent_dim();
        let plan = StylePlan::resolve(latent_dim, random_latent, requested);

        if plan.is_forced() {
            warn!(
                "{} styles requested but only one deterministic pass is possible \
                 (latent input: {}, random latent: {}), producing 1 style per tile",
                requested,
                latent_dim.is_some(),
                random_latent
            );
        }
        if plan.stochastic {
            info!("sampling random latents, styles may drift from training-time encoded styles");
        }

        Self { generator, plan }
    }

    pub fn plan(&self) -> &StylePlan {
        &self.plan
    }

    /// Produces one image per planned style.
    ///
    /// Runtime failures of the tensor backend, including panics raised while
    /// uploading the conditioning, drawing latents or converting outputs,
    /// become `Inference` errors for this call only.
    pub fn synthesize(&self, cond: &ConditioningTensor) -> Result<Vec<RgbImage>, SynthError> {
        guarded(|| {
            let device = self.generator.device();
            let semantics = cond.to_tensor(device);

            (0..self.plan.styles)
                .map(|_| {
                    let latent = self.latent(device);
                    let output = self.generator.forward(&semantics, latent.as_ref())?;
                    tensor_to_image(&output)
                })
                .collect()
        })
    }

    fn latent(&self, device: Device) -> Option<Tensor> {
        let z_dim = self.generator.latent_dim()?;
        let latent = if self.plan.stochastic {
            Tensor::randn(&[1, z_dim], (Kind::Float, device))
        } else {
            Tensor::zeros(&[1, z_dim], (Kind::Float, device))
        };
        Some(latent)
    }
}

/// Runs `f`, turning panics into `Inference` errors.
fn guarded<T, F>(f: F) -> Result<T, SynthError>
where
    F: FnOnce() -> Result<T, SynthError>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<String>()
            .cloned()
            .or_else(|| payload.downcast_ref::<&str>().map(|msg| msg.to_string()))
            .unwrap_or_else(|| "unknown panic during inference".into());
        Err(SynthError::Inference(reason))
    })
}

fn backend_error(err: TchError) -> SynthError {
    SynthError::Inference(err.to_string())
}

/// Converts a `[1, 3, H, W]` or `[3, H, W]` floating point tensor in
/// `[-1, 1]` to an RGB image, truncating to 8 bits.
pub fn tensor_to_image(tensor: &Tensor) -> Result<RgbImage, SynthError> {
    let image = match tensor.dim() {
        4 => tensor.f_select(0, 0).map_err(backend_error)?,
        3 => tensor.shallow_clone(),
        _ => {
            return Err(SynthError::Inference(format!(
                "unexpected output shape {:?}",
                tensor.size()
            )))
        }
    };

    let kind = image.f_kind().map_err(backend_error)?;
    if !matches!(kind, Kind::Half | Kind::Float | Kind::Double | Kind::BFloat16) {
        return Err(SynthError::Inference(format!(
            "expected a floating point output, got {:?}",
            kind
        )));
    }

    let (channels, height, width) = image.size3().map_err(backend_error)?;
    if channels != 3 {
        return Err(SynthError::Inference(format!(
            "expected 3 output channels, got {}",
            channels
        )));
    }

    let clamped = image.f_clamp(-1.0, 1.0).map_err(backend_error)?;
    let pixels = ((clamped + 1.0) / 2.0 * 255.0)
        .f_to_kind(Kind::Uint8)
        .and_then(|x| x.f_permute(&[1, 2, 0]))
        .and_then(|x| x.f_to_device(Device::Cpu))
        .and_then(|x| x.f_contiguous())
        .map_err(backend_error)?;
    let buf = Vec::<u8>::from(&pixels);

    RgbImage::from_raw(width as u32, height as u32, buf)
        .ok_or_else(|| SynthError::Inference("output buffer does not match its shape".into()))
}
