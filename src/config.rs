use crate::{common::*, error::SynthError, model::params};

/// File names probed, in order, for the training configuration record.
pub const CONFIG_FILE_NAMES: &[&str] = &["opt.json5", "opt.json"];

/// Training-time configuration of a checkpoint.
///
/// Absent fields fall back to the defaults the generator was trained with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    pub label_nc: usize,
    #[serde(default)]
    pub contain_dontcare_label: bool,
    #[serde(default)]
    pub no_instance: bool,
    #[serde(default)]
    pub use_vae: bool,
    #[serde(default = "default_z_dim")]
    pub z_dim: i64,
    #[serde(default = "default_ngf")]
    pub ngf: i64,
    #[serde(default)]
    pub num_upsampling_layers: UpsamplingLayers,
    #[serde(default = "default_crop_size")]
    pub crop_size: i64,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: f64,
    #[serde(
        rename = "norm_G",
        default = "default_norm_g",
        serialize_with = "serialize_norm_spec",
        deserialize_with = "deserialize_norm_spec"
    )]
    pub norm_g: NormSpec,
    #[serde(default = "default_preprocess_mode")]
    pub preprocess_mode: String,
}

impl CheckpointConfig {
    pub fn open<P>(path: P) -> Result<Self, SynthError>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let malformed = |reason: String| SynthError::MalformedConfig {
            path: path.to_owned(),
            reason,
        };

        let text = fs::read_to_string(path).map_err(|err| malformed(err.to_string()))?;
        let config: Self = json5::from_str(&text).map_err(|err| malformed(err.to_string()))?;
        config.validate().map_err(malformed)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.label_nc == 0 {
            return Err("label_nc must be positive".into());
        }
        if self.z_dim <= 0 {
            return Err("z_dim must be positive".into());
        }
        if self.ngf <= 0 {
            return Err("ngf must be positive".into());
        }
        if !(self.aspect_ratio > 0.0) {
            return Err("aspect_ratio must be positive".into());
        }
        let factor = 1_i64 << self.num_upsampling_layers.count();
        if self.crop_size <= 0 || self.crop_size % factor != 0 {
            return Err(format!(
                "crop_size {} is not divisible by {} ({:?} upsampling)",
                self.crop_size, factor, self.num_upsampling_layers
            ));
        }
        if self.num_upsampling_layers == UpsamplingLayers::Most && self.ngf < 2 {
            return Err("ngf must be at least 2 with 'most' upsampling".into());
        }
        Ok(())
    }

    /// Class channels, including the optional don't-care class.
    pub fn class_count(&self) -> usize {
        self.label_nc + usize::from(self.contain_dontcare_label)
    }

    pub fn edge_channels(&self) -> usize {
        if self.no_instance {
            0
        } else {
            1
        }
    }

    /// Total channels of the conditioning input.
    pub fn semantic_nc(&self) -> usize {
        self.class_count() + self.edge_channels()
    }

    /// Spatial size `(height, width)` of the generator head.
    pub fn latent_size(&self) -> (i64, i64) {
        let sw = self.crop_size / (1 << self.num_upsampling_layers.count());
        let sh = (sw as f64 / self.aspect_ratio).round() as i64;
        (sh.max(1), sw)
    }

    /// Spatial size `(height, width)` of the generated image.
    pub fn output_size(&self) -> (i64, i64) {
        let (sh, sw) = self.latent_size();
        let factor = 1 << self.num_upsampling_layers.count();
        (sh * factor, sw * factor)
    }

    /// Raster size `(height, width)` expected by preprocessing, if any.
    pub fn target_raster_size(&self) -> Option<(usize, usize)> {
        match self.preprocess_mode.as_str() {
            "none" => None,
            _ => {
                let height = (self.crop_size as f64 / self.aspect_ratio).round() as usize;
                Some((height.max(1), self.crop_size as usize))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsamplingLayers {
    Normal,
    More,
    Most,
}

impl UpsamplingLayers {
    pub fn count(&self) -> u32 {
        match self {
            Self::Normal => 5,
            Self::More => 6,
            Self::Most => 7,
        }
    }
}

impl Default for UpsamplingLayers {
    fn default() -> Self {
        Self::Normal
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamFreeNorm {
    Instance,
    SyncBatch,
    Batch,
}

/// Parsed form of a `[spectral]spade<norm><k>x<k>` normalization string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormSpec {
    pub spectral: bool,
    pub param_free: ParamFreeNorm,
    pub kernel_size: i64,
}

impl NormSpec {
    pub fn uses_running_stats(&self) -> bool {
        matches!(self.param_free, ParamFreeNorm::Batch | ParamFreeNorm::SyncBatch)
    }
}

impl FromStr for NormSpec {
    type Err = Error;

    fn from_str(text: &str) -> Fallible<Self> {
        lazy_static::lazy_static! {
            static ref SPADE_NORM: Regex = Regex::new(r"^spade(\D+)(\d)x\d$").unwrap();
        }

        let (spectral, rest) = match text.strip_prefix("spectral") {
            Some(rest) => (true, rest),
            None => (false, text),
        };
        let captures = SPADE_NORM
            .captures(rest)
            .ok_or_else(|| format_err!("invalid normalization spec '{}'", text))?;

        let param_free = match &captures[1] {
            "instance" => ParamFreeNorm::Instance,
            "syncbatch" => ParamFreeNorm::SyncBatch,
            "batch" => ParamFreeNorm::Batch,
            other => bail!("unsupported param-free normalization '{}'", other),
        };
        let kernel_size: i64 = captures[2].parse()?;
        ensure!(kernel_size % 2 == 1, "kernel size must be odd, got {}", kernel_size);

        Ok(Self {
            spectral,
            param_free,
            kernel_size,
        })
    }
}

impl Display for NormSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let norm = match self.param_free {
            ParamFreeNorm::Instance => "instance",
            ParamFreeNorm::SyncBatch => "syncbatch",
            ParamFreeNorm::Batch => "batch",
        };
        let prefix = if self.spectral { "spectral" } else { "" };
        write!(
            f,
            "{}spade{}{}x{}",
            prefix, norm, self.kernel_size, self.kernel_size
        )
    }
}

/// A trained experiment inside a checkpoints directory.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    pub dir: PathBuf,
    pub epoch: String,
}

impl Checkpoint {
    pub fn new<P>(checkpoints_dir: P, experiment_name: &str, epoch: &str) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            dir: checkpoints_dir.as_ref().join(experiment_name),
            epoch: epoch.to_owned(),
        }
    }

    pub fn config_path(&self) -> Result<PathBuf, SynthError> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| self.dir.join(name))
            .find(|path| path.is_file())
            .ok_or_else(|| SynthError::MissingConfig {
                path: self.dir.join(CONFIG_FILE_NAMES[0]),
            })
    }

    pub fn load_config(&self) -> Result<CheckpointConfig, SynthError> {
        let path = self.config_path()?;
        debug!("loading checkpoint configuration {}", path.display());
        CheckpointConfig::open(path)
    }

    pub fn weights_path(&self) -> PathBuf {
        self.dir.join(format!("{}_net_G.ot", self.epoch))
    }
}

/// Device selector accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSpec(pub Device);

impl Default for DeviceSpec {
    fn default() -> Self {
        Self(Device::cuda_if_available())
    }
}

impl FromStr for DeviceSpec {
    type Err = Error;

    fn from_str(name: &str) -> Fallible<Self> {
        let device = match name {
            "cpu" => Device::Cpu,
            "cuda" => Device::Cuda(0),
            _ => {
                let number = name
                    .strip_prefix("cuda(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .or_else(|| name.strip_prefix("cuda:"))
                    .ok_or_else(|| format_err!("invalid device name {}", name))?;
                let number: usize = number
                    .parse()
                    .map_err(|_err| format_err!("invalid device name {}", name))?;
                Device::Cuda(number)
            }
        };
        Ok(Self(device))
    }
}

impl Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(n) => write!(f, "cuda({})", n),
        }
    }
}

fn default_z_dim() -> i64 {
    params::DEFAULT_Z_DIM
}

fn default_ngf() -> i64 {
    params::DEFAULT_NGF
}

fn default_crop_size() -> i64 {
    params::DEFAULT_CROP_SIZE
}

fn default_aspect_ratio() -> f64 {
    1.0
}

fn default_norm_g() -> NormSpec {
    NormSpec {
        spectral: true,
        param_free: ParamFreeNorm::SyncBatch,
        kernel_size: 3,
    }
}

fn default_preprocess_mode() -> String {
    "resize_and_crop".into()
}

fn serialize_norm_spec<S>(spec: &NormSpec, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    spec.to_string().serialize(serializer)
}

fn deserialize_norm_spec<'de, D>(deserializer: D) -> Result<NormSpec, D::Error>
where
    D: Deserializer<'de>,
{
    let text = String::deserialize(deserializer)?;
    text.parse()
        .map_err(|err| D::Error::custom(format!("{:?}", err)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_fill_missing_fields() {
        let config: CheckpointConfig = json5::from_str("{ label_nc: 8 }").unwrap();
        assert_eq!(config.z_dim, 256);
        assert_eq!(config.ngf, 64);
        assert_eq!(config.num_upsampling_layers, UpsamplingLayers::Normal);
        assert_eq!(config.norm_g.to_string(), "spectralspadesyncbatch3x3");
        assert_eq!(config.class_count(), 8);
        assert_eq!(config.semantic_nc(), 9);
        assert_eq!(config.latent_size(), (8, 8));
        assert_eq!(config.output_size(), (256, 256));
    }

    #[test]
    fn dontcare_and_instance_flags_change_channels() {
        let config: CheckpointConfig = json5::from_str(
            r#"{ label_nc: 5, contain_dontcare_label: true, no_instance: true }"#,
        )
        .unwrap();
        assert_eq!(config.class_count(), 6);
        assert_eq!(config.edge_channels(), 0);
        assert_eq!(config.semantic_nc(), 6);
    }

    #[test]
    fn parse_norm_spec() {
        let spec: NormSpec = "spadeinstance5x5".parse().unwrap();
        assert!(!spec.spectral);
        assert_eq!(spec.param_free, ParamFreeNorm::Instance);
        assert_eq!(spec.kernel_size, 5);
        assert!(!spec.uses_running_stats());

        assert!("spectralspadebatch3x3".parse::<NormSpec>().unwrap().spectral);
        assert!("spectralinstance".parse::<NormSpec>().is_err());
        assert!("spadegroup3x3".parse::<NormSpec>().is_err());
    }

    #[test]
    fn load_from_checkpoint_dir() {
        let dir = tempdir().unwrap();
        let exp = dir.path().join("sat");
        fs::create_dir_all(&exp).unwrap();
        fs::write(
            exp.join("opt.json"),
            r#"{"label_nc": 3, "use_vae": true, "z_dim": 16, "name": "sat"}"#,
        )
        .unwrap();

        let checkpoint = Checkpoint::new(dir.path(), "sat", "latest");
        let config = checkpoint.load_config().unwrap();
        assert!(config.use_vae);
        assert_eq!(config.z_dim, 16);
        assert_eq!(checkpoint.weights_path(), exp.join("latest_net_G.ot"));
    }

    #[test]
    fn missing_config_is_reported() {
        let dir = tempdir().unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "nothing", "latest");
        assert!(matches!(
            checkpoint.load_config(),
            Err(SynthError::MissingConfig { .. })
        ));
    }

    #[test]
    fn malformed_config_is_reported() {
        let dir = tempdir().unwrap();
        let exp = dir.path().join("sat");
        fs::create_dir_all(&exp).unwrap();

        fs::write(exp.join("opt.json5"), "{ label_nc: ").unwrap();
        let checkpoint = Checkpoint::new(dir.path(), "sat", "latest");
        assert!(matches!(
            checkpoint.load_config(),
            Err(SynthError::MalformedConfig { .. })
        ));

        fs::write(exp.join("opt.json5"), "{ label_nc: 4, crop_size: 100 }").unwrap();
        assert!(matches!(
            checkpoint.load_config(),
            Err(SynthError::MalformedConfig { .. })
        ));
    }

    #[test]
    fn parse_device_names() {
        assert_eq!("cpu".parse::<DeviceSpec>().unwrap().0, Device::Cpu);
        assert_eq!("cuda(1)".parse::<DeviceSpec>().unwrap().0, Device::Cuda(1));
        assert_eq!("cuda:2".parse::<DeviceSpec>().unwrap().0, Device::Cuda(2));
        assert!("tpu".parse::<DeviceSpec>().is_err());
        assert_eq!(DeviceSpec(Device::Cuda(3)).to_string(), "cuda(3)");
    }
}
