use crate::{
    common::*,
    config::{Checkpoint, CheckpointConfig},
    error::SynthError,
    model::{Generator, PretrainedGenerator},
    naming::OutputNaming,
    raster::{self, InstanceRaster, LabelRaster, RASTER_EXTENSIONS},
    semantics::ConditioningTensor,
    synth::Synthesizer,
};

/// Options fixed for the lifetime of a loaded generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceOptions {
    pub device: Device,
    pub seed: i64,
    pub num_styles: usize,
    pub random_latent: bool,
}

/// The checkpoint configuration and the frozen generator, loaded once and
/// shared by every tile of a batch.
#[derive(Debug)]
pub struct InferenceContext {
    pub config: CheckpointConfig,
    synthesizer: Synthesizer,
}

impl InferenceContext {
    pub fn new(
        config: CheckpointConfig,
        generator: Box<dyn Generator>,
        random_latent: bool,
        num_styles: usize,
    ) -> Self {
        Self {
            config,
            synthesizer: Synthesizer::new(generator, random_latent, num_styles),
        }
    }

    /// Reads the configuration of `checkpoint` and loads its generator.
    pub fn load(checkpoint: &Checkpoint, options: &InferenceOptions) -> Result<Self, SynthError> {
        let InferenceOptions {
            device,
            seed,
            num_styles,
            random_latent,
        } = *options;

        let config = checkpoint.load_config()?;
        info!(
            "checkpoint {}: {} classes, norm {}, {} upsampling layers, vae {}",
            checkpoint.dir.display(),
            config.label_nc,
            config.norm_g,
            config.num_upsampling_layers.count(),
            config.use_vae
        );

        tch::manual_seed(seed);

        let weights = checkpoint.weights_path();
        let instant = Instant::now();
        let generator = PretrainedGenerator::load(&config, &weights, device)?;
        info!(
            "loaded {} parameters from {} in {:.2}s",
            generator.num_parameters(),
            weights.display(),
            instant.elapsed().as_secs_f64()
        );

        Ok(Self::new(config, Box::new(generator), random_latent, num_styles))
    }

    /// Number of images produced per tile.
    pub fn styles(&self) -> usize {
        self.synthesizer.plan().styles
    }

    /// Runs one label/instance pair through the generator.
    pub fn synthesize_tile(
        &self,
        label_path: &Path,
        instance_path: &Path,
    ) -> Result<Vec<RgbImage>, SynthError> {
        let label = LabelRaster::open(label_path, &self.config)?;
        let instance = InstanceRaster::open(instance_path, &self.config)?;
        let cond = ConditioningTensor::build(&label, &instance, &self.config)?;
        self.synthesizer.synthesize(&cond)
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub label_dir: PathBuf,
    pub instance_dir: PathBuf,
    pub output_dir: PathBuf,
    pub naming: OutputNaming,
    pub skip_existing: bool,
}

/// Tile counts of a finished batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed: {}, skipped: {}, failed: {}",
            self.processed, self.skipped, self.failed
        )
    }
}

/// A label raster and the instance raster with the same stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TilePair {
    pub stem: String,
    pub label: PathBuf,
    pub instance: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pairing {
    /// Sorted by stem.
    pub pairs: Vec<TilePair>,
    /// Stems found in only one of the directories.
    pub unpaired: Vec<String>,
}

/// Matches label and instance rasters by file stem.
pub fn pair_tiles(label_dir: &Path, instance_dir: &Path) -> Result<Pairing, SynthError> {
    let labels = rasters_by_stem(label_dir)?;
    let mut instances = rasters_by_stem(instance_dir)?;

    let mut pairing = Pairing::default();
    for (stem, label) in labels {
        match instances.remove(&stem) {
            Some(instance) => pairing.pairs.push(TilePair {
                stem,
                label,
                instance,
            }),
            None => {
                warn!("label {} has no instance raster, skipped", label.display());
                pairing.unpaired.push(stem);
            }
        }
    }
    for (stem, instance) in instances {
        warn!("instance {} has no label raster, skipped", instance.display());
        pairing.unpaired.push(stem);
    }
    pairing.unpaired.sort();

    Ok(pairing)
}

fn rasters_by_stem(dir: &Path) -> Result<BTreeMap<String, PathBuf>, SynthError> {
    let mut rasters = BTreeMap::new();

    for path in raster::list_files(dir, RASTER_EXTENSIONS)? {
        let stem = match path.file_stem().and_then(|stem| stem.to_str()) {
            Some(stem) => stem.to_owned(),
            None => {
                warn!("ignore file with non UTF-8 name {}", path.display());
                continue;
            }
        };
        if let Some(prev) = rasters.get(&stem) {
            warn!(
                "{} shares its stem with {}, ignored",
                path.display(),
                prev.display()
            );
            continue;
        }
        rasters.insert(stem, path);
    }

    Ok(rasters)
}

/// Runs every paired tile through the generator and writes the images.
///
/// Per-tile failures are logged and counted. Setting `interrupt` stops the
/// batch after the tile in progress.
pub fn run_batch(
    ctx: &InferenceContext,
    options: &BatchOptions,
    interrupt: &AtomicBool,
) -> Result<BatchSummary, SynthError> {
    let BatchOptions {
        label_dir,
        instance_dir,
        output_dir,
        naming,
        skip_existing,
    } = options;

    let Pairing { pairs, unpaired } = pair_tiles(label_dir, instance_dir)?;
    let mut summary = BatchSummary {
        skipped: unpaired.len(),
        ..Default::default()
    };
    fs::create_dir_all(output_dir).map_err(|err| SynthError::output(output_dir, err))?;

    let styles = ctx.styles();
    let total = pairs.len();
    info!("{} paired tiles, {} styles per tile", total, styles);

    for (index, pair) in pairs.iter().enumerate() {
        if interrupt.load(Ordering::SeqCst) {
            warn!("interrupted, {} tiles left unprocessed", total - index);
            break;
        }

        let paths = naming.output_paths(output_dir, &pair.stem, styles);
        if *skip_existing && paths.iter().all(|path| path.is_file()) {
            debug!("outputs of {} exist, skipped", pair.stem);
            summary.skipped += 1;
            continue;
        }

        let instant = Instant::now();
        match process_tile(ctx, pair, &paths) {
            Ok(()) => {
                summary.processed += 1;
                info!(
                    "[{}/{}] {} done in {}ms",
                    index + 1,
                    total,
                    pair.stem,
                    instant.elapsed().as_millis()
                );
            }
            Err(err) => {
                summary.failed += 1;
                error!(
                    "[{}/{}] {} failed ({} error): {}",
                    index + 1,
                    total,
                    pair.stem,
                    err.category(),
                    err
                );
            }
        }
    }

    Ok(summary)
}

fn process_tile(ctx: &InferenceContext, pair: &TilePair, paths: &[PathBuf]) -> Result<(), SynthError> {
    let images = ctx.synthesize_tile(&pair.label, &pair.instance)?;

    for (image, path) in images.iter().zip(paths) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|err| SynthError::output(parent, err))?;
        }
        image
            .save_with_format(path, ImageFormat::Png)
            .map_err(|err| SynthError::output(path, err))?;
    }

    Ok(())
}
