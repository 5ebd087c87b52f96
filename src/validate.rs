use crate::{
    common::*,
    error::SynthError,
    naming,
    raster::{self, LabelRaster, RASTER_EXTENSIONS},
};

/// Bins of the per-channel intensity histogram over `[0, 1]`.
pub const HISTOGRAM_BINS: usize = 16;

/// Extensions of generated images picked up for validation.
pub const GENERATED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Pixel statistics of the generated image inside one label class.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassStats {
    pub count: u64,
    pub mean: [f64; 3],
    pub variance: [f64; 3],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileReport {
    pub generated: PathBuf,
    pub label: PathBuf,
    /// Label stem the image was matched to.
    pub tile: String,
    pub style: Option<usize>,
    pub mean: [f64; 3],
    pub std: [f64; 3],
    /// Densities per channel, integrating to one over `[0, 1]`.
    pub histogram: [Vec<f64>; 3],
    pub classes: BTreeMap<u32, ClassStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelShare {
    pub count: u64,
    pub probability: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateReport {
    pub matched: usize,
    pub mean_of_means: [f64; 3],
    pub mean_of_stds: [f64; 3],
    /// Class statistics pooled over every matched tile.
    pub classes: BTreeMap<u32, ClassStats>,
    /// Class frequencies over the distinct matched label rasters.
    pub label_distribution: BTreeMap<u32, LabelShare>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedTile {
    pub generated: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationReport {
    pub tiles: Vec<TileReport>,
    pub unmatched: Vec<PathBuf>,
    pub failed: Vec<FailedTile>,
    pub aggregate: Option<AggregateReport>,
}

impl ValidationReport {
    pub fn save_json<P>(&self, path: P) -> Fallible<()>
    where
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        let writer = BufWriter::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        );
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }
}

/// Running sums for the mean and variance of RGB values.
#[derive(Debug, Clone, Default, PartialEq)]
struct RgbAccumulator {
    count: u64,
    sum: [f64; 3],
    sum_sq: [f64; 3],
}

impl RgbAccumulator {
    fn push(&mut self, pixel: [f64; 3]) {
        self.count += 1;
        for c in 0..3 {
            self.sum[c] += pixel[c];
            self.sum_sq[c] += pixel[c] * pixel[c];
        }
    }

    fn merge(&mut self, other: &Self) {
        self.count += other.count;
        for c in 0..3 {
            self.sum[c] += other.sum[c];
            self.sum_sq[c] += other.sum_sq[c];
        }
    }

    fn finish(&self) -> ClassStats {
        let n = self.count.max(1) as f64;
        let mut mean = [0.0; 3];
        let mut variance = [0.0; 3];
        for c in 0..3 {
            mean[c] = self.sum[c] / n;
            variance[c] = (self.sum_sq[c] / n - mean[c] * mean[c]).max(0.0);
        }
        ClassStats {
            count: self.count,
            mean,
            variance,
        }
    }
}

type TileStats = (RgbAccumulator, [Vec<f64>; 3], BTreeMap<u32, RgbAccumulator>);

/// Statistics of one generated image against its label raster. Pixel
/// values are scaled to `[0, 1]`.
fn tile_stats(
    image: &RgbImage,
    labels: &Array2<u32>,
) -> Result<TileStats, SynthError> {
    let (width, height) = image.dimensions();
    let (label_height, label_width) = labels.dim();
    if (height as usize, width as usize) != (label_height, label_width) {
        return Err(SynthError::DimensionMismatch {
            left: "generated image".into(),
            left_size: (height as usize, width as usize),
            right: "label".into(),
            right_size: (label_height, label_width),
        });
    }

    let mut total = RgbAccumulator::default();
    let mut counts = [[0_u64; HISTOGRAM_BINS]; 3];
    let mut classes = BTreeMap::<u32, RgbAccumulator>::new();

    for (x, y, pixel) in image.enumerate_pixels() {
        let value = pixel.0.map(|v| v as f64 / 255.0);
        total.push(value);
        classes
            .entry(labels[[y as usize, x as usize]])
            .or_default()
            .push(value);

        for c in 0..3 {
            let bin = ((value[c] * HISTOGRAM_BINS as f64) as usize).min(HISTOGRAM_BINS - 1);
            counts[c][bin] += 1;
        }
    }

    let scale = HISTOGRAM_BINS as f64 / total.count.max(1) as f64;
    let histogram = counts.map(|bins| {
        bins.iter()
            .map(|&n| n as f64 * scale)
            .collect::<Vec<_>>()
    });

    Ok((total, histogram, classes))
}

/// A generated image with the tile and style read from its path.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GeneratedImage {
    path: PathBuf,
    tile: String,
    style: Option<usize>,
}

/// Images directly inside `dir`, named `tile.png` or `tile_style{k}.png`,
/// followed by the images of its `Style_{k+1}` subdirectories.
fn generated_images(dir: &Path) -> Result<Vec<GeneratedImage>, SynthError> {
    let stem_of = |path: &Path| {
        path.file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or_default()
            .to_owned()
    };

    let mut images = raster::list_files(dir, GENERATED_EXTENSIONS)?
        .into_iter()
        .map(|path| {
            let stem = stem_of(&path);
            let (tile, style) = naming::strip_style_suffix(&stem);
            GeneratedImage {
                tile: tile.to_owned(),
                style,
                path,
            }
        })
        .collect::<Vec<_>>();

    for subdir in raster::list_subdirs(dir)? {
        let style = match subdir
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(naming::parse_style_dir)
        {
            Some(style) => style,
            None => continue,
        };
        for path in raster::list_files(&subdir, GENERATED_EXTENSIONS)? {
            images.push(GeneratedImage {
                tile: stem_of(&path),
                style: Some(style),
                path,
            });
        }
    }

    Ok(images)
}

/// Compares every generated image with the label raster sharing its tile
/// name. Images are read from `generated_dir`, ignoring a trailing
/// `_style{k}`, and from its `Style_{k+1}` subdirectories.
pub fn validate_dir(generated_dir: &Path, label_dir: &Path) -> Result<ValidationReport, SynthError> {
    let labels = raster::list_files(label_dir, RASTER_EXTENSIONS)?
        .into_iter()
        .filter_map(|path| {
            let stem = path.file_stem()?.to_str()?.to_owned();
            Some((stem, path))
        })
        .collect::<BTreeMap<_, _>>();
    let generated = generated_images(generated_dir)?;

    let mut tiles = vec![];
    let mut unmatched = vec![];
    let mut failed = vec![];
    let mut pooled = BTreeMap::<u32, RgbAccumulator>::new();
    let mut label_counts = BTreeMap::<u32, u64>::new();
    let mut counted_labels = BTreeSet::<PathBuf>::new();

    for GeneratedImage { path, tile, style } in generated {
        let label_path = match labels.get(&tile) {
            Some(label_path) => label_path,
            None => {
                warn!("no label raster for {}", path.display());
                unmatched.push(path);
                continue;
            }
        };

        let (label, (total, histogram, classes)) = match load_and_measure(&path, label_path) {
            Ok(output) => output,
            Err(err) => {
                warn!("cannot validate {}: {}", path.display(), err);
                failed.push(FailedTile {
                    generated: path,
                    reason: err.to_string(),
                });
                continue;
            }
        };

        if counted_labels.insert(label_path.clone()) {
            for &id in label.ids.iter() {
                *label_counts.entry(id).or_default() += 1;
            }
        }
        for (id, acc) in &classes {
            pooled.entry(*id).or_default().merge(acc);
        }

        let ClassStats {
            mean,
            variance,
            ..
        } = total.finish();
        tiles.push(TileReport {
            generated: path.clone(),
            label: label_path.clone(),
            tile,
            style,
            mean,
            std: variance.map(f64::sqrt),
            histogram,
            classes: classes
                .iter()
                .map(|(&id, acc)| (id, acc.finish()))
                .collect(),
        });
    }

    let aggregate = (!tiles.is_empty()).then(|| {
        let n = tiles.len() as f64;
        let average = |select: fn(&TileReport) -> [f64; 3]| {
            let mut out = [0.0; 3];
            for tile in &tiles {
                let values = select(tile);
                for c in 0..3 {
                    out[c] += values[c] / n;
                }
            }
            out
        };

        let total_labels = label_counts.values().sum::<u64>().max(1) as f64;
        AggregateReport {
            matched: tiles.len(),
            mean_of_means: average(|tile| tile.mean),
            mean_of_stds: average(|tile| tile.std),
            classes: pooled.iter().map(|(&id, acc)| (id, acc.finish())).collect(),
            label_distribution: label_counts
                .iter()
                .map(|(&id, &count)| {
                    let share = LabelShare {
                        count,
                        probability: count as f64 / total_labels,
                    };
                    (id, share)
                })
                .collect(),
        }
    });

    Ok(ValidationReport {
        tiles,
        unmatched,
        failed,
        aggregate,
    })
}

fn load_and_measure(
    generated: &Path,
    label_path: &Path,
) -> Result<(LabelRaster, TileStats), SynthError> {
    let image = image::open(generated)
        .map_err(|err| SynthError::input(generated, err))?
        .to_rgb8();
    let label = LabelRaster::open_raw(label_path)?;
    let stats = tile_stats(&image, &label.ids)?;
    Ok((label, stats))
}

fn fmt_rgb(values: &[f64; 3]) -> String {
    format!("[{:.4}, {:.4}, {:.4}]", values[0], values[1], values[2])
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for tile in &self.tiles {
            writeln!(
                f,
                "{} (tile {}{})",
                tile.generated.display(),
                tile.tile,
                tile.style
                    .map(|style| format!(", style {}", style))
                    .unwrap_or_default()
            )?;
            writeln!(f, "  mean {}  std {}", fmt_rgb(&tile.mean), fmt_rgb(&tile.std))?;
            for (id, stats) in &tile.classes {
                writeln!(
                    f,
                    "  class {:>3}: {:>8} px  mean {}  var {}",
                    id,
                    stats.count,
                    fmt_rgb(&stats.mean),
                    fmt_rgb(&stats.variance)
                )?;
            }
        }

        for path in &self.unmatched {
            writeln!(f, "unmatched: {}", path.display())?;
        }
        for failed in &self.failed {
            writeln!(f, "failed: {}: {}", failed.generated.display(), failed.reason)?;
        }

        match &self.aggregate {
            Some(aggregate) => {
                writeln!(f, "aggregate over {} tiles", aggregate.matched)?;
                writeln!(f, "  mean of means {}", fmt_rgb(&aggregate.mean_of_means))?;
                writeln!(f, "  mean of stds  {}", fmt_rgb(&aggregate.mean_of_stds))?;
                for (id, stats) in &aggregate.classes {
                    writeln!(
                        f,
                        "  class {:>3}: {:>8} px  mean {}  var {}",
                        id,
                        stats.count,
                        fmt_rgb(&stats.mean),
                        fmt_rgb(&stats.variance)
                    )?;
                }
                writeln!(f, "label distribution")?;
                for (id, share) in &aggregate.label_distribution {
                    writeln!(
                        f,
                        "  class {:>3}: {:>8} px  {:.4}",
                        id, share.count, share.probability
                    )?;
                }
            }
            None => writeln!(f, "no generated image matched a label raster")?,
        }

        Ok(())
    }
}
