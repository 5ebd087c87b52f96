use crate::{common::*, config::CheckpointConfig, error::SynthError};

/// Label value marking pixels of unknown class in the source maps.
pub const UNKNOWN_LABEL: u32 = 255;

/// Extensions accepted for label and instance rasters.
pub const RASTER_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "tif", "tiff"];

/// Per-pixel semantic class ids of one tile, indexed `[y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelRaster {
    pub ids: Array2<u32>,
}

/// Per-pixel instance ids of one tile, indexed `[y, x]`.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceRaster {
    pub ids: Array2<u32>,
}

impl LabelRaster {
    pub fn new(ids: Array2<u32>) -> Self {
        Self { ids }
    }

    /// Reads the label map as stored, without preprocessing.
    pub fn open_raw<P>(path: P) -> Result<Self, SynthError>
    where
        P: AsRef<Path>,
    {
        Ok(Self::new(read_grid(path.as_ref())?))
    }

    /// Reads the label map and prepares it the way the checkpoint was
    /// trained: resized to the crop size and unknown pixels moved to the
    /// `label_nc` class.
    pub fn open<P>(path: P, config: &CheckpointConfig) -> Result<Self, SynthError>
    where
        P: AsRef<Path>,
    {
        let ids = preprocess(read_grid(path.as_ref())?, config);
        let unknown_class = config.label_nc as u32;
        let ids = ids.mapv_into(|id| if id == UNKNOWN_LABEL { unknown_class } else { id });
        Ok(Self::new(ids))
    }

    /// `(height, width)`
    pub fn size(&self) -> (usize, usize) {
        self.ids.dim()
    }

    pub fn max_id(&self) -> Option<u32> {
        self.ids.iter().copied().max()
    }
}

impl InstanceRaster {
    pub fn new(ids: Array2<u32>) -> Self {
        Self { ids }
    }

    pub fn open<P>(path: P, config: &CheckpointConfig) -> Result<Self, SynthError>
    where
        P: AsRef<Path>,
    {
        let ids = preprocess(read_grid(path.as_ref())?, config);
        Ok(Self::new(ids))
    }

    /// `(height, width)`
    pub fn size(&self) -> (usize, usize) {
        self.ids.dim()
    }
}

fn preprocess(ids: Array2<u32>, config: &CheckpointConfig) -> Array2<u32> {
    match config.target_raster_size() {
        Some(size) if size != ids.dim() => resize_nearest(&ids, size),
        _ => ids,
    }
}

/// Decodes the first channel of an image into an id grid. 16-bit images
/// keep their full value range.
pub fn read_grid(path: &Path) -> Result<Array2<u32>, SynthError> {
    let image = ImageReader::open(path)
        .map_err(|err| SynthError::input(path, err))?
        .with_guessed_format()
        .map_err(|err| SynthError::input(path, err))?
        .decode()
        .map_err(|err| SynthError::input(path, err))?;
    let (width, height) = image.dimensions();

    let grid = match &image {
        DynamicImage::ImageLuma16(_)
        | DynamicImage::ImageLumaA16(_)
        | DynamicImage::ImageRgb16(_)
        | DynamicImage::ImageRgba16(_) => {
            let buf = image.to_rgba16();
            Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                buf.get_pixel(x as u32, y as u32).0[0] as u32
            })
        }
        DynamicImage::ImageLuma8(buf) => {
            Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                buf.get_pixel(x as u32, y as u32).0[0] as u32
            })
        }
        other => {
            let buf = other.to_rgba8();
            Array2::from_shape_fn((height as usize, width as usize), |(y, x)| {
                buf.get_pixel(x as u32, y as u32).0[0] as u32
            })
        }
    };

    Ok(grid)
}

/// Nearest-neighbour resampling to `(height, width)`, sampling source
/// pixel centers.
pub fn resize_nearest(ids: &Array2<u32>, (height, width): (usize, usize)) -> Array2<u32> {
    let (src_height, src_width) = ids.dim();
    let source_index = |dst: usize, dst_len: usize, src_len: usize| {
        let index = ((dst as f64 + 0.5) * src_len as f64 / dst_len as f64).floor() as usize;
        index.min(src_len - 1)
    };

    Array2::from_shape_fn((height, width), |(y, x)| {
        ids[[
            source_index(y, height, src_height),
            source_index(x, width, src_width),
        ]]
    })
}

/// Lists the files directly inside `dir` whose extension is one of
/// `extensions`, sorted by path.
pub fn list_files(dir: &Path, extensions: &[&str]) -> Result<Vec<PathBuf>, SynthError> {
    list_entries(dir, |path| path.is_file() && has_extension(path, extensions))
}

/// Lists the directories directly inside `dir`, sorted by path.
pub fn list_subdirs(dir: &Path) -> Result<Vec<PathBuf>, SynthError> {
    list_entries(dir, Path::is_dir)
}

fn list_entries<F>(dir: &Path, mut keep: F) -> Result<Vec<PathBuf>, SynthError>
where
    F: FnMut(&Path) -> bool,
{
    if !dir.is_dir() {
        return Err(SynthError::input(dir, "not a directory"));
    }
    let dir_str = dir
        .to_str()
        .ok_or_else(|| SynthError::input(dir, "path is not valid UTF-8"))?;
    let pattern = format!("{}/*", glob::Pattern::escape(dir_str));

    let mut paths = vec![];
    for entry in glob::glob(&pattern).map_err(|err| SynthError::input(dir, err))? {
        let path = entry.map_err(|err| SynthError::input(dir, err))?;
        if keep(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    Ok(paths)
}

/// Whether the path has one of [`RASTER_EXTENSIONS`], ignoring case.
pub fn is_raster_file(path: &Path) -> bool {
    has_extension(path, RASTER_EXTENSIONS)
}

pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            extensions.iter().any(|candidate| *candidate == ext)
        })
        .unwrap_or(false)
}
