use crate::common::*;

lazy_static::lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
    static ref STYLE_SUFFIX: Regex = Regex::new(r"^(.+)_style(\d+)$").unwrap();
    static ref STYLE_DIR: Regex = Regex::new(r"^Style_(\d+)$").unwrap();
}

/// Which digit runs of a file stem are taken as tile coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordMode {
    FirstTwo,
    LastTwo,
}

impl FromStr for CoordMode {
    type Err = Error;

    fn from_str(text: &str) -> Fallible<Self> {
        match text {
            "first2" => Ok(Self::FirstTwo),
            "last2" => Ok(Self::LastTwo),
            _ => bail!("invalid coordinate mode '{}', expect 'first2' or 'last2'", text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordFormat {
    pub mode: CoordMode,
    pub pad: usize,
}

impl CoordFormat {
    /// Rewrites a stem as `XXXXX_YYYYY`. Stems with fewer than two digit
    /// runs are kept.
    pub fn format(&self, stem: &str) -> String {
        let numbers = DIGIT_RUN
            .find_iter(stem)
            .map(|found| found.as_str())
            .collect::<Vec<_>>();

        let (first, second) = match (self.mode, numbers.as_slice()) {
            (_, numbers) if numbers.len() < 2 => return stem.to_owned(),
            (CoordMode::FirstTwo, numbers) => (numbers[0], numbers[1]),
            (CoordMode::LastTwo, numbers) => (numbers[numbers.len() - 2], numbers[numbers.len() - 1]),
        };

        format!(
            "{:0>pad$}_{:0>pad$}",
            first,
            second,
            pad = self.pad
        )
    }
}

/// How generated images are named on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputNaming {
    pub style_subfolders: bool,
    pub coords: Option<CoordFormat>,
}

impl OutputNaming {
    pub fn tile_name(&self, stem: &str) -> String {
        match &self.coords {
            Some(coords) => coords.format(stem),
            None => stem.to_owned(),
        }
    }

    /// Paths of the images produced for one tile, in style order.
    pub fn output_paths(&self, output_dir: &Path, stem: &str, styles: usize) -> Vec<PathBuf> {
        let name = self.tile_name(stem);

        (0..styles)
            .map(|index| {
                if self.style_subfolders {
                    output_dir
                        .join(format!("Style_{}", index + 1))
                        .join(format!("{}.png", name))
                } else if styles == 1 {
                    output_dir.join(format!("{}.png", name))
                } else {
                    output_dir.join(format!("{}_style{}.png", name, index))
                }
            })
            .collect()
    }
}

/// Splits `name_style3` into `("name", Some(3))`; other stems are returned
/// unchanged.
pub fn strip_style_suffix(stem: &str) -> (&str, Option<usize>) {
    STYLE_SUFFIX
        .captures(stem)
        .and_then(|captures| {
            let base = captures.get(1)?.as_str();
            let index = captures.get(2)?.as_str().parse().ok()?;
            Some((base, Some(index)))
        })
        .unwrap_or((stem, None))
}

/// Style index of a `Style_{k+1}` output subdirectory name.
pub fn parse_style_dir(name: &str) -> Option<usize> {
    let number: usize = STYLE_DIR.captures(name)?.get(1)?.as_str().parse().ok()?;
    number.checked_sub(1)
}

/// Reads `(x, y)` from stems ending in `_<x>_<y>`.
pub fn parse_xy(stem: &str) -> Option<(usize, usize)> {
    let mut parts = stem.rsplit('_');
    let y = parts.next()?;
    let x = parts.next()?;

    let is_number = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    if !is_number(x) || !is_number(y) {
        return None;
    }
    Some((x.parse().ok()?, y.parse().ok()?))
}
