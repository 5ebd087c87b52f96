use crate::{common::*, naming, raster};

/// Placement order of tiles without coordinates in their names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileOrder {
    RowMajor,
    ColumnMajor,
}

impl Default for TileOrder {
    fn default() -> Self {
        Self::RowMajor
    }
}

impl FromStr for TileOrder {
    type Err = Error;

    fn from_str(text: &str) -> Fallible<Self> {
        match text {
            "row" => Ok(Self::RowMajor),
            "col" => Ok(Self::ColumnMajor),
            _ => bail!("invalid tile order '{}', expect 'row' or 'col'", text),
        }
    }
}

/// Upper bound on the cells of a mosaic grid.
pub const MAX_GRID_CELLS: usize = 1 << 20;

/// A grid of tile paths, stored row by row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MosaicLayout {
    pub width: usize,
    pub height: usize,
    cells: Vec<Option<PathBuf>>,
}

impl MosaicLayout {
    /// Places each tile named `..._X_Y` at column X, row Y. Returns `None`
    /// when no tile carries coordinates.
    pub fn from_coordinates(tiles: &[PathBuf]) -> Fallible<Option<Self>> {
        let placed = tiles
            .iter()
            .filter_map(|path| {
                let stem = path.file_stem()?.to_str()?;
                let (x, y) = naming::parse_xy(stem)?;
                Some((x, y, path))
            })
            .collect::<Vec<_>>();

        let (width, height) = match (
            placed.iter().map(|(x, _, _)| x.saturating_add(1)).max(),
            placed.iter().map(|(_, y, _)| y.saturating_add(1)).max(),
        ) {
            (Some(width), Some(height)) => (width, height),
            _ => return Ok(None),
        };

        let mut cells = vec![None; grid_cells(width, height)?];
        for (x, y, path) in placed {
            cells[y * width + x] = Some(path.clone());
        }

        Ok(Some(Self {
            width,
            height,
            cells,
        }))
    }

    /// Lays tiles out in sorted order. Cells past the last tile repeat it.
    pub fn sequential(
        tiles: &[PathBuf],
        tiles_per_row: Option<NonZeroUsize>,
        order: TileOrder,
    ) -> Fallible<Self> {
        let last = tiles.last().ok_or_else(|| format_err!("no tiles to lay out"))?;
        let count = tiles.len();
        let width = tiles_per_row
            .map(|n| n.get())
            .unwrap_or_else(|| ((count as f64).sqrt() as usize).max(1));
        let height = (count - 1) / width + 1;

        let size = grid_cells(width, height)?;
        let mut cells = vec![None; size];
        for index in 0..size {
            let (x, y) = match order {
                TileOrder::RowMajor => (index % width, index / width),
                TileOrder::ColumnMajor => (index / height, index % height),
            };
            cells[y * width + x] = Some(tiles.get(index).unwrap_or(last).clone());
        }

        Ok(Self {
            width,
            height,
            cells,
        })
    }

    pub fn cell(&self, x: usize, y: usize) -> Option<&Path> {
        self.cells.get(y * self.width + x)?.as_deref()
    }

    /// Occupied cells as `(x, y, path)` in row-major order.
    pub fn placed(&self) -> impl Iterator<Item = (usize, usize, &Path)> + '_ {
        self.cells.iter().enumerate().filter_map(move |(index, cell)| {
            let path = cell.as_deref()?;
            Some((index % self.width, index / self.width, path))
        })
    }
}

fn grid_cells(width: usize, height: usize) -> Fallible<usize> {
    let cells = width
        .checked_mul(height)
        .filter(|&cells| cells <= MAX_GRID_CELLS)
        .ok_or_else(|| {
            format_err!(
                "a {} x {} tile grid exceeds the limit of {} cells",
                width,
                height,
                MAX_GRID_CELLS
            )
        })?;
    Ok(cells)
}

/// Pixel extent of `count` tiles of `tile_size` pixels each.
fn mosaic_extent(tile_size: u32, count: usize) -> Fallible<u32> {
    u32::try_from(count)
        .ok()
        .and_then(|count| tile_size.checked_mul(count))
        .ok_or_else(|| format_err!("{} tiles of {} pixels overflow the mosaic size", count, tile_size))
}

/// Stitches the PNG tiles of `tiles_dir` into one image saved at
/// `out_path`. Returns the layout that was used.
pub fn stitch(
    tiles_dir: &Path,
    out_path: &Path,
    tiles_per_row: Option<NonZeroUsize>,
    order: TileOrder,
) -> Fallible<MosaicLayout> {
    let tiles = raster::list_files(tiles_dir, &["png"])?;
    ensure!(!tiles.is_empty(), "no PNG tiles found in {}", tiles_dir.display());

    let layout = match MosaicLayout::from_coordinates(&tiles)? {
        Some(layout) => {
            info!(
                "coordinate layout: {} x {} tiles",
                layout.width, layout.height
            );
            layout
        }
        None => {
            let layout = MosaicLayout::sequential(&tiles, tiles_per_row, order)?;
            info!(
                "no coordinates in tile names, sequential layout: {} x {} tiles",
                layout.width, layout.height
            );
            layout
        }
    };

    let mosaic = render(&layout)?;
    if let Some(parent) = out_path.parent() {
        fs::create_dir_all(parent)?;
    }
    mosaic
        .save(out_path)
        .with_context(|| format!("cannot write mosaic to {}", out_path.display()))?;
    info!(
        "saved {} x {} mosaic to {}",
        mosaic.width(),
        mosaic.height(),
        out_path.display()
    );

    Ok(layout)
}

fn render(layout: &MosaicLayout) -> Fallible<RgbImage> {
    let mut tiles = layout.placed().filter_map(|(x, y, path)| match image::open(path) {
        Ok(tile) => Some((x, y, tile.to_rgb8())),
        Err(err) => {
            warn!("cannot read tile {}: {}", path.display(), err);
            None
        }
    });

    let first = tiles
        .next()
        .ok_or_else(|| format_err!("none of the tiles could be read"))?;
    let (tile_width, tile_height) = first.2.dimensions();
    let mut mosaic = RgbImage::new(
        mosaic_extent(tile_width, layout.width)?,
        mosaic_extent(tile_height, layout.height)?,
    );

    for (x, y, tile) in std::iter::once(first).chain(tiles) {
        let tile = if tile.dimensions() == (tile_width, tile_height) {
            tile
        } else {
            image::imageops::resize(&tile, tile_width, tile_height, FilterType::Triangle)
        };
        image::imageops::replace(
            &mut mosaic,
            &tile,
            x as i64 * tile_width as i64,
            y as i64 * tile_height as i64,
        );
    }

    Ok(mosaic)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn coordinate_layout_leaves_gaps() {
        let tiles = paths(&["t_0_0.png", "t_2_1.png", "stray.png"]);
        let layout = MosaicLayout::from_coordinates(&tiles).unwrap().unwrap();
        assert_eq!((layout.width, layout.height), (3, 2));
        assert_eq!(layout.cell(0, 0), Some(Path::new("t_0_0.png")));
        assert_eq!(layout.cell(2, 1), Some(Path::new("t_2_1.png")));
        assert_eq!(layout.cell(1, 0), None);
        assert_eq!(layout.placed().count(), 2);

        assert!(MosaicLayout::from_coordinates(&paths(&["a.png", "b.png"]))
            .unwrap()
            .is_none());
    }

    #[test]
    fn oversized_grids_are_rejected() {
        let tiles = paths(&["t_0_0.png", "x_99999_99999.png"]);
        assert!(MosaicLayout::from_coordinates(&tiles).is_err());

        let far = format!("t_{}_0.png", usize::MAX);
        let tiles = paths(&["t_0_0.png", far.as_str()]);
        assert!(MosaicLayout::from_coordinates(&tiles).is_err());

        let tiles_per_row = NonZeroUsize::new(usize::MAX);
        assert!(MosaicLayout::sequential(&paths(&["a"]), tiles_per_row, TileOrder::RowMajor).is_err());

        assert!(mosaic_extent(1 << 16, 1 << 16).is_err());
        assert_eq!(mosaic_extent(256, 4).unwrap(), 1024);
    }

    #[test]
    fn oversized_grid_fails_to_stitch() {
        let dir = tempdir().unwrap();
        RgbImage::new(2, 2).save(dir.path().join("x_99999_99999.png")).unwrap();
        let out = dir.path().join("mosaic.png");
        assert!(stitch(dir.path(), &out, None, TileOrder::RowMajor).is_err());
        assert!(!out.exists());
    }

    #[test]
    fn sequential_layout_repeats_last_tile() {
        let tiles = paths(&["a", "b", "c", "d", "e"]);

        let layout = MosaicLayout::sequential(&tiles, None, TileOrder::RowMajor).unwrap();
        assert_eq!((layout.width, layout.height), (2, 3));
        assert_eq!(layout.cell(1, 0), Some(Path::new("b")));
        assert_eq!(layout.cell(0, 2), Some(Path::new("e")));
        assert_eq!(layout.cell(1, 2), Some(Path::new("e")));

        let layout = MosaicLayout::sequential(&tiles, NonZeroUsize::new(3), TileOrder::ColumnMajor)
            .unwrap();
        assert_eq!((layout.width, layout.height), (3, 2));
        assert_eq!(layout.cell(0, 1), Some(Path::new("b")));
        assert_eq!(layout.cell(1, 0), Some(Path::new("c")));
        assert_eq!(layout.cell(2, 1), Some(Path::new("e")));

        assert!(MosaicLayout::sequential(&[], None, TileOrder::RowMajor).is_err());
    }

    #[test]
    fn stitch_by_coordinates() {
        let dir = tempdir().unwrap();
        RgbImage::from_pixel(2, 2, Rgb([255, 0, 0]))
            .save(dir.path().join("z_0_0.png"))
            .unwrap();
        // resized to the size of the first tile
        RgbImage::from_pixel(4, 4, Rgb([0, 0, 255]))
            .save(dir.path().join("z_1_1.png"))
            .unwrap();

        let out = dir.path().join("out/mosaic.png");
        let layout = stitch(dir.path(), &out, None, TileOrder::RowMajor).unwrap();
        assert_eq!((layout.width, layout.height), (2, 2));

        let mosaic = image::open(&out).unwrap().to_rgb8();
        assert_eq!(mosaic.dimensions(), (4, 4));
        assert_eq!(mosaic.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(mosaic.get_pixel(3, 0), &Rgb([0, 0, 0]));
        assert_eq!(mosaic.get_pixel(3, 3), &Rgb([0, 0, 255]));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempdir().unwrap();
        let out = dir.path().join("mosaic.png");
        assert!(stitch(dir.path(), &out, None, TileOrder::RowMajor).is_err());
    }
}
