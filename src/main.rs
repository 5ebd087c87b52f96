use satsynth::{
    common::*,
    config::{Checkpoint, DeviceSpec},
    driver::{self, BatchOptions, InferenceContext, InferenceOptions},
    mosaic::{self, TileOrder},
    naming::{CoordFormat, CoordMode, OutputNaming},
    validate,
};

lazy_static::lazy_static! {
    static ref SHUTDOWN_FLAG: AtomicBool = AtomicBool::new(false);
}

/// Synthetic satellite imagery from semantic label maps and instance rasters.
#[derive(FromArgs)]
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Infer(InferArgs),
    Validate(ValidateArgs),
    Stitch(StitchArgs),
}

/// Generate images for every label/instance pair of a directory.
#[derive(FromArgs)]
#[argh(subcommand, name = "infer")]
struct InferArgs {
    /// the directory containing trained experiments.
    #[argh(option)]
    checkpoints_dir: PathBuf,
    /// the experiment name under the checkpoints directory.
    #[argh(option)]
    experiment_name: String,
    /// the epoch of the weights to load.
    #[argh(option, default = "String::from(\"latest\")")]
    which_epoch: String,
    /// the directory of semantic label rasters.
    #[argh(option)]
    label_dir: PathBuf,
    /// the directory of instance rasters.
    #[argh(option)]
    instance_dir: PathBuf,
    /// the directory generated images are written to.
    #[argh(option)]
    output_dir: PathBuf,
    /// the device to run on, such as 'cpu' or 'cuda(0)'.
    #[argh(option, default = "DeviceSpec::default()")]
    device: DeviceSpec,
    /// number of styles generated per tile.
    #[argh(option, default = "1")]
    num_styles: usize,
    /// sample a random latent vector per style.
    #[argh(switch)]
    random_latent: bool,
    /// seed of the random number generator.
    #[argh(option, default = "42")]
    seed: i64,
    /// write style k to the 'Style_{k+1}' subdirectory.
    #[argh(switch)]
    style_subfolders: bool,
    /// name outputs by the tile coordinates found in the file name.
    #[argh(switch)]
    coord_names: bool,
    /// which digit runs are coordinates, 'last2' or 'first2'.
    #[argh(option, default = "CoordMode::LastTwo")]
    coord_mode: CoordMode,
    /// zero padding width of coordinate names.
    #[argh(option, default = "5")]
    coord_pad: usize,
    /// skip tiles whose outputs already exist.
    #[argh(switch)]
    skip_existing: bool,
}

/// Compute basic statistics of generated images against their labels.
/// Images are matched to labels by file stem, so outputs renamed by
/// coordinates only match labels that carry the same names.
#[derive(FromArgs)]
#[argh(subcommand, name = "validate")]
struct ValidateArgs {
    /// the directory of generated images, including its 'Style_{k+1}'
    /// subdirectories.
    #[argh(option)]
    generated_dir: PathBuf,
    /// the directory of the label rasters used for generation.
    #[argh(option)]
    label_dir: PathBuf,
    /// also write the report as JSON to this file.
    #[argh(option)]
    report_json: Option<PathBuf>,
}

/// Stitch generated tiles into one mosaic.
#[derive(FromArgs)]
#[argh(subcommand, name = "stitch")]
struct StitchArgs {
    /// the directory of PNG tiles.
    #[argh(option)]
    tiles_dir: PathBuf,
    /// the output image path.
    #[argh(option)]
    out_path: PathBuf,
    /// tiles per row when names carry no coordinates.
    #[argh(option)]
    tiles_per_row: Option<NonZeroUsize>,
    /// sequential order when names carry no coordinates, 'row' or 'col'.
    #[argh(option, default = "TileOrder::RowMajor")]
    order: TileOrder,
}

fn main() -> Fallible<()> {
    if std::env::var_os("RUST_LOG").is_none() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init();

    let args: Args = argh::from_env();

    match args.command {
        Command::Infer(args) => run_infer(args),
        Command::Validate(args) => run_validate(args),
        Command::Stitch(args) => run_stitch(args),
    }
}

fn run_infer(args: InferArgs) -> Fallible<()> {
    let InferArgs {
        checkpoints_dir,
        experiment_name,
        which_epoch,
        label_dir,
        instance_dir,
        output_dir,
        device,
        num_styles,
        random_latent,
        seed,
        style_subfolders,
        coord_names,
        coord_mode,
        coord_pad,
        skip_existing,
    } = args;
    ensure!(num_styles > 0, "--num-styles must be at least 1");

    // Set signal handler
    ctrlc::set_handler(|| {
        warn!("Interrupted by user, stopping after the current tile");
        SHUTDOWN_FLAG.store(true, Ordering::SeqCst);
    })?;

    info!("running on {}", device);
    let checkpoint = Checkpoint::new(&checkpoints_dir, &experiment_name, &which_epoch);
    let options = InferenceOptions {
        device: device.0,
        seed,
        num_styles,
        random_latent,
    };
    let ctx = InferenceContext::load(&checkpoint, &options)
        .with_context(|| format!("cannot load checkpoint {}", checkpoint.dir.display()))?;

    let batch = BatchOptions {
        label_dir,
        instance_dir,
        output_dir,
        naming: OutputNaming {
            style_subfolders,
            coords: coord_names.then(|| CoordFormat {
                mode: coord_mode,
                pad: coord_pad,
            }),
        },
        skip_existing,
    };
    let summary = driver::run_batch(&ctx, &batch, &SHUTDOWN_FLAG)?;

    info!("batch finished");
    println!("{}", summary);
    Ok(())
}

fn run_validate(args: ValidateArgs) -> Fallible<()> {
    let ValidateArgs {
        generated_dir,
        label_dir,
        report_json,
    } = args;

    let report = validate::validate_dir(&generated_dir, &label_dir)?;
    print!("{}", report);

    if let Some(path) = report_json {
        report.save_json(&path)?;
        info!("saved report to {}", path.display());
    }
    Ok(())
}

fn run_stitch(args: StitchArgs) -> Fallible<()> {
    let StitchArgs {
        tiles_dir,
        out_path,
        tiles_per_row,
        order,
    } = args;

    mosaic::stitch(&tiles_dir, &out_path, tiles_per_row, order)?;
    Ok(())
}
