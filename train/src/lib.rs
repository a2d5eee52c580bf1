//! The training program for the two-stage detector.

pub mod common;
pub mod data;
pub mod logging;
pub mod trainer;
pub mod utils;

use crate::{
    common::*,
    data::{load_dataset, AnnotationFormat, Dataset, ImageRecord},
    trainer::Trainer,
};

/// Train a two-stage object detector.
#[derive(Debug, Clone, StructOpt)]
pub struct Args {
    /// Path to the training data.
    #[structopt(short = "p", long)]
    pub path: PathBuf,
    /// Annotation parser to use, one of 'pascal_voc' or 'simple'.
    #[structopt(short = "o", long = "parser", default_value = "pascal_voc")]
    pub parser: String,
    /// Number of regions of interest per iteration. Higher means more
    /// memory use.
    #[structopt(short = "n", long, default_value = "32")]
    pub num_rois: usize,
    /// Augment with horizontal flips in training.
    #[structopt(long = "hf")]
    pub horizontal_flips: bool,
    /// Augment with vertical flips in training.
    #[structopt(long = "vf")]
    pub vertical_flips: bool,
    /// Augment with 90 degree rotations in training.
    #[structopt(long = "rot-90")]
    pub rot_90: bool,
    /// Number of epochs.
    #[structopt(long, default_value = "2000")]
    pub num_epochs: usize,
    /// Location to store the training metadata, to be reused when testing.
    #[structopt(long, default_value = "config.json")]
    pub config_filename: PathBuf,
    /// Output path for weights.
    #[structopt(long, default_value = "model_frcnn.ot")]
    pub output_weight_path: PathBuf,
    /// Input path for weights. If not specified, training starts from
    /// random initialization.
    #[structopt(long)]
    pub input_weight_path: Option<PathBuf>,
    /// Log machine-readable epoch summaries instead of narrative ones.
    #[structopt(long)]
    pub quiet: bool,
}

/// The entry of the training program.
pub async fn start(args: Args) -> Result<()> {
    let (config, records) = setup(&args)?;
    let config = Arc::new(config);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after the current iteration");
                cancel.store(true, Ordering::Relaxed);
            }
        });
    }

    let worker = tokio::task::spawn_blocking(move || -> Result<()> {
        let mut trainer = Trainer::new(config, records)?;
        trainer.run(&cancel)
    });
    worker.await??;

    Ok(())
}

/// Parse the dataset, derive the class mapping and persist the config.
/// Any failure here is fatal; the loop is never entered.
fn setup(args: &Args) -> Result<(Config, Vec<ImageRecord>)> {
    ensure!(
        args.path.exists(),
        "path to training data '{}' does not exist",
        args.path.display()
    );
    let format: AnnotationFormat = args.parser.parse()?;

    let Dataset {
        mut records,
        class_counts,
    } = load_dataset(format, &args.path)?;
    ensure!(
        !records.is_empty(),
        "no image records found under '{}'",
        args.path.display()
    );

    info!("training images per class:");
    for (name, count) in &class_counts {
        info!("    {}: {}", name, count);
    }

    let mut class_mapping: IndexMap<String, usize> = class_counts
        .keys()
        .enumerate()
        .map(|(index, name)| (name.clone(), index))
        .collect();
    class_mapping.insert(
        Config::BACKGROUND_CLASS.to_owned(),
        class_mapping.len(),
    );
    info!("num classes (including bg) = {}", class_mapping.len());

    let config = Config {
        num_rois: args.num_rois,
        use_horizontal_flips: args.horizontal_flips,
        use_vertical_flips: args.vertical_flips,
        rot_90: args.rot_90,
        verbose: !args.quiet,
        num_epochs: args.num_epochs,
        model_path: args.output_weight_path.clone(),
        base_net_weights: args.input_weight_path.clone(),
        device: Device::cuda_if_available(),
        class_mapping,
        ..Config::default()
    };
    config.validate()?;

    config.store(&args.config_filename).with_context(|| {
        format!(
            "failed to write config to '{}'",
            args.config_filename.display()
        )
    })?;
    info!(
        "config has been written to '{}', and can be loaded when testing to ensure correct results",
        args.config_filename.display()
    );

    records.shuffle(&mut StdRng::from_entropy());

    Ok((config, records))
}
