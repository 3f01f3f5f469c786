//! bboxee: bounding-box annotation for camera-trap imagery.
//!
//! bboxee keeps one annotation document per image directory, lets an
//! operator draw and label boxes (by hand or seeded from a detector), and
//! turns curated annotations into training datasets.
//!
//! # Modules
//!
//! - [`schema`]: annotation documents, configuration, label remaps and maps
//! - [`image_source`]: image listing, decoding, masks and tone mapping
//! - [`detector`]: model-family adapters and the detector job
//! - [`session`]: the open document and its editing operations
//! - [`editor`]: the pointer/keyboard state machine for box editing
//! - [`filter`]: document discovery, filtering and remapping
//! - [`export`]: YOLO, TFRecord, COCO and package dataset writers
//! - [`accuracy`]: predicted-versus-reference comparison
//! - [`timelapse`]: MegaDetector batch output conversion
//! - [`worker`]: background jobs with progress and cancellation
//! - [`error`]: error types for bboxee operations

pub mod accuracy;
pub mod detector;
pub mod editor;
pub mod error;
pub mod export;
pub mod filter;
pub mod image_source;
pub mod schema;
pub mod session;
pub mod timelapse;
pub mod worker;

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use error::BboxeeError;

use accuracy::AccuracyOptions;
use detector::{BackendRegistry, DetectorConfig, ModelFamily};
use export::{ExportFormat, ExportOptions, Exporter};
use filter::FilterOptions;
use schema::io_bbx::read_bbx;
use schema::LabelRemap;

/// The bboxee CLI application.
#[derive(Parser)]
#[command(name = "bboxee")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Run a detector over every image directory under a root.
    Annotate(AnnotateArgs),
    /// Convert every annotation document under a root to MegaDetector JSON.
    ToTimelapse(ToTimelapseArgs),
    /// Write annotation documents from a MegaDetector batch output file.
    FromMegadetector(FromMegadetectorArgs),
    /// Summarize the annotation documents under a root.
    Summary(SummaryArgs),
    /// Export the annotation documents under a root as a training dataset.
    Export(ExportArgs),
    /// Compare a predicted document against a reference document.
    Accuracy(AccuracyArgs),
}

#[derive(clap::Args)]
struct AnnotateArgs {
    /// Directory tree of images.
    root: PathBuf,

    /// Model file or saved-model directory.
    model: PathBuf,

    /// Label map in protobuf text form.
    label_map: PathBuf,

    /// Minimum detection confidence, in [0, 1].
    #[arg(value_parser = parse_unit_interval)]
    confidence: f64,

    /// Model family ('frozen-graph', 'saved-model', 'yolov5', 'yolov9');
    /// guessed from the model path when omitted.
    #[arg(long)]
    family: Option<String>,
}

#[derive(clap::Args)]
struct ToTimelapseArgs {
    /// Directory tree holding `.bbx` files.
    root: PathBuf,

    /// Output file; standard output when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(clap::Args)]
struct FromMegadetectorArgs {
    /// MegaDetector batch output JSON.
    input: PathBuf,

    /// Minimum detection confidence, in [0, 1].
    #[arg(value_parser = parse_unit_interval)]
    confidence: f64,
}

#[derive(clap::Args)]
struct SummaryArgs {
    /// Directory tree holding `.bbx` files.
    root: PathBuf,

    /// Output format for the summary ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

#[derive(clap::Args)]
struct ExportArgs {
    /// Directory tree holding `.bbx` files.
    root: PathBuf,

    /// Dataset format ('yolov5', 'yolov9', 'tfrecord', 'coco', 'package').
    format: String,

    /// Output directory; created if missing.
    output: PathBuf,

    /// Label remap JSON applied before export.
    #[arg(long)]
    remap: Option<PathBuf>,

    /// Fraction of images held out for validation.
    #[arg(long, default_value_t = 0.1, value_parser = parse_unit_interval)]
    split: f64,

    /// TFRecord shards per split.
    #[arg(long, default_value_t = 1)]
    shards: usize,

    /// Re-encode every image, dropping metadata.
    #[arg(long)]
    strip_metadata: bool,

    /// Shuffle seed for a reproducible split.
    #[arg(long)]
    seed: Option<u64>,

    /// Keep only boxes whose label contains this text.
    #[arg(long, default_value = "")]
    label: String,

    /// Match --label case-sensitively.
    #[arg(long)]
    case_sensitive: bool,

    /// Match --label against the whole label.
    #[arg(long)]
    exact: bool,

    /// Keep only images flagged for review.
    #[arg(long)]
    review_only: bool,

    #[arg(long)]
    exclude_occluded: bool,

    #[arg(long)]
    exclude_truncated: bool,

    #[arg(long)]
    exclude_difficult: bool,
}

#[derive(clap::Args)]
struct AccuracyArgs {
    /// Reference (ground truth) `.bbx` file.
    reference: PathBuf,

    /// Predicted `.bbx` file.
    predicted: PathBuf,

    /// Label remap JSON applied to both sides.
    #[arg(long)]
    remap: Option<PathBuf>,

    /// Ignore predicted boxes below this confidence.
    #[arg(long, default_value_t = 0.0, value_parser = parse_unit_interval)]
    threshold: f64,

    /// Output format for the report ('text' or 'json').
    #[arg(long, default_value = "text")]
    output: String,
}

fn parse_unit_interval(raw: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a number"))?;
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{value} is outside [0, 1]"))
    }
}

/// Run the bboxee CLI without any inference runtime.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), BboxeeError> {
    run_with_registry(&BackendRegistry::new())
}

/// Run the bboxee CLI with the inference backends in `registry`.
///
/// Applications that link an ML runtime register it here so `annotate` can
/// use it.
pub fn run_with_registry(registry: &BackendRegistry) -> Result<(), BboxeeError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Annotate(args)) => run_annotate(args, registry),
        Some(Commands::ToTimelapse(args)) => run_to_timelapse(args),
        Some(Commands::FromMegadetector(args)) => run_from_megadetector(args),
        Some(Commands::Summary(args)) => run_summary(args),
        Some(Commands::Export(args)) => run_export(args),
        Some(Commands::Accuracy(args)) => run_accuracy(args),
        None => {
            println!("bboxee {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Bounding-box annotation for camera-trap imagery.");
            println!();
            println!("Run 'bboxee --help' for usage information.");
            Ok(())
        }
    }
}

fn run_annotate(args: AnnotateArgs, registry: &BackendRegistry) -> Result<(), BboxeeError> {
    if !args.label_map.is_file() {
        return Err(BboxeeError::InvalidArgument(format!(
            "label map {} does not exist",
            args.label_map.display()
        )));
    }
    if !args.model.exists() {
        return Err(BboxeeError::InvalidArgument(format!(
            "model {} does not exist",
            args.model.display()
        )));
    }
    let family = match args.family {
        Some(name) => name.parse()?,
        None => ModelFamily::from_model_path(&args.model),
    };

    let config = DetectorConfig::for_family(family, args.model, Some(args.label_map));
    let written = detector::annotate_tree(&args.root, config, registry, args.confidence)?;
    println!("Wrote {} annotation documents", written.len());
    Ok(())
}

fn run_to_timelapse(args: ToTimelapseArgs) -> Result<(), BboxeeError> {
    let output = timelapse::to_timelapse(&args.root)?;
    let target = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from("<stdout>"));
    let json = serde_json::to_string_pretty(&output).map_err(|source| BboxeeError::JsonWrite {
        path: target.clone(),
        source,
    })?;

    match args.output {
        Some(path) => fs::write(&path, json).map_err(|err| BboxeeError::from_io(&path, err))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{json}")?;
        }
    }
    Ok(())
}

fn run_from_megadetector(args: FromMegadetectorArgs) -> Result<(), BboxeeError> {
    let written = timelapse::from_megadetector(&args.input, args.confidence)?;
    for path in &written {
        println!("{}", path.display());
    }
    Ok(())
}

fn run_summary(args: SummaryArgs) -> Result<(), BboxeeError> {
    let scan = filter::scan(&args.root)?;
    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&scan.summary).map_err(|source| {
                BboxeeError::JsonWrite {
                    path: PathBuf::from("<stdout>"),
                    source,
                }
            })?;
            println!("{json}");
        }
        _ => print!("{}", scan.summary),
    }
    Ok(())
}

fn run_export(args: ExportArgs) -> Result<(), BboxeeError> {
    let format: ExportFormat = args.format.parse()?;
    let remap = match &args.remap {
        Some(path) => LabelRemap::from_path(path)?,
        None => LabelRemap::new(),
    };

    let scan = filter::scan(&args.root)?;
    let selection = filter::filter(
        &scan.documents,
        &FilterOptions {
            label: args.label,
            case_sensitive: args.case_sensitive,
            exact: args.exact,
            review_only: args.review_only,
            exclude_occluded: args.exclude_occluded,
            exclude_truncated: args.exclude_truncated,
            exclude_difficult: args.exclude_difficult,
        },
    );

    fs::create_dir_all(&args.output).map_err(|err| BboxeeError::from_io(&args.output, err))?;
    let options = ExportOptions {
        validation_split: args.split,
        shards: args.shards,
        strip_metadata: args.strip_metadata,
        seed: args.seed,
    };
    let exporter = Exporter::new(&args.output, selection, remap, options);
    let exported = exporter
        .start(format)?
        .wait(|index, name, split| log::debug!("[{index}] {name} -> {}", split.dir_name()))
        .ok_or_else(|| BboxeeError::InvalidArgument("export worker stopped unexpectedly".into()))??;

    println!(
        "Exported {} training and {} validation images to {}",
        exported.train,
        exported.validation,
        args.output.display()
    );
    Ok(())
}

fn run_accuracy(args: AccuracyArgs) -> Result<(), BboxeeError> {
    let reference = read_bbx(&args.reference)?;
    let predicted = read_bbx(&args.predicted)?;
    let remap = match &args.remap {
        Some(path) => LabelRemap::from_path(path)?,
        None => LabelRemap::new(),
    };

    let report = accuracy::evaluate(
        &reference,
        &predicted,
        &AccuracyOptions {
            remap,
            threshold: args.threshold,
        },
    );

    match args.output.as_str() {
        "json" => {
            let json = serde_json::to_string_pretty(&report).map_err(|source| {
                BboxeeError::JsonWrite {
                    path: PathBuf::from("<stdout>"),
                    source,
                }
            })?;
            println!("{json}");
        }
        _ => print!("{report}"),
    }
    Ok(())
}
