use std::path::{Path, PathBuf};
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use ndarray::{Array4, Axis};
use serde_json::json;

use blazeface_core::detection::infrastructure::model_resolver;
use blazeface_core::shared::constants::IMAGE_EXTENSIONS;
use blazeface_core::{
    BlazeFaceConfig, BlazeFaceDetector, ComputeDevice, FaceBox, FaceDetector, ImageInput,
    ModelVariant,
};

/// BlazeFace face detection for images.
#[derive(Parser)]
#[command(name = "blazeface", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect faces and print their boxes.
    Detect(DetectArgs),
    /// Download a model variant into the cache without running it.
    Fetch(FetchArgs),
}

#[derive(Args)]
struct DetectArgs {
    /// Input image files.
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Use the back-camera model (256x256, smaller faces).
    #[arg(long)]
    back: bool,

    /// Compute device: auto, cpu, cuda[:N] or metal[:N].
    #[arg(long, default_value = "cpu")]
    device: String,

    /// Local weights file (.pth or .safetensors); requires --anchors.
    #[arg(long, requires = "anchors")]
    weights: Option<PathBuf>,

    /// Local anchor table (.npy); requires --weights.
    #[arg(long, requires = "weights")]
    anchors: Option<PathBuf>,

    /// Directory to cache downloaded models in.
    #[arg(long, conflicts_with = "weights")]
    cache_dir: Option<PathBuf>,

    /// Minimum detection score (0.0-1.0).
    #[arg(long, default_value = "0.5")]
    min_score: f32,

    /// IoU above which detections are merged (0.0-1.0).
    #[arg(long, default_value = "0.3")]
    min_suppression: f32,

    /// Stack all images into one batch; they must share a size.
    #[arg(long)]
    batch: bool,

    /// Print results as JSON.
    #[arg(long)]
    json: bool,

    /// Log model loading at info level.
    #[arg(long)]
    verbose: bool,
}

#[derive(Args)]
struct FetchArgs {
    /// Fetch the back-camera model instead of the front one.
    #[arg(long)]
    back: bool,

    /// Directory to cache downloaded models in.
    #[arg(long)]
    cache_dir: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(matches!(&cli.command, Command::Detect(args) if args.verbose));

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Command::Detect(args) => run_detect(&args),
        Command::Fetch(args) => run_fetch(&args),
    }
}

fn run_detect(args: &DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    validate(args)?;

    let detector = build_detector(args)?;
    let results = if args.batch {
        detect_batch(&detector, &args.images)?
    } else {
        args.images
            .iter()
            .map(|path| detector.detect_from_image(&ImageInput::from(path.as_path())))
            .collect::<Result<Vec<_>, _>>()?
    };

    if args.json {
        print_json(&args.images, &results)?;
    } else {
        print_text(&args.images, &results);
    }
    Ok(())
}

fn run_fetch(args: &FetchArgs) -> Result<(), Box<dyn std::error::Error>> {
    let variant = ModelVariant::from_back_model(args.back);
    let cache_dir = match &args.cache_dir {
        Some(dir) => dir.clone(),
        None => model_resolver::default_cache_dir()?,
    };
    let (progress, fired) = progress_reporter();

    for asset in [variant.weights_asset(), variant.anchors_asset()] {
        let resolved = model_resolver::resolve(&asset, &cache_dir, Some(&progress));
        finish_progress(&fired);
        println!("{}", resolved?.display());
    }
    Ok(())
}

fn build_detector(args: &DetectArgs) -> Result<BlazeFaceDetector, Box<dyn std::error::Error>> {
    let device = if args.device == "auto" {
        ComputeDevice::best_available()
    } else {
        args.device.parse()?
    };
    let mut config = BlazeFaceConfig::default()
        .with_device(device)
        .back_model(args.back)
        .verbose(args.verbose)
        .with_min_score_thresh(args.min_score)
        .with_min_suppression_threshold(args.min_suppression);

    if let (Some(weights), Some(anchors)) = (&args.weights, &args.anchors) {
        config = config.with_local_model(weights, anchors);
    } else if let Some(cache_dir) = &args.cache_dir {
        config = config.with_cache_dir(cache_dir);
    }

    let (progress, fired) = progress_reporter();
    let detector = BlazeFaceDetector::with_progress(config, Some(progress));
    finish_progress(&fired);
    let detector = detector?;
    log::info!("Detector running on {}", detector.device());
    Ok(detector)
}

/// Decode every image and run them through the detector as one batch.
fn detect_batch(
    detector: &BlazeFaceDetector,
    paths: &[PathBuf],
) -> Result<Vec<Vec<FaceBox>>, Box<dyn std::error::Error>> {
    let mut planes = Vec::with_capacity(paths.len());
    for path in paths {
        let frame = ImageInput::from(path.as_path()).to_frame()?;
        planes.push(frame.to_chw());
    }

    let first_shape = planes[0].shape().to_vec();
    if let Some((path, plane)) = paths
        .iter()
        .zip(&planes)
        .find(|(_, plane)| plane.shape() != first_shape.as_slice())
    {
        return Err(format!(
            "--batch requires images of the same size; {} is {}x{}, expected {}x{}",
            path.display(),
            plane.shape()[2],
            plane.shape()[1],
            first_shape[2],
            first_shape[1]
        )
        .into());
    }

    let views: Vec<_> = planes.iter().map(|p| p.view()).collect();
    let batch: Array4<u8> = ndarray::stack(Axis(0), &views)?;
    Ok(detector.detect_from_batch(batch.view())?)
}

fn validate(args: &DetectArgs) -> Result<(), Box<dyn std::error::Error>> {
    for image in &args.images {
        if !image.exists() {
            return Err(format!("Input file not found: {}", image.display()).into());
        }
        if !is_image(image) {
            log::warn!("{} does not have a known image extension", image.display());
        }
    }
    for path in [&args.weights, &args.anchors].into_iter().flatten() {
        if !path.exists() {
            return Err(format!("Model file not found: {}", path.display()).into());
        }
    }
    if !(0.0..=1.0).contains(&args.min_score) {
        return Err(format!(
            "Min score must be between 0.0 and 1.0, got {}",
            args.min_score
        )
        .into());
    }
    if !(0.0..=1.0).contains(&args.min_suppression) {
        return Err(format!(
            "Min suppression must be between 0.0 and 1.0, got {}",
            args.min_suppression
        )
        .into());
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn print_text(paths: &[PathBuf], results: &[Vec<FaceBox>]) {
    for (path, faces) in paths.iter().zip(results) {
        println!("{}: {} face(s)", path.display(), faces.len());
        for face in faces {
            println!(
                "  [{:.1}, {:.1}, {:.1}, {:.1}] score {:.3}",
                face.x1, face.y1, face.x2, face.y2, face.score
            );
        }
    }
}

fn print_json(paths: &[PathBuf], results: &[Vec<FaceBox>]) -> Result<(), serde_json::Error> {
    let entries: Vec<_> = paths
        .iter()
        .zip(results)
        .map(|(path, faces)| json!({ "image": path.display().to_string(), "faces": faces }))
        .collect();
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

/// Download progress callback plus a flag recording whether it printed.
fn progress_reporter() -> (model_resolver::ProgressFn, Arc<AtomicBool>) {
    let fired = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&fired);
    let progress: model_resolver::ProgressFn = Box::new(move |downloaded: u64, total: u64| {
        flag.store(true, Ordering::Relaxed);
        download_progress(downloaded, total);
    });
    (progress, fired)
}

/// End the `\r` progress line, if one was started.
fn finish_progress(fired: &AtomicBool) -> bool {
    let printed = fired.swap(false, Ordering::Relaxed);
    if printed {
        eprintln!();
    }
    printed
}

fn download_progress(downloaded: u64, total: u64) {
    if total > 0 {
        let pct = (downloaded as f64 / total as f64 * 100.0) as u32;
        eprint!("\rDownloading BlazeFace model... {pct}%");
    } else {
        eprint!("\rDownloading BlazeFace model... {downloaded} bytes");
    }
}
