use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use camera_calib::config::DEFAULT_MIN_IMAGES;
use camera_calib::dataset::{ImageDirectory, ImageSource};
use camera_calib::{CalibrationConfig, PipelineEvent};

/// Camera intrinsic calibration from checkerboard photographs; `run` needs a
/// build with the `opencv` feature.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Cli {
    /// Log per-image detail.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Calibrate from every image in a directory (requires the `opencv` feature).
    Run {
        /// TOML (or .json) configuration file.
        #[arg(short, long, default_value = "config/calibration.toml")]
        config: PathBuf,
        /// Directory of calibration photographs.
        #[arg(short, long, default_value = "image")]
        images: PathBuf,
    },
    /// Count candidate images without detecting anything.
    Scan {
        #[arg(default_value = "image")]
        images: PathBuf,
        /// Configuration to take the image floor from.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Write a commented starter configuration.
    InitConfig {
        #[arg(default_value = "config/calibration.toml")]
        path: PathBuf,
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::builder()
        .filter_level(level)
        .format_timestamp_nanos()
        .init();

    match cli.command {
        Command::Run { config, images } => run(&config, &images),
        Command::Scan { images, config } => scan(&images, config.as_deref()),
        Command::InitConfig { path, force } => init_config(&path, force),
    }
}

#[cfg(feature = "opencv")]
fn run(config_path: &Path, images: &Path) -> anyhow::Result<()> {
    use camera_calib::toolkit::opencv::OpenCvToolkit;
    use camera_calib::{CalibrationPipeline, CalibrationSummary};

    let config = CalibrationConfig::load(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    log::info!(
        "board {}x{} inner corners, {} mm squares, {} distortion coefficients",
        config.board.corners_x,
        config.board.corners_y,
        config.board.square_size_mm,
        config.calibration.distortion_coeffs
    );
    if let Some(f) = config.camera.focal_length_mm {
        log::info!("lens focal length {f} mm");
    }

    let threshold = config.error_threshold_px();
    let pipeline = CalibrationPipeline::new(config, OpenCvToolkit::new());
    let outcome = pipeline
        .run(images, &mut print_progress)
        .context("calibration failed")?;

    println!("{}", CalibrationSummary::new(&outcome.result, threshold));
    let report = &outcome.collection;
    if !report.inconsistent_orientation.is_empty() {
        println!(
            "\n{} views look mirrored relative to the first; check the board orientation",
            report.inconsistent_orientation.len()
        );
    }
    match (&outcome.saved_to, &outcome.persist_error) {
        (Some(path), _) => println!("\nresult saved to {}", path.display()),
        (None, Some(e)) => eprintln!("\nresult not saved: {e}"),
        (None, None) => {}
    }
    Ok(())
}

#[cfg(not(feature = "opencv"))]
fn run(_config_path: &Path, _images: &Path) -> anyhow::Result<()> {
    bail!("built without the `opencv` feature; rebuild with `--features opencv` to calibrate")
}

#[cfg_attr(not(feature = "opencv"), allow(dead_code))]
fn print_progress(event: PipelineEvent) {
    match event {
        PipelineEvent::ImagesFound { directory, count } => {
            println!("found {count} images in {}", directory.display())
        }
        PipelineEvent::ImageProcessed {
            index,
            total,
            path,
            failure,
        } => {
            let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy();
            match failure {
                None => println!("[{}/{total}] {name}: corners found", index + 1),
                Some(f) => println!("[{}/{total}] {name}: {f}", index + 1),
            }
        }
        PipelineEvent::DistortionFallback { requested, used } => {
            println!("{requested} distortion coefficients not supported, using {used}")
        }
        PipelineEvent::Solved { rms_error, quality, .. } => {
            println!("solved: RMS {rms_error:.4} px ({quality})")
        }
        _ => {}
    }
}

fn scan(images: &Path, config_path: Option<&Path>) -> anyhow::Result<()> {
    let min_images = match config_path {
        Some(path) => CalibrationConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?
            .min_images(),
        None => DEFAULT_MIN_IMAGES,
    };
    let directory = ImageDirectory::scan(images)?;
    for path in directory.image_paths() {
        println!("{}", path.display());
    }
    println!("{} candidate images", directory.len());
    if directory.len() < min_images {
        log::warn!("fewer than {min_images} images; calibration needs at least that many detections");
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    fs::write(path, CalibrationConfig::template())
        .with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn help_names_the_opencv_requirement() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        let about = cmd.get_about().map(|a| a.to_string()).unwrap_or_default();
        assert!(about.contains("opencv"), "{about}");
        let run = cmd.find_subcommand("run").unwrap();
        let run_about = run.get_about().map(|a| a.to_string()).unwrap_or_default();
        assert!(run_about.contains("opencv"), "{run_about}");
    }

    #[cfg(not(feature = "opencv"))]
    #[test]
    fn run_without_opencv_explains_the_rebuild() {
        let err = run(Path::new("config.toml"), Path::new("image")).unwrap_err();
        assert!(err.to_string().contains("--features opencv"));
    }
}
