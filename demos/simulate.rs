//! Camera Simulation Example
//!
//! Renders an image through the optics, lighting and sensor stages and reports
//! how far the result moved from the input. Without an input image the synthetic
//! calibration target is rendered first and used as the scene.
//!
//! Usage:
//! ```bash
//! cargo run --example simulate -- \
//!   --input photo.png \
//!   --params samples/simulation.yaml \
//!   --output output/simulated.png
//! ```

use camsim_tools::camera::CameraIntrinsics;
use camsim_tools::config::ToolConfig;
use camsim_tools::simulation::{DistortionPreset, SimulationParameters};
use camsim_tools::util::{self, ensure_output_dir};
use camsim_tools::Frame;
use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::info;
use std::path::{Path, PathBuf};

/// Camera image-formation simulator
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Scene image; the synthetic target is used when omitted
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,

    /// Simulation parameters YAML file
    #[arg(short = 'p', long)]
    params: Option<PathBuf>,

    /// Distortion preset applied on top of the parameters (e.g. "strong barrel")
    #[arg(long)]
    preset: Option<String>,

    /// Tool configuration YAML (pipeline constants, target layout)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Lens used to draw the synthetic target
    #[arg(short = 'l', long, default_value = "samples/camera.yaml")]
    lens: PathBuf,

    /// Where to write the rendered image
    #[arg(short = 'o', long, default_value = "output/simulated.png")]
    output: PathBuf,
}

fn path_str(path: &Path) -> Result<&str, Box<dyn std::error::Error>> {
    Ok(path.to_str().ok_or("Invalid path string")?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        // error;warn;info;debug;trace
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    ensure_output_dir()?;

    let config = match &cli.config {
        Some(path) => ToolConfig::load_from_yaml(path_str(path)?)?,
        None => ToolConfig::default(),
    };

    let mut params = match &cli.params {
        Some(path) => SimulationParameters::load_from_yaml(path_str(path)?)?,
        None => config.simulation.clone(),
    };
    if let Some(name) = &cli.preset {
        let preset: DistortionPreset = name.parse()?;
        preset.apply(&mut params);
        info!("Applied preset: {preset}");
    }

    let scene = match &cli.input {
        Some(path) => {
            info!("Loading scene from {path:?}");
            Frame::open(path)?
        }
        None => {
            let lens = CameraIntrinsics::load_from_yaml(path_str(&cli.lens)?)?;
            info!("Drawing calibration target with f = {} mm", lens.focal_length);
            config
                .target_generator()
                .save(&lens, 0.0, Some(0), "output/target.png")?
        }
    };

    let rendered = config.pipeline().run(&scene, &params);
    rendered.save(&cli.output)?;
    info!(
        "Rendered {}x{} -> {}x{}, saved to {:?}",
        scene.width(),
        scene.height(),
        rendered.width(),
        rendered.height(),
        cli.output
    );

    let metrics = util::compute_image_quality_metrics(&rendered, &scene)?;
    info!(
        "MSE: {:.3}, PSNR: {:.2} dB, SSIM: {:.4}",
        metrics.mse, metrics.psnr, metrics.ssim
    );

    util::difference_map(&rendered, &scene)?.save("output/difference.png")?;
    let histogram = util::histogram(&rendered);
    let dark = histogram[..32].iter().sum::<u32>();
    let bright = histogram[224..].iter().sum::<u32>();
    info!("Histogram: {dark} pixels below 32, {bright} pixels above 223");

    println!("{}", serde_json::to_string_pretty(&metrics)?);
    Ok(())
}
