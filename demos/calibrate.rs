//! Camera Auto-Calibration Example
//!
//! Estimates focal length, k1 and the principal point from a clean base image
//! and a distorted capture of the same scene. The job runs on the orchestrator's
//! worker thread; progress is printed as it arrives and the result is printed
//! as JSON.
//!
//! Usage:
//! ```bash
//! RUST_LOG=info cargo run --example calibrate -- \
//!   --base base.png --target distorted.png \
//!   --lock focal_length --default focal_length=362
//! ```

use camsim_tools::calibration::{CalibrationEvent, CalibrationInputs, LockMap, ParameterMap};
use camsim_tools::config::ToolConfig;
use camsim_tools::features::match_features;
use camsim_tools::optimization::reprojection::PARAMETER_NAMES;
use camsim_tools::util::{self, ensure_output_dir};
use camsim_tools::Frame;
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

/// Feature-based camera calibration tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Undistorted base image
    #[arg(short = 'b', long)]
    base: PathBuf,

    /// Distorted image of the same scene
    #[arg(short = 't', long)]
    target: PathBuf,

    /// Parameter to hold at its default (focal_length, distortion, principal_point, k1, cx, cy)
    #[arg(short = 'l', long = "lock")]
    locks: Vec<String>,

    /// Default value as name=value
    #[arg(short = 'd', long = "default")]
    defaults: Vec<String>,

    /// Tool configuration YAML (feature and estimator settings)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Write the matched correspondences to this CSV file
    #[arg(long)]
    export_csv: Option<PathBuf>,
}

fn parse_defaults(entries: &[String]) -> Result<ParameterMap, Box<dyn std::error::Error>> {
    let mut defaults = ParameterMap::new();
    for entry in entries {
        let (name, value) = entry
            .split_once('=')
            .ok_or_else(|| format!("Expected name=value, got '{entry}'"))?;
        defaults.insert(name.trim().to_string(), value.trim().parse::<f64>()?);
    }
    Ok(defaults)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ToolConfig::load_from_yaml(path.to_str().ok_or("Invalid path string")?)?,
        None => ToolConfig::default(),
    };

    let base = Frame::open(&cli.base)?;
    let target = Frame::open(&cli.target)?;
    info!(
        "Loaded base {}x{} and target {}x{}",
        base.width(),
        base.height(),
        target.width(),
        target.height()
    );

    let locks: LockMap = cli.locks.iter().map(|name| (name.clone(), true)).collect();
    let defaults = parse_defaults(&cli.defaults)?;

    if let Some(path) = &cli.export_csv {
        match match_features(&base, &target, &config.calibration.features) {
            Ok(pairs) => {
                ensure_output_dir()?;
                util::export_correspondences(&pairs, path)?;
                info!("Exported {} correspondences to {path:?}", pairs.len());
            }
            Err(err) => warn!("No correspondences to export: {err}"),
        }
    }

    let orchestrator = config.orchestrator();
    let inputs = CalibrationInputs::new().with_image_pair(base, target);
    let handle = orchestrator
        .start(inputs, locks, defaults)
        .ok_or("A calibration job is already running")?;

    for event in handle.events() {
        match event {
            CalibrationEvent::Progress(percent) => println!("Progress: {percent:>3}%"),
            CalibrationEvent::Completed(_) => println!("Calibration finished"),
        }
    }
    let result = handle.join()?;

    info!("Status: {:?}", result.status);
    if let Some(loss) = result.final_loss {
        info!("Final loss: {loss:.4} after {} iterations", result.iterations);
    }
    for name in PARAMETER_NAMES {
        if let Some(value) = result.parameters.get(name) {
            info!("  {name}: {value:.5}");
        }
    }
    println!("{}", serde_json::to_string_pretty(&result.parameters)?);
    Ok(())
}
