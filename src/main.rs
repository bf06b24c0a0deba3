//! ORDERSCAN command-line entrypoint

use anyhow::Context;
use clap::Parser;
use orderscan::camera::{MediaDevices, SimulatedDevices};
use orderscan::{
    AcquisitionEvent, AcquisitionSession, CameraDevice, ChannelHandler, DecodedResult,
    OrderscanConfig, Result, ScanConfig, StillImageOutcome, logging,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "orderscan",
    version,
    about = "Acquire a work-order identifier from a camera, a photo or typed input"
)]
struct Cli {
    /// Optional configuration file (toml/yaml). Defaults to orderscan.{toml,yaml} in cwd/XDG config.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Open this camera (e.g. /dev/video2) instead of choosing by facing
    #[arg(long, value_name = "ID")]
    device: Option<String>,

    /// Preferred camera facing: environment (rear) or user (front)
    #[arg(long, value_name = "FACING")]
    facing: Option<String>,

    /// List detected cameras and exit
    #[arg(long)]
    list_cameras: bool,

    /// Decode a still image instead of scanning live
    #[arg(long, value_name = "PATH", conflicts_with = "manual")]
    image: Option<PathBuf>,

    /// Submit a typed identifier
    #[arg(long, value_name = "TEXT")]
    manual: Option<String>,

    /// Replay a directory of images as a fake camera
    #[arg(long, value_name = "DIR")]
    simulator: Option<PathBuf>,

    /// Give up live scanning after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Output results as formatted JSON instead of human-readable text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        OrderscanConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(device) = &cli.device {
        config.camera.device = Some(device.clone());
    }
    if let Some(facing) = &cli.facing {
        config.camera.facing = Some(facing.clone());
    }

    logging::init(&config.logging).context("Failed to initialise logging")?;

    let scan_config = config.scan_config()?;
    info!(camera = ?scan_config.camera_config, "Starting ORDERSCAN");

    let output = Output { json: cli.json };
    let (handler, mut events) = ChannelHandler::new();
    let devices = media_devices(&cli, &scan_config).context("No camera backend available")?;
    let session = AcquisitionSession::builder(devices, Arc::new(handler))
        .config(scan_config)
        .build();

    if cli.list_cameras {
        let cameras = session.cameras().await?;
        output.cameras(&cameras)?;
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(text) = &cli.manual {
        session.submit_manual(text).await?;
    } else if let Some(path) = &cli.image {
        if session.submit_image_file(path).await? == StillImageOutcome::NotFound {
            output.not_found(path)?;
            return Ok(ExitCode::FAILURE);
        }
    } else {
        session.start().await;
    }

    let limit = cli.timeout.map(Duration::from_secs);
    let event = tokio::select! {
        event = events.recv() => event,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted");
            None
        }
        _ = sleep_or_forever(limit) => {
            info!(timeout = ?limit, "Gave up waiting for a code");
            None
        }
    };
    session.close().await;

    match event {
        Some(AcquisitionEvent::Decoded(result)) => {
            output.decoded(&result)?;
            Ok(ExitCode::SUCCESS)
        }
        Some(AcquisitionEvent::Error {
            category,
            title,
            message,
        }) => {
            output.error(category.as_str(), &title, &message)?;
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::FAILURE),
    }
}

fn media_devices(cli: &Cli, config: &ScanConfig) -> Result<Arc<dyn MediaDevices>> {
    if let Some(dir) = &cli.simulator {
        return Ok(Arc::new(SimulatedDevices::from_dir(dir)?));
    }
    if cli.manual.is_some() || cli.image.is_some() {
        // No camera is opened in these modes
        return Ok(Arc::new(SimulatedDevices::new()));
    }
    camera_devices(config)
}

#[cfg(feature = "camera")]
fn camera_devices(config: &ScanConfig) -> Result<Arc<dyn MediaDevices>> {
    Ok(Arc::new(orderscan::camera::v4l2::V4lDevices::new(
        config.camera_config.clone(),
    )))
}

#[cfg(not(feature = "camera"))]
fn camera_devices(_config: &ScanConfig) -> Result<Arc<dyn MediaDevices>> {
    Err(orderscan::Error::Config(
        "Built without the `camera` feature; use --simulator, --image or --manual".to_string(),
    ))
}

async fn sleep_or_forever(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

struct Output {
    json: bool,
}

impl Output {
    fn decoded(&self, result: &DecodedResult) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(result)?);
        } else {
            println!("{}", result.identifier);
        }
        Ok(())
    }

    fn error(&self, category: &str, title: &str, message: &str) -> Result<()> {
        if self.json {
            let payload = json!({ "error": category, "title": title, "message": message });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!("{title}");
            println!("{message}");
        }
        Ok(())
    }

    fn not_found(&self, path: &Path) -> Result<()> {
        let message = format!("No QR code found in {}", path.display());
        if self.json {
            let payload = json!({ "error": "not_found", "message": message });
            println!("{}", serde_json::to_string_pretty(&payload)?);
        } else {
            println!("{message}");
        }
        Ok(())
    }

    fn cameras(&self, cameras: &[CameraDevice]) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(cameras)?);
            return Ok(());
        }

        if cameras.is_empty() {
            println!("No cameras detected");
        } else {
            println!("Discovered cameras:");
            for camera in cameras {
                let facing = if camera.rear_facing { "rear" } else { "front/unknown" };
                println!("  {} ({}, {facing})", camera.label, camera.id);
            }
        }
        Ok(())
    }
}
