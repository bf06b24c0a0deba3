//! ORDERSCAN runtime configuration handling

use crate::ScanConfig;
use crate::camera::{CameraConfig, FacingMode, PixelFormat};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Shortest accepted sampling interval
const MIN_SCAN_INTERVAL_MS: u64 = 30;

/// Top-level configuration structure persisted to disk or environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderscanConfig {
    /// Camera capture configuration overrides
    pub camera: CameraOptions,
    /// Scan loop and identifier extraction settings
    pub scan: ScanOptions,
    /// Logging configuration
    pub logging: LoggingOptions,
}

impl OrderscanConfig {
    /// Load configuration from an explicit path or fall back to discovered defaults.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = explicit_path {
            Self::from_file(path)?
        } else if let Some(path) = Self::discover_file()? {
            tracing::info!("Using configuration file: {}", path.display());
            Self::from_file(&path)?
        } else {
            tracing::debug!("No orderscan.toml / orderscan.yaml found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Attempt to locate a configuration file in common locations.
    fn discover_file() -> Result<Option<PathBuf>> {
        let cwd =
            env::current_dir().map_err(|e| Error::Config(format!("Failed to read cwd: {e}")))?;
        let local = ["orderscan.toml", "orderscan.yaml", "orderscan.yml"]
            .iter()
            .map(|name| cwd.join(name));

        let xdg = env::var_os("XDG_CONFIG_HOME")
            .map(|dir| PathBuf::from(dir).join("orderscan"))
            .into_iter()
            .flat_map(|base| ["config.toml", "config.yaml"].map(|name| base.join(name)));

        Ok(local.chain(xdg).find(|path| path.exists()))
    }

    /// Read configuration from a concrete file path.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();

        match extension.as_str() {
            "toml" => toml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse TOML {}: {e}", path.display()))
            }),
            "yaml" | "yml" => serde_yaml::from_str(&contents).map_err(|e| {
                Error::Config(format!("Failed to parse YAML {}: {e}", path.display()))
            }),
            other => Err(Error::Config(format!(
                "Unsupported config format '{other}', expected toml/yaml"
            ))),
        }
    }

    /// Apply environment variable overrides after file/default loading.
    fn apply_env_overrides(&mut self) {
        self.camera.apply_env_overrides();
        self.scan.apply_env_overrides();
        self.logging.apply_env_overrides();
    }

    /// Resolve everything an acquisition session needs
    pub fn scan_config(&self) -> Result<ScanConfig> {
        self.scan.to_scan_config(self.camera.to_camera_config()?)
    }
}

/// User-friendly camera overrides that are merged on top of `CameraConfig::default()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraOptions {
    /// Base settings to start from: `default` or `compatible` (640x480 YUYV at
    /// 15 fps for lower-end webcams)
    pub preset: Option<String>,
    /// Exact device to open (e.g. `/dev/video2`)
    pub device: Option<String>,
    /// Preferred facing (`environment` / `rear` or `user` / `front`)
    pub facing: Option<String>,
    /// Override for desired frame width in pixels.
    pub width: Option<u32>,
    /// Override for desired frame height in pixels.
    pub height: Option<u32>,
    /// Override for desired frames per second.
    pub fps: Option<u32>,
    /// Override for pixel format string (mjpeg/yuyv/rgb24).
    pub format: Option<String>,
    /// Override for number of V4L2 buffers to allocate.
    pub buffer_count: Option<u32>,
}

impl CameraOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(preset) = env::var("ORDERSCAN_CAMERA_PRESET") {
            self.preset = Some(preset).filter(|p| !p.trim().is_empty());
        }
        if let Ok(device) = env::var("ORDERSCAN_CAMERA_DEVICE") {
            self.device = Some(device).filter(|d| !d.trim().is_empty());
        }
        if let Ok(facing) = env::var("ORDERSCAN_CAMERA_FACING") {
            self.facing = Some(facing);
        }
        if let Ok(width) = env::var("ORDERSCAN_CAMERA_WIDTH") {
            self.width = width.parse::<u32>().ok();
        }
        if let Ok(height) = env::var("ORDERSCAN_CAMERA_HEIGHT") {
            self.height = height.parse::<u32>().ok();
        }
        if let Ok(fps) = env::var("ORDERSCAN_CAMERA_FPS") {
            self.fps = fps.parse::<u32>().ok();
        }
        if let Ok(format) = env::var("ORDERSCAN_CAMERA_FORMAT") {
            self.format = Some(format);
        }
        if let Ok(buffers) = env::var("ORDERSCAN_CAMERA_BUFFERS") {
            self.buffer_count = buffers.parse::<u32>().ok();
        }
    }

    /// Merge overrides onto the preset (or default) camera configuration.
    pub fn to_camera_config(&self) -> Result<CameraConfig> {
        let mut config = match self.preset.as_deref().map(str::trim) {
            None | Some("default") => CameraConfig::default(),
            Some("compatible") => CameraConfig::compatible(),
            Some(other) => {
                return Err(Error::Config(format!(
                    "Unknown camera preset '{other}'. Use default or compatible"
                )));
            }
        };

        if let Some(device) = &self.device {
            config.device_id = Some(device.clone());
        }

        if let Some(facing) = &self.facing {
            config.facing = FacingMode::parse(facing).ok_or_else(|| {
                Error::Config(format!(
                    "Unknown facing mode '{facing}'. Use environment or user"
                ))
            })?;
        }

        if let Some(width) = self.width {
            config.width = width;
        }

        if let Some(height) = self.height {
            config.height = height;
        }

        if let Some(fps) = self.fps {
            config.fps = fps.max(1);
        }

        if let Some(format) = &self.format {
            config.format = PixelFormat::parse(format).ok_or_else(|| {
                Error::Config(format!(
                    "Unknown pixel format '{format}'. Use mjpeg, yuyv, or rgb24"
                ))
            })?;
        }

        if let Some(buffers) = self.buffer_count {
            config.buffer_count = buffers.max(2);
        }

        Ok(config)
    }
}

/// Scan loop settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Milliseconds between frame samples
    pub interval_ms: Option<u64>,
    /// Milliseconds to wait for a new stream to deliver frames
    pub ready_timeout_ms: Option<u64>,
    /// Path markers preceding an embedded identifier
    pub markers: Option<Vec<String>>,
}

impl ScanOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(interval) = env::var("ORDERSCAN_SCAN_INTERVAL_MS") {
            self.interval_ms = interval.parse::<u64>().ok();
        }
        if let Ok(timeout) = env::var("ORDERSCAN_READY_TIMEOUT_MS") {
            self.ready_timeout_ms = timeout.parse::<u64>().ok();
        }
        if let Ok(markers) = env::var("ORDERSCAN_MARKERS") {
            let markers: Vec<String> = markers
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            self.markers = (!markers.is_empty()).then_some(markers);
        }
    }

    /// Merge overrides onto the default scan configuration
    pub fn to_scan_config(&self, camera_config: CameraConfig) -> Result<ScanConfig> {
        let mut config = ScanConfig {
            camera_config,
            ..ScanConfig::default()
        };

        if let Some(interval) = self.interval_ms {
            config.scan_interval = Duration::from_millis(interval.max(MIN_SCAN_INTERVAL_MS));
        }

        if let Some(timeout) = self.ready_timeout_ms {
            if timeout == 0 {
                return Err(Error::Config(
                    "ready_timeout_ms must be greater than zero".to_string(),
                ));
            }
            config.ready_timeout = Duration::from_millis(timeout);
        }

        if let Some(markers) = &self.markers {
            if markers.iter().all(|m| m.trim().is_empty()) {
                return Err(Error::Config("At least one identifier marker is required".to_string()));
            }
            config.markers = markers.clone();
        }

        Ok(config)
    }
}

/// Structured logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingOptions {
    /// Default log level (overridable via `ORDERSCAN_LOG_LEVEL`)
    pub level: String,
    /// Optional log file path for teeing structured logs
    pub file: Option<PathBuf>,
    /// Force ANSI colors in stdout logging
    pub color: bool,
    /// Optional log rotation strategy applied to `file`
    pub rotation: Option<LogRotation>,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
            color: true,
            rotation: None,
        }
    }
}

impl LoggingOptions {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(level) = env::var("ORDERSCAN_LOG_LEVEL") {
            self.level = level;
        }
        if let Ok(file) = env::var("ORDERSCAN_LOG_FILE") {
            self.file = Some(PathBuf::from(file));
        }
        if let Ok(color) = env::var("ORDERSCAN_LOG_COLOR") {
            match color.to_ascii_lowercase().as_str() {
                "0" | "false" | "off" => self.color = false,
                "1" | "true" | "on" => self.color = true,
                _ => {}
            }
        }
        if let Ok(rotation) = env::var("ORDERSCAN_LOG_ROTATION") {
            if let Some(parsed) = LogRotation::parse(&rotation) {
                self.rotation = Some(parsed);
            }
        }
    }
}

/// Supported log rotation policies for file sinks
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// Rotate log files once per hour
    Hourly,
    /// Rotate log files once per day
    Daily,
}

impl LogRotation {
    /// Parse a rotation policy (case-insensitive)
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "hourly" => Some(Self::Hourly),
            "daily" => Some(Self::Daily),
            _ => None,
        }
    }
}
