//! Camera access
//!
//! The platform is reached through two traits: [`MediaDevices`] acquires
//! streams and enumerates inputs, [`MediaStream`] is one live stream. The
//! [`CameraController`] drives them and is the only owner of a stream.
//!
//! Backends: V4L2 (`v4l2`, Linux, `camera` feature) and a replaying
//! [`simulator`].

mod config;
pub mod controller;
pub mod simulator;

#[cfg(feature = "camera")]
#[cfg_attr(docsrs, doc(cfg(feature = "camera")))]
pub mod v4l2;

pub use config::{CameraConfig, FacingMode, PixelFormat};
pub use controller::{CameraController, CameraPreference};
pub use simulator::SimulatedDevices;

use crate::error::Result;
use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Serialize};

/// Kind of a platform media device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// Camera
    VideoInput,
    /// Microphone
    AudioInput,
    /// Speaker
    AudioOutput,
}

/// Platform enumeration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDeviceInfo {
    /// Identifier accepted by [`StreamConstraints::device_id`]
    pub id: String,
    /// Driver-provided label
    pub label: String,
    /// Device kind
    pub kind: DeviceKind,
    /// Facing reported by the platform, when it knows
    pub facing: Option<FacingMode>,
}

impl MediaDeviceInfo {
    /// Convenience constructor for a camera entry without facing metadata
    pub fn video(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            kind: DeviceKind::VideoInput,
            facing: None,
        }
    }
}

/// Information about a camera the user can switch to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CameraDevice {
    /// Device identifier
    pub id: String,
    /// Device label
    pub label: String,
    /// Best-effort guess whether this is a rear camera
    pub rear_facing: bool,
}

impl From<&MediaDeviceInfo> for CameraDevice {
    fn from(info: &MediaDeviceInfo) -> Self {
        Self {
            id: info.id.clone(),
            label: info.label.clone(),
            rear_facing: matches_facing(info, FacingMode::Environment),
        }
    }
}

/// Constraints for a stream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConstraints {
    /// Preferred facing; a soft constraint
    pub facing: Option<FacingMode>,
    /// Exact device; a hard constraint
    pub device_id: Option<String>,
    /// Ideal frame width
    pub width: u32,
    /// Ideal frame height
    pub height: u32,
    /// Ideal frame rate
    pub fps: u32,
}

impl StreamConstraints {
    /// Request any camera, preferring the given facing
    pub fn facing(facing: FacingMode, config: &CameraConfig) -> Self {
        Self {
            facing: Some(facing),
            device_id: None,
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }

    /// Request one specific device
    pub fn exact_device(id: impl Into<String>, config: &CameraConfig) -> Self {
        Self {
            facing: None,
            device_id: Some(id.into()),
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

/// State of one track of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackState {
    /// Producing frames; holds the hardware
    Live,
    /// Stopped; hardware released
    Ended,
}

/// Torch control exposed by a stream that supports it
pub trait FlashControl: Send {
    /// Switch the torch on or off
    fn set_torch(&mut self, on: bool) -> Result<()>;
}

/// One live media stream.
///
/// Implementations must stop their tracks when dropped.
#[async_trait]
pub trait MediaStream: Send {
    /// Label of the device backing the stream
    fn label(&self) -> &str;

    /// Resolve once the stream can deliver full frames
    async fn ready(&mut self) -> Result<()>;

    /// Current frame, or `None` when no complete frame is available yet
    async fn current_frame(&mut self) -> Result<Option<DynamicImage>>;

    /// Track states
    fn tracks(&self) -> Vec<TrackState>;

    /// Stop every track; must be idempotent and must not fail
    fn stop(&mut self);

    /// Torch control, when the device has one
    fn flash(&mut self) -> Option<&mut dyn FlashControl>;

    /// Whether any track still holds the hardware
    fn is_live(&self) -> bool {
        self.tracks().contains(&TrackState::Live)
    }
}

/// Platform media layer: stream acquisition and device enumeration
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Acquire a stream satisfying the constraints
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>>;

    /// Enumerate media devices (all kinds)
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>>;

    /// Whether hardware access happens in a secure context
    fn is_secure_context(&self) -> bool {
        true
    }
}

// Driver labels vary; these cover the locales seen on phones and laptops.
const REAR_KEYWORDS: &[&str] = &[
    "back",
    "rear",
    "environment",
    "world",
    "trasera",
    "traseira",
    "arrière",
    "arriere",
    "rück",
    "rueck",
    "posteriore",
];

const FRONT_KEYWORDS: &[&str] = &[
    "front",
    "facetime",
    "selfie",
    "delantera",
    "frontal",
    "avant",
    "frontkamera",
    "anteriore",
];

/// Whether a device faces the given way.
///
/// Platform metadata wins; otherwise the label is matched against
/// locale-aware keywords. Best effort only.
pub fn matches_facing(info: &MediaDeviceInfo, facing: FacingMode) -> bool {
    if let Some(reported) = info.facing {
        return reported == facing;
    }

    let label = info.label.to_lowercase();
    let keywords = match facing {
        FacingMode::Environment => REAR_KEYWORDS,
        FacingMode::User => FRONT_KEYWORDS,
    };
    keywords.iter().any(|k| label.contains(k))
}

/// Pick the video input matching `facing`, falling back to the first one
pub fn select_device(devices: &[MediaDeviceInfo], facing: FacingMode) -> Option<&MediaDeviceInfo> {
    let mut inputs = devices.iter().filter(|d| d.kind == DeviceKind::VideoInput);
    let first = inputs.clone().next();
    inputs.find(|d| matches_facing(d, facing)).or(first)
}
