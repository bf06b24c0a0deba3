//! Stream lifecycle: access negotiation, attachment, release

use crate::camera::{
    CameraConfig, CameraDevice, DeviceKind, FacingMode, MediaDevices, MediaStream,
    StreamConstraints, TrackState, select_device,
};
use crate::error::{Error, Result};
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on waiting for an attached stream to deliver frames
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Which camera the user wants
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CameraPreference {
    /// Preferred facing
    pub facing: FacingMode,
    /// Specific device picked by the user; wins over `facing`
    pub device_id: Option<String>,
}

impl CameraPreference {
    /// Prefer a facing mode, any device
    pub fn facing(facing: FacingMode) -> Self {
        Self {
            facing,
            device_id: None,
        }
    }
}

/// Sole owner of the live stream
pub struct CameraController {
    devices: Arc<dyn MediaDevices>,
    config: CameraConfig,
    ready_timeout: Duration,
    stream: Option<Box<dyn MediaStream>>,
    flash_on: bool,
}

impl CameraController {
    /// Create a controller over a platform backend
    pub fn new(devices: Arc<dyn MediaDevices>, config: CameraConfig) -> Self {
        Self {
            devices,
            config,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            stream: None,
            flash_on: false,
        }
    }

    /// Override the readiness bound
    pub fn with_ready_timeout(mut self, timeout: Duration) -> Self {
        self.ready_timeout = timeout;
        self
    }

    /// Whether the backend runs in a secure context
    pub fn is_secure_context(&self) -> bool {
        self.devices.is_secure_context()
    }

    /// Request a stream.
    ///
    /// Tries the preferred facing mode (or the user's device) first. When that
    /// fails, enumerates video inputs and requests the best match by id. Any
    /// held stream is released before the first request goes out. Errors are
    /// returned as raised.
    pub async fn request_access(
        &mut self,
        preference: &CameraPreference,
    ) -> Result<Box<dyn MediaStream>> {
        self.release();

        let primary = match &preference.device_id {
            Some(id) => StreamConstraints::exact_device(id.clone(), &self.config),
            None => StreamConstraints::facing(preference.facing, &self.config),
        };

        match self.devices.get_user_media(&primary).await {
            Ok(stream) => {
                info!(device = stream.label(), "Camera access granted");
                return Ok(stream);
            }
            Err(err) => {
                warn!(error = %err, "Camera request failed, falling back to device enumeration");
            }
        }

        let devices = self.devices.enumerate_devices().await?;
        let device = select_device(&devices, preference.facing)
            .ok_or_else(|| Error::CameraNotFound("No video input devices".to_string()))?;

        info!(device = %device.label, id = %device.id, "Requesting camera by device id");
        let stream = self
            .devices
            .get_user_media(&StreamConstraints::exact_device(device.id.clone(), &self.config))
            .await?;
        info!(device = stream.label(), "Camera access granted");
        Ok(stream)
    }

    /// Take ownership of `stream` and wait until it delivers frames.
    ///
    /// Bounded by the ready timeout; on any failure the stream is released
    /// before returning.
    pub async fn attach(&mut self, stream: Box<dyn MediaStream>) -> Result<()> {
        self.release();

        let stream = self.stream.insert(stream);
        let outcome = tokio::time::timeout(self.ready_timeout, stream.ready()).await;

        match outcome {
            Ok(Ok(())) => {
                debug!("Camera stream ready");
                Ok(())
            }
            Ok(Err(err)) => {
                self.release();
                Err(err)
            }
            Err(_) => {
                warn!(timeout = ?self.ready_timeout, "Camera stream never became ready");
                self.release();
                Err(Error::ReadyTimeout(self.ready_timeout))
            }
        }
    }

    /// Stop every track of the held stream and drop it. No-op when nothing is
    /// held.
    pub fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if self.flash_on {
                if let Some(flash) = stream.flash() {
                    let _ = flash.set_torch(false);
                }
            }
            stream.stop();
            info!(device = stream.label(), "Camera released");
        }
        self.flash_on = false;
    }

    /// Whether a stream is held
    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    /// Track states of the held stream (empty when none)
    pub fn tracks(&self) -> Vec<TrackState> {
        self.stream.as_ref().map(|s| s.tracks()).unwrap_or_default()
    }

    /// Label of the held stream's device
    pub fn device_label(&self) -> Option<&str> {
        self.stream.as_ref().map(|s| s.label())
    }

    /// Current frame of the held stream.
    ///
    /// `None` when nothing is attached or no full frame is ready yet.
    pub async fn current_frame(&mut self) -> Result<Option<DynamicImage>> {
        match self.stream.as_mut() {
            Some(stream) => stream.current_frame().await,
            None => Ok(None),
        }
    }

    /// Whether the held stream exposes a torch
    pub fn has_flash(&mut self) -> bool {
        self.stream
            .as_mut()
            .and_then(|s| s.flash())
            .is_some()
    }

    /// Whether the torch is currently on
    pub fn flash_on(&self) -> bool {
        self.flash_on
    }

    /// Switch the torch.
    ///
    /// Returns whether the request took effect; without a torch (or when the
    /// device rejects it) the flash stays off and `false` is returned.
    pub async fn set_flash(&mut self, on: bool) -> bool {
        let Some(flash) = self.stream.as_mut().and_then(|s| s.flash()) else {
            self.flash_on = false;
            return false;
        };

        match flash.set_torch(on) {
            Ok(()) => {
                self.flash_on = on;
                true
            }
            Err(err) => {
                warn!(error = %err, "Torch control rejected");
                self.flash_on = false;
                false
            }
        }
    }

    /// Cameras available for switching
    pub async fn list_cameras(&self) -> Result<Vec<CameraDevice>> {
        let devices = self.devices.enumerate_devices().await?;
        Ok(devices
            .iter()
            .filter(|d| d.kind == DeviceKind::VideoInput)
            .map(CameraDevice::from)
            .collect())
    }
}

impl Drop for CameraController {
    fn drop(&mut self) {
        self.release();
    }
}
