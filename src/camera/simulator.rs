//! Replaying camera backend
//!
//! Serves a fixed script of frames through the [`MediaDevices`] /
//! [`MediaStream`] traits. Drives `--simulator` runs and the test suite, and
//! keeps counters of every request and live stream so resource handling can
//! be checked from outside.

use crate::camera::{
    FacingMode, FlashControl, MediaDeviceInfo, MediaDevices, MediaStream, StreamConstraints,
    TrackState, select_device,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, Luma};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "webp"];

#[derive(Default)]
struct SimStats {
    requests: Mutex<Vec<StreamConstraints>>,
    enumerations: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    torch_on: AtomicBool,
}

impl SimStats {
    fn stream_opened(&self) {
        let live = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_live.fetch_max(live, Ordering::SeqCst);
    }

    fn stream_stopped(&self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
        self.torch_on.store(false, Ordering::SeqCst);
    }
}

/// Simulated camera platform
pub struct SimulatedDevices {
    devices: Vec<MediaDeviceInfo>,
    frames: Arc<Vec<DynamicImage>>,
    secure: bool,
    warmup_frames: usize,
    ready_delay: Option<Duration>,
    access_delay: Option<Duration>,
    ready_failure: Option<(String, String)>,
    stall_frames: bool,
    flash: bool,
    failures: Mutex<VecDeque<Error>>,
    stats: Arc<SimStats>,
}

impl SimulatedDevices {
    /// A platform with no devices and no frames
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            frames: Arc::new(Vec::new()),
            secure: true,
            warmup_frames: 0,
            ready_delay: None,
            access_delay: None,
            ready_failure: None,
            stall_frames: false,
            flash: false,
            failures: Mutex::new(VecDeque::new()),
            stats: Arc::new(SimStats::default()),
        }
    }

    /// Replay every image in a directory (sorted by file name) through a single
    /// rear camera
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut paths = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect::<Vec<_>>();
        paths.sort();

        if paths.is_empty() {
            return Err(Error::Config(format!(
                "Simulator directory {} contains no images",
                dir.display()
            )));
        }

        let frames = paths
            .iter()
            .map(|path| {
                image::open(path).map_err(|e| {
                    Error::Image(format!("Failed to load frame {}: {e}", path.display()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::info!(frames = frames.len(), dir = %dir.display(), "Loaded simulator frames");

        Ok(Self::new()
            .with_device(MediaDeviceInfo {
                facing: Some(FacingMode::Environment),
                ..MediaDeviceInfo::video("sim:0", "Simulated Back Camera")
            })
            .with_frames(frames))
    }

    /// Add an enumerable device
    pub fn with_device(mut self, info: MediaDeviceInfo) -> Self {
        self.devices.push(info);
        self
    }

    /// Frame script; once exhausted the last frame repeats. Without frames the
    /// camera sees a blank scene.
    pub fn with_frames(mut self, frames: Vec<DynamicImage>) -> Self {
        self.frames = Arc::new(frames);
        self
    }

    /// Report an insecure context
    pub fn insecure(mut self) -> Self {
        self.secure = false;
        self
    }

    /// Number of polls each stream answers with "no frame yet"
    pub fn with_warmup_frames(mut self, count: usize) -> Self {
        self.warmup_frames = count;
        self
    }

    /// Delay before a stream reports readiness
    pub fn with_ready_delay(mut self, delay: Duration) -> Self {
        self.ready_delay = Some(delay);
        self
    }

    /// Delay before an access request resolves
    pub fn with_access_delay(mut self, delay: Duration) -> Self {
        self.access_delay = Some(delay);
        self
    }

    /// Streams open but fail while starting up with a platform exception
    pub fn fail_ready(mut self, name: &str, message: &str) -> Self {
        self.ready_failure = Some((name.to_string(), message.to_string()));
        self
    }

    /// Frame reads never complete, like a sensor that stopped delivering
    pub fn stall_frames(mut self) -> Self {
        self.stall_frames = true;
        self
    }

    /// Give streams a torch
    pub fn with_flash(mut self) -> Self {
        self.flash = true;
        self
    }

    /// Fail the next access request with a platform exception
    pub fn fail_next(self, name: &str, message: &str) -> Self {
        self.push_failure(Error::media(name, message));
        self
    }

    /// Queue a failure for a later access request
    pub fn push_failure(&self, error: Error) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(error);
    }

    /// Every access request issued so far, in order
    pub fn requests(&self) -> Vec<StreamConstraints> {
        self.stats
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of enumerations issued so far
    pub fn enumerations(&self) -> usize {
        self.stats.enumerations.load(Ordering::SeqCst)
    }

    /// Streams currently holding the (simulated) hardware
    pub fn live_streams(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live streams observed
    pub fn peak_live_streams(&self) -> usize {
        self.stats.peak_live.load(Ordering::SeqCst)
    }

    /// Whether a torch is currently lit
    pub fn torch_on(&self) -> bool {
        self.stats.torch_on.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SimulatedDevices {
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
        if let Some(delay) = self.access_delay {
            tokio::time::sleep(delay).await;
        }

        self.stats
            .requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(constraints.clone());

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(error) = failure {
            return Err(error);
        }

        let device = match &constraints.device_id {
            Some(id) => self.devices.iter().find(|d| &d.id == id),
            None => select_device(
                &self.devices,
                constraints.facing.unwrap_or(FacingMode::Environment),
            ),
        }
        .ok_or_else(|| Error::media("NotFoundError", "Requested device not found"))?;

        self.stats.stream_opened();
        tracing::debug!(device = %device.label, "Simulated stream opened");

        Ok(Box::new(SimulatedStream {
            label: device.label.clone(),
            frames: Arc::clone(&self.frames),
            cursor: 0,
            warmup: self.warmup_frames,
            ready_delay: self.ready_delay,
            ready_failure: self.ready_failure.clone(),
            stall: self.stall_frames,
            live: true,
            torch: self.flash.then(|| SimulatedTorch {
                stats: Arc::clone(&self.stats),
            }),
            stats: Arc::clone(&self.stats),
        }))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        self.stats.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.clone())
    }

    fn is_secure_context(&self) -> bool {
        self.secure
    }
}

struct SimulatedTorch {
    stats: Arc<SimStats>,
}

impl FlashControl for SimulatedTorch {
    fn set_torch(&mut self, on: bool) -> Result<()> {
        self.stats.torch_on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

struct SimulatedStream {
    label: String,
    frames: Arc<Vec<DynamicImage>>,
    cursor: usize,
    warmup: usize,
    ready_delay: Option<Duration>,
    ready_failure: Option<(String, String)>,
    stall: bool,
    live: bool,
    torch: Option<SimulatedTorch>,
    stats: Arc<SimStats>,
}

#[async_trait]
impl MediaStream for SimulatedStream {
    fn label(&self) -> &str {
        &self.label
    }

    async fn ready(&mut self) -> Result<()> {
        if let Some(delay) = self.ready_delay {
            tokio::time::sleep(delay).await;
        }
        if !self.live {
            return Err(Error::media("InvalidStateError", "Track has ended"));
        }
        match &self.ready_failure {
            Some((name, message)) => Err(Error::media(name, message)),
            None => Ok(()),
        }
    }

    async fn current_frame(&mut self) -> Result<Option<DynamicImage>> {
        if !self.live {
            return Err(Error::FrameCapture("Simulated stream stopped".to_string()));
        }
        if self.warmup > 0 {
            self.warmup -= 1;
            return Ok(None);
        }
        if self.stall {
            std::future::pending::<()>().await;
        }

        let frame = match self.frames.len() {
            0 => DynamicImage::ImageLuma8(GrayImage::from_pixel(160, 120, Luma([255u8]))),
            len => self.frames[self.cursor.min(len - 1)].clone(),
        };
        self.cursor = self.cursor.saturating_add(1);
        Ok(Some(frame))
    }

    fn tracks(&self) -> Vec<TrackState> {
        vec![if self.live {
            TrackState::Live
        } else {
            TrackState::Ended
        }]
    }

    fn stop(&mut self) {
        if self.live {
            self.live = false;
            self.stats.stream_stopped();
            tracing::debug!(device = %self.label, "Simulated stream stopped");
        }
    }

    fn flash(&mut self) -> Option<&mut dyn FlashControl> {
        self.torch.as_mut().map(|t| t as &mut dyn FlashControl)
    }
}

impl Drop for SimulatedStream {
    fn drop(&mut self) {
        self.stop();
    }
}
