//! V4L2 backend for Linux webcams
//!
//! Devices are `/dev/videoN` capture nodes. Frames are pulled from a
//! memory-mapped stream on tokio's blocking pool so a slow sensor never stalls
//! the scan loop's executor thread.

use crate::camera::{
    CameraConfig, FacingMode, FlashControl, MediaDeviceInfo, MediaDevices, MediaStream,
    PixelFormat, StreamConstraints, TrackState, select_device,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use image::{DynamicImage, GrayImage, ImageBuffer};
use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use v4l::buffer::Type;
use v4l::control::{Control, Description, Type as ControlType, Value};
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

const MAX_DEVICE_INDEX: usize = 10;
const DEVICE_PREFIX: &str = "/dev/video";
/// Bound on a single dequeue; a stalled sensor surfaces as a capture error
const CAPTURE_TIMEOUT: Duration = Duration::from_secs(2);

/// V4L2 media platform
#[derive(Debug, Clone)]
pub struct V4lDevices {
    config: CameraConfig,
}

impl V4lDevices {
    /// Create a backend opening devices with the given capture settings
    pub fn new(config: CameraConfig) -> Self {
        Self { config }
    }

    /// Enumerate `/dev/video*` capture devices (blocking)
    pub fn probe() -> Vec<MediaDeviceInfo> {
        let mut devices = Vec::new();

        for index in 0..MAX_DEVICE_INDEX {
            let Ok(dev) = Device::new(index) else {
                continue;
            };
            let Ok(caps) = dev.query_caps() else {
                continue;
            };
            // Metadata nodes share the driver but cannot capture
            if caps
                .capabilities
                .contains(v4l::capability::Flags::VIDEO_CAPTURE)
            {
                devices.push(MediaDeviceInfo::video(
                    format!("{DEVICE_PREFIX}{index}"),
                    caps.card,
                ));
            }
        }

        devices
    }

    fn open(config: &CameraConfig, constraints: &StreamConstraints) -> Result<V4lStream> {
        let info = match &constraints.device_id {
            Some(id) => {
                let index = parse_index(id)?;
                let dev = Device::new(index)
                    .map_err(|e| Error::device(format!("Failed to open {id}"), e))?;
                let caps = dev
                    .query_caps()
                    .map_err(|e| Error::device(format!("Failed to query {id}"), e))?;
                MediaDeviceInfo::video(id.clone(), caps.card)
            }
            None => {
                let devices = Self::probe();
                select_device(&devices, constraints.facing.unwrap_or(FacingMode::Environment))
                    .cloned()
                    .ok_or_else(|| {
                        Error::CameraNotFound("No V4L2 capture devices found".to_string())
                    })?
            }
        };

        V4lStream::open(info, config, constraints)
    }
}

#[async_trait]
impl MediaDevices for V4lDevices {
    async fn get_user_media(&self, constraints: &StreamConstraints) -> Result<Box<dyn MediaStream>> {
        let config = self.config.clone();
        let constraints = constraints.clone();

        let stream = tokio::task::spawn_blocking(move || Self::open(&config, &constraints))
            .await
            .map_err(|e| Error::Camera(format!("Camera open task failed: {e}")))??;

        Ok(Box::new(stream))
    }

    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        tokio::task::spawn_blocking(Self::probe)
            .await
            .map_err(|e| Error::Camera(format!("Device enumeration task failed: {e}")))
    }
}

fn parse_index(id: &str) -> Result<usize> {
    id.strip_prefix(DEVICE_PREFIX)
        .and_then(|n| n.parse::<usize>().ok())
        .ok_or_else(|| Error::media("NotFoundError", format!("Unknown device id '{id}'")))
}

/// Mapped stream plus the device it borrows from
struct CameraInner {
    /// Memory-mapped V4L2 stream kept warm between captures
    stream: MmapStream<'static>,
    /// Owning handle to the V4L device. Drop order ensures the stream is released first.
    _device: Box<Device>,
}

#[derive(Debug, Clone, Copy)]
struct FrameLayout {
    width: u32,
    height: u32,
    format: PixelFormat,
}

/// Live V4L2 capture stream
pub struct V4lStream {
    label: String,
    inner: Option<Arc<Mutex<CameraInner>>>,
    layout: FrameLayout,
    torch: Option<V4lTorch>,
}

impl V4lStream {
    fn open(
        info: MediaDeviceInfo,
        config: &CameraConfig,
        constraints: &StreamConstraints,
    ) -> Result<Self> {
        let index = parse_index(&info.id)?;
        tracing::info!("Opening camera: {} at {}", info.label, info.id);

        let dev = Device::new(index)
            .map_err(|e| Error::device(format!("Failed to open {}", info.id), e))?;

        let mut fmt = dev
            .format()
            .map_err(|e| Error::device("Failed to get format", e))?;
        fmt.width = constraints.width;
        fmt.height = constraints.height;
        fmt.fourcc = config.format.to_fourcc();

        // The driver may adjust the request; use what it actually granted
        let fmt = dev
            .set_format(&fmt)
            .map_err(|e| Error::device("Failed to set format", e))?;
        let format = match &fmt.fourcc.repr {
            b"MJPG" => PixelFormat::Mjpeg,
            b"YUYV" => PixelFormat::Yuyv,
            b"RGB3" => PixelFormat::Rgb24,
            other => {
                return Err(Error::Camera(format!(
                    "Unsupported pixel format {}",
                    String::from_utf8_lossy(other)
                )));
            }
        };

        let mut params = dev
            .params()
            .map_err(|e| Error::device("Failed to get params", e))?;
        params.interval = v4l::Fraction::new(1, constraints.fps.max(1));
        dev.set_params(&params)
            .map_err(|e| Error::device("Failed to set params", e))?;

        tracing::info!(
            "Camera configured: {}x{} @ {} fps ({})",
            fmt.width,
            fmt.height,
            constraints.fps,
            format.as_str()
        );

        let torch = V4lTorch::find(index);

        // SAFETY: The boxed device outlives the mmap stream and both are dropped together inside CameraInner.
        let device = Box::new(dev);
        let static_device: &'static Device =
            unsafe { mem::transmute::<&Device, &'static Device>(device.as_ref()) };

        let mut stream =
            MmapStream::with_buffers(static_device, Type::VideoCapture, config.buffer_count.max(2))
                .map_err(|e| Error::device("Failed to create stream", e))?;
        stream.set_timeout(CAPTURE_TIMEOUT);

        Ok(Self {
            label: info.label,
            inner: Some(Arc::new(Mutex::new(CameraInner {
                stream,
                _device: device,
            }))),
            layout: FrameLayout {
                width: fmt.width,
                height: fmt.height,
                format,
            },
            torch,
        })
    }

    async fn pull(&self) -> Result<DynamicImage> {
        let inner = self
            .inner
            .clone()
            .ok_or_else(|| Error::FrameCapture("Stream stopped".to_string()))?;
        let layout = self.layout;

        tokio::task::spawn_blocking(move || {
            let mut inner = inner
                .lock()
                .map_err(|_| Error::FrameCapture("Camera mutex poisoned".to_string()))?;
            let (buf, _meta) = inner
                .stream
                .next()
                .map_err(|e| Error::device("Failed to capture", e))?;
            decode_frame(buf, layout)
        })
        .await
        .map_err(|e| Error::FrameCapture(format!("Capture task failed: {e}")))?
    }
}

#[async_trait]
impl MediaStream for V4lStream {
    fn label(&self) -> &str {
        &self.label
    }

    async fn ready(&mut self) -> Result<()> {
        // The first dequeued buffer proves the sensor is streaming
        self.pull().await.map(|_| ())
    }

    async fn current_frame(&mut self) -> Result<Option<DynamicImage>> {
        self.pull().await.map(Some)
    }

    fn tracks(&self) -> Vec<TrackState> {
        vec![if self.inner.is_some() {
            TrackState::Live
        } else {
            TrackState::Ended
        }]
    }

    fn stop(&mut self) {
        self.torch = None;
        // A capture still in flight holds the last reference; the device closes
        // as soon as that frame completes.
        if self.inner.take().is_some() {
            tracing::debug!(device = %self.label, "V4L2 stream stopped");
        }
    }

    fn flash(&mut self) -> Option<&mut dyn FlashControl> {
        self.torch.as_mut().map(|t| t as &mut dyn FlashControl)
    }
}

impl Drop for V4lStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Torch exposed as a V4L2 control
struct V4lTorch {
    device: Device,
    control: Description,
}

impl V4lTorch {
    fn find(index: usize) -> Option<Self> {
        let device = Device::new(index).ok()?;
        let control = device.query_controls().ok()?.into_iter().find(|c| {
            let name = c.name.to_ascii_lowercase();
            name.contains("torch") || name.contains("flash") || name.contains("led")
        })?;
        tracing::debug!(control = %control.name, "Found torch control");
        Some(Self { device, control })
    }
}

impl FlashControl for V4lTorch {
    fn set_torch(&mut self, on: bool) -> Result<()> {
        let value = match self.control.typ {
            ControlType::Boolean => Value::Boolean(on),
            _ if on => Value::Integer(self.control.maximum),
            _ => Value::Integer(self.control.minimum),
        };

        self.device
            .set_control(Control {
                id: self.control.id,
                value,
            })
            .map_err(|e| Error::device(format!("Failed to set {}", self.control.name), e))
    }
}

/// Decode a frame buffer into an image
fn decode_frame(buf: &[u8], layout: FrameLayout) -> Result<DynamicImage> {
    match layout.format {
        // MJPEG is already compressed JPEG
        PixelFormat::Mjpeg => image::load_from_memory_with_format(buf, image::ImageFormat::Jpeg)
            .map_err(|e| Error::Image(format!("MJPEG decode failed: {}", e))),
        PixelFormat::Yuyv => yuyv_luma(buf, layout.width, layout.height),
        PixelFormat::Rgb24 => {
            ImageBuffer::from_raw(layout.width, layout.height, buf.to_vec())
                .map(DynamicImage::ImageRgb8)
                .ok_or_else(|| Error::Image("Failed to create RGB image".to_string()))
        }
    }
}

/// Keep only the Y samples of a YUYV frame; decoding needs luma alone
fn yuyv_luma(yuyv: &[u8], width: u32, height: u32) -> Result<DynamicImage> {
    let pixels = width as usize * height as usize;
    if yuyv.len() < pixels * 2 {
        return Err(Error::Image(format!(
            "Short YUYV frame: {} bytes for {}x{}",
            yuyv.len(),
            width,
            height
        )));
    }

    let luma = yuyv[..pixels * 2].iter().step_by(2).copied().collect();
    GrayImage::from_raw(width, height, luma)
        .map(DynamicImage::ImageLuma8)
        .ok_or_else(|| Error::Image("Failed to create luma image from YUYV".to_string()))
}
