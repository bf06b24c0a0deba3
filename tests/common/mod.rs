//! Shared fixtures for integration tests

#![allow(dead_code)]

use image::{DynamicImage, GrayImage, ImageFormat, Luma, imageops};
use orderscan::camera::{MediaDeviceInfo, SimulatedDevices};
use orderscan::{AcquisitionEvent, AcquisitionSession, ChannelHandler};
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// Render `data` as a QR code frame
pub fn qr_frame(data: &str) -> DynamicImage {
    let raster = qrcode::QrCode::new(data.as_bytes())
        .expect("encode fixture")
        .render::<Luma<u8>>()
        .min_dimensions(240, 240)
        .build();
    DynamicImage::ImageLuma8(raster)
}

/// Light-on-dark variant of [`qr_frame`]
pub fn inverted_qr_frame(data: &str) -> DynamicImage {
    let mut raster = qr_frame(data).to_luma8();
    imageops::invert(&mut raster);
    DynamicImage::ImageLuma8(raster)
}

/// A frame without any code in it
pub fn blank_frame() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_pixel(320, 240, Luma([230u8])))
}

/// Encode a frame as PNG bytes, as an upload would arrive
pub fn png_bytes(frame: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    frame
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}

/// Front and back camera, labelled the way laptop and phone drivers do
pub fn two_cameras() -> SimulatedDevices {
    SimulatedDevices::new()
        .with_device(MediaDeviceInfo::video("cam-front", "Integrated Webcam (front)"))
        .with_device(MediaDeviceInfo::video("cam-back", "Back Camera"))
}

/// Session over `sim` reporting through a channel
pub fn session(
    sim: SimulatedDevices,
) -> (
    AcquisitionSession,
    Arc<SimulatedDevices>,
    UnboundedReceiver<AcquisitionEvent>,
) {
    let sim = Arc::new(sim);
    let (handler, events) = ChannelHandler::new();
    let session = AcquisitionSession::new(sim.clone(), Arc::new(handler));
    (session, sim, events)
}
