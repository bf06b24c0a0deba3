//! QR code decoding
//!
//! This module provides the pixel-buffer decode primitive shared by the live
//! frame loop and the still-image fallback.

mod decoder;
pub mod still;

pub use decoder::QrDecoder;
pub use still::{StillImageDecoder, StillImageOutcome};

use image::GrayImage;
use serde::{Deserialize, Serialize};

/// How hard the decoder searches for light-on-dark codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InversionMode {
    /// Only look for dark modules on a light background (live feeds)
    #[default]
    DontInvert,
    /// Retry on the inverted raster when the normal pass finds nothing
    AttemptBoth,
}

/// Pixel-buffer QR decode primitive.
///
/// Returns the first decodable payload, or `None` when the raster holds no
/// readable code. Implementations must be cheap enough to run once per scan
/// tick.
pub trait DecodePrimitive: Send + Sync {
    /// Decode a grayscale raster
    fn decode(&self, raster: &GrayImage, mode: InversionMode) -> Option<String>;
}
