//! Still-image fallback decoding
//!
//! Used when no camera is usable: the user picks or captures a photo and the
//! code is read from it in one pass, with no stream involved.

use crate::error::{Error, Result};
use crate::qr::{DecodePrimitive, InversionMode, QrDecoder};
use std::path::Path;
use std::sync::Arc;

/// Outcome of decoding a still image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StillImageOutcome {
    /// A code was found
    Decoded(String),
    /// The image holds no readable code; the user should pick another image
    NotFound,
}

impl StillImageOutcome {
    /// Payload if one was found
    pub fn payload(&self) -> Option<&str> {
        match self {
            StillImageOutcome::Decoded(payload) => Some(payload),
            StillImageOutcome::NotFound => None,
        }
    }
}

/// Decodes codes from uploaded or selected images
#[derive(Clone)]
pub struct StillImageDecoder {
    decoder: Arc<dyn DecodePrimitive>,
}

impl StillImageDecoder {
    /// Create a still-image decoder backed by rqrr
    pub fn new() -> Self {
        Self::with_primitive(Arc::new(QrDecoder::new()))
    }

    /// Create a still-image decoder over a custom decode primitive
    pub fn with_primitive(decoder: Arc<dyn DecodePrimitive>) -> Self {
        Self { decoder }
    }

    /// Decode an encoded image (PNG, JPEG, ...) held in memory.
    ///
    /// Only unreadable image data is an error; an image without a code is
    /// `StillImageOutcome::NotFound`.
    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<StillImageOutcome> {
        let img = image::load_from_memory(bytes)?;
        // Native size: photos are decoded at full resolution
        let raster = img.to_luma8();

        tracing::debug!(
            width = raster.width(),
            height = raster.height(),
            "Decoding still image"
        );

        Ok(match self.decoder.decode(&raster, InversionMode::AttemptBoth) {
            Some(payload) => StillImageOutcome::Decoded(payload),
            None => StillImageOutcome::NotFound,
        })
    }

    /// Decode an image blob on the blocking pool
    pub async fn decode_blob(&self, bytes: Vec<u8>) -> Result<StillImageOutcome> {
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.decode_bytes(&bytes))
            .await
            .map_err(|e| Error::Other(format!("Still-image decode task failed: {e}")))?
    }

    /// Read and decode an image file
    pub async fn decode_file(&self, path: &Path) -> Result<StillImageOutcome> {
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            Error::Image(format!("Failed to read image {}: {e}", path.display()))
        })?;
        self.decode_blob(bytes).await
    }
}

impl Default for StillImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}
