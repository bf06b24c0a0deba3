//! Error types for orderscan operations

use std::time::Duration;
use thiserror::Error;

/// Result type alias using orderscan's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for orderscan operations
#[derive(Error, Debug)]
pub enum Error {
    /// Exception raised by the platform's media layer while acquiring a stream.
    ///
    /// `name` carries the platform's identifying name (e.g. `NotAllowedError`),
    /// `message` its human-readable detail.
    #[error("{name}: {message}")]
    Media {
        /// Identifying exception name
        name: String,
        /// Platform message
        message: String,
    },

    /// OS-level device failure (open, ioctl, mmap)
    #[error("{context}: {source}")]
    Device {
        /// What was being attempted
        context: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Camera-related errors
    #[error("Camera error: {0}")]
    Camera(String),

    /// Camera device not found
    #[error("Camera device not found: {0}")]
    CameraNotFound(String),

    /// The attached stream never reported readiness
    #[error("Camera stream not ready after {0:?}")]
    ReadyTimeout(Duration),

    /// Failed to capture frame from camera
    #[error("Frame capture failed: {0}")]
    FrameCapture(String),

    /// QR code decoding failed
    #[error("Failed to decode QR code: {0}")]
    QrDecode(String),

    /// Input did not yield a usable identifier
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image processing error
    #[error("Image processing error: {0}")]
    Image(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a platform media exception from its name and message.
    pub fn media(name: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Media {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Wrap an I/O error with the device operation that produced it.
    pub fn device(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Device {
            context: context.into(),
            source,
        }
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Other(format!("JSON error: {}", e))
    }
}
