//! ORDERSCAN - resilient work-order identifier acquisition
//!
//! Turns a camera, a photo, or a typed code into a validated work-order
//! identifier. A field technician points a device at a QR placard; the
//! subsystem negotiates camera access, samples frames, decodes the code,
//! extracts the identifier and hands it to the host application. When the
//! camera cannot be used, still-image decoding, manual entry and suggestions
//! deliver through the same callback.
//!
//! # Features
//!
//! - **Camera negotiation**: facing-mode request with enumeration fallback,
//!   bounded readiness wait, guaranteed release
//! - **Frame scanning**: fixed-interval sampling with duplicate suppression
//! - **Error classification**: platform failures mapped to actionable categories
//! - **V4L2 backend**: direct Linux webcam access (`camera` feature)
//! - **Async-first**: built on Tokio; stale work is cancelled by session generation
//!
//! # Example
//!
//! ```no_run
//! use orderscan::camera::SimulatedDevices;
//! use orderscan::{AcquisitionEvent, AcquisitionSession, ChannelHandler};
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let devices = Arc::new(SimulatedDevices::from_dir(Path::new("frames"))?);
//!     let (handler, mut events) = ChannelHandler::new();
//!     let session = AcquisitionSession::new(devices, Arc::new(handler));
//!
//!     session.start().await;
//!     if let Some(AcquisitionEvent::Decoded(result)) = events.recv().await {
//!         println!("Work order: {}", result.identifier);
//!     }
//!     session.close().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs, rust_2024_compatibility)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod camera;
pub mod classify;
pub mod config;
pub mod error;
pub mod identifier;
pub mod logging;
pub mod qr;
pub mod scan;
pub mod session;
pub mod token;

use std::time::Duration;

// Re-exports for convenience
pub use error::{Error, Result};

pub use camera::{CameraConfig, CameraDevice, CameraPreference, FacingMode};
pub use classify::{ErrorCategory, classify};
pub use config::{CameraOptions, LogRotation, LoggingOptions, OrderscanConfig, ScanOptions};
pub use identifier::{DecodedResult, IdentifierNormalizer, Suggestion};
pub use qr::{QrDecoder, StillImageDecoder, StillImageOutcome};
pub use session::{
    AcquisitionEvent, AcquisitionHandler, AcquisitionSession, AcquisitionState, CameraTarget,
    ChannelHandler, SessionStatus,
};

/// Configuration for acquisition sessions
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Camera configuration
    pub camera_config: CameraConfig,
    /// Time between frame samples
    pub scan_interval: Duration,
    /// Bound on waiting for an attached stream to deliver frames
    pub ready_timeout: Duration,
    /// Path markers preceding an embedded identifier
    pub markers: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            camera_config: CameraConfig::default(),
            scan_interval: scan::DEFAULT_SCAN_INTERVAL,
            ready_timeout: camera::controller::DEFAULT_READY_TIMEOUT,
            markers: identifier::DEFAULT_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
        }
    }
}
