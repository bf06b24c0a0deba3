//! Host-facing callbacks

use crate::classify::ErrorCategory;
use crate::identifier::DecodedResult;
use serde::Serialize;
use tokio::sync::mpsc;

/// Receives the outcome of an acquisition session.
///
/// Camera decodes, still images, manual entry and suggestions all arrive
/// through `on_decoded`; the host cannot and should not tell them apart.
pub trait AcquisitionHandler: Send + Sync {
    /// An identifier was acquired. Called at most once per session, after the
    /// camera has been released.
    fn on_decoded(&self, result: DecodedResult);

    /// Acquisition failed; the host should offer retry and fallbacks.
    fn on_error(&self, category: ErrorCategory, title: &str, message: &str);
}

/// Event forwarded by [`ChannelHandler`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AcquisitionEvent {
    /// See [`AcquisitionHandler::on_decoded`]
    Decoded(DecodedResult),
    /// See [`AcquisitionHandler::on_error`]
    Error {
        /// Classified failure
        category: ErrorCategory,
        /// Heading
        title: String,
        /// Guidance
        message: String,
    },
}

/// Handler forwarding every callback into an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<AcquisitionEvent>,
}

impl ChannelHandler {
    /// Create a handler and the receiving end of its channel
    pub fn new() -> (Self, mpsc::UnboundedReceiver<AcquisitionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: AcquisitionEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Acquisition event dropped, receiver closed");
        }
    }
}

impl AcquisitionHandler for ChannelHandler {
    fn on_decoded(&self, result: DecodedResult) {
        self.send(AcquisitionEvent::Decoded(result));
    }

    fn on_error(&self, category: ErrorCategory, title: &str, message: &str) {
        self.send(AcquisitionEvent::Error {
            category,
            title: title.to_string(),
            message: message.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_handler_forwards() {
        let (handler, mut rx) = ChannelHandler::new();
        handler.on_error(ErrorCategory::CameraInUse, "t", "m");
        handler.on_decoded(DecodedResult {
            raw_payload: "x".to_string(),
            identifier: "X".to_string(),
        });

        assert!(matches!(
            rx.try_recv().unwrap(),
            AcquisitionEvent::Error {
                category: ErrorCategory::CameraInUse,
                ..
            }
        ));
        assert!(matches!(rx.try_recv().unwrap(), AcquisitionEvent::Decoded(r) if r.identifier == "X"));
    }

    #[test]
    fn test_closed_receiver_is_ignored() {
        let (handler, rx) = ChannelHandler::new();
        drop(rx);
        handler.on_error(ErrorCategory::Unknown, "t", "m");
    }

    #[test]
    fn test_event_json_shape() {
        let event = AcquisitionEvent::Error {
            category: ErrorCategory::PermissionDenied,
            title: "t".to_string(),
            message: "m".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["category"], "permission_denied");
    }
}
