//! Acquisition session state machine
//!
//! An [`AcquisitionSession`] drives one workflow from "open the scanner" to a
//! validated identifier:
//!
//! ```text
//! Idle -> RequestingAccess -> Active -> Idle (decoded / closed)
//!                 |              |
//!                 +----> Error <-+
//! ```
//!
//! Every start, switch, close or success moves the session to a new
//! generation. Work belonging to an older generation (an access request still
//! waiting on a permission prompt, a scan tick in flight) notices through its
//! [`SessionToken`] and discards its result; streams that arrive late are
//! released, never attached. The camera is released before any state change
//! or callback that follows leaving `Active`.

mod handler;

pub use handler::{AcquisitionEvent, AcquisitionHandler, ChannelHandler};

use crate::ScanConfig;
use crate::camera::{CameraController, CameraDevice, CameraPreference, FacingMode, MediaDevices};
use crate::classify::{ErrorCategory, classify};
use crate::error::{Error, Result};
use crate::identifier::{DecodedResult, IdentifierNormalizer, Suggestion};
use crate::qr::{DecodePrimitive, QrDecoder, StillImageDecoder, StillImageOutcome};
use crate::scan::{FrameScanLoop, ScanExit};
use crate::token::{Generations, SessionToken};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{Instrument, debug, info, warn};
use uuid::Uuid;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquisitionState {
    /// No camera activity
    #[default]
    Idle,
    /// Waiting for the platform to grant and start a stream
    RequestingAccess,
    /// Stream attached, frames being scanned
    Active,
    /// Acquisition failed; see [`SessionStatus::error`]
    Error,
}

impl AcquisitionState {
    /// Stable name for logs and JSON
    pub fn as_str(self) -> &'static str {
        match self {
            AcquisitionState::Idle => "idle",
            AcquisitionState::RequestingAccess => "requesting_access",
            AcquisitionState::Active => "active",
            AcquisitionState::Error => "error",
        }
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Camera to switch to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraTarget {
    /// Any device with this facing
    Facing(FacingMode),
    /// A device picked from [`AcquisitionSession::cameras`]
    Device(String),
}

/// Snapshot published to observers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionStatus {
    /// Current state
    pub state: AcquisitionState,
    /// Category of the last failure while in [`AcquisitionState::Error`]
    pub error: Option<ErrorCategory>,
    /// Camera requested on the next start or switch
    pub preference: CameraPreference,
    /// Whether the torch is lit
    pub flash_on: bool,
}

/// Builder for [`AcquisitionSession`]
pub struct SessionBuilder {
    devices: Arc<dyn MediaDevices>,
    handler: Arc<dyn AcquisitionHandler>,
    config: ScanConfig,
    decoder: Option<Arc<dyn DecodePrimitive>>,
    suggestions: Vec<Suggestion>,
}

impl SessionBuilder {
    /// Scan settings (defaults otherwise)
    pub fn config(mut self, config: ScanConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the rqrr-backed decoder
    pub fn decoder(mut self, decoder: Arc<dyn DecodePrimitive>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    /// Quick-select shortcuts offered next to manual entry
    pub fn suggestions(mut self, suggestions: Vec<Suggestion>) -> Self {
        self.suggestions = suggestions;
        self
    }

    /// Build an idle session
    pub fn build(self) -> AcquisitionSession {
        let decoder = self
            .decoder
            .unwrap_or_else(|| Arc::new(QrDecoder::new()));
        let secure_context = self.devices.is_secure_context();
        let preference = CameraPreference {
            facing: self.config.camera_config.facing,
            device_id: self.config.camera_config.device_id.clone(),
        };
        let camera = CameraController::new(self.devices, self.config.camera_config.clone())
            .with_ready_timeout(self.config.ready_timeout);
        let (status, _) = watch::channel(SessionStatus {
            preference,
            ..SessionStatus::default()
        });

        let core = SessionCore {
            id: Uuid::new_v4(),
            normalizer: IdentifierNormalizer::with_markers(&self.config.markers),
            still: StillImageDecoder::with_primitive(Arc::clone(&decoder)),
            decoder,
            camera: tokio::sync::Mutex::new(camera),
            secure_context,
            suggestions: self.suggestions,
            handler: self.handler,
            generations: Generations::new(),
            status,
            transitions: Mutex::new(()),
            config: self.config,
        };
        debug!(session = %core.id, "Acquisition session created");

        let core = Arc::new(core);
        AcquisitionSession {
            _unmount: Arc::new(Unmount(Arc::clone(&core))),
            core,
        }
    }
}

/// Handle on one acquisition workflow.
///
/// Cheap to clone; every clone drives the same session. Dropping the last
/// clone closes the session: in-flight work is cancelled and the camera is
/// released.
#[derive(Clone)]
pub struct AcquisitionSession {
    core: Arc<SessionCore>,
    _unmount: Arc<Unmount>,
}

/// Shared by every handle; the scan task holds only the core
struct Unmount(Arc<SessionCore>);

impl Drop for Unmount {
    fn drop(&mut self) {
        self.0.unmount();
    }
}

impl AcquisitionSession {
    /// Start building a session over a platform backend
    pub fn builder(
        devices: Arc<dyn MediaDevices>,
        handler: Arc<dyn AcquisitionHandler>,
    ) -> SessionBuilder {
        SessionBuilder {
            devices,
            handler,
            config: ScanConfig::default(),
            decoder: None,
            suggestions: Vec::new(),
        }
    }

    /// Session with default settings
    pub fn new(devices: Arc<dyn MediaDevices>, handler: Arc<dyn AcquisitionHandler>) -> Self {
        Self::builder(devices, handler).build()
    }

    /// Acquire the camera and start scanning.
    ///
    /// Only valid from `Idle` or `Error`; otherwise ignored. Resolves once the
    /// session is `Active`, has failed, or was superseded. Failures are
    /// reported through [`AcquisitionHandler::on_error`].
    pub async fn start(&self) {
        let token = self.core.transition(|status| match status.state {
            AcquisitionState::Idle | AcquisitionState::Error => {
                status.state = AcquisitionState::RequestingAccess;
                status.error = None;
                true
            }
            AcquisitionState::RequestingAccess | AcquisitionState::Active => false,
        });
        let Some(token) = token else {
            debug!(session = %self.core.id, state = %self.state(), "Start ignored");
            return;
        };

        info!(session = %self.core.id, generation = token.generation(), "Starting acquisition");
        self.core.acquire(token).await;
    }

    /// Stop scanning and release the camera, whatever is in flight
    pub async fn close(&self) {
        let Some(next) = self.core.transition(|_| true) else {
            return;
        };
        self.core.camera.lock().await.release();
        self.core.publish(&next, |status| {
            status.state = AcquisitionState::Idle;
            status.error = None;
            status.flash_on = false;
        });
        info!(session = %self.core.id, generation = next.generation(), "Acquisition closed");
    }

    /// Restart the active session on another camera.
    ///
    /// The current stream is fully released before the new one is requested.
    /// Ignored unless `Active`.
    pub async fn switch_camera(&self, target: CameraTarget) {
        let token = self.core.transition(|status| {
            if status.state != AcquisitionState::Active {
                return false;
            }
            status.preference = match &target {
                CameraTarget::Facing(facing) => CameraPreference::facing(*facing),
                CameraTarget::Device(id) => CameraPreference {
                    facing: status.preference.facing,
                    device_id: Some(id.clone()),
                },
            };
            true
        });
        let Some(token) = token else {
            debug!(session = %self.core.id, state = %self.state(), "Camera switch ignored");
            return;
        };

        info!(session = %self.core.id, generation = token.generation(), target = ?target, "Switching camera");
        self.core.acquire(token).await;
    }

    /// Switch the torch; `false` when unsupported, rejected or not `Active`
    pub async fn set_flash(&self, on: bool) -> bool {
        if self.state() != AcquisitionState::Active {
            return false;
        }

        let mut camera = self.core.camera.lock().await;
        let applied = camera.set_flash(on).await;
        let flash_on = camera.flash_on();
        drop(camera);

        self.core.update(|status| status.flash_on = flash_on);
        applied
    }

    /// Whether the attached stream exposes a torch
    pub async fn has_flash(&self) -> bool {
        self.core.camera.lock().await.has_flash()
    }

    /// Cameras the user can switch between
    pub async fn cameras(&self) -> Result<Vec<CameraDevice>> {
        self.core.camera.lock().await.list_cameras().await
    }

    /// Deliver a typed identifier, ending any camera session
    pub async fn submit_manual(&self, text: &str) -> Result<DecodedResult> {
        let result = DecodedResult::from_manual(&self.core.normalizer, text)
            .ok_or_else(|| Error::InvalidIdentifier(text.to_string()))?;
        self.core.complete(None, result.clone()).await;
        Ok(result)
    }

    /// Deliver a quick-select shortcut
    pub async fn select_suggestion(&self, suggestion: &Suggestion) -> Result<DecodedResult> {
        self.submit_manual(&suggestion.id).await
    }

    /// Decode a still image (photo or upload).
    ///
    /// A found code is delivered like a camera decode; `NotFound` is handed
    /// back for the host to report.
    pub async fn submit_image(&self, bytes: Vec<u8>) -> Result<StillImageOutcome> {
        let outcome = self.core.still.decode_blob(bytes).await?;
        self.deliver_still(outcome).await
    }

    /// Decode a still image from disk
    pub async fn submit_image_file(&self, path: impl AsRef<Path>) -> Result<StillImageOutcome> {
        let outcome = self.core.still.decode_file(path.as_ref()).await?;
        self.deliver_still(outcome).await
    }

    async fn deliver_still(&self, outcome: StillImageOutcome) -> Result<StillImageOutcome> {
        match &outcome {
            StillImageOutcome::Decoded(payload) => {
                let result = DecodedResult::from_payload(&self.core.normalizer, payload)
                    .ok_or_else(|| Error::InvalidIdentifier(payload.clone()))?;
                self.core.complete(None, result).await;
            }
            StillImageOutcome::NotFound => {
                info!(session = %self.core.id, "No code found in still image");
            }
        }
        Ok(outcome)
    }

    /// Current state
    pub fn state(&self) -> AcquisitionState {
        self.core.status.borrow().state
    }

    /// Category of the current failure, if any
    pub fn error(&self) -> Option<ErrorCategory> {
        self.core.status.borrow().error
    }

    /// Full status snapshot
    pub fn status(&self) -> SessionStatus {
        self.core.status.borrow().clone()
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.core.status.subscribe()
    }

    /// Host-supplied shortcuts
    pub fn suggestions(&self) -> &[Suggestion] {
        &self.core.suggestions
    }

    /// Tracing id of this session
    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// Whether the backend runs in a secure context
    pub fn is_secure_context(&self) -> bool {
        self.core.secure_context
    }

    /// Settings the session was built with
    pub fn config(&self) -> &ScanConfig {
        &self.core.config
    }
}

struct SessionCore {
    id: Uuid,
    config: ScanConfig,
    camera: tokio::sync::Mutex<CameraController>,
    secure_context: bool,
    decoder: Arc<dyn DecodePrimitive>,
    still: StillImageDecoder,
    normalizer: IdentifierNormalizer,
    suggestions: Vec<Suggestion>,
    handler: Arc<dyn AcquisitionHandler>,
    generations: Generations,
    status: watch::Sender<SessionStatus>,
    // Held while the generation and the published status change together
    transitions: Mutex<()>,
}

impl SessionCore {
    /// Apply `f` to the status; when it accepts, start a new generation and
    /// publish
    fn transition(&self, f: impl FnOnce(&mut SessionStatus) -> bool) -> Option<SessionToken> {
        let _guard = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.status.borrow().clone();
        if !f(&mut next) {
            return None;
        }

        let token = self.generations.advance();
        self.status.send_if_modified(|status| replace_if_changed(status, next));
        Some(token)
    }

    /// Apply `f` if `token` still names the current generation
    fn publish(&self, token: &SessionToken, f: impl FnOnce(&mut SessionStatus)) -> bool {
        let _guard = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        if !token.is_live() {
            return false;
        }

        let mut next = self.status.borrow().clone();
        f(&mut next);
        self.status.send_if_modified(|status| replace_if_changed(status, next));
        true
    }

    fn update(&self, f: impl FnOnce(&mut SessionStatus)) {
        let _guard = self.transitions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut next = self.status.borrow().clone();
        f(&mut next);
        self.status.send_if_modified(|status| replace_if_changed(status, next));
    }

    /// Last handle gone: cancel everything and release the camera.
    ///
    /// Runs in `Drop`, so the camera is released right away only when no task
    /// holds it; otherwise the holder observes the new generation, lets go,
    /// and the controller releases when the core drops.
    fn unmount(&self) {
        self.transition(|status| {
            status.state = AcquisitionState::Idle;
            status.error = None;
            status.flash_on = false;
            true
        });
        if let Ok(mut camera) = self.camera.try_lock() {
            camera.release();
        }
        debug!(session = %self.id, "Acquisition session dropped");
    }

    /// Request and attach a stream for `token`, then hand over to the scan
    /// task
    async fn acquire(self: &Arc<Self>, token: SessionToken) {
        // Held for the whole negotiation: requests never overlap
        let mut camera = self.camera.lock().await;
        camera.release();

        let entered = self.publish(&token, |status| {
            status.state = AcquisitionState::RequestingAccess;
            status.error = None;
            status.flash_on = false;
        });
        if !entered {
            debug!(session = %self.id, generation = token.generation(), "Access request superseded");
            return;
        }

        let preference = self.status.borrow().preference.clone();
        info!(
            session = %self.id,
            generation = token.generation(),
            facing = %preference.facing,
            device = ?preference.device_id,
            "Requesting camera access"
        );

        let opened = tokio::select! {
            result = open(&mut camera, &preference) => Some(result),
            _ = token.cancelled() => None,
        };

        match opened {
            None => {
                camera.release();
                debug!(session = %self.id, generation = token.generation(), "Access request cancelled");
            }
            Some(Err(err)) => {
                camera.release();
                drop(camera);

                let category = classify(&err, self.secure_context);
                let entered = self.publish(&token, |status| {
                    status.state = AcquisitionState::Error;
                    status.error = Some(category);
                });
                if entered {
                    warn!(
                        session = %self.id,
                        generation = token.generation(),
                        category = %category,
                        error = %err,
                        "Camera acquisition failed"
                    );
                    self.handler
                        .on_error(category, category.title(), category.message());
                }
            }
            Some(Ok(())) => {
                if !self.publish(&token, |status| status.state = AcquisitionState::Active) {
                    camera.release();
                    debug!(session = %self.id, generation = token.generation(), "Stream arrived for a stale session, released");
                    return;
                }
                info!(
                    session = %self.id,
                    generation = token.generation(),
                    device = camera.device_label().unwrap_or_default(),
                    "Scanning"
                );
                drop(camera);
                self.spawn_scan(token);
            }
        }
    }

    fn spawn_scan(self: &Arc<Self>, token: SessionToken) {
        let span = tracing::info_span!("scan", session = %self.id, generation = token.generation());
        let core = Arc::clone(self);
        tokio::spawn(core.scan(token).instrument(span));
    }

    async fn scan(self: Arc<Self>, token: SessionToken) {
        let mut scan = FrameScanLoop::new(self.config.scan_interval);
        scan.reset();

        loop {
            match scan.run(&self.camera, self.decoder.as_ref(), &token).await {
                ScanExit::Cancelled => {
                    debug!(ticks = scan.ticks(), "Scan loop stopped");
                    return;
                }
                ScanExit::Failed(err) => {
                    self.fail(&token, err).await;
                    return;
                }
                ScanExit::Decoded(payload) => {
                    match DecodedResult::from_payload(&self.normalizer, &payload) {
                        Some(result) => {
                            self.complete(Some(&token), result).await;
                            return;
                        }
                        None => {
                            warn!(payload = %payload, "Decoded payload carries no identifier");
                            scan.resume();
                        }
                    }
                }
            }
        }
    }

    /// Leave `Active` for `Error` after the stream broke mid-scan
    async fn fail(&self, token: &SessionToken, err: Error) {
        let Some(next) = self.transition(|_| token.is_live()) else {
            return;
        };
        self.camera.lock().await.release();

        let category = classify(&err, self.secure_context);
        let entered = self.publish(&next, |status| {
            status.state = AcquisitionState::Error;
            status.error = Some(category);
            status.flash_on = false;
        });
        if entered {
            warn!(category = %category, error = %err, "Camera stream failed");
            self.handler
                .on_error(category, category.title(), category.message());
        }
    }

    /// End the session with `result`.
    ///
    /// With a token, only the session that token belongs to may complete;
    /// manual and still-image input always wins. Returns whether the result
    /// was delivered.
    async fn complete(&self, token: Option<&SessionToken>, result: DecodedResult) -> bool {
        let Some(next) = self.transition(|_| token.is_none_or(SessionToken::is_live)) else {
            debug!(session = %self.id, "Result for a stale session dropped");
            return false;
        };
        self.camera.lock().await.release();
        self.publish(&next, |status| {
            status.state = AcquisitionState::Idle;
            status.error = None;
            status.flash_on = false;
        });

        info!(session = %self.id, identifier = %result.identifier, "Identifier acquired");
        self.handler.on_decoded(result);
        true
    }
}

async fn open(camera: &mut CameraController, preference: &CameraPreference) -> Result<()> {
    let stream = camera.request_access(preference).await?;
    camera.attach(stream).await
}

fn replace_if_changed(current: &mut SessionStatus, next: SessionStatus) -> bool {
    if *current == next {
        return false;
    }
    *current = next;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{MediaDeviceInfo, SimulatedDevices};
    use crate::qr::InversionMode;
    use image::GrayImage;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Decoder reporting the same answer for every frame
    struct FixedDecoder(Option<&'static str>);

    impl DecodePrimitive for FixedDecoder {
        fn decode(&self, _raster: &GrayImage, _mode: InversionMode) -> Option<String> {
            self.0.map(str::to_string)
        }
    }

    /// Records each callback with the number of live streams at call time
    struct Probe {
        sim: Arc<SimulatedDevices>,
        tx: mpsc::UnboundedSender<(AcquisitionEvent, usize)>,
    }

    impl AcquisitionHandler for Probe {
        fn on_decoded(&self, result: DecodedResult) {
            let _ = self
                .tx
                .send((AcquisitionEvent::Decoded(result), self.sim.live_streams()));
        }

        fn on_error(&self, category: ErrorCategory, title: &str, message: &str) {
            let event = AcquisitionEvent::Error {
                category,
                title: title.to_string(),
                message: message.to_string(),
            };
            let _ = self.tx.send((event, self.sim.live_streams()));
        }
    }

    fn two_cameras() -> SimulatedDevices {
        SimulatedDevices::new()
            .with_device(MediaDeviceInfo::video("cam-front", "Front Camera"))
            .with_device(MediaDeviceInfo::video("cam-back", "Back Camera"))
    }

    fn session(
        sim: SimulatedDevices,
        answer: Option<&'static str>,
    ) -> (
        AcquisitionSession,
        Arc<SimulatedDevices>,
        mpsc::UnboundedReceiver<(AcquisitionEvent, usize)>,
    ) {
        let sim = Arc::new(sim);
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Probe {
            sim: Arc::clone(&sim),
            tx,
        });
        let session = AcquisitionSession::builder(sim.clone(), handler)
            .decoder(Arc::new(FixedDecoder(answer)))
            .suggestions(vec![Suggestion::new("wo-7", "Work order 7")])
            .build();
        (session, sim, rx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_delivers_once_after_release() {
        let (session, sim, mut rx) =
            session(two_cameras(), Some("https://ops.example/verify/WO-42?ref=qr"));

        session.start().await;
        let (event, live) = rx.recv().await.unwrap();
        assert!(matches!(event, AcquisitionEvent::Decoded(ref r) if r.identifier == "WO-42"));
        assert_eq!(live, 0);
        assert_eq!(session.state(), AcquisitionState::Idle);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(sim.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_start_issues_one_request() {
        let (session, sim, _rx) =
            session(two_cameras().with_access_delay(Duration::from_millis(100)), None);

        tokio::join!(session.start(), session.start());
        assert_eq!(session.state(), AcquisitionState::Active);
        assert_eq!(sim.requests().len(), 1);
        assert_eq!(sim.live_streams(), 1);

        session.start().await;
        assert_eq!(sim.requests().len(), 1);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_during_access_request() {
        let (session, sim, mut rx) =
            session(two_cameras().with_access_delay(Duration::from_secs(2)), None);

        let starting = tokio::spawn({
            let session = session.clone();
            async move { session.start().await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state(), AcquisitionState::RequestingAccess);

        session.close().await;
        starting.await.unwrap();

        assert_eq!(session.state(), AcquisitionState::Idle);
        assert_eq!(sim.peak_live_streams(), 0);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(sim.live_streams(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_then_retry() {
        let sim = two_cameras()
            .fail_next("NotAllowedError", "Permission denied")
            .fail_next("NotAllowedError", "Permission denied");
        let (session, sim, mut rx) = session(sim, None);

        session.start().await;
        assert_eq!(session.state(), AcquisitionState::Error);
        assert_eq!(session.error(), Some(ErrorCategory::PermissionDenied));

        let (event, live) = rx.recv().await.unwrap();
        assert_eq!(live, 0);
        match event {
            AcquisitionEvent::Error {
                category, title, ..
            } => {
                assert_eq!(category, ErrorCategory::PermissionDenied);
                assert_eq!(title, ErrorCategory::PermissionDenied.title());
            }
            other => panic!("unexpected event {other:?}"),
        }

        session.start().await;
        assert_eq!(session.state(), AcquisitionState::Active);
        assert_eq!(session.error(), None);
        assert_eq!(sim.live_streams(), 1);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_insecure_context_classification() {
        let sim = two_cameras()
            .insecure()
            .fail_next("TypeError", "getUserMedia is undefined")
            .fail_next("TypeError", "getUserMedia is undefined");
        let (session, _sim, _rx) = session(sim, None);

        session.start().await;
        assert_eq!(session.error(), Some(ErrorCategory::InsecureContext));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_timeout_is_unknown() {
        let sim = two_cameras().with_ready_delay(Duration::from_secs(60));
        let (session, sim, mut rx) = session(sim, None);

        session.start().await;
        assert_eq!(session.error(), Some(ErrorCategory::Unknown));
        assert_eq!(sim.live_streams(), 0);
        let (event, _) = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            AcquisitionEvent::Error {
                category: ErrorCategory::Unknown,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_camera_releases_first() {
        let (session, sim, _rx) = session(two_cameras(), None);

        session.start().await;
        session
            .switch_camera(CameraTarget::Facing(FacingMode::User))
            .await;

        assert_eq!(session.state(), AcquisitionState::Active);
        assert_eq!(session.status().preference.facing, FacingMode::User);
        assert_eq!(sim.peak_live_streams(), 1);
        assert_eq!(sim.live_streams(), 1);
        let requests = sim.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].facing, Some(FacingMode::User));

        session
            .switch_camera(CameraTarget::Device("cam-back".to_string()))
            .await;
        assert_eq!(
            sim.requests()[2].device_id.as_deref(),
            Some("cam-back")
        );
        assert_eq!(sim.peak_live_streams(), 1);
        session.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_ignored_unless_active() {
        let (session, sim, _rx) = session(two_cameras(), None);
        session
            .switch_camera(CameraTarget::Facing(FacingMode::User))
            .await;
        assert_eq!(session.state(), AcquisitionState::Idle);
        assert!(sim.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_payload_without_identifier_keeps_scanning() {
        let (session, sim, mut rx) = session(two_cameras(), Some("https://ops.example/verify/"));

        session.start().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(session.state(), AcquisitionState::Active);
        assert!(rx.try_recv().is_err());

        session.close().await;
        assert_eq!(sim.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_entry_ends_camera_session() {
        let (session, sim, mut rx) = session(two_cameras(), None);
        session.start().await;
        assert_eq!(sim.live_streams(), 1);

        let result = session.submit_manual("  abc-123  ").await.unwrap();
        assert_eq!(result.identifier, "ABC-123");
        assert_eq!(session.state(), AcquisitionState::Idle);

        let (event, live) = rx.recv().await.unwrap();
        assert_eq!(event, AcquisitionEvent::Decoded(result));
        assert_eq!(live, 0);
    }

    #[tokio::test]
    async fn test_blank_manual_entry_rejected() {
        let (session, _sim, mut rx) = session(two_cameras(), None);
        let err = session.submit_manual("   ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidIdentifier(_)));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_select_suggestion() {
        let (session, _sim, mut rx) = session(two_cameras(), None);
        let suggestion = session.suggestions()[0].clone();

        let result = session.select_suggestion(&suggestion).await.unwrap();
        assert_eq!(result.identifier, "WO-7");
        assert!(matches!(rx.recv().await, Some((AcquisitionEvent::Decoded(_), 0))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flash_follows_stream() {
        let (session, sim, _rx) = session(two_cameras().with_flash(), None);

        assert!(!session.set_flash(true).await);
        session.start().await;
        assert!(session.has_flash().await);
        assert!(session.set_flash(true).await);
        assert!(session.status().flash_on);
        assert!(sim.torch_on());

        session.close().await;
        assert!(!session.status().flash_on);
        assert!(!sim.torch_on());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_transitions() {
        let (session, _sim, _rx) = session(two_cameras(), None);
        let mut status = session.subscribe();
        assert_eq!(status.borrow_and_update().state, AcquisitionState::Idle);

        session.start().await;
        assert!(status.has_changed().unwrap());
        assert_eq!(status.borrow_and_update().state, AcquisitionState::Active);

        session.close().await;
        assert_eq!(status.borrow_and_update().state, AcquisitionState::Idle);
    }

    #[tokio::test]
    async fn test_cameras_lists_inputs() {
        let (session, _sim, _rx) = session(two_cameras(), None);
        let cameras = session.cameras().await.unwrap();
        assert_eq!(cameras.len(), 2);
        assert!(cameras.iter().any(|c| c.rear_facing));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_releases_camera() {
        let (session, sim, mut rx) = session(two_cameras(), None);
        session.start().await;
        assert_eq!(sim.live_streams(), 1);

        drop(session.clone());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state(), AcquisitionState::Active);
        assert_eq!(sim.live_streams(), 1);

        let status = session.subscribe();
        drop(session);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sim.live_streams(), 0);
        assert_eq!(status.borrow().state, AcquisitionState::Idle);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_session_mid_frame_releases_camera() {
        let (session, sim, _rx) = session(two_cameras().stall_frames(), None);
        session.start().await;
        // Let the scan task get stuck inside a frame read
        tokio::time::sleep(Duration::from_millis(500)).await;

        drop(session);
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sim.live_streams(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_with_stalled_frame_read() {
        let (session, sim, mut rx) = session(two_cameras().stall_frames(), None);
        session.start().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(session.state(), AcquisitionState::Active);

        tokio::time::timeout(Duration::from_secs(1), session.close())
            .await
            .expect("close completes while a frame read is pending");
        assert_eq!(session.state(), AcquisitionState::Idle);
        assert_eq!(sim.live_streams(), 0);
        assert!(rx.try_recv().is_err());
    }
}
