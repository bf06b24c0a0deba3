//! Live frame scanning
//!
//! The loop samples the current frame on a fixed interval rather than on every
//! frame the sensor produces: 150 ms keeps decode latency low without burning
//! a core on a 30 fps feed.

use crate::camera::CameraController;
use crate::error::{Error, Result};
use crate::qr::{DecodePrimitive, InversionMode};
use crate::token::SessionToken;
use async_trait::async_trait;
use image::DynamicImage;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Default sampling interval
pub const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_millis(150);

/// Something the loop can sample frames from
#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Current frame, or `None` when no full frame is ready
    async fn grab(&self) -> Result<Option<DynamicImage>>;
}

#[async_trait]
impl FrameSource for tokio::sync::Mutex<CameraController> {
    async fn grab(&self) -> Result<Option<DynamicImage>> {
        // Busy means a stream is being negotiated or released; skip this tick
        match self.try_lock() {
            Ok(mut camera) => camera.current_frame().await,
            Err(_) => Ok(None),
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The loop is stopped; nothing was sampled
    Stopped,
    /// No full frame was ready
    Skipped,
    /// The frame held no readable code
    NoCode,
    /// Same payload as the last one reported
    Duplicate,
    /// A new payload; the loop has stopped itself
    Decoded(String),
}

/// Why [`FrameScanLoop::run`] returned
#[derive(Debug)]
pub enum ScanExit {
    /// A new payload was decoded
    Decoded(String),
    /// The session moved on or the loop was stopped
    Cancelled,
    /// The frame source failed
    Failed(Error),
}

/// Polling loop with duplicate suppression
#[derive(Debug, Clone)]
pub struct FrameScanLoop {
    interval: Duration,
    running: bool,
    last_payload: Option<String>,
    ticks: u64,
}

impl FrameScanLoop {
    /// Create a stopped loop sampling every `interval`
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: false,
            last_payload: None,
            ticks: 0,
        }
    }

    /// Sampling interval
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the loop will sample on the next tick
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Last payload reported
    pub fn last_payload(&self) -> Option<&str> {
        self.last_payload.as_deref()
    }

    /// Ticks processed since the last reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Arm the loop for a new session, forgetting the last payload
    pub fn reset(&mut self) {
        self.running = true;
        self.last_payload = None;
        self.ticks = 0;
    }

    /// Re-arm without forgetting the last payload
    pub fn resume(&mut self) {
        self.running = true;
    }

    /// Stop sampling. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Sample and decode one frame
    pub async fn tick<S>(&mut self, source: &S, decoder: &dyn DecodePrimitive) -> Result<TickOutcome>
    where
        S: FrameSource + ?Sized,
    {
        if !self.running {
            return Ok(TickOutcome::Stopped);
        }
        self.ticks += 1;

        let frame = match source.grab().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!(tick = self.ticks, "No frame ready, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
            // A corrupt frame is not a broken stream
            Err(Error::Image(reason)) => {
                warn!(tick = self.ticks, %reason, "Undecodable frame, skipping tick");
                return Ok(TickOutcome::Skipped);
            }
            Err(err) => return Err(err),
        };

        // Off-screen raster private to this tick
        let raster = frame.to_luma8();

        let outcome = match decoder.decode(&raster, InversionMode::DontInvert) {
            None => TickOutcome::NoCode,
            Some(payload) if payload.is_empty() => TickOutcome::NoCode,
            Some(payload) if self.last_payload.as_deref() == Some(payload.as_str()) => {
                TickOutcome::Duplicate
            }
            Some(payload) => {
                debug!(tick = self.ticks, length = payload.len(), "Frame decoded");
                self.last_payload = Some(payload.clone());
                self.running = false;
                TickOutcome::Decoded(payload)
            }
        };

        Ok(outcome)
    }

    /// Tick until a new payload is decoded, the token goes stale, or the source
    /// fails.
    ///
    /// A tick that overruns the interval causes the next one to be skipped
    /// rather than queued. A stale token abandons a tick mid-grab, dropping
    /// whatever the source holds.
    pub async fn run<S>(
        &mut self,
        source: &S,
        decoder: &dyn DecodePrimitive,
        token: &SessionToken,
    ) -> ScanExit
    where
        S: FrameSource + ?Sized,
    {
        let mut interval = time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    self.stop();
                    return ScanExit::Cancelled;
                }
                _ = interval.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                outcome = self.tick(source, decoder) => Some(outcome),
            };
            let Some(outcome) = outcome else {
                self.stop();
                return ScanExit::Cancelled;
            };

            match outcome {
                Ok(TickOutcome::Decoded(payload)) => return ScanExit::Decoded(payload),
                Ok(TickOutcome::Stopped) => return ScanExit::Cancelled,
                Ok(_) => {}
                Err(err) => {
                    self.stop();
                    return ScanExit::Failed(err);
                }
            }
        }
    }
}

impl Default for FrameScanLoop {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Generations;
    use image::{GrayImage, Luma};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Decoder answering from a script, then repeating its last answer
    struct ScriptedDecoder {
        answers: Mutex<VecDeque<Option<String>>>,
        last: Mutex<Option<String>>,
        calls: AtomicUsize,
    }

    impl ScriptedDecoder {
        fn new(answers: &[Option<&str>]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().map(|a| a.map(str::to_string)).collect()),
                last: Mutex::new(None),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl DecodePrimitive for ScriptedDecoder {
        fn decode(&self, _raster: &GrayImage, mode: InversionMode) -> Option<String> {
            assert_eq!(mode, InversionMode::DontInvert);
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut last = self.last.lock().unwrap();
            if let Some(next) = self.answers.lock().unwrap().pop_front() {
                *last = next;
            }
            last.clone()
        }
    }

    /// Source that withholds frames for the first `warmup` grabs
    struct StubSource {
        warmup: AtomicUsize,
        fail: bool,
    }

    impl StubSource {
        fn ready() -> Self {
            Self {
                warmup: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    #[async_trait]
    impl FrameSource for StubSource {
        async fn grab(&self) -> Result<Option<DynamicImage>> {
            if self.fail {
                return Err(Error::FrameCapture("unplugged".to_string()));
            }
            if self
                .warmup
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(None);
            }
            Ok(Some(DynamicImage::ImageLuma8(GrayImage::from_pixel(
                8,
                8,
                Luma([255u8]),
            ))))
        }
    }

    /// Source whose first `corrupt` frames fail to decode
    struct GlitchySource {
        corrupt: AtomicUsize,
    }

    #[async_trait]
    impl FrameSource for GlitchySource {
        async fn grab(&self) -> Result<Option<DynamicImage>> {
            if self
                .corrupt
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::Image("MJPEG decode failed: truncated".to_string()));
            }
            StubSource::ready().grab().await
        }
    }

    /// Source whose grab never completes, flagging when the grab is dropped
    struct StalledSource {
        abandoned: Arc<AtomicUsize>,
    }

    struct CountOnDrop(Arc<AtomicUsize>);

    impl Drop for CountOnDrop {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl FrameSource for StalledSource {
        async fn grab(&self) -> Result<Option<DynamicImage>> {
            let _held = CountOnDrop(Arc::clone(&self.abandoned));
            std::future::pending::<Result<Option<DynamicImage>>>().await
        }
    }

    #[tokio::test]
    async fn test_same_payload_reported_once() {
        let decoder = ScriptedDecoder::new(&[Some("WO-1")]);
        let source = StubSource::ready();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let mut decoded = 0;
        for _ in 0..10 {
            if let TickOutcome::Decoded(_) = scan.tick(&source, &decoder).await.unwrap() {
                decoded += 1;
            }
            // Host keeps the loop going as if the payload were unusable
            scan.resume();
        }

        assert_eq!(decoded, 1);
        assert_eq!(scan.last_payload(), Some("WO-1"));
    }

    #[tokio::test]
    async fn test_decoded_stops_loop() {
        let decoder = ScriptedDecoder::new(&[None, Some("WO-2")]);
        let source = StubSource::ready();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        assert_eq!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::NoCode);
        assert_eq!(
            scan.tick(&source, &decoder).await.unwrap(),
            TickOutcome::Decoded("WO-2".to_string())
        );
        assert!(!scan.is_running());
        assert_eq!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Stopped);

        scan.stop();
        scan.stop();
        assert!(!scan.is_running());
    }

    #[tokio::test]
    async fn test_new_payload_after_duplicate_is_reported() {
        let decoder = ScriptedDecoder::new(&[Some("A"), Some("A"), None, Some("A"), Some("B")]);
        let source = StubSource::ready();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let mut outcomes = Vec::new();
        for _ in 0..5 {
            outcomes.push(scan.tick(&source, &decoder).await.unwrap());
            scan.resume();
        }

        assert_eq!(
            outcomes,
            vec![
                TickOutcome::Decoded("A".to_string()),
                TickOutcome::Duplicate,
                TickOutcome::NoCode,
                TickOutcome::Duplicate,
                TickOutcome::Decoded("B".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_skips_until_frame_ready() {
        let decoder = ScriptedDecoder::new(&[Some("WO-3")]);
        let source = StubSource {
            warmup: AtomicUsize::new(2),
            fail: false,
        };
        let mut scan = FrameScanLoop::default();
        scan.reset();

        assert_eq!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Skipped);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
        assert!(matches!(
            scan.tick(&source, &decoder).await.unwrap(),
            TickOutcome::Decoded(_)
        ));
    }

    #[tokio::test]
    async fn test_reset_forgets_last_payload() {
        let decoder = ScriptedDecoder::new(&[Some("WO-4")]);
        let source = StubSource::ready();
        let mut scan = FrameScanLoop::default();

        scan.reset();
        assert!(matches!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Decoded(_)));
        scan.reset();
        assert!(scan.last_payload().is_none());
        assert!(matches!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Decoded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_samples_on_interval() {
        let decoder = ScriptedDecoder::new(&[None, None, None, Some("WO-5")]);
        let source = StubSource::ready();
        let generations = Generations::new();
        let token = generations.advance();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let started = time::Instant::now();
        let exit = scan.run(&source, &decoder, &token).await;
        assert!(matches!(exit, ScanExit::Decoded(ref p) if p == "WO-5"));
        // First tick fires immediately, three more intervals follow
        assert_eq!(started.elapsed(), DEFAULT_SCAN_INTERVAL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_when_token_goes_stale() {
        let decoder = ScriptedDecoder::new(&[None]);
        let source = StubSource::ready();
        let generations = Generations::new();
        let token = generations.advance();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let canceller = async {
            time::sleep(Duration::from_millis(500)).await;
            generations.advance();
        };
        let (exit, ()) = tokio::join!(scan.run(&source, &decoder, &token), canceller);

        assert!(matches!(exit, ScanExit::Cancelled));
        assert!(!scan.is_running());
    }

    #[tokio::test]
    async fn test_run_reports_source_failure() {
        let decoder = ScriptedDecoder::new(&[None]);
        let source = StubSource {
            warmup: AtomicUsize::new(0),
            fail: true,
        };
        let generations = Generations::new();
        let token = generations.advance();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let exit = scan.run(&source, &decoder, &token).await;
        assert!(matches!(exit, ScanExit::Failed(Error::FrameCapture(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_corrupt_frame_skips_tick() {
        let decoder = ScriptedDecoder::new(&[Some("WO-6")]);
        let source = GlitchySource {
            corrupt: AtomicUsize::new(1),
        };
        let mut scan = FrameScanLoop::default();
        scan.reset();

        assert_eq!(scan.tick(&source, &decoder).await.unwrap(), TickOutcome::Skipped);
        assert!(scan.is_running());

        let generations = Generations::new();
        let token = generations.advance();
        let exit = scan.run(&source, &decoder, &token).await;
        assert!(matches!(exit, ScanExit::Decoded(ref p) if p == "WO-6"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_token_abandons_stalled_grab() {
        let decoder = ScriptedDecoder::new(&[None]);
        let abandoned = Arc::new(AtomicUsize::new(0));
        let source = StalledSource {
            abandoned: Arc::clone(&abandoned),
        };
        let generations = Generations::new();
        let token = generations.advance();
        let mut scan = FrameScanLoop::default();
        scan.reset();

        let canceller = async {
            time::sleep(Duration::from_millis(500)).await;
            generations.advance();
        };
        let (exit, ()) = tokio::join!(scan.run(&source, &decoder, &token), canceller);

        assert!(matches!(exit, ScanExit::Cancelled));
        assert_eq!(abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(decoder.calls.load(Ordering::SeqCst), 0);
    }
}
