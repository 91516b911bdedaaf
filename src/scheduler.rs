use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use crate::config::ReceiverConfig;
use crate::decoders::PassDecoder;
use crate::fft::{FftParams, FftStream};
use crate::predict::Pass;
use crate::recorder::{Recorder, RecorderError};
use crate::satellite::Satellite;
use crate::sdr::ArbiterError;
use crate::sstv::{SstvCapture, SstvScanner};
use crate::state::{DopplerInfo, StateBus, Status};
use crate::store::{CaptureResult, Store};

/// Settle time after stopping the FFT producer before re-claiming USB.
const FFT_SETTLE: Duration = Duration::from_secs(1);
/// Retry delay when the arbiter reports the device busy.
const BUSY_RETRY: Duration = Duration::from_millis(1_200);

type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// Recording seam, satisfied by [`Recorder`] in production.
#[async_trait]
pub trait PassRecorder: Send + Sync {
    async fn record_pass(
        &self,
        satellite: &Satellite,
        duration: Duration,
        on_progress: ProgressFn,
    ) -> Result<PathBuf, RecorderError>;
}

#[async_trait]
impl PassRecorder for Recorder {
    async fn record_pass(
        &self,
        satellite: &Satellite,
        duration: Duration,
        on_progress: ProgressFn,
    ) -> Result<PathBuf, RecorderError> {
        Recorder::record_pass(self, satellite, duration, on_progress).await
    }
}

/// Pre-capture carrier verification seam.
#[async_trait]
pub trait SignalCheck: Send + Sync {
    /// Whether the downlink is audible, plus the measured peak in dB.
    async fn verify_signal(&self, satellite: &Satellite) -> (bool, Option<f64>);
}

/// Verifies a downlink by pointing the FFT producer at it for a couple
/// of integration windows.
pub struct FftSignalCheck {
    fft: FftStream,
    config: ReceiverConfig,
}

impl FftSignalCheck {
    pub fn new(fft: FftStream, config: ReceiverConfig) -> Self {
        FftSignalCheck { fft, config }
    }
}

#[async_trait]
impl SignalCheck for FftSignalCheck {
    async fn verify_signal(&self, satellite: &Satellite) -> (bool, Option<f64>) {
        let params = FftParams::carrier_watch(satellite.frequency_hz, self.fft.gain());
        match self.fft.retune(params).await {
            Ok(true) => {}
            Ok(false) | Err(_) => return (false, None),
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        let peak = self.fft.get_peak_power_in_band(20_000).map(f64::from);
        self.fft.stop().await;
        tokio::time::sleep(FFT_SETTLE).await;

        let present = peak
            .map(|p| p > self.config.capture.min_signal_strength_db)
            .unwrap_or(false);
        (present, peak)
    }
}

/// Waits out each predicted pass, captures it, decodes it and publishes
/// the result. Passes are strictly sequential; the SDR cannot serve two
/// consumers.
pub struct Scheduler {
    config: ReceiverConfig,
    bus: StateBus,
    fft: FftStream,
    scanner: Arc<SstvScanner>,
    recorder: Arc<dyn PassRecorder>,
    decoder: Arc<dyn PassDecoder>,
    signal_check: Arc<dyn SignalCheck>,
    store: Arc<Store>,
    cancel: Notify,
    cancelled: std::sync::atomic::AtomicBool,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: ReceiverConfig,
        bus: StateBus,
        fft: FftStream,
        scanner: Arc<SstvScanner>,
        recorder: Arc<dyn PassRecorder>,
        decoder: Arc<dyn PassDecoder>,
        signal_check: Arc<dyn SignalCheck>,
        store: Arc<Store>,
    ) -> Self {
        Scheduler {
            config,
            bus,
            fft,
            scanner,
            recorder,
            decoder,
            signal_check,
            store,
            cancel: Notify::new(),
            cancelled: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn scanner(&self) -> Arc<SstvScanner> {
        self.scanner.clone()
    }

    /// Ask the scheduler to wind down; waits return early and no new
    /// capture is started.
    pub fn shutdown(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.scanner.stop();
        self.cancel.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Process every pass in order. A failed capture does not abort the
    /// rest of the list.
    pub async fn run_scheduler(self: &Arc<Self>, passes: Vec<Pass>) -> Vec<CaptureResult> {
        let mut results = Vec::new();

        for (index, pass) in passes.iter().enumerate() {
            if self.is_cancelled() {
                break;
            }
            if pass.los <= Utc::now() {
                log::info!("skipping {}: LOS already past", pass.satellite.name);
                continue;
            }

            // Upcoming list shrinks monotonically and stays AOS-sorted.
            let upcoming: Vec<Pass> = passes[index..]
                .iter()
                .filter(|p| p.los > Utc::now())
                .cloned()
                .collect();
            self.bus.set_upcoming_passes(upcoming);

            self.wait_for_pass(pass).await;
            if self.is_cancelled() {
                break;
            }

            let result = self.capture_pass(pass).await;
            results.push(result);

            self.bus.set_status(Status::Idle);
            self.fft.maybe_restart();
        }

        self.bus.set_upcoming_passes(Vec::new());
        results
    }

    /// Sleep until shortly before AOS. Long enough gaps are handed to
    /// the ground SSTV scanner, bounded so it is done well before the
    /// pass.
    pub async fn wait_for_pass(self: &Arc<Self>, pass: &Pass) {
        let now = Utc::now();
        if pass.aos <= now {
            return;
        }

        self.bus.set_status(Status::Waiting);

        let idle_secs = (pass.aos - now).num_seconds().max(0) as u64;
        let scan_task = if idle_secs >= self.config.sstv.idle_threshold_secs
            && self.config.sstv.ground_scan_enabled
            && !self.scanner.is_scanning()
        {
            let budget = Duration::from_secs(
                idle_secs.saturating_sub(self.config.capture.safety_margin_secs),
            );
            let scheduler = self.clone();
            Some(tokio::spawn(async move {
                let scanner = scheduler.scanner.clone();
                let sensor = scheduler.fft.clone();
                scanner
                    .scan_for_sstv(&sensor, scheduler.as_ref(), budget)
                    .await
            }))
        } else {
            None
        };

        let lead = chrono::Duration::seconds(self.config.capture.pre_pass_lead_secs as i64);
        let wake_at = pass.aos - lead;
        let now = Utc::now();
        if wake_at > now {
            let sleep = (wake_at - now).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.cancel.notified() => {}
            }
        }

        // The SDR must be ours before AOS.
        self.scanner.stop();
        if let Some(task) = scan_task {
            if let Ok(Some(result)) = task.await {
                log::info!("ground SSTV capture during the wait: {}", result.id);
            }
        }
    }

    /// Capture one pass end to end: carrier check, record, decode,
    /// persist, broadcast.
    pub async fn capture_pass(&self, pass: &Pass) -> CaptureResult {
        let satellite = pass.satellite.clone();
        let started_at = Utc::now();

        // The waterfall must let go of the dongle first.
        if self.fft.is_running() {
            self.fft.stop().await;
            tokio::time::sleep(FFT_SETTLE).await;
        }

        let mut peak_db = None;
        if !self.config.capture.skip_signal_check {
            let (present, peak) = self.signal_check.verify_signal(&satellite).await;
            peak_db = peak;
            if !present {
                log::warn!("{}: no carrier, skipping pass", satellite.name);
                let mut result =
                    CaptureResult::failed(satellite, started_at, "signal_too_weak");
                result.peak_signal_db = peak_db;
                self.finish(&mut result).await;
                return result;
            }
        }

        self.bus.start_pass(pass.clone());
        if let (Some(max), Some(min)) = (pass.doppler_max_hz, pass.doppler_min_hz) {
            self.bus.set_doppler(Some(DopplerInfo {
                current_hz: max,
                min_hz: min,
                max_hz: max,
            }));
        }

        let duration = Duration::from_secs(pass.duration_seconds.max(1) as u64);
        let mut result = self
            .record_and_decode(satellite, started_at, duration)
            .await;
        result.peak_signal_db = result.peak_signal_db.or(peak_db);
        self.finish(&mut result).await;
        result
    }

    /// One-off SSTV capture on a fixed ground frequency, from the REST
    /// surface.
    pub async fn capture_sstv_manual(&self, frequency_hz: u64, duration_secs: u64) -> CaptureResult {
        self.capture_ground_sstv(frequency_hz, Duration::from_secs(duration_secs), "Manual")
            .await
    }

    async fn capture_ground_sstv(
        &self,
        frequency_hz: u64,
        duration: Duration,
        label: &str,
    ) -> CaptureResult {
        let satellite = Satellite::ground_sstv(frequency_hz, label);
        let started_at = Utc::now();

        if self.fft.is_running() {
            self.fft.stop().await;
            tokio::time::sleep(FFT_SETTLE).await;
        }

        self.bus.set_status(Status::Capturing);
        let mut result = self.record_and_decode(satellite, started_at, duration).await;
        self.finish(&mut result).await;
        self.bus.set_status(Status::Idle);
        result
    }

    async fn record_and_decode(
        &self,
        satellite: Satellite,
        started_at: chrono::DateTime<chrono::Utc>,
        duration: Duration,
    ) -> CaptureResult {
        let mut result = CaptureResult::new(satellite.clone(), started_at);

        let relay_progress = || -> ProgressFn {
            let bus = self.bus.clone();
            Box::new(move |elapsed, total| {
                let percent = if total > 0 {
                    elapsed as f64 / total as f64 * 100.0
                } else {
                    100.0
                };
                bus.update_progress(percent, elapsed, total);
            })
        };

        let recording = match self
            .recorder
            .record_pass(&satellite, duration, relay_progress())
            .await
        {
            Ok(path) => Ok(path),
            // One retry after the cooldown; a previous holder may still
            // be draining.
            Err(RecorderError::Arbiter(ArbiterError::Busy)) => {
                log::warn!("{}: device busy, retrying once", satellite.name);
                tokio::time::sleep(BUSY_RETRY).await;
                self.recorder
                    .record_pass(&satellite, duration, relay_progress())
                    .await
            }
            Err(e) => Err(e),
        };

        let recording = match recording {
            Ok(path) => path,
            Err(e) => {
                let kind = match e {
                    RecorderError::Arbiter(ArbiterError::Busy) => "device_busy",
                    RecorderError::ProducerDied => "producer_died",
                    _ => "recording_failed",
                };
                log::error!("{}: recording failed: {}", satellite.name, e);
                result.error = Some(kind.to_string());
                result.ended_at = Utc::now();
                return result;
            }
        };
        result.recording_path = Some(recording.clone());

        self.bus.set_status(Status::Decoding);
        let images = self.decoder.decode(&satellite, &recording).await;
        result.success = !images.is_empty();
        if images.is_empty() {
            // Recording is retained for a manual retry.
            result.error = Some("decode_failed".to_string());
        }
        result.image_paths = images;
        result.ended_at = Utc::now();
        result
    }

    /// Persist best-effort and broadcast. Every capture result reaches
    /// the UI, successful or not.
    async fn finish(&self, result: &mut CaptureResult) {
        if let Err(e) = self.store.save_capture(result) {
            log::warn!("store_unavailable: {}", e);
        }
        self.bus.complete_pass(result.clone());
    }
}

#[async_trait]
impl SstvCapture for Scheduler {
    async fn capture_sstv(
        &self,
        frequency_hz: u64,
        duration: Duration,
        label: &str,
    ) -> Option<CaptureResult> {
        Some(
            self.capture_ground_sstv(frequency_hz, duration, label)
                .await,
        )
    }
}
