use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::config::ReceiverConfig;
use crate::fft::{FftParams, FftStream};
use crate::state::{StateBus, Status};
use crate::store::CaptureResult;

/// How long to watch each frequency for a carrier.
const DWELL_DEFAULT: Duration = Duration::from_secs(20);
/// Peak-power sampling period during a dwell.
const SAMPLE_PERIOD: Duration = Duration::from_millis(500);
/// Band around the channel center searched for a carrier.
const DETECT_BAND_HZ: u64 = 10_000;
/// USB settle time between stopping the FFT producer and recording.
const USB_SETTLE: Duration = Duration::from_secs(1);

/// Spectrum access the scanner dwells on. Implemented by [`FftStream`];
/// tests substitute canned power readings.
#[async_trait]
pub trait CarrierSensor: Send + Sync {
    /// Point the spectrum producer at a new center frequency.
    async fn tune(&self, frequency_hz: u64) -> bool;
    /// Peak power in a centered band of the latest measurement, in dB.
    fn peak_db(&self, band_hz: u64) -> Option<f32>;
    /// Stop the producer so the SDR can be re-claimed for recording.
    async fn idle(&self);
}

#[async_trait]
impl CarrierSensor for FftStream {
    async fn tune(&self, frequency_hz: u64) -> bool {
        match self
            .retune(FftParams::carrier_watch(frequency_hz, self.gain()))
            .await
        {
            Ok(started) => started,
            Err(e) => {
                log::warn!("scanner retune failed: {}", e);
                false
            }
        }
    }

    fn peak_db(&self, band_hz: u64) -> Option<f32> {
        self.get_peak_power_in_band(band_hz)
    }

    async fn idle(&self) {
        self.stop().await;
    }
}

/// Records a detected transmission. Implemented by the scheduler.
#[async_trait]
pub trait SstvCapture: Send + Sync {
    async fn capture_sstv(
        &self,
        frequency_hz: u64,
        duration: Duration,
        label: &str,
    ) -> Option<CaptureResult>;
}

/// Opportunistic 2 m SSTV scanner for idle gaps between passes. At most
/// one scan is in flight; a second call returns `None` immediately.
pub struct SstvScanner {
    config: ReceiverConfig,
    bus: StateBus,
    scanning: Arc<AtomicBool>,
    stop_flag: Arc<AtomicBool>,
}

impl SstvScanner {
    pub fn new(config: ReceiverConfig, bus: StateBus) -> Self {
        SstvScanner {
            config,
            bus,
            scanning: Arc::new(AtomicBool::new(false)),
            stop_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    /// Cooperative cancellation; the scan returns at its next poll.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Dwell across the configured frequencies until a carrier is
    /// captured, the time budget runs out, or `stop()` is called.
    /// Returns the most recent capture, `None` if nothing was heard or
    /// a scan was already running.
    pub async fn scan_for_sstv(
        &self,
        sensor: &dyn CarrierSensor,
        capture: &dyn SstvCapture,
        budget: Duration,
    ) -> Option<CaptureResult> {
        if self
            .scanning
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::debug!("scan already in flight, ignoring");
            return None;
        }
        self.stop_flag.store(false, Ordering::SeqCst);

        let result = self.run_scan(sensor, capture, budget).await;

        // Whatever path got us here, never leave the UI stuck on
        // "scanning".
        self.bus.set_scanning_frequency(None, None);
        if self.bus.get_state().status == Status::Scanning {
            self.bus.set_status(Status::Idle);
        }
        self.scanning.store(false, Ordering::SeqCst);
        result
    }

    async fn run_scan(
        &self,
        sensor: &dyn CarrierSensor,
        capture: &dyn SstvCapture,
        budget: Duration,
    ) -> Option<CaptureResult> {
        let deadline = Instant::now() + budget;
        let threshold = self.config.capture.min_signal_strength_db as f32;
        let dwell = if self.config.sstv.dwell_secs > 0 {
            Duration::from_secs(self.config.sstv.dwell_secs)
        } else {
            DWELL_DEFAULT
        };
        let mut last_capture = None;

        self.bus.set_status(Status::Scanning);
        log::info!(
            "scanning {} SSTV frequencies (budget {:?})",
            self.config.sstv.scan_frequencies_hz.len(),
            budget
        );

        'frequencies: for &freq in &self.config.sstv.scan_frequencies_hz {
            if self.should_bail(deadline) {
                break;
            }

            self.bus
                .set_scanning_frequency(Some(freq), Some("2m SSTV".to_string()));
            if !sensor.tune(freq).await {
                continue;
            }

            let dwell_end = Instant::now() + dwell;
            while Instant::now() < dwell_end {
                if self.should_bail(deadline) {
                    break 'frequencies;
                }
                tokio::time::sleep(SAMPLE_PERIOD).await;

                let peak = sensor.peak_db(DETECT_BAND_HZ);
                // The configured threshold is used as-is. An earlier
                // -5 dB allowance tripped on the noise floor.
                if let Some(peak) = peak {
                    if peak > threshold {
                        log::info!(
                            "carrier on {:.3} MHz at {:.1} dB (threshold {:.1})",
                            freq as f64 / 1e6,
                            peak,
                            threshold
                        );
                        sensor.idle().await;
                        tokio::time::sleep(USB_SETTLE).await;

                        let duration =
                            Duration::from_secs(self.config.sstv.capture_duration_secs);
                        if let Some(result) =
                            capture.capture_sstv(freq, duration, "SSTV").await
                        {
                            last_capture = Some(result);
                        }
                        self.bus.set_status(Status::Scanning);
                        continue 'frequencies;
                    }
                }
            }
        }

        sensor.idle().await;
        last_capture
    }

    fn should_bail(&self, deadline: Instant) -> bool {
        self.stop_flag.load(Ordering::SeqCst) || Instant::now() >= deadline
    }
}
