use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use utoipa::ToSchema;

use crate::config::ReceiverConfig;
use crate::sdr::{Arbiter, Intent, SdrProcess, SharedGain};
use crate::state::{Event, StateBus, Status};

/// Collapses subscribe churn from UI panels into at most one start.
pub const START_DEBOUNCE: Duration = Duration::from_millis(500);
/// Grace before stopping once the registry empties.
const STOP_GRACE: Duration = Duration::from_millis(500);
const LEASE_TIMEOUT: Duration = Duration::from_secs(2);

pub const DEFAULT_SPAN_HZ: u64 = 2_400_000;
pub const FFT_SIZE: u32 = 2048;
pub const UPDATE_RATE_HZ: u32 = 30;

#[derive(Debug, Error)]
pub enum FftError {
    #[error(transparent)]
    Arbiter(#[from] crate::sdr::ArbiterError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FftParams {
    pub center_frequency_hz: u64,
    pub span_hz: u64,
    pub fft_size: u32,
    pub gain: f64,
    pub update_rate_hz: u32,
}

impl FftParams {
    /// Full-bandwidth waterfall around a center frequency.
    pub fn waterfall(center_frequency_hz: u64, gain: f64) -> Self {
        FftParams {
            center_frequency_hz,
            span_hz: DEFAULT_SPAN_HZ,
            fft_size: FFT_SIZE,
            gain,
            update_rate_hz: UPDATE_RATE_HZ,
        }
    }

    /// Narrow span used for carrier detection (scanner, signal check).
    pub fn carrier_watch(center_frequency_hz: u64, gain: f64) -> Self {
        FftParams {
            span_hz: 100_000,
            ..Self::waterfall(center_frequency_hz, gain)
        }
    }
}

/// One windowed power-spectrum measurement. Never stored; fanned out
/// live and kept only as `latest` for carrier detection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FftSlice {
    pub timestamp_ms: i64,
    pub center_frequency_hz: u64,
    pub hz_per_bin: f64,
    pub bins_db: Vec<f32>,
    pub min_db: f32,
    pub max_db: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Notch {
    pub id: u32,
    pub frequency_hz: u64,
    pub bandwidth_hz: u64,
    pub enabled: bool,
}

struct FftWorker {
    stop_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

struct FftShared {
    running: bool,
    params: Option<FftParams>,
    error: Option<String>,
    latest: Option<FftSlice>,
    subscribers: HashMap<String, u64>,
    notches: Vec<Notch>,
    next_notch_id: u32,
    worker: Option<FftWorker>,
    starts: u64,
}

struct FftInner {
    arbiter: Arbiter,
    bus: StateBus,
    config: ReceiverConfig,
    gain: SharedGain,
    shared: Mutex<FftShared>,
    debounce: Mutex<Option<JoinHandle<()>>>,
}

/// Runs the power-spectrum producer and maintains the subscriber
/// registry. The producer child is started at most once regardless of
/// how fast clients toggle their subscriptions.
#[derive(Clone)]
pub struct FftStream {
    inner: Arc<FftInner>,
}

impl FftStream {
    pub fn new(arbiter: Arbiter, bus: StateBus, config: ReceiverConfig, gain: SharedGain) -> Self {
        FftStream {
            inner: Arc::new(FftInner {
                arbiter,
                bus,
                config,
                gain,
                shared: Mutex::new(FftShared {
                    running: false,
                    params: None,
                    error: None,
                    latest: None,
                    subscribers: HashMap::new(),
                    notches: Vec::new(),
                    next_notch_id: 1,
                    worker: None,
                    starts: 0,
                }),
                debounce: Mutex::new(None),
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.shared.lock().unwrap().running
    }

    pub fn gain(&self) -> f64 {
        self.inner.gain.get()
    }

    pub fn set_gain(&self, gain: f64) {
        self.inner.gain.set(gain);
    }

    pub fn get_config(&self) -> Option<FftParams> {
        self.inner.shared.lock().unwrap().params
    }

    pub fn get_error(&self) -> Option<String> {
        self.inner.shared.lock().unwrap().error.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.shared.lock().unwrap().subscribers.len()
    }

    pub fn get_latest_fft_data(&self) -> Option<FftSlice> {
        self.inner.shared.lock().unwrap().latest.clone()
    }

    /// Peak power within a band centered on the stream's center
    /// frequency, from the most recent slice.
    pub fn get_peak_power_in_band(&self, band_hz: u64) -> Option<f32> {
        let shared = self.inner.shared.lock().unwrap();
        let slice = shared.latest.as_ref()?;
        if slice.bins_db.is_empty() || slice.hz_per_bin <= 0.0 {
            return None;
        }
        let half_bins = ((band_hz as f64 / 2.0) / slice.hz_per_bin).ceil() as usize;
        let mid = slice.bins_db.len() / 2;
        let lo = mid.saturating_sub(half_bins);
        let hi = (mid + half_bins + 1).min(slice.bins_db.len());
        slice.bins_db[lo..hi]
            .iter()
            .copied()
            .fold(None, |acc: Option<f32>, v| {
                Some(acc.map_or(v, |a| a.max(v)))
            })
    }

    /// Register interest. Kicks the debounced start if policy permits.
    pub fn subscribe(&self, subscriber_id: &str, frequency_hz: u64) {
        let (running, count) = {
            let mut shared = self.inner.shared.lock().unwrap();
            shared
                .subscribers
                .insert(subscriber_id.to_string(), frequency_hz);
            (shared.running, shared.subscribers.len())
        };
        self.inner.bus.broadcast(Event::FftSubscribed {
            running,
            subscribers: count,
        });
        self.schedule_start(frequency_hz);
    }

    pub fn unsubscribe(&self, subscriber_id: &str) {
        let count = {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.subscribers.remove(subscriber_id);
            shared.subscribers.len()
        };
        self.inner
            .bus
            .broadcast(Event::FftUnsubscribed { subscribers: count });

        if count == 0 {
            self.cancel_debounce();
            let stream = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(STOP_GRACE).await;
                if stream.subscriber_count() == 0 {
                    stream.stop().await;
                }
            });
        }
    }

    /// Restart after a capture finishes, iff subscribers are present and
    /// the stream is not already running.
    pub fn maybe_restart(&self) {
        let (count, running, freq) = {
            let shared = self.inner.shared.lock().unwrap();
            let freq = shared.subscribers.values().next().copied();
            (shared.subscribers.len(), shared.running, freq)
        };
        if count > 0 && !running {
            if let Some(freq) = freq {
                self.schedule_start(freq);
            }
        }
    }

    fn schedule_start(&self, frequency_hz: u64) {
        self.cancel_debounce();
        let stream = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(START_DEBOUNCE).await;
            let params = FftParams::waterfall(frequency_hz, stream.gain());
            if let Err(e) = stream.start(params).await {
                log::warn!("debounced FFT start failed: {}", e);
            }
        });
        *self.inner.debounce.lock().unwrap() = Some(handle);
    }

    fn cancel_debounce(&self) {
        if let Some(handle) = self.inner.debounce.lock().unwrap().take() {
            handle.abort();
        }
    }

    /// Low-level entry: claim the SDR and launch the producer. Returns
    /// `Ok(false)` without touching the device when the stream is
    /// already running or the system is capturing/decoding.
    pub async fn start(&self, params: FftParams) -> Result<bool, FftError> {
        let status = self.inner.bus.get_state().status;
        if matches!(status, Status::Capturing | Status::Decoding) {
            log::debug!("FFT start suppressed while {:?}", status);
            return Ok(false);
        }
        {
            let shared = self.inner.shared.lock().unwrap();
            if shared.running {
                return Ok(false);
            }
        }

        let mut lease = self.inner.arbiter.acquire(Intent::Fft, LEASE_TIMEOUT).await?;

        let (program, args) = self.producer_command(&params);
        let mut producer = match SdrProcess::spawn(&program, &args) {
            Ok(p) => p,
            Err(e) => {
                lease.release().await;
                let mut shared = self.inner.shared.lock().unwrap();
                shared.error = Some(e.to_string());
                return Err(e.into());
            }
        };
        let stdout = producer.take_stdout();
        lease.attach(producer);

        let (stop_tx, stop_rx) = oneshot::channel();
        let stream = self.clone();
        let join = tokio::spawn(async move {
            stream.reader_loop(lease, stdout, stop_rx).await;
        });

        let mut shared = self.inner.shared.lock().unwrap();
        shared.running = true;
        shared.params = Some(params);
        shared.error = None;
        shared.starts += 1;
        shared.worker = Some(FftWorker { stop_tx, join });
        Ok(true)
    }

    /// Terminate the producer and release the lease. Idempotent.
    pub async fn stop(&self) {
        let worker = {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.worker.take()
        };
        if let Some(worker) = worker {
            let _ = worker.stop_tx.send(());
            let _ = worker.join.await;
        }
        let mut shared = self.inner.shared.lock().unwrap();
        shared.running = false;
        shared.params = None;
    }

    /// Stop, then start on a new center frequency (used by the scanner
    /// while it dwells across the 2 m SSTV channels).
    pub async fn retune(&self, params: FftParams) -> Result<bool, FftError> {
        self.stop().await;
        self.start(params).await
    }

    async fn reader_loop(
        &self,
        lease: crate::sdr::SdrLease,
        stdout: Option<tokio::process::ChildStdout>,
        mut stop_rx: oneshot::Receiver<()>,
    ) {
        let mut stopped = false;
        if let Some(stdout) = stdout {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        stopped = true;
                        break;
                    }
                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => {
                                if let Some(slice) = self.ingest_line(&line) {
                                    self.inner.bus.broadcast(Event::FftSlice { slice });
                                }
                            }
                            // EOF or read error: the producer is gone.
                            Ok(None) | Err(_) => break,
                        }
                    }
                }
            }
        }

        if !stopped {
            // Producer died out from under us; surface it and drain.
            log::warn!("producer_died: FFT producer exited unexpectedly");
            {
                let mut shared = self.inner.shared.lock().unwrap();
                shared.error = Some("producer_died".to_string());
                shared.running = false;
                shared.params = None;
                shared.worker = None;
            }
            self.inner.bus.broadcast(Event::Error {
                message: "producer_died".to_string(),
            });
        }

        lease.release().await;
    }

    /// Parse one `rtl_power` CSV row, apply notches, store it as the
    /// latest slice.
    fn ingest_line(&self, line: &str) -> Option<FftSlice> {
        let mut slice = parse_power_line(line)?;
        let mut shared = self.inner.shared.lock().unwrap();
        apply_notches(&mut slice, &shared.notches);
        shared.latest = Some(slice.clone());
        Some(slice)
    }

    fn producer_command(&self, params: &FftParams) -> (String, Vec<String>) {
        let low = params.center_frequency_hz - params.span_hz / 2;
        let high = params.center_frequency_hz + params.span_hz / 2;
        let step = (params.span_hz / params.fft_size as u64).max(1);
        let interval = 1.0 / params.update_rate_hz as f64;
        (
            self.inner.config.programs.rtl_power.clone(),
            vec![
                "-f".into(),
                format!("{}:{}:{}", low, high, step),
                "-i".into(),
                format!("{:.3}", interval),
                "-g".into(),
                format!("{}", params.gain),
                "-p".into(),
                self.inner.config.sdr.ppm.to_string(),
            ],
        )
    }

    // ---- notch surface ----

    pub fn add_notch(&self, frequency_hz: u64, bandwidth_hz: u64) -> Notch {
        let mut shared = self.inner.shared.lock().unwrap();
        let notch = Notch {
            id: shared.next_notch_id,
            frequency_hz,
            bandwidth_hz,
            enabled: true,
        };
        shared.next_notch_id += 1;
        shared.notches.push(notch.clone());
        notch
    }

    pub fn remove_notch(&self, id: u32) -> bool {
        let mut shared = self.inner.shared.lock().unwrap();
        let before = shared.notches.len();
        shared.notches.retain(|n| n.id != id);
        shared.notches.len() != before
    }

    pub fn set_notch_enabled(&self, id: u32, enabled: bool) -> bool {
        let mut shared = self.inner.shared.lock().unwrap();
        match shared.notches.iter_mut().find(|n| n.id == id) {
            Some(n) => {
                n.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn clear_notches(&self) {
        self.inner.shared.lock().unwrap().notches.clear();
    }

    pub fn get_notches(&self) -> Vec<Notch> {
        self.inner.shared.lock().unwrap().notches.clone()
    }

    #[cfg(test)]
    pub(crate) fn start_count(&self) -> u64 {
        self.inner.shared.lock().unwrap().starts
    }

    #[cfg(test)]
    pub(crate) fn inject_slice(&self, slice: FftSlice) {
        self.inner.shared.lock().unwrap().latest = Some(slice);
    }
}

/// `rtl_power` CSV: date, time, hz_low, hz_high, hz_step, samples,
/// dB, dB, ... One row per integration window.
fn parse_power_line(line: &str) -> Option<FftSlice> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 7 {
        return None;
    }
    let hz_low: f64 = fields[2].parse().ok()?;
    let hz_high: f64 = fields[3].parse().ok()?;
    let hz_step: f64 = fields[4].parse().ok()?;
    let bins_db: Vec<f32> = fields[6..]
        .iter()
        .map(|f| f.parse::<f32>())
        .collect::<Result<_, _>>()
        .ok()?;
    if bins_db.is_empty() {
        return None;
    }

    let (mut min_db, mut max_db) = (f32::INFINITY, f32::NEG_INFINITY);
    for &v in &bins_db {
        min_db = min_db.min(v);
        max_db = max_db.max(v);
    }

    Some(FftSlice {
        timestamp_ms: chrono::Utc::now().timestamp_millis(),
        center_frequency_hz: ((hz_low + hz_high) / 2.0) as u64,
        hz_per_bin: hz_step,
        bins_db,
        min_db,
        max_db,
    })
}

/// Zero out bins falling inside any enabled notch.
fn apply_notches(slice: &mut FftSlice, notches: &[Notch]) {
    if notches.iter().all(|n| !n.enabled) {
        return;
    }
    let n_bins = slice.bins_db.len() as f64;
    let start_hz = slice.center_frequency_hz as f64 - slice.hz_per_bin * n_bins / 2.0;
    for (i, bin) in slice.bins_db.iter_mut().enumerate() {
        let bin_hz = start_hz + (i as f64 + 0.5) * slice.hz_per_bin;
        for notch in notches.iter().filter(|n| n.enabled) {
            let half = notch.bandwidth_hz as f64 / 2.0;
            if (bin_hz - notch.frequency_hz as f64).abs() <= half {
                *bin = 0.0;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(rtl_power: &str) -> ReceiverConfig {
        let yaml = format!(
            r#"
station: {{ latitude_deg: 52.0, longitude_deg: 0.0 }}
sdr: {{ gain: 29.7 }}
paths:
  recordings_dir: /tmp/rec
  images_dir: /tmp/img
  captures_dir: /tmp/cap
  tle_dir: /tmp/tle
programs: {{ rtl_power: "{rtl_power}" }}
"#
        );
        serde_yaml::from_str(&yaml).unwrap()
    }

    fn make_stream(rtl_power: &str) -> (FftStream, Arbiter, StateBus) {
        let arbiter = Arbiter::new();
        let bus = StateBus::new();
        let stream = FftStream::new(
            arbiter.clone(),
            bus.clone(),
            test_config(rtl_power),
            SharedGain::new(29.7),
        );
        (stream, arbiter, bus)
    }

    fn sample_slice(center: u64, hz_per_bin: f64, bins_db: Vec<f32>) -> FftSlice {
        let (mut min_db, mut max_db) = (f32::INFINITY, f32::NEG_INFINITY);
        for &v in &bins_db {
            min_db = min_db.min(v);
            max_db = max_db.max(v);
        }
        FftSlice {
            timestamp_ms: 0,
            center_frequency_hz: center,
            hz_per_bin,
            bins_db,
            min_db,
            max_db,
        }
    }

    #[test]
    fn power_lines_parse_into_slices() {
        let line = "2026-08-02, 12:00:00, 145450000, 145550000, 48.8, 256, -42.1, -40.0, -55.3";
        let slice = parse_power_line(line).unwrap();
        assert_eq!(slice.center_frequency_hz, 145_500_000);
        assert_eq!(slice.bins_db.len(), 3);
        assert_eq!(slice.max_db, -40.0);
        assert_eq!(slice.min_db, -55.3);

        assert!(parse_power_line("garbage").is_none());
        assert!(parse_power_line("a, b, c, d, e, f, not_a_number").is_none());
    }

    #[test]
    fn peak_search_is_limited_to_the_requested_band() {
        let (stream, _, _) = make_stream("rtl_power");
        assert!(stream.get_latest_fft_data().is_none());

        // 11 bins, 1 kHz each, strong bin at the edge (outside ±2 kHz).
        let mut bins = vec![-60.0_f32; 11];
        bins[0] = -10.0;
        bins[5] = -45.0;
        stream.inject_slice(sample_slice(145_500_000, 1_000.0, bins));
        assert_eq!(
            stream.get_latest_fft_data().unwrap().center_frequency_hz,
            145_500_000
        );

        let peak = stream.get_peak_power_in_band(4_000).unwrap();
        assert_eq!(peak, -45.0);
        let wide = stream.get_peak_power_in_band(30_000).unwrap();
        assert_eq!(wide, -10.0);
    }

    #[test]
    fn enabled_notches_zero_bins() {
        let notches = vec![Notch {
            id: 1,
            frequency_hz: 145_500_000,
            bandwidth_hz: 2_000,
            enabled: true,
        }];
        let mut slice = sample_slice(145_500_000, 1_000.0, vec![-40.0; 9]);
        apply_notches(&mut slice, &notches);
        // Center bins inside ±1 kHz were zeroed, edges untouched.
        assert_eq!(slice.bins_db[4], 0.0);
        assert_eq!(slice.bins_db[0], -40.0);

        let disabled = vec![Notch {
            enabled: false,
            ..notches[0].clone()
        }];
        let mut slice = sample_slice(145_500_000, 1_000.0, vec![-40.0; 9]);
        apply_notches(&mut slice, &disabled);
        assert_eq!(slice.bins_db[4], -40.0);
    }

    #[test]
    fn notch_surface_round_trips() {
        let (stream, _, _) = make_stream("rtl_power");
        let notch = stream.add_notch(137_000_000, 5_000);
        assert!(notch.enabled);
        assert!(stream.set_notch_enabled(notch.id, false));
        assert!(!stream.get_notches()[0].enabled);
        assert!(stream.remove_notch(notch.id));
        assert!(!stream.remove_notch(notch.id));
        stream.add_notch(1, 1);
        stream.clear_notches();
        assert!(stream.get_notches().is_empty());
    }

    #[tokio::test]
    async fn rapid_subscribes_collapse_into_one_start() {
        let (stream, _, _) = make_stream("yes");
        stream.subscribe("a", 137_500_000);
        tokio::time::sleep(Duration::from_millis(100)).await;
        stream.subscribe("b", 137_500_000);

        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(stream.is_running());
        assert_eq!(stream.start_count(), 1);
        assert_eq!(stream.subscriber_count(), 2);

        stream.stop().await;
        assert!(!stream.is_running());
    }

    #[tokio::test]
    async fn subscribe_while_capturing_never_touches_the_device() {
        let (stream, arbiter, bus) = make_stream("yes");
        bus.set_status(Status::Capturing);

        stream.subscribe("panel", 137_500_000);
        tokio::time::sleep(Duration::from_millis(700)).await;

        assert!(!stream.is_running());
        assert_eq!(stream.start_count(), 0);
        assert!(arbiter.holder().is_none());
    }

    #[tokio::test]
    async fn unsubscribing_the_last_client_stops_the_stream() {
        let (stream, arbiter, _) = make_stream("yes");
        stream.subscribe("only", 145_500_000);
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(stream.is_running());
        assert_eq!(arbiter.holder(), Some(Intent::Fft));

        stream.unsubscribe("only");
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(!stream.is_running());
        assert!(arbiter.holder().is_none());
    }
}
