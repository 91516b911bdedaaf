use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use utoipa::ToSchema;

use crate::fft::FftSlice;
use crate::predict::Pass;
use crate::store::CaptureResult;

/// Outbound queue depth per subscriber. A consumer that falls this far
/// behind is dropped rather than allowed to stall the bus.
const SUBSCRIBER_QUEUE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Waiting,
    Scanning,
    Capturing,
    Decoding,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CaptureProgress {
    pub percent: f64,
    pub elapsed_secs: u64,
    pub total_secs: u64,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DopplerInfo {
    pub current_hz: f64,
    pub min_hz: f64,
    pub max_hz: f64,
}

/// Singleton operator-visible state. Mutated only through [`StateBus`]
/// methods; readers get an owned snapshot.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemState {
    pub status: Status,
    pub current_pass: Option<Pass>,
    pub next_pass: Option<Pass>,
    pub upcoming_passes: Vec<Pass>,
    pub progress: Option<CaptureProgress>,
    pub doppler: Option<DopplerInfo>,
    pub scanning_frequency_hz: Option<u64>,
    pub sdr_connected: bool,
    pub last_update: DateTime<Utc>,
}

impl SystemState {
    fn new() -> Self {
        SystemState {
            status: Status::Idle,
            current_pass: None,
            next_pass: None,
            upcoming_passes: Vec::new(),
            progress: None,
            doppler: None,
            scanning_frequency_hz: None,
            sdr_connected: false,
            last_update: Utc::now(),
        }
    }
}

/// Events fanned out to WebSocket clients and internal listeners. The
/// `type` tags are the wire protocol of the operator UI.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    StatusChange {
        status: Status,
    },
    PassStart {
        pass: Pass,
    },
    PassComplete {
        result: CaptureResult,
    },
    Progress {
        percent: f64,
        elapsed_secs: u64,
        total_secs: u64,
    },
    ScanningFrequency {
        frequency_hz: Option<u64>,
        label: Option<String>,
    },
    FftSubscribed {
        running: bool,
        subscribers: usize,
    },
    FftUnsubscribed {
        subscribers: usize,
    },
    FftSlice {
        slice: FftSlice,
    },
    Error {
        message: String,
    },
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Event>,
}

struct BusInner {
    state: SystemState,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

/// Serializes all mutations of [`SystemState`] and delivers the resulting
/// events to every subscriber in mutation order.
#[derive(Clone)]
pub struct StateBus {
    inner: Arc<Mutex<BusInner>>,
}

pub struct EventStream {
    pub id: u64,
    rx: mpsc::Receiver<Event>,
}

impl EventStream {
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }
}

impl Default for StateBus {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBus {
    pub fn new() -> Self {
        StateBus {
            inner: Arc::new(Mutex::new(BusInner {
                state: SystemState::new(),
                subscribers: Vec::new(),
                next_id: 0,
            })),
        }
    }

    pub fn get_state(&self) -> SystemState {
        self.inner.lock().unwrap().state.clone()
    }

    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push(Subscriber { id, tx });
        EventStream { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    pub fn set_status(&self, status: Status) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.status = status;
        if status != Status::Scanning {
            inner.state.scanning_frequency_hz = None;
        }
        inner.state.last_update = Utc::now();
        Self::publish(&mut inner, Event::StatusChange { status });
    }

    pub fn start_pass(&self, pass: Pass) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.status = Status::Capturing;
        inner.state.current_pass = Some(pass.clone());
        inner.state.last_update = Utc::now();
        Self::publish(
            &mut inner,
            Event::StatusChange {
                status: Status::Capturing,
            },
        );
        Self::publish(&mut inner, Event::PassStart { pass });
    }

    pub fn complete_pass(&self, result: CaptureResult) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.current_pass = None;
        inner.state.progress = None;
        inner.state.doppler = None;
        inner.state.last_update = Utc::now();
        Self::publish(&mut inner, Event::PassComplete { result });
    }

    pub fn update_progress(&self, percent: f64, elapsed_secs: u64, total_secs: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.progress = Some(CaptureProgress {
            percent,
            elapsed_secs,
            total_secs,
        });
        inner.state.last_update = Utc::now();
        Self::publish(
            &mut inner,
            Event::Progress {
                percent,
                elapsed_secs,
                total_secs,
            },
        );
    }

    pub fn set_scanning_frequency(&self, frequency_hz: Option<u64>, label: Option<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.scanning_frequency_hz = frequency_hz;
        inner.state.last_update = Utc::now();
        Self::publish(
            &mut inner,
            Event::ScanningFrequency {
                frequency_hz,
                label,
            },
        );
    }

    pub fn set_upcoming_passes(&self, passes: Vec<Pass>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.next_pass = passes.first().cloned();
        inner.state.upcoming_passes = passes;
        inner.state.last_update = Utc::now();
    }

    pub fn set_doppler(&self, doppler: Option<DopplerInfo>) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.doppler = doppler;
        inner.state.last_update = Utc::now();
    }

    pub fn set_sdr_connected(&self, connected: bool) {
        let mut inner = self.inner.lock().unwrap();
        inner.state.sdr_connected = connected;
        inner.state.last_update = Utc::now();
    }

    /// Fan a non-state event (FFT lifecycle, slices, errors) out to
    /// subscribers in the same total order as state mutations.
    pub fn broadcast(&self, event: Event) {
        let mut inner = self.inner.lock().unwrap();
        Self::publish(&mut inner, event);
    }

    fn publish(inner: &mut BusInner, event: Event) {
        inner.subscribers.retain(|sub| {
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    log::warn!("dropping slow consumer {} (queue overflow)", sub.id);
                    false
                }
                // Receiver side already gone.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_mutation_order() {
        let bus = StateBus::new();
        let mut stream = bus.subscribe();

        bus.set_status(Status::Waiting);
        bus.set_status(Status::Capturing);
        bus.update_progress(50.0, 30, 60);
        bus.set_status(Status::Idle);

        let mut kinds = Vec::new();
        while let Some(event) = stream.try_recv() {
            kinds.push(match event {
                Event::StatusChange { status } => format!("status:{:?}", status),
                Event::Progress { .. } => "progress".to_string(),
                other => format!("{:?}", other),
            });
        }
        assert_eq!(
            kinds,
            vec![
                "status:Waiting",
                "status:Capturing",
                "progress",
                "status:Idle"
            ]
        );
    }

    #[tokio::test]
    async fn slow_consumer_is_dropped_without_stalling_others() {
        let bus = StateBus::new();
        let _slow = bus.subscribe(); // never drained
        let mut fast = bus.subscribe();

        for _ in 0..(SUBSCRIBER_QUEUE + 8) {
            bus.set_status(Status::Waiting);
            assert!(fast.try_recv().is_some());
        }

        // The undrained subscriber overflowed and was evicted.
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn snapshot_is_detached_from_the_bus() {
        let bus = StateBus::new();
        let before = bus.get_state();
        bus.set_status(Status::Scanning);
        assert_eq!(before.status, Status::Idle);
        assert_eq!(bus.get_state().status, Status::Scanning);
    }

    #[tokio::test]
    async fn leaving_scanning_clears_the_scan_frequency() {
        let bus = StateBus::new();
        bus.set_status(Status::Scanning);
        bus.set_scanning_frequency(Some(145_500_000), Some("2m SSTV".into()));
        assert_eq!(
            bus.get_state().scanning_frequency_hz,
            Some(145_500_000)
        );
        bus.set_status(Status::Idle);
        assert_eq!(bus.get_state().scanning_frequency_hz, None);
    }
}
