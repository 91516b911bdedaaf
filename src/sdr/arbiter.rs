use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::sdr::process::SdrProcess;

/// Empirical USB re-enumeration delay after an RTL producer exits.
pub const USB_COOLDOWN: Duration = Duration::from_secs(1);
/// SIGTERM grace before SIGKILL when tearing a producer down.
pub const PRODUCER_GRACE: Duration = Duration::from_secs(3);

#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("device_busy: SDR is held by another producer")]
    Busy,
    #[error("producer_gone: the RTL child exited unexpectedly")]
    ProducerGone,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Record,
    Fft,
}

#[derive(Debug)]
enum Slot {
    Free { ready_at: Instant },
    Leased { intent: Intent },
    Draining,
}

#[derive(Debug)]
struct ArbiterInner {
    slot: Mutex<Slot>,
    released: Notify,
}

/// Sole owner of the RTL device. At most one lease exists at a time; a
/// lease must be released (or dropped) before the next acquire can
/// succeed, and a 1 s cooldown separates consecutive holders.
#[derive(Clone)]
pub struct Arbiter {
    inner: Arc<ArbiterInner>,
}

impl Default for Arbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl Arbiter {
    pub fn new() -> Self {
        Arbiter {
            inner: Arc::new(ArbiterInner {
                slot: Mutex::new(Slot::Free {
                    ready_at: Instant::now(),
                }),
                released: Notify::new(),
            }),
        }
    }

    /// Current holder, if any.
    pub fn holder(&self) -> Option<Intent> {
        match *self.inner.slot.lock().unwrap() {
            Slot::Leased { intent } => Some(intent),
            _ => None,
        }
    }

    /// Take the device for `intent`, waiting up to `timeout` for an
    /// existing holder to release and for the USB cooldown to elapse.
    pub async fn acquire(&self, intent: Intent, timeout: Duration) -> Result<SdrLease, ArbiterError> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for release notifications before inspecting the
            // slot, otherwise a release between check and wait is lost.
            let notified = self.inner.released.notified();

            let wait_until = {
                let mut slot = self.inner.slot.lock().unwrap();
                match *slot {
                    Slot::Free { ready_at } => {
                        if ready_at <= Instant::now() {
                            *slot = Slot::Leased { intent };
                            return Ok(SdrLease {
                                inner: self.inner.clone(),
                                intent,
                                producer: None,
                                released: false,
                            });
                        }
                        Some(ready_at)
                    }
                    Slot::Leased { .. } | Slot::Draining => None,
                }
            };

            let now = Instant::now();
            if now >= deadline {
                return Err(ArbiterError::Busy);
            }

            match wait_until {
                // Cooling down: sleep out the cooldown (or the deadline).
                Some(ready_at) => {
                    tokio::time::sleep_until(ready_at.min(deadline)).await;
                }
                // Held: wait for a release notification, then re-check.
                None => {
                    let _ = tokio::time::timeout(deadline - now, notified).await;
                }
            }
        }
    }

    /// Scoped acquisition with guaranteed release on every exit path,
    /// including a panicking body (the lease's drop handler cleans up).
    pub async fn with_lease<T>(
        &self,
        intent: Intent,
        timeout: Duration,
        f: impl for<'a> FnOnce(&'a mut SdrLease) -> BoxFuture<'a, Result<T, ArbiterError>>,
    ) -> Result<T, ArbiterError> {
        let mut lease = self.acquire(intent, timeout).await?;
        let result = f(&mut lease).await;
        lease.release().await;
        result
    }
}

/// Exclusive claim on the SDR. Holds the producer child (if one was
/// attached) so teardown and USB release are sequenced correctly.
#[derive(Debug)]
pub struct SdrLease {
    inner: Arc<ArbiterInner>,
    intent: Intent,
    producer: Option<SdrProcess>,
    released: bool,
}

impl SdrLease {
    pub fn intent(&self) -> Intent {
        self.intent
    }

    /// Register the RTL child this lease is backing.
    pub fn attach(&mut self, producer: SdrProcess) {
        self.producer = Some(producer);
    }

    pub fn producer_mut(&mut self) -> Option<&mut SdrProcess> {
        self.producer.as_mut()
    }

    /// `Err(ProducerGone)` once the attached child has exited.
    pub fn check_producer(&mut self) -> Result<(), ArbiterError> {
        match self.producer.as_mut() {
            Some(p) => match p.try_wait()? {
                Some(status) => {
                    log::warn!("producer_died: {} exited with {:?}", p.name(), status);
                    Err(ArbiterError::ProducerGone)
                }
                None => Ok(()),
            },
            None => Ok(()),
        }
    }

    /// Tear the producer down (SIGTERM, SIGKILL after 3 s), await its
    /// exit so USB is actually free, then open the slot after the 1 s
    /// cooldown.
    pub async fn release(mut self) {
        {
            let mut slot = self.inner.slot.lock().unwrap();
            *slot = Slot::Draining;
        }

        if let Some(mut producer) = self.producer.take() {
            if let Err(e) = producer.terminate(PRODUCER_GRACE).await {
                log::warn!("producer teardown failed: {}", e);
            }
        }

        self.released = true;
        let mut slot = self.inner.slot.lock().unwrap();
        *slot = Slot::Free {
            ready_at: Instant::now() + USB_COOLDOWN,
        };
        self.inner.released.notify_waiters();
    }
}

impl Drop for SdrLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // Unclean exit (panic or forgotten release). Kill the child
        // without awaiting and free the slot behind the cooldown.
        if let Some(mut producer) = self.producer.take() {
            producer.kill_now();
        }
        let mut slot = self.inner.slot.lock().unwrap();
        *slot = Slot::Free {
            ready_at: Instant::now() + USB_COOLDOWN,
        };
        self.inner.released.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_fails_while_leased() {
        let arbiter = Arbiter::new();
        let lease = arbiter.acquire(Intent::Fft, Duration::ZERO).await.unwrap();
        assert_eq!(arbiter.holder(), Some(Intent::Fft));

        let err = arbiter
            .acquire(Intent::Record, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::Busy));

        lease.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn release_enforces_the_usb_cooldown() {
        let arbiter = Arbiter::new();
        let lease = arbiter.acquire(Intent::Record, Duration::ZERO).await.unwrap();
        lease.release().await;

        // Inside the cooldown window the device is not yet grantable.
        let err = arbiter
            .acquire(Intent::Fft, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ArbiterError::Busy));

        // A patient caller rides out the cooldown.
        let lease = arbiter
            .acquire(Intent::Fft, Duration::from_secs(2))
            .await
            .unwrap();
        lease.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_acquire_wins_once_the_holder_releases() {
        let arbiter = Arbiter::new();
        let lease = arbiter.acquire(Intent::Fft, Duration::ZERO).await.unwrap();

        let contender = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                arbiter.acquire(Intent::Record, Duration::from_secs(10)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        lease.release().await;

        let lease = contender.await.unwrap().unwrap();
        assert_eq!(lease.intent(), Intent::Record);
        lease.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_holder_leaves_the_arbiter_free() {
        let arbiter = Arbiter::new();
        let task = {
            let arbiter = arbiter.clone();
            tokio::spawn(async move {
                let _lease = arbiter.acquire(Intent::Fft, Duration::ZERO).await.unwrap();
                panic!("consumer died mid-lease");
            })
        };
        assert!(task.await.is_err());

        // Free again within the cooldown window.
        let lease = arbiter
            .acquire(Intent::Record, Duration::from_secs(2))
            .await
            .unwrap();
        lease.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn with_lease_releases_on_the_error_path() {
        let arbiter = Arbiter::new();
        let result: Result<(), _> = arbiter
            .with_lease(Intent::Fft, Duration::ZERO, |_lease| {
                Box::pin(async { Err(ArbiterError::ProducerGone) })
            })
            .await;
        assert!(matches!(result, Err(ArbiterError::ProducerGone)));

        let lease = arbiter
            .acquire(Intent::Record, Duration::from_secs(2))
            .await
            .unwrap();
        lease.release().await;
    }
}
