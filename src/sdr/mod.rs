pub mod arbiter;
pub mod process;

pub use arbiter::{Arbiter, ArbiterError, Intent, SdrLease};
pub use process::SdrProcess;

use std::sync::{Arc, Mutex};

/// Tuner gain shared between the recorder and the FFT stream. Seeded
/// from the config at boot, adjustable at runtime from the REST
/// surface; applies to the next producer start.
#[derive(Clone)]
pub struct SharedGain(Arc<Mutex<f64>>);

impl SharedGain {
    pub fn new(gain: f64) -> Self {
        SharedGain(Arc::new(Mutex::new(gain)))
    }

    pub fn get(&self) -> f64 {
        *self.0.lock().unwrap()
    }

    pub fn set(&self, gain: f64) {
        *self.0.lock().unwrap() = gain;
    }
}
