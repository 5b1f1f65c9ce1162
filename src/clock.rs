use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Wall-clock source in UTC seconds since the Unix epoch.
///
/// Every instance schedules against this clock, never against a scaled
/// application clock, so deadlines written by one process mean the same
/// instant to every other process on the machine.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> f64;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Hand-driven clock for deterministic scenarios.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn set(&self, now: f64) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, secs: f64) {
        *self.now.lock() += secs;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> f64 {
        *self.now.lock()
    }
}
