//! Injectable time source and provisional id generation.
//!
//! Timestamps come from a [`Clock`]; delays go through tokio's timer, so
//! tests pair a [`ManualClock`] with paused tokio time.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use spotter_shared::ProvisionalId;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Session-unique provisional ids: timestamp, monotonic sequence, random suffix.
#[derive(Debug, Default)]
pub struct ProvisionalIdGenerator {
    sequence: u64,
}

impl ProvisionalIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&mut self, now: DateTime<Utc>) -> ProvisionalId {
        self.sequence += 1;
        ProvisionalId::generate(now.timestamp_millis(), self.sequence, rand::random::<u32>())
    }
}
