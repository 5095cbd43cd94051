//! # Time Bases
//!
//! Two clocks drive the stability timers:
//!
//! - **uptime**: monotonic, stops advancing while the process is
//!   suspended. Backs the in-process deferred queue.
//! - **realtime**: elapsed wall-clock time including suspension. Backs
//!   the exact alarm service and log timestamps.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use quanta::Instant;
use serde::Serialize;

/// Which clock a deadline is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeBase {
    Uptime,
    Realtime,
}

pub trait Clock: Send + Sync {
    fn uptime_ms(&self) -> u64;
    fn realtime_ms(&self) -> u64;

    fn now_ms(&self, base: TimeBase) -> u64 {
        match base {
            TimeBase::Uptime => self.uptime_ms(),
            TimeBase::Realtime => self.realtime_ms(),
        }
    }
}

/// Production clock: quanta for uptime, `SystemTime` for realtime.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn uptime_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    fn realtime_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and the simulator. Clones share time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    uptime: Arc<AtomicU64>,
    realtime: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance both time bases.
    pub fn advance(&self, ms: u64) {
        self.uptime.fetch_add(ms, Ordering::SeqCst);
        self.realtime.fetch_add(ms, Ordering::SeqCst);
    }

    /// Advance realtime only, as if the process slept through `ms`.
    pub fn suspend(&self, ms: u64) {
        self.realtime.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn uptime_ms(&self) -> u64 {
        self.uptime.load(Ordering::SeqCst)
    }

    fn realtime_ms(&self) -> u64 {
        self.realtime.load(Ordering::SeqCst)
    }
}
