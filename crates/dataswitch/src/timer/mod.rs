//! # Stability Timers
//!
//! One pending timer per logical key, each in one of two states:
//!
//! ```text
//!   Idle ──schedule──▶ Scheduled(extra, deadline) ──fire / cancel──▶ Idle
//!                         │        ▲
//!                         └────────┘ schedule with a different extra
//! ```
//!
//! Scheduling a key with the extra it already carries is a no-op, so the
//! original deadline stands. Any other schedule replaces the pending one.
//!
//! Delays below [`LONG_DELAY_THRESHOLD_MS`] go to the in-process
//! [`DeferredQueue`]; longer ones go to the wall-clock [`AlarmService`],
//! which keeps counting through process suspension. Cancel always clears
//! both backends, whichever one the key was armed on.

pub mod alarm;
pub mod deferred;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::clock::{Clock, TimeBase};
use crate::engine::EvaluationReason;
use crate::policy::PendingDecision;

pub use alarm::AlarmService;
pub use deferred::DeferredQueue;

/// Delays at or above this many milliseconds use the alarm backend.
pub const LONG_DELAY_THRESHOLD_MS: u64 = 60_000;

/// Logical event class a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerKey {
    /// Deferred re-evaluation (validation retry).
    Evaluate,
    /// Stability debounce before acting on a pending decision.
    StabilityCheck,
}

/// Payload delivered when a timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerExtra {
    Evaluate(EvaluationReason),
    Stability(PendingDecision),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Deferred,
    Alarm,
}

impl Backend {
    pub fn for_delay(delay_ms: u64) -> Self {
        if delay_ms >= LONG_DELAY_THRESHOLD_MS {
            Backend::Alarm
        } else {
            Backend::Deferred
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Armed(Backend),
    AlreadyScheduled,
}

/// A deadline store on one time base.
pub trait TimerBackend: Send {
    fn time_base(&self) -> TimeBase;
    fn arm(&mut self, key: TimerKey, deadline_ms: u64);
    fn disarm(&mut self, key: TimerKey) -> bool;
    fn is_armed(&self, key: TimerKey) -> bool;
    fn next_deadline(&self) -> Option<u64>;
    /// Remove and return every key whose deadline is at or before `now_ms`.
    fn take_due(&mut self, now_ms: u64) -> Vec<TimerKey>;
}

/// What the decision engine sees of the timers.
pub trait TimerService {
    fn schedule(&mut self, key: TimerKey, extra: TimerExtra, delay_ms: u64) -> ScheduleOutcome;
    /// Returns whether anything was pending.
    fn cancel(&mut self, key: TimerKey) -> bool;
}

/// Bookkeeping for a scheduled key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScheduledTimer {
    pub key: TimerKey,
    pub extra: TimerExtra,
    pub backend: Backend,
    pub delay_ms: u64,
    /// Deadline on the backend's own time base.
    pub deadline_ms: u64,
}

pub struct StabilityTimers {
    clock: Arc<dyn Clock>,
    deferred: Box<dyn TimerBackend>,
    alarm: Box<dyn TimerBackend>,
    scheduled: BTreeMap<TimerKey, ScheduledTimer>,
}

impl StabilityTimers {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_backends(clock, Box::new(DeferredQueue::new()), Box::new(AlarmService::new()))
    }

    pub fn with_backends(
        clock: Arc<dyn Clock>,
        deferred: Box<dyn TimerBackend>,
        alarm: Box<dyn TimerBackend>,
    ) -> Self {
        StabilityTimers {
            clock,
            deferred,
            alarm,
            scheduled: BTreeMap::new(),
        }
    }

    fn backend_mut(&mut self, backend: Backend) -> &mut dyn TimerBackend {
        match backend {
            Backend::Deferred => self.deferred.as_mut(),
            Backend::Alarm => self.alarm.as_mut(),
        }
    }

    fn backend(&self, backend: Backend) -> &dyn TimerBackend {
        match backend {
            Backend::Deferred => self.deferred.as_ref(),
            Backend::Alarm => self.alarm.as_ref(),
        }
    }

    pub fn is_scheduled(&self, key: TimerKey) -> bool {
        self.scheduled.contains_key(&key)
    }

    pub fn scheduled(&self, key: TimerKey) -> Option<&ScheduledTimer> {
        self.scheduled.get(&key)
    }

    pub fn all_scheduled(&self) -> Vec<ScheduledTimer> {
        self.scheduled.values().copied().collect()
    }

    /// Whether `backend` holds an armed timer for `key`.
    pub fn is_armed_on(&self, backend: Backend, key: TimerKey) -> bool {
        self.backend(backend).is_armed(key)
    }

    /// Fire every due timer, in deadline order per backend.
    pub fn fire_due(&mut self) -> Vec<(TimerKey, TimerExtra)> {
        let mut fired = Vec::new();
        for backend in [Backend::Deferred, Backend::Alarm] {
            let base = self.backend(backend).time_base();
            let now = self.clock.now_ms(base);
            for key in self.backend_mut(backend).take_due(now) {
                match self.scheduled.remove(&key) {
                    Some(timer) => fired.push((key, timer.extra)),
                    None => tracing::warn!(?key, "timer fired without a schedule"),
                }
            }
        }
        fired
    }

    /// Time until the earliest deadline on either backend.
    pub fn next_wakeup(&self) -> Option<Duration> {
        [Backend::Deferred, Backend::Alarm]
            .into_iter()
            .filter_map(|backend| {
                let b = self.backend(backend);
                let deadline = b.next_deadline()?;
                let now = self.clock.now_ms(b.time_base());
                Some(Duration::from_millis(deadline.saturating_sub(now)))
            })
            .min()
    }
}

impl TimerService for StabilityTimers {
    fn schedule(&mut self, key: TimerKey, extra: TimerExtra, delay_ms: u64) -> ScheduleOutcome {
        if self.scheduled.get(&key).is_some_and(|t| t.extra == extra) {
            return ScheduleOutcome::AlreadyScheduled;
        }
        self.cancel(key);

        let backend = Backend::for_delay(delay_ms);
        let base = self.backend(backend).time_base();
        let deadline_ms = self.clock.now_ms(base).saturating_add(delay_ms);
        self.backend_mut(backend).arm(key, deadline_ms);
        self.scheduled.insert(
            key,
            ScheduledTimer {
                key,
                extra,
                backend,
                delay_ms,
                deadline_ms,
            },
        );
        tracing::trace!(?key, ?backend, delay_ms, "timer armed");
        ScheduleOutcome::Armed(backend)
    }

    fn cancel(&mut self, key: TimerKey) -> bool {
        let deferred = self.deferred.disarm(key);
        let alarm = self.alarm.disarm(key);
        let recorded = self.scheduled.remove(&key).is_some();
        deferred || alarm || recorded
    }
}
