//! In-process deferred-message queue measured on the uptime clock.
//!
//! Cheap and coarse: while the process is suspended uptime stands still,
//! so a deferred message can fire late by the length of the suspension.

use std::collections::BTreeMap;

use super::{TimerBackend, TimerKey};
use crate::clock::TimeBase;

#[derive(Debug, Default)]
pub struct DeferredQueue {
    pending: BTreeMap<TimerKey, u64>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TimerBackend for DeferredQueue {
    fn time_base(&self) -> TimeBase {
        TimeBase::Uptime
    }

    fn arm(&mut self, key: TimerKey, deadline_ms: u64) {
        self.pending.insert(key, deadline_ms);
    }

    fn disarm(&mut self, key: TimerKey) -> bool {
        self.pending.remove(&key).is_some()
    }

    fn is_armed(&self, key: TimerKey) -> bool {
        self.pending.contains_key(&key)
    }

    fn next_deadline(&self) -> Option<u64> {
        self.pending.values().min().copied()
    }

    fn take_due(&mut self, now_ms: u64) -> Vec<TimerKey> {
        let mut due: Vec<(u64, TimerKey)> = self
            .pending
            .iter()
            .filter(|(_, deadline)| **deadline <= now_ms)
            .map(|(key, deadline)| (*deadline, *key))
            .collect();
        due.sort();
        for (_, key) in &due {
            self.pending.remove(key);
        }
        due.into_iter().map(|(_, key)| key).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_at_deadline() {
        let mut q = DeferredQueue::new();
        q.arm(TimerKey::StabilityCheck, 100);
        assert!(q.take_due(99).is_empty());
        assert_eq!(q.take_due(100), vec![TimerKey::StabilityCheck]);
        assert!(q.take_due(500).is_empty());
        assert!(!q.is_armed(TimerKey::StabilityCheck));
    }

    #[test]
    fn rearm_replaces_deadline() {
        let mut q = DeferredQueue::new();
        q.arm(TimerKey::Evaluate, 100);
        q.arm(TimerKey::Evaluate, 300);
        assert_eq!(q.next_deadline(), Some(300));
        assert!(q.take_due(200).is_empty());
    }

    #[test]
    fn due_keys_in_deadline_order() {
        let mut q = DeferredQueue::new();
        q.arm(TimerKey::StabilityCheck, 10);
        q.arm(TimerKey::Evaluate, 20);
        assert_eq!(
            q.take_due(50),
            vec![TimerKey::StabilityCheck, TimerKey::Evaluate]
        );
    }
}
