//! Wall-clock-exact alarm service measured on the realtime clock.
//!
//! Each timer key owns one listener, created the first time the key is
//! armed and reused afterwards. At most one alarm per listener is
//! outstanding: arming cancels the listener's previous alarm first, so a
//! re-armed key can never fire twice.

use std::collections::BTreeMap;

use super::{TimerBackend, TimerKey};
use crate::clock::TimeBase;

/// Identity of the callback an alarm is registered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy)]
struct Alarm {
    listener: ListenerId,
    at_realtime_ms: u64,
}

#[derive(Debug, Default)]
pub struct AlarmService {
    listeners: BTreeMap<TimerKey, ListenerId>,
    alarms: BTreeMap<ListenerId, Alarm>,
    next_listener: u64,
}

impl AlarmService {
    pub fn new() -> Self {
        Self::default()
    }

    fn listener_for(&mut self, key: TimerKey) -> ListenerId {
        if let Some(id) = self.listeners.get(&key) {
            return *id;
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(key, id);
        id
    }

    fn key_for(&self, listener: ListenerId) -> Option<TimerKey> {
        self.listeners
            .iter()
            .find(|(_, id)| **id == listener)
            .map(|(key, _)| *key)
    }

    /// Number of outstanding alarms across all listeners.
    pub fn outstanding(&self) -> usize {
        self.alarms.len()
    }
}

impl TimerBackend for AlarmService {
    fn time_base(&self) -> TimeBase {
        TimeBase::Realtime
    }

    fn arm(&mut self, key: TimerKey, deadline_ms: u64) {
        let listener = self.listener_for(key);
        self.alarms.remove(&listener);
        self.alarms.insert(
            listener,
            Alarm {
                listener,
                at_realtime_ms: deadline_ms,
            },
        );
    }

    fn disarm(&mut self, key: TimerKey) -> bool {
        match self.listeners.get(&key) {
            Some(listener) => self.alarms.remove(listener).is_some(),
            None => false,
        }
    }

    fn is_armed(&self, key: TimerKey) -> bool {
        self.listeners
            .get(&key)
            .is_some_and(|listener| self.alarms.contains_key(listener))
    }

    fn next_deadline(&self) -> Option<u64> {
        self.alarms.values().map(|a| a.at_realtime_ms).min()
    }

    fn take_due(&mut self, now_ms: u64) -> Vec<TimerKey> {
        let mut due: Vec<Alarm> = self
            .alarms
            .values()
            .filter(|a| a.at_realtime_ms <= now_ms)
            .copied()
            .collect();
        due.sort_by_key(|a| (a.at_realtime_ms, a.listener));
        due.into_iter()
            .filter_map(|alarm| {
                self.alarms.remove(&alarm.listener);
                self.key_for(alarm.listener)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_is_reused_per_key() {
        let mut alarms = AlarmService::new();
        alarms.arm(TimerKey::StabilityCheck, 1_000);
        alarms.arm(TimerKey::StabilityCheck, 2_000);
        assert_eq!(alarms.outstanding(), 1);
        assert_eq!(alarms.next_deadline(), Some(2_000));
        assert!(alarms.take_due(1_500).is_empty());
        assert_eq!(alarms.take_due(2_000), vec![TimerKey::StabilityCheck]);
        assert_eq!(alarms.outstanding(), 0);
    }

    #[test]
    fn disarm_unknown_key_is_noop() {
        let mut alarms = AlarmService::new();
        assert!(!alarms.disarm(TimerKey::Evaluate));
        alarms.arm(TimerKey::Evaluate, 10);
        assert!(alarms.disarm(TimerKey::Evaluate));
        assert!(!alarms.is_armed(TimerKey::Evaluate));
    }

    #[test]
    fn keys_have_independent_alarms() {
        let mut alarms = AlarmService::new();
        alarms.arm(TimerKey::Evaluate, 10);
        alarms.arm(TimerKey::StabilityCheck, 5);
        assert_eq!(alarms.outstanding(), 2);
        assert_eq!(
            alarms.take_due(10),
            vec![TimerKey::StabilityCheck, TimerKey::Evaluate]
        );
    }
}
