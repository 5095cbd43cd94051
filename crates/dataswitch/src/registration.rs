//! # Event Registration
//!
//! Keeps exactly the candidates that back an active, visible subscription
//! tracked and subscribed. Switching needs at least two such candidates,
//! so with fewer than two nothing is tracked at all.

use std::collections::BTreeSet;

use serde::Serialize;

use crate::candidate::tracker::{SignalTracker, TrackerArena};
use crate::candidate::CandidateId;
use crate::collab::{read_snapshot, Telephony};

/// Minimum active subscriptions for auto switching to make sense.
pub const MIN_ACTIVE_SUBSCRIPTIONS: usize = 2;

/// Candidates whose listening state flipped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistrationChange {
    pub started: Vec<CandidateId>,
    pub stopped: Vec<CandidateId>,
}

impl RegistrationChange {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.stopped.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct RegistrationManager {
    arena: TrackerArena,
}

impl RegistrationManager {
    pub fn new(slot_count: usize) -> Self {
        RegistrationManager {
            arena: TrackerArena::new(slot_count),
        }
    }

    pub fn arena(&self) -> &TrackerArena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut TrackerArena {
        &mut self.arena
    }

    pub fn slot_count(&self) -> usize {
        self.arena.slot_count()
    }

    pub fn is_listening(&self, id: CandidateId) -> bool {
        self.arena.is_tracked(id)
    }

    pub fn on_active_subscriptions_changed(
        &mut self,
        active: &BTreeSet<CandidateId>,
        phones: &dyn Telephony,
    ) -> RegistrationChange {
        let wanted: BTreeSet<CandidateId> = if active.len() < MIN_ACTIVE_SUBSCRIPTIONS {
            BTreeSet::new()
        } else {
            active.clone()
        };

        for id in wanted.iter().filter(|id| **id >= self.arena.slot_count()) {
            tracing::warn!(
                candidate = *id,
                slots = self.arena.slot_count(),
                "active subscription outside modem slots"
            );
        }

        let mut change = RegistrationChange::default();
        for id in 0..self.arena.slot_count() {
            let tracked = self.arena.is_tracked(id);
            let want = wanted.contains(&id);
            if want && !tracked {
                if self.start(id, phones) {
                    change.started.push(id);
                }
            } else if !want && tracked {
                self.stop(id, phones);
                change.stopped.push(id);
            }
        }
        if !change.is_empty() {
            tracing::debug!(started = ?change.started, stopped = ?change.stopped, "listening set changed");
        }
        change
    }

    /// Grow or shrink the slot array. Removed slots are unsubscribed before
    /// they are dropped; added slots start listening if already active.
    pub fn on_modem_count_changed(
        &mut self,
        slot_count: usize,
        active: &BTreeSet<CandidateId>,
        phones: &dyn Telephony,
    ) -> RegistrationChange {
        let mut change = RegistrationChange::default();
        let old = self.arena.slot_count();
        if slot_count < old {
            for id in slot_count..old {
                if self.arena.is_tracked(id) {
                    self.stop(id, phones);
                    change.stopped.push(id);
                }
            }
        }
        self.arena.resize(slot_count);
        tracing::info!(from = old, to = slot_count, "modem count changed");

        let rest = self.on_active_subscriptions_changed(active, phones);
        change.started.extend(rest.started);
        change.stopped.extend(rest.stopped);
        change
    }

    fn start(&mut self, id: CandidateId, phones: &dyn Telephony) -> bool {
        let snapshot = match read_snapshot(phones, id) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(candidate = id, error = %e, "cannot start tracking");
                return false;
            }
        };
        if let Err(e) = self.arena.insert(SignalTracker::new(id, snapshot)) {
            tracing::warn!(candidate = id, error = %e, "cannot start tracking");
            return false;
        }
        phones.subscribe(id);
        true
    }

    fn stop(&mut self, id: CandidateId, phones: &dyn Telephony) {
        phones.unsubscribe(id);
        self.arena.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::RegistrationState;
    use crate::sim::{PhoneState, SimPhones};

    fn phones(n: usize) -> SimPhones {
        let sim = SimPhones::new(n);
        for id in 0..n {
            sim.set_phone(id, PhoneState::home_lte(3));
        }
        sim
    }

    fn set(ids: &[CandidateId]) -> BTreeSet<CandidateId> {
        ids.iter().copied().collect()
    }

    #[test]
    fn single_subscription_tracks_nothing() {
        let sim = phones(2);
        let mut reg = RegistrationManager::new(2);
        let change = reg.on_active_subscriptions_changed(&set(&[0]), &sim);
        assert!(change.is_empty());
        assert!(!reg.is_listening(0));
        assert!(sim.subscribed().is_empty());
    }

    #[test]
    fn tracks_and_untracks_with_subscriptions() {
        let sim = phones(3);
        let mut reg = RegistrationManager::new(3);
        let change = reg.on_active_subscriptions_changed(&set(&[0, 1]), &sim);
        assert_eq!(change.started, vec![0, 1]);
        assert_eq!(sim.subscribed(), set(&[0, 1]));

        let change = reg.on_active_subscriptions_changed(&set(&[1, 2]), &sim);
        assert_eq!(change.started, vec![2]);
        assert_eq!(change.stopped, vec![0]);
        assert_eq!(sim.subscribed(), set(&[1, 2]));

        // Down to one: drop everything.
        let change = reg.on_active_subscriptions_changed(&set(&[2]), &sim);
        assert_eq!(change.stopped, vec![1, 2]);
        assert!(reg.arena().tracked_ids().is_empty());
        assert!(sim.subscribed().is_empty());
    }

    #[test]
    fn tracker_starts_from_phone_state() {
        let sim = phones(2);
        sim.set_registration(1, RegistrationState::Roaming);
        let mut reg = RegistrationManager::new(2);
        reg.on_active_subscriptions_changed(&set(&[0, 1]), &sim);
        let tracker = reg.arena().get(1).unwrap();
        assert_eq!(tracker.registration().state, RegistrationState::Roaming);
    }

    #[test]
    fn unavailable_phone_is_skipped() {
        let sim = SimPhones::new(2);
        sim.set_phone(0, PhoneState::home_lte(3));
        let mut reg = RegistrationManager::new(2);
        let change = reg.on_active_subscriptions_changed(&set(&[0, 1]), &sim);
        assert_eq!(change.started, vec![0]);
        assert!(!reg.is_listening(1));
    }

    #[test]
    fn out_of_range_subscription_is_ignored() {
        let sim = phones(2);
        let mut reg = RegistrationManager::new(2);
        let change = reg.on_active_subscriptions_changed(&set(&[0, 1, 5]), &sim);
        assert_eq!(change.started, vec![0, 1]);
    }

    #[test]
    fn shrinking_modem_count_unsubscribes_first() {
        let sim = phones(3);
        let mut reg = RegistrationManager::new(3);
        reg.on_active_subscriptions_changed(&set(&[0, 1, 2]), &sim);
        let change = reg.on_modem_count_changed(2, &set(&[0, 1, 2]), &sim);
        assert_eq!(change.stopped, vec![2]);
        assert_eq!(reg.slot_count(), 2);
        assert_eq!(sim.subscribed(), set(&[0, 1]));
    }

    #[test]
    fn growing_modem_count_picks_up_active_slot() {
        let sim = phones(2);
        let mut reg = RegistrationManager::new(1);
        let change = reg.on_modem_count_changed(2, &set(&[0, 1]), &sim);
        assert_eq!(change.started, vec![0, 1]);
        assert!(reg.is_listening(1));
    }
}
