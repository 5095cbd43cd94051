//! # Signal Tracker
//!
//! Per-candidate cache of the latest registration, display info, signal
//! level, and roaming-data setting. Updates that do not change the cached
//! value are reported as unchanged so chatty modem reports never cause a
//! re-evaluation on their own.

use serde::Serialize;

use super::score::RatSignalScorer;
use super::{
    CandidateId, DisplayInfo, Registration, RegistrationState, SignalStrength, UsableState,
};
use crate::config::FeatureFlags;
use crate::error::SwitchError;

/// One change notification for a tracked candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalUpdate {
    Registration(Registration),
    Display(DisplayInfo),
    Signal(SignalStrength),
    RoamingData(bool),
}

impl SignalUpdate {
    /// Updates that can only move the RAT/signal score.
    pub fn is_score_only(&self) -> bool {
        matches!(self, SignalUpdate::Display(_) | SignalUpdate::Signal(_))
    }
}

/// State read from the phone when tracking starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CandidateSnapshot {
    pub registration: Registration,
    pub display: DisplayInfo,
    pub signal: SignalStrength,
    pub roaming_data_enabled: bool,
}

/// Read-only view of a tracked candidate handed to the switch policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CandidateView {
    pub id: CandidateId,
    pub registration: RegistrationState,
    pub usable: UsableState,
    pub score: i32,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignalTracker {
    id: CandidateId,
    registration: Registration,
    display: DisplayInfo,
    signal: SignalStrength,
    roaming_data_enabled: bool,
}

impl SignalTracker {
    pub fn new(id: CandidateId, snapshot: CandidateSnapshot) -> Self {
        SignalTracker {
            id,
            registration: snapshot.registration,
            display: snapshot.display,
            signal: snapshot.signal,
            roaming_data_enabled: snapshot.roaming_data_enabled,
        }
    }

    pub fn id(&self) -> CandidateId {
        self.id
    }

    pub fn registration(&self) -> Registration {
        self.registration
    }

    pub fn display(&self) -> DisplayInfo {
        self.display
    }

    pub fn signal(&self) -> SignalStrength {
        self.signal
    }

    /// Apply an update. Returns `false` when the cached value is unchanged.
    pub fn update(&mut self, update: SignalUpdate) -> bool {
        match update {
            SignalUpdate::Registration(reg) => replace_if_changed(&mut self.registration, reg),
            SignalUpdate::Display(display) => replace_if_changed(&mut self.display, display),
            SignalUpdate::Signal(signal) => replace_if_changed(&mut self.signal, signal),
            SignalUpdate::RoamingData(enabled) => {
                replace_if_changed(&mut self.roaming_data_enabled, enabled)
            }
        }
    }

    pub fn usable_state(&self, features: &FeatureFlags) -> UsableState {
        let satellite = features.satellite_classification && self.registration.non_terrestrial;
        match self.registration.state {
            RegistrationState::Home if satellite => UsableState::NonTerrestrial,
            RegistrationState::Home => UsableState::Home,
            RegistrationState::Roaming if !self.roaming_data_enabled => UsableState::NotUsable,
            RegistrationState::Roaming if satellite => UsableState::NonTerrestrial,
            RegistrationState::Roaming => UsableState::RoamingEnabled,
            RegistrationState::OutOfService | RegistrationState::Unknown => {
                UsableState::NotUsable
            }
        }
    }

    /// 0 while out of service, otherwise the scorer's value.
    pub fn rat_signal_score(&self, scorer: &dyn RatSignalScorer) -> i32 {
        if !self.registration.state.is_in_service() {
            return 0;
        }
        scorer.score(self.display.rat_class(), self.signal.level)
    }

    pub fn view(&self, features: &FeatureFlags, scorer: &dyn RatSignalScorer) -> CandidateView {
        CandidateView {
            id: self.id,
            registration: self.registration.state,
            usable: self.usable_state(features),
            score: self.rat_signal_score(scorer),
        }
    }
}

fn replace_if_changed<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

// ─── Arena ──────────────────────────────────────────────────────────────────

/// Fixed set of modem slots indexed by candidate id; each slot either
/// holds a tracker or is empty.
#[derive(Debug, Clone, Default)]
pub struct TrackerArena {
    slots: Vec<Option<SignalTracker>>,
}

impl TrackerArena {
    pub fn new(slot_count: usize) -> Self {
        TrackerArena {
            slots: vec![None; slot_count],
        }
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    fn check(&self, id: CandidateId) -> Result<(), SwitchError> {
        if id >= self.slots.len() {
            return Err(SwitchError::InvalidCandidate {
                id,
                slots: self.slots.len(),
            });
        }
        Ok(())
    }

    pub fn is_tracked(&self, id: CandidateId) -> bool {
        self.slots.get(id).is_some_and(|s| s.is_some())
    }

    pub fn get(&self, id: CandidateId) -> Result<&SignalTracker, SwitchError> {
        self.check(id)?;
        self.slots[id]
            .as_ref()
            .ok_or(SwitchError::UntrackedCandidate(id))
    }

    pub fn get_mut(&mut self, id: CandidateId) -> Result<&mut SignalTracker, SwitchError> {
        self.check(id)?;
        self.slots[id]
            .as_mut()
            .ok_or(SwitchError::UntrackedCandidate(id))
    }

    pub fn insert(&mut self, tracker: SignalTracker) -> Result<(), SwitchError> {
        let id = tracker.id();
        self.check(id)?;
        if self.slots[id].is_some() {
            return Err(SwitchError::AlreadyTracked(id));
        }
        self.slots[id] = Some(tracker);
        Ok(())
    }

    pub fn remove(&mut self, id: CandidateId) -> Option<SignalTracker> {
        self.slots.get_mut(id).and_then(Option::take)
    }

    /// Change the slot count. Trackers in dropped slots are discarded; the
    /// caller must unsubscribe them first.
    pub fn resize(&mut self, slot_count: usize) {
        self.slots.resize(slot_count, None);
    }

    pub fn tracked_ids(&self) -> Vec<CandidateId> {
        self.trackers().map(SignalTracker::id).collect()
    }

    pub fn trackers(&self) -> impl Iterator<Item = &SignalTracker> {
        self.slots.iter().flatten()
    }

    pub fn views(&self, features: &FeatureFlags, scorer: &dyn RatSignalScorer) -> Vec<CandidateView> {
        self.trackers().map(|t| t.view(features, scorer)).collect()
    }
}
