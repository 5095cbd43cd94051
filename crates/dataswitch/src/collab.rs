//! Interfaces to the world outside the decision engine.
//!
//! The engine reads phone state through [`Telephony`] and reports its
//! decisions through a [`ValidationSink`]. It never blocks on either.

use std::collections::BTreeSet;

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};

use crate::candidate::tracker::CandidateSnapshot;
use crate::candidate::{CandidateId, DataEvaluation, DisplayInfo, Registration, SignalStrength};
use crate::engine::EvaluationReason;
use crate::error::SwitchError;
use crate::policy::ImmediateReason;

// ─── Inputs ─────────────────────────────────────────────────────────────────

/// Per-candidate phone state. `None` means no phone backs the slot.
pub trait CandidateSource {
    fn registration(&self, id: CandidateId) -> Option<Registration>;
    fn display_info(&self, id: CandidateId) -> Option<DisplayInfo>;
    fn signal_strength(&self, id: CandidateId) -> Option<SignalStrength>;
    fn is_roaming_data_enabled(&self, id: CandidateId) -> Option<bool>;
    fn is_user_data_enabled(&self, id: CandidateId) -> Option<bool>;
    /// Whether internet data is allowed on `id`. With `ignore_existing`
    /// the evaluation pretends no other network is currently up.
    fn internet_evaluation(&self, id: CandidateId, ignore_existing: bool)
        -> Option<DataEvaluation>;
}

pub trait DefaultResolver {
    /// Candidate the user designated for data.
    fn default_candidate(&self) -> Option<CandidateId>;
    /// Candidate presently carrying data. `None` means the default.
    fn preferred_candidate(&self) -> Option<CandidateId>;
}

pub trait SubscriptionSource {
    fn active_visible_candidates(&self) -> BTreeSet<CandidateId>;
}

/// Per-candidate change notifications (registration, display info,
/// signal strength).
pub trait SignalSubscriptions {
    fn subscribe(&self, id: CandidateId);
    fn unsubscribe(&self, id: CandidateId);
}

/// Everything the engine needs from the telephony stack.
pub trait Telephony:
    CandidateSource + DefaultResolver + SubscriptionSource + SignalSubscriptions + Send
{
}

impl<T> Telephony for T where
    T: CandidateSource + DefaultResolver + SubscriptionSource + SignalSubscriptions + Send
{
}

/// Read the full tracked state of one candidate.
pub fn read_snapshot(
    source: &(impl CandidateSource + ?Sized),
    id: CandidateId,
) -> Result<CandidateSnapshot, SwitchError> {
    let registration = source
        .registration(id)
        .ok_or(SwitchError::Unavailable(id))?;
    Ok(CandidateSnapshot {
        registration,
        display: source.display_info(id).unwrap_or_default(),
        signal: source.signal_strength(id).unwrap_or_default(),
        roaming_data_enabled: source.is_roaming_data_enabled(id).unwrap_or(false),
    })
}

// ─── Default Network ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transport {
    Cellular,
    Wifi,
    Ethernet,
    Bluetooth,
    Satellite,
}

/// Capabilities of the system default network.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkCapabilities {
    pub transports: BTreeSet<Transport>,
    #[serde(default)]
    pub has_internet: bool,
}

impl NetworkCapabilities {
    pub fn new(transports: impl IntoIterator<Item = Transport>, has_internet: bool) -> Self {
        NetworkCapabilities {
            transports: transports.into_iter().collect(),
            has_internet,
        }
    }

    /// Internet over something other than a modem.
    pub fn is_non_cellular(&self) -> bool {
        self.has_internet
            && self
                .transports
                .iter()
                .any(|t| !matches!(t, Transport::Cellular | Transport::Satellite))
    }
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// Consumer of the engine's decisions.
pub trait ValidationSink: Send {
    /// The stability timer passed; switch to `target`, probing first when
    /// `needs_validation` is set.
    fn on_validation_required(&mut self, target: CandidateId, needs_validation: bool);
    /// Switch to `target` now, without debounce or validation.
    fn on_immediate_switch_required(
        &mut self,
        target: CandidateId,
        reason: ImmediateReason,
        trigger: EvaluationReason,
    );
    /// Abort whatever validation is in flight.
    fn on_cancel_pending_validation(&mut self);
}

/// One decision, as a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    ValidationRequired {
        target: CandidateId,
        needs_validation: bool,
    },
    ImmediateSwitch {
        target: CandidateId,
        reason: ImmediateReason,
        trigger: EvaluationReason,
    },
    CancelPendingValidation,
}

/// Forwards every decision as a [`Directive`] over a channel.
pub struct ChannelSink {
    tx: Sender<Directive>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Directive>) -> Self {
        ChannelSink { tx }
    }

    fn forward(&self, directive: Directive) {
        if let Err(e) = self.tx.send(directive) {
            tracing::warn!(directive = ?e.0, "directive receiver gone");
        }
    }
}

impl ValidationSink for ChannelSink {
    fn on_validation_required(&mut self, target: CandidateId, needs_validation: bool) {
        self.forward(Directive::ValidationRequired {
            target,
            needs_validation,
        });
    }

    fn on_immediate_switch_required(
        &mut self,
        target: CandidateId,
        reason: ImmediateReason,
        trigger: EvaluationReason,
    ) {
        self.forward(Directive::ImmediateSwitch {
            target,
            reason,
            trigger,
        });
    }

    fn on_cancel_pending_validation(&mut self) {
        self.forward(Directive::CancelPendingValidation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wifi_with_internet_is_non_cellular() {
        assert!(NetworkCapabilities::new([Transport::Wifi], true).is_non_cellular());
        assert!(!NetworkCapabilities::new([Transport::Wifi], false).is_non_cellular());
        assert!(!NetworkCapabilities::new([Transport::Cellular], true).is_non_cellular());
        assert!(!NetworkCapabilities::new([Transport::Satellite], true).is_non_cellular());
        assert!(!NetworkCapabilities::default().is_non_cellular());
    }

    #[test]
    fn channel_sink_forwards_in_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut sink = ChannelSink::new(tx);
        sink.on_validation_required(1, true);
        sink.on_cancel_pending_validation();
        let got: Vec<Directive> = rx.try_iter().collect();
        assert_eq!(
            got,
            vec![
                Directive::ValidationRequired {
                    target: 1,
                    needs_validation: true
                },
                Directive::CancelPendingValidation,
            ]
        );
    }

    #[test]
    fn channel_sink_survives_dropped_receiver() {
        let (tx, rx) = crossbeam_channel::unbounded();
        drop(rx);
        let mut sink = ChannelSink::new(tx);
        sink.on_cancel_pending_validation();
    }
}
