//! # Switch Policy
//!
//! Pure decision functions comparing the default candidate with the
//! alternates. Which function applies depends on which candidate carries
//! data right now:
//!
//! - **on default** ([`evaluate_on_default`]): look for an alternate that is
//!   strictly better, by usable state first and RAT/signal score second.
//! - **on alternate** ([`evaluate_on_alternate`]): decide whether (and how
//!   urgently) to fall back to the default.
//!
//! Exact ties always resolve toward the default candidate.

use serde::Serialize;

use crate::candidate::tracker::CandidateView;
use crate::candidate::{CandidateId, DataEvaluation, DisallowedReason, RegistrationState};
use crate::config::SwitchConfig;

/// A switch waiting for its stability timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PendingDecision {
    pub target: CandidateId,
    /// Performance-based switches use the performance stability threshold.
    pub performance: bool,
    pub needs_validation: bool,
}

/// Why the engine skipped the stability timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImmediateReason {
    /// The user turned mobile data off on the default candidate.
    DefaultDataDisabled,
    /// The alternate lost internet for a reason other than coverage.
    AlternateDisallowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchDecision {
    /// Arm (or keep) the stability check toward a target.
    Pending(PendingDecision),
    /// Switch right away, bypassing debounce.
    Immediate {
        target: CandidateId,
        reason: ImmediateReason,
    },
    /// Nothing to do; any pending switch is stale.
    NoAction,
}

/// Inputs shared by both evaluation modes.
pub struct PolicyInputs<'a> {
    pub config: &'a SwitchConfig,
    pub default_id: CandidateId,
    pub preferred_id: CandidateId,
    pub candidates: &'a [CandidateView],
}

impl<'a> PolicyInputs<'a> {
    fn find(&self, id: CandidateId) -> Option<&'a CandidateView> {
        self.candidates.iter().find(|c| c.id == id)
    }
}

/// Data currently rides the default candidate: find the best alternate
/// worth switching to.
///
/// `internet_allowed` is consulted only for candidates that already
/// qualify; a refused candidate is skipped and the search continues.
pub fn evaluate_on_default(
    inputs: &PolicyInputs<'_>,
    mut internet_allowed: impl FnMut(CandidateId) -> bool,
) -> SwitchDecision {
    let config = inputs.config;
    let Some(current) = inputs.find(inputs.default_id) else {
        return SwitchDecision::NoAction;
    };

    let mut qualifying: Vec<(&CandidateView, bool)> = inputs
        .candidates
        .iter()
        .filter(|c| c.id != current.id)
        .filter_map(|c| qualifies_over_default(config, current, c).map(|perf| (c, perf)))
        .collect();

    // Best first: usable state, then score, then lowest slot.
    qualifying.sort_by(|(a, _), (b, _)| {
        b.usable
            .rank()
            .cmp(&a.usable.rank())
            .then(b.score.cmp(&a.score))
            .then(a.id.cmp(&b.id))
    });

    for (candidate, performance) in qualifying {
        if !internet_allowed(candidate.id) {
            tracing::debug!(candidate = candidate.id, "qualifying candidate has no internet; skipped");
            continue;
        }
        return SwitchDecision::Pending(PendingDecision {
            target: candidate.id,
            performance,
            needs_validation: config.require_ping_validation,
        });
    }
    SwitchDecision::NoAction
}

/// `Some(performance)` when `candidate` beats `current` (the default).
fn qualifies_over_default(
    config: &SwitchConfig,
    current: &CandidateView,
    candidate: &CandidateView,
) -> Option<bool> {
    let rat_switch = config.is_rat_signal_switch_enabled();

    if config.is_roaming_switch_enabled() {
        if candidate.usable.rank() > current.usable.rank() {
            return Some(false);
        }
        if rat_switch
            && candidate.usable.rank() == current.usable.rank()
            && candidate.usable.is_usable()
            && exceeds_tolerance(config, candidate.score, current.score)
        {
            return Some(true);
        }
        return None;
    }

    // Without roaming switch only a home-registered alternate is eligible.
    if candidate.registration != RegistrationState::Home {
        return None;
    }
    if rat_switch {
        // An out-of-service default scores 0, so coverage loss also
        // qualifies here; it only counts as performance if default has service.
        if exceeds_tolerance(config, candidate.score, current.score) {
            return Some(current.registration.is_in_service());
        }
        return None;
    }
    if current.registration != RegistrationState::Home {
        return Some(false);
    }
    None
}

/// Data currently rides an alternate: decide whether to go back to default.
///
/// `default_user_data_enabled` is the user's mobile-data toggle on the
/// default candidate; `alternate_internet` is the alternate's internet
/// evaluation counting existing networks; `default_on_non_cellular` is set
/// when the system default network runs over Wi-Fi/Ethernet.
pub fn evaluate_on_alternate(
    inputs: &PolicyInputs<'_>,
    default_user_data_enabled: bool,
    alternate_internet: &DataEvaluation,
    default_on_non_cellular: bool,
) -> SwitchDecision {
    let config = inputs.config;
    let default_id = inputs.default_id;

    if !default_user_data_enabled {
        return SwitchDecision::Immediate {
            target: default_id,
            reason: ImmediateReason::DefaultDataDisabled,
        };
    }
    if config.features.immediate_fallback_on_disallowed
        && !alternate_internet.is_subset_of(DisallowedReason::NotInService)
    {
        return SwitchDecision::Immediate {
            target: default_id,
            reason: ImmediateReason::AlternateDisallowed,
        };
    }

    let (Some(default), Some(current)) = (inputs.find(default_id), inputs.find(inputs.preferred_id))
    else {
        return SwitchDecision::NoAction;
    };

    let back = |performance: bool, needs_validation: bool| {
        SwitchDecision::Pending(PendingDecision {
            target: default_id,
            performance,
            needs_validation,
        })
    };

    if default_on_non_cellular {
        return back(false, false);
    }

    let require_ping = config.require_ping_validation;
    let rat_switch = config.is_rat_signal_switch_enabled();

    if config.is_roaming_switch_enabled() {
        let current_usable = current.usable.is_usable();
        if current.usable.rank() < default.usable.rank() {
            return back(false, current_usable && require_ping);
        }
        if current.usable.rank() > default.usable.rank() {
            return SwitchDecision::NoAction;
        }
        if !current_usable {
            return back(false, false);
        }
        if !rat_switch {
            return back(false, require_ping);
        }
        if default_wins_on_score(default.score, current.score) {
            return back(true, require_ping);
        }
        return SwitchDecision::NoAction;
    }

    if current.registration != RegistrationState::Home {
        return back(false, false);
    }
    if rat_switch {
        if default.registration.is_in_service()
            && default_wins_on_score(default.score, current.score)
        {
            return back(true, require_ping);
        }
        return SwitchDecision::NoAction;
    }
    if default.registration == RegistrationState::Home {
        return back(false, require_ping);
    }
    SwitchDecision::NoAction
}

/// Strict advantage: `candidate - current > tolerance`.
fn exceeds_tolerance(config: &SwitchConfig, candidate: i32, current: i32) -> bool {
    i64::from(candidate) - i64::from(current) > i64::from(config.score_tolerance)
}

/// Default reclaims data once it scores at least as well as the
/// alternate. Leaving the default needs more than the tolerance, so the
/// band between the two rules keeps the choice from flapping.
fn default_wins_on_score(default: i32, current: i32) -> bool {
    default >= current
}
