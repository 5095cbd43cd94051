//! # Decision Engine
//!
//! Single owner of all switch state. Every input arrives as an [`Event`]
//! and is handled to completion before the next one, so nothing here
//! needs a lock.
//!
//! ```text
//!   signal/config/subscription event
//!          │
//!          ▼
//!   evaluate ──Pending──▶ StabilityCheck timer ──fire──▶ validation required
//!      │   │                                               │
//!      │   └──Immediate──▶ immediate switch       failed ──┤── succeeded
//!      │                                                   ▼
//!      └──NoAction──▶ cancel pending           Evaluate timer (backoff)
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::candidate::score::RatSignalScorer;
use crate::candidate::tracker::{CandidateView, SignalTracker, SignalUpdate};
use crate::candidate::CandidateId;
use crate::clock::Clock;
use crate::collab::{NetworkCapabilities, Telephony, ValidationSink};
use crate::config::SwitchConfig;
use crate::error::SwitchError;
use crate::log::{LocalLog, LogEntry};
use crate::policy::{
    evaluate_on_alternate, evaluate_on_default, PendingDecision, PolicyInputs, SwitchDecision,
};
use crate::registration::{RegistrationManager, MIN_ACTIVE_SUBSCRIPTIONS};
use crate::retry::{RetryController, RetryDecision};
use crate::timer::{ScheduleOutcome, ScheduledTimer, StabilityTimers, TimerExtra, TimerKey, TimerService};

// ─── Events ─────────────────────────────────────────────────────────────────

/// Why an evaluation ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationReason {
    SignalChanged,
    RegistrationChanged,
    DisplayInfoChanged,
    DefaultNetworkChanged,
    SubscriptionsChanged,
    DataSettingsChanged,
    CarrierConfigChanged,
    RetryValidation,
    External,
}

impl EvaluationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluationReason::SignalChanged => "signal_changed",
            EvaluationReason::RegistrationChanged => "registration_changed",
            EvaluationReason::DisplayInfoChanged => "display_info_changed",
            EvaluationReason::DefaultNetworkChanged => "default_network_changed",
            EvaluationReason::SubscriptionsChanged => "subscriptions_changed",
            EvaluationReason::DataSettingsChanged => "data_settings_changed",
            EvaluationReason::CarrierConfigChanged => "carrier_config_changed",
            EvaluationReason::RetryValidation => "retry_validation",
            EvaluationReason::External => "external",
        }
    }
}

impl fmt::Display for EvaluationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the engine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A tracked candidate reported new state.
    Signal { id: CandidateId, update: SignalUpdate },
    /// User data or roaming-data toggles changed on a candidate.
    DataSettingsChanged { id: CandidateId },
    EvaluationRequested(EvaluationReason),
    /// `None` when the system has no default network.
    DefaultNetworkChanged(Option<NetworkCapabilities>),
    SubscriptionsChanged,
    ModemCountChanged(usize),
    ConfigChanged(SwitchConfig),
    ValidationFailed,
    /// Validation passed and the switch went through.
    ValidationSucceeded,
    CancelPendingSwitch,
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Postmortem view of the engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub realtime_ms: u64,
    pub config: SwitchConfig,
    pub slot_count: usize,
    pub default_on_non_cellular: bool,
    pub selected_target: Option<CandidateId>,
    pub validation_in_flight: bool,
    pub consecutive_failures: u32,
    pub trackers: Vec<SignalTracker>,
    pub candidates: Vec<CandidateView>,
    pub timers: Vec<ScheduledTimer>,
    pub log: Vec<LogEntry>,
}

// ─── Engine ─────────────────────────────────────────────────────────────────

pub struct DecisionEngine {
    config: SwitchConfig,
    scorer: Option<Arc<dyn RatSignalScorer>>,
    phones: Box<dyn Telephony>,
    sink: Box<dyn ValidationSink>,
    clock: Arc<dyn Clock>,
    timers: StabilityTimers,
    registration: RegistrationManager,
    retry: RetryController,
    /// Target of the scheduled stability check or of the validation
    /// started when it fired.
    selected_target: Option<CandidateId>,
    validation_in_flight: bool,
    default_on_non_cellular: bool,
    log: LocalLog,
}

impl DecisionEngine {
    /// Build an engine over `slot_count` modem slots and start tracking
    /// the currently active subscriptions. No evaluation runs until the
    /// first event.
    pub fn new(
        config: SwitchConfig,
        slot_count: usize,
        phones: Box<dyn Telephony>,
        sink: Box<dyn ValidationSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let mut engine = DecisionEngine {
            config,
            scorer: None,
            phones,
            sink,
            timers: StabilityTimers::new(clock.clone()),
            clock,
            registration: RegistrationManager::new(slot_count),
            retry: RetryController::new(),
            selected_target: None,
            validation_in_flight: false,
            default_on_non_cellular: false,
            log: LocalLog::default(),
        };
        let active = engine.phones.active_visible_candidates();
        engine
            .registration
            .on_active_subscriptions_changed(&active, engine.phones.as_ref());
        engine
    }

    /// Score candidates with `scorer` instead of the configured table.
    pub fn with_scorer(mut self, scorer: Arc<dyn RatSignalScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    pub fn config(&self) -> &SwitchConfig {
        &self.config
    }

    pub fn selected_target(&self) -> Option<CandidateId> {
        self.selected_target
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.retry.consecutive_failures()
    }

    pub fn is_listening(&self, id: CandidateId) -> bool {
        self.registration.is_listening(id)
    }

    pub fn timers(&self) -> &StabilityTimers {
        &self.timers
    }

    pub fn local_log(&self) -> &LocalLog {
        &self.log
    }

    pub fn default_on_non_cellular(&self) -> bool {
        self.default_on_non_cellular
    }

    pub fn candidate_views(&self) -> Vec<CandidateView> {
        self.registration
            .arena()
            .views(&self.config.features, self.scorer())
    }

    /// Anything a cancellation would have to undo.
    pub fn has_pending_switch(&self) -> bool {
        self.selected_target.is_some()
            || self.timers.is_scheduled(TimerKey::StabilityCheck)
            || self.timers.is_scheduled(TimerKey::Evaluate)
            || self.retry.consecutive_failures() > 0
    }

    fn scorer(&self) -> &dyn RatSignalScorer {
        match &self.scorer {
            Some(scorer) => scorer.as_ref(),
            None => &self.config.score_table,
        }
    }

    fn record(&mut self, message: String) {
        let now = self.clock.realtime_ms();
        self.log.push(now, message);
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Signal { id, update } => self.on_signal_changed(id, update),
            Event::DataSettingsChanged { id } => self.on_data_settings_changed(id),
            Event::EvaluationRequested(reason) => self.on_evaluation_requested(reason),
            Event::DefaultNetworkChanged(caps) => {
                self.on_default_network_capabilities_changed(caps.as_ref())
            }
            Event::SubscriptionsChanged => self.on_subscriptions_changed(),
            Event::ModemCountChanged(count) => self.on_modem_count_changed(count),
            Event::ConfigChanged(config) => self.on_config_changed(config),
            Event::ValidationFailed => self.on_validation_failed(),
            Event::ValidationSucceeded => self.on_validation_succeeded(),
            Event::CancelPendingSwitch => self.cancel_any_pending_switch(),
        }
    }

    // ─── Inputs ─────────────────────────────────────────────────────────

    pub fn on_signal_changed(&mut self, id: CandidateId, update: SignalUpdate) {
        let changed = match self.registration.arena_mut().get_mut(id) {
            Ok(tracker) => tracker.update(update),
            Err(SwitchError::UntrackedCandidate(_)) => {
                tracing::trace!(candidate = id, "update for untracked candidate");
                return;
            }
            Err(e) => {
                tracing::warn!(candidate = id, error = %e, "signal update dropped");
                self.record(format!("signal update dropped: {e}"));
                return;
            }
        };
        if !changed {
            return;
        }

        let reason = match update {
            SignalUpdate::Registration(_) => EvaluationReason::RegistrationChanged,
            SignalUpdate::Display(_) => EvaluationReason::DisplayInfoChanged,
            SignalUpdate::Signal(_) => EvaluationReason::SignalChanged,
            SignalUpdate::RoamingData(_) => EvaluationReason::DataSettingsChanged,
        };
        if update.is_score_only() && !self.score_change_matters() {
            tracing::trace!(candidate = id, %reason, "score change cannot move the ranking");
            return;
        }
        self.on_evaluation_requested(reason);
    }

    /// Cheap gate for score-only updates: evaluate only if some candidate
    /// now beats the preferred one by more than the tolerance, or is the
    /// default and scores at least as well.
    fn score_change_matters(&self) -> bool {
        if !self.config.is_rat_signal_switch_enabled() {
            return false;
        }
        if self.has_pending_switch() {
            return true;
        }
        let Some(default) = self.phones.default_candidate() else {
            return false;
        };
        let preferred = self.phones.preferred_candidate().unwrap_or(default);
        let views = self.candidate_views();
        let Some(current) = views.iter().find(|v| v.id == preferred) else {
            return true;
        };
        let tolerance = i64::from(self.config.score_tolerance);
        views.iter().filter(|v| v.id != current.id).any(|v| {
            let diff = i64::from(v.score) - i64::from(current.score);
            diff > tolerance || (v.id == default && diff >= 0)
        })
    }

    pub fn on_data_settings_changed(&mut self, id: CandidateId) {
        if self.registration.is_listening(id) {
            if let Some(enabled) = self.phones.is_roaming_data_enabled(id) {
                if let Ok(tracker) = self.registration.arena_mut().get_mut(id) {
                    tracker.update(SignalUpdate::RoamingData(enabled));
                }
            }
        }
        self.on_evaluation_requested(EvaluationReason::DataSettingsChanged);
    }

    pub fn on_default_network_capabilities_changed(&mut self, caps: Option<&NetworkCapabilities>) {
        let non_cellular = caps.is_some_and(NetworkCapabilities::is_non_cellular);
        if non_cellular == self.default_on_non_cellular {
            return;
        }
        self.default_on_non_cellular = non_cellular;
        tracing::info!(non_cellular, "default network transport changed");
        self.record(format!("default network on non-cellular: {non_cellular}"));
        self.on_evaluation_requested(EvaluationReason::DefaultNetworkChanged);
    }

    pub fn on_subscriptions_changed(&mut self) {
        let active = self.phones.active_visible_candidates();
        let change = self
            .registration
            .on_active_subscriptions_changed(&active, self.phones.as_ref());
        if !change.is_empty() {
            self.record(format!(
                "listening: started {:?} stopped {:?}",
                change.started, change.stopped
            ));
        }
        self.on_evaluation_requested(EvaluationReason::SubscriptionsChanged);
    }

    pub fn on_modem_count_changed(&mut self, slot_count: usize) {
        let active = self.phones.active_visible_candidates();
        let change =
            self.registration
                .on_modem_count_changed(slot_count, &active, self.phones.as_ref());
        self.record(format!(
            "modem count {slot_count}: started {:?} stopped {:?}",
            change.started, change.stopped
        ));
        self.on_evaluation_requested(EvaluationReason::SubscriptionsChanged);
    }

    pub fn on_config_changed(&mut self, config: SwitchConfig) {
        self.config = config;
        tracing::info!(
            enabled = self.config.is_feature_enabled(),
            rat_switch = self.config.is_rat_signal_switch_enabled(),
            roaming_switch = self.config.is_roaming_switch_enabled(),
            "configuration updated"
        );
        self.record("configuration updated".to_string());
        if !self.config.is_feature_enabled() {
            if self.has_pending_switch() {
                self.cancel_any_pending_switch();
            }
            return;
        }
        self.on_evaluation_requested(EvaluationReason::CarrierConfigChanged);
    }

    // ─── Evaluation ─────────────────────────────────────────────────────

    pub fn on_evaluation_requested(&mut self, reason: EvaluationReason) {
        if !self.config.is_feature_enabled() {
            tracing::trace!(%reason, "auto data switch disabled");
            return;
        }
        let active = self.phones.active_visible_candidates().len();
        if active < MIN_ACTIVE_SUBSCRIPTIONS {
            tracing::debug!(%reason, active, "not enough active subscriptions");
            if self.has_pending_switch() {
                self.cancel_any_pending_switch();
            }
            return;
        }

        let decision = match self.decide() {
            Ok(decision) => decision,
            Err(e) => {
                tracing::warn!(%reason, error = %e, "evaluation aborted");
                self.record(format!("evaluation aborted ({reason}): {e}"));
                SwitchDecision::NoAction
            }
        };
        tracing::debug!(%reason, ?decision, "evaluated");
        self.apply(decision, reason);
    }

    fn decide(&self) -> Result<SwitchDecision, SwitchError> {
        let default = self
            .phones
            .default_candidate()
            .ok_or(SwitchError::NoDefaultCandidate)?;
        let preferred = self.phones.preferred_candidate().unwrap_or(default);
        let arena = self.registration.arena();
        arena.get(default)?;

        let views = self.candidate_views();
        let inputs = PolicyInputs {
            config: &self.config,
            default_id: default,
            preferred_id: preferred,
            candidates: &views,
        };

        if preferred == default {
            let phones = self.phones.as_ref();
            return Ok(evaluate_on_default(&inputs, |id| {
                phones
                    .internet_evaluation(id, true)
                    .is_some_and(|e| e.is_allowed())
            }));
        }

        arena.get(preferred)?;
        let user_data_enabled = self
            .phones
            .is_user_data_enabled(default)
            .ok_or(SwitchError::Unavailable(default))?;
        let alternate_internet = self
            .phones
            .internet_evaluation(preferred, false)
            .ok_or(SwitchError::Unavailable(preferred))?;
        Ok(evaluate_on_alternate(
            &inputs,
            user_data_enabled,
            &alternate_internet,
            self.default_on_non_cellular,
        ))
    }

    fn apply(&mut self, decision: SwitchDecision, reason: EvaluationReason) {
        match decision {
            SwitchDecision::Pending(pending) => self.schedule_stability_check(pending, reason),
            SwitchDecision::Immediate {
                target,
                reason: why,
            } => {
                self.timers.cancel(TimerKey::StabilityCheck);
                self.timers.cancel(TimerKey::Evaluate);
                self.retry.reset();
                self.selected_target = None;
                self.validation_in_flight = false;
                tracing::info!(candidate = target, reason = ?why, trigger = %reason, "immediate switch");
                self.record(format!("immediate switch to {target}: {why:?} ({reason})"));
                self.sink.on_immediate_switch_required(target, why, reason);
            }
            SwitchDecision::NoAction => {
                if self.has_pending_switch() {
                    self.cancel_any_pending_switch();
                }
            }
        }
    }

    fn schedule_stability_check(&mut self, pending: PendingDecision, reason: EvaluationReason) {
        if self.validation_in_flight && self.selected_target == Some(pending.target) {
            tracing::trace!(candidate = pending.target, "validation already in flight");
            return;
        }
        self.selected_target = Some(pending.target);
        let delay_ms = self.config.stability_delay_ms(pending.performance);
        match self.timers.schedule(
            TimerKey::StabilityCheck,
            TimerExtra::Stability(pending),
            delay_ms,
        ) {
            ScheduleOutcome::AlreadyScheduled => {
                tracing::trace!(candidate = pending.target, "stability check already scheduled");
            }
            ScheduleOutcome::Armed(backend) => {
                tracing::info!(
                    candidate = pending.target,
                    performance = pending.performance,
                    needs_validation = pending.needs_validation,
                    ?backend,
                    delay_ms,
                    %reason,
                    "stability check scheduled"
                );
                self.record(format!(
                    "stability check for {}: performance={} validation={} in {delay_ms}ms ({reason})",
                    pending.target, pending.performance, pending.needs_validation
                ));
            }
        }
    }

    // ─── Timers ─────────────────────────────────────────────────────────

    /// Fire every due timer. Returns how many fired.
    pub fn poll_timers(&mut self) -> usize {
        let fired = self.timers.fire_due();
        let count = fired.len();
        for (_, extra) in fired {
            match extra {
                TimerExtra::Stability(pending) => self.on_stability_check_passed(pending),
                TimerExtra::Evaluate(reason) => self.on_evaluation_requested(reason),
            }
        }
        count
    }

    pub fn next_wakeup(&self) -> Option<Duration> {
        self.timers.next_wakeup()
    }

    fn on_stability_check_passed(&mut self, pending: PendingDecision) {
        let active = self.phones.active_visible_candidates().len();
        if !self.config.is_feature_enabled() || active < MIN_ACTIVE_SUBSCRIPTIONS {
            tracing::debug!(candidate = pending.target, active, "stability check passed but switching no longer possible");
            self.cancel_any_pending_switch();
            return;
        }
        self.selected_target = Some(pending.target);
        self.validation_in_flight = true;
        tracing::info!(
            candidate = pending.target,
            needs_validation = pending.needs_validation,
            "stability check passed"
        );
        self.record(format!(
            "require validation on {}: validation={}",
            pending.target, pending.needs_validation
        ));
        self.sink
            .on_validation_required(pending.target, pending.needs_validation);
    }

    // ─── Validation Results ─────────────────────────────────────────────

    pub fn on_validation_failed(&mut self) {
        self.validation_in_flight = false;
        let base_ms = self.config.stability_delay_ms(false);
        match self
            .retry
            .on_validation_failed(self.config.max_validation_retries, base_ms)
        {
            RetryDecision::Retry { attempt, delay_ms } => {
                self.timers.schedule(
                    TimerKey::Evaluate,
                    TimerExtra::Evaluate(EvaluationReason::RetryValidation),
                    delay_ms,
                );
                tracing::info!(attempt, delay_ms, "validation failed, retry scheduled");
                self.record(format!("validation failed: retry {attempt} in {delay_ms}ms"));
            }
            RetryDecision::Exhausted => {
                self.selected_target = None;
                self.timers.cancel(TimerKey::Evaluate);
                tracing::info!(
                    max = self.config.max_validation_retries,
                    "validation failed, retries exhausted"
                );
                self.record("validation failed: retries exhausted".to_string());
            }
        }
    }

    pub fn on_validation_succeeded(&mut self) {
        let target = self.selected_target.take();
        self.validation_in_flight = false;
        self.retry.reset();
        self.timers.cancel(TimerKey::Evaluate);
        tracing::info!(candidate = ?target, "switch completed");
        self.record(format!("switch completed: {target:?}"));
    }

    /// Drop every trace of a pending switch: both timer keys on both
    /// backends, the retry count, and the selected target. The sink's
    /// cancel callback runs exactly once.
    pub fn cancel_any_pending_switch(&mut self) {
        self.timers.cancel(TimerKey::StabilityCheck);
        self.timers.cancel(TimerKey::Evaluate);
        self.retry.reset();
        let target = self.selected_target.take();
        self.validation_in_flight = false;
        tracing::info!(candidate = ?target, "pending switch canceled");
        self.record(format!("cancel pending switch: {target:?}"));
        self.sink.on_cancel_pending_validation();
    }

    // ─── Dump ───────────────────────────────────────────────────────────

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            realtime_ms: self.clock.realtime_ms(),
            config: self.config.clone(),
            slot_count: self.registration.slot_count(),
            default_on_non_cellular: self.default_on_non_cellular,
            selected_target: self.selected_target,
            validation_in_flight: self.validation_in_flight,
            consecutive_failures: self.retry.consecutive_failures(),
            trackers: self.registration.arena().trackers().cloned().collect(),
            candidates: self.candidate_views(),
            timers: self.timers.all_scheduled(),
            log: self.log.to_vec(),
        }
    }

    pub fn dump_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}
