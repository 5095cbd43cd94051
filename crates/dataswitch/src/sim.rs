//! # Simulated Phones
//!
//! In-memory telephony backing every collaborator trait, plus a TOML
//! scenario format that scripts phone state changes over simulated time.
//!
//! ```toml
//! slots = 2
//! default = 0
//! active = [0, 1]
//!
//! [config]
//! score_tolerance = 0
//!
//! [[phones]]
//! slot = 0
//!
//! [[phones]]
//! slot = 1
//! registration = "roaming"
//!
//! [[steps]]
//! at_ms = 1000
//! action = "registration"
//! slot = 0
//! state = "out_of_service"
//! ```

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::Receiver;
use serde::{Deserialize, Serialize};

use crate::candidate::tracker::SignalUpdate;
use crate::candidate::{
    CandidateId, DataEvaluation, DisallowedReason, DisplayInfo, NetworkType,
    OverrideNetworkType, Registration, RegistrationState, SignalStrength,
};
use crate::clock::{Clock, ManualClock};
use crate::collab::{
    CandidateSource, ChannelSink, DefaultResolver, Directive, NetworkCapabilities,
    SignalSubscriptions, SubscriptionSource, Transport,
};
use crate::config::{SwitchConfig, SwitchConfigInput};
use crate::engine::{DecisionEngine, EvaluationReason, Event};
use crate::error::ConfigError;

// ─── Phone State ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhoneState {
    pub registration: Registration,
    pub display: DisplayInfo,
    pub signal: SignalStrength,
    pub roaming_data_enabled: bool,
    pub user_data_enabled: bool,
    /// Refusals on top of the ones derived from registration and toggles.
    pub restrictions: BTreeSet<DisallowedReason>,
}

impl PhoneState {
    pub fn home_lte(level: u8) -> Self {
        PhoneState {
            registration: Registration::new(RegistrationState::Home),
            display: DisplayInfo::new(NetworkType::Lte, OverrideNetworkType::None),
            signal: SignalStrength::from_level(level),
            roaming_data_enabled: true,
            user_data_enabled: true,
            restrictions: BTreeSet::new(),
        }
    }

    pub fn internet_evaluation(&self) -> DataEvaluation {
        let mut disallowed = self.restrictions.clone();
        if !self.registration.state.is_in_service() {
            disallowed.insert(DisallowedReason::NotInService);
        }
        if !self.user_data_enabled {
            disallowed.insert(DisallowedReason::DataDisabled);
        }
        if self.registration.state == RegistrationState::Roaming && !self.roaming_data_enabled {
            disallowed.insert(DisallowedReason::RoamingDisabled);
        }
        DataEvaluation { disallowed }
    }
}

#[derive(Debug, Default)]
struct SimState {
    phones: Vec<Option<PhoneState>>,
    active: BTreeSet<CandidateId>,
    default: Option<CandidateId>,
    preferred: Option<CandidateId>,
    subscribed: BTreeSet<CandidateId>,
}

/// Shared handle to simulated phones. Clones see the same state.
#[derive(Debug, Clone, Default)]
pub struct SimPhones {
    state: Arc<Mutex<SimState>>,
}

impl SimPhones {
    pub fn new(slots: usize) -> Self {
        let phones = SimPhones::default();
        phones.resize(slots);
        phones
    }

    fn with<R>(&self, f: impl FnOnce(&mut SimState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn with_phone(&self, id: CandidateId, f: impl FnOnce(&mut PhoneState)) {
        self.with(|s| match s.phones.get_mut(id) {
            Some(Some(phone)) => f(phone),
            _ => tracing::warn!(candidate = id, "no simulated phone in slot"),
        })
    }

    pub fn resize(&self, slots: usize) {
        self.with(|s| s.phones.resize(slots, None));
    }

    /// Place a phone in an existing slot; ids past the slot count are
    /// ignored.
    pub fn set_phone(&self, id: CandidateId, phone: PhoneState) {
        self.with(|s| {
            let slots = s.phones.len();
            match s.phones.get_mut(id) {
                Some(slot) => *slot = Some(phone),
                None => tracing::warn!(candidate = id, slots, "simulated phone outside slots"),
            }
        });
    }

    pub fn remove_phone(&self, id: CandidateId) {
        self.with(|s| {
            if let Some(slot) = s.phones.get_mut(id) {
                *slot = None;
            }
        });
    }

    pub fn phone(&self, id: CandidateId) -> Option<PhoneState> {
        self.with(|s| s.phones.get(id).cloned().flatten())
    }

    pub fn set_registration(&self, id: CandidateId, state: RegistrationState) {
        self.with_phone(id, |p| p.registration.state = state);
    }

    pub fn set_satellite(&self, id: CandidateId, non_terrestrial: bool) {
        self.with_phone(id, |p| p.registration.non_terrestrial = non_terrestrial);
    }

    pub fn set_signal_level(&self, id: CandidateId, level: u8) {
        self.with_phone(id, |p| p.signal = SignalStrength::from_level(level));
    }

    pub fn set_display(&self, id: CandidateId, display: DisplayInfo) {
        self.with_phone(id, |p| p.display = display);
    }

    pub fn set_user_data(&self, id: CandidateId, enabled: bool) {
        self.with_phone(id, |p| p.user_data_enabled = enabled);
    }

    pub fn set_roaming_data(&self, id: CandidateId, enabled: bool) {
        self.with_phone(id, |p| p.roaming_data_enabled = enabled);
    }

    pub fn set_restrictions(
        &self,
        id: CandidateId,
        reasons: impl IntoIterator<Item = DisallowedReason>,
    ) {
        let reasons: BTreeSet<_> = reasons.into_iter().collect();
        self.with_phone(id, |p| p.restrictions = reasons);
    }

    pub fn set_active(&self, ids: impl IntoIterator<Item = CandidateId>) {
        let ids: BTreeSet<_> = ids.into_iter().collect();
        self.with(|s| s.active = ids);
    }

    pub fn set_default(&self, id: Option<CandidateId>) {
        self.with(|s| s.default = id);
    }

    pub fn set_preferred(&self, id: Option<CandidateId>) {
        self.with(|s| s.preferred = id);
    }

    /// Candidates the engine currently listens to.
    pub fn subscribed(&self) -> BTreeSet<CandidateId> {
        self.with(|s| s.subscribed.clone())
    }
}

impl CandidateSource for SimPhones {
    fn registration(&self, id: CandidateId) -> Option<Registration> {
        self.phone(id).map(|p| p.registration)
    }

    fn display_info(&self, id: CandidateId) -> Option<DisplayInfo> {
        self.phone(id).map(|p| p.display)
    }

    fn signal_strength(&self, id: CandidateId) -> Option<SignalStrength> {
        self.phone(id).map(|p| p.signal)
    }

    fn is_roaming_data_enabled(&self, id: CandidateId) -> Option<bool> {
        self.phone(id).map(|p| p.roaming_data_enabled)
    }

    fn is_user_data_enabled(&self, id: CandidateId) -> Option<bool> {
        self.phone(id).map(|p| p.user_data_enabled)
    }

    fn internet_evaluation(&self, id: CandidateId, _ignore_existing: bool) -> Option<DataEvaluation> {
        self.phone(id).map(|p| p.internet_evaluation())
    }
}

impl DefaultResolver for SimPhones {
    fn default_candidate(&self) -> Option<CandidateId> {
        self.with(|s| s.default)
    }

    fn preferred_candidate(&self) -> Option<CandidateId> {
        self.with(|s| s.preferred)
    }
}

impl SubscriptionSource for SimPhones {
    fn active_visible_candidates(&self) -> BTreeSet<CandidateId> {
        self.with(|s| s.active.clone())
    }
}

impl SignalSubscriptions for SimPhones {
    fn subscribe(&self, id: CandidateId) {
        self.with(|s| s.subscribed.insert(id));
    }

    fn unsubscribe(&self, id: CandidateId) {
        self.with(|s| s.subscribed.remove(&id));
    }
}

// ─── Scenario ───────────────────────────────────────────────────────────────

/// Upper bound on modem slots a scenario may declare.
pub const MAX_SCENARIO_SLOTS: usize = 16;

fn default_slots() -> usize {
    2
}

fn default_true() -> bool {
    true
}

fn default_level() -> u8 {
    2
}

fn default_network() -> NetworkType {
    NetworkType::Lte
}

fn default_registration() -> RegistrationState {
    RegistrationState::Home
}

/// Initial state of one simulated phone.
#[derive(Debug, Clone, Deserialize)]
pub struct PhoneSpec {
    pub slot: CandidateId,
    #[serde(default = "default_registration")]
    pub registration: RegistrationState,
    #[serde(default)]
    pub satellite: bool,
    #[serde(default = "default_network")]
    pub network: NetworkType,
    #[serde(default)]
    pub override_type: OverrideNetworkType,
    #[serde(default = "default_level")]
    pub level: u8,
    #[serde(default = "default_true")]
    pub roaming_data: bool,
    #[serde(default = "default_true")]
    pub user_data: bool,
}

impl PhoneSpec {
    fn to_state(&self) -> PhoneState {
        PhoneState {
            registration: Registration {
                state: self.registration,
                non_terrestrial: self.satellite,
            },
            display: DisplayInfo::new(self.network, self.override_type),
            signal: SignalStrength::from_level(self.level),
            roaming_data_enabled: self.roaming_data,
            user_data_enabled: self.user_data,
            restrictions: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationResult {
    Passed,
    Failed,
}

/// One scripted change.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StepAction {
    Registration {
        slot: CandidateId,
        state: RegistrationState,
        #[serde(default)]
        satellite: bool,
    },
    Signal {
        slot: CandidateId,
        level: u8,
    },
    Display {
        slot: CandidateId,
        network: NetworkType,
        #[serde(default)]
        override_type: OverrideNetworkType,
    },
    UserData {
        slot: CandidateId,
        enabled: bool,
    },
    RoamingData {
        slot: CandidateId,
        enabled: bool,
    },
    Restrict {
        slot: CandidateId,
        #[serde(default)]
        reasons: Vec<DisallowedReason>,
    },
    Subscriptions {
        active: Vec<CandidateId>,
    },
    ModemCount {
        count: usize,
    },
    DefaultCandidate {
        slot: Option<CandidateId>,
    },
    /// Empty `transports` means no default network.
    DefaultNetwork {
        #[serde(default)]
        transports: Vec<Transport>,
        #[serde(default)]
        has_internet: bool,
    },
    Validation {
        result: ValidationResult,
    },
    Evaluate,
    Cancel,
    /// Sleep through `ms` of wall-clock time without uptime advancing.
    Suspend {
        ms: u64,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Step {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: StepAction,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_slots")]
    pub slots: usize,
    #[serde(default)]
    pub default: Option<CandidateId>,
    /// Candidate carrying data at the start. Unset means the default.
    #[serde(default)]
    pub preferred: Option<CandidateId>,
    #[serde(default)]
    pub active: Vec<CandidateId>,
    #[serde(default)]
    pub config: SwitchConfigInput,
    #[serde(default)]
    pub phones: Vec<PhoneSpec>,
    #[serde(default)]
    pub steps: Vec<Step>,
    /// Keep firing timers until this uptime after the last step.
    #[serde(default)]
    pub run_until_ms: Option<u64>,
}

impl Scenario {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let scenario: Scenario = toml::from_str(input)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Every slot a scenario names must fit the declared slot count, and
    /// slot counts stay within [`MAX_SCENARIO_SLOTS`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::InvalidScenario(msg));
        if self.slots > MAX_SCENARIO_SLOTS {
            return invalid(format!(
                "{} slots exceeds the limit of {MAX_SCENARIO_SLOTS}",
                self.slots
            ));
        }
        if let Some(phone) = self.phones.iter().find(|p| p.slot >= self.slots) {
            return invalid(format!(
                "phone in slot {} but only {} slots",
                phone.slot, self.slots
            ));
        }
        for step in &self.steps {
            if let StepAction::ModemCount { count } = step.action {
                if count > MAX_SCENARIO_SLOTS {
                    return invalid(format!(
                        "modem count {count} at {}ms exceeds the limit of {MAX_SCENARIO_SLOTS}",
                        step.at_ms
                    ));
                }
            }
        }
        Ok(())
    }
}

/// A directive and the simulated uptime it was issued at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimedDirective {
    pub at_ms: u64,
    #[serde(flatten)]
    pub directive: Directive,
}

// ─── Runner ─────────────────────────────────────────────────────────────────

/// Replays a [`Scenario`] against a [`DecisionEngine`] on a [`ManualClock`].
///
/// The runner plays the switching collaborator: an immediate switch or a
/// switch without validation moves data right away, and a scripted
/// `validation` step completes one that needs validation.
pub struct ScenarioRunner {
    clock: ManualClock,
    phones: SimPhones,
    engine: DecisionEngine,
    directives: Receiver<Directive>,
    awaiting_validation: Option<CandidateId>,
    trace: Vec<TimedDirective>,
    steps: Vec<Step>,
    run_until_ms: Option<u64>,
}

impl ScenarioRunner {
    pub fn new(scenario: Scenario) -> Result<Self, ConfigError> {
        let config = scenario.config.clone().resolve()?;
        Ok(Self::with_config(scenario, config))
    }

    /// Use `config` instead of the scenario's own `[config]` table.
    pub fn with_config(scenario: Scenario, config: SwitchConfig) -> Self {
        let phones = SimPhones::new(scenario.slots);
        for spec in &scenario.phones {
            phones.set_phone(spec.slot, spec.to_state());
        }
        phones.set_active(scenario.active.iter().copied());
        phones.set_default(scenario.default);
        phones.set_preferred(scenario.preferred);

        let clock = ManualClock::new();
        let (tx, rx) = crossbeam_channel::unbounded();
        let engine = DecisionEngine::new(
            config,
            scenario.slots,
            Box::new(phones.clone()),
            Box::new(ChannelSink::new(tx)),
            Arc::new(clock.clone()),
        );

        let mut steps = scenario.steps;
        steps.sort_by_key(|s| s.at_ms);
        ScenarioRunner {
            clock,
            phones,
            engine,
            directives: rx,
            awaiting_validation: None,
            trace: Vec::new(),
            steps,
            run_until_ms: scenario.run_until_ms,
        }
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn phones(&self) -> &SimPhones {
        &self.phones
    }

    pub fn clock(&self) -> &ManualClock {
        &self.clock
    }

    pub fn trace(&self) -> &[TimedDirective] {
        &self.trace
    }

    /// Play every step, then run out the clock to `run_until_ms`.
    pub fn run(&mut self) -> &[TimedDirective] {
        let steps = std::mem::take(&mut self.steps);
        for step in steps {
            self.advance_to(step.at_ms);
            self.apply(step.action);
            self.drain();
        }
        if let Some(until) = self.run_until_ms {
            self.advance_to(until);
        }
        &self.trace
    }

    /// Move simulated uptime forward, firing timers at their deadlines.
    pub fn advance_to(&mut self, at_ms: u64) {
        while let Some(wait) = self.engine.next_wakeup() {
            let now = self.clock.uptime_ms();
            let wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX);
            if now.saturating_add(wait_ms) > at_ms {
                break;
            }
            self.clock.advance(wait_ms);
            self.engine.poll_timers();
            self.drain();
        }
        let now = self.clock.uptime_ms();
        if at_ms > now {
            self.clock.advance(at_ms - now);
        }
        self.engine.poll_timers();
        self.drain();
    }

    fn send(&mut self, event: Event) {
        self.engine.handle(event);
        self.drain();
    }

    fn drain(&mut self) {
        while let Ok(directive) = self.directives.try_recv() {
            let at_ms = self.clock.uptime_ms();
            tracing::info!(at_ms, ?directive, "directive");
            self.trace.push(TimedDirective { at_ms, directive });
            match directive {
                Directive::ValidationRequired {
                    target,
                    needs_validation: false,
                } => {
                    self.phones.set_preferred(Some(target));
                    self.engine.handle(Event::ValidationSucceeded);
                }
                Directive::ValidationRequired { target, .. } => {
                    self.awaiting_validation = Some(target);
                }
                Directive::ImmediateSwitch { target, .. } => {
                    self.awaiting_validation = None;
                    self.phones.set_preferred(Some(target));
                }
                Directive::CancelPendingValidation => {
                    self.awaiting_validation = None;
                }
            }
        }
    }

    fn apply(&mut self, action: StepAction) {
        match action {
            StepAction::Registration {
                slot,
                state,
                satellite,
            } => {
                self.phones.set_registration(slot, state);
                self.phones.set_satellite(slot, satellite);
                self.send(Event::Signal {
                    id: slot,
                    update: SignalUpdate::Registration(Registration {
                        state,
                        non_terrestrial: satellite,
                    }),
                });
            }
            StepAction::Signal { slot, level } => {
                self.phones.set_signal_level(slot, level);
                self.send(Event::Signal {
                    id: slot,
                    update: SignalUpdate::Signal(SignalStrength::from_level(level)),
                });
            }
            StepAction::Display {
                slot,
                network,
                override_type,
            } => {
                let display = DisplayInfo::new(network, override_type);
                self.phones.set_display(slot, display);
                self.send(Event::Signal {
                    id: slot,
                    update: SignalUpdate::Display(display),
                });
            }
            StepAction::UserData { slot, enabled } => {
                self.phones.set_user_data(slot, enabled);
                self.send(Event::DataSettingsChanged { id: slot });
            }
            StepAction::RoamingData { slot, enabled } => {
                self.phones.set_roaming_data(slot, enabled);
                self.send(Event::DataSettingsChanged { id: slot });
            }
            StepAction::Restrict { slot, reasons } => {
                self.phones.set_restrictions(slot, reasons);
                self.send(Event::DataSettingsChanged { id: slot });
            }
            StepAction::Subscriptions { active } => {
                self.phones.set_active(active);
                self.send(Event::SubscriptionsChanged);
            }
            StepAction::ModemCount { count } => {
                self.phones.resize(count);
                self.send(Event::ModemCountChanged(count));
            }
            StepAction::DefaultCandidate { slot } => {
                self.phones.set_default(slot);
                self.send(Event::SubscriptionsChanged);
            }
            StepAction::DefaultNetwork {
                transports,
                has_internet,
            } => {
                let caps = (!transports.is_empty())
                    .then(|| NetworkCapabilities::new(transports, has_internet));
                self.send(Event::DefaultNetworkChanged(caps));
            }
            StepAction::Validation { result } => {
                let target = self.awaiting_validation.take();
                if target.is_none() {
                    tracing::warn!(?result, "validation result with nothing awaiting");
                }
                match result {
                    ValidationResult::Passed => {
                        if let Some(target) = target {
                            self.phones.set_preferred(Some(target));
                        }
                        self.send(Event::ValidationSucceeded);
                    }
                    ValidationResult::Failed => self.send(Event::ValidationFailed),
                }
            }
            StepAction::Evaluate => {
                self.send(Event::EvaluationRequested(EvaluationReason::External))
            }
            StepAction::Cancel => self.send(Event::CancelPendingSwitch),
            StepAction::Suspend { ms } => {
                self.clock.suspend(ms);
                self.engine.poll_timers();
                self.drain();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_internet_evaluation() {
        let mut phone = PhoneState::home_lte(2);
        assert!(phone.internet_evaluation().is_allowed());
        phone.registration.state = RegistrationState::Roaming;
        phone.roaming_data_enabled = false;
        assert_eq!(
            phone.internet_evaluation(),
            DataEvaluation::disallowed([DisallowedReason::RoamingDisabled])
        );
        phone.registration.state = RegistrationState::OutOfService;
        phone.user_data_enabled = false;
        assert_eq!(
            phone.internet_evaluation(),
            DataEvaluation::disallowed([
                DisallowedReason::NotInService,
                DisallowedReason::DataDisabled
            ])
        );
    }

    #[test]
    fn missing_phone_reads_none() {
        let sim = SimPhones::new(2);
        sim.set_phone(0, PhoneState::home_lte(1));
        assert!(sim.registration(0).is_some());
        assert!(sim.registration(1).is_none());
        assert!(sim.internet_evaluation(5, true).is_none());
        sim.set_signal_level(1, 3);
        sim.remove_phone(0);
        assert!(sim.phone(0).is_none());
    }

    #[test]
    fn clones_share_state() {
        let sim = SimPhones::new(2);
        let other = sim.clone();
        sim.set_default(Some(1));
        other.subscribe(0);
        assert_eq!(other.default_candidate(), Some(1));
        assert!(sim.subscribed().contains(&0));
    }

    #[test]
    fn parses_scenario_steps() {
        let scenario = Scenario::from_toml_str(
            r#"
            default = 0
            active = [0, 1]

            [[phones]]
            slot = 0

            [[phones]]
            slot = 1
            registration = "roaming"
            level = 4

            [[steps]]
            at_ms = 500
            action = "validation"
            result = "failed"

            [[steps]]
            at_ms = 100
            action = "default_network"
            transports = ["wifi"]
            has_internet = true
            "#,
        )
        .unwrap();
        assert_eq!(scenario.slots, 2);
        assert_eq!(scenario.phones[1].registration, RegistrationState::Roaming);
        assert_eq!(scenario.phones[1].level, 4);
        assert!(scenario.phones[0].user_data);
        assert!(matches!(
            scenario.steps[0].action,
            StepAction::Validation {
                result: ValidationResult::Failed
            }
        ));
        assert!(matches!(
            scenario.steps[1].action,
            StepAction::DefaultNetwork { ref transports, has_internet: true } if transports == &[Transport::Wifi]
        ));
    }

    #[test]
    fn phone_outside_slots_is_ignored() {
        let sim = SimPhones::new(2);
        sim.set_phone(1_000_000, PhoneState::home_lte(2));
        assert!(sim.phone(1_000_000).is_none());
        assert!(sim.registration(2).is_none());
    }

    #[test]
    fn rejects_slots_out_of_bounds() {
        let phone = Scenario::from_toml_str("slots = 2\n[[phones]]\nslot = 4000000000");
        assert!(matches!(phone, Err(ConfigError::InvalidScenario(_))));

        let slots = Scenario::from_toml_str("slots = 100000");
        assert!(matches!(slots, Err(ConfigError::InvalidScenario(_))));

        let modems = Scenario::from_toml_str(
            "[[steps]]\nat_ms = 5\naction = \"modem_count\"\ncount = 1000000",
        );
        assert!(matches!(modems, Err(ConfigError::InvalidScenario(_))));
    }

    #[test]
    fn rejects_unknown_action() {
        let err = Scenario::from_toml_str("[[steps]]\nat_ms = 1\naction = \"reboot\"");
        assert!(matches!(err, Err(ConfigError::Parse(_))));
    }
}
