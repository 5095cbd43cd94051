//! End-to-end behavior of the decision engine against simulated phones.
//!
//! Every test drives a `DecisionEngine` with a `ManualClock`, a `SimPhones`
//! backend, and a channel sink, then checks the directives it issues and
//! the timers it leaves behind.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use dataswitch::candidate::tracker::SignalUpdate;
use dataswitch::candidate::{
    CandidateId, DisallowedReason, Registration, RegistrationState, SignalStrength,
};
use dataswitch::clock::ManualClock;
use dataswitch::collab::{ChannelSink, Directive};
use dataswitch::policy::{ImmediateReason, PendingDecision};
use dataswitch::sim::{PhoneState, SimPhones};
use dataswitch::timer::{Backend, TimerExtra, TimerKey};
use dataswitch::{DecisionEngine, EvaluationReason, Event, SwitchConfig};

struct Bench {
    clock: ManualClock,
    sim: SimPhones,
    rx: Receiver<Directive>,
    engine: DecisionEngine,
}

fn bench_with(config: SwitchConfig, phones: [PhoneState; 2], active: &[CandidateId]) -> Bench {
    let clock = ManualClock::new();
    let sim = SimPhones::new(2);
    for (id, phone) in phones.into_iter().enumerate() {
        sim.set_phone(id, phone);
    }
    sim.set_active(active.iter().copied());
    sim.set_default(Some(0));
    let (tx, rx) = crossbeam_channel::unbounded();
    let engine = DecisionEngine::new(
        config,
        2,
        Box::new(sim.clone()),
        Box::new(ChannelSink::new(tx)),
        Arc::new(clock.clone()),
    );
    Bench {
        clock,
        sim,
        rx,
        engine,
    }
}

fn bench(config: SwitchConfig) -> Bench {
    bench_with(
        config,
        [PhoneState::home_lte(2), PhoneState::home_lte(2)],
        &[0, 1],
    )
}

impl Bench {
    fn directives(&self) -> Vec<Directive> {
        self.rx.try_iter().collect()
    }

    fn register(&mut self, id: CandidateId, state: RegistrationState) {
        self.sim.set_registration(id, state);
        self.engine.handle(Event::Signal {
            id,
            update: SignalUpdate::Registration(Registration::new(state)),
        });
    }

    fn signal(&mut self, id: CandidateId, level: u8) {
        self.sim.set_signal_level(id, level);
        self.engine.handle(Event::Signal {
            id,
            update: SignalUpdate::Signal(SignalStrength::from_level(level)),
        });
    }

    fn advance(&mut self, ms: u64) {
        self.clock.advance(ms);
        self.engine.poll_timers();
    }

    fn stability_extra(&self) -> Option<TimerExtra> {
        self.engine
            .timers()
            .scheduled(TimerKey::StabilityCheck)
            .map(|t| t.extra)
    }
}

fn stability(target: CandidateId, performance: bool, needs_validation: bool) -> Option<TimerExtra> {
    Some(TimerExtra::Stability(PendingDecision {
        target,
        performance,
        needs_validation,
    }))
}

// ─── Scheduling ─────────────────────────────────────────────────────────────

#[test]
fn identical_decision_does_not_rearm() {
    let mut b = bench(SwitchConfig::default());
    b.register(0, RegistrationState::OutOfService);
    b.advance(7_000);
    b.signal(1, 4);
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));
    b.advance(2_999);
    assert!(b.directives().is_empty());
    b.advance(1);
    assert_eq!(
        b.directives(),
        vec![Directive::ValidationRequired {
            target: 1,
            needs_validation: true
        }]
    );
    b.advance(60_000);
    assert!(b.directives().is_empty());
}

#[test]
fn changed_decision_supersedes_pending() {
    let mut b = bench(SwitchConfig::default());
    // Performance switch first (120 s, alarm backend).
    b.signal(1, 4);
    assert_eq!(b.stability_extra(), stability(1, true, true));
    assert!(b
        .engine
        .timers()
        .is_armed_on(Backend::Alarm, TimerKey::StabilityCheck));

    // Default drops out: availability switch replaces it (10 s, deferred).
    b.advance(50_000);
    b.register(0, RegistrationState::OutOfService);
    assert_eq!(b.stability_extra(), stability(1, false, true));
    assert!(!b
        .engine
        .timers()
        .is_armed_on(Backend::Alarm, TimerKey::StabilityCheck));
    b.advance(10_000);
    assert_eq!(b.directives().len(), 1);
    b.advance(200_000);
    assert!(b.directives().is_empty());
}

// ─── Scoring ────────────────────────────────────────────────────────────────

#[test]
fn tolerance_is_strict() {
    // LTE level 2 = 200, level 3 = 300.
    let config = SwitchConfig {
        score_tolerance: 100,
        ..Default::default()
    };
    let mut b = bench(config.clone());
    b.signal(1, 3);
    assert_eq!(b.stability_extra(), None);

    let config = SwitchConfig {
        score_tolerance: 99,
        ..Default::default()
    };
    let mut b = bench(config);
    b.signal(1, 3);
    assert_eq!(b.stability_extra(), stability(1, true, true));
}

#[test]
fn exact_tie_stays_on_default() {
    let config = SwitchConfig {
        score_tolerance: 0,
        ..Default::default()
    };
    let mut b = bench(config);
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));
    assert_eq!(b.stability_extra(), None);
    assert!(b.directives().is_empty());
}

#[test]
fn exact_tie_on_alternate_returns_to_default() {
    let config = SwitchConfig {
        score_tolerance: 0,
        ..Default::default()
    };
    let mut b = bench(config);
    b.sim.set_preferred(Some(1));
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));
    assert_eq!(b.stability_extra(), stability(0, true, true));
    let timer = b
        .engine
        .timers()
        .scheduled(TimerKey::StabilityCheck)
        .copied()
        .unwrap();
    assert_eq!(timer.delay_ms, 120_000);
}

#[test]
fn home_default_beats_roaming_alternate() {
    let config = SwitchConfig {
        score_tolerance: 0,
        ..Default::default()
    };
    let mut roaming = PhoneState::home_lte(2);
    roaming.registration = Registration::new(RegistrationState::Roaming);
    let mut b = bench_with(config, [PhoneState::home_lte(2), roaming], &[0, 1]);
    b.sim.set_preferred(Some(1));
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));

    assert_eq!(b.stability_extra(), stability(0, false, true));
    let timer = b
        .engine
        .timers()
        .scheduled(TimerKey::StabilityCheck)
        .copied()
        .unwrap();
    assert_eq!(timer.delay_ms, 10_000);
    b.advance(10_000);
    assert_eq!(
        b.directives(),
        vec![Directive::ValidationRequired {
            target: 0,
            needs_validation: true
        }]
    );
}

#[test]
fn satellite_candidates_tie_to_default() {
    let config = SwitchConfig {
        score_tolerance: 0,
        ..Default::default()
    };
    let mut b = bench(config);
    for id in [1, 0] {
        b.sim.set_satellite(id, true);
        b.engine.handle(Event::Signal {
            id,
            update: SignalUpdate::Registration(Registration::satellite(RegistrationState::Home)),
        });
    }
    assert_eq!(b.stability_extra(), None);
    assert!(b.directives().is_empty());
    b.sim.set_preferred(Some(1));
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));
    assert_eq!(b.stability_extra(), stability(0, true, true));
}

// ─── Immediate Fallback ─────────────────────────────────────────────────────

#[test]
fn alternate_restricted_falls_back_immediately() {
    let mut b = bench(SwitchConfig::default());
    b.register(0, RegistrationState::OutOfService);
    b.advance(10_000);
    b.sim.set_preferred(Some(1));
    b.engine.handle(Event::ValidationSucceeded);
    b.directives();

    b.sim
        .set_restrictions(1, [DisallowedReason::RestrictedByNetwork]);
    b.engine.handle(Event::DataSettingsChanged { id: 1 });
    assert_eq!(
        b.directives(),
        vec![Directive::ImmediateSwitch {
            target: 0,
            reason: ImmediateReason::AlternateDisallowed,
            trigger: EvaluationReason::DataSettingsChanged,
        }]
    );
    assert!(!b.engine.has_pending_switch());
}

#[test]
fn alternate_losing_service_is_not_immediate() {
    let mut b = bench(SwitchConfig::default());
    b.sim.set_preferred(Some(1));
    b.register(1, RegistrationState::OutOfService);
    let got = b.directives();
    assert!(got.is_empty(), "unexpected {got:?}");
    // Alternate is now unusable; go back without validation.
    assert_eq!(b.stability_extra(), stability(0, false, false));
}

// ─── Retry ──────────────────────────────────────────────────────────────────

#[test]
fn retries_double_then_give_up() {
    let config = SwitchConfig {
        availability_stability_threshold_ms: 1_000,
        max_validation_retries: 3,
        ..Default::default()
    };
    let mut b = bench(config);
    b.register(0, RegistrationState::OutOfService);
    b.advance(1_000);
    assert_eq!(b.directives().len(), 1);

    for (attempt, expected) in [1_000u64, 2_000, 4_000].into_iter().enumerate() {
        b.engine.handle(Event::ValidationFailed);
        assert_eq!(b.engine.consecutive_failures(), attempt as u32 + 1);
        let retry = b
            .engine
            .timers()
            .scheduled(TimerKey::Evaluate)
            .copied()
            .unwrap();
        assert_eq!(retry.delay_ms, expected);
        assert_eq!(
            retry.extra,
            TimerExtra::Evaluate(EvaluationReason::RetryValidation)
        );
        // Retry evaluation, then another stability period.
        b.advance(expected);
        b.advance(1_000);
        assert_eq!(
            b.directives(),
            vec![Directive::ValidationRequired {
                target: 1,
                needs_validation: true
            }]
        );
    }

    b.engine.handle(Event::ValidationFailed);
    assert_eq!(b.engine.consecutive_failures(), 0);
    assert!(!b.engine.timers().is_scheduled(TimerKey::Evaluate));
    b.advance(1_000_000);
    assert!(b.directives().is_empty());
}

// ─── Gates ──────────────────────────────────────────────────────────────────

#[test]
fn single_subscription_never_switches() {
    let mut b = bench_with(
        SwitchConfig::default(),
        [PhoneState::home_lte(0), PhoneState::home_lte(4)],
        &[0],
    );
    assert!(!b.engine.is_listening(0));
    b.register(0, RegistrationState::OutOfService);
    b.signal(1, 4);
    b.engine
        .handle(Event::EvaluationRequested(EvaluationReason::External));
    b.advance(1_000_000);
    assert!(b.directives().is_empty());
    assert!(!b.engine.has_pending_switch());
}

#[test]
fn cancel_clears_everything_once() {
    let mut b = bench(SwitchConfig::default());
    b.register(0, RegistrationState::OutOfService);
    b.advance(10_000);
    b.engine.handle(Event::ValidationFailed);
    b.directives();

    b.engine.handle(Event::CancelPendingSwitch);
    assert_eq!(b.directives(), vec![Directive::CancelPendingValidation]);
    for backend in [Backend::Deferred, Backend::Alarm] {
        for key in [TimerKey::Evaluate, TimerKey::StabilityCheck] {
            assert!(!b.engine.timers().is_armed_on(backend, key));
        }
    }
    assert_eq!(b.engine.consecutive_failures(), 0);
    assert_eq!(b.engine.selected_target(), None);
    assert!(b.engine.next_wakeup().is_none());
}

#[test]
fn long_stability_survives_suspend() {
    let mut b = bench(SwitchConfig::default());
    b.signal(1, 4);
    // Uptime stands still while suspended; the alarm still fires.
    b.clock.suspend(120_000);
    b.engine.poll_timers();
    assert_eq!(
        b.directives(),
        vec![Directive::ValidationRequired {
            target: 1,
            needs_validation: true
        }]
    );
}

#[test]
fn modem_removal_drops_candidate() {
    let mut b = bench(SwitchConfig::default());
    b.register(0, RegistrationState::OutOfService);
    b.sim.resize(1);
    b.sim.set_active([0]);
    b.engine.handle(Event::ModemCountChanged(1));
    assert!(!b.engine.is_listening(1));
    assert_eq!(b.directives(), vec![Directive::CancelPendingValidation]);
    assert!(b.sim.subscribed().is_empty());
}
