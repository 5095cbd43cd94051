//! Property-based tests for the switch policy, retry backoff, and the
//! stability timer service.

use std::sync::Arc;

use dataswitch::candidate::tracker::CandidateView;
use dataswitch::candidate::{RegistrationState, UsableState};
use dataswitch::clock::ManualClock;
use dataswitch::policy::{evaluate_on_default, PendingDecision, PolicyInputs, SwitchDecision};
use dataswitch::retry::{RetryController, RetryDecision};
use dataswitch::timer::{
    Backend, ScheduleOutcome, StabilityTimers, TimerExtra, TimerKey, TimerService,
};
use dataswitch::SwitchConfig;
use proptest::prelude::*;

fn home(id: usize, score: i32) -> CandidateView {
    CandidateView {
        id,
        registration: RegistrationState::Home,
        usable: UsableState::Home,
        score,
    }
}

// ─── Score Tolerance ────────────────────────────────────────────────────────

proptest! {
    /// An alternate wins on score only when its advantage is strictly
    /// greater than the tolerance.
    #[test]
    fn tolerance_boundary_is_strict(
        tolerance in 0i32..=1_000,
        default_score in 0i32..=10_000,
        margin in -5i32..=5,
    ) {
        let config = SwitchConfig {
            score_tolerance: tolerance,
            ..Default::default()
        };
        let alternate_score = default_score + tolerance + margin;
        let candidates = [home(0, default_score), home(1, alternate_score)];
        let inputs = PolicyInputs {
            config: &config,
            default_id: 0,
            preferred_id: 0,
            candidates: &candidates,
        };

        let decision = evaluate_on_default(&inputs, |_| true);
        if margin > 0 {
            prop_assert_eq!(
                decision,
                SwitchDecision::Pending(PendingDecision {
                    target: 1,
                    performance: true,
                    needs_validation: true,
                })
            );
        } else {
            prop_assert_eq!(decision, SwitchDecision::NoAction);
        }
    }

    /// A better usable state wins regardless of score.
    #[test]
    fn usable_state_outranks_score(
        default_score in 0i32..=10_000,
        alternate_score in 0i32..=10_000,
    ) {
        let config = SwitchConfig::default();
        let mut default = home(0, default_score);
        default.registration = RegistrationState::OutOfService;
        default.usable = UsableState::NotUsable;
        let candidates = [default, home(1, alternate_score)];
        let inputs = PolicyInputs {
            config: &config,
            default_id: 0,
            preferred_id: 0,
            candidates: &candidates,
        };

        prop_assert_eq!(
            evaluate_on_default(&inputs, |_| true),
            SwitchDecision::Pending(PendingDecision {
                target: 1,
                performance: false,
                needs_validation: true,
            })
        );
    }
}

// ─── Retry Backoff ──────────────────────────────────────────────────────────

proptest! {
    /// Delays double from the base for `max` attempts, then the controller
    /// gives up and starts over from zero.
    #[test]
    fn retry_doubles_then_exhausts(
        max_retries in 0u32..=10,
        base in 1u64..=60_000,
    ) {
        let mut retry = RetryController::new();
        for i in 0..max_retries {
            prop_assert_eq!(
                retry.on_validation_failed(max_retries, base),
                RetryDecision::Retry {
                    attempt: i + 1,
                    delay_ms: base << i,
                }
            );
        }
        prop_assert_eq!(
            retry.on_validation_failed(max_retries, base),
            RetryDecision::Exhausted
        );
        prop_assert_eq!(retry.consecutive_failures(), 0);
    }
}

// ─── Stability Timers ───────────────────────────────────────────────────────

proptest! {
    /// Re-scheduling an identical decision never moves the deadline, so the
    /// timer fires exactly once, at the original deadline.
    #[test]
    fn identical_schedule_fires_once_at_original_deadline(
        delay in 1u64..=200_000,
        repeats in proptest::collection::vec(0u64..=1_000, 1..8),
    ) {
        let clock = ManualClock::new();
        let mut timers = StabilityTimers::new(Arc::new(clock.clone()));
        let extra = TimerExtra::Stability(PendingDecision {
            target: 1,
            performance: false,
            needs_validation: true,
        });

        prop_assert_eq!(
            timers.schedule(TimerKey::StabilityCheck, extra, delay),
            ScheduleOutcome::Armed(Backend::for_delay(delay))
        );

        let mut elapsed = 0;
        for step in repeats {
            let step = step.min(delay - 1 - elapsed);
            clock.advance(step);
            elapsed += step;
            prop_assert!(timers.fire_due().is_empty());
            prop_assert_eq!(
                timers.schedule(TimerKey::StabilityCheck, extra, delay),
                ScheduleOutcome::AlreadyScheduled
            );
        }

        clock.advance(delay - elapsed);
        prop_assert_eq!(
            timers.fire_due(),
            vec![(TimerKey::StabilityCheck, extra)]
        );
        clock.advance(delay);
        prop_assert!(timers.fire_due().is_empty());
        prop_assert!(!timers.is_scheduled(TimerKey::StabilityCheck));
    }
}
