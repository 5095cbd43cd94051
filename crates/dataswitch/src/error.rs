use thiserror::Error;

use crate::candidate::CandidateId;

// ── Errors ──────────────────────────────────────────────────────────

/// Failures of internal lookups and of the runtime handle.
///
/// None of these ever reach the validation collaborator: the engine logs
/// them and abandons the single operation that hit them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SwitchError {
    #[error("candidate {id} is outside the {slots} modem slots")]
    InvalidCandidate { id: CandidateId, slots: usize },
    #[error("candidate {0} is not tracked")]
    UntrackedCandidate(CandidateId),
    #[error("candidate {0} is already tracked")]
    AlreadyTracked(CandidateId),
    #[error("no phone backs candidate {0}")]
    Unavailable(CandidateId),
    #[error("no default data candidate")]
    NoDefaultCandidate,
    #[error("switch runtime is closed")]
    RuntimeClosed,
}

/// Failures while parsing or validating configuration and scenario files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("unsupported config version {0}")]
    UnsupportedVersion(u32),
    #[error("unknown RAT `{0}` in score table")]
    UnknownRat(String),
    #[error("score row for {rat}: {reason}")]
    InvalidScoreRow { rat: String, reason: String },
    #[error("scenario: {0}")]
    InvalidScenario(String),
}
