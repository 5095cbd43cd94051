//! # Candidate Data Model
//!
//! A candidate is one phone/modem slot that could carry cellular data.
//! This module holds the raw signals reported for a slot (registration,
//! display info, signal level) and the derived classification used by the
//! switch policy: [`UsableState`] and the RAT/signal score.
//!
//! ```text
//!   HOME (2)  >  ROAMING_ENABLED (1) = NON_TERRESTRIAL (1)  >  NOT_USABLE (0)
//! ```

pub mod score;
pub mod tracker;

use serde::{Deserialize, Serialize};

use self::score::RatClass;

/// Stable small index of a modem slot.
pub type CandidateId = usize;

// ─── Registration ───────────────────────────────────────────────────────────

/// Data registration state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
    Home,
    Roaming,
    OutOfService,
    #[default]
    Unknown,
}

impl RegistrationState {
    pub fn is_in_service(self) -> bool {
        matches!(self, RegistrationState::Home | RegistrationState::Roaming)
    }
}

/// Registration state plus the satellite classification reported with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registration {
    pub state: RegistrationState,
    /// Whether the serving network is non-terrestrial (satellite).
    #[serde(default)]
    pub non_terrestrial: bool,
}

impl Registration {
    pub fn new(state: RegistrationState) -> Self {
        Registration {
            state,
            non_terrestrial: false,
        }
    }

    pub fn satellite(state: RegistrationState) -> Self {
        Registration {
            state,
            non_terrestrial: true,
        }
    }
}

// ─── Display Info ───────────────────────────────────────────────────────────

/// Radio access technology the modem reports for data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkType {
    #[default]
    Unknown,
    Gsm,
    Umts,
    Hspa,
    Lte,
    Nr,
}

/// Display override layered on top of the network type (5G icon hints).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverrideNetworkType {
    #[default]
    None,
    LteCa,
    LteAdvancedPro,
    NrNsa,
    NrAdvanced,
}

/// Network-type classification used only as scoring input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DisplayInfo {
    pub network_type: NetworkType,
    #[serde(default)]
    pub override_type: OverrideNetworkType,
}

impl DisplayInfo {
    pub fn new(network_type: NetworkType, override_type: OverrideNetworkType) -> Self {
        DisplayInfo {
            network_type,
            override_type,
        }
    }

    /// Score-table row this display info selects. Overrides win over the
    /// raw network type.
    pub fn rat_class(&self) -> RatClass {
        match self.override_type {
            OverrideNetworkType::NrAdvanced => RatClass::NrNsaMmwave,
            OverrideNetworkType::NrNsa => RatClass::NrNsa,
            OverrideNetworkType::LteCa | OverrideNetworkType::LteAdvancedPro => RatClass::LteCa,
            OverrideNetworkType::None => match self.network_type {
                NetworkType::Nr => RatClass::NrSa,
                NetworkType::Lte => RatClass::Lte,
                NetworkType::Umts | NetworkType::Hspa => RatClass::Umts,
                NetworkType::Gsm => RatClass::Gsm,
                NetworkType::Unknown => RatClass::Unknown,
            },
        }
    }
}

// ─── Signal Strength ────────────────────────────────────────────────────────

/// Number of discrete signal levels (0 = none … 4 = great).
pub const SIGNAL_LEVELS: usize = 5;

/// Bucketed signal level, clamped to `0..SIGNAL_LEVELS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct SignalLevel(u8);

impl SignalLevel {
    pub const NONE: SignalLevel = SignalLevel(0);
    pub const GREAT: SignalLevel = SignalLevel(SIGNAL_LEVELS as u8 - 1);

    pub fn new(level: u8) -> Self {
        SignalLevel(level.min(SIGNAL_LEVELS as u8 - 1))
    }

    pub fn get(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Signal report from the modem. Two reports are considered the same
/// signal when their discretized levels match; raw RSRP is informational.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SignalStrength {
    pub level: SignalLevel,
    pub rsrp_dbm: Option<i32>,
}

impl SignalStrength {
    pub fn from_level(level: u8) -> Self {
        SignalStrength {
            level: SignalLevel::new(level),
            rsrp_dbm: None,
        }
    }

    /// Bucket an LTE/NR RSRP reading into a level.
    pub fn from_rsrp(rsrp_dbm: i32) -> Self {
        let level = match rsrp_dbm {
            r if r >= -95 => 4,
            r if r >= -105 => 3,
            r if r >= -115 => 2,
            r if r >= -125 => 1,
            _ => 0,
        };
        SignalStrength {
            level: SignalLevel::new(level),
            rsrp_dbm: Some(rsrp_dbm),
        }
    }
}

impl PartialEq for SignalStrength {
    fn eq(&self, other: &Self) -> bool {
        self.level == other.level
    }
}

impl Eq for SignalStrength {}

// ─── Usable State ───────────────────────────────────────────────────────────

/// How usable a candidate is for carrying data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UsableState {
    Home,
    RoamingEnabled,
    NonTerrestrial,
    NotUsable,
}

impl UsableState {
    /// Ordering rank; satellite ranks with enabled roaming.
    pub fn rank(self) -> u8 {
        match self {
            UsableState::Home => 2,
            UsableState::RoamingEnabled | UsableState::NonTerrestrial => 1,
            UsableState::NotUsable => 0,
        }
    }

    pub fn is_usable(self) -> bool {
        self.rank() > UsableState::NotUsable.rank()
    }
}

// ─── Data Evaluation ────────────────────────────────────────────────────────

/// Why internet data is not allowed on a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisallowedReason {
    NotInService,
    DataDisabled,
    RoamingDisabled,
    SimNotReady,
    ConcurrentVoiceData,
    RestrictedByNetwork,
    NoSuitableDataProfile,
}

/// Result of an "is internet allowed here" evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DataEvaluation {
    pub disallowed: std::collections::BTreeSet<DisallowedReason>,
}

impl DataEvaluation {
    pub fn allowed() -> Self {
        DataEvaluation::default()
    }

    pub fn disallowed(reasons: impl IntoIterator<Item = DisallowedReason>) -> Self {
        DataEvaluation {
            disallowed: reasons.into_iter().collect(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.disallowed.is_empty()
    }

    /// True when every disallowed reason is `reason` (vacuously true when allowed).
    pub fn is_subset_of(&self, reason: DisallowedReason) -> bool {
        self.disallowed.iter().all(|r| *r == reason)
    }
}
