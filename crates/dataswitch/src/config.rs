use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candidate::score::ScoreTable;
use crate::error::ConfigError;

pub const CONFIG_VERSION: u32 = 1;

/// Raw TOML form of the carrier configuration. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SwitchConfigInput {
    pub version: u32,
    pub availability_stability_threshold_ms: Option<i64>,
    pub performance_stability_threshold_ms: Option<i64>,
    pub score_tolerance: Option<i32>,
    pub require_ping_validation: Option<bool>,
    pub allow_roaming_switch: Option<bool>,
    pub max_validation_retries: Option<u32>,
    pub features: FeatureFlagsInput,
    /// RAT name → one score per signal level. Replaces the default table
    /// when non-empty.
    pub score_table: BTreeMap<String, Vec<i32>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeatureFlagsInput {
    pub roaming_switch: Option<bool>,
    pub satellite_classification: Option<bool>,
    pub immediate_fallback_on_disallowed: Option<bool>,
}

/// Feature toggles passed explicitly to the engine and the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FeatureFlags {
    /// Gates [`SwitchConfig::allow_roaming_switch`].
    pub roaming_switch: bool,
    /// Classify satellite-served candidates as non-terrestrial.
    pub satellite_classification: bool,
    /// Leave an alternate immediately when it loses internet for a reason
    /// other than being out of service.
    pub immediate_fallback_on_disallowed: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags {
            roaming_switch: true,
            satellite_classification: true,
            immediate_fallback_on_disallowed: true,
        }
    }
}

/// Resolved configuration snapshot. Read-only during an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwitchConfig {
    /// Debounce before an availability-based switch. Negative disables
    /// auto data switch entirely.
    pub availability_stability_threshold_ms: i64,
    /// Debounce before a performance-based switch. Negative disables
    /// RAT/signal-based switching.
    pub performance_stability_threshold_ms: i64,
    /// Required score advantage (strictly greater). Negative disables
    /// RAT/signal-based switching.
    pub score_tolerance: i32,
    pub require_ping_validation: bool,
    pub allow_roaming_switch: bool,
    pub max_validation_retries: u32,
    pub features: FeatureFlags,
    pub score_table: ScoreTable,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        SwitchConfig {
            availability_stability_threshold_ms: 10_000,
            performance_stability_threshold_ms: 120_000,
            score_tolerance: 100,
            require_ping_validation: true,
            allow_roaming_switch: true,
            max_validation_retries: 7,
            features: FeatureFlags::default(),
            score_table: ScoreTable::default(),
        }
    }
}

impl SwitchConfig {
    pub fn is_feature_enabled(&self) -> bool {
        self.availability_stability_threshold_ms >= 0
    }

    pub fn is_rat_signal_switch_enabled(&self) -> bool {
        self.performance_stability_threshold_ms >= 0 && self.score_tolerance >= 0
    }

    pub fn is_roaming_switch_enabled(&self) -> bool {
        self.allow_roaming_switch && self.features.roaming_switch
    }

    /// Stability delay for a decision, never negative.
    pub fn stability_delay_ms(&self, performance: bool) -> u64 {
        let raw = if performance {
            self.performance_stability_threshold_ms
        } else {
            self.availability_stability_threshold_ms
        };
        u64::try_from(raw).unwrap_or(0)
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(SwitchConfig::default());
        }
        let parsed: SwitchConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

impl SwitchConfigInput {
    pub fn resolve(self) -> Result<SwitchConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = SwitchConfig::default();
        let flags = FeatureFlags::default();
        let features = FeatureFlags {
            roaming_switch: self.features.roaming_switch.unwrap_or(flags.roaming_switch),
            satellite_classification: self
                .features
                .satellite_classification
                .unwrap_or(flags.satellite_classification),
            immediate_fallback_on_disallowed: self
                .features
                .immediate_fallback_on_disallowed
                .unwrap_or(flags.immediate_fallback_on_disallowed),
        };

        let score_table = if self.score_table.is_empty() {
            defaults.score_table
        } else {
            ScoreTable::from_rows(
                self.score_table
                    .iter()
                    .map(|(rat, row)| (rat.as_str(), row.as_slice())),
            )?
        };

        Ok(SwitchConfig {
            availability_stability_threshold_ms: self
                .availability_stability_threshold_ms
                .unwrap_or(defaults.availability_stability_threshold_ms),
            performance_stability_threshold_ms: self
                .performance_stability_threshold_ms
                .unwrap_or(defaults.performance_stability_threshold_ms),
            score_tolerance: self.score_tolerance.unwrap_or(defaults.score_tolerance),
            require_ping_validation: self
                .require_ping_validation
                .unwrap_or(defaults.require_ping_validation),
            allow_roaming_switch: self
                .allow_roaming_switch
                .unwrap_or(defaults.allow_roaming_switch),
            max_validation_retries: self
                .max_validation_retries
                .unwrap_or(defaults.max_validation_retries),
            features,
            score_table,
        })
    }
}
