//! # RAT/Signal Score
//!
//! Maps (radio access technology, signal level) to an integer performance
//! score. The mapping is carrier configuration; the policy only relies on
//! it being monotonic in signal level.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use super::{SignalLevel, SIGNAL_LEVELS};
use crate::error::ConfigError;

/// Score-table row key derived from [`DisplayInfo`](super::DisplayInfo).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum RatClass {
    Unknown,
    Gsm,
    Umts,
    Lte,
    LteCa,
    NrNsa,
    NrNsaMmwave,
    NrSa,
}

impl RatClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RatClass::Unknown => "UNKNOWN",
            RatClass::Gsm => "GSM",
            RatClass::Umts => "UMTS",
            RatClass::Lte => "LTE",
            RatClass::LteCa => "LTE_CA",
            RatClass::NrNsa => "NR_NSA",
            RatClass::NrNsaMmwave => "NR_NSA_MMWAVE",
            RatClass::NrSa => "NR_SA",
        }
    }
}

impl fmt::Display for RatClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RatClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "GSM" => Ok(RatClass::Gsm),
            "UMTS" => Ok(RatClass::Umts),
            "LTE" => Ok(RatClass::Lte),
            "LTE_CA" => Ok(RatClass::LteCa),
            "NR_NSA" => Ok(RatClass::NrNsa),
            "NR_NSA_MMWAVE" => Ok(RatClass::NrNsaMmwave),
            "NR_SA" => Ok(RatClass::NrSa),
            _ => Err(ConfigError::UnknownRat(s.to_string())),
        }
    }
}

/// Injected scoring function. Implementations must be pure and
/// non-decreasing in signal level.
pub trait RatSignalScorer: Send + Sync {
    fn score(&self, rat: RatClass, level: SignalLevel) -> i32;
}

/// Per-RAT score rows, one entry per signal level.
///
/// RATs missing from the table (and [`RatClass::Unknown`]) score 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreTable {
    rows: BTreeMap<RatClass, [i32; SIGNAL_LEVELS]>,
}

impl ScoreTable {
    pub fn empty() -> Self {
        ScoreTable {
            rows: BTreeMap::new(),
        }
    }

    /// Build a table from config rows keyed by RAT name (`"LTE"`, `"NR_SA"`, …).
    ///
    /// Rows must hold exactly [`SIGNAL_LEVELS`] non-decreasing scores.
    pub fn from_rows<'a>(
        rows: impl IntoIterator<Item = (&'a str, &'a [i32])>,
    ) -> Result<Self, ConfigError> {
        let mut table = ScoreTable::empty();
        for (name, values) in rows {
            let rat: RatClass = name.parse()?;
            let row: [i32; SIGNAL_LEVELS] =
                values
                    .try_into()
                    .map_err(|_| ConfigError::InvalidScoreRow {
                        rat: name.to_string(),
                        reason: format!("expected {} levels, got {}", SIGNAL_LEVELS, values.len()),
                    })?;
            if row.windows(2).any(|w| w[1] < w[0]) {
                return Err(ConfigError::InvalidScoreRow {
                    rat: name.to_string(),
                    reason: "scores must not decrease with signal level".into(),
                });
            }
            table.rows.insert(rat, row);
        }
        Ok(table)
    }

    pub fn set_row(&mut self, rat: RatClass, row: [i32; SIGNAL_LEVELS]) {
        self.rows.insert(rat, row);
    }

    pub fn row(&self, rat: RatClass) -> Option<&[i32; SIGNAL_LEVELS]> {
        self.rows.get(&rat)
    }
}

impl Default for ScoreTable {
    fn default() -> Self {
        let mut table = ScoreTable::empty();
        table.set_row(RatClass::Gsm, [0, 10, 20, 30, 40]);
        table.set_row(RatClass::Umts, [0, 40, 80, 120, 160]);
        table.set_row(RatClass::Lte, [0, 100, 200, 300, 400]);
        table.set_row(RatClass::LteCa, [0, 150, 250, 350, 450]);
        table.set_row(RatClass::NrNsa, [0, 200, 300, 400, 500]);
        table.set_row(RatClass::NrSa, [0, 250, 350, 450, 550]);
        table.set_row(RatClass::NrNsaMmwave, [0, 300, 500, 700, 900]);
        table
    }
}

impl RatSignalScorer for ScoreTable {
    fn score(&self, rat: RatClass, level: SignalLevel) -> i32 {
        self.rows
            .get(&rat)
            .map(|row| row[level.index()])
            .unwrap_or(0)
    }
}
