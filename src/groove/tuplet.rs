// Tuplet detection
// Decides whether a run of events splits evenly into N parts in the time of M grid units

use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, QuantizeError};

/// Default rounding slack when matching tuplet parts
pub const DEFAULT_TUPLET_TOLERANCE: i64 = 1;

/// N notes in the time of M units of `base_unit_ticks`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TupletSpec {
    /// Notes actually played (3 for a triplet)
    pub actual_count: u32,

    /// Normal notes whose time they take (2 for a triplet)
    pub implied_count: u32,

    /// Length of one normal note
    pub base_unit_ticks: i64,
}

impl TupletSpec {
    /// Create a tuplet, rejecting degenerate ratios
    pub fn new(actual_count: u32, implied_count: u32, base_unit_ticks: i64) -> EngineResult<Self> {
        if actual_count < 2
            || implied_count < 2
            || actual_count == implied_count
            || base_unit_ticks <= 0
        {
            return Err(QuantizeError::InvalidTuplet {
                actual: actual_count,
                implied: implied_count,
                base_unit_ticks,
            });
        }
        Ok(TupletSpec {
            actual_count,
            implied_count,
            base_unit_ticks,
        })
    }

    pub fn triplet(base_unit_ticks: i64) -> EngineResult<Self> {
        TupletSpec::new(3, 2, base_unit_ticks)
    }

    /// Total ticks the tuplet occupies
    pub fn span_ticks(&self) -> i64 {
        self.implied_count as i64 * self.base_unit_ticks
    }

    /// Length of one tuplet part, if it is a whole number of ticks
    pub fn part_ticks(&self) -> Option<i64> {
        let span = self.span_ticks();
        let actual = self.actual_count as i64;
        if span % actual == 0 {
            Some(span / actual)
        } else {
            None
        }
    }

    /// e.g. "3:2"
    pub fn ratio_label(&self) -> String {
        format!("{}:{}", self.actual_count, self.implied_count)
    }
}

/// Which tuplet groupings may be tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TupletLevel {
    /// Straight grids only
    None,

    /// Two in the time of three
    Duplet,

    /// Three in the time of two
    Triplet,

    /// Any supported N:M grouping
    Any,
}

impl Default for TupletLevel {
    fn default() -> Self {
        TupletLevel::Triplet
    }
}

impl TupletLevel {
    /// Candidate (actual, implied) ratios, simplest first
    pub fn ratios(&self) -> &'static [(u32, u32)] {
        match self {
            TupletLevel::None => &[],
            TupletLevel::Duplet => &[(2, 3)],
            TupletLevel::Triplet => &[(3, 2)],
            TupletLevel::Any => &[(3, 2), (2, 3), (4, 3), (5, 4), (6, 4), (7, 4), (9, 8)],
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "none" | "None" => TupletLevel::None,
            "duplet" | "Duplet" => TupletLevel::Duplet,
            "triplet" | "Triplet" => TupletLevel::Triplet,
            "any" | "Any" => TupletLevel::Any,
            _ => TupletLevel::default(),
        }
    }
}

/// Penalty used when ranking tuplet candidates against simpler notation
pub fn tuplet_penalty(actual: u32, implied: u32) -> u32 {
    match (actual, implied) {
        (3, 2) => 1,
        (2, 3) => 2,
        _ => 3,
    }
}

/// Matches runs of event durations against tuplet ratios
#[derive(Debug, Clone, Copy)]
pub struct TupletDetector {
    /// Allowed slack in ticks for each comparison
    pub tolerance_ticks: i64,
}

impl Default for TupletDetector {
    fn default() -> Self {
        TupletDetector {
            tolerance_ticks: DEFAULT_TUPLET_TOLERANCE,
        }
    }
}

impl TupletDetector {
    pub fn new(tolerance_ticks: i64) -> Self {
        TupletDetector {
            tolerance_ticks: tolerance_ticks.max(0),
        }
    }

    /// Find the first tuplet of `level` that the run fills exactly
    ///
    /// `durations` are the ticks each event occupies within the run (inter-onset
    /// intervals). Fails with `NoTupletFit` when no ratio fits; callers fall back to
    /// non-tuplet grouping.
    pub fn detect(
        &self,
        durations: &[i64],
        level: TupletLevel,
        unit_ticks: i64,
    ) -> EngineResult<TupletSpec> {
        let total = Self::run_total(durations, unit_ticks)?;

        for &(actual, implied) in level.ratios() {
            if let Some(spec) = self.fit(durations, total, actual, implied, unit_ticks) {
                log::debug!(
                    "Tuplet {} over {} ticks fits {} events",
                    spec.ratio_label(),
                    unit_ticks,
                    durations.len()
                );
                return Ok(spec);
            }
        }

        Err(QuantizeError::NoTupletFit)
    }

    /// Check the run against a single `actual:implied` ratio
    pub fn detect_ratio(
        &self,
        durations: &[i64],
        actual: u32,
        implied: u32,
        unit_ticks: i64,
    ) -> EngineResult<TupletSpec> {
        let total = Self::run_total(durations, unit_ticks)?;
        self.fit(durations, total, actual, implied, unit_ticks)
            .ok_or(QuantizeError::NoTupletFit)
    }

    fn run_total(durations: &[i64], unit_ticks: i64) -> EngineResult<i64> {
        if durations.is_empty() || unit_ticks <= 0 || durations.iter().any(|&d| d <= 0) {
            return Err(QuantizeError::NoTupletFit);
        }

        // A run that already sits on the straight grid needs no tuplet
        if durations.iter().all(|&d| d % unit_ticks == 0) {
            return Err(QuantizeError::NoTupletFit);
        }

        Ok(durations.iter().sum())
    }

    fn fit(
        &self,
        durations: &[i64],
        total: i64,
        actual: u32,
        implied: u32,
        unit_ticks: i64,
    ) -> Option<TupletSpec> {
        let tol = self.tolerance_ticks;
        let span = implied as i64 * unit_ticks;
        if (total - span).abs() > tol {
            return None;
        }

        let actual_i = actual as i64;
        let part = (span + actual_i / 2) / actual_i;
        if (part * actual_i - span).abs() > tol {
            return None;
        }

        let mut parts = 0i64;
        for &d in durations {
            let count = (d + part / 2) / part;
            if count == 0 || (d - count * part).abs() > tol {
                return None;
            }
            parts += count;
        }

        if parts != actual_i {
            return None;
        }

        TupletSpec::new(actual, implied, unit_ticks).ok()
    }
}
