// Musical Grid - Meter, quantization lattice, and swing
// Provides structure for quantization and musical timing, in integer ticks

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::error::{EngineResult, QuantizeError};
use crate::notation::duration::NoteValue;

/// Default resolution: pulses per quarter note
pub const DEFAULT_PPQ: i64 = 960;

/// Divide rounding halves away from zero (`den` must be positive)
pub(crate) fn div_round_half_away(num: i64, den: i64) -> i64 {
    if num >= 0 {
        (num + den / 2) / den
    } else {
        -((-num + den / 2) / den)
    }
}

/// Musical time signature with tick resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meter {
    /// Pulses per quarter note
    pub ppq: i64,

    /// Beats per bar as written (top number)
    pub numerator: u32,

    /// Note value of one written beat (bottom number, power of two)
    pub denominator: u32,

    /// Tick at which bar 0 starts
    pub origin_ticks: i64,
}

impl Default for Meter {
    fn default() -> Self {
        Meter {
            ppq: DEFAULT_PPQ,
            numerator: 4,
            denominator: 4,
            origin_ticks: 0,
        }
    }
}

/// Position in musical time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridPosition {
    /// Bar number (0-indexed)
    pub bar: i64,

    /// Beat number within bar (0-indexed)
    pub beat: u32,

    /// Ticks past the beat
    pub tick: i64,
}

impl Meter {
    pub fn new(ppq: i64, numerator: u32, denominator: u32) -> EngineResult<Self> {
        let meter = Meter {
            ppq,
            numerator,
            denominator,
            origin_ticks: 0,
        };
        meter.validate()?;
        Ok(meter)
    }

    /// Parse "4/4", "6/8" etc.
    pub fn from_string(s: &str, ppq: i64) -> EngineResult<Self> {
        let (num, den) = s
            .split_once('/')
            .ok_or_else(|| QuantizeError::InvalidMeter(format!("expected N/D, got '{}'", s)))?;
        let numerator = num
            .trim()
            .parse::<u32>()
            .map_err(|e| QuantizeError::InvalidMeter(format!("'{}': {}", s, e)))?;
        let denominator = den
            .trim()
            .parse::<u32>()
            .map_err(|e| QuantizeError::InvalidMeter(format!("'{}': {}", s, e)))?;
        Meter::new(ppq, numerator, denominator)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.ppq <= 0 {
            return Err(QuantizeError::InvalidMeter(format!(
                "ppq must be positive (got {})",
                self.ppq
            )));
        }
        if self.numerator == 0 {
            return Err(QuantizeError::InvalidMeter(
                "numerator must be at least 1".to_string(),
            ));
        }
        if !self.denominator.is_power_of_two() || (4 * self.ppq) % self.denominator as i64 != 0 {
            return Err(QuantizeError::InvalidMeter(format!(
                "denominator {} is not a power of two dividing a whole note of {} ticks",
                self.denominator,
                4 * self.ppq
            )));
        }
        Ok(())
    }

    pub fn whole_ticks(&self) -> i64 {
        4 * self.ppq
    }

    /// Ticks of one written denominator unit
    pub fn unit_ticks(&self) -> i64 {
        self.whole_ticks() / self.denominator as i64
    }

    /// 6/8, 9/8, 12/16 ... group written beats in threes
    pub fn is_compound(&self) -> bool {
        self.numerator > 3 && self.numerator % 3 == 0 && self.denominator >= 8
    }

    /// Ticks of one felt beat
    pub fn beat_ticks(&self) -> i64 {
        if self.is_compound() {
            3 * self.unit_ticks()
        } else {
            self.unit_ticks()
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        if self.is_compound() {
            self.numerator / 3
        } else {
            self.numerator
        }
    }

    pub fn bar_ticks(&self) -> i64 {
        self.numerator as i64 * self.unit_ticks()
    }

    /// First bar line (or beat line) strictly after `position`
    pub fn next_boundary(&self, position: i64, at_beats: bool) -> i64 {
        let step = if at_beats {
            self.beat_ticks()
        } else {
            self.bar_ticks()
        };
        let rel = position - self.origin_ticks;
        self.origin_ticks + (rel.div_euclid(step) + 1) * step
    }

    /// Start of the beat containing `position`
    pub fn beat_start(&self, position: i64) -> i64 {
        let beat = self.beat_ticks();
        let rel = position - self.origin_ticks;
        self.origin_ticks + rel.div_euclid(beat) * beat
    }

    /// Bar/beat/tick for a tick position
    pub fn position_of(&self, position: i64) -> GridPosition {
        let rel = position - self.origin_ticks;
        let bar = rel.div_euclid(self.bar_ticks());
        let in_bar = rel.rem_euclid(self.bar_ticks());
        let beat = in_bar / self.beat_ticks();

        GridPosition {
            bar,
            beat: beat as u32,
            tick: in_bar - beat * self.beat_ticks(),
        }
    }
}

/// Quantization lattice: `origin + n*unit`, odd points shifted by the swing offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGrid {
    /// Spacing between straight grid points
    pub unit_ticks: i64,

    /// Fraction of a unit by which odd points are delayed, in [0, 1)
    pub swing: Ratio<i64>,

    /// Tick of grid point 0
    pub origin_ticks: i64,
}

impl TimeGrid {
    /// Create a validated grid
    pub fn new(unit_ticks: i64, swing: Ratio<i64>, origin_ticks: i64) -> EngineResult<Self> {
        let grid = TimeGrid {
            unit_ticks,
            swing,
            origin_ticks,
        };
        grid.validate()?;
        Ok(grid)
    }

    /// Grid without swing anchored at tick 0
    pub fn straight(unit_ticks: i64) -> EngineResult<Self> {
        TimeGrid::new(unit_ticks, Ratio::from_integer(0), 0)
    }

    /// Straight grid of a note value, anchored at the meter's origin
    pub fn from_note_value(meter: &Meter, value: NoteValue) -> EngineResult<Self> {
        let unit = value
            .ticks(meter.ppq)
            .ok_or(QuantizeError::InvalidGrid { unit_ticks: 0 })?;
        TimeGrid::new(unit, Ratio::from_integer(0), meter.origin_ticks)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.unit_ticks <= 0 {
            return Err(QuantizeError::InvalidGrid {
                unit_ticks: self.unit_ticks,
            });
        }
        if self.swing < Ratio::from_integer(0) || self.swing >= Ratio::from_integer(1) {
            return Err(QuantizeError::InvalidSwing {
                numer: *self.swing.numer(),
                denom: *self.swing.denom(),
            });
        }
        Ok(())
    }

    /// Whole-tick delay applied to odd grid points
    pub fn swing_offset(&self) -> i64 {
        (self.swing * self.unit_ticks).to_integer()
    }

    /// Tick of grid point `n`
    pub fn point(&self, n: i64) -> i64 {
        let base = self.origin_ticks + n * self.unit_ticks;
        if n.rem_euclid(2) == 1 {
            base + self.swing_offset()
        } else {
            base
        }
    }

    /// Nearest grid point; ties resolve to the earlier point
    pub fn snap(&self, position: i64) -> EngineResult<i64> {
        self.validate()?;

        // Swing moves odd points by less than one unit, so the nearest point
        // is always one of the three around the straight cell
        let k = (position - self.origin_ticks).div_euclid(self.unit_ticks);
        let mut best = self.point(k - 1);
        for n in k..=k + 1 {
            let candidate = self.point(n);
            if (position - candidate).abs() < (position - best).abs() {
                best = candidate;
            }
        }

        Ok(best)
    }

    /// Move `amount_percent` of the way towards the snapped point
    ///
    /// 100 is a full snap, 0 leaves the position alone. Values above 100 are clamped.
    pub fn quantize_amount(&self, position: i64, amount_percent: u32) -> EngineResult<i64> {
        let snapped = self.snap(position)?;
        let amount = amount_percent.min(100) as i64;
        Ok(position + div_round_half_away(amount * (snapped - position), 100))
    }

    /// Nearest positive multiple of the unit; ties go to the shorter multiple
    pub fn snap_duration(&self, ticks: i64) -> EngineResult<i64> {
        self.validate()?;
        let ticks = ticks.max(0);
        let mut units = ticks / self.unit_ticks;
        if (ticks % self.unit_ticks) * 2 > self.unit_ticks {
            units += 1;
        }
        Ok(units.max(1) * self.unit_ticks)
    }
}
