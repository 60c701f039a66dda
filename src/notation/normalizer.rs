// Duration normalization
// Splits exact tick durations into tied chains of dotted values that respect bar and beat lines

use crate::error::{EngineResult, QuantizeError};
use crate::groove::grid::Meter;
use crate::groove::tuplet::TupletSpec;
use crate::notation::duration::{NotatableDuration, NoteFragment, NoteValue, MAX_DOTS};

/// Spells tick durations as notatable values
#[derive(Debug, Clone, Copy)]
pub struct DurationNormalizer {
    meter: Meter,

    /// Most dots per fragment (clamped to 3)
    max_dots: u8,

    /// Treat beat lines as hard boundaries too, not just bar lines
    tie_at_beats: bool,
}

impl DurationNormalizer {
    pub fn new(meter: Meter, max_dots: u8, tie_at_beats: bool) -> Self {
        DurationNormalizer {
            meter,
            max_dots: max_dots.min(MAX_DOTS),
            tie_at_beats,
        }
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Lazily produce the fragments for `ticks` starting at `start`
    pub fn fragments(&self, start: i64, ticks: i64) -> EngineResult<Fragments> {
        if ticks <= 0 {
            return Err(QuantizeError::UnsplittableDuration(ticks));
        }
        Ok(Fragments {
            meter: self.meter,
            max_dots: self.max_dots,
            tie_at_beats: self.tie_at_beats,
            position: start,
            remaining: ticks,
            limit: None,
        })
    }

    /// Spell `ticks` starting at `start` as a tied chain
    pub fn normalize(&self, start: i64, ticks: i64) -> EngineResult<NotatableDuration> {
        let fragments: Vec<NoteFragment> = self.fragments(start, ticks)?.collect();
        NotatableDuration::from_fragments(fragments)
            .ok_or(QuantizeError::UnsplittableDuration(ticks))
    }

    /// Spell a duration notated inside `tuplet`, whose span starts at `tuplet_start`
    ///
    /// Works on the nominal (written) length and scales each fragment back to real
    /// ticks. Fails with `NoTupletFit` if any step would need fractional ticks.
    pub fn normalize_in_tuplet(
        &self,
        start: i64,
        ticks: i64,
        tuplet: &TupletSpec,
        tuplet_start: i64,
    ) -> EngineResult<NotatableDuration> {
        if ticks <= 0 {
            return Err(QuantizeError::UnsplittableDuration(ticks));
        }

        let actual = tuplet.actual_count as i64;
        let implied = tuplet.implied_count as i64;
        let offset = start - tuplet_start;
        if (ticks * actual) % implied != 0 || (offset * actual) % implied != 0 {
            return Err(QuantizeError::NoTupletFit);
        }
        let nominal = ticks * actual / implied;
        let nominal_offset = offset * actual / implied;
        let nominal_span = tuplet.actual_count as i64 * tuplet.base_unit_ticks;
        if nominal_offset < 0 || nominal_offset + nominal > nominal_span {
            return Err(QuantizeError::NoTupletFit);
        }

        // Inside the tuplet the only hard boundary is the tuplet's own end
        let written = Fragments {
            meter: self.meter,
            max_dots: self.max_dots,
            tie_at_beats: false,
            position: nominal_offset,
            remaining: nominal,
            limit: Some(nominal_span),
        };

        let mut fragments = Vec::new();
        for fragment in written {
            if (fragment.ticks * implied) % actual != 0 {
                return Err(QuantizeError::NoTupletFit);
            }
            fragments.push(NoteFragment {
                ticks: fragment.ticks * implied / actual,
                ..fragment
            });
        }

        NotatableDuration::from_fragments(fragments).ok_or(QuantizeError::NoTupletFit)
    }
}

/// Restartable iterator over the fragments of one duration
#[derive(Debug, Clone)]
pub struct Fragments {
    meter: Meter,
    max_dots: u8,
    tie_at_beats: bool,
    position: i64,
    remaining: i64,

    /// Fixed boundary replacing the meter's bar lines
    limit: Option<i64>,
}

impl Fragments {
    fn next_boundary(&self) -> i64 {
        match self.limit {
            Some(limit) => limit,
            None => self.meter.next_boundary(self.position, self.tie_at_beats),
        }
    }

    /// Largest dotted value that fits in `room` ticks
    fn largest_fitting(&self, room: i64) -> Option<NoteFragment> {
        let mut best: Option<NoteFragment> = None;
        for value in NoteValue::ALL {
            for dots in 0..=self.max_dots {
                let Some(ticks) = value.dotted_ticks(self.meter.ppq, dots) else {
                    continue;
                };
                if ticks > room {
                    continue;
                }
                // Fewer dots win on equal length
                if best.map_or(true, |b| ticks > b.ticks) {
                    best = Some(NoteFragment { value, dots, ticks });
                }
            }
        }
        best
    }
}

impl Iterator for Fragments {
    type Item = NoteFragment;

    fn next(&mut self) -> Option<NoteFragment> {
        if self.remaining <= 0 {
            return None;
        }

        let room = self.remaining.min(self.next_boundary() - self.position);
        let fragment = match self.largest_fitting(room) {
            Some(fragment) => fragment,
            None => {
                // Residue below the finest value: keep the exact ticks, written as that value
                NoteFragment {
                    value: NoteValue::finest(self.meter.ppq),
                    dots: 0,
                    ticks: room,
                }
            }
        };

        self.position += fragment.ticks;
        self.remaining -= fragment.ticks;
        Some(fragment)
    }
}
