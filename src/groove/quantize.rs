// Grid and legato quantization
// Snaps performed starts to the lattice and derives notated durations per voice

use std::collections::BTreeMap;

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use super::grid::{Meter, TimeGrid};
use super::heuristic::ComplexityTier;
use super::tuplet::{TupletLevel, TupletSpec, DEFAULT_TUPLET_TOLERANCE};
use crate::engine::cancel::CancelFlag;
use crate::error::{EngineResult, QuantizeError};
use crate::events::TimedEvent;
use crate::notation::duration::MAX_DOTS;

/// What to do with rests shorter than the grid unit under legato quantization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestCollapse {
    /// Leave short rests alone
    Keep,

    /// Let the preceding note take the rest's time
    IntoPreceding,

    /// Let the following note start where the rest started
    IntoFollowing,
}

impl Default for RestCollapse {
    fn default() -> Self {
        RestCollapse::Keep
    }
}

impl RestCollapse {
    pub fn from_string(s: &str) -> Self {
        match s {
            "into_preceding" | "preceding" => RestCollapse::IntoPreceding,
            "into_following" | "following" => RestCollapse::IntoFollowing,
            _ => RestCollapse::Keep,
        }
    }
}

/// Parameter bundle for one quantize invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizeParams {
    /// Time signature, resolution and bar origin
    pub meter: Meter,

    /// Grid unit for the grid and legato policies
    pub grid_unit_ticks: i64,

    /// Delay of odd grid points as a fraction of the unit, in [0, 1)
    pub swing: Ratio<i64>,

    /// Percentage of the way towards the grid to move (100 = full snap)
    pub iterative_amount_percent: u32,

    /// Finest subdivision the heuristic policy may use
    pub complexity: ComplexityTier,

    /// Tuplet groupings the heuristic policy may use
    pub tuplet_level: TupletLevel,

    /// Let each voice of a staff pick its own grid
    pub permit_counterpoint: bool,

    /// Snap durations to grid multiples instead of spanning to the next start
    pub quantize_durations: bool,

    /// Write only the notation attribute, leaving performance timing untouched
    pub notation_only: bool,

    pub collapse_rests: RestCollapse,

    /// Most dots per notated fragment (0-3)
    pub max_dots: u8,

    /// Split notated values at beat lines as well as bar lines
    pub tie_at_beats: bool,

    /// Ticks of error one step of notational complexity is worth
    pub simplicity_weight: i64,

    /// Mean per-point error above which the heuristic gives up (default: half a grid unit)
    pub error_tolerance_ticks: Option<i64>,

    /// Rounding slack for tuplet matching
    pub tuplet_tolerance_ticks: i64,

    /// Report beam groups for the result
    pub rebeam: bool,

    /// Report staccato/tenuto hints from performed vs notated length
    pub articulate: bool,
}

impl Default for QuantizeParams {
    fn default() -> Self {
        QuantizeParams {
            meter: Meter::default(),
            grid_unit_ticks: 240,
            swing: Ratio::from_integer(0),
            iterative_amount_percent: 100,
            complexity: ComplexityTier::default(),
            tuplet_level: TupletLevel::default(),
            permit_counterpoint: false,
            quantize_durations: false,
            notation_only: true,
            collapse_rests: RestCollapse::default(),
            max_dots: 2,
            tie_at_beats: false,
            simplicity_weight: 4,
            error_tolerance_ticks: None,
            tuplet_tolerance_ticks: DEFAULT_TUPLET_TOLERANCE,
            rebeam: true,
            articulate: false,
        }
    }
}

impl QuantizeParams {
    /// The straight/swung lattice described by these parameters
    pub fn grid(&self) -> EngineResult<TimeGrid> {
        TimeGrid::new(self.grid_unit_ticks, self.swing, self.meter.origin_ticks)
    }

    pub fn error_tolerance(&self) -> i64 {
        self.error_tolerance_ticks
            .unwrap_or(self.grid_unit_ticks / 2)
            .max(0)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.meter.validate()?;
        self.grid()?;
        if self.max_dots > MAX_DOTS {
            return Err(QuantizeError::InvalidParameter(format!(
                "max_dots must be at most {} (got {})",
                MAX_DOTS, self.max_dots
            )));
        }
        if self.simplicity_weight < 0 {
            return Err(QuantizeError::InvalidParameter(
                "simplicity_weight must not be negative".to_string(),
            ));
        }
        if self.tuplet_tolerance_ticks < 0 {
            return Err(QuantizeError::InvalidParameter(
                "tuplet_tolerance_ticks must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tuplet an event is notated in, with the tick its span starts at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TupletPlacement {
    pub spec: TupletSpec,
    pub span_start: i64,
}

/// Quantized start and length for one event, before note values are spelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Placement {
    pub start: i64,
    pub ticks: i64,
    pub tuplet: Option<TupletPlacement>,

    /// Index of the note that took over this (rest) event's time
    pub absorbed_into: Option<usize>,
}

/// Event indices per voice, ordered by performance start (ties keep input order)
pub(crate) fn voices(events: &[TimedEvent]) -> BTreeMap<u32, Vec<usize>> {
    let mut voices: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
    for (i, event) in events.iter().enumerate() {
        voices.entry(event.voice).or_default().push(i);
    }
    for order in voices.values_mut() {
        order.sort_by_key(|&i| (events[i].start_ticks, i));
    }
    voices
}

/// For each position in `starts`, the first later start after it
pub(crate) fn next_later_starts(starts: &[i64]) -> Vec<Option<i64>> {
    let mut next = vec![None; starts.len()];
    let mut later: Option<i64> = None;
    for pos in (0..starts.len()).rev() {
        // Equal starts share the same successor
        if pos + 1 < starts.len() && starts[pos + 1] > starts[pos] {
            later = Some(starts[pos + 1]);
        }
        next[pos] = later;
    }
    next
}

fn snap_position(grid: &TimeGrid, position: i64, amount_percent: u32) -> EngineResult<i64> {
    if amount_percent >= 100 {
        grid.snap(position)
    } else {
        grid.quantize_amount(position, amount_percent)
    }
}

/// Snap starts to the grid; durations span to the next start, clipped to avoid overlap
pub(crate) fn quantize_grid(
    events: &[TimedEvent],
    params: &QuantizeParams,
    cancel: &CancelFlag,
) -> EngineResult<Vec<Placement>> {
    let grid = params.grid()?;
    let amount = params.iterative_amount_percent;
    let mut placements = vec![None; events.len()];

    for (voice, order) in voices(events) {
        let mut starts = Vec::with_capacity(order.len());
        for &i in &order {
            cancel.check()?;
            starts.push(snap_position(&grid, events[i].start_ticks, amount)?);
        }
        let next = next_later_starts(&starts);

        for (pos, &i) in order.iter().enumerate() {
            let event = &events[i];
            let start = starts[pos];

            let mut ticks = if params.quantize_durations {
                grid.snap_duration(event.duration_ticks)?
            } else {
                match next[pos] {
                    Some(n) => n - start,
                    None => snap_position(&grid, event.end_ticks(), amount)? - start,
                }
            };

            if let Some(n) = next[pos] {
                if start + ticks > n {
                    ticks = n - start;
                }
            }
            if ticks <= 0 {
                ticks = grid.unit_ticks;
            }

            placements[i] = Some(Placement {
                start,
                ticks,
                tuplet: None,
                absorbed_into: None,
            });
        }

        log::debug!("Grid-quantized {} events in voice {}", order.len(), voice);
    }

    Ok(placements.into_iter().flatten().collect())
}

/// Snap starts to the grid and extend every event to meet the next one
pub(crate) fn quantize_legato(
    events: &[TimedEvent],
    params: &QuantizeParams,
    cancel: &CancelFlag,
) -> EngineResult<Vec<Placement>> {
    let grid = params.grid()?;
    let amount = params.iterative_amount_percent;
    let mut placements = vec![None; events.len()];

    for (voice, order) in voices(events) {
        let mut starts = Vec::with_capacity(order.len());
        for &i in &order {
            cancel.check()?;
            starts.push(snap_position(&grid, events[i].start_ticks, amount)?);
        }

        let absorbed =
            collapse_short_rests(events, &order, &mut starts, &grid, params.collapse_rests);

        // Absorbed rests drop out of the timeline
        let timeline: Vec<usize> = (0..order.len()).filter(|&p| absorbed[p].is_none()).collect();
        let timeline_starts: Vec<i64> = timeline.iter().map(|&p| starts[p]).collect();
        let next = next_later_starts(&timeline_starts);

        for (t, &pos) in timeline.iter().enumerate() {
            let i = order[pos];
            let start = starts[pos];
            let mut ticks = match next[t] {
                Some(n) => n - start,
                None => snap_position(&grid, events[i].end_ticks(), amount)? - start,
            };
            if ticks <= 0 {
                ticks = grid.unit_ticks;
            }
            placements[i] = Some(Placement {
                start,
                ticks,
                tuplet: None,
                absorbed_into: None,
            });
        }

        for (pos, target) in absorbed.iter().enumerate() {
            if let Some(target_pos) = target {
                placements[order[pos]] = Some(Placement {
                    start: starts[pos],
                    ticks: grid.unit_ticks,
                    tuplet: None,
                    absorbed_into: Some(order[*target_pos]),
                });
            }
        }

        log::debug!("Legato-quantized {} events in voice {}", order.len(), voice);
    }

    Ok(placements.into_iter().flatten().collect())
}

/// Decide which short rests are merged and into which note (positions within `order`)
///
/// Only the neighbouring event in the voice can take a rest's time: a note, or a rest
/// that already collapsed into one. Rests merged forward pull the following note's
/// start back to their own start.
fn collapse_short_rests(
    events: &[TimedEvent],
    order: &[usize],
    starts: &mut [i64],
    grid: &TimeGrid,
    collapse: RestCollapse,
) -> Vec<Option<usize>> {
    let mut absorbed: Vec<Option<usize>> = vec![None; order.len()];
    if collapse == RestCollapse::Keep {
        return absorbed;
    }

    let note_at = |pos: usize, absorbed: &[Option<usize>]| {
        if events[order[pos]].is_rest() {
            absorbed[pos]
        } else {
            Some(pos)
        }
    };

    // Visit rests from the side they merge towards so runs of short rests chain
    let positions: Vec<usize> = match collapse {
        RestCollapse::IntoFollowing => (0..order.len()).rev().collect(),
        _ => (0..order.len()).collect(),
    };

    for pos in positions {
        let event = &events[order[pos]];
        if !event.is_rest() || event.duration_ticks >= grid.unit_ticks {
            continue;
        }

        let preceding = pos.checked_sub(1).and_then(|p| note_at(p, &absorbed));
        let following = Some(pos + 1)
            .filter(|&p| p < order.len())
            .and_then(|p| note_at(p, &absorbed));
        let target = match collapse {
            RestCollapse::IntoPreceding => preceding.or(following),
            RestCollapse::IntoFollowing => following.or(preceding),
            RestCollapse::Keep => None,
        };

        match target {
            Some(target) => {
                if target > pos {
                    starts[target] = starts[target].min(starts[pos]);
                }
                absorbed[pos] = Some(target);
            }
            None => {
                log::warn!(
                    "Short rest {} has no neighbouring note to merge into; keeping it",
                    event.id
                );
            }
        }
    }

    absorbed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(unit: i64) -> QuantizeParams {
        QuantizeParams {
            grid_unit_ticks: unit,
            ..QuantizeParams::default()
        }
    }

    fn shape(placements: &[Placement]) -> Vec<(i64, i64)> {
        placements.iter().map(|p| (p.start, p.ticks)).collect()
    }

    #[test]
    fn test_next_later_starts() {
        let next = next_later_starts(&[0, 0, 240, 480, 480]);
        assert_eq!(next, vec![Some(240), Some(240), Some(480), None, None]);
    }

    #[test]
    fn test_grid_quantize_spans_to_next_start() {
        let events = vec![
            TimedEvent::note(10, 100, 60),
            TimedEvent::note(250, 100, 62),
            TimedEvent::note(470, 300, 64),
        ];
        let placements = quantize_grid(&events, &params(240), &CancelFlag::new()).unwrap();

        assert_eq!(shape(&placements), vec![(0, 240), (240, 240), (480, 240)]);
    }

    #[test]
    fn test_grid_quantize_durations_and_clip() {
        let events = vec![
            TimedEvent::note(0, 100, 60),
            TimedEvent::note(250, 500, 62),
            TimedEvent::note(480, 300, 64),
        ];
        let p = QuantizeParams {
            quantize_durations: true,
            ..params(240)
        };
        let placements = quantize_grid(&events, &p, &CancelFlag::new()).unwrap();

        // 100 rounds up to one unit; 500 rounds to 480 but is clipped at the next start
        assert_eq!(shape(&placements), vec![(0, 240), (240, 240), (480, 240)]);
    }

    #[test]
    fn test_grid_quantize_no_overlap() {
        let events: Vec<TimedEvent> = (0..40)
            .map(|i| TimedEvent::note(i * 97 + (i % 5) * 13, 300 + (i % 3) * 50, 60))
            .collect();
        for durations in [false, true] {
            let p = QuantizeParams {
                quantize_durations: durations,
                ..params(120)
            };
            let mut placements = quantize_grid(&events, &p, &CancelFlag::new()).unwrap();
            placements.sort_by_key(|p| p.start);
            for pair in placements.windows(2) {
                if pair[1].start > pair[0].start {
                    assert!(pair[0].start + pair[0].ticks <= pair[1].start);
                }
            }
        }
    }

    #[test]
    fn test_grid_quantize_chord_keeps_unit_duration() {
        let events = vec![TimedEvent::note(5, 0, 60), TimedEvent::note(3, 0, 64)];
        let placements = quantize_grid(&events, &params(240), &CancelFlag::new()).unwrap();
        assert_eq!(shape(&placements), vec![(0, 240), (0, 240)]);
    }

    #[test]
    fn test_grid_quantize_voices_independent() {
        let events = vec![
            TimedEvent::note(0, 960, 60),
            TimedEvent::note(250, 200, 72).in_voice(1),
            TimedEvent::note(480, 480, 62),
        ];
        let placements = quantize_grid(&events, &params(240), &CancelFlag::new()).unwrap();
        assert_eq!(shape(&placements), vec![(0, 480), (240, 240), (480, 480)]);
    }

    #[test]
    fn test_grid_quantize_partial_amount() {
        let events = vec![TimedEvent::note(260, 220, 60)];
        let p = QuantizeParams {
            iterative_amount_percent: 50,
            ..params(240)
        };
        let placements = quantize_grid(&events, &p, &CancelFlag::new()).unwrap();
        // start 260 -> 250, end 480 stays on the grid
        assert_eq!(shape(&placements), vec![(250, 230)]);
    }

    #[test]
    fn test_grid_quantize_with_swing() {
        let events = vec![TimedEvent::note(0, 200, 60), TimedEvent::note(300, 150, 62)];
        let p = QuantizeParams {
            swing: Ratio::new(1, 3),
            ..params(240)
        };
        let placements = quantize_grid(&events, &p, &CancelFlag::new()).unwrap();
        assert_eq!(shape(&placements), vec![(0, 320), (320, 160)]);
    }

    #[test]
    fn test_legato_extends_to_next() {
        let events = vec![
            TimedEvent::note(0, 50, 60),
            TimedEvent::note(475, 50, 62),
            TimedEvent::note(950, 100, 64),
        ];
        let placements = quantize_legato(&events, &params(240), &CancelFlag::new()).unwrap();
        assert_eq!(shape(&placements), vec![(0, 480), (480, 480), (960, 240)]);
    }

    #[test]
    fn test_legato_collapse_into_preceding() {
        let events = vec![
            TimedEvent::note(0, 400, 60),
            TimedEvent::rest(480, 100),
            TimedEvent::note(720, 240, 62),
        ];
        let p = QuantizeParams {
            collapse_rests: RestCollapse::IntoPreceding,
            ..params(240)
        };
        let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();

        assert_eq!((placements[0].start, placements[0].ticks), (0, 720));
        assert_eq!(placements[1].absorbed_into, Some(0));
        assert_eq!((placements[2].start, placements[2].ticks), (720, 240));
    }

    #[test]
    fn test_legato_collapse_into_following() {
        let events = vec![
            TimedEvent::note(0, 400, 60),
            TimedEvent::rest(480, 100),
            TimedEvent::note(720, 240, 62),
        ];
        let p = QuantizeParams {
            collapse_rests: RestCollapse::IntoFollowing,
            ..params(240)
        };
        let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();

        assert_eq!((placements[0].start, placements[0].ticks), (0, 480));
        assert_eq!(placements[1].absorbed_into, Some(2));
        assert_eq!((placements[2].start, placements[2].ticks), (480, 480));
    }

    #[test]
    fn test_legato_keeps_long_rests() {
        let events = vec![
            TimedEvent::note(0, 400, 60),
            TimedEvent::rest(480, 480),
            TimedEvent::note(960, 240, 62),
        ];
        let p = QuantizeParams {
            collapse_rests: RestCollapse::IntoPreceding,
            ..params(240)
        };
        let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();
        assert!(placements.iter().all(|p| p.absorbed_into.is_none()));
        assert_eq!(shape(&placements), vec![(0, 480), (480, 480), (960, 240)]);
    }

    #[test]
    fn test_legato_collapse_stops_at_long_rest() {
        let events = vec![
            TimedEvent::note(0, 400, 60),
            TimedEvent::rest(480, 100),
            TimedEvent::rest(720, 480),
            TimedEvent::note(1200, 240, 62),
        ];
        let p = QuantizeParams {
            collapse_rests: RestCollapse::IntoFollowing,
            ..params(240)
        };
        let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();

        // The long rest is in the way, so the short one goes to the note before it
        assert_eq!(placements[1].absorbed_into, Some(0));
        assert_eq!(
            shape(&placements),
            vec![(0, 720), (480, 240), (720, 480), (1200, 240)]
        );

        let mut spans: Vec<(i64, i64)> = placements
            .iter()
            .filter(|p| p.absorbed_into.is_none())
            .map(|p| (p.start, p.start + p.ticks))
            .collect();
        spans.sort();
        for pair in spans.windows(2) {
            assert!(pair[0].1 <= pair[1].0, "{:?} overlaps {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_legato_collapse_chains_short_rests() {
        let events = vec![
            TimedEvent::note(0, 200, 60),
            TimedEvent::rest(240, 100),
            TimedEvent::rest(480, 100),
            TimedEvent::note(720, 240, 62),
        ];
        for (collapse, target) in [
            (RestCollapse::IntoPreceding, 0),
            (RestCollapse::IntoFollowing, 3),
        ] {
            let p = QuantizeParams {
                collapse_rests: collapse,
                ..params(240)
            };
            let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();
            assert_eq!(placements[1].absorbed_into, Some(target));
            assert_eq!(placements[2].absorbed_into, Some(target));
        }
    }

    #[test]
    fn test_legato_short_rest_between_rests_is_kept() {
        let events = vec![
            TimedEvent::rest(0, 480),
            TimedEvent::rest(480, 100),
            TimedEvent::rest(720, 480),
            TimedEvent::note(1200, 240, 62),
        ];
        let p = QuantizeParams {
            collapse_rests: RestCollapse::IntoPreceding,
            ..params(240)
        };
        let placements = quantize_legato(&events, &p, &CancelFlag::new()).unwrap();
        assert!(placements.iter().all(|p| p.absorbed_into.is_none()));
    }

    #[test]
    fn test_params_validation() {
        assert!(QuantizeParams::default().validate().is_ok());
        assert!(params(0).validate().is_err());
        let p = QuantizeParams {
            max_dots: 4,
            ..QuantizeParams::default()
        };
        assert!(matches!(p.validate(), Err(QuantizeError::InvalidParameter(_))));
        assert_eq!(QuantizeParams::default().error_tolerance(), 120);
    }

    #[test]
    fn test_cancelled_run() {
        let events = vec![TimedEvent::note(0, 100, 60)];
        let cancel = CancelFlag::new();
        cancel.cancel();
        assert_eq!(
            quantize_grid(&events, &params(240), &cancel),
            Err(QuantizeError::Cancelled)
        );
    }
}
