// Heuristic notation quantizer
// Scores candidate grids (straight and tuplet) per beat window and keeps the best fit

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::grid::Meter;
use super::quantize::{next_later_starts, voices, Placement, QuantizeParams, TupletPlacement};
use super::tuplet::{tuplet_penalty, TupletDetector, TupletLevel, TupletSpec};
use crate::engine::cancel::CancelFlag;
use crate::error::EngineResult;
use crate::events::TimedEvent;
use crate::notation::duration::NoteValue;

/// How fine a subdivision the heuristic may notate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityTier {
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl Default for ComplexityTier {
    fn default() -> Self {
        ComplexityTier::Medium
    }
}

impl ComplexityTier {
    /// Shortest straight value this tier allows
    pub fn finest_value(&self) -> NoteValue {
        match self {
            ComplexityTier::VeryLow => NoteValue::Quarter,
            ComplexityTier::Low => NoteValue::Eighth,
            ComplexityTier::Medium => NoteValue::Sixteenth,
            ComplexityTier::High => NoteValue::ThirtySecond,
            ComplexityTier::VeryHigh => NoteValue::SixtyFourth,
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "very_low" | "VeryLow" => ComplexityTier::VeryLow,
            "low" | "Low" => ComplexityTier::Low,
            "medium" | "Medium" => ComplexityTier::Medium,
            "high" | "High" => ComplexityTier::High,
            "very_high" | "VeryHigh" => ComplexityTier::VeryHigh,
            _ => ComplexityTier::default(),
        }
    }
}

/// Progress of one heuristic run over a selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum HeuristicState {
    Idle,
    Scoring { candidates: usize },
    BestSelected,

    /// Terminal: grids chosen and placements produced
    Applied,

    /// Terminal: no candidate within tolerance, caller falls back to the grid policy
    Rejected,
}

impl HeuristicState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HeuristicState::Applied | HeuristicState::Rejected)
    }
}

fn advance(state: &mut HeuristicState, next: HeuristicState) {
    log::debug!("Heuristic quantizer: {:?} -> {:?}", state, next);
    *state = next;
}

/// One grid the heuristic can snap a window to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GridCandidate {
    /// Written value of one grid step (the tuplet's normal note when tupled)
    pub value: NoteValue,

    /// Ticks of that value
    pub unit_ticks: i64,

    /// (actual, implied) when the grid is a tuplet grid
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuplet: Option<(u32, u32)>,
}

impl GridCandidate {
    /// Distance between neighbouring grid points
    pub fn step_ticks(&self) -> i64 {
        match self.tuplet {
            Some((actual, implied)) => self.unit_ticks * implied as i64 / actual as i64,
            None => self.unit_ticks,
        }
    }

    /// Length of one tuplet group (or one step for straight grids)
    pub fn span_ticks(&self) -> i64 {
        match self.tuplet {
            Some((_, implied)) => self.unit_ticks * implied as i64,
            None => self.unit_ticks,
        }
    }

    /// Halvings below a quarter plus the tuplet penalty
    pub fn complexity(&self) -> u32 {
        let depth = self
            .value
            .halvings_from_breve()
            .saturating_sub(NoteValue::Quarter.halvings_from_breve());
        depth + self.tuplet.map_or(0, |(a, i)| tuplet_penalty(a, i))
    }

    pub fn tuplet_spec(&self) -> Option<TupletSpec> {
        let (actual, implied) = self.tuplet?;
        TupletSpec::new(actual, implied, self.unit_ticks).ok()
    }

    /// Nearest grid point counted from `anchor`; ties resolve to the earlier point
    pub fn snap(&self, position: i64, anchor: i64) -> i64 {
        let step = self.step_ticks();
        let rel = position - anchor;
        let mut q = rel.div_euclid(step);
        if rel.rem_euclid(step) * 2 > step {
            q += 1;
        }
        anchor + q * step
    }

    /// e.g. "16th" or "16th 3:2"
    pub fn describe(&self) -> String {
        match self.tuplet {
            Some((actual, implied)) => format!("{} {}:{}", self.value.name(), actual, implied),
            None => self.value.name().to_string(),
        }
    }
}

/// The grid chosen for one beat window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowChoice {
    /// Voice the choice applies to; None when all voices share it
    pub voice: Option<u32>,

    pub window_start: i64,

    pub candidate: GridCandidate,

    /// Total absolute error of the window's onsets (and free-standing ends)
    pub error_ticks: i64,
}

/// Grids to try in every beat window, coarsest first
///
/// The coarsest straight value that divides the beat is always included, even when
/// the tier would exclude it.
pub fn candidate_grids(
    meter: &Meter,
    complexity: ComplexityTier,
    level: TupletLevel,
) -> Vec<GridCandidate> {
    let window = meter.beat_ticks();
    let finest = complexity.finest_value();
    let mut candidates = Vec::new();

    for value in NoteValue::ALL {
        let Some(unit) = value.ticks(meter.ppq) else {
            continue;
        };
        if unit > window || window % unit != 0 {
            continue;
        }
        if !candidates.is_empty() && value > finest {
            break;
        }

        candidates.push(GridCandidate {
            value,
            unit_ticks: unit,
            tuplet: None,
        });

        for &(actual, implied) in level.ratios() {
            let span = unit * implied as i64;
            if span <= window && window % span == 0 && span % actual as i64 == 0 {
                candidates.push(GridCandidate {
                    value,
                    unit_ticks: unit,
                    tuplet: Some((actual, implied)),
                });
            }
        }
    }

    candidates
}

/// Extra passes over the placed timeline before giving up on a fixed point
const SETTLE_PASSES: usize = 8;

/// Result of one heuristic run
#[derive(Debug, Clone)]
pub(crate) struct HeuristicOutcome {
    pub state: HeuristicState,
    pub placements: Vec<Placement>,
    pub choices: Vec<WindowChoice>,
}

impl HeuristicOutcome {
    fn rejected(choices: Vec<WindowChoice>) -> Self {
        HeuristicOutcome {
            state: HeuristicState::Rejected,
            placements: Vec::new(),
            choices,
        }
    }
}

/// An event scored in a window
#[derive(Debug, Clone, Copy)]
struct Member {
    index: usize,

    /// Start already fixed by the previous window, which snapped the event onto this beat
    pinned: Option<i64>,
}

/// Chosen grid, window anchor and snapped start of one event
type Snapped = (GridCandidate, i64, i64);

enum Selection {
    Chosen {
        choices: Vec<WindowChoice>,
        snapped: Vec<Option<Snapped>>,
    },
    Rejected(Vec<WindowChoice>),
}

/// Ends that stop short of the next onset in their voice carry their own timing
fn free_standing_ends(events: &[TimedEvent], order: &[usize]) -> Vec<(usize, Option<i64>)> {
    order
        .iter()
        .enumerate()
        .map(|(pos, &i)| {
            let event = &events[i];
            let next_start = order[pos + 1..]
                .iter()
                .map(|&j| events[j].start_ticks)
                .find(|&s| s > event.start_ticks);
            let end = match next_start {
                Some(n) if event.end_ticks() >= n => None,
                _ if event.duration_ticks > 0 => Some(event.end_ticks()),
                _ => None,
            };
            (i, end)
        })
        .collect()
}

/// Error and scored point count of a window's members against one grid
///
/// An end is scored in the window its event finally lands in, so members this grid
/// would push onto the next beat contribute only their onset here.
fn window_error(
    events: &[TimedEvent],
    free_end: &[Option<i64>],
    members: &[Member],
    candidate: &GridCandidate,
    anchor: i64,
    boundary: i64,
) -> (i64, usize) {
    let mut error = 0;
    let mut points = 0;
    for member in members {
        let i = member.index;
        let start = match member.pinned {
            Some(start) => start,
            None => {
                let performed = events[i].start_ticks;
                let start = candidate.snap(performed, anchor);
                error += (performed - start).abs();
                start
            }
        };
        points += 1;

        if start < boundary {
            if let Some(end) = free_end[i] {
                error += (end - candidate.snap(end, anchor)).abs();
                points += 1;
            }
        }
    }
    (error, points)
}

/// Pick a grid per beat window and snap every onset to it
///
/// Windows are visited in time order. An onset that snaps onto the next beat line moves
/// into that beat's window, so each event ends up in the window of its snapped start.
fn select_grids(
    events: &[TimedEvent],
    by_voice: &BTreeMap<u32, Vec<usize>>,
    candidates: &[GridCandidate],
    params: &QuantizeParams,
    cancel: &CancelFlag,
) -> EngineResult<Selection> {
    let meter = &params.meter;
    let beat = meter.beat_ticks();
    let tolerance = params.error_tolerance();

    let mut free_end: Vec<Option<i64>> = vec![None; events.len()];
    for order in by_voice.values() {
        for (i, end) in free_standing_ends(events, order) {
            free_end[i] = end;
        }
    }

    // Without counterpoint every voice in a window shares one grid
    let group_of = |voice: u32| params.permit_counterpoint.then_some(voice);

    let mut windows: BTreeMap<(Option<u32>, i64), Vec<Member>> = BTreeMap::new();
    for (&voice, order) in by_voice {
        for &index in order {
            let anchor = meter.beat_start(events[index].start_ticks);
            windows
                .entry((group_of(voice), anchor))
                .or_default()
                .push(Member {
                    index,
                    pinned: None,
                });
        }
    }

    let mut choices = Vec::with_capacity(windows.len());
    let mut snapped: Vec<Option<Snapped>> = vec![None; events.len()];

    while let Some(((group, anchor), members)) = windows.pop_first() {
        cancel.check()?;
        let boundary = anchor + beat;

        let mut best: Option<((i64, u32, Reverse<i64>, usize), i64, usize)> = None;
        for (k, candidate) in candidates.iter().enumerate() {
            let (error, points) =
                window_error(events, &free_end, &members, candidate, anchor, boundary);
            let complexity = candidate.complexity();
            let score = error + params.simplicity_weight * complexity as i64;
            let key = (score, complexity, Reverse(candidate.step_ticks()), k);
            if best.map_or(true, |(b, _, _)| key < b) {
                best = Some((key, error, points));
            }
        }

        let Some(((_, _, _, k), error, points)) = best else {
            continue;
        };
        let chosen = candidates[k];

        if error > tolerance * points as i64 {
            log::warn!(
                "Best grid {} at tick {} misses by {} ticks over {} points; \
                 falling back to grid quantization",
                chosen.describe(),
                anchor,
                error,
                points
            );
            return Ok(Selection::Rejected(choices));
        }

        let mut kept = 0;
        for member in &members {
            let start = member
                .pinned
                .unwrap_or_else(|| chosen.snap(events[member.index].start_ticks, anchor));
            if start >= boundary {
                windows
                    .entry((group, boundary))
                    .or_default()
                    .push(Member {
                        pinned: Some(start),
                        ..*member
                    });
            } else {
                snapped[member.index] = Some((chosen, anchor, start));
                kept += 1;
            }
        }
        if kept == 0 {
            continue;
        }

        log::debug!(
            "Window at tick {} (voice {:?}): {} with error {}",
            anchor,
            group,
            chosen.describe(),
            error
        );
        choices.push(WindowChoice {
            voice: group,
            window_start: anchor,
            candidate: chosen,
            error_ticks: error,
        });
    }

    Ok(Selection::Chosen { choices, snapped })
}

/// Durations and tuplet groups for the snapped onsets, one placement per event
fn place(
    events: &[TimedEvent],
    by_voice: &BTreeMap<u32, Vec<usize>>,
    snapped: &[Option<Snapped>],
    params: &QuantizeParams,
) -> Vec<Placement> {
    let detector = TupletDetector::new(params.tuplet_tolerance_ticks);
    let mut placements: Vec<Option<Placement>> = vec![None; events.len()];

    for order in by_voice.values() {
        let grids: Vec<Snapped> = order.iter().filter_map(|&i| snapped[i]).collect();
        if grids.len() != order.len() {
            continue;
        }

        let starts: Vec<i64> = grids.iter().map(|&(_, _, start)| start).collect();
        let next = next_later_starts(&starts);

        for (pos, &i) in order.iter().enumerate() {
            let (grid, anchor, start) = grids[pos];
            let end = events[i].end_ticks();

            let mut ticks = match next[pos] {
                Some(n) if end >= n => n - start,
                _ => (grid.snap(end, anchor) - start).max(grid.step_ticks()),
            };
            if let Some(n) = next[pos] {
                ticks = ticks.min(n - start);
            }

            placements[i] = Some(Placement {
                start,
                ticks,
                tuplet: None,
                absorbed_into: None,
            });
        }

        // Confirm tuplet groups span by span
        let mut spans: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (pos, &(grid, anchor, start)) in grids.iter().enumerate() {
            if grid.tuplet.is_none() {
                continue;
            }
            let span = grid.span_ticks();
            let span_start = anchor + (start - anchor).div_euclid(span) * span;
            spans.entry(span_start).or_default().push(pos);
        }

        for (span_start, positions) in spans {
            let (grid, _, _) = grids[positions[0]];
            let Some((actual, implied)) = grid.tuplet else {
                continue;
            };
            let span_end = span_start + grid.span_ticks();

            let mut onsets: Vec<i64> = positions.iter().map(|&p| starts[p]).collect();
            onsets.dedup();

            let mut run = Vec::with_capacity(onsets.len() + 1);
            if onsets[0] > span_start {
                run.push(onsets[0] - span_start);
            }
            for (k, &onset) in onsets.iter().enumerate() {
                let next_onset = onsets.get(k + 1).copied().unwrap_or(span_end);
                run.push(next_onset - onset);
            }

            match detector.detect_ratio(&run, actual, implied, grid.unit_ticks) {
                Ok(spec) => {
                    for &pos in &positions {
                        if let Some(placement) = placements[order[pos]].as_mut() {
                            placement.ticks = placement.ticks.min(span_end - placement.start);
                            placement.tuplet = Some(TupletPlacement { spec, span_start });
                        }
                    }
                }
                Err(_) => {
                    log::debug!(
                        "Run at tick {} does not fill {}:{}; using straight grouping",
                        span_start,
                        actual,
                        implied
                    );
                }
            }
        }
    }

    placements.into_iter().flatten().collect()
}

/// The selection with every event moved to its placement
fn placed_timeline(events: &[TimedEvent], placements: &[Placement]) -> Vec<TimedEvent> {
    events
        .iter()
        .zip(placements)
        .map(|(event, placement)| TimedEvent {
            start_ticks: placement.start,
            duration_ticks: placement.ticks,
            ..event.clone()
        })
        .collect()
}

/// Quantize for notation by picking, per beat window, the best-scoring grid
///
/// The placements are requantized until they reproduce themselves, so running the
/// heuristic again over its own output changes nothing.
pub(crate) fn quantize_heuristic(
    events: &[TimedEvent],
    params: &QuantizeParams,
    cancel: &CancelFlag,
) -> EngineResult<HeuristicOutcome> {
    let meter = &params.meter;
    let mut state = HeuristicState::Idle;

    if events.is_empty() {
        advance(&mut state, HeuristicState::Applied);
        return Ok(HeuristicOutcome {
            state,
            placements: Vec::new(),
            choices: Vec::new(),
        });
    }

    let candidates = candidate_grids(meter, params.complexity, params.tuplet_level);
    if candidates.is_empty() {
        log::warn!("No candidate grid divides a beat of {} ticks", meter.beat_ticks());
        advance(&mut state, HeuristicState::Rejected);
        return Ok(HeuristicOutcome::rejected(Vec::new()));
    }

    let by_voice = voices(events);

    advance(
        &mut state,
        HeuristicState::Scoring {
            candidates: candidates.len(),
        },
    );

    let selection = select_grids(events, &by_voice, &candidates, params, cancel)?;
    let (mut choices, snapped) = match selection {
        Selection::Chosen { choices, snapped } => (choices, snapped),
        Selection::Rejected(choices) => {
            advance(&mut state, HeuristicState::Rejected);
            return Ok(HeuristicOutcome::rejected(choices));
        }
    };

    advance(&mut state, HeuristicState::BestSelected);

    let mut placements = place(events, &by_voice, &snapped, params);

    for pass in 1..=SETTLE_PASSES {
        let placed = placed_timeline(events, &placements);
        let placed_voices = voices(&placed);
        let Selection::Chosen {
            choices: settled_choices,
            snapped,
        } = select_grids(&placed, &placed_voices, &candidates, params, cancel)?
        else {
            break;
        };

        let settled = place(&placed, &placed_voices, &snapped, params);
        if settled == placements {
            break;
        }
        log::debug!("Settle pass {} moved the placed timeline", pass);
        placements = settled;
        choices = settled_choices;
    }

    advance(&mut state, HeuristicState::Applied);

    Ok(HeuristicOutcome {
        state,
        placements,
        choices,
    })
}
