// Articulation summary
// Beam groups, tie changes and length marks derived from a quantize pass

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::QuantizeResult;
use crate::events::TimedEvent;
use crate::groove::quantize::{voices, QuantizeParams};
use crate::notation::duration::NoteValue;

/// Consecutive short notes sharing one beam
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BeamGroup {
    pub voice: u32,
    pub event_ids: Vec<Uuid>,
    pub start_ticks: i64,
    pub end_ticks: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieChangeKind {
    Added,
    Removed,
}

/// A note whose tied-ness differs from its previous notation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TieChange {
    pub event_id: Uuid,
    pub change: TieChangeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticulationMark {
    /// Played at most half its notated length
    Staccato,

    /// Held a quarter or more past its notated length
    Tenuto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkHint {
    pub event_id: Uuid,
    pub mark: ArticulationMark,
}

/// Notational side effects of a quantize pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticulationSummary {
    pub beam_groups: Vec<BeamGroup>,
    pub tie_changes: Vec<TieChange>,
    pub marks: Vec<MarkHint>,
}

/// Shorter than a quarter, and not swallowed by a neighbour
fn is_beamable(event: &TimedEvent, result: &QuantizeResult) -> bool {
    !event.is_rest()
        && result.absorbed_into.is_none()
        && result.notation_duration.head().value > NoteValue::Quarter
}

/// `results` must be in the same order as `events`
pub(crate) fn summarize(
    events: &[TimedEvent],
    results: &[QuantizeResult],
    params: &QuantizeParams,
) -> ArticulationSummary {
    let mut summary = ArticulationSummary::default();

    if params.rebeam {
        summary.beam_groups = beam_groups(events, results, params);
    }

    for (event, result) in events.iter().zip(results) {
        if event.is_rest() {
            continue;
        }

        let was_tied = event.notation.as_ref().map(|n| n.is_tied());
        let now_tied = result.notation_duration.is_tied();
        let change = match (was_tied, now_tied) {
            (Some(true), false) => Some(TieChangeKind::Removed),
            (Some(false) | None, true) => Some(TieChangeKind::Added),
            _ => None,
        };
        if let Some(change) = change {
            summary.tie_changes.push(TieChange {
                event_id: event.id,
                change,
            });
        }

        if params.articulate && result.absorbed_into.is_none() {
            let performed = event.duration_ticks;
            let notated = result.notation_ticks;
            let mark = if performed * 2 <= notated {
                Some(ArticulationMark::Staccato)
            } else if performed >= notated + notated / 4 {
                Some(ArticulationMark::Tenuto)
            } else {
                None
            };
            if let Some(mark) = mark {
                summary.marks.push(MarkHint {
                    event_id: event.id,
                    mark,
                });
            }
        }
    }

    log::debug!(
        "Articulation: {} beam groups, {} tie changes, {} marks",
        summary.beam_groups.len(),
        summary.tie_changes.len(),
        summary.marks.len()
    );

    summary
}

/// Groups never cross a beat line or a tuplet span
fn beam_groups(
    events: &[TimedEvent],
    results: &[QuantizeResult],
    params: &QuantizeParams,
) -> Vec<BeamGroup> {
    let meter = &params.meter;
    let mut groups = Vec::new();

    for (voice, mut order) in voices(events) {
        order.sort_by_key(|&i| (results[i].notation_start, i));

        let mut current: Vec<usize> = Vec::new();
        let mut key: Option<(i64, Option<i64>)> = None;

        let mut flush = |current: &mut Vec<usize>| {
            if current.len() >= 2 {
                let first = &results[current[0]];
                let last = &results[current[current.len() - 1]];
                groups.push(BeamGroup {
                    voice,
                    event_ids: current.iter().map(|&i| events[i].id).collect(),
                    start_ticks: first.notation_start,
                    end_ticks: last.notation_end(),
                });
            }
            current.clear();
        };

        for i in order {
            let result = &results[i];
            if !is_beamable(&events[i], result) {
                // Chord tones and swallowed rests leave the group open
                if result.absorbed_into.is_none() {
                    flush(&mut current);
                    key = None;
                }
                continue;
            }

            let this_key = (
                meter.beat_start(result.notation_start),
                result.tuplet_context.map(|t| t.span_start),
            );
            if let Some(&last) = current.last() {
                if results[last].notation_start == result.notation_start {
                    continue;
                }
            }
            if key != Some(this_key) {
                flush(&mut current);
                key = Some(this_key);
            }
            current.push(i);
        }
        flush(&mut current);
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::super::{quantize, QuantizationPolicy};
    use super::*;
    use crate::groove::grid::Meter;

    fn params(unit: i64) -> QuantizeParams {
        QuantizeParams {
            grid_unit_ticks: unit,
            ..QuantizeParams::default()
        }
    }

    #[test]
    fn test_eighths_beam_per_beat() {
        let events: Vec<TimedEvent> = (0..4).map(|i| TimedEvent::note(i * 480, 400, 60)).collect();
        let outcome = quantize(&events, QuantizationPolicy::Grid, &params(480)).unwrap();
        let groups = &outcome.articulation.beam_groups;

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].event_ids, vec![events[0].id, events[1].id]);
        assert_eq!((groups[0].start_ticks, groups[0].end_ticks), (0, 960));
        assert_eq!(groups[1].event_ids, vec![events[2].id, events[3].id]);
    }

    #[test]
    fn test_quarters_are_not_beamed() {
        let events: Vec<TimedEvent> = (0..4).map(|i| TimedEvent::note(i * 960, 900, 60)).collect();
        let outcome = quantize(&events, QuantizationPolicy::Grid, &params(960)).unwrap();
        assert!(outcome.articulation.beam_groups.is_empty());
    }

    #[test]
    fn test_compound_meter_beams_dotted_quarter_beat() {
        let events: Vec<TimedEvent> = (0..6).map(|i| TimedEvent::note(i * 480, 400, 60)).collect();
        let p = QuantizeParams {
            meter: Meter::from_string("6/8", 960).unwrap(),
            ..params(480)
        };
        let outcome = quantize(&events, QuantizationPolicy::Grid, &p).unwrap();
        let sizes: Vec<usize> = outcome
            .articulation
            .beam_groups
            .iter()
            .map(|g| g.event_ids.len())
            .collect();
        assert_eq!(sizes, vec![3, 3]);
    }

    #[test]
    fn test_rebeam_disabled() {
        let events: Vec<TimedEvent> = (0..4).map(|i| TimedEvent::note(i * 480, 400, 60)).collect();
        let p = QuantizeParams {
            rebeam: false,
            ..params(480)
        };
        let outcome = quantize(&events, QuantizationPolicy::Grid, &p).unwrap();
        assert!(outcome.articulation.beam_groups.is_empty());
    }

    #[test]
    fn test_tie_added_then_removed() {
        let mut events = vec![TimedEvent::note(0, 1200, 60)];
        let outcome = quantize(&events, QuantizationPolicy::Grid, &params(240)).unwrap();
        assert_eq!(
            outcome.articulation.tie_changes,
            vec![TieChange {
                event_id: events[0].id,
                change: TieChangeKind::Added
            }]
        );

        events[0].notation = Some(outcome.results[0].notation_time());
        events[0].duration_ticks = 960;
        let outcome = quantize(&events, QuantizationPolicy::Grid, &params(240)).unwrap();
        assert_eq!(outcome.articulation.tie_changes[0].change, TieChangeKind::Removed);
    }

    #[test]
    fn test_length_marks() {
        let events = vec![TimedEvent::note(0, 100, 60), TimedEvent::note(480, 700, 62)];
        let p = QuantizeParams {
            articulate: true,
            ..params(480)
        };
        let outcome = quantize(&events, QuantizationPolicy::Grid, &p).unwrap();

        assert_eq!(
            outcome.articulation.marks,
            vec![
                MarkHint {
                    event_id: events[0].id,
                    mark: ArticulationMark::Staccato
                },
                MarkHint {
                    event_id: events[1].id,
                    mark: ArticulationMark::Tenuto
                },
            ]
        );

        let quiet = quantize(&events, QuantizationPolicy::Grid, &params(480)).unwrap();
        assert!(quiet.articulation.marks.is_empty());
    }
}
