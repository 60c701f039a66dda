// Explainability module
// Per-event account of where quantization moved an event and how it is spelled

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{QuantizeOutcome, QuantizeResult};
use crate::events::{EventKind, TimedEvent};
use crate::groove::grid::Meter;

/// Complete decision information for a single event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizeDecision {
    pub event_id: Uuid,
    pub kind: EventKind,

    // --- Performance ---
    pub performed_start: i64,
    pub performed_ticks: i64,

    // --- Notation ---
    pub notated_start: i64,
    pub notated_ticks: i64,

    /// Notated minus performed start
    pub snap_delta_ticks: i64,

    /// 1-based "bar.beat.tick"
    pub grid_position: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuplet: Option<String>,

    /// e.g. "quarter ~ 16th"
    pub spelling: String,

    // --- Explainability ---
    pub reasoning: String,
}

impl QuantizeDecision {
    pub fn from_result(event: &TimedEvent, result: &QuantizeResult, meter: &Meter) -> Self {
        let mut reason_parts = Vec::new();

        let delta = result.notation_start - event.start_ticks;
        let position = meter.position_of(result.notation_start);
        let grid_position = format!("{}.{}.{}", position.bar + 1, position.beat + 1, position.tick);

        let timing_desc = if delta == 0 {
            "already on the grid".to_string()
        } else if delta < 0 {
            format!("played {} ticks late", -delta)
        } else {
            format!("played {} ticks early", delta)
        };
        reason_parts.push(format!("Placed at {} ({}).", grid_position, timing_desc));

        let tuplet = result.tuplet_context.map(|t| {
            format!("{} over {} ticks", t.spec.ratio_label(), t.spec.base_unit_ticks)
        });
        if let Some(desc) = &tuplet {
            reason_parts.push(format!("Grouped in a {} tuplet.", desc));
        }

        let spelling = result.notation_duration.describe();
        if result.notation_duration.is_tied() {
            reason_parts.push(format!(
                "{} ticks written as tied {}.",
                result.notation_ticks, spelling
            ));
        } else {
            reason_parts.push(format!("{} ticks written as {}.", result.notation_ticks, spelling));
        }

        if let Some(target) = result.absorbed_into {
            reason_parts.push(format!("Short rest merged into note {}.", target));
        }

        QuantizeDecision {
            event_id: event.id,
            kind: event.kind,
            performed_start: event.start_ticks,
            performed_ticks: event.duration_ticks,
            notated_start: result.notation_start,
            notated_ticks: result.notation_ticks,
            snap_delta_ticks: delta,
            grid_position,
            tuplet,
            spelling,
            reasoning: reason_parts.join(" "),
        }
    }
}

/// Decisions for a whole outcome, in input order
pub fn explain(
    events: &[TimedEvent],
    outcome: &QuantizeOutcome,
    meter: &Meter,
) -> Vec<QuantizeDecision> {
    events
        .iter()
        .zip(&outcome.results)
        .map(|(event, result)| QuantizeDecision::from_result(event, result, meter))
        .collect()
}
