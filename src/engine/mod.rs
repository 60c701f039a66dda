// Quantize engine
// Validates a selection, runs one policy, spells durations and writes results back

pub mod articulation;
pub mod cancel;
pub mod explain;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineResult, QuantizeError};
use crate::events::{NotationTime, TimedEvent};
use crate::groove::heuristic::{quantize_heuristic, HeuristicState, WindowChoice};
use crate::groove::quantize::{quantize_grid, quantize_legato, Placement, QuantizeParams};
use crate::groove::tuplet::TupletSpec;
use crate::notation::duration::NotatableDuration;
use crate::notation::normalizer::DurationNormalizer;
use crate::pipeline::trace::{QuantizeStage, TraceBuilder, TraceEntry, TraceError, TraceWriter};

pub use articulation::{
    ArticulationMark, ArticulationSummary, BeamGroup, MarkHint, TieChange, TieChangeKind,
};
pub use cancel::CancelFlag;
pub use explain::QuantizeDecision;

/// Which quantizer to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantizationPolicy {
    /// Snap starts to the grid, spanning durations to the next start
    Grid,

    /// Snap starts and extend every note to meet the next one
    Legato,

    /// Pick the simplest well-fitting grid per beat, tuplets included
    Heuristic,
}

impl Default for QuantizationPolicy {
    fn default() -> Self {
        QuantizationPolicy::Grid
    }
}

impl QuantizationPolicy {
    pub fn from_string(s: &str) -> Self {
        match s {
            "legato" | "Legato" => QuantizationPolicy::Legato,
            "heuristic" | "Heuristic" | "notation" => QuantizationPolicy::Heuristic,
            _ => QuantizationPolicy::Grid,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            QuantizationPolicy::Grid => "grid",
            QuantizationPolicy::Legato => "legato",
            QuantizationPolicy::Heuristic => "heuristic",
        }
    }
}

/// Tuplet an event is notated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupletContext {
    pub spec: TupletSpec,

    /// Tick the tuplet's span starts at
    pub span_start: i64,
}

/// Notated timing computed for one event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeResult {
    pub event_id: Uuid,
    pub notation_start: i64,
    pub notation_ticks: i64,
    pub notation_duration: NotatableDuration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tuplet_context: Option<TupletContext>,

    /// Note that took over this rest's time, when short rests were collapsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absorbed_into: Option<Uuid>,
}

impl QuantizeResult {
    /// The attribute written back onto the event
    pub fn notation_time(&self) -> NotationTime {
        NotationTime {
            start_ticks: self.notation_start,
            duration_ticks: self.notation_ticks,
            duration: self.notation_duration.clone(),
            tuplet: self.tuplet_context.map(|t| t.spec),
        }
    }

    pub fn notation_end(&self) -> i64 {
        self.notation_start + self.notation_ticks
    }
}

/// Everything one quantize pass produced, in input order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuantizeOutcome {
    pub policy_requested: QuantizationPolicy,

    /// Differs from the request when the heuristic was rejected
    pub policy_applied: QuantizationPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub heuristic_state: Option<HeuristicState>,

    /// Grid picked per beat window (heuristic only)
    pub choices: Vec<WindowChoice>,

    pub results: Vec<QuantizeResult>,

    pub articulation: ArticulationSummary,
}

impl QuantizeOutcome {
    pub fn fell_back(&self) -> bool {
        self.policy_applied != self.policy_requested
    }
}

/// Outcome of `QuantizeEngine::apply` plus its stage trace
#[derive(Debug, Clone)]
pub struct QuantizeReport {
    pub outcome: QuantizeOutcome,

    /// Events whose performance timing was rewritten
    pub events_moved: usize,

    /// Stage entries for the caller to persist with a `TraceWriter`
    pub trace: Vec<TraceEntry>,
}

impl QuantizeReport {
    /// Append this run's stage entries to a JSONL trace
    pub fn persist_trace(&self, writer: &TraceWriter) -> Result<(), TraceError> {
        writer.write_batch(&self.trace)
    }
}

/// Quantize a selection without touching it
pub fn quantize(
    events: &[TimedEvent],
    policy: QuantizationPolicy,
    params: &QuantizeParams,
) -> EngineResult<QuantizeOutcome> {
    QuantizeEngine::new(params.clone()).run(events, policy)
}

/// Quantize independent selections on the rayon pool
pub fn quantize_parallel(
    selections: &[Vec<TimedEvent>],
    policy: QuantizationPolicy,
    params: &QuantizeParams,
) -> Vec<EngineResult<QuantizeOutcome>> {
    selections
        .par_iter()
        .map(|events| quantize(events, policy, params))
        .collect()
}

/// Drop the notation attribute from every event; returns how many had one
pub fn unquantize(events: &mut [TimedEvent]) -> usize {
    let mut cleared = 0;
    for event in events.iter_mut() {
        if event.notation.take().is_some() {
            cleared += 1;
        }
    }
    log::debug!("Cleared notation from {} events", cleared);
    cleared
}

fn validate_events(events: &[TimedEvent]) -> EngineResult<()> {
    for (index, event) in events.iter().enumerate() {
        if event.start_ticks < 0 {
            return Err(QuantizeError::InvalidEvent {
                index,
                message: format!("negative start {}", event.start_ticks),
            });
        }
        if event.duration_ticks < 0 {
            return Err(QuantizeError::InvalidEvent {
                index,
                message: format!("negative duration {}", event.duration_ticks),
            });
        }
    }
    Ok(())
}

/// Quantizer bound to one parameter set and cancellation flag
#[derive(Debug, Clone, Default)]
pub struct QuantizeEngine {
    params: QuantizeParams,
    cancel: CancelFlag,
}

impl QuantizeEngine {
    pub fn new(params: QuantizeParams) -> Self {
        QuantizeEngine {
            params,
            cancel: CancelFlag::new(),
        }
    }

    /// Share a flag the caller can trip from another thread
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn params(&self) -> &QuantizeParams {
        &self.params
    }

    /// Compute the quantized notation for `events` without modifying them
    pub fn run(
        &self,
        events: &[TimedEvent],
        policy: QuantizationPolicy,
    ) -> EngineResult<QuantizeOutcome> {
        let mut trace = Vec::new();
        self.run_traced(events, policy, &mut trace)
    }

    /// Quantize `events` in place
    ///
    /// Nothing is written unless the whole selection succeeds. The notation attribute is
    /// always set; performance timing is replaced only when `notation_only` is off, and
    /// never for rests that were collapsed into a note.
    pub fn apply(
        &self,
        events: &mut [TimedEvent],
        policy: QuantizationPolicy,
    ) -> EngineResult<QuantizeReport> {
        let mut trace = Vec::new();
        let outcome = self.run_traced(events, policy, &mut trace)?;

        let mut events_moved = 0;
        for (event, result) in events.iter_mut().zip(&outcome.results) {
            let notation = result.notation_time();
            let rewrite = !self.params.notation_only && result.absorbed_into.is_none();
            if rewrite
                && (event.start_ticks, event.duration_ticks)
                    != (notation.start_ticks, notation.duration_ticks)
            {
                event.start_ticks = notation.start_ticks;
                event.duration_ticks = notation.duration_ticks;
                events_moved += 1;
            }
            event.notation = Some(notation);
        }

        trace.push(TraceBuilder::stage(QuantizeStage::Apply).with_data(
            1.0,
            format!("Wrote notation for {} events", outcome.results.len()),
            serde_json::json!({
                "events": outcome.results.len(),
                "events_moved": events_moved,
                "notation_only": self.params.notation_only,
            }),
        ));

        log::info!(
            "Quantized {} events with {} policy ({} moved)",
            outcome.results.len(),
            outcome.policy_applied.name(),
            events_moved
        );

        Ok(QuantizeReport {
            outcome,
            events_moved,
            trace,
        })
    }

    /// `apply` over independent selections on the rayon pool
    pub fn apply_parallel(
        &self,
        selections: &mut [Vec<TimedEvent>],
        policy: QuantizationPolicy,
    ) -> Vec<EngineResult<QuantizeReport>> {
        selections
            .par_iter_mut()
            .map(|events| self.apply(events, policy))
            .collect()
    }

    fn run_traced(
        &self,
        events: &[TimedEvent],
        policy: QuantizationPolicy,
        trace: &mut Vec<TraceEntry>,
    ) -> EngineResult<QuantizeOutcome> {
        let params = &self.params;

        params.validate()?;
        validate_events(events)?;
        trace.push(
            TraceBuilder::stage(QuantizeStage::Validate)
                .complete(format!("{} events valid", events.len())),
        );

        let mut heuristic_state = None;
        let mut choices = Vec::new();
        let mut policy_applied = policy;

        let placements = match policy {
            QuantizationPolicy::Grid => quantize_grid(events, params, &self.cancel)?,
            QuantizationPolicy::Legato => quantize_legato(events, params, &self.cancel)?,
            QuantizationPolicy::Heuristic => {
                let outcome = quantize_heuristic(events, params, &self.cancel)?;
                heuristic_state = Some(outcome.state);
                choices = outcome.choices;
                if outcome.state == HeuristicState::Rejected {
                    log::warn!("Heuristic quantization rejected; using grid quantization");
                    policy_applied = QuantizationPolicy::Grid;
                    quantize_grid(events, params, &self.cancel)?
                } else {
                    outcome.placements
                }
            }
        };

        trace.push(TraceBuilder::stage(QuantizeStage::Score).with_data(
            1.0,
            format!("Placed {} events", placements.len()),
            serde_json::json!({
                "policy_requested": policy.name(),
                "policy_applied": policy_applied.name(),
                "windows": choices.len(),
            }),
        ));

        let results = self.spell(events, &placements)?;
        let tied = results.iter().filter(|r| r.notation_duration.is_tied()).count();
        let tupled = results.iter().filter(|r| r.tuplet_context.is_some()).count();
        trace.push(TraceBuilder::stage(QuantizeStage::Select).with_data(
            1.0,
            format!("Spelled {} durations", results.len()),
            serde_json::json!({ "tied": tied, "in_tuplets": tupled }),
        ));

        let articulation = articulation::summarize(events, &results, params);

        Ok(QuantizeOutcome {
            policy_requested: policy,
            policy_applied,
            heuristic_state,
            choices,
            results,
            articulation,
        })
    }

    /// Turn placements into note-value chains
    fn spell(
        &self,
        events: &[TimedEvent],
        placements: &[Placement],
    ) -> EngineResult<Vec<QuantizeResult>> {
        let params = &self.params;
        let normalizer =
            DurationNormalizer::new(params.meter, params.max_dots, params.tie_at_beats);

        let mut results = Vec::with_capacity(placements.len());
        for (event, placement) in events.iter().zip(placements) {
            self.cancel.check()?;

            let (duration, tuplet_context) = match placement.tuplet {
                Some(tuplet) => match normalizer.normalize_in_tuplet(
                    placement.start,
                    placement.ticks,
                    &tuplet.spec,
                    tuplet.span_start,
                ) {
                    Ok(duration) => (
                        duration,
                        Some(TupletContext {
                            spec: tuplet.spec,
                            span_start: tuplet.span_start,
                        }),
                    ),
                    Err(e) if e.is_recoverable() => {
                        log::warn!(
                            "Event {} does not fit tuplet {}; notating without it",
                            event.id,
                            tuplet.spec.ratio_label()
                        );
                        (normalizer.normalize(placement.start, placement.ticks)?, None)
                    }
                    Err(e) => return Err(e),
                },
                None => (normalizer.normalize(placement.start, placement.ticks)?, None),
            };

            results.push(QuantizeResult {
                event_id: event.id,
                notation_start: placement.start,
                notation_ticks: duration.total_ticks(),
                notation_duration: duration,
                tuplet_context,
                absorbed_into: placement.absorbed_into.map(|i| events[i].id),
            });
        }

        Ok(results)
    }
}
