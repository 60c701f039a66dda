// Editor command surface
// String-typed inputs from the host editor, mapped onto the quantize engine
use std::path::PathBuf;

use num_rational::Ratio;
use serde::{Deserialize, Serialize};

use crate::engine::{
    explain, ArticulationSummary, QuantizationPolicy, QuantizeDecision, QuantizeEngine,
};
use crate::events::TimedEvent;
use crate::groove::{ComplexityTier, Meter, QuantizeParams, RestCollapse, TupletLevel, DEFAULT_PPQ};
use crate::notation::{DurationNormalizer, NoteFragment, NoteValue};
use crate::pipeline::TraceWriter;

#[derive(Debug, Serialize)]
pub struct CommandError {
    message: String,
}

impl CommandError {
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl<E: std::fmt::Display> From<E> for CommandError {
    fn from(error: E) -> Self {
        CommandError {
            message: error.to_string(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

fn parse_meter(time_signature: &str, ppq: i64) -> Meter {
    match Meter::from_string(time_signature, ppq) {
        Ok(meter) => meter,
        Err(e) => {
            log::warn!("{}; using 4/4", e);
            Meter {
                ppq,
                ..Meter::default()
            }
        }
    }
}

// ==================== QUANTIZE COMMANDS ====================

#[derive(Debug, Deserialize)]
pub struct QuantizeSelectionInput {
    pub events: Vec<TimedEvent>,

    /// "grid", "legato" or "heuristic"
    pub policy: String,

    #[serde(default)]
    pub ppq: Option<i64>,

    /// e.g. "4/4", "6/8"
    pub time_signature: String,

    /// Grid value name, e.g. "eighth", "16th"
    pub division: String,

    /// Swing as a percentage of the grid unit (0-99)
    #[serde(default)]
    pub swing_percent: i64,

    #[serde(default)]
    pub amount_percent: Option<u32>,

    /// "very_low" through "very_high"
    #[serde(default)]
    pub complexity: String,

    /// "none", "duplet", "triplet" or "any"
    #[serde(default)]
    pub tuplets: String,

    #[serde(default)]
    pub permit_counterpoint: bool,

    #[serde(default)]
    pub quantize_durations: bool,

    #[serde(default)]
    pub notation_only: Option<bool>,

    /// "keep", "into_preceding" or "into_following"
    #[serde(default)]
    pub collapse_rests: String,

    #[serde(default)]
    pub max_dots: Option<u8>,

    #[serde(default)]
    pub tie_at_beats: bool,

    #[serde(default)]
    pub articulate: bool,

    /// JSONL file to append the run's trace to
    #[serde(default)]
    pub trace_path: Option<String>,
}

impl QuantizeSelectionInput {
    /// Map the editor's strings onto engine parameters; unknown values use defaults
    pub fn to_params(&self) -> QuantizeParams {
        let defaults = QuantizeParams::default();
        let meter = parse_meter(&self.time_signature, self.ppq.unwrap_or(DEFAULT_PPQ));

        let division = NoteValue::from_string(&self.division).unwrap_or(NoteValue::Sixteenth);
        let grid_unit_ticks = division
            .ticks(meter.ppq)
            .unwrap_or(defaults.grid_unit_ticks);

        QuantizeParams {
            meter,
            grid_unit_ticks,
            swing: Ratio::new(self.swing_percent, 100),
            iterative_amount_percent: self
                .amount_percent
                .unwrap_or(defaults.iterative_amount_percent),
            complexity: ComplexityTier::from_string(&self.complexity),
            tuplet_level: TupletLevel::from_string(&self.tuplets),
            permit_counterpoint: self.permit_counterpoint,
            quantize_durations: self.quantize_durations,
            notation_only: self.notation_only.unwrap_or(defaults.notation_only),
            collapse_rests: RestCollapse::from_string(&self.collapse_rests),
            max_dots: self.max_dots.unwrap_or(defaults.max_dots),
            tie_at_beats: self.tie_at_beats,
            articulate: self.articulate,
            ..defaults
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuantizeSelectionOutput {
    /// Events with their notation attribute (and, unless notation-only, new timing)
    pub events: Vec<TimedEvent>,
    pub policy_applied: String,
    pub events_moved: usize,
    pub decisions: Vec<QuantizeDecision>,
    pub articulation: ArticulationSummary,
}

/// Quantize a selection of events
pub fn quantize_selection_command(
    input: QuantizeSelectionInput,
) -> CommandResult<QuantizeSelectionOutput> {
    let params = input.to_params();
    let policy = QuantizationPolicy::from_string(&input.policy);
    let meter = params.meter;

    let original = input.events;
    let mut events = original.clone();

    let engine = QuantizeEngine::new(params);
    let report = engine.apply(&mut events, policy)?;

    if let Some(path) = input.trace_path {
        let writer = TraceWriter::new(PathBuf::from(path));
        if let Err(e) = report.persist_trace(&writer) {
            log::warn!("Failed to write trace to {}: {}", writer.path().display(), e);
        }
    }

    let decisions = explain::explain(&original, &report.outcome, &meter);

    Ok(QuantizeSelectionOutput {
        events,
        policy_applied: report.outcome.policy_applied.name().to_string(),
        events_moved: report.events_moved,
        decisions,
        articulation: report.outcome.articulation,
    })
}

/// Remove notation timing from a selection
pub fn unquantize_selection_command(mut events: Vec<TimedEvent>) -> CommandResult<Vec<TimedEvent>> {
    let cleared = crate::engine::unquantize(&mut events);
    log::info!("Unquantized {} of {} events", cleared, events.len());
    Ok(events)
}

#[derive(Debug, Deserialize)]
pub struct SpellDurationInput {
    pub start_ticks: i64,
    pub duration_ticks: i64,
    pub time_signature: String,

    #[serde(default)]
    pub ppq: Option<i64>,

    #[serde(default)]
    pub max_dots: Option<u8>,

    #[serde(default)]
    pub tie_at_beats: bool,
}

/// Spell one duration as tied note values
pub fn spell_duration_command(input: SpellDurationInput) -> CommandResult<Vec<NoteFragment>> {
    let meter = parse_meter(&input.time_signature, input.ppq.unwrap_or(DEFAULT_PPQ));
    meter.validate()?;

    let normalizer = DurationNormalizer::new(
        meter,
        input.max_dots.unwrap_or(QuantizeParams::default().max_dots),
        input.tie_at_beats,
    );
    let chain = normalizer.normalize(input.start_ticks, input.duration_ticks)?;
    Ok(chain.fragments().to_vec())
}
