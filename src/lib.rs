// Rhythmic - Duration Quantization and Tuplet Grouping
// Module declarations

pub mod commands;
pub mod engine;
pub mod error;
pub mod events;
pub mod groove;
pub mod notation;
pub mod pipeline;

pub use engine::{
    quantize, quantize_parallel, unquantize, CancelFlag, QuantizationPolicy, QuantizeEngine,
    QuantizeOutcome, QuantizeReport, QuantizeResult,
};
pub use error::{EngineResult, QuantizeError};
pub use events::{EventKind, NotationTime, TimedEvent};
pub use groove::{ComplexityTier, Meter, QuantizeParams, TimeGrid, TupletLevel, TupletSpec};
pub use notation::{DurationNormalizer, NotatableDuration, NoteValue};
