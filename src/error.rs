// Quantization errors
// Malformed input is surfaced; recoverable conditions carry a documented fallback

use thiserror::Error;

/// Errors produced by the quantization engine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantizeError {
    /// Grid unit must be a positive tick count
    #[error("Invalid grid: unit must be positive (got {unit_ticks} ticks)")]
    InvalidGrid { unit_ticks: i64 },

    /// Swing ratio must lie in [0, 1)
    #[error("Invalid swing ratio {numer}/{denom}: must be in [0, 1)")]
    InvalidSwing { numer: i64, denom: i64 },

    #[error("Invalid meter: {0}")]
    InvalidMeter(String),

    /// Tuplet counts must be >= 2 and differ from each other
    #[error("Invalid tuplet {actual}:{implied} over {base_unit_ticks} ticks")]
    InvalidTuplet {
        actual: u32,
        implied: u32,
        base_unit_ticks: i64,
    },

    #[error("Invalid event at index {index}: {message}")]
    InvalidEvent { index: usize, message: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Recoverable: callers fall back to non-tuplet grouping
    #[error("No tuplet fits the run")]
    NoTupletFit,

    /// Caller error: only positive durations can be notated
    #[error("Cannot notate a duration of {0} ticks")]
    UnsplittableDuration(i64),

    #[error("Quantization cancelled")]
    Cancelled,
}

impl QuantizeError {
    /// Whether the engine handles this condition internally
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QuantizeError::NoTupletFit)
    }
}

pub type EngineResult<T> = Result<T, QuantizeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = QuantizeError::InvalidGrid { unit_ticks: 0 };
        assert_eq!(
            err.to_string(),
            "Invalid grid: unit must be positive (got 0 ticks)"
        );

        let err = QuantizeError::UnsplittableDuration(-5);
        assert!(err.to_string().contains("-5"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(QuantizeError::NoTupletFit.is_recoverable());
        assert!(!QuantizeError::Cancelled.is_recoverable());
        assert!(!QuantizeError::UnsplittableDuration(0).is_recoverable());
    }
}
