// Event module
// Performance-timed notes and rests carried through quantization

pub mod types;

pub use types::{EventKind, NotationTime, TimedEvent};
