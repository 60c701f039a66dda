// Notation module
// Note values and the normalizer that spells tick durations with them

pub mod duration;
pub mod normalizer;

pub use duration::{NotatableDuration, NoteFragment, NoteValue, MAX_DOTS};
pub use normalizer::{DurationNormalizer, Fragments};
