// Groove Engine - Grid, Tuplets, and Quantization
// Lattices, tuplet detection and the three quantization policies

pub mod grid;
pub mod heuristic;
pub mod quantize;
pub mod tuplet;

pub use grid::{GridPosition, Meter, TimeGrid, DEFAULT_PPQ};
pub use heuristic::{candidate_grids, ComplexityTier, GridCandidate, HeuristicState, WindowChoice};
pub use quantize::{QuantizeParams, RestCollapse};
pub use tuplet::{tuplet_penalty, TupletDetector, TupletLevel, TupletSpec};
