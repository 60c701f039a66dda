// Pipeline monitoring module
// Stage-by-stage trace of quantize runs

pub mod trace;

pub use trace::{TraceBuilder, TraceEntry, TraceError, TraceWriter, read_trace_file};
