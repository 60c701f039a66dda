// Cooperative cancellation
// Shared flag polled between per-event (or per-window) iterations

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineResult, QuantizeError};

/// Cloneable handle; all clones observe the same flag
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of every run holding this flag
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// `Cancelled` once cancellation was requested
    pub fn check(&self) -> EngineResult<()> {
        if self.is_cancelled() {
            Err(QuantizeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
