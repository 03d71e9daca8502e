//! Cooperative cancellation
//!
//! One token per build attempt. Every pipeline stage receives it and checks it
//! at well-defined points; an observed cancellation unwinds as
//! [`BuildError::Cancelled`] through ordinary return values.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{BuildError, BuildResult};

/// Token that signals cancellation to cooperative build stages.
///
/// Cloning a token creates another handle to the same flag.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new, not cancelled token
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Signals cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns whether cancellation has been signalled
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// Returns `Err(BuildError::Cancelled)` once cancellation has been signalled
    pub fn check(&self) -> BuildResult<()> {
        if self.is_cancelled() {
            Err(BuildError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
