//! Cooperative cancellation for long-running diffs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::errors::DiffError;

/// Shared cancellation flag with an optional deadline.
///
/// Clones share the flag, so a caller can keep one handle and cancel a diff
/// running on another thread. The Myers loop polls [`check`](Self::check)
/// once per edit distance.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    started: Instant,
    deadline: Option<Instant>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    /// A token that only fires on explicit [`cancel`](Self::cancel).
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
            deadline: None,
        }
    }

    /// A token that also fires once `timeout` has elapsed.
    pub fn with_timeout(timeout: Duration) -> Self {
        let started = Instant::now();
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            started,
            deadline: started.checked_add(timeout),
        }
    }

    /// [`with_timeout`](Self::with_timeout) when a timeout is configured.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        timeout.map_or_else(Self::new, Self::with_timeout)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Fail if the token was cancelled or its deadline has passed.
    /// `distance` is reported in the error for diagnostics.
    pub fn check(&self, distance: usize) -> Result<(), DiffError> {
        if self.is_cancelled() {
            return Err(DiffError::Cancelled { distance });
        }
        if let Some(deadline) = self.deadline {
            let now = Instant::now();
            if now >= deadline {
                let elapsed = now.duration_since(self.started).as_millis();
                return Err(DiffError::Timeout {
                    elapsed_ms: u64::try_from(elapsed).unwrap_or(u64::MAX),
                    distance,
                });
            }
        }
        Ok(())
    }
}
