//! Cooperative cancellation (spec §5): a signal observed only at explicit
//! suspension points, never pre-empting a task mid-command.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::RuntimeError;

/// A cancellation flag shared between a frame and everything it spawns.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Convenience for suspension points: `Err(Cancelled)` if the token has
    /// fired, else `Ok(())`.
    pub fn check(&self) -> Result<(), RuntimeError> {
        if self.is_cancelled() {
            Err(RuntimeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleep for `dur`, waking immediately (and reporting cancellation) if
    /// the token fires first. Polls in small slices rather than blocking for
    /// the whole duration, matching a `sleep` that must be interruptible.
    pub fn sleep(&self, dur: Duration) -> Result<(), RuntimeError> {
        let deadline = Instant::now() + dur;
        const SLICE: Duration = Duration::from_millis(5);
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            std::thread::sleep(SLICE.min(deadline - now));
        }
    }
}
