//! Query deadline and cooperative cancellation.
//!
//! Every query carries a [`QueryDeadline`]; partition tasks and batch
//! producers call [`QueryDeadline::check`] at batch boundaries and unwind
//! with [`QueryError::Timeout`] or [`QueryError::Cancelled`] when it fails.
//! A [`CancelHandle`] lets another thread abort the query between batches.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::QueryError;

/// Deadline controller shared across a query's partition tasks.
#[derive(Clone)]
pub struct QueryDeadline {
    cancelled: Arc<AtomicBool>,
    start_time: Instant,
    timeout: Option<Duration>,
}

impl QueryDeadline {
    pub fn new(timeout: Option<Duration>) -> Self {
        QueryDeadline {
            cancelled: Arc::new(AtomicBool::new(false)),
            start_time: Instant::now(),
            timeout,
        }
    }

    /// A deadline that never fires.
    pub fn unbounded() -> Self {
        QueryDeadline::new(None)
    }

    /// Check deadline and cancellation. Call between batches.
    ///
    /// The clock is consulted before the cancellation flag: an expired
    /// deadline also raises the flag for sibling tasks, and every task must
    /// still report the timeout rather than a generic cancellation.
    pub fn check(&self) -> Result<(), QueryError> {
        if let Some(timeout) = self.timeout {
            let elapsed = self.start_time.elapsed();
            if elapsed > timeout {
                self.cancelled.store(true, Ordering::Relaxed);
                return Err(QueryError::Timeout {
                    timeout_ms: timeout.as_millis() as u64,
                    elapsed_ms: elapsed.as_millis() as u64,
                });
            }
        }
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(QueryError::Cancelled);
        }
        Ok(())
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Handle for cancelling from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// Cancels the associated query from any thread.
#[derive(Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}
