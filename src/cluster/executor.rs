//! Asynchronous execution of rebalance decision passes.

use std::fmt;
use tokio::runtime::Handle;

/// A zero-argument job dispatched by the policy.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes jobs off the caller thread.
///
/// The policy requires at-least-once execution of submitted jobs and
/// tolerates duplicates: a redundant rebalance pass finds the pending
/// hash already set and exits.
pub trait JobExecutor: Send + Sync + fmt::Debug {
    /// Queue a job for execution.
    fn submit(&self, job: Job);
}

/// Dispatches jobs onto the tokio blocking pool.
///
/// A rebalance pass ends with a potentially blocking broadcast into the
/// cluster topology manager, so the blocking pool is the right home for
/// it.
#[derive(Debug, Clone)]
pub struct TokioJobExecutor {
    handle: Handle,
}

impl TokioJobExecutor {
    /// Create an executor bound to the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn new() -> Self {
        Self::with_handle(Handle::current())
    }

    /// Create an executor bound to an explicit runtime handle.
    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl Default for TokioJobExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl JobExecutor for TokioJobExecutor {
    fn submit(&self, job: Job) {
        self.handle.spawn_blocking(job);
    }
}
