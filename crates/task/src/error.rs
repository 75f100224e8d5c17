//! Error types for task posting and scheduling.

use thiserror::Error;

/// Result type for task operations.
pub type Result<T> = std::result::Result<T, TaskError>;

/// Errors produced by runners, chains and the scheduled executor.
///
/// Misuse errors ([`ChainFinalized`](Self::ChainFinalized),
/// [`ChainAlreadyStarted`](Self::ChainAlreadyStarted),
/// [`Unsupported`](Self::Unsupported)) indicate a contract violation by the
/// caller rather than a runtime condition.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The runner no longer accepts tasks.
    #[error("task runner is shut down")]
    RunnerShutDown,

    /// A step was added to a chain after `start()` or `cancel()`.
    #[error("cannot add tasks to a chain after start() or cancel()")]
    ChainFinalized,

    /// `start()` was called more than once on the same chain.
    #[error("chain has already been started")]
    ChainAlreadyStarted,

    /// The thread pool has already been started.
    #[error("thread pool has already been started")]
    AlreadyStarted,

    /// The executor does not implement this operation.
    #[error("operation not supported by scheduled executor: {0}")]
    Unsupported(&'static str),

    /// A task was dropped before producing its result, either because it
    /// panicked or because its runner shut down with the task still queued.
    #[error("task was dropped before completing")]
    TaskDropped,

    /// Error propagated from shared infrastructure.
    #[error(transparent)]
    Common(#[from] baton_common::Error),
}
