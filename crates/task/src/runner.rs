//! Runner and executor abstractions.
//!
//! Two seams separate the scheduling adapters from whatever actually runs
//! tasks:
//!
//! - [`TaskRunner`]: a single execution context that accepts "run this after
//!   a delay". [`ScheduledExecutor`](crate::ScheduledExecutor) is built on it.
//! - [`TaskExecutor`]: routes a task by [`TaskTraits`] and reports whether a
//!   context can run code inline. [`ChainedTasks`](crate::ChainedTasks) is
//!   built on it.
//!
//! The object-safe traits take an explicit [`Location`]; the `*Ext` traits add
//! generic helpers that capture the caller's location.

use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use tracing::{debug_span, error};

use crate::error::Result;
use crate::location::Location;
use crate::traits::TaskTraits;

/// A unit of work accepted by runners.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task plus the metadata it was posted with.
pub(crate) struct PostedTask {
    pub(crate) task: Task,
    pub(crate) traits: TaskTraits,
    pub(crate) location: Location,
}

impl PostedTask {
    pub(crate) fn new(task: Task, traits: TaskTraits, location: Location) -> Self {
        Self {
            task,
            traits,
            location,
        }
    }

    /// Runs the task inside a span naming its origin.
    ///
    /// A panic is logged and swallowed so the thread driving the runner
    /// survives. Returns `false` if the task panicked.
    pub(crate) fn run(self) -> bool {
        let span = debug_span!("task", traits = %self.traits, posted_from = %self.location);
        let _enter = span.enter();
        let location = self.location;
        match panic::catch_unwind(AssertUnwindSafe(self.task)) {
            Ok(()) => true,
            Err(payload) => {
                error!(
                    posted_from = %location,
                    panic = panic_message(payload.as_ref()),
                    "task panicked"
                );
                false
            }
        }
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// A single execution context that runs tasks now or after a delay.
pub trait TaskRunner: Send + Sync {
    /// The traits every task posted here runs with.
    fn traits(&self) -> TaskTraits;

    /// Posts `task` to run after at least `delay`.
    ///
    /// Fails with [`TaskError::RunnerShutDown`](crate::TaskError::RunnerShutDown)
    /// if the runner no longer accepts work.
    fn post_delayed_task_at(&self, location: Location, task: Task, delay: Duration) -> Result<()>;

    /// Returns `true` if the calling thread is currently running a task of
    /// this runner's context.
    fn belongs_to_current_thread(&self) -> bool;
}

/// Convenience methods for every [`TaskRunner`].
pub trait TaskRunnerExt: TaskRunner {
    #[track_caller]
    fn post_task<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task_at(Location::caller(), Box::new(f), Duration::ZERO)
    }

    #[track_caller]
    fn post_delayed_task<F>(&self, f: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task_at(Location::caller(), Box::new(f), delay)
    }
}

impl<R: TaskRunner + ?Sized> TaskRunnerExt for R {}

/// Routes tasks to an execution context chosen by [`TaskTraits`].
pub trait TaskExecutor: Send + Sync {
    /// Posts `task` to the context named by `traits` after at least `delay`.
    fn post_delayed_task_at(
        &self,
        traits: TaskTraits,
        location: Location,
        task: Task,
        delay: Duration,
    ) -> Result<()>;

    /// Returns `true` if code belonging to `traits` may run inline on the
    /// calling thread.
    fn can_run_task_immediately(&self, traits: TaskTraits) -> bool;

    /// Runs `task` inline if the calling thread already matches `traits`,
    /// otherwise posts it with no delay.
    ///
    /// A panic from an inline run propagates to the caller.
    fn run_or_post_task_at(
        &self,
        traits: TaskTraits,
        location: Location,
        task: Task,
    ) -> Result<()> {
        if self.can_run_task_immediately(traits) {
            let span =
                debug_span!("task", traits = %traits, posted_from = %location, inline = true);
            let _enter = span.enter();
            task();
            Ok(())
        } else {
            self.post_delayed_task_at(traits, location, task, Duration::ZERO)
        }
    }
}

/// Convenience methods for every [`TaskExecutor`].
pub trait TaskExecutorExt: TaskExecutor {
    #[track_caller]
    fn post_task<F>(&self, traits: TaskTraits, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task_at(traits, Location::caller(), Box::new(f), Duration::ZERO)
    }

    #[track_caller]
    fn post_delayed_task<F>(&self, traits: TaskTraits, f: F, delay: Duration) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post_delayed_task_at(traits, Location::caller(), Box::new(f), delay)
    }

    #[track_caller]
    fn run_or_post_task<F>(&self, traits: TaskTraits, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_or_post_task_at(traits, Location::caller(), Box::new(f))
    }
}

impl<E: TaskExecutor + ?Sized> TaskExecutorExt for E {}
