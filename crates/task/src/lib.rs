//! Task runners, chained tasks and a scheduled executor for baton.
//!
//! This crate routes closures to execution contexts named by [`TaskTraits`]
//! and layers two coordination primitives on top:
//!
//! - [`ChainedTasks`]: an ordered pipeline whose steps may hop between
//!   contexts, either yielding between steps or coalesced into one turn.
//! - [`ScheduledExecutor`]: one-shot, fixed-rate and fixed-delay execution on
//!   any [`TaskRunner`], implemented by self-rescheduling one-shot posts.
//!
//! # Execution contexts
//!
//! | Traits | Context |
//! |--------|---------|
//! | `UI_*` | the single UI thread, highest priority first |
//! | everything else | the worker pool, queued until it starts |
//!
//! [`TaskScheduler`] owns both contexts. It starts in a pre-native phase in
//! which only the UI thread runs; pool tasks posted then are kept in order
//! and flushed when [`TaskScheduler::start_thread_pool`] is called.
//!
//! # Key Components
//!
//! - [`TaskRunner`] / [`TaskExecutor`]: the two seams everything is built on.
//! - [`UiThreadTaskRunner`], [`ThreadPoolTaskRunner`],
//!   [`SequencedTaskRunner`]: the concrete runners handed out by the
//!   scheduler.
//! - [`ScheduledFuture`]: handle for cancellation and delay queries.
//! - `testing` (feature `test-utils`): manual-clock runners for
//!   deterministic tests.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use baton_task::{ChainedTasks, TaskScheduler, TaskSchedulerConfig, TaskTraits};
//!
//! let scheduler = TaskScheduler::new(TaskSchedulerConfig::default())?;
//! scheduler.start_thread_pool()?;
//!
//! let ticks = scheduler
//!     .executor(TaskTraits::BEST_EFFORT)
//!     .schedule_at_fixed_rate(|| println!("tick"), Duration::ZERO, Duration::from_secs(1))?;
//!
//! let chain = ChainedTasks::new(scheduler.clone());
//! chain.add(TaskTraits::USER_VISIBLE, || println!("read prefs"))?;
//! chain.add(TaskTraits::UI_DEFAULT, move || { ticks.cancel(); })?;
//! chain.start(false)?;
//! # Ok::<(), baton_task::TaskError>(())
//! ```

mod chained;
mod config;
mod error;
mod location;
mod runner;
mod scheduled;
mod scheduler;
mod sequenced;
mod thread_pool;
mod traits;
mod ui_thread;

#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use chained::ChainedTasks;
pub use config::TaskSchedulerConfig;
pub use error::{Result, TaskError};
pub use location::Location;
pub use runner::{Task, TaskExecutor, TaskExecutorExt, TaskRunner, TaskRunnerExt};
pub use scheduled::{FutureState, Schedule, ScheduledExecutor, ScheduledFuture};
pub use scheduler::TaskScheduler;
pub use sequenced::SequencedTaskRunner;
pub use thread_pool::ThreadPoolTaskRunner;
pub use traits::{Destination, TaskPriority, TaskTraits};
pub use ui_thread::{UiThread, UiThreadTaskRunner};
