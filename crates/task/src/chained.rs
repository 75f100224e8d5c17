//! Sequential pipelines of tasks that may hop between execution contexts.
//!
//! A [`ChainedTasks`] collects steps, each tagged with the [`TaskTraits`] it
//! must run under, and executes them strictly in order once started:
//!
//! - `start(false)` runs the first step on the calling thread, then posts
//!   each following step with its own traits only after the previous one
//!   returned. Other work on the same context can run between steps.
//! - `start(true)` coalesces: one task, posted with the first step's traits,
//!   runs every step back to back. When the caller already runs on that
//!   context the whole chain runs inline inside `start`.
//!
//! Cancellation is cooperative. It is checked before each step; a step that
//! is already running is never interrupted, and continuations already posted
//! become no-ops.
//!
//! # Example
//!
//! ```no_run
//! use baton_task::{ChainedTasks, TaskScheduler, TaskSchedulerConfig, TaskTraits};
//!
//! let scheduler = TaskScheduler::new(TaskSchedulerConfig::default())?;
//! let chain = ChainedTasks::new(scheduler.clone());
//! chain.add(TaskTraits::BEST_EFFORT, || println!("load profile"))?;
//! chain.add(TaskTraits::UI_DEFAULT, || println!("show profile"))?;
//! chain.start(false)?;
//! # Ok::<(), baton_task::TaskError>(())
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{Task, TaskExecutor};
use crate::traits::TaskTraits;

struct ChainedTask {
    traits: TaskTraits,
    location: Location,
    task: Task,
}

#[derive(Default)]
struct ChainState {
    tasks: VecDeque<ChainedTask>,
    finalized: bool,
    started: bool,
}

struct Chain {
    executor: Arc<dyn TaskExecutor>,
    /// Never held while a step runs.
    state: Mutex<ChainState>,
    cancel_token: CancellationToken,
}

impl Chain {
    fn pop(&self) -> Option<ChainedTask> {
        self.state.lock().tasks.pop_front()
    }

    fn next_traits(&self) -> Option<(TaskTraits, Location)> {
        self.state
            .lock()
            .tasks
            .front()
            .map(|next| (next.traits, next.location))
    }

    /// Runs one step, then posts the next with that step's own traits.
    fn run_and_post(self: Arc<Self>) {
        if self.cancel_token.is_cancelled() {
            return;
        }
        let next = self.pop();
        let Some(step) = next else {
            return;
        };
        trace!(posted_from = %step.location, traits = %step.traits, "running chained step");
        (step.task)();

        if self.cancel_token.is_cancelled() {
            return;
        }
        let Some((traits, location)) = self.next_traits() else {
            debug!("chain finished");
            return;
        };
        let this = Arc::clone(&self);
        if let Err(err) = self.executor.post_delayed_task_at(
            traits,
            location,
            Box::new(move || this.run_and_post()),
            Duration::ZERO,
        ) {
            warn!(posted_from = %location, error = %err, "chain stopped: could not post next step");
        }
    }

    /// Runs every remaining step back to back.
    fn run_coalesced(self: Arc<Self>, traits: TaskTraits) {
        loop {
            if self.cancel_token.is_cancelled() {
                return;
            }
            let next = self.pop();
            let Some(step) = next else {
                debug!("coalesced chain finished");
                return;
            };
            debug_assert_eq!(
                step.traits, traits,
                "coalesced chains must use one set of traits ({})",
                step.location
            );
            (step.task)();
        }
    }
}

/// An ordered list of steps executed one after another.
///
/// Steps are added with [`add`](Self::add) while the chain is being built.
/// [`start`](Self::start) or [`cancel`](Self::cancel) finalizes the chain,
/// after which `add` fails with [`TaskError::ChainFinalized`].
///
/// A panic in a step is not caught by the chain. When the step runs inline it
/// unwinds into the caller; when posted, the runner contains it and the rest
/// of the chain does not run.
#[derive(Clone)]
pub struct ChainedTasks {
    inner: Arc<Chain>,
}

impl ChainedTasks {
    pub fn new(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            inner: Arc::new(Chain {
                executor,
                state: Mutex::new(ChainState::default()),
                cancel_token: CancellationToken::new(),
            }),
        }
    }

    /// Appends a step that must run with `traits`.
    #[track_caller]
    pub fn add<F>(&self, traits: TaskTraits, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_at(traits, Location::caller(), Box::new(f))
    }

    /// Appends a step with an explicit source location.
    pub fn add_at(&self, traits: TaskTraits, location: Location, task: Task) -> Result<()> {
        let mut state = self.inner.state.lock();
        if state.finalized {
            return Err(TaskError::ChainFinalized);
        }
        state.tasks.push_back(ChainedTask {
            traits,
            location,
            task,
        });
        Ok(())
    }

    /// Finalizes the chain and stops any step that has not started yet.
    ///
    /// Idempotent. Queued steps are dropped.
    pub fn cancel(&self) {
        let dropped = {
            let mut state = self.inner.state.lock();
            state.finalized = true;
            std::mem::take(&mut state.tasks)
        };
        self.inner.cancel_token.cancel();
        if !dropped.is_empty() {
            debug!(dropped = dropped.len(), "chain cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_token.is_cancelled()
    }

    /// Returns `true` once `start` or `cancel` has been called.
    pub fn is_finalized(&self) -> bool {
        self.inner.state.lock().finalized
    }

    /// Steps that have not run yet.
    pub fn pending_steps(&self) -> usize {
        self.inner.state.lock().tasks.len()
    }

    /// A token cancelled together with the chain.
    ///
    /// Long-running steps can poll it to stop early.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel_token.clone()
    }

    /// Finalizes the chain and begins executing it.
    ///
    /// Does nothing for an empty or cancelled chain. Fails with
    /// [`TaskError::ChainAlreadyStarted`] if called twice.
    ///
    /// With `coalesce`, every step must share the first step's traits.
    pub fn start(&self, coalesce: bool) -> Result<()> {
        let first = {
            let mut state = self.inner.state.lock();
            if state.started {
                return Err(TaskError::ChainAlreadyStarted);
            }
            if self.inner.cancel_token.is_cancelled() {
                return Ok(());
            }
            state.started = true;
            state.finalized = true;
            state.tasks.front().map(|first| (first.traits, first.location))
        };
        let Some((traits, location)) = first else {
            return Ok(());
        };
        debug!(coalesce, steps = self.pending_steps(), "starting chain");

        let chain = Arc::clone(&self.inner);
        if coalesce {
            self.inner.executor.run_or_post_task_at(
                traits,
                location,
                Box::new(move || chain.run_coalesced(traits)),
            )
        } else {
            chain.run_and_post();
            Ok(())
        }
    }
}

impl std::fmt::Debug for ChainedTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("ChainedTasks")
            .field("pending", &state.tasks.len())
            .field("finalized", &state.finalized)
            .field("started", &state.started)
            .field("cancelled", &self.inner.cancel_token.is_cancelled())
            .finish()
    }
}
