//! The task scheduler: routes tasks by [`TaskTraits`] and owns the threads.
//!
//! A [`TaskScheduler`] is an explicit value passed to whoever needs to post
//! work. It has two phases:
//!
//! 1. **Pre-native.** Only the UI thread exists. UI tasks run normally; pool
//!    tasks queue up (see [`thread_pool`](crate::thread_pool)).
//! 2. **Native.** [`start_thread_pool`](TaskScheduler::start_thread_pool)
//!    builds the worker runtime and flushes the queued pool tasks.
//!
//! # Example
//!
//! ```no_run
//! use baton_task::{TaskExecutorExt, TaskScheduler, TaskSchedulerConfig, TaskTraits};
//!
//! let scheduler = TaskScheduler::new(TaskSchedulerConfig::default())?;
//!
//! // Queued until the pool starts.
//! scheduler.post_task(TaskTraits::BEST_EFFORT, || println!("warm caches"))?;
//! scheduler.post_task(TaskTraits::UI_DEFAULT, || println!("draw first frame"))?;
//!
//! scheduler.start_thread_pool()?;
//! let answer = scheduler.run_synchronously(TaskTraits::USER_VISIBLE, || 6 * 7)?;
//! assert_eq!(answer, 42);
//! # Ok::<(), baton_task::TaskError>(())
//! ```

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Handle, Runtime};
use tracing::{debug, info};

use crate::config::TaskSchedulerConfig;
use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{PostedTask, Task, TaskExecutor, TaskRunner};
use crate::scheduled::ScheduledExecutor;
use crate::sequenced::SequencedTaskRunner;
use crate::thread_pool::{ThreadPoolBackend, ThreadPoolTaskRunner};
use crate::traits::TaskTraits;
use crate::ui_thread::{UiThread, UiThreadTaskRunner};

/// Owner of the UI thread and the worker pool.
pub struct TaskScheduler {
    config: TaskSchedulerConfig,
    ui: Arc<UiThread>,
    pool: Arc<ThreadPoolBackend>,
    runtime: Mutex<Option<Runtime>>,
}

impl TaskScheduler {
    /// Creates a scheduler in the pre-native phase and starts the UI thread.
    pub fn new(config: TaskSchedulerConfig) -> Result<Arc<Self>> {
        config.validate()?;
        let ui = UiThread::spawn(&config.ui_thread_name)?;
        Ok(Arc::new(Self {
            config,
            ui,
            pool: Arc::new(ThreadPoolBackend::new()),
            runtime: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &TaskSchedulerConfig {
        &self.config
    }

    /// Returns a runner for `traits`: the UI thread for UI traits, the pool
    /// otherwise.
    pub fn task_runner(&self, traits: TaskTraits) -> Arc<dyn TaskRunner> {
        if traits.is_ui() {
            Arc::new(UiThreadTaskRunner::new(Arc::clone(&self.ui), traits))
        } else {
            Arc::new(ThreadPoolTaskRunner::new(Arc::clone(&self.pool), traits))
        }
    }

    /// Returns a runner for the UI thread with default UI traits.
    pub fn ui_task_runner(&self) -> UiThreadTaskRunner {
        UiThreadTaskRunner::new(Arc::clone(&self.ui), TaskTraits::UI_DEFAULT)
    }

    /// Creates a runner whose tasks never overlap and run in posting order.
    ///
    /// The UI thread is already sequenced, so UI traits get a UI runner.
    pub fn create_sequenced_task_runner(&self, traits: TaskTraits) -> Arc<dyn TaskRunner> {
        if traits.is_ui() {
            Arc::new(UiThreadTaskRunner::new(Arc::clone(&self.ui), traits))
        } else {
            Arc::new(SequencedTaskRunner::new(Arc::clone(&self.pool), traits))
        }
    }

    /// Returns a scheduled executor posting with `traits`.
    pub fn executor(&self, traits: TaskTraits) -> ScheduledExecutor {
        ScheduledExecutor::with_monotonic_clock(self.task_runner(traits))
    }

    /// Returns `true` if called on the UI thread.
    pub fn is_on_ui_thread(&self) -> bool {
        self.ui.is_current()
    }

    /// Builds the worker runtime from config and flushes pre-native tasks.
    pub fn start_thread_pool(&self) -> Result<()> {
        let mut runtime = self.runtime.lock();
        if runtime.is_some() || self.pool.is_started() {
            return Err(TaskError::AlreadyStarted);
        }

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.config.pool_threads)
            .max_blocking_threads(self.config.max_blocking_threads)
            .thread_name(self.config.pool_thread_name.clone())
            .enable_all()
            .build()
            .map_err(baton_common::Error::from)?;

        match self.pool.start(rt.handle().clone()) {
            Ok(_) => {
                info!(threads = self.config.pool_threads, "worker pool running");
                *runtime = Some(rt);
                Ok(())
            }
            Err(err) => {
                rt.shutdown_background();
                Err(err)
            }
        }
    }

    /// Runs pool tasks on an existing runtime instead of building one.
    ///
    /// The runtime must have its time driver enabled.
    pub fn attach_thread_pool(&self, handle: Handle) -> Result<()> {
        self.pool.start(handle).map(|flushed| {
            debug!(flushed, "attached worker pool to external runtime");
        })
    }

    pub fn is_thread_pool_started(&self) -> bool {
        self.pool.is_started()
    }

    /// Pool tasks still waiting for the pool to start.
    pub fn pending_pre_native_tasks(&self) -> usize {
        self.pool.pending_pre_native()
    }

    /// Runs `f` with `traits` and waits for its result.
    ///
    /// Runs inline when the caller already matches `traits`. Otherwise the
    /// calling thread blocks until `f` has run, so this must not be called
    /// from the thread `f` is routed to. Fails with
    /// [`TaskError::TaskDropped`] if `f` panics, inline or posted, or is
    /// discarded unrun.
    #[track_caller]
    pub fn run_synchronously<T, F>(&self, traits: TaskTraits, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.can_run_task_immediately(traits) {
            return panic::catch_unwind(AssertUnwindSafe(f)).map_err(|_| TaskError::TaskDropped);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.post_delayed_task_at(
            traits,
            Location::caller(),
            Box::new(move || {
                let _ = tx.send(f());
            }),
            Duration::ZERO,
        )?;
        rx.recv().map_err(|_| TaskError::TaskDropped)
    }

    /// Stops the UI thread and the worker pool. Queued tasks are dropped.
    pub fn shutdown(&self) {
        self.ui.shutdown();
        self.pool.shutdown();
        if let Some(rt) = self.runtime.lock().take() {
            rt.shutdown_background();
        }
        debug!("task scheduler shut down");
    }
}

impl TaskExecutor for TaskScheduler {
    fn post_delayed_task_at(
        &self,
        traits: TaskTraits,
        location: Location,
        task: Task,
        delay: Duration,
    ) -> Result<()> {
        let task = PostedTask::new(task, traits, location);
        if traits.is_ui() {
            self.ui.post(task, delay)
        } else {
            self.pool.post(task, delay)
        }
    }

    fn can_run_task_immediately(&self, traits: TaskTraits) -> bool {
        traits.is_ui() && self.ui.is_current()
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
