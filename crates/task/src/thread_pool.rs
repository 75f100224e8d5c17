//! Thread-pool task runners and the pre-native task queue.
//!
//! The worker pool does not exist when the process starts. Until
//! [`TaskScheduler::start_thread_pool`](crate::TaskScheduler::start_thread_pool)
//! (or `attach_thread_pool`) runs, pool tasks are held in a pre-native queue:
//!
//! - immediate tasks in posting order;
//! - delayed tasks with their absolute deadline.
//!
//! When the pool starts, immediate tasks are dispatched first, in the order
//! they were posted, then delayed tasks with whatever part of their delay is
//! left. Time spent waiting for the pool counts against a task's delay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, trace};

use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{PostedTask, Task, TaskRunner};
use crate::traits::TaskTraits;

enum BackendState {
    PreNative {
        immediate: Vec<PostedTask>,
        delayed: Vec<(Instant, PostedTask)>,
    },
    Running(Handle),
    ShutDown,
}

/// Shared dispatch point for every pool runner.
pub(crate) struct ThreadPoolBackend {
    state: Mutex<BackendState>,
}

impl ThreadPoolBackend {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::PreNative {
                immediate: Vec::new(),
                delayed: Vec::new(),
            }),
        }
    }

    pub(crate) fn post(&self, task: PostedTask, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        match &mut *state {
            BackendState::PreNative { immediate, delayed } => {
                trace!(posted_from = %task.location, ?delay, "queued pre-native pool task");
                if delay.is_zero() {
                    immediate.push(task);
                } else {
                    delayed.push((Instant::now() + delay, task));
                }
                Ok(())
            }
            BackendState::Running(handle) => {
                dispatch(handle, task, delay);
                Ok(())
            }
            BackendState::ShutDown => Err(TaskError::RunnerShutDown),
        }
    }

    /// Switches to `handle` and flushes the pre-native queue.
    ///
    /// Returns the number of flushed tasks. The flush happens under the
    /// state lock so tasks posted concurrently are dispatched after it.
    pub(crate) fn start(&self, handle: Handle) -> Result<usize> {
        let mut state = self.state.lock();
        let (immediate, delayed) = match &mut *state {
            BackendState::PreNative { immediate, delayed } => {
                (std::mem::take(immediate), std::mem::take(delayed))
            }
            BackendState::Running(_) => return Err(TaskError::AlreadyStarted),
            BackendState::ShutDown => return Err(TaskError::RunnerShutDown),
        };

        let flushed = immediate.len() + delayed.len();
        let now = Instant::now();
        for task in immediate {
            dispatch(&handle, task, Duration::ZERO);
        }
        for (deadline, task) in delayed {
            dispatch(&handle, task, deadline.saturating_duration_since(now));
        }
        *state = BackendState::Running(handle);
        info!(flushed, "thread pool started");
        Ok(flushed)
    }

    pub(crate) fn is_started(&self) -> bool {
        matches!(*self.state.lock(), BackendState::Running(_))
    }

    /// Number of tasks waiting for the pool to start.
    pub(crate) fn pending_pre_native(&self) -> usize {
        match &*self.state.lock() {
            BackendState::PreNative { immediate, delayed } => immediate.len() + delayed.len(),
            _ => 0,
        }
    }

    /// Rejects further posts and drops anything still queued pre-native.
    pub(crate) fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), BackendState::ShutDown);
        if let BackendState::PreNative { immediate, delayed } = previous {
            debug!(
                dropped = immediate.len() + delayed.len(),
                "dropping pre-native pool tasks"
            );
        }
    }
}

fn dispatch(handle: &Handle, task: PostedTask, delay: Duration) {
    let may_block = task.traits.may_block();
    handle.spawn(async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if may_block {
            let _ = tokio::task::spawn_blocking(move || task.run()).await;
        } else {
            task.run();
        }
    });
}

/// A [`TaskRunner`] posting to the thread pool with fixed traits.
///
/// Tasks may run concurrently and in any order. Use a
/// [`SequencedTaskRunner`](crate::SequencedTaskRunner) when order matters.
#[derive(Clone)]
pub struct ThreadPoolTaskRunner {
    backend: Arc<ThreadPoolBackend>,
    traits: TaskTraits,
}

impl ThreadPoolTaskRunner {
    pub(crate) fn new(backend: Arc<ThreadPoolBackend>, traits: TaskTraits) -> Self {
        debug_assert!(!traits.is_ui(), "ThreadPoolTaskRunner needs pool traits, got {traits}");
        Self { backend, traits }
    }
}

impl TaskRunner for ThreadPoolTaskRunner {
    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn post_delayed_task_at(&self, location: Location, task: Task, delay: Duration) -> Result<()> {
        self.backend.post(PostedTask::new(task, self.traits, location), delay)
    }

    fn belongs_to_current_thread(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TaskRunnerExt;
    use std::sync::mpsc;

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap()
    }

    #[test]
    fn test_pre_native_tasks_wait_for_start() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let runner = ThreadPoolTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        let (tx, rx) = mpsc::channel();

        runner.post_task(move || tx.send("ran").unwrap()).unwrap();
        assert_eq!(backend.pending_pre_native(), 1);
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let rt = runtime();
        assert_eq!(backend.start(rt.handle().clone()).unwrap(), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "ran");
        assert_eq!(backend.pending_pre_native(), 0);
    }

    #[test]
    fn test_pre_native_delay_counts_time_waiting_for_start() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let runner = ThreadPoolTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        let (tx, rx) = mpsc::channel();

        let posted = Instant::now();
        let task = move || tx.send(Instant::now()).unwrap();
        runner.post_delayed_task(task, Duration::from_millis(200)).unwrap();
        std::thread::sleep(Duration::from_millis(150));

        let rt = runtime();
        let started = Instant::now();
        backend.start(rt.handle().clone()).unwrap();
        let ran_at = rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(ran_at.duration_since(posted) >= Duration::from_millis(200));
        let waited = ran_at.duration_since(started);
        assert!(waited < Duration::from_millis(150), "ran {waited:?} after start");
    }

    #[test]
    fn test_flush_dispatches_immediate_before_delayed() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let runner = ThreadPoolTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        let (tx, rx) = mpsc::channel();

        let delayed_tx = tx.clone();
        let delayed = move || delayed_tx.send("delayed").unwrap();
        runner.post_delayed_task(delayed, Duration::from_millis(1)).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        runner.post_task(move || tx.send("immediate").unwrap()).unwrap();
        assert_eq!(backend.pending_pre_native(), 2);

        // A single worker runs spawned tasks in dispatch order.
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        assert_eq!(backend.start(rt.handle().clone()).unwrap(), 2);
        let order = rt.block_on(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            rx.try_iter().collect::<Vec<_>>()
        });
        assert_eq!(order, vec!["immediate", "delayed"]);
    }

    #[test]
    fn test_start_twice_fails() {
        let backend = ThreadPoolBackend::new();
        let rt = runtime();
        backend.start(rt.handle().clone()).unwrap();
        assert!(backend.is_started());
        let err = backend.start(rt.handle().clone()).unwrap_err();
        assert!(matches!(err, TaskError::AlreadyStarted));
    }

    #[test]
    fn test_may_block_task_runs() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let rt = runtime();
        backend.start(rt.handle().clone()).unwrap();
        let runner =
            ThreadPoolTaskRunner::new(Arc::clone(&backend), TaskTraits::BEST_EFFORT_MAY_BLOCK);
        let (tx, rx) = mpsc::channel();
        runner
            .post_task(move || {
                std::thread::sleep(Duration::from_millis(5));
                tx.send(()).unwrap();
            })
            .unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_shutdown_rejects_posts() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let runner = ThreadPoolTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        runner.post_task(|| {}).unwrap();
        backend.shutdown();
        assert_eq!(backend.pending_pre_native(), 0);
        assert!(matches!(
            runner.post_task(|| {}).unwrap_err(),
            TaskError::RunnerShutDown
        ));
    }
}
