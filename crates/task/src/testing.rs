//! Deterministic runners for tests.
//!
//! [`ManualTaskRunner`] runs delayed tasks against a [`ManualClock`] only
//! when the test advances it. [`ManualTaskExecutor`] queues everything and
//! runs tasks one at a time on request, while pretending to be inside the
//! execution context of the task it is running.
//!
//! Enabled for this crate's tests and, through the `test-utils` feature, for
//! dependent crates.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use baton_common::time::{duration_to_nanos, Clock, ManualClock};
use parking_lot::Mutex;

use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{PostedTask, Task, TaskExecutor, TaskRunner};
use crate::traits::TaskTraits;

struct QueuedTask {
    due: u64,
    seq: u64,
    task: PostedTask,
}

#[derive(Default)]
struct ManualRunnerState {
    queue: Vec<QueuedTask>,
    next_seq: u64,
    posted_delays: Vec<Duration>,
    shut_down: bool,
    running_on: Option<ThreadId>,
}

/// A [`TaskRunner`] driven by a [`ManualClock`].
///
/// Tasks run on the calling thread of [`run_due_tasks`](Self::run_due_tasks)
/// or [`advance_to`](Self::advance_to), ordered by due time and then by
/// posting order.
pub struct ManualTaskRunner {
    traits: TaskTraits,
    clock: Arc<ManualClock>,
    state: Mutex<ManualRunnerState>,
}

impl ManualTaskRunner {
    pub fn new(traits: TaskTraits, clock: Arc<ManualClock>) -> Arc<Self> {
        Arc::new(Self {
            traits,
            clock,
            state: Mutex::new(ManualRunnerState::default()),
        })
    }

    pub fn clock(&self) -> &Arc<ManualClock> {
        &self.clock
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Every delay passed to the runner, in posting order.
    pub fn posted_delays(&self) -> Vec<Duration> {
        self.state.lock().posted_delays.clone()
    }

    /// Due time of the earliest queued task.
    pub fn next_due(&self) -> Option<Duration> {
        self.state
            .lock()
            .queue
            .iter()
            .map(|queued| queued.due)
            .min()
            .map(Duration::from_nanos)
    }

    fn pop_due(&self, deadline: u64) -> Option<QueuedTask> {
        let mut state = self.state.lock();
        let index = state
            .queue
            .iter()
            .enumerate()
            .filter(|(_, queued)| queued.due <= deadline)
            .min_by_key(|(_, queued)| (queued.due, queued.seq))
            .map(|(index, _)| index)?;
        Some(state.queue.swap_remove(index))
    }

    fn run(&self, queued: QueuedTask) {
        self.state.lock().running_on = Some(thread::current().id());
        queued.task.run();
        self.state.lock().running_on = None;
    }

    /// Runs the earliest task that is due now. Returns `false` if none is.
    pub fn run_next_task(&self) -> bool {
        match self.pop_due(self.clock.now_nanos()) {
            Some(queued) => {
                self.run(queued);
                true
            }
            None => false,
        }
    }

    /// Runs tasks until none is due, including ones posted meanwhile.
    /// Returns the number of tasks run.
    pub fn run_due_tasks(&self) -> usize {
        let mut ran = 0;
        while self.run_next_task() {
            ran += 1;
        }
        ran
    }

    /// Moves the clock forward to `target`, stopping at each task's due
    /// time to run it. Returns the number of tasks run.
    pub fn advance_to(&self, target: Duration) -> usize {
        let target = duration_to_nanos(target);
        let mut ran = 0;
        while let Some(queued) = self.pop_due(target) {
            self.clock.set(Duration::from_nanos(queued.due));
            self.run(queued);
            ran += 1;
        }
        self.clock.set(Duration::from_nanos(target));
        ran
    }

    pub fn advance_by(&self, by: Duration) -> usize {
        self.advance_to(self.clock.now() + by)
    }

    /// Rejects further posts and drops queued tasks.
    pub fn shut_down(&self) {
        let mut state = self.state.lock();
        state.shut_down = true;
        state.queue.clear();
    }
}

impl TaskRunner for ManualTaskRunner {
    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn post_delayed_task_at(&self, location: Location, task: Task, delay: Duration) -> Result<()> {
        let mut state = self.state.lock();
        if state.shut_down {
            return Err(TaskError::RunnerShutDown);
        }
        let due = self.clock.now_nanos().saturating_add(duration_to_nanos(delay));
        let seq = state.next_seq;
        state.next_seq += 1;
        state.posted_delays.push(delay);
        state.queue.push(QueuedTask {
            due,
            seq,
            task: PostedTask::new(task, self.traits, location),
        });
        Ok(())
    }

    fn belongs_to_current_thread(&self) -> bool {
        self.state.lock().running_on == Some(thread::current().id())
    }
}

#[derive(Default)]
struct ManualExecutorState {
    queue: VecDeque<(PostedTask, Duration)>,
    current: Option<TaskTraits>,
    posted: Vec<TaskTraits>,
}

/// A [`TaskExecutor`] that queues every post in FIFO order.
///
/// Delays are recorded but not honoured. While a task runs, the executor
/// reports that its traits can run immediately, as a real runner would on
/// the matching thread.
pub struct ManualTaskExecutor {
    state: Mutex<ManualExecutorState>,
}

impl ManualTaskExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ManualExecutorState::default()),
        })
    }

    fn with_current<R>(&self, traits: Option<TaskTraits>, f: impl FnOnce() -> R) -> R {
        let previous = std::mem::replace(&mut self.state.lock().current, traits);
        let result = f();
        self.state.lock().current = previous;
        result
    }

    /// Runs `f` as if the calling thread belonged to `traits`.
    pub fn enter<R>(&self, traits: TaskTraits, f: impl FnOnce() -> R) -> R {
        self.with_current(Some(traits), f)
    }

    /// Runs the oldest queued task. Returns `false` if the queue is empty.
    pub fn run_next_task(&self) -> bool {
        let next = self.state.lock().queue.pop_front();
        let Some((task, _delay)) = next else {
            return false;
        };
        let traits = task.traits;
        self.with_current(Some(traits), || task.run());
        true
    }

    /// Runs tasks until the queue is empty. Returns the number run.
    pub fn run_until_idle(&self) -> usize {
        let mut ran = 0;
        while self.run_next_task() {
            ran += 1;
        }
        ran
    }

    pub fn pending_tasks(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Traits of every posted task, in posting order.
    pub fn posted_traits(&self) -> Vec<TaskTraits> {
        self.state.lock().posted.clone()
    }
}

impl TaskExecutor for ManualTaskExecutor {
    fn post_delayed_task_at(
        &self,
        traits: TaskTraits,
        location: Location,
        task: Task,
        delay: Duration,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.posted.push(traits);
        state
            .queue
            .push_back((PostedTask::new(task, traits, location), delay));
        Ok(())
    }

    fn can_run_task_immediately(&self, traits: TaskTraits) -> bool {
        self.state.lock().current == Some(traits)
    }
}
