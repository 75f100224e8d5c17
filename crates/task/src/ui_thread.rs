//! The UI thread: a dedicated thread running a message loop.
//!
//! [`UiThread`] owns the thread and its queue. Tasks are posted through a
//! [`UiThreadTaskRunner`], which tags them with UI [`TaskTraits`].
//!
//! # Queue discipline
//!
//! Delayed tasks wait in a min-heap keyed by deadline. Once due they move to a
//! ready heap where the highest [`TaskPriority`] runs first and ties run in
//! posting order. Immediate posts go straight to the ready heap.
//!
//! ```text
//!   post(delay > 0) --> [ delayed: (run_at, seq) ] --due--> [ ready: (priority, seq) ] --> run
//!   post(delay = 0) -------------------------------------->
//! ```
//!
//! The queue lock is never held while a task runs.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info};

use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{PostedTask, Task, TaskRunner};
use crate::traits::{TaskPriority, TaskTraits};

struct DelayedEntry {
    run_at: Instant,
    seq: u64,
    task: PostedTask,
}

impl PartialEq for DelayedEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DelayedEntry {}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.run_at, self.seq).cmp(&(other.run_at, other.seq))
    }
}

struct ReadyEntry {
    priority: TaskPriority,
    seq: u64,
    task: PostedTask,
}

impl PartialEq for ReadyEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ReadyEntry {}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ReadyEntry {
    // Max-heap: higher priority first, then lower sequence number first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

#[derive(Default)]
struct LoopQueue {
    delayed: BinaryHeap<Reverse<DelayedEntry>>,
    ready: BinaryHeap<ReadyEntry>,
    next_seq: u64,
    quit: bool,
}

impl LoopQueue {
    fn push(&mut self, task: PostedTask, delay: Duration) {
        let seq = self.next_seq;
        self.next_seq += 1;
        if delay.is_zero() {
            self.ready.push(ReadyEntry {
                priority: task.traits.priority(),
                seq,
                task,
            });
        } else {
            self.delayed.push(Reverse(DelayedEntry {
                run_at: Instant::now() + delay,
                seq,
                task,
            }));
        }
    }

    /// Moves every delayed task due at `now` into the ready heap.
    fn promote_due(&mut self, now: Instant) {
        while self
            .delayed
            .peek()
            .is_some_and(|Reverse(entry)| entry.run_at <= now)
        {
            if let Some(Reverse(entry)) = self.delayed.pop() {
                self.ready.push(ReadyEntry {
                    priority: entry.task.traits.priority(),
                    seq: entry.seq,
                    task: entry.task,
                });
            }
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.delayed.peek().map(|Reverse(entry)| entry.run_at)
    }

    fn len(&self) -> usize {
        self.delayed.len() + self.ready.len()
    }
}

struct Shared {
    queue: Mutex<LoopQueue>,
    available: Condvar,
}

/// A named thread running a message loop.
///
/// Created by [`TaskScheduler::new`](crate::TaskScheduler::new) and alive for
/// the whole pre-native and native lifetime. Dropping the last handle shuts
/// the loop down; tasks still queued at that point are dropped unrun.
pub struct UiThread {
    shared: Arc<Shared>,
    thread_id: ThreadId,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UiThread {
    /// Spawns the loop thread.
    pub fn spawn(name: &str) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(LoopQueue::default()),
            available: Condvar::new(),
        });
        let loop_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || run_loop(&loop_shared))
            .map_err(baton_common::Error::from)?;
        let thread_id = handle.thread().id();
        info!(thread = name, "UI thread started");

        Ok(Arc::new(Self {
            shared,
            thread_id,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub(crate) fn post(&self, task: PostedTask, delay: Duration) -> Result<()> {
        let mut queue = self.shared.queue.lock();
        if queue.quit {
            return Err(TaskError::RunnerShutDown);
        }
        queue.push(task, delay);
        drop(queue);
        self.shared.available.notify_one();
        Ok(())
    }

    /// Returns `true` if called from the loop thread.
    pub fn is_current(&self) -> bool {
        thread::current().id() == self.thread_id
    }

    /// Number of tasks waiting, delayed or ready.
    pub fn pending_tasks(&self) -> usize {
        self.shared.queue.lock().len()
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shared.queue.lock().quit
    }

    /// Stops the loop after the task currently running, if any.
    ///
    /// Queued tasks are dropped. Joins the thread unless called from it.
    pub fn shutdown(&self) {
        let dropped = {
            let mut queue = self.shared.queue.lock();
            if queue.quit {
                return;
            }
            let dropped = std::mem::take(&mut *queue);
            queue.quit = true;
            dropped
        };
        self.shared.available.notify_all();
        debug!(dropped = dropped.len(), "UI thread shutting down");
        drop(dropped);

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if !self.is_current() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for UiThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_loop(shared: &Shared) {
    loop {
        let task = {
            let mut queue = shared.queue.lock();
            loop {
                if queue.quit {
                    return;
                }
                queue.promote_due(Instant::now());
                if let Some(entry) = queue.ready.pop() {
                    break entry.task;
                }
                match queue.next_deadline() {
                    Some(deadline) => {
                        shared.available.wait_until(&mut queue, deadline);
                    }
                    None => shared.available.wait(&mut queue),
                }
            }
        };
        task.run();
    }
}

/// A [`TaskRunner`] posting to the [`UiThread`] with fixed UI traits.
#[derive(Clone)]
pub struct UiThreadTaskRunner {
    ui: Arc<UiThread>,
    traits: TaskTraits,
}

impl UiThreadTaskRunner {
    /// Creates a runner for `traits`, which must be UI traits.
    pub fn new(ui: Arc<UiThread>, traits: TaskTraits) -> Self {
        debug_assert!(traits.is_ui(), "UiThreadTaskRunner needs UI traits, got {traits}");
        Self { ui, traits }
    }
}

impl TaskRunner for UiThreadTaskRunner {
    fn traits(&self) -> TaskTraits {
        self.traits
    }

    fn post_delayed_task_at(&self, location: Location, task: Task, delay: Duration) -> Result<()> {
        self.ui.post(PostedTask::new(task, self.traits, location), delay)
    }

    fn belongs_to_current_thread(&self) -> bool {
        self.ui.is_current()
    }
}
