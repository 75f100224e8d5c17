//! Sequenced task runners: ordered, one-at-a-time execution on the pool.
//!
//! A sequence keeps its own FIFO. At most one drain task for a sequence is
//! in the pool at any time; it runs the head of the queue and re-posts itself
//! while work remains. Delayed tasks join the FIFO when they become due.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::Result;
use crate::location::Location;
use crate::runner::{PostedTask, Task, TaskRunner};
use crate::thread_pool::ThreadPoolBackend;
use crate::traits::TaskTraits;

static NEXT_SEQUENCE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_SEQUENCE: Cell<Option<u64>> = const { Cell::new(None) };
}

#[derive(Default)]
struct SequenceState {
    queue: VecDeque<PostedTask>,
    /// A drain task is posted or running.
    scheduled: bool,
}

struct Sequence {
    id: u64,
    traits: TaskTraits,
    backend: Arc<ThreadPoolBackend>,
    state: Mutex<SequenceState>,
}

impl Sequence {
    fn enqueue(self: &Arc<Self>, task: PostedTask) -> Result<()> {
        // When no drain is scheduled the queue is empty, so `task` is the head.
        let location = task.location;
        {
            let mut state = self.state.lock();
            state.queue.push_back(task);
            if state.scheduled {
                return Ok(());
            }
            state.scheduled = true;
        }
        self.schedule_drain(location)
    }

    fn schedule_drain(self: &Arc<Self>, location: Location) -> Result<()> {
        let this = Arc::clone(self);
        let drain = PostedTask::new(Box::new(move || this.run_next()), self.traits, location);
        if let Err(err) = self.backend.post(drain, Duration::ZERO) {
            let mut state = self.state.lock();
            state.scheduled = false;
            state.queue.clear();
            return Err(err);
        }
        Ok(())
    }

    fn run_next(self: &Arc<Self>) {
        let next = self.state.lock().queue.pop_front();
        let Some(task) = next else {
            self.state.lock().scheduled = false;
            return;
        };

        let previous = CURRENT_SEQUENCE.with(|current| current.replace(Some(self.id)));
        task.run();
        CURRENT_SEQUENCE.with(|current| current.set(previous));

        let next_location = {
            let mut state = self.state.lock();
            match state.queue.front() {
                Some(next) => Some(next.location),
                None => {
                    state.scheduled = false;
                    None
                }
            }
        };
        if let Some(location) = next_location {
            if let Err(err) = self.schedule_drain(location) {
                warn!(sequence = self.id, error = %err, "dropping sequenced tasks");
            }
        }
    }
}

/// A [`TaskRunner`] whose tasks run one at a time, in posting order, on the
/// thread pool.
///
/// Consecutive tasks may run on different worker threads, but never
/// concurrently, and each observes the effects of the ones before it.
#[derive(Clone)]
pub struct SequencedTaskRunner {
    sequence: Arc<Sequence>,
}

impl SequencedTaskRunner {
    pub(crate) fn new(backend: Arc<ThreadPoolBackend>, traits: TaskTraits) -> Self {
        debug_assert!(!traits.is_ui(), "SequencedTaskRunner needs pool traits, got {traits}");
        Self {
            sequence: Arc::new(Sequence {
                id: NEXT_SEQUENCE_ID.fetch_add(1, Ordering::Relaxed),
                traits,
                backend,
                state: Mutex::new(SequenceState::default()),
            }),
        }
    }

    /// Number of tasks queued in this sequence, excluding delayed tasks that
    /// are not yet due.
    pub fn pending_tasks(&self) -> usize {
        self.sequence.state.lock().queue.len()
    }
}

impl TaskRunner for SequencedTaskRunner {
    fn traits(&self) -> TaskTraits {
        self.sequence.traits
    }

    fn post_delayed_task_at(&self, location: Location, task: Task, delay: Duration) -> Result<()> {
        let task = PostedTask::new(task, self.sequence.traits, location);
        if delay.is_zero() {
            return self.sequence.enqueue(task);
        }

        let sequence = Arc::clone(&self.sequence);
        let enqueue_when_due = PostedTask::new(
            Box::new(move || {
                if let Err(err) = sequence.enqueue(task) {
                    warn!(sequence = sequence.id, error = %err, "dropping delayed sequenced task");
                }
            }),
            self.sequence.traits,
            location,
        );
        self.sequence.backend.post(enqueue_when_due, delay)
    }

    fn belongs_to_current_thread(&self) -> bool {
        CURRENT_SEQUENCE.with(|current| current.get() == Some(self.sequence.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::TaskRunnerExt;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    fn started_backend() -> (tokio::runtime::Runtime, Arc<ThreadPoolBackend>) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(4)
            .enable_all()
            .build()
            .unwrap();
        let backend = Arc::new(ThreadPoolBackend::new());
        backend.start(rt.handle().clone()).unwrap();
        (rt, backend)
    }

    #[test]
    fn test_tasks_run_in_order_without_overlap() {
        let (_rt, backend) = started_backend();
        let runner = SequencedTaskRunner::new(backend, TaskTraits::USER_VISIBLE);
        let busy = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        for i in 0..20 {
            let busy = Arc::clone(&busy);
            let tx = tx.clone();
            runner
                .post_task(move || {
                    assert!(!busy.swap(true, Ordering::SeqCst), "sequence overlapped");
                    std::thread::sleep(Duration::from_micros(200));
                    busy.store(false, Ordering::SeqCst);
                    tx.send(i).unwrap();
                })
                .unwrap();
        }

        let order: Vec<i32> = (0..20)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn test_belongs_to_current_thread_inside_task() {
        let (_rt, backend) = started_backend();
        let runner = SequencedTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        let other = SequencedTaskRunner::new(backend, TaskTraits::USER_VISIBLE);
        assert!(!runner.belongs_to_current_thread());

        let (tx, rx) = mpsc::channel();
        let probe = runner.clone();
        runner
            .post_task(move || {
                tx.send((probe.belongs_to_current_thread(), other.belongs_to_current_thread()))
                    .unwrap();
            })
            .unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), (true, false));
    }

    #[test]
    fn test_delayed_task_joins_sequence_when_due() {
        let (_rt, backend) = started_backend();
        let runner = SequencedTaskRunner::new(backend, TaskTraits::USER_VISIBLE);
        let (tx, rx) = mpsc::channel();

        let late = tx.clone();
        runner
            .post_delayed_task(move || late.send("late").unwrap(), Duration::from_millis(20))
            .unwrap();
        runner.post_task(move || tx.send("now").unwrap()).unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "now");
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), "late");
    }

    #[test]
    fn test_pre_native_sequence_flushes_on_start() {
        let backend = Arc::new(ThreadPoolBackend::new());
        let runner = SequencedTaskRunner::new(Arc::clone(&backend), TaskTraits::USER_VISIBLE);
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            runner.post_task(move || tx.send(i).unwrap()).unwrap();
        }
        assert_eq!(runner.pending_tasks(), 3);

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        backend.start(rt.handle().clone()).unwrap();
        let order: Vec<i32> = (0..3)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        assert_eq!(order, [0, 1, 2]);
    }
}
