//! Delayed and periodic execution on top of a one-shot [`TaskRunner`].
//!
//! Runners only know "run this after N milliseconds". [`ScheduledExecutor`]
//! layers three scheduling modes on that primitive:
//!
//! | Method | Next start |
//! |--------|------------|
//! | [`schedule`](ScheduledExecutor::schedule) | never (one-shot) |
//! | [`schedule_at_fixed_rate`](ScheduledExecutor::schedule_at_fixed_rate) | previous *scheduled* start + period |
//! | [`schedule_with_fixed_delay`](ScheduledExecutor::schedule_with_fixed_delay) | previous *completion* + delay |
//!
//! # Self-rescheduling
//!
//! A periodic [`ScheduledFuture`] posts itself as a one-shot task. After each
//! run it computes its next start time, checks for cancellation and re-posts
//! itself with the remaining delay. If a run overruns, the remaining delay is
//! zero and the next run is posted immediately: fixed-rate tasks catch up,
//! they never skip.
//!
//! # Time keeping
//!
//! Start times are kept in nanoseconds on the executor's [`Clock`] and only
//! converted at the edges: [`ScheduledFuture::delay`] returns a
//! [`Duration`], and every post to the runner floors to whole milliseconds.
//! Periodic drift therefore stays bounded to the runner's millisecond
//! granularity instead of accumulating rounding error.
//!
//! # Failure
//!
//! A periodic body that panics ends the schedule: the future becomes
//! [`FutureState::Failed`] and is not re-posted. Nothing retries it. A
//! one-shot body that panics also ends in `Failed`.

use std::cmp::Ordering;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use baton_common::time::{duration_to_nanos, floor_to_millis, Clock, MonotonicClock};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::error::{Result, TaskError};
use crate::location::Location;
use crate::runner::{panic_message, TaskRunner};
use crate::traits::TaskTraits;

/// How a scheduled task repeats.
///
/// Exactly one of period / inter-task delay exists for periodic tasks and
/// neither for one-shot tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Runs once.
    OneShot,
    /// Next start = previous scheduled start + period.
    FixedRate(Duration),
    /// Next start = previous completion + delay.
    FixedDelay(Duration),
}

impl Schedule {
    pub fn is_periodic(self) -> bool {
        !matches!(self, Self::OneShot)
    }
}

/// Lifecycle of a [`ScheduledFuture`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
    /// Waiting for its next start time.
    Scheduled,
    /// The body is executing.
    Running,
    /// A one-shot body returned.
    Completed,
    /// The body panicked, or the runner refused a re-post.
    Failed,
    /// Cancelled before completing.
    Cancelled,
}

impl FutureState {
    /// Returns `true` for states that will never change again.
    pub fn is_done(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Scheduled => 0,
            Self::Running => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::Cancelled => 4,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Scheduled,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::Failed,
            _ => Self::Cancelled,
        }
    }
}

enum Body<T> {
    Once(Option<Box<dyn FnOnce() -> T + Send>>),
    Repeating(Box<dyn FnMut() + Send>),
}

fn once<T, F>(f: F) -> Body<T>
where
    F: FnOnce() -> T + Send + 'static,
{
    let body: Box<dyn FnOnce() -> T + Send> = Box::new(f);
    Body::Once(Some(body))
}

fn repeating<F>(f: F) -> Body<()>
where
    F: FnMut() + Send + 'static,
{
    let body: Box<dyn FnMut() + Send> = Box::new(f);
    Body::Repeating(body)
}

const NEVER_STARTED: u64 = u64::MAX;

struct FutureTask<T> {
    schedule: Schedule,
    /// Next scheduled start, in clock nanoseconds.
    time: AtomicU64,
    /// Start of the most recent run, or `NEVER_STARTED`.
    last_start: AtomicU64,
    runs: AtomicU64,
    state: AtomicU8,
    body: Mutex<Body<T>>,
    result: Mutex<Option<T>>,
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
    location: Location,
}

impl<T: Send + 'static> FutureTask<T> {
    fn state(&self) -> FutureState {
        FutureState::from_u8(self.state.load(AtomicOrdering::SeqCst))
    }

    fn transition(&self, from: FutureState, to: FutureState) -> bool {
        self.state
            .compare_exchange(
                from.as_u8(),
                to.as_u8(),
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            )
            .is_ok()
    }

    fn remaining_nanos(&self) -> i128 {
        i128::from(self.time.load(AtomicOrdering::SeqCst)) - i128::from(self.clock.now_nanos())
    }

    /// Posts the next run with the remaining delay, floored to milliseconds.
    fn submit(self: &Arc<Self>) -> Result<()> {
        let remaining = self
            .time
            .load(AtomicOrdering::SeqCst)
            .saturating_sub(self.clock.now_nanos());
        let delay = floor_to_millis(remaining);
        let this = Arc::clone(self);
        self.runner
            .post_delayed_task_at(self.location, Box::new(move || this.run()), delay)
    }

    fn run(self: &Arc<Self>) {
        if !self.transition(FutureState::Scheduled, FutureState::Running) {
            trace!(posted_from = %self.location, state = ?self.state(), "skipping scheduled run");
            return;
        }
        self.last_start
            .store(self.clock.now_nanos(), AtomicOrdering::SeqCst);
        self.runs.fetch_add(1, AtomicOrdering::SeqCst);

        if self.schedule.is_periodic() {
            self.run_and_reset();
        } else {
            self.run_once();
        }
    }

    fn run_once(&self) {
        let body = match &mut *self.body.lock() {
            Body::Once(body) => body.take(),
            Body::Repeating(_) => None,
        };
        let Some(body) = body else {
            return;
        };

        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => {
                *self.result.lock() = Some(value);
                if !self.transition(FutureState::Running, FutureState::Completed) {
                    // Cancelled while running; the result is discarded.
                    self.result.lock().take();
                }
            }
            Err(payload) => {
                self.transition(FutureState::Running, FutureState::Failed);
                debug!(
                    posted_from = %self.location,
                    panic = panic_message(payload.as_ref()),
                    "scheduled task panicked"
                );
            }
        }
    }

    fn run_and_reset(self: &Arc<Self>) {
        let outcome = match &mut *self.body.lock() {
            Body::Repeating(body) => panic::catch_unwind(AssertUnwindSafe(|| body())),
            Body::Once(_) => Ok(()),
        };

        if let Err(payload) = outcome {
            self.transition(FutureState::Running, FutureState::Failed);
            debug!(
                posted_from = %self.location,
                panic = panic_message(payload.as_ref()),
                "periodic task panicked; not rescheduling"
            );
            return;
        }

        self.set_next_run_time();
        if !self.transition(FutureState::Running, FutureState::Scheduled) {
            trace!(posted_from = %self.location, "periodic task cancelled during run");
            return;
        }
        if let Err(err) = self.submit() {
            warn!(posted_from = %self.location, error = %err, "could not repost periodic task");
            self.transition(FutureState::Scheduled, FutureState::Failed);
        }
    }

    fn set_next_run_time(&self) {
        match self.schedule {
            Schedule::OneShot => {}
            Schedule::FixedRate(period) => {
                self.time
                    .fetch_add(duration_to_nanos(period), AtomicOrdering::SeqCst);
            }
            Schedule::FixedDelay(delay) => {
                let next = self
                    .clock
                    .now_nanos()
                    .saturating_add(duration_to_nanos(delay));
                self.time.store(next, AtomicOrdering::SeqCst);
            }
        }
    }

    fn cancel(&self) -> bool {
        let mut current = self.state.load(AtomicOrdering::SeqCst);
        loop {
            if FutureState::from_u8(current).is_done() {
                return false;
            }
            match self.state.compare_exchange(
                current,
                FutureState::Cancelled.as_u8(),
                AtomicOrdering::SeqCst,
                AtomicOrdering::SeqCst,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        // Release captured state now unless the body is mid-run.
        if let Some(mut body) = self.body.try_lock() {
            *body = Body::Once(None);
        }
        debug!(posted_from = %self.location, "scheduled task cancelled");
        true
    }
}

/// Handle to a task submitted to a [`ScheduledExecutor`].
///
/// Cloning the handle does not clone the task.
pub struct ScheduledFuture<T = ()> {
    inner: Arc<FutureTask<T>>,
}

impl<T> Clone for ScheduledFuture<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ScheduledFuture<T> {
    /// Cancels the task.
    ///
    /// A pending run will not start and a periodic task will not be
    /// re-posted. A run already in progress is not interrupted. Returns
    /// `false` if the task had already completed, failed or been cancelled.
    pub fn cancel(&self) -> bool {
        self.inner.cancel()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.state() == FutureState::Cancelled
    }

    /// Returns `true` once the task has completed, failed or been cancelled.
    pub fn is_done(&self) -> bool {
        self.inner.state().is_done()
    }

    pub fn state(&self) -> FutureState {
        self.inner.state()
    }

    pub fn schedule(&self) -> Schedule {
        self.inner.schedule
    }

    /// Time left until the next scheduled start, zero if it has passed.
    pub fn delay(&self) -> Duration {
        let remaining = self.inner.remaining_nanos().max(0);
        Duration::from_nanos(u64::try_from(remaining).unwrap_or(u64::MAX))
    }

    /// Next scheduled start on the executor's clock.
    pub fn scheduled_time(&self) -> Duration {
        Duration::from_nanos(self.inner.time.load(AtomicOrdering::SeqCst))
    }

    /// Actual start of the most recent run on the executor's clock.
    pub fn last_start(&self) -> Option<Duration> {
        match self.inner.last_start.load(AtomicOrdering::SeqCst) {
            NEVER_STARTED => None,
            nanos => Some(Duration::from_nanos(nanos)),
        }
    }

    /// Number of times the body has started.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(AtomicOrdering::SeqCst)
    }

    /// Takes the value produced by a completed one-shot task.
    pub fn take_result(&self) -> Option<T> {
        self.inner.result.lock().take()
    }

    /// Where the task was scheduled from.
    pub fn location(&self) -> Location {
        self.inner.location
    }

    /// Orders two futures by remaining delay, read from their clocks now.
    ///
    /// The answer is a snapshot: it can change as soon as either task runs.
    pub fn cmp_delay<U: Send + 'static>(&self, other: &ScheduledFuture<U>) -> Ordering {
        self.inner
            .remaining_nanos()
            .cmp(&other.inner.remaining_nanos())
    }
}

impl<T: Send + 'static> fmt::Debug for ScheduledFuture<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledFuture")
            .field("schedule", &self.inner.schedule)
            .field("state", &self.state())
            .field("scheduled_time", &self.scheduled_time())
            .field("runs", &self.run_count())
            .field("location", &self.inner.location)
            .finish()
    }
}

/// A scheduled-executor front end for a single [`TaskRunner`].
///
/// Owns no threads. Every run is a one-shot post to the runner.
///
/// Only fire-and-forget and scheduled execution are provided. The bulk and
/// blocking operations of a full executor service (`submit`, `invoke_all`,
/// `invoke_any`, `shutdown`, `shutdown_now`, `is_shutdown`, `is_terminated`,
/// `await_termination`) exist only to fail with
/// [`TaskError::Unsupported`].
#[derive(Clone)]
pub struct ScheduledExecutor {
    runner: Arc<dyn TaskRunner>,
    clock: Arc<dyn Clock>,
}

impl ScheduledExecutor {
    pub fn new(runner: Arc<dyn TaskRunner>, clock: Arc<dyn Clock>) -> Self {
        Self { runner, clock }
    }

    /// Creates an executor timed by a fresh [`MonotonicClock`].
    pub fn with_monotonic_clock(runner: Arc<dyn TaskRunner>) -> Self {
        Self::new(runner, Arc::new(MonotonicClock::new()))
    }

    /// Traits of the underlying runner.
    pub fn traits(&self) -> TaskTraits {
        self.runner.traits()
    }

    /// Runs `f` once after `delay`.
    #[track_caller]
    pub fn schedule<F>(&self, f: F, delay: Duration) -> Result<ScheduledFuture<()>>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(once(f), Schedule::OneShot, delay, Location::caller())
    }

    /// Runs `f` once after `delay` and keeps its return value for
    /// [`ScheduledFuture::take_result`].
    #[track_caller]
    pub fn schedule_call<T, F>(&self, f: F, delay: Duration) -> Result<ScheduledFuture<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        self.submit_task(once(f), Schedule::OneShot, delay, Location::caller())
    }

    /// Runs `f` after `initial_delay`, then every `period` measured from
    /// the previous scheduled start.
    #[track_caller]
    pub fn schedule_at_fixed_rate<F>(
        &self,
        f: F,
        initial_delay: Duration,
        period: Duration,
    ) -> Result<ScheduledFuture<()>>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit_task(
            repeating(f),
            Schedule::FixedRate(period),
            initial_delay,
            Location::caller(),
        )
    }

    /// Runs `f` after `initial_delay`, then `delay` after each run
    /// completes.
    #[track_caller]
    pub fn schedule_with_fixed_delay<F>(
        &self,
        f: F,
        initial_delay: Duration,
        delay: Duration,
    ) -> Result<ScheduledFuture<()>>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit_task(
            repeating(f),
            Schedule::FixedDelay(delay),
            initial_delay,
            Location::caller(),
        )
    }

    /// Runs `f` as soon as possible.
    #[track_caller]
    pub fn execute<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit_task(once(f), Schedule::OneShot, Duration::ZERO, Location::caller())
            .map(|_| ())
    }

    fn submit_task<T: Send + 'static>(
        &self,
        body: Body<T>,
        schedule: Schedule,
        initial_delay: Duration,
        location: Location,
    ) -> Result<ScheduledFuture<T>> {
        if let Schedule::FixedRate(interval) | Schedule::FixedDelay(interval) = schedule {
            if interval.is_zero() {
                return Err(baton_common::Error::InvalidArgument(format!(
                    "periodic interval must be > 0 ({schedule:?} at {location})"
                ))
                .into());
            }
        }

        let time = self
            .clock
            .now_nanos()
            .saturating_add(duration_to_nanos(initial_delay));
        let task = Arc::new(FutureTask {
            schedule,
            time: AtomicU64::new(time),
            last_start: AtomicU64::new(NEVER_STARTED),
            runs: AtomicU64::new(0),
            state: AtomicU8::new(FutureState::Scheduled.as_u8()),
            body: Mutex::new(body),
            result: Mutex::new(None),
            runner: Arc::clone(&self.runner),
            clock: Arc::clone(&self.clock),
            location,
        });
        task.submit()?;
        trace!(posted_from = %location, ?schedule, ?initial_delay, "scheduled task");
        Ok(ScheduledFuture { inner: task })
    }

    pub fn submit<T, F>(&self, _f: F) -> Result<ScheduledFuture<T>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Err(TaskError::Unsupported("submit"))
    }

    pub fn invoke_all<T, F>(&self, _tasks: Vec<F>) -> Result<Vec<ScheduledFuture<T>>>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Err(TaskError::Unsupported("invoke_all"))
    }

    pub fn invoke_any<T, F>(&self, _tasks: Vec<F>) -> Result<T>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Err(TaskError::Unsupported("invoke_any"))
    }

    pub fn shutdown(&self) -> Result<()> {
        Err(TaskError::Unsupported("shutdown"))
    }

    pub fn shutdown_now(&self) -> Result<Vec<ScheduledFuture<()>>> {
        Err(TaskError::Unsupported("shutdown_now"))
    }

    pub fn is_shutdown(&self) -> Result<bool> {
        Err(TaskError::Unsupported("is_shutdown"))
    }

    pub fn is_terminated(&self) -> Result<bool> {
        Err(TaskError::Unsupported("is_terminated"))
    }

    pub fn await_termination(&self, _timeout: Duration) -> Result<bool> {
        Err(TaskError::Unsupported("await_termination"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualTaskRunner;
    use baton_common::ManualClock;
    use std::sync::atomic::AtomicU32;

    fn executor() -> (Arc<ManualClock>, Arc<ManualTaskRunner>, ScheduledExecutor) {
        let clock = Arc::new(ManualClock::new());
        let runner = ManualTaskRunner::new(TaskTraits::USER_VISIBLE, Arc::clone(&clock));
        let executor = ScheduledExecutor::new(runner.clone(), clock.clone());
        (clock, runner, executor)
    }

    #[test]
    fn test_one_shot_runs_after_delay() {
        let (_clock, runner, executor) = executor();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        let future = executor
            .schedule(
                move || {
                    c.fetch_add(1, AtomicOrdering::SeqCst);
                },
                Duration::from_millis(50),
            )
            .unwrap();

        assert_eq!(future.delay(), Duration::from_millis(50));
        runner.advance_by(Duration::from_millis(49));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 0);
        runner.advance_by(Duration::from_millis(1));
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(future.state(), FutureState::Completed);
        assert_eq!(future.last_start(), Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_schedule_call_keeps_result() {
        let (_clock, runner, executor) = executor();
        let future = executor.schedule_call(|| 6 * 7, Duration::ZERO).unwrap();
        assert_eq!(future.take_result(), None);
        runner.run_due_tasks();
        assert!(future.is_done());
        assert_eq!(future.take_result(), Some(42));
        assert_eq!(future.take_result(), None);
    }

    #[test]
    fn test_submission_delay_floors_to_millis() {
        let (_clock, runner, executor) = executor();
        executor.schedule(|| {}, Duration::from_micros(2_999)).unwrap();
        assert_eq!(runner.posted_delays(), vec![Duration::from_millis(2)]);
    }

    #[test]
    fn test_zero_period_rejected() {
        let (_clock, _runner, executor) = executor();
        let err = executor
            .schedule_at_fixed_rate(|| {}, Duration::ZERO, Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            TaskError::Common(baton_common::Error::InvalidArgument(_))
        ));
        assert!(executor
            .schedule_with_fixed_delay(|| {}, Duration::ZERO, Duration::ZERO)
            .is_err());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let (_clock, runner, executor) = executor();
        let future = executor.schedule(|| {}, Duration::from_millis(10)).unwrap();
        assert!(future.cancel());
        assert!(!future.cancel());
        assert!(future.is_cancelled());
        runner.advance_by(Duration::from_millis(10));
        assert_eq!(future.run_count(), 0);
    }

    #[test]
    fn test_cancel_after_completion_returns_false() {
        let (_clock, runner, executor) = executor();
        let future = executor.schedule(|| {}, Duration::ZERO).unwrap();
        runner.run_due_tasks();
        assert!(!future.cancel());
        assert_eq!(future.state(), FutureState::Completed);
    }

    #[test]
    fn test_one_shot_panic_marks_failed() {
        let (_clock, runner, executor) = executor();
        let future = executor
            .schedule(|| panic!("bad input"), Duration::ZERO)
            .unwrap();
        runner.run_due_tasks();
        assert_eq!(future.state(), FutureState::Failed);
        assert!(future.is_done());
    }

    #[test]
    fn test_cmp_delay_orders_by_remaining_time() {
        let (clock, _runner, executor) = executor();
        let soon = executor.schedule(|| {}, Duration::from_millis(5)).unwrap();
        clock.advance(Duration::from_millis(1));
        let later = executor.schedule(|| {}, Duration::from_millis(5)).unwrap();
        assert_eq!(soon.cmp_delay(&later), Ordering::Less);
        assert_eq!(later.cmp_delay(&soon), Ordering::Greater);
        assert_eq!(soon.cmp_delay(&soon), Ordering::Equal);
    }

    #[test]
    fn test_execute_runs_immediately() {
        let (_clock, runner, executor) = executor();
        let count = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&count);
        executor
            .execute(move || {
                c.fetch_add(1, AtomicOrdering::SeqCst);
            })
            .unwrap();
        assert_eq!(runner.posted_delays(), vec![Duration::ZERO]);
        runner.run_due_tasks();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_unsupported_operations_fail_fast() {
        let (_clock, _runner, executor) = executor();
        assert!(matches!(
            executor.submit(|| 1).unwrap_err(),
            TaskError::Unsupported("submit")
        ));
        assert!(matches!(
            executor.invoke_all(vec![|| 1]).unwrap_err(),
            TaskError::Unsupported("invoke_all")
        ));
        assert!(matches!(
            executor.invoke_any(vec![|| 1]).unwrap_err(),
            TaskError::Unsupported("invoke_any")
        ));
        assert!(executor.shutdown().is_err());
        assert!(executor.shutdown_now().is_err());
        assert!(executor.is_shutdown().is_err());
        assert!(executor.is_terminated().is_err());
        assert!(executor.await_termination(Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_runner_shutdown_surfaces_on_schedule() {
        let (_clock, runner, executor) = executor();
        runner.shut_down();
        assert!(matches!(
            executor.schedule(|| {}, Duration::ZERO).unwrap_err(),
            TaskError::RunnerShutDown
        ));
    }

    #[test]
    fn test_cancelled_call_has_no_result() {
        let (_clock, runner, executor) = executor();
        let future = executor.schedule_call(|| 6 * 7, Duration::from_millis(5)).unwrap();
        assert!(future.cancel());
        runner.advance_by(Duration::from_millis(5));
        assert_eq!(future.state(), FutureState::Cancelled);
        assert_eq!(future.run_count(), 0);
        assert_eq!(future.take_result(), None);
    }

    #[test]
    fn test_future_records_schedule_site() {
        let (_clock, _runner, executor) = executor();
        assert_eq!(executor.traits(), TaskTraits::USER_VISIBLE);

        let line = line!() + 1;
        let future = executor.schedule(|| {}, Duration::ZERO).unwrap();
        assert_eq!(future.location().file(), file!());
        assert_eq!(future.location().line(), line);
    }
}
