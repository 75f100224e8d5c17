use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use baton_common::{Clock, ManualClock};
use baton_task::testing::ManualTaskRunner;
use baton_task::{FutureState, Schedule, ScheduledExecutor, TaskTraits};
use parking_lot::Mutex;

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn setup() -> (Arc<ManualClock>, Arc<ManualTaskRunner>, ScheduledExecutor) {
    let clock = Arc::new(ManualClock::new());
    let runner = ManualTaskRunner::new(TaskTraits::BEST_EFFORT, Arc::clone(&clock));
    let executor = ScheduledExecutor::new(runner.clone(), clock.clone());
    (clock, runner, executor)
}

#[test]
fn test_fixed_rate_keeps_period_after_overrun() {
    let (clock, runner, executor) = setup();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&starts);
    let body_clock = Arc::clone(&clock);
    let future = executor
        .schedule_at_fixed_rate(
            move || {
                let now = body_clock.now();
                log.lock().push(now);
                if now == ms(100) {
                    // Second run overruns by 30ms.
                    body_clock.advance(ms(30));
                }
            },
            Duration::ZERO,
            ms(100),
        )
        .unwrap();
    assert_eq!(future.schedule(), Schedule::FixedRate(ms(100)));

    runner.run_due_tasks();
    runner.advance_to(ms(350));
    future.cancel();

    assert_eq!(*starts.lock(), [ms(0), ms(100), ms(200), ms(300)]);
    assert_eq!(future.run_count(), 4);
}

#[test]
fn test_fixed_rate_catches_up_without_skipping() {
    let (clock, runner, executor) = setup();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&starts);
    let body_clock = Arc::clone(&clock);
    executor
        .schedule_at_fixed_rate(
            move || {
                let now = body_clock.now();
                log.lock().push(now);
                if now == ms(0) {
                    body_clock.advance(ms(250));
                }
            },
            Duration::ZERO,
            ms(100),
        )
        .unwrap();

    runner.run_due_tasks();
    runner.advance_to(ms(300));

    // Runs for 100 and 200 were late and fire back to back at 250.
    assert_eq!(*starts.lock(), [ms(0), ms(250), ms(250), ms(300)]);
}

#[test]
fn test_fixed_delay_measures_from_completion() {
    let (clock, runner, executor) = setup();
    let starts = Arc::new(Mutex::new(Vec::new()));

    let log = Arc::clone(&starts);
    let body_clock = Arc::clone(&clock);
    let future = executor
        .schedule_with_fixed_delay(
            move || {
                log.lock().push(body_clock.now());
                body_clock.advance(ms(30));
            },
            ms(10),
            ms(100),
        )
        .unwrap();

    runner.advance_to(ms(400));
    assert_eq!(*starts.lock(), [ms(10), ms(140), ms(270), ms(400)]);
    assert_eq!(future.state(), FutureState::Scheduled);
    assert_eq!(future.scheduled_time(), ms(530));
}

#[test]
fn test_periodic_task_stops_after_panic() {
    let (_clock, runner, executor) = setup();
    let runs = Arc::new(AtomicU32::new(0));

    let count = Arc::clone(&runs);
    let future = executor
        .schedule_at_fixed_rate(
            move || {
                if count.fetch_add(1, Ordering::SeqCst) == 1 {
                    panic!("second run fails");
                }
            },
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    runner.run_due_tasks();
    runner.advance_by(ms(1_000));

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    assert_eq!(future.run_count(), 2);
    assert_eq!(future.state(), FutureState::Failed);
    assert!(future.is_done());
    assert_eq!(runner.pending_tasks(), 0);
}

#[test]
fn test_cancel_before_first_run() {
    let (_clock, runner, executor) = setup();
    let runs = Arc::new(AtomicU32::new(0));

    let count = Arc::clone(&runs);
    let future = executor
        .schedule(
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            },
            ms(50),
        )
        .unwrap();
    assert!(future.cancel());

    runner.advance_by(ms(100));
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(future.last_start(), None);
    assert!(future.is_cancelled());
}

#[test]
fn test_cancel_stops_periodic_resubmission() {
    let (_clock, runner, executor) = setup();
    let runs = Arc::new(AtomicU32::new(0));

    let count = Arc::clone(&runs);
    let future = executor
        .schedule_with_fixed_delay(
            move || {
                count.fetch_add(1, Ordering::SeqCst);
            },
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    runner.advance_to(ms(25));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    future.cancel();
    runner.advance_by(ms(100));
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[test]
fn test_cancel_during_run_prevents_next_run() {
    let (_clock, runner, executor) = setup();
    let slot = Arc::new(Mutex::new(None::<baton_task::ScheduledFuture>));
    let runs = Arc::new(AtomicU32::new(0));

    let handle = Arc::clone(&slot);
    let count = Arc::clone(&runs);
    let future = executor
        .schedule_at_fixed_rate(
            move || {
                count.fetch_add(1, Ordering::SeqCst);
                if let Some(future) = handle.lock().as_ref() {
                    future.cancel();
                }
            },
            ms(5),
            ms(5),
        )
        .unwrap();
    *slot.lock() = Some(future.clone());

    runner.advance_by(ms(50));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(future.state(), FutureState::Cancelled);
    slot.lock().take();
}

#[test]
fn test_delay_tracks_clock() {
    let (clock, _runner, executor) = setup();
    let future = executor.schedule(|| {}, ms(100)).unwrap();

    clock.advance(ms(40));
    assert_eq!(future.delay(), ms(60));
    clock.advance(ms(100));
    assert_eq!(future.delay(), Duration::ZERO);
}

#[test]
fn test_resubmission_uses_millisecond_delays() {
    let (clock, runner, executor) = setup();
    let body_clock = Arc::clone(&clock);
    executor
        .schedule_at_fixed_rate(
            move || body_clock.advance(Duration::from_micros(1_500)),
            Duration::ZERO,
            ms(10),
        )
        .unwrap();

    runner.run_due_tasks();
    // 10ms period minus 1.5ms of work leaves 8.5ms, floored to 8ms.
    assert_eq!(runner.posted_delays(), vec![Duration::ZERO, ms(8)]);
}
