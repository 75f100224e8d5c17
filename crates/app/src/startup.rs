//! The startup pipeline driven by `baton run`.
//!
//! Mirrors a two-phase process start:
//!
//! 1. Pool work posted before the pool exists is queued (pre-native).
//! 2. A chain of UI steps runs on the UI thread; its last step starts the
//!    pool, which flushes the queued work.
//! 3. Deferred pool steps run as a second chain, hopping back to the UI
//!    thread once to publish completion.
//! 4. A fixed-rate heartbeat fires until enough beats were observed, then is
//!    cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use baton_task::{ChainedTasks, TaskExecutorExt, TaskScheduler, TaskTraits};
use tracing::{debug, info, trace, warn};

use crate::config::StartupConfig;

/// What a pipeline run observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    /// Pool tasks queued while the pool did not exist.
    pub pre_native_queued: usize,
    /// Pre-native tasks that ran once the pool started.
    pub pre_native_ran: u64,
    pub ui_steps_ran: u64,
    pub deferred_ran: u64,
    /// Heartbeats observed before cancellation.
    pub heartbeats: u64,
    pub elapsed: Duration,
}

#[derive(Default)]
struct Counters {
    ui_steps: AtomicU64,
    deferred: AtomicU64,
}

type Done = mpsc::Sender<anyhow::Result<()>>;

/// Runs the startup pipeline on `scheduler`, which must still be in its
/// pre-native phase.
pub fn run_startup(
    scheduler: &Arc<TaskScheduler>,
    config: &StartupConfig,
) -> anyhow::Result<StartupReport> {
    let started = Instant::now();
    let timeout = Duration::from_millis(config.timeout_ms);
    let counters = Arc::new(Counters::default());

    let (pre_tx, pre_rx) = mpsc::channel();
    for task in 0..config.pre_native_tasks {
        let pre_tx = pre_tx.clone();
        scheduler.post_task(TaskTraits::BEST_EFFORT, move || {
            trace!(task, "pre-native task ran");
            let _ = pre_tx.send(task);
        })?;
    }
    drop(pre_tx);
    let pre_native_queued = scheduler.pending_pre_native_tasks();
    info!(queued = pre_native_queued, "queued pre-native pool work");

    let (done_tx, done_rx) = mpsc::channel();
    let ui_chain = ChainedTasks::new(scheduler.clone());
    for step in 0..config.ui_steps {
        let counters = Arc::clone(&counters);
        ui_chain.add(TaskTraits::UI_USER_BLOCKING, move || {
            counters.ui_steps.fetch_add(1, Ordering::SeqCst);
            debug!(step, "UI startup step");
        })?;
    }
    {
        let scheduler = Arc::clone(scheduler);
        let counters = Arc::clone(&counters);
        let deferred = config.deferred_tasks;
        ui_chain.add(TaskTraits::UI_USER_BLOCKING, move || {
            let result = start_native_phase(&scheduler, &counters, deferred, done_tx.clone());
            if let Err(err) = result {
                let _ = done_tx.send(Err(err));
            }
        })?;
    }
    ui_chain.start(config.coalesce_ui_steps)?;

    done_rx
        .recv_timeout(timeout)
        .context("startup chains did not finish in time")??;

    let mut pre_native_ran = 0;
    for _ in 0..pre_native_queued {
        pre_rx
            .recv_timeout(timeout)
            .context("pre-native work did not run after the pool started")?;
        pre_native_ran += 1;
    }

    let heartbeats = run_heartbeat(scheduler, config, timeout)?;

    let report = StartupReport {
        pre_native_queued,
        pre_native_ran,
        ui_steps_ran: counters.ui_steps.load(Ordering::SeqCst),
        deferred_ran: counters.deferred.load(Ordering::SeqCst),
        heartbeats,
        elapsed: started.elapsed(),
    };
    info!(?report, "startup pipeline finished");
    Ok(report)
}

/// Starts the pool, then chains the deferred pool steps.
fn start_native_phase(
    scheduler: &Arc<TaskScheduler>,
    counters: &Arc<Counters>,
    deferred: usize,
    done: Done,
) -> anyhow::Result<()> {
    scheduler.start_thread_pool()?;

    let chain = ChainedTasks::new(scheduler.clone());
    for step in 0..deferred {
        let counters = Arc::clone(counters);
        chain.add(TaskTraits::BEST_EFFORT_MAY_BLOCK, move || {
            counters.deferred.fetch_add(1, Ordering::SeqCst);
            debug!(step, "deferred startup step");
        })?;
    }
    chain.add(TaskTraits::UI_USER_VISIBLE, move || {
        let _ = done.send(Ok(()));
    })?;

    // Keep the first deferred step off the UI thread.
    scheduler.post_task(TaskTraits::USER_VISIBLE, move || {
        if let Err(err) = chain.start(false) {
            warn!(error = %err, "could not start deferred chain");
        }
    })?;
    Ok(())
}

fn run_heartbeat(
    scheduler: &Arc<TaskScheduler>,
    config: &StartupConfig,
    timeout: Duration,
) -> anyhow::Result<u64> {
    if config.heartbeats == 0 {
        return Ok(0);
    }

    let (beat_tx, beat_rx) = mpsc::channel();
    let beats = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&beats);
    let heartbeat = scheduler.executor(TaskTraits::BEST_EFFORT).schedule_at_fixed_rate(
        move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            trace!(n, "heartbeat");
            let _ = beat_tx.send(n);
        },
        Duration::ZERO,
        Duration::from_millis(config.heartbeat_interval_ms),
    )?;

    let mut observed = 0;
    while observed < config.heartbeats {
        observed = beat_rx.recv_timeout(timeout).context("heartbeat stalled")?;
    }
    heartbeat.cancel();
    debug!(observed, runs = heartbeat.run_count(), "heartbeat cancelled");
    Ok(observed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use baton_task::TaskSchedulerConfig;

    fn scheduler() -> Arc<TaskScheduler> {
        TaskScheduler::new(TaskSchedulerConfig {
            pool_threads: 2,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_pipeline_runs_every_phase() {
        let scheduler = scheduler();
        let config = StartupConfig {
            heartbeat_interval_ms: 5,
            ..Default::default()
        };
        let report = run_startup(&scheduler, &config).unwrap();

        assert_eq!(report.pre_native_queued, 3);
        assert_eq!(report.pre_native_ran, 3);
        assert_eq!(report.ui_steps_ran, 3);
        assert_eq!(report.deferred_ran, 2);
        assert_eq!(report.heartbeats, 3);
        assert!(scheduler.is_thread_pool_started());
    }

    #[test]
    fn test_coalesced_pipeline_without_heartbeat() {
        let scheduler = scheduler();
        let config = StartupConfig {
            coalesce_ui_steps: true,
            heartbeats: 0,
            ui_steps: 5,
            deferred_tasks: 0,
            ..Default::default()
        };
        let report = run_startup(&scheduler, &config).unwrap();
        assert_eq!(report.ui_steps_ran, 5);
        assert_eq!(report.deferred_ran, 0);
        assert_eq!(report.heartbeats, 0);
    }

    #[test]
    fn test_pipeline_fails_when_pool_already_started() {
        let scheduler = scheduler();
        scheduler.start_thread_pool().unwrap();
        let config = StartupConfig {
            pre_native_tasks: 0,
            heartbeats: 0,
            timeout_ms: 2_000,
            ..Default::default()
        };
        let err = run_startup(&scheduler, &config).unwrap_err();
        assert!(err.to_string().contains("already been started"));
    }
}
