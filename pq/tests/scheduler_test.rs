//! Integration tests for parqueue
//!
//! These tests drive whole batches through the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parqueue::{JobContext, JobEvent, JobId, JobSpec, JobState, QueueConfig, Scheduler, read_event_log, spawn_event_logger};
use proptest::prelude::*;
use tempfile::TempDir;

fn config(save_results: bool, stop_on_failure: bool) -> QueueConfig {
    QueueConfig {
        save_results,
        stop_on_failure,
        ..Default::default()
    }
}

async fn nap(ms: u64, _ctx: JobContext) -> eyre::Result<u64> {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Ok(ms)
}

// =============================================================================
// Dispatch scenarios
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_five_jobs_two_slots_notify_in_waves() {
    let mut scheduler: Scheduler<u64> = Scheduler::new(config(false, true));
    let mut rx = scheduler.subscribe();
    for _ in 0..5 {
        scheduler.add_job(nap, 50).unwrap();
    }

    let origin = tokio::time::Instant::now();
    let observer = tokio::spawn(async move {
        let mut settled_at = Vec::new();
        while let Ok(event) = rx.recv().await {
            match event {
                JobEvent::JobSucceeded { .. } => settled_at.push(origin.elapsed()),
                JobEvent::BatchCompleted { .. } => break,
                _ => {}
            }
        }
        settled_at
    });

    let report = scheduler.start(2).unwrap().wait().await.unwrap();
    let settled_at = observer.await.unwrap();

    assert_eq!(report.records.len(), 5);
    assert!(report.success());
    // Payloads are not kept unless asked for
    assert!(report.records.iter().all(|r| r.payload.is_none()));

    let waves: Vec<usize> = [50u128, 100, 150]
        .iter()
        .map(|ms| settled_at.iter().filter(|t| t.as_millis() == *ms).count())
        .collect();
    assert_eq!(waves, vec![2, 2, 1]);
}

#[tokio::test(start_paused = true)]
async fn test_failure_among_simultaneous_jobs() {
    let mut scheduler: Scheduler<u64> = Scheduler::new(config(false, true));
    for n in 1..=3u64 {
        scheduler
            .add_job(
                |n: u64, _ctx| async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if n == 2 {
                        eyre::bail!("job {} refuses", n);
                    }
                    Ok(n)
                },
                n,
            )
            .unwrap();
    }

    let handle = scheduler.start(3).unwrap();
    let report = handle.wait().await.unwrap();

    assert_eq!(report.records.len(), 3);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.record(JobId::new(2)).unwrap().state, JobState::Rejected);
    assert!(report.cancelled);
}

#[tokio::test(start_paused = true)]
async fn test_single_timeout_notifies_once() {
    let mut scheduler: Scheduler<()> = Scheduler::new(config(false, true));
    let mut rx = scheduler.subscribe();
    scheduler
        .submit(
            JobSpec::new()
                .label("stuck")
                .timeout(Duration::from_secs(1))
                .work(
                    |_: (), ctx: JobContext| async move {
                        ctx.cancelled().await;
                        futures::future::pending::<()>().await;
                        Ok(())
                    },
                    (),
                ),
        )
        .unwrap();

    let origin = tokio::time::Instant::now();
    let report = scheduler.start(1).unwrap().wait().await.unwrap();

    assert!(origin.elapsed() >= Duration::from_secs(1));
    assert!(origin.elapsed() < Duration::from_millis(1010));
    assert_eq!(report.records.len(), 1);
    assert!(!report.records[0].succeeded);
    assert!(report.records[0].cause.as_ref().unwrap().is_timeout());

    let mut timeouts = 0;
    while let Ok(event) = rx.try_recv() {
        if let JobEvent::JobTimedOut { job, cause, .. } = event {
            assert_eq!(job.label, "stuck");
            assert_eq!(job.state, JobState::TimedOut);
            assert!(cause.is_timeout());
            timeouts += 1;
        }
    }
    assert_eq!(timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_job_frees_its_slot() {
    let mut scheduler: Scheduler<Duration> = Scheduler::new(config(true, false));
    let origin = tokio::time::Instant::now();

    // Never settles and ignores its cancellation token
    scheduler
        .add_job_with_timeout(
            |_: (), _ctx| async {
                futures::future::pending::<()>().await;
                Ok(Duration::ZERO)
            },
            (),
            Duration::from_secs(1),
        )
        .unwrap();
    scheduler
        .add_job(move |_: (), _ctx| async move { Ok(origin.elapsed()) }, ())
        .unwrap();

    let report = scheduler.start(1).unwrap().wait().await.unwrap();

    let states: Vec<JobState> = report.records.iter().map(|r| r.state).collect();
    assert_eq!(states, vec![JobState::TimedOut, JobState::Resolved]);

    let admitted_at = report.record(JobId::new(2)).unwrap().payload.unwrap();
    assert!(admitted_at >= Duration::from_secs(1));
    assert!(admitted_at < Duration::from_millis(1010));
    assert_eq!(report.summary.timed_out, 1);
    assert_eq!(report.summary.succeeded, 1);
}

#[tokio::test(start_paused = true)]
async fn test_save_results_keeps_exact_payloads() {
    let mut scheduler: Scheduler<String> = Scheduler::new(config(true, true));
    for word in ["alpha", "beta", "gamma"] {
        scheduler
            .add_job(|w: &'static str, _ctx| async move { Ok(w.to_uppercase()) }, word)
            .unwrap();
    }

    let report = scheduler.start(2).unwrap().wait().await.unwrap();

    let mut payloads: Vec<String> = report.records.iter().filter_map(|r| r.payload.clone()).collect();
    payloads.sort();
    assert_eq!(payloads, vec!["ALPHA", "BETA", "GAMMA"]);
}

#[tokio::test(start_paused = true)]
async fn test_lowering_concurrency_on_resume() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak_after_resume = Arc::new(AtomicUsize::new(0));

    let mut scheduler: Scheduler<()> = Scheduler::new(config(false, true));
    for _ in 0..6 {
        let (active, peak) = (active.clone(), peak_after_resume.clone());
        scheduler
            .add_job(
                move |_: (), _ctx| async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                },
                (),
            )
            .unwrap();
    }

    let handle = scheduler.start(3).unwrap();
    handle.pause().unwrap();
    tokio::time::sleep(Duration::from_millis(60)).await;

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.recorded, 3);
    assert_eq!(snapshot.peak_running, 3);

    peak_after_resume.store(0, Ordering::SeqCst);
    handle.resume(1).unwrap();
    let report = handle.wait().await.unwrap();

    assert!(report.success());
    assert_eq!(peak_after_resume.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_through_cloned_control() {
    let mut scheduler: Scheduler<u64> = Scheduler::new(config(false, false));
    for _ in 0..5 {
        scheduler.add_job(nap, 10).unwrap();
    }
    let handle = scheduler.start(1).unwrap();
    let control = handle.control();

    tokio::time::sleep(Duration::from_millis(15)).await;
    control.cancel().unwrap();
    let report = handle.wait().await.unwrap();

    assert!(report.cancelled);
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.not_admitted.len(), 3);
    assert_eq!(report.summary.skipped, 3);
    assert!(control.pause().is_err());
}

// =============================================================================
// Event log
// =============================================================================

#[tokio::test]
async fn test_event_log_records_whole_batch() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let mut scheduler: Scheduler<u64> = Scheduler::new(config(false, false));
    let batch_id = scheduler.batch_id();
    let logger = spawn_event_logger(scheduler.subscribe(), temp_dir.path()).unwrap();

    scheduler.add_job(nap, 1).unwrap();
    scheduler
        .add_job(|_: (), _ctx| async { Err(eyre::eyre!("disk full")) }, ())
        .unwrap();

    scheduler.start(2).unwrap().wait().await.unwrap();
    logger.await.unwrap();

    let entries = read_event_log(temp_dir.path(), batch_id).unwrap();
    assert_eq!(entries.len(), 5);
    assert_eq!(entries.iter().filter(|e| e.event_type == "JobStarted").count(), 2);
    assert_eq!(entries.last().unwrap().event_type, "BatchCompleted");
    assert!(entries.iter().any(|e| e.cause.as_deref() == Some("disk full")));
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_records_match_admitted_and_bound_holds(
        durations in proptest::collection::vec(0u64..40, 0..16),
        failures in proptest::collection::vec(any::<bool>(), 16),
        concurrency in 1usize..5,
        stop_on_failure in any::<bool>(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (report, started, peak) = runtime.block_on(async {
            let started = Arc::new(AtomicUsize::new(0));
            let active = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let mut scheduler: Scheduler<()> = Scheduler::new(config(false, stop_on_failure));
            for (i, ms) in durations.iter().copied().enumerate() {
                let fails = failures[i];
                let (started, active, peak) = (started.clone(), active.clone(), peak.clone());
                scheduler
                    .add_job(
                        move |ms: u64, _ctx| async move {
                            started.fetch_add(1, Ordering::SeqCst);
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                            if fails { Err(eyre::eyre!("failed")) } else { Ok(()) }
                        },
                        ms,
                    )
                    .unwrap();
            }

            let report = scheduler.start(concurrency).unwrap().wait().await.unwrap();
            (report, started.load(Ordering::SeqCst), peak.load(Ordering::SeqCst))
        });

        prop_assert_eq!(report.records.len(), started);
        prop_assert_eq!(report.records.len() + report.not_admitted.len(), durations.len());
        prop_assert!(peak <= concurrency);
        prop_assert_eq!(report.summary.skipped, report.not_admitted.len());
        if !stop_on_failure {
            prop_assert!(report.not_admitted.is_empty());
        }
    }
}
