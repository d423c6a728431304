//! Delay Step Tests

mod common;

use async_trait::async_trait;
use common::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_test::assert_ok;

use nebula_batch::{DelayStep, DelayStepListener, JobLauncher, Step, StepExecution};

/// Records the remaining time seen on every tick.
#[derive(Default)]
struct TickRecorder {
    remaining: Mutex<Vec<u64>>,
}

#[async_trait]
impl DelayStepListener for TickRecorder {
    async fn on_delay_elapsed(&self, _step: &DelayStep, step_execution: &StepExecution) {
        let remaining = step_execution
            .context()
            .get_duration(DelayStep::REMAINING_TIME)
            .expect("remaining time is published before listeners run");
        self.remaining.lock().push(remaining.as_millis() as u64);
    }
}

fn delay_job(id: &str, step: Arc<DelayStep>) -> Arc<MathJob> {
    Arc::new(MathJob::new(id, vec![step as Arc<dyn Step>]))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn delay_publishes_progress_and_notifies_each_tick() {
    let step = Arc::new(DelayStep::new(Duration::from_millis(200)).with_tick(Duration::from_millis(50)));
    let recorder = Arc::new(TickRecorder::default());
    assert!(step.register_listener(recorder.clone()));

    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("ticks", step), None);
    assert!(assert_ok!(execution.wait_for_completion().await));

    assert_eq!(*recorder.remaining.lock(), [150, 100, 50, 0]);

    let context = execution.context();
    assert_eq!(context.get_duration(DelayStep::DELAY_TIME), Some(Duration::from_millis(200)));
    assert_eq!(context.get_duration(DelayStep::REMAINING_TIME), Some(Duration::ZERO));
    assert_eq!(context.get_f64(DelayStep::PROGRESS), Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_delay_finishes_without_ticks() {
    let step = Arc::new(DelayStep::new(Duration::ZERO));
    let recorder = Arc::new(TickRecorder::default());
    step.register_listener(recorder.clone());

    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("zero", step), None);
    assert!(assert_ok!(execution.wait_for_completion().await));

    assert!(recorder.remaining.lock().is_empty());
    assert_eq!(execution.context().get_f64(DelayStep::PROGRESS), Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_the_job_cuts_the_delay_short() {
    let step = Arc::new(DelayStep::new(Duration::from_secs(10)));
    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("long", step), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped_at = Instant::now();
    assert!(execution.stop(true));

    assert!(assert_ok!(execution.wait_for_completion().await));
    assert!(execution.is_stopped());
    assert!(stopped_at.elapsed() < Duration::from_secs(1));

    let remaining = execution
        .context()
        .get_duration(DelayStep::REMAINING_TIME)
        .expect("remaining time");
    assert!(remaining > Duration::from_secs(8));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stopping_the_step_wakes_it_mid_tick() {
    let step = Arc::new(DelayStep::new(Duration::from_secs(10)).with_tick(Duration::from_secs(5)));
    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("step-stop", step.clone()), None);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped_at = Instant::now();
    step.stop(true);

    assert!(assert_ok!(execution.wait_for_completion_timeout(Duration::from_secs(1)).await));
    assert!(execution.is_completed());
    assert!(stopped_at.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_from_an_earlier_run_does_not_carry_over() {
    let step = Arc::new(DelayStep::new(Duration::from_millis(100)).with_tick(Duration::from_millis(20)));
    step.stop(true);

    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("fresh", step), None);
    assert!(assert_ok!(execution.wait_for_completion().await));

    assert_eq!(execution.context().get_f64(DelayStep::PROGRESS), Some(1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn paused_time_does_not_count() {
    let step = Arc::new(DelayStep::new(Duration::from_millis(200)).with_tick(Duration::from_millis(20)));
    let launcher = launcher_with_workers(1);
    let started = Instant::now();
    let execution = launcher.launch(delay_job("paused", step), None);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(execution.pause());
    tokio::time::sleep(Duration::from_millis(300)).await;

    let progress = execution.context().get_f64(DelayStep::PROGRESS).unwrap_or_default();
    assert!(progress < 1.0);
    assert!(!execution.is_done());

    assert!(execution.unpause());
    assert!(assert_ok!(execution.wait_for_completion().await));
    assert!(started.elapsed() >= Duration::from_millis(450));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unregistered_listener_is_not_notified() {
    let step = Arc::new(DelayStep::new(Duration::from_millis(40)).with_tick(Duration::from_millis(10)));
    let recorder = Arc::new(TickRecorder::default());
    let listener: Arc<dyn DelayStepListener> = recorder.clone();

    assert!(step.register_listener(listener.clone()));
    assert!(step.unregister_listener(&listener));

    let launcher = launcher_with_workers(1);
    let execution = launcher.launch(delay_job("silent", step), None);
    assert_ok!(execution.wait_for_completion().await);

    assert!(recorder.remaining.lock().is_empty());
}
