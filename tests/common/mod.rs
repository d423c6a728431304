//! Shared jobs, steps and observers for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nebula_batch::{
    AsyncJobLauncher, BatchConfig, BatchError, BatchResult, Job, JobExecution,
    JobExecutionListener, Pauseable, RepeatStatus, SimpleJob, Step, StepChain, StepExecution,
    StepExecutionListener, StepInterceptor, StepResult,
};

pub const VALUE: &str = "VALUE";

/// Children used by the split and flow fixtures.
pub const N: usize = 4;

pub fn launcher_with_workers(workers: usize) -> AsyncJobLauncher {
    let config = BatchConfig {
        max_concurrent_jobs: workers,
        ..BatchConfig::default()
    };

    AsyncJobLauncher::new(config).expect("tests run inside a tokio runtime")
}

pub fn value_of(execution: &JobExecution) -> f64 {
    execution.context().get_f64(VALUE).unwrap_or_default()
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct IllegalState(pub String);

/// Job seeding `VALUE` before its first step runs.
pub struct MathJob {
    inner: SimpleJob,
    initial_value: f64,
}

impl MathJob {
    pub fn new(id: &str, steps: Vec<Arc<dyn Step>>) -> Self {
        Self::with_initial_value(id, steps, 0.0)
    }

    pub fn with_initial_value(id: &str, steps: Vec<Arc<dyn Step>>, initial_value: f64) -> Self {
        Self {
            inner: SimpleJob::with_steps(id, steps),
            initial_value,
        }
    }

    pub fn with_key(mut self, key: &str) -> Self {
        self.inner = self.inner.with_key(key);
        self
    }
}

#[async_trait]
impl Job for MathJob {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn has_next(&self, job_execution: &JobExecution) -> bool {
        self.inner.has_next(job_execution)
    }

    fn next(&self, job_execution: &JobExecution) -> BatchResult<Arc<dyn Step>> {
        self.inner.next(job_execution)
    }

    async fn before_job(&self, job_execution: &JobExecution) {
        self.inner.before_job(job_execution).await;
        job_execution.context().insert(VALUE, self.initial_value);
    }

    fn stop(&self, may_interrupt_if_running: bool) {
        self.inner.stop(may_interrupt_if_running);
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        self.inner.as_pauseable()
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.contains(key)
    }
}

/// Adds one to `VALUE` after a short wait. Values in `10..19` ask to be
/// called again, so a run seeded with 10 ends at 20.
pub struct SumStep {
    delay: Duration,
    executions: AtomicUsize,
}

impl SumStep {
    pub fn new() -> Self {
        Self::with_delay(Duration::from_millis(10))
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            executions: AtomicUsize::new(0),
        }
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for SumStep {
    async fn execute(&self, step_execution: &StepExecution) -> StepResult {
        let token = step_execution.job_execution().cancellation_token();

        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = token.cancelled() => return Ok(RepeatStatus::Finished),
        }

        self.executions.fetch_add(1, Ordering::SeqCst);

        let mut previous = 0.0;
        step_execution.context().update(VALUE, |value| {
            previous = value.and_then(Value::as_f64).unwrap_or_default();
            json!(previous + 1.0)
        });

        if (10.0..19.0).contains(&previous) {
            Ok(RepeatStatus::Continuable)
        } else {
            Ok(RepeatStatus::Finished)
        }
    }

    fn name(&self) -> &str {
        "sum"
    }
}

pub fn sum_steps(count: usize) -> Vec<Arc<dyn Step>> {
    (0..count)
        .map(|_| Arc::new(SumStep::new()) as Arc<dyn Step>)
        .collect()
}

/// Records its name and finishes.
pub struct NamedStep {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl NamedStep {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

#[async_trait]
impl Step for NamedStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        self.log.lock().push(self.name.clone());
        Ok(RepeatStatus::Finished)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct NoOpStep;

#[async_trait]
impl Step for NoOpStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        Ok(RepeatStatus::Finished)
    }
}

pub struct FailingStep;

#[async_trait]
impl Step for FailingStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        Err(BatchError::step(IllegalState("boom".to_string())))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

pub struct PanickingStep;

#[async_trait]
impl Step for PanickingStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        panic!("step exploded");
    }
}

/// Never finishes on its own.
pub struct ForeverStep {
    passes: AtomicUsize,
}

impl ForeverStep {
    pub fn new() -> Self {
        Self {
            passes: AtomicUsize::new(0),
        }
    }

    pub fn passes(&self) -> usize {
        self.passes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for ForeverStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        self.passes.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(1)).await;
        Ok(RepeatStatus::Continuable)
    }
}

/// Tracks how many instances sharing one gauge run at the same time.
#[derive(Default)]
pub struct InFlightGauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlightGauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Sleeps for a fixed time while counted in its gauge.
pub struct InFlightStep {
    delay: Duration,
    gauge: Arc<InFlightGauge>,
}

impl InFlightStep {
    pub fn new(delay: Duration, gauge: Arc<InFlightGauge>) -> Self {
        Self { delay, gauge }
    }
}

#[async_trait]
impl Step for InFlightStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        Ok(RepeatStatus::Finished)
    }

    fn name(&self) -> &str {
        "in-flight"
    }
}

/// Runs until its own `stop` is called; ignores the cancellation token.
pub struct StopAwareStep {
    stopped: AtomicBool,
    stops: AtomicUsize,
}

impl StopAwareStep {
    pub fn new() -> Self {
        Self {
            stopped: AtomicBool::new(false),
            stops: AtomicUsize::new(0),
        }
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for StopAwareStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        while !self.stopped.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(RepeatStatus::Finished)
    }

    fn stop(&self, _may_interrupt_if_running: bool) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.stopped.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> &str {
        "stop-aware"
    }
}

/// Leaf step that runs a composite by calling its `execute` directly.
pub struct WrappingStep {
    inner: Arc<dyn Step>,
}

impl WrappingStep {
    pub fn new(inner: Arc<dyn Step>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Step for WrappingStep {
    async fn execute(&self, step_execution: &StepExecution) -> StepResult {
        self.inner.execute(step_execution).await
    }

    fn name(&self) -> &str {
        "wrapping"
    }
}

/// Job and step observer appending `phase:subject` entries to a shared log.
pub struct RecordingListener {
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingListener {
    pub fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl JobExecutionListener for RecordingListener {
    async fn before_job(&self, job_execution: &JobExecution) {
        self.log.lock().push(format!("before_job:{}", job_execution.job_id()));
    }

    async fn after_job(&self, job_execution: &JobExecution) {
        self.log
            .lock()
            .push(format!("after_job:{}:{}", job_execution.job_id(), job_execution.status()));
    }
}

#[async_trait]
impl StepExecutionListener for RecordingListener {
    async fn before_step(&self, step_execution: &StepExecution) {
        self.log
            .lock()
            .push(format!("before_step:{}", step_execution.step().name()));
    }

    async fn after_step(&self, step_execution: &StepExecution) {
        self.log
            .lock()
            .push(format!("after_step:{}", step_execution.step().name()));
    }
}

pub struct PanickingListener;

#[async_trait]
impl StepExecutionListener for PanickingListener {
    async fn before_step(&self, _step_execution: &StepExecution) {
        panic!("listener exploded");
    }
}

/// Interceptor logging its name on every pass before proceeding.
pub struct RecordingInterceptor {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl RecordingInterceptor {
    pub fn new(name: &str, log: Arc<Mutex<Vec<String>>>) -> Self {
        Self {
            name: name.to_string(),
            log,
        }
    }
}

#[async_trait]
impl StepInterceptor for RecordingInterceptor {
    async fn intercept(&self, chain: &StepChain<'_>) -> StepResult {
        self.log
            .lock()
            .push(format!("{}:{}", self.name, chain.step().name()));
        chain.proceed().await
    }
}

/// Step that is also a job listener.
pub struct ListeningStep {
    log: Arc<Mutex<Vec<String>>>,
}

impl ListeningStep {
    pub fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl Step for ListeningStep {
    async fn execute(&self, _step_execution: &StepExecution) -> StepResult {
        self.log.lock().push("execute:listening".to_string());
        Ok(RepeatStatus::Finished)
    }

    fn name(&self) -> &str {
        "listening"
    }

    fn as_job_listener(&self) -> Option<&dyn JobExecutionListener> {
        Some(self)
    }
}

#[async_trait]
impl JobExecutionListener for ListeningStep {
    async fn before_job(&self, _job_execution: &JobExecution) {
        self.log.lock().push("step_before_job:listening".to_string());
    }

    async fn after_job(&self, _job_execution: &JobExecution) {
        self.log.lock().push("step_after_job:listening".to_string());
    }
}

pub fn shared_log() -> Arc<Mutex<Vec<String>>> {
    Arc::new(Mutex::new(Vec::new()))
}
