//! # Run-time Records
//!
//! [`JobExecution`] is the state machine of one in-flight run of a job:
//!
//! ```text
//! STARTING ──(worker picks up)──▶ STARTED ──(loop ends)──▶ COMPLETED
//!     │                            │  ▲  └──(error)──▶ FAILED
//!     │                    pause() │  │ unpause()
//!     │                            ▼  │
//!     │                     PAUSING ─▶ PAUSED
//!     │                            │
//!     └───────(stop())─────────▶ STOPPING ──(loop observes)──▶ STOPPED
//! ```
//!
//! Status lives in an atomic so listeners, REST handlers and the worker can
//! read it without locking. Every transition is a compare-and-swap guarded by
//! the set of states it may leave from.
//!
//! [`StepExecution`] is the record of one dispatch of a step.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::handler::StepHandler;
use crate::interceptor::StepInterceptor;
use crate::job::Job;
use crate::launcher::{AsyncJobLauncher, LauncherShared};
use crate::listener::StepExecutionListener;
use crate::registry::ListenerRegistry;
use crate::status::JobStatus;
use crate::step::Step;

/// Launcher-provided collaborators frozen into an execution at launch.
pub(crate) struct ExecutionParts {
    pub launcher: Weak<LauncherShared>,
    pub interceptors: Vec<Arc<dyn StepInterceptor>>,
    pub step_handler: Arc<dyn StepHandler>,
    pub step_listeners: Arc<ListenerRegistry<dyn StepExecutionListener>>,
    pub split_concurrency: usize,
}

pub struct JobExecution {
    execution_id: Uuid,
    job: Arc<dyn Job>,
    context: ExecutionContext,
    launcher: Weak<LauncherShared>,
    interceptors: Arc<[Arc<dyn StepInterceptor>]>,
    step_handler: Arc<dyn StepHandler>,
    step_listeners: Arc<ListenerRegistry<dyn StepExecutionListener>>,
    split_concurrency: usize,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    status: AtomicU8,
    status_changed: Notify,
    cancellation_token: CancellationToken,
    completion: watch::Sender<Option<BatchResult<()>>>,
    /// Steps that are also job listeners, in first-seen order.
    listening_steps: Mutex<Vec<Arc<dyn Step>>>,
}

impl JobExecution {
    pub(crate) fn new(job: Arc<dyn Job>, context: ExecutionContext, parts: ExecutionParts) -> Self {
        let (completion, _) = watch::channel(None);

        Self {
            execution_id: Uuid::new_v4(),
            job,
            context,
            launcher: parts.launcher,
            interceptors: parts.interceptors.into(),
            step_handler: parts.step_handler,
            step_listeners: parts.step_listeners,
            split_concurrency: parts.split_concurrency,
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
            status: AtomicU8::new(JobStatus::Starting as u8),
            status_changed: Notify::new(),
            cancellation_token: CancellationToken::new(),
            completion,
            listening_steps: Mutex::new(Vec::new()),
        }
    }

    pub fn execution_id(&self) -> Uuid {
        self.execution_id
    }

    pub fn job(&self) -> &Arc<dyn Job> {
        &self.job
    }

    pub fn job_id(&self) -> &str {
        self.job.id()
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The launcher that owns this run, while it is still alive.
    pub fn launcher(&self) -> Option<AsyncJobLauncher> {
        self.launcher.upgrade().map(AsyncJobLauncher::from_shared)
    }

    /// Interceptors frozen at launch; the launcher's own interceptor is last.
    pub fn interceptors(&self) -> &[Arc<dyn StepInterceptor>] {
        &self.interceptors
    }

    pub fn step_handler(&self) -> &Arc<dyn StepHandler> {
        &self.step_handler
    }

    pub(crate) fn step_listeners(&self) -> Vec<Arc<dyn StepExecutionListener>> {
        self.step_listeners.snapshot()
    }

    pub(crate) fn split_concurrency(&self) -> usize {
        self.split_concurrency
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    /// Time since launch, or the total run time once finished.
    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at().unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    pub fn status(&self) -> JobStatus {
        JobStatus::from(self.status.load(Ordering::Acquire))
    }

    pub fn can_continue(&self) -> bool {
        self.status().can_continue()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_done()
    }

    pub fn is_running(&self) -> bool {
        !self.status().is_terminal()
    }

    pub fn is_stopping(&self) -> bool {
        self.status() == JobStatus::Stopping
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == JobStatus::Stopped
    }

    pub fn is_failed(&self) -> bool {
        self.status() == JobStatus::Failed
    }

    pub fn is_completed(&self) -> bool {
        self.status() == JobStatus::Completed
    }

    pub fn is_paused(&self) -> bool {
        self.status().is_pausing_or_paused()
    }

    /// Request a cooperative stop.
    ///
    /// No-op when the run is already done or already stopping. Otherwise the
    /// status moves to `STOPPING`, the cancellation token fires and the job is
    /// asked to stop its current step. A pause forwarded to the job is lifted
    /// so its steps are not left paused for the next run.
    pub fn stop(&self, may_interrupt_if_running: bool) -> bool {
        let Some(previous) = self.transition(
            |status| !status.is_terminal() && status != JobStatus::Stopping,
            JobStatus::Stopping,
        ) else {
            return false;
        };

        info!(
            job_id = %self.job_id(),
            execution_id = %self.execution_id,
            may_interrupt_if_running,
            "Stopping job"
        );
        self.cancellation_token.cancel();
        self.job.stop(may_interrupt_if_running);

        if previous.is_pausing_or_paused() {
            if let Some(pauseable) = self.job.as_pauseable() {
                pauseable.unpause();
            }
        }

        true
    }

    /// Request a cooperative pause. Only a `STARTED` run can be paused.
    pub fn pause(&self) -> bool {
        let paused = self
            .transition(|status| status == JobStatus::Started, JobStatus::Pausing)
            .is_some();

        if paused {
            debug!(job_id = %self.job_id(), execution_id = %self.execution_id, "Pausing job");
            if let Some(pauseable) = self.job.as_pauseable() {
                pauseable.pause();
            }
        }

        paused
    }

    pub fn unpause(&self) -> bool {
        let resumed = self
            .transition(|status| status.is_pausing_or_paused(), JobStatus::Started)
            .is_some();

        if resumed {
            debug!(job_id = %self.job_id(), execution_id = %self.execution_id, "Unpausing job");
            if let Some(pauseable) = self.job.as_pauseable() {
                pauseable.unpause();
            }
        }

        resumed
    }

    /// Wait until the run reaches a done state.
    ///
    /// Returns `Ok(true)` for completed and stopped runs and the original
    /// failure for failed ones.
    pub async fn wait_for_completion(&self) -> BatchResult<bool> {
        let mut receiver = self.completion.subscribe();

        let outcome = {
            let outcome = receiver
                .wait_for(Option::is_some)
                .await
                .map_err(|_| BatchError::InvalidState("Completion channel closed".to_string()))?;
            (*outcome).clone()
        };

        match outcome {
            Some(Ok(())) => Ok(true),
            Some(Err(error)) => Err(error),
            None => Ok(false),
        }
    }

    /// Like [`JobExecution::wait_for_completion`], returning `Ok(false)` on timeout.
    pub async fn wait_for_completion_timeout(&self, timeout: Duration) -> BatchResult<bool> {
        match tokio::time::timeout(timeout, self.wait_for_completion()).await {
            Ok(result) => result,
            Err(_) => Ok(false),
        }
    }

    /// The failure of a `FAILED` run.
    pub fn failure(&self) -> Option<BatchError> {
        match &*self.completion.borrow() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }

    pub(crate) fn mark_started(&self) -> bool {
        self.transition(|status| status == JobStatus::Starting, JobStatus::Started)
            .is_some()
    }

    /// Park the worker at a step boundary while a pause is in effect.
    pub(crate) async fn wait_while_paused(&self) {
        if self
            .transition(|status| status == JobStatus::Pausing, JobStatus::Paused)
            .is_some()
        {
            debug!(job_id = %self.job_id(), execution_id = %self.execution_id, "Job paused");
        }

        loop {
            let notified = self.status_changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if !self.status().is_pausing_or_paused() {
                return;
            }

            notified.await;
        }
    }

    /// Move to the final status for `outcome` and record the finish time.
    pub(crate) fn finish(&self, outcome: &BatchResult<()>) -> JobStatus {
        let failed = outcome.is_err();
        let previous = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = match JobStatus::from(current) {
                    _ if failed => JobStatus::Failed,
                    JobStatus::Stopping => JobStatus::Stopped,
                    _ => JobStatus::Completed,
                };
                Some(next as u8)
            })
            .unwrap_or_else(|current| current);

        *self.finished_at.lock() = Some(Utc::now());
        self.status_changed.notify_waiters();

        let status = self.status();
        debug!(
            job_id = %self.job_id(),
            from = %JobStatus::from(previous),
            to = %status,
            "Job finished"
        );
        status
    }

    pub(crate) fn complete(&self, outcome: BatchResult<()>) {
        self.completion.send_replace(Some(outcome));
    }

    /// Remember a step that is also a job listener. Returns `true` the first
    /// time the step is seen in this run.
    pub(crate) fn register_listening_step(&self, step: &Arc<dyn Step>) -> bool {
        if step.as_job_listener().is_none() {
            return false;
        }

        let mut steps = self.listening_steps.lock();

        if steps.iter().any(|s| Arc::ptr_eq(s, step)) {
            false
        } else {
            steps.push(step.clone());
            true
        }
    }

    pub(crate) fn listening_steps(&self) -> Vec<Arc<dyn Step>> {
        self.listening_steps.lock().clone()
    }

    fn transition<F>(&self, allowed: F, to: JobStatus) -> Option<JobStatus>
    where
        F: Fn(JobStatus) -> bool,
    {
        let previous = self
            .status
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                allowed(JobStatus::from(current)).then_some(to as u8)
            })
            .ok()?;

        self.status_changed.notify_waiters();
        Some(JobStatus::from(previous))
    }

    pub(crate) fn finished_longer_than(&self, retention: Duration) -> bool {
        self.is_done()
            && self.finished_at().is_some_and(|at| {
                (Utc::now() - at)
                    .to_std()
                    .is_ok_and(|since| since >= retention)
            })
    }
}

impl std::fmt::Debug for JobExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecution")
            .field("execution_id", &self.execution_id)
            .field("job_id", &self.job_id())
            .field("status", &self.status())
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at())
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Record of one dispatch of a step, leaf or composite.
pub struct StepExecution {
    step_execution_id: Uuid,
    step: Arc<dyn Step>,
    job_execution: Arc<JobExecution>,
    started_at: DateTime<Utc>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
}

impl StepExecution {
    pub fn new(step: Arc<dyn Step>, job_execution: Arc<JobExecution>) -> Self {
        Self {
            step_execution_id: Uuid::new_v4(),
            step,
            job_execution,
            started_at: Utc::now(),
            finished_at: Mutex::new(None),
        }
    }

    pub fn step_execution_id(&self) -> Uuid {
        self.step_execution_id
    }

    pub fn step(&self) -> &Arc<dyn Step> {
        &self.step
    }

    pub fn job_execution(&self) -> &Arc<JobExecution> {
        &self.job_execution
    }

    pub fn context(&self) -> &ExecutionContext {
        self.job_execution.context()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        *self.finished_at.lock()
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at().unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }

    pub(crate) fn mark_finished(&self) {
        *self.finished_at.lock() = Some(Utc::now());
    }
}

impl std::fmt::Debug for StepExecution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepExecution")
            .field("step_execution_id", &self.step_execution_id)
            .field("step", &self.step.name())
            .field("job_id", &self.job_execution.job_id())
            .field("started_at", &self.started_at)
            .field("finished_at", &self.finished_at())
            .finish()
    }
}
