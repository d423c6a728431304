//! # Job Launcher
//!
//! [`AsyncJobLauncher`] is the scheduler: it deduplicates launches by job id,
//! runs each job on the tokio runtime behind a worker semaphore, drives the
//! top-level step loop and fires lifecycle callbacks.
//!
//! ## Run body
//!
//! 1. wait for a worker permit, then `STARTING → STARTED`
//! 2. `job.before_job`, then every registered job listener
//! 3. while the run can continue and the job has a next step, dispatch it
//!    through the step handler and wait for it to finish completely
//! 4. settle the final status (`COMPLETED`, `STOPPED` or `FAILED`)
//! 5. `job.after_job`, job listeners, then steps that registered themselves
//!    as job listeners during the run
//! 6. publish the outcome to everyone waiting on the execution
//!
//! Panics anywhere in steps 2-3 are caught and reported as `FAILED`.

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, info_span, Instrument};

use crate::config::BatchConfig;
use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::execution::{ExecutionParts, JobExecution, StepExecution};
use crate::handler::{DefaultStepHandler, StepHandler};
use crate::interceptor::{StepChain, StepInterceptor};
use crate::job::Job;
use crate::listener::{notify_isolated, JobExecutionListener, StepExecutionListener};
use crate::logging::log_job_operation;
use crate::registry::ListenerRegistry;
use crate::status::JobStatus;
use crate::step::StepResult;

/// Scheduler contract used by [`JobExecutor`](crate::executor::JobExecutor)
/// and other orchestrators.
pub trait JobLauncher: Send + Sync {
    /// Start `job`, or return the execution already running under its id.
    fn launch(&self, job: Arc<dyn Job>, context: Option<ExecutionContext>) -> Arc<JobExecution>;

    fn stop(&self, job_execution: &JobExecution, may_interrupt_if_running: bool) -> bool {
        job_execution.stop(may_interrupt_if_running)
    }

    /// The latest execution launched for `job_id`.
    fn find(&self, job_id: &str) -> Option<Arc<JobExecution>>;

    fn register_job_execution_listener(&self, listener: Arc<dyn JobExecutionListener>) -> bool;

    fn unregister_job_execution_listener(&self, listener: &Arc<dyn JobExecutionListener>) -> bool;

    fn register_step_execution_listener(&self, listener: Arc<dyn StepExecutionListener>) -> bool;

    fn unregister_step_execution_listener(&self, listener: &Arc<dyn StepExecutionListener>) -> bool;

    fn register_step_interceptor(&self, interceptor: Arc<dyn StepInterceptor>) -> bool;

    fn unregister_step_interceptor(&self, interceptor: &Arc<dyn StepInterceptor>) -> bool;
}

pub(crate) struct LauncherShared {
    config: BatchConfig,
    runtime: Handle,
    workers: Arc<Semaphore>,
    jobs: DashMap<String, Arc<JobExecution>>,
    job_listeners: ListenerRegistry<dyn JobExecutionListener>,
    step_listeners: Arc<ListenerRegistry<dyn StepExecutionListener>>,
    step_interceptors: ListenerRegistry<dyn StepInterceptor>,
    step_handler: RwLock<Arc<dyn StepHandler>>,
}

#[derive(Clone)]
pub struct AsyncJobLauncher {
    shared: Arc<LauncherShared>,
}

impl AsyncJobLauncher {
    /// Create a launcher on the current tokio runtime.
    pub fn new(config: BatchConfig) -> BatchResult<Self> {
        let runtime = Handle::try_current().map_err(|_| BatchError::NoRuntime)?;
        Self::with_handle(runtime, config)
    }

    pub fn with_handle(runtime: Handle, config: BatchConfig) -> BatchResult<Self> {
        config.validate()?;

        info!(
            max_concurrent_jobs = config.max_concurrent_jobs,
            split_concurrency = config.split_concurrency,
            "Job launcher initialized"
        );

        Ok(Self {
            shared: Arc::new(LauncherShared {
                workers: Arc::new(Semaphore::new(config.max_concurrent_jobs)),
                config,
                runtime,
                jobs: DashMap::new(),
                job_listeners: ListenerRegistry::new(),
                step_listeners: Arc::new(ListenerRegistry::new()),
                step_interceptors: ListenerRegistry::new(),
                step_handler: RwLock::new(Arc::new(DefaultStepHandler)),
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<LauncherShared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.shared.config
    }

    /// Replace the handler used by executions launched from now on.
    pub fn set_step_handler(&self, handler: Arc<dyn StepHandler>) {
        *self.shared.step_handler.write() = handler;
    }

    pub fn step_handler(&self) -> Arc<dyn StepHandler> {
        self.shared.step_handler.read().clone()
    }

    /// Number of tracked executions, done or not.
    pub fn len(&self) -> usize {
        self.shared.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.jobs.is_empty()
    }

    pub fn executions(&self) -> Vec<Arc<JobExecution>> {
        self.shared
            .jobs
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn contains(&self, job_execution: &JobExecution) -> bool {
        self.shared
            .jobs
            .get(job_execution.job_id())
            .is_some_and(|entry| entry.execution_id() == job_execution.execution_id())
    }

    /// Request a stop on every tracked execution.
    pub fn stop_all(&self, may_interrupt_if_running: bool) {
        for execution in self.executions() {
            execution.stop(may_interrupt_if_running);
        }
    }

    /// Drop done executions that finished longer ago than the retention window.
    pub fn prune_finished(&self) -> usize {
        let retention = self.shared.config.finished_retention();

        let before = self.shared.jobs.len();
        self.shared
            .jobs
            .retain(|_, execution| !execution.finished_longer_than(retention));
        let pruned = before.saturating_sub(self.shared.jobs.len());

        if pruned > 0 {
            debug!(pruned, "Pruned finished job executions");
        }

        pruned
    }

    fn create_execution(&self, job: Arc<dyn Job>, context: Option<ExecutionContext>) -> Arc<JobExecution> {
        let mut interceptors = self.shared.step_interceptors.snapshot();
        interceptors.push(Arc::new(LauncherStepInterceptor {
            step_listeners: self.shared.step_listeners.clone(),
        }));

        let parts = ExecutionParts {
            launcher: Arc::downgrade(&self.shared),
            interceptors,
            step_handler: self.step_handler(),
            step_listeners: self.shared.step_listeners.clone(),
            split_concurrency: self.shared.config.split_concurrency,
        };

        Arc::new(JobExecution::new(job, context.unwrap_or_default(), parts))
    }

    fn spawn(&self, execution: Arc<JobExecution>) {
        let span = info_span!(
            "job",
            job_id = %execution.job_id(),
            execution_id = %execution.execution_id()
        );

        self.shared
            .runtime
            .spawn(run_job(self.shared.clone(), execution).instrument(span));
    }
}

impl JobLauncher for AsyncJobLauncher {
    fn launch(&self, job: Arc<dyn Job>, context: Option<ExecutionContext>) -> Arc<JobExecution> {
        self.prune_finished();

        let execution = match self.shared.jobs.entry(job.id().to_string()) {
            Entry::Occupied(entry) if !entry.get().is_done() => {
                debug!(job_id = %entry.key(), "Job is already running, reusing its execution");
                return entry.get().clone();
            }
            Entry::Occupied(mut entry) => {
                let execution = self.create_execution(job, context);
                entry.insert(execution.clone());
                execution
            }
            Entry::Vacant(entry) => {
                let execution = self.create_execution(job, context);
                entry.insert(execution.clone());
                execution
            }
        };

        log_job_operation(
            "launched",
            execution.job_id(),
            execution.execution_id(),
            execution.status(),
            None,
        );

        self.spawn(execution.clone());
        execution
    }

    fn find(&self, job_id: &str) -> Option<Arc<JobExecution>> {
        self.shared.jobs.get(job_id).map(|entry| entry.value().clone())
    }

    fn register_job_execution_listener(&self, listener: Arc<dyn JobExecutionListener>) -> bool {
        self.shared.job_listeners.register(listener)
    }

    fn unregister_job_execution_listener(&self, listener: &Arc<dyn JobExecutionListener>) -> bool {
        self.shared.job_listeners.unregister(listener)
    }

    fn register_step_execution_listener(&self, listener: Arc<dyn StepExecutionListener>) -> bool {
        self.shared.step_listeners.register(listener)
    }

    fn unregister_step_execution_listener(&self, listener: &Arc<dyn StepExecutionListener>) -> bool {
        self.shared.step_listeners.unregister(listener)
    }

    fn register_step_interceptor(&self, interceptor: Arc<dyn StepInterceptor>) -> bool {
        self.shared.step_interceptors.register(interceptor)
    }

    fn unregister_step_interceptor(&self, interceptor: &Arc<dyn StepInterceptor>) -> bool {
        self.shared.step_interceptors.unregister(interceptor)
    }
}

impl std::fmt::Debug for AsyncJobLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncJobLauncher")
            .field("config", &self.shared.config)
            .field("jobs", &self.shared.jobs.len())
            .field("job_listeners", &self.shared.job_listeners.len())
            .field("step_listeners", &self.shared.step_listeners.len())
            .field("step_interceptors", &self.shared.step_interceptors.len())
            .finish()
    }
}

/// Terminal element of every chain: brackets the literal step call with the
/// step listeners.
struct LauncherStepInterceptor {
    step_listeners: Arc<ListenerRegistry<dyn StepExecutionListener>>,
}

#[async_trait]
impl StepInterceptor for LauncherStepInterceptor {
    async fn intercept(&self, chain: &StepChain<'_>) -> StepResult {
        let step_execution = chain.step_execution();
        let listeners = self.step_listeners.snapshot();

        for listener in &listeners {
            notify_isolated("before_step", listener.before_step(step_execution)).await;
        }

        let result = chain.step().execute(step_execution).await;

        for listener in &listeners {
            notify_isolated("after_step", listener.after_step(step_execution)).await;
        }

        result
    }
}

async fn run_job(shared: Arc<LauncherShared>, execution: Arc<JobExecution>) {
    let _permit = match shared.workers.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            error!("Worker pool closed before the job could start");
            execution.finish(&Err(BatchError::InvalidState("Worker pool closed".to_string())));
            execution.complete(Err(BatchError::InvalidState("Worker pool closed".to_string())));
            return;
        }
    };

    let started = execution.mark_started();

    let outcome = if started {
        log_job_operation(
            "started",
            execution.job_id(),
            execution.execution_id(),
            execution.status(),
            None,
        );

        AssertUnwindSafe(drive_steps(&shared, &execution))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(BatchError::from_panic(payload)))
    } else {
        debug!("Job stopped before a worker picked it up");
        Ok(())
    };

    let status = execution.finish(&outcome);

    match &outcome {
        Ok(()) => log_job_operation(
            "finished",
            execution.job_id(),
            execution.execution_id(),
            status,
            None,
        ),
        Err(failure) => error!(
            job_id = %execution.job_id(),
            execution_id = %execution.execution_id(),
            status = %status,
            error = %failure,
            "Job failed"
        ),
    }

    if started {
        let job = execution.job().clone();
        notify_isolated("after_job", job.after_job(&execution)).await;

        for listener in shared.job_listeners.snapshot() {
            notify_isolated("after_job", listener.after_job(&execution)).await;
        }

        for step in execution.listening_steps() {
            if let Some(listener) = step.as_job_listener() {
                notify_isolated("after_job", listener.after_job(&execution)).await;
            }
        }
    }

    execution.complete(outcome);
}

async fn drive_steps(shared: &LauncherShared, execution: &Arc<JobExecution>) -> BatchResult<()> {
    let job = execution.job().clone();

    job.before_job(execution).await;

    for listener in shared.job_listeners.snapshot() {
        notify_isolated("before_job", listener.before_job(execution)).await;
    }

    loop {
        match execution.status() {
            JobStatus::Started => {}
            JobStatus::Pausing | JobStatus::Paused => {
                execution.wait_while_paused().await;
                continue;
            }
            _ => break,
        }

        if !job.has_next(execution) {
            break;
        }

        let step = job.next(execution)?;
        let step_execution = StepExecution::new(step, execution.clone());

        execution.step_handler().handle(&step_execution).await?;
    }

    Ok(())
}
