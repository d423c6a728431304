//! # Job Executor
//!
//! Registry kept by higher-level orchestrators (capture sequencer, DARV
//! alignment, autofocus) to find and control the runs they launched by
//! external key, e.g. "the job operating this camera".
//!
//! Executions are tracked in launch order. Lookups scan most-recent-first
//! and skip done runs; done runs beyond the configured history limit are
//! pruned oldest-first on every launch.

use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::BatchConfig;
use crate::context::ExecutionContext;
use crate::error::{BatchError, BatchResult};
use crate::execution::JobExecution;
use crate::job::Job;
use crate::launcher::JobLauncher;

pub struct JobExecutor {
    launcher: Arc<dyn JobLauncher>,
    executions: RwLock<VecDeque<Arc<JobExecution>>>,
    history_limit: usize,
}

impl JobExecutor {
    pub fn new(launcher: Arc<dyn JobLauncher>, history_limit: usize) -> Self {
        Self {
            launcher,
            executions: RwLock::new(VecDeque::new()),
            history_limit,
        }
    }

    /// Executor keeping `config.executor_history_limit` done runs.
    pub fn with_config(launcher: Arc<dyn JobLauncher>, config: &BatchConfig) -> Self {
        Self::new(launcher, config.executor_history_limit)
    }

    pub fn launcher(&self) -> &Arc<dyn JobLauncher> {
        &self.launcher
    }

    /// Launch `job` through the launcher and track the resulting execution.
    ///
    /// Launching a job whose id is still running returns the running
    /// execution without tracking it twice.
    pub fn launch(&self, job: Arc<dyn Job>, context: Option<ExecutionContext>) -> Arc<JobExecution> {
        let execution = self.launcher.launch(job, context);

        let mut executions = self.executions.write();

        if !executions.iter().any(|e| Arc::ptr_eq(e, &execution)) {
            info!(
                job_id = %execution.job_id(),
                execution_id = %execution.execution_id(),
                "Tracking job execution"
            );
            executions.push_back(execution.clone());
        }

        prune_history(&mut executions, self.history_limit);
        execution
    }

    /// Most recent execution for `job_id`, done or not.
    pub fn find_job_execution(&self, job_id: &str) -> Option<Arc<JobExecution>> {
        self.executions
            .read()
            .iter()
            .rev()
            .find(|e| e.job_id() == job_id)
            .cloned()
    }

    /// Most recent unfinished execution whose job satisfies `predicate`.
    pub fn find_job_execution_with<P>(&self, predicate: P) -> Option<Arc<JobExecution>>
    where
        P: Fn(&dyn Job) -> bool,
    {
        // Snapshot first so the predicate may call back into the executor.
        self.executions()
            .into_iter()
            .rev()
            .filter(|e| !e.is_done())
            .find(|e| predicate(e.job().as_ref()))
    }

    /// Most recent unfinished execution whose job contains any of `keys`.
    pub fn find_job_execution_with_any(&self, keys: &[&str]) -> Option<Arc<JobExecution>> {
        self.find_job_execution_with(|job| keys.iter().any(|key| job.contains(key)))
    }

    pub fn executions(&self) -> Vec<Arc<JobExecution>> {
        self.executions.read().iter().cloned().collect()
    }

    pub fn stop(&self, job_id: &str) -> BatchResult<bool> {
        let execution = self.running(job_id)?;
        Ok(self.launcher.stop(&execution, true))
    }

    pub fn pause(&self, job_id: &str) -> BatchResult<bool> {
        Ok(self.running(job_id)?.pause())
    }

    pub fn unpause(&self, job_id: &str) -> BatchResult<bool> {
        Ok(self.running(job_id)?.unpause())
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.find_job_execution(job_id)
            .is_some_and(|e| e.is_running())
    }

    pub fn is_paused(&self, job_id: &str) -> bool {
        self.find_job_execution(job_id)
            .is_some_and(|e| e.is_paused())
    }

    fn running(&self, job_id: &str) -> BatchResult<Arc<JobExecution>> {
        self.find_job_execution(job_id)
            .filter(|e| !e.is_done())
            .ok_or_else(|| BatchError::NotFound {
                job_id: job_id.to_string(),
            })
    }
}

impl std::fmt::Debug for JobExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobExecutor")
            .field("executions", &self.executions.read().len())
            .field("history_limit", &self.history_limit)
            .finish()
    }
}

fn prune_history(executions: &mut VecDeque<Arc<JobExecution>>, limit: usize) {
    let done = executions.iter().filter(|e| e.is_done()).count();
    let mut excess = done.saturating_sub(limit);

    if excess == 0 {
        return;
    }

    debug!(excess, "Pruning finished executions from history");

    executions.retain(|e| {
        if excess > 0 && e.is_done() {
            excess -= 1;
            false
        } else {
            true
        }
    });
}
