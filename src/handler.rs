//! # Step Handler
//!
//! Dispatches one step by structural kind:
//!
//! - **split**: children fan out onto the runtime and are all joined
//! - **flow**: children run in order, each through a recursive `handle`
//! - **leaf**: the interceptor chain is driven until the step reports
//!   `FINISHED`; a `CONTINUABLE` pass re-enters the chain from the top
//!
//! A failure escaping any child propagates unmodified.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, trace};

use crate::error::{BatchError, BatchResult};
use crate::execution::StepExecution;
use crate::interceptor::StepChain;
use crate::listener::notify_isolated;
use crate::logging::log_step_operation;
use crate::status::RepeatStatus;
use crate::step::{Step, StepKind, StepResult};

#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Dispatch the step carried by `step_execution` until it has finished.
    async fn handle(&self, step_execution: &StepExecution) -> StepResult;

    /// Run `steps` one after another on the caller's path.
    async fn handle_flow(&self, steps: &[Arc<dyn Step>], parent: &StepExecution) -> StepResult;

    /// Run `steps` concurrently and wait for all of them.
    async fn handle_split(&self, steps: &[Arc<dyn Step>], parent: &StepExecution) -> StepResult;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultStepHandler;

impl DefaultStepHandler {
    async fn before_step(&self, step_execution: &StepExecution) {
        for listener in step_execution.job_execution().step_listeners() {
            notify_isolated("before_step", listener.before_step(step_execution)).await;
        }
    }

    async fn after_step(&self, step_execution: &StepExecution) {
        for listener in step_execution.job_execution().step_listeners() {
            notify_isolated("after_step", listener.after_step(step_execution)).await;
        }
    }

    async fn run_leaf(&self, step_execution: &StepExecution) -> BatchResult<()> {
        let chain = StepChain::new(step_execution.job_execution().interceptors(), step_execution);
        let mut passes = 0u64;

        loop {
            passes += 1;

            match chain.proceed().await? {
                RepeatStatus::Finished => break,
                RepeatStatus::Continuable => {
                    trace!(step = %step_execution.step().name(), passes, "Step is continuable");
                    tokio::task::yield_now().await;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StepHandler for DefaultStepHandler {
    async fn handle(&self, step_execution: &StepExecution) -> StepResult {
        let step = step_execution.step();
        let job_execution = step_execution.job_execution();

        if job_execution.register_listening_step(step) {
            if let Some(listener) = step.as_job_listener() {
                notify_isolated("before_job", listener.before_job(job_execution)).await;
            }
        }

        let kind = step.kind();
        debug!(step = %step.name(), kind = kind.name(), "Handling step");

        match kind {
            StepKind::Split(children) => {
                self.before_step(step_execution).await;
                let result = self.handle_split(children, step_execution).await;
                self.after_step(step_execution).await;
                result?;
            }
            StepKind::Flow(children) => {
                self.before_step(step_execution).await;
                let result = self.handle_flow(children, step_execution).await;
                self.after_step(step_execution).await;
                result?;
            }
            StepKind::Leaf => self.run_leaf(step_execution).await?,
        }

        step_execution.mark_finished();

        log_step_operation(
            "finished",
            job_execution.job_id(),
            step.name(),
            kind.name(),
            step_execution.elapsed().as_millis() as u64,
        );

        Ok(RepeatStatus::Finished)
    }

    async fn handle_flow(&self, steps: &[Arc<dyn Step>], parent: &StepExecution) -> StepResult {
        let job_execution = parent.job_execution();

        for step in steps {
            if job_execution.is_stopping() {
                debug!(flow = %parent.step().name(), "Stop requested, leaving flow");
                break;
            }

            let child = StepExecution::new(step.clone(), job_execution.clone());
            self.handle(&child).await?;
        }

        Ok(RepeatStatus::Finished)
    }

    async fn handle_split(&self, steps: &[Arc<dyn Step>], parent: &StepExecution) -> StepResult {
        let job_execution = parent.job_execution();
        let limit = match job_execution.split_concurrency() {
            0 => None,
            permits => Some(Arc::new(Semaphore::new(permits))),
        };

        let mut children = JoinSet::new();

        for step in steps {
            let child = StepExecution::new(step.clone(), job_execution.clone());
            let handler = job_execution.step_handler().clone();
            let limit = limit.clone();

            children.spawn(async move {
                let _permit = match limit {
                    Some(limit) => Some(limit.acquire_owned().await.map_err(|_| {
                        BatchError::InvalidState("Split concurrency limiter closed".to_string())
                    })?),
                    None => None,
                };

                handler.handle(&child).await
            });
        }

        // Join every child before reporting, keeping the first failure.
        let mut failure = None;

        while let Some(joined) = children.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(error) if error.is_panic() => Err(BatchError::from_panic(error.into_panic())),
                Err(error) => Err(BatchError::InvalidState(format!("Split child aborted: {error}"))),
            };

            if let Err(error) = result {
                failure.get_or_insert(error);
            }
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(RepeatStatus::Finished),
        }
    }
}
