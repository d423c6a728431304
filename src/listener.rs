//! Lifecycle observer contracts and the pause capability.
//!
//! Messaging layers (UI event streams, REST progress endpoints) implement
//! these to publish progress; the engine only calls them.

use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use tracing::warn;

use crate::execution::{JobExecution, StepExecution};

/// Observer of job run boundaries.
#[async_trait]
pub trait JobExecutionListener: Send + Sync {
    async fn before_job(&self, job_execution: &JobExecution) {
        let _ = job_execution;
    }

    async fn after_job(&self, job_execution: &JobExecution) {
        let _ = job_execution;
    }
}

/// Observer of every literal leaf step invocation.
#[async_trait]
pub trait StepExecutionListener: Send + Sync {
    async fn before_step(&self, step_execution: &StepExecution) {
        let _ = step_execution;
    }

    async fn after_step(&self, step_execution: &StepExecution) {
        let _ = step_execution;
    }
}

/// Cooperative pause capability of a job or step.
pub trait Pauseable: Send + Sync {
    fn pause(&self);

    fn unpause(&self);

    fn is_paused(&self) -> bool;
}

/// Run one listener callback, logging and swallowing a panic so the
/// remaining listeners of the same phase still run.
pub(crate) async fn notify_isolated<F>(phase: &'static str, callback: F)
where
    F: Future<Output = ()>,
{
    if let Err(payload) = AssertUnwindSafe(callback).catch_unwind().await {
        let error = crate::error::BatchError::from_panic(payload);
        warn!(phase, error = %error, "Listener failed, continuing with remaining listeners");
    }
}
