//! # Step Interceptors
//!
//! Middleware around every literal leaf step invocation. A [`StepChain`] is a
//! cursor over the interceptors frozen into the job execution at launch; each
//! interceptor decides whether, when and how often to call
//! [`StepChain::proceed`]. The launcher's own interceptor always sits last and
//! is the one that actually calls [`Step::execute`](crate::step::Step::execute).

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::error::BatchError;
use crate::execution::StepExecution;
use crate::step::{Step, StepResult};

#[async_trait]
pub trait StepInterceptor: Send + Sync {
    async fn intercept(&self, chain: &StepChain<'_>) -> StepResult;
}

#[derive(Clone, Copy)]
pub struct StepChain<'a> {
    interceptors: &'a [Arc<dyn StepInterceptor>],
    index: usize,
    step_execution: &'a StepExecution,
}

impl<'a> StepChain<'a> {
    pub fn new(interceptors: &'a [Arc<dyn StepInterceptor>], step_execution: &'a StepExecution) -> Self {
        Self {
            interceptors,
            index: 0,
            step_execution,
        }
    }

    pub fn step(&self) -> &Arc<dyn Step> {
        self.step_execution.step()
    }

    pub fn step_execution(&self) -> &StepExecution {
        self.step_execution
    }

    /// Position of the interceptor that will run on the next `proceed`.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Hand control to the next interceptor in the chain.
    pub async fn proceed(&self) -> StepResult {
        let interceptor = self.interceptors.get(self.index).ok_or_else(|| {
            BatchError::InvalidState(format!(
                "Interceptor chain for step '{}' has no element at {}",
                self.step().name(),
                self.index
            ))
        })?;

        let next = StepChain {
            index: self.index + 1,
            ..*self
        };

        interceptor.intercept(&next).await
    }
}

/// Logs every leaf pass with its duration and outcome.
#[derive(Debug, Default)]
pub struct TracingStepInterceptor;

#[async_trait]
impl StepInterceptor for TracingStepInterceptor {
    async fn intercept(&self, chain: &StepChain<'_>) -> StepResult {
        let started = Instant::now();
        let result = chain.proceed().await;
        let duration_ms = started.elapsed().as_millis() as u64;
        let step_execution = chain.step_execution();

        match &result {
            Ok(status) => debug!(
                job_id = %step_execution.job_execution().job_id(),
                step = %chain.step().name(),
                repeat_status = %status,
                duration_ms,
                "Step pass finished"
            ),
            Err(error) => warn!(
                job_id = %step_execution.job_execution().job_id(),
                step = %chain.step().name(),
                error = %error,
                duration_ms,
                "Step pass failed"
            ),
        }

        result
    }
}
