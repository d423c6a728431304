use std::error::Error as StdError;
use std::sync::Arc;

/// Boxed failure raised by domain step code.
pub type StepFailure = Arc<dyn StdError + Send + Sync + 'static>;

/// Errors produced by the batch engine and by the steps it runs.
///
/// The type is `Clone` so a single terminal outcome can be handed to every
/// caller waiting on the same `JobExecution`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BatchError {
    /// Failure raised by a step, carried unmodified.
    #[error(transparent)]
    Step(StepFailure),

    #[error("Job {job_id} has no more steps")]
    NoMoreSteps { job_id: String },

    #[error("Panicked: {0}")]
    Panicked(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No tokio runtime is available to run jobs")]
    NoRuntime,

    #[error("Job {job_id} not found")]
    NotFound { job_id: String },
}

impl BatchError {
    /// Wrap any error raised by step code.
    pub fn step<E>(error: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self::Step(Arc::from(error.into()))
    }

    /// The original step failure, if this error carries one.
    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        match self {
            Self::Step(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }

    /// Downcast the original step failure to a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.cause().and_then(|cause| cause.downcast_ref::<E>())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };

        Self::Panicked(message)
    }
}

pub type BatchResult<T> = std::result::Result<T, BatchError>;
