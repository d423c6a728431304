#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Nebula Batch
//!
//! Asynchronous job/step engine driving long-running instrument workflows
//! (capture sequences, polar alignment, autofocus) on a tokio runtime.
//!
//! ## Overview
//!
//! A [`Job`] is an ordered producer of [`Step`]s. Launching a job through an
//! [`AsyncJobLauncher`] yields a [`JobExecution`]: the live record of the run,
//! with its status, shared [`ExecutionContext`] and completion future. Each
//! step is dispatched by a [`StepHandler`], which recognizes composite
//! [`FlowStep`]s (sequential) and [`SplitStep`]s (concurrent, joined) and runs
//! leaf steps through the ordered [`StepInterceptor`] chain until they report
//! [`RepeatStatus::Finished`].
//!
//! ## Module Organization
//!
//! - [`launcher`] - Worker pool, deduplication and the job run loop
//! - [`execution`] - Job and step run records and the status machine
//! - [`handler`] - Step dispatch for leaf, flow and split steps
//! - [`interceptor`] - Ordered middleware around leaf step passes
//! - [`job`] / [`step`] - Domain contracts plus `SimpleJob` and `DelayStep`
//! - [`executor`] - Lookup and control facade over a launcher
//! - [`config`] / [`logging`] / [`error`] - Ambient runtime support
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nebula_batch::{AsyncJobLauncher, BatchConfig, DelayStep, JobLauncher, SimpleJob, Step};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> nebula_batch::BatchResult<()> {
//! let launcher = AsyncJobLauncher::new(BatchConfig::default())?;
//!
//! let job = SimpleJob::new("initial-pause")
//!     .then(Arc::new(DelayStep::new(Duration::from_secs(2))) as Arc<dyn Step>);
//!
//! let execution = launcher.launch(Arc::new(job), None);
//! assert!(execution.wait_for_completion().await?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod execution;
pub mod executor;
pub mod handler;
pub mod interceptor;
pub mod job;
pub mod latch;
pub mod launcher;
pub mod listener;
pub mod logging;
pub mod registry;
pub mod status;
pub mod step;

pub use config::BatchConfig;
pub use context::ExecutionContext;
pub use error::{BatchError, BatchResult, StepFailure};
pub use execution::{JobExecution, StepExecution};
pub use executor::JobExecutor;
pub use handler::{DefaultStepHandler, StepHandler};
pub use interceptor::{StepChain, StepInterceptor, TracingStepInterceptor};
pub use job::{Job, SimpleJob};
pub use latch::PauseLatch;
pub use launcher::{AsyncJobLauncher, JobLauncher};
pub use listener::{JobExecutionListener, Pauseable, StepExecutionListener};
pub use logging::init_structured_logging;
pub use registry::ListenerRegistry;
pub use status::{JobStatus, RepeatStatus};
pub use step::{DelayStep, DelayStepListener, FlowStep, SplitStep, Step, StepKind, StepResult};
