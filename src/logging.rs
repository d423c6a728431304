//! # Structured Logging
//!
//! One process-wide `tracing` subscriber, installed once. Library code only
//! emits events; binaries and tests decide whether to call
//! [`init_structured_logging`].

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

use crate::status::JobStatus;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Install the global subscriber.
///
/// The filter comes from `BATCH_LOG` (falling back to an environment-derived
/// level) and `BATCH_LOG_FORMAT=json` switches to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = std::env::var("BATCH_LOG").unwrap_or_else(|_| get_log_level(&environment));
        let json = std::env::var("BATCH_LOG_FORMAT").is_ok_and(|format| format == "json");

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(EnvFilter::new(&filter))
                .boxed()
        };

        // A host application may already own the global subscriber.
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized");
        }

        tracing::info!(environment = %environment, filter = %filter, json, "Structured logging initialized");
    });
}

fn get_environment() -> String {
    std::env::var("BATCH_ENV")
        .or_else(|_| std::env::var("APP_ENV"))
        .unwrap_or_else(|_| "development".to_string())
}

fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

/// Log a job lifecycle record.
pub fn log_job_operation(
    operation: &str,
    job_id: &str,
    execution_id: Uuid,
    status: JobStatus,
    details: Option<&str>,
) {
    tracing::info!(
        operation = %operation,
        job_id = %job_id,
        execution_id = %execution_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "JOB_OPERATION"
    );
}

/// Log a step dispatch record.
pub fn log_step_operation(operation: &str, job_id: &str, step_name: &str, kind: &str, duration_ms: u64) {
    tracing::debug!(
        operation = %operation,
        job_id = %job_id,
        step_name = %step_name,
        kind = %kind,
        duration_ms,
        "STEP_OPERATION"
    );
}
