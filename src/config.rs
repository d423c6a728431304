use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{BatchError, BatchResult};

/// Environment prefix for every setting, e.g. `BATCH_MAX_CONCURRENT_JOBS`.
pub const ENV_PREFIX: &str = "BATCH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Worker slots shared by all launched jobs.
    pub max_concurrent_jobs: usize,
    /// How long a done execution stays in the launcher before it is pruned.
    pub finished_retention_secs: u64,
    /// Done executions kept by a `JobExecutor`.
    pub executor_history_limit: usize,
    /// Children of one split running at once; 0 means unbounded.
    pub split_concurrency: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            finished_retention_secs: 300,
            executor_history_limit: 64,
            split_concurrency: 0,
        }
    }
}

impl BatchConfig {
    pub fn finished_retention(&self) -> Duration {
        Duration::from_secs(self.finished_retention_secs)
    }

    pub fn validate(&self) -> BatchResult<()> {
        if self.max_concurrent_jobs == 0 {
            return Err(BatchError::Configuration(
                "max_concurrent_jobs must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    pub fn from_env() -> BatchResult<Self> {
        let mut config = Self::default();

        if let Some(value) = env_setting("MAX_CONCURRENT_JOBS") {
            config.max_concurrent_jobs = value.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid max_concurrent_jobs: {e}"))
            })?;
        }

        if let Some(value) = env_setting("FINISHED_RETENTION_SECS") {
            config.finished_retention_secs = value.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid finished_retention_secs: {e}"))
            })?;
        }

        if let Some(value) = env_setting("EXECUTOR_HISTORY_LIMIT") {
            config.executor_history_limit = value.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid executor_history_limit: {e}"))
            })?;
        }

        if let Some(value) = env_setting("SPLIT_CONCURRENCY") {
            config.split_concurrency = value.parse().map_err(|e| {
                BatchError::Configuration(format!("Invalid split_concurrency: {e}"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load from a file (format picked by extension), with `BATCH_*`
    /// environment variables layered on top.
    pub fn load(path: impl AsRef<Path>) -> BatchResult<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::from(path.as_ref()).required(true))
            .add_source(::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .map_err(|e| BatchError::Configuration(format!("Failed to read configuration: {e}")))?;

        let config: Self = settings
            .try_deserialize()
            .map_err(|e| BatchError::Configuration(format!("Invalid configuration: {e}")))?;

        config.validate()?;
        Ok(config)
    }
}

fn env_setting(name: &str) -> Option<String> {
    std::env::var(format!("{ENV_PREFIX}_{name}")).ok()
}
