//! # Jobs
//!
//! A [`Job`] is an ordered producer of steps with a stable identity. The
//! launcher uses the identity to deduplicate runs and drives the cursor from a
//! single worker, so `has_next`/`next` never race with each other.
//! `stop`, `pause` and friends may arrive from any thread.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{BatchError, BatchResult};
use crate::execution::JobExecution;
use crate::listener::Pauseable;
use crate::step::Step;

#[async_trait]
pub trait Job: Send + Sync {
    /// Identity used to deduplicate runs.
    fn id(&self) -> &str;

    fn has_next(&self, job_execution: &JobExecution) -> bool;

    /// Produce the next step. Fails with [`BatchError::NoMoreSteps`] once
    /// `has_next` reports `false`.
    fn next(&self, job_execution: &JobExecution) -> BatchResult<Arc<dyn Step>>;

    async fn before_job(&self, job_execution: &JobExecution) {
        let _ = job_execution;
    }

    async fn after_job(&self, job_execution: &JobExecution) {
        let _ = job_execution;
    }

    fn stop(&self, may_interrupt_if_running: bool) {
        let _ = may_interrupt_if_running;
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        None
    }

    /// Whether this job operates on the domain object identified by `key`
    /// (a camera, a guide output...).
    fn contains(&self, key: &str) -> bool {
        let _ = key;
        false
    }
}

#[derive(Default)]
struct Cursor {
    position: usize,
    current: Option<Arc<dyn Step>>,
}

/// Job over a fixed list of steps.
///
/// Domain jobs usually wrap a `SimpleJob` and forward the cursor methods,
/// adding their own `before_job`/`after_job` behaviour.
pub struct SimpleJob {
    id: String,
    steps: Vec<Arc<dyn Step>>,
    keys: Vec<String>,
    cursor: Mutex<Cursor>,
}

impl SimpleJob {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            steps: Vec::new(),
            keys: Vec::new(),
            cursor: Mutex::new(Cursor::default()),
        }
    }

    pub fn with_steps(id: impl Into<String>, steps: impl IntoIterator<Item = Arc<dyn Step>>) -> Self {
        let mut job = Self::new(id);
        job.extend(steps);
        job
    }

    /// Tag the job with a domain key consulted by [`Job::contains`].
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.keys.push(key.into());
        self
    }

    pub fn then(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add(&mut self, step: Arc<dyn Step>) {
        self.steps.push(step);
    }

    pub fn extend(&mut self, steps: impl IntoIterator<Item = Arc<dyn Step>>) {
        self.steps.extend(steps);
    }

    /// Remove every step and rewind the cursor.
    pub fn clear(&mut self) {
        self.steps.clear();
        self.reset();
    }

    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Index of the next step to be produced.
    pub fn position(&self) -> usize {
        self.cursor.lock().position
    }

    /// The step most recently produced by `next`.
    pub fn current(&self) -> Option<Arc<dyn Step>> {
        self.cursor.lock().current.clone()
    }

    pub fn reset(&self) {
        *self.cursor.lock() = Cursor::default();
    }
}

#[async_trait]
impl Job for SimpleJob {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_next(&self, _job_execution: &JobExecution) -> bool {
        self.cursor.lock().position < self.steps.len()
    }

    fn next(&self, _job_execution: &JobExecution) -> BatchResult<Arc<dyn Step>> {
        let mut cursor = self.cursor.lock();

        let step = self
            .steps
            .get(cursor.position)
            .cloned()
            .ok_or_else(|| BatchError::NoMoreSteps {
                job_id: self.id.clone(),
            })?;

        cursor.position += 1;
        cursor.current = Some(step.clone());
        Ok(step)
    }

    /// Rewinds the cursor so the same instance can be launched again.
    async fn before_job(&self, _job_execution: &JobExecution) {
        self.reset();
    }

    fn stop(&self, may_interrupt_if_running: bool) {
        if let Some(step) = self.current() {
            step.stop(may_interrupt_if_running);
        }
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        Some(self)
    }

    fn contains(&self, key: &str) -> bool {
        self.keys.iter().any(|k| k == key)
    }
}

impl Pauseable for SimpleJob {
    fn pause(&self) {
        if let Some(pauseable) = self.current().as_deref().and_then(|step| step.as_pauseable()) {
            pauseable.pause();
        }
    }

    fn unpause(&self) {
        if let Some(pauseable) = self.current().as_deref().and_then(|step| step.as_pauseable()) {
            pauseable.unpause();
        }
    }

    fn is_paused(&self) -> bool {
        self.current()
            .as_deref()
            .and_then(|step| step.as_pauseable())
            .is_some_and(|pauseable| pauseable.is_paused())
    }
}

impl std::fmt::Debug for SimpleJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleJob")
            .field("id", &self.id)
            .field("steps", &self.steps.len())
            .field("position", &self.position())
            .field("keys", &self.keys)
            .finish()
    }
}
