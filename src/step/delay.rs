//! Fixed-duration wait step.
//!
//! The wait advances in ticks. After every tick the step publishes its
//! progress into the execution context and notifies its listeners, so a UI
//! can show a countdown. Time spent paused does not count toward the delay.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::execution::StepExecution;
use crate::latch::PauseLatch;
use crate::listener::{notify_isolated, Pauseable};
use crate::registry::ListenerRegistry;
use crate::status::RepeatStatus;
use crate::step::{Step, StepResult};

pub const DEFAULT_TICK: Duration = Duration::from_millis(500);

/// Observer of [`DelayStep`] ticks.
#[async_trait]
pub trait DelayStepListener: Send + Sync {
    async fn on_delay_elapsed(&self, step: &DelayStep, step_execution: &StepExecution);
}

pub struct DelayStep {
    duration: Duration,
    tick: Duration,
    listeners: ListenerRegistry<dyn DelayStepListener>,
    latch: PauseLatch,
    /// Child of the current run's cancellation token.
    stop_token: Mutex<CancellationToken>,
}

impl DelayStep {
    /// Total delay in milliseconds.
    pub const DELAY_TIME: &'static str = "DELAY.TIME";
    /// Milliseconds left.
    pub const REMAINING_TIME: &'static str = "DELAY.REMAINING_TIME";
    /// Fraction elapsed, from 0.0 to 1.0.
    pub const PROGRESS: &'static str = "DELAY.PROGRESS";

    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            tick: DEFAULT_TICK,
            listeners: ListenerRegistry::new(),
            latch: PauseLatch::new(),
            stop_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Zero ticks are clamped to one millisecond.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn register_listener(&self, listener: Arc<dyn DelayStepListener>) -> bool {
        self.listeners.register(listener)
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn DelayStepListener>) -> bool {
        self.listeners.unregister(listener)
    }

    fn publish(&self, step_execution: &StepExecution, remaining: Duration) {
        let context = step_execution.context();
        let progress = if self.duration.is_zero() {
            1.0
        } else {
            1.0 - remaining.as_secs_f64() / self.duration.as_secs_f64()
        };

        context.insert_duration(Self::DELAY_TIME, self.duration);
        context.insert_duration(Self::REMAINING_TIME, remaining);
        context.insert(Self::PROGRESS, progress.clamp(0.0, 1.0));
    }

    async fn notify_listeners(&self, step_execution: &StepExecution) {
        for listener in self.listeners.snapshot() {
            notify_isolated("on_delay_elapsed", listener.on_delay_elapsed(self, step_execution)).await;
        }
    }

    /// Arm a fresh stop token for this run. A pause left over from an earlier
    /// run is dropped unless the current run is itself pausing.
    fn begin_run(&self, step_execution: &StepExecution) -> CancellationToken {
        let job_execution = step_execution.job_execution();
        let token = job_execution.cancellation_token().child_token();
        *self.stop_token.lock() = token.clone();

        if !job_execution.is_paused() {
            self.latch.unpause();
        }

        token
    }

    /// Sleep up to `period`; returns early when stopped.
    async fn sleep(&self, token: &CancellationToken, period: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = token.cancelled() => {}
        }
    }

    async fn wait_while_paused(&self, token: &CancellationToken) {
        tokio::select! {
            _ = self.latch.wait_while_paused() => {}
            _ = token.cancelled() => {}
        }
    }
}

#[async_trait]
impl Step for DelayStep {
    async fn execute(&self, step_execution: &StepExecution) -> StepResult {
        let token = self.begin_run(step_execution);

        let mut remaining = self.duration;
        self.publish(step_execution, remaining);

        while !remaining.is_zero() && !token.is_cancelled() {
            if self.latch.is_paused() {
                debug!(step = %self.name(), "Delay paused");
                self.wait_while_paused(&token).await;
                continue;
            }

            let period = self.tick.min(remaining);
            let started = tokio::time::Instant::now();
            self.sleep(&token, period).await;

            remaining = remaining.saturating_sub(started.elapsed().min(period));
            self.publish(step_execution, remaining);
            self.notify_listeners(step_execution).await;
        }

        Ok(RepeatStatus::Finished)
    }

    fn stop(&self, _may_interrupt_if_running: bool) {
        self.stop_token.lock().cancel();
    }

    fn name(&self) -> &str {
        "delay"
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        Some(self)
    }
}

impl Pauseable for DelayStep {
    fn pause(&self) {
        self.latch.pause();
    }

    fn unpause(&self) {
        self.latch.unpause();
    }

    fn is_paused(&self) -> bool {
        self.latch.is_paused()
    }
}

impl std::fmt::Debug for DelayStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayStep")
            .field("duration", &self.duration)
            .field("tick", &self.tick)
            .field("listeners", &self.listeners.len())
            .field("paused", &self.latch.is_paused())
            .finish()
    }
}
