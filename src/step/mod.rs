//! # Steps
//!
//! A [`Step`] is one unit of work. Leaf steps do the work in
//! [`Step::execute`]; the two composite kinds only describe structure and let
//! the [`StepHandler`](crate::handler::StepHandler) drive their children:
//!
//! - [`FlowStep`] runs its children strictly in order.
//! - [`SplitStep`] runs its children concurrently and joins all of them.
//!
//! The handler resolves the structure once through [`Step::kind`], so domain
//! code never needs to downcast.

pub mod delay;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::BatchResult;
use crate::execution::StepExecution;
use crate::listener::{JobExecutionListener, Pauseable};
use crate::status::RepeatStatus;

pub use delay::{DelayStep, DelayStepListener};

pub type StepResult = BatchResult<RepeatStatus>;

/// Structural kind of a step.
#[derive(Clone, Copy)]
pub enum StepKind<'a> {
    Leaf,
    Flow(&'a [Arc<dyn Step>]),
    Split(&'a [Arc<dyn Step>]),
}

impl StepKind<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Leaf => "leaf",
            Self::Flow(_) => "flow",
            Self::Split(_) => "split",
        }
    }
}

#[async_trait]
pub trait Step: Send + Sync {
    /// Run one pass of this step.
    ///
    /// Returning [`RepeatStatus::Continuable`] makes the handler call the step
    /// again through the full interceptor chain.
    async fn execute(&self, step_execution: &StepExecution) -> StepResult;

    /// Ask the step to stop. Long-running steps should also watch the
    /// execution's cancellation token.
    fn stop(&self, may_interrupt_if_running: bool) {
        let _ = may_interrupt_if_running;
    }

    fn kind(&self) -> StepKind<'_> {
        StepKind::Leaf
    }

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        None
    }

    /// Steps returning a listener here get `before_job` the first time they
    /// are dispatched in a run and `after_job` when the run ends.
    fn as_job_listener(&self) -> Option<&dyn JobExecutionListener> {
        None
    }
}

/// Composite step whose children run one after another.
pub struct FlowStep {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl FlowStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: impl IntoIterator<Item = Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps: steps.into_iter().collect(),
        }
    }

    pub fn then(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add(&mut self, step: Arc<dyn Step>) {
        self.steps.push(step);
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
}

#[async_trait]
impl Step for FlowStep {
    /// Runs the children through the execution's handler. The handler itself
    /// dispatches flows by [`Step::kind`]; this is for steps that hold a flow
    /// and run it from their own `execute`.
    async fn execute(&self, step_execution: &StepExecution) -> StepResult {
        let handler = step_execution.job_execution().step_handler().clone();
        handler.handle_flow(&self.steps, step_execution).await
    }

    fn stop(&self, may_interrupt_if_running: bool) {
        stop_all(&self.steps, may_interrupt_if_running);
    }

    fn kind(&self) -> StepKind<'_> {
        StepKind::Flow(&self.steps)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        Some(self)
    }
}

impl Pauseable for FlowStep {
    fn pause(&self) {
        pause_all(&self.steps);
    }

    fn unpause(&self) {
        unpause_all(&self.steps);
    }

    fn is_paused(&self) -> bool {
        any_paused(&self.steps)
    }
}

/// Composite step whose children run concurrently; it completes only after
/// every child has completed.
pub struct SplitStep {
    name: String,
    steps: Vec<Arc<dyn Step>>,
}

impl SplitStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn with_steps(name: impl Into<String>, steps: impl IntoIterator<Item = Arc<dyn Step>>) -> Self {
        Self {
            name: name.into(),
            steps: steps.into_iter().collect(),
        }
    }

    pub fn and(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn add(&mut self, step: Arc<dyn Step>) {
        self.steps.push(step);
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
}

#[async_trait]
impl Step for SplitStep {
    /// Fans the children out through the execution's handler and joins them.
    async fn execute(&self, step_execution: &StepExecution) -> StepResult {
        let handler = step_execution.job_execution().step_handler().clone();
        handler.handle_split(&self.steps, step_execution).await
    }

    fn stop(&self, may_interrupt_if_running: bool) {
        stop_all(&self.steps, may_interrupt_if_running);
    }

    fn kind(&self) -> StepKind<'_> {
        StepKind::Split(&self.steps)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_pauseable(&self) -> Option<&dyn Pauseable> {
        Some(self)
    }
}

impl Pauseable for SplitStep {
    fn pause(&self) {
        pause_all(&self.steps);
    }

    fn unpause(&self) {
        unpause_all(&self.steps);
    }

    fn is_paused(&self) -> bool {
        any_paused(&self.steps)
    }
}

fn stop_all(steps: &[Arc<dyn Step>], may_interrupt_if_running: bool) {
    for step in steps {
        step.stop(may_interrupt_if_running);
    }
}

fn pause_all(steps: &[Arc<dyn Step>]) {
    steps
        .iter()
        .filter_map(|step| step.as_pauseable())
        .for_each(|pauseable| pauseable.pause());
}

fn unpause_all(steps: &[Arc<dyn Step>]) {
    steps
        .iter()
        .filter_map(|step| step.as_pauseable())
        .for_each(|pauseable| pauseable.unpause());
}

fn any_paused(steps: &[Arc<dyn Step>]) -> bool {
    steps
        .iter()
        .filter_map(|step| step.as_pauseable())
        .any(|pauseable| pauseable.is_paused())
}
