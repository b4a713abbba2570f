//! Resumable step ladders
//!
//! A ladder is an ordered list of steps keyed by their start condition. The
//! condition of the next step is persisted in `status.requeuePhase`, so one
//! reconciliation runs exactly one step and the next call resumes from the
//! stored condition.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::status::StatusManager;
use crate::crd::Dogu;

/// Start condition of the first step
pub const INITIAL_CONDITION: &str = "";
/// Returned by the last step
pub const FINISHED_CONDITION: &str = "Finished";

#[async_trait]
pub trait AsyncStep: Send + Sync {
    fn start_condition(&self) -> &'static str;

    /// Run the step and return the start condition of the next one
    async fn execute(&self, dogu: &Dogu) -> Result<String>;
}

/// Result of running one step
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The ladder continues at the given condition on the next call
    Continue(String),
    Finished,
}

pub struct AsyncExecutor<'a> {
    ctx: &'a Context,
    steps: Vec<Box<dyn AsyncStep + 'a>>,
}

impl<'a> AsyncExecutor<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self {
            ctx,
            steps: Vec::new(),
        }
    }

    pub fn add_step(mut self, step: impl AsyncStep + 'a) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run the step matching the persisted condition once and store the
    /// condition it hands over to. Finishing clears the stored condition.
    pub async fn execute(&self, dogu: &Dogu) -> Result<StepOutcome> {
        let current = dogu
            .status
            .as_ref()
            .map(|s| s.requeue_phase.as_str())
            .unwrap_or(INITIAL_CONDITION);

        let Some(step) = self.steps.iter().find(|s| s.start_condition() == current) else {
            warn!(condition = current, "no step for persisted condition, restarting ladder");
            self.persist(dogu, INITIAL_CONDITION).await?;
            return Ok(StepOutcome::Continue(INITIAL_CONDITION.to_string()));
        };

        debug!(condition = current, "executing step");
        let next = step
            .execute(dogu)
            .await
            .with_context(|| format!("step {:?}", step.start_condition()))?;

        if next == FINISHED_CONDITION {
            self.persist(dogu, INITIAL_CONDITION).await?;
            return Ok(StepOutcome::Finished);
        }
        self.persist(dogu, &next).await?;
        Ok(StepOutcome::Continue(next))
    }

    async fn persist(&self, dogu: &Dogu, condition: &str) -> Result<()> {
        let ns = dogu
            .metadata
            .namespace
            .as_deref()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let name = dogu
            .metadata
            .name
            .as_deref()
            .ok_or(Error::MissingObjectKey("name"))?;
        StatusManager::new(self.ctx, ns, name)
            .update(|status| status.requeue_phase = condition.to_string())
            .await?;
        Ok(())
    }
}
