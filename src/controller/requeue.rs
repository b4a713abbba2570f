//! Requeue policy for Dogu reconciliations
//!
//! Workflows never sleep. They return an outcome and this module turns it
//! into the next requeue delay, one event and the persisted `requeueTime`.

use std::time::Duration;

use kube::Resource;
use kube::runtime::events::EventType;
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::Result;
use crate::controller::events::reasons;
use crate::controller::status::StatusManager;
use crate::crd::Dogu;

/// Fixed retry interval after a failed reconciliation
pub const ERROR_REQUEUE_INTERVAL: Duration = Duration::from_secs(5);

/// What the dispatcher does after one reconciliation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequeueDecision {
    /// `None` waits for the next change notification
    pub requeue_after: Option<Duration>,
    /// Failure text, absent for success and not-yet-converged waits
    pub error: Option<String>,
    /// The workflow gave up and must not be retried automatically
    pub aborted: bool,
}

impl RequeueDecision {
    pub fn requeue_secs(&self) -> u64 {
        self.requeue_after.map(|d| d.as_secs()).unwrap_or(0)
    }
}

/// Classify a workflow outcome.
///
/// Explicit waits are honored exactly, terminal errors stop retrying and any
/// other error is retried after [`ERROR_REQUEUE_INTERVAL`] unless the dogu is
/// already being deleted.
pub fn decide(outcome: &Result<()>, deleting: bool) -> RequeueDecision {
    let Err(err) = outcome else {
        return RequeueDecision::default();
    };
    if let Some(after) = err.requeue_after() {
        return RequeueDecision {
            requeue_after: (!after.is_zero()).then_some(after),
            error: None,
            aborted: false,
        };
    }
    if err.is_terminal() {
        return RequeueDecision {
            requeue_after: None,
            error: Some(err.to_string()),
            aborted: true,
        };
    }
    RequeueDecision {
        requeue_after: (!deleting).then_some(ERROR_REQUEUE_INTERVAL),
        error: Some(err.to_string()),
        aborted: false,
    }
}

/// Emits the outcome event and records the chosen delay on the Dogu
pub struct RequeueHandler<'a> {
    ctx: &'a Context,
}

impl<'a> RequeueHandler<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn handle(&self, dogu: &Dogu, outcome: &Result<()>) -> RequeueDecision {
        let decision = decide(outcome, dogu.is_deleting());
        self.publish(dogu, outcome, &decision).await;
        self.persist(dogu, &decision).await;
        decision
    }

    async fn publish(&self, dogu: &Dogu, outcome: &Result<()>, decision: &RequeueDecision) {
        let object = dogu.object_ref(&());
        match (outcome, decision.requeue_after) {
            (Ok(()), _) => {
                self.ctx
                    .events
                    .publish(
                        &object,
                        EventType::Normal,
                        reasons::RECONCILE_SUCCEEDED,
                        "dogu reconciled successfully".to_string(),
                    )
                    .await;
            }
            (Err(e), after) if decision.error.is_none() => {
                info!(reason = %e, requeue_after = ?after, "dogu has not converged yet");
                let message = match after {
                    Some(after) => format!("will retry in {}s: {}", after.as_secs(), e),
                    None => format!("will retry on next change: {}", e),
                };
                self.ctx
                    .events
                    .publish(&object, EventType::Normal, reasons::REQUEUE, message)
                    .await;
            }
            (Err(e), after) => {
                warn!(
                    error = %e,
                    requeue_after = ?after,
                    aborted = decision.aborted,
                    "reconciliation failed"
                );
                let message = match after {
                    Some(after) => format!(
                        "reconciliation failed, retrying in {}s: {}",
                        after.as_secs(),
                        e
                    ),
                    None => format!("reconciliation failed, not retrying: {}", e),
                };
                self.ctx
                    .events
                    .publish(&object, EventType::Warning, reasons::RECONCILE_FAIL, message)
                    .await;
            }
        }
    }

    async fn persist(&self, dogu: &Dogu, decision: &RequeueDecision) {
        let seconds = decision.requeue_secs();
        if dogu.status.as_ref().is_some_and(|s| s.requeue_time == seconds) {
            return;
        }
        let (Some(ns), Some(name)) = (dogu.meta().namespace.as_deref(), dogu.meta().name.as_deref())
        else {
            return;
        };
        match StatusManager::new(self.ctx, ns, name).set_requeue_time(seconds).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => debug!("dogu is gone, requeue time not recorded"),
            Err(e) => warn!(error = %e, "failed to record requeue time"),
        }
    }
}
