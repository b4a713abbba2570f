//! Reconciliation entry point for Dogu resources
//!
//! One call loads the Dogu, routes it to the delete or install-or-change
//! workflow, turns the outcome into a requeue decision and reports it through
//! the Ready condition.

use std::sync::Arc;
use std::time::Instant;

use kube::ResourceExt;
use kube::runtime::controller::Action;
use tracing::{debug, instrument, warn};

use crate::controller::context::Context;
use crate::controller::error::{Error, Result};
use crate::controller::manager::DoguManager;
use crate::controller::requeue::{ERROR_REQUEUE_INTERVAL, RequeueDecision, RequeueHandler};
use crate::controller::status::{
    ReadyCondition, StatusManager, condition_status, condition_types, ready_condition_for,
};
use crate::crd::Dogu;
use crate::health::Outcome;

/// Finalizer keeping a Dogu until its registrations are cleaned up
pub const FINALIZER: &str = "k8s.cloudogu.com/dogu-finalizer";

/// Whether the Dogu already carries exactly this Ready condition
pub fn ready_condition_current(dogu: &Dogu, condition: &ReadyCondition) -> bool {
    let wanted_status = if condition.ready {
        condition_status::TRUE
    } else {
        condition_status::FALSE
    };
    dogu.status
        .as_ref()
        .and_then(|s| s.conditions.iter().find(|c| c.type_ == condition_types::READY))
        .is_some_and(|c| {
            c.status == wanted_status
                && c.reason == condition.reason
                && c.message == condition.message
                && c.observed_generation == dogu.metadata.generation
        })
}

fn action_for(decision: &RequeueDecision) -> Action {
    match decision.requeue_after {
        Some(after) => Action::requeue(after),
        None => Action::await_change(),
    }
}

/// Main reconciliation function
#[instrument(
    skip(dogu, ctx),
    fields(name = %dogu.name_any(), namespace = dogu.namespace().unwrap_or_default())
)]
pub async fn reconcile(dogu: Arc<Dogu>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let name = dogu.name_any();

    // The cached object may be stale; workflows act on the stored one.
    let Some(dogu) = ctx.dogus.get_dogu(&ns, &name).await? else {
        debug!("dogu is gone");
        return Ok(Action::await_change());
    };

    let manager = DoguManager::new(&ctx);
    let outcome = if dogu.is_deleting() {
        manager.delete(&dogu).await
    } else {
        manager.install_or_change(&dogu).await
    };
    let decision = RequeueHandler::new(&ctx).handle(&dogu, &outcome).await;

    if let Some(state) = &ctx.health_state {
        let outcome = if decision.error.is_some() {
            Outcome::Failed
        } else if decision.requeue_after.is_some() {
            Outcome::Waiting
        } else {
            Outcome::Converged
        };
        state
            .metrics
            .record_reconcile("dogu", &ns, &name, outcome, started.elapsed().as_secs_f64());
    }

    let Some(current) = ctx.dogus.get_dogu(&ns, &name).await? else {
        debug!("dogu was removed by the workflow");
        return Ok(Action::await_change());
    };
    let condition = ready_condition_for(&decision);
    if !ready_condition_current(&current, &condition) {
        StatusManager::new(&ctx, &ns, &name)
            .set_ready_condition(current.metadata.generation, &condition)
            .await?;
    }

    Ok(action_for(&decision))
}

/// Error policy for the Dogu controller
///
/// Workflow failures are already folded into the returned action; only
/// failures of the dispatcher itself end up here.
pub fn error_policy(dogu: Arc<Dogu>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(name = %dogu.name_any(), error = %error, "dogu reconciliation failed");
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}
