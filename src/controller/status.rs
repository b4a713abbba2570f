//! Status and conditions management for Dogu resources
//!
//! Every status write goes through the conflict-retrying helpers so a
//! concurrent writer never loses our change or has its change overwritten.

use chrono::Utc;
use tracing::debug;

use crate::controller::Context;
use crate::controller::error::Result;
use crate::controller::requeue::RequeueDecision;
use crate::controller::retry::update_dogu_status_with_retry;
use crate::crd::{Condition, Dogu, DoguPhase, DoguStatus};

/// Standard condition types following Kubernetes conventions
pub mod condition_types {
    /// The last reconciliation converged the dogu
    pub const READY: &str = "Ready";
}

/// Condition status values
pub mod condition_status {
    pub const TRUE: &str = "True";
    pub const FALSE: &str = "False";
    pub const UNKNOWN: &str = "Unknown";
}

/// Reasons of the Ready condition
pub mod ready_reasons {
    pub const HAS_TO_RECONCILE: &str = "HasToReconcile";
    pub const RECONCILE_FAIL: &str = "ReconcileFail";
    pub const RECONCILE_SUCCESS: &str = "ReconcileSuccess";
}

/// Builder for creating and updating status conditions
pub struct ConditionBuilder {
    conditions: Vec<Condition>,
    generation: Option<i64>,
}

impl ConditionBuilder {
    pub fn new(generation: Option<i64>) -> Self {
        Self {
            conditions: Vec::new(),
            generation,
        }
    }

    pub fn from_existing(existing: Vec<Condition>, generation: Option<i64>) -> Self {
        Self {
            conditions: existing,
            generation,
        }
    }

    /// Set a condition, updating if it exists or adding if it doesn't.
    /// The transition time only moves when the status changes.
    pub fn set_condition(mut self, type_: &str, status: &str, reason: &str, message: &str) -> Self {
        let now = Utc::now().to_rfc3339();

        if let Some(existing) = self.conditions.iter_mut().find(|c| c.type_ == type_) {
            if existing.status != status {
                existing.status = status.to_string();
                existing.last_transition_time = now;
            }
            existing.reason = reason.to_string();
            existing.message = message.to_string();
            existing.observed_generation = self.generation;
        } else {
            self.conditions.push(Condition {
                type_: type_.to_string(),
                status: status.to_string(),
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
                observed_generation: self.generation,
            });
        }
        self
    }

    /// Set the Ready condition
    pub fn ready(self, is_ready: bool, reason: &str, message: &str) -> Self {
        let status = if is_ready {
            condition_status::TRUE
        } else {
            condition_status::FALSE
        };
        self.set_condition(condition_types::READY, status, reason, message)
    }

    pub fn build(self) -> Vec<Condition> {
        self.conditions
    }
}

/// Ready condition after one reconciliation
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReadyCondition {
    pub ready: bool,
    pub reason: &'static str,
    pub message: String,
}

/// Derive the Ready condition from the requeue decision.
///
/// A pending requeue wins over the failure flags, so a failed call that is
/// retried reports `HasToReconcile`.
pub fn ready_condition_for(decision: &RequeueDecision) -> ReadyCondition {
    if let Some(after) = decision.requeue_after.filter(|d| !d.is_zero()) {
        let message = match &decision.error {
            Some(e) => format!("reconciling again in {}s: {}", after.as_secs(), e),
            None => format!("reconciling again in {}s", after.as_secs()),
        };
        return ReadyCondition {
            ready: false,
            reason: ready_reasons::HAS_TO_RECONCILE,
            message,
        };
    }
    if let Some(e) = &decision.error {
        return ReadyCondition {
            ready: false,
            reason: ready_reasons::RECONCILE_FAIL,
            message: e.clone(),
        };
    }
    if decision.aborted {
        return ReadyCondition {
            ready: false,
            reason: ready_reasons::RECONCILE_FAIL,
            message: "reconciliation aborted".to_string(),
        };
    }
    ReadyCondition {
        ready: true,
        reason: ready_reasons::RECONCILE_SUCCESS,
        message: "dogu is reconciled".to_string(),
    }
}

/// Status manager for Dogu resources
pub struct StatusManager<'a> {
    ctx: &'a Context,
    ns: &'a str,
    name: &'a str,
}

impl<'a> StatusManager<'a> {
    pub fn new(ctx: &'a Context, ns: &'a str, name: &'a str) -> Self {
        Self { ctx, ns, name }
    }

    /// Apply a mutation to the freshest status
    pub async fn update<F>(&self, mutate: F) -> Result<Dogu>
    where
        F: Fn(&mut DoguStatus) + Send + Sync,
    {
        update_dogu_status_with_retry(
            self.ctx.dogus.as_ref(),
            &self.ctx.backoff,
            self.ns,
            self.name,
            mutate,
        )
        .await
    }

    pub async fn set_phase(&self, phase: DoguPhase) -> Result<Dogu> {
        debug!(dogu = %self.name, %phase, "setting phase");
        self.update(|status| status.status = phase).await
    }

    /// Mark the dogu as converged at the given version
    pub async fn set_installed(&self, version: &str) -> Result<Dogu> {
        self.update(|status| {
            status.status = DoguPhase::Installed;
            status.installed_version = Some(version.to_string());
        })
        .await
    }

    pub async fn set_ready_condition(
        &self,
        generation: Option<i64>,
        condition: &ReadyCondition,
    ) -> Result<Dogu> {
        self.update(|status| {
            let conditions = std::mem::take(&mut status.conditions);
            status.conditions = ConditionBuilder::from_existing(conditions, generation)
                .ready(condition.ready, condition.reason, &condition.message)
                .build();
        })
        .await
    }

    pub async fn set_requeue_time(&self, seconds: u64) -> Result<Dogu> {
        self.update(|status| status.requeue_time = seconds).await
    }
}
