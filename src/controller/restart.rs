//! DoguRestart reconciliation
//!
//! The persisted phase selects exactly one operation per call. Stopping and
//! starting flip `spec.stopped` of the target Dogu; the checks compare the
//! target's observed `status.stopped` against the expected value.

use std::sync::Arc;
use std::time::{Duration, Instant};

use kube::runtime::controller::Action;
use kube::runtime::events::EventType;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::requeue::ERROR_REQUEUE_INTERVAL;
use crate::controller::retry::{update_dogu_with_retry, update_restart_phase_with_retry};
use crate::crd::{Dogu, DoguRestart, RestartPhase};
use crate::health::Outcome;

/// Wait between checks of the target's observed state
pub const RESTART_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// What the target lookup produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetState {
    Ready,
    /// Being deleted or not installed yet
    Busy,
    NotFound,
    GetFailed,
}

impl TargetState {
    pub fn of(dogu: &Dogu) -> Self {
        let installed = dogu
            .status
            .as_ref()
            .is_some_and(|s| s.installed_version.is_some());
        if dogu.is_deleting() || !installed {
            TargetState::Busy
        } else {
            TargetState::Ready
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartOperation {
    Ignore,
    Wait,
    Stop,
    CheckStopped,
    Start,
    CheckStarted,
    HandleDoguNotFound,
    HandleGetDoguFailed,
}

/// Operation for a persisted phase, ignoring the target
pub fn operation_for_phase(phase: RestartPhase) -> RestartOperation {
    match phase {
        RestartPhase::New | RestartPhase::FailedStop | RestartPhase::FailedGetDogu => {
            RestartOperation::Stop
        }
        RestartPhase::Stopping => RestartOperation::CheckStopped,
        RestartPhase::Stopped | RestartPhase::FailedStart => RestartOperation::Start,
        RestartPhase::Starting => RestartOperation::CheckStarted,
        RestartPhase::Completed | RestartPhase::DoguNotFound => RestartOperation::Ignore,
    }
}

/// Operation for a phase given the state of the target Dogu
pub fn next_operation(phase: RestartPhase, target: TargetState) -> RestartOperation {
    if phase.is_terminal() {
        return RestartOperation::Ignore;
    }
    match target {
        TargetState::NotFound => RestartOperation::HandleDoguNotFound,
        TargetState::GetFailed => RestartOperation::HandleGetDoguFailed,
        TargetState::Busy => RestartOperation::Wait,
        TargetState::Ready => operation_for_phase(phase),
    }
}

/// Phase a successful operation moves to, `None` when it stays put
pub fn phase_after(operation: RestartOperation, target_stopped: bool) -> Option<RestartPhase> {
    match operation {
        RestartOperation::Stop => Some(RestartPhase::Stopping),
        RestartOperation::Start => Some(RestartPhase::Starting),
        RestartOperation::CheckStopped => target_stopped.then_some(RestartPhase::Stopped),
        RestartOperation::CheckStarted => (!target_stopped).then_some(RestartPhase::Completed),
        RestartOperation::HandleDoguNotFound => Some(RestartPhase::DoguNotFound),
        // a failed lookup keeps the phase, so the retry resumes where it left off
        RestartOperation::HandleGetDoguFailed
        | RestartOperation::Ignore
        | RestartOperation::Wait => None,
    }
}

/// Runs one restart operation against the target Dogu
pub struct RestartManager<'a> {
    ctx: &'a Context,
    restart: &'a DoguRestart,
    namespace: &'a str,
}

impl<'a> RestartManager<'a> {
    pub fn new(ctx: &'a Context, restart: &'a DoguRestart, namespace: &'a str) -> Self {
        Self {
            ctx,
            restart,
            namespace,
        }
    }

    async fn set_phase(&self, phase: RestartPhase) -> Result<()> {
        update_restart_phase_with_retry(
            self.ctx.dogus.as_ref(),
            &self.ctx.backoff,
            self.namespace,
            &self.restart.name_any(),
            phase,
        )
        .await?;
        debug!(%phase, "restart phase updated");
        Ok(())
    }

    async fn event(&self, type_: EventType, reason: &str, message: String) {
        self.ctx
            .events
            .publish(&self.restart.object_ref(&()), type_, reason, message)
            .await;
    }

    async fn set_target_stopped(&self, stopped: bool) -> Result<Dogu> {
        update_dogu_with_retry(
            self.ctx.dogus.as_ref(),
            &self.ctx.backoff,
            self.namespace,
            &self.restart.spec.dogu_name,
            move |dogu| dogu.spec.stopped = stopped,
        )
        .await
    }

    /// Flip the target's desired state, recording the failure phase on error
    async fn flip(&self, stopped: bool) -> Result<()> {
        let (operation, failed, failed_reason) = if stopped {
            (
                RestartOperation::Stop,
                RestartPhase::FailedStop,
                reasons::STOP_FAILED,
            )
        } else {
            (
                RestartOperation::Start,
                RestartPhase::FailedStart,
                reasons::START_FAILED,
            )
        };
        if let Err(e) = self.set_target_stopped(stopped).await {
            let verb = if stopped { "stop" } else { "start" };
            self.event(
                EventType::Warning,
                failed_reason,
                format!("failed to {} dogu {}: {}", verb, self.restart.spec.dogu_name, e),
            )
            .await;
            self.set_phase(failed).await?;
            return Err(e);
        }
        if let Some(next) = phase_after(operation, stopped) {
            self.set_phase(next).await?;
        }
        Ok(())
    }

    pub async fn run(
        &self,
        operation: RestartOperation,
        target: Option<&Dogu>,
        lookup_error: Option<Error>,
    ) -> Result<Action> {
        let dogu_name = &self.restart.spec.dogu_name;
        match operation {
            RestartOperation::Ignore => Ok(Action::await_change()),
            RestartOperation::Wait => {
                debug!(dogu = %dogu_name, "target is busy, waiting");
                Ok(Action::requeue(RESTART_CHECK_INTERVAL))
            }
            RestartOperation::Stop => {
                self.flip(true).await?;
                self.event(
                    EventType::Normal,
                    reasons::RESTART,
                    format!("stopping dogu {}", dogu_name),
                )
                .await;
                Ok(Action::requeue(RESTART_CHECK_INTERVAL))
            }
            RestartOperation::Start => {
                self.flip(false).await?;
                self.event(
                    EventType::Normal,
                    reasons::RESTART,
                    format!("starting dogu {}", dogu_name),
                )
                .await;
                Ok(Action::await_change())
            }
            RestartOperation::CheckStopped | RestartOperation::CheckStarted => {
                let observed_stopped = target
                    .and_then(|d| d.status.as_ref())
                    .is_some_and(|s| s.stopped);
                match phase_after(operation, observed_stopped) {
                    Some(next) => {
                        self.set_phase(next).await?;
                        if next == RestartPhase::Completed {
                            info!(dogu = %dogu_name, "restart completed");
                            self.event(
                                EventType::Normal,
                                reasons::RESTART,
                                format!("dogu {} restarted", dogu_name),
                            )
                            .await;
                        }
                        Ok(Action::await_change())
                    }
                    None => Ok(Action::requeue(RESTART_CHECK_INTERVAL)),
                }
            }
            RestartOperation::HandleDoguNotFound => {
                warn!(dogu = %dogu_name, "restart target does not exist");
                self.event(
                    EventType::Warning,
                    reasons::DOGU_NOT_FOUND,
                    format!("dogu {} not found", dogu_name),
                )
                .await;
                self.set_phase(RestartPhase::DoguNotFound).await?;
                Ok(Action::await_change())
            }
            RestartOperation::HandleGetDoguFailed => {
                let err = lookup_error
                    .unwrap_or_else(|| Error::NotFound(format!("dogu {}", dogu_name)));
                self.event(
                    EventType::Warning,
                    reasons::GET_DOGU_FAILED,
                    format!("failed to get dogu {}: {}", dogu_name, err),
                )
                .await;
                Err(err)
            }
        }
    }
}

/// Reconcile a DoguRestart by one phase
#[instrument(
    skip(restart, ctx),
    fields(name = %restart.name_any(), namespace = restart.namespace().unwrap_or_default())
)]
pub async fn reconcile_restart(restart: Arc<DoguRestart>, ctx: Arc<Context>) -> Result<Action> {
    let started = Instant::now();
    let ns = restart.namespace().ok_or(Error::MissingObjectKey("namespace"))?;

    let Some(restart) = ctx.dogus.get_restart(&ns, &restart.name_any()).await? else {
        return Ok(Action::await_change());
    };
    let phase = restart.phase();
    if phase.is_terminal() {
        return Ok(Action::await_change());
    }

    let lookup = ctx.dogus.get_dogu(&ns, &restart.spec.dogu_name).await;
    let (target, lookup_error, state) = match lookup {
        Ok(Some(dogu)) => {
            let state = TargetState::of(&dogu);
            (Some(dogu), None, state)
        }
        Ok(None) => (None, None, TargetState::NotFound),
        Err(e) if e.is_not_found() => (None, None, TargetState::NotFound),
        Err(e) => (None, Some(e), TargetState::GetFailed),
    };

    let operation = next_operation(phase, state);
    debug!(%phase, ?operation, "restart operation selected");
    let result = RestartManager::new(&ctx, &restart, &ns)
        .run(operation, target.as_ref(), lookup_error)
        .await;

    if let Some(health) = &ctx.health_state {
        let outcome = match &result {
            Ok(action) if *action == Action::await_change() => Outcome::Converged,
            Ok(_) => Outcome::Waiting,
            Err(_) => Outcome::Failed,
        };
        health.metrics.record_reconcile(
            "restart",
            &ns,
            &restart.name_any(),
            outcome,
            started.elapsed().as_secs_f64(),
        );
    }
    result
}

/// Error policy for the restart controller
pub fn restart_error_policy(
    restart: Arc<DoguRestart>,
    error: &Error,
    _ctx: Arc<Context>,
) -> Action {
    warn!(name = %restart.name_any(), error = %error, "restart reconciliation failed");
    Action::requeue(ERROR_REQUEUE_INTERVAL)
}
