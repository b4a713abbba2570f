//! Starting and stopping dogus
//!
//! The observed signal is the deployment's replica count and readiness.
//! Once it matches `spec.stopped`, the flag is mirrored into `status.stopped`,
//! which is what DoguRestart checks against.

use tracing::{debug, info, instrument};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::infra::{deployment_ready, deployment_replicas};
use crate::controller::status::StatusManager;
use crate::controller::workflow::{change_needed, dogu_key, not_yet_changed};
use crate::crd::{Dogu, DoguPhase};

pub struct StartStopManager<'a> {
    ctx: &'a Context,
}

impl<'a> StartStopManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Whether the deployment has not reached the desired replica count yet
    pub async fn should_change(&self, dogu: &Dogu) -> Result<bool> {
        let (ns, _) = dogu_key(dogu)?;
        let deployment = self
            .ctx
            .infra
            .get_deployment(ns, dogu.simple_name())
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment {}/{}", ns, dogu.simple_name())))?;
        Ok(deployment_replicas(&deployment) != dogu.desired_replicas()
            || !deployment_ready(&deployment))
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name, stopped = dogu.spec.stopped))]
    pub async fn start_stop(&self, dogu: &Dogu) -> Result<()> {
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(self.ctx, ns, name);
        let stopped = dogu.spec.stopped;

        if change_needed(self.should_change(dogu).await, "start/stop") {
            let phase = if stopped { DoguPhase::Stopping } else { DoguPhase::Starting };
            if dogu.phase() != phase {
                status.set_phase(phase).await?;
            }
            self.ctx
                .infra
                .scale_deployment(ns, dogu.simple_name(), dogu.desired_replicas())
                .await
                .context("scale deployment")?;
            debug!(replicas = dogu.desired_replicas(), "scaled deployment");
            return Err(not_yet_changed(if stopped { "stopping" } else { "starting" }, dogu));
        }

        status
            .update(move |s| {
                s.status = DoguPhase::Installed;
                s.stopped = stopped;
            })
            .await?;
        info!("dogu {}", if stopped { "stopped" } else { "started" });
        Ok(())
    }
}
