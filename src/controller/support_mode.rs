//! Support mode
//!
//! A dogu in support mode runs its container idle, without entrypoint and
//! probes, so operators can inspect it. The observed signal is the
//! `SUPPORT_MODE` marker in the deployment's pod template.

use kube::runtime::events::EventType;
use tracing::{info, instrument};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::events::reasons;
use crate::controller::infra::deployment_ready;
use crate::controller::status::StatusManager;
use crate::controller::workflow::{
    change_needed, dogu_key, installed_artifacts, not_yet_changed, publish,
};
use crate::crd::{Dogu, DoguPhase};
use crate::resources::PodTemplateOptions;
use crate::resources::deployment::has_support_mode_marker;

pub struct SupportModeManager<'a> {
    ctx: &'a Context,
}

impl<'a> SupportModeManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn should_change(&self, dogu: &Dogu) -> Result<bool> {
        let (ns, _) = dogu_key(dogu)?;
        let deployment = self
            .ctx
            .infra
            .get_deployment(ns, dogu.simple_name())
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment {}/{}", ns, dogu.simple_name())))?;
        Ok(has_support_mode_marker(&deployment) != dogu.spec.support_mode
            || !deployment_ready(&deployment))
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name, support_mode = dogu.spec.support_mode))]
    pub async fn change_support_mode(&self, dogu: &Dogu) -> Result<()> {
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(self.ctx, ns, name);
        let support_mode = dogu.spec.support_mode;

        if change_needed(self.should_change(dogu).await, "support mode") {
            if dogu.phase() != DoguPhase::ChangingSupportMode {
                publish(
                    self.ctx,
                    dogu,
                    EventType::Normal,
                    reasons::SUPPORT,
                    format!(
                        "{} support mode",
                        if support_mode { "activating" } else { "deactivating" }
                    ),
                )
                .await;
                status.set_phase(DoguPhase::ChangingSupportMode).await?;
            }
            let (descriptor, image_config) = installed_artifacts(self.ctx, dogu).await?;
            self.ctx
                .upserter
                .upsert_deployment(
                    dogu,
                    &descriptor,
                    &image_config,
                    PodTemplateOptions::from_spec(dogu),
                )
                .await
                .context("update deployment")?;
            return Err(not_yet_changed("support mode", dogu));
        }

        status.set_phase(DoguPhase::Installed).await?;
        info!(support_mode, "support mode changed");
        Ok(())
    }
}
