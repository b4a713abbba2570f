//! Export mode
//!
//! In export mode the dogu pod runs an exporter sidecar. The mode counts as
//! active once the deployment template carries the sidecar and every running
//! pod has it ready; inactive once neither template nor pods have it.

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::events::EventType;
use tracing::{info, instrument};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::events::reasons;
use crate::controller::infra::{container_ready, deployment_has_container, has_container};
use crate::controller::status::StatusManager;
use crate::controller::workflow::{
    change_needed, dogu_key, installed_artifacts, not_yet_changed, publish,
};
use crate::crd::{Dogu, DoguPhase};
use crate::resources::PodTemplateOptions;
use crate::resources::deployment::EXPORTER_CONTAINER;

/// Whether the observed deployment and pods match the wanted export mode
pub fn export_mode_converged(deployment: &Deployment, pods: &[Pod], export_mode: bool) -> bool {
    if deployment_has_container(deployment, EXPORTER_CONTAINER) != export_mode {
        return false;
    }
    pods.iter().all(|pod| {
        has_container(pod, EXPORTER_CONTAINER) == export_mode
            && (!export_mode || container_ready(pod, EXPORTER_CONTAINER))
    })
}

pub struct ExportModeManager<'a> {
    ctx: &'a Context,
}

impl<'a> ExportModeManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    pub async fn should_change(&self, dogu: &Dogu) -> Result<bool> {
        let (ns, _) = dogu_key(dogu)?;
        let simple = dogu.simple_name();
        let deployment = self
            .ctx
            .infra
            .get_deployment(ns, simple)
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment {}/{}", ns, simple)))?;
        let pods = self.ctx.infra.list_dogu_pods(ns, simple).await?;
        Ok(!export_mode_converged(&deployment, &pods, dogu.spec.export_mode))
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name, export_mode = dogu.spec.export_mode))]
    pub async fn change_export_mode(&self, dogu: &Dogu) -> Result<()> {
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(self.ctx, ns, name);
        let export_mode = dogu.spec.export_mode;

        if change_needed(self.should_change(dogu).await, "export mode") {
            if dogu.phase() != DoguPhase::ChangingExportMode {
                publish(
                    self.ctx,
                    dogu,
                    EventType::Normal,
                    reasons::EXPORT,
                    format!(
                        "{} export mode",
                        if export_mode { "activating" } else { "deactivating" }
                    ),
                )
                .await;
                status.set_phase(DoguPhase::ChangingExportMode).await?;
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
            return Err(not_yet_changed("export mode", dogu));
        }

        status
            .update(move |s| {
                s.status = DoguPhase::Installed;
                s.export_mode = export_mode;
            })
            .await?;
        info!(export_mode, "export mode changed");
        Ok(())
    }
}
