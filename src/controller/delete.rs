//! Dogu deletion
//!
//! Cleanup steps are best effort and only logged on failure. Removing the
//! finalizer is the single step that has to succeed.

use kube::runtime::events::EventType;
use tracing::{debug, info, instrument, warn};

use crate::controller::Context;
use crate::controller::error::{Result, ResultExt};
use crate::controller::events::reasons;
use crate::controller::reconciler::FINALIZER;
use crate::controller::retry::update_dogu_with_retry;
use crate::controller::status::StatusManager;
use crate::controller::workflow::{dogu_key, publish};
use crate::crd::{Dogu, DoguPhase};

pub struct DeleteManager<'a> {
    ctx: &'a Context,
}

impl<'a> DeleteManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name))]
    pub async fn delete(&self, dogu: &Dogu) -> Result<()> {
        if !dogu.has_finalizer(FINALIZER) {
            debug!("finalizer already removed");
            return Ok(());
        }
        let ctx = self.ctx;
        let (ns, name) = dogu_key(dogu)?;
        let simple = dogu.simple_name();

        if dogu.phase() != DoguPhase::Deleting {
            publish(
                ctx,
                dogu,
                EventType::Normal,
                reasons::DELETION,
                format!("deleting {}", dogu.spec.name),
            )
            .await;
            StatusManager::new(ctx, ns, name)
                .set_phase(DoguPhase::Deleting)
                .await?;
        }

        match ctx.descriptors.fetch_installed(ns, simple).await {
            Ok(descriptor) => {
                if let Err(e) = ctx.service_accounts.remove(dogu, &descriptor).await {
                    warn!(error = %e, "failed to remove service accounts");
                    self.warn(dogu, format!("failed to remove service accounts: {}", e)).await;
                }
            }
            Err(e) => warn!(
                error = %e,
                "no installed descriptor, skipping service account removal"
            ),
        }

        if let Err(e) = ctx.local_registry.unregister(ns, simple).await {
            warn!(error = %e, "failed to unregister dogu");
            self.warn(dogu, format!("failed to unregister dogu: {}", e)).await;
        }

        if let Err(e) = ctx.config_store.delete(ns, simple).await {
            warn!(error = %e, "failed to delete dogu config");
            self.warn(dogu, format!("failed to delete dogu config: {}", e)).await;
        }

        match update_dogu_with_retry(ctx.dogus.as_ref(), &ctx.backoff, ns, name, |d| {
            if let Some(finalizers) = d.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != FINALIZER);
            }
        })
        .await
        {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e).context("remove finalizer"),
        }

        info!("removed finalizer");
        Ok(())
    }

    async fn warn(&self, dogu: &Dogu, message: String) {
        publish(self.ctx, dogu, EventType::Warning, reasons::ERR_DELETION, message).await;
    }
}
