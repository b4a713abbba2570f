//! Data volume expansion
//!
//! Growing a data volume runs as a step ladder across reconciliations:
//! scale down, edit the PVC, wait for the storage system, scale up again.
//! The original replica count is persisted in `status.resizeReplicas` so a
//! resumed ladder never depends on in-process memory.

use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use kube::runtime::events::EventType;
use tracing::info;

use crate::controller::Context;
use crate::controller::async_step::{
    AsyncExecutor, AsyncStep, FINISHED_CONDITION, INITIAL_CONDITION, StepOutcome,
};
use crate::controller::error::{Error, Result};
use crate::controller::events::reasons;
use crate::controller::infra::deployment_replicas;
use crate::controller::status::StatusManager;
use crate::controller::workflow::{dogu_key, publish};
use crate::crd::{Dogu, DoguPhase};
use crate::resources::pvc::{
    actual_capacity, data_volume_name, desired_volume_size, requested_storage,
};
use crate::resources::quantity::parse_quantity;

pub const EDIT_PVC_CONDITION: &str = "Edit PVC";
pub const WAIT_FOR_RESIZE_CONDITION: &str = "Wait for resize";
pub const SCALE_UP_CONDITION: &str = "Scale up";

/// Wait while the storage system grows the filesystem
pub const RESIZE_WAIT: Duration = Duration::from_secs(60);
/// Delay before the next step of a running ladder
pub const STEP_REQUEUE: Duration = Duration::from_secs(2);

fn bytes(raw: &str) -> Result<u64> {
    parse_quantity(raw).map_err(|e| Error::ValidationError(e.to_string()))
}

/// Whether the PVC asks for less storage than the Dogu wants
pub fn volume_too_small(dogu: &Dogu, pvc: &PersistentVolumeClaim) -> Result<bool> {
    let desired = bytes(desired_volume_size(dogu))?;
    let requested = requested_storage(pvc).map(bytes).transpose()?.unwrap_or(0);
    Ok(requested < desired)
}

/// Whether a ladder was started and has not finished yet
pub fn expansion_in_progress(dogu: &Dogu) -> bool {
    dogu.status
        .as_ref()
        .is_some_and(|s| s.requeue_phase != INITIAL_CONDITION)
}

async fn fetch_pvc(ctx: &Context, dogu: &Dogu) -> Result<PersistentVolumeClaim> {
    let (ns, _) = dogu_key(dogu)?;
    let pvc_name = data_volume_name(dogu.simple_name());
    ctx.infra
        .get_pvc(ns, &pvc_name)
        .await?
        .ok_or_else(|| Error::NotFound(format!("pvc {}/{}", ns, pvc_name)))
}

/// Records the running replica count and scales the dogu to zero
pub struct ScaleDownStep<'a> {
    ctx: &'a Context,
}

#[async_trait]
impl AsyncStep for ScaleDownStep<'_> {
    fn start_condition(&self) -> &'static str {
        INITIAL_CONDITION
    }

    async fn execute(&self, dogu: &Dogu) -> Result<String> {
        let (ns, name) = dogu_key(dogu)?;
        let simple = dogu.simple_name();

        // A previous attempt may already have scaled down; keep its record.
        let recorded = dogu.status.as_ref().and_then(|s| s.resize_replicas);
        if recorded.is_none() {
            let replicas = match self.ctx.infra.get_deployment(ns, simple).await? {
                Some(deployment) => deployment_replicas(&deployment),
                None => dogu.desired_replicas(),
            };
            StatusManager::new(self.ctx, ns, name)
                .update(|status| status.resize_replicas = Some(replicas))
                .await?;
        }

        self.ctx.infra.scale_deployment(ns, simple, 0).await?;
        Ok(EDIT_PVC_CONDITION.to_string())
    }
}

/// Raises the storage request of the data PVC
pub struct EditPvcStep<'a> {
    ctx: &'a Context,
}

#[async_trait]
impl AsyncStep for EditPvcStep<'_> {
    fn start_condition(&self) -> &'static str {
        EDIT_PVC_CONDITION
    }

    async fn execute(&self, dogu: &Dogu) -> Result<String> {
        let (ns, _) = dogu_key(dogu)?;
        let pvc = fetch_pvc(self.ctx, dogu).await?;
        if volume_too_small(dogu, &pvc)? {
            let size = desired_volume_size(dogu);
            self.ctx
                .infra
                .resize_pvc(ns, &data_volume_name(dogu.simple_name()), size)
                .await?;
            info!(size, "requested larger data volume");
        }
        Ok(WAIT_FOR_RESIZE_CONDITION.to_string())
    }
}

/// Waits until the bound capacity reached the requested size
pub struct WaitForResizeStep<'a> {
    ctx: &'a Context,
}

#[async_trait]
impl AsyncStep for WaitForResizeStep<'_> {
    fn start_condition(&self) -> &'static str {
        WAIT_FOR_RESIZE_CONDITION
    }

    async fn execute(&self, dogu: &Dogu) -> Result<String> {
        let pvc = fetch_pvc(self.ctx, dogu).await?;
        let desired = bytes(desired_volume_size(dogu))?;
        let capacity = actual_capacity(&pvc).map(bytes).transpose()?.unwrap_or(0);
        if capacity < desired {
            return Err(Error::not_yet_converged(
                format!(
                    "data volume of {} has not been resized yet",
                    dogu.simple_name()
                ),
                RESIZE_WAIT,
            ));
        }
        Ok(SCALE_UP_CONDITION.to_string())
    }
}

/// Restores the recorded replica count
pub struct ScaleUpStep<'a> {
    ctx: &'a Context,
}

#[async_trait]
impl AsyncStep for ScaleUpStep<'_> {
    fn start_condition(&self) -> &'static str {
        SCALE_UP_CONDITION
    }

    async fn execute(&self, dogu: &Dogu) -> Result<String> {
        let (ns, name) = dogu_key(dogu)?;
        let replicas = dogu
            .status
            .as_ref()
            .and_then(|s| s.resize_replicas)
            .unwrap_or_else(|| dogu.desired_replicas());

        self.ctx
            .infra
            .scale_deployment(ns, dogu.simple_name(), replicas)
            .await?;
        StatusManager::new(self.ctx, ns, name)
            .update(|status| status.resize_replicas = None)
            .await?;
        Ok(FINISHED_CONDITION.to_string())
    }
}

/// Drives the expansion ladder one step per call
pub struct VolumeManager<'a> {
    ctx: &'a Context,
}

impl<'a> VolumeManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn executor(&self) -> AsyncExecutor<'a> {
        AsyncExecutor::new(self.ctx)
            .add_step(ScaleDownStep { ctx: self.ctx })
            .add_step(EditPvcStep { ctx: self.ctx })
            .add_step(WaitForResizeStep { ctx: self.ctx })
            .add_step(ScaleUpStep { ctx: self.ctx })
    }

    pub async fn expand(&self, dogu: &Dogu) -> Result<()> {
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(self.ctx, ns, name);

        if !expansion_in_progress(dogu) {
            publish(
                self.ctx,
                dogu,
                EventType::Normal,
                reasons::VOLUME_EXPANSION,
                format!("expanding data volume to {}", desired_volume_size(dogu)),
            )
            .await;
        }
        if dogu.phase() != DoguPhase::ResizingVolume {
            status.set_phase(DoguPhase::ResizingVolume).await?;
        }

        match self.executor().execute(dogu).await? {
            StepOutcome::Finished => {
                status.set_phase(DoguPhase::Installed).await?;
                publish(
                    self.ctx,
                    dogu,
                    EventType::Normal,
                    reasons::VOLUME_EXPANSION,
                    "data volume expanded".to_string(),
                )
                .await;
                Ok(())
            }
            StepOutcome::Continue(next) => Err(Error::not_yet_converged(
                format!("volume expansion continues with step {:?}", next),
                STEP_REQUEUE,
            )),
        }
    }
}
