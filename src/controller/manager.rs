//! Routing of a Dogu to the workflow it needs next
//!
//! One call observes the cluster, evaluates the required operations and runs
//! only the first of them. Remaining operations are picked up after a short
//! requeue, so every call stays a bounded slice of work.

use std::time::Duration;

use tracing::{debug, info, instrument};

use crate::controller::Context;
use crate::controller::annotations::AnnotationsManager;
use crate::controller::delete::DeleteManager;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::export_mode::ExportModeManager;
use crate::controller::install::InstallManager;
use crate::controller::operations::{ObservedState, Operation, required_operations};
use crate::controller::start_stop::StartStopManager;
use crate::controller::status::StatusManager;
use crate::controller::support_mode::SupportModeManager;
use crate::controller::upgrade::UpgradeManager;
use crate::controller::validation::validate_spec;
use crate::controller::volume::{VolumeManager, volume_too_small};
use crate::controller::workflow::dogu_key;
use crate::crd::{Dogu, DoguPhase};
use crate::resources::deployment::has_support_mode_marker;
use crate::resources::pvc::data_volume_name;
use crate::resources::service::service_ingress_annotations;

/// Delay before the next pending operation runs
pub const NEXT_OPERATION_REQUEUE: Duration = Duration::from_secs(1);

pub struct DoguManager<'a> {
    ctx: &'a Context,
}

impl<'a> DoguManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Collect the cluster state the operation evaluation depends on
    pub async fn observe(&self, dogu: &Dogu) -> Result<ObservedState> {
        let installed_version = dogu.status.as_ref().and_then(|s| s.installed_version.clone());
        if installed_version.is_none() {
            return Ok(ObservedState::default());
        }
        let (ns, _) = dogu_key(dogu)?;
        let simple = dogu.simple_name();
        let infra = &self.ctx.infra;

        let volume_too_small = match infra.get_pvc(ns, &data_volume_name(simple)).await? {
            Some(pvc) => volume_too_small(dogu, &pvc)?,
            None => false,
        };
        let service_annotations = infra
            .get_service(ns, simple)
            .await?
            .map(|svc| service_ingress_annotations(&svc))
            .transpose()?;
        let support_mode_active = infra
            .get_deployment(ns, simple)
            .await?
            .is_some_and(|d| has_support_mode_marker(&d));

        Ok(ObservedState {
            installed_version,
            volume_too_small,
            service_annotations,
            support_mode_active,
        })
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name))]
    pub async fn install_or_change(&self, dogu: &Dogu) -> Result<()> {
        validate_spec(dogu)?;
        let observed = self.observe(dogu).await.context("observe dogu")?;
        let operations = required_operations(dogu, &observed)?;

        let Some((first, rest)) = operations.split_first() else {
            if observed.installed_version.is_some() && dogu.phase() != DoguPhase::Installed {
                let (ns, name) = dogu_key(dogu)?;
                StatusManager::new(self.ctx, ns, name)
                    .set_phase(DoguPhase::Installed)
                    .await?;
            }
            debug!("dogu has converged");
            return Ok(());
        };

        info!(operation = %first, pending = rest.len(), "running operation");
        if let Some(state) = &self.ctx.health_state {
            state.metrics.record_operation(&first.to_string());
        }
        self.run(*first, dogu).await.with_context(|| first.to_string())?;

        if rest.is_empty() {
            return Ok(());
        }
        Err(Error::not_yet_converged(
            format!("{} operation(s) pending after {}", rest.len(), first),
            NEXT_OPERATION_REQUEUE,
        ))
    }

    pub async fn delete(&self, dogu: &Dogu) -> Result<()> {
        DeleteManager::new(self.ctx).delete(dogu).await
    }

    async fn run(&self, operation: Operation, dogu: &Dogu) -> Result<()> {
        let ctx = self.ctx;
        match operation {
            Operation::Install => InstallManager::new(ctx).install(dogu).await,
            Operation::Upgrade => UpgradeManager::new(ctx).upgrade(dogu).await,
            Operation::ExpandVolume => VolumeManager::new(ctx).expand(dogu).await,
            Operation::ChangeAdditionalIngressAnnotations => {
                AnnotationsManager::new(ctx).change_annotations(dogu).await
            }
            Operation::StartStop => StartStopManager::new(ctx).start_stop(dogu).await,
            Operation::ExportMode => ExportModeManager::new(ctx).change_export_mode(dogu).await,
            Operation::SupportMode => SupportModeManager::new(ctx).change_support_mode(dogu).await,
        }
    }
}
