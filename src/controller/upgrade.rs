//! Dogu upgrades
//!
//! An upgrade moves an installed dogu to the version in its spec. Premises
//! are checked before anything changes; after that every step re-applies
//! idempotently, so an interrupted upgrade resumes by running again.

use kube::runtime::events::EventType;
use tracing::{info, instrument};

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::controller::events::reasons;
use crate::controller::infra::deployment_ready;
use crate::controller::status::StatusManager;
use crate::controller::validation::validate_upgradeability;
use crate::controller::workflow::{NOT_YET_CHANGED_WAIT, dogu_key, publish, publish_failure};
use crate::crd::{Dogu, DoguPhase};
use crate::registry::Descriptor;
use crate::resources::PodTemplateOptions;

pub struct UpgradeManager<'a> {
    ctx: &'a Context,
}

impl<'a> UpgradeManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name, version = %dogu.spec.version))]
    pub async fn upgrade(&self, dogu: &Dogu) -> Result<()> {
        let result = self.run(dogu).await;
        if let Err(e) = &result {
            publish_failure(self.ctx, dogu, reasons::ERR_UPGRADE, e).await;
        }
        result
    }

    async fn run(&self, dogu: &Dogu) -> Result<()> {
        let ctx = self.ctx;
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(ctx, ns, name);

        let from = ctx
            .descriptors
            .fetch_installed(ns, dogu.simple_name())
            .await
            .context("fetch installed descriptor")?;
        let (to, development) = ctx
            .descriptors
            .fetch_with_resource(dogu)
            .await
            .context("fetch target descriptor")?;

        self.check_premises(dogu, &to).await?;
        let changes_version = validate_upgradeability(dogu, &from, &to)?;

        if dogu.phase() != DoguPhase::Upgrading {
            publish(
                ctx,
                dogu,
                EventType::Normal,
                reasons::UPGRADE,
                format!("upgrading {} from {} to {}", dogu.simple_name(), from.version, to.version),
            )
            .await;
            status.set_phase(DoguPhase::Upgrading).await?;
        }

        let image_config = ctx
            .images
            .pull_image_config(&to.image_ref())
            .await
            .with_context(|| format!("pull image config of {}", to.image_ref()))?;
        ctx.custom_resources
            .apply(dogu, &to)
            .await
            .context("apply custom resources")?;
        ctx.local_registry
            .register(ns, &to)
            .await
            .context("register new version")?;
        ctx.service_accounts
            .create(dogu, &to)
            .await
            .context("create service accounts")?;
        ctx.upserter
            .upsert_service(dogu, &image_config)
            .await
            .context("update service")?;
        ctx.upserter
            .upsert_exposed_services(dogu, &to)
            .await
            .context("update exposed services")?;
        ctx.upserter
            .upsert_deployment(dogu, &to, &image_config, PodTemplateOptions::from_spec(dogu))
            .await
            .context("update deployment")?;

        if let Some(development) = development {
            ctx.descriptors
                .remove_development_descriptor(&development)
                .await
                .context("remove development descriptor")?;
        }

        status.set_installed(&to.version).await?;
        info!(from = %from.version, to = %to.version, changes_version, "dogu upgraded");
        publish(
            ctx,
            dogu,
            EventType::Normal,
            reasons::UPGRADE,
            format!("upgraded {} to {}", dogu.simple_name(), to.version),
        )
        .await;
        Ok(())
    }

    /// Dependencies of the new version must be met and the running
    /// installation must be healthy before anything is touched
    async fn check_premises(&self, dogu: &Dogu, to: &Descriptor) -> Result<()> {
        let (ns, _) = dogu_key(dogu)?;
        self.ctx
            .dependencies
            .validate(ns, to)
            .await
            .context("validate dependencies of new version")?;

        if dogu.spec.stopped || dogu.phase() == DoguPhase::Upgrading {
            return Ok(());
        }
        let deployment = self
            .ctx
            .infra
            .get_deployment(ns, dogu.simple_name())
            .await?
            .ok_or_else(|| Error::NotFound(format!("deployment {}/{}", ns, dogu.simple_name())))?;
        if !deployment_ready(&deployment) {
            return Err(Error::not_yet_converged(
                format!("dogu {} must be healthy before upgrading", dogu.simple_name()),
                NOT_YET_CHANGED_WAIT,
            ));
        }
        Ok(())
    }
}
