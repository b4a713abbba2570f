//! Dogu installation
//!
//! Every step is an idempotent ensure, so a failed installation is simply
//! run again from the top. Objects created before a failure stay in place;
//! the finalizer guarantees they are cleaned up on deletion.

use kube::runtime::events::EventType;
use tracing::{info, instrument};

use crate::controller::Context;
use crate::controller::error::{Result, ResultExt};
use crate::controller::events::reasons;
use crate::controller::reconciler::FINALIZER;
use crate::controller::retry::update_dogu_with_retry;
use crate::controller::status::StatusManager;
use crate::controller::workflow::{dogu_key, publish, publish_failure};
use crate::crd::{Dogu, DoguPhase};
use crate::resources::PodTemplateOptions;

pub struct InstallManager<'a> {
    ctx: &'a Context,
}

impl<'a> InstallManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name, version = %dogu.spec.version))]
    pub async fn install(&self, dogu: &Dogu) -> Result<()> {
        publish(
            self.ctx,
            dogu,
            EventType::Normal,
            reasons::INSTALLATION,
            format!("installing {} {}", dogu.spec.name, dogu.spec.version),
        )
        .await;

        let result = self.run(dogu).await;
        if let Err(e) = &result {
            publish_failure(self.ctx, dogu, reasons::ERR_INSTALLATION, e).await;
        }
        result
    }

    async fn run(&self, dogu: &Dogu) -> Result<()> {
        let ctx = self.ctx;
        let (ns, name) = dogu_key(dogu)?;
        let status = StatusManager::new(ctx, ns, name);

        status.set_phase(DoguPhase::Installing).await?;
        self.add_finalizer(dogu).await?;

        let (descriptor, development) = ctx
            .descriptors
            .fetch_with_resource(dogu)
            .await
            .context("fetch descriptor")?;
        ctx.dependencies
            .validate(ns, &descriptor)
            .await
            .context("validate dependencies")?;
        ctx.local_registry
            .register(ns, &descriptor)
            .await
            .context("register dogu")?;
        ctx.secrets
            .write_dogu_secrets(dogu, &descriptor)
            .await
            .context("write dogu secrets")?;
        ctx.service_accounts
            .create(dogu, &descriptor)
            .await
            .context("create service accounts")?;

        let image_config = ctx
            .images
            .pull_image_config(&descriptor.image_ref())
            .await
            .with_context(|| format!("pull image config of {}", descriptor.image_ref()))?;

        ctx.upserter
            .upsert_service(dogu, &image_config)
            .await
            .context("create service")?;
        ctx.upserter
            .upsert_exposed_services(dogu, &descriptor)
            .await
            .context("create exposed services")?;
        ctx.custom_resources
            .apply(dogu, &descriptor)
            .await
            .context("apply custom resources")?;
        ctx.upserter
            .upsert_pvcs(dogu, &descriptor)
            .await
            .context("create volumes")?;
        ctx.upserter
            .upsert_deployment(
                dogu,
                &descriptor,
                &image_config,
                PodTemplateOptions::from_spec(dogu),
            )
            .await
            .context("create deployment")?;

        if let Some(development) = development {
            ctx.descriptors
                .remove_development_descriptor(&development)
                .await
                .context("remove development descriptor")?;
        }

        let version = descriptor.version.clone();
        let (stopped, export_mode) = (dogu.spec.stopped, dogu.spec.export_mode);
        status
            .update(move |s| {
                s.status = DoguPhase::Installed;
                s.installed_version = Some(version.clone());
                s.stopped = stopped;
                s.export_mode = export_mode;
            })
            .await?;

        info!("dogu installed");
        publish(
            ctx,
            dogu,
            EventType::Normal,
            reasons::INSTALLATION,
            format!("installed {} {}", descriptor.name, descriptor.version),
        )
        .await;
        Ok(())
    }

    async fn add_finalizer(&self, dogu: &Dogu) -> Result<()> {
        if dogu.has_finalizer(FINALIZER) {
            return Ok(());
        }
        let (ns, name) = dogu_key(dogu)?;
        update_dogu_with_retry(self.ctx.dogus.as_ref(), &self.ctx.backoff, ns, name, |d| {
            let finalizers = d.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == FINALIZER) {
                finalizers.push(FINALIZER.to_string());
            }
        })
        .await
        .context("add finalizer")?;
        info!("added finalizer");
        Ok(())
    }
}
