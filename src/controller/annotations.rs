//! Additional ingress annotations
//!
//! The annotations live on the dogu service, so a change re-applies the
//! service generated for the installed image.

use tracing::{info, instrument};

use crate::controller::Context;
use crate::controller::error::{Result, ResultExt};
use crate::controller::workflow::installed_artifacts;
use crate::crd::Dogu;

pub struct AnnotationsManager<'a> {
    ctx: &'a Context,
}

impl<'a> AnnotationsManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(dogu = %dogu.spec.name))]
    pub async fn change_annotations(&self, dogu: &Dogu) -> Result<()> {
        let (_, image_config) = installed_artifacts(self.ctx, dogu).await?;
        self.ctx
            .upserter
            .upsert_service(dogu, &image_config)
            .await
            .context("update service annotations")?;
        info!(
            count = dogu.spec.additional_ingress_annotations.len(),
            "additional ingress annotations applied"
        );
        Ok(())
    }
}
