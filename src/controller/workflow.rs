//! Helpers shared by the lifecycle workflows

use std::time::Duration;

use kube::Resource;
use kube::runtime::events::EventType;
use tracing::warn;

use crate::controller::Context;
use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::Dogu;
use crate::registry::{Descriptor, ImageConfig};

/// Wait before probing again after a workflow mutated the cluster
pub const NOT_YET_CHANGED_WAIT: Duration = Duration::from_secs(5);

/// Namespace and name of a Dogu
pub fn dogu_key(dogu: &Dogu) -> Result<(&str, &str)> {
    let ns = dogu
        .meta()
        .namespace
        .as_deref()
        .ok_or(Error::MissingObjectKey("namespace"))?;
    let name = dogu
        .meta()
        .name
        .as_deref()
        .ok_or(Error::MissingObjectKey("name"))?;
    Ok((ns, name))
}

/// Error forcing another probe after a mutation
pub fn not_yet_changed(what: &str, dogu: &Dogu) -> Error {
    Error::not_yet_converged(
        format!("{} of dogu {} has not converged yet", what, dogu.simple_name()),
        NOT_YET_CHANGED_WAIT,
    )
}

/// Resolve a should-change probe. A failing probe counts as "change needed"
/// so the mutation is re-applied.
pub fn change_needed(probe: Result<bool>, what: &str) -> bool {
    probe.unwrap_or_else(|e| {
        warn!(error = %e, "{} probe failed, applying change anyway", what);
        true
    })
}

/// Descriptor of the installed version and the config of its image
pub async fn installed_artifacts(ctx: &Context, dogu: &Dogu) -> Result<(Descriptor, ImageConfig)> {
    let (ns, _) = dogu_key(dogu)?;
    let descriptor = ctx
        .descriptors
        .fetch_installed(ns, dogu.simple_name())
        .await
        .context("fetch installed descriptor")?;
    let image_config = ctx
        .images
        .pull_image_config(&descriptor.image_ref())
        .await
        .with_context(|| format!("pull image config of {}", descriptor.image_ref()))?;
    Ok((descriptor, image_config))
}

/// Publish an event on the Dogu
pub async fn publish(ctx: &Context, dogu: &Dogu, type_: EventType, reason: &str, message: String) {
    ctx.events
        .publish(&dogu.object_ref(&()), type_, reason, message)
        .await;
}

/// Publish a warning for a failed workflow unless it only has to wait
pub async fn publish_failure(ctx: &Context, dogu: &Dogu, reason: &str, err: &Error) {
    if err.requeue_after().is_none() {
        publish(ctx, dogu, EventType::Warning, reason, err.to_string()).await;
    }
}
