//! Dogu health from deployment readiness
//!
//! A watcher over dogu deployments mirrors readiness into
//! `Dogu.status.health`. The watcher keeps the last seen deployment per key
//! to turn raw watch events into [`ChangeEvent`]s. A relist replaces that map,
//! so deletions missed while the watch was down still surface.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::WatchStreamExt;
use kube::runtime::watcher::{self, Event};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use crate::controller::Context;
use crate::controller::error::{Error, Result};
use crate::controller::predicates::{
    ChangeEvent, dogu_label, health_after, is_dogu_deployment, readiness_changed,
};
use crate::controller::retry::update_dogu_status_with_retry;
use crate::resources::common::LABEL_DOGU_NAME;

type Key = (String, String);

/// Translates watch events and keeps the previous object per key
#[derive(Default)]
pub struct DeploymentTracker {
    last_seen: HashMap<Key, Deployment>,
    /// Keys listed since the current relist started
    relisted: Option<HashSet<Key>>,
}

impl DeploymentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(deployment: &Deployment) -> Key {
        (deployment.namespace().unwrap_or_default(), deployment.name_any())
    }

    pub fn applied(&mut self, deployment: Deployment) -> ChangeEvent<Deployment> {
        let key = Self::key(&deployment);
        if let Some(listed) = self.relisted.as_mut() {
            listed.insert(key.clone());
        }
        match self.last_seen.insert(key, deployment.clone()) {
            Some(old) => ChangeEvent::Updated { old, new: deployment },
            None => ChangeEvent::Created(deployment),
        }
    }

    pub fn deleted(&mut self, deployment: Deployment) -> ChangeEvent<Deployment> {
        self.last_seen.remove(&Self::key(&deployment));
        ChangeEvent::Deleted(deployment)
    }

    pub fn relist_started(&mut self) {
        self.relisted = Some(HashSet::new());
    }

    /// Drop everything the relist did not return, as deletions
    pub fn relist_done(&mut self) -> Vec<ChangeEvent<Deployment>> {
        let Some(listed) = self.relisted.take() else {
            return Vec::new();
        };
        let gone: Vec<Key> = self
            .last_seen
            .keys()
            .filter(|k| !listed.contains(*k))
            .cloned()
            .collect();
        gone.into_iter()
            .filter_map(|k| self.last_seen.remove(&k))
            .map(ChangeEvent::Deleted)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.last_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_seen.is_empty()
    }
}

/// Write the health implied by a deployment event onto its Dogu.
///
/// Returns whether the status was changed.
pub async fn apply_health(ctx: &Context, event: &ChangeEvent<Deployment>) -> Result<bool> {
    if !is_dogu_deployment(event) || !readiness_changed(event) {
        return Ok(false);
    }
    let deployment = event.object();
    let ns = deployment.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
    let Some(name) = dogu_label(deployment) else {
        return Ok(false);
    };
    let health = health_after(event);

    let Some(dogu) = ctx.dogus.get_dogu(&ns, name).await? else {
        debug!(dogu = name, "no dogu for deployment");
        return Ok(false);
    };
    if dogu.status.as_ref().is_some_and(|s| s.health == health) {
        return Ok(false);
    }

    match update_dogu_status_with_retry(ctx.dogus.as_ref(), &ctx.backoff, &ns, name, |s| {
        s.health = health
    })
    .await
    {
        Ok(_) => {
            info!(dogu = name, ?health, "dogu health changed");
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// Watch dogu deployments in the namespace and keep dogu health current
pub async fn run_health_watcher(client: Client, namespace: &str, ctx: Arc<Context>) {
    info!(namespace, "starting dogu health watcher");
    let api: Api<Deployment> = Api::namespaced(client, namespace);
    let config = watcher::Config::default().labels(LABEL_DOGU_NAME);
    let mut tracker = DeploymentTracker::new();

    let mut events = watcher::watcher(api, config).default_backoff().boxed();
    while let Some(event) = events.next().await {
        let changes = match event {
            Ok(Event::Apply(d)) | Ok(Event::InitApply(d)) => vec![tracker.applied(d)],
            Ok(Event::Delete(d)) => vec![tracker.deleted(d)],
            Ok(Event::Init) => {
                tracker.relist_started();
                continue;
            }
            Ok(Event::InitDone) => tracker.relist_done(),
            Err(e) => {
                warn!(error = %e, "deployment watch failed");
                continue;
            }
        };
        for change in changes {
            if let Err(e) = apply_health(&ctx, &change).await {
                warn!(
                    error = %e,
                    deployment = %change.object().name_any(),
                    "failed to update dogu health"
                );
            }
        }
    }
    warn!("dogu health watcher stream ended");
}
