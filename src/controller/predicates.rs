//! Pure predicates over watch events
//!
//! Watch streams are translated into [`ChangeEvent`]s so filtering decisions
//! can be tested without a running controller.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use kube::runtime::reflector::ObjectRef;
use kube::{Resource, ResourceExt};

use crate::controller::infra::deployment_ready;
use crate::crd::{Dogu, DoguRestart, HealthStatus};
use crate::resources::common::LABEL_DOGU_NAME;

/// A single change of a watched object
#[derive(Clone, Debug)]
pub enum ChangeEvent<K> {
    Created(K),
    Updated { old: K, new: K },
    Deleted(K),
}

impl<K> ChangeEvent<K> {
    /// Latest known state of the object
    pub fn object(&self) -> &K {
        match self {
            ChangeEvent::Created(obj) | ChangeEvent::Deleted(obj) => obj,
            ChangeEvent::Updated { new, .. } => new,
        }
    }
}

/// Name of the dogu an object belongs to, taken from its labels
pub fn dogu_label<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .labels
        .as_ref()
        .and_then(|l| l.get(LABEL_DOGU_NAME))
        .map(String::as_str)
}

pub fn is_dogu_deployment(event: &ChangeEvent<Deployment>) -> bool {
    dogu_label(event.object()).is_some()
}

/// Creations and deletions always count, updates only when readiness flipped
pub fn readiness_changed(event: &ChangeEvent<Deployment>) -> bool {
    match event {
        ChangeEvent::Updated { old, new } => deployment_ready(old) != deployment_ready(new),
        _ => true,
    }
}

/// Health a dogu has after the event
pub fn health_after(event: &ChangeEvent<Deployment>) -> HealthStatus {
    match event {
        ChangeEvent::Deleted(_) => HealthStatus::Unavailable,
        other if deployment_ready(other.object()) => HealthStatus::Available,
        _ => HealthStatus::Unavailable,
    }
}

/// Restarts that wait for the given dogu and may advance after it changed
pub fn restarts_for_dogu(
    dogu: &Dogu,
    restarts: &[Arc<DoguRestart>],
) -> Vec<ObjectRef<DoguRestart>> {
    let namespace = dogu.namespace();
    restarts
        .iter()
        .filter(|r| r.namespace() == namespace)
        .filter(|r| r.spec.dogu_name == dogu.name_any())
        .filter(|r| !r.phase().is_terminal())
        .map(|r| ObjectRef::from_obj(r.as_ref()))
        .collect()
}
