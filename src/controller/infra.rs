//! Reads and narrow mutations of the infrastructure objects owned by a Dogu

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Result, ResultExt};
use crate::resources::common::{FIELD_MANAGER, LABEL_DOGU_NAME};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait InfraClient: Send + Sync {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>>;

    /// Set the replica count of a deployment
    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()>;

    /// Pods carrying the dogu's selector label
    async fn list_dogu_pods(&self, namespace: &str, simple_name: &str) -> Result<Vec<Pod>>;

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>>;

    /// Raise the storage request of a PVC
    async fn resize_pvc(&self, namespace: &str, name: &str, size: &str) -> Result<()>;

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>>;
}

pub struct KubeInfraClient {
    client: Client,
}

impl KubeInfraClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl InfraClient for KubeInfraClient {
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Option<Deployment>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn scale_deployment(&self, namespace: &str, name: &str, replicas: i32) -> Result<()> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("scale {} to {}", name, replicas))?;
        Ok(())
    }

    async fn list_dogu_pods(&self, namespace: &str, simple_name: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().labels(&format!("{}={}", LABEL_DOGU_NAME, simple_name));
        Ok(api.list(&params).await?.items)
    }

    async fn get_pvc(&self, namespace: &str, name: &str) -> Result<Option<PersistentVolumeClaim>> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn resize_pvc(&self, namespace: &str, name: &str, size: &str) -> Result<()> {
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({
            "spec": { "resources": { "requests": { "storage": size } } }
        });
        api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .with_context(|| format!("resize {} to {}", name, size))?;
        Ok(())
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Option<Service>> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Replica count of the deployment spec
pub fn deployment_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Whether all desired replicas of the current generation are ready
pub fn deployment_ready(deployment: &Deployment) -> bool {
    let desired = deployment_replicas(deployment);
    let Some(status) = deployment.status.as_ref() else {
        return desired == 0;
    };
    let observed_current = match (deployment.metadata.generation, status.observed_generation) {
        (Some(generation), Some(observed)) => observed >= generation,
        _ => true,
    };
    let ready = status.ready_replicas.unwrap_or(0);
    let updated = status.updated_replicas.unwrap_or(0);
    let total = status.replicas.unwrap_or(0);
    observed_current && ready >= desired && updated >= desired && total == desired
}

/// Whether a pod reports the named container as ready
pub fn container_ready(pod: &Pod, container: &str) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|statuses| statuses.iter().any(|c| c.name == container && c.ready))
}

/// Whether a pod spec contains the named container
pub fn has_container(pod: &Pod, container: &str) -> bool {
    pod.spec
        .as_ref()
        .is_some_and(|s| s.containers.iter().any(|c| c.name == container))
}

/// Whether the pod template of a deployment contains the named container
pub fn deployment_has_container(deployment: &Deployment, container: &str) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .is_some_and(|p| p.containers.iter().any(|c| c.name == container))
}
