//! Custom resources shipped inside dogu images
//!
//! A dogu image may carry Kubernetes manifests under `/k8s`. They are read
//! through a short-lived exec pod running the dogu image and applied with
//! server-side apply, resolving each kind through API discovery.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{AttachParams, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::{Scope, pinned_kind};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::Dogu;
use crate::registry::Descriptor;
use crate::resources::ResourceUpserter;
use crate::resources::common::FIELD_MANAGER;
use crate::resources::exec_pod::exec_pod_name;

const MANIFEST_GLOB: &str = "/k8s/*.yaml";
const EXEC_POD_WAIT: std::time::Duration = std::time::Duration::from_secs(5);

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CustomResourceManager: Send + Sync {
    /// Extract the manifests of the descriptor's image and apply them
    async fn apply(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()>;
}

/// Split multi-document YAML into dynamic objects, skipping empty documents
pub fn parse_manifests(raw: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for document in serde_yaml::Deserializer::from_str(raw) {
        let value = serde_yaml::Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value)?;
        if object.types.is_none() {
            return Err(Error::ValidationError(format!(
                "manifest {} has no apiVersion/kind",
                object.name_any()
            )));
        }
        objects.push(object);
    }
    Ok(objects)
}

fn pod_running(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        == Some("Running")
}

pub struct KubeCustomResourceManager {
    client: Client,
    upserter: Arc<dyn ResourceUpserter>,
}

impl KubeCustomResourceManager {
    pub fn new(client: Client, upserter: Arc<dyn ResourceUpserter>) -> Self {
        Self { client, upserter }
    }

    async fn read_manifests(&self, pods: &Api<Pod>, pod: &str) -> Result<String> {
        let command = vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("cat {} 2>/dev/null || true", MANIFEST_GLOB),
        ];
        let params = AttachParams {
            stdin: false,
            stdout: true,
            stderr: false,
            tty: false,
            ..Default::default()
        };

        let mut attached = pods.exec(pod, command, &params).await?;
        let mut buffer = Vec::new();
        {
            let mut stdout = attached
                .stdout()
                .ok_or_else(|| Error::ExecError("no stdout from exec".to_string()))?;
            stdout.read_to_end(&mut buffer).await?;
        }
        attached
            .join()
            .await
            .map_err(|e| Error::ExecError(e.to_string()))?;
        Ok(String::from_utf8_lossy(&buffer).to_string())
    }

    async fn apply_object(&self, namespace: &str, object: &DynamicObject) -> Result<()> {
        let types = object
            .types
            .as_ref()
            .ok_or(Error::MissingObjectKey("apiVersion/kind"))?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| Error::ValidationError(e.to_string()))?;
        let (resource, capabilities) = pinned_kind(&self.client, &gvk).await?;

        let api: Api<DynamicObject> = match capabilities.scope {
            Scope::Namespaced => Api::namespaced_with(self.client.clone(), namespace, &resource),
            Scope::Cluster => Api::all_with(self.client.clone(), &resource),
        };
        let name = object.name_any();
        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(object))
            .await
            .with_context(|| format!("apply {} {}", gvk.kind, name))?;
        debug!(kind = %gvk.kind, name = %name, "applied custom resource");
        Ok(())
    }
}

#[async_trait]
impl CustomResourceManager for KubeCustomResourceManager {
    async fn apply(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
        let pod_name = exec_pod_name(dogu.simple_name());

        let pod = self.upserter.upsert_exec_pod(dogu, descriptor).await?;
        if !pod_running(&pod) {
            let pod = pods.get(&pod_name).await?;
            if !pod_running(&pod) {
                return Err(Error::not_yet_converged(
                    format!("exec pod {} is not running yet", pod_name),
                    EXEC_POD_WAIT,
                ));
            }
        }

        let raw = self
            .read_manifests(&pods, &pod_name)
            .await
            .context("read custom resources from image")?;
        let objects = parse_manifests(&raw)?;
        for object in &objects {
            self.apply_object(&ns, object).await?;
        }
        if !objects.is_empty() {
            info!(
                count = objects.len(),
                image = %descriptor.image_ref(),
                "applied custom resources"
            );
        }

        self.upserter.delete_exec_pod(dogu).await
    }
}
