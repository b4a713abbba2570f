//! Typed access to Dogu and DoguRestart objects
//!
//! Every write carries the resourceVersion that was read, so a concurrent
//! writer makes the API server answer with 409 which surfaces as
//! [`Error::Conflict`].

use async_trait::async_trait;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::crd::{Dogu, DoguRestart};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DoguClient: Send + Sync {
    /// Get a Dogu, `None` if it does not exist
    async fn get_dogu(&self, namespace: &str, name: &str) -> Result<Option<Dogu>>;

    /// Replace metadata and spec of a Dogu
    async fn update_dogu(&self, dogu: &Dogu) -> Result<Dogu>;

    /// Replace the status subresource of a Dogu
    async fn update_dogu_status(&self, dogu: &Dogu) -> Result<Dogu>;

    /// Get a DoguRestart, `None` if it does not exist
    async fn get_restart(&self, namespace: &str, name: &str) -> Result<Option<DoguRestart>>;

    /// Replace the status subresource of a DoguRestart
    async fn update_restart_status(&self, restart: &DoguRestart) -> Result<DoguRestart>;
}

/// Kubernetes-backed [`DoguClient`]
pub struct KubeDoguClient {
    client: Client,
}

impl KubeDoguClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

const STATUS_MANAGER: &str = "dogu-operator";

fn map_write_error(e: kube::Error) -> Error {
    match e {
        kube::Error::Api(ref api_err) if api_err.code == 409 => {
            Error::Conflict(api_err.message.clone())
        }
        other => Error::KubeError(other),
    }
}

/// Merge patch for the status that only applies to the resourceVersion it was computed from
fn status_patch<S: serde::Serialize>(
    resource_version: Option<String>,
    status: &S,
) -> serde_json::Value {
    serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    })
}

#[async_trait]
impl DoguClient for KubeDoguClient {
    async fn get_dogu(&self, namespace: &str, name: &str) -> Result<Option<Dogu>> {
        let api: Api<Dogu> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_dogu(&self, dogu: &Dogu) -> Result<Dogu> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Dogu> = Api::namespaced(self.client.clone(), &ns);
        api.replace(&dogu.name_any(), &PostParams::default(), dogu)
            .await
            .map_err(map_write_error)
    }

    async fn update_dogu_status(&self, dogu: &Dogu) -> Result<Dogu> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Dogu> = Api::namespaced(self.client.clone(), &ns);
        let patch = status_patch(dogu.resource_version(), &dogu.status);
        api.patch_status(
            &dogu.name_any(),
            &PatchParams::apply(STATUS_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(map_write_error)
    }

    async fn get_restart(&self, namespace: &str, name: &str) -> Result<Option<DoguRestart>> {
        let api: Api<DoguRestart> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn update_restart_status(&self, restart: &DoguRestart) -> Result<DoguRestart> {
        let ns = restart
            .namespace()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<DoguRestart> = Api::namespaced(self.client.clone(), &ns);
        let patch = status_patch(restart.resource_version(), &restart.status);
        api.patch_status(
            &restart.name_any(),
            &PatchParams::apply(STATUS_MANAGER),
            &Patch::Merge(&patch),
        )
        .await
        .map_err(map_write_error)
    }
}
