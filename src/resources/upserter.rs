//! Create-or-update of the objects owned by a Dogu
//!
//! Everything except PVCs is written with server-side apply, so applying the
//! same generated object twice is a no-op. PVCs are only created; growing
//! them is the volume resize ladder's job and shrinking is never allowed.

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Pod, Service};
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::Dogu;
use crate::registry::{Descriptor, ImageConfig};
use crate::resources::common::FIELD_MANAGER;
use crate::resources::deployment::{PodTemplateOptions, generate_deployment};
use crate::resources::exec_pod::{exec_pod_name, generate_exec_pod};
use crate::resources::pvc::generate_data_pvc;
use crate::resources::service::{generate_exposed_services, generate_service};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceUpserter: Send + Sync {
    async fn upsert_service(&self, dogu: &Dogu, image_config: &ImageConfig) -> Result<Service>;

    async fn upsert_exposed_services(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
    ) -> Result<Vec<Service>>;

    async fn upsert_exec_pod(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<Pod>;

    async fn delete_exec_pod(&self, dogu: &Dogu) -> Result<()>;

    async fn upsert_pvcs(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
    ) -> Result<Vec<PersistentVolumeClaim>>;

    async fn upsert_deployment(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
        image_config: &ImageConfig,
        options: PodTemplateOptions,
    ) -> Result<Deployment>;
}

pub struct KubeResourceUpserter {
    client: Client,
}

impl KubeResourceUpserter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Apply a Kubernetes resource using server-side apply
    async fn apply_resource<T>(&self, resource: &T) -> Result<T>
    where
        T: kube::Resource<Scope = NamespaceResourceScope>
            + Serialize
            + DeserializeOwned
            + Clone
            + std::fmt::Debug,
        <T as kube::Resource>::DynamicType: Default,
    {
        let ns = resource
            .namespace()
            .ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<T> = Api::namespaced(self.client.clone(), &ns);
        let name = resource.name_any();

        let applied = api
            .patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(resource))
            .await
            .with_context(|| format!("apply {}", name))?;
        debug!(resource = %name, "applied resource");
        Ok(applied)
    }
}

#[async_trait]
impl ResourceUpserter for KubeResourceUpserter {
    async fn upsert_service(&self, dogu: &Dogu, image_config: &ImageConfig) -> Result<Service> {
        self.apply_resource(&generate_service(dogu, image_config)?)
            .await
    }

    async fn upsert_exposed_services(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
    ) -> Result<Vec<Service>> {
        let mut applied = Vec::new();
        for service in generate_exposed_services(dogu, descriptor) {
            applied.push(self.apply_resource(&service).await?);
        }
        Ok(applied)
    }

    async fn upsert_exec_pod(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<Pod> {
        self.apply_resource(&generate_exec_pod(dogu, descriptor))
            .await
    }

    async fn delete_exec_pod(&self, dogu: &Dogu) -> Result<()> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
        match api
            .delete(&exec_pod_name(dogu.simple_name()), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context("delete exec pod"),
        }
    }

    async fn upsert_pvcs(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
    ) -> Result<Vec<PersistentVolumeClaim>> {
        let Some(pvc) = generate_data_pvc(dogu, descriptor) else {
            return Ok(Vec::new());
        };
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<PersistentVolumeClaim> = Api::namespaced(self.client.clone(), &ns);
        if let Some(existing) = api.get_opt(&pvc.name_any()).await? {
            return Ok(vec![existing]);
        }
        Ok(vec![self.apply_resource(&pvc).await?])
    }

    async fn upsert_deployment(
        &self,
        dogu: &Dogu,
        descriptor: &Descriptor,
        image_config: &ImageConfig,
        options: PodTemplateOptions,
    ) -> Result<Deployment> {
        self.apply_resource(&generate_deployment(dogu, descriptor, image_config, options))
            .await
    }
}
