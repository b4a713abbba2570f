//! Descriptor lookup: development override, local registry and the remote
//! dogu registry

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DeleteParams;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::Dogu;
use crate::registry::{DescriptorFetcher, Descriptor, DevelopmentDescriptor, LocalRegistry};

const DEVELOPMENT_DESCRIPTOR_KEY: &str = "dogu.json";

pub fn development_config_map_name(simple_name: &str) -> String {
    format!("{}-descriptor", simple_name)
}

/// Basic auth credentials for a registry
#[derive(Clone, Debug, Default)]
pub struct RegistryCredentials {
    pub username: Option<String>,
    pub password: Option<String>,
}

impl RegistryCredentials {
    pub fn apply(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.username {
            Some(user) => request.basic_auth(user, self.password.as_deref()),
            None => request,
        }
    }
}

pub struct RemoteDescriptorFetcher {
    client: Client,
    http: reqwest::Client,
    endpoint: String,
    credentials: RegistryCredentials,
    local: Arc<dyn LocalRegistry>,
}

impl RemoteDescriptorFetcher {
    pub fn new(
        client: Client,
        http: reqwest::Client,
        endpoint: impl Into<String>,
        credentials: RegistryCredentials,
        local: Arc<dyn LocalRegistry>,
    ) -> Self {
        Self {
            client,
            http,
            endpoint: endpoint.into(),
            credentials,
            local,
        }
    }

    async fn development_descriptor(
        &self,
        namespace: &str,
        simple_name: &str,
    ) -> Result<Option<(Descriptor, DevelopmentDescriptor)>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = development_config_map_name(simple_name);
        let Some(cm) = api.get_opt(&name).await? else {
            return Ok(None);
        };
        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get(DEVELOPMENT_DESCRIPTOR_KEY))
            .ok_or_else(|| {
                Error::RegistryError(format!("{} has no {} key", name, DEVELOPMENT_DESCRIPTOR_KEY))
            })?;
        let descriptor = serde_json::from_str(raw).context("parse development descriptor")?;
        Ok(Some((
            descriptor,
            DevelopmentDescriptor {
                namespace: namespace.to_string(),
                config_map: name,
            },
        )))
    }

    async fn fetch_remote(&self, name: &str, version: &str) -> Result<Descriptor> {
        let url = descriptor_url(&self.endpoint, name, version);
        debug!(url = %url, "fetching dogu descriptor");
        let response = self
            .credentials
            .apply(self.http.get(&url))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<Descriptor>().await?)
    }
}

fn descriptor_url(endpoint: &str, name: &str, version: &str) -> String {
    format!("{}/{}/{}", endpoint.trim_end_matches('/'), name, version)
}

#[async_trait]
impl DescriptorFetcher for RemoteDescriptorFetcher {
    async fn fetch_installed(&self, namespace: &str, simple_name: &str) -> Result<Descriptor> {
        self.local
            .get_current(namespace, simple_name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("installed descriptor of {}", simple_name)))
    }

    async fn fetch_with_resource(
        &self,
        dogu: &Dogu,
    ) -> Result<(Descriptor, Option<DevelopmentDescriptor>)> {
        let namespace = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        if let Some((descriptor, dev)) = self
            .development_descriptor(&namespace, dogu.simple_name())
            .await?
        {
            info!(
                dogu = %dogu.spec.name,
                config_map = %dev.config_map,
                "using development descriptor"
            );
            return Ok((descriptor, Some(dev)));
        }

        let descriptor = self
            .fetch_remote(&dogu.spec.name, &dogu.spec.version)
            .await
            .with_context(|| format!("fetch descriptor {}:{}", dogu.spec.name, dogu.spec.version))?;
        Ok((descriptor, None))
    }

    async fn remove_development_descriptor(&self, dev: &DevelopmentDescriptor) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), &dev.namespace);
        match api.delete(&dev.config_map, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context("remove development descriptor"),
        }
    }
}
