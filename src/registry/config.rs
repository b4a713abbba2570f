use async_trait::async_trait;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::api::DeleteParams;
use kube::{Api, Client};

use crate::controller::error::{Result, ResultExt};
use crate::registry::DoguConfigStore;

/// Name of the ConfigMap and Secret holding a dogu's configuration
pub fn config_name(simple_name: &str) -> String {
    format!("{}-config", simple_name)
}

/// Dogu configuration kept in a ConfigMap (plain values) and a Secret (sensitive values)
pub struct KubeDoguConfigStore {
    client: Client,
}

impl KubeDoguConfigStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DoguConfigStore for KubeDoguConfigStore {
    async fn delete(&self, namespace: &str, simple_name: &str) -> Result<()> {
        let name = config_name(simple_name);

        let config_maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match config_maps.delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(e)) if e.code == 404 => {}
            Err(e) => return Err(e).context("delete dogu config"),
        }

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        match secrets.delete(&name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).context("delete sensitive dogu config"),
        }
    }
}
