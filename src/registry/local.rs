//! Registry of installed dogus, one ConfigMap per dogu
//!
//! `dogu-spec-<simple-name>` holds one key per registered version with the
//! descriptor JSON and a `current` key naming the installed version.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{DeleteParams, Patch, PatchParams};
use kube::core::ObjectMeta;
use kube::{Api, Client};
use tracing::debug;

use crate::controller::error::{Error, Result, ResultExt};
use crate::registry::{Descriptor, LocalRegistry};
use crate::resources::common::{FIELD_MANAGER, LABEL_DOGU_NAME};

const CURRENT_KEY: &str = "current";
const REGISTRY_TYPE_LABEL: &str = "k8s.cloudogu.com/type";
const REGISTRY_TYPE: &str = "local-dogu-registry";

pub fn spec_config_map_name(simple_name: &str) -> String {
    format!("dogu-spec-{}", simple_name)
}

pub struct ConfigMapLocalRegistry {
    client: Client,
}

impl ConfigMapLocalRegistry {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Read the current descriptor out of a registry ConfigMap
fn current_descriptor(cm: &ConfigMap) -> Result<Option<Descriptor>> {
    let Some(data) = cm.data.as_ref() else {
        return Ok(None);
    };
    let Some(version) = data.get(CURRENT_KEY) else {
        return Ok(None);
    };
    let raw = data.get(version).ok_or_else(|| {
        Error::RegistryError(format!("current version {} has no descriptor", version))
    })?;
    Ok(Some(serde_json::from_str(raw)?))
}

#[async_trait]
impl LocalRegistry for ConfigMapLocalRegistry {
    async fn register(&self, namespace: &str, descriptor: &Descriptor) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let name = spec_config_map_name(descriptor.simple_name());

        let mut data = BTreeMap::new();
        data.insert(descriptor.version.clone(), serde_json::to_string(descriptor)?);
        data.insert(CURRENT_KEY.to_string(), descriptor.version.clone());

        let cm = ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([
                    (LABEL_DOGU_NAME.to_string(), descriptor.simple_name().to_string()),
                    (REGISTRY_TYPE_LABEL.to_string(), REGISTRY_TYPE.to_string()),
                ])),
                ..Default::default()
            },
            data: Some(data),
            ..Default::default()
        };

        api.patch(&name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&cm))
            .await
            .with_context(|| format!("register {} {}", descriptor.name, descriptor.version))?;
        debug!(dogu = %descriptor.name, version = %descriptor.version, "registered dogu");
        Ok(())
    }

    async fn unregister(&self, namespace: &str, simple_name: &str) -> Result<()> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api
            .delete(&spec_config_map_name(simple_name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(e).with_context(|| format!("unregister {}", simple_name)),
        }
    }

    async fn get_current(
        &self,
        namespace: &str,
        simple_name: &str,
    ) -> Result<Option<Descriptor>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        match api.get_opt(&spec_config_map_name(simple_name)).await? {
            Some(cm) => current_descriptor(&cm),
            None => Ok(None),
        }
    }
}
