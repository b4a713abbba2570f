//! Dogu descriptors, container image metadata and the per-namespace
//! registry of installed dogus

pub mod config;
pub mod descriptor;
pub mod image;
pub mod local;
pub mod remote;
pub mod version;

use std::collections::BTreeMap;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::controller::error::Result;
use crate::crd::Dogu;

pub use config::KubeDoguConfigStore;
pub use descriptor::{Dependency, DependencyType, Descriptor, ExposedPort, ServiceAccount, Volume};
pub use image::{ImageReference, OciImageRegistry, parse_image_reference};
pub use local::ConfigMapLocalRegistry;
pub use remote::{RegistryCredentials, RemoteDescriptorFetcher};
pub use version::{DoguVersion, VersionConstraint, VersionError, satisfies};

/// Descriptor supplied through a `<simple-name>-descriptor` ConfigMap
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DevelopmentDescriptor {
    pub namespace: String,
    pub config_map: String,
}

/// Subset of an OCI image configuration used to shape the pod template
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ImageConfig {
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub entrypoint: Option<Vec<String>>,
    #[serde(default)]
    pub cmd: Option<Vec<String>>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub exposed_ports: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub labels: Option<BTreeMap<String, String>>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DescriptorFetcher: Send + Sync {
    /// Descriptor of the version that is currently installed
    async fn fetch_installed(&self, namespace: &str, simple_name: &str) -> Result<Descriptor>;

    /// Descriptor of the version the Dogu resource asks for, plus the
    /// development override it came from, if any
    async fn fetch_with_resource(
        &self,
        dogu: &Dogu,
    ) -> Result<(Descriptor, Option<DevelopmentDescriptor>)>;

    /// Delete a development override once it has been consumed
    async fn remove_development_descriptor(&self, dev: &DevelopmentDescriptor) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ImageRegistry: Send + Sync {
    async fn pull_image_config(&self, image: &str) -> Result<ImageConfig>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LocalRegistry: Send + Sync {
    /// Store the descriptor and mark its version as current
    async fn register(&self, namespace: &str, descriptor: &Descriptor) -> Result<()>;

    async fn unregister(&self, namespace: &str, simple_name: &str) -> Result<()>;

    /// Descriptor of the current version, `None` if the dogu is not registered
    async fn get_current(&self, namespace: &str, simple_name: &str)
    -> Result<Option<Descriptor>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DoguConfigStore: Send + Sync {
    /// Delete the dogu's configuration objects; missing objects are fine
    async fn delete(&self, namespace: &str, simple_name: &str) -> Result<()>;
}
