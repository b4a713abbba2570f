use std::sync::Arc;

use kube::Client;

use crate::config::OperatorConfig;
use crate::controller::client::{DoguClient, KubeDoguClient};
use crate::controller::custom_resources::{CustomResourceManager, KubeCustomResourceManager};
use crate::controller::dependency::{DependencyValidator, RegistryDependencyValidator};
use crate::controller::error::{BackoffConfig, Result};
use crate::controller::events::{EventPublisher, KubeEventPublisher};
use crate::controller::infra::{InfraClient, KubeInfraClient};
use crate::controller::service_account::{SecretServiceAccountManager, ServiceAccountManager};
use crate::health::HealthState;
use crate::registry::{
    ConfigMapLocalRegistry, DescriptorFetcher, DoguConfigStore, ImageRegistry,
    KubeDoguConfigStore, LocalRegistry, OciImageRegistry, RemoteDescriptorFetcher,
};
use crate::resources::{KubeResourceUpserter, KubeSecretWriter, ResourceUpserter, SecretWriter};

/// Name under which events are reported
pub const CONTROLLER_NAME: &str = "dogu-operator";

/// Shared context for the controllers
///
/// Every collaborator is an explicitly constructed trait object so workflows
/// can be driven against in-memory fakes.
#[derive(Clone)]
pub struct Context {
    pub dogus: Arc<dyn DoguClient>,
    pub infra: Arc<dyn InfraClient>,
    pub upserter: Arc<dyn ResourceUpserter>,
    pub descriptors: Arc<dyn DescriptorFetcher>,
    pub images: Arc<dyn ImageRegistry>,
    pub local_registry: Arc<dyn LocalRegistry>,
    pub dependencies: Arc<dyn DependencyValidator>,
    pub service_accounts: Arc<dyn ServiceAccountManager>,
    pub secrets: Arc<dyn SecretWriter>,
    pub custom_resources: Arc<dyn CustomResourceManager>,
    pub config_store: Arc<dyn DoguConfigStore>,
    pub events: Arc<dyn EventPublisher>,
    /// Backoff between conflict retries
    pub backoff: BackoffConfig,
    /// Metrics sink, absent in tests
    pub health_state: Option<Arc<HealthState>>,
}

impl Context {
    /// Wire the Kubernetes- and HTTP-backed collaborators
    pub fn from_client(
        client: Client,
        config: &OperatorConfig,
        health_state: Option<Arc<HealthState>>,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(CONTROLLER_NAME)
            .build()?;

        let local_registry: Arc<dyn LocalRegistry> =
            Arc::new(ConfigMapLocalRegistry::new(client.clone()));
        let upserter: Arc<dyn ResourceUpserter> =
            Arc::new(KubeResourceUpserter::new(client.clone()));

        Ok(Self {
            dogus: Arc::new(KubeDoguClient::new(client.clone())),
            infra: Arc::new(KubeInfraClient::new(client.clone())),
            descriptors: Arc::new(RemoteDescriptorFetcher::new(
                client.clone(),
                http.clone(),
                config.dogu_registry_endpoint.clone(),
                config.dogu_registry_credentials.clone(),
                local_registry.clone(),
            )),
            images: Arc::new(OciImageRegistry::new(
                http,
                config.docker_registry_credentials.clone(),
            )),
            dependencies: Arc::new(RegistryDependencyValidator::new(local_registry.clone())),
            service_accounts: Arc::new(SecretServiceAccountManager::new(
                client.clone(),
                local_registry.clone(),
            )),
            secrets: Arc::new(KubeSecretWriter::new(client.clone())),
            custom_resources: Arc::new(KubeCustomResourceManager::new(
                client.clone(),
                upserter.clone(),
            )),
            config_store: Arc::new(KubeDoguConfigStore::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client, CONTROLLER_NAME)),
            upserter,
            local_registry,
            backoff: BackoffConfig::default(),
            health_state,
        })
    }
}
