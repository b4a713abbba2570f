//! Service accounts a dogu requests from provider dogus
//!
//! Each account is a credentials Secret `<dogu>-sa-<provider>` owned by the
//! consuming Dogu. Creation is idempotent; existing credentials are kept.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{DeleteParams, PostParams};
use kube::core::ObjectMeta;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use tracing::{debug, info};

use crate::controller::error::{Error, Result, ResultExt};
use crate::crd::Dogu;
use crate::registry::{Descriptor, LocalRegistry, ServiceAccount};
use crate::resources::common::{owner_reference, standard_labels};

const PROVIDER_LABEL: &str = "k8s.cloudogu.com/service-account-provider";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ServiceAccountManager: Send + Sync {
    /// Create all service accounts the descriptor asks for
    async fn create(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()>;

    /// Remove all service accounts the descriptor asks for
    async fn remove(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()>;
}

pub fn service_account_secret_name(consumer: &str, provider: &str) -> String {
    format!("{}-sa-{}", consumer, provider)
}

fn random_credential(len: usize) -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate the credentials Secret for one service account
pub fn generate_service_account_secret(dogu: &Dogu, account: &ServiceAccount) -> Secret {
    let consumer = dogu.simple_name();
    let mut labels = standard_labels(dogu);
    labels.insert(PROVIDER_LABEL.to_string(), account.type_.clone());

    let mut data = BTreeMap::from([
        (
            "username".to_string(),
            format!("{}_{}", consumer, random_credential(6)),
        ),
        ("password".to_string(), random_credential(24)),
    ]);
    if !account.params.is_empty() {
        data.insert("params".to_string(), account.params.join(" "));
    }

    Secret {
        metadata: ObjectMeta {
            name: Some(service_account_secret_name(consumer, &account.type_)),
            namespace: dogu.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(data),
        ..Default::default()
    }
}

pub struct SecretServiceAccountManager {
    client: Client,
    local: Arc<dyn LocalRegistry>,
}

impl SecretServiceAccountManager {
    pub fn new(client: Client, local: Arc<dyn LocalRegistry>) -> Self {
        Self { client, local }
    }
}

#[async_trait]
impl ServiceAccountManager for SecretServiceAccountManager {
    async fn create(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &ns);

        for account in &descriptor.service_accounts {
            if self.local.get_current(&ns, &account.type_).await?.is_none() {
                return Err(Error::DependencyError(format!(
                    "service account provider {} is not installed",
                    account.type_
                )));
            }
            let secret = generate_service_account_secret(dogu, account);
            match api.create(&PostParams::default(), &secret).await {
                Ok(_) => info!(provider = %account.type_, "created service account"),
                Err(kube::Error::Api(e)) if e.code == 409 => {
                    debug!(provider = %account.type_, "service account exists")
                }
                Err(e) => {
                    return Err(e).with_context(|| {
                        format!("create service account for {}", account.type_)
                    });
                }
            }
        }
        Ok(())
    }

    async fn remove(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &ns);

        for account in &descriptor.service_accounts {
            let name = service_account_secret_name(dogu.simple_name(), &account.type_);
            match api.delete(&name, &DeleteParams::default()).await {
                Ok(_) => debug!(secret = %name, "removed service account"),
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(e).with_context(|| format!("remove {}", name)),
            }
        }
        Ok(())
    }
}
