use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::PostParams;
use kube::core::ObjectMeta;
use kube::{Api, Client, ResourceExt};
#[cfg(test)]
use mockall::automock;
use rand::Rng;
use tracing::debug;

use crate::controller::error::{Error, Result};
use crate::crd::Dogu;
use crate::registry::Descriptor;
use crate::resources::common::{owner_reference, standard_labels};

/// Key holding the generated per-dogu secret
pub const INSTANCE_SECRET_KEY: &str = "instance-secret";

pub fn secret_name(simple_name: &str) -> String {
    format!("{}-secrets", simple_name)
}

/// Generate a secure random password
fn generate_password(len: usize) -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..len)
        .map(|_| CHARSET[rng.random_range(0..CHARSET.len())] as char)
        .collect()
}

/// Generate the dogu Secret with freshly generated values
pub fn generate_dogu_secret(dogu: &Dogu, descriptor: &Descriptor) -> Secret {
    let string_data = BTreeMap::from([
        (INSTANCE_SECRET_KEY.to_string(), generate_password(32)),
        ("DOGU_NAME".to_string(), descriptor.name.clone()),
    ]);

    Secret {
        metadata: ObjectMeta {
            name: Some(secret_name(dogu.simple_name())),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(dogu)),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        string_data: Some(string_data),
        ..Default::default()
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretWriter: Send + Sync {
    /// Create the dogu Secret unless it already exists
    async fn write_dogu_secrets(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()>;
}

pub struct KubeSecretWriter {
    client: Client,
}

impl KubeSecretWriter {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretWriter for KubeSecretWriter {
    async fn write_dogu_secrets(&self, dogu: &Dogu, descriptor: &Descriptor) -> Result<()> {
        let ns = dogu.namespace().ok_or(Error::MissingObjectKey("namespace"))?;
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &ns);
        let secret = generate_dogu_secret(dogu, descriptor);

        // generated values must not be rotated by re-delivery
        match api.create(&PostParams::default(), &secret).await {
            Ok(_) => {
                debug!(secret = %secret.name_any(), "created dogu secret");
                Ok(())
            }
            Err(kube::Error::Api(e)) if e.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
