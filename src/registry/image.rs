//! Image configuration lookup over the OCI distribution API
//!
//! Only the manifest and the config blob are fetched; layers are never
//! downloaded. Registries answering 401 are retried once with a bearer token
//! obtained from the realm named in `WWW-Authenticate`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use serde::Deserialize;
use tracing::debug;

use crate::controller::error::{Error, Result, ResultExt};
use crate::registry::remote::RegistryCredentials;
use crate::registry::{ImageConfig, ImageRegistry};

const DEFAULT_REGISTRY: &str = "registry-1.docker.io";

const MANIFEST_ACCEPT: &str = "application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub registry: String,
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    /// Digest if pinned, else the tag
    pub fn reference(&self) -> &str {
        self.digest
            .as_deref()
            .or(self.tag.as_deref())
            .unwrap_or("latest")
    }
}

pub fn parse_image_reference(image: &str) -> Result<ImageReference> {
    let invalid = |why: &str| {
        Error::RegistryError(format!("invalid image reference {:?}: {}", image, why))
    };
    if image.trim().is_empty() {
        return Err(invalid("empty"));
    }

    let (without_digest, digest) = match image.split_once('@') {
        Some((reference, digest)) => {
            if !digest.starts_with("sha256:") {
                return Err(invalid("unsupported digest"));
            }
            (reference, Some(digest.to_string()))
        }
        None => (image, None),
    };

    let (without_tag, tag) = match without_digest.rsplit_once(':') {
        Some((reference, tag)) if !tag.contains('/') => (reference, Some(tag.to_string())),
        _ => (without_digest, None),
    };

    let (registry, repository) = match without_tag.split_once('/') {
        Some((host, rest)) if host.contains('.') || host.contains(':') || host == "localhost" => {
            (host.to_string(), rest.to_string())
        }
        _ if without_tag.contains('/') => (DEFAULT_REGISTRY.to_string(), without_tag.to_string()),
        _ => (DEFAULT_REGISTRY.to_string(), format!("library/{}", without_tag)),
    };
    if repository.is_empty() {
        return Err(invalid("missing repository"));
    }

    let tag = match (&tag, &digest) {
        (None, None) => Some("latest".to_string()),
        _ => tag,
    };

    Ok(ImageReference {
        registry,
        repository,
        tag,
        digest,
    })
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ManifestResponse {
    Index { manifests: Vec<IndexEntry> },
    Manifest { config: BlobDescriptor },
}

#[derive(Debug, Deserialize)]
struct IndexEntry {
    digest: String,
    platform: Option<Platform>,
}

#[derive(Debug, Deserialize)]
struct Platform {
    architecture: String,
    os: String,
}

#[derive(Debug, Deserialize)]
struct BlobDescriptor {
    digest: String,
}

#[derive(Debug, Deserialize)]
struct ConfigBlob {
    #[serde(default)]
    config: ImageConfig,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(alias = "access_token")]
    token: String,
}

/// Parse `Bearer realm="...",service="...",scope="..."`
fn parse_bearer_challenge(header: &str) -> Option<BTreeMap<String, String>> {
    let params = header.strip_prefix("Bearer ")?;
    let mut out = BTreeMap::new();
    for part in params.split(',') {
        let (key, value) = part.trim().split_once('=')?;
        out.insert(key.to_string(), value.trim_matches('"').to_string());
    }
    out.contains_key("realm").then_some(out)
}

fn select_platform(entries: &[IndexEntry]) -> Option<&str> {
    entries
        .iter()
        .find(|e| {
            e.platform
                .as_ref()
                .is_some_and(|p| p.os == "linux" && p.architecture == "amd64")
        })
        .or_else(|| entries.first())
        .map(|e| e.digest.as_str())
}

pub struct OciImageRegistry {
    http: reqwest::Client,
    credentials: RegistryCredentials,
}

impl OciImageRegistry {
    pub fn new(http: reqwest::Client, credentials: RegistryCredentials) -> Self {
        Self { http, credentials }
    }

    async fn token(&self, challenge: &str) -> Result<String> {
        let params = parse_bearer_challenge(challenge)
            .ok_or_else(|| {
                Error::RegistryError(format!("unsupported auth challenge {}", challenge))
            })?;
        let mut request = self.http.get(&params["realm"]);
        let query: Vec<(&str, &str)> = ["service", "scope"]
            .iter()
            .filter_map(|k| params.get(*k).map(|v| (*k, v.as_str())))
            .collect();
        request = request.query(&query);
        let response = self
            .credentials
            .apply(request)
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json::<TokenResponse>().await?.token)
    }

    /// GET with registry auth; `token` caches the bearer token across calls for one image
    async fn get(
        &self,
        url: &str,
        accept: &str,
        token: &mut Option<String>,
    ) -> Result<reqwest::Response> {
        let send = |token: &Option<String>| {
            let request = self.http.get(url).header(ACCEPT, accept);
            let request = match token {
                Some(t) => request.bearer_auth(t),
                None => self.credentials.apply(request),
            };
            request.send()
        };

        let response = send(token).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response.error_for_status()?);
        }
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        *token = Some(self.token(&challenge).await?);
        Ok(send(token).await?.error_for_status()?)
    }
}

#[async_trait]
impl ImageRegistry for OciImageRegistry {
    async fn pull_image_config(&self, image: &str) -> Result<ImageConfig> {
        let reference = parse_image_reference(image)?;
        let base = format!("https://{}/v2/{}", reference.registry, reference.repository);
        let mut token = None;

        let mut manifest: ManifestResponse = self
            .get(
                &format!("{}/manifests/{}", base, reference.reference()),
                MANIFEST_ACCEPT,
                &mut token,
            )
            .await
            .with_context(|| format!("fetch manifest of {}", image))?
            .json()
            .await?;

        if let ManifestResponse::Index { manifests } = &manifest {
            let digest = select_platform(manifests)
                .ok_or_else(|| Error::RegistryError(format!("empty image index for {}", image)))?
                .to_string();
            debug!(image, digest = %digest, "resolved image index");
            manifest = self
                .get(&format!("{}/manifests/{}", base, digest), MANIFEST_ACCEPT, &mut token)
                .await?
                .json()
                .await?;
        }

        let ManifestResponse::Manifest { config } = manifest else {
            return Err(Error::RegistryError(format!("nested image index for {}", image)));
        };
        let blob: ConfigBlob = self
            .get(&format!("{}/blobs/{}", base, config.digest), "application/json", &mut token)
            .await
            .with_context(|| format!("fetch image config of {}", image))?
            .json()
            .await?;
        Ok(blob.config)
    }
}
