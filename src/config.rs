//! Operator configuration read from the environment

use thiserror::Error;

use crate::registry::RegistryCredentials;

pub const DEFAULT_DOGU_REGISTRY_ENDPOINT: &str = "https://dogu.cloudogu.com/api/v2/dogus";
pub const DEFAULT_MAX_CONCURRENT_RECONCILES: u16 = 4;
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("environment variable {0} must be set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace whose Dogus are reconciled
    pub namespace: String,
    /// Identity used for leader election and event reporting
    pub pod_name: Option<String>,
    pub dogu_registry_endpoint: String,
    pub dogu_registry_credentials: RegistryCredentials,
    pub docker_registry_credentials: RegistryCredentials,
    /// Upper bound of parallel reconciliations per controller
    pub max_concurrent_reconciles: u16,
    pub health_port: u16,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let namespace = non_empty("NAMESPACE").ok_or(ConfigError::Missing("NAMESPACE"))?;

        let max_concurrent_reconciles = match non_empty("MAX_CONCURRENT_RECONCILES") {
            Some(raw) => parse_positive("MAX_CONCURRENT_RECONCILES", &raw)?,
            None => DEFAULT_MAX_CONCURRENT_RECONCILES,
        };
        let health_port = match non_empty("HEALTH_PORT") {
            Some(raw) => parse_positive("HEALTH_PORT", &raw)?,
            None => DEFAULT_HEALTH_PORT,
        };

        Ok(Self {
            namespace,
            pod_name: non_empty("POD_NAME"),
            dogu_registry_endpoint: non_empty("DOGU_REGISTRY_ENDPOINT")
                .map(|e| e.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_DOGU_REGISTRY_ENDPOINT.to_string()),
            dogu_registry_credentials: RegistryCredentials {
                username: non_empty("DOGU_REGISTRY_USERNAME"),
                password: non_empty("DOGU_REGISTRY_PASSWORD"),
            },
            docker_registry_credentials: RegistryCredentials {
                username: non_empty("DOCKER_REGISTRY_USERNAME"),
                password: non_empty("DOCKER_REGISTRY_PASSWORD"),
            },
            max_concurrent_reconciles,
            health_port,
        })
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u16, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason,
    };
    match raw.trim().parse::<u16>() {
        Ok(0) => Err(invalid("must be greater than zero".to_string())),
        Ok(v) => Ok(v),
        Err(e) => Err(invalid(e.to_string())),
    }
}
