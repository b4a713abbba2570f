//! The dogu descriptor (`dogu.json`)

use serde::{Deserialize, Serialize};

use crate::crd::simple_name;

/// Descriptor of a dogu as published in the dogu registry
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Descriptor {
    /// Full name including the dogu namespace (e.g., "official/ldap")
    pub name: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Container image without tag (e.g., "registry.cloudogu.com/official/ldap")
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optional_dependencies: Vec<Dependency>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service_accounts: Vec<ServiceAccount>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exposed_ports: Vec<ExposedPort>,
}

/// Kind of a dependency
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DependencyType {
    #[default]
    Dogu,
    Client,
    Package,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "lowercase")]
pub struct Dependency {
    #[serde(default, rename = "type")]
    pub type_: DependencyType,
    /// Simple dogu name for dogu dependencies
    pub name: String,
    /// Version constraint, empty for any version
    #[serde(default)]
    pub version: String,
}

/// A credential the dogu requests from another dogu
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceAccount {
    /// Simple name of the providing dogu
    #[serde(rename = "Type")]
    pub type_: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(default)]
    pub needs_backup: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ExposedPort {
    #[serde(default = "default_protocol", rename = "Type")]
    pub type_: String,
    pub container: i32,
    pub host: i32,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

impl Descriptor {
    pub fn simple_name(&self) -> &str {
        simple_name(&self.name)
    }

    pub fn dogu_namespace(&self) -> &str {
        self.name
            .split_once('/')
            .map(|(ns, _)| ns)
            .unwrap_or_default()
    }

    /// Image reference including the version tag
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.image, self.version)
    }

    /// Dependencies of type dogu
    pub fn dogu_dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies
            .iter()
            .filter(|d| d.type_ == DependencyType::Dogu)
    }

    pub fn has_data_volumes(&self) -> bool {
        !self.volumes.is_empty()
    }
}
