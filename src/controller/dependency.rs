//! Dependency checks against the dogus registered in the namespace

use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::controller::error::{Error, Result};
use crate::registry::{Dependency, Descriptor, DoguVersion, LocalRegistry, satisfies};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DependencyValidator: Send + Sync {
    /// Fails with [`Error::DependencyError`] naming every unmet dependency
    async fn validate(&self, namespace: &str, descriptor: &Descriptor) -> Result<()>;
}

/// Checks mandatory and optional dogu dependencies against the local registry
pub struct RegistryDependencyValidator {
    local: Arc<dyn LocalRegistry>,
}

impl RegistryDependencyValidator {
    pub fn new(local: Arc<dyn LocalRegistry>) -> Self {
        Self { local }
    }

    async fn check(
        &self,
        namespace: &str,
        dep: &Dependency,
        optional: bool,
    ) -> Result<Option<String>> {
        let Some(installed) = self.local.get_current(namespace, &dep.name).await? else {
            return Ok((!optional).then(|| format!("{} is not installed", dep.name)));
        };
        Ok(unmet_version(dep, &installed.version))
    }
}

/// Describe why an installed version does not satisfy a dependency
pub fn unmet_version(dep: &Dependency, installed: &str) -> Option<String> {
    let version = match DoguVersion::parse(installed) {
        Ok(v) => v,
        Err(e) => return Some(format!("{}: {}", dep.name, e)),
    };
    match satisfies(&dep.version, &version) {
        Ok(true) => None,
        Ok(false) => Some(format!(
            "{} {} does not satisfy {}",
            dep.name, installed, dep.version
        )),
        Err(e) => Some(format!("{}: {}", dep.name, e)),
    }
}

#[async_trait]
impl DependencyValidator for RegistryDependencyValidator {
    async fn validate(&self, namespace: &str, descriptor: &Descriptor) -> Result<()> {
        let mut problems = Vec::new();
        for dep in descriptor.dogu_dependencies() {
            problems.extend(self.check(namespace, dep, false).await?);
        }
        for dep in descriptor
            .optional_dependencies
            .iter()
            .filter(|d| d.type_ == crate::registry::DependencyType::Dogu)
        {
            problems.extend(self.check(namespace, dep, true).await?);
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::DependencyError(format!(
                "unmet dependencies of {}: {}",
                descriptor.name,
                problems.join("; ")
            )))
        }
    }
}
