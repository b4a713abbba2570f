//! Validation of Dogu specs and upgrade requests
//!
//! Validation failures are terminal: retrying cannot fix a malformed spec,
//! only a client edit can.

use crate::controller::error::{Error, Result};
use crate::crd::Dogu;
use crate::registry::{Descriptor, DoguVersion};
use crate::resources::quantity::parse_quantity;

/// Longest simple name that still leaves room for derived object names
pub const MAX_SIMPLE_NAME_LENGTH: usize = 48;

/// Validate the Dogu spec
pub fn validate_spec(dogu: &Dogu) -> Result<()> {
    validate_name(dogu)?;
    validate_version(&dogu.spec.version)?;
    validate_volume_size(dogu)?;
    Ok(())
}

fn validate_name(dogu: &Dogu) -> Result<()> {
    let full = &dogu.spec.name;
    let Some((namespace, simple)) = full.split_once('/') else {
        return Err(Error::ValidationError(format!(
            "dogu name {:?} must have the form <namespace>/<name>",
            full
        )));
    };
    if namespace.is_empty() || simple.is_empty() || simple.contains('/') {
        return Err(Error::ValidationError(format!(
            "dogu name {:?} must have the form <namespace>/<name>",
            full
        )));
    }
    if !is_dns_label(simple) || simple.len() > MAX_SIMPLE_NAME_LENGTH {
        return Err(Error::ValidationError(format!(
            "simple name {:?} must be a DNS label of at most {} characters",
            simple, MAX_SIMPLE_NAME_LENGTH
        )));
    }

    let resource_name = dogu.metadata.name.as_deref().unwrap_or_default();
    if simple != resource_name {
        return Err(Error::ValidationError(format!(
            "simple name {:?} differs from resource name {:?}",
            simple, resource_name
        )));
    }
    Ok(())
}

fn is_dns_label(name: &str) -> bool {
    let bytes = name.as_bytes();
    !bytes.is_empty()
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes.first().is_some_and(|b| *b != b'-')
        && bytes.last().is_some_and(|b| *b != b'-')
}

fn validate_version(version: &str) -> Result<DoguVersion> {
    DoguVersion::parse(version).map_err(|e| Error::ValidationError(e.to_string()))
}

fn validate_volume_size(dogu: &Dogu) -> Result<()> {
    if let Some(size) = &dogu.spec.resources.min_data_volume_size {
        parse_quantity(size).map_err(|e| Error::ValidationError(e.to_string()))?;
    }
    Ok(())
}

/// Check that the dogu may move from the installed to the requested
/// descriptor. Returns whether the move is a real version change.
pub fn validate_upgradeability(dogu: &Dogu, from: &Descriptor, to: &Descriptor) -> Result<bool> {
    let from_version = validate_version(&from.version)?;
    let to_version = validate_version(&to.version)?;
    let config = &dogu.spec.upgrade_config;

    if from.simple_name() != to.simple_name() {
        return Err(Error::ValidationError(format!(
            "cannot upgrade {} to a different dogu {}",
            from.name, to.name
        )));
    }

    if from.dogu_namespace() != to.dogu_namespace() && !config.allow_namespace_switch {
        return Err(Error::ValidationError(format!(
            "dogu namespace change from {} to {} requires upgradeConfig.allowNamespaceSwitch",
            from.dogu_namespace(),
            to.dogu_namespace()
        )));
    }

    if from_version > to_version && !config.force_upgrade {
        return Err(Error::ValidationError(format!(
            "downgrade from {} to {} requires upgradeConfig.forceUpgrade",
            from_version, to_version
        )));
    }

    Ok(from_version != to_version)
}
