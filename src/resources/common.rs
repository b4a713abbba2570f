//! Common utilities for Kubernetes resource generation

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::ResourceExt;

use crate::crd::Dogu;

/// API version for the Dogu CRD
pub const API_VERSION: &str = "k8s.cloudogu.com/v2";

/// Kind for the Dogu CRD
pub const KIND: &str = "Dogu";

/// Operator field manager name for server-side apply
pub const FIELD_MANAGER: &str = "dogu-operator";

/// Label carrying the simple dogu name on every owned object
pub const LABEL_DOGU_NAME: &str = "dogu.name";

/// Label carrying the dogu version on pods and deployments
pub const LABEL_DOGU_VERSION: &str = "dogu.version";

/// Generate an owner reference for a Dogu
///
/// Owned objects are garbage collected when the Dogu is gone.
pub fn owner_reference(dogu: &Dogu) -> OwnerReference {
    OwnerReference {
        api_version: API_VERSION.to_string(),
        kind: KIND.to_string(),
        name: dogu.name_any(),
        uid: dogu.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Labels selecting the pods of a dogu
pub fn selector_labels(simple_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(LABEL_DOGU_NAME.to_string(), simple_name.to_string())])
}

/// Generate standard labels for all resources belonging to a Dogu
pub fn standard_labels(dogu: &Dogu) -> BTreeMap<String, String> {
    let mut labels = selector_labels(dogu.simple_name());
    labels.extend([
        (
            "app.kubernetes.io/name".to_string(),
            dogu.simple_name().to_string(),
        ),
        (
            "app.kubernetes.io/managed-by".to_string(),
            FIELD_MANAGER.to_string(),
        ),
        ("app".to_string(), "ces".to_string()),
    ]);
    labels
}

/// Standard labels plus the dogu version
pub fn versioned_labels(dogu: &Dogu, version: &str) -> BTreeMap<String, String> {
    let mut labels = standard_labels(dogu);
    labels.insert(LABEL_DOGU_VERSION.to_string(), version.to_string());
    labels
}
