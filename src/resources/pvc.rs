use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Dogu;
use crate::registry::Descriptor;
use crate::resources::common::{owner_reference, standard_labels};

/// Size of a data volume when the Dogu does not ask for one
pub const DEFAULT_DATA_VOLUME_SIZE: &str = "2Gi";

/// Name of the data PVC of a dogu
pub fn data_volume_name(simple_name: &str) -> String {
    simple_name.to_string()
}

/// Requested data volume size of the Dogu
pub fn desired_volume_size(dogu: &Dogu) -> &str {
    dogu.spec
        .resources
        .min_data_volume_size
        .as_deref()
        .unwrap_or(DEFAULT_DATA_VOLUME_SIZE)
}

/// Storage request of a PVC
pub fn requested_storage(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.spec
        .as_ref()
        .and_then(|s| s.resources.as_ref())
        .and_then(|r| r.requests.as_ref())
        .and_then(|r| r.get("storage"))
        .map(|q| q.0.as_str())
}

/// Actual capacity of a bound PVC
pub fn actual_capacity(pvc: &PersistentVolumeClaim) -> Option<&str> {
    pvc.status
        .as_ref()
        .and_then(|s| s.capacity.as_ref())
        .and_then(|c| c.get("storage"))
        .map(|q| q.0.as_str())
}

/// Generate the data PVC, `None` for dogus without volumes
pub fn generate_data_pvc(dogu: &Dogu, descriptor: &Descriptor) -> Option<PersistentVolumeClaim> {
    if !descriptor.has_data_volumes() {
        return None;
    }

    Some(PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(data_volume_name(dogu.simple_name())),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(dogu)),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(desired_volume_size(dogu).to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    })
}
