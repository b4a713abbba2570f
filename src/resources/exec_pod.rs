use k8s_openapi::api::core::v1::{Container, Pod, PodSpec};
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Dogu;
use crate::registry::Descriptor;
use crate::resources::common::{LABEL_DOGU_NAME, owner_reference, standard_labels};

/// Name of the helper pod used to read files out of a dogu image
pub fn exec_pod_name(simple_name: &str) -> String {
    format!("{}-execpod", simple_name)
}

/// Generate a pod running the dogu image with an idle command
pub fn generate_exec_pod(dogu: &Dogu, descriptor: &Descriptor) -> Pod {
    let name = exec_pod_name(dogu.simple_name());
    let mut labels = standard_labels(dogu);
    labels.insert("dogu.execpod".to_string(), "true".to_string());
    // keep the dogu service selector from matching this pod
    labels.remove(LABEL_DOGU_NAME);

    Pod {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(labels),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(PodSpec {
            restart_policy: Some("Never".to_string()),
            containers: vec![Container {
                name,
                image: Some(descriptor.image_ref()),
                image_pull_policy: Some("IfNotPresent".to_string()),
                command: Some(vec!["/bin/sh".to_string(), "-c".to_string()]),
                args: Some(vec!["sleep 3600".to_string()]),
                ..Default::default()
            }],
            ..Default::default()
        }),
        ..Default::default()
    }
}
