//! Deployment generation for dogus
//!
//! The pod template is shaped by [`PodTemplateOptions`]: support mode
//! replaces the entrypoint with an idle loop and drops the probes, export
//! mode adds the exporter sidecar.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvFromSource, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec,
    PodTemplateSpec, Probe, SecretEnvSource, TCPSocketAction, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::crd::Dogu;
use crate::registry::{Descriptor, ImageConfig};
use crate::resources::common::{owner_reference, selector_labels, versioned_labels};
use crate::resources::pvc::data_volume_name;
use crate::resources::secret::secret_name;

/// Env var set on the dogu container while support mode is active
pub const SUPPORT_MODE_ENV: &str = "SUPPORT_MODE";

/// Name of the exporter sidecar container
pub const EXPORTER_CONTAINER: &str = "dogu-exporter";

const EXPORTER_IMAGE: &str = "cloudogu/rsync-exporter:1.0.0";
const EXPORTER_PORT: i32 = 873;
const DATA_VOLUME: &str = "dogu-data";

/// Pod template shaping
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PodTemplateOptions {
    pub replicas: i32,
    pub export_mode: bool,
    pub support_mode: bool,
}

impl PodTemplateOptions {
    /// Options matching the Dogu's desired state
    pub fn from_spec(dogu: &Dogu) -> Self {
        Self {
            replicas: dogu.desired_replicas(),
            export_mode: dogu.spec.export_mode,
            support_mode: dogu.spec.support_mode,
        }
    }
}

/// TCP port numbers from image config keys like `389/tcp`
pub fn tcp_ports(image_config: &ImageConfig) -> Vec<i32> {
    image_config
        .exposed_ports
        .keys()
        .filter_map(|key| {
            let (port, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            (proto == "tcp").then(|| port.parse().ok()).flatten()
        })
        .collect()
}

fn dogu_container(
    dogu: &Dogu,
    descriptor: &Descriptor,
    image_config: &ImageConfig,
    options: PodTemplateOptions,
) -> Container {
    let ports = tcp_ports(image_config);
    let mounts: Vec<VolumeMount> = descriptor
        .volumes
        .iter()
        .map(|v| VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: v.path.clone(),
            sub_path: Some(v.name.clone()),
            ..Default::default()
        })
        .collect();

    let mut container = Container {
        name: dogu.simple_name().to_string(),
        image: Some(descriptor.image_ref()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        ports: Some(
            ports
                .iter()
                .map(|p| ContainerPort {
                    container_port: *p,
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        env_from: Some(vec![EnvFromSource {
            secret_ref: Some(SecretEnvSource {
                name: secret_name(dogu.simple_name()),
                optional: Some(true),
            }),
            ..Default::default()
        }]),
        volume_mounts: (!mounts.is_empty()).then_some(mounts),
        ..Default::default()
    };

    if options.support_mode {
        container.env = Some(vec![EnvVar {
            name: SUPPORT_MODE_ENV.to_string(),
            value: Some("true".to_string()),
            ..Default::default()
        }]);
        container.command = Some(vec!["/bin/sh".to_string(), "-c".to_string(), "--".to_string()]);
        container.args = Some(vec!["while true; do sleep 5; done;".to_string()]);
    } else if let Some(port) = ports.first() {
        let probe = Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(*port),
                ..Default::default()
            }),
            period_seconds: Some(10),
            failure_threshold: Some(3),
            ..Default::default()
        };
        container.readiness_probe = Some(probe.clone());
        container.startup_probe = Some(Probe {
            failure_threshold: Some(180),
            ..probe
        });
    }
    container
}

fn exporter_container(dogu: &Dogu) -> Container {
    Container {
        name: EXPORTER_CONTAINER.to_string(),
        image: Some(EXPORTER_IMAGE.to_string()),
        ports: Some(vec![ContainerPort {
            container_port: EXPORTER_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        readiness_probe: Some(Probe {
            tcp_socket: Some(TCPSocketAction {
                port: IntOrString::Int(EXPORTER_PORT),
                ..Default::default()
            }),
            period_seconds: Some(5),
            ..Default::default()
        }),
        volume_mounts: Some(vec![VolumeMount {
            name: DATA_VOLUME.to_string(),
            mount_path: format!("/data/{}", dogu.simple_name()),
            read_only: Some(true),
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Generate the dogu Deployment
pub fn generate_deployment(
    dogu: &Dogu,
    descriptor: &Descriptor,
    image_config: &ImageConfig,
    options: PodTemplateOptions,
) -> Deployment {
    let name = dogu.simple_name().to_string();
    let labels = versioned_labels(dogu, &descriptor.version);

    let mut containers = vec![dogu_container(dogu, descriptor, image_config, options)];
    if options.export_mode {
        containers.push(exporter_container(dogu));
    }

    let volumes = descriptor.has_data_volumes().then(|| {
        vec![Volume {
            name: DATA_VOLUME.to_string(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: data_volume_name(dogu.simple_name()),
                read_only: None,
            }),
            ..Default::default()
        }]
    });

    Deployment {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(options.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&name)),
                ..Default::default()
            },
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    hostname: Some(name),
                    containers,
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Whether the dogu container of a deployment carries the support mode marker
pub fn has_support_mode_marker(deployment: &Deployment) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .into_iter()
        .flat_map(|p| p.containers.iter())
        .flat_map(|c| c.env.iter().flatten())
        .any(|e| e.name == SUPPORT_MODE_ENV && e.value.as_deref() == Some("true"))
}
