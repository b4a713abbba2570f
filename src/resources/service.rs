//! Service generation for dogus
//!
//! Every dogu gets a ClusterIP service for its TCP ports. Ports the
//! descriptor marks as exposed get an extra LoadBalancer service.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;
use kube::core::ObjectMeta;

use crate::controller::error::Result;
use crate::crd::Dogu;
use crate::registry::{Descriptor, ImageConfig};
use crate::resources::common::{owner_reference, selector_labels, standard_labels};
use crate::resources::deployment::tcp_ports;

/// Annotation holding the JSON encoded additional ingress annotations
pub const ADDITIONAL_INGRESS_ANNOTATIONS: &str =
    "k8s-dogu-operator.cloudogu.com/additional-ingress-annotations";

/// Serialise the Dogu's additional ingress annotations, `None` when there are none
pub fn ingress_annotations_value(dogu: &Dogu) -> Result<Option<String>> {
    if dogu.spec.additional_ingress_annotations.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(
        &dogu.spec.additional_ingress_annotations,
    )?))
}

/// Additional ingress annotations currently set on a service
pub fn service_ingress_annotations(service: &Service) -> Result<BTreeMap<String, String>> {
    match service.annotations().get(ADDITIONAL_INGRESS_ANNOTATIONS) {
        Some(raw) => Ok(serde_json::from_str(raw)?),
        None => Ok(BTreeMap::new()),
    }
}

/// Generate the main dogu service
pub fn generate_service(
    dogu: &Dogu,
    image_config: &ImageConfig,
) -> Result<Service> {
    let name = dogu.simple_name().to_string();

    let mut annotations = BTreeMap::new();
    if let Some(value) = ingress_annotations_value(dogu)? {
        annotations.insert(ADDITIONAL_INGRESS_ANNOTATIONS.to_string(), value);
    }

    let ports = tcp_ports(image_config)
        .into_iter()
        .map(|port| ServicePort {
            name: Some(port.to_string()),
            port,
            target_port: Some(IntOrString::Int(port)),
            protocol: Some("TCP".to_string()),
            ..Default::default()
        })
        .collect();

    Ok(Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(dogu)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector_labels(&name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Generate the exposed services, empty when the descriptor exposes no ports
pub fn generate_exposed_services(dogu: &Dogu, descriptor: &Descriptor) -> Vec<Service> {
    if descriptor.exposed_ports.is_empty() {
        return Vec::new();
    }
    let name = dogu.simple_name();

    let ports = descriptor
        .exposed_ports
        .iter()
        .map(|p| ServicePort {
            name: Some(format!("{}-{}", p.type_, p.host)),
            port: p.host,
            target_port: Some(IntOrString::Int(p.container)),
            protocol: Some(p.type_.to_uppercase()),
            ..Default::default()
        })
        .collect();

    vec![Service {
        metadata: ObjectMeta {
            name: Some(format!("{}-exposed", name)),
            namespace: dogu.namespace(),
            labels: Some(standard_labels(dogu)),
            owner_references: Some(vec![owner_reference(dogu)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(ports),
            ..Default::default()
        }),
        ..Default::default()
    }]
}
