//! Test fixtures and builders for Dogu and DoguRestart resources
//!
//! ```rust,ignore
//! let dogu = DoguBuilder::new("ldap")
//!     .installed("2.4.48-4")
//!     .stopped()
//!     .build();
//! ```

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStatus};
use k8s_openapi::api::core::v1::{
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimStatus,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::core::ObjectMeta;

use dogu_operator::FINALIZER;
use dogu_operator::crd::{
    Dogu, DoguPhase, DoguRestart, DoguRestartSpec, DoguRestartStatus, DoguSpec, DoguStatus,
    RestartPhase,
};
use dogu_operator::registry::{Dependency, DependencyType, Descriptor, Volume};
use dogu_operator::resources::common::LABEL_DOGU_NAME;

pub const NAMESPACE: &str = "ecosystem";
pub const DOGU_NAMESPACE: &str = "official";
pub const DEFAULT_VERSION: &str = "2.4.48-4";

// =============================================================================
// Dogu Builder
// =============================================================================

/// Builder for Dogu test fixtures
pub struct DoguBuilder {
    dogu: Dogu,
}

impl DoguBuilder {
    pub fn new(simple_name: &str) -> Self {
        let mut dogu = Dogu::new(
            simple_name,
            DoguSpec {
                name: format!("{}/{}", DOGU_NAMESPACE, simple_name),
                version: DEFAULT_VERSION.to_string(),
                resources: Default::default(),
                support_mode: false,
                stopped: false,
                export_mode: false,
                upgrade_config: Default::default(),
                additional_ingress_annotations: BTreeMap::new(),
            },
        );
        dogu.metadata = ObjectMeta {
            name: Some(simple_name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            uid: Some(format!("uid-{}", simple_name)),
            generation: Some(1),
            ..Default::default()
        };
        Self { dogu }
    }

    pub fn version(mut self, version: &str) -> Self {
        self.dogu.spec.version = version.to_string();
        self
    }

    pub fn stopped(mut self) -> Self {
        self.dogu.spec.stopped = true;
        self
    }

    pub fn export_mode(mut self) -> Self {
        self.dogu.spec.export_mode = true;
        self
    }

    pub fn support_mode(mut self) -> Self {
        self.dogu.spec.support_mode = true;
        self
    }

    pub fn force_upgrade(mut self) -> Self {
        self.dogu.spec.upgrade_config.force_upgrade = true;
        self
    }

    pub fn min_volume_size(mut self, size: &str) -> Self {
        self.dogu.spec.resources.min_data_volume_size = Some(size.to_string());
        self
    }

    pub fn ingress_annotation(mut self, key: &str, value: &str) -> Self {
        self.dogu
            .spec
            .additional_ingress_annotations
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_finalizer(mut self) -> Self {
        self.dogu.metadata.finalizers = Some(vec![FINALIZER.to_string()]);
        self
    }

    /// Set the deletion marker
    pub fn deleting(mut self) -> Self {
        let timestamp: Time = serde_json::from_value(serde_json::json!("2025-01-01T00:00:00Z"))
            .expect("valid timestamp");
        self.dogu.metadata.deletion_timestamp = Some(timestamp);
        self
    }

    /// Installed at `version`, with observed flags matching the spec
    pub fn installed(mut self, version: &str) -> Self {
        let (stopped, export_mode) = (self.dogu.spec.stopped, self.dogu.spec.export_mode);
        self = self.with_finalizer();
        self.status(|s| {
            s.status = DoguPhase::Installed;
            s.installed_version = Some(version.to_string());
            s.stopped = stopped;
            s.export_mode = export_mode;
        })
    }

    pub fn phase(self, phase: DoguPhase) -> Self {
        self.status(|s| s.status = phase)
    }

    pub fn status(mut self, mutate: impl FnOnce(&mut DoguStatus)) -> Self {
        mutate(self.dogu.status.get_or_insert_with(Default::default));
        self
    }

    pub fn build(self) -> Dogu {
        self.dogu
    }
}

// =============================================================================
// Descriptors
// =============================================================================

/// Descriptor of an official dogu with one data volume
pub fn descriptor(simple_name: &str, version: &str) -> Descriptor {
    Descriptor {
        name: format!("{}/{}", DOGU_NAMESPACE, simple_name),
        version: version.to_string(),
        image: format!("registry.cloudogu.com/{}/{}", DOGU_NAMESPACE, simple_name),
        volumes: vec![Volume {
            name: "data".to_string(),
            path: "/var/lib/data".to_string(),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn with_dependency(mut descriptor: Descriptor, name: &str, version: &str) -> Descriptor {
    descriptor.dependencies.push(Dependency {
        type_: DependencyType::Dogu,
        name: name.to_string(),
        version: version.to_string(),
    });
    descriptor
}

// =============================================================================
// DoguRestart
// =============================================================================

pub fn restart(name: &str, target: &str, phase: RestartPhase) -> DoguRestart {
    let mut restart = DoguRestart::new(
        name,
        DoguRestartSpec {
            dogu_name: target.to_string(),
        },
    );
    restart.metadata.namespace = Some(NAMESPACE.to_string());
    restart.status = Some(DoguRestartStatus { phase });
    restart
}

// =============================================================================
// Infrastructure objects
// =============================================================================

/// Deployment of a dogu; `ready` reports all replicas as rolled out
pub fn deployment(simple_name: &str, replicas: i32, ready: bool) -> Deployment {
    let observed = if ready { replicas } else { 0 };
    Deployment {
        metadata: ObjectMeta {
            name: Some(simple_name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            labels: Some(BTreeMap::from([(
                LABEL_DOGU_NAME.to_string(),
                simple_name.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            replicas: Some(if ready { replicas } else { replicas.max(1) }),
            ready_replicas: Some(observed),
            updated_replicas: Some(observed),
            available_replicas: Some(observed),
            ..Default::default()
        }),
    }
}

/// Data PVC with the given request and actual capacity
pub fn pvc(simple_name: &str, requested: &str, capacity: &str) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(simple_name.to_string()),
            namespace: Some(NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(requested.to_string()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PersistentVolumeClaimStatus {
            capacity: Some(BTreeMap::from([(
                "storage".to_string(),
                Quantity(capacity.to_string()),
            )])),
            ..Default::default()
        }),
    }
}
