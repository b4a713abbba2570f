use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Dogu is the Schema for the dogus API
///
/// A Dogu declares a deployable application instance. Clients only change the
/// spec; the operator converges deployments, services, volumes and secrets
/// towards it and reports progress through the status.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "k8s.cloudogu.com",
    version = "v2",
    kind = "Dogu",
    plural = "dogus",
    namespaced,
    status = "DoguStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".spec.version"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.status"}"#,
    printcolumn = r#"{"name":"Health", "type":"string", "jsonPath":".status.health"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DoguSpec {
    /// Full dogu name including its namespace (e.g., "official/ldap")
    pub name: String,

    /// Dogu version (e.g., "2.4.48-4")
    pub version: String,

    /// Volume requirements
    #[serde(default)]
    pub resources: DoguResources,

    /// Run the dogu container without its entrypoint for debugging
    #[serde(default)]
    pub support_mode: bool,

    /// Scale the dogu down to zero replicas
    #[serde(default)]
    pub stopped: bool,

    /// Run the exporter sidecar used for migrations
    #[serde(default)]
    pub export_mode: bool,

    /// Upgrade behaviour overrides
    #[serde(default)]
    pub upgrade_config: UpgradeConfig,

    /// Annotations copied onto the dogu service for the ingress controller
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_ingress_annotations: BTreeMap<String, String>,
}

/// Volume requirements of a dogu
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoguResources {
    /// Minimum size of the data volume (e.g., "2Gi"). The volume is only ever grown.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_data_volume_size: Option<String>,
}

/// Upgrade behaviour overrides
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeConfig {
    /// Allow the dogu namespace to change during an upgrade
    #[serde(default)]
    pub allow_namespace_switch: bool,

    /// Upgrade even when the target version is not newer
    #[serde(default)]
    pub force_upgrade: bool,
}

/// Status of the Dogu
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoguStatus {
    /// Lifecycle phase
    #[serde(default)]
    pub status: DoguPhase,

    /// Version that is currently installed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub installed_version: Option<String>,

    /// Health derived from the deployment readiness
    #[serde(default)]
    pub health: HealthStatus,

    /// Whether the dogu has been observed as stopped
    #[serde(default)]
    pub stopped: bool,

    /// Whether the dogu has been observed running in export mode
    #[serde(default)]
    pub export_mode: bool,

    /// Last requeue delay chosen by the operator, in seconds
    #[serde(default)]
    pub requeue_time: u64,

    /// Start condition of the next volume step, empty when no step ladder runs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub requeue_phase: String,

    /// Replica count captured before a volume resize scaled the dogu down
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resize_replicas: Option<i32>,

    /// Kubernetes-style conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

/// Dogu lifecycle phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum DoguPhase {
    /// Nothing has happened yet
    #[default]
    #[serde(rename = "")]
    Pending,
    #[serde(rename = "installing")]
    Installing,
    #[serde(rename = "installed")]
    Installed,
    #[serde(rename = "upgrading")]
    Upgrading,
    #[serde(rename = "deleting")]
    Deleting,
    #[serde(rename = "resizing PVC")]
    ResizingVolume,
    #[serde(rename = "starting")]
    Starting,
    #[serde(rename = "stopping")]
    Stopping,
    #[serde(rename = "changing export-mode")]
    ChangingExportMode,
    #[serde(rename = "changing support-mode")]
    ChangingSupportMode,
}

impl std::fmt::Display for DoguPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DoguPhase::Pending => write!(f, "Pending"),
            DoguPhase::Installing => write!(f, "installing"),
            DoguPhase::Installed => write!(f, "installed"),
            DoguPhase::Upgrading => write!(f, "upgrading"),
            DoguPhase::Deleting => write!(f, "deleting"),
            DoguPhase::ResizingVolume => write!(f, "resizing PVC"),
            DoguPhase::Starting => write!(f, "starting"),
            DoguPhase::Stopping => write!(f, "stopping"),
            DoguPhase::ChangingExportMode => write!(f, "changing export-mode"),
            DoguPhase::ChangingSupportMode => write!(f, "changing support-mode"),
        }
    }
}

/// Health of a dogu
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq)]
pub enum HealthStatus {
    #[default]
    #[serde(rename = "")]
    Unknown,
    #[serde(rename = "available")]
    Available,
    #[serde(rename = "unavailable")]
    Unavailable,
}

/// Kubernetes-style condition
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition: True, False, or Unknown
    pub status: String,

    /// Reason for the condition's last transition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: String,

    /// Generation observed when condition was set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Dogu {
    /// Simple name without the dogu namespace ("official/ldap" -> "ldap")
    pub fn simple_name(&self) -> &str {
        simple_name(&self.spec.name)
    }

    /// Namespace part of the dogu name ("official/ldap" -> "official")
    pub fn dogu_namespace(&self) -> &str {
        self.spec
            .name
            .split_once('/')
            .map(|(ns, _)| ns)
            .unwrap_or_default()
    }

    /// Current phase, `Pending` when no status was written yet
    pub fn phase(&self) -> DoguPhase {
        self.status.as_ref().map(|s| s.status).unwrap_or_default()
    }

    /// Whether the deletion marker is set
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Whether the given finalizer is present
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata
            .finalizers
            .as_ref()
            .is_some_and(|f| f.iter().any(|x| x == finalizer))
    }

    /// Replica count the deployment should have for the desired state
    pub fn desired_replicas(&self) -> i32 {
        if self.spec.stopped { 0 } else { 1 }
    }
}

/// Strip the dogu namespace from a full dogu name
pub fn simple_name(full_name: &str) -> &str {
    full_name
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(full_name)
}
