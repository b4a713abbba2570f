//! DoguRestart CRD definition
//!
//! Creating a DoguRestart stops the referenced Dogu and starts it again.
//! The restart controller advances `status.phase` by exactly one step per
//! reconciliation.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// DoguRestart is the Schema for the dogurestarts API
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "k8s.cloudogu.com",
    version = "v2",
    kind = "DoguRestart",
    plural = "dogurestarts",
    namespaced,
    status = "DoguRestartStatus",
    printcolumn = r#"{"name":"Dogu", "type":"string", "jsonPath":".spec.doguName"}"#,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DoguRestartSpec {
    /// Name of the Dogu resource to restart (same namespace)
    pub dogu_name: String,
}

/// Status of the DoguRestart
#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DoguRestartStatus {
    #[serde(default)]
    pub phase: RestartPhase,
}

/// Restart phase
#[derive(Serialize, Deserialize, Clone, Copy, Debug, JsonSchema, Default, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum RestartPhase {
    #[default]
    #[serde(alias = "")]
    New,
    Stopping,
    Stopped,
    FailedStop,
    Starting,
    FailedStart,
    Completed,
    DoguNotFound,
    FailedGetDogu,
}

impl RestartPhase {
    /// Terminal phases are never left again
    pub fn is_terminal(&self) -> bool {
        matches!(self, RestartPhase::Completed | RestartPhase::DoguNotFound)
    }

    /// Position along the stop/start path, used to check monotonic progress.
    /// Failed phases share the rank of the phase they retry into.
    pub fn rank(&self) -> u8 {
        match self {
            RestartPhase::New | RestartPhase::FailedGetDogu => 0,
            RestartPhase::FailedStop | RestartPhase::Stopping => 1,
            RestartPhase::Stopped => 2,
            RestartPhase::FailedStart | RestartPhase::Starting => 3,
            RestartPhase::Completed | RestartPhase::DoguNotFound => 4,
        }
    }
}

impl std::fmt::Display for RestartPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RestartPhase::New => "new",
            RestartPhase::Stopping => "stopping",
            RestartPhase::Stopped => "stopped",
            RestartPhase::FailedStop => "failedStop",
            RestartPhase::Starting => "starting",
            RestartPhase::FailedStart => "failedStart",
            RestartPhase::Completed => "completed",
            RestartPhase::DoguNotFound => "doguNotFound",
            RestartPhase::FailedGetDogu => "failedGetDogu",
        };
        write!(f, "{}", s)
    }
}

impl DoguRestart {
    /// Current phase, `New` when no status was written yet
    pub fn phase(&self) -> RestartPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }
}
