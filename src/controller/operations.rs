//! Which change a Dogu needs next
//!
//! The manager observes the cluster once per call and this module turns the
//! observation into an ordered list of required operations.

use std::collections::BTreeMap;
use std::fmt;

use crate::controller::error::{Error, Result};
use crate::controller::volume::expansion_in_progress;
use crate::crd::{Dogu, DoguPhase};
use crate::registry::DoguVersion;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    Upgrade,
    ExpandVolume,
    ChangeAdditionalIngressAnnotations,
    StartStop,
    ExportMode,
    SupportMode,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Install => "install",
            Operation::Upgrade => "upgrade",
            Operation::ExpandVolume => "expand volume",
            Operation::ChangeAdditionalIngressAnnotations => {
                "change additional ingress annotations"
            }
            Operation::StartStop => "start/stop",
            Operation::ExportMode => "change export mode",
            Operation::SupportMode => "change support mode",
        };
        f.write_str(s)
    }
}

/// Cluster state relevant for choosing operations
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObservedState {
    /// Version recorded as installed on the Dogu, `None` before the first install
    pub installed_version: Option<String>,
    /// The data PVC asks for less than the Dogu wants
    pub volume_too_small: bool,
    /// Additional ingress annotations on the dogu service, `None` without service
    pub service_annotations: Option<BTreeMap<String, String>>,
    /// The deployment runs in support mode
    pub support_mode_active: bool,
}

fn version(raw: &str) -> Result<DoguVersion> {
    DoguVersion::parse(raw).map_err(|e| Error::ValidationError(e.to_string()))
}

/// Ordered operations the Dogu needs; empty when it has converged
pub fn required_operations(dogu: &Dogu, observed: &ObservedState) -> Result<Vec<Operation>> {
    let Some(installed) = observed.installed_version.as_deref() else {
        return Ok(vec![Operation::Install]);
    };

    // Support mode freezes every other change.
    let toggling = dogu.phase() == DoguPhase::ChangingSupportMode;
    if dogu.spec.support_mode || observed.support_mode_active || toggling {
        return Ok(if toggling || dogu.spec.support_mode != observed.support_mode_active {
            vec![Operation::SupportMode]
        } else {
            Vec::new()
        });
    }

    let status = dogu.status.clone().unwrap_or_default();
    let mut operations = Vec::new();

    if expansion_in_progress(dogu) {
        operations.push(Operation::ExpandVolume);
    }
    if version(&dogu.spec.version)? != version(installed)? {
        operations.push(Operation::Upgrade);
    }
    if observed.volume_too_small && !operations.contains(&Operation::ExpandVolume) {
        operations.push(Operation::ExpandVolume);
    }
    if let Some(current) = &observed.service_annotations
        && current != &dogu.spec.additional_ingress_annotations
    {
        operations.push(Operation::ChangeAdditionalIngressAnnotations);
    }
    if dogu.spec.stopped != status.stopped {
        operations.push(Operation::StartStop);
    }
    if dogu.spec.export_mode != status.export_mode {
        operations.push(Operation::ExportMode);
    }
    Ok(operations)
}
