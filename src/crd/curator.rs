//! ClusterCurator Custom Resource Definition
//!
//! A ClusterCurator is the durable request and record for one cluster's
//! curation. It lives in the cluster's namespace and carries the same name as
//! the cluster. Requesters set `desiredCuration`; the curator only writes the
//! progress markers in the spec and the conditions in the status.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, Curation, Hook, HookPhase, Hooks, Operation, UpgradeHooks};
use crate::Error;

/// Specification for a ClusterCurator
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cluster.open-cluster-management.io",
    version = "v1beta1",
    kind = "ClusterCurator",
    plural = "clustercurators",
    namespaced,
    status = "ClusterCuratorStatus",
    printcolumn = r#"{"name":"Curation","type":"string","jsonPath":".spec.desiredCuration"}"#,
    printcolumn = r#"{"name":"Job","type":"string","jsonPath":".spec.curatorJob"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorSpec {
    /// Curation to perform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_curation: Option<Curation>,

    /// Kubernetes Job running the current curation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curator_job: Option<String>,

    /// Hooks for install
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Hooks>,

    /// Hooks and release target for upgrade
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeHooks>,

    /// Hooks for scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Hooks>,

    /// Hooks for destroy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destroy: Option<Hooks>,

    /// Resumption marker, present after a posthook failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<Operation>,
}

impl ClusterCuratorSpec {
    /// Hook configuration for a curation type, if any was given
    pub fn hooks_for(&self, curation: Curation) -> Option<&Hooks> {
        match curation {
            Curation::Install => self.install.as_ref(),
            Curation::Upgrade => self.upgrade.as_ref().map(|u| &u.hooks),
            Curation::Scale => self.scale.as_ref(),
            Curation::Destroy => self.destroy.as_ref(),
        }
    }

    /// Hooks to run for the desired curation and phase.
    ///
    /// Missing `desiredCuration` or missing hook configuration both mean
    /// "nothing to run".
    pub fn hook_list(&self, phase: HookPhase) -> &[Hook] {
        self.desired_curation
            .and_then(|c| self.hooks_for(c))
            .map(|h| h.for_phase(phase))
            .unwrap_or(&[])
    }

    /// Automation credential secret for the desired curation
    pub fn tower_auth_secret(&self) -> Option<&str> {
        self.desired_curation
            .and_then(|c| self.hooks_for(c))
            .and_then(|h| h.tower_auth_secret.as_deref())
    }

    /// Posthook recorded for retry, if any
    pub fn retry_posthook(&self) -> Option<&str> {
        self.operation
            .as_ref()
            .and_then(|o| o.retry_posthook.as_deref())
            .filter(|h| !h.is_empty())
    }

    /// Target version of an upgrade; absence is a validation error
    pub fn desired_update(&self) -> Result<&str, Error> {
        self.upgrade
            .as_ref()
            .and_then(|u| u.desired_update.as_deref())
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                Error::validation(
                    "Provide valid upgrade version: spec.upgrade.desiredUpdate is not set",
                )
            })
    }
}

/// Status for a ClusterCurator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCuratorStatus {
    /// Latest condition per type
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl ClusterCuratorStatus {
    /// Insert or replace the condition of the same type.
    ///
    /// The transition time is kept when the status did not change.
    pub fn set_condition(&mut self, condition: Condition) {
        match self
            .conditions
            .iter_mut()
            .find(|c| c.type_ == condition.type_)
        {
            Some(existing) => {
                let keep_time = existing.status == condition.status;
                let previous = existing.last_transition_time;
                *existing = condition;
                if keep_time {
                    existing.last_transition_time = previous;
                }
            }
            None => self.conditions.push(condition),
        }
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

impl ClusterCurator {
    /// Look up a status condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.status.as_ref().and_then(|s| s.condition(type_))
    }
}
