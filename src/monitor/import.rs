//! Managed cluster import monitoring
//!
//! After provisioning, the new cluster's agent registers with the hub. The
//! hub reflects progress as conditions on the cluster-scoped ManagedCluster.
//! The conditions are evaluated by priority rather than list order, since
//! the order the hub writes them in carries no meaning.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::ResourceClient;
use crate::crd::{ResourceCondition, ResourceKind};
use crate::poll::{poll_until, PollConfig, PollStatus};
use crate::{Error, Result};

/// The hub refused the cluster
pub const CONDITION_HUB_DENIED: &str = "HubDeniedManagedCluster";
/// The cluster's agent is healthy
pub const CONDITION_AVAILABLE: &str = "ManagedClusterConditionAvailable";
/// The cluster's agent registered
pub const CONDITION_JOINED: &str = "ManagedClusterJoined";

/// Import state derived from one observation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportState {
    /// No conditions reported yet
    Pending,
    /// Only unrelated conditions reported
    Waiting,
    /// Registered but not yet available
    Joined,
    /// Import finished
    Available,
    /// The hub denied the cluster; carries the hub's message
    Denied(String),
}

/// A condition counts unless it explicitly says False or Unknown
fn asserted(condition: &ResourceCondition) -> bool {
    !matches!(condition.status.as_deref(), Some("False") | Some("Unknown"))
}

/// Reduce a condition list with the priority denied > available > joined
pub fn evaluate_import(conditions: Option<&[ResourceCondition]>) -> ImportState {
    let Some(conditions) = conditions else {
        return ImportState::Pending;
    };

    let find = |type_: &str| {
        conditions
            .iter()
            .find(|c| c.type_ == type_ && asserted(c))
    };

    if let Some(denied) = find(CONDITION_HUB_DENIED) {
        return ImportState::Denied(denied.message().to_string());
    }
    if find(CONDITION_AVAILABLE).is_some() {
        return ImportState::Available;
    }
    if find(CONDITION_JOINED).is_some() {
        return ImportState::Joined;
    }
    ImportState::Waiting
}

/// Waits for a ManagedCluster to become available
pub struct ImportMonitor {
    resources: Arc<dyn ResourceClient>,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl ImportMonitor {
    /// Create an import monitor
    pub fn new(
        resources: Arc<dyn ResourceClient>,
        poll: PollConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            resources,
            poll,
            cancel,
        }
    }

    /// Poll the ManagedCluster `cluster_name` until it is available.
    ///
    /// A denial ends the wait with [`Error::Platform`]; a fetch failure ends
    /// it with that error.
    pub async fn monitor_import(&self, cluster_name: &str) -> Result<()> {
        info!(cluster = %cluster_name, "monitoring ManagedCluster import");
        let what = format!("ManagedCluster {} import", cluster_name);

        poll_until(&self.poll, &self.cancel, &what, || async move {
            let managed_cluster = self
                .resources
                .get(ResourceKind::ManagedCluster, "", cluster_name)
                .await?;
            let conditions = managed_cluster.conditions();

            match evaluate_import(conditions.as_deref()) {
                ImportState::Denied(message) => Err(Error::platform(format!(
                    "ManagedCluster {} join denied: {}",
                    cluster_name, message
                ))),
                ImportState::Available => {
                    info!(cluster = %cluster_name, "ManagedCluster available");
                    Ok(PollStatus::Ready(()))
                }
                ImportState::Joined => {
                    debug!(cluster = %cluster_name, "ManagedCluster joined but not available");
                    Ok(PollStatus::Pending)
                }
                ImportState::Waiting | ImportState::Pending => {
                    debug!(cluster = %cluster_name, "waiting for ManagedCluster to join");
                    Ok(PollStatus::Pending)
                }
            }
        })
        .await
    }
}
