//! Cluster lifecycle backends and monitors
//!
//! How a cluster is provisioned, torn down and upgraded depends on its
//! flavor. Each flavor implements [`ClusterBackend`]; the dispatcher only
//! talks to the trait.
//!
//! # Flavors
//!
//! - [`StandardBackend`] - Hive ClusterDeployment based clusters
//! - [`HostedBackend`] - Hypershift hosted control planes
//!
//! Import into the hub is flavor independent and lives in [`ImportMonitor`].

mod hosted;
mod import;
mod standard;

pub use hosted::{retag_release_image, HostedBackend};
pub use import::{evaluate_import, ImportMonitor, ImportState};
pub use standard::StandardBackend;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[cfg(test)]
use mockall::automock;

use crate::client::ResourceClient;
use crate::crd::{ClusterCuratorSpec, ExtraVars, ResourceKind};
use crate::poll::PollConfig;
use crate::recorder::StatusRecorder;
use crate::Result;

/// How the cluster's control plane is run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterFlavor {
    /// Provisioned by Hive from a ClusterDeployment
    Standard,
    /// Hypershift HostedCluster with NodePools
    Hosted,
}

impl std::fmt::Display for ClusterFlavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::Hosted => write!(f, "hosted"),
        }
    }
}

/// Decide the flavor: a HostedCluster named after the cluster in the
/// curator namespace makes it hosted, anything else is standard.
pub async fn detect_flavor(
    resources: &dyn ResourceClient,
    namespace: &str,
    name: &str,
) -> Result<ClusterFlavor> {
    match resources.get(ResourceKind::HostedCluster, namespace, name).await {
        Ok(_) => Ok(ClusterFlavor::Hosted),
        Err(e) if e.is_not_found() => Ok(ClusterFlavor::Standard),
        Err(e) => Err(e),
    }
}

/// Target of an upgrade
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpgradeTarget {
    /// Desired release version (e.g., "4.14.3")
    pub version: String,
    /// Update channel, if one should be set
    pub channel: Option<String>,
    /// Update server, if one should be set
    pub upstream: Option<String>,
}

impl UpgradeTarget {
    /// Read the target from a curator spec; fails without `desiredUpdate`
    pub fn from_spec(spec: &ClusterCuratorSpec) -> Result<Self> {
        let version = spec.desired_update()?.trim().to_string();
        let upgrade = spec.upgrade.as_ref();
        Ok(Self {
            version,
            channel: upgrade.and_then(|u| u.channel.clone()).filter(|c| !c.is_empty()),
            upstream: upgrade.and_then(|u| u.upstream.clone()).filter(|u| !u.is_empty()),
        })
    }
}

/// Provisioning, teardown and upgrade of one cluster
///
/// `activate`, `destroy` and `upgrade` only request the change; the
/// matching `monitor_*` call waits for the platform to carry it out.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterBackend: Send + Sync {
    /// Flavor this backend handles
    fn flavor(&self) -> ClusterFlavor;

    /// Variables describing the cluster, passed to every hook
    ///
    /// Any fetch failure is returned: hooks never run with partial context.
    async fn hook_context(&self) -> Result<ExtraVars>;

    /// Let provisioning start
    async fn activate(&self) -> Result<()>;

    /// Wait until the cluster is provisioned
    async fn monitor_provision(&self) -> Result<()>;

    /// Request teardown
    async fn destroy(&self) -> Result<()>;

    /// Wait until the cluster resources are gone
    async fn monitor_destroy(&self) -> Result<()>;

    /// Request an upgrade
    async fn upgrade(&self, target: &UpgradeTarget) -> Result<()>;

    /// Wait until the upgrade completed
    async fn monitor_upgrade(&self, target: &UpgradeTarget) -> Result<()>;
}

/// Handles shared by every backend
#[derive(Clone)]
pub struct BackendContext {
    /// External resource access
    pub resources: Arc<dyn ResourceClient>,
    /// Curator access, used to re-resolve it while polling
    pub recorder: StatusRecorder,
    /// Polling of cluster resources
    pub poll: PollConfig,
    /// Process-wide cancellation
    pub cancel: CancellationToken,
}

impl BackendContext {
    /// Namespace holding the cluster resources
    pub fn namespace(&self) -> &str {
        self.recorder.namespace()
    }

    /// Cluster name
    pub fn name(&self) -> &str {
        self.recorder.name()
    }
}

/// Create the backend for a flavor
pub fn create_backend(flavor: ClusterFlavor, ctx: BackendContext) -> Box<dyn ClusterBackend> {
    info!(cluster = %ctx.name(), flavor = %flavor, "selected cluster backend");
    match flavor {
        ClusterFlavor::Standard => Box::new(StandardBackend::new(ctx)),
        ClusterFlavor::Hosted => Box::new(HostedBackend::new(ctx)),
    }
}

/// Names of conditions, in order, for log messages
pub(crate) fn condition_summary(resource: &crate::crd::ExternalResource) -> String {
    resource
        .conditions()
        .unwrap_or_default()
        .iter()
        .map(|c| format!("{}={}", c.type_, c.status.as_deref().unwrap_or("Unknown")))
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockResourceClient;
    use crate::crd::ExternalResource;
    use crate::Error;

    #[tokio::test]
    async fn hosted_cluster_presence_selects_hosted_flavor() {
        let mut resources = MockResourceClient::new();
        resources
            .expect_get()
            .withf(|kind, ns, name| {
                *kind == ResourceKind::HostedCluster && ns == "clusters" && name == "hc1"
            })
            .returning(|_, _, _| Ok(ExternalResource::default()));

        let flavor = detect_flavor(&resources, "clusters", "hc1").await.unwrap();
        assert_eq!(flavor, ClusterFlavor::Hosted);
    }

    #[tokio::test]
    async fn missing_hosted_cluster_selects_standard_flavor() {
        let mut resources = MockResourceClient::new();
        resources.expect_get().returning(|kind, _, name| {
            Err(Error::not_found(kind.qualified_name(), name))
        });

        let flavor = detect_flavor(&resources, "my-cluster", "my-cluster").await.unwrap();
        assert_eq!(flavor, ClusterFlavor::Standard);
    }

    #[tokio::test]
    async fn other_lookup_errors_are_returned() {
        let mut resources = MockResourceClient::new();
        resources
            .expect_get()
            .returning(|_, _, _| Err(Error::platform("connection refused")));

        assert!(detect_flavor(&resources, "ns", "c").await.is_err());
    }

    #[test]
    fn upgrade_target_reads_optional_channel_and_upstream() {
        let spec: ClusterCuratorSpec = serde_json::from_value(serde_json::json!({
            "desiredCuration": "upgrade",
            "upgrade": {"desiredUpdate": " 4.14.3 ", "channel": "stable-4.14", "upstream": ""}
        }))
        .unwrap();

        let target = UpgradeTarget::from_spec(&spec).unwrap();
        assert_eq!(target.version, "4.14.3");
        assert_eq!(target.channel.as_deref(), Some("stable-4.14"));
        assert_eq!(target.upstream, None);
    }
}
