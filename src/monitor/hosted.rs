//! Hypershift hosted control planes
//!
//! A hosted cluster is created paused: its HostedCluster and NodePools carry
//! `spec.pausedUntil` until the curator lifts it. Destroy sets it again and
//! waits for the resources to be torn down; the pause marker is the only
//! field the curator writes besides the release image of an upgrade. Node pools belong to a
//! hosted cluster through `spec.clusterName`. While waiting, every poll also
//! re-resolves the curator, so deleting the curator stops the run.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{condition_summary, BackendContext, ClusterBackend, ClusterFlavor, UpgradeTarget};
use crate::crd::{ExternalResource, ExtraVars, ResourceKind, VarValue};
use crate::job::context_value;
use crate::poll::{poll_until, PollStatus};
use crate::{Error, Result};

/// HostedCluster condition reporting a usable control plane
const CONDITION_AVAILABLE: &str = "Available";
/// NodePool condition reporting ready nodes
const CONDITION_READY: &str = "Ready";
/// Version history state of a finished rollout
const HISTORY_COMPLETED: &str = "Completed";
/// `spec.pausedUntil` value pausing reconciliation indefinitely
const PAUSED_UNTIL: &str = "true";

/// Replace the tag of a release image with `version`, keeping any suffix
/// after the version (e.g., the `-multi` of multi-arch payloads).
///
/// `quay.io/openshift-release-dev/ocp-release:4.13.6-multi` retagged to
/// `4.14.3` becomes `quay.io/openshift-release-dev/ocp-release:4.14.3-multi`.
pub fn retag_release_image(image: &str, version: &str) -> Result<String> {
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (repository, tag) = match image[name_start..].rfind(':') {
        Some(i) => image.split_at(name_start + i),
        None => {
            return Err(Error::validation(format!(
                "release image {} has no tag to upgrade",
                image
            )))
        }
    };
    let tag = &tag[1..];
    let suffix = tag.find('-').map(|i| &tag[i..]).unwrap_or_default();
    Ok(format!("{}:{}{}", repository, version, suffix))
}

/// Backend for Hypershift HostedClusters
pub struct HostedBackend {
    ctx: BackendContext,
}

impl HostedBackend {
    /// Create a hosted backend
    pub fn new(ctx: BackendContext) -> Self {
        Self { ctx }
    }

    async fn hosted_cluster(&self) -> Result<ExternalResource> {
        self.ctx
            .resources
            .get(ResourceKind::HostedCluster, self.ctx.namespace(), self.ctx.name())
            .await
    }

    /// NodePools whose `spec.clusterName` names this cluster
    async fn node_pools(&self) -> Result<Vec<ExternalResource>> {
        let pools = self
            .ctx
            .resources
            .list(ResourceKind::NodePool, self.ctx.namespace())
            .await?;
        Ok(pools
            .into_iter()
            .filter(|p| p.spec_str("/clusterName") == Some(self.ctx.name()))
            .collect())
    }

    /// A missing curator ends every hosted wait
    async fn ensure_curator(&self) -> Result<()> {
        self.ctx.recorder.load().await.map(|_| ())
    }

    /// Set or clear `spec.pausedUntil`; a resource already in the wanted
    /// state is left untouched, so each direction is written once
    async fn set_paused(
        &self,
        kind: ResourceKind,
        resource: &ExternalResource,
        paused: bool,
    ) -> Result<()> {
        let is_paused = resource.spec.get("pausedUntil").map_or(false, |v| !v.is_null());
        if is_paused == paused {
            debug!(kind = %kind.kind(), name = %resource.name, paused, "pause marker already set");
            return Ok(());
        }
        let value = if paused {
            serde_json::json!(PAUSED_UNTIL)
        } else {
            serde_json::Value::Null
        };
        self.ctx
            .resources
            .merge_patch(
                kind,
                self.ctx.namespace(),
                &resource.name,
                &serde_json::json!({"spec": {"pausedUntil": value}}),
            )
            .await?;
        info!(kind = %kind.kind(), name = %resource.name, paused, "toggled pausedUntil");
        Ok(())
    }

    async fn set_release_image(
        &self,
        kind: ResourceKind,
        resource: &ExternalResource,
        target: &UpgradeTarget,
    ) -> Result<()> {
        let current = resource.spec_str("/release/image").ok_or_else(|| {
            Error::validation(format!(
                "{} {} has no spec.release.image",
                kind.kind(),
                resource.name
            ))
        })?;
        let image = retag_release_image(current, &target.version)?;

        let mut spec = serde_json::json!({"release": {"image": image}});
        if kind == ResourceKind::HostedCluster {
            if let Some(channel) = &target.channel {
                spec["channel"] = serde_json::json!(channel);
            }
        }
        self.ctx
            .resources
            .merge_patch(kind, self.ctx.namespace(), &resource.name, &serde_json::json!({"spec": spec}))
            .await?;
        info!(kind = %kind.kind(), name = %resource.name, image = %image, "set release image");
        Ok(())
    }
}

fn is_completed_for(hosted: &ExternalResource) -> bool {
    let Some(desired) = hosted.spec_str("/release/image") else {
        return false;
    };
    let latest = hosted.status.pointer("/version/history/0");
    let state = latest.and_then(|h| h.get("state")).and_then(|v| v.as_str());
    let image = latest.and_then(|h| h.get("image")).and_then(|v| v.as_str());
    state == Some(HISTORY_COMPLETED) && image == Some(desired)
}

#[async_trait]
impl ClusterBackend for HostedBackend {
    fn flavor(&self) -> ClusterFlavor {
        ClusterFlavor::Hosted
    }

    async fn hook_context(&self) -> Result<ExtraVars> {
        let hosted = self.hosted_cluster().await?;
        let pools = self.node_pools().await?;
        Ok(ExtraVars::from([
            ("hosted_cluster".to_string(), context_value(&hosted.spec)),
            (
                "node_pools".to_string(),
                VarValue::List(pools.iter().map(|p| context_value(&p.spec)).collect()),
            ),
        ]))
    }

    async fn activate(&self) -> Result<()> {
        let hosted = self.hosted_cluster().await?;
        self.set_paused(ResourceKind::HostedCluster, &hosted, false)
            .await?;
        for pool in self.node_pools().await? {
            self.set_paused(ResourceKind::NodePool, &pool, false).await?;
        }
        Ok(())
    }

    async fn monitor_provision(&self) -> Result<()> {
        let what = format!("HostedCluster {}/{}", self.ctx.namespace(), self.ctx.name());
        info!(cluster = %self.ctx.name(), "monitoring HostedCluster provisioning");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            self.ensure_curator().await?;
            let hosted = self.hosted_cluster().await?;
            let available = hosted
                .condition(CONDITION_AVAILABLE)
                .map_or(false, |c| c.is_true());
            if !available {
                debug!(
                    cluster = %self.ctx.name(),
                    conditions = %condition_summary(&hosted),
                    "HostedCluster not available"
                );
                return Ok(PollStatus::Pending);
            }

            let pools = self.node_pools().await?;
            let not_ready: Vec<&str> = pools
                .iter()
                .filter(|p| !p.condition(CONDITION_READY).map_or(false, |c| c.is_true()))
                .map(|p| p.name.as_str())
                .collect();
            if !not_ready.is_empty() {
                debug!(cluster = %self.ctx.name(), pools = ?not_ready, "NodePools not ready");
                return Ok(PollStatus::Pending);
            }
            Ok(PollStatus::Ready(()))
        })
        .await?;

        info!(cluster = %self.ctx.name(), "HostedCluster and NodePools ready");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let hosted = match self.hosted_cluster().await {
            Ok(hosted) => hosted,
            Err(e) if e.is_not_found() => {
                info!(cluster = %self.ctx.name(), "HostedCluster already gone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        self.set_paused(ResourceKind::HostedCluster, &hosted, true)
            .await?;
        for pool in self.node_pools().await? {
            self.set_paused(ResourceKind::NodePool, &pool, true).await?;
        }
        Ok(())
    }

    async fn monitor_destroy(&self) -> Result<()> {
        let what = format!(
            "HostedCluster {}/{} deletion",
            self.ctx.namespace(),
            self.ctx.name()
        );
        info!(cluster = %self.ctx.name(), "monitoring HostedCluster deletion");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            self.ensure_curator().await?;
            let hosted_present = match self.hosted_cluster().await {
                Ok(_) => true,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            let pools = self.node_pools().await?.len();
            if hosted_present || pools > 0 {
                debug!(cluster = %self.ctx.name(), hosted_present, pools, "teardown in progress");
                return Ok(PollStatus::Pending);
            }
            Ok(PollStatus::Ready(()))
        })
        .await?;

        info!(cluster = %self.ctx.name(), "HostedCluster and NodePools torn down");
        Ok(())
    }

    async fn upgrade(&self, target: &UpgradeTarget) -> Result<()> {
        let hosted = self.hosted_cluster().await?;
        self.set_release_image(ResourceKind::HostedCluster, &hosted, target)
            .await?;
        for pool in self.node_pools().await? {
            self.set_release_image(ResourceKind::NodePool, &pool, target)
                .await?;
        }
        Ok(())
    }

    async fn monitor_upgrade(&self, target: &UpgradeTarget) -> Result<()> {
        let what = format!("HostedCluster {} upgrade to {}", self.ctx.name(), target.version);
        info!(cluster = %self.ctx.name(), version = %target.version, "monitoring hosted upgrade");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            self.ensure_curator().await?;
            let hosted = self.hosted_cluster().await?;
            if !is_completed_for(&hosted) {
                debug!(cluster = %self.ctx.name(), "HostedCluster rollout in progress");
                return Ok(PollStatus::Pending);
            }

            let pools = self.node_pools().await?;
            let behind: Vec<&str> = pools
                .iter()
                .filter(|p| p.status_str("/version") != Some(target.version.as_str()))
                .map(|p| p.name.as_str())
                .collect();
            if !behind.is_empty() {
                debug!(cluster = %self.ctx.name(), pools = ?behind, "NodePools not upgraded");
                return Ok(PollStatus::Pending);
            }
            Ok(PollStatus::Ready(()))
        })
        .await?;

        info!(cluster = %self.ctx.name(), version = %target.version, "hosted upgrade completed");
        Ok(())
    }
}
