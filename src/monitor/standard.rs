//! Hive backed clusters
//!
//! A standard cluster is described by a ClusterDeployment in the cluster
//! namespace. Hive starts provisioning once `installAttemptsLimit` allows an
//! attempt and reports completion through `spec.installed`. Upgrades are
//! requested on the managed cluster itself through a ManagedClusterAction
//! that updates its ClusterVersion, and observed through ManagedClusterInfo.

use async_trait::async_trait;
use tracing::{debug, info};

use super::{condition_summary, BackendContext, ClusterBackend, ClusterFlavor, UpgradeTarget};
use crate::crd::{ExternalResource, ExtraVars, ResourceKind};
use crate::job::context_value;
use crate::poll::{poll_until, PollStatus};
use crate::{Error, Result};

/// ClusterDeployment conditions that end provisioning with a failure
const PROVISION_FAILURE_CONDITIONS: &[&str] = &["ProvisionFailed", "ProvisionStopped"];
/// ClusterDeployment condition reporting a failed teardown
const DEPROVISION_FAILURE_CONDITION: &str = "DeprovisionLaunchError";

/// Backend for Hive ClusterDeployments
pub struct StandardBackend {
    ctx: BackendContext,
}

impl StandardBackend {
    /// Create a standard backend
    pub fn new(ctx: BackendContext) -> Self {
        Self { ctx }
    }

    async fn cluster_deployment(&self) -> Result<ExternalResource> {
        self.ctx
            .resources
            .get(ResourceKind::ClusterDeployment, self.ctx.namespace(), self.ctx.name())
            .await
    }

    fn upgrade_action_name(&self, target: &UpgradeTarget) -> String {
        format!("{}-upgrade-{}", self.ctx.name(), target.version.replace('.', "-"))
    }
}

/// Provisioning state of a ClusterDeployment
fn provision_state(cd: &ExternalResource) -> Result<PollStatus<()>> {
    if cd.spec.get("installed").and_then(|v| v.as_bool()) == Some(true) {
        return Ok(PollStatus::Ready(()));
    }

    for type_ in PROVISION_FAILURE_CONDITIONS {
        if let Some(condition) = cd.condition(type_).filter(|c| c.is_true()) {
            return Err(Error::platform(format!(
                "ClusterDeployment {}/{} {}: {}",
                cd.namespace,
                cd.name,
                type_,
                condition.message()
            )));
        }
    }
    Ok(PollStatus::Pending)
}

/// Versions the managed cluster may be updated to
fn available_updates(info: &ExternalResource) -> Vec<String> {
    let ocp = info.status.pointer("/distributionInfo/ocp");
    let plain = ocp
        .and_then(|o| o.get("availableUpdates"))
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string));
    let detailed = ocp
        .and_then(|o| o.get("versionAvailableUpdates"))
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.get("version").and_then(|v| v.as_str()).map(str::to_string));
    plain.chain(detailed).collect()
}

#[async_trait]
impl ClusterBackend for StandardBackend {
    fn flavor(&self) -> ClusterFlavor {
        ClusterFlavor::Standard
    }

    async fn hook_context(&self) -> Result<ExtraVars> {
        let cd = self.cluster_deployment().await?;
        let pool_name = format!("{}-worker", self.ctx.name());
        let pool = self
            .ctx
            .resources
            .get(ResourceKind::MachinePool, self.ctx.namespace(), &pool_name)
            .await?;

        Ok(ExtraVars::from([
            ("cluster_deployment".to_string(), context_value(&cd.spec)),
            ("machine_pool".to_string(), context_value(&pool.spec)),
        ]))
    }

    async fn activate(&self) -> Result<()> {
        let cd = self.cluster_deployment().await?;
        let limit = cd.spec.get("installAttemptsLimit").and_then(|v| v.as_i64());
        if limit != Some(0) {
            debug!(cluster = %self.ctx.name(), "ClusterDeployment already allows provisioning");
            return Ok(());
        }

        self.ctx
            .resources
            .merge_patch(
                ResourceKind::ClusterDeployment,
                self.ctx.namespace(),
                self.ctx.name(),
                &serde_json::json!({"spec": {"installAttemptsLimit": 1}}),
            )
            .await?;
        info!(cluster = %self.ctx.name(), "activated ClusterDeployment provisioning");
        Ok(())
    }

    async fn monitor_provision(&self) -> Result<()> {
        let what = format!("ClusterDeployment {}/{}", self.ctx.namespace(), self.ctx.name());
        info!(cluster = %self.ctx.name(), "monitoring ClusterDeployment provisioning");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            let cd = self.cluster_deployment().await?;
            debug!(
                cluster = %self.ctx.name(),
                conditions = %condition_summary(&cd),
                "ClusterDeployment provisioning"
            );
            provision_state(&cd)
        })
        .await?;

        info!(cluster = %self.ctx.name(), "ClusterDeployment provisioned");
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        match self
            .ctx
            .resources
            .delete(ResourceKind::ClusterDeployment, self.ctx.namespace(), self.ctx.name())
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                info!(cluster = %self.ctx.name(), "ClusterDeployment already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn monitor_destroy(&self) -> Result<()> {
        let what = format!(
            "ClusterDeployment {}/{} deletion",
            self.ctx.namespace(),
            self.ctx.name()
        );
        info!(cluster = %self.ctx.name(), "monitoring ClusterDeployment deletion");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            let cd = match self.cluster_deployment().await {
                Ok(cd) => cd,
                Err(e) if e.is_not_found() => return Ok(PollStatus::Ready(())),
                Err(e) => return Err(e),
            };
            if let Some(condition) = cd
                .condition(DEPROVISION_FAILURE_CONDITION)
                .filter(|c| c.is_true())
            {
                return Err(Error::platform(format!(
                    "ClusterDeployment {}/{} deprovision failed: {}",
                    cd.namespace,
                    cd.name,
                    condition.message()
                )));
            }
            debug!(cluster = %self.ctx.name(), "ClusterDeployment still present");
            Ok(PollStatus::Pending)
        })
        .await?;

        info!(cluster = %self.ctx.name(), "ClusterDeployment deleted");
        Ok(())
    }

    async fn upgrade(&self, target: &UpgradeTarget) -> Result<()> {
        let info = self
            .ctx
            .resources
            .get(ResourceKind::ManagedClusterInfo, self.ctx.namespace(), self.ctx.name())
            .await?;

        if target.upstream.is_none() && target.channel.is_none() {
            let available = available_updates(&info);
            if !available.contains(&target.version) {
                return Err(Error::validation(format!(
                    "Cannot upgrade to version {}, available updates are: [{}]",
                    target.version,
                    available.join(", ")
                )));
            }
        }

        let mut cluster_version_spec = serde_json::json!({
            "desiredUpdate": {"version": target.version}
        });
        if let Some(channel) = &target.channel {
            cluster_version_spec["channel"] = serde_json::json!(channel);
        }
        if let Some(upstream) = &target.upstream {
            cluster_version_spec["upstream"] = serde_json::json!(upstream);
        }

        let kind = ResourceKind::ManagedClusterAction;
        let name = self.upgrade_action_name(target);
        let action = serde_json::json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind(),
            "metadata": {"name": name, "namespace": self.ctx.namespace()},
            "spec": {
                "actionType": "Update",
                "kube": {
                    "resource": "clusterversion",
                    "name": "version",
                    "template": {
                        "apiVersion": "config.openshift.io/v1",
                        "kind": "ClusterVersion",
                        "metadata": {"name": "version"},
                        "spec": cluster_version_spec,
                    },
                },
            },
        });

        match self
            .ctx
            .resources
            .create(kind, self.ctx.namespace(), &action)
            .await
        {
            Ok(()) => {
                info!(cluster = %self.ctx.name(), version = %target.version, action = %name, "requested upgrade");
                Ok(())
            }
            Err(e) if e.is_conflict() => {
                info!(cluster = %self.ctx.name(), action = %name, "upgrade already requested");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn monitor_upgrade(&self, target: &UpgradeTarget) -> Result<()> {
        let what = format!("cluster {} upgrade to {}", self.ctx.name(), target.version);
        info!(cluster = %self.ctx.name(), version = %target.version, "monitoring upgrade");

        poll_until(&self.ctx.poll, &self.ctx.cancel, &what, || async move {
            let info = self
                .ctx
                .resources
                .get(ResourceKind::ManagedClusterInfo, self.ctx.namespace(), self.ctx.name())
                .await?;

            let current = info.status_str("/distributionInfo/ocp/version").unwrap_or_default();
            if current == target.version {
                return Ok(PollStatus::Ready(()));
            }
            let failed = info
                .status
                .pointer("/distributionInfo/ocp/upgradeFailed")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if failed {
                return Err(Error::platform(format!(
                    "upgrade of cluster {} to {} failed",
                    self.ctx.name(),
                    target.version
                )));
            }
            debug!(cluster = %self.ctx.name(), current = %current, desired = %target.version, "upgrade in progress");
            Ok(PollStatus::Pending)
        })
        .await?;

        info!(cluster = %self.ctx.name(), version = %target.version, "upgrade completed");
        Ok(())
    }
}
