//! Externally-owned resources the curator reads (and occasionally patches)
//!
//! None of these are defined by the curator, so they are accessed as
//! `DynamicObject`s and only the fields the curator acts on are interpreted.

use std::collections::BTreeMap;

use kube::discovery::ApiResource;
use serde::Deserialize;

/// Kinds of external resources the curator touches
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Automation job (AnsibleJob)
    AnsibleJob,
    /// Hive ClusterDeployment
    ClusterDeployment,
    /// Hive MachinePool
    MachinePool,
    /// Open Cluster Management ManagedCluster (cluster scoped)
    ManagedCluster,
    /// Open Cluster Management ManagedClusterInfo
    ManagedClusterInfo,
    /// Open Cluster Management ManagedClusterAction
    ManagedClusterAction,
    /// Hypershift HostedCluster
    HostedCluster,
    /// Hypershift NodePool
    NodePool,
}

impl ResourceKind {
    /// Full API version
    pub fn api_version(&self) -> &'static str {
        match self {
            Self::AnsibleJob => "tower.ansible.com/v1alpha1",
            Self::ClusterDeployment | Self::MachinePool => "hive.openshift.io/v1",
            Self::ManagedCluster => "cluster.open-cluster-management.io/v1",
            Self::ManagedClusterInfo => "internal.open-cluster-management.io/v1beta1",
            Self::ManagedClusterAction => "action.open-cluster-management.io/v1beta1",
            Self::HostedCluster | Self::NodePool => "hypershift.openshift.io/v1beta1",
        }
    }

    /// Resource kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AnsibleJob => "AnsibleJob",
            Self::ClusterDeployment => "ClusterDeployment",
            Self::MachinePool => "MachinePool",
            Self::ManagedCluster => "ManagedCluster",
            Self::ManagedClusterInfo => "ManagedClusterInfo",
            Self::ManagedClusterAction => "ManagedClusterAction",
            Self::HostedCluster => "HostedCluster",
            Self::NodePool => "NodePool",
        }
    }

    /// Lowercase plural used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Self::AnsibleJob => "ansiblejobs",
            Self::ClusterDeployment => "clusterdeployments",
            Self::MachinePool => "machinepools",
            Self::ManagedCluster => "managedclusters",
            Self::ManagedClusterInfo => "managedclusterinfos",
            Self::ManagedClusterAction => "managedclusteractions",
            Self::HostedCluster => "hostedclusters",
            Self::NodePool => "nodepools",
        }
    }

    /// Whether the resource lives in a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, Self::ManagedCluster)
    }

    /// Qualified resource name as the API server reports it
    /// (e.g., "hostedclusters.hypershift.openshift.io")
    pub fn qualified_name(&self) -> String {
        let group = self.api_version().split('/').next().unwrap_or_default();
        format!("{}.{}", self.plural(), group)
    }

    /// Build the ApiResource for dynamic access
    pub fn api_resource(&self) -> ApiResource {
        let api_version = self.api_version();
        let (group, version) = match api_version.rsplit_once('/') {
            Some((g, v)) => (g, v),
            None => ("", api_version),
        };
        ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: api_version.to_string(),
            kind: self.kind().to_string(),
            plural: self.plural().to_string(),
        }
    }
}

/// Condition entry on an external resource.
///
/// Every field is optional: external controllers are not consistent about
/// what they populate.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ResourceCondition {
    /// Condition type
    #[serde(rename = "type", default)]
    pub type_: String,
    /// "True", "False" or "Unknown"
    #[serde(default)]
    pub status: Option<String>,
    /// Machine-readable reason
    #[serde(default)]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

impl ResourceCondition {
    /// True when status is exactly "True"
    pub fn is_true(&self) -> bool {
        self.status.as_deref() == Some("True")
    }

    /// Message, or empty string
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

/// Loosely-typed view of an external resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalResource {
    /// Object name
    pub name: String,
    /// Object namespace (empty for cluster-scoped)
    pub namespace: String,
    /// Raw spec
    pub spec: serde_json::Value,
    /// Raw status
    pub status: serde_json::Value,
}

impl ExternalResource {
    /// Build from a full object as returned by the API server
    pub fn from_object(object: &serde_json::Value) -> Self {
        let metadata = &object["metadata"];
        Self {
            name: metadata["name"].as_str().unwrap_or_default().to_string(),
            namespace: metadata["namespace"].as_str().unwrap_or_default().to_string(),
            spec: object.get("spec").cloned().unwrap_or(serde_json::Value::Null),
            status: object.get("status").cloned().unwrap_or(serde_json::Value::Null),
        }
    }

    /// `status.conditions`, or `None` when the list is absent
    pub fn conditions(&self) -> Option<Vec<ResourceCondition>> {
        self.status
            .get("conditions")
            .filter(|c| c.is_array())
            .and_then(|c| serde_json::from_value(c.clone()).ok())
    }

    /// First condition of the given type
    pub fn condition(&self, type_: &str) -> Option<ResourceCondition> {
        self.conditions()
            .and_then(|conds| conds.into_iter().find(|c| c.type_ == type_))
    }

    /// String at a JSON pointer inside the spec (e.g., "/release/image")
    pub fn spec_str(&self, pointer: &str) -> Option<&str> {
        self.spec.pointer(pointer).and_then(|v| v.as_str())
    }

    /// String at a JSON pointer inside the status
    pub fn status_str(&self, pointer: &str) -> Option<&str> {
        self.status.pointer(pointer).and_then(|v| v.as_str())
    }
}

/// Result reported by the automation platform once a job ran
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobResult {
    /// Not finished, or a value the curator does not act on
    Pending,
    /// Finished successfully
    Successful,
    /// Finished with an error
    Error,
}

impl JobResult {
    fn parse(s: &str) -> Self {
        match s {
            "successful" => Self::Successful,
            "error" => Self::Error,
            _ => Self::Pending,
        }
    }
}

/// Observed status of an automation job
#[derive(Clone, Debug, PartialEq)]
pub struct JobStatus {
    /// `status.ansibleJobResult.status`
    pub result: JobResult,
    /// `status.conditions`
    pub conditions: Vec<ResourceCondition>,
    /// `status.k8sJob.namespacedName`, the Kubernetes Job doing the work
    pub k8s_job: Option<String>,
}

/// An automation job created by the curator and run by the platform
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalJob {
    /// Generated name
    pub name: String,
    /// Namespace (the cluster namespace)
    pub namespace: String,
    /// Annotations; the curator stamps job type and hook name here
    pub annotations: BTreeMap<String, String>,
    /// Status, `None` while the platform is still initializing it
    pub status: Option<JobStatus>,
}

/// Annotation holding the job role (prehook/posthook)
pub const JOB_TYPE_ANNOTATION: &str = "jobtype";
/// Annotation holding the hook the job was created for
pub const HOOK_NAME_ANNOTATION: &str = "hookname";

impl ExternalJob {
    /// Build from a full AnsibleJob object as returned by the API server
    pub fn from_object(object: &serde_json::Value) -> Self {
        let metadata = &object["metadata"];
        let annotations = metadata["annotations"]
            .as_object()
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let status = object.get("status").filter(|s| s.is_object()).map(|s| JobStatus {
            result: s
                .pointer("/ansibleJobResult/status")
                .and_then(|v| v.as_str())
                .map(JobResult::parse)
                .unwrap_or(JobResult::Pending),
            conditions: s
                .get("conditions")
                .and_then(|c| serde_json::from_value(c.clone()).ok())
                .unwrap_or_default(),
            k8s_job: s
                .pointer("/k8sJob/namespacedName")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        });

        Self {
            name: metadata["name"].as_str().unwrap_or_default().to_string(),
            namespace: metadata["namespace"].as_str().unwrap_or_default().to_string(),
            annotations,
            status,
        }
    }

    /// Whether this job was created for the given hook and role
    pub fn belongs_to(&self, job_type: &str, hook_name: &str) -> bool {
        self.annotations.get(JOB_TYPE_ANNOTATION).map(String::as_str) == Some(job_type)
            && self.annotations.get(HOOK_NAME_ANNOTATION).map(String::as_str) == Some(hook_name)
    }
}
