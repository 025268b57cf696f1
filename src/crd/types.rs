//! Supporting types for the ClusterCurator CRD

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Curation requested on a cluster
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Curation {
    /// Provision a new cluster
    Install,
    /// Move the cluster to a new release
    Upgrade,
    /// Resize worker capacity
    Scale,
    /// Tear the cluster down
    Destroy,
}

impl std::fmt::Display for Curation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Scale => write!(f, "scale"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Hook phase: before or after the provisioning step
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HookPhase {
    /// Runs before provisioning
    Pre,
    /// Runs after provisioning
    Post,
}

impl HookPhase {
    /// Job role keyword used in annotations, job names and `JOB_TYPE`
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pre => "prehook",
            Self::Post => "posthook",
        }
    }
}

impl std::fmt::Display for HookPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HookPhase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "prehook" => Ok(Self::Pre),
            "posthook" => Ok(Self::Post),
            _ => Err(Error::validation(
                "Missing JOB_TYPE environment parameter, use \"prehook\" or \"posthook\"",
            )),
        }
    }
}

/// Arbitrary hook variable value.
///
/// Mirrors JSON: hook authors put whatever their playbook expects here, so
/// nesting has to survive untouched.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(untagged)]
pub enum VarValue {
    /// JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer or float
    Number(serde_json::Number),
    /// String
    String(String),
    /// Ordered list
    List(Vec<VarValue>),
    /// Nested mapping
    Map(BTreeMap<String, VarValue>),
}

/// Hook variables keyed by name
pub type ExtraVars = BTreeMap<String, VarValue>;

impl From<serde_json::Value> for VarValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n),
            serde_json::Value::String(s) => Self::String(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from).collect())
            }
            serde_json::Value::Object(map) => {
                Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<VarValue> for serde_json::Value {
    fn from(value: VarValue) -> Self {
        match value {
            VarValue::Null => Self::Null,
            VarValue::Bool(b) => Self::Bool(b),
            VarValue::Number(n) => Self::Number(n),
            VarValue::String(s) => Self::String(s),
            VarValue::List(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            VarValue::Map(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl JsonSchema for VarValue {
    fn schema_name() -> String {
        "VarValue".to_string()
    }

    fn is_referenceable() -> bool {
        false
    }

    fn json_schema(_gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        let mut schema = schemars::schema::SchemaObject::default();
        schema.extensions.insert(
            "x-kubernetes-preserve-unknown-fields".to_string(),
            serde_json::Value::Bool(true),
        );
        schemars::schema::Schema::Object(schema)
    }
}

/// One automation invocation
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hook {
    /// Automation job template to launch
    pub name: String,

    /// Variables passed to the template, merged with cluster context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_vars: Option<ExtraVars>,
}

impl Hook {
    /// Create a hook without variables
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            extra_vars: None,
        }
    }
}

/// Ordered hooks for one curation type
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Hooks run before provisioning, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prehook: Vec<Hook>,

    /// Hooks run after provisioning, in order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub posthook: Vec<Hook>,

    /// Secret in the cluster namespace holding automation platform credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tower_auth_secret: Option<String>,
}

impl Hooks {
    /// Hooks for the given phase
    pub fn for_phase(&self, phase: HookPhase) -> &[Hook] {
        match phase {
            HookPhase::Pre => &self.prehook,
            HookPhase::Post => &self.posthook,
        }
    }
}

/// Hooks plus the release target of an upgrade
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UpgradeHooks {
    /// Pre/post hooks and credentials
    #[serde(flatten)]
    pub hooks: Hooks,

    /// Target release version (e.g., "4.14.3")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_update: Option<String>,

    /// Update channel to switch to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    /// Update service endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upstream: Option<String>,
}

/// Resumption marker for a failed posthook phase
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    /// Posthook to re-run first on the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_posthook: Option<String>,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., current-ansiblejob, monitor-import)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }
}

/// Condition types written by the curator
pub mod condition_types {
    /// Name of the automation job in flight (False) or last finished (True)
    pub const CURRENT_JOB: &str = "current-ansiblejob";
    /// Prehook phase
    pub const PREHOOK: &str = "prehook-ansiblejob";
    /// Posthook phase
    pub const POSTHOOK: &str = "posthook-ansiblejob";
    /// Activation and provisioning
    pub const ACTIVATE_AND_MONITOR: &str = "activate-and-monitor";
    /// Managed cluster import
    pub const MONITOR_IMPORT: &str = "monitor-import";
    /// Upgrade request
    pub const UPGRADE: &str = "upgrade-cluster";
    /// Upgrade progress
    pub const MONITOR_UPGRADE: &str = "monitor-upgrade";
    /// Destroy request
    pub const DESTROY: &str = "destroy-cluster";
    /// Teardown progress
    pub const MONITOR_DESTROY: &str = "monitor-destroy";
    /// Overall curation
    pub const CURATOR_JOB: &str = "clustercurator-job";
    /// Provider credential copy
    pub const CLOUD_PROVIDER: &str = "applycloudprovider-ansible";
}

/// Condition reasons written by the curator
pub mod condition_reasons {
    /// Step started
    pub const IN_PROGRESS: &str = "JobInProgress";
    /// Step finished successfully
    pub const FINISHED: &str = "JobHasFinished";
    /// Step failed
    pub const FAILED: &str = "JobFailed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn curation_parses_lowercase() {
        let c: Curation = serde_json::from_str("\"upgrade\"").unwrap();
        assert_eq!(c, Curation::Upgrade);
        assert_eq!(c.to_string(), "upgrade");
        assert!(serde_json::from_str::<Curation>("\"Upgrade\"").is_err());
    }

    #[test]
    fn hook_phase_from_job_type() {
        assert_eq!("prehook".parse::<HookPhase>().unwrap(), HookPhase::Pre);
        assert_eq!("posthook".parse::<HookPhase>().unwrap(), HookPhase::Post);

        let err = "".parse::<HookPhase>().unwrap_err();
        assert!(err.to_string().contains("Missing JOB_TYPE"));
    }

    mod extra_vars {
        use super::*;

        /// Story: nested playbook variables survive a trip through the CRD
        ///
        /// Hook authors hand in arbitrary structures; the curator must pass
        /// them to the automation platform exactly as written.
        #[test]
        fn story_nested_vars_keep_their_shape() {
            let hook: Hook = serde_json::from_value(serde_json::json!({
                "name": "configure-dns",
                "extraVars": {
                    "zone": "example.com",
                    "ttl": 300,
                    "dry_run": false,
                    "records": ["api", "*.apps"],
                    "owner": {"team": "infra", "oncall": null}
                }
            }))
            .unwrap();

            let vars = hook.extra_vars.as_ref().unwrap();
            assert_eq!(vars["zone"], VarValue::from("example.com"));
            assert_eq!(vars["dry_run"], VarValue::Bool(false));
            assert!(matches!(vars["ttl"], VarValue::Number(_)));
            assert!(matches!(&vars["records"], VarValue::List(items) if items.len() == 2));
            match &vars["owner"] {
                VarValue::Map(owner) => assert_eq!(owner["oncall"], VarValue::Null),
                other => panic!("expected map, got {:?}", other),
            }

            let back = serde_json::to_value(&hook).unwrap();
            assert_eq!(back["extraVars"]["owner"]["team"], "infra");
            assert_eq!(back["extraVars"]["ttl"], 300);
        }

        #[test]
        fn json_values_convert_both_ways() {
            let original = serde_json::json!({"a": [1, "two", {"three": true}]});
            let var = VarValue::from(original.clone());
            assert_eq!(serde_json::Value::from(var), original);
        }
    }

    mod hooks {
        use super::*;

        #[test]
        fn upgrade_hooks_flatten_into_one_object() {
            let upgrade: UpgradeHooks = serde_json::from_value(serde_json::json!({
                "desiredUpdate": "4.14.3",
                "towerAuthSecret": "toweraccess",
                "prehook": [{"name": "drain-check"}]
            }))
            .unwrap();

            assert_eq!(upgrade.desired_update.as_deref(), Some("4.14.3"));
            assert_eq!(upgrade.hooks.tower_auth_secret.as_deref(), Some("toweraccess"));
            assert_eq!(upgrade.hooks.for_phase(HookPhase::Pre)[0].name, "drain-check");
            assert!(upgrade.hooks.for_phase(HookPhase::Post).is_empty());
        }
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new(
            condition_types::CURRENT_JOB,
            ConditionStatus::False,
            condition_reasons::IN_PROGRESS,
            "prehookjob-abcde",
        );
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "current-ansiblejob");
        assert_eq!(json["status"], "False");
        assert!(json.get("lastTransitionTime").is_some());
    }
}
