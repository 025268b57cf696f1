//! Custom Resource Definitions and external resource views
//!
//! `ClusterCurator` is the only CRD the curator owns. Everything else it
//! touches (automation jobs, cluster deployments, hosted clusters...) is
//! owned by other controllers and modeled loosely in [`external`].

mod curator;
pub mod external;
mod types;

pub use curator::{ClusterCurator, ClusterCuratorSpec, ClusterCuratorStatus};
pub use external::{
    ExternalJob, ExternalResource, JobResult, JobStatus, ResourceCondition, ResourceKind,
};
pub use types::{
    condition_reasons, condition_types, Condition, ConditionStatus, Curation, ExtraVars, Hook,
    HookPhase, Hooks, Operation, UpgradeHooks, VarValue,
};
