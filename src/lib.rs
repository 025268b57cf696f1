//! Curator - lifecycle curation for managed clusters
//!
//! A curation (install, upgrade, scale, destroy) is requested on a
//! `ClusterCurator` resource and carried out by one short-lived process per
//! attempt. The process runs the configured automation hooks, drives the
//! provisioning backend, waits for the cluster to reach the requested state,
//! and persists every step as a condition on the curator so a later attempt
//! can pick up where a failed one stopped.
//!
//! # Modules
//!
//! - [`crd`] - ClusterCurator CRD and loose views of external resources
//! - [`client`] - Kubernetes access traits and their kube-rs implementation
//! - [`recorder`] - Conflict-safe condition and marker writes
//! - [`job`] - Automation job descriptions and result monitoring
//! - [`hooks`] - Sequential prehook/posthook execution with resumption
//! - [`monitor`] - Import, provisioning, teardown and upgrade monitors
//! - [`credentials`] - Provider credential propagation
//! - [`dispatcher`] - Operation keywords and the curation state machine
//! - [`poll`] - Deadline- and cancellation-aware polling
//! - [`retry`] - Bounded retry for update conflicts
//! - [`config`] - Runtime configuration
//! - [`error`] - Error types for the curator

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod crd;
pub mod credentials;
pub mod dispatcher;
pub mod error;
pub mod hooks;
pub mod job;
pub mod monitor;
pub mod poll;
pub mod recorder;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "cluster-curator";

/// Secret, in the cluster namespace, holding automation platform access
pub const TOWER_ACCESS_SECRET: &str = "toweraccess";
