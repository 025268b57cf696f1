//! Runtime configuration for a curation run
//!
//! The binary gathers these values from flags and environment variables; the
//! library only ever sees the resulting [`CuratorConfig`].

use std::time::Duration;

use crate::crd::HookPhase;
use crate::poll::PollConfig;
use crate::retry::RetryConfig;
use crate::Error;

/// Default interval between automation job polls
pub const DEFAULT_JOB_POLL: Duration = Duration::from_secs(5);
/// Default interval between managed cluster import polls
pub const DEFAULT_IMPORT_POLL: Duration = Duration::from_secs(10);
/// Default interval between cluster provisioning/teardown polls
pub const DEFAULT_CLUSTER_POLL: Duration = Duration::from_secs(10);
/// Default deadline for one automation job
pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);
/// Default deadline for managed cluster import
pub const DEFAULT_IMPORT_TIMEOUT: Duration = Duration::from_secs(60 * 60);
/// Default deadline for provisioning, teardown and upgrade
pub const DEFAULT_CLUSTER_TIMEOUT: Duration = Duration::from_secs(3 * 60 * 60);

/// Everything a curation run needs besides the cluster identity
#[derive(Clone, Debug)]
pub struct CuratorConfig {
    /// Polling of automation jobs
    pub job_poll: PollConfig,
    /// Polling of managed cluster import
    pub import_poll: PollConfig,
    /// Polling of provisioning, teardown and upgrade
    pub cluster_poll: PollConfig,
    /// Conflict retries for curator writes
    pub retry: RetryConfig,
    /// Hook role for the `ansiblejob` operation, as given (`prehook` or
    /// `posthook`); only that operation validates it
    pub job_type: Option<String>,
    /// `namespace/secretName` of the provider credential
    pub provider_credential_path: Option<String>,
    /// Name of the Kubernetes Job running this process
    pub curator_job_name: Option<String>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            job_poll: PollConfig::new(DEFAULT_JOB_POLL, Some(DEFAULT_JOB_TIMEOUT)),
            import_poll: PollConfig::new(DEFAULT_IMPORT_POLL, Some(DEFAULT_IMPORT_TIMEOUT)),
            cluster_poll: PollConfig::new(DEFAULT_CLUSTER_POLL, Some(DEFAULT_CLUSTER_TIMEOUT)),
            retry: RetryConfig::default(),
            job_type: None,
            provider_credential_path: None,
            curator_job_name: None,
        }
    }
}

impl CuratorConfig {
    /// Hook role, required by the `ansiblejob` operation
    pub fn require_job_type(&self) -> Result<HookPhase, Error> {
        match self.job_type.as_deref().filter(|t| !t.is_empty()) {
            None => Err(Error::validation(
                "Missing JOB_TYPE environment parameter, use \"prehook\" or \"posthook\"",
            )),
            Some(raw) => raw.parse().map_err(|_| {
                Error::validation(format!(
                    "Invalid JOB_TYPE {:?}, use \"prehook\" or \"posthook\"",
                    raw
                ))
            }),
        }
    }
}

/// Convert a seconds value from the command line into a deadline; zero means
/// "no deadline"
pub fn timeout_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Split a `namespace/secretName` credential path; both parts are required
pub fn split_credential_path(path: &str) -> Result<(&str, &str), Error> {
    match path.split_once('/') {
        Some((namespace, name)) if !namespace.is_empty() && !name.is_empty() => {
            Ok((namespace, name))
        }
        _ => Err(Error::validation(format!(
            "invalid provider credential path {:?}, expected namespace/secretName",
            path
        ))),
    }
}
