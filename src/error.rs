//! Error types for the curator
//!
//! Every variant maps onto one failure category of a curation run. All of
//! them are fatal to the current invocation; resumption happens across
//! invocations through the state persisted on the ClusterCurator resource.

use thiserror::Error;

use crate::crd::HookPhase;

/// Main error type for curation operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is neither a missing resource nor a conflict
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Bad command-line input, raised before any resource is touched
    #[error("{0}")]
    Usage(String),

    /// A resource the curation depends on does not exist
    #[error("{resource} \"{name}\" not found")]
    NotFound {
        /// Qualified resource name (e.g., "clustercurators.cluster.open-cluster-management.io")
        resource: String,
        /// Name of the missing object
        name: String,
    },

    /// Optimistic concurrency conflict while updating a resource
    #[error("conflict updating {resource} \"{name}\": {message}")]
    Conflict {
        /// Qualified resource name
        resource: String,
        /// Name of the object being updated
        name: String,
        /// Message reported by the API server
        message: String,
    },

    /// The automation or cluster platform reported a failure
    #[error("{0}")]
    Platform(String),

    /// The curation request is incomplete or inconsistent
    #[error("validation error: {0}")]
    Validation(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A poll loop exceeded its deadline
    #[error("timed out after {elapsed_secs}s waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// Seconds spent waiting
        elapsed_secs: u64,
    },

    /// A poll loop was cancelled (process shutdown)
    #[error("cancelled while waiting for {0}")]
    Cancelled(String),

    /// A hook failed; names the hook so a later run can resume from it
    #[error("{phase} {hook} failed: {source}")]
    Hook {
        /// Phase the hook belongs to
        phase: HookPhase,
        /// Name of the failing hook
        hook: String,
        /// Underlying failure
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Create a usage error with the given message
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a platform error with the given message
    pub fn platform(msg: impl Into<String>) -> Self {
        Self::Platform(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a not-found error for a resource
    pub fn not_found(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            name: name.into(),
        }
    }

    /// Wrap an error raised while running a hook
    pub fn hook(phase: HookPhase, hook: impl Into<String>, source: Error) -> Self {
        Self::Hook {
            phase,
            hook: hook.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for optimistic concurrency conflicts
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true when the error means a resource is absent
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Name of the failed hook, if this error came from one
    pub fn failed_hook(&self) -> Option<(HookPhase, &str)> {
        match self {
            Self::Hook { phase, hook, .. } => Some((*phase, hook.as_str())),
            _ => None,
        }
    }

    /// Translate a kube-rs error, mapping 404 and 409 onto their own variants
    pub fn from_kube(err: kube::Error, resource: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(resource, name),
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                resource: resource.to_string(),
                name: name.to_string(),
                message: ae.message,
            },
            other => Self::Kube(other),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "the object has been modified".to_string(),
            reason: "Conflict".to_string(),
            code,
        })
    }

    /// Story: a missing curator surfaces the resource kind and name
    ///
    /// Operators read this message from the Job log; it has to say exactly
    /// which object could not be resolved.
    #[test]
    fn story_not_found_names_the_resource() {
        let err = Error::from_kube(
            api_error(404),
            "clustercurators.cluster.open-cluster-management.io",
            "my-cluster",
        );
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "clustercurators.cluster.open-cluster-management.io \"my-cluster\" not found"
        );
    }

    #[test]
    fn conflicts_are_classified() {
        let err = Error::from_kube(api_error(409), "clustercurators", "c1");
        assert!(err.is_conflict());
        assert!(err.to_string().contains("has been modified"));

        let err = Error::from_kube(api_error(500), "clustercurators", "c1");
        assert!(matches!(err, Error::Kube(_)));
    }

    /// Story: a failed posthook keeps its identity through propagation
    #[test]
    fn story_hook_errors_remember_the_hook() {
        let err = Error::hook(
            HookPhase::Post,
            "notify-cmdb",
            Error::platform("AnsibleJob my-cluster/posthookjob-x exited with an error"),
        );
        assert_eq!(err.failed_hook(), Some((HookPhase::Post, "notify-cmdb")));
        assert_eq!(
            err.to_string(),
            "posthook notify-cmdb failed: AnsibleJob my-cluster/posthookjob-x exited with an error"
        );
        assert_eq!(Error::validation("x").failed_hook(), None);
    }
}
