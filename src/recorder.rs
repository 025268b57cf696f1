//! Durable progress on the ClusterCurator resource
//!
//! The recorder is the only writer of the curator. Every write is a fresh
//! read-modify-write guarded by resourceVersion and retried on conflict, so
//! concurrent writers (the console, other curator runs) never lose updates.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::CuratorClient;
use crate::crd::{condition_reasons, ClusterCurator, Condition, ConditionStatus, Operation};
use crate::retry::{retry_on_conflict, RetryConfig};
use crate::Error;

/// Records conditions and spec-side markers for one curator
#[derive(Clone)]
pub struct StatusRecorder {
    client: Arc<dyn CuratorClient>,
    retry: RetryConfig,
    namespace: String,
    name: String,
}

impl StatusRecorder {
    /// Create a recorder for the curator `namespace/name`
    pub fn new(
        client: Arc<dyn CuratorClient>,
        retry: RetryConfig,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            client,
            retry,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Namespace of the curator
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the curator (and of the cluster)
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fetch the current curator; [`Error::NotFound`] if it is gone
    pub async fn load(&self) -> Result<ClusterCurator, Error> {
        self.client.get_curator(&self.namespace, &self.name).await
    }

    /// Insert or replace the condition of `type_`
    pub async fn record_condition(
        &self,
        type_: &str,
        status: ConditionStatus,
        reason: &str,
        message: &str,
    ) -> Result<(), Error> {
        let condition = &Condition::new(type_, status, reason, message);
        retry_on_conflict(&self.retry, "record_condition", || async move {
            let mut curator = self.load().await?;
            curator
                .status
                .get_or_insert_with(Default::default)
                .set_condition(condition.clone());
            self.client.replace_curator_status(&curator).await
        })
        .await?;

        debug!(
            curator = %self.name,
            condition = %type_,
            status = %status,
            reason = %reason,
            "recorded condition"
        );
        Ok(())
    }

    /// Record a stage failure without masking the error that caused it.
    ///
    /// A failure to write is logged; the caller still returns its own error.
    pub async fn record_failure(&self, type_: &str, err: &Error) {
        if let Err(record_err) = self
            .record_condition(
                type_,
                ConditionStatus::False,
                condition_reasons::FAILED,
                &err.to_string(),
            )
            .await
        {
            warn!(
                curator = %self.name,
                condition = %type_,
                error = %record_err,
                "failed to record failure condition"
            );
        }
    }

    /// Persist the posthook to resume from on the next run
    pub async fn record_resumption_marker(&self, hook_name: &str) -> Result<(), Error> {
        self.update_spec("record_resumption_marker", |curator| {
            curator.spec.operation = Some(Operation {
                retry_posthook: Some(hook_name.to_string()),
            });
            true
        })
        .await?;
        info!(curator = %self.name, hook = %hook_name, "recorded posthook to retry");
        Ok(())
    }

    /// Remove the resumption marker, if present
    pub async fn clear_resumption_marker(&self) -> Result<(), Error> {
        self.update_spec("clear_resumption_marker", |curator| {
            curator.spec.operation.take().is_some()
        })
        .await
    }

    /// Persist the name of the Kubernetes Job running this curation
    pub async fn record_curator_job(&self, job_name: &str) -> Result<(), Error> {
        self.update_spec("record_curator_job", |curator| {
            if curator.spec.curator_job.as_deref() == Some(job_name) {
                return false;
            }
            curator.spec.curator_job = Some(job_name.to_string());
            true
        })
        .await
    }

    /// Read-modify-write on the spec; `mutate` returns false for "no change"
    async fn update_spec<F>(&self, operation: &str, mutate: F) -> Result<(), Error>
    where
        F: Fn(&mut ClusterCurator) -> bool + Sync,
    {
        let mutate = &mutate;
        retry_on_conflict(&self.retry, operation, || async move {
            let mut curator = self.load().await?;
            if mutate(&mut curator) {
                self.client.replace_curator(&curator).await?;
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::condition_types;
    use crate::testing::{curator_fixture, CuratorStore};

    fn recorder(store: &CuratorStore) -> StatusRecorder {
        StatusRecorder::new(
            Arc::new(store.mock_client()),
            RetryConfig::default(),
            "my-cluster",
            "my-cluster",
        )
    }

    /// Story: recording the same condition type twice keeps one entry
    #[tokio::test]
    async fn story_condition_recording_is_idempotent_per_type() {
        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        let recorder = recorder(&store);

        recorder
            .record_condition(
                condition_types::CURRENT_JOB,
                ConditionStatus::False,
                condition_reasons::IN_PROGRESS,
                "prehookjob-abcde",
            )
            .await
            .unwrap();
        recorder
            .record_condition(
                condition_types::CURRENT_JOB,
                ConditionStatus::True,
                condition_reasons::FINISHED,
                "prehookjob-abcde",
            )
            .await
            .unwrap();

        let curator = store.current().unwrap();
        let conditions = &curator.status.as_ref().unwrap().conditions;
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert_eq!(conditions[0].reason, condition_reasons::FINISHED);
    }

    /// Story: a concurrent writer wins the first round; the merge is redone
    #[tokio::test(start_paused = true)]
    async fn story_conflicts_are_refetched_and_retried() {
        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        store.fail_next_writes_with_conflict(2);
        let recorder = recorder(&store);

        recorder
            .record_condition(
                condition_types::MONITOR_IMPORT,
                ConditionStatus::True,
                condition_reasons::FINISHED,
                "imported",
            )
            .await
            .unwrap();

        assert!(store.current().unwrap().condition(condition_types::MONITOR_IMPORT).is_some());
        assert_eq!(store.status_writes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_conflicts_are_returned() {
        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        store.fail_next_writes_with_conflict(10);
        let recorder = recorder(&store);

        let err = recorder
            .record_condition("x", ConditionStatus::True, "r", "m")
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn missing_curator_is_not_found() {
        let store = CuratorStore::empty();
        let err = recorder(&store)
            .record_condition("x", ConditionStatus::True, "r", "m")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn resumption_marker_round_trip() {
        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        let recorder = recorder(&store);

        recorder.record_resumption_marker("notify").await.unwrap();
        assert_eq!(store.current().unwrap().spec.retry_posthook(), Some("notify"));

        recorder.clear_resumption_marker().await.unwrap();
        assert_eq!(store.current().unwrap().spec.operation, None);

        // Clearing twice is a no-op and does not write
        let writes = store.spec_writes();
        recorder.clear_resumption_marker().await.unwrap();
        assert_eq!(store.spec_writes(), writes);
    }

    #[tokio::test]
    async fn curator_job_is_recorded_once() {
        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        let recorder = recorder(&store);

        recorder.record_curator_job("curator-job-x1").await.unwrap();
        recorder.record_curator_job("curator-job-x1").await.unwrap();

        assert_eq!(
            store.current().unwrap().spec.curator_job.as_deref(),
            Some("curator-job-x1")
        );
        assert_eq!(store.spec_writes(), 1);
    }

    #[tokio::test]
    async fn failure_recording_never_masks_the_error() {
        let store = CuratorStore::empty();
        // Nothing to write to; must not panic or return anything
        recorder(&store)
            .record_failure(condition_types::MONITOR_IMPORT, &Error::platform("denied"))
            .await;

        let store = CuratorStore::new(curator_fixture(serde_json::json!({})));
        recorder(&store)
            .record_failure(condition_types::MONITOR_IMPORT, &Error::platform("denied"))
            .await;
        let curator = store.current().unwrap();
        let condition = curator.condition(condition_types::MONITOR_IMPORT).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, condition_reasons::FAILED);
        assert_eq!(condition.message, "denied");
    }
}
