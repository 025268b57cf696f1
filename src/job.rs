//! Automation jobs: what to create for a hook and how to wait for it
//!
//! A job is an AnsibleJob resource. The curator writes the template name,
//! the credential secret and the variables; the automation platform runs it
//! and reports back through `status`. Two failure signals exist and both are
//! checked on every poll: the result status and a condition with reason
//! `Failed`. Platforms are not consistent about populating both.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::JobClient;
use crate::crd::external::{HOOK_NAME_ANNOTATION, JOB_TYPE_ANNOTATION};
use crate::crd::{
    condition_reasons, condition_types, ConditionStatus, ExternalJob, ExtraVars, Hook, HookPhase,
    JobResult, ResourceKind, VarValue,
};
use crate::poll::{poll_until, PollConfig, PollStatus};
use crate::recorder::StatusRecorder;
use crate::Error;

/// Condition reason automation platforms use to signal a failed run
const FAILED_REASON: &str = "Failed";

/// Everything needed to create the job for one hook
#[derive(Clone, Debug, PartialEq)]
pub struct JobDescription {
    /// Namespace the job is created in (the cluster namespace)
    pub namespace: String,
    /// Role of the job
    pub phase: HookPhase,
    /// Hook (job template) name
    pub hook_name: String,
    /// Secret holding automation platform access
    pub tower_auth_secret: String,
    /// Hook variables merged with the cluster context
    pub extra_vars: ExtraVars,
}

impl JobDescription {
    /// Describe the job for `hook`.
    ///
    /// Context entries overwrite hook variables of the same name.
    pub fn new(
        namespace: impl Into<String>,
        phase: HookPhase,
        hook: &Hook,
        tower_auth_secret: impl Into<String>,
        context: ExtraVars,
    ) -> Self {
        let mut extra_vars = hook.extra_vars.clone().unwrap_or_default();
        extra_vars.extend(context);
        Self {
            namespace: namespace.into(),
            phase,
            hook_name: hook.name.clone(),
            tower_auth_secret: tower_auth_secret.into(),
            extra_vars,
        }
    }

    /// Name prefix; the API server appends a random suffix
    pub fn generate_name(&self) -> String {
        format!("{}job-", self.phase)
    }

    /// Full AnsibleJob object
    pub fn to_object(&self) -> serde_json::Value {
        let kind = ResourceKind::AnsibleJob;
        let extra_vars: serde_json::Map<String, serde_json::Value> = self
            .extra_vars
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v.clone())))
            .collect();

        serde_json::json!({
            "apiVersion": kind.api_version(),
            "kind": kind.kind(),
            "metadata": {
                "generateName": self.generate_name(),
                "namespace": self.namespace,
                "annotations": {
                    JOB_TYPE_ANNOTATION: self.phase.as_str(),
                    HOOK_NAME_ANNOTATION: self.hook_name,
                },
            },
            "spec": {
                "job_template_name": self.hook_name,
                "tower_auth_secret": self.tower_auth_secret,
                "extra_vars": extra_vars,
            },
        })
    }
}

/// Convert a resource spec into a hook variable
pub fn context_value(spec: &serde_json::Value) -> VarValue {
    VarValue::from(spec.clone())
}

/// Terminal state of a job
#[derive(Clone, Debug, PartialEq)]
pub enum JobOutcome {
    /// The platform reported success
    Succeeded,
    /// The platform reported failure; carries a description
    Failed(String),
}

/// Inspect one observation of a job
pub fn evaluate(job: &ExternalJob) -> PollStatus<JobOutcome> {
    let Some(status) = &job.status else {
        return PollStatus::Pending;
    };

    match status.result {
        JobResult::Successful => return PollStatus::Ready(JobOutcome::Succeeded),
        JobResult::Error => {
            return PollStatus::Ready(JobOutcome::Failed(format!(
                "AnsibleJob {}/{} exited with an error",
                job.namespace, job.name
            )))
        }
        JobResult::Pending => {}
    }

    status
        .conditions
        .iter()
        .find(|c| c.reason.as_deref() == Some(FAILED_REASON))
        .map(|c| PollStatus::Ready(JobOutcome::Failed(c.message().to_string())))
        .unwrap_or(PollStatus::Pending)
}

/// Polls a job until the platform reports a result
#[derive(Clone)]
pub struct JobMonitor {
    client: Arc<dyn JobClient>,
    recorder: StatusRecorder,
    poll: PollConfig,
    cancel: CancellationToken,
}

impl JobMonitor {
    /// Create a monitor
    pub fn new(
        client: Arc<dyn JobClient>,
        recorder: StatusRecorder,
        poll: PollConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            recorder,
            poll,
            cancel,
        }
    }

    /// Wait for `job` to finish.
    ///
    /// A fetch error ends the wait immediately. On success the current-job
    /// condition is flipped to True before returning.
    pub async fn monitor(&self, job: &ExternalJob) -> Result<JobOutcome, Error> {
        let what = format!("AnsibleJob {}/{}", job.namespace, job.name);
        info!(job = %job.name, namespace = %job.namespace, "waiting for AnsibleJob");

        let outcome = poll_until(&self.poll, &self.cancel, &what, || async move {
            let current = self.client.get_job(&job.namespace, &job.name).await?;
            match &current.status {
                None => debug!(job = %current.name, "AnsibleJob is initializing"),
                Some(status) => {
                    if let Some(k8s_job) = &status.k8s_job {
                        debug!(job = %current.name, k8s_job = %k8s_job, "AnsibleJob running");
                    }
                }
            }
            Ok(evaluate(&current))
        })
        .await?;

        match &outcome {
            JobOutcome::Succeeded => {
                info!(job = %job.name, "AnsibleJob completed successfully");
                self.recorder
                    .record_condition(
                        condition_types::CURRENT_JOB,
                        ConditionStatus::True,
                        condition_reasons::FINISHED,
                        &job.name,
                    )
                    .await?;
            }
            JobOutcome::Failed(message) => {
                warn!(job = %job.name, message = %message, "AnsibleJob failed");
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockJobClient;
    use crate::retry::RetryConfig;
    use crate::testing::{curator_fixture, CuratorStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn job(status: serde_json::Value) -> ExternalJob {
        let mut object = serde_json::json!({
            "metadata": {"name": "prehookjob-abcde", "namespace": "my-cluster"}
        });
        if !status.is_null() {
            object["status"] = status;
        }
        ExternalJob::from_object(&object)
    }

    mod description {
        use super::*;

        #[test]
        fn context_overrides_hook_variables() {
            let mut hook = Hook::new("deploy-dns");
            hook.extra_vars = Some(ExtraVars::from([
                ("region".to_string(), VarValue::from("us-east-1")),
                ("cluster_deployment".to_string(), VarValue::from("stale")),
            ]));
            let context = ExtraVars::from([(
                "cluster_deployment".to_string(),
                context_value(&serde_json::json!({"baseDomain": "example.com"})),
            )]);

            let desc = JobDescription::new("my-cluster", HookPhase::Pre, &hook, "toweraccess", context);
            let object = desc.to_object();

            assert_eq!(object["apiVersion"], "tower.ansible.com/v1alpha1");
            assert_eq!(object["kind"], "AnsibleJob");
            assert_eq!(object["metadata"]["generateName"], "prehookjob-");
            assert_eq!(object["metadata"]["annotations"]["jobtype"], "prehook");
            assert_eq!(object["metadata"]["annotations"]["hookname"], "deploy-dns");
            assert_eq!(object["spec"]["job_template_name"], "deploy-dns");
            assert_eq!(object["spec"]["tower_auth_secret"], "toweraccess");
            assert_eq!(object["spec"]["extra_vars"]["region"], "us-east-1");
            assert_eq!(
                object["spec"]["extra_vars"]["cluster_deployment"]["baseDomain"],
                "example.com"
            );
        }

        #[test]
        fn posthook_jobs_use_their_own_prefix() {
            let desc = JobDescription::new(
                "ns",
                HookPhase::Post,
                &Hook::new("notify"),
                "toweraccess",
                ExtraVars::new(),
            );
            assert_eq!(desc.generate_name(), "posthookjob-");
            assert!(desc.to_object()["spec"]["extra_vars"].as_object().unwrap().is_empty());
        }
    }

    mod evaluation {
        use super::*;

        #[test]
        fn missing_status_is_pending() {
            assert_eq!(evaluate(&job(serde_json::Value::Null)), PollStatus::Pending);
        }

        #[test]
        fn successful_result_is_success() {
            let j = job(serde_json::json!({"ansibleJobResult": {"status": "successful"}}));
            assert_eq!(evaluate(&j), PollStatus::Ready(JobOutcome::Succeeded));
        }

        #[test]
        fn error_result_fails_without_any_condition() {
            let j = job(serde_json::json!({"ansibleJobResult": {"status": "error"}}));
            assert_eq!(
                evaluate(&j),
                PollStatus::Ready(JobOutcome::Failed(
                    "AnsibleJob my-cluster/prehookjob-abcde exited with an error".to_string()
                ))
            );
        }

        #[test]
        fn failed_condition_fails_without_any_result() {
            let j = job(serde_json::json!({
                "conditions": [
                    {"type": "Running", "reason": "Running", "message": "ok"},
                    {"type": "Failure", "reason": "Failed", "message": "template not found"}
                ]
            }));
            assert_eq!(
                evaluate(&j),
                PollStatus::Ready(JobOutcome::Failed("template not found".to_string()))
            );
        }

        #[test]
        fn running_job_is_pending() {
            let j = job(serde_json::json!({
                "ansibleJobResult": {"status": "running"},
                "conditions": [{"type": "Running", "reason": "Running"}]
            }));
            assert_eq!(evaluate(&j), PollStatus::Pending);
        }
    }

    mod monitoring {
        use super::*;

        fn monitor(client: MockJobClient, store: &CuratorStore) -> JobMonitor {
            let recorder = StatusRecorder::new(
                Arc::new(store.mock_client()),
                RetryConfig::default(),
                "my-cluster",
                "my-cluster",
            );
            JobMonitor::new(
                Arc::new(client),
                recorder,
                PollConfig::unbounded(Duration::from_secs(5)),
                CancellationToken::new(),
            )
        }

        /// Story: a freshly created job has no status for a while
        ///
        /// The first polls see nothing; the monitor keeps waiting without
        /// error until the platform reports success, then marks the current
        /// job finished.
        #[tokio::test(start_paused = true)]
        async fn story_initializing_job_is_waited_for() {
            let polls = Arc::new(AtomicU32::new(0));
            let p = polls.clone();
            let mut client = MockJobClient::new();
            client.expect_get_job().returning(move |_, _| {
                if p.fetch_add(1, Ordering::SeqCst) < 2 {
                    Ok(job(serde_json::Value::Null))
                } else {
                    Ok(job(serde_json::json!({"ansibleJobResult": {"status": "successful"}})))
                }
            });
            let store = CuratorStore::new(curator_fixture(serde_json::json!({})));

            let outcome = monitor(client, &store)
                .monitor(&job(serde_json::Value::Null))
                .await
                .unwrap();

            assert_eq!(outcome, JobOutcome::Succeeded);
            assert_eq!(polls.load(Ordering::SeqCst), 3);
            assert_eq!(
                store.condition_history(condition_types::CURRENT_JOB),
                vec![(ConditionStatus::True, "prehookjob-abcde".to_string())]
            );
        }

        #[tokio::test(start_paused = true)]
        async fn failed_job_does_not_mark_current_job_finished() {
            let mut client = MockJobClient::new();
            client.expect_get_job().returning(|_, _| {
                Ok(job(serde_json::json!({"ansibleJobResult": {"status": "error"}})))
            });
            let store = CuratorStore::new(curator_fixture(serde_json::json!({})));

            let outcome = monitor(client, &store)
                .monitor(&job(serde_json::Value::Null))
                .await
                .unwrap();

            assert!(matches!(outcome, JobOutcome::Failed(_)));
            assert!(store.condition_history(condition_types::CURRENT_JOB).is_empty());
        }

        #[tokio::test(start_paused = true)]
        async fn vanished_job_is_fatal() {
            let mut client = MockJobClient::new();
            client
                .expect_get_job()
                .times(1)
                .returning(|_, name| Err(Error::not_found("ansiblejobs.tower.ansible.com", name)));
            let store = CuratorStore::new(curator_fixture(serde_json::json!({})));

            let err = monitor(client, &store)
                .monitor(&job(serde_json::Value::Null))
                .await
                .unwrap_err();
            assert!(err.is_not_found());
        }
    }
}
