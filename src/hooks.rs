//! Prehook and posthook execution
//!
//! Hooks of a phase run strictly one after another: later hooks may depend
//! on what earlier ones did. Before a hook's job is created the curator is
//! checked for a job left behind by an interrupted run; if one exists for
//! the same hook and phase it is monitored instead of creating a duplicate.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::JobClient;
use crate::crd::{
    condition_reasons, condition_types, ClusterCurator, ConditionStatus, ExternalJob, Hook,
    HookPhase,
};
use crate::job::{evaluate, JobDescription, JobMonitor, JobOutcome};
use crate::monitor::ClusterBackend;
use crate::poll::PollStatus;
use crate::recorder::StatusRecorder;
use crate::{Error, Result};

/// Runs the hooks of one phase
pub struct HookRunner {
    jobs: Arc<dyn JobClient>,
    recorder: StatusRecorder,
    monitor: JobMonitor,
}

impl HookRunner {
    /// Create a hook runner
    pub fn new(jobs: Arc<dyn JobClient>, recorder: StatusRecorder, monitor: JobMonitor) -> Self {
        Self {
            jobs,
            recorder,
            monitor,
        }
    }

    /// Run every hook of `phase` configured for the desired curation
    pub async fn run_hooks(
        &self,
        curator: &ClusterCurator,
        phase: HookPhase,
        backend: &dyn ClusterBackend,
    ) -> Result<()> {
        self.run_hooks_from(curator, phase, backend, None).await
    }

    /// Run the hooks of `phase`, starting at the hook named `start` when given.
    ///
    /// Hooks before `start` are skipped and never get a job. A failing hook
    /// stops the phase and is returned as [`Error::Hook`] naming it.
    pub async fn run_hooks_from(
        &self,
        curator: &ClusterCurator,
        phase: HookPhase,
        backend: &dyn ClusterBackend,
        start: Option<&str>,
    ) -> Result<()> {
        let hooks = curator.spec.hook_list(phase);
        if hooks.is_empty() {
            info!(curator = %self.recorder.name(), phase = %phase, "no hooks to run");
            return Ok(());
        }

        let first = match start {
            Some(name) => hooks.iter().position(|h| h.name == name).ok_or_else(|| {
                Error::validation(format!("{} {} is not in the configured hook list", phase, name))
            })?,
            None => 0,
        };
        let secret = curator.spec.tower_auth_secret().ok_or_else(|| {
            Error::validation(format!(
                "towerAuthSecret is required to run {} hooks for {}",
                phase,
                curator
                    .spec
                    .desired_curation
                    .map(|c| c.to_string())
                    .unwrap_or_default()
            ))
        })?;

        if first > 0 {
            info!(phase = %phase, hook = %hooks[first].name, skipped = first, "resuming hooks");
        }
        for hook in &hooks[first..] {
            self.run_hook(phase, hook, secret, backend)
                .await
                .map_err(|e| Error::hook(phase, &hook.name, e))?;
        }
        Ok(())
    }

    async fn run_hook(
        &self,
        phase: HookPhase,
        hook: &Hook,
        secret: &str,
        backend: &dyn ClusterBackend,
    ) -> Result<()> {
        let job = match self.find_in_flight(phase, hook).await? {
            Some(job) => {
                info!(job = %job.name, hook = %hook.name, phase = %phase, "resuming in-flight AnsibleJob");
                job
            }
            None => {
                let context = backend.hook_context().await?;
                let description =
                    JobDescription::new(self.recorder.namespace(), phase, hook, secret, context);
                let job = self.jobs.create_job(&description).await?;
                info!(job = %job.name, hook = %hook.name, phase = %phase, "started AnsibleJob");
                job
            }
        };

        self.recorder
            .record_condition(
                condition_types::CURRENT_JOB,
                ConditionStatus::False,
                condition_reasons::IN_PROGRESS,
                &job.name,
            )
            .await?;

        match self.monitor.monitor(&job).await? {
            JobOutcome::Succeeded => Ok(()),
            JobOutcome::Failed(message) => Err(Error::platform(message)),
        }
    }

    /// A job recorded as current, still present, created for this hook and
    /// not already failed
    async fn find_in_flight(&self, phase: HookPhase, hook: &Hook) -> Result<Option<ExternalJob>> {
        let curator = self.recorder.load().await?;
        let Some(current) = curator
            .condition(condition_types::CURRENT_JOB)
            .filter(|c| c.status == ConditionStatus::False && !c.message.is_empty())
        else {
            return Ok(None);
        };

        let job = match self.jobs.get_job(self.recorder.namespace(), &current.message).await {
            Ok(job) => job,
            Err(e) if e.is_not_found() => {
                debug!(job = %current.message, "recorded AnsibleJob no longer exists");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if !job.belongs_to(phase.as_str(), &hook.name) {
            return Ok(None);
        }
        if let PollStatus::Ready(JobOutcome::Failed(_)) = evaluate(&job) {
            warn!(job = %job.name, hook = %hook.name, "recorded AnsibleJob failed, starting a new one");
            return Ok(None);
        }
        Ok(Some(job))
    }
}
