//! Operation dispatch and the curation state machine
//!
//! One process runs one [`Command`] against one curator. Full curations
//! (`install`, `upgrade-cluster`, `destroy-cluster`) run prehooks, the
//! backend step, its monitor and posthooks in sequence; the other commands
//! run a single step. Every step is a stage: it records its condition as in
//! progress, then as finished or failed.
//!
//! A curator carrying `operation.retryPosthook` is a resume: prehooks and
//! provisioning already succeeded in an earlier run, so only the posthooks
//! from the recorded one onwards are run again.

use std::future::Future;
use std::sync::Arc;

use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::{CuratorClient, JobClient, KubeClientImpl, ResourceClient, SecretClient};
use crate::config::CuratorConfig;
use crate::credentials::apply_cloud_provider;
use crate::crd::{
    condition_reasons, condition_types, ClusterCurator, ConditionStatus, Curation, HookPhase,
};
use crate::hooks::HookRunner;
use crate::job::JobMonitor;
use crate::monitor::{
    create_backend, detect_flavor, BackendContext, ClusterBackend, ImportMonitor, UpgradeTarget,
};
use crate::recorder::StatusRecorder;
use crate::{Error, Result};

/// Operation keyword given on the command line
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Full install: prehooks, activation, provisioning, import, posthooks
    Install,
    /// Full upgrade: prehooks, upgrade request, upgrade monitor, posthooks
    UpgradeCluster,
    /// Full destroy: prehooks, teardown, teardown monitor, posthooks
    DestroyCluster,
    /// Wait for provisioning
    Monitor,
    /// Wait for the managed cluster import
    MonitorImport,
    /// Wait for teardown
    MonitorDestroy,
    /// Activate provisioning and wait for it
    ActivateAndMonitor,
    /// Wait for an upgrade
    MonitorUpgrade,
    /// Record the curation as complete
    Done,
    /// Run the hooks of the phase given by `JOB_TYPE`
    AnsibleJob,
    /// Copy provider credentials into the cluster namespace
    ApplyCloudProvider,
}

impl Command {
    /// Every command, in help order
    pub const ALL: &'static [Command] = &[
        Command::Install,
        Command::UpgradeCluster,
        Command::DestroyCluster,
        Command::Monitor,
        Command::MonitorImport,
        Command::MonitorDestroy,
        Command::ActivateAndMonitor,
        Command::MonitorUpgrade,
        Command::Done,
        Command::AnsibleJob,
        Command::ApplyCloudProvider,
    ];

    /// Keyword as typed on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::UpgradeCluster => "upgrade-cluster",
            Self::DestroyCluster => "destroy-cluster",
            Self::Monitor => "monitor",
            Self::MonitorImport => "monitor-import",
            Self::MonitorDestroy => "monitor-destroy",
            Self::ActivateAndMonitor => "activate-and-monitor",
            Self::MonitorUpgrade => "monitor-upgrade",
            Self::Done => "done",
            Self::AnsibleJob => "ansiblejob",
            Self::ApplyCloudProvider => "applycloudprovider-ansible",
        }
    }

    /// Curation a full command must be requested for
    fn required_curation(&self) -> Option<Curation> {
        match self {
            Self::Install => Some(Curation::Install),
            Self::UpgradeCluster => Some(Curation::Upgrade),
            Self::DestroyCluster => Some(Curation::Destroy),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Command {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .find(|c| c.as_str() == s)
            .copied()
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(Command::as_str).collect();
                Error::usage(format!(
                    "Invalid Parameter: {:?}\nCommand: curator [{}] <cluster-name>",
                    s,
                    valid.join("|")
                ))
            })
    }
}

/// Shared handles for a curation run
pub struct Context {
    /// Curator access
    pub curators: Arc<dyn CuratorClient>,
    /// Automation job access
    pub jobs: Arc<dyn JobClient>,
    /// External resource access
    pub resources: Arc<dyn ResourceClient>,
    /// Secret access
    pub secrets: Arc<dyn SecretClient>,
    /// Cluster backend; detected from the cluster's resources when `None`
    pub backend: Option<Arc<dyn ClusterBackend>>,
    /// Runtime configuration
    pub config: CuratorConfig,
    /// Fired on shutdown; ends every wait
    pub cancel: CancellationToken,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        curators: Arc<dyn CuratorClient>,
        jobs: Arc<dyn JobClient>,
        resources: Arc<dyn ResourceClient>,
        secrets: Arc<dyn SecretClient>,
        backend: Arc<dyn ClusterBackend>,
        config: CuratorConfig,
    ) -> Self {
        Self {
            curators,
            jobs,
            resources,
            secrets,
            backend: Some(backend),
            config,
            cancel: CancellationToken::new(),
        }
    }
}

/// Builder for [`Context`] backed by a real Kubernetes client
pub struct ContextBuilder {
    client: Client,
    config: CuratorConfig,
    cancel: CancellationToken,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            config: CuratorConfig::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Set the runtime configuration
    pub fn config(mut self, config: CuratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the shutdown token
    pub fn cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Build the context
    pub fn build(self) -> Context {
        let kube = Arc::new(KubeClientImpl::new(self.client));
        Context {
            curators: kube.clone(),
            jobs: kube.clone(),
            resources: kube.clone(),
            secrets: kube,
            backend: None,
            config: self.config,
            cancel: self.cancel,
        }
    }
}

/// Runs commands against curators
pub struct Dispatcher {
    ctx: Arc<Context>,
}

/// Per-run handles, bound to one curator
struct Run {
    recorder: StatusRecorder,
    curator: ClusterCurator,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(ctx: Arc<Context>) -> Self {
        Self { ctx }
    }

    /// Run `command` for the curator `namespace/name`
    pub async fn run(&self, command: Command, namespace: &str, name: &str) -> Result<()> {
        info!(command = %command, curator = %name, namespace = %namespace, "starting curation");

        let recorder = StatusRecorder::new(
            self.ctx.curators.clone(),
            self.ctx.config.retry.clone(),
            namespace,
            name,
        );
        let curator = recorder.load().await?;
        if let Some(job) = &self.ctx.config.curator_job_name {
            recorder.record_curator_job(job).await?;
        }
        let run = Run { recorder, curator };

        if let Some(required) = command.required_curation() {
            self.require_curation(&run, command, required).await?;
        }
        match command {
            Command::Install => self.install(&run).await?,
            Command::UpgradeCluster => self.upgrade(&run).await?,
            Command::DestroyCluster => self.destroy(&run).await?,
            Command::Monitor => {
                let backend = self.backend(&run, condition_types::ACTIVATE_AND_MONITOR).await?;
                self.stage(
                    &run,
                    condition_types::ACTIVATE_AND_MONITOR,
                    "Monitoring cluster provisioning",
                    "Cluster provisioned",
                    backend.monitor_provision(),
                )
                .await?
            }
            Command::ActivateAndMonitor => {
                let backend = self.backend(&run, condition_types::ACTIVATE_AND_MONITOR).await?;
                self.activate_and_monitor(&run, backend.as_ref()).await?
            }
            Command::MonitorImport => self.monitor_import(&run).await?,
            Command::MonitorDestroy => {
                let backend = self.backend(&run, condition_types::MONITOR_DESTROY).await?;
                self.stage(
                    &run,
                    condition_types::MONITOR_DESTROY,
                    "Monitoring cluster teardown",
                    "Cluster destroyed",
                    backend.monitor_destroy(),
                )
                .await?
            }
            Command::MonitorUpgrade => {
                let backend = self.backend(&run, condition_types::MONITOR_UPGRADE).await?;
                self.stage(
                    &run,
                    condition_types::MONITOR_UPGRADE,
                    "Monitoring cluster upgrade",
                    "Cluster upgraded",
                    async {
                        let target = UpgradeTarget::from_spec(&run.curator.spec)?;
                        backend.monitor_upgrade(&target).await
                    },
                )
                .await?
            }
            Command::AnsibleJob => self.ansible_job(&run).await?,
            Command::ApplyCloudProvider => {
                self.stage(
                    &run,
                    condition_types::CLOUD_PROVIDER,
                    "Applying provider credentials",
                    "Provider credentials applied",
                    apply_cloud_provider(
                        self.ctx.secrets.as_ref(),
                        self.ctx.config.provider_credential_path.as_deref(),
                        namespace,
                    ),
                )
                .await?
            }
            Command::Done => {}
        }

        if matches!(
            command,
            Command::Install | Command::UpgradeCluster | Command::DestroyCluster | Command::Done
        ) {
            self.done(&run).await?;
        }
        info!(command = %command, curator = %name, "curation step finished");
        Ok(())
    }

    async fn require_curation(&self, run: &Run, command: Command, required: Curation) -> Result<()> {
        if run.curator.spec.desired_curation == Some(required) {
            return Ok(());
        }
        let err = Error::validation(format!(
            "{} requires spec.desiredCuration to be {}, found {}",
            command,
            required,
            run.curator
                .spec
                .desired_curation
                .map(|c| c.to_string())
                .unwrap_or_else(|| "nothing".to_string())
        ));
        run.recorder
            .record_failure(condition_types::CURATOR_JOB, &err)
            .await;
        Err(err)
    }

    async fn install(&self, run: &Run) -> Result<()> {
        let backend = self.backend(run, condition_types::CURATOR_JOB).await?;
        if let Some(hook) = run.curator.spec.retry_posthook() {
            return self.posthooks(run, backend.as_ref(), Some(hook)).await;
        }

        self.prehooks(run, backend.as_ref()).await?;
        self.activate_and_monitor(run, backend.as_ref()).await?;
        self.monitor_import(run).await?;
        self.posthooks(run, backend.as_ref(), None).await
    }

    async fn upgrade(&self, run: &Run) -> Result<()> {
        let target = match UpgradeTarget::from_spec(&run.curator.spec) {
            Ok(target) => target,
            Err(err) => {
                run.recorder
                    .record_failure(condition_types::UPGRADE, &err)
                    .await;
                return Err(err);
            }
        };
        let backend = self.backend(run, condition_types::CURATOR_JOB).await?;
        if let Some(hook) = run.curator.spec.retry_posthook() {
            return self.posthooks(run, backend.as_ref(), Some(hook)).await;
        }

        self.prehooks(run, backend.as_ref()).await?;
        self.stage(
            run,
            condition_types::UPGRADE,
            &format!("Requesting upgrade to {}", target.version),
            &format!("Upgrade to {} requested", target.version),
            backend.upgrade(&target),
        )
        .await?;
        self.stage(
            run,
            condition_types::MONITOR_UPGRADE,
            "Monitoring cluster upgrade",
            &format!("Cluster upgraded to {}", target.version),
            backend.monitor_upgrade(&target),
        )
        .await?;
        self.posthooks(run, backend.as_ref(), None).await
    }

    async fn destroy(&self, run: &Run) -> Result<()> {
        let backend = self.backend(run, condition_types::CURATOR_JOB).await?;
        if let Some(hook) = run.curator.spec.retry_posthook() {
            return self.posthooks(run, backend.as_ref(), Some(hook)).await;
        }

        self.prehooks(run, backend.as_ref()).await?;
        self.stage(
            run,
            condition_types::DESTROY,
            "Requesting cluster teardown",
            "Cluster teardown requested",
            backend.destroy(),
        )
        .await?;
        self.stage(
            run,
            condition_types::MONITOR_DESTROY,
            "Monitoring cluster teardown",
            "Cluster destroyed",
            backend.monitor_destroy(),
        )
        .await?;
        self.posthooks(run, backend.as_ref(), None).await
    }

    async fn ansible_job(&self, run: &Run) -> Result<()> {
        let phase = match self.ctx.config.require_job_type() {
            Ok(phase) => phase,
            Err(err) => {
                run.recorder
                    .record_failure(condition_types::CURATOR_JOB, &err)
                    .await;
                return Err(err);
            }
        };
        let backend = self.backend(run, condition_types::CURATOR_JOB).await?;
        match phase {
            HookPhase::Pre => self.prehooks(run, backend.as_ref()).await,
            HookPhase::Post => {
                let start = run.curator.spec.retry_posthook();
                self.posthooks(run, backend.as_ref(), start).await
            }
        }
    }

    async fn activate_and_monitor(&self, run: &Run, backend: &dyn ClusterBackend) -> Result<()> {
        self.stage(
            run,
            condition_types::ACTIVATE_AND_MONITOR,
            "Activating cluster provisioning",
            "Cluster provisioned",
            async {
                backend.activate().await?;
                backend.monitor_provision().await
            },
        )
        .await
    }

    async fn monitor_import(&self, run: &Run) -> Result<()> {
        let monitor = ImportMonitor::new(
            self.ctx.resources.clone(),
            self.ctx.config.import_poll.clone(),
            self.ctx.cancel.clone(),
        );
        self.stage(
            run,
            condition_types::MONITOR_IMPORT,
            "Monitoring ManagedCluster import",
            "ManagedCluster imported",
            monitor.monitor_import(run.recorder.name()),
        )
        .await
    }

    async fn prehooks(&self, run: &Run, backend: &dyn ClusterBackend) -> Result<()> {
        let runner = self.hook_runner(run);
        self.stage(
            run,
            condition_types::PREHOOK,
            "Executing prehooks",
            "Prehooks completed",
            runner.run_hooks(&run.curator, HookPhase::Pre, backend),
        )
        .await
    }

    /// Run posthooks from `start`; a failing hook is recorded for the next
    /// run to resume from, success clears any earlier record
    async fn posthooks(
        &self,
        run: &Run,
        backend: &dyn ClusterBackend,
        start: Option<&str>,
    ) -> Result<()> {
        let runner = self.hook_runner(run);
        let result = self
            .stage(
                run,
                condition_types::POSTHOOK,
                "Executing posthooks",
                "Posthooks completed",
                runner.run_hooks_from(&run.curator, HookPhase::Post, backend, start),
            )
            .await;

        match result {
            Ok(()) => run.recorder.clear_resumption_marker().await,
            Err(err) => {
                if let Some((HookPhase::Post, hook)) = err.failed_hook() {
                    if let Err(record_err) = run.recorder.record_resumption_marker(hook).await {
                        warn!(hook = %hook, error = %record_err, "failed to record posthook to retry");
                    }
                }
                Err(err)
            }
        }
    }

    async fn done(&self, run: &Run) -> Result<()> {
        let curation = run
            .curator
            .spec
            .desired_curation
            .map(|c| c.to_string())
            .unwrap_or_default();
        run.recorder
            .record_condition(
                condition_types::CURATOR_JOB,
                ConditionStatus::True,
                condition_reasons::FINISHED,
                &format!("curation {} completed", curation),
            )
            .await?;
        info!(curator = %run.recorder.name(), curation = %curation, "curation completed");
        Ok(())
    }

    /// Record `type_` in progress, run `step`, record the outcome
    async fn stage<F>(
        &self,
        run: &Run,
        type_: &str,
        start_message: &str,
        done_message: &str,
        step: F,
    ) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        run.recorder
            .record_condition(
                type_,
                ConditionStatus::False,
                condition_reasons::IN_PROGRESS,
                start_message,
            )
            .await?;

        match step.await {
            Ok(()) => {
                run.recorder
                    .record_condition(
                        type_,
                        ConditionStatus::True,
                        condition_reasons::FINISHED,
                        done_message,
                    )
                    .await
            }
            Err(err) => {
                run.recorder.record_failure(type_, &err).await;
                Err(err)
            }
        }
    }

    fn hook_runner(&self, run: &Run) -> HookRunner {
        let monitor = JobMonitor::new(
            self.ctx.jobs.clone(),
            run.recorder.clone(),
            self.ctx.config.job_poll.clone(),
            self.ctx.cancel.clone(),
        );
        HookRunner::new(self.ctx.jobs.clone(), run.recorder.clone(), monitor)
    }

    /// Backend for the cluster's flavor; a failed detection is recorded on
    /// `stage`
    async fn backend(&self, run: &Run, stage: &str) -> Result<Arc<dyn ClusterBackend>> {
        if let Some(backend) = &self.ctx.backend {
            return Ok(backend.clone());
        }
        let flavor = match detect_flavor(
            self.ctx.resources.as_ref(),
            run.recorder.namespace(),
            run.recorder.name(),
        )
        .await
        {
            Ok(flavor) => flavor,
            Err(err) => {
                run.recorder.record_failure(stage, &err).await;
                return Err(err);
            }
        };
        let ctx = BackendContext {
            resources: self.ctx.resources.clone(),
            recorder: run.recorder.clone(),
            poll: self.ctx.config.cluster_poll.clone(),
            cancel: self.ctx.cancel.clone(),
        };
        Ok(Arc::from(create_backend(flavor, ctx)))
    }
}
