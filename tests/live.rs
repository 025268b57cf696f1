//! Integration tests against a live Kubernetes cluster
//!
//! These tests need a reachable cluster (current kubeconfig context) where
//! the caller may create CRDs and namespaces. They are ignored by default and
//! can be run with:
//!
//! ```bash
//! cargo test --test live -- --ignored
//! ```

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::{Client, CustomResourceExt};

use curator::client::{CuratorClient, KubeClientImpl, CURATOR_RESOURCE};
use curator::config::CuratorConfig;
use curator::crd::{
    condition_types, ClusterCurator, ClusterCuratorSpec, ConditionStatus, Curation,
};
use curator::dispatcher::{Command, Context, Dispatcher};
use curator::recorder::StatusRecorder;
use curator::retry::RetryConfig;
use curator::FIELD_MANAGER;

// =============================================================================
// Helpers
// =============================================================================

async fn client() -> Client {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    Client::try_default()
        .await
        .expect("a reachable cluster is required for live tests")
}

/// Apply the ClusterCurator CRD and wait until the API serves it
async fn ensure_crd(client: &Client) {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    crds.patch(
        CURATOR_RESOURCE,
        &PatchParams::apply(FIELD_MANAGER).force(),
        &Patch::Apply(&ClusterCurator::crd()),
    )
    .await
    .expect("CRD apply should succeed");

    for _ in 0..30 {
        let crd = crds.get(CURATOR_RESOURCE).await.expect("CRD should exist");
        let established = crd
            .status
            .and_then(|s| s.conditions)
            .unwrap_or_default()
            .iter()
            .any(|c| c.type_ == "Established" && c.status == "True");
        if established {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    panic!("ClusterCurator CRD never became established");
}

/// Create a fresh namespace and a curator named after it
async fn fresh_curator(client: &Client, name: &str, curation: Curation) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
    namespaces
        .create(
            &PostParams::default(),
            &Namespace {
                metadata: ObjectMeta {
                    name: Some(name.to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        )
        .await
        .expect("namespace create should succeed");

    let curators: Api<ClusterCurator> = Api::namespaced(client.clone(), name);
    let curator = ClusterCurator::new(
        name,
        ClusterCuratorSpec {
            desired_curation: Some(curation),
            ..Default::default()
        },
    );
    curators
        .create(&PostParams::default(), &curator)
        .await
        .expect("curator create should succeed");
}

async fn cleanup(client: &Client, name: &str) {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    let _ = namespaces.delete(name, &DeleteParams::default()).await;
}

// =============================================================================
// Tests
// =============================================================================

/// Story: the last step of a curation marks the curator complete and
/// records the Job that ran it
#[tokio::test]
#[ignore = "requires a live cluster"]
async fn story_done_marks_curator_complete() {
    let client = client().await;
    ensure_crd(&client).await;
    let name = "curator-live-done";
    fresh_curator(&client, name, Curation::Install).await;

    let ctx = Context::builder(client.clone())
        .config(CuratorConfig {
            curator_job_name: Some("curator-job-live".to_string()),
            ..Default::default()
        })
        .build();
    Dispatcher::new(Arc::new(ctx))
        .run(Command::Done, name, name)
        .await
        .expect("done should succeed");

    let stored = KubeClientImpl::new(client.clone())
        .get_curator(name, name)
        .await
        .expect("curator should exist");
    assert_eq!(stored.spec.curator_job.as_deref(), Some("curator-job-live"));
    let condition = stored
        .condition(condition_types::CURATOR_JOB)
        .expect("curator-job condition should be recorded");
    assert_eq!(condition.status, ConditionStatus::True);

    cleanup(&client, name).await;
}

/// Story: a posthook marker written by one run is visible to the next and
/// can be cleared again
#[tokio::test]
#[ignore = "requires a live cluster"]
async fn story_resumption_marker_survives_between_runs() {
    let client = client().await;
    ensure_crd(&client).await;
    let name = "curator-live-marker";
    fresh_curator(&client, name, Curation::Install).await;

    let recorder = StatusRecorder::new(
        Arc::new(KubeClientImpl::new(client.clone())),
        RetryConfig::default(),
        name,
        name,
    );
    recorder
        .record_resumption_marker("post-2")
        .await
        .expect("marker write should succeed");
    let loaded = recorder.load().await.expect("curator should load");
    assert_eq!(loaded.spec.retry_posthook(), Some("post-2"));

    recorder
        .clear_resumption_marker()
        .await
        .expect("marker clear should succeed");
    let loaded = recorder.load().await.expect("curator should load");
    assert_eq!(loaded.spec.retry_posthook(), None);

    cleanup(&client, name).await;
}

/// Missing curators are reported by name, not retried
#[tokio::test]
#[ignore = "requires a live cluster"]
async fn missing_curator_is_not_found() {
    let client = client().await;
    ensure_crd(&client).await;

    let ctx = Context::builder(client).build();
    let err = Dispatcher::new(Arc::new(ctx))
        .run(Command::Install, "default", "curator-live-absent")
        .await
        .expect_err("install without a curator must fail");
    assert!(err.is_not_found());
}
