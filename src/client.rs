//! Kubernetes access for the curator
//!
//! Each external interface the curator depends on is a trait so the engine
//! can run against mocks in tests and against [`KubeClientImpl`] in
//! production. API errors are translated at this boundary: 404 becomes
//! [`Error::NotFound`], 409 becomes [`Error::Conflict`].

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DeleteParams, DynamicObject, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::crd::{ClusterCurator, ExternalJob, ExternalResource, ResourceKind};
use crate::job::JobDescription;
use crate::{Error, FIELD_MANAGER};

/// Qualified resource name of the curator CRD, as used in API error messages
pub const CURATOR_RESOURCE: &str = "clustercurators.cluster.open-cluster-management.io";

/// Read and conflict-aware write access to ClusterCurator resources
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CuratorClient: Send + Sync {
    /// Fetch a curator; [`Error::NotFound`] if it does not exist
    async fn get_curator(&self, namespace: &str, name: &str) -> Result<ClusterCurator, Error>;

    /// Replace the whole object, guarded by its resourceVersion
    async fn replace_curator(&self, curator: &ClusterCurator) -> Result<ClusterCurator, Error>;

    /// Replace the status subresource, guarded by its resourceVersion
    async fn replace_curator_status(
        &self,
        curator: &ClusterCurator,
    ) -> Result<ClusterCurator, Error>;
}

/// Automation job lifecycle
#[cfg_attr(test, automock)]
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Create a job; the returned job carries the generated name
    async fn create_job(&self, job: &JobDescription) -> Result<ExternalJob, Error>;

    /// Fetch a job; [`Error::NotFound`] if it does not exist
    async fn get_job(&self, namespace: &str, name: &str) -> Result<ExternalJob, Error>;
}

/// Generic access to externally-owned cluster resources
///
/// `namespace` is ignored for cluster-scoped kinds.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// Fetch one object; [`Error::NotFound`] if it does not exist
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ExternalResource, Error>;

    /// List all objects of a kind in a namespace
    async fn list(&self, kind: ResourceKind, namespace: &str)
        -> Result<Vec<ExternalResource>, Error>;

    /// Create an object from its full JSON representation
    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Apply a JSON merge patch
    async fn merge_patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error>;

    /// Delete an object (background propagation)
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error>;
}

/// Secret access for provider credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SecretClient: Send + Sync {
    /// Read a secret's data as UTF-8 strings
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, Error>;

    /// Create or update a secret with the given string data
    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), Error>;
}

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path, inferring the
/// in-cluster or default config otherwise
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::usage(format!("failed to read kubeconfig {}: {}", path.display(), e))
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::usage(format!("failed to load kubeconfig: {}", e)))?
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::usage(format!("failed to infer kube config: {}", e)))?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(Error::Kube)
}

/// Real Kubernetes client implementation of every client trait
#[derive(Clone)]
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, kind: ResourceKind, namespace: &str) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.is_namespaced() {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

#[async_trait]
impl CuratorClient for KubeClientImpl {
    async fn get_curator(&self, namespace: &str, name: &str) -> Result<ClusterCurator, Error> {
        let api: Api<ClusterCurator> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| Error::from_kube(e, CURATOR_RESOURCE, name))
    }

    async fn replace_curator(&self, curator: &ClusterCurator) -> Result<ClusterCurator, Error> {
        let (namespace, name) = curator_key(curator)?;
        let api: Api<ClusterCurator> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), curator)
            .await
            .map_err(|e| Error::from_kube(e, CURATOR_RESOURCE, name))
    }

    async fn replace_curator_status(
        &self,
        curator: &ClusterCurator,
    ) -> Result<ClusterCurator, Error> {
        let (namespace, name) = curator_key(curator)?;
        let api: Api<ClusterCurator> = Api::namespaced(self.client.clone(), namespace);
        let body = serde_json::to_vec(curator)?;
        api.replace_status(name, &PostParams::default(), body)
            .await
            .map_err(|e| Error::from_kube(e, CURATOR_RESOURCE, name))
    }
}

fn curator_key(curator: &ClusterCurator) -> Result<(&str, &str), Error> {
    let namespace = curator
        .metadata
        .namespace
        .as_deref()
        .ok_or_else(|| Error::validation("ClusterCurator has no namespace"))?;
    let name = curator
        .metadata
        .name
        .as_deref()
        .ok_or_else(|| Error::validation("ClusterCurator has no name"))?;
    Ok((namespace, name))
}

#[async_trait]
impl JobClient for KubeClientImpl {
    async fn create_job(&self, job: &JobDescription) -> Result<ExternalJob, Error> {
        let kind = ResourceKind::AnsibleJob;
        let obj: DynamicObject = serde_json::from_value(job.to_object())?;
        let created = self
            .dynamic_api(kind, &job.namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), &job.generate_name()))?;

        let created = ExternalJob::from_object(&serde_json::to_value(&created)?);
        info!(job = %created.name, namespace = %created.namespace, "created AnsibleJob");
        Ok(created)
    }

    async fn get_job(&self, namespace: &str, name: &str) -> Result<ExternalJob, Error> {
        let kind = ResourceKind::AnsibleJob;
        let obj = self
            .dynamic_api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), name))?;
        Ok(ExternalJob::from_object(&serde_json::to_value(&obj)?))
    }
}

#[async_trait]
impl ResourceClient for KubeClientImpl {
    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<ExternalResource, Error> {
        let obj = self
            .dynamic_api(kind, namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), name))?;
        Ok(ExternalResource::from_object(&serde_json::to_value(&obj)?))
    }

    async fn list(
        &self,
        kind: ResourceKind,
        namespace: &str,
    ) -> Result<Vec<ExternalResource>, Error> {
        let list = self
            .dynamic_api(kind, namespace)
            .list(&Default::default())
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), namespace))?;

        list.items
            .iter()
            .map(|obj| Ok(ExternalResource::from_object(&serde_json::to_value(obj)?)))
            .collect()
    }

    async fn create(
        &self,
        kind: ResourceKind,
        namespace: &str,
        object: &serde_json::Value,
    ) -> Result<(), Error> {
        let obj: DynamicObject = serde_json::from_value(object.clone())?;
        let name = obj
            .metadata
            .name
            .clone()
            .or_else(|| obj.metadata.generate_name.clone())
            .unwrap_or_default();
        self.dynamic_api(kind, namespace)
            .create(&PostParams::default(), &obj)
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), &name))?;
        debug!(kind = %kind.kind(), name = %name, namespace = %namespace, "created resource");
        Ok(())
    }

    async fn merge_patch(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<(), Error> {
        self.dynamic_api(kind, namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), name))?;
        debug!(kind = %kind.kind(), name = %name, namespace = %namespace, "patched resource");
        Ok(())
    }

    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<(), Error> {
        self.dynamic_api(kind, namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| Error::from_kube(e, &kind.qualified_name(), name))?;
        info!(kind = %kind.kind(), name = %name, namespace = %namespace, "deleted resource");
        Ok(())
    }
}

#[async_trait]
impl SecretClient for KubeClientImpl {
    async fn get_secret_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<BTreeMap<String, String>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get(name)
            .await
            .map_err(|e| Error::from_kube(e, "secrets", name))?;

        let mut data: BTreeMap<String, String> = secret.string_data.unwrap_or_default();
        for (key, value) in secret.data.unwrap_or_default() {
            let value = String::from_utf8(value.0).map_err(|e| {
                Error::serialization(format!("secret {}/{} key {}: {}", namespace, name, key, e))
            })?;
            data.insert(key, value);
        }
        Ok(data)
    }

    async fn apply_secret(
        &self,
        namespace: &str,
        name: &str,
        data: &BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = serde_json::json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "metadata": {
                "name": name,
                "namespace": namespace,
            },
            "type": "Opaque",
            "stringData": data,
        });
        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&secret),
        )
        .await
        .map_err(|e| Error::from_kube(e, "secrets", name))?;
        info!(secret = %name, namespace = %namespace, "applied secret");
        Ok(())
    }
}
