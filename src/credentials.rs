//! Provider credential propagation
//!
//! Provider credentials live in a shared secret outside the cluster
//! namespace. The automation platform part of it (host and token) is copied
//! into the cluster namespace as `toweraccess` so hooks can reference it.

use std::collections::BTreeMap;

use tracing::info;

use crate::client::SecretClient;
use crate::config::split_credential_path;
use crate::{Error, Result, TOWER_ACCESS_SECRET};

/// Key of the automation platform URL in the provider credential
pub const ANSIBLE_HOST_KEY: &str = "ansibleHost";
/// Key of the automation platform token in the provider credential
pub const ANSIBLE_TOKEN_KEY: &str = "ansibleToken";

/// Copy automation platform access from the provider credential at
/// `credential_path` (`namespace/secretName`) into `toweraccess` in
/// `cluster_namespace`.
pub async fn apply_cloud_provider(
    secrets: &dyn SecretClient,
    credential_path: Option<&str>,
    cluster_namespace: &str,
) -> Result<()> {
    let path = credential_path
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::validation("Missing spec.providerCredentialPath"))?;
    let (namespace, name) = split_credential_path(path)?;

    let data = secrets.get_secret_data(namespace, name).await?;
    let value = |key: &str| {
        data.get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| {
                Error::validation(format!("secret {}/{} has no {}", namespace, name, key))
            })
    };

    let tower_access = BTreeMap::from([
        ("host".to_string(), value(ANSIBLE_HOST_KEY)?),
        ("token".to_string(), value(ANSIBLE_TOKEN_KEY)?),
    ]);
    secrets
        .apply_secret(cluster_namespace, TOWER_ACCESS_SECRET, &tower_access)
        .await?;

    info!(
        source = %path,
        namespace = %cluster_namespace,
        secret = TOWER_ACCESS_SECRET,
        "copied automation platform credentials"
    );
    Ok(())
}
