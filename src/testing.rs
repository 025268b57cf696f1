//! Shared test fixtures

use std::sync::{Arc, Mutex};

use crate::client::{MockCuratorClient, CURATOR_RESOURCE};
use crate::crd::{ClusterCurator, ClusterCuratorStatus, ConditionStatus};
use crate::Error;

/// Build a curator `my-cluster/my-cluster` with the given spec
pub fn curator_fixture(spec: serde_json::Value) -> ClusterCurator {
    serde_json::from_value(serde_json::json!({
        "apiVersion": "cluster.open-cluster-management.io/v1beta1",
        "kind": "ClusterCurator",
        "metadata": {"name": "my-cluster", "namespace": "my-cluster", "resourceVersion": "1"},
        "spec": spec,
    }))
    .expect("curator fixture must deserialize")
}

#[derive(Default)]
struct StoreState {
    curator: Option<ClusterCurator>,
    pending_conflicts: u32,
    status_writes: u32,
    spec_writes: u32,
    history: Vec<ClusterCuratorStatus>,
}

/// In-memory ClusterCurator backing a [`MockCuratorClient`].
///
/// Gets return the stored object; status and spec writes update it and are
/// counted, so tests assert on what was persisted rather than on call order.
#[derive(Clone, Default)]
pub struct CuratorStore {
    state: Arc<Mutex<StoreState>>,
}

impl CuratorStore {
    pub fn new(curator: ClusterCurator) -> Self {
        let store = Self::default();
        store.state.lock().unwrap().curator = Some(curator);
        store
    }

    /// A store with no curator: every get is NotFound
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ClusterCurator> {
        self.state.lock().unwrap().curator.clone()
    }

    /// Make the next `n` writes fail with a 409 conflict
    pub fn fail_next_writes_with_conflict(&self, n: u32) {
        self.state.lock().unwrap().pending_conflicts = n;
    }

    pub fn status_writes(&self) -> u32 {
        self.state.lock().unwrap().status_writes
    }

    pub fn spec_writes(&self) -> u32 {
        self.state.lock().unwrap().spec_writes
    }

    /// Every persisted (status, message) of one condition type, in write
    /// order, with consecutive duplicates collapsed
    pub fn condition_history(&self, type_: &str) -> Vec<(ConditionStatus, String)> {
        let state = self.state.lock().unwrap();
        let mut history: Vec<(ConditionStatus, String)> = Vec::new();
        for status in &state.history {
            if let Some(c) = status.condition(type_) {
                let entry = (c.status, c.message.clone());
                if history.last() != Some(&entry) {
                    history.push(entry);
                }
            }
        }
        history
    }

    pub fn mock_client(&self) -> MockCuratorClient {
        let mut client = MockCuratorClient::new();

        let state = self.state.clone();
        client
            .expect_get_curator()
            .returning(move |_namespace: &str, name: &str| {
                state
                    .lock()
                    .unwrap()
                    .curator
                    .clone()
                    .ok_or_else(|| Error::not_found(CURATOR_RESOURCE, name))
            });

        let state = self.state.clone();
        client
            .expect_replace_curator_status()
            .returning(move |curator: &ClusterCurator| {
                let mut state = state.lock().unwrap();
                take_conflict(&mut state)?;
                let stored = stored_curator(&mut state)?;
                stored.status = curator.status.clone();
                let stored = stored.clone();
                state.status_writes += 1;
                state.history.push(stored.status.clone().unwrap_or_default());
                Ok(stored)
            });

        let state = self.state.clone();
        client
            .expect_replace_curator()
            .returning(move |curator: &ClusterCurator| {
                let mut state = state.lock().unwrap();
                take_conflict(&mut state)?;
                let stored = stored_curator(&mut state)?;
                stored.spec = curator.spec.clone();
                let stored = stored.clone();
                state.spec_writes += 1;
                Ok(stored)
            });

        client
    }
}

fn take_conflict(state: &mut StoreState) -> Result<(), Error> {
    if state.pending_conflicts > 0 {
        state.pending_conflicts -= 1;
        return Err(Error::Conflict {
            resource: CURATOR_RESOURCE.to_string(),
            name: "my-cluster".to_string(),
            message: "the object has been modified".to_string(),
        });
    }
    Ok(())
}

fn stored_curator(state: &mut StoreState) -> Result<&mut ClusterCurator, Error> {
    state
        .curator
        .as_mut()
        .ok_or_else(|| Error::not_found(CURATOR_RESOURCE, "my-cluster"))
}
