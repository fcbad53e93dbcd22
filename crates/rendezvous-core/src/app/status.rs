//! Status - node の状態を Store に公開する
//!
//! A worker overwrites `nodes/<name>/status.json` periodically so a
//! coordinator can see it without a socket connection.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{Error, Result};
use crate::domain::paths::NodePaths;
use crate::domain::state::ListenerState;
use crate::observability::Role;
use crate::ports::Store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node: String,
    pub role: Role,

    /// `None` when the node runs without a listener or has not started one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listener: Option<ListenerState>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation: Option<u64>,

    #[serde(default)]
    pub tasks_executed: u64,

    #[serde(default)]
    pub tasks_failed: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_drain: Option<DateTime<Utc>>,

    pub updated_at: DateTime<Utc>,
}

impl NodeStatus {
    /// Status written when a node is first registered.
    pub fn registered(node: impl Into<String>, role: Role) -> Self {
        Self {
            node: node.into(),
            role,
            listener: None,
            generation: None,
            tasks_executed: 0,
            tasks_failed: 0,
            last_drain: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_listener(mut self, state: ListenerState) -> Self {
        self.generation = state.generation();
        self.listener = Some(state);
        self
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let json = serde_json::to_vec_pretty(self).map_err(std::io::Error::from)?;
        Ok(Bytes::from(json))
    }

    pub fn from_bytes(path: &str, data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::Config(format!("status blob {path} is not valid: {e}")))
    }

    /// Overwrites the node's status blob.
    pub async fn publish(&self, store: &dyn Store, paths: &NodePaths) -> Result<()> {
        store.write_overwrite(&paths.status(), self.to_bytes()?).await
    }

    /// Reads the node's status blob, if one has been written.
    pub async fn fetch(store: &dyn Store, paths: &NodePaths) -> Result<Option<Self>> {
        let path = paths.status();
        match store.read_if_exists(&path).await? {
            Some(data) => Self::from_bytes(&path, &data).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::state::GenerationState;
    use crate::impls::MemoryStore;

    #[test]
    fn listener_state_sets_generation() {
        let status = NodeStatus::registered("w", Role::Worker).with_listener(ListenerState::Active {
            generation: 3,
            state: GenerationState::Running,
        });
        assert_eq!(status.generation, Some(3));

        let v = serde_json::to_value(&status).unwrap();
        assert_eq!(v["role"], "worker");
        assert_eq!(v["listener"]["active"]["state"], "running");
    }

    #[test]
    fn fresh_status_skips_empty_fields() {
        let v = serde_json::to_value(NodeStatus::registered("w", Role::Worker)).unwrap();
        assert!(v.get("listener").is_none());
        assert!(v.get("last_drain").is_none());
        assert_eq!(v["tasks_executed"], 0);
    }

    #[tokio::test]
    async fn publish_then_fetch() {
        let store = MemoryStore::new();
        let paths = NodePaths::new("w").unwrap();
        assert!(NodeStatus::fetch(&store, &paths).await.unwrap().is_none());

        let mut status = NodeStatus::registered("w", Role::Worker);
        status.tasks_executed = 7;
        status.publish(&store, &paths).await.unwrap();

        let fetched = NodeStatus::fetch(&store, &paths).await.unwrap().unwrap();
        assert_eq!(fetched, status);
    }

    #[tokio::test]
    async fn garbage_status_is_an_error() {
        let store = MemoryStore::new();
        let paths = NodePaths::new("w").unwrap();
        store
            .write_overwrite(&paths.status(), Bytes::from_static(b"not json"))
            .await
            .unwrap();
        assert!(NodeStatus::fetch(&store, &paths).await.is_err());
    }
}
