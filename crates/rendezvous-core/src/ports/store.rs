//! Store port - coordinator と worker が共有する唯一のチャネル
//!
//! A path-addressed blob store with eventual-consistency semantics. There is
//! no transaction spanning a read and a write; the only structural primitive
//! is whether a blob exists.
//!
//! # 設計原則
//! - `write_create_if_absent` is the conditional write RemoteLock is built on.
//!   Backends that cannot make it a true test-and-set must say so through
//!   [`Store::atomic_create`].
//! - `delete` is idempotent.
//! - Precondition failure is a normal result, never an error.

use async_trait::async_trait;
use bytes::Bytes;

use std::sync::Arc;

use crate::domain::errors::{Error, Result};

/// Store handle shared by every component of a node.
pub type SharedStore = Arc<dyn Store>;

/// Result of a create-if-absent write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

impl CreateOutcome {
    pub fn is_created(self) -> bool {
        self == CreateOutcome::Created
    }
}

#[async_trait]
pub trait Store: Send + Sync + 'static {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Reads the entire blob.
    ///
    /// Returns `Error::NotFound` if no blob exists at `path`.
    async fn read_all(&self, path: &str) -> Result<Bytes>;

    /// Writes only if no blob exists at `path`.
    async fn write_create_if_absent(&self, path: &str, data: Bytes) -> Result<CreateOutcome>;

    /// Writes unconditionally.
    async fn write_overwrite(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes a blob. Succeeds if it does not exist.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists blob paths under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether `write_create_if_absent` is a genuine test-and-set under
    /// concurrent writers.
    fn atomic_create(&self) -> bool {
        true
    }

    /// `read_all` that maps `NotFound` to `None`.
    async fn read_if_exists(&self, path: &str) -> Result<Option<Bytes>> {
        match self.read_all(path).await {
            Ok(data) => Ok(Some(data)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
