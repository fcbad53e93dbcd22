//! Coordinator - 各 node の queue に task を配り、結果を回収する
//!
//! # フロー
//! 1. `register_node()`: 空の queue blob と初期 status blob を作る（冪等）
//! 2. `publish()`: RemoteTaskQueue::enqueue
//! 3. `collect_results()`: `results/*.json` を読んで削除
//!
//! `force_unlock()` clears queue locks left behind by a crashed process.

use std::time::Duration;

use bytes::Bytes;
use tracing::{Instrument, Span, debug, info, warn};

use crate::app::status::NodeStatus;
use crate::domain::errors::{Error, Result};
use crate::domain::outcome::TaskResult;
use crate::domain::paths::{NODES_PREFIX, NodePaths, QUEUE_BLOB};
use crate::lock::{PollPolicy, RemoteLock, deadline_after};
use crate::observability::Role;
use crate::ports::SharedStore;
use crate::queue::RemoteTaskQueue;
use crate::typed::{Task, codec};

/// One of the two locks guarding a node's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueLock {
    /// Held by a producer while it appends.
    Owner,
    /// Held by a consumer while it drains.
    Peer,
}

pub struct Coordinator {
    store: SharedStore,
    policy: PollPolicy,
    lock_timeout: Option<Duration>,
    span: Span,
}

impl Coordinator {
    pub fn new(store: SharedStore, policy: PollPolicy) -> Self {
        Self::with_span(store, policy, tracing::info_span!("coordinator"))
    }

    pub fn with_span(store: SharedStore, policy: PollPolicy, span: Span) -> Self {
        Self {
            store,
            policy,
            lock_timeout: None,
            span,
        }
    }

    /// Bounds every lock wait in `publish`.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn queue(&self, node: &str) -> Result<RemoteTaskQueue> {
        let paths = NodePaths::new(node)?;
        let span = tracing::info_span!(parent: &self.span, "queue", node = %node);
        Ok(RemoteTaskQueue::with_span(
            self.store.clone(),
            &paths,
            self.policy.clone(),
            span,
        ))
    }

    /// Creates the node's queue blob and initial status. Existing blobs are
    /// left untouched.
    pub async fn register_node(&self, node: &str) -> Result<NodePaths> {
        let paths = NodePaths::new(node)?;
        async {
            let queue = self
                .store
                .write_create_if_absent(&paths.queue(), Bytes::new())
                .await?;
            let status = NodeStatus::registered(node, Role::Worker).to_bytes()?;
            self.store
                .write_create_if_absent(&paths.status(), status)
                .await?;
            if queue.is_created() {
                info!(node, "registered node");
            } else {
                debug!(node, "node already registered");
            }
            Ok(())
        }
        .instrument(self.span.clone())
        .await
        .map(|()| paths)
    }

    /// Appends raw task lines to the node's queue.
    pub async fn publish<S: AsRef<str> + Sync>(&self, node: &str, tasks: &[S]) -> Result<()> {
        let queue = self.queue(node)?;
        queue
            .enqueue_until(tasks, deadline_after(self.lock_timeout))
            .await
    }

    /// Encodes typed tasks as `<kind> <json>` lines and publishes them.
    pub async fn publish_typed<T: Task>(&self, node: &str, tasks: &[T]) -> Result<()> {
        let lines = tasks
            .iter()
            .map(|task| codec::encode(task).map_err(|e| Error::invalid_task(T::KIND, e.to_string())))
            .collect::<Result<Vec<_>>>()?;
        self.publish(node, &lines).await
    }

    /// Reads and removes every result blob of `node`, oldest first.
    ///
    /// Every blob is read before any is deleted, so a failed read loses
    /// nothing. Only results whose blob was deleted are returned; if a delete
    /// fails the rest stay in the store for the next call. A blob that cannot
    /// be parsed is logged and left in place.
    pub async fn collect_results(&self, node: &str) -> Result<Vec<TaskResult>> {
        let paths = NodePaths::new(node)?;
        async {
            let mut parsed = Vec::new();
            for path in self.store.list(&paths.results_prefix()).await? {
                let Some(data) = self.store.read_if_exists(&path).await? else {
                    continue;
                };
                match serde_json::from_slice::<TaskResult>(&data) {
                    Ok(result) => parsed.push((path, result)),
                    Err(e) => warn!(%path, error = %e, "skipping unreadable result blob"),
                }
            }

            let mut results = Vec::with_capacity(parsed.len());
            for (path, result) in parsed {
                if let Err(e) = self.store.delete(&path).await {
                    warn!(%path, error = %e, "cannot remove result blob; leaving the rest for later");
                    break;
                }
                results.push(result);
            }
            debug!(node, count = results.len(), "collected results");
            Ok(results)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Deletes the given queue locks of `node` regardless of who holds them.
    /// Returns the paths that were actually held.
    ///
    /// Only for locks whose holder is known to be dead: clearing a live
    /// holder's lock lets a producer and a consumer overlap.
    pub async fn force_unlock(&self, node: &str, locks: &[QueueLock]) -> Result<Vec<String>> {
        let paths = NodePaths::new(node)?;
        let lock = RemoteLock::with_span(
            self.store.clone(),
            self.policy.clone(),
            tracing::info_span!(parent: &self.span, "unlock", node = %node),
        );
        let mut cleared = Vec::new();
        for which in locks {
            let path = match which {
                QueueLock::Owner => paths.owner_lock(),
                QueueLock::Peer => paths.peer_lock(),
            };
            if lock.is_held(&path).await? {
                lock.force_release(&path).await?;
                cleared.push(path);
            }
        }
        Ok(cleared)
    }

    pub async fn status(&self, node: &str) -> Result<Option<NodeStatus>> {
        let paths = NodePaths::new(node)?;
        NodeStatus::fetch(self.store.as_ref(), &paths).await
    }

    /// Names of every node that has a queue blob.
    pub async fn nodes(&self) -> Result<Vec<String>> {
        let suffix = format!("/{QUEUE_BLOB}");
        let mut names: Vec<String> = self
            .store
            .list(NODES_PREFIX)
            .await?
            .into_iter()
            .filter_map(|path| {
                let rest = path.strip_prefix(NODES_PREFIX)?.strip_suffix(&suffix)?;
                (!rest.contains('/')).then(|| rest.to_string())
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}
