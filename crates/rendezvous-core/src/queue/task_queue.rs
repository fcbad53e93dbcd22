//! RemoteTaskQueue - 1 node 分の append-only task list
//!
//! # プロトコル
//! - producer (coordinator): owner lock を取る → peer lock が消えるまで待つ
//!   → 既存 blob と merge して書く → owner lock を解放
//! - consumer (worker): peer lock を取る → owner lock が無いことを再確認
//!   （あれば peer lock を解放して backoff、やり直し）→ 読んで削除 → 解放
//!
//! Each side announces itself before checking the other, so at most one of
//! them is inside its critical section at a time, and the consumer stepping
//! back keeps the two from waiting on each other.
//!
//! The held lock is released on every path out of the critical section,
//! including Store errors.

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, info, warn};

use crate::domain::errors::Result;
use crate::domain::paths::NodePaths;
use crate::lock::{LockGuard, PollPolicy, RemoteLock};
use crate::ports::SharedStore;
use crate::queue::codec;

#[derive(Clone)]
pub struct RemoteTaskQueue {
    store: SharedStore,
    lock: RemoteLock,
    queue_path: String,
    owner_lock: String,
    peer_lock: String,
    span: Span,
}

impl RemoteTaskQueue {
    pub fn new(store: SharedStore, paths: &NodePaths, policy: PollPolicy) -> Self {
        let span = tracing::info_span!("task_queue", node = paths.name());
        Self::with_span(store, paths, policy, span)
    }

    pub fn with_span(store: SharedStore, paths: &NodePaths, policy: PollPolicy, span: Span) -> Self {
        let lock = RemoteLock::with_span(store.clone(), policy, span.clone());
        Self {
            store,
            lock,
            queue_path: paths.queue(),
            owner_lock: paths.owner_lock(),
            peer_lock: paths.peer_lock(),
            span,
        }
    }

    pub fn queue_path(&self) -> &str {
        &self.queue_path
    }

    /// Appends `tasks` after whatever is still undrained.
    ///
    /// Every task is validated before any lock is taken; an empty batch is a
    /// no-op.
    pub async fn enqueue<S: AsRef<str> + Sync>(&self, tasks: &[S]) -> Result<()> {
        self.enqueue_until(tasks, None).await
    }

    pub async fn enqueue_until<S: AsRef<str> + Sync>(
        &self,
        tasks: &[S],
        deadline: Option<Instant>,
    ) -> Result<()> {
        for task in tasks {
            codec::validate_task(task.as_ref())?;
        }
        if tasks.is_empty() {
            return Ok(());
        }

        async {
            let guard = self.lock.acquire_until(&self.owner_lock, deadline).await?;
            let result = self.write_batch(tasks, deadline).await;
            finish(guard, result).await?;
            info!(count = tasks.len(), "tasks enqueued");
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Takes every pending task, in enqueue order. Returns an empty list when
    /// nothing is queued.
    pub async fn drain(&self) -> Result<Vec<String>> {
        self.drain_until(None).await
    }

    pub async fn drain_until(&self, deadline: Option<Instant>) -> Result<Vec<String>> {
        async {
            let started = Instant::now();
            let mut attempts = 0u32;
            loop {
                let guard = self.lock.acquire_until(&self.peer_lock, deadline).await?;
                match self.lock.is_held(&self.owner_lock).await {
                    Ok(false) => {
                        let result = self.take_all().await;
                        let tasks = finish(guard, result).await?;
                        if !tasks.is_empty() {
                            info!(count = tasks.len(), "tasks drained");
                        }
                        return Ok(tasks);
                    }
                    Ok(true) => {
                        // producer が書き込み中: peer lock を返して譲る
                        guard.release().await?;
                        attempts = attempts.saturating_add(1);
                        debug!(attempts, "producer active, backing off");
                        self.lock
                            .pause(&self.owner_lock, attempts, started, deadline)
                            .await?;
                    }
                    Err(e) => return finish(guard, Err(e)).await,
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }

    async fn write_batch<S: AsRef<str> + Sync>(
        &self,
        tasks: &[S],
        deadline: Option<Instant>,
    ) -> Result<()> {
        self.lock.wait_clear(&self.peer_lock, deadline).await?;
        let existing = match self.store.read_if_exists(&self.queue_path).await? {
            Some(data) => Some(codec::checked_text(&self.queue_path, &data)?.to_string()),
            None => None,
        };
        let merged = codec::merge(existing.as_deref(), tasks);
        self.store
            .write_overwrite(&self.queue_path, Bytes::from(merged))
            .await
    }

    async fn take_all(&self) -> Result<Vec<String>> {
        let Some(data) = self.store.read_if_exists(&self.queue_path).await? else {
            return Ok(Vec::new());
        };
        let tasks = codec::decode(&self.queue_path, &data)?;
        self.store.delete(&self.queue_path).await?;
        Ok(tasks)
    }
}

/// Releases `guard`, keeping the critical section's error if both fail.
async fn finish<T>(guard: LockGuard, result: Result<T>) -> Result<T> {
    let path = guard.path().to_string();
    match (result, guard.release().await) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(release)) => Err(release),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(release)) => {
            warn!(path, error = %release, "lock release failed after error");
            Err(e)
        }
    }
}
