//! RemoteLock - blob の有無で表す分散ロック
//!
//! A lock is a Store path. It is held while a zero-length blob exists there.
//! Acquire is a create-if-absent write; release deletes the blob.
//!
//! # 学習ポイント
//! - exclusivity is only as strong as the Store's conditional create
//!   ([`Store::atomic_create`])
//! - polling backs off exponentially with jitter and honours a deadline
//! - [`LockGuard`] releases explicitly, with a best-effort release on drop
//!
//! There is no TTL: a holder that dies leaves the blob behind and an operator
//! has to clear it with `force_release` (`rendezvous unlock` for queue locks).

use std::time::Duration;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{Instrument, Span, debug, warn};

use crate::domain::errors::{Error, Result};
use crate::lock::backoff::PollPolicy;
use crate::ports::{CreateOutcome, SharedStore};

#[derive(Clone)]
pub struct RemoteLock {
    store: SharedStore,
    policy: PollPolicy,
    span: Span,
}

impl RemoteLock {
    pub fn new(store: SharedStore, policy: PollPolicy) -> Self {
        Self::with_span(store, policy, tracing::info_span!("remote_lock"))
    }

    pub fn with_span(store: SharedStore, policy: PollPolicy, span: Span) -> Self {
        if !store.atomic_create() {
            span.in_scope(|| {
                warn!("store create-if-absent is not atomic; concurrent holders are possible")
            });
        }
        Self {
            store,
            policy,
            span,
        }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Waits until the lock at `path` is ours. Never times out.
    pub async fn acquire(&self, path: &str) -> Result<LockGuard> {
        self.acquire_until(path, None).await
    }

    /// Like [`acquire`](Self::acquire), failing with `LockTimeout` once
    /// `deadline` passes.
    pub async fn acquire_until(&self, path: &str, deadline: Option<Instant>) -> Result<LockGuard> {
        async {
            let started = Instant::now();
            let mut attempts = 0u32;
            loop {
                if let Some(guard) = self.try_acquire(path).await? {
                    debug!(path, attempts, "lock acquired");
                    return Ok(guard);
                }
                attempts = attempts.saturating_add(1);
                self.pause(path, attempts, started, deadline).await?;
            }
        }
        .instrument(self.span.clone())
        .await
    }

    /// One create-if-absent attempt.
    pub async fn try_acquire(&self, path: &str) -> Result<Option<LockGuard>> {
        match self.store.write_create_if_absent(path, Bytes::new()).await? {
            CreateOutcome::Created => Ok(Some(LockGuard {
                store: self.store.clone(),
                path: path.to_string(),
                released: false,
            })),
            CreateOutcome::AlreadyExists => Ok(None),
        }
    }

    /// Deletes the lock blob. Idempotent.
    pub async fn release(&self, path: &str) -> Result<()> {
        self.store.delete(path).await
    }

    pub async fn is_held(&self, path: &str) -> Result<bool> {
        self.store.exists(path).await
    }

    /// Waits until nobody holds `path`, without taking it.
    pub async fn wait_clear(&self, path: &str, deadline: Option<Instant>) -> Result<()> {
        async {
            let started = Instant::now();
            let mut attempts = 0u32;
            while self.store.exists(path).await? {
                attempts = attempts.saturating_add(1);
                self.pause(path, attempts, started, deadline).await?;
            }
            Ok(())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Clears a lock left behind by a dead holder.
    pub async fn force_release(&self, path: &str) -> Result<()> {
        self.span
            .in_scope(|| warn!(path, "force-releasing lock"));
        self.store.delete(path).await
    }

    /// Sleeps for the next poll, or fails if the deadline has passed.
    pub(crate) async fn pause(
        &self,
        path: &str,
        attempts: u32,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let delay = self.policy.jittered_delay(attempts);
        match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(Error::LockTimeout {
                        path: path.to_string(),
                        waited: now.duration_since(started),
                    });
                }
                tokio::time::sleep_until((now + delay).min(deadline)).await;
            }
            None => tokio::time::sleep(delay).await,
        }
        Ok(())
    }
}

/// Deadline `timeout` from now, or none.
pub fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.map(|t| Instant::now() + t)
}

/// Proof that the caller created the lock blob.
///
/// Prefer [`release`](Self::release): drop can only spawn the delete and
/// loses its error.
#[must_use = "dropping the guard releases the lock in the background"]
pub struct LockGuard {
    store: SharedStore,
    path: String,
    released: bool,
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("path", &self.path)
            .field("released", &self.released)
            .finish()
    }
}

impl LockGuard {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Deletes the lock blob.
    ///
    /// The guard counts as released once this is called: if the delete fails
    /// or the future is dropped midway, the blob may stay behind, but drop
    /// never issues a second delete that could hit the next holder's lock.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        self.store.delete(&self.path).await
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        // runtime が無ければ blob は残る（force_release で回収）
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let store = self.store.clone();
        let path = std::mem::take(&mut self.path);
        handle.spawn(async move {
            if let Err(e) = store.delete(&path).await {
                warn!(path, error = %e, "background lock release failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::impls::MemoryStore;

    fn lock_on(store: &MemoryStore) -> RemoteLock {
        RemoteLock::new(Arc::new(store.clone()), PollPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_release_acquire_does_not_block() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);

        let guard = lock.acquire("nodes/a/lock.owner").await.unwrap();
        assert!(lock.is_held("nodes/a/lock.owner").await.unwrap());
        guard.release().await.unwrap();

        let started = Instant::now();
        let guard = lock.acquire("nodes/a/lock.owner").await.unwrap();
        assert_eq!(started.elapsed(), Duration::ZERO);
        guard.release().await.unwrap();
        assert!(!lock.is_held("nodes/a/lock.owner").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn held_lock_times_out_at_deadline() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        let _held = lock.acquire("p").await.unwrap();

        let err = lock
            .acquire_until("p", deadline_after(Some(Duration::from_secs(3))))
            .await
            .unwrap_err();
        match err {
            Error::LockTimeout { path, waited } => {
                assert_eq!(path, "p");
                assert_eq!(waited, Duration::from_secs(3));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn waiter_gets_lock_after_holder_releases() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        let held = lock.acquire("p").await.unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            held.release().await.unwrap();
        });

        let guard = lock.acquire("p").await.unwrap();
        releaser.await.unwrap();
        assert_eq!(guard.path(), "p");
    }

    #[tokio::test(start_paused = true)]
    async fn wait_clear_does_not_take_the_lock() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        lock.wait_clear("p", None).await.unwrap();
        assert!(!lock.is_held("p").await.unwrap());
    }

    #[tokio::test]
    async fn store_failure_propagates_as_transient() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        store.fail_next(1);
        let err = lock.acquire("p").await.unwrap_err();
        assert!(err.is_transient());
        assert!(!lock.is_held("p").await.unwrap());
    }

    #[tokio::test]
    async fn dropped_guard_releases_in_background() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        drop(lock.acquire("p").await.unwrap());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!lock.is_held("p").await.unwrap());
    }

    #[tokio::test]
    async fn failed_release_does_not_delete_the_next_holders_lock() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        let guard = lock.acquire("p").await.unwrap();
        store.fail_next(1);
        assert!(guard.release().await.is_err());
        assert!(lock.is_held("p").await.unwrap());

        lock.force_release("p").await.unwrap();
        let next = lock.acquire("p").await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(lock.is_held("p").await.unwrap());
        next.release().await.unwrap();
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let store = MemoryStore::new();
        let lock = lock_on(&store);
        lock.release("p").await.unwrap();
        let guard = lock.acquire("p").await.unwrap();
        lock.release("p").await.unwrap();
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn non_atomic_create_admits_two_holders() {
        // create-if-absent が check と write に分かれていると排他が壊れる
        let store = MemoryStore::new().with_racy_create();
        let lock = lock_on(&store);
        let (a, b) = tokio::join!(lock.try_acquire("p"), lock.try_acquire("p"));
        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
    }
}
