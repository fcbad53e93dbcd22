//! MemoryStore - 開発・テスト用の Store 実装
//!
//! # 学習ポイント
//! - std Mutex は await を跨いで保持しない
//! - seed 付き StdRng で再現可能な interleaving を作る
//! - racy create で「create-if-absent は test-and-set ではない」状況を再現
//!
//! Thread-safe, not suitable for production.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::domain::errors::{Error, Result};
use crate::ports::{CreateOutcome, Store};

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Bytes>,
    /// path -> remaining injected failures
    failures: HashMap<String, usize>,
    /// injected failures for any path
    fail_any: usize,
    operations: u64,
}

/// In-memory Store.
///
/// # 使用例
/// ```ignore
/// let store = Arc::new(MemoryStore::new().with_chaos(42));
/// store.write_overwrite("a", Bytes::from_static(b"x")).await?;
/// ```
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    chaos: Option<Arc<Mutex<StdRng>>>,
    racy_create: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Yields to the scheduler a random number of times before every
    /// operation, driven by `seed`.
    pub fn with_chaos(mut self, seed: u64) -> Self {
        self.chaos = Some(Arc::new(Mutex::new(StdRng::seed_from_u64(seed))));
        self
    }

    /// Splits create-if-absent into a separate existence check and write, so
    /// concurrent creators can both succeed.
    pub fn with_racy_create(mut self) -> Self {
        self.racy_create = true;
        self
    }

    /// The next `times` operations touching `path` fail with
    /// `StoreUnavailable`.
    pub fn fail_next_on(&self, path: &str, times: usize) {
        self.lock().failures.insert(path.to_string(), times);
    }

    /// The next `times` operations on any path fail.
    pub fn fail_next(&self, times: usize) {
        self.lock().fail_any = times;
    }

    /// Number of operations served so far (including injected failures).
    pub fn operations(&self) -> u64 {
        self.lock().operations
    }

    /// Snapshot of every stored path.
    pub fn paths(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn schedule_point(&self) {
        let Some(rng) = &self.chaos else {
            return;
        };
        let yields = rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0..3);
        for _ in 0..yields {
            tokio::task::yield_now().await;
        }
    }

    /// Counts the operation and consumes an injected failure, if any.
    async fn enter(&self, op: &str, path: &str) -> Result<()> {
        self.schedule_point().await;
        let mut state = self.lock();
        state.operations += 1;
        if state.fail_any > 0 {
            state.fail_any -= 1;
            return Err(Error::store(format!("injected failure: {op} {path}")));
        }
        if let Some(remaining) = state.failures.get_mut(path)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(Error::store(format!("injected failure: {op} {path}")));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        self.enter("exists", path).await?;
        Ok(self.lock().objects.contains_key(path))
    }

    async fn read_all(&self, path: &str) -> Result<Bytes> {
        self.enter("read", path).await?;
        self.lock()
            .objects
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    async fn write_create_if_absent(&self, path: &str, data: Bytes) -> Result<CreateOutcome> {
        self.enter("create", path).await?;
        if self.racy_create {
            let present = self.lock().objects.contains_key(path);
            if present {
                return Ok(CreateOutcome::AlreadyExists);
            }
            // 他の writer が割り込める隙間
            self.schedule_point().await;
            tokio::task::yield_now().await;
            self.lock().objects.insert(path.to_string(), data);
            return Ok(CreateOutcome::Created);
        }

        let mut state = self.lock();
        if state.objects.contains_key(path) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        state.objects.insert(path.to_string(), data);
        Ok(CreateOutcome::Created)
    }

    async fn write_overwrite(&self, path: &str, data: Bytes) -> Result<()> {
        self.enter("write", path).await?;
        self.lock().objects.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.enter("delete", path).await?;
        self.lock().objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.enter("list", prefix).await?;
        Ok(self
            .lock()
            .objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn atomic_create(&self) -> bool {
        !self.racy_create
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_if_absent_reports_existing_blob() {
        let store = MemoryStore::new();
        let first = store
            .write_create_if_absent("a/lock", Bytes::new())
            .await
            .unwrap();
        let second = store
            .write_create_if_absent("a/lock", Bytes::new())
            .await
            .unwrap();
        assert_eq!(first, CreateOutcome::Created);
        assert_eq!(second, CreateOutcome::AlreadyExists);
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.read_all("missing").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(p) if p == "missing"));
        assert_eq!(store.read_if_exists("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryStore::new();
        store.delete("nothing").await.unwrap();
        store
            .write_overwrite("x", Bytes::from_static(b"1"))
            .await
            .unwrap();
        store.delete("x").await.unwrap();
        store.delete("x").await.unwrap();
        assert!(!store.exists("x").await.unwrap());
    }

    #[tokio::test]
    async fn list_is_prefix_scoped_and_sorted() {
        let store = MemoryStore::new();
        for path in ["n/b/r/2", "n/b/r/1", "n/a/r/1", "n/bb/r/1"] {
            store.write_overwrite(path, Bytes::new()).await.unwrap();
        }
        let listed = store.list("n/b/").await.unwrap();
        assert_eq!(listed, vec!["n/b/r/1".to_string(), "n/b/r/2".to_string()]);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let store = MemoryStore::new();
        store.fail_next_on("p", 1);
        assert!(store.exists("p").await.unwrap_err().is_transient());
        assert!(!store.exists("p").await.unwrap());

        store.fail_next(2);
        assert!(store.exists("q").await.is_err());
        assert!(store.exists("r").await.is_err());
        assert!(store.exists("q").await.is_ok());
    }

    #[tokio::test]
    async fn racy_create_lets_concurrent_creators_both_win() {
        let store = MemoryStore::new().with_racy_create();
        assert!(!store.atomic_create());

        let (a, b) = tokio::join!(
            store.write_create_if_absent("lock", Bytes::new()),
            store.write_create_if_absent("lock", Bytes::new()),
        );
        assert_eq!(a.unwrap(), CreateOutcome::Created);
        assert_eq!(b.unwrap(), CreateOutcome::Created);
    }
}
