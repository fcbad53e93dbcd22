//! WorkerLoop - queue を定期的に drain して task を実行するループ
//!
//! # フロー
//! 1. RemoteTaskQueue::drain() で溜まった task 行を全部取る
//! 2. Executor::load() で解決、Executor::run() で実行 → Outcome
//! 3. TaskResult を `results/<id>.json` に書く
//!
//! A task that cannot be loaded or fails to run still produces a result blob
//! with a FAILURE outcome. Nothing a single task does stops the loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{Instrument, Span, debug, error, info, warn};

use crate::domain::errors::Result;
use crate::domain::ids::ResultId;
use crate::domain::outcome::{Outcome, TaskResult};
use crate::domain::paths::NodePaths;
use crate::lock::{PollPolicy, deadline_after};
use crate::ports::{Executor, SharedStore};
use crate::queue::RemoteTaskQueue;

/// Counters shared between the loop and whoever reports status.
#[derive(Debug, Default)]
pub struct WorkerStats {
    executed: AtomicU64,
    failed: AtomicU64,
    last_drain: Mutex<Option<DateTime<Utc>>>,
}

impl WorkerStats {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn last_drain(&self) -> Option<DateTime<Utc>> {
        *self.last_drain.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record_drain(&self, at: DateTime<Utc>) {
        *self.last_drain.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    fn record(&self, outcome: &Outcome) {
        self.executed.fetch_add(1, Ordering::Relaxed);
        if !outcome.is_success() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

pub struct WorkerLoop {
    store: SharedStore,
    paths: NodePaths,
    queue: RemoteTaskQueue,
    executor: Arc<dyn Executor>,
    poll_interval: Duration,
    lock_timeout: Option<Duration>,
    stats: Arc<WorkerStats>,
    /// Result ids from one worker list in execution order.
    ids: Mutex<ulid::Generator>,
    span: Span,
}

impl WorkerLoop {
    pub fn new(
        store: SharedStore,
        paths: NodePaths,
        executor: Arc<dyn Executor>,
        policy: PollPolicy,
        poll_interval: Duration,
    ) -> Self {
        let span = tracing::info_span!("worker", node = %paths.name());
        Self::with_span(store, paths, executor, policy, poll_interval, span)
    }

    pub fn with_span(
        store: SharedStore,
        paths: NodePaths,
        executor: Arc<dyn Executor>,
        policy: PollPolicy,
        poll_interval: Duration,
        span: Span,
    ) -> Self {
        let queue_span = tracing::info_span!(parent: &span, "queue");
        let queue = RemoteTaskQueue::with_span(store.clone(), &paths, policy, queue_span);
        Self {
            store,
            paths,
            queue,
            executor,
            poll_interval,
            lock_timeout: None,
            stats: Arc::new(WorkerStats::default()),
            ids: Mutex::new(ulid::Generator::new()),
            span,
        }
    }

    /// Bounds each drain's lock wait. A timed-out drain is retried next tick.
    pub fn with_lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// One drain and execution pass. Returns the number of tasks drained.
    ///
    /// Errors are from the drain itself; per-task problems become results.
    pub async fn run_once(&self) -> Result<usize> {
        async {
            let tasks = self
                .queue
                .drain_until(deadline_after(self.lock_timeout))
                .await?;
            self.stats.record_drain(Utc::now());
            if tasks.is_empty() {
                return Ok(0);
            }
            debug!(count = tasks.len(), "drained tasks");

            for task in &tasks {
                let result = self.execute(task).await;
                self.stats.record(&result.outcome);
                if let Err(e) = self.write_result(&result).await {
                    // drain 済みなので再実行はしない
                    error!(task = %task, error = %e, "cannot write task result");
                }
            }
            Ok(tasks.len())
        }
        .instrument(self.span.clone())
        .await
    }

    /// Loads and runs one task line. Never fails: errors become a FAILURE
    /// outcome.
    pub async fn execute(&self, task: &str) -> TaskResult {
        let started_at = Utc::now();
        let outcome = match self.executor.load(task).await {
            Ok(loaded) => {
                let name = loaded.describe();
                match self.executor.run(loaded).await {
                    Ok(outcome) => {
                        debug!(task = %name, success = outcome.is_success(), "task finished");
                        outcome
                    }
                    Err(e) => {
                        warn!(task = %name, error = %e, "task execution failed");
                        Outcome::failure(e.to_string())
                    }
                }
            }
            Err(e) => {
                warn!(task = %task, error = %e, "cannot load task");
                Outcome::failure(e.to_string())
            }
        };
        TaskResult {
            id: self.next_id(),
            node: self.paths.name().to_string(),
            task: task.to_string(),
            outcome,
            started_at,
            finished_at: Utc::now(),
        }
    }

    fn next_id(&self) -> ResultId {
        let mut ids = self.ids.lock().unwrap_or_else(PoisonError::into_inner);
        // 同一ミリ秒内で乱数部が溢れたら単調性を諦める
        ids.generate()
            .map(ResultId::from_ulid)
            .unwrap_or_else(|_| ResultId::generate())
    }

    async fn write_result(&self, result: &TaskResult) -> Result<()> {
        let json = serde_json::to_vec(result).map_err(std::io::Error::from)?;
        self.store
            .write_overwrite(&self.paths.result(result.id), Bytes::from(json))
            .await
    }

    /// Polls until `shutdown` turns true or its sender is dropped.
    ///
    /// An in-flight pass is finished before stopping.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let span = self.span.clone();
        span.in_scope(|| info!(interval = ?self.poll_interval, "worker loop started"));
        loop {
            if *shutdown.borrow() {
                break;
            }

            if let Err(e) = self.run_once().await {
                if e.is_transient() {
                    span.in_scope(|| warn!(error = %e, "drain failed; retrying next tick"));
                } else {
                    span.in_scope(|| error!(error = %e, "drain failed"));
                }
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        span.in_scope(|| info!("worker loop stopped"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::outcome::OutcomeKind;
    use crate::impls::MemoryStore;
    use crate::ports::Store;
    use crate::typed::builtin::register_builtins;
    use crate::typed::{RegistryExecutor, TypedRegistry};

    fn worker(store: &MemoryStore) -> WorkerLoop {
        let mut registry = TypedRegistry::new();
        register_builtins(&mut registry).unwrap();
        WorkerLoop::new(
            Arc::new(store.clone()),
            NodePaths::new("w1").unwrap(),
            Arc::new(RegistryExecutor::new(Arc::new(registry))),
            PollPolicy::fixed(Duration::from_millis(10)),
            Duration::from_millis(100),
        )
    }

    async fn results(store: &MemoryStore) -> Vec<TaskResult> {
        let paths = NodePaths::new("w1").unwrap();
        let mut out = Vec::new();
        for path in store.list(&paths.results_prefix()).await.unwrap() {
            let data = store.read_all(&path).await.unwrap();
            out.push(serde_json::from_slice(&data).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn drained_tasks_leave_results_in_order() {
        let store = MemoryStore::new();
        let worker = worker(&store);
        worker
            .queue
            .enqueue(&[
                r#"core.echo.v1 {"message":"one"}"#,
                "nobody.home.v1",
                r#"core.fail.v1 {"reason":"no"}"#,
            ])
            .await
            .unwrap();

        assert_eq!(worker.run_once().await.unwrap(), 3);

        let results = results(&store).await;
        let kinds: Vec<_> = results.iter().map(|r| r.outcome.kind).collect();
        assert_eq!(
            kinds,
            vec![OutcomeKind::Success, OutcomeKind::Failure, OutcomeKind::Failure]
        );
        assert!(results[1].outcome.reason.as_deref().unwrap().contains("nobody.home.v1"));
        assert_eq!(results[0].task, r#"core.echo.v1 {"message":"one"}"#);

        let stats = worker.stats();
        assert_eq!(stats.executed(), 3);
        assert_eq!(stats.failed(), 2);
        assert!(stats.last_drain().is_some());
    }

    #[tokio::test]
    async fn empty_queue_writes_nothing() {
        let store = MemoryStore::new();
        let worker = worker(&store);
        assert_eq!(worker.run_once().await.unwrap(), 0);
        assert!(results(&store).await.is_empty());
        assert!(worker.stats().last_drain().is_some());
    }

    #[tokio::test]
    async fn drain_failure_is_returned_and_loop_survives() {
        let store = MemoryStore::new();
        let worker = worker(&store);
        store.fail_next(1);
        assert!(worker.run_once().await.is_err());
        assert_eq!(worker.run_once().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let store = MemoryStore::new();
        let worker = worker(&store);
        let queue = RemoteTaskQueue::new(
            Arc::new(store.clone()),
            &NodePaths::new("w1").unwrap(),
            PollPolicy::fixed(Duration::from_millis(10)),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        queue.enqueue(&[r#"core.echo.v1 {"message":"late"}"#]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(results(&store).await.len(), 1);

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
