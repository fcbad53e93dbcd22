//! Node - worker プロセス 1 つ分のライフサイクル
//!
//! `run()` starts the self-healing listener and the worker loop, publishes
//! status on a timer, and returns when asked to shut down or when the
//! listener chain gives up. Restarting after `ListenerTerminated` is the
//! process's decision.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{Span, debug, error, info, warn};

use crate::app::status::NodeStatus;
use crate::app::worker_loop::{WorkerLoop, WorkerStats};
use crate::config::NodeConfig;
use crate::domain::errors::{Error, Result};
use crate::domain::paths::NodePaths;
use crate::domain::state::ListenerState;
use crate::listener::{ConnectionRegistry, Dispatch, LoggingSession, SelfHealingListener};
use crate::observability::{Role, component_span};
use crate::ports::SharedStore;
use crate::typed::RegistryExecutor;

pub struct Node {
    config: NodeConfig,
    paths: NodePaths,
    store: SharedStore,
    executor: Arc<RegistryExecutor>,
    dispatch: Option<Arc<dyn Dispatch>>,
    span: Span,
}

impl Node {
    pub(crate) fn new(
        config: NodeConfig,
        paths: NodePaths,
        store: SharedStore,
        executor: Arc<RegistryExecutor>,
        dispatch: Option<Arc<dyn Dispatch>>,
        span: Span,
    ) -> Self {
        Self {
            config,
            paths,
            store,
            executor,
            dispatch,
            span,
        }
    }

    pub fn name(&self) -> &str {
        self.paths.name()
    }

    pub fn paths(&self) -> &NodePaths {
        &self.paths
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    pub fn executor(&self) -> &RegistryExecutor {
        &self.executor
    }

    /// Runs until `shutdown` turns true (or its sender is dropped).
    ///
    /// Returns `ListenerTerminated` if the listener chain gives up.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let listener = self.start_listener().await?;

        let worker = WorkerLoop::with_span(
            self.store.clone(),
            self.paths.clone(),
            self.executor.clone(),
            self.config.lock.poll_policy(),
            self.config.worker.poll_interval(),
            component_span(&self.span, "worker"),
        )
        .with_lock_timeout(self.config.lock.timeout());
        let stats = worker.stats();
        let (worker_tx, worker_rx) = watch::channel(false);
        let worker_task = tokio::spawn(worker.run(worker_rx));

        let mut ticker = tokio::time::interval(self.config.worker.status_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let outcome = loop {
            if *shutdown.borrow() {
                break Ok(());
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break Ok(());
                    }
                }
                state = finished(listener.as_ref()) => {
                    self.span.in_scope(|| error!(%state, "listener chain ended"));
                    break Err(Error::ListenerTerminated {
                        reason: format!("listener {state}"),
                    });
                }
                _ = ticker.tick() => {
                    self.publish_status(&stats, listener.as_ref()).await;
                }
            }
        };

        if let Some(listener) = &listener {
            listener.close().await;
        }
        let _ = worker_tx.send(true);
        let join_timeout = Duration::from_millis(self.config.listener.join_timeout_ms);
        match tokio::time::timeout(join_timeout, worker_task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self
                .span
                .in_scope(|| warn!(error = %e, "worker loop ended abnormally")),
            Err(_) => self
                .span
                .in_scope(|| warn!("worker loop did not stop within join timeout")),
        }
        self.publish_status(&stats, listener.as_ref()).await;
        self.span.in_scope(|| info!(ok = outcome.is_ok(), "node stopped"));
        outcome
    }

    async fn start_listener(&self) -> Result<Option<SelfHealingListener>> {
        if !self.config.listener.enabled {
            self.span
                .in_scope(|| info!("listener disabled; running queue worker only"));
            return Ok(None);
        }
        let options = self.config.listener.options()?;
        let dispatch: Arc<dyn Dispatch> = match &self.dispatch {
            Some(dispatch) => dispatch.clone(),
            None => Arc::new(ConnectionRegistry::with_span(
                Arc::new(LoggingSession),
                component_span(&self.span, "registry"),
            )),
        };
        let listener =
            SelfHealingListener::start(options, dispatch, component_span(&self.span, "listener"))
                .await?;
        Ok(Some(listener))
    }

    async fn publish_status(&self, stats: &WorkerStats, listener: Option<&SelfHealingListener>) {
        let mut status = NodeStatus::registered(self.paths.name(), Role::Worker);
        if let Some(listener) = listener {
            let state = listener.state();
            if !state.is_running() {
                self.span
                    .in_scope(|| debug!(%state, "listener is not accepting"));
            }
            status = status.with_listener(state);
        }
        status.tasks_executed = stats.executed();
        status.tasks_failed = stats.failed();
        status.last_drain = stats.last_drain();
        status.updated_at = Utc::now();
        if let Err(e) = status.publish(self.store.as_ref(), &self.paths).await {
            self.span
                .in_scope(|| warn!(error = %e, "cannot publish node status"));
        }
    }
}

/// Resolves when the listener chain ends; never without a listener.
async fn finished(listener: Option<&SelfHealingListener>) -> ListenerState {
    match listener {
        Some(listener) => listener.finished().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener as StdListener;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;
    use crate::app::builder::NodeBuilder;
    use crate::app::coordinator::Coordinator;
    use crate::impls::MemoryStore;
    use crate::listener::{Connection, DispatchError, handshake};
    use crate::lock::PollPolicy;
    use crate::typed::builtin::EchoTask;

    fn config(listener: bool) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.node.name = "w1".into();
        config.lock.poll_base_ms = 10;
        config.lock.poll_max_ms = 50;
        config.worker.poll_interval_ms = 20;
        config.worker.status_interval_ms = 20;
        config.listener.enabled = listener;
        config
    }

    #[tokio::test]
    async fn runs_published_tasks_and_reports_status() {
        let store = MemoryStore::new();
        let coordinator = Coordinator::new(
            Arc::new(store.clone()),
            PollPolicy::fixed(Duration::from_millis(10)),
        );
        coordinator.register_node("w1").await.unwrap();

        let node = NodeBuilder::new(config(false))
            .with_builtins()
            .unwrap()
            .with_store(Arc::new(store.clone()))
            .build()
            .await
            .unwrap();
        let (tx, rx) = watch::channel(false);
        let running = tokio::spawn(node.run(rx));

        coordinator
            .publish_typed("w1", &[EchoTask { message: "a".into() }, EchoTask { message: "b".into() }])
            .await
            .unwrap();

        let mut collected = Vec::new();
        for _ in 0..200 {
            collected.extend(coordinator.collect_results("w1").await.unwrap());
            if collected.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(collected.len(), 2);
        assert!(collected.iter().all(|r| r.outcome.is_success()));

        tx.send(true).unwrap();
        running.await.unwrap().unwrap();

        let status = coordinator.status("w1").await.unwrap().unwrap();
        assert_eq!(status.tasks_executed, 2);
        assert!(status.listener.is_none());
    }

    struct AlwaysFatal;

    #[async_trait]
    impl Dispatch for AlwaysFatal {
        async fn dispatch(&self, _conn: Connection) -> std::result::Result<(), DispatchError> {
            Err(DispatchError::Fatal("injected".into()))
        }
    }

    async fn poke(port: u16) {
        let frame = handshake::encode("tester").unwrap();
        for _ in 0..100 {
            if let Ok(mut stream) = TcpStream::connect(("127.0.0.1", port)).await {
                if stream.write_all(&frame).await.is_ok() {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("listener never accepted");
    }

    #[tokio::test]
    async fn terminated_listener_ends_run() {
        let port = {
            let free = StdListener::bind("127.0.0.1:0").unwrap();
            free.local_addr().unwrap().port()
        };
        let mut config = config(true);
        config.listener.input = format!("127.0.0.1:{port}");
        config.listener.supervision_window_ms = 10_000;

        let node = NodeBuilder::new(config)
            .with_store(Arc::new(MemoryStore::new()))
            .with_dispatch(Arc::new(AlwaysFatal))
            .build()
            .await
            .unwrap();
        let (_tx, rx) = watch::channel(false);
        let running = tokio::spawn(node.run(rx));

        // generation 1 を落とし、監視中の generation 2 も落とす
        poke(port).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        poke(port).await;

        let result = tokio::time::timeout(Duration::from_secs(10), running)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(Error::ListenerTerminated { .. })));
    }
}
