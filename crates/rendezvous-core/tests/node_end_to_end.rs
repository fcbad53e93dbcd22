//! Coordinator and worker node sharing a directory store, plus a client
//! talking to the node's listener over a self-repairing link.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use rendezvous_core::app::{Coordinator, NodeBuilder};
use rendezvous_core::config::NodeConfig;
use rendezvous_core::domain::{ListenerState, OutcomeKind};
use rendezvous_core::impls::FsStore;
use rendezvous_core::listener::{
    ConnectionRegistry, ListenerOptions, LoggingSession, SelfHealingListener,
};
use rendezvous_core::repair;
use rendezvous_core::typed::Task;
use rendezvous_core::typed::builtin::{EchoTask, FailTask};

#[tokio::test]
async fn worker_runs_tasks_published_through_shared_directory() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("store");

    let mut config = NodeConfig::default();
    config.node.name = "worker-1".into();
    config.store.root = root.clone();
    config.lock.poll_base_ms = 10;
    config.lock.poll_max_ms = 40;
    config.worker.poll_interval_ms = 25;
    config.worker.status_interval_ms = 25;
    config.listener.input = "127.0.0.1:0".into();
    config.worker.expected_kinds = vec![EchoTask::KIND.into()];

    let coordinator = Coordinator::new(
        Arc::new(FsStore::open(root).await.unwrap()),
        config.lock.poll_policy(),
    );
    coordinator.register_node("worker-1").await.unwrap();
    assert_eq!(coordinator.nodes().await.unwrap(), vec!["worker-1"]);

    let node = NodeBuilder::new(config)
        .with_builtins()
        .unwrap()
        .build()
        .await
        .unwrap();
    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn(node.run(rx));

    coordinator
        .publish_typed("worker-1", &[EchoTask { message: "hello".into() }])
        .await
        .unwrap();
    coordinator
        .publish_typed("worker-1", &[FailTask { reason: "expected".into() }])
        .await
        .unwrap();

    let mut results = Vec::new();
    for _ in 0..400 {
        results.extend(coordinator.collect_results("worker-1").await.unwrap());
        if results.len() >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let kinds: Vec<_> = results.iter().map(|r| r.outcome.kind).collect();
    assert_eq!(kinds, vec![OutcomeKind::Success, OutcomeKind::Failure]);

    // status は listener 付きで公開される
    let status = coordinator.status("worker-1").await.unwrap().unwrap();
    assert_eq!(status.generation, Some(1));

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let status = coordinator.status("worker-1").await.unwrap().unwrap();
    assert_eq!(status.tasks_executed, 2);
    assert_eq!(status.tasks_failed, 1);
    assert_eq!(status.listener, Some(ListenerState::Stopped));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn repairable_link_registers_a_session() {
    let registry = Arc::new(ConnectionRegistry::new(Arc::new(LoggingSession)));
    let listener = SelfHealingListener::start(
        ListenerOptions::new("127.0.0.1:0".parse().unwrap()),
        registry.clone(),
        tracing::info_span!("test-listener"),
    )
    .await
    .unwrap();
    let addr = listener.local_addr();

    let writer = tokio::task::spawn_blocking(move || {
        let mut link = repair::connect(addr, "coordinator", Duration::from_secs(5)).unwrap();
        writeln!(link, "status").unwrap();
        link.flush().unwrap();
        link
    })
    .await
    .unwrap();

    let mut found = false;
    for _ in 0..200 {
        if registry.session("coordinator").is_some() {
            found = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(found, "session was never registered");
    assert_eq!(writer.repairs(), 0);

    listener.close().await;
    assert_eq!(listener.state(), ListenerState::Stopped);
}
