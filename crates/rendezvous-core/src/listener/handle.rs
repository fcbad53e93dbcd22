//! SelfHealingListener - 常に最新 generation を指す安定ハンドル
//!
//! Callers never hold a generation directly. When a generation fails it binds
//! a successor on the same addresses and republishes it here, so the handle
//! keeps working across repairs.
//!
//! # 使用例
//! ```ignore
//! let registry = Arc::new(ConnectionRegistry::new(Arc::new(LoggingSession)));
//! let listener = SelfHealingListener::start(options, registry, span).await?;
//! let final_state = listener.finished().await;
//! ```

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tracing::{Span, info, warn};

use crate::domain::errors::Result;
use crate::domain::state::{GenerationState, ListenerState};
use crate::listener::generation::{Generation, Sockets};
use crate::listener::registry::Dispatch;

/// Addresses and timings for a listener chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerOptions {
    pub input: SocketAddr,
    pub output: Option<SocketAddr>,
    /// Limit for the handshake and for the paired output connection.
    pub accept_timeout: Duration,
    /// How long a parent watches its successor before detaching.
    pub supervision_window: Duration,
    /// Bound on waiting for the accept loop in `close`.
    pub join_timeout: Duration,
}

impl ListenerOptions {
    pub fn new(input: SocketAddr) -> Self {
        Self {
            input,
            output: None,
            accept_timeout: Duration::from_secs(10),
            supervision_window: Duration::from_secs(60),
            join_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_output(mut self, output: SocketAddr) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_supervision_window(mut self, window: Duration) -> Self {
        self.supervision_window = window;
        self
    }

    pub fn with_accept_timeout(mut self, timeout: Duration) -> Self {
        self.accept_timeout = timeout;
        self
    }
}

/// Snapshot of the generation the handle currently points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerationInfo {
    pub number: u64,
    pub state: GenerationState,
    /// A parent is still supervising this generation.
    pub supervised: bool,
    pub closed: bool,
}

pub(crate) struct Shared {
    pub(crate) options: ListenerOptions,
    pub(crate) dispatch: Arc<dyn Dispatch>,
    pub(crate) closing: AtomicBool,
    /// Number of generations started so far.
    pub(crate) generations: AtomicU64,
    pub(crate) span: Span,
    current: Mutex<Option<Arc<Generation>>>,
    state_tx: watch::Sender<ListenerState>,
}

impl Shared {
    fn current(&self) -> MutexGuard<'_, Option<Arc<Generation>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Publishes `state` if `generation` is the one the handle points at.
    pub(crate) fn publish(&self, generation: &Generation, state: GenerationState) {
        let current = self.current();
        if current.as_ref().is_some_and(|g| g.number == generation.number) {
            self.state_tx.send_replace(ListenerState::Active {
                generation: generation.number,
                state,
            });
        }
    }

    /// Makes `generation` current and starts it. Refuses once closing.
    pub(crate) fn install(self: &Arc<Self>, generation: &Arc<Generation>, sockets: Sockets) -> bool {
        let mut current = self.current();
        if self.closing.load(Ordering::SeqCst) {
            return false;
        }
        *current = Some(generation.clone());
        self.state_tx.send_replace(ListenerState::Active {
            generation: generation.number,
            state: generation.state(),
        });
        generation.launch(self, sockets);
        true
    }

    /// The chain gave up after `generation` failed.
    pub(crate) fn terminate(&self, generation: u64) {
        let mut current = self.current();
        if self.closing.load(Ordering::SeqCst) {
            return;
        }
        if current.as_ref().is_some_and(|g| g.number == generation) {
            *current = None;
            self.state_tx.send_replace(ListenerState::Terminated);
        }
    }
}

/// Stable handle over a chain of listener generations.
#[derive(Clone)]
pub struct SelfHealingListener {
    shared: Arc<Shared>,
    input_addr: SocketAddr,
    output_addr: Option<SocketAddr>,
}

impl SelfHealingListener {
    /// Binds the first generation and starts accepting.
    ///
    /// Bind errors are returned here; later failures are repaired.
    pub async fn start(
        options: ListenerOptions,
        dispatch: Arc<dyn Dispatch>,
        span: Span,
    ) -> Result<Self> {
        let sockets = Sockets::bind(options.input, options.output).await?;
        let (input_addr, output_addr) = sockets.local_addrs()?;
        span.in_scope(|| info!(%input_addr, ?output_addr, "listener bound"));

        let (state_tx, _) = watch::channel(ListenerState::Active {
            generation: 1,
            state: GenerationState::Starting,
        });
        let shared = Arc::new(Shared {
            options,
            dispatch,
            closing: AtomicBool::new(false),
            generations: AtomicU64::new(1),
            span,
            current: Mutex::new(None),
            state_tx,
        });

        // 以降の generation は解決済みの address に bind する
        let first = Generation::new(1, input_addr, output_addr, None);
        shared.install(&first, sockets);

        Ok(Self {
            shared,
            input_addr,
            output_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.input_addr
    }

    pub fn output_addr(&self) -> Option<SocketAddr> {
        self.output_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state_tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ListenerState> {
        self.shared.state_tx.subscribe()
    }

    /// The generation callers are currently routed to.
    pub fn current(&self) -> Option<GenerationInfo> {
        let current = self.shared.current().clone();
        current.map(|g| GenerationInfo {
            number: g.number,
            state: g.state(),
            supervised: g.has_parent(),
            closed: g.is_closed(),
        })
    }

    /// Number of generations started, including the first.
    pub fn generations_started(&self) -> u64 {
        self.shared.generations.load(Ordering::SeqCst)
    }

    /// Waits until the chain is `Stopped` or `Terminated`.
    pub async fn finished(&self) -> ListenerState {
        let mut rx = self.subscribe();
        let result = rx
            .wait_for(|state| matches!(state, ListenerState::Stopped | ListenerState::Terminated))
            .await
            .map(|state| *state);
        // sender は self.shared が持っているので閉じない
        result.unwrap_or(ListenerState::Terminated)
    }

    /// Stops the current generation without repair and waits (bounded) for
    /// its accept loop to exit.
    pub async fn close(&self) {
        self.shared.closing.store(true, Ordering::SeqCst);
        let current = self.shared.current().clone();
        if let Some(generation) = current {
            generation.stop();
            if let Some(task) = generation.take_task() {
                let timeout = self.shared.options.join_timeout;
                match tokio::time::timeout(timeout, task).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(error = %e, "accept loop task ended abnormally"),
                    Err(_) => warn!(?timeout, "accept loop did not stop within join timeout"),
                }
            }
        }

        let mut current = self.shared.current();
        *current = None;
        let terminated = matches!(*self.shared.state_tx.borrow(), ListenerState::Terminated);
        if !terminated {
            self.shared.state_tx.send_replace(ListenerState::Stopped);
        }
    }

    #[cfg(test)]
    pub(crate) fn current_generation(&self) -> Option<Arc<Generation>> {
        self.shared.current().clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    use super::*;
    use crate::listener::handshake;
    use crate::listener::registry::{Connection, DispatchError};

    /// Records client names; a client named "boom" kills the generation.
    struct Sink {
        seen: mpsc::UnboundedSender<String>,
        fatal: AtomicUsize,
    }

    #[async_trait]
    impl Dispatch for Sink {
        async fn dispatch(&self, conn: Connection) -> std::result::Result<(), DispatchError> {
            if conn.name == "boom" {
                self.fatal.fetch_add(1, Ordering::SeqCst);
                return Err(DispatchError::Fatal("injected".into()));
            }
            if conn.name == "nope" {
                return Err(DispatchError::Rejected("not welcome".into()));
            }
            let _ = self.seen.send(conn.name);
            Ok(())
        }
    }

    fn sink() -> (Arc<Sink>, mpsc::UnboundedReceiver<String>) {
        let (seen, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Sink {
                seen,
                fatal: AtomicUsize::new(0),
            }),
            rx,
        )
    }

    fn options(window: Duration) -> ListenerOptions {
        ListenerOptions::new("127.0.0.1:0".parse().unwrap())
            .with_supervision_window(window)
            .with_accept_timeout(Duration::from_secs(2))
    }

    async fn hello(addr: SocketAddr, name: &str) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&handshake::encode(name).unwrap())
            .await
            .unwrap();
        stream
    }

    async fn wait_until(listener: &SelfHealingListener, want: impl Fn(ListenerState) -> bool) {
        let mut rx = listener.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| want(*s)))
            .await
            .expect("listener state did not change in time")
            .unwrap();
    }

    fn running(generation: u64) -> impl Fn(ListenerState) -> bool {
        move |s| {
            s == ListenerState::Active {
                generation,
                state: GenerationState::Running,
            }
        }
    }

    #[tokio::test]
    async fn accepted_connections_reach_dispatch() {
        let (sink, mut seen) = sink();
        let listener = SelfHealingListener::start(options(Duration::from_secs(60)), sink, Span::none())
            .await
            .unwrap();
        wait_until(&listener, running(1)).await;

        let _nope = hello(listener.local_addr(), "nope").await;
        let _client = hello(listener.local_addr(), "coordinator").await;
        assert_eq!(seen.recv().await.unwrap(), "coordinator");
        assert_eq!(listener.generations_started(), 1);
        listener.close().await;
    }

    #[tokio::test]
    async fn close_while_running_stops_without_child() {
        let (sink, _seen) = sink();
        let listener = SelfHealingListener::start(options(Duration::from_secs(60)), sink, Span::none())
            .await
            .unwrap();
        wait_until(&listener, running(1)).await;

        listener.close().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.finished().await, ListenerState::Stopped);
        assert_eq!(listener.generations_started(), 1);
        assert!(listener.current().is_none());
        assert!(TcpStream::connect(listener.local_addr()).await.is_err());
    }

    #[tokio::test]
    async fn fatal_dispatch_spawns_exactly_one_child_on_same_address() {
        let (sink, mut seen) = sink();
        let listener =
            SelfHealingListener::start(options(Duration::from_secs(60)), sink.clone(), Span::none())
                .await
                .unwrap();
        wait_until(&listener, running(1)).await;
        let addr = listener.local_addr();

        let _boom = hello(addr, "boom").await;
        wait_until(&listener, running(2)).await;
        assert_eq!(listener.generations_started(), 2);
        assert_eq!(listener.local_addr(), addr);
        assert!(listener.current().unwrap().supervised);

        let _client = hello(addr, "after-repair").await;
        assert_eq!(seen.recv().await.unwrap(), "after-repair");
        assert_eq!(sink.fatal.load(Ordering::SeqCst), 1);
        listener.close().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn surviving_child_detaches_and_parent_is_released() {
        let (sink, _seen) = sink();
        let listener =
            SelfHealingListener::start(options(Duration::from_millis(300)), sink, Span::none())
                .await
                .unwrap();
        wait_until(&listener, running(1)).await;
        let parent = Arc::downgrade(&listener.current_generation().unwrap());

        let _boom = hello(listener.local_addr(), "boom").await;
        wait_until(&listener, running(2)).await;

        let mut detached = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let current = listener.current().unwrap();
            if !current.supervised && parent.upgrade().is_none() {
                detached = true;
                break;
            }
        }
        assert!(detached, "parent generation still reachable after the window");
        assert_eq!(listener.current().unwrap().number, 2);
        listener.close().await;
    }

    #[tokio::test]
    async fn child_failing_inside_window_terminates_chain() {
        let (sink, _seen) = sink();
        let listener = SelfHealingListener::start(options(Duration::from_secs(30)), sink, Span::none())
            .await
            .unwrap();
        wait_until(&listener, running(1)).await;

        let _first = hello(listener.local_addr(), "boom").await;
        wait_until(&listener, running(2)).await;
        let _second = hello(listener.local_addr(), "boom").await;

        let state = tokio::time::timeout(Duration::from_secs(5), listener.finished())
            .await
            .unwrap();
        assert_eq!(state, ListenerState::Terminated);
        assert_eq!(listener.generations_started(), 2);
        assert!(listener.current().is_none());
    }

    #[tokio::test]
    async fn child_failing_after_window_repairs_again() {
        let (sink, _seen) = sink();
        let listener =
            SelfHealingListener::start(options(Duration::from_millis(100)), sink, Span::none())
                .await
                .unwrap();
        wait_until(&listener, running(1)).await;

        let _first = hello(listener.local_addr(), "boom").await;
        wait_until(&listener, running(2)).await;
        for _ in 0..100 {
            if !listener.current().unwrap().supervised {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let _second = hello(listener.local_addr(), "boom").await;
        wait_until(&listener, running(3)).await;
        assert_eq!(listener.generations_started(), 3);
        listener.close().await;
    }

    #[tokio::test]
    async fn output_socket_is_paired_after_handshake() {
        struct Paired(mpsc::UnboundedSender<bool>);
        #[async_trait]
        impl Dispatch for Paired {
            async fn dispatch(&self, conn: Connection) -> std::result::Result<(), DispatchError> {
                let _ = self.0.send(conn.output.is_some());
                Ok(())
            }
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let opts = options(Duration::from_secs(60)).with_output("127.0.0.1:0".parse().unwrap());
        let listener = SelfHealingListener::start(opts, Arc::new(Paired(tx)), Span::none())
            .await
            .unwrap();
        let output = listener.output_addr().unwrap();

        let _input = hello(listener.local_addr(), "coordinator").await;
        let _output = TcpStream::connect(output).await.unwrap();
        assert!(rx.recv().await.unwrap());
        listener.close().await;
    }
}
