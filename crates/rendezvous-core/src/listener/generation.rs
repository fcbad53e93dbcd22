//! Generation - listener chain の 1 世代
//!
//! # 状態遷移
//! - Starting → Running → Stopped: close() による正常終了
//! - Starting → Running → Failed → Repairing: 子 generation を起動して監視
//! - 親がいる間に Failed: 親に報告して終了（親が Terminated にする）
//!
//! The stop flag, the closed flag and the parent link form one critical
//! section under [`Generation::inner`]. A child reporting its failure and a
//! parent detaching after the supervision window both go through it, so
//! exactly one of them wins.

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, warn};

use crate::domain::state::GenerationState;
use crate::listener::handle::Shared;
use crate::listener::handshake;
use crate::listener::registry::{Connection, DispatchError};

/// Listening sockets owned by one generation's accept loop.
pub(crate) struct Sockets {
    input: TcpListener,
    output: Option<TcpListener>,
}

impl Sockets {
    pub(crate) async fn bind(input: SocketAddr, output: Option<SocketAddr>) -> std::io::Result<Self> {
        let input = TcpListener::bind(input).await?;
        let output = match output {
            Some(addr) => Some(TcpListener::bind(addr).await?),
            None => None,
        };
        Ok(Self { input, output })
    }

    /// Resolved addresses (port 0 becomes the real port).
    pub(crate) fn local_addrs(&self) -> std::io::Result<(SocketAddr, Option<SocketAddr>)> {
        let input = self.input.local_addr()?;
        let output = match &self.output {
            Some(listener) => Some(listener.local_addr()?),
            None => None,
        };
        Ok((input, output))
    }
}

/// Sent by a child that fails while its parent is still supervising.
#[derive(Debug)]
pub(crate) struct ChildReport {
    pub generation: u64,
    pub reason: String,
}

struct Inner {
    state: GenerationState,
    stop: bool,
    closed: bool,
    parent: Option<oneshot::Sender<ChildReport>>,
}

pub(crate) struct Generation {
    pub(crate) number: u64,
    input_addr: SocketAddr,
    output_addr: Option<SocketAddr>,
    inner: Mutex<Inner>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

enum Exit {
    Stopped,
    Failed(String),
}

impl Generation {
    pub(crate) fn new(
        number: u64,
        input_addr: SocketAddr,
        output_addr: Option<SocketAddr>,
        parent: Option<oneshot::Sender<ChildReport>>,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            number,
            input_addr,
            output_addr,
            inner: Mutex::new(Inner {
                state: GenerationState::Starting,
                stop: false,
                closed: false,
                parent,
            }),
            shutdown,
            task: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> GenerationState {
        self.lock().state
    }

    pub(crate) fn has_parent(&self) -> bool {
        self.lock().parent.is_some()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Sets the stop flag and closes the sockets; the accept loop then exits
    /// as `Stopped`.
    pub(crate) fn stop(&self) {
        {
            let mut inner = self.lock();
            inner.stop = true;
            inner.closed = true;
        }
        self.shutdown.send_replace(true);
    }

    pub(crate) fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Clears the parent link. Returns false if the child already used it.
    fn detach_parent(&self) -> bool {
        self.lock().parent.take().is_some()
    }

    fn transition(&self, shared: &Shared, state: GenerationState) {
        self.lock().state = state;
        shared.publish(self, state);
    }

    /// Spawns the accept loop. The caller holds the handle's current-generation
    /// lock, so nothing can observe the generation before its task exists.
    pub(crate) fn launch(self: &Arc<Self>, shared: &Arc<Shared>, sockets: Sockets) {
        let span = tracing::info_span!(
            parent: &shared.span,
            "generation",
            generation = self.number,
            addr = %self.input_addr
        );
        let task = tokio::spawn(self.clone().run(shared.clone(), sockets).instrument(span));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
    }

    async fn run(self: Arc<Self>, shared: Arc<Shared>, sockets: Sockets) {
        self.transition(&shared, GenerationState::Running);
        info!(output = ?self.output_addr, "listener accepting");

        let outcome = self.accept_loop(&shared, &sockets).await;
        // 子が同じ address に bind できるよう先に閉じる
        drop(sockets);

        let exit = match outcome {
            Ok(()) => Exit::Stopped,
            Err(_) if self.lock().stop => Exit::Stopped,
            Err(reason) => Exit::Failed(reason),
        };

        match exit {
            Exit::Stopped => {
                // 親へのリンクを drop: 親からは正常終了に見える
                let parent = {
                    let mut inner = self.lock();
                    inner.closed = true;
                    inner.parent.take()
                };
                drop(parent);
                self.transition(&shared, GenerationState::Stopped);
                info!("listener stopped");
            }
            Exit::Failed(reason) => {
                error!(%reason, "listener failed");
                let reported = {
                    let mut inner = self.lock();
                    inner.closed = true;
                    match inner.parent.take() {
                        Some(parent) => parent
                            .send(ChildReport {
                                generation: self.number,
                                reason: reason.clone(),
                            })
                            .is_ok(),
                        None => false,
                    }
                };
                self.transition(&shared, GenerationState::Failed);
                if !reported {
                    self.repair(&shared).await;
                }
            }
        }
    }

    async fn accept_loop(&self, shared: &Shared, sockets: &Sockets) -> Result<(), String> {
        let mut shutdown = self.shutdown.subscribe();
        loop {
            let (stream, peer) = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => return Ok(()),
                accepted = sockets.input.accept() => {
                    accepted.map_err(|e| format!("accept on input socket failed: {e}"))?
                }
            };
            debug!(%peer, "accepted connection");

            let conn = tokio::select! {
                biased;
                () = stopped(&mut shutdown) => return Ok(()),
                conn = self.open_connection(shared, stream, peer, sockets.output.as_ref()) => conn,
            };
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(%peer, error = %e, "dropping connection");
                    continue;
                }
            };

            match shared.dispatch.dispatch(conn).await {
                Ok(()) => {}
                Err(DispatchError::Rejected(reason)) => warn!(%peer, %reason, "connection rejected"),
                Err(DispatchError::Fatal(reason)) => return Err(reason),
            }
        }
    }

    /// Reads the handshake and, when configured, pairs the output socket.
    async fn open_connection(
        &self,
        shared: &Shared,
        mut input: TcpStream,
        peer: SocketAddr,
        output: Option<&TcpListener>,
    ) -> std::io::Result<Connection> {
        let timeout = shared.options.accept_timeout;
        let name = tokio::time::timeout(timeout, handshake::read_name(&mut input))
            .await
            .map_err(|_| timed_out("handshake"))??;

        let output = match output {
            Some(listener) => {
                let (stream, _) = tokio::time::timeout(timeout, listener.accept())
                    .await
                    .map_err(|_| timed_out("output socket accept"))??;
                Some(stream)
            }
            None => None,
        };

        Ok(Connection {
            name,
            peer,
            input,
            output,
        })
    }

    /// Binds a successor on the same addresses and supervises it.
    async fn repair(self: &Arc<Self>, shared: &Arc<Shared>) {
        if shared.closing.load(Ordering::SeqCst) {
            self.transition(shared, GenerationState::Stopped);
            return;
        }
        self.transition(shared, GenerationState::Repairing);

        let sockets = match Sockets::bind(self.input_addr, self.output_addr).await {
            Ok(sockets) => sockets,
            Err(e) => {
                error!(error = %e, "cannot rebind listener; giving up");
                shared.terminate(self.number);
                return;
            }
        };

        let (report_tx, report_rx) = oneshot::channel();
        let number = shared.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let child = Generation::new(number, self.input_addr, self.output_addr, Some(report_tx));
        if !shared.install(&child, sockets) {
            info!("listener closing; successor not started");
            return;
        }
        warn!(child = number, "started successor generation");

        self.supervise(shared, child, report_rx).await;
    }

    async fn supervise(
        &self,
        shared: &Shared,
        child: Arc<Generation>,
        mut report_rx: oneshot::Receiver<ChildReport>,
    ) {
        let window = shared.options.supervision_window;
        let report = tokio::select! {
            report = &mut report_rx => report.ok(),
            _ = tokio::time::sleep(window) => {
                if child.detach_parent() {
                    info!(child = child.number, "successor survived supervision window; detaching");
                    return;
                }
                // 子が先にリンクを使った: 報告済みか正常終了
                report_rx.try_recv().ok()
            }
        };

        match report {
            Some(report) => {
                error!(
                    child = report.generation,
                    reason = %report.reason,
                    "successor failed within supervision window; giving up"
                );
                shared.terminate(report.generation);
            }
            None => debug!(child = child.number, "successor stopped"),
        }
    }
}

/// Resolves once the stop signal is raised (or its sender is gone).
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn timed_out(what: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, format!("{what} timed out"))
}
