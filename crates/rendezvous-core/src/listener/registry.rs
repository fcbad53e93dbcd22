//! ConnectionRegistry - 名前 → session の対応表
//!
//! The listener hands every accepted connection to a [`Dispatch`]. The
//! registry is the node's dispatch: it gives each named client one live
//! session, replacing the old session when a known name connects again.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{Instrument, Span, debug, info, warn};

use crate::domain::errors::Result;
use crate::domain::ids::SessionId;

/// An accepted, handshaken client connection.
#[derive(Debug)]
pub struct Connection {
    pub name: String,
    pub peer: SocketAddr,
    pub input: TcpStream,
    /// Present when the listener has an output socket.
    pub output: Option<TcpStream>,
}

/// Why a connection could not be handed off.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// This connection is dropped; the listener keeps accepting.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The listener generation cannot continue and must be repaired.
    #[error("dispatch failed: {0}")]
    Fatal(String),
}

/// Consumer of accepted connections.
#[async_trait]
pub trait Dispatch: Send + Sync + 'static {
    async fn dispatch(&self, conn: Connection) -> std::result::Result<(), DispatchError>;
}

/// Serves one client session until it ends.
#[async_trait]
pub trait SessionHandler: Send + Sync + 'static {
    async fn serve(&self, id: SessionId, conn: Connection) -> Result<()>;
}

/// What the registry knows about a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub name: String,
    pub peer: SocketAddr,
    pub since: DateTime<Utc>,
}

struct Entry {
    info: SessionInfo,
    task: JoinHandle<()>,
}

type Sessions = Arc<Mutex<HashMap<String, Entry>>>;

pub struct ConnectionRegistry {
    handler: Arc<dyn SessionHandler>,
    sessions: Sessions,
    span: Span,
}

impl ConnectionRegistry {
    pub fn new(handler: Arc<dyn SessionHandler>) -> Self {
        Self::with_span(handler, tracing::info_span!("registry"))
    }

    pub fn with_span(handler: Arc<dyn SessionHandler>, span: Span) -> Self {
        Self {
            handler,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            span,
        }
    }

    /// Starts a session for `conn`, replacing any session under the same
    /// name.
    pub fn establish(&self, conn: Connection) -> SessionId {
        let id = SessionId::generate();
        let info = SessionInfo {
            id,
            name: conn.name.clone(),
            peer: conn.peer,
            since: Utc::now(),
        };

        let mut sessions = lock(&self.sessions);
        // map を握ったまま spawn: 終了した task の remove は insert の後になる
        let task = {
            let handler = self.handler.clone();
            let registry = self.sessions.clone();
            let name = conn.name.clone();
            let span = tracing::info_span!(parent: &self.span, "session", client = %name, %id);
            tokio::spawn(
                async move {
                    match handler.serve(id, conn).await {
                        Ok(()) => debug!("session ended"),
                        Err(e) => warn!(error = %e, "session ended with error"),
                    }
                    let mut sessions = lock(&registry);
                    if sessions.get(&name).is_some_and(|entry| entry.info.id == id) {
                        sessions.remove(&name);
                    }
                }
                .instrument(span),
            )
        };

        let _entered = self.span.enter();
        match sessions.insert(info.name.clone(), Entry { info, task }) {
            Some(old) => {
                old.task.abort();
                info!(client = %old.info.name, old = %old.info.id, new = %id, "re-established connection");
            }
            None => info!(%id, "new connection"),
        }
        id
    }

    pub fn session(&self, name: &str) -> Option<SessionInfo> {
        lock(&self.sessions).get(name).map(|entry| entry.info.clone())
    }

    /// Live sessions, sorted by client name.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        let mut infos: Vec<_> = lock(&self.sessions)
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn len(&self) -> usize {
        lock(&self.sessions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ends the session for `name`. Returns whether one existed.
    pub fn disconnect(&self, name: &str) -> bool {
        match lock(&self.sessions).remove(name) {
            Some(entry) => {
                entry.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn disconnect_all(&self) {
        for (_, entry) in lock(&self.sessions).drain() {
            entry.task.abort();
        }
    }
}

impl Drop for ConnectionRegistry {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

#[async_trait]
impl Dispatch for ConnectionRegistry {
    async fn dispatch(&self, conn: Connection) -> std::result::Result<(), DispatchError> {
        self.establish(conn);
        Ok(())
    }
}

fn lock(sessions: &Sessions) -> MutexGuard<'_, HashMap<String, Entry>> {
    sessions.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reads command lines from the input stream and logs them; acknowledges each
/// line on the output stream when there is one.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSession;

#[async_trait]
impl SessionHandler for LoggingSession {
    async fn serve(&self, _id: SessionId, conn: Connection) -> Result<()> {
        let Connection { input, output, .. } = conn;
        let mut lines = BufReader::new(input).lines();
        let mut output = output;
        while let Some(line) = lines.next_line().await? {
            info!(command = %line, "command received");
            if let Some(out) = output.as_mut() {
                out.write_all(b"ok\n").await?;
            }
        }
        Ok(())
    }
}
