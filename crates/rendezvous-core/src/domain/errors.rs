//! Errors - エラー型と分類
//!
//! One error enum for the whole substrate. Every variant maps onto an
//! operational [`ErrorKind`] so callers can decide between retrying and
//! giving up without matching on individual variants.

use std::time::Duration;

/// The result type used throughout rendezvous.
pub type Result<T> = std::result::Result<T, Error>;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（リトライ推奨）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（Store / socket の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The Store could not be reached or rejected the request.
    #[error("store unavailable: {message}")]
    StoreUnavailable {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The deadline passed while waiting for a lock blob to clear.
    #[error("timed out waiting for lock {path} after {waited:?}")]
    LockTimeout { path: String, waited: Duration },

    /// The queue blob could not be parsed.
    #[error("queue blob {path} is corrupt: {reason}")]
    QueueCorrupt { path: String, reason: String },

    /// A task string that cannot be represented in the queue blob.
    #[error("invalid task {task:?}: {reason}")]
    InvalidTask { task: String, reason: String },

    /// Both the live operation and the reconstruction of a resource failed.
    #[error("resource repair failed: {message}")]
    ResourceRepairFailed {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The listener chain gave up after a failed repair cycle.
    #[error("listener terminated: {reason}")]
    ListenerTerminated { reason: String },

    #[error("handler not found for task kind={0}")]
    HandlerNotFound(String),

    #[error("task execution failed for {task}: {message}")]
    Execution { task: String, message: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn store(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: None,
        }
    }

    pub fn store_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::QueueCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_task(task: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTask {
            task: task.into(),
            reason: reason.into(),
        }
    }

    /// Operational classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::StoreUnavailable { .. } | Error::LockTimeout { .. } => ErrorKind::Transient,
            Error::Io(_) | Error::ResourceRepairFailed { .. } | Error::ListenerTerminated { .. } => {
                ErrorKind::Infrastructure
            }
            Error::NotFound(_)
            | Error::QueueCorrupt { .. }
            | Error::InvalidTask { .. }
            | Error::HandlerNotFound(_)
            | Error::Execution { .. }
            | Error::Config(_) => ErrorKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}
