//! RepairableResource - recipe から作り直せるリソースのラッパー
//!
//! # 学習ポイント
//! - recipe は zero-argument の factory closure（FnMut）
//! - 操作が失敗したら 1 回だけ再構築して 1 回だけ retry。ループしない
//! - 再構築した instance は初期状態から始まる（stream position などは失われる）
//!
//! The old instance is dropped before the recipe runs, so a socket is closed
//! before its replacement connects.

use std::fmt;

use tracing::{Span, debug, warn};

/// Why a wrapped operation failed for good.
#[derive(Debug)]
pub enum RepairError<E> {
    /// The operation failed and the recipe could not build a replacement.
    Reconstruct { original: E, repair: E },
    /// The operation failed, the resource was rebuilt, and the retry failed.
    Retry { original: E, retry: E },
    /// No instance exists (an earlier repair failed) and building one failed.
    Unavailable { repair: E },
    /// No instance existed; one was built and the operation on it failed.
    Rebuilt { retry: E },
}

impl<E> RepairError<E> {
    /// The error that started the repair cycle, if there was a live operation.
    pub fn original(&self) -> Option<&E> {
        match self {
            RepairError::Reconstruct { original, .. } | RepairError::Retry { original, .. } => {
                Some(original)
            }
            RepairError::Unavailable { .. } | RepairError::Rebuilt { .. } => None,
        }
    }

    /// The most recent error.
    pub fn last(&self) -> &E {
        match self {
            RepairError::Reconstruct { repair, .. } | RepairError::Unavailable { repair } => repair,
            RepairError::Retry { retry, .. } | RepairError::Rebuilt { retry } => retry,
        }
    }
}

impl<E: fmt::Display> fmt::Display for RepairError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairError::Reconstruct { original, repair } => {
                write!(f, "repair failure: {original}; reconstruction failed: {repair}")
            }
            RepairError::Retry { original, retry } => {
                write!(f, "repair failure: {original}; retry after reconstruction failed: {retry}")
            }
            RepairError::Unavailable { repair } => {
                write!(f, "resource unavailable: reconstruction failed: {repair}")
            }
            RepairError::Rebuilt { retry } => {
                write!(f, "repair failure: operation on rebuilt resource failed: {retry}")
            }
        }
    }
}

impl<E> std::error::Error for RepairError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepairError::Reconstruct { original, .. } | RepairError::Retry { original, .. } => {
                Some(original)
            }
            RepairError::Unavailable { repair } => Some(repair),
            RepairError::Rebuilt { retry } => Some(retry),
        }
    }
}

impl<E> From<RepairError<E>> for crate::domain::errors::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: RepairError<E>) -> Self {
        crate::domain::errors::Error::ResourceRepairFailed {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

/// A resource that rebuilds itself from its recipe when an operation fails.
///
/// # 使用例
/// ```ignore
/// let mut conn = RepairableResource::new(move || TcpStream::connect(addr))?;
/// conn.call(|s| s.write_all(b"ping"))?;
/// ```
pub struct RepairableResource<T, E> {
    recipe: Box<dyn FnMut() -> Result<T, E> + Send>,
    current: Option<T>,
    repairs: u64,
    span: Span,
}

impl<T, E: fmt::Display> RepairableResource<T, E> {
    /// Builds the first instance. Fails with the recipe's own error.
    pub fn new<F>(recipe: F) -> Result<Self, E>
    where
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        Self::with_span(recipe, tracing::debug_span!("repairable"))
    }

    pub fn with_span<F>(mut recipe: F, span: Span) -> Result<Self, E>
    where
        F: FnMut() -> Result<T, E> + Send + 'static,
    {
        let first = recipe()?;
        Ok(Self {
            recipe: Box::new(recipe),
            current: Some(first),
            repairs: 0,
            span,
        })
    }

    /// Runs `op` against the live instance, repairing and retrying once on
    /// failure.
    ///
    /// With no live instance (an earlier repair failed) the rebuild comes
    /// first and is the only one: if `op` then fails the error is returned as
    /// `Rebuilt`.
    pub fn call<R, F>(&mut self, mut op: F) -> Result<R, RepairError<E>>
    where
        F: FnMut(&mut T) -> Result<R, E>,
    {
        let original = match self.current.as_mut() {
            Some(instance) => match op(instance) {
                Ok(value) => return Ok(value),
                Err(e) => e,
            },
            None => {
                let instance = self
                    .rebuild()
                    .map_err(|repair| RepairError::Unavailable { repair })?;
                return op(instance).map_err(|retry| RepairError::Rebuilt { retry });
            }
        };
        self.recover(original, op)
    }

    /// Rebuilds after `op` failed with `original` and runs it once more.
    pub(crate) fn recover<R, F>(&mut self, original: E, mut op: F) -> Result<R, RepairError<E>>
    where
        F: FnMut(&mut T) -> Result<R, E>,
    {
        self.span
            .in_scope(|| warn!(error = %original, "operation failed, reconstructing resource"));
        let instance = match self.rebuild() {
            Ok(instance) => instance,
            Err(repair) => return Err(RepairError::Reconstruct { original, repair }),
        };
        op(instance).map_err(|retry| RepairError::Retry { original, retry })
    }

    /// Drops the current instance and builds a fresh one from the recipe.
    ///
    /// On failure the resource holds no instance until the next successful
    /// repair.
    pub fn repair(&mut self) -> Result<(), E> {
        self.rebuild().map(|_| ())
    }

    fn rebuild(&mut self) -> Result<&mut T, E> {
        self.current = None;
        let fresh = (self.recipe)()?;
        self.repairs += 1;
        let repairs = self.repairs;
        self.span
            .in_scope(|| debug!(repairs, "resource reconstructed"));
        Ok(self.current.insert(fresh))
    }

    /// Number of successful reconstructions so far.
    pub fn repairs(&self) -> u64 {
        self.repairs
    }

    pub fn is_available(&self) -> bool {
        self.current.is_some()
    }

    /// The live instance, if any.
    pub fn get(&self) -> Option<&T> {
        self.current.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut()
    }
}

impl<T: fmt::Debug, E> fmt::Debug for RepairableResource<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepairableResource")
            .field("current", &self.current)
            .field("repairs", &self.repairs)
            .finish_non_exhaustive()
    }
}
