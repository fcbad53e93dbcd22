//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの ID + Phantom type パターン。
//! `Id<T>` で共通実装を提供しつつ、`T` はコンパイル時の区別にだけ使う
//! マーカー型です（実行時のメモリは消費しない）。
//!
//! ULID is time-sortable, so result blobs named by [`ResultId`] list in the
//! order they were produced.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "result-"）
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

impl<T: IdMarker> FromStr for Id<T> {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw).map(Self::from_ulid)
    }
}

/// Result blob のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskResultMarker {}

impl IdMarker for TaskResultMarker {
    fn prefix() -> &'static str {
        "result-"
    }
}

/// Connection session のマーカー型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionMarker {}

impl IdMarker for SessionMarker {
    fn prefix() -> &'static str {
        "session-"
    }
}

/// Identifier of one executed task's result blob.
pub type ResultId = Id<TaskResultMarker>;

/// Identifier of one accepted connection session.
pub type SessionId = Id<SessionMarker>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_display_with_prefix() {
        let result = ResultId::generate();
        let session = SessionId::generate();

        assert!(result.to_string().starts_with("result-"));
        assert!(session.to_string().starts_with("session-"));
        // let _: ResultId = session; // <- does not compile
    }

    #[test]
    fn display_parses_back() {
        let id = ResultId::generate();
        let parsed: ResultId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let id1 = ResultId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = ResultId::generate();
        assert!(id1 < id2);
        assert!(id1.to_string() < id2.to_string());
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<ResultId>(), size_of::<Ulid>());
    }
}
