//! Listener - 自己修復する接続待ち受け
//!
//! - **SelfHealingListener**: generation chain への安定ハンドル
//! - **generation**: accept loop、repair、supervision
//! - **ConnectionRegistry**: 受け付けた接続の名前 → session 管理
//! - **handshake**: 長さ 1 byte + UTF-8 名

mod generation;
mod handle;
pub mod handshake;
pub mod registry;

pub use self::handle::{GenerationInfo, ListenerOptions, SelfHealingListener};
pub use self::registry::{
    Connection, ConnectionRegistry, Dispatch, DispatchError, LoggingSession, SessionHandler,
    SessionInfo,
};
