//! rendezvous-core
//!
//! Coordination substrate for nodes that share nothing but a blob store.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（errors, ids, paths, state, outcome）
//! - **ports**: 抽象化レイヤー（Store, Executor）
//! - **impls**: Store 実装（MemoryStore, FsStore）
//! - **lock**: RemoteLock（create-if-absent blob による排他）
//! - **queue**: RemoteTaskQueue（owner / peer lock による producer-consumer）
//! - **repair**: RepairableResource（失敗時に 1 回だけ再構築して再試行）
//! - **listener**: SelfHealingListener と ConnectionRegistry
//! - **typed**: 型付き Task API（Task trait, Handler trait, TypedRegistry）
//! - **app**: NodeBuilder, Node, WorkerLoop, Coordinator
//! - **config**: TOML 設定
//! - **observability**: ログ初期化と span

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod listener;
pub mod lock;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod repair;
pub mod typed;

pub use crate::domain::errors::{Error, ErrorKind, Result};
