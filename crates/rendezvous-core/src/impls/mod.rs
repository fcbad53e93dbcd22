//! Impls - Store の実装
//!
//! # 含まれる実装
//! - **MemoryStore**: 開発・テスト用（chaos scheduler, racy create, fault injection）
//! - **FsStore**: ディレクトリ / network mount を共有 Store として使う

pub mod fs_store;
pub mod memory_store;

pub use self::fs_store::FsStore;
pub use self::memory_store::MemoryStore;
