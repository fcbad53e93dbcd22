//! Repair - 自己再構築するリソース
//!
//! - **RepairableResource**: recipe + 1 回だけの repair / retry
//! - **io**: `Read` / `Write` 実装と TCP link の recipe

pub mod io;
pub mod resource;

pub use self::io::{connect, connect_recipe};
pub use self::resource::{RepairError, RepairableResource};
