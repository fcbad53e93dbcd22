//! Typed - 型付き Task API
//!
//! queue 上の task 行は不透明な文字列ですが、worker 側ではこの層で
//! `<kind> <json>` を型付き Task に戻して Handler に渡します。
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Handler<T>` trait - 型安全
//! - **内部（Dyn）**: `DynHandler` trait - object-safe, type erasure
//! - **RegistryExecutor**: `ports::Executor` の実装

pub mod builtin;
pub mod codec;
pub mod executor;
pub mod handler;
pub mod registry;
pub mod task;

pub use self::codec::CodecError;
pub use self::executor::RegistryExecutor;
pub use self::handler::{DynHandler, Handler, TypedHandler};
pub use self::registry::{RegistryError, TypedRegistry};
pub use self::task::Task;
