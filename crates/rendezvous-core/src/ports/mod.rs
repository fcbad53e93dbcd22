//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。各 trait は外部システムへの
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! - **Store**: 共有 blob ストア（唯一の coordinator ⇔ worker チャネル）
//! - **Executor**: task 文字列の解決と実行

pub mod executor;
pub mod store;

pub use self::executor::{ExecutableTask, Executor};
pub use self::store::{CreateOutcome, SharedStore, Store};
