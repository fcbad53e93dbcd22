//! App - アプリケーション層
//!
//! このモジュールは、queue / listener / typed を組み合わせて node を組み立てます。
//!
//! # 主要コンポーネント
//! - **NodeBuilder**: 設定・Store・Handler のワイヤリング（Fail-fast 検証）
//! - **Node**: listener と worker loop のライフサイクル
//! - **WorkerLoop**: drain → load → run → result blob
//! - **Coordinator**: node 登録、task 配布、結果回収
//! - **NodeStatus**: Store に公開する状態

pub mod builder;
pub mod coordinator;
pub mod node;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, NodeBuilder};
pub use self::coordinator::{Coordinator, QueueLock};
pub use self::node::Node;
pub use self::status::NodeStatus;
pub use self::worker_loop::{WorkerLoop, WorkerStats};
