//! Queue module: per-node task queue kept in the Store.
//!
//! - **codec**: queue blob のテキスト形式（`#next#` で batch を区切る）
//! - **RemoteTaskQueue**: RemoteLock で守られた enqueue / drain

pub mod codec;
mod task_queue;

pub use self::codec::BATCH_DELIMITER;
pub use self::task_queue::RemoteTaskQueue;
