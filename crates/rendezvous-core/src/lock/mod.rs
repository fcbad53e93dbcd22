//! Lock - Store 上の排他制御
//!
//! - **RemoteLock**: blob presence による mutual exclusion
//! - **PollPolicy**: 待機時の exponential backoff + jitter

pub mod backoff;
pub mod remote_lock;

pub use self::backoff::PollPolicy;
pub use self::remote_lock::{LockGuard, RemoteLock, deadline_after};
