//! Executor port - drain した task 文字列を実行可能な形に解決して実行
//!
//! What a task computes is outside the substrate. The worker loop only needs
//! to turn an opaque task line into something runnable and record how it went.

use async_trait::async_trait;

use crate::domain::errors::Result;
use crate::domain::outcome::Outcome;

/// A loaded task, ready to run.
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    /// Short human-readable name for logs.
    fn describe(&self) -> String;

    async fn run(&self) -> Result<Outcome>;
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Resolves a raw task line.
    async fn load(&self, task: &str) -> Result<Box<dyn ExecutableTask>>;

    async fn run(&self, task: Box<dyn ExecutableTask>) -> Result<Outcome> {
        task.run().await
    }
}
