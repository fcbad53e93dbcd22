//! Built-in tasks every worker understands.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::handler::Handler;
use super::registry::{RegistryError, TypedRegistry};
use super::task::Task;
use crate::domain::errors::Result;
use crate::domain::outcome::{Artifact, Outcome};

/// Replies with its message on stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EchoTask {
    pub message: String,
}

impl Task for EchoTask {
    const KIND: &'static str = "core.echo.v1";
}

/// Waits, then succeeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepTask {
    pub millis: u64,
}

impl Task for SleepTask {
    const KIND: &'static str = "core.sleep.v1";
}

/// Always fails with the given reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailTask {
    pub reason: String,
}

impl Task for FailTask {
    const KIND: &'static str = "core.fail.v1";
}

pub struct EchoHandler;

#[async_trait]
impl Handler<EchoTask> for EchoHandler {
    async fn handle(&self, task: EchoTask) -> Result<Outcome> {
        Ok(Outcome::success().with_artifact(Artifact::Stdout(task.message)))
    }
}

pub struct SleepHandler;

#[async_trait]
impl Handler<SleepTask> for SleepHandler {
    async fn handle(&self, task: SleepTask) -> Result<Outcome> {
        tokio::time::sleep(Duration::from_millis(task.millis)).await;
        Ok(Outcome::success())
    }
}

pub struct FailHandler;

#[async_trait]
impl Handler<FailTask> for FailHandler {
    async fn handle(&self, task: FailTask) -> Result<Outcome> {
        Ok(Outcome::failure(task.reason))
    }
}

/// Registers every built-in task.
pub fn register_builtins(registry: &mut TypedRegistry) -> std::result::Result<(), RegistryError> {
    registry.register::<EchoTask, _>(EchoHandler)?;
    registry.register::<SleepTask, _>(SleepHandler)?;
    registry.register::<FailTask, _>(FailHandler)?;
    Ok(())
}
