//! RegistryExecutor - task 行を TypedRegistry の Handler に解決する Executor

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::codec;
use super::handler::DynHandler;
use super::registry::TypedRegistry;
use crate::domain::errors::{Error, Result};
use crate::domain::outcome::Outcome;
use crate::ports::{ExecutableTask, Executor};

pub struct RegistryExecutor {
    registry: Arc<TypedRegistry>,
}

impl RegistryExecutor {
    pub fn new(registry: Arc<TypedRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TypedRegistry {
        &self.registry
    }
}

struct LoadedTask {
    kind: String,
    payload: Value,
    handler: Arc<dyn DynHandler>,
}

#[async_trait]
impl ExecutableTask for LoadedTask {
    fn describe(&self) -> String {
        self.kind.clone()
    }

    async fn run(&self) -> Result<Outcome> {
        self.handler.handle_dyn(self.payload.clone()).await
    }
}

#[async_trait]
impl Executor for RegistryExecutor {
    async fn load(&self, task: &str) -> Result<Box<dyn ExecutableTask>> {
        let (kind, payload) =
            codec::decode(task).map_err(|e| Error::invalid_task(task, e.to_string()))?;
        let handler = self
            .registry
            .get(kind)
            .ok_or_else(|| Error::HandlerNotFound(kind.to_string()))?;
        Ok(Box::new(LoadedTask {
            kind: kind.to_string(),
            payload,
            handler,
        }))
    }
}
