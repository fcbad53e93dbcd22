//! Handler trait - Task を実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (Handler<T>)
//! - Object-safe trait (DynHandler)
//! - Type erasure パターン (TypedHandler<T, H> → DynHandler)

use std::marker::PhantomData;

use async_trait::async_trait;

use super::task::Task;
use crate::domain::errors::{Error, Result};
use crate::domain::outcome::Outcome;

/// Handler は Task を実行して Outcome を返す
///
/// # 使用例
/// ```ignore
/// struct ResizeHandler;
///
/// #[async_trait]
/// impl Handler<Resize> for ResizeHandler {
///     async fn handle(&self, task: Resize) -> Result<Outcome> {
///         Ok(Outcome::success())
///     }
/// }
/// ```
///
/// `Err` は「実行できなかった」、`Outcome::failure` は「実行して失敗した」。
/// worker loop はどちらも failed result として記録します。
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, task: T) -> Result<Outcome>;
}

/// DynHandler は object-safe な Handler の抽象化
///
/// `HashMap<String, Arc<dyn DynHandler>>` に格納するための型消去層。
#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<Outcome>;
    fn kind(&self) -> &str;
}

pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn(T)>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(&self, payload: serde_json::Value) -> Result<Outcome> {
        let task: T = serde_json::from_value(payload)
            .map_err(|e| Error::invalid_task(T::KIND, format!("payload does not match: {e}")))?;
        self.handler.handle(task).await
    }

    fn kind(&self) -> &str {
        T::KIND
    }
}
