//! NodeBuilder - worker node の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;

use crate::app::node::Node;
use crate::config::NodeConfig;
use crate::domain::errors::Error;
use crate::impls::FsStore;
use crate::listener::Dispatch;
use crate::observability::{Role, node_span};
use crate::ports::SharedStore;
use crate::typed::builtin::register_builtins;
use crate::typed::{Handler, RegistryError, RegistryExecutor, Task, TypedRegistry};

/// NodeBuilder は worker node を構築
///
/// # 使用例
/// ```ignore
/// let node = NodeBuilder::new(config)
///     .with_builtins()?
///     .register::<MyTask, _>(MyTaskHandler)?
///     .expect_kinds(&["my_namespace.my_task.v1"])
///     .build()
///     .await?;
/// ```
///
/// # Fail-fast 設計
/// - `[worker] expected_kinds` と `expect_kinds()` の和集合が期待集合
/// - build() 時に「期待集合 ⊆ 登録済み集合」をチェック
/// - 不足があれば BuildError を返す
pub struct NodeBuilder {
    config: NodeConfig,
    registry: TypedRegistry,
    expected_kinds: Vec<String>,
    store: Option<SharedStore>,
    dispatch: Option<Arc<dyn Dispatch>>,
}

/// BuildError は node 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task kinds: {0:?}. These tasks were expected but not registered.")]
    MissingTaskKinds(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Setup(#[from] Error),
}

impl NodeBuilder {
    pub fn new(config: NodeConfig) -> Self {
        let expected_kinds = config.worker.expected_kinds.clone();
        Self {
            config,
            registry: TypedRegistry::new(),
            expected_kinds,
            store: None,
            dispatch: None,
        }
    }

    /// Handler を登録
    pub fn register<T: Task, H: Handler<T> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    /// `core.*` の組み込み task を登録
    pub fn with_builtins(mut self) -> Result<Self, RegistryError> {
        register_builtins(&mut self.registry)?;
        Ok(self)
    }

    /// 期待される task kind を追加
    pub fn expect_kinds(mut self, kinds: &[&str]) -> Self {
        self.expected_kinds
            .extend(kinds.iter().map(|kind| kind.to_string()));
        self
    }

    /// Uses `store` instead of opening `[store] root`.
    pub fn with_store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Replaces the default connection registry as the listener's dispatch.
    pub fn with_dispatch(mut self, dispatch: Arc<dyn Dispatch>) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    /// # 検証
    /// - 設定値の妥当性（NodeConfig::validate）
    /// - 期待される task kind が全て登録されているか
    pub async fn build(self) -> Result<Node, BuildError> {
        self.config.validate()?;

        let registered = self.registry.registered_kinds();
        let mut missing: Vec<String> = self
            .expected_kinds
            .iter()
            .filter(|kind| !registered.contains(kind))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        if !missing.is_empty() {
            return Err(BuildError::MissingTaskKinds(missing));
        }

        let store: SharedStore = match self.store {
            Some(store) => store,
            None => Arc::new(FsStore::open(self.config.store.root.clone()).await?),
        };
        let paths = self.config.node_paths()?;
        let span = node_span(paths.name(), Role::Worker);
        let executor = Arc::new(RegistryExecutor::new(Arc::new(self.registry)));

        Ok(Node::new(
            self.config,
            paths,
            store,
            executor,
            self.dispatch,
            span,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::MemoryStore;
    use crate::typed::builtin::{EchoTask, SleepTask};

    fn memory() -> SharedStore {
        Arc::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn build_success() {
        let node = NodeBuilder::new(NodeConfig::default())
            .with_builtins()
            .unwrap()
            .expect_kinds(&[EchoTask::KIND, SleepTask::KIND])
            .with_store(memory())
            .build()
            .await
            .unwrap();
        assert_eq!(node.name(), "worker");
        assert_eq!(node.executor().registry().registered_kinds().len(), 3);
    }

    #[tokio::test]
    async fn build_missing_task_kinds() {
        let mut config = NodeConfig::default();
        config.worker.expected_kinds = vec!["extra.thing.v1".into()];
        let result = NodeBuilder::new(config)
            .with_builtins()
            .unwrap()
            .expect_kinds(&[EchoTask::KIND, "other.thing.v1"])
            .with_store(memory())
            .build()
            .await;
        assert!(matches!(
            result,
            Err(BuildError::MissingTaskKinds(missing))
                if missing == vec!["extra.thing.v1".to_string(), "other.thing.v1".to_string()]
        ));
    }

    #[tokio::test]
    async fn duplicate_registration_fails() {
        let result = NodeBuilder::new(NodeConfig::default())
            .with_builtins()
            .unwrap()
            .with_builtins();
        assert!(matches!(result, Err(RegistryError::AlreadyRegistered(_))));
    }

    #[tokio::test]
    async fn invalid_config_fails_build() {
        let mut config = NodeConfig::default();
        config.node.name = "no/slash".into();
        let result = NodeBuilder::new(config).with_store(memory()).build().await;
        assert!(matches!(result, Err(BuildError::Setup(Error::Config(_)))));
    }

    #[tokio::test]
    async fn opens_filesystem_store_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.store.root = dir.path().join("shared");
        let node = NodeBuilder::new(config).build().await.unwrap();
        assert_eq!(node.paths().queue(), "nodes/worker/tasks.dat");
    }
}
