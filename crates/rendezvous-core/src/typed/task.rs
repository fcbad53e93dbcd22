//! Task trait - 型付き Task の定義
//!
//! # 学習ポイント
//! - Associated Constants (`const KIND`)
//! - Trait bounds の組み合わせ (Serialize + DeserializeOwned + Send + Sync + 'static)

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Task は queue 上の task 行の kind と型を対応付ける
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Resize {
///     image: String,
///     width: u32,
/// }
///
/// impl Task for Resize {
///     const KIND: &'static str = "media.resize.v1";
/// }
/// ```
///
/// # Trait Bounds
/// - `Serialize`: coordinator が task 行を組み立てるため
/// - `DeserializeOwned`: worker が task 行から復元するため
/// - `Send + Sync + 'static`: Arc / spawn に載せるため
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// task 行の先頭トークン
    ///
    /// # 命名規約
    /// - `{namespace}.{action}.v{major}`、空白を含まない
    /// - 例: `media.resize.v1`
    const KIND: &'static str;
}
