//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **WorkflowBuilder**: エンジンの構築とワイヤリング
//! - **TaskDispatchClient**: Operation → タスク記述子への変換と送信
//! - **WorkflowEngine**: キューの順次実行（kick）
//! - **WorkflowCounts / RunSummary**: 進捗ビュー

pub mod builder;
pub mod dispatch_client;
pub mod engine;
pub mod status;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, WorkflowBuilder};
pub use self::dispatch_client::TaskDispatchClient;
pub use self::engine::{FailurePolicy, RunOptions, WorkflowEngine};
pub use self::status::{RunSummary, WorkflowCounts};
