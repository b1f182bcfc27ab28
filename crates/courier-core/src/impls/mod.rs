//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryQueueService**: 開発用・テスト用のキューバックエンド
//! - **CloudTasksHttpQueue**: REST API 経由のキューバックエンド
//! - **LocalTraceContext**: プロセス内トレーサー
//! - **TracingEventSink**: tracing へのイベント出力

pub mod http_queue;
pub mod inmem_queue;
pub mod local_tracer;
pub mod tracing_sink;

// 主要な型を再エクスポート
pub use self::http_queue::{CloudTasksHttpQueue, DEFAULT_ENDPOINT};
pub use self::inmem_queue::InMemoryQueueService;
pub use self::local_tracer::{FinishedSpan, LocalTraceContext};
pub use self::tracing_sink::TracingEventSink;
