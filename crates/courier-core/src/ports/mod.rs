//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（タスクキュー、トレーサー、ロガー）への
//! インターフェースを提供し、実装の詳細を隠蔽します。

pub mod clock;
pub mod event_sink;
pub mod queue_service;
pub mod trace_context;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::queue_service::QueueService;
pub use self::trace_context::{Span, SpanGuard, TraceContext};
