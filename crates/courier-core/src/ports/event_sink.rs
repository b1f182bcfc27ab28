//! EventSink port - イベント記録の抽象化
//!
//! # 実装
//! - TracingEventSink: tracing にイベントを流す（impls::tracing_sink）

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// 戻り値を持たないので、記録の失敗が配送結果に影響することはない。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}
