//! TraceContext port - 分散トレーシングの抽象化
//!
//! span の生成・終了と、現在 active な span の取得だけを扱います。
//! exporter などの bootstrap はこの crate の外側の責務です。

use tracing::warn;

use crate::domain::{SpanContext, TracingError};

/// One traced unit of work.
pub trait Span: Send {
    fn context(&self) -> SpanContext;

    fn set_attribute(&mut self, key: &str, value: String);

    /// Close the span. Calling it more than once is a no-op.
    fn end(&mut self) -> Result<(), TracingError>;
}

/// TraceContext は span を生成し、active な span を公開する
pub trait TraceContext: Send + Sync {
    /// Start a span; `parent == None` starts a new root trace.
    fn start_span(&self, name: &str, parent: Option<SpanContext>) -> Result<Box<dyn Span>, TracingError>;

    fn active_span(&self) -> Option<SpanContext>;
}

/// Ends the wrapped span when dropped, whatever path the caller leaves by.
///
/// Teardown errors are logged, never returned.
pub struct SpanGuard {
    span: Box<dyn Span>,
}

impl SpanGuard {
    pub fn new(span: Box<dyn Span>) -> Self {
        Self { span }
    }

    pub fn context(&self) -> SpanContext {
        self.span.context()
    }

    pub fn set_attribute(&mut self, key: &str, value: impl Into<String>) {
        self.span.set_attribute(key, value.into());
    }
}

impl Drop for SpanGuard {
    fn drop(&mut self) {
        if let Err(err) = self.span.end() {
            warn!(error = %err, "span teardown failed");
        }
    }
}
