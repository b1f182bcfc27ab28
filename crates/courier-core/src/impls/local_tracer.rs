//! LocalTraceContext - プロセス内で完結するトレーサー
//!
//! W3C 形式の trace id / span id を rand で生成し、終了した span を
//! メモリに記録します。exporter への送信は行いません（bootstrap は外側の責務）。

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use rand::Rng;
use tracing::debug;

use crate::domain::{SpanContext, SpanId, TraceFlags, TraceId, TracingError};
use crate::ports::{Span, TraceContext};

/// A span that has been ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSpan {
    pub name: String,
    pub context: SpanContext,
    pub parent: Option<SpanContext>,
    pub attributes: BTreeMap<String, String>,
}

#[derive(Default)]
struct TracerState {
    active: Option<SpanContext>,
    finished: Vec<FinishedSpan>,
}

/// LocalTraceContext は span を生成して記録する
#[derive(Clone, Default)]
pub struct LocalTraceContext {
    state: Arc<Mutex<TracerState>>,
}

impl LocalTraceContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `ctx` the span new spans are parented to.
    pub fn set_active(&self, ctx: Option<SpanContext>) {
        self.lock().active = ctx;
    }

    /// Start a root span and make it active; the caller ends it.
    pub fn start_root(&self, name: &str) -> Box<dyn Span> {
        let span = self.open(name, None);
        self.set_active(Some(span.context));
        Box::new(span)
    }

    pub fn finished_spans(&self) -> Vec<FinishedSpan> {
        self.lock().finished.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TracerState> {
        // 記録用の状態なので poison されても中身はそのまま使う
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self, name: &str, parent: Option<SpanContext>) -> LocalSpan {
        let mut rng = rand::thread_rng();
        let trace_id = match parent {
            Some(p) => p.trace_id,
            None => random_trace_id(&mut rng),
        };
        let context = SpanContext::new(trace_id, random_span_id(&mut rng), TraceFlags::SAMPLED);
        debug!(span = name, trace_id = %context.trace_id, span_id = %context.span_id, "span started");
        LocalSpan {
            name: name.to_string(),
            context,
            parent,
            attributes: BTreeMap::new(),
            ended: false,
            state: Arc::clone(&self.state),
        }
    }
}

impl TraceContext for LocalTraceContext {
    fn start_span(&self, name: &str, parent: Option<SpanContext>) -> Result<Box<dyn Span>, TracingError> {
        Ok(Box::new(self.open(name, parent)))
    }

    fn active_span(&self) -> Option<SpanContext> {
        self.lock().active
    }
}

fn random_trace_id(rng: &mut impl Rng) -> TraceId {
    loop {
        let id = TraceId::from_bytes(rng.r#gen());
        if id.is_valid() {
            return id;
        }
    }
}

fn random_span_id(rng: &mut impl Rng) -> SpanId {
    loop {
        let id = SpanId::from_bytes(rng.r#gen());
        if id.is_valid() {
            return id;
        }
    }
}

struct LocalSpan {
    name: String,
    context: SpanContext,
    parent: Option<SpanContext>,
    attributes: BTreeMap<String, String>,
    ended: bool,
    state: Arc<Mutex<TracerState>>,
}

impl Span for LocalSpan {
    fn context(&self) -> SpanContext {
        self.context
    }

    fn set_attribute(&mut self, key: &str, value: String) {
        self.attributes.insert(key.to_string(), value);
    }

    fn end(&mut self) -> Result<(), TracingError> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.active == Some(self.context) {
            state.active = self.parent;
        }
        state.finished.push(FinishedSpan {
            name: self.name.clone(),
            context: self.context,
            parent: self.parent,
            attributes: std::mem::take(&mut self.attributes),
        });
        debug!(span = %self.name, span_id = %self.context.span_id, "span ended");
        Ok(())
    }
}
