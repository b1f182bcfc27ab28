//! Trace identifiers and the `traceparent` propagation header.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Header key the downstream service reads trace context from.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// 16-byte trace identifier, rendered as 32 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceId([u8; 16]);

impl TraceId {
    pub const INVALID: TraceId = TraceId([0; 16]);

    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// 8-byte span identifier, rendered as 16 lowercase hex digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanId([u8; 8]);

impl SpanId {
    pub const INVALID: SpanId = SpanId([0; 8]);

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub fn is_valid(&self) -> bool {
        *self != Self::INVALID
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

/// Trace flags. Bit 0 is "sampled"; only the low nibble is propagated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u8")]
pub struct TraceFlags(u8);

impl From<u8> for TraceFlags {
    fn from(bits: u8) -> Self {
        Self::new(bits)
    }
}

impl TraceFlags {
    pub const SAMPLED: TraceFlags = TraceFlags(0x01);

    pub fn new(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn is_sampled(self) -> bool {
        self.0 & 0x01 == 0x01
    }
}

/// Identity of a span as seen by other spans and by downstream services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanContext {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub flags: TraceFlags,
}

impl SpanContext {
    pub fn new(trace_id: TraceId, span_id: SpanId, flags: TraceFlags) -> Self {
        Self {
            trace_id,
            span_id,
            flags,
        }
    }

    /// `00-{trace_id}-{span_id}-0{flags}`
    pub fn traceparent(&self) -> String {
        format!("00-{}-{}-0{:x}", self.trace_id, self.span_id, self.flags.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traceparent_has_w3c_shape() {
        let ctx = SpanContext::new(
            TraceId::from_bytes([0xab; 16]),
            SpanId::from_bytes([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]),
            TraceFlags::SAMPLED,
        );
        assert_eq!(
            ctx.traceparent(),
            "00-abababababababababababababababab-0102030405060708-01"
        );
    }

    #[test]
    fn flags_keep_only_low_nibble() {
        let ctx = SpanContext::new(
            TraceId::from_bytes([1; 16]),
            SpanId::from_bytes([2; 8]),
            TraceFlags::new(0xf3),
        );
        assert!(ctx.traceparent().ends_with("-03"));
        assert!(ctx.flags.is_sampled());
    }

    #[test]
    fn deserialized_flags_are_masked() {
        let ctx = SpanContext::new(TraceId::from_bytes([1; 16]), SpanId::from_bytes([2; 8]), TraceFlags::SAMPLED);
        let mut value = serde_json::to_value(ctx).unwrap();
        value["flags"] = serde_json::json!(0xff);

        let decoded: SpanContext = serde_json::from_value(value).unwrap();
        assert_eq!(decoded.flags.bits(), 0x0f);
        assert!(decoded.traceparent().ends_with("-0f"));
    }

    #[test]
    fn zero_ids_are_invalid() {
        assert!(!TraceId::INVALID.is_valid());
        assert!(!SpanId::INVALID.is_valid());
        assert!(TraceId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]).is_valid());
    }
}
