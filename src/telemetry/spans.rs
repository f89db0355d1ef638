//! Span helpers for transaction tracing.

use tracing::{info_span, Span};

use crate::ipc::{CallerIdentity, TransactionKind};

/// Extension trait for recording an outcome into a span.
pub trait SpanExt {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }
}

/// Factory for per-transaction spans.
pub struct TransactionSpan;

impl TransactionSpan {
    /// `status` and `error.message` are filled in by [`SpanExt::record_result`].
    pub fn new(kind: TransactionKind, caller: CallerIdentity) -> Span {
        info_span!(
            "transaction",
            kind = kind.as_str(),
            code = kind.code(),
            uid = caller.uid(),
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
        )
    }
}
