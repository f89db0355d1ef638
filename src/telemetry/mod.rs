//! Telemetry for the stats service front-end.
//!
//! Structured logging, security audit events and per-transaction spans.
//! Counters go through the `metrics` facade; no exporter is installed here.

mod logging;
pub mod security_log;
mod spans;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use security_log::{log_security_event, SecurityEvent, SecuritySeverity};
pub use spans::{SpanExt, TransactionSpan};
