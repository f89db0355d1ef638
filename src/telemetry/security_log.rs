//! Security audit logging.
//!
//! SECURITY: Caller rejections, peer lifecycle changes and configuration
//! loads are logged here so they can be audited separately from debug output.

/// Security event types for audit logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityEvent {
    /// Privileged call from a non-system caller.
    CallerRejected,
    /// Shell command transaction received.
    ShellCommand,
    /// Configuration accepted from the shell.
    ConfigApplied,
    /// Configuration blob rejected (malformed or oversized).
    ConfigRejected,
    /// Death watch linked on the companion peer.
    PeerLinked,
    /// Companion peer died.
    PeerDied,
    /// Connection refused at the transport.
    ConnectionRefused,
}

impl SecurityEvent {
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            Self::CallerRejected => SecuritySeverity::Warning,
            Self::ShellCommand => SecuritySeverity::Info,
            Self::ConfigApplied => SecuritySeverity::Info,
            Self::ConfigRejected => SecuritySeverity::Warning,
            Self::PeerLinked => SecuritySeverity::Info,
            Self::PeerDied => SecuritySeverity::Warning,
            Self::ConnectionRefused => SecuritySeverity::Warning,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallerRejected => "caller_rejected",
            Self::ShellCommand => "shell_command",
            Self::ConfigApplied => "config_applied",
            Self::ConfigRejected => "config_rejected",
            Self::PeerLinked => "peer_linked",
            Self::PeerDied => "peer_died",
            Self::ConnectionRefused => "connection_refused",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecuritySeverity {
    Debug,
    Info,
    Warning,
    Error,
}

impl SecuritySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
        }
    }
}

/// Log a security event with key-value details.
///
/// ```
/// use statsd_service::telemetry::{log_security_event, SecurityEvent};
///
/// log_security_event(
///     SecurityEvent::CallerRejected,
///     "non-system caller attempted privileged operation",
///     &[("operation", "systemRunning"), ("uid", "2000")],
/// );
/// ```
pub fn log_security_event(event: SecurityEvent, message: &str, details: &[(&str, &str)]) {
    let line = format_event(event, message, details, &chrono::Utc::now().to_rfc3339());

    match event.severity() {
        SecuritySeverity::Debug => tracing::debug!(event = event.as_str(), "{}", line),
        SecuritySeverity::Info => tracing::info!(event = event.as_str(), "{}", line),
        SecuritySeverity::Warning => tracing::warn!(event = event.as_str(), "{}", line),
        SecuritySeverity::Error => tracing::error!(event = event.as_str(), "{}", line),
    }
}

fn format_event(
    event: SecurityEvent,
    message: &str,
    details: &[(&str, &str)],
    timestamp: &str,
) -> String {
    let head = format!(
        "[{}] SECURITY {} {}: {}",
        timestamp,
        event.severity().as_str(),
        event.as_str(),
        message
    );
    if details.is_empty() {
        return head;
    }

    let details = details
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(" ");
    format!("{} | {}", head, details)
}
