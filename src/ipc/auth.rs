//! Caller identity validation for privileged calls.
//!
//! SECURITY: Every privileged operation MUST call [`require_system_caller`]
//! before doing any work. The identity is supplied per call by the transport
//! and is never cached.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::telemetry::{log_security_event, SecurityEvent};

/// The only identity allowed to invoke privileged operations.
pub const SYSTEM_UID: u32 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Only system uid can call {operation}")]
    PermissionDenied { operation: &'static str },
}

/// Numeric identity of the calling process, as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerIdentity(u32);

impl CallerIdentity {
    pub const fn from_uid(uid: u32) -> Self {
        Self(uid)
    }

    /// Identity of the privileged system caller.
    pub const fn system() -> Self {
        Self(SYSTEM_UID)
    }

    pub fn uid(&self) -> u32 {
        self.0
    }

    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_UID
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "uid {}", self.0)
    }
}

/// Reject any caller that is not the system identity.
pub fn require_system_caller(
    caller: CallerIdentity,
    operation: &'static str,
) -> Result<(), AuthError> {
    if caller.is_system() {
        return Ok(());
    }

    let uid = caller.uid().to_string();
    log_security_event(
        SecurityEvent::CallerRejected,
        "non-system caller attempted privileged operation",
        &[("operation", operation), ("uid", &uid)],
    );
    metrics::counter!("statsd_rejected_calls_total", "operation" => operation).increment(1);

    Err(AuthError::PermissionDenied { operation })
}
