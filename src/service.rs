//! Typed-method table of the stats service.
//!
//! Every privileged method runs the caller check first and does nothing else
//! when it fails.

use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncWriteExt;

use crate::companion::CompanionTracker;
use crate::ipc::{
    close_writer, require_system_caller, AuthError, CallStatus, CallerIdentity, CompletionCode,
    ExceptionCode, ServiceCall, StreamHandle,
};
use crate::subsystems::{PullKind, StatsPuller};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Permission denied: {0}")]
    PermissionDenied(#[from] AuthError),

    #[error("Peer unavailable: {0}")]
    PeerUnavailable(String),
}

impl ServiceError {
    pub fn exception_code(&self) -> ExceptionCode {
        match self {
            ServiceError::PermissionDenied(_) => ExceptionCode::Security,
            ServiceError::PeerUnavailable(_) => ExceptionCode::NullPointer,
        }
    }

    /// Message without the error-class prefix, as sent to callers.
    pub fn reason(&self) -> String {
        match self {
            ServiceError::PermissionDenied(e) => e.to_string(),
            ServiceError::PeerUnavailable(reason) => reason.clone(),
        }
    }
}

impl From<Result<(), ServiceError>> for CallStatus {
    fn from(result: Result<(), ServiceError>) -> Self {
        match result {
            Ok(()) => CallStatus::Ok,
            Err(e) => CallStatus::Exception {
                code: e.exception_code(),
                message: e.reason(),
            },
        }
    }
}

/// Privileged remote methods plus the diagnostic dump.
pub struct StatsService {
    puller: Arc<dyn StatsPuller>,
    tracker: CompanionTracker,
}

impl StatsService {
    pub fn new(puller: Arc<dyn StatsPuller>, tracker: CompanionTracker) -> Self {
        Self { puller, tracker }
    }

    pub fn tracker(&self) -> &CompanionTracker {
        &self.tracker
    }

    /// Route a typed call to its method.
    pub async fn call(&self, caller: CallerIdentity, call: ServiceCall) -> Result<(), ServiceError> {
        match call {
            ServiceCall::InformAnomalyAlarmFired => self.inform_anomaly_alarm_fired(caller),
            ServiceCall::InformPollAlarmFired => self.inform_poll_alarm_fired(caller).await,
            ServiceCall::SystemRunning => self.system_running(caller),
            ServiceCall::StatsCompanionReady => self.stats_companion_ready(caller).await,
        }
    }

    pub fn inform_anomaly_alarm_fired(&self, caller: CallerIdentity) -> Result<(), ServiceError> {
        tracing::debug!("informAnomalyAlarmFired was called");
        require_system_caller(caller, ServiceCall::InformAnomalyAlarmFired.method_name())?;
        // TODO: evaluate counters and timers once the anomaly engine exposes a trigger.
        tracing::debug!("informAnomalyAlarmFired succeeded");
        Ok(())
    }

    pub async fn inform_poll_alarm_fired(&self, caller: CallerIdentity) -> Result<(), ServiceError> {
        tracing::debug!("informPollAlarmFired was called");
        require_system_caller(caller, ServiceCall::InformPollAlarmFired.method_name())?;

        let kind = PullKind::KernelWakelocks;
        let output = self.puller.pull(kind).await;
        tracing::debug!(kind = kind.as_str(), size = output.len(), output = %output, "pull complete");
        Ok(())
    }

    pub fn system_running(&self, caller: CallerIdentity) -> Result<(), ServiceError> {
        require_system_caller(caller, ServiceCall::SystemRunning.method_name())?;
        tracing::info!("system server is running");
        self.tracker.notify_best_effort();
        Ok(())
    }

    pub async fn stats_companion_ready(&self, caller: CallerIdentity) -> Result<(), ServiceError> {
        tracing::debug!("statsCompanionReady was called");
        self.tracker.on_peer_ready(caller).await
    }

    /// Write an echo of `args` to `out`. No authorization.
    pub async fn dump(&self, out: StreamHandle, args: &[String]) -> CompletionCode {
        let mut out = match out.open_write() {
            Ok(out) => out,
            Err(e) => {
                tracing::warn!(error = %e, "dump stream unavailable");
                return CompletionCode::RESOURCE_UNAVAILABLE;
            }
        };

        let mut text = String::from("StatsService::dump:");
        for arg in args {
            tracing::debug!(arg = %arg, "dump argument");
            text.push(' ');
            text.push_str(arg);
        }
        text.push('\n');

        if let Err(e) = out.write_all(text.as_bytes()).await {
            tracing::warn!(error = %e, "dump write failed");
        }
        close_writer(&mut out, "dump").await;
        CompletionCode::SUCCESS
    }
}
