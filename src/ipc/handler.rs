//! Single entry point for inbound transactions.
//!
//! Typed calls go to [`StatsService`], which authorizes each method itself.
//! The shell-command kind carries stream handles and a result receiver and is
//! handled here: streams are opened, the shell runs, every opened stream is
//! released, and exactly one completion code is sent.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;
use tracing::Instrument;

use super::auth::CallerIdentity;
use super::protocol::{CallStatus, CompletionCode, ServiceCall, TransactionKind};
use super::streams::{ShellStreams, StreamHandle};
use crate::service::StatsService;
use crate::shell::CommandShell;
use crate::telemetry::{log_security_event, SecurityEvent, SpanExt, TransactionSpan};

/// Opaque reference to the caller's shell callback. Passed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShellCallback(pub u64);

/// Receives the single completion code of a shell command.
#[derive(Debug)]
pub struct ResultReceiver(oneshot::Sender<CompletionCode>);

impl ResultReceiver {
    pub fn channel() -> (Self, oneshot::Receiver<CompletionCode>) {
        let (sender, receiver) = oneshot::channel();
        (Self(sender), receiver)
    }

    /// Deliver the code. Consumes the receiver, so it can only happen once.
    pub fn send(self, code: CompletionCode) {
        if self.0.send(code).is_err() {
            tracing::debug!(%code, "shell caller went away before the result was delivered");
        }
    }
}

/// Payload of a shell-command transaction.
#[derive(Debug)]
pub struct ShellRequest {
    pub input: StreamHandle,
    pub output: StreamHandle,
    pub error: StreamHandle,
    pub args: Vec<String>,
    pub callback: Option<ShellCallback>,
    pub result: ResultReceiver,
}

/// Payload of a dump transaction.
#[derive(Debug)]
pub struct DumpRequest {
    pub out: StreamHandle,
    pub args: Vec<String>,
}

/// An inbound transaction, one payload shape per kind.
#[derive(Debug)]
pub enum Transaction {
    Call(ServiceCall),
    Dump(DumpRequest),
    ShellCommand(ShellRequest),
}

impl Transaction {
    pub fn kind(&self) -> TransactionKind {
        match self {
            Transaction::Call(call) => TransactionKind::Call(*call),
            Transaction::Dump(_) => TransactionKind::Dump,
            Transaction::ShellCommand(_) => TransactionKind::ShellCommand,
        }
    }
}

/// What the dispatcher hands back to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionReply {
    Call(CallStatus),
    Dump(CompletionCode),
    /// The completion code went through the request's result receiver.
    ShellDelivered,
}

pub struct TransactionDispatcher {
    service: Arc<StatsService>,
    shell: CommandShell,
}

impl TransactionDispatcher {
    pub fn new(service: Arc<StatsService>, shell: CommandShell) -> Self {
        Self { service, shell }
    }

    pub fn service(&self) -> &StatsService {
        &self.service
    }

    pub async fn dispatch(&self, caller: CallerIdentity, transaction: Transaction) -> TransactionReply {
        let kind = transaction.kind();
        metrics::counter!("statsd_transactions_total", "kind" => kind.as_str()).increment(1);

        let span = TransactionSpan::new(kind, caller);
        match transaction {
            Transaction::Call(call) => {
                let result = self.service.call(caller, call).instrument(span.clone()).await;
                span.record_result(&result);
                TransactionReply::Call(result.into())
            }
            Transaction::Dump(request) => {
                let code = self.service.dump(request.out, &request.args).instrument(span).await;
                TransactionReply::Dump(code)
            }
            Transaction::ShellCommand(request) => {
                self.handle_shell_command(caller, request).instrument(span).await;
                TransactionReply::ShellDelivered
            }
        }
    }

    async fn handle_shell_command(&self, caller: CallerIdentity, request: ShellRequest) {
        let ShellRequest { input, output, error, args, callback: _, result } = request;

        let uid = caller.uid().to_string();
        let command = args.first().map(String::as_str).unwrap_or("");
        log_security_event(
            SecurityEvent::ShellCommand,
            "shell command received",
            &[("uid", &uid), ("command", command)],
        );

        let (mut streams, opened) = ShellStreams::open(input, output, error);
        let code = match (opened, streams.parts()) {
            (Ok(()), Some((fin, fout, ferr))) => {
                AssertUnwindSafe(self.shell.run(&mut **fin, &mut **fout, &mut **ferr, &args))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        tracing::error!(command, "shell command panicked");
                        CompletionCode::UNKNOWN_ERROR
                    })
            }
            (Err(e), _) => {
                tracing::warn!(error = %e, "shell stream could not be opened");
                CompletionCode::RESOURCE_UNAVAILABLE
            }
            (Ok(()), None) => CompletionCode::RESOURCE_UNAVAILABLE,
        };

        let released = streams.release().await;
        tracing::debug!(%code, released, "shell command finished");
        metrics::counter!("statsd_shell_commands_total", "result" => code.label()).increment(1);
        result.send(code);
    }
}
