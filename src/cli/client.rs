//! Socket client used by the `shell`, `call` and `dump` subcommands.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;

use crate::ipc::protocol::{
    decode_reply, encode_request, read_frame, write_frame, DEFAULT_MAX_FRAME_SIZE,
};
use crate::ipc::{CallStatus, CompletionCode, ProtocolError, ServiceCall, WireReply, WireRequest};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Server closed the connection without replying")]
    NoReply,

    #[error("Unexpected reply: {0:?}")]
    UnexpectedReply(WireReply),

    #[error("Server error {code}: {message}")]
    Server { code: CompletionCode, message: String },

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Failed to read stdin: {0}")]
    Stdin(std::io::Error),
}

impl CliError {
    /// Process exit code: 3 for connection problems, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Connection(_) | CliError::NoReply => 3,
            _ => 1,
        }
    }
}

/// Result of a shell command as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellOutput {
    pub code: CompletionCode,
    pub stdout: String,
    pub stderr: String,
}

pub struct CliIpcClient {
    socket_path: PathBuf,
    max_frame_size: usize,
}

impl CliIpcClient {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Send one request on a fresh connection and wait for its reply.
    pub async fn request(&self, request: &WireRequest) -> Result<WireReply, CliError> {
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| CliError::Connection("connect timed out".to_string()))?
            .map_err(|e| CliError::Connection(format!("{}: {}", self.socket_path.display(), e)))?;

        let bytes = encode_request(request, self.max_frame_size)?;
        write_frame(&mut stream, &bytes).await?;

        let frame = read_frame(&mut stream, self.max_frame_size)
            .await?
            .ok_or(CliError::NoReply)?;
        match decode_reply(&frame, self.max_frame_size)? {
            WireReply::Error { code, message } => Err(CliError::Server { code, message }),
            reply => Ok(reply),
        }
    }

    pub async fn shell(&self, args: Vec<String>, stdin: String) -> Result<ShellOutput, CliError> {
        match self.request(&WireRequest::shell(args, stdin)).await? {
            WireReply::ShellResult { code, stdout, stderr } => Ok(ShellOutput { code, stdout, stderr }),
            other => Err(CliError::UnexpectedReply(other)),
        }
    }

    pub async fn call(&self, call: ServiceCall) -> Result<CallStatus, CliError> {
        match self.request(&WireRequest::call(call)).await? {
            WireReply::CallStatus(status) => Ok(status),
            other => Err(CliError::UnexpectedReply(other)),
        }
    }

    pub async fn dump(&self, args: Vec<String>) -> Result<(CompletionCode, String), CliError> {
        match self.request(&WireRequest::dump(args)).await? {
            WireReply::DumpResult { code, output } => Ok((code, output)),
            other => Err(CliError::UnexpectedReply(other)),
        }
    }
}

/// Map a CLI method name to its typed call.
pub fn parse_method(name: &str) -> Result<ServiceCall, CliError> {
    match name {
        "anomaly-alarm" => Ok(ServiceCall::InformAnomalyAlarmFired),
        "poll-alarm" => Ok(ServiceCall::InformPollAlarmFired),
        "system-running" => Ok(ServiceCall::SystemRunning),
        "companion-ready" => Ok(ServiceCall::StatsCompanionReady),
        other => ServiceCall::ALL
            .into_iter()
            .find(|call| call.method_name() == other)
            .ok_or_else(|| CliError::UnknownMethod(other.to_string())),
    }
}

/// Run `statsd shell <args...>`. For `config`, process stdin is sent as the blob.
///
/// Returns exit code: 0 on success, 1 on a failing command, 3 on connection failure.
pub async fn run_shell(socket_path: &str, args: &[String]) -> i32 {
    let stdin = if args.first().map(String::as_str) == Some("config") {
        let mut blob = String::new();
        if let Err(e) = tokio::io::stdin().read_to_string(&mut blob).await {
            return report(CliError::Stdin(e));
        }
        blob
    } else {
        String::new()
    };

    let client = CliIpcClient::new(socket_path);
    match client.shell(args.to_vec(), stdin).await {
        Ok(output) => {
            print!("{}", output.stdout);
            eprint!("{}", output.stderr);
            if output.code.is_success() {
                0
            } else {
                eprintln!("Command failed: {}", output.code);
                1
            }
        }
        Err(e) => report(e),
    }
}

/// Run `statsd call <method>`.
pub async fn run_call(socket_path: &str, method: &str) -> i32 {
    let call = match parse_method(method) {
        Ok(call) => call,
        Err(e) => return report(e),
    };

    let client = CliIpcClient::new(socket_path);
    match client.call(call).await {
        Ok(CallStatus::Ok) => {
            println!("{}: ok", call.method_name());
            0
        }
        Ok(CallStatus::Exception { code, message }) => {
            eprintln!("{}: exception {}: {}", call.method_name(), code.as_i32(), message);
            1
        }
        Err(e) => report(e),
    }
}

/// Run `statsd dump [args...]`.
pub async fn run_dump(socket_path: &str, args: &[String]) -> i32 {
    let client = CliIpcClient::new(socket_path);
    match client.dump(args.to_vec()).await {
        Ok((code, output)) => {
            print!("{}", output);
            if code.is_success() {
                0
            } else {
                1
            }
        }
        Err(e) => report(e),
    }
}

fn report(e: CliError) -> i32 {
    eprintln!("Error: {}", e);
    if e.exit_code() == 3 {
        eprintln!("Is the server running? Check STATSD_SOCKET_PATH.");
    }
    e.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_names_resolve() {
        assert_eq!(parse_method("system-running").unwrap(), ServiceCall::SystemRunning);
        assert_eq!(parse_method("companion-ready").unwrap(), ServiceCall::StatsCompanionReady);
        assert_eq!(parse_method("informPollAlarmFired").unwrap(), ServiceCall::InformPollAlarmFired);
        assert!(matches!(parse_method("reboot"), Err(CliError::UnknownMethod(_))));
    }

    #[test]
    fn test_connection_errors_exit_with_three() {
        assert_eq!(CliError::Connection("refused".into()).exit_code(), 3);
        assert_eq!(CliError::UnknownMethod("x".into()).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_missing_socket_is_a_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let client = CliIpcClient::new(dir.path().join("absent.sock"));
        let result = client.call(ServiceCall::SystemRunning).await;
        assert!(matches!(result, Err(CliError::Connection(_))));
    }
}
