//! Unix-domain socket listener for the stats service.
//!
//! Each connection runs on its own task. Requests are read as length-prefixed
//! JSON frames; the caller identity comes from the socket peer credentials,
//! never from the request body.

use std::io::{self, Cursor};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use super::auth::CallerIdentity;
use super::connections::{ConnectionConfig, ConnectionPool};
use super::handler::{
    DumpRequest, ResultReceiver, ShellCallback, ShellRequest, Transaction, TransactionDispatcher,
    TransactionReply,
};
use super::protocol::{
    decode_request, encode_reply, read_frame, write_frame, CompletionCode, ProtocolError,
    TransactionKind, WireReply, WireRequest, DEFAULT_MAX_FRAME_SIZE,
};
use super::streams::{CaptureBuffer, StreamHandle};
use crate::shutdown::ShutdownCoordinator;
use crate::telemetry::{log_security_event, SecurityEvent};

#[derive(Debug, Clone)]
pub struct IpcServerConfig {
    pub max_frame_size: usize,
    pub connections: ConnectionConfig,
}

impl Default for IpcServerConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            connections: ConnectionConfig::default(),
        }
    }
}

/// Bind `socket_path` and serve until the shutdown token is cancelled.
///
/// A stale socket left by a previous run is replaced. Anything else at the
/// path, including a socket another server still answers on, is refused.
pub async fn run_server(
    socket_path: impl AsRef<Path>,
    dispatcher: Arc<TransactionDispatcher>,
    config: IpcServerConfig,
    shutdown: ShutdownCoordinator,
) -> Result<(), ProtocolError> {
    let socket_path = socket_path.as_ref();
    let (listener, bound) = bind(socket_path)?;
    tracing::info!(path = %socket_path.display(), "statsd listening");

    let result = serve(listener, dispatcher, config, shutdown).await;

    remove_own_socket(socket_path, bound);
    result
}

/// Device and inode of the socket file this server created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketId {
    dev: u64,
    ino: u64,
}

impl SocketId {
    fn of(metadata: &std::fs::Metadata) -> Self {
        Self { dev: metadata.dev(), ino: metadata.ino() }
    }
}

fn bind(socket_path: &Path) -> Result<(UnixListener, SocketId), ProtocolError> {
    remove_stale_socket(socket_path)?;
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let listener = UnixListener::bind(socket_path)?;
    let bound = SocketId::of(&std::fs::symlink_metadata(socket_path)?);
    Ok((listener, bound))
}

fn remove_stale_socket(path: &Path) -> Result<(), ProtocolError> {
    let metadata = match std::fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };

    if !metadata.file_type().is_socket() {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("path {} exists but is not a socket", path.display()),
        )));
    }
    if std::os::unix::net::UnixStream::connect(path).is_ok() {
        return Err(ProtocolError::Io(io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("another server is listening on {}", path.display()),
        )));
    }

    std::fs::remove_file(path)?;
    tracing::debug!(path = %path.display(), "removed stale socket file");
    Ok(())
}

/// Unlink the socket on stop, unless the path now belongs to someone else.
fn remove_own_socket(path: &Path, bound: SocketId) {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_socket() && SocketId::of(&metadata) == bound => {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove socket file");
            }
        }
        Ok(_) => tracing::warn!(path = %path.display(), "socket path replaced, leaving it in place"),
        Err(e) => tracing::debug!(error = %e, "socket file already gone"),
    }
}

/// Accept loop over an already bound listener.
pub async fn serve(
    listener: UnixListener,
    dispatcher: Arc<TransactionDispatcher>,
    config: IpcServerConfig,
    shutdown: ShutdownCoordinator,
) -> Result<(), ProtocolError> {
    let pool = ConnectionPool::new(config.connections.clone());
    let token: CancellationToken = shutdown.token();

    loop {
        let stream = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let Some(slot) = pool.try_acquire() else {
            log_security_event(
                SecurityEvent::ConnectionRefused,
                "connection limit reached",
                &[("max_connections", &pool.max_connections().to_string())],
            );
            metrics::counter!("statsd_connections_refused_total").increment(1);
            continue;
        };

        let dispatcher = Arc::clone(&dispatcher);
        let shutdown = shutdown.clone();
        let max_frame_size = config.max_frame_size;
        tokio::spawn(async move {
            let _slot = slot;
            if let Err(e) = handle_connection(stream, dispatcher, max_frame_size, shutdown).await {
                tracing::debug!(error = %e, "connection closed with error");
            }
        });
    }

    tracing::info!("statsd listener stopped");
    Ok(())
}

fn caller_of(stream: &UnixStream) -> Result<CallerIdentity, ProtocolError> {
    let cred = stream.peer_cred()?;
    Ok(CallerIdentity::from_uid(cred.uid()))
}

async fn handle_connection(
    mut stream: UnixStream,
    dispatcher: Arc<TransactionDispatcher>,
    max_frame_size: usize,
    shutdown: ShutdownCoordinator,
) -> Result<(), ProtocolError> {
    let caller = caller_of(&stream)?;

    while let Some(frame) = read_frame(&mut stream, max_frame_size).await? {
        let reply = match decode_request(&frame, max_frame_size) {
            Ok(request) => match shutdown.track() {
                Some(_in_flight) => serve_request(&dispatcher, caller, request).await,
                None => WireReply::Error {
                    code: CompletionCode::RESOURCE_UNAVAILABLE,
                    message: "service is shutting down".to_string(),
                },
            },
            Err(e) => WireReply::Error {
                code: CompletionCode::BAD_VALUE,
                message: e.to_string(),
            },
        };

        let bytes = encode_reply(&reply, max_frame_size)?;
        write_frame(&mut stream, &bytes).await?;
    }
    Ok(())
}

/// Turn one wire request into a transaction, dispatch it and build the reply.
pub async fn serve_request(
    dispatcher: &TransactionDispatcher,
    caller: CallerIdentity,
    request: WireRequest,
) -> WireReply {
    let kind = match TransactionKind::from_code(request.code) {
        Ok(kind) => kind,
        Err(e) => {
            return WireReply::Error {
                code: CompletionCode::UNKNOWN_TRANSACTION,
                message: e.to_string(),
            }
        }
    };

    match kind {
        TransactionKind::Call(call) => {
            match dispatcher.dispatch(caller, Transaction::Call(call)).await {
                TransactionReply::Call(status) => WireReply::CallStatus(status),
                other => unexpected_reply(other),
            }
        }
        TransactionKind::Dump => {
            let output = CaptureBuffer::new();
            let transaction = Transaction::Dump(DumpRequest {
                out: StreamHandle::writer(output.clone()),
                args: request.args,
            });
            match dispatcher.dispatch(caller, transaction).await {
                TransactionReply::Dump(code) => WireReply::DumpResult {
                    code,
                    output: output.to_string_lossy(),
                },
                other => unexpected_reply(other),
            }
        }
        TransactionKind::ShellCommand => {
            let stdout = CaptureBuffer::new();
            let stderr = CaptureBuffer::new();
            let (result, receiver) = ResultReceiver::channel();
            let transaction = Transaction::ShellCommand(ShellRequest {
                input: StreamHandle::reader(Cursor::new(request.stdin.into_bytes())),
                output: StreamHandle::writer(stdout.clone()),
                error: StreamHandle::writer(stderr.clone()),
                args: request.args,
                callback: Some(ShellCallback(u64::from(caller.uid()))),
                result,
            });

            dispatcher.dispatch(caller, transaction).await;
            let code = receiver.await.unwrap_or(CompletionCode::UNKNOWN_ERROR);
            WireReply::ShellResult {
                code,
                stdout: stdout.to_string_lossy(),
                stderr: stderr.to_string_lossy(),
            }
        }
    }
}

fn unexpected_reply(reply: TransactionReply) -> WireReply {
    tracing::error!(?reply, "dispatcher returned a reply of the wrong kind");
    WireReply::Error {
        code: CompletionCode::UNKNOWN_ERROR,
        message: "internal dispatch error".to_string(),
    }
}

