//! IPC front-end of the stats service.
//!
//! Transactions arrive over a Unix-domain socket. Typed calls are authorized
//! per method; shell and dump transactions carry stream handles instead of
//! typed arguments.

mod auth;
mod connections;
mod handler;
pub mod protocol;
#[cfg(unix)]
pub mod server;
mod streams;

pub use auth::{require_system_caller, AuthError, CallerIdentity, SYSTEM_UID};
pub use connections::{ConnectionConfig, ConnectionGuard, ConnectionPool};
pub use handler::{
    DumpRequest, ResultReceiver, ShellCallback, ShellRequest, Transaction, TransactionDispatcher,
    TransactionReply,
};
pub use protocol::{
    CallStatus, CompletionCode, ExceptionCode, ProtocolError, ServiceCall, TransactionKind,
    WireReply, WireRequest,
};
pub use streams::{
    close_writer, BoxedReader, BoxedWriter, CaptureBuffer, ShellStreams, StreamError, StreamHandle,
};
#[cfg(unix)]
pub use server::{run_server, serve, serve_request, IpcServerConfig};
