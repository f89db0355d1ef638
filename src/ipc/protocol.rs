//! Transaction codes, reply types and the socket wire format.
//!
//! # Security
//! - Frame size limits are checked before any allocation or parsing
//! - Unknown transaction codes are rejected, never guessed

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// First code of the typed-method table.
pub const FIRST_CALL_TRANSACTION: u32 = 0x0000_0001;

const fn pack_chars(c1: u8, c2: u8, c3: u8, c4: u8) -> u32 {
    ((c1 as u32) << 24) | ((c2 as u32) << 16) | ((c3 as u32) << 8) | (c4 as u32)
}

/// Out-of-band diagnostic dump.
pub const DUMP_TRANSACTION: u32 = pack_chars(b'_', b'D', b'M', b'P');

/// Out-of-band shell command carrying stream handles.
pub const SHELL_COMMAND_TRANSACTION: u32 = pack_chars(b'_', b'C', b'M', b'D');

/// Default maximum frame size accepted by the socket transport.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4 * 1024 * 1024; // 4 MiB

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid message format: {0}")]
    InvalidFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Unknown transaction code: {0:#x}")]
    UnknownTransaction(u32),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Typed methods of the service, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceCall {
    InformAnomalyAlarmFired,
    InformPollAlarmFired,
    SystemRunning,
    StatsCompanionReady,
}

impl ServiceCall {
    pub const ALL: [ServiceCall; 4] = [
        ServiceCall::InformAnomalyAlarmFired,
        ServiceCall::InformPollAlarmFired,
        ServiceCall::SystemRunning,
        ServiceCall::StatsCompanionReady,
    ];

    pub fn code(self) -> u32 {
        FIRST_CALL_TRANSACTION
            + match self {
                ServiceCall::InformAnomalyAlarmFired => 0,
                ServiceCall::InformPollAlarmFired => 1,
                ServiceCall::SystemRunning => 2,
                ServiceCall::StatsCompanionReady => 3,
            }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|call| call.code() == code)
    }

    /// Method name as it appears in denial messages and logs.
    pub fn method_name(self) -> &'static str {
        match self {
            ServiceCall::InformAnomalyAlarmFired => "informAnomalyAlarmFired",
            ServiceCall::InformPollAlarmFired => "informPollAlarmFired",
            ServiceCall::SystemRunning => "systemRunning",
            ServiceCall::StatsCompanionReady => "statsCompanionReady",
        }
    }
}

/// Tagged kind of an inbound transaction, resolved from its wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Call(ServiceCall),
    Dump,
    ShellCommand,
}

impl TransactionKind {
    pub fn from_code(code: u32) -> Result<Self, ProtocolError> {
        match code {
            SHELL_COMMAND_TRANSACTION => Ok(TransactionKind::ShellCommand),
            DUMP_TRANSACTION => Ok(TransactionKind::Dump),
            other => ServiceCall::from_code(other)
                .map(TransactionKind::Call)
                .ok_or(ProtocolError::UnknownTransaction(other)),
        }
    }

    pub fn code(self) -> u32 {
        match self {
            TransactionKind::Call(call) => call.code(),
            TransactionKind::Dump => DUMP_TRANSACTION,
            TransactionKind::ShellCommand => SHELL_COMMAND_TRANSACTION,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::Call(call) => call.method_name(),
            TransactionKind::Dump => "dump",
            TransactionKind::ShellCommand => "shell_command",
        }
    }
}

/// Integer completion code for shell and dump transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompletionCode(pub i32);

impl CompletionCode {
    pub const SUCCESS: CompletionCode = CompletionCode(0);
    /// A stream handle could not be opened.
    pub const RESOURCE_UNAVAILABLE: CompletionCode = CompletionCode(-12);
    pub const UNKNOWN_ERROR: CompletionCode = CompletionCode(i32::MIN);
    pub const NAME_NOT_FOUND: CompletionCode = CompletionCode(-2);
    pub const BAD_VALUE: CompletionCode = CompletionCode(-22);
    pub const UNKNOWN_TRANSACTION: CompletionCode = CompletionCode(-74);

    pub fn is_success(self) -> bool {
        self == Self::SUCCESS
    }

    pub fn as_i32(self) -> i32 {
        self.0
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SUCCESS => "success",
            Self::RESOURCE_UNAVAILABLE => "resource_unavailable",
            Self::UNKNOWN_ERROR => "unknown_error",
            Self::NAME_NOT_FOUND => "name_not_found",
            Self::BAD_VALUE => "bad_value",
            Self::UNKNOWN_TRANSACTION => "unknown_transaction",
            _ => "other",
        }
    }
}

impl fmt::Display for CompletionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.0, self.label())
    }
}

/// Exception class reported to typed-call callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExceptionCode {
    Security,
    NullPointer,
}

impl ExceptionCode {
    pub fn as_i32(self) -> i32 {
        match self {
            ExceptionCode::Security => -1,
            ExceptionCode::NullPointer => -4,
        }
    }
}

/// Outcome of a typed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallStatus {
    Ok,
    Exception { code: ExceptionCode, message: String },
}

impl CallStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CallStatus::Ok)
    }

    pub fn exception_code(&self) -> Option<ExceptionCode> {
        match self {
            CallStatus::Ok => None,
            CallStatus::Exception { code, .. } => Some(*code),
        }
    }
}

/// Request frame sent by socket clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub code: u32,
    #[serde(default)]
    pub args: Vec<String>,
    /// Contents of the shell input stream.
    #[serde(default)]
    pub stdin: String,
}

impl WireRequest {
    pub fn call(call: ServiceCall) -> Self {
        Self { code: call.code(), args: Vec::new(), stdin: String::new() }
    }

    pub fn shell(args: Vec<String>, stdin: String) -> Self {
        Self { code: SHELL_COMMAND_TRANSACTION, args, stdin }
    }

    pub fn dump(args: Vec<String>) -> Self {
        Self { code: DUMP_TRANSACTION, args, stdin: String::new() }
    }
}

/// Reply frame sent back to socket clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireReply {
    CallStatus(CallStatus),
    ShellResult {
        code: CompletionCode,
        stdout: String,
        stderr: String,
    },
    DumpResult {
        code: CompletionCode,
        output: String,
    },
    Error {
        code: CompletionCode,
        message: String,
    },
}

pub fn encode_request(request: &WireRequest, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(request)?;
    check_size(bytes.len(), max)?;
    Ok(bytes)
}

/// Decode a request frame. Size is checked BEFORE parsing.
pub fn decode_request(bytes: &[u8], max: usize) -> Result<WireRequest, ProtocolError> {
    check_size(bytes.len(), max)?;
    Ok(serde_json::from_slice(bytes)?)
}

/// Encode a reply. Oversized replies are replaced by an error reply.
pub fn encode_reply(reply: &WireReply, max: usize) -> Result<Vec<u8>, ProtocolError> {
    let bytes = serde_json::to_vec(reply)?;
    if bytes.len() > max {
        let error = WireReply::Error {
            code: CompletionCode::RESOURCE_UNAVAILABLE,
            message: format!("Reply too large: {} bytes (max {})", bytes.len(), max),
        };
        return Ok(serde_json::to_vec(&error)?);
    }
    Ok(bytes)
}

pub fn decode_reply(bytes: &[u8], max: usize) -> Result<WireReply, ProtocolError> {
    check_size(bytes.len(), max)?;
    Ok(serde_json::from_slice(bytes)?)
}

fn check_size(size: usize, max: usize) -> Result<(), ProtocolError> {
    if size > max {
        return Err(ProtocolError::FrameTooLarge { size, max });
    }
    Ok(())
}

/// Read one length-prefixed frame. Returns `None` on a clean EOF.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    check_size(len, max)?;

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

pub async fn write_frame<W>(writer: &mut W, data: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let len = u32::try_from(data.len())
        .map_err(|_| ProtocolError::InvalidFormat("frame length exceeds u32".into()))?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}
