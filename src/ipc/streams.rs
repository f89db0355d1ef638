//! Byte-stream handles carried by out-of-band transactions.
//!
//! A [`StreamHandle`] is inert until opened in a specific direction. Opened
//! streams are held by a [`ShellStreams`] guard so that they are released on
//! every exit path: explicitly via [`ShellStreams::release`], or on drop. A
//! dropped guard hands its writers to a background flush and close when a
//! tokio runtime is available; otherwise they are only dropped.

use std::fmt;
use std::io;
#[cfg(unix)]
use std::os::fd::OwnedFd;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Stream handle is closed")]
    Closed,

    #[error("Stream handle cannot be opened for {0}")]
    WrongMode(&'static str),

    #[error("Failed to open descriptor: {0}")]
    Io(#[from] io::Error),
}

/// A stream handle as received from the transport.
pub enum StreamHandle {
    #[cfg(unix)]
    Fd(OwnedFd),
    Reader(BoxedReader),
    Writer(BoxedWriter),
    Closed,
}

impl StreamHandle {
    pub fn reader(reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        StreamHandle::Reader(Box::new(reader))
    }

    pub fn writer(writer: impl AsyncWrite + Send + Unpin + 'static) -> Self {
        StreamHandle::Writer(Box::new(writer))
    }

    pub fn open_read(self) -> Result<BoxedReader, StreamError> {
        match self {
            #[cfg(unix)]
            StreamHandle::Fd(fd) => Ok(Box::new(open_fd(fd)?)),
            StreamHandle::Reader(reader) => Ok(reader),
            StreamHandle::Writer(_) => Err(StreamError::WrongMode("reading")),
            StreamHandle::Closed => Err(StreamError::Closed),
        }
    }

    pub fn open_write(self) -> Result<BoxedWriter, StreamError> {
        match self {
            #[cfg(unix)]
            StreamHandle::Fd(fd) => Ok(Box::new(open_fd(fd)?)),
            StreamHandle::Writer(writer) => Ok(writer),
            StreamHandle::Reader(_) => Err(StreamError::WrongMode("writing")),
            StreamHandle::Closed => Err(StreamError::Closed),
        }
    }
}

#[cfg(unix)]
fn open_fd(fd: OwnedFd) -> Result<tokio::fs::File, StreamError> {
    let file = std::fs::File::from(fd);
    // Fails on a descriptor that is no longer valid.
    file.metadata()?;
    Ok(tokio::fs::File::from_std(file))
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            StreamHandle::Fd(fd) => f.debug_tuple("Fd").field(fd).finish(),
            StreamHandle::Reader(_) => f.write_str("Reader(..)"),
            StreamHandle::Writer(_) => f.write_str("Writer(..)"),
            StreamHandle::Closed => f.write_str("Closed"),
        }
    }
}

/// Input, output and error streams of one shell invocation.
///
/// Each slot holds a stream only if it opened successfully.
pub struct ShellStreams {
    input: Option<BoxedReader>,
    output: Option<BoxedWriter>,
    error: Option<BoxedWriter>,
}

impl ShellStreams {
    /// Open all three handles. Streams that open are kept even when another
    /// one fails, so the caller can still release them.
    pub fn open(
        input: StreamHandle,
        output: StreamHandle,
        error: StreamHandle,
    ) -> (Self, Result<(), StreamError>) {
        let mut first_error = None;
        let input = keep_opened(input.open_read(), &mut first_error);
        let output = keep_opened(output.open_write(), &mut first_error);
        let error = keep_opened(error.open_write(), &mut first_error);

        let streams = Self { input, output, error };
        match first_error {
            Some(e) => (streams, Err(e)),
            None => (streams, Ok(())),
        }
    }

    /// Borrow all three streams, or `None` if any failed to open.
    pub fn parts(&mut self) -> Option<(&mut BoxedReader, &mut BoxedWriter, &mut BoxedWriter)> {
        match (&mut self.input, &mut self.output, &mut self.error) {
            (Some(input), Some(output), Some(error)) => Some((input, output, error)),
            _ => None,
        }
    }

    pub fn opened_count(&self) -> usize {
        usize::from(self.input.is_some())
            + usize::from(self.output.is_some())
            + usize::from(self.error.is_some())
    }

    /// Flush and close every opened stream. Returns how many were released.
    pub async fn release(mut self) -> usize {
        let mut released = 0;
        if self.input.take().is_some() {
            released += 1;
        }
        for (name, slot) in [("output", &mut self.output), ("error", &mut self.error)] {
            if let Some(mut writer) = slot.take() {
                close_writer(&mut writer, name).await;
                released += 1;
            }
        }
        released
    }
}

impl Drop for ShellStreams {
    fn drop(&mut self) {
        let writers: Vec<_> = [("output", self.output.take()), ("error", self.error.take())]
            .into_iter()
            .filter_map(|(name, slot)| slot.map(|writer| (name, writer)))
            .collect();
        if writers.is_empty() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    for (name, mut writer) in writers {
                        close_writer(&mut writer, name).await;
                    }
                });
            }
            Err(_) => tracing::debug!("no runtime, dropping shell streams without flush"),
        }
    }
}

fn keep_opened<T>(result: Result<T, StreamError>, first_error: &mut Option<StreamError>) -> Option<T> {
    match result {
        Ok(stream) => Some(stream),
        Err(e) => {
            first_error.get_or_insert(e);
            None
        }
    }
}

/// Flush then shut down a writer; failures are logged, not returned.
pub async fn close_writer(writer: &mut BoxedWriter, name: &str) {
    if let Err(e) = writer.flush().await {
        tracing::debug!(stream = name, error = %e, "flush failed during release");
    }
    if let Err(e) = writer.shutdown().await {
        tracing::debug!(stream = name, error = %e, "close failed during release");
    }
}

/// Shared in-memory writer used by the socket transport to capture output.
#[derive(Debug, Clone, Default)]
pub struct CaptureBuffer {
    data: Arc<Mutex<Vec<u8>>>,
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }
}

impl AsyncWrite for CaptureBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.data.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
