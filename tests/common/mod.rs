//! Shared fakes for integration tests.

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use statsd_service::companion::{
    DeathRecipient, InProcessRegistry, PeerHandle, ServiceRegistry, StatsCompanion,
    STATS_COMPANION_SERVICE,
};
use statsd_service::companion::PeerError;
use statsd_service::ipc::{CompletionCode, TransactionDispatcher};
use statsd_service::service::StatsService;
use statsd_service::shell::{CommandShell, DEFAULT_MAX_CONFIG_BYTES};
use statsd_service::subsystems::{
    ConfigKey, ConfigProcessor, LogReader, PullKind, StatsPuller, StatsdConfig,
};
use statsd_service::companion::{CompanionTracker, ServiceLocator};
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Streams that record whether they were closed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct TrackingWriter {
    pub data: Arc<Mutex<Vec<u8>>>,
    pub closed: Arc<AtomicBool>,
}

impl TrackingWriter {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.data.lock()).into_owned()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl AsyncWrite for TrackingWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        if self.closed.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed")));
        }
        self.data.lock().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.closed.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

/// Reader over fixed bytes that records when it is dropped.
pub struct TrackingReader {
    data: io::Cursor<Vec<u8>>,
    dropped: Arc<AtomicBool>,
}

impl TrackingReader {
    pub fn new(data: impl Into<Vec<u8>>) -> (Self, Arc<AtomicBool>) {
        let dropped = Arc::new(AtomicBool::new(false));
        let reader = Self { data: io::Cursor::new(data.into()), dropped: Arc::clone(&dropped) };
        (reader, dropped)
    }
}

impl AsyncRead for TrackingReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.data).poll_read(cx, buf)
    }
}

impl Drop for TrackingReader {
    fn drop(&mut self) {
        self.dropped.store(true, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingProcessor {
    pub updates: Mutex<Vec<(ConfigKey, StatsdConfig)>>,
}

impl RecordingProcessor {
    pub fn count(&self) -> usize {
        self.updates.lock().len()
    }
}

impl ConfigProcessor for RecordingProcessor {
    fn update_config(&self, key: ConfigKey, config: StatsdConfig) {
        self.updates.lock().push((key, config));
    }
}

/// Log reader that records its arguments and writes a fixed line.
#[derive(Debug)]
pub struct FakeLogReader {
    pub calls: Mutex<Vec<(String, i64)>>,
    pub code: CompletionCode,
    pub panic_on_read: bool,
}

impl FakeLogReader {
    pub fn returning(code: CompletionCode) -> Self {
        Self { calls: Mutex::new(Vec::new()), code, panic_on_read: false }
    }

    pub fn panicking() -> Self {
        Self { calls: Mutex::new(Vec::new()), code: CompletionCode::SUCCESS, panic_on_read: true }
    }

    pub fn calls(&self) -> Vec<(String, i64)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl LogReader for FakeLogReader {
    async fn read_stats_logs(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        tag: &str,
        min_timestamp_ns: i64,
    ) -> CompletionCode {
        self.calls.lock().push((tag.to_string(), min_timestamp_ns));
        if self.panic_on_read {
            panic!("log reader fault");
        }
        let line = format!("{} since {}\n", tag, min_timestamp_ns);
        if out.write_all(line.as_bytes()).await.is_err() {
            return CompletionCode::UNKNOWN_ERROR;
        }
        self.code
    }
}

#[derive(Debug, Default)]
pub struct CountingPuller {
    pub pulls: AtomicUsize,
}

#[async_trait]
impl StatsPuller for CountingPuller {
    async fn pull(&self, _kind: PullKind) -> String {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        "wakelock_a 12\n".to_string()
    }
}

/// Companion peer that keeps the death recipients linked to it.
#[derive(Default)]
pub struct FakeCompanion {
    pub ready_calls: AtomicUsize,
    pub link_calls: AtomicUsize,
    pub dead: AtomicBool,
    pub recipients: Mutex<Vec<DeathRecipient>>,
}

impl FakeCompanion {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Kill the peer and fire every linked death notification.
    pub fn die(&self) {
        self.dead.store(true, Ordering::SeqCst);
        let recipients = std::mem::take(&mut *self.recipients.lock());
        for recipient in recipients {
            recipient.binder_died();
        }
    }
}

impl StatsCompanion for FakeCompanion {
    fn stats_ready(&self) -> Result<(), PeerError> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(PeerError::DeadObject);
        }
        self.ready_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn link_to_death(&self, recipient: DeathRecipient) -> Result<(), PeerError> {
        self.link_calls.fetch_add(1, Ordering::SeqCst);
        if self.dead.load(Ordering::SeqCst) {
            return Err(PeerError::DeadObject);
        }
        self.recipients.lock().push(recipient);
        Ok(())
    }
}

/// Registry wrapper that counts lookups.
#[derive(Default)]
pub struct CountingRegistry {
    pub inner: InProcessRegistry,
    pub lookups: AtomicUsize,
}

impl CountingRegistry {
    pub fn with_companion(companion: PeerHandle) -> Arc<Self> {
        let registry = Self::default();
        registry.inner.add_service(STATS_COMPANION_SERVICE, companion);
        Arc::new(registry)
    }

    pub fn empty() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn lookup_count(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl ServiceRegistry for CountingRegistry {
    fn check_service(&self, name: &str) -> Option<PeerHandle> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.check_service(name)
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dispatcher: Arc<TransactionDispatcher>,
    pub registry: Arc<CountingRegistry>,
    pub processor: Arc<RecordingProcessor>,
    pub log_reader: Arc<FakeLogReader>,
    pub puller: Arc<CountingPuller>,
    pub shutdown: CancellationToken,
}

impl Harness {
    pub fn new(registry: Arc<CountingRegistry>, log_reader: FakeLogReader) -> Self {
        let shutdown = CancellationToken::new();
        let (tracker, _task) =
            CompanionTracker::spawn(ServiceLocator::new(registry.clone()), shutdown.clone());
        let processor = Arc::new(RecordingProcessor::default());
        let log_reader = Arc::new(log_reader);
        let puller = Arc::new(CountingPuller::default());

        let service = Arc::new(StatsService::new(puller.clone(), tracker));
        let shell = CommandShell::new(log_reader.clone(), processor.clone(), DEFAULT_MAX_CONFIG_BYTES);
        let dispatcher = Arc::new(TransactionDispatcher::new(service, shell));

        Self { dispatcher, registry, processor, log_reader, puller, shutdown }
    }

    pub fn with_registry(registry: Arc<CountingRegistry>) -> Self {
        Self::new(registry, FakeLogReader::returning(CompletionCode::SUCCESS))
    }

    pub fn service(&self) -> &StatsService {
        self.dispatcher.service()
    }

    pub fn tracker(&self) -> &CompanionTracker {
        self.service().tracker()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
