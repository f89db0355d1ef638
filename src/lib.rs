//! statsd service front-end
//!
//! The privileged control plane of a telemetry-collection daemon. It receives
//! calls from other processes, checks the caller identity on every privileged
//! method, serves an embedded text shell over the same transport and tracks
//! the liveness of the cooperating `statscompanion` peer.
//!
//! # Security Boundaries
//!
//! - Caller identity: taken from the transport (socket peer credentials), never
//!   from the request body
//! - Privileged methods: system uid only, no side effects on rejection
//! - Shell and dump: unauthenticated, bounded input, exactly one result

pub mod cli;
pub mod companion;
pub mod config;
pub mod ipc;
pub mod service;
pub mod shell;
pub mod shutdown;
pub mod subsystems;
pub mod telemetry;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use companion::{CompanionTracker, InProcessRegistry, ServiceLocator, ServiceRegistry};
use ipc::TransactionDispatcher;
use service::StatsService;
use shell::{CommandShell, DEFAULT_MAX_CONFIG_BYTES};
use shutdown::ShutdownCoordinator;
use subsystems::{ConfigProcessor, ConfigStore, EmptyPuller, FileLogReader, LogReader, StatsPuller};

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub max_config_bytes: usize,
    pub shutdown_timeout: Duration,
    pub log_dir: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_config_bytes: DEFAULT_MAX_CONFIG_BYTES,
            shutdown_timeout: Duration::from_secs(config::DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            log_dir: PathBuf::from(config::DEFAULT_LOG_DIR),
        }
    }
}

impl From<&config::EnvConfig> for RuntimeConfig {
    fn from(env: &config::EnvConfig) -> Self {
        Self {
            max_config_bytes: env.max_config_bytes,
            shutdown_timeout: env.shutdown_timeout,
            log_dir: env.log_dir.clone(),
        }
    }
}

/// External collaborators the front-end delegates to.
#[derive(Clone)]
pub struct Subsystems {
    pub registry: Arc<dyn ServiceRegistry>,
    pub config_processor: Arc<dyn ConfigProcessor>,
    pub puller: Arc<dyn StatsPuller>,
    pub log_reader: Arc<dyn LogReader>,
}

impl Subsystems {
    /// Bundled in-process implementations, reading persisted logs from `log_dir`.
    pub fn in_process(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry: Arc::new(InProcessRegistry::new()),
            config_processor: Arc::new(ConfigStore::new()),
            puller: Arc::new(EmptyPuller),
            log_reader: Arc::new(FileLogReader::new(log_dir)),
        }
    }
}

/// A wired stats service instance.
pub struct Runtime {
    pub config: RuntimeConfig,
    pub dispatcher: Arc<TransactionDispatcher>,
    pub shutdown: ShutdownCoordinator,
    tracker_task: JoinHandle<()>,
}

impl Runtime {
    /// Wire the service and spawn the companion tracker.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: RuntimeConfig, subsystems: Subsystems) -> Self {
        let shutdown = ShutdownCoordinator::new();
        let locator = ServiceLocator::new(subsystems.registry);
        let (tracker, tracker_task) = CompanionTracker::spawn(locator, shutdown.token());

        let service = Arc::new(StatsService::new(subsystems.puller, tracker));
        let shell = CommandShell::new(
            subsystems.log_reader,
            subsystems.config_processor,
            config.max_config_bytes,
        );
        let dispatcher = Arc::new(TransactionDispatcher::new(service, shell));

        Self { config, dispatcher, shutdown, tracker_task }
    }

    pub fn service(&self) -> &StatsService {
        self.dispatcher.service()
    }

    /// Stop accepting work, drain in-flight transactions and stop the tracker.
    pub async fn shutdown(self) -> shutdown::ShutdownResult {
        let result = self.shutdown.initiate(self.config.shutdown_timeout).await;
        if let Err(e) = self.tracker_task.await {
            tracing::warn!(error = %e, "companion tracker task failed");
        }
        result
    }
}
