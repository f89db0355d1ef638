//! Service configuration loaded from environment variables.
//!
//! All values come from `STATSD_*` environment variables with defaults.
//! Invalid values fall back to defaults without crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `STATSD_SOCKET_PATH` | /var/run/statsd/statsd.sock | IPC socket path |
//! | `STATSD_IPC_FRAME_LIMIT` | 4194304 | Max IPC frame size (bytes) |
//! | `STATSD_MAX_CONNECTIONS` | 32 | Max concurrent IPC connections |
//! | `STATSD_MAX_CONFIG_BYTES` | 1048576 | Max config blob read by the shell |
//! | `STATSD_SHUTDOWN_TIMEOUT` | 10 | Graceful shutdown timeout (secs) |
//! | `STATSD_LOG_DIR` | /var/lib/statsd/logs | Directory of persisted stats logs |
//! | `STATSD_LOG_FORMAT` | json | `json` or `pretty` |
//! | `STATSD_LOG_LEVEL` | info | Log filter directive |

use std::path::PathBuf;
use std::time::Duration;

use crate::ipc::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::ipc::ConnectionConfig;
#[cfg(unix)]
use crate::ipc::IpcServerConfig;
use crate::shell::DEFAULT_MAX_CONFIG_BYTES;
use crate::telemetry::{LogConfig, LogFormat};

pub const DEFAULT_SOCKET_PATH: &str = "/var/run/statsd/statsd.sock";
pub const DEFAULT_LOG_DIR: &str = "/var/lib/statsd/logs";
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

const MIN_FRAME: usize = 4096; // floor: 4 KiB
const MIN_CONFIG_BYTES: usize = 1024;

/// Effective configuration summary, printed by `statsd config show`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectiveConfig {
    pub socket_path: String,
    pub ipc_frame_limit: usize,
    pub max_connections: usize,
    pub max_config_bytes: usize,
    pub shutdown_timeout_secs: u64,
    pub log_dir: String,
    pub log_format: &'static str,
    pub log_level: String,
}

/// All service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub socket_path: PathBuf,
    pub max_frame_size: usize,
    pub connections: ConnectionConfig,
    pub max_config_bytes: usize,
    pub shutdown_timeout: Duration,
    pub log_dir: PathBuf,
    pub log: LogConfig,
}

fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_path(key: &str, default: &str) -> PathBuf {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => PathBuf::from(val.trim()),
        _ => PathBuf::from(default),
    }
}

fn load_log_config() -> LogConfig {
    let format = std::env::var("STATSD_LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    let level = std::env::var("STATSD_LOG_LEVEL")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "info".to_string());
    LogConfig { format, level, output_path: None }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    let max_frame_size = parse_usize("STATSD_IPC_FRAME_LIMIT", DEFAULT_MAX_FRAME_SIZE).max(MIN_FRAME);
    let max_connections = parse_usize("STATSD_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS).max(1);
    let max_config_bytes =
        parse_usize("STATSD_MAX_CONFIG_BYTES", DEFAULT_MAX_CONFIG_BYTES).max(MIN_CONFIG_BYTES);
    let shutdown_secs = parse_u64("STATSD_SHUTDOWN_TIMEOUT", DEFAULT_SHUTDOWN_TIMEOUT_SECS).max(1);

    EnvConfig {
        socket_path: parse_path("STATSD_SOCKET_PATH", DEFAULT_SOCKET_PATH),
        max_frame_size,
        connections: ConnectionConfig { max_connections },
        max_config_bytes,
        shutdown_timeout: Duration::from_secs(shutdown_secs),
        log_dir: parse_path("STATSD_LOG_DIR", DEFAULT_LOG_DIR),
        log: load_log_config(),
    }
}

impl EnvConfig {
    #[cfg(unix)]
    pub fn ipc_server(&self) -> IpcServerConfig {
        IpcServerConfig {
            max_frame_size: self.max_frame_size,
            connections: self.connections.clone(),
        }
    }

    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            socket_path: self.socket_path.display().to_string(),
            ipc_frame_limit: self.max_frame_size,
            max_connections: self.connections.max_connections,
            max_config_bytes: self.max_config_bytes,
            shutdown_timeout_secs: self.shutdown_timeout.as_secs(),
            log_dir: self.log_dir.display().to_string(),
            log_format: self.log.format.as_str(),
            log_level: self.log.level.clone(),
        }
    }
}
