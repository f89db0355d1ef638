//! Interfaces of the subsystems the service routes calls into.
//!
//! The config processor, the metric puller and the persisted-log reader live
//! outside this crate's core. Only their call signatures matter here; the
//! in-process implementations below are the minimal versions the `statsd`
//! binary runs with.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::ipc::CompletionCode;

/// Configuration slot a config update is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigKey(pub i32);

impl ConfigKey {
    /// Slot used by the `config` shell command. Only one config is active.
    pub const SHELL: ConfigKey = ConfigKey(0);
}

#[derive(Error, Debug)]
pub enum ConfigDecodeError {
    #[error("Malformed config: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Count,
    Event,
    Value,
    Gauge,
    Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricSpec {
    pub name: String,
    pub kind: MetricKind,
    /// Atom tag the metric is computed from.
    pub tag_id: i32,
    #[serde(default)]
    pub bucket_size_millis: Option<i64>,
}

/// A configuration update for the log processor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatsdConfig {
    pub config_id: i64,
    #[serde(default)]
    pub metrics: Vec<MetricSpec>,
}

impl StatsdConfig {
    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigDecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, ConfigDecodeError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Owner of collected data and configuration state.
pub trait ConfigProcessor: Send + Sync {
    fn update_config(&self, key: ConfigKey, config: StatsdConfig);
}

/// Kinds of metrics the puller can fetch on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullKind {
    KernelWakelocks,
}

impl PullKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PullKind::KernelWakelocks => "kernel_wakelocks",
        }
    }
}

#[async_trait]
pub trait StatsPuller: Send + Sync {
    async fn pull(&self, kind: PullKind) -> String;
}

/// Reader of persisted stats logs, used by `print-stats-log`.
#[async_trait]
pub trait LogReader: Send + Sync {
    async fn read_stats_logs(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        tag: &str,
        min_timestamp_ns: i64,
    ) -> CompletionCode;
}

/// In-memory config processor keyed by config slot.
#[derive(Debug, Default)]
pub struct ConfigStore {
    configs: RwLock<HashMap<ConfigKey, StatsdConfig>>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ConfigKey) -> Option<StatsdConfig> {
        self.configs.read().get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.configs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.read().is_empty()
    }
}

impl ConfigProcessor for ConfigStore {
    fn update_config(&self, key: ConfigKey, config: StatsdConfig) {
        tracing::info!(
            config_key = key.0,
            config_id = config.config_id,
            metrics = config.metrics.len(),
            "config updated"
        );
        self.configs.write().insert(key, config);
    }
}

/// Puller with no sources attached; every pull yields empty output.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyPuller;

#[async_trait]
impl StatsPuller for EmptyPuller {
    async fn pull(&self, kind: PullKind) -> String {
        tracing::debug!(kind = kind.as_str(), "no puller registered for kind");
        String::new()
    }
}

/// Reads `<dir>/<tag>.log`, one `<timestamp_ns> <payload>` entry per line.
#[derive(Debug, Clone)]
pub struct FileLogReader {
    dir: PathBuf,
}

impl FileLogReader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn log_path(&self, tag: &str) -> Option<PathBuf> {
        let valid = !tag.is_empty()
            && tag
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !tag.starts_with('.');
        valid.then(|| self.dir.join(format!("{tag}.log")))
    }
}

#[async_trait]
impl LogReader for FileLogReader {
    async fn read_stats_logs(
        &self,
        out: &mut (dyn AsyncWrite + Send + Unpin),
        tag: &str,
        min_timestamp_ns: i64,
    ) -> CompletionCode {
        let Some(path) = self.log_path(tag) else {
            tracing::warn!(tag, "rejected stats log tag");
            return CompletionCode::BAD_VALUE;
        };

        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "stats log not readable");
                return CompletionCode::NAME_NOT_FOUND;
            }
        };

        let mut lines = BufReader::new(file).lines();
        let mut printed = 0usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "stats log read failed");
                    return CompletionCode::UNKNOWN_ERROR;
                }
            };
            let Some((timestamp, payload)) = parse_log_line(&line) else {
                continue;
            };
            if timestamp < min_timestamp_ns {
                continue;
            }
            let entry = format!("{timestamp} {payload}\n");
            if out.write_all(entry.as_bytes()).await.is_err() {
                return CompletionCode::UNKNOWN_ERROR;
            }
            printed += 1;
        }

        tracing::debug!(tag, min_timestamp_ns, printed, "stats log printed");
        CompletionCode::SUCCESS
    }
}

fn parse_log_line(line: &str) -> Option<(i64, &str)> {
    let (timestamp, payload) = line.split_once(' ')?;
    Some((timestamp.parse().ok()?, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::CaptureBuffer;

    #[test]
    fn test_config_decode_requires_config_id() {
        assert!(StatsdConfig::decode(br#"{"metrics": []}"#).is_err());
        assert!(StatsdConfig::decode(b"").is_err());
        assert!(StatsdConfig::decode(b"\x08\x96\x01").is_err());

        let config = StatsdConfig::decode(
            br#"{"config_id": 7, "metrics": [{"name": "screen_on", "kind": "count", "tag_id": 29}]}"#,
        )
        .unwrap();
        assert_eq!(config.config_id, 7);
        assert_eq!(config.metrics[0].kind, MetricKind::Count);
        assert_eq!(config.metrics[0].bucket_size_millis, None);
    }

    #[test]
    fn test_config_decode_rejects_unknown_fields() {
        assert!(StatsdConfig::decode(br#"{"config_id": 1, "extra": true}"#).is_err());
    }

    #[test]
    fn test_config_store_replaces_slot() {
        let store = ConfigStore::new();
        store.update_config(ConfigKey::SHELL, StatsdConfig { config_id: 1, metrics: vec![] });
        store.update_config(ConfigKey::SHELL, StatsdConfig { config_id: 2, metrics: vec![] });
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(ConfigKey::SHELL).map(|c| c.config_id), Some(2));
    }

    #[tokio::test]
    async fn test_file_log_reader_filters_by_threshold() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("battery.log"),
            "100 level=90\n1500 level=80\nnot-a-line\n2000 level=70\n",
        )
        .unwrap();

        let reader = FileLogReader::new(dir.path());
        let buffer = CaptureBuffer::new();
        let mut out = buffer.clone();
        let code = reader.read_stats_logs(&mut out, "battery", 1500).await;

        assert_eq!(code, CompletionCode::SUCCESS);
        assert_eq!(buffer.to_string_lossy(), "1500 level=80\n2000 level=70\n");
    }

    #[tokio::test]
    async fn test_file_log_reader_missing_tag() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileLogReader::new(dir.path());
        let mut out = CaptureBuffer::new();
        let code = reader.read_stats_logs(&mut out, "absent", 0).await;
        assert_eq!(code, CompletionCode::NAME_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_file_log_reader_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let reader = FileLogReader::new(dir.path());
        let mut out = CaptureBuffer::new();
        for tag in ["../etc/passwd", "a/b", ".hidden", ""] {
            let code = reader.read_stats_logs(&mut out, tag, 0).await;
            assert_eq!(code, CompletionCode::BAD_VALUE, "tag {tag:?}");
        }
    }
}
