//! Config CLI subcommands: show, defaults, validate.
//!
//! These commands read configuration directly from environment variables
//! without requiring an IPC connection to a running server.

use crate::config::{self, EffectiveConfig};
use crate::ipc::protocol::DEFAULT_MAX_FRAME_SIZE;
use crate::shell::DEFAULT_MAX_CONFIG_BYTES;

/// Print effective config as key-value pairs to stdout.
pub fn run_show() {
    let cfg = config::load().effective_config();
    for line in render(&cfg) {
        println!("{}", line);
    }
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    println!("STATSD_SOCKET_PATH={}", config::DEFAULT_SOCKET_PATH);
    println!("STATSD_IPC_FRAME_LIMIT={}", DEFAULT_MAX_FRAME_SIZE);
    println!("STATSD_MAX_CONNECTIONS={}", config::DEFAULT_MAX_CONNECTIONS);
    println!("STATSD_MAX_CONFIG_BYTES={}", DEFAULT_MAX_CONFIG_BYTES);
    println!("STATSD_SHUTDOWN_TIMEOUT={}", config::DEFAULT_SHUTDOWN_TIMEOUT_SECS);
    println!("STATSD_LOG_DIR={}", config::DEFAULT_LOG_DIR);
    println!("STATSD_LOG_FORMAT=json");
    println!("STATSD_LOG_LEVEL=info");
}

/// Validate configuration for obvious misconfigurations.
///
/// Returns 0 if valid, 1 if any warnings are found.
pub fn run_validate() -> i32 {
    let warnings = validate(&config::load().effective_config());
    for warning in &warnings {
        eprintln!("WARNING: {}", warning);
    }
    if warnings.is_empty() {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn validate(cfg: &EffectiveConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    // A config blob travels inside one request frame.
    if cfg.max_config_bytes > cfg.ipc_frame_limit {
        warnings.push(format!(
            "STATSD_MAX_CONFIG_BYTES ({}) > STATSD_IPC_FRAME_LIMIT ({}); large configs will be cut off by the transport",
            cfg.max_config_bytes, cfg.ipc_frame_limit
        ));
    }

    if !cfg.socket_path.starts_with('/') {
        warnings.push(format!(
            "STATSD_SOCKET_PATH ({}) is relative; clients started elsewhere will not find it",
            cfg.socket_path
        ));
    }

    if !std::path::Path::new(&cfg.log_dir).is_dir() {
        warnings.push(format!(
            "STATSD_LOG_DIR ({}) does not exist; print-stats-log will report every tag as missing",
            cfg.log_dir
        ));
    }

    warnings
}

fn render(cfg: &EffectiveConfig) -> Vec<String> {
    vec![
        format!("STATSD_SOCKET_PATH={}", cfg.socket_path),
        format!("STATSD_IPC_FRAME_LIMIT={}", cfg.ipc_frame_limit),
        format!("STATSD_MAX_CONNECTIONS={}", cfg.max_connections),
        format!("STATSD_MAX_CONFIG_BYTES={}", cfg.max_config_bytes),
        format!("STATSD_SHUTDOWN_TIMEOUT={}", cfg.shutdown_timeout_secs),
        format!("STATSD_LOG_DIR={}", cfg.log_dir),
        format!("STATSD_LOG_FORMAT={}", cfg.log_format),
        format!("STATSD_LOG_LEVEL={}", cfg.log_level),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(log_dir: &str) -> EffectiveConfig {
        EffectiveConfig {
            socket_path: "/var/run/statsd/statsd.sock".to_string(),
            ipc_frame_limit: 4 * 1024 * 1024,
            max_connections: 32,
            max_config_bytes: 1024 * 1024,
            shutdown_timeout_secs: 10,
            log_dir: log_dir.to_string(),
            log_format: "json",
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_valid_config_has_no_warnings() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = sample(&dir.path().display().to_string());
        assert!(validate(&cfg).is_empty());
    }

    #[test]
    fn test_config_limit_above_frame_limit_warns() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = sample(&dir.path().display().to_string());
        cfg.max_config_bytes = cfg.ipc_frame_limit + 1;
        let warnings = validate(&cfg);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("STATSD_MAX_CONFIG_BYTES"));
    }

    #[test]
    fn test_missing_log_dir_and_relative_socket_warn() {
        let mut cfg = sample("/nonexistent/statsd/logs");
        cfg.socket_path = "statsd.sock".to_string();
        assert_eq!(validate(&cfg).len(), 2);
    }

    #[test]
    fn test_render_includes_all_fields() {
        let lines = render(&sample("/tmp"));
        assert_eq!(lines.len(), 8);
        assert!(lines.contains(&"STATSD_MAX_CONNECTIONS=32".to_string()));
        assert!(lines.contains(&"STATSD_LOG_FORMAT=json".to_string()));
    }
}
