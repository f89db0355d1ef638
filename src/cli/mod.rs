//! CLI module for statsd commands.
//!
//! Client subcommands talk to a running server over its socket; `config`
//! subcommands only read the environment.
//!
//! ## Usage
//!
//! ```bash
//! statsd shell print-stats-log <tag> [ts]   # Run a shell command
//! statsd shell config < config.json          # Load a config from stdin
//! statsd call system-running                 # Invoke a typed method
//! statsd dump [args...]                      # Diagnostic dump
//! ```

#[cfg(unix)]
pub mod client;
pub mod config_cmd;

#[cfg(unix)]
pub use client::{run_call, run_dump, run_shell, CliError, CliIpcClient};

/// Get socket path from environment or use default.
pub fn get_socket_path() -> String {
    std::env::var("STATSD_SOCKET_PATH")
        .ok()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| crate::config::DEFAULT_SOCKET_PATH.to_string())
}
