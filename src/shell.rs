//! Textual command shell reachable through the shell-command transaction.
//!
//! Subcommands:
//! - `print-stats-log <tag> [timestamp_threshold]` prints persisted logs
//! - `config` loads a configuration blob from the input stream
//!
//! Anything else prints usage and succeeds.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ipc::CompletionCode;
use crate::subsystems::{ConfigKey, ConfigProcessor, LogReader, StatsdConfig};
use crate::telemetry::{log_security_event, SecurityEvent};

/// Default upper bound on a configuration blob read from the input stream.
pub const DEFAULT_MAX_CONFIG_BYTES: usize = 1024 * 1024; // 1 MiB

const USAGE: &str = "Usage:\n\
\t print-stats-log [tag_required] [timestamp_nsec_optional]\n\
\t config\t Loads a new config from command-line (must be a JSON-encoded StatsdConfig).\n";

pub struct CommandShell {
    log_reader: Arc<dyn LogReader>,
    processor: Arc<dyn ConfigProcessor>,
    max_config_bytes: usize,
}

impl CommandShell {
    pub fn new(
        log_reader: Arc<dyn LogReader>,
        processor: Arc<dyn ConfigProcessor>,
        max_config_bytes: usize,
    ) -> Self {
        Self { log_reader, processor, max_config_bytes }
    }

    pub async fn run(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        output: &mut (dyn AsyncWrite + Send + Unpin),
        error: &mut (dyn AsyncWrite + Send + Unpin),
        args: &[String],
    ) -> CompletionCode {
        match args.first().map(String::as_str) {
            Some("print-stats-log") if args.len() > 1 => {
                let threshold = args.get(2).map_or(0, |text| parse_threshold(text));
                self.print_stats_log(output, &args[1], threshold).await
            }
            Some("config") => self.load_config(input, error).await,
            _ => {
                print_usage(output).await;
                CompletionCode::SUCCESS
            }
        }
    }

    async fn print_stats_log(
        &self,
        output: &mut (dyn AsyncWrite + Send + Unpin),
        tag: &str,
        threshold: i64,
    ) -> CompletionCode {
        tracing::debug!(tag, threshold, "print-stats-log");
        self.log_reader.read_stats_logs(output, tag, threshold).await
    }

    async fn load_config(
        &self,
        input: &mut (dyn AsyncRead + Send + Unpin),
        error: &mut (dyn AsyncWrite + Send + Unpin),
    ) -> CompletionCode {
        let limit = self.max_config_bytes;
        let mut content = Vec::new();
        let mut bounded = input.take(limit as u64 + 1);
        if let Err(e) = bounded.read_to_end(&mut content).await {
            tracing::warn!(error = %e, "config read failed");
            report(error, "Config could not be read\n").await;
            return CompletionCode::UNKNOWN_ERROR;
        }
        if content.len() > limit {
            let limit_text = limit.to_string();
            log_security_event(
                SecurityEvent::ConfigRejected,
                "config blob exceeds size limit",
                &[("max_bytes", &limit_text)],
            );
            report(error, "Config exceeds the maximum size\n").await;
            return CompletionCode::UNKNOWN_ERROR;
        }

        match StatsdConfig::decode(&content) {
            Ok(config) => {
                tracing::debug!(?config, "config parsed from command line");
                let config_id = config.config_id.to_string();
                self.processor.update_config(ConfigKey::SHELL, config);
                log_security_event(
                    SecurityEvent::ConfigApplied,
                    "config loaded from shell",
                    &[("config_id", &config_id)],
                );
                CompletionCode::SUCCESS
            }
            Err(e) => {
                tracing::debug!(error = %e, "config failed to be parsed");
                log_security_event(SecurityEvent::ConfigRejected, "config failed to be parsed", &[]);
                report(error, "Config failed to be parsed\n").await;
                CompletionCode::UNKNOWN_ERROR
            }
        }
    }
}

async fn print_usage(output: &mut (dyn AsyncWrite + Send + Unpin)) {
    if let Err(e) = output.write_all(USAGE.as_bytes()).await {
        tracing::debug!(error = %e, "usage write failed");
    }
}

async fn report(error: &mut (dyn AsyncWrite + Send + Unpin), message: &str) {
    if let Err(e) = error.write_all(message.as_bytes()).await {
        tracing::debug!(error = %e, "error stream write failed");
    }
}

/// Parse a decimal timestamp the way `strtol` does: optional ASCII whitespace and
/// sign, then the longest digit prefix. No digits yields 0; overflow saturates.
pub fn parse_threshold(text: &str) -> i64 {
    let trimmed = text.trim_start_matches(|c: char| c.is_ascii_whitespace() || c == '\x0b');
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        let digit = i64::from(byte - b'0');
        let next = value
            .checked_mul(10)
            .and_then(|v| if negative { v.checked_sub(digit) } else { v.checked_add(digit) });
        match next {
            Some(next) => value = next,
            None => return if negative { i64::MIN } else { i64::MAX },
        }
    }
    value
}
