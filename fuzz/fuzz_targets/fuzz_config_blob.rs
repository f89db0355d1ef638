//! Fuzz target for shell input parsing.
//!
//! Covers the config blob decoder and the permissive threshold parser.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use statsd_service::shell::parse_threshold;
use statsd_service::subsystems::StatsdConfig;

#[derive(Debug, Arbitrary)]
struct ShellInput<'a> {
    blob: &'a [u8],
    threshold: &'a str,
}

fuzz_target!(|input: ShellInput<'_>| {
    if let Ok(config) = StatsdConfig::decode(input.blob) {
        // Anything that decodes must encode again.
        assert!(config.encode().is_ok());
    }
    let _ = parse_threshold(input.threshold);
});
