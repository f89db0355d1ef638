//! Shell-command transaction handling.
//!
//! Every invocation delivers exactly one completion code and releases every
//! stream it opened, whatever the command does.

mod common;

use std::sync::atomic::Ordering;

use common::{CountingRegistry, FakeLogReader, Harness, TrackingReader, TrackingWriter};
use statsd_service::ipc::{
    CallerIdentity, CompletionCode, ResultReceiver, ShellCallback, ShellRequest, StreamHandle,
    Transaction, TransactionReply,
};
use statsd_service::subsystems::ConfigKey;

struct Invocation {
    code: CompletionCode,
    stdout: TrackingWriter,
    stderr: TrackingWriter,
    input_dropped: bool,
}

async fn invoke(harness: &Harness, args: &[&str], stdin: &str) -> Invocation {
    let (reader, dropped) = TrackingReader::new(stdin.as_bytes().to_vec());
    let stdout = TrackingWriter::default();
    let stderr = TrackingWriter::default();
    let (result, receiver) = ResultReceiver::channel();

    let request = ShellRequest {
        input: StreamHandle::reader(reader),
        output: StreamHandle::writer(stdout.clone()),
        error: StreamHandle::writer(stderr.clone()),
        args: args.iter().map(|s| s.to_string()).collect(),
        callback: Some(ShellCallback(7)),
        result,
    };

    let reply = harness
        .dispatcher
        .dispatch(CallerIdentity::from_uid(2000), Transaction::ShellCommand(request))
        .await;
    assert_eq!(reply, TransactionReply::ShellDelivered);

    let code = receiver.await.expect("exactly one completion code");
    Invocation { code, stdout, stderr, input_dropped: dropped.load(Ordering::SeqCst) }
}

fn harness_with(reader: FakeLogReader) -> Harness {
    Harness::new(CountingRegistry::empty(), reader)
}

fn assert_released(inv: &Invocation) {
    assert!(inv.input_dropped, "input stream released");
    assert!(inv.stdout.is_closed(), "output stream closed");
    assert!(inv.stderr.is_closed(), "error stream closed");
}

// ---------------------------------------------------------------------------
// print-stats-log
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_print_stats_log_with_threshold() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let inv = invoke(&harness, &["print-stats-log", "myTag", "1500"], "").await;

    assert_eq!(inv.code, CompletionCode::SUCCESS);
    assert_eq!(harness.log_reader.calls(), vec![("myTag".to_string(), 1500)]);
    assert_eq!(inv.stdout.text(), "myTag since 1500\n");
    assert_released(&inv);
}

#[tokio::test]
async fn test_print_stats_log_without_threshold_uses_zero() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    invoke(&harness, &["print-stats-log", "myTag"], "").await;
    assert_eq!(harness.log_reader.calls(), vec![("myTag".to_string(), 0)]);
}

#[tokio::test]
async fn test_print_stats_log_malformed_threshold_is_permissive() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    invoke(&harness, &["print-stats-log", "t", "notanumber"], "").await;
    invoke(&harness, &["print-stats-log", "t", "42abc"], "").await;
    assert_eq!(
        harness.log_reader.calls(),
        vec![("t".to_string(), 0), ("t".to_string(), 42)]
    );
}

#[tokio::test]
async fn test_print_stats_log_returns_reader_code_unchanged() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::NAME_NOT_FOUND));
    let inv = invoke(&harness, &["print-stats-log", "missing"], "").await;
    assert_eq!(inv.code, CompletionCode::NAME_NOT_FOUND);
    assert_released(&inv);
}

#[tokio::test]
async fn test_print_stats_log_without_tag_prints_usage() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let inv = invoke(&harness, &["print-stats-log"], "").await;
    assert_eq!(inv.code, CompletionCode::SUCCESS);
    assert!(inv.stdout.text().contains("Usage:"));
    assert!(harness.log_reader.calls().is_empty());
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_config_is_forwarded_under_shell_key() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let blob = r#"{"config_id": 12345, "metrics": [{"name": "screen_on", "kind": "count", "tag_id": 29}]}"#;
    let inv = invoke(&harness, &["config"], blob).await;

    assert_eq!(inv.code, CompletionCode::SUCCESS);
    let updates = harness.processor.updates.lock().clone();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].0, ConfigKey(0));
    assert_eq!(updates[0].1.config_id, 12345);
    assert_eq!(updates[0].1.metrics[0].name, "screen_on");
    assert_released(&inv);
}

#[tokio::test]
async fn test_malformed_config_is_not_forwarded() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let inv = invoke(&harness, &["config"], "\u{1}\u{2}garbage").await;

    assert_eq!(inv.code, CompletionCode::UNKNOWN_ERROR);
    assert_eq!(harness.processor.count(), 0);
    assert!(!inv.stderr.text().is_empty(), "reason written to the error stream");
    assert_released(&inv);
}

#[tokio::test]
async fn test_oversize_config_is_not_forwarded() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let padding = " ".repeat(statsd_service::shell::DEFAULT_MAX_CONFIG_BYTES);
    let blob = format!("{}{{\"config_id\": 1}}", padding);
    let inv = invoke(&harness, &["config"], &blob).await;

    assert_eq!(inv.code, CompletionCode::UNKNOWN_ERROR);
    assert_eq!(harness.processor.count(), 0);
}

// ---------------------------------------------------------------------------
// usage and failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_empty_and_unknown_commands_print_usage() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let cases: [&[&str]; 2] = [&[], &["frobnicate"]];
    for args in cases {
        let inv = invoke(&harness, args, "").await;
        assert_eq!(inv.code, CompletionCode::SUCCESS);
        let usage = inv.stdout.text();
        assert!(usage.contains("print-stats-log"));
        assert!(usage.contains("config"));
        assert_released(&inv);
    }
}

#[tokio::test]
async fn test_unopenable_stream_reports_resource_unavailable() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let (reader, input_dropped) = TrackingReader::new(Vec::new());
    let stdout = TrackingWriter::default();
    let (result, receiver) = ResultReceiver::channel();

    let request = ShellRequest {
        input: StreamHandle::reader(reader),
        output: StreamHandle::writer(stdout.clone()),
        error: StreamHandle::Closed,
        args: vec!["print-stats-log".into(), "tag".into()],
        callback: None,
        result,
    };
    harness
        .dispatcher
        .dispatch(CallerIdentity::system(), Transaction::ShellCommand(request))
        .await;

    assert_eq!(receiver.await.unwrap(), CompletionCode::RESOURCE_UNAVAILABLE);
    assert!(harness.log_reader.calls().is_empty(), "command never ran");
    assert!(stdout.is_closed(), "opened output stream still released");
    assert!(input_dropped.load(Ordering::SeqCst), "opened input stream still released");
}

#[tokio::test]
async fn test_wrong_mode_stream_reports_resource_unavailable() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let (result, receiver) = ResultReceiver::channel();
    let request = ShellRequest {
        input: StreamHandle::writer(TrackingWriter::default()),
        output: StreamHandle::writer(TrackingWriter::default()),
        error: StreamHandle::writer(TrackingWriter::default()),
        args: Vec::new(),
        callback: None,
        result,
    };
    harness
        .dispatcher
        .dispatch(CallerIdentity::system(), Transaction::ShellCommand(request))
        .await;
    assert_eq!(receiver.await.unwrap(), CompletionCode::RESOURCE_UNAVAILABLE);
}

#[tokio::test]
async fn test_panicking_command_still_delivers_one_code() {
    let harness = harness_with(FakeLogReader::panicking());
    let inv = invoke(&harness, &["print-stats-log", "boom"], "").await;

    assert_eq!(inv.code, CompletionCode::UNKNOWN_ERROR);
    assert_released(&inv);
}

#[tokio::test]
async fn test_dropped_result_channel_does_not_fail_dispatch() {
    let harness = harness_with(FakeLogReader::returning(CompletionCode::SUCCESS));
    let (result, receiver) = ResultReceiver::channel();
    drop(receiver);
    let request = ShellRequest {
        input: StreamHandle::reader(std::io::Cursor::new(Vec::new())),
        output: StreamHandle::writer(TrackingWriter::default()),
        error: StreamHandle::writer(TrackingWriter::default()),
        args: Vec::new(),
        callback: None,
        result,
    };
    let reply = harness
        .dispatcher
        .dispatch(CallerIdentity::system(), Transaction::ShellCommand(request))
        .await;
    assert_eq!(reply, TransactionReply::ShellDelivered);
}
