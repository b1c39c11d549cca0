//! Command dispatch behavior
//!
//! Malformed input is dropped without a reply; validation and actuation
//! failures come back as results with `success: false`.


use dunebugger_starter::dispatch::{BusReplySink, CommandDispatcher, ReplySink};
use dunebugger_starter::gpio::{PinLevel, PinSetup, SimulatedGpio};
use dunebugger_starter::protocol::{InboundEnvelope, ReplyEnvelope, ResultLevel};
use dunebugger_starter::testing::{
    MockProbe, MockTransport, RecordingExecutor, RecordingReplySink,
};
use dunebugger_starter::StarterError;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{connection_config, mock_manager};
use tokio::sync::{mpsc, watch};

const SET_SUBJECT: &str = "dunebugger.starter.dunebugger_set";

fn command(body: &str) -> InboundEnvelope {
    InboundEnvelope::new(SET_SUBJECT, serde_json::json!({ "body": body }).to_string())
}

fn dispatcher(executor: Arc<RecordingExecutor>) -> CommandDispatcher {
    CommandDispatcher::new(executor, "test-starter")
}

#[tokio::test]
async fn test_switch_on_drives_pin_low() {
    let executor = RecordingExecutor::new();
    let outcome = dispatcher(executor.clone())
        .dispatch(&command("sw 5 on"))
        .await
        .unwrap();

    assert_eq!(outcome.routing_key, "dunebugger_set");
    assert!(outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Info);
    assert_eq!(outcome.result.message, "GPIO 5 set to on");
    assert_eq!(executor.calls().await, vec![(5, PinLevel::Low)]);
}

#[tokio::test]
async fn test_switch_off_drives_pin_high() {
    let executor = RecordingExecutor::new();
    let outcome = dispatcher(executor.clone())
        .dispatch(&command("sw 6 off"))
        .await
        .unwrap();

    assert_eq!(outcome.result.message, "GPIO 6 set to off");
    assert_eq!(executor.calls().await, vec![(6, PinLevel::High)]);
}

#[tokio::test]
async fn test_verb_is_case_insensitive() {
    let executor = RecordingExecutor::new();
    let outcome = dispatcher(executor.clone())
        .dispatch(&command("  SW   5 on "))
        .await
        .unwrap();

    assert!(outcome.result.success);
    assert_eq!(executor.calls().await.len(), 1);
}

#[tokio::test]
async fn test_non_numeric_pin_rejected_without_actuation() {
    let executor = RecordingExecutor::new();
    let outcome = dispatcher(executor.clone())
        .dispatch(&command("sw abc on"))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Error);
    assert!(outcome.result.message.contains("Invalid GPIO number"));
    assert!(executor.calls().await.is_empty());
}

#[tokio::test]
async fn test_oversized_pin_reported_as_not_configured() {
    let executor = RecordingExecutor::new();
    let outcome = dispatcher(executor.clone())
        .dispatch(&command("sw 99999999999 on"))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Error);
    assert_eq!(
        outcome.result.message,
        "GPIO pin 99999999999 is not configured"
    );
    assert!(executor.calls().await.is_empty());
}

#[tokio::test]
async fn test_switch_validation_messages() {
    let executor = RecordingExecutor::new();
    let dispatcher = dispatcher(executor.clone());

    let cases = [
        (
            "sw 5",
            "Incorrect number of arguments for sw command. Usage: sw <pin> <on|off>",
        ),
        (
            "sw 5 on now",
            "Incorrect number of arguments for sw command. Usage: sw <pin> <on|off>",
        ),
        (
            "sw 5 ON",
            "Invalid action for sw command, must be 'on' or 'off'",
        ),
        ("sw -5 on", "Invalid GPIO number"),
    ];

    for (body, expected) in cases {
        let outcome = dispatcher.dispatch(&command(body)).await.unwrap();
        assert!(!outcome.result.success, "{body}");
        assert_eq!(outcome.result.level, ResultLevel::Error, "{body}");
        assert_eq!(outcome.result.message, expected, "{body}");
    }
    assert!(executor.calls().await.is_empty());
}

#[tokio::test]
async fn test_unknown_verb_is_warning() {
    let outcome = dispatcher(RecordingExecutor::new())
        .dispatch(&command("foo"))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Warning);
    assert_eq!(outcome.result.message, "Unknown command: foo");
}

#[tokio::test]
async fn test_empty_command_is_error() {
    let dispatcher = dispatcher(RecordingExecutor::new());

    for body in ["", "   \t "] {
        let outcome = dispatcher.dispatch(&command(body)).await.unwrap();
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.level, ResultLevel::Error);
        assert_eq!(outcome.result.message, "Empty command");
    }
}

#[tokio::test]
async fn test_executor_failure_message_is_reported() {
    let executor = RecordingExecutor::failing("GPIO pin 9 is not configured");
    let outcome = dispatcher(executor)
        .dispatch(&command("sw 9 on"))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Error);
    assert_eq!(outcome.result.message, "GPIO pin 9 is not configured");
}

#[tokio::test]
async fn test_executor_panic_is_contained() {
    let executor = RecordingExecutor::panicking("line driver exploded");
    let outcome = dispatcher(executor)
        .dispatch(&command("sw 5 on"))
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Error);
    assert_eq!(
        outcome.result.message,
        "Command processing error: line driver exploded"
    );
}

#[tokio::test]
async fn test_non_string_body_is_error_result() {
    let envelope = InboundEnvelope::new(SET_SUBJECT, r#"{"body": 42}"#);
    let outcome = dispatcher(RecordingExecutor::new())
        .dispatch(&envelope)
        .await
        .unwrap();

    assert!(!outcome.result.success);
    assert_eq!(outcome.result.level, ResultLevel::Error);
}

#[tokio::test]
async fn test_malformed_input_is_dropped() {
    let executor = RecordingExecutor::new();
    let dispatcher = dispatcher(executor.clone());

    let dropped = [
        InboundEnvelope::new(SET_SUBJECT, "not json at all"),
        InboundEnvelope::new(SET_SUBJECT, vec![0xff, 0xfe, 0x00]),
        InboundEnvelope::new(SET_SUBJECT, r#"["sw 5 on"]"#),
        InboundEnvelope::new(SET_SUBJECT, r#"{"command": "sw 5 on"}"#),
        InboundEnvelope::new("dunebugger.starter", r#"{"body": "sw 5 on"}"#),
        InboundEnvelope::new(
            "dunebugger.starter.dunebugger_get",
            r#"{"body": "sw 5 on"}"#,
        ),
    ];

    for envelope in &dropped {
        assert!(
            dispatcher.dispatch(envelope).await.is_none(),
            "{envelope:?} should be dropped"
        );
    }
    assert!(executor.calls().await.is_empty());
}

#[tokio::test]
async fn test_extra_fields_and_segments_are_ignored() {
    let envelope = InboundEnvelope::new(
        "dunebugger.starter.dunebugger_set.extra",
        r#"{"body": "sw 5 on", "sender": "remote", "ts": 1}"#,
    );
    let outcome = dispatcher(RecordingExecutor::new())
        .dispatch(&envelope)
        .await
        .unwrap();

    assert_eq!(outcome.routing_key, "dunebugger_set");
    assert!(outcome.result.success);
}

#[tokio::test]
async fn test_handle_sends_reply_to_recipient() {
    let sink = RecordingReplySink::new();
    let dispatcher =
        dispatcher(RecordingExecutor::new()).with_reply_sink(sink.clone(), "remote");

    dispatcher.handle(&command("sw 5 on")).await;

    let replies = sink.replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].recipient, "remote");
    assert_eq!(replies[0].reply_subject, None);
    assert_eq!(
        replies[0].envelope,
        ReplyEnvelope {
            body: "GPIO 5 set to on".to_string(),
            subject: "dunebugger_set".to_string(),
            source: "test-starter".to_string(),
        }
    );
}

#[tokio::test]
async fn test_handle_replies_to_validation_failures_only() {
    let sink = RecordingReplySink::new();
    let dispatcher =
        dispatcher(RecordingExecutor::new()).with_reply_sink(sink.clone(), "remote");

    dispatcher.handle(&command("foo")).await;
    dispatcher
        .handle(&InboundEnvelope::new(SET_SUBJECT, r#"{"nobody": 1}"#))
        .await;

    let replies = sink.replies().await;
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].envelope.body, "Unknown command: foo");
}

#[tokio::test]
async fn test_handle_without_reply_channel_still_actuates() {
    let mut pins = BTreeMap::new();
    pins.insert(5, PinSetup::Output { initial: PinLevel::High });
    let gpio = Arc::new(SimulatedGpio::new(pins));
    let dispatcher = CommandDispatcher::new(gpio.clone(), "test-starter");

    assert!(!dispatcher.has_reply_channel());
    let outcome = dispatcher.handle(&command("sw 5 on")).await.unwrap();

    assert!(outcome.result.success);
    assert_eq!(gpio.level(5), Some(PinLevel::Low));
}

#[tokio::test]
async fn test_reply_failure_does_not_fail_dispatch() {
    let sink = RecordingReplySink::with_failure();
    let dispatcher =
        dispatcher(RecordingExecutor::new()).with_reply_sink(sink.clone(), "remote");

    let outcome = dispatcher.handle(&command("sw 5 on")).await.unwrap();
    assert!(outcome.result.success);
    assert_eq!(sink.replies().await.len(), 1);
}

#[tokio::test]
async fn test_run_processes_in_delivery_order() {
    let executor = RecordingExecutor::new();
    let dispatcher = dispatcher(executor.clone());
    let (tx, rx) = mpsc::channel(8);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    for body in ["sw 1 on", "sw 2 off", "bogus", "sw 3 on"] {
        tx.send(command(body)).await.unwrap();
    }
    drop(tx);

    dispatcher.run(rx, shutdown_rx).await;

    assert_eq!(
        executor.calls().await,
        vec![(1, PinLevel::Low), (2, PinLevel::High), (3, PinLevel::Low)]
    );
}

#[tokio::test]
async fn test_run_stops_on_shutdown() {
    let dispatcher = dispatcher(RecordingExecutor::new());
    let (_tx, rx) = mpsc::channel(8);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move { dispatcher.run(rx, shutdown_rx).await });
    shutdown_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("dispatcher should stop")
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_bus_reply_sink_publishes_reply_envelope() {
    let (manager, transport) = mock_manager(
        connection_config(Duration::from_secs(1), 3),
        MockTransport::new(),
        MockProbe::all_up(),
    )
    .await;
    assert!(manager.connect().await);

    let sink = BusReplySink::new(manager, "dunebugger", Duration::from_secs(5));
    let reply = ReplyEnvelope {
        body: "GPIO 5 set to on".to_string(),
        subject: "dunebugger_set".to_string(),
        source: "test-starter".to_string(),
    };
    sink.send(&reply, "remote", None).await.unwrap();

    let published = transport.published_json().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "dunebugger.remote.dunebugger_set");
    assert_eq!(
        published[0].1,
        serde_json::json!({
            "body": "GPIO 5 set to on",
            "subject": "dunebugger_set",
            "source": "test-starter"
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_bus_reply_sink_explicit_subject() {
    let (manager, transport) = mock_manager(
        connection_config(Duration::from_secs(1), 3),
        MockTransport::new(),
        MockProbe::all_up(),
    )
    .await;
    assert!(manager.connect().await);

    let sink = BusReplySink::new(manager, "dunebugger", Duration::from_secs(5));
    let reply = ReplyEnvelope {
        body: "ok".to_string(),
        subject: "dunebugger_set".to_string(),
        source: "test-starter".to_string(),
    };
    sink.send(&reply, "remote", Some("custom.reply.subject"))
        .await
        .unwrap();

    assert_eq!(transport.published().await[0].0, "custom.reply.subject");
}

#[tokio::test(start_paused = true)]
async fn test_bus_reply_sink_fails_when_disconnected() {
    let (manager, transport) = mock_manager(
        connection_config(Duration::from_secs(1), 3),
        MockTransport::new(),
        MockProbe::all_up(),
    )
    .await;

    let sink = BusReplySink::new(manager, "dunebugger", Duration::from_secs(5));
    let reply = ReplyEnvelope {
        body: "ok".to_string(),
        subject: "dunebugger_set".to_string(),
        source: "test-starter".to_string(),
    };
    let result = sink.send(&reply, "remote", None).await;

    assert!(matches!(result, Err(StarterError::PublishFailed { .. })));
    assert!(transport.published().await.is_empty());
}
