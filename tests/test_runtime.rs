//! Runtime actor tests
//!
//! Run under tokio's paused clock so deferred calls fire as soon as the
//! runtime goes idle, without real waiting.

use mqttsn_filter::config::SessionConfig;
use mqttsn_filter::filter::MqttsnFilter;
use mqttsn_filter::protocol::DataRecord;
use mqttsn_filter::runtime::{FilterOutput, FilterRuntime, SpawnedFilter, TokioClock};
use mqttsn_filter::testing::{EngineCall, HostAction, MockEngine};
use mqttsn_filter::FilterError;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_test::assert_ok;

const CONNACK: &[u8] = b"CONNACK";

fn spawn_filter(engine: &MockEngine) -> SpawnedFilter {
    let mut config = SessionConfig::new(Duration::from_secs(10), 3);
    config.client_id = "runtime-node".to_string();
    config.set_default_topic("out");
    let filter = MqttsnFilter::with_clock(engine.clone(), TokioClock).with_config(config);
    FilterRuntime::spawn(filter, 32).unwrap()
}

async fn next_transport(outputs: &mut mpsc::Receiver<FilterOutput>) -> DataRecord {
    match outputs.recv().await {
        Some(FilterOutput::ToTransport(record)) => record,
        other => panic!("expected transport output, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_queued_publish_sent_after_connect() {
    let engine = MockEngine::new();
    engine.accept_connect_on(CONNACK);
    let SpawnedFilter {
        handle,
        mut outputs,
        task,
    } = spawn_filter(&engine);

    assert_ok!(handle.transport_connected().await);
    assert_eq!(next_transport(&mut outputs).await.payload.as_ref(), b"CONNECT");

    assert_ok!(handle.outbound(DataRecord::new(&b"early"[..])).await);
    assert_ok!(handle.inbound(DataRecord::new(CONNACK)).await);

    let published = next_transport(&mut outputs).await;
    assert_eq!(published.payload.as_ref(), b"early");
    assert_eq!(published.properties.get("mqttsn.topic"), Some(&json!("out")));

    assert_ok!(handle.stop().await);
    assert_eq!(next_transport(&mut outputs).await.payload.as_ref(), b"DISCONNECT");
    assert_ok!(task.await);
    assert!(outputs.recv().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_deferred_call_fires_on_tokio_clock() {
    let engine = MockEngine::new();
    engine.on_connect(vec![HostAction::ArmDeferred(5_000)]);
    engine.on_next_tick(vec![HostAction::SendBytes(b"PINGREQ".to_vec())]);
    let SpawnedFilter {
        handle,
        mut outputs,
        task,
    } = spawn_filter(&engine);
    let start = tokio::time::Instant::now();

    assert_ok!(handle.transport_connected().await);
    assert_eq!(next_transport(&mut outputs).await.payload.as_ref(), b"CONNECT");

    let ping = next_transport(&mut outputs).await;
    assert_eq!(ping.payload.as_ref(), b"PINGREQ");
    assert!(start.elapsed() >= Duration::from_millis(5_000));
    assert!(engine.calls().contains(&EngineCall::Tick(5_000)));

    assert_ok!(handle.stop().await);
    assert_ok!(task.await);
}

#[tokio::test]
async fn test_inbound_messages_reach_pipeline() {
    let engine = MockEngine::new();
    engine.accept_connect_on(CONNACK);
    engine.script(
        b"PUBLISH",
        vec![HostAction::Deliver(mqttsn_filter::engine::DeliveredMessage {
            topic: "cmd".into(),
            payload: bytes::Bytes::from_static(b"go"),
            qos: mqttsn_filter::Qos::AtLeastOnce,
            retained: false,
        })],
    );
    let SpawnedFilter {
        handle,
        mut outputs,
        task,
    } = spawn_filter(&engine);

    assert_ok!(handle.transport_connected().await);
    assert_ok!(handle.inbound(DataRecord::new(CONNACK)).await);
    assert_ok!(handle.inbound(DataRecord::new(&b"PUBLISH"[..])).await);

    let delivered = loop {
        match outputs.recv().await {
            Some(FilterOutput::ToPipeline(record)) => break record,
            Some(_) => continue,
            None => panic!("runtime closed before delivery"),
        }
    };
    assert_eq!(delivered.payload.as_ref(), b"go");
    assert_eq!(delivered.properties.get("mqttsn.topic"), Some(&json!("cmd")));

    assert_ok!(handle.stop().await);
    assert_ok!(task.await);
}

#[tokio::test]
async fn test_publish_errors_surface_as_output() {
    let engine = MockEngine::new();
    let SpawnedFilter {
        handle,
        mut outputs,
        task,
    } = spawn_filter(&engine);

    assert_ok!(handle.outbound(DataRecord::new(&b"nowhere"[..])).await);

    match outputs.recv().await {
        Some(FilterOutput::Error(FilterError::TransportUnavailable)) => {}
        other => panic!("expected transport error, got {other:?}"),
    }

    assert_ok!(handle.stop().await);
    assert_ok!(task.await);
}

#[tokio::test]
async fn test_config_change_reports_settings() {
    let engine = MockEngine::new();
    let SpawnedFilter {
        handle,
        mut outputs,
        task,
    } = spawn_filter(&engine);

    let update = json!({"mqttsn.client": "renamed"}).as_object().cloned().unwrap();
    assert_ok!(handle.apply_config(update).await);

    match outputs.recv().await {
        Some(FilterOutput::ConfigChanged(settings)) => assert_eq!(settings.client_id, "renamed"),
        other => panic!("expected config change, got {other:?}"),
    }

    let mut settings = handle.current_settings().await.unwrap();
    assert_eq!(settings.client_id, "renamed");
    settings.keep_alive = 30;
    assert_ok!(handle.reconfigure(settings).await);
    assert!(matches!(
        outputs.recv().await,
        Some(FilterOutput::ConfigChanged(s)) if s.keep_alive == 30
    ));

    assert_ok!(handle.stop().await);
    assert_ok!(task.await);
}

#[tokio::test]
async fn test_dropping_handles_stops_runtime() {
    let engine = MockEngine::new();
    let SpawnedFilter { handle, task, .. } = spawn_filter(&engine);

    drop(handle);

    assert_ok!(task.await);
}

#[test]
fn test_spawn_rejected_configuration() {
    let engine = MockEngine::new();
    engine.fail_set_retry_count(mqttsn_filter::engine::EngineErrorCode::BadParam);
    let filter = MqttsnFilter::new(engine);

    // rejected before a task is spawned, so no runtime is needed
    let result = FilterRuntime::spawn(filter, 4);
    assert!(matches!(result, Err(FilterError::Config { .. })));
}
