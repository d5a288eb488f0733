//! Tests for log output produced by the filter
//!
//! Captures formatted output of a scoped subscriber and checks what the filter
//! logs, and under which target.

use mqttsn_filter::filter::MqttsnFilter;
use mqttsn_filter::observability::logging::{parse_level, LogFormat};
use mqttsn_filter::observability::ENGINE_LOG_TARGET;
use mqttsn_filter::protocol::DataRecord;
use mqttsn_filter::testing::{HostAction, MockEngine};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct Capture(Arc<Mutex<Vec<u8>>>);

impl Capture {
    fn contents(&self) -> String {
        String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
    }
}

impl Write for Capture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Capture {
    type Writer = Capture;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

fn capture_with(level: Level, run: impl FnOnce()) -> String {
    let capture = Capture::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(capture.clone())
        .with_ansi(false)
        .with_max_level(level)
        .finish();
    tracing::subscriber::with_default(subscriber, run);
    capture.contents()
}

#[test]
fn test_engine_error_log_forwarded_with_engine_target() {
    let engine = MockEngine::new();
    engine.script(b"junk", vec![HostAction::ErrorLog("unexpected frame type".into())]);
    let mut filter = MqttsnFilter::new(engine);

    let output = capture_with(Level::ERROR, || {
        filter.recv_data(DataRecord::new(&b"junk"[..]));
    });

    assert!(output.contains("ERROR"));
    assert!(output.contains(ENGINE_LOG_TARGET));
    assert!(output.contains("unexpected frame type"));
}

#[test]
fn test_byte_traffic_only_at_trace() {
    let run = || {
        let engine = MockEngine::new();
        let mut filter = MqttsnFilter::new(engine);
        filter.start().unwrap();
        filter.socket_connection_report(true);
    };

    let debug_output = capture_with(Level::DEBUG, run);
    assert!(debug_output.contains("Socket connected report"));
    assert!(!debug_output.contains("Sending data"));

    let trace_output = capture_with(Level::TRACE, run);
    assert!(trace_output.contains("Sending data"));
}

#[test]
fn test_log_settings_parsing() {
    assert!(matches!(LogFormat::parse("Pretty"), LogFormat::Pretty));
    assert!(matches!(LogFormat::parse("COMPACT"), LogFormat::Compact));
    assert!(matches!(LogFormat::parse("yaml"), LogFormat::Json));
    assert_eq!(parse_level("debug"), Level::DEBUG);
    assert_eq!(parse_level(""), Level::INFO);
}
