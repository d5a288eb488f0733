//! Mock implementations for testing
//!
//! Provides a scripted [`MockEngine`] and a [`ManualClock`] so the filter can be
//! exercised without a real MQTT-SN engine or gateway.

use crate::engine::{
    Completion, ConnectRequest, DataOrigin, DeliveredMessage, Engine, EngineErrorCode, EngineHost,
    GatewayDisconnectReason, OpHandle, PublishRequest, ReturnCode, SubscribeRequest,
};
use crate::filter::Clock;
use crate::protocol::Qos;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Engine entry point invocation as recorded by [`MockEngine`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SetRetryPeriod(Duration),
    SetRetryCount(u32),
    Connect(ConnectRequest),
    Disconnect,
    Subscribe(SubscribeRequest),
    Publish(PublishRequest),
    ProcessInbound(Vec<u8>),
    Tick(u32),
}

/// Host callback the mock performs on the filter's behalf
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAction {
    SendBytes(Vec<u8>),
    GatewayDisconnected(GatewayDisconnectReason),
    Deliver(DeliveredMessage),
    ArmDeferred(u32),
    /// Cancel the deferred call; the elapsed value is kept in [`MockEngine::cancelled`]
    CancelDeferred,
    ErrorLog(String),
    Complete(Completion),
}

#[derive(Debug)]
struct MockEngineState {
    calls: Vec<EngineCall>,
    inbound_scripts: HashMap<Vec<u8>, Vec<HostAction>>,
    connect_actions: Vec<HostAction>,
    tick_actions: VecDeque<Vec<HostAction>>,
    cancelled: Vec<u32>,
    retry_period_error: Option<EngineErrorCode>,
    retry_count_error: Option<EngineErrorCode>,
    connect_errors: VecDeque<EngineErrorCode>,
    disconnect_errors: VecDeque<EngineErrorCode>,
    subscribe_errors: VecDeque<EngineErrorCode>,
    publish_errors: VecDeque<EngineErrorCode>,
    default_retry_period: Duration,
    default_retry_count: u32,
    next_handle: u32,
}

impl Default for MockEngineState {
    fn default() -> Self {
        Self {
            calls: Vec::new(),
            inbound_scripts: HashMap::new(),
            connect_actions: Vec::new(),
            tick_actions: VecDeque::new(),
            cancelled: Vec::new(),
            retry_period_error: None,
            retry_count_error: None,
            connect_errors: VecDeque::new(),
            disconnect_errors: VecDeque::new(),
            subscribe_errors: VecDeque::new(),
            publish_errors: VecDeque::new(),
            default_retry_period: Duration::from_secs(15),
            default_retry_count: 3,
            next_handle: 1,
        }
    }
}

/// Scripted engine recording every call made to it
///
/// Clones share state, so a test keeps one clone for inspection while the
/// filter owns another.
#[derive(Debug, Clone, Default)]
pub struct MockEngine {
    state: Arc<Mutex<MockEngineState>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(retry_period: Duration, retry_count: u32) -> Self {
        let engine = Self::new();
        {
            let mut state = engine.lock();
            state.default_retry_period = retry_period;
            state.default_retry_count = retry_count;
        }
        engine
    }

    fn lock(&self) -> MutexGuard<'_, MockEngineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replay `actions` every time exactly `data` is fed to the engine
    pub fn script(&self, data: &[u8], actions: Vec<HostAction>) {
        self.lock().inbound_scripts.insert(data.to_vec(), actions);
    }

    /// Complete a connect as accepted whenever `data` arrives
    pub fn accept_connect_on(&self, data: &[u8]) {
        self.script(
            data,
            vec![HostAction::Complete(Completion::Connect {
                result: Ok(ReturnCode::Accepted),
            })],
        );
    }

    /// Perform `actions` from inside every connect call
    pub fn on_connect(&self, actions: Vec<HostAction>) {
        self.lock().connect_actions = actions;
    }

    /// Perform `actions` from inside the next tick
    pub fn on_next_tick(&self, actions: Vec<HostAction>) {
        self.lock().tick_actions.push_back(actions);
    }

    pub fn fail_set_retry_period(&self, code: EngineErrorCode) {
        self.lock().retry_period_error = Some(code);
    }

    pub fn fail_set_retry_count(&self, code: EngineErrorCode) {
        self.lock().retry_count_error = Some(code);
    }

    pub fn fail_next_connect(&self, code: EngineErrorCode) {
        self.lock().connect_errors.push_back(code);
    }

    pub fn fail_next_disconnect(&self, code: EngineErrorCode) {
        self.lock().disconnect_errors.push_back(code);
    }

    pub fn fail_next_subscribe(&self, code: EngineErrorCode) {
        self.lock().subscribe_errors.push_back(code);
    }

    pub fn fail_next_publish(&self, code: EngineErrorCode) {
        self.lock().publish_errors.push_back(code);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.lock().calls.clone()
    }

    pub fn connects(&self) -> Vec<ConnectRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Connect(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn subscribes(&self) -> Vec<SubscribeRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Subscribe(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn publishes(&self) -> Vec<PublishRequest> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::Publish(request) => Some(request.clone()),
                _ => None,
            })
            .collect()
    }

    /// Elapsed values returned to [`HostAction::CancelDeferred`] so far
    pub fn cancelled(&self) -> Vec<u32> {
        self.lock().cancelled.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn record(&self, call: EngineCall) {
        self.lock().calls.push(call);
    }

    fn next_handle(&self) -> OpHandle {
        let mut state = self.lock();
        let handle = OpHandle(state.next_handle);
        state.next_handle += 1;
        handle
    }

    fn replay(&self, host: &mut dyn EngineHost, actions: Vec<HostAction>) {
        for action in actions {
            match action {
                HostAction::SendBytes(data) => host.send_bytes(&data, 0),
                HostAction::GatewayDisconnected(reason) => host.gateway_disconnected(reason),
                HostAction::Deliver(message) => host.message_delivered(message),
                HostAction::ArmDeferred(ms) => host.arm_deferred(ms),
                HostAction::CancelDeferred => {
                    let elapsed = host.cancel_deferred();
                    self.lock().cancelled.push(elapsed);
                }
                HostAction::ErrorLog(message) => host.error_log(&message),
                HostAction::Complete(completion) => host.complete(completion),
            }
        }
    }
}

impl Engine for MockEngine {
    fn default_retry_period(&self) -> Duration {
        self.lock().default_retry_period
    }

    fn default_retry_count(&self) -> u32 {
        self.lock().default_retry_count
    }

    fn set_retry_period(&mut self, period: Duration) -> Result<(), EngineErrorCode> {
        self.record(EngineCall::SetRetryPeriod(period));
        match self.lock().retry_period_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn set_retry_count(&mut self, count: u32) -> Result<(), EngineErrorCode> {
        self.record(EngineCall::SetRetryCount(count));
        match self.lock().retry_count_error {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn connect(
        &mut self,
        host: &mut dyn EngineHost,
        request: &ConnectRequest,
    ) -> Result<(), EngineErrorCode> {
        self.record(EngineCall::Connect(request.clone()));
        if let Some(code) = self.lock().connect_errors.pop_front() {
            return Err(code);
        }

        host.send_bytes(b"CONNECT", 0);
        let actions = self.lock().connect_actions.clone();
        self.replay(host, actions);
        Ok(())
    }

    fn disconnect(&mut self, host: &mut dyn EngineHost) -> Result<(), EngineErrorCode> {
        self.record(EngineCall::Disconnect);
        if let Some(code) = self.lock().disconnect_errors.pop_front() {
            return Err(code);
        }

        host.send_bytes(b"DISCONNECT", 0);
        Ok(())
    }

    fn subscribe(
        &mut self,
        host: &mut dyn EngineHost,
        request: &SubscribeRequest,
    ) -> Result<OpHandle, EngineErrorCode> {
        self.record(EngineCall::Subscribe(request.clone()));
        if let Some(code) = self.lock().subscribe_errors.pop_front() {
            return Err(code);
        }

        host.send_bytes(b"SUBSCRIBE", 0);
        Ok(self.next_handle())
    }

    fn publish(
        &mut self,
        host: &mut dyn EngineHost,
        request: &PublishRequest,
    ) -> Result<OpHandle, EngineErrorCode> {
        self.record(EngineCall::Publish(request.clone()));
        if let Some(code) = self.lock().publish_errors.pop_front() {
            return Err(code);
        }

        host.send_bytes(&request.payload, 0);
        let handle = self.next_handle();
        if request.qos == Qos::AtMostOnce {
            host.complete(Completion::Publish {
                handle,
                result: Ok(None),
            });
        }
        Ok(handle)
    }

    fn process_inbound(&mut self, host: &mut dyn EngineHost, data: &[u8], _origin: DataOrigin) {
        self.record(EngineCall::ProcessInbound(data.to_vec()));
        let actions = self.lock().inbound_scripts.get(data).cloned();
        if let Some(actions) = actions {
            self.replay(host, actions);
        }
    }

    fn tick(&mut self, host: &mut dyn EngineHost, elapsed_ms: u32) {
        self.record(EngineCall::Tick(elapsed_ms));
        let actions = self.lock().tick_actions.pop_front();
        if let Some(actions) = actions {
            self.replay(host, actions);
        }
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingHost {
        sent: Vec<Vec<u8>>,
        completions: Vec<Completion>,
    }

    impl EngineHost for RecordingHost {
        fn send_bytes(&mut self, data: &[u8], _broadcast_radius: u32) {
            self.sent.push(data.to_vec());
        }
        fn gateway_disconnected(&mut self, _reason: GatewayDisconnectReason) {}
        fn message_delivered(&mut self, _message: DeliveredMessage) {}
        fn arm_deferred(&mut self, _duration_ms: u32) {}
        fn cancel_deferred(&mut self) -> u32 {
            7
        }
        fn error_log(&mut self, _message: &str) {}
        fn complete(&mut self, completion: Completion) {
            self.completions.push(completion);
        }
    }

    #[test]
    fn test_mock_engine_records_and_replays() {
        let mut engine = MockEngine::new();
        let observer = engine.clone();
        engine.accept_connect_on(b"CONNACK");
        engine.script(b"PING", vec![HostAction::CancelDeferred]);

        let mut host = RecordingHost {
            sent: Vec::new(),
            completions: Vec::new(),
        };
        let request = ConnectRequest {
            client_id: None,
            keep_alive_secs: 60,
            clean_session: true,
        };
        engine.connect(&mut host, &request).unwrap();
        engine.process_inbound(&mut host, b"CONNACK", DataOrigin::ConnectedGateway);
        engine.process_inbound(&mut host, b"PING", DataOrigin::ConnectedGateway);

        assert_eq!(host.sent, vec![b"CONNECT".to_vec()]);
        assert_eq!(host.completions.len(), 1);
        assert_eq!(observer.connects(), vec![request]);
        assert_eq!(observer.cancelled(), vec![7]);
        assert_eq!(observer.calls().len(), 3);
    }

    #[test]
    fn test_mock_engine_scripted_failures() {
        let mut engine = MockEngine::new();
        engine.fail_next_publish(EngineErrorCode::BufferOverflow);
        let mut host = RecordingHost {
            sent: Vec::new(),
            completions: Vec::new(),
        };
        let request = PublishRequest {
            target: crate::protocol::TopicRef::Id(1),
            payload: bytes::Bytes::from_static(b"x"),
            qos: Qos::AtMostOnce,
            retain: false,
        };

        assert_eq!(
            engine.publish(&mut host, &request),
            Err(EngineErrorCode::BufferOverflow)
        );
        assert!(engine.publish(&mut host, &request).is_ok());
        assert_eq!(host.completions.len(), 1);
    }

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.advance(Duration::from_millis(250));
        assert_eq!(clock.now() - start, Duration::from_millis(250));
    }
}
