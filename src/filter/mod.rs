//! MQTT-SN client filter
//!
//! [`MqttsnFilter`] sits between a byte transport and a message pipeline and
//! drives an embedded [`Engine`]. It owns the engine exclusively and is driven
//! one event at a time by its caller (see [`crate::runtime`] for a tokio actor
//! doing exactly that):
//!
//! - transport reports: [`MqttsnFilter::socket_connection_report`]
//! - raw bytes from the transport: [`MqttsnFilter::recv_data`]
//! - application records from the pipeline: [`MqttsnFilter::send_data`]
//! - the deferred call coming due: [`MqttsnFilter::poll_timer`]
//!
//! Engine callbacks land on an internal host object. Completions and gateway
//! notifications are queued there and handled after the engine call that
//! produced them has returned, so reacting to a completion (flushing queued
//! publishes, subscribing) never re-enters an engine entry point that is still
//! unwinding. Everything the filter produces outside of a direct return value
//! is collected as [`FilterEvent`]s for the caller to pick up with
//! [`MqttsnFilter::take_events`].

pub mod pending;
pub mod resolver;
pub mod router;
pub mod scheduler;
pub mod session;
pub mod subscriptions;

pub use pending::PendingQueue;
pub use resolver::{resolve, PublishOverrides, ResolvedPublish};
pub use router::{InboundRouter, OutboundRouter};
pub use scheduler::{Clock, DeferredScheduler, SystemClock};
pub use session::{ConnectionStatus, SessionState};
pub use subscriptions::{SubscriptionEdits, SubscriptionEntry, SubscriptionSet};

use crate::config::{FilterSettings, SessionConfig};
use crate::engine::{
    AsyncOpStatus, Completion, DataOrigin, DeliveredMessage, Engine, EngineHost,
    GatewayDisconnectReason, OpHandle, PublishRequest, ReturnCode, SubscribeRequest,
};
use crate::error::{FilterError, FilterResult, Operation};
use crate::observability::ENGINE_LOG_TARGET;
use crate::protocol::properties::{self, Properties};
use crate::protocol::{DataRecord, Qos, TopicRef};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;
use tracing::{debug, error, info, trace, warn};

/// Output of the filter not tied to a direct return value
#[derive(Debug)]
pub enum FilterEvent {
    /// Bytes for the transport
    SendToTransport(DataRecord),
    /// Application message decoded outside of [`MqttsnFilter::recv_data`]
    Received(DataRecord),
    Error(FilterError),
    /// The live configuration changed and may be persisted
    ConfigChanged,
}

#[derive(Debug)]
enum HostNotice {
    Completed(Completion),
    GatewayDisconnected(GatewayDisconnectReason),
}

/// Callback side of the engine boundary
struct HostLink {
    clock: Box<dyn Clock>,
    scheduler: DeferredScheduler,
    inbound: InboundRouter,
    outbound: OutboundRouter,
    notices: VecDeque<HostNotice>,
    events: Vec<FilterEvent>,
}

impl HostLink {
    fn new(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            scheduler: DeferredScheduler::new(),
            inbound: InboundRouter::new(),
            outbound: OutboundRouter::new(),
            notices: VecDeque::new(),
            events: Vec::new(),
        }
    }
}

impl EngineHost for HostLink {
    fn send_bytes(&mut self, data: &[u8], broadcast_radius: u32) {
        trace!(len = data.len(), broadcast_radius, "Sending data");
        if let Some(record) = self.outbound.route(data) {
            self.events.push(FilterEvent::SendToTransport(record));
        }
    }

    fn gateway_disconnected(&mut self, reason: GatewayDisconnectReason) {
        debug!(%reason, "Gateway disconnected");
        self.notices
            .push_back(HostNotice::GatewayDisconnected(reason));
    }

    fn message_delivered(&mut self, message: DeliveredMessage) {
        debug!(
            topic = %message.topic,
            qos = %message.qos,
            retained = message.retained,
            len = message.payload.len(),
            "App message received"
        );
        self.inbound.deliver(message);
    }

    fn arm_deferred(&mut self, duration_ms: u32) {
        trace!(duration_ms, "Tick request");
        if let Err(e) = self.scheduler.arm(duration_ms, self.clock.now()) {
            error!("Engine broke the deferred call contract: {}", e);
            debug_assert!(false, "deferred call armed twice: {e}");
        }
    }

    fn cancel_deferred(&mut self) -> u32 {
        match self.scheduler.cancel(self.clock.now()) {
            Ok(elapsed) => {
                trace!(elapsed, "Cancel tick");
                elapsed
            }
            Err(e) => {
                error!("Engine broke the deferred call contract: {}", e);
                debug_assert!(false, "deferred call cancelled while disarmed: {e}");
                0
            }
        }
    }

    fn error_log(&mut self, message: &str) {
        error!(target: ENGINE_LOG_TARGET, "{}", message);
    }

    fn complete(&mut self, completion: Completion) {
        self.notices.push_back(HostNotice::Completed(completion));
    }
}

/// Client-side MQTT-SN session adapter
pub struct MqttsnFilter<E: Engine> {
    engine: E,
    config: SessionConfig,
    session: SessionState,
    link: HostLink,
    pending: PendingQueue,
    in_flight_subscribes: HashMap<OpHandle, String>,
    running: bool,
}

impl<E: Engine> MqttsnFilter<E> {
    /// Create a filter with the engine's retry defaults, timed by the system clock
    pub fn new(engine: E) -> Self {
        Self::with_clock(engine, SystemClock)
    }

    pub fn with_clock(engine: E, clock: impl Clock + 'static) -> Self {
        let config = SessionConfig::new(engine.default_retry_period(), engine.default_retry_count());
        Self {
            engine,
            config,
            session: SessionState::new(),
            link: HostLink::new(Box::new(clock)),
            pending: PendingQueue::new(),
            in_flight_subscribes: HashMap::new(),
            running: false,
        }
    }

    /// Replace the configuration before the filter is started
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the configuration from persisted settings
    pub fn with_settings(engine: E, settings: &FilterSettings) -> FilterResult<Self> {
        let config = SessionConfig::from_settings(
            settings,
            engine.default_retry_period(),
            engine.default_retry_count(),
        )?;
        Ok(Self::new(engine).with_config(config))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Number of publishes waiting for a session
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// When [`MqttsnFilter::poll_timer`] next has work to do
    pub fn tick_deadline(&self) -> Option<Instant> {
        self.link.scheduler.deadline()
    }

    /// Drain everything produced since the last call
    pub fn take_events(&mut self) -> Vec<FilterEvent> {
        std::mem::take(&mut self.link.events)
    }

    /// Hand the retry settings to the engine and begin operating
    ///
    /// Connects right away if the transport is already up.
    pub fn start(&mut self) -> FilterResult<()> {
        let _span = crate::session_span!(op = "start").entered();

        self.engine
            .set_retry_period(self.config.retry_period)
            .map_err(|code| {
                FilterError::config(format!(
                    "Failed to set retry period of {} ms: {code}",
                    self.config.retry_period.as_millis()
                ))
            })?;
        self.engine
            .set_retry_count(self.config.retry_count)
            .map_err(|code| {
                FilterError::config(format!(
                    "Failed to set retry count of {}: {code}",
                    self.config.retry_count
                ))
            })?;

        self.running = true;
        self.session.mark_dirty();
        info!(
            retry_period_ms = self.config.retry_period.as_millis() as u64,
            retry_count = self.config.retry_count,
            "MQTT-SN filter started"
        );

        if self.session.socket_connected() {
            self.connect();
        }
        Ok(())
    }

    /// Tear down: disconnect a live session and drop queued publishes
    ///
    /// Outstanding engine operations are not aborted; their completions are
    /// still accepted but trigger no further work.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        let _span = crate::session_span!(op = "stop").entered();
        self.running = false;

        if self.session.is_connected() {
            if let Err(code) = self.engine.disconnect(&mut self.link) {
                self.report(FilterError::send(Operation::Disconnect, code));
            }
        }

        let dropped = self.pending.discard();
        if dropped > 0 {
            debug!(dropped, "Dropped pending publishes on stop");
        }
        self.drain_notices();
        info!("MQTT-SN filter stopped");
    }

    /// Transport link state changed
    pub fn socket_connection_report(&mut self, connected: bool) {
        if connected {
            debug!("Socket connected report");
            self.session.socket_up();
            if self.running && self.session.status() == ConnectionStatus::Disconnected {
                self.connect();
            }
        } else {
            debug!("Socket disconnected report");
            self.session.socket_down();
        }
    }

    /// Feed raw transport bytes to the engine
    ///
    /// Returns one record per application message decoded from them, each
    /// carrying the inbound record's properties with topic, QoS and retained
    /// flag overlaid.
    pub fn recv_data(&mut self, record: DataRecord) -> Vec<DataRecord> {
        let DataRecord {
            payload,
            properties,
            ..
        } = record;
        let _span = crate::record_span!(op = "recv", len = payload.len()).entered();

        self.link.inbound.begin(properties);
        self.engine
            .process_inbound(&mut self.link, &payload, DataOrigin::ConnectedGateway);
        let delivered = self.link.inbound.finish();

        self.drain_notices();
        delivered
    }

    /// Publish one pipeline record
    ///
    /// Without a session the record is queued and published once a connect
    /// succeeds. While older publishes are still queued the record joins the
    /// back of the queue and the queue is flushed; the engine's bytes then
    /// arrive as [`FilterEvent::SendToTransport`]. Otherwise returns the
    /// transport records the engine emitted for it.
    pub fn send_data(&mut self, record: DataRecord) -> FilterResult<Vec<DataRecord>> {
        if !self.running {
            return Err(FilterError::Stopped);
        }
        if !self.session.socket_connected() {
            return Err(FilterError::TransportUnavailable);
        }

        if !self.session.is_connected() {
            debug!(queued = self.pending.len() + 1, "No MQTT-SN session, queueing publish");
            self.pending.enqueue(record);
            return Ok(Vec::new());
        }

        if !self.pending.is_empty() {
            debug!(queued = self.pending.len() + 1, "Earlier publishes still queued, queueing publish");
            self.pending.enqueue(record);
            self.flush_pending();
            self.drain_notices();
            return Ok(Vec::new());
        }

        let result = self.publish_record(record);
        self.drain_notices();
        result
    }

    /// Fire the deferred call if it is due
    pub fn poll_timer(&mut self) {
        let now = self.link.clock.now();
        let Some(elapsed_ms) = self.link.scheduler.take_expired(now) else {
            return;
        };

        trace!(elapsed_ms, "Tick");
        self.engine.tick(&mut self.link, elapsed_ms);
        self.retry_pending();
        self.drain_notices();
    }

    /// Apply configuration pushed by another pipeline stage
    ///
    /// Alias keys are applied before canonical ones, so the canonical value
    /// ends up in effect when both are present.
    pub fn apply_inter_plugin_config(&mut self, props: &Properties) {
        let mut changed = false;

        for value in properties::CLIENT.occurrences(props) {
            if let Some(client_id) = value.as_str() {
                self.config.client_id = client_id.to_string();
                changed = true;
            }
        }

        for value in properties::PUB_TOPIC.occurrences(props) {
            if let Some(topic) = value.as_str() {
                self.config.set_default_topic(topic);
                changed = true;
            }
        }

        for value in properties::PUB_TOPIC_ID.occurrences(props) {
            match value.as_u64().map(u16::try_from) {
                Some(Ok(topic_id)) => {
                    self.config.set_default_topic_id(topic_id);
                    changed = true;
                }
                Some(Err(_)) => warn!(%value, "Ignoring out of range default topic id"),
                None => {}
            }
        }

        for value in properties::PUB_QOS.occurrences(props) {
            match value.as_i64().map(Qos::try_from) {
                Some(Ok(qos)) => {
                    self.config.default_qos = qos;
                    changed = true;
                }
                Some(Err(e)) => warn!("Ignoring default publish QoS: {}", e),
                None => {}
            }
        }

        let edits = SubscriptionEdits::from_properties(props);
        if !edits.is_empty() {
            let outcome = self.config.subscriptions.reconcile(&edits);
            if outcome.session_dirty {
                self.session.mark_dirty();
            }
            changed |= outcome.changed;
        }

        if changed {
            debug!("Configuration updated by inter-plugin message");
            self.link.events.push(FilterEvent::ConfigChanged);
        }
    }

    /// Snapshot of the live configuration in persisted form
    pub fn current_settings(&self) -> FilterSettings {
        self.config.to_settings()
    }

    /// Replace the live configuration
    ///
    /// Retry settings only reach the engine on start; while running the values
    /// already handed over are kept. A different subscription list forces the
    /// next connect to be clean.
    pub fn reconfigure(&mut self, settings: &FilterSettings) -> FilterResult<()> {
        let mut config = SessionConfig::from_settings(
            settings,
            self.engine.default_retry_period(),
            self.engine.default_retry_count(),
        )?;

        if self.running {
            config.retry_period = self.config.retry_period;
            config.retry_count = self.config.retry_count;
        }

        if config
            .subscriptions
            .entries()
            .ne(self.config.subscriptions.entries())
        {
            self.session.mark_dirty();
        }

        self.config = config;
        self.link.events.push(FilterEvent::ConfigChanged);
        Ok(())
    }

    /// Make the next connect discard the gateway's session state
    pub fn force_clean_session(&mut self) {
        self.session.mark_dirty();
    }

    fn connect(&mut self) {
        let request = self.session.connect_request(&self.config);
        let _span = crate::session_span!(
            op = "connect",
            clean_session = request.clean_session,
            keep_alive = request.keep_alive_secs
        )
        .entered();

        match self.engine.connect(&mut self.link, &request) {
            Ok(()) => self.session.connect_issued(&request),
            Err(code) => self.report(FilterError::send(Operation::Connect, code)),
        }
        self.drain_notices();
    }

    /// Resolve and submit one record while a session is up
    fn publish_record(&mut self, mut record: DataRecord) -> FilterResult<Vec<DataRecord>> {
        let overrides = PublishOverrides::from_properties(&record.properties)?;
        let resolved = resolve(&overrides, &self.config)?;
        resolved.write_back(&mut record.properties);

        let request = PublishRequest {
            target: resolved.target.clone(),
            payload: record.payload.clone(),
            qos: resolved.qos,
            retain: resolved.retain,
        };
        let _span = crate::record_span!(
            op = "publish",
            topic = %request.target,
            qos = %request.qos,
            retain = request.retain
        )
        .entered();

        self.link.outbound.begin(record.properties);
        let submitted = self.engine.publish(&mut self.link, &request);
        let emitted = self.link.outbound.finish();

        match submitted {
            Ok(handle) => {
                debug!(handle = handle.0, len = request.payload.len(), "Publish submitted");
                Ok(emitted)
            }
            Err(code) => {
                // whatever made it out before the rejection still goes to the wire
                self.link
                    .events
                    .extend(emitted.into_iter().map(FilterEvent::SendToTransport));
                Err(FilterError::send_for_topic(
                    Operation::Publish,
                    &request.target.to_string(),
                    code,
                ))
            }
        }
    }

    /// Flush publishes left queued by an earlier resource shortage
    fn retry_pending(&mut self) {
        if self.running && self.session.is_connected() && !self.pending.is_empty() {
            self.flush_pending();
        }
    }

    /// Replay queued publishes in submission order
    fn flush_pending(&mut self) {
        let mut queued = self.pending.take_all();
        if queued.is_empty() {
            return;
        }
        debug!(count = queued.len(), "Flushing pending publishes");

        while let Some(record) = queued.pop_front() {
            match self.publish_record(record.clone()) {
                Ok(emitted) => self
                    .link
                    .events
                    .extend(emitted.into_iter().map(FilterEvent::SendToTransport)),
                Err(err) => {
                    let exhausted = matches!(
                        &err,
                        FilterError::Send { code, .. } if code.is_resource_exhaustion()
                    );
                    self.report(err);
                    if exhausted {
                        queued.push_front(record);
                        warn!(remaining = queued.len(), "Engine out of resources, keeping publishes queued");
                        break;
                    }
                }
            }
        }

        if !queued.is_empty() {
            self.pending.restore_front(queued);
        }
    }

    fn subscribe_all(&mut self) {
        let requests: Vec<(String, SubscribeRequest)> = self
            .config
            .subscriptions
            .entries()
            .filter_map(|entry| {
                let topic = entry.topic.trim();
                let target = if !topic.is_empty() {
                    TopicRef::Name(topic.to_string())
                } else if entry.topic_id != 0 {
                    TopicRef::Id(entry.topic_id)
                } else {
                    warn!("Skipping subscription with neither topic nor topic id");
                    return None;
                };
                Some((
                    target.to_string(),
                    SubscribeRequest {
                        target,
                        qos: entry.max_qos,
                    },
                ))
            })
            .collect();

        for (label, request) in requests {
            match self.engine.subscribe(&mut self.link, &request) {
                Ok(handle) => {
                    debug!(topic = %label, qos = %request.qos, handle = handle.0, "Subscribe issued");
                    self.in_flight_subscribes.insert(handle, label);
                }
                Err(code) => {
                    self.report(FilterError::send_for_topic(Operation::Subscribe, &label, code))
                }
            }
        }
    }

    fn drain_notices(&mut self) {
        while let Some(notice) = self.link.notices.pop_front() {
            match notice {
                HostNotice::Completed(completion) => self.on_completion(completion),
                HostNotice::GatewayDisconnected(reason) => {
                    let _span = crate::session_span!(op = "gateway_disconnected").entered();
                    self.session.session_ended();
                    self.report(FilterError::gateway_disconnected(reason));
                }
            }
        }

        let stray = self.link.inbound.take_stray();
        self.link
            .events
            .extend(stray.into_iter().map(FilterEvent::Received));
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Connect { result } => self.on_connect_complete(result),
            Completion::Disconnect { result } => {
                self.session.session_ended();
                match result {
                    Ok(()) => debug!("Disconnected from MQTT-SN gateway"),
                    Err(status) => {
                        self.report(FilterError::async_status(Operation::Disconnect, status))
                    }
                }
            }
            Completion::Subscribe { handle, result } => {
                let topic = self.in_flight_subscribes.remove(&handle).unwrap_or_default();
                match result {
                    Ok(code) if code.is_accepted() => debug!(topic = %topic, "Subscribed"),
                    Ok(code) => {
                        warn!(topic = %topic, %code, "Subscribe rejected");
                        self.report(FilterError::async_rejected(Operation::Subscribe, code))
                    }
                    Err(status) => {
                        warn!(topic = %topic, %status, "Subscribe failed");
                        self.report(FilterError::async_status(Operation::Subscribe, status))
                    }
                }
            }
            Completion::Publish { handle, result } => {
                match result {
                    Ok(None) | Ok(Some(ReturnCode::Accepted)) => {
                        trace!(handle = handle.0, "Publish complete")
                    }
                    Ok(Some(code)) => {
                        self.report(FilterError::async_rejected(Operation::Publish, code))
                    }
                    Err(status) => {
                        self.report(FilterError::async_status(Operation::Publish, status))
                    }
                }
                // queued publishes retry once a publish finishes
                self.retry_pending();
            }
        }
    }

    fn on_connect_complete(&mut self, result: Result<ReturnCode, AsyncOpStatus>) {
        let _span = crate::session_span!(op = "connect_complete").entered();

        let failure = match result {
            Ok(code) if code.is_accepted() => None,
            Ok(code) => Some(FilterError::async_rejected(Operation::Connect, code)),
            Err(status) => Some(FilterError::async_status(Operation::Connect, status)),
        };
        if let Some(err) = failure {
            self.session.connect_failed();
            self.report(err);
            return;
        }

        self.session.connect_accepted();
        if !self.running {
            debug!("Connect completed after stop, disconnecting");
            if let Err(code) = self.engine.disconnect(&mut self.link) {
                self.report(FilterError::send(Operation::Disconnect, code));
            }
            return;
        }

        self.flush_pending();
        if self.session.clean_session() {
            self.subscribe_all();
        }
    }

    fn report(&mut self, err: FilterError) {
        warn!(error = %err, "MQTT-SN filter error");
        self.link.events.push(FilterEvent::Error(err));
    }
}

impl<E: Engine> Drop for MqttsnFilter<E> {
    fn drop(&mut self) {
        self.stop();
    }
}
