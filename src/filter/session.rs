//! Session lifecycle state and clean-session decisions
//!
//! Pure state kept by the filter across transport and engine events. The filter
//! drives the transitions; this module decides what a connect should look like
//! and records what happened.

use crate::config::SessionConfig;
use crate::engine::ConnectRequest;
use tracing::{debug, info, warn};

/// Protocol-level connection status as seen by the filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    /// Connect issued, completion outstanding
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    status: ConnectionStatus,
    socket_connected: bool,
    clean_session: bool,
    first_connect: bool,
    previous_client_id: String,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            socket_connected: false,
            clean_session: false,
            first_connect: true,
            previous_client_id: String::new(),
        }
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn socket_connected(&self) -> bool {
        self.socket_connected
    }

    /// Clean-session mode of the current (or last) connect attempt
    pub fn clean_session(&self) -> bool {
        self.clean_session
    }

    /// No connect has been accepted since start, or the session was marked dirty
    pub fn first_connect(&self) -> bool {
        self.first_connect
    }

    pub fn previous_client_id(&self) -> &str {
        &self.previous_client_id
    }

    /// Whether the next connect must discard server-side session state
    ///
    /// A resumed session is only safe for a stable, non-empty identity that has
    /// already connected since start with an unchanged subscription list.
    pub fn decide_clean_session(&self, config: &SessionConfig) -> bool {
        config.forced_clean_session
            || config.client_id.is_empty()
            || config.client_id != self.previous_client_id
            || self.first_connect
    }

    /// Build the connect request for the current configuration
    pub fn connect_request(&self, config: &SessionConfig) -> ConnectRequest {
        ConnectRequest {
            client_id: (!config.client_id.is_empty()).then(|| config.client_id.clone()),
            keep_alive_secs: config.keep_alive_secs(),
            clean_session: self.decide_clean_session(config),
        }
    }

    /// The engine accepted `request`; fix its clean-session mode for this attempt
    pub fn connect_issued(&mut self, request: &ConnectRequest) {
        self.previous_client_id = request.client_id.clone().unwrap_or_default();
        self.clean_session = request.clean_session;
        self.status = ConnectionStatus::Connecting;
        debug!(
            clean_session = request.clean_session,
            client_id = %self.previous_client_id,
            "Connect issued"
        );
    }

    pub fn connect_accepted(&mut self) {
        self.first_connect = false;
        self.status = ConnectionStatus::Connected;
        info!(clean_session = self.clean_session, "MQTT-SN session established");
    }

    pub fn connect_failed(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        warn!("MQTT-SN connect attempt failed");
    }

    pub fn socket_up(&mut self) {
        self.socket_connected = true;
    }

    /// Socket went away; the link is gone so no protocol disconnect is possible
    pub fn socket_down(&mut self) {
        self.socket_connected = false;
        if self.status != ConnectionStatus::Disconnected {
            warn!("Socket lost with MQTT-SN session {:?}", self.status);
        }
        self.status = ConnectionStatus::Disconnected;
    }

    /// Engine reported the gateway gone, or a disconnect completed
    pub fn session_ended(&mut self) {
        self.status = ConnectionStatus::Disconnected;
    }

    /// Force the next connect to use a clean session
    pub fn mark_dirty(&mut self) {
        self.first_connect = true;
    }
}
