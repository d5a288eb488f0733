//! Tokio actor driving one filter
//!
//! The filter itself is synchronous and single-threaded. [`FilterRuntime`] owns
//! it inside a spawned task and feeds it one [`FilterCommand`] at a time,
//! sleeping until the engine's deferred call comes due in between. Everything
//! the filter produces comes back on the output channel as [`FilterOutput`].
//!
//! Build the filter with a [`TokioClock`] so deferred calls follow tokio's
//! clock, which also makes paused-time tests deterministic.

use crate::config::FilterSettings;
use crate::engine::Engine;
use crate::error::{FilterError, FilterResult};
use crate::filter::{Clock, FilterEvent, MqttsnFilter};
use crate::protocol::{DataRecord, Properties};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Clock reading tokio's (possibly paused) time
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> std::time::Instant {
        tokio::time::Instant::now().into_std()
    }
}

#[derive(Debug)]
pub enum FilterCommand {
    TransportConnected,
    TransportDisconnected,
    /// Raw bytes received from the transport
    Inbound(DataRecord),
    /// Application record to publish
    Outbound(DataRecord),
    /// Inter-plugin configuration map
    ApplyConfig(Properties),
    Reconfigure(FilterSettings, oneshot::Sender<FilterResult<()>>),
    Snapshot(oneshot::Sender<FilterSettings>),
    Stop,
}

#[derive(Debug)]
pub enum FilterOutput {
    ToTransport(DataRecord),
    ToPipeline(DataRecord),
    Error(FilterError),
    /// Configuration changed; carries the settings to persist
    ConfigChanged(FilterSettings),
}

/// Cloneable handle for sending commands to a running filter
#[derive(Debug, Clone)]
pub struct FilterHandle {
    commands: mpsc::Sender<FilterCommand>,
}

impl FilterHandle {
    async fn send(&self, command: FilterCommand) -> FilterResult<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| FilterError::RuntimeClosed)
    }

    pub async fn transport_connected(&self) -> FilterResult<()> {
        self.send(FilterCommand::TransportConnected).await
    }

    pub async fn transport_disconnected(&self) -> FilterResult<()> {
        self.send(FilterCommand::TransportDisconnected).await
    }

    pub async fn inbound(&self, record: DataRecord) -> FilterResult<()> {
        self.send(FilterCommand::Inbound(record)).await
    }

    pub async fn outbound(&self, record: DataRecord) -> FilterResult<()> {
        self.send(FilterCommand::Outbound(record)).await
    }

    pub async fn apply_config(&self, props: Properties) -> FilterResult<()> {
        self.send(FilterCommand::ApplyConfig(props)).await
    }

    pub async fn reconfigure(&self, settings: FilterSettings) -> FilterResult<()> {
        let (tx, rx) = oneshot::channel();
        self.send(FilterCommand::Reconfigure(settings, tx)).await?;
        rx.await.map_err(|_| FilterError::RuntimeClosed)?
    }

    pub async fn current_settings(&self) -> FilterResult<FilterSettings> {
        let (tx, rx) = oneshot::channel();
        self.send(FilterCommand::Snapshot(tx)).await?;
        rx.await.map_err(|_| FilterError::RuntimeClosed)
    }

    pub async fn stop(&self) -> FilterResult<()> {
        self.send(FilterCommand::Stop).await
    }
}

/// Everything needed to talk to a spawned filter
#[derive(Debug)]
pub struct SpawnedFilter {
    pub handle: FilterHandle,
    pub outputs: mpsc::Receiver<FilterOutput>,
    pub task: JoinHandle<()>,
}

pub struct FilterRuntime<E: Engine> {
    filter: MqttsnFilter<E>,
    commands: mpsc::Receiver<FilterCommand>,
    outputs: mpsc::Sender<FilterOutput>,
}

impl<E: Engine + 'static> FilterRuntime<E> {
    /// Start `filter` and move it into its own task
    ///
    /// Fails without spawning when the engine rejects the configuration.
    pub fn spawn(mut filter: MqttsnFilter<E>, capacity: usize) -> FilterResult<SpawnedFilter> {
        filter.start()?;

        let (command_tx, command_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);
        let runtime = FilterRuntime {
            filter,
            commands: command_rx,
            outputs: output_tx,
        };
        let task = tokio::spawn(runtime.run());

        Ok(SpawnedFilter {
            handle: FilterHandle {
                commands: command_tx,
            },
            outputs: output_rx,
            task,
        })
    }

    async fn run(mut self) {
        info!("MQTT-SN filter runtime started");

        loop {
            if !self.forward_events().await {
                warn!("Filter output receiver dropped, stopping");
                self.filter.stop();
                break;
            }

            let deadline = self.filter.tick_deadline();
            let tick = async move {
                match deadline {
                    Some(deadline) => {
                        tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                    }
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(FilterCommand::Stop) | None => {
                        debug!("Filter runtime stopping");
                        self.filter.stop();
                        self.forward_events().await;
                        break;
                    }
                    Some(command) => self.handle(command).await,
                },
                _ = tick => self.filter.poll_timer(),
            }
        }

        info!("MQTT-SN filter runtime stopped");
    }

    async fn handle(&mut self, command: FilterCommand) {
        match command {
            FilterCommand::TransportConnected => self.filter.socket_connection_report(true),
            FilterCommand::TransportDisconnected => self.filter.socket_connection_report(false),
            FilterCommand::Inbound(record) => {
                for delivered in self.filter.recv_data(record) {
                    self.emit(FilterOutput::ToPipeline(delivered)).await;
                }
            }
            FilterCommand::Outbound(record) => match self.filter.send_data(record) {
                Ok(emitted) => {
                    for record in emitted {
                        self.emit(FilterOutput::ToTransport(record)).await;
                    }
                }
                Err(e) => {
                    self.emit(FilterOutput::Error(e)).await;
                }
            },
            FilterCommand::ApplyConfig(props) => self.filter.apply_inter_plugin_config(&props),
            FilterCommand::Reconfigure(settings, reply) => {
                let _ = reply.send(self.filter.reconfigure(&settings));
            }
            FilterCommand::Snapshot(reply) => {
                let _ = reply.send(self.filter.current_settings());
            }
            FilterCommand::Stop => {}
        }
    }

    /// Forward queued filter events; false once nobody listens anymore
    async fn forward_events(&mut self) -> bool {
        for event in self.filter.take_events() {
            let output = match event {
                FilterEvent::SendToTransport(record) => FilterOutput::ToTransport(record),
                FilterEvent::Received(record) => FilterOutput::ToPipeline(record),
                FilterEvent::Error(e) => FilterOutput::Error(e),
                FilterEvent::ConfigChanged => {
                    FilterOutput::ConfigChanged(self.filter.current_settings())
                }
            };
            if !self.emit(output).await {
                return false;
            }
        }
        true
    }

    async fn emit(&mut self, output: FilterOutput) -> bool {
        self.outputs.send(output).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::{EngineCall, MockEngine};

    #[tokio::test(start_paused = true)]
    async fn test_spawn_starts_filter() {
        let engine = MockEngine::new();
        let filter = MqttsnFilter::with_clock(engine.clone(), TokioClock);

        let spawned = FilterRuntime::spawn(filter, 16).unwrap();
        spawned.handle.stop().await.unwrap();
        spawned.task.await.unwrap();

        assert!(matches!(engine.calls()[0], EngineCall::SetRetryPeriod(_)));
    }

    #[tokio::test]
    async fn test_handle_fails_after_runtime_exit() {
        let filter = MqttsnFilter::with_clock(MockEngine::new(), TokioClock);
        let spawned = FilterRuntime::spawn(filter, 4).unwrap();

        spawned.handle.stop().await.unwrap();
        spawned.task.await.unwrap();

        let result = spawned.handle.transport_connected().await;
        assert!(matches!(result, Err(FilterError::RuntimeClosed)));
    }
}
