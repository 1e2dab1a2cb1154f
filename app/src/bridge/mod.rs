use crate::error::CommandError;
use crate::models::measurement::round_value;
use crate::models::{with_timeout, MeasurementStore, StateStore};
use crate::mqtt::CommandPublisher;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, info_span, warn, Instrument};
use zonelink_core::{
    ChartPoint, ClientEvent, CommandResult, RoutedEvent, SensorKind, ServerEvent, SwitchState,
    TopicRouter, ZoneClock,
};

pub mod clients;
#[cfg(test)]
mod test;

pub use clients::{ClientId, ClientRegistry};

const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything the transports hand over to the dispatcher
#[derive(Debug)]
pub enum BridgeMessage {
    BrokerConnected,
    BrokerDisconnected(String),
    BrokerPublish {
        topic: String,
        payload: String,
    },
    /// The client is registered once its replay is queued
    ClientConnected {
        client: ClientId,
        sender: mpsc::Sender<String>,
    },
    ClientFrame {
        client: ClientId,
        text: String,
    },
    ClientDisconnected(ClientId),
}

/// Single consumer of the inbound queue.
///
/// Handles one message at a time, so each store sees a single writer.
/// Every store call is bounded, a hanging store never stalls the queue.
pub struct BridgeDispatcher {
    router: TopicRouter,
    clock: ZoneClock,
    measurements: Arc<dyn MeasurementStore>,
    states: Arc<dyn StateStore>,
    publisher: Arc<dyn CommandPublisher>,
    clients: ClientRegistry,
    store_timeout: Duration,
}

impl BridgeDispatcher {
    pub fn new(
        router: TopicRouter,
        clock: ZoneClock,
        measurements: Arc<dyn MeasurementStore>,
        states: Arc<dyn StateStore>,
        publisher: Arc<dyn CommandPublisher>,
        clients: ClientRegistry,
    ) -> Self {
        BridgeDispatcher {
            router,
            clock,
            measurements,
            states,
            publisher,
            clients,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Runs until every sender of the queue is dropped
    pub async fn run(self, mut receiver: mpsc::UnboundedReceiver<BridgeMessage>) {
        info!(zone = self.router.zone(), "Dispatcher started");
        while let Some(msg) = receiver.recv().await {
            self.handle(msg).await;
        }
        info!("Dispatcher stopped");
    }

    pub async fn handle(&self, msg: BridgeMessage) {
        match msg {
            BridgeMessage::BrokerConnected => info!("Broker connected"),
            BridgeMessage::BrokerDisconnected(reason) => {
                warn!("Broker disconnected: {}", reason)
            }
            BridgeMessage::BrokerPublish { topic, payload } => {
                let span = info_span!("broker_event", topic = %topic);
                self.on_broker_event(&topic, &payload)
                    .instrument(span)
                    .await
            }
            BridgeMessage::ClientConnected { client, sender } => {
                let span = info_span!("client_connected", client = %client);
                self.on_client_connected(client, sender)
                    .instrument(span)
                    .await
            }
            BridgeMessage::ClientFrame { client, text } => {
                let span = info_span!("client_event", client = %client);
                self.on_client_frame(client, &text).instrument(span).await
            }
            BridgeMessage::ClientDisconnected(client) => {
                if self.clients.unregister(client) {
                    debug!(client = %client, "Client disconnected");
                }
            }
        }
    }

    async fn on_broker_event(&self, topic: &str, payload: &str) {
        let received_at = self.clock.now();
        match self.router.route(topic, payload, received_at) {
            RoutedEvent::TemperatureReading {
                sensor_id,
                value,
                timestamp,
            } => {
                let value = round_value(value);
                self.persist_reading(sensor_id, timestamp, value).await;
                self.broadcast(ServerEvent::NewTemperatureData(ChartPoint::time_of_day(
                    timestamp, value,
                )));
            }
            RoutedEvent::HumidityReading {
                sensor_id,
                value,
                timestamp,
            } => {
                let value = round_value(value);
                self.persist_reading(sensor_id, timestamp, value).await;
                self.broadcast(ServerEvent::NewHumidityData(ChartPoint::iso(timestamp, value)));
            }
            RoutedEvent::LightStateChanged { sensor_id, state } => {
                self.on_state_changed(SensorKind::Light, sensor_id, state)
                    .await
            }
            RoutedEvent::FanStateChanged { sensor_id, state } => {
                self.on_state_changed(SensorKind::Fan, sensor_id, state)
                    .await
            }
            RoutedEvent::Unrecognized(e) => debug!("Dropping unrecognized event: {}", e),
        }
    }

    /// Persistence failures never stop the broadcast
    async fn persist_reading(&self, sensor_id: i32, timestamp: NaiveDateTime, value: f64) {
        let recorded = with_timeout(
            self.store_timeout,
            self.measurements.record(sensor_id, timestamp, value),
        )
        .await;
        if let Err(e) = recorded {
            error!(
                sensor_id = sensor_id,
                "Reading at {} not persisted, data lost: {}", timestamp, e
            );
        }
    }

    async fn on_state_changed(&self, kind: SensorKind, sensor_id: i32, state: SwitchState) {
        let stored = with_timeout(self.store_timeout, self.states.set_state(sensor_id, state)).await;
        if let Err(e) = stored {
            error!(sensor_id = sensor_id, "State {} not persisted: {}", state, e);
        }
        if let Some(event) = ServerEvent::state(kind, state) {
            self.broadcast(event);
        }
    }

    async fn on_client_connected(&self, client: ClientId, sender: mpsc::Sender<String>) {
        self.clients.register(client, sender);
        for event in self.replay().await {
            if !self.clients.send_to(client, &event) {
                break;
            }
        }
        debug!("Replayed initial data");
    }

    async fn on_client_frame(&self, client: ClientId, text: &str) {
        let event = match ClientEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                debug!("Dropping client frame: {}", e);
                return;
            }
        };

        match event {
            ClientEvent::GetStates => {
                let states = self.initial_states().await;
                self.clients.send_to(client, &states);
            }
            ClientEvent::Command { kind, command } => {
                let result = match self.relay_command(kind, &command).await {
                    Ok(_) => CommandResult {
                        event: ClientEvent::command_event(kind).to_owned(),
                        command,
                        accepted: true,
                        reason: None,
                    },
                    Err(e) => {
                        debug!("Command {:?} for {} refused: {}", command, kind, e);
                        CommandResult {
                            event: ClientEvent::command_event(kind).to_owned(),
                            command,
                            accepted: false,
                            reason: Some(e.to_string()),
                        }
                    }
                };
                self.clients
                    .send_to(client, &ServerEvent::CommandResult(result));
            }
        }
    }

    /// Validates a switch command and publishes it verbatim
    pub async fn relay_command(&self, kind: SensorKind, command: &str) -> Result<(), CommandError> {
        let state: SwitchState = command.parse()?;
        let topic = self
            .router
            .command_topic(kind)
            .ok_or(CommandError::NoRoute(kind))?;
        self.publisher.publish(&topic, state.as_str()).await?;
        info!("Relayed {} to {}", state, topic);
        Ok(())
    }

    /// Current states, then the temperature and humidity history,
    /// `clients::REPLAY_FRAMES` events in total
    pub async fn replay(&self) -> Vec<ServerEvent> {
        vec![
            self.initial_states().await,
            ServerEvent::InitialTempChartData(self.chart(SensorKind::Temperature).await),
            ServerEvent::InitialHumidityChartData(self.chart(SensorKind::Humidity).await),
        ]
    }

    async fn initial_states(&self) -> ServerEvent {
        let states = match with_timeout(self.store_timeout, self.states.all_states()).await {
            Ok(states) => states,
            Err(e) => {
                error!("Failed reading states: {}", e);
                Vec::new()
            }
        };
        ServerEvent::InitialStates(states)
    }

    async fn chart(&self, kind: SensorKind) -> Vec<ChartPoint> {
        let sensor_id = match self.router.sensor_id(kind) {
            Some(sensor_id) => sensor_id,
            None => return Vec::new(),
        };
        match with_timeout(self.store_timeout, self.measurements.history(sensor_id)).await {
            Ok(history) => history
                .iter()
                .map(|m| ChartPoint::iso(m.date(), m.value()))
                .collect(),
            Err(e) => {
                error!(sensor_id = sensor_id, "Failed reading history: {}", e);
                Vec::new()
            }
        }
    }

    fn broadcast(&self, event: ServerEvent) {
        let attempts = self.clients.broadcast(&event);
        debug!("Broadcast {} to {} clients", event.name(), attempts);
    }
}
