use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::bridge::BridgeMessage;
use crate::config::{MqttBroker, MqttConfig};
use crate::error::MQTTError;
use async_trait::async_trait;
use rand::Rng;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};


const QOS: QoS = QoS::AtLeastOnce;
const REQUEST_CAPACITY: usize = 64;

/// Outbound side of the broker connection, used for actuator commands
#[async_trait]
pub trait CommandPublisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), MQTTError>;

    fn is_connected(&self) -> bool;
}

#[derive(Clone)]
pub struct MqttPublisher {
    cli: AsyncClient,
    is_connected: Arc<AtomicBool>,
    timeout: Duration,
}

#[async_trait]
impl CommandPublisher for MqttPublisher {
    /// Commands are fire-and-forget, nothing is queued while disconnected
    async fn publish(&self, topic: &str, payload: &str) -> Result<(), MQTTError> {
        if !self.is_connected() {
            return Err(MQTTError::Disconnected);
        }

        debug!(topic = topic, "Publish command {}", payload);
        tokio::time::timeout(
            self.timeout,
            self.cli.publish(topic, QOS, false, payload.as_bytes().to_vec()),
        )
        .await
        .map_err(|_| MQTTError::Timeout)??;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }
}

/// Exponential reconnect delay with jitter.
///
/// The n-th delay is `base * 2^n` capped at `max`, and the returned
/// value is drawn uniformly from the upper half of it.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Backoff {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    /// The capped delay before jitter
    pub fn ceiling(&self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        self.base
            .checked_mul(factor)
            .map_or(self.max, |delay| delay.min(self.max))
    }

    pub fn next_delay(&mut self) -> Duration {
        let ceiling = self.ceiling();
        self.attempt = self.attempt.saturating_add(1);

        let ceiling_ms = ceiling.as_millis() as u64;
        if ceiling_ms < 2 {
            return ceiling;
        }
        Duration::from_millis(rand::thread_rng().gen_range(ceiling_ms / 2..=ceiling_ms))
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub fn build_options(config: &MqttConfig, broker: &MqttBroker) -> MqttOptions {
    let mut options = MqttOptions::new(&config.client_id, &broker.host, broker.port);
    options.set_keep_alive(config.keep_alive);
    options.set_clean_session(true);
    if let Some((username, password)) = &config.credentials {
        options.set_credentials(username, password);
    }
    if config.tls {
        options.set_transport(Transport::tls_with_default_config());
    }
    options
}

/// Connects to the first broker and keeps the connection alive until
/// `shutdown` fires. Broker events are forwarded into `sender`.
pub fn start(
    config: &MqttConfig,
    topics: Vec<String>,
    sender: UnboundedSender<BridgeMessage>,
    shutdown: watch::Receiver<bool>,
) -> (MqttPublisher, JoinHandle<()>) {
    let (cli, eventloop) = AsyncClient::new(
        build_options(config, &config.brokers[0]),
        REQUEST_CAPACITY,
    );
    let is_connected = Arc::new(AtomicBool::new(false));

    let publisher = MqttPublisher {
        cli: cli.clone(),
        is_connected: is_connected.clone(),
        timeout: config.timeout,
    };
    let listener = Listener {
        cli,
        topics,
        is_connected,
        sender,
    };
    let handle = tokio::spawn(listener.run(eventloop, config.clone(), shutdown));
    (publisher, handle)
}

struct Listener {
    cli: AsyncClient,
    topics: Vec<String>,
    is_connected: Arc<AtomicBool>,
    sender: UnboundedSender<BridgeMessage>,
}

impl Listener {
    async fn run(
        self,
        mut eventloop: EventLoop,
        config: MqttConfig,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut backoff = Backoff::new(config.reconnect_base, config.reconnect_max);
        let mut broker_idx = 0;
        info!("Connecting to broker {}", config.brokers[broker_idx]);

        loop {
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = eventloop.poll() => polled,
            };

            match polled {
                Ok(event) => {
                    if self.on_event(event) {
                        backoff.reset();
                        info!("Connected to broker {}", config.brokers[broker_idx]);
                    }
                }
                Err(e) => {
                    self.on_error(&e);
                    let delay = backoff.next_delay();
                    broker_idx = (broker_idx + 1) % config.brokers.len();
                    let broker = &config.brokers[broker_idx];
                    warn!(
                        "Broker connection failed: {}, retry on {} in {:?}",
                        e, broker, delay
                    );
                    eventloop.mqtt_options = build_options(&config, broker);

                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if let Err(e) = self.cli.try_disconnect() {
            debug!("Failed disconnect on shutdown: {}", e);
        }
        self.is_connected.store(false, Ordering::Relaxed);
        info!("Ended MQTT event loop");
    }

    /// Returns true on an accepted connection
    fn on_event(&self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::ConnAck(ack)) if ack.code == ConnectReturnCode::Success => {
                self.is_connected.store(true, Ordering::Relaxed);
                for topic in &self.topics {
                    match self.cli.try_subscribe(topic.as_str(), QOS) {
                        Ok(_) => debug!("Subscribed topic {}", topic),
                        Err(e) => error!("Failed subscribing {}: {}", topic, e),
                    }
                }
                self.forward(BridgeMessage::BrokerConnected);
                true
            }
            Event::Incoming(Packet::Publish(publish)) => {
                match std::str::from_utf8(&publish.payload) {
                    Ok(payload) => self.forward(BridgeMessage::BrokerPublish {
                        topic: publish.topic.clone(),
                        payload: payload.to_owned(),
                    }),
                    Err(e) => debug!(topic = %publish.topic, "Dropping non utf-8 payload: {}", e),
                }
                false
            }
            _ => false,
        }
    }

    fn on_error(&self, err: &ConnectionError) {
        if self.is_connected.swap(false, Ordering::Relaxed) {
            self.forward(BridgeMessage::BrokerDisconnected(err.to_string()));
        }
    }

    fn forward(&self, msg: BridgeMessage) {
        if let Err(e) = self.sender.send(msg) {
            error!("Failed forwarding broker event: {}", e);
        }
    }
}
