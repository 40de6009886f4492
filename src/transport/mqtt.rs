//! MQTT workspace state publisher.
//!
//! `connect` starts the client's network loop on its own thread and waits for
//! the broker's CONNACK; `publish_state` sends one QoS 1, non-retained message
//! per call. Delivery retries are left to the client. `disconnect` lets the
//! loop write everything already queued, then DISCONNECT, before joining it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use rumqttc::{
    Client, ConnectReturnCode, Connection, Event, MqttOptions, NetworkOptions, Outgoing, Packet,
    QoS,
};

use super::tls::{build_transport, BrokerEndpoint, TlsMaterials};
use super::wire::{build_message, to_payload};
use crate::error::MonitorError;
use crate::monitor::WorkspaceState;
use crate::pipeline::StateSink;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TOPIC: &str = "workspace/state";
/// Encoded frames are far larger than the client's 10 KiB default.
pub const MAX_PACKET_SIZE: usize = 1024 * 1024;

const CONNECT_POLL: Duration = Duration::from_millis(50);
const RECONNECT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct PublisherConfig {
    pub broker: String,
    pub port: u16,
    pub topic: String,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls: TlsMaterials,
    pub keep_alive: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            broker: String::new(),
            port: DEFAULT_PORT,
            topic: DEFAULT_TOPIC.to_string(),
            client_id: "workspace-monitor".to_string(),
            username: None,
            password: None,
            use_tls: false,
            tls: TlsMaterials::default(),
            keep_alive: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for PublisherConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherConfig")
            .field("broker", &self.broker)
            .field("port", &self.port)
            .field("topic", &self.topic)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("use_tls", &self.use_tls)
            .finish()
    }
}

struct Session {
    client: Client,
    connected: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    network: Option<JoinHandle<()>>,
}

impl Session {
    /// Queue DISCONNECT without blocking and stop reconnecting.
    fn shut_down(&mut self) {
        if let Err(err) = self.client.try_disconnect() {
            log::debug!("MQTT disconnect request not sent: {}", err);
        }
        self.stop.store(true, Ordering::SeqCst);
    }

    fn join(&mut self) {
        if let Some(handle) = self.network.take() {
            let _ = handle.join();
        }
    }
}

pub struct MqttStatePublisher {
    config: PublisherConfig,
    endpoint: BrokerEndpoint,
    session: Option<Session>,
    published: u64,
}

impl MqttStatePublisher {
    /// Validate the broker address. No network I/O happens until `connect`.
    ///
    /// TLS is used for `mqtts://`/`ssl://` addresses, when `use_tls` is set,
    /// or when both a username and a password are configured.
    pub fn new(config: PublisherConfig) -> Result<Self> {
        let with_credentials = config.username.is_some() && config.password.is_some();
        let endpoint =
            BrokerEndpoint::parse(&config.broker, config.port, config.use_tls || with_credentials)?;
        if config.topic.trim().is_empty() {
            return Err(MonitorError::Config("MQTT topic must not be empty".into()).into());
        }
        Ok(Self {
            config,
            endpoint,
            session: None,
            published: 0,
        })
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    pub fn published(&self) -> u64 {
        self.published
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.connected.load(Ordering::SeqCst))
    }

    /// Connect and block until the broker accepts the session or `timeout`
    /// elapses. On timeout the network loop is stopped and joined before
    /// returning; a TCP or TLS handshake still in flight is bounded by
    /// `timeout` rounded up to whole seconds.
    pub fn connect(&mut self, timeout: Duration) -> Result<()> {
        if self.session.is_some() {
            return Err(MonitorError::IllegalState("MQTT publisher already connected".into()).into());
        }
        log::info!("Connecting to MQTT broker at '{}'...", self.endpoint);

        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.endpoint.host.clone(),
            self.endpoint.port,
        );
        options.set_keep_alive(self.config.keep_alive);
        options.set_clean_session(true);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        if let Some(user) = &self.config.username {
            options.set_credentials(user.clone(), self.config.password.clone().unwrap_or_default());
        }
        options.set_transport(build_transport(&self.endpoint, &self.config.tls)?);

        let (client, mut connection) = Client::new(options, 10);
        let mut network_options = NetworkOptions::new();
        network_options.set_connection_timeout(timeout.as_secs_f64().ceil().max(1.0) as u64);
        connection.eventloop.set_network_options(network_options);
        let connected = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));
        let network = {
            let connected = Arc::clone(&connected);
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("mqtt-network".into())
                .spawn(move || run_network(connection, connected, stop))
                .context("spawn MQTT network thread")?
        };
        let mut session = Session {
            client,
            connected,
            stop,
            network: Some(network),
        };

        let started = Instant::now();
        while !session.connected.load(Ordering::SeqCst) {
            if started.elapsed() > timeout {
                session.shut_down();
                session.join();
                return Err(MonitorError::timeout(
                    format!("MQTT connection to '{}'", self.endpoint),
                    timeout,
                )
                .into());
            }
            log::debug!("Waiting for MQTT client to connect...");
            std::thread::sleep(CONNECT_POLL);
        }

        log::info!(
            "MQTT client connected (TLS: {}, auth: {})",
            self.endpoint.use_tls,
            self.config.username.is_some()
        );
        self.session = Some(session);
        Ok(())
    }

    /// Serialize `state` and publish it once with QoS 1, retain off.
    pub fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
        let session = self.session.as_ref().ok_or_else(|| {
            MonitorError::IllegalState("publish_state called before connect".into())
        })?;
        let message = build_message(state)?;
        let payload = to_payload(&message)?;
        let bytes = payload.len();
        session
            .client
            .publish(self.config.topic.as_str(), QoS::AtLeastOnce, false, payload)
            .context("queue MQTT publish")?;
        self.published += 1;
        log::debug!(
            "Published workspace state ({} bytes) to '{}' with topic '{}'",
            bytes,
            self.endpoint,
            self.config.topic
        );
        Ok(())
    }

    /// Send DISCONNECT after every queued publish and wait for the network
    /// loop to finish.
    pub fn disconnect(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            return Ok(());
        };
        let queued = session.client.disconnect().context("send MQTT disconnect");
        session.stop.store(true, Ordering::SeqCst);
        queued?;
        session.join();
        log::info!("Disconnected from MQTT broker '{}'", self.endpoint);
        Ok(())
    }
}

impl StateSink for MqttStatePublisher {
    fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
        MqttStatePublisher::publish_state(self, state)
    }
}

impl Drop for MqttStatePublisher {
    fn drop(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.shut_down();
        }
    }
}

fn run_network(mut connection: Connection, connected: Arc<AtomicBool>, stop: Arc<AtomicBool>) {
    // `stop` only ends the loop on errors; requests already queued, DISCONNECT
    // included, are still written in order.
    for event in connection.iter() {
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    connected.store(true, Ordering::SeqCst);
                } else {
                    log::warn!("MQTT broker refused connection: {:?}", ack.code);
                }
            }
            Ok(Event::Incoming(Packet::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(err) => {
                connected.store(false, Ordering::SeqCst);
                if stop.load(Ordering::SeqCst) {
                    log::debug!("MQTT network loop stopping after: {}", err);
                    break;
                }
                log::warn!("MQTT connection error: {}", err);
                std::thread::sleep(RECONNECT_BACKOFF);
            }
        }
    }
    connected.store(false, Ordering::SeqCst);
}
