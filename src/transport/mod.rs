//! Outbound transport: the wire message format and the MQTT publisher.

pub mod mqtt;
pub mod tls;
pub mod wire;

pub use mqtt::{MqttStatePublisher, PublisherConfig, DEFAULT_PORT, DEFAULT_TOPIC};
pub use tls::{BrokerEndpoint, TlsMaterials};
pub use wire::{build_message, to_payload, BoxDetection, EncodedFrame, Envelope, WireMessage};
