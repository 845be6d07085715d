//! MQTT transport glue: embassy-net adapter and rust-mqtt client wrapper,
//! both behind the `mqtt` feature. The broker-independent publish surface
//! is `deskctrl_core::publish`.

pub mod client;

#[cfg(feature = "mqtt")]
pub use client::{EmbassyNetTransport, RustMqttClient, SessionConfig, connect_client};
