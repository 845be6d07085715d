//! rust-mqtt integration.
//!
//! [`EmbassyNetTransport`] adapts an embassy-net TCP socket to the
//! embedded-io-async traits rust-mqtt wants, and [`RustMqttClient`] puts
//! the connected client behind the core's [`Publisher`] trait so discovery
//! and reporting never see the concrete MQTT crate.

#[cfg(feature = "mqtt")]
use defmt::{error, info, warn};
#[cfg(feature = "mqtt")]
use embedded_io_async::{ErrorType, Read, Write as IoWrite};

#[cfg(feature = "mqtt")]
use deskctrl_core::publish::{Publisher, QoS};

#[cfg(feature = "mqtt")]
use rust_mqtt::client::client::MqttClient;
#[cfg(feature = "mqtt")]
use rust_mqtt::client::client_config::{ClientConfig, MqttVersion};
#[cfg(feature = "mqtt")]
use rust_mqtt::packet::v5::publish_packet::QualityOfService;
#[cfg(feature = "mqtt")]
use rust_mqtt::packet::v5::reason_codes::ReasonCode;
#[cfg(feature = "mqtt")]
use rust_mqtt::utils::rng_generator::CountingRng;

/// Transport adapter wrapping an embassy-net TCP socket.
#[cfg(feature = "mqtt")]
pub struct EmbassyNetTransport<'a> {
    socket: embassy_net::tcp::TcpSocket<'a>,
}

#[cfg(feature = "mqtt")]
impl<'a> EmbassyNetTransport<'a> {
    pub fn new(socket: embassy_net::tcp::TcpSocket<'a>) -> Self {
        Self { socket }
    }
}

#[cfg(feature = "mqtt")]
impl ErrorType for EmbassyNetTransport<'_> {
    type Error = embassy_net::tcp::Error;
}

#[cfg(feature = "mqtt")]
impl Read for EmbassyNetTransport<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.socket.read(buf).await
    }
}

#[cfg(feature = "mqtt")]
impl IoWrite for EmbassyNetTransport<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.socket.write(buf).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.socket.flush().await
    }
}

/// CONNECT handshake parameters.
#[cfg(feature = "mqtt")]
pub struct SessionConfig<'a> {
    /// Client identity; also the device id in every topic.
    pub client_id: &'a str,
    pub keep_alive_secs: u16,
    pub username: &'a str,
    pub password: &'a str,
    /// Last-will: retained `offline` on the status topic, delivered by the
    /// broker on any unclean disconnect.
    pub will_topic: &'a str,
    pub will_payload: &'a [u8],
}

/// Connected rust-mqtt client behind the core publish trait.
#[cfg(feature = "mqtt")]
pub struct RustMqttClient<'a, T: Read + IoWrite> {
    client: MqttClient<'a, T, 5, CountingRng>,
}

#[cfg(feature = "mqtt")]
impl<T: Read + IoWrite> Publisher for RustMqttClient<'_, T> {
    type Err = ReasonCode;

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
        retain: bool,
    ) -> Result<(), Self::Err> {
        let mqtt_qos = match qos {
            QoS::AtMostOnce => QualityOfService::QoS0,
            QoS::AtLeastOnce => QualityOfService::QoS1,
        };

        match self.client.send_message(topic, payload, mqtt_qos, retain).await {
            Ok(()) => Ok(()),
            // Published fine, nobody subscribed to the topic.
            Err(ReasonCode::NoMatchingSubscribers) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Perform the MQTT v5 CONNECT handshake over a connected TCP socket.
///
/// The will is registered before the handshake so the broker holds it for
/// the whole session. Note: rust-mqtt v0.3 hardcodes clean-start and does
/// not expose a will QoS knob; the will retain flag is honored.
#[cfg(feature = "mqtt")]
pub async fn connect_client<'a>(
    transport: EmbassyNetTransport<'a>,
    config: SessionConfig<'a>,
    recv_buffer: &'a mut [u8],
    write_buffer: &'a mut [u8],
) -> Result<RustMqttClient<'a, EmbassyNetTransport<'a>>, ReasonCode> {
    let mut client_config = ClientConfig::new(MqttVersion::MQTTv5, CountingRng(0));

    client_config.add_client_id(config.client_id);
    client_config.keep_alive = config.keep_alive_secs;
    client_config.add_will(config.will_topic, config.will_payload, true);

    if !config.username.is_empty() {
        client_config.add_username(config.username);
        if !config.password.is_empty() {
            client_config.add_password(config.password);
        }
    }

    let mut client = MqttClient::<_, 5, _>::new(
        transport,
        write_buffer,
        write_buffer.len(),
        recv_buffer,
        recv_buffer.len(),
        client_config,
    );

    match client.connect_to_broker().await {
        Ok(()) => {
            info!("mqtt: CONNACK ok (MQTT v5)");
            Ok(RustMqttClient { client })
        }
        Err(e) => {
            error!("mqtt: CONNECT rejected: {:?}", defmt::Debug2Format(&e));
            match e {
                ReasonCode::BadUserNameOrPassword | ReasonCode::NotAuthorized => {
                    error!("mqtt: check MQTT_USERNAME / MQTT_PASSWORD and broker ACLs");
                }
                ReasonCode::ServerUnavailable | ReasonCode::ServerBusy => {
                    warn!("mqtt: broker temporarily unavailable, will retry");
                }
                ReasonCode::ClientIdNotValid => {
                    error!("mqtt: broker rejected client id '{}'", config.client_id);
                }
                _ => {}
            }
            Err(e)
        }
    }
}
