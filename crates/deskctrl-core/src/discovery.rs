//! Home Assistant MQTT discovery records.
//!
//! One retained config record per reportable entity: a `binary_sensor` per
//! button plus two diagnostic `sensor` entities (IP address, RSSI) that
//! share the health telemetry topic. Every record embeds the same device
//! identity block and wires entity availability to the device status topic,
//! so entities flip to unavailable the moment the broker delivers the
//! last-will.
//!
//! JSON is built by hand into fixed-capacity strings; there is no dynamic
//! allocation anywhere on this path.
//!
//! Reference: <https://www.home-assistant.io/integrations/mqtt/#mqtt-discovery>

use core::fmt::{self, Write};

use heapless::String;
use thiserror_no_std::Error;

use crate::identity::DeviceIdentity;
use crate::publish::{Publisher, QoS};
use crate::topics;

/// Capacity for one discovery payload.
const PAYLOAD_CAP: usize = 768;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// The payload did not fit its fixed-capacity buffer.
    #[error("discovery payload overflowed its buffer")]
    Overflow,
}

impl From<fmt::Error> for EncodeError {
    fn from(_: fmt::Error) -> Self {
        EncodeError::Overflow
    }
}

/// The two diagnostic entities published alongside the buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnostic {
    IpAddress,
    Rssi,
}

impl Diagnostic {
    /// Key in the health JSON and suffix of the discovery topic.
    pub fn field(self) -> &'static str {
        match self {
            Diagnostic::IpAddress => "ip",
            Diagnostic::Rssi => "rssi",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Diagnostic::IpAddress => "IP Address",
            Diagnostic::Rssi => "Wi-Fi RSSI",
        }
    }
}

/// Discovery config for one button.
pub fn button_payload(
    identity: &DeviceIdentity,
    index: usize,
) -> Result<String<PAYLOAD_CAP>, EncodeError> {
    let state_topic = topics::button_topic(identity.device_id, index);
    let mut payload = String::new();

    write!(payload, "{{\"unique_id\":\"")?;
    topics::write_object_id(&mut payload, identity.device_id)?;
    write!(payload, "_button{}\",", index)?;
    write!(payload, "\"name\":\"Button {}\",", index)?;
    write!(payload, "\"icon\":\"mdi:gesture-tap-button\",")?;
    write!(payload, "\"state_topic\":\"{}\",", state_topic.as_str())?;
    write!(payload, "\"payload_on\":\"pressed\",")?;
    write!(payload, "\"payload_off\":\"released\",")?;
    write_availability(&mut payload, identity)?;
    write_device_block(&mut payload, identity)?;
    write!(payload, "}}")?;

    Ok(payload)
}

/// Discovery config for one diagnostic entity. Both diagnostics read their
/// value out of the retained health JSON via a value template.
pub fn diagnostic_payload(
    identity: &DeviceIdentity,
    diagnostic: Diagnostic,
) -> Result<String<PAYLOAD_CAP>, EncodeError> {
    let state_topic = topics::health_topic(identity.device_id);
    let mut payload = String::new();

    write!(payload, "{{\"unique_id\":\"")?;
    topics::write_object_id(&mut payload, identity.device_id)?;
    write!(payload, "_{}\",", diagnostic.field())?;
    write!(payload, "\"name\":\"{}\",", diagnostic.label())?;
    write!(payload, "\"state_topic\":\"{}\",", state_topic.as_str())?;
    write!(
        payload,
        "\"value_template\":\"{{{{ value_json.{} }}}}\",",
        diagnostic.field()
    )?;
    match diagnostic {
        Diagnostic::IpAddress => {
            write!(payload, "\"icon\":\"mdi:ip-network\",")?;
        }
        Diagnostic::Rssi => {
            write!(payload, "\"device_class\":\"signal_strength\",")?;
            write!(payload, "\"unit_of_measurement\":\"dBm\",")?;
        }
    }
    write!(payload, "\"entity_category\":\"diagnostic\",")?;
    write_availability(&mut payload, identity)?;
    write_device_block(&mut payload, identity)?;
    write!(payload, "}}")?;

    Ok(payload)
}

fn write_availability(
    payload: &mut String<PAYLOAD_CAP>,
    identity: &DeviceIdentity,
) -> Result<(), EncodeError> {
    let availability_topic = topics::status_topic(identity.device_id);
    write!(
        payload,
        "\"availability_topic\":\"{}\",",
        availability_topic.as_str()
    )?;
    write!(payload, "\"payload_available\":\"online\",")?;
    write!(payload, "\"payload_not_available\":\"offline\",")?;
    Ok(())
}

/// Device identity block, identical across every record so Home Assistant
/// groups all entities under one device.
fn write_device_block(
    payload: &mut String<PAYLOAD_CAP>,
    identity: &DeviceIdentity,
) -> Result<(), EncodeError> {
    write!(payload, "\"device\":{{\"identifiers\":[\"")?;
    topics::write_object_id(payload, identity.device_id)?;
    write!(payload, "\"],")?;
    write!(payload, "\"name\":\"{}\",", identity.name)?;
    write!(payload, "\"model\":\"{}\",", identity.model)?;
    write!(payload, "\"manufacturer\":\"{}\",", identity.manufacturer)?;
    write!(payload, "\"sw_version\":\"{}\"}}", identity.sw_version)?;
    Ok(())
}

/// Publish one retained discovery record per entity: every button, then the
/// two diagnostics. Invoked exactly once per session establishment.
///
/// A record that fails to encode is skipped and logged; the rest of the
/// cycle continues and the next reconnect retries naturally. Transport
/// errors propagate; the session controller treats them as connection
/// loss.
pub async fn announce<P: Publisher>(
    publisher: &mut P,
    identity: &DeviceIdentity,
    button_count: usize,
) -> Result<usize, P::Err> {
    let mut published = 0;

    for index in 0..button_count {
        match button_payload(identity, index) {
            Ok(payload) => {
                let topic = topics::button_discovery_topic(identity.device_id, index);
                publisher
                    .publish(topic.as_str(), payload.as_bytes(), QoS::AtLeastOnce, true)
                    .await?;
                published += 1;
            }
            Err(e) => {
                log::warn!("discovery: skipping button {} record: {:?}", index, e);
            }
        }
    }

    for diagnostic in [Diagnostic::IpAddress, Diagnostic::Rssi] {
        match diagnostic_payload(identity, diagnostic) {
            Ok(payload) => {
                let topic =
                    topics::diagnostic_discovery_topic(identity.device_id, diagnostic.field());
                publisher
                    .publish(topic.as_str(), payload.as_bytes(), QoS::AtLeastOnce, true)
                    .await?;
                published += 1;
            }
            Err(e) => {
                log::warn!(
                    "discovery: skipping {} record: {:?}",
                    diagnostic.field(),
                    e
                );
            }
        }
    }

    Ok(published)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::testing::RecordingPublisher;
    use embassy_futures::block_on;

    const IDENTITY: DeviceIdentity = DeviceIdentity {
        device_id: "deskctrl-01",
        name: "Deskctrl Button Panel",
        model: "ESP32-C6 Button Node",
        manufacturer: "deskctrl project",
        sw_version: "abc1234-dirty",
    };

    #[test]
    fn button_record_wires_state_and_availability() {
        let payload = button_payload(&IDENTITY, 2).unwrap();
        let json = payload.as_str();
        assert!(json.starts_with('{') && json.ends_with('}'));
        assert!(json.contains("\"unique_id\":\"deskctrl_01_button2\""));
        assert!(json.contains("\"name\":\"Button 2\""));
        assert!(json.contains("\"state_topic\":\"deskctrl/deskctrl-01/button/2\""));
        assert!(json.contains("\"payload_on\":\"pressed\""));
        assert!(json.contains("\"payload_off\":\"released\""));
        assert!(json.contains("\"availability_topic\":\"deskctrl/deskctrl-01/status\""));
        assert!(json.contains("\"payload_available\":\"online\""));
        assert!(json.contains("\"payload_not_available\":\"offline\""));
    }

    #[test]
    fn diagnostics_read_from_the_shared_health_topic() {
        let ip = diagnostic_payload(&IDENTITY, Diagnostic::IpAddress).unwrap();
        assert!(ip.contains("\"state_topic\":\"deskctrl/deskctrl-01/status_json\""));
        assert!(ip.contains("\"value_template\":\"{{ value_json.ip }}\""));
        assert!(ip.contains("\"entity_category\":\"diagnostic\""));

        let rssi = diagnostic_payload(&IDENTITY, Diagnostic::Rssi).unwrap();
        assert!(rssi.contains("\"value_template\":\"{{ value_json.rssi }}\""));
        assert!(rssi.contains("\"unit_of_measurement\":\"dBm\""));
    }

    #[test]
    fn device_block_is_shared_verbatim_across_records() {
        let device = "\"device\":{\"identifiers\":[\"deskctrl_01\"],\
                      \"name\":\"Deskctrl Button Panel\",\
                      \"model\":\"ESP32-C6 Button Node\",\
                      \"manufacturer\":\"deskctrl project\",\
                      \"sw_version\":\"abc1234-dirty\"}";
        assert!(button_payload(&IDENTITY, 0).unwrap().contains(device));
        assert!(
            diagnostic_payload(&IDENTITY, Diagnostic::Rssi)
                .unwrap()
                .contains(device)
        );
    }

    #[test]
    fn announce_emits_one_retained_record_per_entity() {
        let mut publisher = RecordingPublisher::new();
        let published = block_on(announce(&mut publisher, &IDENTITY, 4)).unwrap();
        assert_eq!(published, 6, "four buttons plus two diagnostics");
        assert_eq!(
            publisher.topics(),
            [
                "homeassistant/binary_sensor/deskctrl_01_button0/config",
                "homeassistant/binary_sensor/deskctrl_01_button1/config",
                "homeassistant/binary_sensor/deskctrl_01_button2/config",
                "homeassistant/binary_sensor/deskctrl_01_button3/config",
                "homeassistant/sensor/deskctrl-01/ip/config",
                "homeassistant/sensor/deskctrl-01/rssi/config",
            ]
        );
        assert!(publisher.published.iter().all(|m| m.retain));
        assert!(publisher.published.iter().all(|m| m.qos == QoS::AtLeastOnce));
    }
}
