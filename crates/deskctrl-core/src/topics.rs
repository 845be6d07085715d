//! Topic construction.
//!
//! State and status topics live under `deskctrl/{device_id}/...`; discovery
//! topics live under the Home Assistant discovery root. All builders write
//! into fixed-capacity strings sized so the formats cannot overflow with
//! any sane device id.

use core::fmt::{self, Write};

use heapless::String;

/// Device topic namespace root.
pub const TOPIC_ROOT: &str = "deskctrl";

/// Home Assistant discovery namespace root.
pub const HA_DISCOVERY_ROOT: &str = "homeassistant";

/// Availability topic, also the last-will topic.
/// Format: `deskctrl/{device_id}/status`
pub fn status_topic(device_id: &str) -> String<64> {
    let mut topic = String::new();
    write!(topic, "{}/{}/status", TOPIC_ROOT, device_id).ok();
    topic
}

/// Button state topic. Format: `deskctrl/{device_id}/button/{index}`
pub fn button_topic(device_id: &str, index: usize) -> String<64> {
    let mut topic = String::new();
    write!(topic, "{}/{}/button/{}", TOPIC_ROOT, device_id, index).ok();
    topic
}

/// Health telemetry topic. Format: `deskctrl/{device_id}/status_json`
pub fn health_topic(device_id: &str) -> String<64> {
    let mut topic = String::new();
    write!(topic, "{}/{}/status_json", TOPIC_ROOT, device_id).ok();
    topic
}

/// Build identity topic. Format: `deskctrl/{device_id}/git`
pub fn version_topic(device_id: &str) -> String<64> {
    let mut topic = String::new();
    write!(topic, "{}/{}/git", TOPIC_ROOT, device_id).ok();
    topic
}

/// Discovery topic for one button.
/// Format: `homeassistant/binary_sensor/{device_id}_button{index}/config`
pub fn button_discovery_topic(device_id: &str, index: usize) -> String<128> {
    let mut topic = String::new();
    write!(topic, "{}/binary_sensor/", HA_DISCOVERY_ROOT).ok();
    write_object_id(&mut topic, device_id).ok();
    write!(topic, "_button{}/config", index).ok();
    topic
}

/// Discovery topic for one diagnostic field.
/// Format: `homeassistant/sensor/{device_id}/{field}/config`
pub fn diagnostic_discovery_topic(device_id: &str, field: &str) -> String<128> {
    let mut topic = String::new();
    write!(
        topic,
        "{}/sensor/{}/{}/config",
        HA_DISCOVERY_ROOT, device_id, field
    )
    .ok();
    topic
}

/// Write `device_id` with hyphens mapped to underscores. Home Assistant
/// object and unique ids reject hyphens.
pub fn write_object_id(out: &mut impl fmt::Write, device_id: &str) -> fmt::Result {
    for c in device_id.chars() {
        out.write_char(if c == '-' { '_' } else { c })?;
    }
    Ok(())
}
