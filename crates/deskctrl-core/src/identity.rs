//! Device identity shared across every discovery record.

/// Static identity block embedded verbatim in all discovery payloads and
/// used to derive topic names and entity ids.
#[derive(Debug, Clone, Copy)]
pub struct DeviceIdentity {
    /// Stable device id, also the MQTT client id (e.g. `deskctrl-01`).
    pub device_id: &'static str,
    /// Human-readable device name.
    pub name: &'static str,
    pub model: &'static str,
    pub manufacturer: &'static str,
    /// Build identity: short git hash with a `-dirty` marker when the tree
    /// had local modifications.
    pub sw_version: &'static str,
}
