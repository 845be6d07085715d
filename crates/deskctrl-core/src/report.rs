//! Button state and device health reporting.
//!
//! Three publish paths, all idempotent and safe to repeat: immediate
//! state-change events, a periodic forced republish of every Released
//! channel (the safety net against broker-side loss and late subscribers),
//! and periodic retained health telemetry. Nothing here runs while the
//! session is down: the reporter is best-effort telemetry, not a durable
//! pipeline.

use core::fmt::{self, Write};

use embassy_time::{Duration, Instant};
use heapless::String;

use crate::clock::elapsed_since;
use crate::debounce::{ButtonState, StateChange};
use crate::publish::{Publisher, QoS};
use crate::topics;

/// Cadence of the released-state safety republish.
pub const FORCED_REPUBLISH_INTERVAL: Duration = Duration::from_secs(10);

/// Cadence of the retained health publish.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Which periodic publishes are due this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportDue {
    pub forced: bool,
    pub health: bool,
}

/// The two periodic report timers.
///
/// Freshly constructed (or [`reset`](ReportTimers::reset)) timers fire on
/// the first poll, which is what makes every disconnect clear the cadence:
/// the next session starts with an immediate round.
pub struct ReportTimers {
    last_forced: Option<Instant>,
    last_health: Option<Instant>,
}

impl ReportTimers {
    pub fn new() -> Self {
        Self {
            last_forced: None,
            last_health: None,
        }
    }

    /// Forget both cadences. Called on every Connected → Disconnected
    /// transition so the timers fire again immediately after reconnect.
    pub fn reset(&mut self) {
        self.last_forced = None;
        self.last_health = None;
    }

    /// Stamp both timers after the post-connect full resync; the periodic
    /// paths resume their cadence from here.
    pub fn note_resync(&mut self, now: Instant) {
        self.last_forced = Some(now);
        self.last_health = Some(now);
    }

    /// Check both timers, stamping the ones that fire.
    pub fn poll(&mut self, now: Instant) -> ReportDue {
        let forced = self.interval_due(self.last_forced, FORCED_REPUBLISH_INTERVAL, now);
        if forced {
            self.last_forced = Some(now);
        }
        let health = self.interval_due(self.last_health, HEALTH_INTERVAL, now);
        if health {
            self.last_health = Some(now);
        }
        ReportDue { forced, health }
    }

    fn interval_due(&self, last: Option<Instant>, interval: Duration, now: Instant) -> bool {
        last.map_or(true, |at| elapsed_since(now, at) >= interval)
    }
}

impl Default for ReportTimers {
    fn default() -> Self {
        Self::new()
    }
}

/// Network health sampled at publish time. Not persisted between publishes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    /// Dotted-quad IPv4 address.
    pub ip: String<16>,
    /// Wi-Fi signal strength in dBm.
    pub rssi: i32,
}

impl HealthSnapshot {
    /// `{"ip": <string>, "rssi": <int>}`
    pub fn to_json(&self) -> Result<String<64>, fmt::Error> {
        let mut json = String::new();
        write!(json, "{{\"ip\":\"{}\",\"rssi\":{}}}", self.ip.as_str(), self.rssi)?;
        Ok(json)
    }
}

/// Publish one committed state change. Transient event semantics: QoS 0,
/// not retained.
pub async fn publish_state_change<P: Publisher>(
    publisher: &mut P,
    device_id: &str,
    change: StateChange,
) -> Result<(), P::Err> {
    let topic = topics::button_topic(device_id, change.index);
    publisher
        .publish(
            topic.as_str(),
            change.state.payload().as_bytes(),
            QoS::AtMostOnce,
            false,
        )
        .await
}

/// Republish the current stable state of every channel. Runs once per
/// session establishment so no subscriber is left with stale state after a
/// broker-side reconnect.
pub async fn publish_snapshot<P: Publisher, const N: usize>(
    publisher: &mut P,
    device_id: &str,
    snapshot: &[ButtonState; N],
) -> Result<(), P::Err> {
    for (index, state) in snapshot.iter().enumerate() {
        let topic = topics::button_topic(device_id, index);
        publisher
            .publish(topic.as_str(), state.payload().as_bytes(), QoS::AtMostOnce, false)
            .await?;
    }
    Ok(())
}

/// Safety republish: only channels currently Released. Pressed is the less
/// safe default and travels exclusively on the change-event path; periodic
/// reassertion of "released" keeps a lost event from leaving a subscriber
/// stuck on pressed.
pub async fn publish_released<P: Publisher, const N: usize>(
    publisher: &mut P,
    device_id: &str,
    snapshot: &[ButtonState; N],
) -> Result<(), P::Err> {
    for (index, state) in snapshot.iter().enumerate() {
        if state.is_pressed() {
            continue;
        }
        let topic = topics::button_topic(device_id, index);
        publisher
            .publish(topic.as_str(), state.payload().as_bytes(), QoS::AtMostOnce, false)
            .await?;
    }
    Ok(())
}

/// Retained health telemetry. A formatting failure drops this round and is
/// reported to the caller for logging; the next interval retries.
pub async fn publish_health<P: Publisher>(
    publisher: &mut P,
    device_id: &str,
    health: &HealthSnapshot,
) -> Result<bool, P::Err> {
    let Ok(json) = health.to_json() else {
        return Ok(false);
    };
    let topic = topics::health_topic(device_id);
    publisher
        .publish(topic.as_str(), json.as_bytes(), QoS::AtMostOnce, true)
        .await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::testing::RecordingPublisher;
    use embassy_futures::block_on;

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn fresh_timers_fire_immediately_then_hold_cadence() {
        let mut timers = ReportTimers::new();
        assert_eq!(timers.poll(at(0)), ReportDue { forced: true, health: true });
        assert_eq!(timers.poll(at(1)), ReportDue { forced: false, health: false });
        assert_eq!(timers.poll(at(9)), ReportDue { forced: false, health: false });
        assert_eq!(timers.poll(at(10)), ReportDue { forced: true, health: true });
    }

    #[test]
    fn reset_clears_the_cadence_for_the_next_session() {
        let mut timers = ReportTimers::new();
        timers.poll(at(0));
        timers.reset();
        // Disconnect at t=3, reconnect at t=4: fires immediately, not at t=10.
        assert_eq!(timers.poll(at(4)), ReportDue { forced: true, health: true });
    }

    #[test]
    fn resync_stamp_defers_the_periodic_paths() {
        let mut timers = ReportTimers::new();
        timers.note_resync(at(0));
        assert_eq!(timers.poll(at(5)), ReportDue { forced: false, health: false });
        assert_eq!(timers.poll(at(10)), ReportDue { forced: true, health: true });
    }

    #[test]
    fn state_change_is_an_unretained_event() {
        let mut publisher = RecordingPublisher::new();
        let change = StateChange { index: 0, state: ButtonState::Pressed };
        block_on(publish_state_change(&mut publisher, "deskctrl-01", change)).unwrap();
        let msg = &publisher.published[0];
        assert_eq!(msg.topic, "deskctrl/deskctrl-01/button/0");
        assert_eq!(msg.payload, "pressed");
        assert_eq!(msg.qos, QoS::AtMostOnce);
        assert!(!msg.retain);
    }

    #[test]
    fn snapshot_republishes_every_channel_once() {
        let mut publisher = RecordingPublisher::new();
        let snapshot = [
            ButtonState::Released,
            ButtonState::Pressed,
            ButtonState::Released,
            ButtonState::Released,
        ];
        block_on(publish_snapshot(&mut publisher, "deskctrl-01", &snapshot)).unwrap();
        assert_eq!(publisher.published.len(), 4);
        assert_eq!(publisher.published[1].payload, "pressed");
        assert_eq!(publisher.published[3].topic, "deskctrl/deskctrl-01/button/3");
    }

    #[test]
    fn forced_republish_only_ever_emits_released() {
        let mut publisher = RecordingPublisher::new();
        let snapshot = [
            ButtonState::Pressed,
            ButtonState::Released,
            ButtonState::Pressed,
            ButtonState::Released,
        ];
        block_on(publish_released(&mut publisher, "deskctrl-01", &snapshot)).unwrap();
        assert_eq!(publisher.published.len(), 2);
        assert!(publisher.published.iter().all(|m| m.payload == "released"));
        assert_eq!(publisher.published[0].topic, "deskctrl/deskctrl-01/button/1");
        assert_eq!(publisher.published[1].topic, "deskctrl/deskctrl-01/button/3");
    }

    #[test]
    fn health_is_retained_json() {
        let mut publisher = RecordingPublisher::new();
        let mut ip = String::new();
        ip.push_str("192.168.0.17").unwrap();
        let health = HealthSnapshot { ip, rssi: -55 };
        assert!(block_on(publish_health(&mut publisher, "deskctrl-01", &health)).unwrap());
        let msg = &publisher.published[0];
        assert_eq!(msg.topic, "deskctrl/deskctrl-01/status_json");
        assert_eq!(msg.payload, "{\"ip\":\"192.168.0.17\",\"rssi\":-55}");
        assert!(msg.retain);
    }
}
