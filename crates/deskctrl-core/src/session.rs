//! Broker session state machine.
//!
//! Exactly one [`SessionController`] exists per process. The firmware polls
//! it once per loop iteration and carries out the returned action; attempt
//! outcomes are reported back so the controller can meter the retry guard,
//! the failure streak, and the watchdog. The retry interval is an
//! eligibility check against the monotonic clock, never a blocking sleep.

use embassy_time::{Duration, Instant};

use crate::clock::elapsed_since;

/// Minimum spacing between connection attempts after a failed handshake.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// If an outage lasts this long without a single successful connection, the
/// controller demands a hard restart.
pub const WATCHDOG_CEILING: Duration = Duration::from_secs(300);

/// How long Wi-Fi association may take at boot before the device restarts.
pub const LINK_STARTUP_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// What the driving loop should do this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionAction {
    /// Nothing to do; connected, mid-attempt, or not yet eligible to retry.
    Wait,
    /// A connection attempt is now permitted.
    Connect,
    /// The watchdog ceiling elapsed with no successful connection. Fired at
    /// most once per stuck window.
    Restart,
}

pub struct SessionController {
    state: SessionState,
    last_attempt: Option<Instant>,
    connected_at: Option<Instant>,
    /// First failure after the last success; anchors the watchdog window.
    outage_since: Option<Instant>,
    failure_streak: u32,
    restart_latched: bool,
}

impl SessionController {
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            last_attempt: None,
            connected_at: None,
            outage_since: None,
            failure_streak: 0,
            restart_latched: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Timestamp of the last successful connection, if any.
    pub fn connected_at(&self) -> Option<Instant> {
        self.connected_at
    }

    /// Drive the state machine. The link check comes first and
    /// short-circuits everything else for the iteration, including the
    /// watchdog: a dead link is the startup deadline's problem, not ours.
    pub fn poll(&mut self, link_up: bool, now: Instant) -> SessionAction {
        if !link_up {
            self.state = SessionState::Disconnected;
            return SessionAction::Wait;
        }

        match self.state {
            SessionState::Connected | SessionState::Connecting => SessionAction::Wait,
            SessionState::Disconnected => {
                if self.restart_latched {
                    return SessionAction::Wait;
                }
                if let Some(since) = self.outage_since {
                    if elapsed_since(now, since) > WATCHDOG_CEILING {
                        self.restart_latched = true;
                        return SessionAction::Restart;
                    }
                }
                if self.retry_due(now) {
                    self.state = SessionState::Connecting;
                    self.last_attempt = Some(now);
                    return SessionAction::Connect;
                }
                SessionAction::Wait
            }
        }
    }

    /// The handshake completed; streak and outage window are cleared.
    pub fn connect_succeeded(&mut self, now: Instant) {
        self.state = SessionState::Connected;
        self.connected_at = Some(now);
        self.outage_since = None;
        self.failure_streak = 0;
    }

    /// The handshake failed; the next attempt waits out [`RETRY_INTERVAL`].
    pub fn connect_failed(&mut self, now: Instant) {
        self.state = SessionState::Disconnected;
        self.failure_streak = self.failure_streak.saturating_add(1);
        if self.outage_since.is_none() {
            self.outage_since = Some(now);
        }
    }

    /// An established session dropped. The next attempt is immediately
    /// eligible; only failed attempts wait out the retry interval.
    pub fn connection_lost(&mut self, now: Instant) {
        self.state = SessionState::Disconnected;
        self.last_attempt = None;
        if self.outage_since.is_none() {
            self.outage_since = Some(now);
        }
    }

    fn retry_due(&self, now: Instant) -> bool {
        self.last_attempt
            .map_or(true, |at| elapsed_since(now, at) >= RETRY_INTERVAL)
    }
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new()
    }
}

/// Boot-time guard for Wi-Fi association.
#[derive(Debug, Clone, Copy)]
pub struct StartupDeadline {
    started: Instant,
}

impl StartupDeadline {
    pub fn new(now: Instant) -> Self {
        Self { started: now }
    }

    pub fn expired(&self, now: Instant) -> bool {
        elapsed_since(now, self.started) > LINK_STARTUP_DEADLINE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Instant {
        Instant::from_secs(secs)
    }

    #[test]
    fn first_attempt_is_immediate_once_link_is_up() {
        let mut session = SessionController::new();
        assert_eq!(session.poll(true, at(0)), SessionAction::Connect);
        assert_eq!(session.state(), SessionState::Connecting);
    }

    #[test]
    fn never_attempts_while_link_is_down() {
        let mut session = SessionController::new();
        for s in 0..600 {
            assert_eq!(session.poll(false, at(s)), SessionAction::Wait);
        }
        assert_eq!(session.state(), SessionState::Disconnected);
        // Link restored: attempt happens on the next poll.
        assert_eq!(session.poll(true, at(600)), SessionAction::Connect);
    }

    #[test]
    fn link_drop_forces_disconnected() {
        let mut session = SessionController::new();
        session.poll(true, at(0));
        session.connect_succeeded(at(0));
        assert!(session.is_connected());
        assert_eq!(session.poll(false, at(1)), SessionAction::Wait);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[test]
    fn failed_attempts_wait_out_the_retry_interval() {
        let mut session = SessionController::new();
        assert_eq!(session.poll(true, at(0)), SessionAction::Connect);
        session.connect_failed(at(0));
        // Not yet eligible: guard, not a sleep.
        assert_eq!(session.poll(true, at(2)), SessionAction::Wait);
        assert_eq!(session.poll(true, at(4)), SessionAction::Wait);
        assert_eq!(session.poll(true, at(5)), SessionAction::Connect);
    }

    #[test]
    fn streak_resets_on_success_before_watchdog() {
        let mut session = SessionController::new();
        // Three failures at 5 s spacing.
        for s in [0u64, 5, 10] {
            assert_eq!(session.poll(true, at(s)), SessionAction::Connect);
            session.connect_failed(at(s));
        }
        assert_eq!(session.failure_streak(), 3);
        // Fourth attempt succeeds well before the ceiling.
        assert_eq!(session.poll(true, at(15)), SessionAction::Connect);
        session.connect_succeeded(at(15));
        assert_eq!(session.failure_streak(), 0);
        assert!(session.is_connected());
        // No restart ever becomes due after the success.
        session.connection_lost(at(16));
        assert_eq!(session.poll(true, at(16)), SessionAction::Connect);
    }

    #[test]
    fn watchdog_fires_exactly_once_per_stuck_window() {
        let mut session = SessionController::new();
        let mut restarts = 0;
        let mut s = 0u64;
        while s < 400 {
            match session.poll(true, at(s)) {
                SessionAction::Connect => session.connect_failed(at(s)),
                SessionAction::Restart => restarts += 1,
                SessionAction::Wait => {}
            }
            s += 1;
        }
        assert_eq!(restarts, 1, "watchdog must not re-fire in the same window");
    }

    #[test]
    fn watchdog_counts_from_first_failure_after_a_drop() {
        let mut session = SessionController::new();
        session.poll(true, at(0));
        session.connect_succeeded(at(0));
        // Stays connected for a long time; no restart while healthy.
        assert_eq!(session.poll(true, at(1_000)), SessionAction::Wait);
        session.connection_lost(at(1_000));
        let mut restart_at = None;
        for s in 1_000..1_400 {
            match session.poll(true, at(s)) {
                SessionAction::Connect => session.connect_failed(at(s)),
                SessionAction::Restart => {
                    restart_at = Some(s);
                    break;
                }
                SessionAction::Wait => {}
            }
        }
        let fired = restart_at.expect("watchdog must fire for a 5+ minute outage");
        assert!(fired > 1_300, "window is anchored at the drop, fired at {fired}");
    }

    #[test]
    fn lost_connection_retries_without_delay() {
        let mut session = SessionController::new();
        session.poll(true, at(0));
        session.connect_succeeded(at(0));
        session.connection_lost(at(100));
        assert_eq!(session.poll(true, at(100)), SessionAction::Connect);
    }

    #[test]
    fn startup_deadline_is_sixty_seconds() {
        let deadline = StartupDeadline::new(at(0));
        assert!(!deadline.expired(at(60)));
        assert!(deadline.expired(at(61)));
    }
}
