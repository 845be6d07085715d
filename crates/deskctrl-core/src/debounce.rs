//! Button input debouncing.
//!
//! Each physical input line is sampled once per scan iteration and folded
//! into a stable logical state with hysteresis: a raw edge only commits
//! after the line has held its new level for longer than
//! [`DEBOUNCE_WINDOW`]. Contact bounce entirely inside the window produces
//! no commits at all.

use embassy_time::{Duration, Instant};
use heapless::Vec;

use crate::clock::elapsed_since;

/// Minimum time a raw level must hold before a change is treated as real.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(50);

/// Stable logical state of one button.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonState {
    Released,
    Pressed,
}

impl ButtonState {
    pub fn from_pressed(pressed: bool) -> Self {
        if pressed {
            ButtonState::Pressed
        } else {
            ButtonState::Released
        }
    }

    pub fn is_pressed(self) -> bool {
        matches!(self, ButtonState::Pressed)
    }

    /// Wire payload for the button state topics.
    pub fn payload(self) -> &'static str {
        match self {
            ButtonState::Pressed => "pressed",
            ButtonState::Released => "released",
        }
    }
}

/// A committed state transition on one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub index: usize,
    pub state: ButtonState,
}

/// Debouncer for a single input line.
///
/// Starts out Released; the first raw sample is treated like any other edge
/// and must hold through the window before it commits.
#[derive(Debug, Clone, Copy)]
pub struct Debouncer {
    stable: ButtonState,
    last_raw: bool,
    last_change: Instant,
}

impl Debouncer {
    pub fn new(now: Instant) -> Self {
        Self {
            stable: ButtonState::Released,
            last_raw: false,
            last_change: now,
        }
    }

    /// Current committed state.
    pub fn state(&self) -> ButtonState {
        self.stable
    }

    /// Feed one raw sample taken at `now` (monotonically non-decreasing).
    /// Returns the new stable state when a transition commits.
    pub fn sample(&mut self, pressed: bool, now: Instant) -> Option<ButtonState> {
        if pressed != self.last_raw {
            // Raw edge: restart the settle window, nothing committed yet.
            self.last_raw = pressed;
            self.last_change = now;
            return None;
        }

        if elapsed_since(now, self.last_change) > DEBOUNCE_WINDOW {
            let settled = ButtonState::from_pressed(pressed);
            if settled != self.stable {
                self.stable = settled;
                return Some(settled);
            }
        }

        None
    }
}

/// Owner of all per-channel input state. Channels are fixed at construction
/// and only ever mutated through [`InputBank::sample`].
pub struct InputBank<const N: usize> {
    channels: [Debouncer; N],
}

impl<const N: usize> InputBank<N> {
    pub fn new(now: Instant) -> Self {
        Self {
            channels: [Debouncer::new(now); N],
        }
    }

    /// Feed one raw sample per channel, all taken in the same scan
    /// iteration. Returns every transition that committed.
    pub fn sample(&mut self, raw: [bool; N], now: Instant) -> Vec<StateChange, N> {
        let mut changes = Vec::new();
        for (index, (channel, &pressed)) in self.channels.iter_mut().zip(raw.iter()).enumerate() {
            if let Some(state) = channel.sample(pressed, now) {
                // Vec is sized for one change per channel, push cannot fail.
                let _ = changes.push(StateChange { index, state });
            }
        }
        changes
    }

    /// Current stable state of every channel, for resync and the forced
    /// republish path.
    pub fn snapshot(&self) -> [ButtonState; N] {
        let mut states = [ButtonState::Released; N];
        for (state, channel) in states.iter_mut().zip(self.channels.iter()) {
            *state = channel.state();
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(ms: u64) -> Instant {
        Instant::from_millis(ms)
    }

    #[test]
    fn starts_released_and_silent() {
        let mut d = Debouncer::new(at(0));
        assert_eq!(d.state(), ButtonState::Released);
        for t in (0..500).step_by(10) {
            assert_eq!(d.sample(false, at(t)), None);
        }
        assert_eq!(d.state(), ButtonState::Released);
    }

    #[test]
    fn commits_after_level_holds_past_window() {
        let mut d = Debouncer::new(at(0));
        // Press at t=100, sampled every 10 ms.
        assert_eq!(d.sample(true, at(100)), None);
        assert_eq!(d.sample(true, at(110)), None);
        assert_eq!(d.sample(true, at(150)), None); // exactly at the window, strict >
        assert_eq!(d.sample(true, at(160)), Some(ButtonState::Pressed));
        // Already committed, holding produces nothing further.
        assert_eq!(d.sample(true, at(170)), None);
        assert_eq!(d.state(), ButtonState::Pressed);
    }

    #[test]
    fn bounce_within_window_never_commits() {
        let mut d = Debouncer::new(at(0));
        // Flips Released -> Pressed and back within 10 ms.
        assert_eq!(d.sample(true, at(100)), None);
        assert_eq!(d.sample(false, at(110)), None);
        for t in (120..400).step_by(10) {
            assert_eq!(d.sample(false, at(t)), None);
        }
        assert_eq!(d.state(), ButtonState::Released);
    }

    #[test]
    fn rapid_toggling_settles_to_one_commit() {
        let mut d = Debouncer::new(at(0));
        // Chatter every 5 ms for 40 ms, then a clean hold.
        for (i, t) in (100..140).step_by(5).enumerate() {
            assert_eq!(d.sample(i % 2 == 0, at(t)), None);
        }
        let mut commits = 0;
        for t in (140..260).step_by(10) {
            if d.sample(true, at(t)).is_some() {
                commits += 1;
            }
        }
        assert_eq!(commits, 1, "one settle must produce exactly one commit");
        assert_eq!(d.state(), ButtonState::Pressed);
    }

    #[test]
    fn sixty_ms_hold_commits_exactly_once() {
        let mut d = Debouncer::new(at(0));
        let mut commits: std::vec::Vec<ButtonState> = std::vec::Vec::new();
        // Press at t=0 (first sample carries the edge), hold for 60 ms.
        for t in (0..=60).step_by(10) {
            if let Some(state) = d.sample(true, at(t)) {
                commits.push(state);
            }
        }
        assert_eq!(commits, [ButtonState::Pressed]);
    }

    #[test]
    fn release_commits_after_its_own_window() {
        let mut d = Debouncer::new(at(0));
        for t in (0..=60).step_by(10) {
            d.sample(true, at(t));
        }
        assert_eq!(d.state(), ButtonState::Pressed);
        assert_eq!(d.sample(false, at(200)), None);
        assert_eq!(d.sample(false, at(251)), Some(ButtonState::Released));
    }

    #[test]
    fn bank_reports_changes_with_channel_indices() {
        let mut bank: InputBank<4> = InputBank::new(at(0));
        // Buttons 1 and 3 go down together.
        assert!(bank.sample([false, true, false, true], at(100)).is_empty());
        assert!(bank.sample([false, true, false, true], at(140)).is_empty());
        let changes = bank.sample([false, true, false, true], at(151));
        assert_eq!(
            changes.as_slice(),
            [
                StateChange { index: 1, state: ButtonState::Pressed },
                StateChange { index: 3, state: ButtonState::Pressed },
            ]
        );
        assert_eq!(
            bank.snapshot(),
            [
                ButtonState::Released,
                ButtonState::Pressed,
                ButtonState::Released,
                ButtonState::Pressed,
            ]
        );
    }
}
