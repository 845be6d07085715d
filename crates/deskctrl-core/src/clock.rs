//! Elapsed-time arithmetic for the core state machines.
//!
//! All timing decisions in this crate (debounce windows, retry guards,
//! watchdog ceilings, publish intervals) go through [`elapsed_since`] so the
//! subtraction is wraparound-safe in one place. The tick counter is 64-bit
//! and will not wrap in practice, but the predecessor of this logic ran on a
//! free-running 32-bit millisecond counter and the wrap case stays covered.

use embassy_time::{Duration, Instant};

/// Duration from `earlier` to `now`, assuming `now` is the later reading of
/// a monotonic clock. Wraps correctly if the tick counter overflowed between
/// the two readings.
pub fn elapsed_since(now: Instant, earlier: Instant) -> Duration {
    Duration::from_ticks(now.as_ticks().wrapping_sub(earlier.as_ticks()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn measures_forward_elapsed_time() {
        let t0 = Instant::from_millis(1_000);
        let t1 = Instant::from_millis(1_250);
        assert_eq!(elapsed_since(t1, t0), Duration::from_millis(250));
    }

    #[test]
    fn zero_for_identical_instants() {
        let t = Instant::from_millis(42);
        assert_eq!(elapsed_since(t, t), Duration::from_ticks(0));
    }

    #[test]
    fn survives_tick_counter_wraparound() {
        // 100 ticks before the counter wraps, 50 ticks after.
        let before = Instant::from_ticks(u64::MAX - 100);
        let after = Instant::from_ticks(50);
        assert_eq!(elapsed_since(after, before), Duration::from_ticks(151));
    }
}
