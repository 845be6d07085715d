//! Hardware-independent connectivity and reporting core for deskctrl.
//!
//! Everything with real state lives here: the input debouncers, the broker
//! session state machine, the report timers, and the discovery/telemetry
//! payload builders. Time enters as explicit `embassy_time::Instant`
//! arguments and I/O leaves through the [`publish::Publisher`] trait, so
//! this crate compiles and unit-tests on the host as well as on the
//! ESP32-C6 target.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod clock;
pub mod debounce;
pub mod discovery;
pub mod identity;
pub mod publish;
pub mod report;
pub mod session;
pub mod topics;

pub use debounce::{ButtonState, Debouncer, InputBank, StateChange};
pub use identity::DeviceIdentity;
pub use publish::{Publisher, QoS};
pub use session::{SessionAction, SessionController, SessionState};
