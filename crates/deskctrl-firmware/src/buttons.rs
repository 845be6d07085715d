//! Button input scanning.
//!
//! The buttons are active-low: wired between their GPIO and ground with the
//! internal pull-up enabled, so a low level means pressed. The scan task
//! samples every line once per period, feeds the debounce bank, and hands
//! committed transitions to the session task over a bounded channel.

use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::Sender;
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use esp_hal::gpio::Input;

use deskctrl_core::debounce::{ButtonState, InputBank};

/// Number of physical buttons on the panel.
pub const BUTTON_COUNT: usize = 4;

/// Scan period; several samples fit inside one debounce window.
pub const SCAN_PERIOD: Duration = Duration::from_millis(10);

/// Event channel depth. Deep enough for a burst on every button; overflow
/// drops the event (the resync and forced-republish paths re-establish
/// truth).
pub const EVENT_QUEUE_DEPTH: usize = 16;

/// The debounce bank, shared between the scan task (writer) and the
/// session task (snapshot reader).
pub type SharedInputs = Mutex<CriticalSectionRawMutex, InputBank<BUTTON_COUNT>>;

/// One committed transition, as handed to the session task.
#[derive(Clone, Copy)]
pub struct ButtonEvent {
    pub index: u8,
    pub state: ButtonState,
    /// Milliseconds since boot at commit time.
    pub timestamp: u64,
}

/// Scan task: sample, debounce, forward.
#[embassy_executor::task]
pub async fn button_scan_task(
    pins: [Input<'static>; BUTTON_COUNT],
    inputs: &'static SharedInputs,
    events: Sender<'static, NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>,
) {
    info!("buttons: scan task started ({} channels)", BUTTON_COUNT);

    loop {
        let now = Instant::now();

        let mut raw = [false; BUTTON_COUNT];
        for (sample, pin) in raw.iter_mut().zip(pins.iter()) {
            *sample = pin.is_low();
        }

        let changes = inputs.lock().await.sample(raw, now);
        for change in changes {
            info!(
                "buttons: {} -> {}",
                change.index,
                change.state.payload()
            );
            let event = ButtonEvent {
                index: change.index as u8,
                state: change.state,
                timestamp: now.as_millis(),
            };
            if events.try_send(event).is_err() {
                warn!("buttons: event queue full, dropping transition");
            }
        }

        Timer::after(SCAN_PERIOD).await;
    }
}
