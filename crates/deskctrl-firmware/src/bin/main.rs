#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use defmt::{error, info, warn};
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Input, InputConfig, Pull};
use esp_hal::system::software_reset;
use esp_hal::timer::timg::TimerGroup;
use panic_rtt_target as _;

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, NoopRawMutex};
use embassy_sync::channel::{Channel, Receiver};
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};

use core::sync::atomic::{AtomicI32, Ordering};

#[cfg(feature = "mqtt")]
use embassy_futures::select::{Either, select};
#[cfg(feature = "mqtt")]
use embassy_net::{Config as NetConfig, Stack, StackResources};

use static_cell::StaticCell;

// Optional local secrets support: a git-ignored `src/bin/secrets.rs` with
// WIFI_SSID / WIFI_PASS / MQTT_HOST / MQTT_USERNAME / MQTT_PASSWORD consts.
#[cfg(feature = "local_secrets")]
mod secrets;

extern crate alloc;

use deskctrl_core::debounce::{InputBank, StateChange};
use deskctrl_core::discovery;
use deskctrl_core::identity::DeviceIdentity;
#[cfg(not(feature = "mqtt"))]
use deskctrl_core::publish::LogPublisher;
#[cfg(feature = "mqtt")]
use deskctrl_core::publish::{Publisher, QoS};
use deskctrl_core::report;
#[cfg(feature = "mqtt")]
use deskctrl_core::report::{HealthSnapshot, ReportTimers};
use deskctrl_core::session::LINK_STARTUP_DEADLINE;
#[cfg(feature = "mqtt")]
use deskctrl_core::session::{SessionAction, SessionController, WATCHDOG_CEILING};
use deskctrl_core::session::StartupDeadline;
#[cfg(feature = "mqtt")]
use deskctrl_core::topics;

use deskctrl_firmware::buttons::{
    BUTTON_COUNT, ButtonEvent, EVENT_QUEUE_DEPTH, SharedInputs, button_scan_task,
};
#[cfg(feature = "mqtt")]
use deskctrl_firmware::mqtt::{EmbassyNetTransport, SessionConfig, connect_client};

#[cfg(feature = "mqtt")]
use rust_mqtt::packet::v5::reason_codes::ReasonCode;

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

/// Stable device id: MQTT client id and topic namespace segment.
const DEVICE_ID: &str = "deskctrl-01";

/// Build identity stamped by build.rs; published retained to the git topic.
const GIT_DESCRIBE: &str = match option_env!("DESKCTRL_GIT_DESCRIBE") {
    Some(v) => v,
    None => "unknown",
};

const IDENTITY: DeviceIdentity = DeviceIdentity {
    device_id: DEVICE_ID,
    name: "Deskctrl Button Panel",
    model: "ESP32-C6 Button Node",
    manufacturer: "deskctrl project",
    sw_version: GIT_DESCRIBE,
};

#[cfg(feature = "mqtt")]
const MQTT_PORT: u16 = 1883;
#[cfg(feature = "mqtt")]
const MQTT_KEEP_ALIVE_SECS: u16 = 60;

/// Session poll cadence while waiting (retry guard, link down, connected).
#[cfg(feature = "mqtt")]
const SESSION_POLL_TICK: Duration = Duration::from_millis(250);

/// Report timer service cadence inside a connected session.
#[cfg(feature = "mqtt")]
const REPORT_TICK: Duration = Duration::from_secs(1);

// Signal to notify when the network is up (association + DHCP done).
static NETWORK_READY: Signal<CriticalSectionRawMutex, ()> = Signal::new();

// Last sampled Wi-Fi signal strength, written by the network task and read
// at health-publish time.
static RSSI_DBM: AtomicI32 = AtomicI32::new(0);

// Debounce bank shared between the scan task and the session task.
static INPUT_BANK: StaticCell<SharedInputs> = StaticCell::new();

// Committed button transitions, scan task -> session task.
static EVENT_CHANNEL: StaticCell<Channel<NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>> =
    StaticCell::new();

// embassy-net stack resources (DHCP + DNS + MQTT sockets)
#[cfg(feature = "mqtt")]
static STACK_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();
#[cfg(feature = "mqtt")]
static NET_STACK: StaticCell<Stack<'static>> = StaticCell::new();

/// Session lifecycle stages that can fail; each failure tears the session
/// down and re-enters the reconnect path.
#[cfg(feature = "mqtt")]
#[derive(defmt::Format)]
enum SessionError {
    DnsResolutionFailed,
    DnsNoAddresses,
    TcpConnectFailed,
    PublishFailed,
}

/// Resolve the broker. A host configured as an IPv4 literal skips DNS
/// entirely; anything else goes through one A query.
#[cfg(feature = "mqtt")]
async fn resolve_broker(
    stack: &Stack<'static>,
    host: &str,
) -> Result<smoltcp::wire::Ipv4Address, SessionError> {
    if let Ok(ip) = host.parse::<smoltcp::wire::Ipv4Address>() {
        return Ok(ip);
    }

    info!("mqtt: resolving broker hostname '{}'...", host);
    match stack
        .dns_query(host, embassy_net::dns::DnsQueryType::A)
        .await
    {
        Ok(addrs) => {
            if addrs.is_empty() {
                error!("mqtt: DNS returned no addresses for '{}'", host);
                return Err(SessionError::DnsNoAddresses);
            }
            let smoltcp::wire::IpAddress::Ipv4(ip) = addrs[0];
            info!("mqtt: resolved '{}' to {}", host, defmt::Debug2Format(&ip));
            Ok(ip)
        }
        Err(e) => {
            error!("mqtt: DNS resolution failed: {:?}", defmt::Debug2Format(&e));
            Err(SessionError::DnsResolutionFailed)
        }
    }
}

/// Open the TCP connection to the broker. Bounded by a 10 s socket timeout,
/// one of the two deliberate stalls in the session path.
#[cfg(feature = "mqtt")]
async fn open_tcp<'a>(
    stack: &'a Stack<'static>,
    addr: smoltcp::wire::Ipv4Address,
    port: u16,
    rx_buffer: &'a mut [u8],
    tx_buffer: &'a mut [u8],
) -> Result<embassy_net::tcp::TcpSocket<'a>, SessionError> {
    let mut socket = embassy_net::tcp::TcpSocket::new(*stack, rx_buffer, tx_buffer);
    socket.set_timeout(Some(Duration::from_secs(10)));

    match socket.connect((addr, port)).await {
        Ok(()) => {
            info!("mqtt: TCP connected");
            Ok(socket)
        }
        Err(e) => {
            error!("mqtt: TCP connect failed: {:?}", defmt::Debug2Format(&e));
            Err(SessionError::TcpConnectFailed)
        }
    }
}

#[cfg(feature = "mqtt")]
fn publish_err(stage: &'static str, reason: ReasonCode) -> SessionError {
    warn!(
        "mqtt: {} publish failed: {:?}",
        stage,
        defmt::Debug2Format(&reason)
    );
    SessionError::PublishFailed
}

/// Session bring-up, in order: retained online marker, build identity,
/// discovery records, full button-state resync. Subscribers are guaranteed
/// a complete picture before any live event from this session reaches them.
#[cfg(feature = "mqtt")]
async fn establish_session<P: Publisher<Err = ReasonCode>>(
    client: &mut P,
    inputs: &SharedInputs,
    events: &Receiver<'static, NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>,
    timers: &mut ReportTimers,
) -> Result<(), SessionError> {
    let status_topic = topics::status_topic(DEVICE_ID);
    client
        .publish(status_topic.as_str(), b"online", QoS::AtLeastOnce, true)
        .await
        .map_err(|e| publish_err("status", e))?;

    let version_topic = topics::version_topic(DEVICE_ID);
    client
        .publish(
            version_topic.as_str(),
            GIT_DESCRIBE.as_bytes(),
            QoS::AtLeastOnce,
            true,
        )
        .await
        .map_err(|e| publish_err("git", e))?;

    let records = discovery::announce(client, &IDENTITY, BUTTON_COUNT)
        .await
        .map_err(|e| publish_err("discovery", e))?;
    info!("mqtt: {} discovery records announced", records);

    // Transitions raised while disconnected are stale; drop them and let
    // the resync below re-establish truth.
    while events.try_receive().is_ok() {}

    let snapshot = inputs.lock().await.snapshot();
    report::publish_snapshot(client, DEVICE_ID, &snapshot)
        .await
        .map_err(|e| publish_err("resync", e))?;
    timers.note_resync(Instant::now());

    info!("mqtt: resync complete, reporting live");
    Ok(())
}

#[cfg(feature = "mqtt")]
fn sample_health(stack: &Stack<'static>) -> HealthSnapshot {
    use core::fmt::Write;

    let mut ip: heapless::String<16> = heapless::String::new();
    if let Some(config) = stack.config_v4() {
        write!(ip, "{}", config.address.address()).ok();
    }
    HealthSnapshot {
        ip,
        rssi: RSSI_DBM.load(Ordering::Relaxed),
    }
}

/// Connected service loop: button events as they arrive, report timers on a
/// fixed tick. Any transport error returns and tears the session down; the
/// failed message itself is dropped, never queued.
#[cfg(feature = "mqtt")]
async fn serve_session<P: Publisher<Err = ReasonCode>>(
    client: &mut P,
    stack: &Stack<'static>,
    inputs: &SharedInputs,
    events: &Receiver<'static, NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>,
    timers: &mut ReportTimers,
) -> Result<(), SessionError> {
    loop {
        match select(events.receive(), Timer::after(REPORT_TICK)).await {
            Either::First(event) => {
                let change = StateChange {
                    index: event.index as usize,
                    state: event.state,
                };
                report::publish_state_change(client, DEVICE_ID, change)
                    .await
                    .map_err(|e| publish_err("state", e))?;
            }
            Either::Second(()) => {
                let due = timers.poll(Instant::now());
                if due.forced {
                    // Safety net: reassert every Released channel so a lost
                    // event cannot leave a subscriber stuck on pressed.
                    let snapshot = inputs.lock().await.snapshot();
                    report::publish_released(client, DEVICE_ID, &snapshot)
                        .await
                        .map_err(|e| publish_err("forced", e))?;
                }
                if due.health {
                    let health = sample_health(stack);
                    let sent = report::publish_health(client, DEVICE_ID, &health)
                        .await
                        .map_err(|e| publish_err("health", e))?;
                    if !sent {
                        warn!("mqtt: health payload formatting failed, skipped");
                    }
                }
            }
        }
    }
}

/// Session task: owns the one `SessionController` and carries out its
/// actions. All reconnect policy (retry guard, watchdog) lives in the
/// controller; this task supplies the I/O.
#[cfg(feature = "mqtt")]
#[embassy_executor::task]
async fn mqtt_session_task(
    stack: &'static Stack<'static>,
    inputs: &'static SharedInputs,
    events: Receiver<'static, NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>,
) {
    info!("mqtt: session task started, waiting for network...");
    NETWORK_READY.wait().await;

    #[cfg(feature = "local_secrets")]
    let (broker_host, mqtt_username, mqtt_password) = (
        secrets::MQTT_HOST,
        secrets::MQTT_USERNAME,
        secrets::MQTT_PASSWORD,
    );
    #[cfg(not(feature = "local_secrets"))]
    let (broker_host, mqtt_username, mqtt_password) = (
        option_env!("MQTT_HOST").unwrap_or("192.168.0.245"),
        option_env!("MQTT_USERNAME").unwrap_or(""),
        option_env!("MQTT_PASSWORD").unwrap_or(""),
    );

    info!(
        "mqtt: broker {}:{}, client id '{}', keep-alive {}s",
        broker_host, MQTT_PORT, DEVICE_ID, MQTT_KEEP_ALIVE_SECS
    );

    let mut session = SessionController::new();
    let mut timers = ReportTimers::new();

    loop {
        let link_up = stack.is_link_up() && stack.is_config_up();
        match session.poll(link_up, Instant::now()) {
            SessionAction::Restart => {
                error!(
                    "mqtt: watchdog: no broker session for over {} s, restarting",
                    WATCHDOG_CEILING.as_secs()
                );
                software_reset();
            }
            SessionAction::Wait => {
                Timer::after(SESSION_POLL_TICK).await;
                continue;
            }
            SessionAction::Connect => {
                info!(
                    "mqtt: attempting connection (failure streak {})",
                    session.failure_streak()
                );
            }
        }

        let broker_addr = match resolve_broker(stack, broker_host).await {
            Ok(addr) => addr,
            Err(e) => {
                error!("mqtt: broker resolution failed: {:?}", e);
                session.connect_failed(Instant::now());
                continue;
            }
        };

        // Socket and packet buffers live for exactly one session; the next
        // iteration starts from clean state.
        let mut tcp_rx_buffer = [0u8; 2048];
        let mut tcp_tx_buffer = [0u8; 2048];
        let mut mqtt_recv_buffer = [0u8; 2048];
        let mut mqtt_write_buffer = [0u8; 2048];

        let socket = match open_tcp(
            stack,
            broker_addr,
            MQTT_PORT,
            &mut tcp_rx_buffer,
            &mut tcp_tx_buffer,
        )
        .await
        {
            Ok(socket) => socket,
            Err(_) => {
                session.connect_failed(Instant::now());
                continue;
            }
        };

        let status_topic = topics::status_topic(DEVICE_ID);
        let session_config = SessionConfig {
            client_id: DEVICE_ID,
            keep_alive_secs: MQTT_KEEP_ALIVE_SECS,
            username: mqtt_username,
            password: mqtt_password,
            will_topic: status_topic.as_str(),
            will_payload: b"offline",
        };

        let mut client = match connect_client(
            EmbassyNetTransport::new(socket),
            session_config,
            &mut mqtt_recv_buffer,
            &mut mqtt_write_buffer,
        )
        .await
        {
            Ok(client) => client,
            Err(_) => {
                session.connect_failed(Instant::now());
                continue;
            }
        };

        session.connect_succeeded(Instant::now());
        info!("mqtt: session established, failure streak cleared");

        if let Err(e) = establish_session(&mut client, inputs, &events, &mut timers).await {
            warn!("mqtt: session bring-up failed: {:?}", e);
            session.connection_lost(Instant::now());
            timers.reset();
            continue;
        }

        if let Err(e) = serve_session(&mut client, stack, inputs, &events, &mut timers).await {
            warn!("mqtt: session lost: {:?}", e);
        }
        session.connection_lost(Instant::now());
        timers.reset();
        info!("mqtt: disconnected, will reconnect");
    }
}

/// Log-only session: exercises discovery and the event path without a
/// broker (default build without the `mqtt` feature).
#[cfg(not(feature = "mqtt"))]
#[embassy_executor::task]
async fn mqtt_session_task(
    events: Receiver<'static, NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH>,
) {
    NETWORK_READY.wait().await;

    let mut publisher = LogPublisher;
    let _ = discovery::announce(&mut publisher, &IDENTITY, BUTTON_COUNT).await;
    info!("mqtt: log-only mode active (enable the mqtt feature for a real broker)");

    loop {
        let event = events.receive().await;
        let change = StateChange {
            index: event.index as usize,
            state: event.state,
        };
        let _ = report::publish_state_change(&mut publisher, DEVICE_ID, change).await;
    }
}

/// embassy-net runner: processes packets, DHCP, DNS and TCP state machines.
#[cfg(feature = "mqtt")]
#[embassy_executor::task]
async fn net_runner_task(
    mut runner: embassy_net::Runner<'static, esp_radio::wifi::WifiDevice<'static>>,
) -> ! {
    runner.run().await
}

/// Network task: brings the Wi-Fi STA up under the startup deadline, then
/// supervises the link and samples RSSI for the health snapshot.
#[embassy_executor::task]
async fn network_task(
    mut wifi: esp_radio::wifi::WifiController<'static>,
    client_config: esp_radio::wifi::ClientConfig,
    #[cfg(feature = "mqtt")] stack: &'static Stack<'static>,
) {
    if let Err(e) = wifi.set_config(&esp_radio::wifi::ModeConfig::Client(client_config)) {
        error!("wifi: set_config failed: {:?}", defmt::Debug2Format(&e));
        return;
    }
    if let Err(e) = wifi.start() {
        error!("wifi: start failed: {:?}", defmt::Debug2Format(&e));
        return;
    }
    info!("wifi: started STA mode");

    if let Err(e) = wifi.connect() {
        error!("wifi: connect failed: {:?}", defmt::Debug2Format(&e));
        return;
    }

    // Association and DHCP must complete inside the startup deadline; a
    // link that cannot come up gets a restart, not an endless wait.
    let deadline = StartupDeadline::new(Instant::now());
    loop {
        if wifi.is_connected().unwrap_or(false) {
            info!("wifi: associated");
            break;
        }
        if deadline.expired(Instant::now()) {
            error!(
                "wifi: no association within {} s, restarting",
                LINK_STARTUP_DEADLINE.as_secs()
            );
            software_reset();
        }
        Timer::after(Duration::from_millis(100)).await;
    }

    #[cfg(feature = "mqtt")]
    {
        info!("net: waiting for DHCP...");
        loop {
            if stack.is_config_up()
                && let Some(config) = stack.config_v4()
            {
                info!(
                    "net: DHCP assigned {:?}, gateway {:?}",
                    defmt::Debug2Format(&config.address),
                    defmt::Debug2Format(&config.gateway)
                );
                break;
            }
            if deadline.expired(Instant::now()) {
                error!(
                    "net: no DHCP lease within {} s, restarting",
                    LINK_STARTUP_DEADLINE.as_secs()
                );
                software_reset();
            }
            Timer::after(Duration::from_millis(100)).await;
        }
    }

    NETWORK_READY.signal(());
    info!("net: network ready");

    loop {
        Timer::after(Duration::from_secs(5)).await;

        if let Ok(rssi) = wifi.rssi() {
            RSSI_DBM.store(rssi as i32, Ordering::Relaxed);
        }

        if !wifi.is_connected().unwrap_or(true) {
            warn!("wifi: link lost, reconnecting...");
            if let Err(e) = wifi.connect() {
                error!("wifi: reconnect failed: {:?}", defmt::Debug2Format(&e));
            }
        }
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_defmt!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_interrupt =
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_interrupt.software_interrupt0);

    info!("deskctrl {} starting (device_id={})", GIT_DESCRIBE, DEVICE_ID);

    // Button lines: wired to ground, internal pull-ups, low = pressed.
    let pins = [
        Input::new(peripherals.GPIO2, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO3, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO10, InputConfig::default().with_pull(Pull::Up)),
        Input::new(peripherals.GPIO11, InputConfig::default().with_pull(Pull::Up)),
    ];

    let inputs: &'static SharedInputs = INPUT_BANK.init(Mutex::new(InputBank::new(Instant::now())));
    let event_channel: &'static Channel<NoopRawMutex, ButtonEvent, EVENT_QUEUE_DEPTH> =
        EVENT_CHANNEL.init(Channel::new());

    // --- Wi-Fi bring-up (STA) ---------------------------------------------
    // Credentials: git-ignored `src/bin/secrets.rs` with `--features
    // local_secrets`, or compile-time env vars WIFI_SSID / WIFI_PASS
    // (forwarded from .env by build.rs).
    #[cfg(feature = "local_secrets")]
    let (ssid, pass) = (secrets::WIFI_SSID, secrets::WIFI_PASS);
    #[cfg(not(feature = "local_secrets"))]
    let (ssid, pass) = (
        option_env!("WIFI_SSID").unwrap_or(""),
        option_env!("WIFI_PASS").unwrap_or(""),
    );

    if !ssid.is_empty() {
        match esp_radio::init() {
            Ok(radio_init) => {
                use alloc::boxed::Box;
                let radio_init: &'static _ = Box::leak(Box::new(radio_init));

                let wifi_cfg = esp_radio::wifi::Config::default();
                let (wifi, ifaces) =
                    match esp_radio::wifi::new(radio_init, peripherals.WIFI, wifi_cfg) {
                        Ok(v) => v,
                        Err(e) => {
                            error!("wifi: new() failed: {:?}", defmt::Debug2Format(&e));
                            panic!("wifi initialization failed");
                        }
                    };
                #[cfg(not(feature = "mqtt"))]
                let _ = ifaces;

                let client_config = esp_radio::wifi::ClientConfig::default()
                    .with_ssid(ssid.into())
                    .with_password(pass.into());

                #[cfg(feature = "mqtt")]
                let stack = {
                    let resources = STACK_RESOURCES.init(StackResources::new());
                    let (stack, runner) = embassy_net::new(
                        ifaces.sta,
                        NetConfig::dhcpv4(Default::default()),
                        resources,
                        embassy_time::Instant::now().as_micros(),
                    );
                    let stack: &'static Stack<'static> = NET_STACK.init(stack);
                    spawner.spawn(net_runner_task(runner)).ok();
                    info!("net: embassy-net stack initialized (DHCP)");
                    stack
                };

                #[cfg(feature = "mqtt")]
                spawner.spawn(network_task(wifi, client_config, stack)).ok();
                #[cfg(not(feature = "mqtt"))]
                spawner.spawn(network_task(wifi, client_config)).ok();

                #[cfg(feature = "mqtt")]
                spawner
                    .spawn(mqtt_session_task(stack, inputs, event_channel.receiver()))
                    .ok();
                #[cfg(not(feature = "mqtt"))]
                spawner
                    .spawn(mqtt_session_task(event_channel.receiver()))
                    .ok();
            }
            Err(e) => {
                error!("esp_radio init failed: {:?}", defmt::Debug2Format(&e));
            }
        }
    } else {
        warn!("wifi: set WIFI_SSID/WIFI_PASS at build time (or use local_secrets)");
    }

    spawner
        .spawn(button_scan_task(pins, inputs, event_channel.sender()))
        .ok();

    info!("deskctrl: all tasks spawned");

    loop {
        Timer::after(Duration::from_secs(3600)).await;
    }
}
