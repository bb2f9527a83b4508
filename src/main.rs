//! split-central firmware entry point (nRF52840 + SoftDevice S140).
//!
//! Tasks:
//! - `softdevice_task` - SoftDevice event pump.
//! - `driver_task` - executes transport requests against the SoftDevice.
//! - `central_task` - owns the [`Central`] and feeds it transport events.
//! - `event_bus_task` - consumes key position events.

#![no_std]
#![no_main]

mod driver;

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::interrupt::Priority;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use embassy_time::{Duration, Timer};
use nrf_softdevice::{raw, Softdevice};
use split_central::config::{
    POSITION_EVENT_QUEUE_DEPTH, REQUEST_QUEUE_DEPTH, TRANSPORT_EVENT_QUEUE_DEPTH,
};
use split_central::{
    Central, CentralConfig, EventSink, LinkState, PositionChanged, TransportEvent,
};
use {defmt_rtt as _, panic_probe as _};

use driver::transport::SoftdeviceTransport;
use driver::{bonder, Driver, Request};

/// Pause between attempts to (re)start scanning.
const SCAN_START_RETRY: Duration = Duration::from_secs(1);

static REQUESTS: Channel<CriticalSectionRawMutex, Request, REQUEST_QUEUE_DEPTH> = Channel::new();
static TRANSPORT_EVENTS: Channel<CriticalSectionRawMutex, TransportEvent, TRANSPORT_EVENT_QUEUE_DEPTH> =
    Channel::new();
static POSITION_EVENTS: Channel<CriticalSectionRawMutex, PositionChanged, POSITION_EVENT_QUEUE_DEPTH> =
    Channel::new();

/// Key position events go out on a channel; a full bus drops the event.
struct EventBus(Sender<'static, CriticalSectionRawMutex, PositionChanged, POSITION_EVENT_QUEUE_DEPTH>);

impl EventSink for EventBus {
    fn raise(&mut self, event: PositionChanged) {
        if self.0.try_send(event).is_err() {
            warn!("Position event bus full - dropping position {}", event.position);
        }
    }
}

type SplitCentral = Central<SoftdeviceTransport, EventBus>;

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn driver_task(driver: Driver) -> ! {
    driver.run().await
}

#[embassy_executor::task]
async fn central_task(
    mut central: SplitCentral,
    events: Receiver<'static, CriticalSectionRawMutex, TransportEvent, TRANSPORT_EVENT_QUEUE_DEPTH>,
) -> ! {
    start_scanning(&mut central).await;
    loop {
        central.handle(events.receive().await);
        // A failed rescan leaves the central idle.
        if *central.state() == LinkState::Idle {
            start_scanning(&mut central).await;
        }
    }
}

#[embassy_executor::task]
async fn event_bus_task(
    events: Receiver<'static, CriticalSectionRawMutex, PositionChanged, POSITION_EVENT_QUEUE_DEPTH>,
) -> ! {
    loop {
        let event = events.receive().await;
        info!(
            "Key position {} {}",
            event.position,
            if event.pressed { "pressed" } else { "released" }
        );
    }
}

async fn start_scanning(central: &mut SplitCentral) {
    while central.start_scanning().is_err() {
        Timer::after(SCAN_START_RETRY).await;
    }
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: raw::BLE_GAP_ADV_SET_COUNT_DEFAULT as u8,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 1,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("split-central starting");

    // The SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let _p = embassy_nrf::init(config);

    let sd = Softdevice::enable(&softdevice_config());
    unwrap!(spawner.spawn(softdevice_task(sd)));

    let driver = Driver::new(
        sd,
        bonder::bonder(),
        REQUESTS.receiver(),
        TRANSPORT_EVENTS.sender(),
    );
    unwrap!(spawner.spawn(driver_task(driver)));

    let central = Central::new(
        SoftdeviceTransport::new(REQUESTS.sender()),
        EventBus(POSITION_EVENTS.sender()),
        CentralConfig::default(),
    );
    unwrap!(spawner.spawn(central_task(central, TRANSPORT_EVENTS.receiver())));
    unwrap!(spawner.spawn(event_bus_task(POSITION_EVENTS.receiver())));
}
