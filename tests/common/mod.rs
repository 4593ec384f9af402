//! Shared fixtures for the bus-level tests.
#![allow(dead_code)]

use std::time::{Duration, Instant};

use gpib_bitbang::{BoardConfig, GpibBoard, PinMap, SimBus};

pub const DEVICE_PAD: u8 = 5;

/// A system controller at address 0 and a device at [`DEVICE_PAD`] on one bus.
pub fn controller_and_device() -> (SimBus, GpibBoard, GpibBoard) {
    let bus = SimBus::new();
    let controller = GpibBoard::attach(BoardConfig::default(), bus.attach_node().unwrap()).unwrap();
    let device = GpibBoard::attach(
        BoardConfig::device("device", DEVICE_PAD),
        bus.attach_node().unwrap(),
    )
    .unwrap();
    (bus, controller, device)
}

pub fn within(ms: u64) -> Option<Instant> {
    Some(Instant::now() + Duration::from_millis(ms))
}

pub fn pins() -> PinMap {
    PinMap::default()
}

/// Poll the wires until `ready` holds, giving up after two seconds.
pub async fn wait_for_wires(bus: &SimBus, ready: impl Fn(&SimBus) -> bool) {
    let give_up = Instant::now() + Duration::from_secs(2);
    while !ready(bus) {
        assert!(Instant::now() < give_up, "bus never reached the expected state");
        tokio::task::yield_now().await;
    }
}

/// A listener is ready for a byte: NRFD released (high), NDAC asserted (low).
pub fn listener_ready(bus: &SimBus) -> bool {
    let pins = pins();
    bus.wire_level(pins.nrfd) && !bus.wire_level(pins.ndac)
}
