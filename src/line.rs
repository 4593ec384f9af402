//! Line fabric: logical access to the bus lines.
//!
//! The host supplies a [`PinDriver`] that reads and writes electrical pin levels and
//! delivers edge interrupts. [`LineFabric`] sits on top of it and speaks in bus terms:
//! `true` always means *asserted*, whatever the wiring polarity, and [`LineFabric::set_role`]
//! switches the local drivers between acceptor (read) and source (write) configuration.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::trace;

use crate::config::PinMap;
use crate::error::GpibResult;

/// One of the 16 IEEE-488 signal lines. Control lines carry their mnemonic.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusLine {
    /// DIO1..DIO8 as `Data(0)..Data(7)`.
    Data(u8),
    Dav,
    Nrfd,
    Ndac,
    Eoi,
    Atn,
    Ifc,
    Ren,
    Srq,
}

impl BusLine {
    /// Every bus line, data lines first.
    pub const ALL: [BusLine; 16] = [
        Self::Data(0),
        Self::Data(1),
        Self::Data(2),
        Self::Data(3),
        Self::Data(4),
        Self::Data(5),
        Self::Data(6),
        Self::Data(7),
        Self::Dav,
        Self::Nrfd,
        Self::Ndac,
        Self::Eoi,
        Self::Atn,
        Self::Ifc,
        Self::Ren,
        Self::Srq,
    ];

    /// Every line except the data lines.
    pub const CONTROL: [BusLine; 8] = [
        Self::Dav,
        Self::Nrfd,
        Self::Ndac,
        Self::Eoi,
        Self::Atn,
        Self::Ifc,
        Self::Ren,
        Self::Srq,
    ];
}

impl fmt::Display for BusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(n) => write!(f, "DIO{}", n + 1),
            Self::Dav => write!(f, "DAV"),
            Self::Nrfd => write!(f, "NRFD"),
            Self::Ndac => write!(f, "NDAC"),
            Self::Eoi => write!(f, "EOI"),
            Self::Atn => write!(f, "ATN"),
            Self::Ifc => write!(f, "IFC"),
            Self::Ren => write!(f, "REN"),
            Self::Srq => write!(f, "SRQ"),
        }
    }
}

/// Pin direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sensed only; the line floats.
    In,
    /// Driven by this board.
    Out,
}

/// Electrical edge of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Low to high.
    Rising,
    /// High to low.
    Falling,
}

/// Callback run from interrupt context when a registered edge occurs.
pub type IrqHandler = Arc<dyn Fn() + Send + Sync>;

/// Handle of a registered edge interrupt, returned to [`PinDriver::free_edge_irq`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IrqRegistration(
    /// Driver-assigned id.
    pub u64,
);

/// Electrical pin access provided by the host.
///
/// Levels are electrical: `true` is a high pin. Handlers registered with
/// [`PinDriver::request_edge_irq`] may run concurrently with any other call, on any thread.
pub trait PinDriver: Send + Sync {
    /// Level of `pin`, whatever its direction.
    fn read_pin(&self, pin: u32) -> bool;

    /// Output level of `pin`; no effect on the bus while it is an input.
    fn write_pin(&self, pin: u32, high: bool);

    /// Switch `pin` between input and output.
    fn set_pin_direction(&self, pin: u32, direction: Direction);

    /// Register `handler` to run on every `edge` of `pin`.
    fn request_edge_irq(
        &self,
        pin: u32,
        edge: Edge,
        handler: IrqHandler,
    ) -> GpibResult<IrqRegistration>;

    /// Remove a handler registered by [`PinDriver::request_edge_irq`].
    fn free_edge_irq(&self, registration: IrqRegistration);
}

/// Which side of the handshake this board is about to play.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferRole {
    /// Acceptor: drives NRFD/NDAC, senses data, DAV and EOI.
    Read,
    /// Source: drives data, DAV and EOI, senses NRFD/NDAC.
    Write,
}

bitflags! {
    /// Logical state of the eight control lines, one bit per line.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BusLines: u16 {
        /// Data valid.
        const DAV = 0x0001;
        /// Not ready for data.
        const NRFD = 0x0002;
        /// Not data accepted.
        const NDAC = 0x0004;
        /// End or identify.
        const EOI = 0x0008;
        /// Attention.
        const ATN = 0x0010;
        /// Interface clear.
        const IFC = 0x0020;
        /// Remote enable.
        const REN = 0x0040;
        /// Service request.
        const SRQ = 0x0080;
    }
}

impl BusLines {
    fn for_line(line: BusLine) -> Self {
        match line {
            BusLine::Dav => Self::DAV,
            BusLine::Nrfd => Self::NRFD,
            BusLine::Ndac => Self::NDAC,
            BusLine::Eoi => Self::EOI,
            BusLine::Atn => Self::ATN,
            BusLine::Ifc => Self::IFC,
            BusLine::Ren => Self::REN,
            BusLine::Srq => Self::SRQ,
            BusLine::Data(_) => Self::empty(),
        }
    }
}

/// Logical view of the bus over a [`PinDriver`].
#[derive(Clone)]
pub struct LineFabric {
    driver: Arc<dyn PinDriver>,
    pins: PinMap,
}

impl fmt::Debug for LineFabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LineFabric")
            .field("pins", &self.pins)
            .finish_non_exhaustive()
    }
}

impl LineFabric {
    /// Lines of `pins` driven through `driver`.
    pub fn new(driver: Arc<dyn PinDriver>, pins: PinMap) -> Self {
        Self { driver, pins }
    }

    /// Pin assignment in use.
    pub fn pins(&self) -> &PinMap {
        &self.pins
    }

    /// Underlying pin driver.
    pub fn driver(&self) -> &Arc<dyn PinDriver> {
        &self.driver
    }

    fn to_electrical(&self, asserted: bool) -> bool {
        asserted != self.pins.inverted
    }

    /// True when `line` is asserted on the bus.
    pub fn get(&self, line: BusLine) -> bool {
        let high = self.driver.read_pin(self.pins.pin(line));
        high != self.pins.inverted
    }

    /// Assert (`true`) or release (`false`) `line`. Only takes effect on the bus while
    /// the line is an output.
    pub fn set(&self, line: BusLine, asserted: bool) {
        self.driver
            .write_pin(self.pins.pin(line), self.to_electrical(asserted));
    }

    /// Make `line` an input or an output.
    pub fn set_direction(&self, line: BusLine, direction: Direction) {
        self.driver.set_pin_direction(self.pins.pin(line), direction);
    }

    /// Make `line` an output at the given logical level, level first so the pin never
    /// glitches through the wrong state.
    pub fn drive(&self, line: BusLine, asserted: bool) {
        self.set(line, asserted);
        self.set_direction(line, Direction::Out);
    }

    /// Stop driving `line`.
    pub fn float(&self, line: BusLine) {
        self.set_direction(line, Direction::In);
    }

    /// Electrical edge seen when a bus line becomes asserted.
    pub fn assertion_edge(&self) -> Edge {
        if self.pins.inverted {
            Edge::Falling
        } else {
            Edge::Rising
        }
    }

    /// Electrical edge seen when a bus line is released.
    pub fn release_edge(&self) -> Edge {
        if self.pins.inverted {
            Edge::Rising
        } else {
            Edge::Falling
        }
    }

    /// Sample DIO1..DIO8 into a byte, DIO1 as bit 0.
    pub fn read_data(&self) -> u8 {
        (0..8u8).fold(0u8, |byte, bit| {
            if self.get(BusLine::Data(bit)) {
                byte | (1 << bit)
            } else {
                byte
            }
        })
    }

    /// Put `byte` on DIO1..DIO8.
    pub fn write_data(&self, byte: u8) {
        for bit in 0..8u8 {
            self.set(BusLine::Data(bit), byte & (1 << bit) != 0);
        }
    }

    /// Snapshot of the control lines.
    pub fn line_status(&self) -> BusLines {
        BusLine::CONTROL
            .iter()
            .filter(|line| self.get(**line))
            .fold(BusLines::empty(), |acc, line| acc | BusLines::for_line(*line))
    }

    /// Point the transceivers at the bus for the given role (no-op without transceiver pins).
    fn set_transceivers(&self, talking: bool) {
        if let Some(t) = &self.pins.transceiver {
            self.driver.write_pin(t.talk_enable, talking);
            self.driver.write_pin(t.pullup_enable, talking);
        }
    }

    /// Configure the controller-side transceiver lines once at attach.
    pub fn init_transceivers(&self, system_controller: bool) {
        if let Some(t) = &self.pins.transceiver {
            for pin in [
                t.talk_enable,
                t.pullup_enable,
                t.direction_control,
                t.system_control,
            ] {
                self.driver.set_pin_direction(pin, Direction::Out);
            }
            self.driver.write_pin(t.talk_enable, false);
            self.driver.write_pin(t.pullup_enable, false);
            self.driver.write_pin(t.direction_control, !system_controller);
            self.driver.write_pin(t.system_control, system_controller);
        }
    }

    /// Switch the local drivers to `role`.
    ///
    /// Read: data lines floated, NDAC asserted (nothing accepted yet), EOI and DAV sensed,
    /// NRFD asserted (not ready). Write: NDAC/NRFD sensed, EOI and DAV driven released,
    /// data lines driven to zero.
    pub fn set_role(&self, role: TransferRole) {
        trace!(?role, "switching line directions");
        match role {
            TransferRole::Read => {
                self.set_transceivers(false);
                for bit in 0..8u8 {
                    self.float(BusLine::Data(bit));
                }
                self.drive(BusLine::Ndac, true);
                self.float(BusLine::Eoi);
                self.float(BusLine::Dav);
                self.drive(BusLine::Nrfd, true);
            }
            TransferRole::Write => {
                self.float(BusLine::Ndac);
                self.float(BusLine::Nrfd);
                self.drive(BusLine::Eoi, false);
                self.drive(BusLine::Dav, false);
                for bit in 0..8u8 {
                    self.drive(BusLine::Data(bit), false);
                }
                self.set_transceivers(true);
            }
        }
    }
}
