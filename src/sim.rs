//! Simulated bus for testing without physical hardware.
//!
//! [`SimBus`] models the IEEE-488 electrical bus: every line is open-collector with a
//! pull-up, so a wire is low as soon as any attached node drives it low and high otherwise.
//! Each [`SimNode`] is one board's view of the bus and implements [`PinDriver`], so a
//! complete [`crate::GpibBoard`] (or a bare [`crate::LineFabric`] driven by test code) can
//! run against it.
//!
//! Edge interrupts are delivered synchronously on the thread whose pin write caused the
//! transition, the way a hardware interrupt preempts whatever is running. Handlers must
//! therefore be short and must not write pins.
//!
//! # Example
//!
//! ```rust,ignore
//! let bus = SimBus::new();
//! let controller = GpibBoard::attach(BoardConfig::default(), bus.attach_node()?)?;
//! let device = GpibBoard::attach(BoardConfig::device("dmm", 5), bus.attach_node()?)?;
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::trace;

use crate::error::{GpibError, GpibResult};
use crate::line::{Direction, Edge, IrqHandler, IrqRegistration, PinDriver};

/// Number of pins on the simulated bus.
pub const SIM_PIN_COUNT: u32 = 64;

/// Maximum number of nodes on one simulated bus.
pub const SIM_MAX_NODES: usize = 64;

struct Registration {
    id: u64,
    pin: u32,
    edge: Edge,
    handler: IrqHandler,
}

struct BusInner {
    /// Per pin, one bit for every node currently pulling it low.
    pulls: Vec<AtomicU64>,
    next_node: AtomicUsize,
    next_irq: AtomicU64,
    irqs: RwLock<Vec<Registration>>,
    irq_limit: Option<usize>,
}

impl BusInner {
    fn wire_high(&self, pin: u32) -> bool {
        self.pulls
            .get(pin as usize)
            .map_or(true, |pulls| pulls.load(Ordering::Acquire) == 0)
    }

    fn dispatch(&self, pin: u32, edge: Edge) {
        let handlers: Vec<IrqHandler> = self
            .irqs
            .read()
            .iter()
            .filter(|r| r.pin == pin && r.edge == edge)
            .map(|r| Arc::clone(&r.handler))
            .collect();
        for handler in handlers {
            handler();
        }
    }
}

/// In-process wired-OR bus shared by any number of [`SimNode`]s.
#[derive(Clone)]
pub struct SimBus {
    inner: Arc<BusInner>,
}

impl fmt::Debug for SimBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimBus")
            .field("nodes", &self.inner.next_node.load(Ordering::Relaxed))
            .field("irqs", &self.irq_count())
            .finish()
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimBus {
    /// Bus with no interrupt limit.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Bus whose interrupt controller runs out after `limit` registrations.
    pub fn with_irq_limit(limit: usize) -> Self {
        Self::build(Some(limit))
    }

    fn build(irq_limit: Option<usize>) -> Self {
        Self {
            inner: Arc::new(BusInner {
                pulls: (0..SIM_PIN_COUNT).map(|_| AtomicU64::new(0)).collect(),
                next_node: AtomicUsize::new(0),
                next_irq: AtomicU64::new(1),
                irqs: RwLock::new(Vec::new()),
                irq_limit,
            }),
        }
    }

    /// Plug a new node into the bus. All of its pins start as released inputs.
    pub fn attach_node(&self) -> GpibResult<Arc<SimNode>> {
        let index = self.inner.next_node.fetch_add(1, Ordering::AcqRel);
        if index >= SIM_MAX_NODES {
            return Err(GpibError::IoUnavailable(format!(
                "simulated bus supports at most {} nodes",
                SIM_MAX_NODES
            )));
        }
        Ok(Arc::new(SimNode {
            bus: Arc::clone(&self.inner),
            bit: 1u64 << index,
            outputs: AtomicU64::new(0),
            lows: AtomicU64::new(0),
        }))
    }

    /// Electrical level of the wire, `true` when high.
    pub fn wire_level(&self, pin: u32) -> bool {
        self.inner.wire_high(pin)
    }

    /// Number of edge interrupts currently registered.
    pub fn irq_count(&self) -> usize {
        self.inner.irqs.read().len()
    }
}

/// One node's connection to a [`SimBus`].
pub struct SimNode {
    bus: Arc<BusInner>,
    bit: u64,
    outputs: AtomicU64,
    lows: AtomicU64,
}

impl fmt::Debug for SimNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimNode")
            .field("bit", &self.bit)
            .field("outputs", &format_args!("{:#018x}", self.outputs.load(Ordering::Relaxed)))
            .field("lows", &format_args!("{:#018x}", self.lows.load(Ordering::Relaxed)))
            .finish()
    }
}

impl SimNode {
    /// Recompute whether this node pulls `pin` low and fire edges on wire transitions.
    fn refresh(&self, pin: u32) {
        let Some(wire) = self.bus.pulls.get(pin as usize) else {
            return;
        };
        let mask = 1u64 << pin;
        let pulling = self.outputs.load(Ordering::Acquire) & self.lows.load(Ordering::Acquire) & mask != 0;

        let (before, after) = if pulling {
            let before = wire.fetch_or(self.bit, Ordering::AcqRel);
            (before, before | self.bit)
        } else {
            let before = wire.fetch_and(!self.bit, Ordering::AcqRel);
            (before, before & !self.bit)
        };

        let was_high = before == 0;
        let is_high = after == 0;
        if was_high != is_high {
            let edge = if is_high { Edge::Rising } else { Edge::Falling };
            trace!(pin, ?edge, "sim wire transition");
            self.bus.dispatch(pin, edge);
        }
    }

    /// Drive `pin` low, as an instrument pulling a line would.
    pub fn pull_low(&self, pin: u32) {
        self.write_pin(pin, false);
        self.set_pin_direction(pin, Direction::Out);
    }

    /// Stop driving `pin`.
    pub fn release(&self, pin: u32) {
        self.set_pin_direction(pin, Direction::In);
    }
}

impl PinDriver for SimNode {
    fn read_pin(&self, pin: u32) -> bool {
        self.bus.wire_high(pin)
    }

    fn write_pin(&self, pin: u32, high: bool) {
        if pin >= SIM_PIN_COUNT {
            return;
        }
        let mask = 1u64 << pin;
        if high {
            self.lows.fetch_and(!mask, Ordering::AcqRel);
        } else {
            self.lows.fetch_or(mask, Ordering::AcqRel);
        }
        self.refresh(pin);
    }

    fn set_pin_direction(&self, pin: u32, direction: Direction) {
        if pin >= SIM_PIN_COUNT {
            return;
        }
        let mask = 1u64 << pin;
        match direction {
            Direction::Out => self.outputs.fetch_or(mask, Ordering::AcqRel),
            Direction::In => self.outputs.fetch_and(!mask, Ordering::AcqRel),
        };
        self.refresh(pin);
    }

    fn request_edge_irq(
        &self,
        pin: u32,
        edge: Edge,
        handler: IrqHandler,
    ) -> GpibResult<IrqRegistration> {
        if pin >= SIM_PIN_COUNT {
            return Err(GpibError::IoUnavailable(format!(
                "pin {} does not exist on the simulated bus",
                pin
            )));
        }
        let mut irqs = self.bus.irqs.write();
        if self.bus.irq_limit.is_some_and(|limit| irqs.len() >= limit) {
            return Err(GpibError::IoUnavailable(format!(
                "no free interrupt for pin {}",
                pin
            )));
        }
        let id = self.bus.next_irq.fetch_add(1, Ordering::Relaxed);
        irqs.push(Registration {
            id,
            pin,
            edge,
            handler,
        });
        Ok(IrqRegistration(id))
    }

    fn free_edge_irq(&self, registration: IrqRegistration) {
        self.bus.irqs.write().retain(|r| r.id != registration.0);
    }
}

impl Drop for SimNode {
    fn drop(&mut self) {
        // a node that goes away lets go of every wire it was holding
        for wire in &self.bus.pulls {
            wire.fetch_and(!self.bit, Ordering::AcqRel);
        }
    }
}
