//! Board status word and role.
//!
//! Bit positions follow the traditional GPIB status word so values can be compared with
//! what other GPIB stacks report.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    /// Sticky status bits of a board.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StatusBits: u32 {
        /// Listener active.
        const LACS = 0x0004;
        /// Talker active.
        const TACS = 0x0008;
        /// This board holds ATN.
        const ATN = 0x0010;
        /// Controller in charge.
        const CIC = 0x0020;
        /// Remote enable asserted.
        const REM = 0x0800;
        /// Service request pending.
        const SRQI = 0x1000;
        /// Last read ended on EOI or the EOS terminator.
        const END = 0x2000;
        /// Last operation timed out.
        const TIMO = 0x4000;
    }
}

/// Atomic status word shared between the board and its interrupt handlers.
///
/// Bits are only ever cleared through [`StatusRegister::remove`] or
/// [`StatusRegister::take`]; nothing clears a bit as a side effect.
#[derive(Debug, Default)]
pub struct StatusRegister {
    bits: AtomicU32,
}

impl StatusRegister {
    /// All bits clear.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `bits`.
    pub fn insert(&self, bits: StatusBits) {
        self.bits.fetch_or(bits.bits(), Ordering::AcqRel);
    }

    /// Clear `bits`.
    pub fn remove(&self, bits: StatusBits) {
        self.bits.fetch_and(!bits.bits(), Ordering::AcqRel);
    }

    /// Set or clear `bits`.
    pub fn set(&self, bits: StatusBits, value: bool) {
        if value {
            self.insert(bits);
        } else {
            self.remove(bits);
        }
    }

    /// Whether all of `bits` are set.
    pub fn contains(&self, bits: StatusBits) -> bool {
        self.snapshot().contains(bits)
    }

    /// Current bits, unchanged.
    pub fn snapshot(&self) -> StatusBits {
        StatusBits::from_bits_truncate(self.bits.load(Ordering::Acquire))
    }

    /// Report the current bits and clear the ones in `clear_mask`, in one atomic step.
    pub fn take(&self, clear_mask: StatusBits) -> StatusBits {
        let previous = self.bits.fetch_and(!clear_mask.bits(), Ordering::AcqRel);
        StatusBits::from_bits_truncate(previous)
    }
}

/// Current bus role of a board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// Not taking part in a transfer.
    #[default]
    Idle,
    /// Holding ATN to send commands.
    ControllerActive,
    /// Sourcing data bytes.
    Talker,
    /// Accepting data bytes.
    Listener,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::ControllerActive => write!(f, "controller_active"),
            Self::Talker => write!(f, "talker"),
            Self::Listener => write!(f, "listener"),
        }
    }
}
