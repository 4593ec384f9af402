//! Byte transfer engine.
//!
//! [`read`] implements the acceptor side of the three-wire handshake and [`write`] the
//! source side. Both follow the same shape: switch the line fabric to the role, suspend
//! for the peer's first edge, then busy-poll every following edge.

pub mod read;
pub mod write;

use std::time::Instant;

use crate::line::LineFabric;
use crate::wait::{BoardSignals, CancelToken};

/// Everything one transfer needs from its board. Lives for the duration of one call.
pub(crate) struct Handshake<'a> {
    pub fabric: &'a LineFabric,
    pub signals: &'a BoardSignals,
    pub cancel: CancelToken,
    pub deadline: Option<Instant>,
}

/// Result of a successful read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadOutcome {
    /// Bytes stored at the start of the caller's buffer.
    pub count: usize,
    /// The last byte carried EOI or matched the EOS terminator.
    pub end: bool,
}
