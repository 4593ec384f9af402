//! Error types for the GPIB handshake engine.
//!
//! `GpibError` is the single error enum for the crate. Using the `thiserror` crate, it
//! separates the outcomes a caller has to tell apart after a bus operation:
//!
//! - **`Timeout`**: the transfer deadline passed (or the shared timeout flag was raised)
//!   while waiting for a peer edge.
//! - **`Cancelled`**: a suspend-point wait was interrupted by a cancel request that has
//!   nothing to do with the bus.
//! - **`IoUnavailable`**: the pin driver could not provide an edge interrupt or a pin.
//! - **`ProtocolPrecondition`**: the board is not in a role that allows the operation
//!   (for example a data write while this board holds ATN).
//! - **`NoListeners`**: nobody on the bus is taking part in the acceptor handshake.
//!
//! Transfers report failures through [`TransferError`], which pairs the error with the
//! number of bytes that completed their handshake before it happened.

use thiserror::Error;

use crate::config::ConfigError;

/// Convenience alias for results using the crate error type.
pub type GpibResult<T> = std::result::Result<T, GpibError>;

/// Failure of a bus operation.
#[derive(Error, Debug)]
pub enum GpibError {
    /// Deadline passed or the timeout flag was raised.
    #[error("Timed out waiting for handshake")]
    Timeout,

    /// A cancel request ended a suspended wait.
    #[error("Wait cancelled")]
    Cancelled,

    /// The pin driver refused a pin or an edge interrupt.
    #[error("Line I/O unavailable: {0}")]
    IoUnavailable(String),

    /// Wrong role or ATN state for the operation.
    #[error("Protocol precondition violated: {0}")]
    ProtocolPrecondition(String),

    /// Nobody answered the first byte: NRFD and NDAC stayed released.
    #[error("No listeners on the bus (NRFD and NDAC both released)")]
    NoListeners,

    /// Primary or secondary address outside 0-30.
    #[error("Invalid {kind} address {value} (valid range 0-30)")]
    InvalidAddress {
        /// `"primary"` or `"secondary"`.
        kind: &'static str,
        /// The rejected address.
        value: u8,
    },

    /// Board configuration failed to load or validate.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl GpibError {
    /// True for the two outcomes that interrupt a wait rather than reject a request.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Timeout | Self::Cancelled)
    }
}

/// A failed transfer together with the bytes that made it across first.
///
/// `count` only includes bytes whose handshake completed: accepted by this board when
/// reading, acknowledged through NDAC when writing.
#[derive(Error, Debug)]
#[error("{source} after {count} byte(s)")]
pub struct TransferError {
    /// Bytes fully handshaken before the failure.
    pub count: usize,
    /// What stopped the transfer.
    #[source]
    pub source: GpibError,
}

impl TransferError {
    /// Failure after `count` completed bytes.
    pub fn new(count: usize, source: GpibError) -> Self {
        Self { count, source }
    }

    /// Failure before any byte was transferred.
    pub fn at_start(source: GpibError) -> Self {
        Self::new(0, source)
    }

    /// The transfer ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self.source, GpibError::Timeout)
    }

    /// A cancel request stopped the transfer.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, GpibError::Cancelled)
    }
}
