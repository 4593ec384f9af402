//! Source (talker) side of the handshake.
//!
//! ```text
//! Idle -> AwaitFirstNrfdReady -> for each byte:
//!           AwaitNrfdReady -> DriveDataAndDav -> AwaitNdacAccepted -> ReleaseDav
//!         -> Done
//! ```
//!
//! A byte counts as written only once the listeners have released NDAC for it.

use std::time::{Duration, Instant};

use tracing::trace;

use super::Handshake;
use crate::error::{GpibError, TransferError};
use crate::line::{BusLine, LineFabric, TransferRole};
use crate::timeout::TimeoutFlag;
use crate::wait::{busy_delay, spin_until, wait_for_edge, WaitOutcome};

/// Put `data` on the bus, asserting EOI with the last byte when `send_eoi` is set.
pub(crate) async fn write_bytes(
    hs: &mut Handshake<'_>,
    data: &[u8],
    send_eoi: bool,
    t1_delay: Duration,
) -> Result<usize, TransferError> {
    let fabric = hs.fabric;
    fabric.set_role(TransferRole::Write);
    if data.is_empty() {
        return Ok(0);
    }

    await_first_ready(hs).await.map_err(TransferError::at_start)?;

    let timeout = &hs.signals.timeout;
    let last = data.len() - 1;
    for (index, &byte) in data.iter().enumerate() {
        if index > 0 {
            spin_until(|| listeners_ready(fabric), hs.deadline, timeout)
                .map_err(|e| TransferError::new(index, e))?;
        }
        let eoi = send_eoi && index == last;
        source_byte(fabric, byte, eoi, t1_delay, hs.deadline, timeout)
            .map_err(|e| TransferError::new(index, e))?;
        trace!(byte = format_args!("{:#04x}", byte), eoi, count = index + 1, "sourced");
    }
    Ok(data.len())
}

/// NRFD and NDAC both released means nobody is taking part in the handshake.
pub(crate) fn no_listeners(fabric: &LineFabric) -> bool {
    !fabric.get(BusLine::Nrfd) && !fabric.get(BusLine::Ndac)
}

/// Every listener is waiting for a byte: NRFD released with NDAC held.
pub(crate) fn listeners_ready(fabric: &LineFabric) -> bool {
    !fabric.get(BusLine::Nrfd) && fabric.get(BusLine::Ndac)
}

/// Suspend until the listeners are ready for the first byte.
///
/// Running out of time with nobody holding NRFD or NDAC is reported as
/// [`GpibError::NoListeners`].
pub(crate) async fn await_first_ready(hs: &mut Handshake<'_>) -> Result<(), GpibError> {
    let fabric = hs.fabric;
    loop {
        let outcome = wait_for_edge(
            hs.signals,
            &hs.signals.ready_gate,
            || listeners_ready(fabric),
            hs.deadline,
            &mut hs.cancel,
        )
        .await;
        match outcome {
            // NDAC went down before NRFD came up; wait for the other edge
            WaitOutcome::Woken if !listeners_ready(fabric) => continue,
            WaitOutcome::TimedOut if no_listeners(fabric) => return Err(GpibError::NoListeners),
            other => return other.into_result(),
        }
    }
}

/// Drive one byte and hold DAV until the listeners accept it.
///
/// On timeout DAV (and EOI) stay asserted; nothing is rolled back.
pub(crate) fn source_byte(
    fabric: &LineFabric,
    byte: u8,
    eoi: bool,
    t1_delay: Duration,
    deadline: Option<Instant>,
    timeout: &TimeoutFlag,
) -> Result<(), GpibError> {
    fabric.write_data(byte);
    if eoi {
        fabric.set(BusLine::Eoi, true);
    }
    busy_delay(t1_delay);
    fabric.set(BusLine::Dav, true);

    spin_until(|| !fabric.get(BusLine::Ndac), deadline, timeout)?;

    fabric.set(BusLine::Dav, false);
    if eoi {
        fabric.set(BusLine::Eoi, false);
    }
    Ok(())
}
