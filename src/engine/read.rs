//! Acceptor (listener) side of the handshake.
//!
//! ```text
//! Idle -> AwaitFirstDataValid -> AcceptByte -> CheckEnd -> Done
//!                                   ^              |
//!                                   +-- AwaitDavReleased, AwaitDavAsserted
//! ```
//!
//! Only `AwaitFirstDataValid` suspends. Timeout and cancellation leave the lines as they
//! were at that moment; the next transfer's role switch puts them back in order.
//!
//! A read returns as soon as the last byte is accepted, while the talker may still hold
//! DAV for it. The next read waits for that DAV to drop before asserting NDAC again, so the
//! talker always sees the acceptance and the old byte is never taken twice.

use std::time::Instant;

use tracing::trace;

use super::{Handshake, ReadOutcome};
use crate::eos::{is_end_of_transfer, EosConfig};
use crate::error::{GpibError, TransferError};
use crate::line::{BusLine, LineFabric, TransferRole};
use crate::timeout::TimeoutFlag;
use crate::wait::{spin_until, wait_for_edge, WaitOutcome};

/// Read into `buf` until it is full or a byte ends the transfer.
///
/// `dav_pending` is set when this read leaves an accepted byte behind whose DAV may still
/// be asserted.
pub(crate) async fn read_bytes(
    hs: &mut Handshake<'_>,
    buf: &mut [u8],
    eos: &EosConfig,
    dav_pending: &mut bool,
) -> Result<ReadOutcome, TransferError> {
    let fabric = hs.fabric;
    if *dav_pending {
        await_dav_released(fabric, hs.deadline, &hs.signals.timeout)
            .map_err(TransferError::at_start)?;
        *dav_pending = false;
    }
    fabric.set_role(TransferRole::Read);
    if buf.is_empty() {
        return Ok(ReadOutcome::default());
    }

    // ready for the first byte
    fabric.set(BusLine::Nrfd, false);
    await_first_data_valid(hs)
        .await
        .map_err(TransferError::at_start)?;

    let mut count = 0;
    loop {
        let (byte, eoi) = accept_byte(fabric);
        *dav_pending = true;
        buf[count] = byte;
        count += 1;

        let end = is_end_of_transfer(byte, eos, eoi);
        trace!(byte = format_args!("{:#04x}", byte), eoi, count, "accepted");
        if end || count == buf.len() {
            return Ok(ReadOutcome { count, end });
        }

        await_dav_released(fabric, hs.deadline, &hs.signals.timeout)
            .map_err(|e| TransferError::new(count, e))?;
        // the old byte is gone; a resumed read must not wait for it again
        *dav_pending = false;
        ready_for_next_byte(fabric);
        await_dav_asserted(fabric, hs.deadline, &hs.signals.timeout)
            .map_err(|e| TransferError::new(count, e))?;
    }
}

/// Suspend until the talker asserts DAV for the first byte.
pub(crate) async fn await_first_data_valid(hs: &mut Handshake<'_>) -> Result<(), GpibError> {
    let fabric = hs.fabric;
    loop {
        let outcome = wait_for_edge(
            hs.signals,
            &hs.signals.dav_gate,
            || fabric.get(BusLine::Dav),
            hs.deadline,
            &mut hs.cancel,
        )
        .await;
        // a glitch that was gone again before we looked
        if outcome == WaitOutcome::Woken && !fabric.get(BusLine::Dav) {
            continue;
        }
        return outcome.into_result();
    }
}

/// Take the byte currently on the bus. Returns the byte and the EOI sample.
///
/// NRFD goes up before sampling and NDAC is released only after, so the talker cannot
/// change the data lines while they are being read.
pub(crate) fn accept_byte(fabric: &LineFabric) -> (u8, bool) {
    fabric.set(BusLine::Nrfd, true);
    let byte = fabric.read_data();
    let eoi = fabric.get(BusLine::Eoi);
    fabric.set(BusLine::Ndac, false);
    (byte, eoi)
}

/// Busy-poll until the talker drops DAV for the byte just accepted.
pub(crate) fn await_dav_released(
    fabric: &LineFabric,
    deadline: Option<Instant>,
    timeout: &TimeoutFlag,
) -> Result<(), GpibError> {
    spin_until(|| !fabric.get(BusLine::Dav), deadline, timeout)
}

/// NDAC asserted, then NRFD released.
pub(crate) fn ready_for_next_byte(fabric: &LineFabric) {
    fabric.set(BusLine::Ndac, true);
    fabric.set(BusLine::Nrfd, false);
}

/// Busy-poll until DAV is asserted for the next byte.
pub(crate) fn await_dav_asserted(
    fabric: &LineFabric,
    deadline: Option<Instant>,
    timeout: &TimeoutFlag,
) -> Result<(), GpibError> {
    spin_until(|| fabric.get(BusLine::Dav), deadline, timeout)
}
