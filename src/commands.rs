//! IEEE-488.1 multiline interface messages.
//!
//! These are the bytes a controller sends with ATN asserted to address devices and
//! issue bus-wide commands.

use crate::config::MAX_ADDRESS;
use crate::error::{GpibError, GpibResult};

/// Selected Device Clear.
pub const SDC: u8 = 0x04;
/// Group Execute Trigger.
pub const GET: u8 = 0x08;
/// Local Lockout.
pub const LLO: u8 = 0x11;
/// Device Clear (all devices).
pub const DCL: u8 = 0x14;
/// Serial Poll Enable.
pub const SPE: u8 = 0x18;
/// Serial Poll Disable.
pub const SPD: u8 = 0x19;
/// Unlisten.
pub const UNL: u8 = 0x3F;
/// Unaddress talker.
pub const UNT: u8 = 0x5F;

const LISTEN_BASE: u8 = 0x20;
const TALK_BASE: u8 = 0x40;
const SECONDARY_BASE: u8 = 0x60;

/// Reject addresses above 30.
pub fn check_address(kind: &'static str, address: u8) -> GpibResult<u8> {
    if address > MAX_ADDRESS {
        return Err(GpibError::InvalidAddress {
            kind,
            value: address,
        });
    }
    Ok(address)
}

/// My Listen Address for primary address `pad`.
pub fn listen_address(pad: u8) -> GpibResult<u8> {
    Ok(LISTEN_BASE | check_address("primary", pad)?)
}

/// My Talk Address for primary address `pad`.
pub fn talk_address(pad: u8) -> GpibResult<u8> {
    Ok(TALK_BASE | check_address("primary", pad)?)
}

/// Secondary address byte for `sad`.
pub fn secondary_address(sad: u8) -> GpibResult<u8> {
    Ok(SECONDARY_BASE | check_address("secondary", sad)?)
}

/// Command bytes that make device `pad` (and optionally `sad`) the only listener, with
/// `talker` as the talker.
pub fn address_listener(talker: u8, pad: u8, sad: Option<u8>) -> GpibResult<Vec<u8>> {
    let mut bytes = vec![UNL, talk_address(talker)?, listen_address(pad)?];
    if let Some(sad) = sad {
        bytes.push(secondary_address(sad)?);
    }
    Ok(bytes)
}

/// Command bytes that make device `pad` (and optionally `sad`) the talker, with
/// `listener` as the only listener.
pub fn address_talker(listener: u8, pad: u8, sad: Option<u8>) -> GpibResult<Vec<u8>> {
    let mut bytes = vec![UNL, listen_address(listener)?, talk_address(pad)?];
    if let Some(sad) = sad {
        bytes.push(secondary_address(sad)?);
    }
    Ok(bytes)
}
