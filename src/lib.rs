//! Bit-banged IEEE-488 (GPIB) controller.
//!
//! This library drives a GPIB bus directly from general-purpose digital lines. The host
//! supplies pin access and edge interrupts through [`PinDriver`]; everything above that
//! is implemented here:
//!
//! - [`line`]: logical line access, polarity and role-dependent line directions
//! - [`wait`]: the suspend-until-edge primitive, busy-polling and cancellation
//! - [`engine`]: the three-wire DAV/NRFD/NDAC handshake for reading and writing bytes
//! - [`eos`]: end-of-transfer detection (EOI and EOS terminator)
//! - [`board`]: [`GpibBoard`], one attached bus participant with its status word
//! - [`controller`]: ATN, IFC and REN control, command bytes, serial poll, device clear
//! - [`sim`]: an in-process wired-OR bus for running boards without hardware
//!
//! # Example
//!
//! ```rust,ignore
//! use gpib_bitbang::{BoardConfig, GpibBoard, SimBus};
//!
//! let bus = SimBus::new();
//! let mut controller = GpibBoard::attach(BoardConfig::default(), bus.attach_node()?)?;
//! controller.take_control()?;
//! controller.send_command(&gpib_bitbang::commands::address_listener(0, 5, None)?).await?;
//! controller.release_control();
//! let written = controller.write(b"*IDN?\n", true, controller.deadline()).await?;
//! ```

pub mod board;
pub mod commands;
pub mod config;
pub mod controller;
pub mod engine;
pub mod eos;
pub mod error;
pub mod line;
pub mod logging;
pub mod sim;
pub mod status;
pub mod timeout;
pub mod wait;

pub use board::GpibBoard;
pub use config::{BoardConfig, ConfigError, PinMap, TimingConfig, TransceiverPins};
pub use engine::ReadOutcome;
pub use eos::{is_end_of_transfer, EosConfig, EosWidth};
pub use error::{GpibError, GpibResult, TransferError};
pub use line::{BusLine, BusLines, Direction, Edge, IrqHandler, IrqRegistration, LineFabric, PinDriver};
pub use sim::{SimBus, SimNode};
pub use status::{Role, StatusBits};
pub use timeout::{TimeoutCode, TimeoutFlag};
pub use wait::Canceller;
