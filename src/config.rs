//! Board configuration using Figment
//!
//! Configuration is layered, later sources overriding earlier ones:
//! 1. Built-in defaults (`BoardConfig::default()`)
//! 2. An optional TOML file
//! 3. Environment variables prefixed with `GPIB_` (`__` separates nested keys)
//!
//! ```text
//! GPIB_PRIMARY_ADDRESS=5
//! GPIB_TIMEOUT=T10s
//! GPIB_TIMING__T1_DELAY_NS=500
//! ```
//!
//! # Example
//!
//! ```toml
//! name = "gpib0"
//! system_controller = true
//! primary_address = 0
//! timeout = "T3s"
//!
//! [eos]
//! terminator = 10
//! enabled = true
//! width = "seven_bit"
//!
//! [timing]
//! t1_delay_ns = 2000
//! ifc_pulse_us = 150
//!
//! [pins]
//! inverted = true
//! ```
//!
//! Timing values are tuned per board; the defaults are conservative starting points
//! taken from the IEEE-488.1 minimums, not measured values.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::eos::EosConfig;
use crate::line::BusLine;
use crate::timeout::TimeoutCode;

/// Highest primary or secondary address a device may use.
pub const MAX_ADDRESS: u8 = 30;

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file or environment could not be parsed.
    #[error("Configuration load error: {0}")]
    Load(#[from] figment::Error),
    /// Parsed, but the values are not usable.
    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Everything needed to attach one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardConfig {
    /// Name used in log output.
    pub name: String,
    /// Whether this board may drive IFC and REN.
    pub system_controller: bool,
    /// Primary address, 0-30.
    pub primary_address: u8,
    /// Optional secondary address, 0-30.
    pub secondary_address: Option<u8>,
    /// Default timeout for transfers started through [`crate::GpibBoard::deadline`].
    pub timeout: TimeoutCode,
    /// EOS settings a freshly attached board reads with.
    pub eos: EosConfig,
    /// Settle and pulse widths.
    pub timing: TimingConfig,
    /// Where the bus lines are wired.
    pub pins: PinMap,
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            name: "gpib0".to_string(),
            system_controller: true,
            primary_address: 0,
            secondary_address: None,
            timeout: TimeoutCode::default(),
            eos: EosConfig::default(),
            timing: TimingConfig::default(),
            pins: PinMap::default(),
        }
    }
}

impl BoardConfig {
    /// Load defaults, then `path` (if given), then `GPIB_*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed("GPIB_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults, without environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration for a non-controller device at `primary_address`.
    pub fn device(name: impl Into<String>, primary_address: u8) -> Self {
        Self {
            name: name.into(),
            system_controller: false,
            primary_address,
            ..Self::default()
        }
    }

    /// Check addresses and the pin map.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_address > MAX_ADDRESS {
            return Err(ConfigError::Validation(format!(
                "primary_address {} exceeds {}",
                self.primary_address, MAX_ADDRESS
            )));
        }
        if let Some(sad) = self.secondary_address {
            if sad > MAX_ADDRESS {
                return Err(ConfigError::Validation(format!(
                    "secondary_address {} exceeds {}",
                    sad, MAX_ADDRESS
                )));
            }
        }
        self.pins.validate()
    }
}

/// Board-tuned handshake timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Settle time between driving the data lines and asserting DAV.
    pub t1_delay_ns: u64,
    /// Width of the IFC pulse.
    pub ifc_pulse_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            t1_delay_ns: 2_000,
            ifc_pulse_us: 150,
        }
    }
}

impl TimingConfig {
    /// Data settle time before DAV.
    pub fn t1_delay(&self) -> Duration {
        Duration::from_nanos(self.t1_delay_ns)
    }

    /// How long IFC is held.
    pub fn ifc_pulse(&self) -> Duration {
        Duration::from_micros(self.ifc_pulse_us)
    }
}

/// Pins of the local bus transceivers (SN75160/SN75161 style).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransceiverPins {
    /// High while this board drives the data and DAV/EOI lines.
    pub talk_enable: u32,
    /// High to switch the data drivers to push-pull while talking.
    pub pullup_enable: u32,
    /// Direction of ATN/SRQ on the control transceiver, low when system controller.
    pub direction_control: u32,
    /// Direction of IFC/REN on the control transceiver, high when system controller.
    pub system_control: u32,
}

/// Physical pin assignment of the bus lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinMap {
    /// DIO1..DIO8, DIO1 is bit 0 of a bus byte.
    pub data: [u32; 8],
    /// Data valid.
    pub dav: u32,
    /// Not ready for data.
    pub nrfd: u32,
    /// Not data accepted.
    pub ndac: u32,
    /// End or identify.
    pub eoi: u32,
    /// Attention.
    pub atn: u32,
    /// Interface clear.
    pub ifc: u32,
    /// Remote enable.
    pub ren: u32,
    /// Service request.
    pub srq: u32,
    /// Electrical low means asserted. True for IEEE-488 wiring without inverting buffers.
    pub inverted: bool,
    /// Transceiver control pins, when the board has them.
    pub transceiver: Option<TransceiverPins>,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            data: [21, 20, 26, 16, 19, 13, 12, 6],
            dav: 10,
            nrfd: 24,
            ndac: 23,
            eoi: 5,
            atn: 25,
            ifc: 22,
            ren: 27,
            srq: 11,
            inverted: true,
            transceiver: None,
        }
    }
}

impl PinMap {
    /// Pin carrying `line`.
    pub fn pin(&self, line: BusLine) -> u32 {
        match line {
            BusLine::Data(n) => self.data[usize::from(n & 7)],
            BusLine::Dav => self.dav,
            BusLine::Nrfd => self.nrfd,
            BusLine::Ndac => self.ndac,
            BusLine::Eoi => self.eoi,
            BusLine::Atn => self.atn,
            BusLine::Ifc => self.ifc,
            BusLine::Ren => self.ren,
            BusLine::Srq => self.srq,
        }
    }

    /// All pins in use, bus lines first.
    pub fn all_pins(&self) -> Vec<u32> {
        let mut pins: Vec<u32> = BusLine::ALL.iter().map(|line| self.pin(*line)).collect();
        if let Some(t) = &self.transceiver {
            pins.extend([
                t.talk_enable,
                t.pullup_enable,
                t.direction_control,
                t.system_control,
            ]);
        }
        pins
    }

    /// Reject pin maps that use a pin twice.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for pin in self.all_pins() {
            if !seen.insert(pin) {
                return Err(ConfigError::Validation(format!(
                    "pin {} is assigned to more than one line",
                    pin
                )));
            }
        }
        Ok(())
    }
}
