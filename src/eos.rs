//! End-of-transfer detection.
//!
//! A read ends on a byte that either arrived with EOI asserted or matches the configured
//! end-of-string terminator. The two conditions are OR'd.

use serde::{Deserialize, Serialize};

/// How many bits of the terminator take part in the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EosWidth {
    /// Compare the low 7 bits only, for ASCII links that may carry a parity bit.
    #[default]
    SevenBit,
    /// Compare all 8 bits.
    EightBit,
}

impl EosWidth {
    fn mask(self) -> u8 {
        match self {
            Self::SevenBit => 0x7f,
            Self::EightBit => 0xff,
        }
    }
}

/// End-of-string terminator configuration. A transfer takes a copy when it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EosConfig {
    /// Byte that ends a read.
    pub terminator: u8,
    /// When false only EOI ends a read.
    pub enabled: bool,
    /// Seven- or eight-bit comparison.
    pub width: EosWidth,
}

impl Default for EosConfig {
    fn default() -> Self {
        Self {
            terminator: b'\n',
            enabled: false,
            width: EosWidth::SevenBit,
        }
    }
}

impl EosConfig {
    /// Terminator settings as given.
    pub fn new(terminator: u8, enabled: bool, width: EosWidth) -> Self {
        Self {
            terminator,
            enabled,
            width,
        }
    }

    /// No terminator; reads end on EOI or a full buffer.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Whether `byte` is the terminator under this configuration.
    pub fn matches(&self, byte: u8) -> bool {
        let mask = self.width.mask();
        self.enabled && (byte & mask) == (self.terminator & mask)
    }
}

/// Decide whether `byte`, sampled together with the EOI line, ends the transfer.
pub fn is_end_of_transfer(byte: u8, eos: &EosConfig, eoi_asserted: bool) -> bool {
    eoi_asserted || eos.matches(byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_eos_only_uses_eoi() {
        let eos = EosConfig::new(b'\r', false, EosWidth::EightBit);
        assert!(!is_end_of_transfer(b'\r', &eos, false));
        assert!(is_end_of_transfer(b'A', &eos, true));
    }

    #[test]
    fn test_seven_bit_match_ignores_parity_bit() {
        let eos = EosConfig::new(0xC2, true, EosWidth::SevenBit);
        assert!(is_end_of_transfer(0x42, &eos, false));
        assert!(is_end_of_transfer(0xC2, &eos, false));
    }

    #[test]
    fn test_eight_bit_match_is_exact() {
        let eos = EosConfig::new(0xC2, true, EosWidth::EightBit);
        assert!(!is_end_of_transfer(0x42, &eos, false));
        assert!(is_end_of_transfer(0xC2, &eos, false));
    }

    #[test]
    fn test_eoi_and_eos_are_ored() {
        let eos = EosConfig::new(b'\n', true, EosWidth::EightBit);
        assert!(is_end_of_transfer(b'\n', &eos, true));
        assert!(is_end_of_transfer(b'x', &eos, true));
        assert!(!is_end_of_transfer(b'x', &eos, false));
    }
}
