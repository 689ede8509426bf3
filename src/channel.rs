use std::fmt;
use std::str::FromStr;

use crate::error::ScopeError;

/// Canonical analog input identifier. Names and raw indices from callers are
/// resolved into this once, at the façade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
    H,
}

impl ChannelId {
    pub const ALL: [ChannelId; 8] = [
        ChannelId::A,
        ChannelId::B,
        ChannelId::C,
        ChannelId::D,
        ChannelId::E,
        ChannelId::F,
        ChannelId::G,
        ChannelId::H,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelId::A => "A",
            ChannelId::B => "B",
            ChannelId::C => "C",
            ChannelId::D => "D",
            ChannelId::E => "E",
            ChannelId::F => "F",
            ChannelId::G => "G",
            ChannelId::H => "H",
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = ScopeError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| ScopeError::validation(format!("channel index {index} out of range")))
    }
}

impl FromStr for ChannelId {
    type Err = ScopeError;

    /// Accepts a channel letter (`"A"`, `"b"`) or a decimal index (`"0"`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(index) = trimmed.parse::<u8>() {
            return Self::try_from(index);
        }
        Self::ALL
            .iter()
            .find(|channel| channel.as_str().eq_ignore_ascii_case(trimmed))
            .copied()
            .ok_or_else(|| ScopeError::validation(format!("unknown channel `{s}`")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Coupling {
    AC,
    #[default]
    DC,
    /// DC coupling into a 50 ohm termination.
    DC50,
}

impl Coupling {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coupling::AC => "AC",
            Coupling::DC => "DC",
            Coupling::DC50 => "DC50",
        }
    }
}

/// Full-scale input range of a channel, symmetric around zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum VoltageRange {
    MilliVolts10,
    MilliVolts20,
    MilliVolts50,
    MilliVolts100,
    MilliVolts200,
    MilliVolts500,
    #[default]
    Volts1,
    Volts2,
    Volts5,
    Volts10,
    Volts20,
}

impl VoltageRange {
    pub const ALL: [VoltageRange; 11] = [
        VoltageRange::MilliVolts10,
        VoltageRange::MilliVolts20,
        VoltageRange::MilliVolts50,
        VoltageRange::MilliVolts100,
        VoltageRange::MilliVolts200,
        VoltageRange::MilliVolts500,
        VoltageRange::Volts1,
        VoltageRange::Volts2,
        VoltageRange::Volts5,
        VoltageRange::Volts10,
        VoltageRange::Volts20,
    ];

    pub fn volts(self) -> f64 {
        match self {
            VoltageRange::MilliVolts10 => 0.01,
            VoltageRange::MilliVolts20 => 0.02,
            VoltageRange::MilliVolts50 => 0.05,
            VoltageRange::MilliVolts100 => 0.1,
            VoltageRange::MilliVolts200 => 0.2,
            VoltageRange::MilliVolts500 => 0.5,
            VoltageRange::Volts1 => 1.0,
            VoltageRange::Volts2 => 2.0,
            VoltageRange::Volts5 => 5.0,
            VoltageRange::Volts10 => 10.0,
            VoltageRange::Volts20 => 20.0,
        }
    }

    /// Smallest range whose full scale covers `volts`.
    pub fn at_least(volts: f64) -> Option<Self> {
        if !volts.is_finite() || volts <= 0.0 {
            return None;
        }
        Self::ALL.into_iter().find(|range| range.volts() >= volts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSettings {
    pub enabled: bool,
    pub coupling: Coupling,
    pub range: VoltageRange,
    /// Offset added to the input before digitising, in volts.
    pub analog_offset: f64,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            coupling: Coupling::DC,
            range: VoltageRange::Volts1,
            analog_offset: 0.0,
        }
    }
}

impl ChannelSettings {
    pub fn enabled(coupling: Coupling, range: VoltageRange) -> Self {
        Self {
            enabled: true,
            coupling,
            range,
            analog_offset: 0.0,
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_parsing() {
        assert_eq!("A".parse::<ChannelId>().unwrap(), ChannelId::A);
        assert_eq!("d".parse::<ChannelId>().unwrap(), ChannelId::D);
        assert_eq!("2".parse::<ChannelId>().unwrap(), ChannelId::C);
        assert!("Z".parse::<ChannelId>().is_err());
        assert!(ChannelId::try_from(8).is_err());
        assert_eq!(ChannelId::try_from(7).unwrap(), ChannelId::H);
    }

    #[test]
    fn test_range_selection() {
        assert_eq!(VoltageRange::at_least(1.0), Some(VoltageRange::Volts1));
        assert_eq!(VoltageRange::at_least(0.3), Some(VoltageRange::MilliVolts500));
        assert_eq!(VoltageRange::at_least(0.001), Some(VoltageRange::MilliVolts10));
        assert_eq!(VoltageRange::at_least(25.0), None);
        assert_eq!(VoltageRange::at_least(-1.0), None);
    }
}
