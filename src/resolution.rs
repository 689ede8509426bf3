use std::fmt;
use std::str::FromStr;

use crate::error::ScopeError;

/// Vertical resolution of the ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResolutionMode {
    Bits8,
    Bits10,
    Bits12,
    Bits14,
    Bits15,
    Bits16,
}

impl ResolutionMode {
    pub fn bits(self) -> u8 {
        match self {
            ResolutionMode::Bits8 => 8,
            ResolutionMode::Bits10 => 10,
            ResolutionMode::Bits12 => 12,
            ResolutionMode::Bits14 => 14,
            ResolutionMode::Bits15 => 15,
            ResolutionMode::Bits16 => 16,
        }
    }

    /// Factor by which sample memory shrinks in this mode. Anything above
    /// 8 bits is stored as two bytes per sample.
    pub fn memory_divisor(self) -> u64 {
        if self.bits() > 8 {
            2
        } else {
            1
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bits())
    }
}

impl FromStr for ResolutionMode {
    type Err = ScopeError;

    /// Accepts `"12"`, `"12bit"` or `"12-bit"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .trim_end_matches("bit")
            .trim_end_matches('-')
            .trim();
        match digits {
            "8" => Ok(ResolutionMode::Bits8),
            "10" => Ok(ResolutionMode::Bits10),
            "12" => Ok(ResolutionMode::Bits12),
            "14" => Ok(ResolutionMode::Bits14),
            "15" => Ok(ResolutionMode::Bits15),
            "16" => Ok(ResolutionMode::Bits16),
            _ => Err(ScopeError::validation(format!("unknown resolution `{s}`"))),
        }
    }
}

/// Usable ADC code range. Always symmetric around zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdcLimits {
    pub min: i16,
    pub max: i16,
}

impl AdcLimits {
    pub fn symmetric(max: i16) -> Self {
        Self { min: -max, max }
    }

    pub fn contains(&self, code: i32) -> bool {
        (i32::from(self.min)..=i32::from(self.max)).contains(&code)
    }
}

/// One supported mode of a device family: the native selector sent to the
/// driver and the headroom-reduced ADC maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionEntry {
    pub mode: ResolutionMode,
    pub device_code: u32,
    pub max_adc: i16,
}

impl ResolutionEntry {
    pub const fn new(mode: ResolutionMode, device_code: u32, max_adc: i16) -> Self {
        Self {
            mode,
            device_code,
            max_adc,
        }
    }

    pub fn limits(&self) -> AdcLimits {
        AdcLimits::symmetric(self.max_adc)
    }
}

/// Tracks the active resolution of one device session.
#[derive(Debug, Clone)]
pub struct ResolutionManager {
    supported: Vec<ResolutionEntry>,
    active: ResolutionEntry,
    generation: u64,
}

impl ResolutionManager {
    /// The first entry of `supported` becomes the initial mode.
    pub fn new(supported: Vec<ResolutionEntry>) -> Result<Self, ScopeError> {
        let active = *supported
            .first()
            .ok_or_else(|| ScopeError::configuration("device profile lists no resolution modes"))?;
        Ok(Self {
            supported,
            active,
            generation: 0,
        })
    }

    pub fn set_resolution(&mut self, mode: ResolutionMode) -> Result<(), ScopeError> {
        let entry = self
            .supported
            .iter()
            .find(|entry| entry.mode == mode)
            .copied()
            .ok_or_else(|| {
                ScopeError::validation(format!("resolution {mode} is not supported by this device"))
            })?;

        if entry != self.active {
            log::debug!(
                "Resolution {} -> {} (ADC range {:?})",
                self.active.mode,
                entry.mode,
                entry.limits()
            );
            self.active = entry;
            self.generation += 1;
        }
        Ok(())
    }

    pub fn resolution(&self) -> ResolutionMode {
        self.active.mode
    }

    pub fn active(&self) -> ResolutionEntry {
        self.active
    }

    pub fn limits(&self) -> AdcLimits {
        self.active.limits()
    }

    pub fn min_value(&self) -> i16 {
        self.active.limits().min
    }

    pub fn max_value(&self) -> i16 {
        self.active.limits().max
    }

    /// Bumped on every effective mode change. Anything that cached a scale
    /// factor must compare against this before reusing it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn supports(&self, mode: ResolutionMode) -> bool {
        self.supported.iter().any(|entry| entry.mode == mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ResolutionManager {
        ResolutionManager::new(vec![
            ResolutionEntry::new(ResolutionMode::Bits8, 0, 32512),
            ResolutionEntry::new(ResolutionMode::Bits10, 10, 32704),
            ResolutionEntry::new(ResolutionMode::Bits12, 1, 32736),
        ])
        .unwrap()
    }

    #[test]
    fn test_twelve_bit_limits() {
        let mut manager = manager();
        manager.set_resolution("12".parse().unwrap()).unwrap();
        assert_eq!(manager.resolution(), ResolutionMode::Bits12);
        assert_eq!(manager.active().device_code, 1);
        assert_eq!(manager.min_value(), -32736);
        assert_eq!(manager.max_value(), 32736);
    }

    #[test]
    fn test_unsupported_mode_keeps_previous() {
        let mut manager = manager();
        manager.set_resolution(ResolutionMode::Bits10).unwrap();
        let err = manager.set_resolution(ResolutionMode::Bits16).unwrap_err();
        assert!(matches!(err, ScopeError::Validation(_)));
        assert_eq!(manager.resolution(), ResolutionMode::Bits10);
    }

    #[test]
    fn test_generation_only_moves_on_change() {
        let mut manager = manager();
        let start = manager.generation();
        manager.set_resolution(ResolutionMode::Bits8).unwrap();
        assert_eq!(manager.generation(), start);
        manager.set_resolution(ResolutionMode::Bits12).unwrap();
        assert_eq!(manager.generation(), start + 1);
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!("8bit".parse::<ResolutionMode>().unwrap(), ResolutionMode::Bits8);
        assert_eq!("16-bit".parse::<ResolutionMode>().unwrap(), ResolutionMode::Bits16);
        assert!("11".parse::<ResolutionMode>().is_err());
    }
}
