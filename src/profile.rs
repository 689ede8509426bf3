use std::time::Duration;

use crate::channel::VoltageRange;
use crate::resolution::{ResolutionEntry, ResolutionMode};
use crate::timebase::TimebaseTable;

/// Model-specific constants, supplied by whoever identified the device.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub model: String,
    pub channel_count: usize,
    /// Total sample memory, in 8-bit single channel samples.
    pub memory_samples: u64,
    pub max_segments: u32,
    pub voltage_ranges: Vec<VoltageRange>,
    pub timebase: TimebaseTable,
    /// Supported resolutions; the first one is active after connecting.
    pub resolutions: Vec<ResolutionEntry>,
}

impl DeviceProfile {
    /// 6000E series: 5 GS/s fast table, then a 156.25 MHz linear region.
    pub fn ps6000a() -> Self {
        Self {
            model: "6000E".to_string(),
            channel_count: 8,
            memory_samples: 4_000_000_000,
            max_segments: 2_000_000,
            voltage_ranges: VoltageRange::ALL.to_vec(),
            timebase: TimebaseTable {
                fast_intervals: vec![200e-12, 400e-12, 800e-12, 1.6e-9, 3.2e-9],
                linear_offset: 4,
                clock_rate_hz: 156_250_000.0,
                max_code: u32::MAX,
            },
            resolutions: vec![
                ResolutionEntry::new(ResolutionMode::Bits8, 0, 32512),
                ResolutionEntry::new(ResolutionMode::Bits10, 10, 32704),
                ResolutionEntry::new(ResolutionMode::Bits12, 1, 32736),
            ],
        }
    }

    /// 5000D series with flexible resolution: 1 GS/s fast table, then a
    /// 125 MHz linear region.
    pub fn ps5000a() -> Self {
        Self {
            model: "5000D".to_string(),
            channel_count: 4,
            memory_samples: 512 * 1024 * 1024,
            max_segments: 250_000,
            voltage_ranges: VoltageRange::ALL.to_vec(),
            timebase: TimebaseTable {
                fast_intervals: vec![1e-9, 2e-9, 4e-9],
                linear_offset: 2,
                clock_rate_hz: 125_000_000.0,
                max_code: u32::MAX,
            },
            resolutions: vec![
                ResolutionEntry::new(ResolutionMode::Bits8, 0, 32512),
                ResolutionEntry::new(ResolutionMode::Bits12, 1, 32767),
                ResolutionEntry::new(ResolutionMode::Bits14, 2, 32767),
                ResolutionEntry::new(ResolutionMode::Bits15, 3, 32767),
                ResolutionEntry::new(ResolutionMode::Bits16, 4, 32767),
            ],
        }
    }
}

/// Host-side acquisition policy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScopeSettings {
    /// Sleep between readiness polls while waiting for a capture.
    pub poll_interval: Duration,
    /// `None` waits until the capture completes or is cancelled.
    pub wait_timeout: Option<Duration>,
    /// Share of each capture placed before the trigger, `0.0..=1.0`.
    pub pre_trigger_ratio: f64,
    /// Let `run_block` drop a completed capture nobody read. When false,
    /// unread data must be released with `discard_unread` first.
    pub discard_unread_on_rearm: bool,
}

impl Default for ScopeSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1),
            wait_timeout: None,
            pre_trigger_ratio: 0.0,
            discard_unread_on_rearm: false,
        }
    }
}
