//! The instrument transport as seen by the acquisition engine.
//!
//! Every call returns the raw [`DriverStatus`] on failure; the engine attaches
//! the symbolic fault kind and the call context.

use bitflags::bitflags;

use crate::acquisition::BlockNotifier;
use crate::buffers::DownsampleMode;
use crate::channel::{ChannelId, ChannelSettings};
use crate::error::DriverStatus;
use crate::trigger_config::ThresholdDirection;

pub type DriverResult<T> = Result<T, DriverStatus>;

bitflags! {
    /// Per-channel overrange indicator. Bit `n` is channel index `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct OverflowFlags: u16 {
        const A = 1 << 0;
        const B = 1 << 1;
        const C = 1 << 2;
        const D = 1 << 3;
        const E = 1 << 4;
        const F = 1 << 5;
        const G = 1 << 6;
        const H = 1 << 7;
    }
}

impl OverflowFlags {
    pub fn channel(channel: ChannelId) -> Self {
        Self::from_bits_retain(1 << channel.index())
    }

    pub fn overflowed(&self, channel: ChannelId) -> bool {
        self.contains(Self::channel(channel))
    }
}

/// Reply of the driver's timebase query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseInfo {
    pub interval_ps: f64,
    pub max_samples: u64,
}

/// Trigger as programmed into the device, threshold already in ADC counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTrigger {
    pub enabled: bool,
    pub source: ChannelId,
    pub threshold: i16,
    pub direction: ThresholdDirection,
    pub delay_samples: u64,
    /// 0 waits indefinitely.
    pub auto_trigger_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBlockRequest {
    pub pre_trigger_samples: u64,
    pub post_trigger_samples: u64,
    pub timebase: u32,
    pub segment_index: u32,
}

impl RunBlockRequest {
    pub fn total_samples(&self) -> u64 {
        self.pre_trigger_samples + self.post_trigger_samples
    }
}

/// What the device reports when a block capture finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockReport {
    pub status: DriverStatus,
    pub samples_captured: u64,
    pub overflow: OverflowFlags,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValuesRequest {
    pub start_index: u64,
    pub num_samples: u64,
    pub downsample_ratio: u64,
    pub from_segment: u32,
    pub to_segment: u32,
}

/// Caller memory the driver writes one channel/segment into.
#[derive(Debug)]
pub struct DataTarget<'a> {
    pub channel: ChannelId,
    pub segment: u32,
    pub downsample: DownsampleMode,
    pub samples: &'a mut [i16],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuesReadout {
    /// Samples written per target.
    pub samples_transferred: u64,
    /// Overflow flags of each segment in `from_segment..=to_segment`.
    pub overflow: Vec<OverflowFlags>,
}

pub trait ScopeDriver {
    fn set_resolution(&mut self, device_code: u32) -> DriverResult<()>;

    fn set_channel(&mut self, channel: ChannelId, settings: &ChannelSettings) -> DriverResult<()>;

    fn get_timebase(&mut self, code: u32, num_samples: u64, segment: u32) -> DriverResult<TimebaseInfo>;

    /// Returns the samples available per segment.
    fn set_memory_segments(&mut self, segments: u32) -> DriverResult<u64>;

    fn set_no_of_captures(&mut self, captures: u32) -> DriverResult<()>;

    fn set_simple_trigger(&mut self, trigger: &DeviceTrigger) -> DriverResult<()>;

    /// Start a capture. With a notifier, the driver must call
    /// [`BlockNotifier::notify`] once the block is complete, from any thread.
    fn run_block(&mut self, request: &RunBlockRequest, notifier: Option<BlockNotifier>) -> DriverResult<()>;

    fn is_ready(&mut self) -> DriverResult<bool>;

    fn stop(&mut self) -> DriverResult<()>;

    fn get_values(&mut self, request: &ValuesRequest, targets: &mut [DataTarget<'_>]) -> DriverResult<ValuesReadout>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overflow_flags_per_channel() {
        let flags = OverflowFlags::A | OverflowFlags::channel(ChannelId::C);
        assert!(flags.overflowed(ChannelId::A));
        assert!(!flags.overflowed(ChannelId::B));
        assert!(flags.overflowed(ChannelId::C));
        assert_eq!(OverflowFlags::channel(ChannelId::H), OverflowFlags::H);
    }
}
