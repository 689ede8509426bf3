use std::time::Duration;

use crate::channel::{ChannelId, ChannelSettings};
use crate::driver::DeviceTrigger;
use crate::error::ScopeError;
use crate::resolution::AdcLimits;
use crate::unit_converter::volts_to_adc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThresholdDirection {
    Above,
    Below,
    #[default]
    Rising,
    Falling,
    RisingOrFalling,
}

impl ThresholdDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThresholdDirection::Above => "above",
            ThresholdDirection::Below => "below",
            ThresholdDirection::Rising => "rising",
            ThresholdDirection::Falling => "falling",
            ThresholdDirection::RisingOrFalling => "rising-or-falling",
        }
    }
}

#[derive(Debug)]
pub struct SimpleTriggerBuilder {
    source: ChannelId,
    volts: f64,
    direction: ThresholdDirection,
    delay_samples: u64,
    auto_trigger: Option<Duration>,
}

impl SimpleTriggerBuilder {
    pub fn rising_edge(mut self) -> Self {
        self.direction = ThresholdDirection::Rising;
        self
    }

    pub fn falling_edge(mut self) -> Self {
        self.direction = ThresholdDirection::Falling;
        self
    }

    pub fn either_edge(mut self) -> Self {
        self.direction = ThresholdDirection::RisingOrFalling;
        self
    }

    pub fn above(mut self) -> Self {
        self.direction = ThresholdDirection::Above;
        self
    }

    pub fn below(mut self) -> Self {
        self.direction = ThresholdDirection::Below;
        self
    }

    /// Samples between the trigger event and the start of the capture.
    pub fn delay_samples(mut self, samples: u64) -> Self {
        self.delay_samples = samples;
        self
    }

    /// Capture anyway if no trigger occurs within `timeout`.
    pub fn auto_trigger_after(mut self, timeout: Duration) -> Self {
        self.auto_trigger = Some(timeout);
        self
    }

    pub fn build(self) -> SimpleTrigger {
        SimpleTrigger {
            source: self.source,
            threshold_volts: self.volts,
            direction: self.direction,
            delay_samples: self.delay_samples,
            auto_trigger: self.auto_trigger,
        }
    }
}

/// Level trigger on one analog channel, expressed in volts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimpleTrigger {
    pub source: ChannelId,
    pub threshold_volts: f64,
    pub direction: ThresholdDirection,
    pub delay_samples: u64,
    pub auto_trigger: Option<Duration>,
}

impl SimpleTrigger {
    pub fn start_capturing_when(source: ChannelId, volts: f64) -> SimpleTriggerBuilder {
        SimpleTriggerBuilder {
            source,
            volts,
            direction: ThresholdDirection::Rising,
            delay_samples: 0,
            auto_trigger: None,
        }
    }

    /// Convert to device units using the source channel's range and the
    /// active ADC limits.
    pub fn to_device(&self, channel: &ChannelSettings, limits: AdcLimits) -> Result<DeviceTrigger, ScopeError> {
        if !channel.enabled {
            return Err(ScopeError::configuration(format!(
                "trigger source channel {} is disabled",
                self.source
            )));
        }
        let level = self.threshold_volts + channel.analog_offset;
        if !level.is_finite() || level.abs() > channel.range.volts() {
            return Err(ScopeError::validation(format!(
                "trigger threshold {} V outside the +/-{} V range of channel {}",
                self.threshold_volts,
                channel.range.volts(),
                self.source
            )));
        }

        let auto_trigger_ms = match self.auto_trigger {
            Some(timeout) => u32::try_from(timeout.as_millis())
                .map_err(|_| ScopeError::validation("auto-trigger timeout too large"))?
                .max(1),
            None => 0,
        };

        Ok(DeviceTrigger {
            enabled: true,
            source: self.source,
            threshold: volts_to_adc(level, channel.range, limits),
            direction: self.direction,
            delay_samples: self.delay_samples,
            auto_trigger_ms,
        })
    }

    /// Device trigger that never fires; the capture starts immediately.
    pub fn disabled_device_trigger() -> DeviceTrigger {
        DeviceTrigger {
            enabled: false,
            source: ChannelId::A,
            threshold: 0,
            direction: ThresholdDirection::Rising,
            delay_samples: 0,
            auto_trigger_ms: 0,
        }
    }
}
