//! Stateless conversion between ADC codes and volts.
//!
//! The scale is always `code / MAX_VALUE * range`. The resolution mode only
//! decides which codes are legal, through [`AdcLimits`].

use crate::channel::VoltageRange;
use crate::error::ScopeError;
use crate::resolution::AdcLimits;

pub fn adc_to_volts(code: i16, range: VoltageRange, limits: AdcLimits) -> Result<f64, ScopeError> {
    if !limits.contains(i32::from(code)) {
        return Err(ScopeError::validation(format!(
            "ADC code {code} outside [{}, {}]",
            limits.min, limits.max
        )));
    }
    Ok(f64::from(code) / f64::from(limits.max) * range.volts())
}

/// Inverse of [`adc_to_volts`]. Values beyond the range saturate at the limits.
pub fn volts_to_adc(volts: f64, range: VoltageRange, limits: AdcLimits) -> i16 {
    if volts.is_nan() {
        return 0;
    }
    let raw = (volts / range.volts() * f64::from(limits.max)).round();
    raw.clamp(f64::from(limits.min), f64::from(limits.max)) as i16
}

/// Scale a block of raw samples into volts, subtracting the channel's analog offset.
///
/// Codes outside the limits are saturated rather than rejected; an overrange
/// sample is reported through the overflow flags, not as an error.
pub fn scale_samples(raw: &[i16], range: VoltageRange, limits: AdcLimits, analog_offset: f64) -> Vec<f64> {
    let scale = range.volts() / f64::from(limits.max);
    raw.iter()
        .map(|&code| {
            let code = code.clamp(limits.min, limits.max);
            f64::from(code) * scale - analog_offset
        })
        .collect()
}
