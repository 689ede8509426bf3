//! Mapping between sample intervals and device timebase codes.
//!
//! Codes below `K = fast_intervals.len()` index an exact table. Codes from `K`
//! upwards follow `interval = (code - linear_offset) / clock_rate_hz`.

use crate::error::ScopeError;
use crate::resolution::ResolutionMode;

/// Timebase layout of one device family.
#[derive(Debug, Clone, PartialEq)]
pub struct TimebaseTable {
    /// Exact sample interval, in seconds, for codes `0..K`.
    pub fast_intervals: Vec<f64>,
    /// Subtracted from the code before dividing by the clock rate.
    pub linear_offset: u32,
    pub clock_rate_hz: f64,
    pub max_code: u32,
}

/// Outcome of [`TimebaseResolver::compute_timebase`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimebaseSelection {
    pub code: u32,
    /// Achieved sample interval in seconds.
    pub interval: f64,
    pub num_samples: u64,
    pub max_samples: u64,
}

#[derive(Debug, Clone)]
pub struct TimebaseResolver {
    table: TimebaseTable,
}

impl TimebaseResolver {
    pub fn new(table: TimebaseTable) -> Result<Self, ScopeError> {
        let Some(&fastest) = table.fast_intervals.first() else {
            return Err(ScopeError::configuration("timebase table has no fast entries"));
        };
        if !(fastest > 0.0) || table.fast_intervals.windows(2).any(|w| !(w[1] > w[0])) {
            return Err(ScopeError::configuration(
                "fast timebase intervals must be positive and strictly increasing",
            ));
        }
        if !(table.clock_rate_hz.is_finite() && table.clock_rate_hz > 0.0) {
            return Err(ScopeError::configuration("timebase clock rate must be positive"));
        }
        let first_linear = table.fast_intervals.len() as u64;
        if u64::from(table.linear_offset) >= first_linear
            || u64::from(table.max_code) < first_linear
        {
            return Err(ScopeError::configuration(
                "linear timebase region does not start after the fast table",
            ));
        }

        let resolver = Self { table };
        let slowest_fast = resolver.table.fast_intervals[resolver.table.fast_intervals.len() - 1];
        if resolver.linear_interval(first_linear) < slowest_fast {
            return Err(ScopeError::configuration(
                "linear timebase region is faster than the fast table",
            ));
        }
        Ok(resolver)
    }

    pub fn table(&self) -> &TimebaseTable {
        &self.table
    }

    /// First code of the linear region.
    fn first_linear_code(&self) -> u64 {
        self.table.fast_intervals.len() as u64
    }

    fn linear_interval(&self, code: u64) -> f64 {
        (code - u64::from(self.table.linear_offset)) as f64 / self.table.clock_rate_hz
    }

    pub fn max_interval(&self) -> f64 {
        self.linear_interval(u64::from(self.table.max_code))
    }

    pub fn interval_for_code(&self, code: u32) -> Result<f64, ScopeError> {
        if code > self.table.max_code {
            return Err(ScopeError::validation(format!(
                "timebase {code} exceeds maximum {}",
                self.table.max_code
            )));
        }
        Ok(match self.table.fast_intervals.get(code as usize) {
            Some(&interval) => interval,
            None => self.linear_interval(u64::from(code)),
        })
    }

    /// Smallest code whose interval is at least `interval` seconds.
    ///
    /// Requests faster than the fastest entry give code 0; requests slower than
    /// the slowest code are clamped to it.
    pub fn resolve(&self, interval: f64) -> Result<u32, ScopeError> {
        if !(interval.is_finite() && interval > 0.0) {
            return Err(ScopeError::validation(format!(
                "sample interval must be positive, got {interval}"
            )));
        }

        if let Some(code) = self
            .table
            .fast_intervals
            .iter()
            .position(|&fast| fast >= interval)
        {
            return Ok(code as u32);
        }

        let max_code = u64::from(self.table.max_code);
        if interval > self.max_interval() {
            log::warn!(
                "Requested interval {interval:e} s exceeds slowest timebase, clamping to {max_code}"
            );
            return Ok(self.table.max_code);
        }

        // Estimate, then walk off any floating point error in the estimate.
        let ticks = (interval * self.table.clock_rate_hz).ceil();
        let first_linear = self.first_linear_code();
        let mut code = (u64::from(self.table.linear_offset) as f64 + ticks)
            .clamp(first_linear as f64, max_code as f64) as u64;
        while code < max_code && self.linear_interval(code) < interval {
            code += 1;
        }
        while code > first_linear && self.linear_interval(code - 1) >= interval {
            code -= 1;
        }

        log::trace!("resolve({interval:e}) = {code}");
        Ok(code as u32)
    }

    /// Pick a timebase for `interval` and size the capture for `duration`.
    ///
    /// `segment_samples` is the per-segment memory in 8-bit single channel
    /// samples. Capacity halves in power-of-two steps with the number of
    /// enabled channels, and again for multi-byte resolutions.
    pub fn compute_timebase(
        &self,
        interval: f64,
        duration: f64,
        num_channels: usize,
        resolution: ResolutionMode,
        segment_samples: u64,
    ) -> Result<TimebaseSelection, ScopeError> {
        if !(duration.is_finite() && duration > 0.0) {
            return Err(ScopeError::validation(format!(
                "capture duration must be positive, got {duration}"
            )));
        }
        if num_channels == 0 {
            return Err(ScopeError::configuration("no channel is enabled"));
        }

        let code = self.resolve(interval)?;
        let achieved = self.interval_for_code(code)?;
        let num_samples = samples_for_duration(duration, achieved);
        let max_samples = segment_samples
            / (num_channels.next_power_of_two() as u64)
            / resolution.memory_divisor();

        log::debug!(
            "Timebase {code}: {achieved:e} s x {num_samples} samples (max {max_samples}) for {num_channels} channel(s) at {resolution}"
        );

        if num_samples > max_samples {
            return Err(ScopeError::Capacity {
                requested: num_samples,
                available: max_samples,
            });
        }

        Ok(TimebaseSelection {
            code,
            interval: achieved,
            num_samples,
            max_samples,
        })
    }
}

/// `ceil(duration / interval)`, tolerant of ratios that are integral up to rounding.
fn samples_for_duration(duration: f64, interval: f64) -> u64 {
    let ratio = duration / interval;
    let nearest = ratio.round();
    let samples = if (ratio - nearest).abs() <= nearest * 1e-9 {
        nearest
    } else {
        ratio.ceil()
    };
    samples.max(1.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> TimebaseResolver {
        TimebaseResolver::new(TimebaseTable {
            fast_intervals: vec![200e-12, 400e-12, 800e-12, 1.6e-9, 3.2e-9],
            linear_offset: 4,
            clock_rate_hz: 156_250_000.0,
            max_code: u32::MAX,
        })
        .unwrap()
    }

    #[test]
    fn test_fast_table_exact_matches() {
        let resolver = resolver();
        assert_eq!(resolver.resolve(200e-12).unwrap(), 0);
        assert_eq!(resolver.resolve(800e-12).unwrap(), 2);
        assert_eq!(resolver.resolve(3.2e-9).unwrap(), 4);
        assert_eq!(resolver.interval_for_code(4).unwrap(), 3.2e-9);
    }

    #[test]
    fn test_faster_than_table_gives_code_zero() {
        assert_eq!(resolver().resolve(1e-15).unwrap(), 0);
    }

    #[test]
    fn test_ceiling_match_in_linear_region() {
        let resolver = resolver();
        assert_eq!(resolver.resolve(6.4e-9).unwrap(), 5);
        assert_eq!(resolver.resolve(10e-9).unwrap(), 6);
        assert_eq!(resolver.resolve(15e-9).unwrap(), 7);
        assert_eq!(resolver.resolve(19.2e-9).unwrap(), 7);
    }

    #[test]
    fn test_interval_for_code() {
        let resolver = resolver();
        assert_eq!(resolver.interval_for_code(2).unwrap(), 800e-12);
        assert_eq!(resolver.interval_for_code(5).unwrap(), 6.4e-9);
        assert_eq!(resolver.interval_for_code(7).unwrap(), 19.2e-9);
        assert_eq!(resolver.interval_for_code(10).unwrap(), 3.84e-8);
        assert_eq!(resolver.interval_for_code(100).unwrap(), 6.144e-7);
    }

    #[test]
    fn test_resolve_is_minimal_ceiling_and_idempotent() {
        let resolver = resolver();
        let mut interval = 1e-12;
        while interval < 10.0 {
            let code = resolver.resolve(interval).unwrap();
            let achieved = resolver.interval_for_code(code).unwrap();
            assert!(achieved >= interval, "{interval:e} -> {code} ({achieved:e})");
            if code > 0 {
                assert!(resolver.interval_for_code(code - 1).unwrap() < interval);
            }
            assert_eq!(resolver.resolve(achieved).unwrap(), code);
            interval *= 1.037;
        }
    }

    #[test]
    fn test_invalid_requests() {
        let resolver = resolver();
        assert!(resolver.resolve(0.0).is_err());
        assert!(resolver.resolve(-1e-9).is_err());
        assert!(resolver.resolve(f64::NAN).is_err());
    }

    #[test]
    fn test_slower_than_slowest_is_clamped() {
        let resolver = TimebaseResolver::new(TimebaseTable {
            fast_intervals: vec![1e-9],
            linear_offset: 0,
            clock_rate_hz: 1e9,
            max_code: 100,
        })
        .unwrap();
        assert_eq!(resolver.resolve(1.0).unwrap(), 100);
    }

    #[test]
    fn test_rejects_inconsistent_table() {
        let result = TimebaseResolver::new(TimebaseTable {
            fast_intervals: vec![1e-9, 2e-9],
            linear_offset: 1,
            clock_rate_hz: 1e10,
            max_code: 100,
        });
        assert!(matches!(result, Err(ScopeError::Configuration(_))));
    }

    #[test]
    fn test_compute_timebase_sizes_capture() {
        let selection = resolver()
            .compute_timebase(100e-9, 2e-3, 1, ResolutionMode::Bits12, 1 << 20)
            .unwrap();
        assert_eq!(selection.code, 20);
        assert_eq!(selection.interval, 102.4e-9);
        assert_eq!(selection.num_samples, 19532);
        assert_eq!(selection.max_samples, 1 << 19);
    }

    #[test]
    fn test_capacity_steps_with_channels() {
        let resolver = resolver();
        let one = resolver
            .compute_timebase(1e-6, 1e-3, 1, ResolutionMode::Bits8, 8000)
            .unwrap();
        let three = resolver
            .compute_timebase(1e-6, 1e-3, 3, ResolutionMode::Bits8, 8000)
            .unwrap();
        assert_eq!(one.max_samples, 8000);
        assert_eq!(three.max_samples, 2000);
    }

    #[test]
    fn test_capacity_error() {
        let err = resolver()
            .compute_timebase(1e-9, 1.0, 4, ResolutionMode::Bits12, 1 << 20)
            .unwrap_err();
        assert!(matches!(err, ScopeError::Capacity { .. }));
    }
}
