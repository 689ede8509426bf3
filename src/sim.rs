//! In-process stand-in for the instrument driver.
//!
//! Produces a deterministic sine per channel and segment, can be told to fail
//! or overflow, and completes notify-mode captures from its own thread the
//! way a vendor driver does.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::acquisition::BlockNotifier;
use crate::buffers::DownsampleMode;
use crate::channel::{ChannelId, ChannelSettings};
use crate::driver::{
    BlockReport, DataTarget, DeviceTrigger, DriverResult, OverflowFlags, RunBlockRequest, ScopeDriver,
    TimebaseInfo, ValuesReadout, ValuesRequest,
};
use crate::error::DriverStatus;
use crate::profile::DeviceProfile;
use crate::timebase::TimebaseResolver;

const SINE_PERIOD: f64 = 100.0;
const SINE_AMPLITUDE: f64 = 16_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NotifyMode {
    Thread(Duration),
    Manual,
}

#[derive(Debug)]
pub struct SimulatedDriver {
    memory_samples: u64,
    max_segments: u32,
    timebase: Option<TimebaseResolver>,
    resolution_code: Option<u32>,
    channels: [ChannelSettings; 8],
    segments: u32,
    captures: u32,
    trigger: Option<DeviceTrigger>,
    armed: Option<RunBlockRequest>,
    captured: Option<RunBlockRequest>,
    polls_remaining: u32,
    ready_after_polls: u32,
    block_status: DriverStatus,
    overflow: OverflowFlags,
    notify_mode: NotifyMode,
    pending: Option<BlockNotifier>,
    complete_on_stop: bool,
    notifications: Vec<JoinHandle<()>>,
    stop_count: usize,
    run_count: usize,
}

impl Default for SimulatedDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedDriver {
    pub fn new() -> Self {
        Self::with_profile(&DeviceProfile::ps6000a())
    }

    /// Simulate the memory and timebase layout of `profile`.
    pub fn with_profile(profile: &DeviceProfile) -> Self {
        Self {
            memory_samples: profile.memory_samples,
            max_segments: profile.max_segments,
            timebase: TimebaseResolver::new(profile.timebase.clone()).ok(),
            resolution_code: None,
            channels: [ChannelSettings::disabled(); 8],
            segments: 1,
            captures: 1,
            trigger: None,
            armed: None,
            captured: None,
            polls_remaining: 0,
            ready_after_polls: 0,
            block_status: DriverStatus::OK,
            overflow: OverflowFlags::empty(),
            notify_mode: NotifyMode::Thread(Duration::ZERO),
            pending: None,
            complete_on_stop: false,
            notifications: Vec::new(),
            stop_count: 0,
            run_count: 0,
        }
    }

    /// `is_ready` reports "not ready" this many times per capture.
    pub fn with_ready_after_polls(mut self, polls: u32) -> Self {
        self.ready_after_polls = polls;
        self
    }

    /// Status every capture completes with.
    pub fn with_block_status(mut self, status: DriverStatus) -> Self {
        self.block_status = status;
        self
    }

    pub fn with_overflow(mut self, overflow: OverflowFlags) -> Self {
        self.overflow = overflow;
        self
    }

    pub fn with_notify_delay(mut self, delay: Duration) -> Self {
        self.notify_mode = NotifyMode::Thread(delay);
        self
    }

    /// Keep notifiers for the test to complete through [`Self::take_notifier`].
    pub fn with_manual_notify(mut self) -> Self {
        self.notify_mode = NotifyMode::Manual;
        self
    }

    /// A held notifier reports success from inside `stop`, as a device does
    /// when the capture finishes just as the stop arrives.
    pub fn with_completion_on_stop(mut self) -> Self {
        self.notify_mode = NotifyMode::Manual;
        self.complete_on_stop = true;
        self
    }

    pub fn take_notifier(&mut self) -> Option<BlockNotifier> {
        self.pending.take()
    }

    /// Wait for every notification thread spawned so far.
    pub fn join_notifications(&mut self) {
        for handle in self.notifications.drain(..) {
            if handle.join().is_err() {
                log::error!("Simulated notification thread panicked");
            }
        }
    }

    /// Sample the simulator writes for `channel`, `segment`, `index`.
    pub fn expected_sample(channel: ChannelId, segment: u32, index: u64) -> i16 {
        let phase = f64::from(segment) * 7.0 + channel.index() as f64 * 25.0;
        let angle = 2.0 * std::f64::consts::PI * (index as f64 + phase) / SINE_PERIOD;
        (SINE_AMPLITUDE * angle.sin()).round() as i16
    }

    pub fn resolution_code(&self) -> Option<u32> {
        self.resolution_code
    }

    pub fn channel(&self, channel: ChannelId) -> ChannelSettings {
        self.channels[channel.index()]
    }

    pub fn trigger(&self) -> Option<DeviceTrigger> {
        self.trigger
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn captures(&self) -> u32 {
        self.captures
    }

    pub fn last_run(&self) -> Option<RunBlockRequest> {
        self.armed.or(self.captured)
    }

    pub fn stop_count(&self) -> usize {
        self.stop_count
    }

    pub fn run_count(&self) -> usize {
        self.run_count
    }

    fn report(&self, request: &RunBlockRequest) -> BlockReport {
        let samples_captured = if self.block_status.is_ok() {
            request.total_samples()
        } else {
            0
        };
        BlockReport {
            status: self.block_status,
            samples_captured,
            overflow: self.overflow,
        }
    }

    fn fill(target: &mut DataTarget<'_>, request: &ValuesRequest) -> u64 {
        let ratio = request.downsample_ratio.max(1);
        let reduce = ratio > 1 && !target.downsample.contains(DownsampleMode::RAW);
        let count = if reduce {
            request.num_samples / ratio
        } else {
            request.num_samples
        };
        let count = count.min(target.samples.len() as u64);

        for (offset, slot) in target.samples.iter_mut().take(count as usize).enumerate() {
            let offset = offset as u64;
            *slot = if reduce && target.downsample.contains(DownsampleMode::AVERAGE) {
                let start = request.start_index + offset * ratio;
                let sum: i64 = (start..start + ratio)
                    .map(|index| i64::from(Self::expected_sample(target.channel, target.segment, index)))
                    .sum();
                (sum / ratio as i64) as i16
            } else if reduce {
                Self::expected_sample(target.channel, target.segment, request.start_index + offset * ratio)
            } else {
                Self::expected_sample(target.channel, target.segment, request.start_index + offset)
            };
        }
        count
    }
}

impl ScopeDriver for SimulatedDriver {
    fn set_resolution(&mut self, device_code: u32) -> DriverResult<()> {
        log::trace!("sim: set_resolution({device_code})");
        self.resolution_code = Some(device_code);
        Ok(())
    }

    fn set_channel(&mut self, channel: ChannelId, settings: &ChannelSettings) -> DriverResult<()> {
        log::trace!("sim: set_channel({channel}, {settings:?})");
        self.channels[channel.index()] = *settings;
        Ok(())
    }

    fn get_timebase(&mut self, code: u32, num_samples: u64, segment: u32) -> DriverResult<TimebaseInfo> {
        if segment >= self.segments {
            return Err(DriverStatus::INVALID_PARAMETER);
        }
        let interval = self
            .timebase
            .as_ref()
            .ok_or(DriverStatus::NOT_RESPONDING)?
            .interval_for_code(code)
            .map_err(|_| DriverStatus::INVALID_PARAMETER)?;
        let max_samples = self.memory_samples / u64::from(self.segments);
        if num_samples > max_samples {
            return Err(DriverStatus::INVALID_PARAMETER);
        }
        Ok(TimebaseInfo {
            interval_ps: interval * 1e12,
            max_samples,
        })
    }

    fn set_memory_segments(&mut self, segments: u32) -> DriverResult<u64> {
        if segments == 0 || segments > self.max_segments {
            return Err(DriverStatus::INVALID_PARAMETER);
        }
        self.segments = segments;
        self.captures = self.captures.min(segments);
        self.captured = None;
        Ok(self.memory_samples / u64::from(segments))
    }

    fn set_no_of_captures(&mut self, captures: u32) -> DriverResult<()> {
        if captures == 0 || captures > self.segments {
            return Err(DriverStatus::INVALID_PARAMETER);
        }
        self.captures = captures;
        Ok(())
    }

    fn set_simple_trigger(&mut self, trigger: &DeviceTrigger) -> DriverResult<()> {
        log::trace!("sim: set_simple_trigger({trigger:?})");
        self.trigger = Some(*trigger);
        Ok(())
    }

    fn run_block(&mut self, request: &RunBlockRequest, notifier: Option<BlockNotifier>) -> DriverResult<()> {
        if request.total_samples() == 0 || request.segment_index >= self.segments {
            return Err(DriverStatus::INVALID_PARAMETER);
        }
        self.run_count += 1;
        self.notifications.retain(|handle| !handle.is_finished());
        self.armed = Some(*request);
        self.captured = None;
        self.polls_remaining = self.ready_after_polls;

        if let Some(notifier) = notifier {
            let report = self.report(request);
            if report.status.is_ok() {
                self.captured = Some(*request);
            }
            match self.notify_mode {
                NotifyMode::Manual => self.pending = Some(notifier),
                NotifyMode::Thread(delay) => {
                    self.notifications.push(thread::spawn(move || {
                        thread::sleep(delay);
                        notifier.notify(report);
                    }));
                }
            }
        }
        Ok(())
    }

    fn is_ready(&mut self) -> DriverResult<bool> {
        let Some(request) = self.armed else {
            return Ok(self.captured.is_some());
        };
        if self.polls_remaining > 0 {
            self.polls_remaining -= 1;
            return Ok(false);
        }
        self.armed = None;
        if self.block_status.is_ok() {
            self.captured = Some(request);
            Ok(true)
        } else {
            Err(self.block_status)
        }
    }

    fn stop(&mut self) -> DriverResult<()> {
        self.stop_count += 1;
        let armed = self.armed.take();
        if self.complete_on_stop {
            if let (Some(notifier), Some(request)) = (self.pending.take(), armed) {
                notifier.notify(self.report(&request));
            }
        }
        Ok(())
    }

    fn get_values(&mut self, request: &ValuesRequest, targets: &mut [DataTarget<'_>]) -> DriverResult<ValuesReadout> {
        let Some(captured) = self.captured else {
            return Err(DriverStatus::INVALID_PARAMETER);
        };
        if request.to_segment < request.from_segment
            || request.to_segment >= self.captures.max(1) + captured.segment_index
            || request.start_index + request.num_samples > captured.total_samples()
        {
            return Err(DriverStatus::INVALID_PARAMETER);
        }

        let mut transferred = 0;
        for target in targets.iter_mut() {
            if target.downsample.is_empty() || !self.channels[target.channel.index()].enabled {
                return Err(DriverStatus::INVALID_PARAMETER);
            }
            if !(request.from_segment..=request.to_segment).contains(&target.segment) {
                continue;
            }
            transferred = Self::fill(target, request);
        }

        let segments = (request.to_segment - request.from_segment + 1) as usize;
        Ok(ValuesReadout {
            samples_transferred: transferred,
            overflow: vec![self.overflow; segments],
        })
    }
}
