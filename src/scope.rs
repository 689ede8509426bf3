//! The caller-facing instrument: configuration setters, block capture and
//! readback, with every rule checked before the device is touched.

use polars::prelude::DataFrame;

use crate::acquisition::{
    AcquisitionController, AcquisitionSession, ArmMode, CancelToken, CompletionHandler, CompletionReceiver,
    SessionState,
};
use crate::buffers::{BufferBinder, BufferGeometry, DownsampleMode};
use crate::channel::{ChannelId, ChannelSettings};
use crate::driver::{DriverResult, OverflowFlags, RunBlockRequest, ScopeDriver, ValuesRequest};
use crate::error::{DeviceFault, FaultKind, ScopeError};
use crate::frame::{capture_to_dataframe, FrameScale};
use crate::profile::{DeviceProfile, ScopeSettings};
use crate::resolution::{AdcLimits, ResolutionManager, ResolutionMode};
use crate::segments::MemorySegmenter;
use crate::timebase::{TimebaseResolver, TimebaseSelection};
use crate::trigger_config::SimpleTrigger;

fn device<T>(result: DriverResult<T>, context: &'static str) -> Result<T, ScopeError> {
    result.map_err(|status| DeviceFault::new(FaultKind::Driver, status, context).into())
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct SamplingRequest {
    interval: f64,
    duration: f64,
}

/// What the armed cycle was started with. Readback is checked against it.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ArmedCapture {
    request: RunBlockRequest,
    geometry: BufferGeometry,
    captures: u32,
    interval: f64,
}

/// Result of one transfer into bound buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct DataReadout {
    /// Samples written into each bound buffer.
    pub samples: u64,
    /// Achieved sample interval in seconds.
    pub interval: f64,
    pub from_segment: u32,
    /// One entry per segment starting at `from_segment`.
    pub overflow: Vec<OverflowFlags>,
}

impl DataReadout {
    pub fn overflow_for(&self, segment: u32) -> Option<OverflowFlags> {
        let offset = segment.checked_sub(self.from_segment)?;
        self.overflow.get(offset as usize).copied()
    }

    pub fn overflowed(&self, channel: ChannelId, segment: u32) -> bool {
        self.overflow_for(segment)
            .is_some_and(|flags| flags.overflowed(channel))
    }

    /// Time of sample `index` relative to the start of its segment.
    pub fn time_of(&self, index: u64) -> f64 {
        index as f64 * self.interval
    }
}

/// A block-mode oscilloscope session over some [`ScopeDriver`].
#[derive(Debug)]
pub struct Oscilloscope<D: ScopeDriver> {
    driver: D,
    profile: DeviceProfile,
    settings: ScopeSettings,
    resolver: TimebaseResolver,
    resolution: ResolutionManager,
    segmenter: MemorySegmenter,
    channels: [ChannelSettings; 8],
    trigger: Option<SimpleTrigger>,
    sampling: Option<SamplingRequest>,
    selection: Option<TimebaseSelection>,
    controller: AcquisitionController,
    cancel: CancelToken,
    armed: Option<ArmedCapture>,
}

impl<D: ScopeDriver> Oscilloscope<D> {
    /// Take over an opened device. Pushes the profile's initial resolution and
    /// a single memory segment, so host and device start out in agreement.
    pub fn new(mut driver: D, profile: DeviceProfile, settings: ScopeSettings) -> Result<Self, ScopeError> {
        if profile.channel_count == 0 || profile.channel_count > ChannelId::ALL.len() {
            return Err(ScopeError::configuration(format!(
                "unsupported channel count {}",
                profile.channel_count
            )));
        }
        if !(0.0..=1.0).contains(&settings.pre_trigger_ratio) {
            return Err(ScopeError::configuration(format!(
                "pre-trigger ratio {} outside 0..=1",
                settings.pre_trigger_ratio
            )));
        }
        let resolver = TimebaseResolver::new(profile.timebase.clone())?;
        let resolution = ResolutionManager::new(profile.resolutions.clone())?;
        let segmenter = MemorySegmenter::new(profile.memory_samples, profile.max_segments);

        device(driver.set_resolution(resolution.active().device_code), "set_resolution")?;
        let device_samples = device(driver.set_memory_segments(1), "set_memory_segments")?;
        log::debug!(
            "{} ready: {} channels, {} samples of memory ({device_samples} reported), {}",
            profile.model,
            profile.channel_count,
            profile.memory_samples,
            resolution.resolution()
        );

        Ok(Self {
            driver,
            controller: AcquisitionController::new(settings.poll_interval),
            profile,
            settings,
            resolver,
            resolution,
            segmenter,
            channels: [ChannelSettings::disabled(); 8],
            trigger: None,
            sampling: None,
            selection: None,
            cancel: CancelToken::new(),
            armed: None,
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn settings(&self) -> &ScopeSettings {
        &self.settings
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Release the device, stopping any capture still in flight.
    pub fn teardown(mut self) -> D {
        if let Err(e) = self.controller.stop(&mut self.driver) {
            log::debug!("Ignoring failure to stop during teardown: {e}");
        }
        self.driver
    }

    // ----- channels -----

    fn check_channel(&self, channel: ChannelId) -> Result<(), ScopeError> {
        if channel.index() >= self.profile.channel_count {
            return Err(ScopeError::validation(format!(
                "channel {channel} not available on a {}-channel {}",
                self.profile.channel_count, self.profile.model
            )));
        }
        Ok(())
    }

    pub fn set_channel(&mut self, channel: ChannelId, settings: ChannelSettings) -> Result<(), ScopeError> {
        self.controller.ensure_configurable("set_channel")?;
        self.check_channel(channel)?;
        if settings.enabled {
            if !self.profile.voltage_ranges.contains(&settings.range) {
                return Err(ScopeError::validation(format!(
                    "range {} V not supported by {}",
                    settings.range.volts(),
                    self.profile.model
                )));
            }
            if !settings.analog_offset.is_finite() || settings.analog_offset.abs() > settings.range.volts() {
                return Err(ScopeError::validation(format!(
                    "analog offset {} V outside the +/-{} V range",
                    settings.analog_offset,
                    settings.range.volts()
                )));
            }
        }

        let mut channels = self.channels;
        channels[channel.index()] = settings;
        let enabled = channels.iter().filter(|c| c.enabled).count();
        let selection = self.reselect(enabled, self.resolution.resolution(), self.segmenter.samples_per_segment())?;

        device(self.driver.set_channel(channel, &settings), "set_channel")?;
        log::debug!("Channel {channel}: {settings:?}");
        self.channels = channels;
        self.selection = selection;
        Ok(())
    }

    pub fn channel(&self, channel: ChannelId) -> ChannelSettings {
        self.channels[channel.index()]
    }

    pub fn enabled_channels(&self) -> Vec<(ChannelId, ChannelSettings)> {
        ChannelId::ALL
            .iter()
            .take(self.profile.channel_count)
            .map(|&channel| (channel, self.channels[channel.index()]))
            .filter(|(_, settings)| settings.enabled)
            .collect()
    }

    fn enabled_count(&self) -> usize {
        self.channels.iter().filter(|c| c.enabled).count()
    }

    // ----- resolution -----

    pub fn set_resolution(&mut self, mode: ResolutionMode) -> Result<(), ScopeError> {
        self.controller.ensure_configurable("set_resolution")?;
        let mut next = self.resolution.clone();
        next.set_resolution(mode)?;
        let selection = self.reselect(self.enabled_count(), mode, self.segmenter.samples_per_segment())?;

        device(self.driver.set_resolution(next.active().device_code), "set_resolution")?;
        self.resolution = next;
        self.selection = selection;
        Ok(())
    }

    pub fn resolution(&self) -> ResolutionMode {
        self.resolution.resolution()
    }

    pub fn adc_limits(&self) -> AdcLimits {
        self.resolution.limits()
    }

    pub fn min_value(&self) -> i16 {
        self.resolution.min_value()
    }

    pub fn max_value(&self) -> i16 {
        self.resolution.max_value()
    }

    // ----- timebase -----

    /// Recompute the active selection for a configuration change, before the
    /// change is applied. No channel enabled leaves the timebase unresolved.
    fn reselect(
        &self,
        enabled: usize,
        resolution: ResolutionMode,
        segment_samples: u64,
    ) -> Result<Option<TimebaseSelection>, ScopeError> {
        match self.sampling {
            Some(sampling) if enabled > 0 => self
                .resolver
                .compute_timebase(sampling.interval, sampling.duration, enabled, resolution, segment_samples)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Ask the device to confirm a selection. Its answer may only narrow it.
    fn confirm_timebase(&mut self, mut selection: TimebaseSelection) -> Result<TimebaseSelection, ScopeError> {
        let info = device(
            self.driver.get_timebase(selection.code, selection.num_samples, 0),
            "get_timebase",
        )?;
        if info.max_samples < selection.num_samples {
            return Err(ScopeError::Capacity {
                requested: selection.num_samples,
                available: info.max_samples,
            });
        }
        selection.max_samples = selection.max_samples.min(info.max_samples);

        let reported = info.interval_ps * 1e-12;
        if reported.is_finite() && reported > 0.0 && (reported - selection.interval).abs() > selection.interval * 1e-6 {
            log::warn!(
                "Device reports {reported:e} s for timebase {}, expected {:e} s",
                selection.code,
                selection.interval
            );
            selection.interval = reported;
        }
        Ok(selection)
    }

    /// Choose the timebase for `interval` seconds per sample and size the
    /// capture to cover `duration` seconds.
    pub fn set_sampling_interval(&mut self, interval: f64, duration: f64) -> Result<TimebaseSelection, ScopeError> {
        self.controller.ensure_configurable("set_sampling_interval")?;
        let selection = self.resolver.compute_timebase(
            interval,
            duration,
            self.enabled_count(),
            self.resolution.resolution(),
            self.segmenter.samples_per_segment(),
        )?;
        let selection = self.confirm_timebase(selection)?;

        self.sampling = Some(SamplingRequest { interval, duration });
        self.selection = Some(selection);
        Ok(selection)
    }

    pub fn timebase(&self) -> Option<TimebaseSelection> {
        self.selection
    }

    pub fn timestep_for_timebase(&self, code: u32) -> Result<f64, ScopeError> {
        self.resolver.interval_for_code(code)
    }

    pub fn timebase_for_interval(&self, interval: f64) -> Result<u32, ScopeError> {
        self.resolver.resolve(interval)
    }

    // ----- trigger -----

    /// Validated now against the current channel setup; programmed at arm.
    pub fn set_simple_trigger(&mut self, trigger: SimpleTrigger) -> Result<(), ScopeError> {
        self.controller.ensure_configurable("set_simple_trigger")?;
        self.check_channel(trigger.source)?;
        trigger.to_device(&self.channels[trigger.source.index()], self.resolution.limits())?;
        self.trigger = Some(trigger);
        Ok(())
    }

    pub fn disable_trigger(&mut self) -> Result<(), ScopeError> {
        self.controller.ensure_configurable("disable_trigger")?;
        self.trigger = None;
        Ok(())
    }

    pub fn trigger(&self) -> Option<SimpleTrigger> {
        self.trigger
    }

    // ----- segments -----

    /// Split device memory into `segments` equal parts. Destroys any capture
    /// still held in the old segments.
    pub fn memory_segments(&mut self, segments: u32) -> Result<u64, ScopeError> {
        self.controller.ensure_configurable("memory_segments")?;
        let per_segment = self.segmenter.capacity_for(segments)?;
        let selection = self.reselect(self.enabled_count(), self.resolution.resolution(), per_segment)?;

        let reported = device(self.driver.set_memory_segments(segments), "set_memory_segments")?;
        if reported != per_segment {
            log::debug!("Device reports {reported} samples per segment, profile gives {per_segment}");
        }
        self.controller.discard()?;
        self.armed = None;
        self.segmenter.set_segments(segments)?;
        self.selection = selection;
        log::debug!(
            "{segments} segment(s) of {per_segment} samples, {} capture(s)",
            self.segmenter.captures()
        );
        Ok(per_segment)
    }

    pub fn set_no_of_captures(&mut self, captures: u32) -> Result<(), ScopeError> {
        self.controller.ensure_configurable("set_no_of_captures")?;
        let mut next = self.segmenter.clone();
        next.set_capture_count(captures)?;
        device(self.driver.set_no_of_captures(captures), "set_no_of_captures")?;
        self.segmenter = next;
        Ok(())
    }

    pub fn segments(&self) -> u32 {
        self.segmenter.segments()
    }

    pub fn captures(&self) -> u32 {
        self.segmenter.captures()
    }

    pub fn samples_per_segment(&self) -> u64 {
        self.segmenter.samples_per_segment()
    }

    // ----- capture -----

    pub fn state(&self) -> SessionState {
        self.controller.state()
    }

    pub fn session(&self) -> AcquisitionSession {
        self.controller.session().clone()
    }

    /// Shares the abort signal used by [`Self::wait_ready`].
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn arm(&mut self, mode: ArmMode) -> Result<Option<CompletionReceiver>, ScopeError> {
        if self.settings.discard_unread_on_rearm {
            self.controller.discard()?;
        }
        match self.controller.state() {
            SessionState::Idle | SessionState::Error => {}
            state => {
                return Err(ScopeError::InvalidState {
                    operation: "run_block",
                    state: state.as_str(),
                })
            }
        }
        if self.enabled_count() == 0 {
            return Err(ScopeError::configuration("no channel is enabled"));
        }
        let selection = self
            .selection
            .ok_or_else(|| ScopeError::configuration("sampling interval not set"))?;

        let device_trigger = match &self.trigger {
            Some(trigger) => trigger.to_device(&self.channels[trigger.source.index()], self.resolution.limits())?,
            None => SimpleTrigger::disabled_device_trigger(),
        };
        let selection = self.confirm_timebase(selection)?;
        device(self.driver.set_simple_trigger(&device_trigger), "set_simple_trigger")?;

        let pre_trigger_samples =
            ((selection.num_samples as f64 * self.settings.pre_trigger_ratio).round() as u64).min(selection.num_samples);
        let request = RunBlockRequest {
            pre_trigger_samples,
            post_trigger_samples: selection.num_samples - pre_trigger_samples,
            timebase: selection.code,
            segment_index: 0,
        };
        let armed = ArmedCapture {
            request,
            geometry: self.geometry(selection),
            captures: self.segmenter.captures(),
            interval: selection.interval,
        };

        self.cancel.reset();
        self.armed = None;
        let receiver = self.controller.arm(&mut self.driver, &request, mode)?;
        self.selection = Some(selection);
        self.armed = Some(armed);
        Ok(receiver)
    }

    /// Start a capture to be waited on with [`Self::wait_ready`].
    #[tracing::instrument(skip_all)]
    pub fn run_block(&mut self) -> Result<(), ScopeError> {
        self.arm(ArmMode::Blocking).map(|_| ())
    }

    /// Start a capture completed by the device's notification. `handler`
    /// runs on the notifying thread; the receiver yields the same completion.
    #[tracing::instrument(skip_all)]
    pub fn run_block_with_callback(
        &mut self,
        handler: Option<CompletionHandler>,
    ) -> Result<CompletionReceiver, ScopeError> {
        self.arm(ArmMode::Notify(handler))?
            .ok_or_else(|| ScopeError::configuration("notify mode produced no completion channel"))
    }

    #[tracing::instrument(skip_all)]
    pub fn wait_ready(&mut self) -> Result<(), ScopeError> {
        let cancel = self.cancel.clone();
        self.controller
            .wait_ready(&mut self.driver, &cancel, self.settings.wait_timeout)
    }

    pub fn wait_ready_with(
        &mut self,
        cancel: &CancelToken,
        timeout: Option<std::time::Duration>,
    ) -> Result<(), ScopeError> {
        self.controller.wait_ready(&mut self.driver, cancel, timeout)
    }

    pub fn stop(&mut self) -> Result<(), ScopeError> {
        self.controller.stop(&mut self.driver)
    }

    /// Acknowledge that a completed capture will not be read.
    pub fn discard_unread(&mut self) -> Result<(), ScopeError> {
        self.controller.discard()
    }

    // ----- readback -----

    fn geometry(&self, selection: TimebaseSelection) -> BufferGeometry {
        BufferGeometry {
            num_samples: selection.num_samples,
            segments: self.segmenter.segments(),
            resolution_generation: self.resolution.generation(),
        }
    }

    /// Empty binder sized for the current configuration.
    pub fn buffer_binder<'buf>(&self) -> Result<BufferBinder<'buf>, ScopeError> {
        let selection = self
            .selection
            .ok_or_else(|| ScopeError::configuration("sampling interval not set"))?;
        Ok(BufferBinder::new(self.geometry(selection)))
    }

    fn check_binder(&self, binder: &BufferBinder<'_>) -> Result<(), ScopeError> {
        let geometry = binder.geometry();
        if geometry.resolution_generation != self.resolution.generation() {
            return Err(ScopeError::validation(
                "resolution changed since buffers were bound, rebind them",
            ));
        }
        if let Some(armed) = &self.armed {
            if geometry != armed.geometry {
                return Err(ScopeError::validation(format!(
                    "buffers bound for {} samples x {} segments, capture has {} x {}",
                    geometry.num_samples, geometry.segments, armed.geometry.num_samples, armed.geometry.segments
                )));
            }
        }
        Ok(())
    }

    /// Transfer the completed capture into `binder`. Valid once per cycle.
    pub fn get_data(&mut self, binder: &mut BufferBinder<'_>) -> Result<DataReadout, ScopeError> {
        self.get_data_downsampled(binder, 1)
    }

    #[tracing::instrument(skip_all, fields(ratio = downsample_ratio))]
    pub fn get_data_downsampled(
        &mut self,
        binder: &mut BufferBinder<'_>,
        downsample_ratio: u64,
    ) -> Result<DataReadout, ScopeError> {
        #[cfg(feature = "cpu-profiling")]
        let _span = tracy_client::Client::running()
            .map(|client| client.span(tracy_client::span_location!("get_data"), 0));

        let Some(armed) = self.armed else {
            return Err(ScopeError::InvalidState {
                operation: "get_data",
                state: self.state().as_str(),
            });
        };
        if downsample_ratio == 0 {
            return Err(ScopeError::validation("downsample ratio must be at least 1"));
        }
        self.check_binder(binder)?;
        let Some((from_segment, to_segment)) = binder.segment_span() else {
            return Err(ScopeError::validation("no buffers bound"));
        };
        if to_segment >= armed.captures {
            return Err(ScopeError::validation(format!(
                "segment {to_segment} was not captured, only {} capture(s) armed",
                armed.captures
            )));
        }
        if let Some(bound) = binder.bindings().find(|bound| !self.channels[bound.key.channel.index()].enabled) {
            return Err(ScopeError::configuration(format!(
                "buffer bound to disabled channel {}",
                bound.key.channel
            )));
        }

        let request = ValuesRequest {
            start_index: 0,
            num_samples: armed.request.total_samples(),
            downsample_ratio,
            from_segment,
            to_segment,
        };
        let readout = self.controller.get_data(&mut self.driver, binder, &request)?;
        Ok(DataReadout {
            samples: readout.samples_transferred,
            interval: armed.interval * downsample_ratio as f64,
            from_segment,
            overflow: readout.overflow,
        })
    }

    /// Read every capture of `channel` at once. `storage` is split into one
    /// row per capture of `storage.len() / captures` samples, each at least
    /// the capture length. Samples fill the start of each row.
    pub fn get_data_raw_bulk(
        &mut self,
        channel: ChannelId,
        storage: &mut [i16],
        downsample: DownsampleMode,
    ) -> Result<DataReadout, ScopeError> {
        let Some(armed) = self.armed else {
            return Err(ScopeError::InvalidState {
                operation: "get_data_raw_bulk",
                state: self.state().as_str(),
            });
        };
        let stride = storage.len() / armed.captures.max(1) as usize;
        let mut binder = BufferBinder::new(armed.geometry);
        binder.bind_bulk(channel, storage, stride, armed.captures, downsample)?;
        self.get_data(&mut binder)
    }

    /// Samples of `segment` in `binder` as a `DataFrame` with time and volts.
    pub fn to_dataframe(&self, binder: &BufferBinder<'_>, segment: u32) -> Result<DataFrame, ScopeError> {
        self.check_binder(binder)?;
        let interval = match (&self.armed, &self.selection) {
            (Some(armed), _) => armed.interval,
            (None, Some(selection)) => selection.interval,
            (None, None) => return Err(ScopeError::configuration("sampling interval not set")),
        };
        let channels = self.enabled_channels();
        let scale = FrameScale {
            interval,
            num_samples: binder.geometry().num_samples,
            limits: self.resolution.limits(),
            channels: &channels,
        };
        Ok(capture_to_dataframe(binder, segment, &scale)?)
    }
}
