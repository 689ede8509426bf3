//! # BlockScope RS
//!
//! Block-mode acquisition control for oscilloscopes with segmented sample
//! memory.
//!
//! This library turns physical requests (seconds per sample, capture
//! duration, volts, resolution bits) into the device-native codes a vendor
//! driver understands, partitions device memory for rapid block captures and
//! drives each capture from arm to readback, either by polling or through a
//! one-shot completion notification.
//!
//! ## Features
//!
//! - **Timebase translation**: table plus linear-region lookup that always
//!   picks the fastest timebase not faster than requested
//! - **Resolution tracking**: ADC limits follow the active resolution mode
//! - **Rapid block**: memory segmentation and multi-capture readback
//! - **Zero-copy readback**: samples land directly in caller buffers
//! - **Two completion modes**: cancellable polling or a notification handler
//! - **DataFrame output**: captures convert to `polars` frames in volts
//! - **Device profiles**: per-model constants are data, not code
//!
//! ## Examples
//!
//! ### Single block capture
//!
//! ```rust
//! use blockscope_rs::{
//!     ChannelId, ChannelSettings, Coupling, DeviceProfile, DownsampleMode, Oscilloscope,
//!     ScopeSettings, SimulatedDriver, VoltageRange,
//! };
//!
//! let mut scope = Oscilloscope::new(
//!     SimulatedDriver::new(),
//!     DeviceProfile::ps6000a(),
//!     ScopeSettings::default(),
//! )?;
//! scope.set_channel(ChannelId::A, ChannelSettings::enabled(Coupling::DC, VoltageRange::Volts1))?;
//! let timebase = scope.set_sampling_interval(3.2e-9, 320e-9)?;
//! assert_eq!(timebase.code, 4);
//!
//! scope.run_block()?;
//! scope.wait_ready()?;
//!
//! let mut samples = vec![0i16; timebase.num_samples as usize];
//! let mut binder = scope.buffer_binder()?;
//! binder.bind(ChannelId::A, &mut samples, DownsampleMode::RAW, 0)?;
//! let readout = scope.get_data(&mut binder)?;
//! println!("{} samples at {:e} s", readout.samples, readout.interval);
//! # Ok::<(), blockscope_rs::ScopeError>(())
//! ```
//!
//! ### Timebase lookup
//!
//! ```rust
//! use blockscope_rs::{DeviceProfile, TimebaseResolver};
//!
//! let resolver = TimebaseResolver::new(DeviceProfile::ps6000a().timebase)?;
//! assert_eq!(resolver.resolve(800e-12)?, 2);
//! assert_eq!(resolver.resolve(10e-9)?, 6);
//! # Ok::<(), blockscope_rs::ScopeError>(())
//! ```

pub mod acquisition;
pub mod buffers;
pub mod channel;
pub mod driver;
pub mod error;
pub mod frame;
pub mod profile;
pub mod resolution;
pub mod scope;
pub mod segments;
pub mod sim;
pub mod timebase;
pub mod trigger_config;
pub mod unit_converter;

pub use acquisition::{
    AcquisitionController, AcquisitionSession, ArmMode, BlockCompletion, BlockNotifier, CancelToken,
    CompletionHandler, CompletionReceiver, SessionState,
};
pub use buffers::{BoundBuffer, BufferBinder, BufferGeometry, BufferKey, DownsampleMode};
pub use channel::{ChannelId, ChannelSettings, Coupling, VoltageRange};
pub use driver::{
    BlockReport, DataTarget, DeviceTrigger, DriverResult, OverflowFlags, RunBlockRequest, ScopeDriver,
    TimebaseInfo, ValuesReadout, ValuesRequest,
};
pub use error::{DeviceFault, DriverStatus, FaultKind, Result, ScopeError};
pub use frame::capture_to_dataframe;
pub use profile::{DeviceProfile, ScopeSettings};
pub use resolution::{AdcLimits, ResolutionEntry, ResolutionManager, ResolutionMode};
pub use scope::{DataReadout, Oscilloscope};
pub use segments::MemorySegmenter;
pub use sim::SimulatedDriver;
pub use timebase::{TimebaseResolver, TimebaseSelection, TimebaseTable};
pub use trigger_config::{SimpleTrigger, SimpleTriggerBuilder, ThresholdDirection};
pub use unit_converter::{adc_to_volts, scale_samples, volts_to_adc};
