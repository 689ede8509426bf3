use blockscope_rs::{
    ChannelId, ChannelSettings, Coupling, DeviceProfile, DownsampleMode, OverflowFlags, Oscilloscope,
    ResolutionMode, ScopeError, ScopeSettings, SessionState, SimulatedDriver, TimebaseResolver, VoltageRange,
};

fn scope_with(driver: SimulatedDriver) -> Oscilloscope<SimulatedDriver> {
    Oscilloscope::new(driver, DeviceProfile::ps6000a(), ScopeSettings::default()).unwrap()
}

fn dc(range: VoltageRange) -> ChannelSettings {
    ChannelSettings::enabled(Coupling::DC, range)
}

#[test]
fn table_region_matches_exactly() {
    let resolver = TimebaseResolver::new(DeviceProfile::ps6000a().timebase).unwrap();
    assert_eq!(resolver.resolve(800e-12).unwrap(), 2);
    assert_eq!(resolver.resolve(3.2e-9).unwrap(), 4);
    assert_eq!(resolver.interval_for_code(4).unwrap(), 3.2e-9);
    assert_eq!(resolver.resolve(1e-12).unwrap(), 0);
}

#[test]
fn twelve_bit_limits() {
    let mut scope = scope_with(SimulatedDriver::new());
    scope.set_resolution(ResolutionMode::Bits12).unwrap();
    assert_eq!(scope.min_value(), -32736);
    assert_eq!(scope.max_value(), 32736);
    assert_eq!(scope.driver().resolution_code(), Some(1));

    assert!(matches!(
        scope.set_resolution(ResolutionMode::Bits16),
        Err(ScopeError::Validation(_))
    ));
    assert_eq!(scope.resolution(), ResolutionMode::Bits12);
}

#[test]
fn segments_and_captures() {
    let mut scope = scope_with(SimulatedDriver::new());
    let memory = DeviceProfile::ps6000a().memory_samples;
    assert_eq!(scope.memory_segments(100).unwrap(), memory / 100);
    assert_eq!(scope.memory_segments(100).unwrap(), memory / 100);
    scope.set_no_of_captures(100).unwrap();
    assert!(matches!(
        scope.set_no_of_captures(101),
        Err(ScopeError::Validation(_))
    ));
    assert!(matches!(scope.memory_segments(0), Err(ScopeError::Validation(_))));
    assert_eq!(scope.captures(), 100);
    assert_eq!(scope.driver().captures(), 100);
}

#[test]
fn zero_downsample_mode_rejected() {
    let mut scope = scope_with(SimulatedDriver::new());
    scope.set_channel(ChannelId::A, dc(VoltageRange::Volts1)).unwrap();
    let selection = scope.set_sampling_interval(1e-9, 64e-9).unwrap();

    let mut samples = vec![0i16; selection.num_samples as usize];
    let mut binder = scope.buffer_binder().unwrap();
    assert!(matches!(
        binder.bind(ChannelId::A, &mut samples, DownsampleMode::empty(), 0),
        Err(ScopeError::Validation(_))
    ));
    assert!(binder.is_empty());
}

#[test]
fn get_data_only_once_from_ready() {
    let mut scope = scope_with(SimulatedDriver::new().with_ready_after_polls(5));
    scope.set_channel(ChannelId::A, dc(VoltageRange::Volts1)).unwrap();
    let selection = scope.set_sampling_interval(1e-9, 64e-9).unwrap();
    let mut samples = vec![0i16; selection.num_samples as usize];

    scope.run_block().unwrap();
    {
        let mut binder = scope.buffer_binder().unwrap();
        binder.bind(ChannelId::A, &mut samples, DownsampleMode::RAW, 0).unwrap();
        assert!(matches!(
            scope.get_data(&mut binder),
            Err(ScopeError::InvalidState { state: "armed", .. })
        ));

        scope.wait_ready().unwrap();
        assert_eq!(scope.state(), SessionState::Ready);
        scope.get_data(&mut binder).unwrap();
        assert_eq!(scope.state(), SessionState::Idle);
        assert!(matches!(
            scope.get_data(&mut binder),
            Err(ScopeError::InvalidState { .. })
        ));
    }
    for (index, &sample) in samples.iter().enumerate() {
        assert_eq!(sample, SimulatedDriver::expected_sample(ChannelId::A, 0, index as u64));
    }
}

#[test]
fn channel_names_resolve_at_the_boundary() {
    let mut scope = scope_with(SimulatedDriver::new());
    let channel: ChannelId = "c".parse().unwrap();
    scope.set_channel(channel, dc(VoltageRange::Volts2)).unwrap();
    let channel: ChannelId = "3".parse().unwrap();
    scope.set_channel(channel, dc(VoltageRange::Volts2)).unwrap();
    let enabled: Vec<ChannelId> = scope.enabled_channels().into_iter().map(|(id, _)| id).collect();
    assert_eq!(enabled, vec![ChannelId::C, ChannelId::D]);
}

#[test]
fn overflow_is_reported_as_data() {
    let driver = SimulatedDriver::new().with_overflow(OverflowFlags::B);
    let mut scope = scope_with(driver);
    scope.set_channel(ChannelId::A, dc(VoltageRange::Volts1)).unwrap();
    scope.set_channel(ChannelId::B, dc(VoltageRange::MilliVolts100)).unwrap();
    let selection = scope.set_sampling_interval(1e-9, 64e-9).unwrap();

    let len = selection.num_samples as usize;
    let (mut a, mut b) = (vec![0i16; len], vec![0i16; len]);
    scope.run_block().unwrap();
    scope.wait_ready().unwrap();

    let mut binder = scope.buffer_binder().unwrap();
    binder.bind(ChannelId::A, &mut a, DownsampleMode::RAW, 0).unwrap();
    binder.bind(ChannelId::B, &mut b, DownsampleMode::RAW, 0).unwrap();
    let readout = scope.get_data(&mut binder).unwrap();
    assert!(readout.overflowed(ChannelId::B, 0));
    assert!(!readout.overflowed(ChannelId::A, 0));
    assert_eq!(scope.state(), SessionState::Idle);
}

#[test]
fn capacity_error_for_long_captures() {
    let mut scope = scope_with(SimulatedDriver::new());
    for channel in [ChannelId::A, ChannelId::B, ChannelId::C] {
        scope.set_channel(channel, dc(VoltageRange::Volts1)).unwrap();
    }
    scope.memory_segments(1_000_000).unwrap();
    // 4000 samples per segment, a quarter each for three channels.
    let err = scope.set_sampling_interval(6.4e-9, 6.4e-9 * 1001.0).unwrap_err();
    assert!(matches!(
        err,
        ScopeError::Capacity {
            requested: 1001,
            available: 1000
        }
    ));
    scope.set_sampling_interval(6.4e-9, 6.4e-9 * 1000.0).unwrap();
}
