// Rapid block capture example
//
// This example splits device memory into segments, captures one block per
// segment in a single run and reads every capture back in one transfer.
// It runs against the simulated driver, so no hardware is needed.

use blockscope_rs::{
    ChannelId, ChannelSettings, Coupling, DeviceProfile, DownsampleMode, Oscilloscope, ResolutionMode,
    ScopeSettings, SimpleTrigger, SimulatedDriver, VoltageRange,
};
use clap::Parser;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(name = "rapid_block")]
#[command(version = "1.0")]
#[command(about = "Segmented multi-capture acquisition")]
#[command(long_about = "Configure a channel, split memory into segments and capture one triggered block per segment, then print per-segment statistics in volts.")]
struct Args {
    /// Channel to capture, as a letter or index
    #[arg(short, long, default_value = "A")]
    channel: String,

    /// Number of segments, and captures
    #[arg(short, long, default_value_t = 10)]
    segments: u32,

    /// Sample interval in nanoseconds
    #[arg(short, long, default_value_t = 1.0)]
    interval_ns: f64,

    /// Capture duration per segment in microseconds
    #[arg(short, long, default_value_t = 10.0)]
    duration_us: f64,

    /// Vertical resolution in bits
    #[arg(short, long, default_value = "8")]
    resolution: String,

    /// Enable verbose logging
    #[arg(short, long, help = "Show debug information and detailed logs")]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Debug)
            .init();
    } else {
        env_logger::init();
    }

    let channel: ChannelId = args.channel.parse()?;
    let resolution: ResolutionMode = args.resolution.parse()?;

    println!("Rapid Block Capture");
    println!("===================");

    let profile = DeviceProfile::ps6000a();
    let driver = SimulatedDriver::with_profile(&profile);
    let mut scope = Oscilloscope::new(driver, profile, ScopeSettings::default())?;
    println!("✓ Opened simulated {}", scope.profile().model);

    scope.set_resolution(resolution)?;
    scope.set_channel(channel, ChannelSettings::enabled(Coupling::DC, VoltageRange::Volts1))?;
    let per_segment = scope.memory_segments(args.segments)?;
    scope.set_no_of_captures(args.segments)?;
    let timebase = scope.set_sampling_interval(args.interval_ns * 1e-9, args.duration_us * 1e-6)?;
    scope.set_simple_trigger(
        SimpleTrigger::start_capturing_when(channel, 0.0)
            .rising_edge()
            .auto_trigger_after(Duration::from_millis(100))
            .build(),
    )?;

    println!("Resolution: {} (ADC {}..={})", scope.resolution(), scope.min_value(), scope.max_value());
    println!("Segments: {} x {} samples", args.segments, per_segment);
    println!(
        "Timebase: {} ({:.3} ns), {} samples per capture (max {})",
        timebase.code,
        timebase.interval * 1e9,
        timebase.num_samples,
        timebase.max_samples
    );

    let start = Instant::now();
    scope.run_block()?;
    scope.wait_ready()?;
    println!("Captured {} segments in {:?}", args.segments, start.elapsed());

    let num_samples = timebase.num_samples as usize;
    let mut storage = vec![0i16; num_samples * args.segments as usize];
    let readout = scope.get_data_raw_bulk(channel, &mut storage, DownsampleMode::RAW)?;

    let settings = scope.channel(channel);
    let limits = scope.adc_limits();
    for (segment, row) in storage.chunks(num_samples).enumerate() {
        let volts = blockscope_rs::scale_samples(row, settings.range, limits, settings.analog_offset);
        let min = volts.iter().fold(f64::INFINITY, |a, &b| a.min(b));
        let max = volts.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let overflow = if readout.overflowed(channel, segment as u32) { " OVERFLOW" } else { "" };
        println!("  segment {segment:>4}: {min:+.3}V .. {max:+.3}V{overflow}");
    }

    Ok(())
}
