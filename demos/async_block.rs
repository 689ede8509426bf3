// Callback-driven block capture example
//
// Arms repeated captures in notify mode. The completion handler only records
// the result; reading and converting the data happens on the main thread.

use blockscope_rs::{
    BlockCompletion, ChannelId, ChannelSettings, Coupling, DeviceProfile, DownsampleMode, Oscilloscope,
    ScopeSettings, SimulatedDriver, VoltageRange,
};
use clap::Parser;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "async_block")]
#[command(version = "1.0")]
#[command(about = "Block captures completed by notification")]
struct Args {
    /// Number of capture cycles
    #[arg(short, long, default_value_t = 5)]
    cycles: u32,

    /// Sample interval in nanoseconds
    #[arg(short, long, default_value_t = 3.2)]
    interval_ns: f64,

    /// Capture duration in microseconds
    #[arg(short, long, default_value_t = 1.0)]
    duration_us: f64,

    /// Enable verbose logging
    #[arg(short, long)]
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

    println!("Async Block Capture");
    println!("===================\n");

    let driver = SimulatedDriver::new().with_notify_delay(Duration::from_millis(5));
    let mut scope = Oscilloscope::new(driver, DeviceProfile::ps6000a(), ScopeSettings::default())?;
    scope.set_channel(ChannelId::A, ChannelSettings::enabled(Coupling::DC, VoltageRange::Volts1))?;
    scope.set_channel(ChannelId::B, ChannelSettings::enabled(Coupling::AC, VoltageRange::MilliVolts500))?;
    let timebase = scope.set_sampling_interval(args.interval_ns * 1e-9, args.duration_us * 1e-6)?;
    println!(
        "Timebase {} ({:.2} ns), {} samples\n",
        timebase.code,
        timebase.interval * 1e9,
        timebase.num_samples
    );

    let (tx, rx) = crossbeam_channel::unbounded::<BlockCompletion>();
    for _ in 0..args.cycles {
        let tx = tx.clone();
        scope.run_block_with_callback(Some(Box::new(move |completion: BlockCompletion| {
            // Runs on the driver's thread: hand off and return.
            let _ = tx.send(completion);
        })))?;

        let completion = rx.recv_timeout(Duration::from_secs(5))?;
        if !completion.is_ok() {
            println!("Cycle {} failed with status {}", completion.cycle, completion.status);
            continue;
        }
        scope.wait_ready()?;

        let num_samples = timebase.num_samples as usize;
        let mut a = vec![0i16; num_samples];
        let mut b = vec![0i16; num_samples];
        let mut binder = scope.buffer_binder()?;
        binder.bind(ChannelId::A, &mut a, DownsampleMode::RAW, 0)?;
        binder.bind(ChannelId::B, &mut b, DownsampleMode::RAW, 0)?;
        scope.get_data(&mut binder)?;

        let frame = scope.to_dataframe(&binder, 0)?;
        println!("Cycle {}: {} samples captured", completion.cycle, completion.samples_captured);
        println!("{}", frame.head(Some(5)));
    }

    let mut driver = scope.teardown();
    driver.join_notifications();
    Ok(())
}
