//! Argument parsing for running from the command line

use std::fmt;

use clap::Parser;
use spectool::device::DeviceKind;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Device family to synthesize sweeps for
    #[clap(short, long, value_enum, default_value_t = Device::WispyDbx)]
    pub device: Device,
    /// Index of the sweep profile to use (only variable-sweep devices have more than one)
    #[clap(short, long, default_value_t = 0)]
    pub profile: usize,
    /// Number of sweeps each cache keeps
    #[clap(short, long, default_value_t = 64)]
    pub capacity: usize,
    /// Don't track peaks
    #[clap(long)]
    pub no_peak: bool,
    /// Don't track the average
    #[clap(long)]
    pub no_avg: bool,
    /// Milliseconds between device polls
    #[clap(short, long, default_value_t = 100)]
    pub interval_ms: u64,
    /// Milliseconds between reports
    #[clap(short, long, default_value_t = 1000)]
    pub report_ms: u64,
    /// Seed for the synthetic source
    #[clap(short, long, default_value_t = 0)]
    pub seed: u64,
    /// Stop after this many sweeps (0 runs until interrupted)
    #[clap(short = 'n', long, default_value_t = 0)]
    pub count: usize,
    /// Capacity of the ring between the capture and aggregation threads
    #[clap(long, default_value_t = 256)]
    pub ring: usize,
    /// Comma separated sweep fields to report (defaults to all)
    #[clap(short, long)]
    pub fields: Option<String>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Device {
    WispyGen1,
    Wispy24x,
    WispyDbx,
    UbertoothU1,
}

impl From<Device> for DeviceKind {
    fn from(device: Device) -> Self {
        match device {
            Device::WispyGen1 => DeviceKind::WispyGen1,
            Device::Wispy24x => DeviceKind::Wispy24x,
            Device::WispyDbx => DeviceKind::WispyDbx,
            Device::UbertoothU1 => DeviceKind::UbertoothU1,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Device::WispyGen1 => "wispy-gen1",
            Device::Wispy24x => "wispy24x",
            Device::WispyDbx => "wispy-dbx",
            Device::UbertoothU1 => "ubertooth-u1",
        };
        f.write_str(s)
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}
