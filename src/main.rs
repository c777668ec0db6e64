use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use anyhow::Context;
use clap::Parser;
use crossbeam_channel::bounded;
use spectool::{
    bank::{BankConfig, SweepBank},
    device::{DeviceKind, SweepSource, SyntheticSource},
    protocol::{parse_fields, SweepField},
    registry::DeviceRegistry,
};
use tracing::info;

mod args;
mod capture;
mod monitoring;

use args::{convert_filter, Args};

// Device id given to the synthetic source
const DEVICE_ID: u32 = 1;
// Snapshots waiting for the reporter
const REPORT_BACKLOG: usize = 16;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .with_writer(io::stderr)
        .init();

    let fields = match &args.fields {
        Some(list) => parse_fields::<SweepField>(list)?,
        None => SweepField::ALL.to_vec(),
    };
    let config = BankConfig {
        capacity: args.capacity,
        calc_peak: !args.no_peak,
        calc_avg: !args.no_avg,
    };
    let bank = SweepBank::new(DEVICE_ID, config)?;

    // Setup the device
    let kind = DeviceKind::from(args.device);
    let mut source = SyntheticSource::new(kind, DEVICE_ID, args.seed);
    if args.profile != 0 {
        source
            .set_profile(args.profile)
            .with_context(|| format!("Selecting profile {} on {}", args.profile, kind))?;
    }
    source.open()?;
    let mut registry = DeviceRegistry::new();
    let handle = registry.register(Box::new(source));

    // Stop everything on ctrl-c
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || r.store(false, Ordering::Relaxed))?;

    // Setup multithreading
    let (producer, consumer) = rtrb::RingBuffer::new(args.ring);
    let (sender, receiver) = bounded(REPORT_BACKLOG);

    let capture_handle = handle.clone();
    let interval = Duration::from_millis(args.interval_ms);
    let count = args.count;
    let capture_thread = thread::spawn(move || {
        capture::capture_sweeps(capture_handle, producer, running, interval, count)
    });

    let report_every = Duration::from_millis(args.report_ms);
    let aggregate_thread =
        thread::spawn(move || capture::aggregate(consumer, bank, sender, report_every));

    let report_handle = handle.clone();
    let report_thread = thread::spawn(move || {
        monitoring::report(receiver, report_handle, &fields, io::stdout().lock())
    });

    let sent = capture_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Capture thread panicked"))?;
    let bank = aggregate_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Aggregation thread panicked"))?;
    let batches = report_thread
        .join()
        .map_err(|_| anyhow::anyhow!("Report thread panicked"))??;
    handle.lock().close()?;

    info!(
        sweeps = sent,
        caches = bank.len(),
        reports = batches,
        devices = registry.len(),
        "Done"
    );
    Ok(())
}
