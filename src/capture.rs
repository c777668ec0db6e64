//! This module contains the capture and aggregation loops

// The capture thread does one thing: poll the device and hand every completed
// sweep through an rtrb ring buffer to the aggregation thread. The aggregation
// thread owns the sweep bank, so the caches themselves never need a lock.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use spectool::{
    bank::{BankSnapshot, SweepBank},
    device::PollEvent,
    error::DeviceError,
    registry::DeviceHandle,
    sweep::SampleSweep,
};
use tracing::{debug, error, info, warn};

/// Poll the device until it runs dry, `count` sweeps have been taken
/// (0 for no limit), or `running` is cleared. Returns the number of sweeps
/// handed off.
///
/// The device is left open. The reporter still needs it for the device line
/// of the final batch, so the caller closes it once reporting is done.
pub fn capture_sweeps(
    handle: DeviceHandle,
    mut producer: rtrb::Producer<SampleSweep>,
    running: Arc<AtomicBool>,
    interval: Duration,
    count: usize,
) -> usize {
    let mut sent = 0usize;
    let mut dropped = 0usize;
    while running.load(Ordering::Relaxed) {
        let event = handle.lock().poll();
        match event {
            Ok(PollEvent::SweepComplete) => {
                let sweep = handle.lock().latest_sweep().cloned();
                if let Some(sweep) = sweep {
                    // Drop rather than stall the device
                    if producer.push(sweep).is_err() {
                        dropped += 1;
                        warn!(dropped, "Sweep ring full, dropping sweep");
                    } else {
                        sent += 1;
                    }
                }
                if count != 0 && sent >= count {
                    break;
                }
            }
            Ok(PollEvent::Configured) => {
                let device = handle.lock();
                info!(
                    device = device.name(),
                    profile = %device.profile().name,
                    "Device configured"
                );
                // Configuring doesn't need pacing
                continue;
            }
            Ok(PollEvent::Idle) => {}
            Err(DeviceError::Exhausted) => {
                info!("Source exhausted");
                break;
            }
            Err(e) => {
                error!("Polling device failed - {}", e);
                break;
            }
        }
        thread::sleep(interval);
    }
    debug!(sent, dropped, "Capture finished");
    sent
}

/// Feed every sweep from the ring into the bank, sending a snapshot every
/// `report_every`. Runs until the capture side hangs up and the ring is drained,
/// then sends one last snapshot and gives the bank back.
pub fn aggregate(
    mut consumer: rtrb::Consumer<SampleSweep>,
    mut bank: SweepBank,
    sender: Sender<Vec<BankSnapshot>>,
    report_every: Duration,
) -> SweepBank {
    let mut last_report = Instant::now();
    loop {
        match consumer.pop() {
            Ok(sweep) => {
                if let Err(e) = bank.append(&sweep) {
                    warn!("Dropping sweep - {}", e);
                }
            }
            Err(_) => {
                if consumer.is_abandoned() && consumer.is_empty() {
                    break;
                }
                thread::sleep(Duration::from_millis(1));
            }
        }
        if last_report.elapsed() >= report_every {
            last_report = Instant::now();
            // We don't care if the reporter is behind
            let _ = sender.try_send(bank.snapshot());
        }
    }
    if sender.send(bank.snapshot()).is_err() {
        debug!("Reporter gone before final snapshot");
    }
    bank
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use spectool::{
        bank::BankConfig,
        device::{DeviceKind, DeviceState, ReplaySource, SweepSource},
    };

    fn replay(n: usize) -> DeviceHandle {
        let profile = DeviceKind::UbertoothU1.profiles().remove(0);
        let sweeps = (0..n).map(|i| {
            let mut s = profile.blank_sweep();
            s.samples[0] = i as u8;
            s
        });
        let mut src = ReplaySource::new(DeviceKind::UbertoothU1, 1, sweeps);
        src.open().unwrap();
        let boxed: Box<dyn SweepSource> = Box::new(src);
        Arc::new(Mutex::new(boxed))
    }

    #[test]
    fn test_pipeline_drains() {
        let (producer, consumer) = rtrb::RingBuffer::new(16);
        let (sender, receiver) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let sent = capture_sweeps(replay(5), producer, running, Duration::ZERO, 0);
        assert_eq!(sent, 5);

        let bank = SweepBank::new(1, BankConfig::default()).unwrap();
        let bank = aggregate(consumer, bank, sender, Duration::from_secs(3600));
        assert_eq!(bank.len(), 1);
        let snaps: Vec<_> = receiver.try_iter().collect();
        let last = snaps.last().unwrap();
        assert_eq!(last[0].sweeps, 5);
        assert_eq!(last[0].peak.as_ref().unwrap().samples[0], 4);
    }

    #[test]
    fn test_capture_count_limit() {
        let (producer, mut consumer) = rtrb::RingBuffer::new(16);
        let running = Arc::new(AtomicBool::new(true));
        assert_eq!(capture_sweeps(replay(10), producer, running, Duration::ZERO, 3), 3);
        assert_eq!(consumer.slots(), 3);
        assert_eq!(consumer.pop().unwrap().samples[0], 0);
    }

    #[test]
    fn test_capture_leaves_device_open() {
        let (producer, _consumer) = rtrb::RingBuffer::new(16);
        let running = Arc::new(AtomicBool::new(true));
        let handle = replay(2);
        capture_sweeps(handle.clone(), producer, running, Duration::ZERO, 0);
        assert_eq!(handle.lock().state(), DeviceState::Running);
    }

    #[test]
    fn test_capture_stops_when_told() {
        let (producer, _consumer) = rtrb::RingBuffer::new(16);
        let running = Arc::new(AtomicBool::new(false));
        assert_eq!(capture_sweeps(replay(10), producer, running, Duration::ZERO, 0), 0);
    }
}
