//! In this module, we implement the reporting side of the pipeline.
//! Snapshots of the sweep bank come in over a channel and go out as protocol
//! lines on stdout, with a short summary of each cache in the log.

use std::io::{self, Write};

use crossbeam_channel::Receiver;
use spectool::{
    bank::BankSnapshot,
    protocol::{encode_device, encode_sweep, DeviceField, SweepField},
    registry::DeviceHandle,
};
use tracing::{info, warn};

/// Summarize one cache for the log
fn summarize(snap: &BankSnapshot) {
    let strongest = snap
        .average
        .as_ref()
        .and_then(|avg| avg.strongest().map(|(i, dbm)| (avg.bin_khz(i), dbm)));
    match strongest {
        Some((khz, dbm)) => info!(
            device_id = snap.device_id,
            geometry = %snap.geometry,
            sweeps = snap.sweeps,
            "Strongest average bin {:.0} kHz at {:.1} dBm",
            khz,
            dbm
        ),
        None => info!(
            device_id = snap.device_id,
            geometry = %snap.geometry,
            sweeps = snap.sweeps,
            "No average yet"
        ),
    }
}

/// Write a device line followed by one sweep line per cache, for every batch
/// of snapshots until the aggregation side hangs up
pub fn report<W: Write>(
    receiver: Receiver<Vec<BankSnapshot>>,
    handle: DeviceHandle,
    fields: &[SweepField],
    mut out: W,
) -> io::Result<usize> {
    let mut batches = 0;
    for snaps in receiver {
        let device_line = encode_device(&**handle.lock(), &DeviceField::ALL);
        if let Some(line) = device_line {
            writeln!(out, "{}", line)?;
        }
        for snap in &snaps {
            writeln!(out, "{}", encode_sweep(snap, fields))?;
            summarize(snap);
        }
        if snaps.is_empty() {
            warn!("No sweeps captured yet");
        }
        out.flush()?;
        batches += 1;
    }
    Ok(batches)
}
