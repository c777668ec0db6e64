//! Sample sweeps, the unit of data every device hands to the cache.
//!
//! A sweep is one pass of an analyzer across its configured frequency range:
//! a small header describing the range and how to convert readings to dBm,
//! followed by one reading per frequency bin.

use std::{fmt, time::UNIX_EPOCH};

use chrono::{DateTime, Utc};
use num_traits::ToPrimitive;

/// The shape of a sweep. Every sweep stored in one cache shares the same geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Geometry {
    pub num_samples: usize,
    pub start_khz: u32,
    pub end_khz: u32,
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} samples over {}-{} kHz",
            self.num_samples, self.start_khz, self.end_khz
        )
    }
}

/// A sweep header plus its samples.
///
/// Raw device readings are `u8` ([`SampleSweep`]); the running average is kept
/// in floating point ([`AverageSweep`]) so it doesn't truncate.
#[derive(Clone, Debug, PartialEq)]
pub struct Sweep<T> {
    /// Starting frequency of the sweep, in kHz
    pub start_khz: u32,
    /// Ending frequency of the sweep, in kHz
    pub end_khz: u32,
    /// Width of one sample bin, in Hz
    pub res_hz: u32,
    /// Hardware aggregation per point
    pub samples_per_point: u32,
    /// Filter bandwidth the hardware was configured with
    pub filter_bw_hz: u32,
    pub amp_offset_mdbm: i32,
    pub amp_res_mdbm: i32,
    pub rssi_max: u32,
    /// Lowest raw reading the device has reported
    pub min_rssi_seen: u32,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub samples: Vec<T>,
}

/// Raw readings straight from a device
pub type SampleSweep = Sweep<u8>;
/// Per-bin mean over a window of [`SampleSweep`]s
pub type AverageSweep = Sweep<f32>;

/// The zero timestamp
pub fn unix_epoch() -> DateTime<Utc> {
    DateTime::<Utc>::from(UNIX_EPOCH)
}

/// Convert a raw reading to dBm with a device's linear coefficients
pub fn rssi_to_dbm(raw: f64, amp_offset_mdbm: i32, amp_res_mdbm: i32) -> f64 {
    raw * (amp_res_mdbm as f64 / 1000.0) + (amp_offset_mdbm as f64 / 1000.0)
}

impl<T> Sweep<T> {
    pub fn num_samples(&self) -> usize {
        self.samples.len()
    }

    pub fn geometry(&self) -> Geometry {
        Geometry {
            num_samples: self.samples.len(),
            start_khz: self.start_khz,
            end_khz: self.end_khz,
        }
    }

    /// Build a sweep with this header and a different sample vector
    pub fn with_samples<U>(&self, samples: Vec<U>) -> Sweep<U> {
        Sweep {
            start_khz: self.start_khz,
            end_khz: self.end_khz,
            res_hz: self.res_hz,
            samples_per_point: self.samples_per_point,
            filter_bw_hz: self.filter_bw_hz,
            amp_offset_mdbm: self.amp_offset_mdbm,
            amp_res_mdbm: self.amp_res_mdbm,
            rssi_max: self.rssi_max,
            min_rssi_seen: self.min_rssi_seen,
            time_start: self.time_start,
            time_end: self.time_end,
            samples,
        }
    }

    /// Center frequency of a sample bin, in kHz
    pub fn bin_khz(&self, index: usize) -> f64 {
        self.start_khz as f64 + index as f64 * self.res_hz as f64 / 1000.0
    }
}

impl<T: Clone> Sweep<T> {
    /// Overwrite this sweep with `other`, reusing the sample buffer
    pub fn copy_from(&mut self, other: &Sweep<T>) {
        self.start_khz = other.start_khz;
        self.end_khz = other.end_khz;
        self.res_hz = other.res_hz;
        self.samples_per_point = other.samples_per_point;
        self.filter_bw_hz = other.filter_bw_hz;
        self.amp_offset_mdbm = other.amp_offset_mdbm;
        self.amp_res_mdbm = other.amp_res_mdbm;
        self.rssi_max = other.rssi_max;
        self.min_rssi_seen = other.min_rssi_seen;
        self.time_start = other.time_start;
        self.time_end = other.time_end;
        self.samples.clone_from(&other.samples);
    }
}

impl<T: ToPrimitive + Copy> Sweep<T> {
    /// The reading at `index` in dBm, if there is one
    pub fn dbm(&self, index: usize) -> Option<f64> {
        self.samples
            .get(index)
            .and_then(|s| s.to_f64())
            .map(|raw| rssi_to_dbm(raw, self.amp_offset_mdbm, self.amp_res_mdbm))
    }

    pub fn dbm_samples(&self) -> Vec<f64> {
        self.samples
            .iter()
            .filter_map(|s| s.to_f64())
            .map(|raw| rssi_to_dbm(raw, self.amp_offset_mdbm, self.amp_res_mdbm))
            .collect()
    }

    /// Index and dBm value of the strongest bin
    pub fn strongest(&self) -> Option<(usize, f64)> {
        self.dbm_samples()
            .into_iter()
            .enumerate()
            .fold(None, |best, (i, dbm)| match best {
                Some((_, b)) if b >= dbm => best,
                _ => Some((i, dbm)),
            })
    }
}

impl From<&SampleSweep> for AverageSweep {
    fn from(sweep: &SampleSweep) -> Self {
        sweep.with_samples(sweep.samples.iter().map(|&s| s as f32).collect())
    }
}

/// A sweep range a device can be configured for
#[derive(Clone, Debug, PartialEq)]
pub struct SweepProfile {
    pub name: String,
    pub start_khz: u32,
    pub end_khz: u32,
    pub res_hz: u32,
    pub num_samples: usize,
    pub filter_bw_hz: u32,
    pub samples_per_point: u32,
    pub amp_offset_mdbm: i32,
    pub amp_res_mdbm: i32,
    pub rssi_max: u32,
}

impl SweepProfile {
    pub fn geometry(&self) -> Geometry {
        Geometry {
            num_samples: self.num_samples,
            start_khz: self.start_khz,
            end_khz: self.end_khz,
        }
    }

    /// An all-zero sweep shaped like this profile, for a device to fill in
    pub fn blank_sweep(&self) -> SampleSweep {
        Sweep {
            start_khz: self.start_khz,
            end_khz: self.end_khz,
            res_hz: self.res_hz,
            samples_per_point: self.samples_per_point,
            filter_bw_hz: self.filter_bw_hz,
            amp_offset_mdbm: self.amp_offset_mdbm,
            amp_res_mdbm: self.amp_res_mdbm,
            rssi_max: self.rssi_max,
            min_rssi_seen: self.rssi_max,
            time_start: unix_epoch(),
            time_end: unix_epoch(),
            samples: vec![0; self.num_samples],
        }
    }
}
