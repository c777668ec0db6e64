//! Sweep sources: the hardware families we know about and the contract a
//! backend fulfils to feed sweeps into a cache.
//!
//! Talking USB to the analyzers themselves is somebody else's job. What lives
//! here is each family's identity and sweep ranges, plus two sources that
//! don't need hardware at all: a synthetic one for running the pipeline and a
//! replay one for tests.

use std::{collections::VecDeque, fmt};

use chrono::Utc;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use crate::{
    error::{DeviceError, DeviceResult},
    sweep::{SampleSweep, SweepProfile},
};

// DBx-family firmware scales every range the same way
const DBX_OFFSET_MDBM: i32 = -134_000;
const DBX_RES_MDBM: i32 = 500;
const DBX_RSSI_MAX: u32 = 222;
// v2+ firmware uses a fixed dwell time
const DBX_DWELL: u32 = 100;

const UBERTOOTH_START_KHZ: u32 = 2_402_000;
const UBERTOOTH_RES_HZ: u32 = 1_000_000;
const UBERTOOTH_NUM_SAMPLES: usize = 79;

const WISPY1_START_KHZ: u32 = 2_400_000;
const WISPY1_RES_HZ: u32 = 1_000_000;
const WISPY1_NUM_SAMPLES: usize = 83;

/// Hardware families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    WispyGen1,
    Wispy24x,
    WispyDbx,
    UbertoothU1,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 4] = [
        DeviceKind::WispyGen1,
        DeviceKind::Wispy24x,
        DeviceKind::WispyDbx,
        DeviceKind::UbertoothU1,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DeviceKind::WispyGen1 => "Wi-Spy v1",
            DeviceKind::Wispy24x => "Wi-Spy 24x",
            DeviceKind::WispyDbx => "Wi-Spy DBx",
            DeviceKind::UbertoothU1 => "Ubertooth One",
        }
    }

    /// Device version byte reported to protocol clients
    pub fn version(&self) -> u8 {
        match self {
            DeviceKind::WispyGen1 => 1,
            DeviceKind::Wispy24x => 2,
            DeviceKind::WispyDbx => 3,
            DeviceKind::UbertoothU1 => 4,
        }
    }

    /// Whether the device can be switched between sweep ranges
    pub fn variable_sweep(&self) -> bool {
        matches!(self, DeviceKind::Wispy24x | DeviceKind::WispyDbx)
    }

    pub fn profiles(&self) -> Vec<SweepProfile> {
        match self {
            DeviceKind::WispyGen1 => vec![SweepProfile {
                name: "2.4GHz ISM".to_owned(),
                start_khz: WISPY1_START_KHZ,
                end_khz: WISPY1_START_KHZ + (WISPY1_NUM_SAMPLES as u32 * WISPY1_RES_HZ / 1000),
                res_hz: WISPY1_RES_HZ,
                num_samples: WISPY1_NUM_SAMPLES,
                filter_bw_hz: WISPY1_RES_HZ,
                samples_per_point: 1,
                amp_offset_mdbm: -97_500,
                amp_res_mdbm: 1500,
                rssi_max: 48,
            }],
            DeviceKind::Wispy24x => dbx_24_presets(),
            DeviceKind::WispyDbx => {
                let mut profiles = dbx_24_presets();
                profiles.extend([
                    dbx_preset("Full 5GHz Band", 5150.0, 5836.0, 1497.070, 428.0),
                    dbx_preset("UNII Low (ch. 36-64)", 5150.0, 5350.0, 748.535, 428.0),
                    dbx_preset("UNII Mid (ch. 100-140)", 5470.0, 5725.0, 1122.070, 428.0),
                    dbx_preset("UNII High (ch. 149-165)", 5725.0, 5836.0, 375.0, 428.0),
                ]);
                profiles
            }
            DeviceKind::UbertoothU1 => vec![SweepProfile {
                name: "2.4GHz Bluetooth".to_owned(),
                start_khz: UBERTOOTH_START_KHZ,
                end_khz: UBERTOOTH_START_KHZ
                    + (UBERTOOTH_NUM_SAMPLES as u32 * UBERTOOTH_RES_HZ / 1000),
                res_hz: UBERTOOTH_RES_HZ,
                num_samples: UBERTOOTH_NUM_SAMPLES,
                filter_bw_hz: UBERTOOTH_RES_HZ,
                samples_per_point: 1,
                amp_offset_mdbm: -109_000,
                amp_res_mdbm: 1000,
                rssi_max: 58,
            }],
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn dbx_24_presets() -> Vec<SweepProfile> {
    vec![
        dbx_preset("Full 2.4GHz Band", 2400.0, 2495.0, 333.3, 200.0),
        dbx_preset("Full 2.4GHz Band (Turbo)", 2400.0, 2495.0, 1000.0, 500.0),
    ]
}

/// Build a range the way DBx firmware presets are described: band edges in MHz,
/// bin width and filter in kHz
fn dbx_preset(
    name: &str,
    start_mhz: f32,
    stop_mhz: f32,
    res_khz: f32,
    filter_khz: f32,
) -> SweepProfile {
    let start_khz = (start_mhz * 1000.0) as u32;
    let end_khz = (stop_mhz * 1000.0) as u32;
    SweepProfile {
        name: name.to_owned(),
        start_khz,
        end_khz,
        res_hz: (res_khz * 1000.0) as u32,
        num_samples: ((stop_mhz * 1000.0 - start_mhz * 1000.0) / res_khz) as usize,
        filter_bw_hz: (filter_khz * 1000.0) as u32,
        samples_per_point: DBX_DWELL,
        amp_offset_mdbm: DBX_OFFSET_MDBM,
        amp_res_mdbm: DBX_RES_MDBM,
        rssi_max: DBX_RSSI_MAX,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    Configuring,
    Running,
    Error,
}

/// What a poll produced
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollEvent {
    /// Nothing yet, partial data
    Idle,
    /// The device finished configuring
    Configured,
    /// A sweep is ready in `latest_sweep`
    SweepComplete,
}

/// The contract every device backend fulfils
pub trait SweepSource: Send {
    fn kind(&self) -> DeviceKind;

    fn device_id(&self) -> u32;

    fn name(&self) -> &str;

    fn state(&self) -> DeviceState;

    fn open(&mut self) -> DeviceResult<()>;

    fn close(&mut self) -> DeviceResult<()>;

    /// Drive the device forward
    fn poll(&mut self) -> DeviceResult<PollEvent>;

    /// The last completed sweep
    fn latest_sweep(&self) -> Option<&SampleSweep>;

    /// The sweep range currently in use
    fn profile(&self) -> &SweepProfile;

    fn set_profile(&mut self, _index: usize) -> DeviceResult<()> {
        Err(DeviceError::Unsupported(
            "Device does not support setting scan position or resolution".to_owned(),
        ))
    }
}

/// A source that makes up plausible sweeps: a noise floor with a carrier
/// drifting across the band.
pub struct SyntheticSource {
    kind: DeviceKind,
    device_id: u32,
    name: String,
    profiles: Vec<SweepProfile>,
    profile_idx: usize,
    state: DeviceState,
    rng: StdRng,
    sweep: Option<SampleSweep>,
    min_rssi_seen: u32,
    carrier: usize,
}

impl SyntheticSource {
    pub fn new(kind: DeviceKind, device_id: u32, seed: u64) -> Self {
        Self {
            kind,
            device_id,
            name: format!("{} USB {}", kind.name(), device_id),
            profiles: kind.profiles(),
            profile_idx: 0,
            state: DeviceState::Closed,
            rng: StdRng::seed_from_u64(seed),
            sweep: None,
            min_rssi_seen: u32::MAX,
            carrier: 0,
        }
    }

    fn fill_sweep(&mut self) {
        let profile = &self.profiles[self.profile_idx];
        let mut sweep = match self.sweep.take() {
            Some(s) if s.geometry() == profile.geometry() => s,
            _ => profile.blank_sweep(),
        };
        sweep.time_start = Utc::now();

        let rssi_max = profile.rssi_max.min(u8::MAX as u32) as u8;
        let floor = rssi_max / 8;
        let width = sweep.samples.len();
        self.carrier = (self.carrier + 1) % width.max(1);
        for (i, sample) in sweep.samples.iter_mut().enumerate() {
            let noise: u8 = self.rng.gen_range(0..=floor.max(1));
            let distance = (i as isize - self.carrier as isize).unsigned_abs();
            let signal = if distance < 4 {
                (rssi_max / 2) / (distance as u8 + 1)
            } else {
                0
            };
            *sample = floor.saturating_add(noise).saturating_add(signal).min(rssi_max);
        }
        if let Some(&low) = sweep.samples.iter().min() {
            self.min_rssi_seen = self.min_rssi_seen.min(low as u32);
        }
        sweep.min_rssi_seen = self.min_rssi_seen;
        sweep.time_end = Utc::now();
        self.sweep = Some(sweep);
    }
}

impl SweepSource for SyntheticSource {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn open(&mut self) -> DeviceResult<()> {
        info!(device = %self.name, "Opening synthetic source");
        self.state = DeviceState::Configuring;
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        info!(device = %self.name, "Closing synthetic source");
        self.state = DeviceState::Closed;
        Ok(())
    }

    fn poll(&mut self) -> DeviceResult<PollEvent> {
        match self.state {
            DeviceState::Closed => Err(DeviceError::NotOpen),
            DeviceState::Error => Err(DeviceError::Hardware("device in error state".to_owned())),
            DeviceState::Configuring => {
                self.state = DeviceState::Running;
                Ok(PollEvent::Configured)
            }
            DeviceState::Running => {
                self.fill_sweep();
                Ok(PollEvent::SweepComplete)
            }
        }
    }

    fn latest_sweep(&self) -> Option<&SampleSweep> {
        self.sweep.as_ref()
    }

    fn profile(&self) -> &SweepProfile {
        &self.profiles[self.profile_idx]
    }

    fn set_profile(&mut self, index: usize) -> DeviceResult<()> {
        if !self.kind.variable_sweep() {
            return Err(DeviceError::Unsupported(format!(
                "{} has a single fixed sweep range",
                self.kind
            )));
        }
        if index >= self.profiles.len() {
            return Err(DeviceError::InvalidProfile(index));
        }
        debug!(device = %self.name, profile = %self.profiles[index].name, "Switching profile");
        self.profile_idx = index;
        // Real hardware reconfigures before sweeping again
        if self.state == DeviceState::Running {
            self.state = DeviceState::Configuring;
        }
        Ok(())
    }
}

/// Plays back a fixed list of sweeps, then reports [`DeviceError::Exhausted`]
pub struct ReplaySource {
    kind: DeviceKind,
    device_id: u32,
    name: String,
    profile: SweepProfile,
    pending: VecDeque<SampleSweep>,
    current: Option<SampleSweep>,
    state: DeviceState,
}

impl ReplaySource {
    pub fn new(
        kind: DeviceKind,
        device_id: u32,
        sweeps: impl IntoIterator<Item = SampleSweep>,
    ) -> Self {
        let pending: VecDeque<_> = sweeps.into_iter().collect();
        let mut profile = kind.profiles().remove(0);
        // Describe the recording rather than the nominal hardware
        if let Some(first) = pending.front() {
            profile.start_khz = first.start_khz;
            profile.end_khz = first.end_khz;
            profile.res_hz = first.res_hz;
            profile.num_samples = first.num_samples();
        }
        Self {
            kind,
            device_id,
            name: format!("{} replay {}", kind.name(), device_id),
            profile,
            pending,
            current: None,
            state: DeviceState::Closed,
        }
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }
}

impl SweepSource for ReplaySource {
    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn device_id(&self) -> u32 {
        self.device_id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> DeviceState {
        self.state
    }

    fn open(&mut self) -> DeviceResult<()> {
        self.state = DeviceState::Running;
        Ok(())
    }

    fn close(&mut self) -> DeviceResult<()> {
        self.state = DeviceState::Closed;
        Ok(())
    }

    fn poll(&mut self) -> DeviceResult<PollEvent> {
        if self.state == DeviceState::Closed {
            return Err(DeviceError::NotOpen);
        }
        match self.pending.pop_front() {
            Some(sweep) => {
                self.current = Some(sweep);
                Ok(PollEvent::SweepComplete)
            }
            None => Err(DeviceError::Exhausted),
        }
    }

    fn latest_sweep(&self) -> Option<&SampleSweep> {
        self.current.as_ref()
    }

    fn profile(&self) -> &SweepProfile {
        &self.profile
    }
}
