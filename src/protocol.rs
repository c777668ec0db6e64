//! Text line protocol for mirroring devices and their sweeps to remote clients.
//!
//! Two line types are spoken, both space separated with free-form values
//! wrapped in `\x01`:
//!
//! ```text
//! *WISPYDEVICE: <id> \x01<name>\x01 <version> <flags>
//! *WISPYSWEEP: <devid> <startkhz> <endkhz> <reshz> <numsamples> <startsec> <startusec>
//!              <endsec> <endusec> \x01<last,...>\x01 \x01<peak,...>\x01 \x01<avg,...>\x01
//! ```
//!
//! Sweep lines can carry any subset of fields in any order. [`SweepReport`]
//! parses the full default line.

use std::{fmt, fmt::Write, str::FromStr};

use chrono::{DateTime, TimeZone, Utc};

use crate::{
    bank::BankSnapshot,
    device::{DeviceState, SweepSource},
    error::{ProtocolError, ProtocolResult},
};

pub const DELIM: char = '\u{1}';
pub const DEVICE_TAG: &str = "*WISPYDEVICE:";
pub const SWEEP_TAG: &str = "*WISPYSWEEP:";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceField {
    Id,
    Name,
    Version,
    Flags,
}

impl DeviceField {
    pub const ALL: [DeviceField; 4] = [
        DeviceField::Id,
        DeviceField::Name,
        DeviceField::Version,
        DeviceField::Flags,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceField::Id => "id",
            DeviceField::Name => "name",
            DeviceField::Version => "version",
            DeviceField::Flags => "flags",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepField {
    DevId,
    StartKhz,
    EndKhz,
    ResHz,
    NumSamples,
    StartSec,
    StartUsec,
    EndSec,
    EndUsec,
    LastSamples,
    PeakSamples,
    AvgSamples,
}

impl SweepField {
    /// The order [`SweepReport::parse`] expects
    pub const ALL: [SweepField; 12] = [
        SweepField::DevId,
        SweepField::StartKhz,
        SweepField::EndKhz,
        SweepField::ResHz,
        SweepField::NumSamples,
        SweepField::StartSec,
        SweepField::StartUsec,
        SweepField::EndSec,
        SweepField::EndUsec,
        SweepField::LastSamples,
        SweepField::PeakSamples,
        SweepField::AvgSamples,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SweepField::DevId => "devid",
            SweepField::StartKhz => "startkhz",
            SweepField::EndKhz => "endkhz",
            SweepField::ResHz => "reshz",
            SweepField::NumSamples => "numsamples",
            SweepField::StartSec => "startsec",
            SweepField::StartUsec => "startusec",
            SweepField::EndSec => "endsec",
            SweepField::EndUsec => "endusec",
            SweepField::LastSamples => "lastsamples",
            SweepField::PeakSamples => "peaksamples",
            SweepField::AvgSamples => "avgsamples",
        }
    }
}

impl fmt::Display for SweepField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SweepField {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SweepField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownField(s.to_owned()))
    }
}

impl fmt::Display for DeviceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceField {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownField(s.to_owned()))
    }
}

/// Parse a comma separated field list such as `"devid,startkhz,avgsamples"`
pub fn parse_fields<F: FromStr<Err = ProtocolError>>(list: &str) -> ProtocolResult<Vec<F>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(F::from_str)
        .collect()
}

fn push_list<T: fmt::Display>(out: &mut String, values: impl Iterator<Item = T>) {
    out.push(DELIM);
    for (i, v) in values.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(out, "{}", v);
    }
    out.push(DELIM);
}

/// Describe a device. Devices that haven't finished configuring aren't announced.
pub fn encode_device(source: &dyn SweepSource, fields: &[DeviceField]) -> Option<String> {
    if matches!(source.state(), DeviceState::Closed | DeviceState::Configuring) {
        return None;
    }
    let mut out = String::from(DEVICE_TAG);
    for field in fields {
        out.push(' ');
        match field {
            DeviceField::Id => {
                let _ = write!(out, "{}", source.device_id());
            }
            DeviceField::Name => {
                out.push(DELIM);
                out.push_str(source.name());
                out.push(DELIM);
            }
            DeviceField::Version => {
                let _ = write!(out, "{}", source.kind().version());
            }
            DeviceField::Flags => {
                let _ = write!(out, "{}", u8::from(source.kind().variable_sweep()));
            }
        }
    }
    Some(out)
}

/// Encode one cache's views as a sweep line.
///
/// The header fields describe the average, or the latest sweep when the cache
/// doesn't average, and are `0` when neither exists.
pub fn encode_sweep(snapshot: &BankSnapshot, fields: &[SweepField]) -> String {
    let header = snapshot
        .average
        .as_ref()
        .map(|a| (a.start_khz, a.end_khz, a.res_hz, a.num_samples(), a.time_start, a.time_end))
        .or_else(|| {
            snapshot
                .latest
                .as_ref()
                .map(|l| {
                    (l.start_khz, l.end_khz, l.res_hz, l.num_samples(), l.time_start, l.time_end)
                })
        });

    let mut out = String::from(SWEEP_TAG);
    for field in fields {
        out.push(' ');
        match (field, &header) {
            (SweepField::DevId, _) => {
                let _ = write!(out, "{}", snapshot.device_id);
            }
            (SweepField::LastSamples, _) => match &snapshot.latest {
                Some(s) => push_list(&mut out, s.samples.iter()),
                None => push_list(&mut out, std::iter::empty::<u8>()),
            },
            (SweepField::PeakSamples, _) => match &snapshot.peak {
                Some(s) => push_list(&mut out, s.samples.iter()),
                None => push_list(&mut out, std::iter::empty::<u8>()),
            },
            (SweepField::AvgSamples, _) => match &snapshot.average {
                // Clients take integers
                Some(s) => push_list(&mut out, s.samples.iter().map(|&v| v as u32)),
                None => push_list(&mut out, std::iter::empty::<u32>()),
            },
            (_, None) => out.push('0'),
            (SweepField::StartKhz, Some(h)) => {
                let _ = write!(out, "{}", h.0);
            }
            (SweepField::EndKhz, Some(h)) => {
                let _ = write!(out, "{}", h.1);
            }
            (SweepField::ResHz, Some(h)) => {
                let _ = write!(out, "{}", h.2);
            }
            (SweepField::NumSamples, Some(h)) => {
                let _ = write!(out, "{}", h.3);
            }
            (SweepField::StartSec, Some(h)) => {
                let _ = write!(out, "{}", h.4.timestamp());
            }
            (SweepField::StartUsec, Some(h)) => {
                let _ = write!(out, "{}", h.4.timestamp_subsec_micros());
            }
            (SweepField::EndSec, Some(h)) => {
                let _ = write!(out, "{}", h.5.timestamp());
            }
            (SweepField::EndUsec, Some(h)) => {
                let _ = write!(out, "{}", h.5.timestamp_subsec_micros());
            }
        }
    }
    out
}

/// Split a line on spaces, keeping `\x01` wrapped values whole
fn tokenize(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        if let Some(quoted) = rest.strip_prefix(DELIM) {
            match quoted.find(DELIM) {
                Some(end) => {
                    tokens.push(&quoted[..end]);
                    rest = quoted[end + DELIM.len_utf8()..].trim_start();
                }
                None => {
                    tokens.push(quoted);
                    rest = "";
                }
            }
        } else {
            let end = rest.find(' ').unwrap_or(rest.len());
            tokens.push(&rest[..end]);
            rest = rest[end..].trim_start();
        }
    }
    tokens
}

fn number<T: FromStr>(field: SweepField, token: Option<&str>) -> ProtocolResult<T> {
    let token = token.ok_or(ProtocolError::MissingField(field.as_str()))?;
    token.parse().map_err(|_| ProtocolError::InvalidNumber {
        field: field.as_str(),
        value: token.to_owned(),
    })
}

fn sample_list(field: SweepField, token: Option<&str>, expected: usize) -> ProtocolResult<Vec<u8>> {
    let token = token.ok_or(ProtocolError::MissingField(field.as_str()))?;
    // An empty list means the view isn't being tracked
    if token.is_empty() {
        return Ok(Vec::new());
    }
    let values = token
        .split(',')
        .map(|v| {
            v.parse::<u8>().map_err(|_| ProtocolError::InvalidNumber {
                field: field.as_str(),
                value: v.to_owned(),
            })
        })
        .collect::<ProtocolResult<Vec<_>>>()?;
    if values.len() != expected {
        return Err(ProtocolError::SampleCount {
            field: field.as_str(),
            expected,
            actual: values.len(),
        });
    }
    Ok(values)
}

fn timestamp(field: SweepField, sec: i64, usec: u32) -> ProtocolResult<DateTime<Utc>> {
    usec.checked_mul(1000)
        .and_then(|nsec| Utc.timestamp_opt(sec, nsec).single())
        .ok_or(ProtocolError::InvalidNumber {
            field: field.as_str(),
            value: format!("{}.{:06}", sec, usec),
        })
}

/// A sweep line as a client sees it
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub device_id: u32,
    pub start_khz: u32,
    pub end_khz: u32,
    pub res_hz: u32,
    pub num_samples: usize,
    pub time_start: DateTime<Utc>,
    pub time_end: DateTime<Utc>,
    pub last: Vec<u8>,
    pub peak: Vec<u8>,
    pub average: Vec<u8>,
}

impl SweepReport {
    /// Parse a line carrying every field in [`SweepField::ALL`] order
    pub fn parse(line: &str) -> ProtocolResult<Self> {
        let mut tokens = tokenize(line).into_iter().peekable();
        if tokens.peek() == Some(&SWEEP_TAG) {
            tokens.next();
        }
        let device_id = number(SweepField::DevId, tokens.next())?;
        let start_khz = number(SweepField::StartKhz, tokens.next())?;
        let end_khz = number(SweepField::EndKhz, tokens.next())?;
        let res_hz = number(SweepField::ResHz, tokens.next())?;
        let num_samples = number(SweepField::NumSamples, tokens.next())?;
        let start_sec = number(SweepField::StartSec, tokens.next())?;
        let start_usec = number(SweepField::StartUsec, tokens.next())?;
        let end_sec = number(SweepField::EndSec, tokens.next())?;
        let end_usec = number(SweepField::EndUsec, tokens.next())?;
        let last = sample_list(SweepField::LastSamples, tokens.next(), num_samples)?;
        let peak = sample_list(SweepField::PeakSamples, tokens.next(), num_samples)?;
        let average = sample_list(SweepField::AvgSamples, tokens.next(), num_samples)?;
        Ok(Self {
            device_id,
            start_khz,
            end_khz,
            res_hz,
            num_samples,
            time_start: timestamp(SweepField::StartUsec, start_sec, start_usec)?,
            time_end: timestamp(SweepField::EndUsec, end_sec, end_usec)?,
            last,
            peak,
            average,
        })
    }
}
