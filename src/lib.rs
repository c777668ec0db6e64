//! Sweep aggregation for USB spectrum analyzers.
//!
//! Devices ([`device::SweepSource`]) produce one [`sweep::SampleSweep`] per pass
//! over their band. Each sweep goes into a [`cache::SweepCache`], a ring of
//! recent sweeps that keeps an average, an all-time peak and a rolling peak up
//! to date. [`bank::SweepBank`] keeps one cache per sweep geometry for a device,
//! and [`protocol`] turns cache contents into text lines for remote clients.

pub mod bank;
pub mod cache;
pub mod device;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod sweep;

pub use cache::SweepCache;
pub use error::{CacheError, DeviceError, ProtocolError};
pub use sweep::{AverageSweep, Geometry, SampleSweep, Sweep, SweepProfile};
