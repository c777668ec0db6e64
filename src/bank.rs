//! Per-device collection of caches, one per sweep geometry.
//!
//! A device that switches ranges produces sweeps a single cache would reject,
//! so the bank keeps a cache for each geometry it has seen and routes every
//! sweep to the right one.

use tracing::{debug, info};

use crate::{
    cache::SweepCache,
    error::CacheResult,
    sweep::{AverageSweep, Geometry, SampleSweep},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BankConfig {
    pub capacity: usize,
    pub calc_peak: bool,
    pub calc_avg: bool,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            calc_peak: true,
            calc_avg: true,
        }
    }
}

/// Owned copy of one cache's views, safe to hand to another thread
#[derive(Debug, Clone, PartialEq)]
pub struct BankSnapshot {
    pub device_id: u32,
    pub geometry: Geometry,
    pub sweeps: usize,
    pub latest: Option<SampleSweep>,
    pub peak: Option<SampleSweep>,
    pub rolling_peak: Option<SampleSweep>,
    pub average: Option<AverageSweep>,
}

#[derive(Debug)]
pub struct SweepBank {
    device_id: u32,
    config: BankConfig,
    caches: Vec<(Geometry, SweepCache)>,
}

impl SweepBank {
    pub fn new(device_id: u32, config: BankConfig) -> CacheResult<Self> {
        // Fail now rather than on the first sweep
        SweepCache::new(config.capacity, config.calc_peak, config.calc_avg)?;
        Ok(Self {
            device_id,
            config,
            caches: Vec::new(),
        })
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn config(&self) -> BankConfig {
        self.config
    }

    /// Append to the cache for this sweep's geometry, creating it if needed
    pub fn append(&mut self, sweep: &SampleSweep) -> CacheResult<&SweepCache> {
        let geometry = sweep.geometry();
        let idx = match self.caches.iter().position(|(g, _)| *g == geometry) {
            Some(idx) => idx,
            None => {
                info!(device_id = self.device_id, %geometry, "New sweep geometry");
                let cache = SweepCache::new(
                    self.config.capacity,
                    self.config.calc_peak,
                    self.config.calc_avg,
                )?;
                self.caches.push((geometry, cache));
                self.caches.len() - 1
            }
        };
        let cache = &mut self.caches[idx].1;
        cache.append(sweep)?;
        Ok(cache)
    }

    pub fn cache_for(&self, geometry: &Geometry) -> Option<&SweepCache> {
        self.caches
            .iter()
            .find(|(g, _)| g == geometry)
            .map(|(_, c)| c)
    }

    pub fn caches(&self) -> impl Iterator<Item = &SweepCache> {
        self.caches.iter().map(|(_, c)| c)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }

    pub fn snapshot(&self) -> Vec<BankSnapshot> {
        self.caches
            .iter()
            .map(|(geometry, cache)| BankSnapshot {
                device_id: self.device_id,
                geometry: *geometry,
                sweeps: cache.len(),
                latest: cache.latest().cloned(),
                peak: cache.peak().cloned(),
                rolling_peak: cache.rolling_peak().cloned(),
                average: cache.average().cloned(),
            })
            .collect()
    }

    /// Drop every cache
    pub fn clear(&mut self) {
        debug!(device_id = self.device_id, caches = self.caches.len(), "Clearing bank");
        self.caches.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{device::DeviceKind, error::CacheError};

    #[test]
    fn test_routes_by_geometry() {
        let profiles = DeviceKind::WispyDbx.profiles();
        let mut bank = SweepBank::new(5, BankConfig::default()).unwrap();

        let mut narrow = profiles[0].blank_sweep();
        narrow.samples[0] = 10;
        let mut wide = profiles[2].blank_sweep();
        wide.samples[0] = 30;

        bank.append(&narrow).unwrap();
        bank.append(&wide).unwrap();
        let cache = bank.append(&narrow).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(bank.len(), 2);

        let wide_cache = bank.cache_for(&profiles[2].geometry()).unwrap();
        assert_eq!(wide_cache.len(), 1);
        assert_eq!(wide_cache.peak().unwrap().samples[0], 30);
    }

    #[test]
    fn test_snapshot_is_owned() {
        let profile = DeviceKind::UbertoothU1.profiles().remove(0);
        let mut bank = SweepBank::new(9, BankConfig::default()).unwrap();
        let mut sweep = profile.blank_sweep();
        sweep.samples[1] = 20;
        bank.append(&sweep).unwrap();

        let snaps = bank.snapshot();
        bank.clear();
        assert!(bank.is_empty());
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].device_id, 9);
        assert_eq!(snaps[0].sweeps, 1);
        assert_eq!(snaps[0].average.as_ref().unwrap().samples[1], 20.0);
        assert_eq!(snaps[0].latest.as_ref().unwrap().samples[1], 20);
    }

    #[test]
    fn test_rejects_bad_config() {
        let config = BankConfig {
            capacity: 0,
            ..Default::default()
        };
        assert_eq!(SweepBank::new(1, config).unwrap_err(), CacheError::InvalidCapacity(0));
    }
}
