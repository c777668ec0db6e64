//! The sweep cache: a fixed-capacity ring of sweeps with running aggregates.
//!
//! Every append copies the sweep into the next ring slot (overwriting the
//! oldest once the ring is full) and refreshes three derived views:
//!
//! * the average, recomputed from every retained slot so evicted sweeps drop out
//! * the all-time peak, which only ever grows until the cache is cleared
//! * the rolling peak, the per-bin maximum over just the retained slots
//!
//! The cache does no locking. Whoever shares it across threads wraps it in a
//! mutex or hands owned snapshots around instead.

use tracing::{debug, trace};

use crate::{
    error::{CacheError, CacheResult},
    sweep::{unix_epoch, AverageSweep, Geometry, SampleSweep},
};

#[derive(Debug, Clone)]
pub struct SweepCache {
    slots: Vec<Option<SampleSweep>>,
    /// Most recently written slot, `None` before the first append
    pos: Option<usize>,
    looped: bool,
    num_used: usize,
    calc_peak: bool,
    calc_avg: bool,
    geometry: Option<Geometry>,
    average: Option<AverageSweep>,
    peak: Option<SampleSweep>,
    rolling_peak: Option<SampleSweep>,
    /// Bumped by every clear so outstanding cursors can tell their history is gone
    generation: u64,
}

/// The populated slots in physical order. Before the ring wraps these are
/// `0..=pos`, afterwards every slot, which is `num_used` either way.
fn populated(
    slots: &[Option<SampleSweep>],
    num_used: usize,
) -> impl Iterator<Item = &SampleSweep> {
    slots[..num_used].iter().flatten()
}

fn max_into(target: &mut [u8], source: &[u8]) {
    for (t, &s) in target.iter_mut().zip(source) {
        if *t < s {
            *t = s;
        }
    }
}

/// Sums are 64-bit so no ring capacity can overflow them
fn bin_mean(sum: u64, count: u64) -> f32 {
    if count == 0 {
        0.0
    } else {
        (sum as f64 / count as f64) as f32
    }
}

impl SweepCache {
    pub fn new(capacity: usize, calc_peak: bool, calc_avg: bool) -> CacheResult<Self> {
        if capacity == 0 {
            return Err(CacheError::InvalidCapacity(capacity));
        }
        debug!(capacity, calc_peak, calc_avg, "Allocating sweep cache");
        Ok(Self {
            slots: (0..capacity).map(|_| None).collect(),
            pos: None,
            looped: false,
            num_used: 0,
            calc_peak,
            calc_avg,
            geometry: None,
            average: None,
            peak: None,
            rolling_peak: None,
            generation: 0,
        })
    }

    /// Copy a sweep into the ring and refresh the aggregates.
    ///
    /// The first accepted sweep fixes the cache's geometry. A sweep of any other
    /// geometry is rejected and leaves the cache untouched.
    pub fn append(&mut self, sweep: &SampleSweep) -> CacheResult<()> {
        let actual = sweep.geometry();
        match self.geometry {
            Some(expected) if expected != actual => {
                debug!(%expected, %actual, "Rejecting sweep");
                return Err(CacheError::GeometryMismatch { expected, actual });
            }
            Some(_) => {}
            None => {
                debug!(geometry = %actual, "Establishing cache geometry");
                self.geometry = Some(actual);
            }
        }

        let pos = self.advance();
        match self.slots[pos].as_mut() {
            Some(slot) => slot.copy_from(sweep),
            None => self.slots[pos] = Some(sweep.clone()),
        }
        trace!(pos, num_used = self.num_used, looped = self.looped, "Appended sweep");

        if self.calc_avg {
            self.update_average(sweep);
        }
        if self.calc_peak {
            self.update_peak(sweep);
        }
        Ok(())
    }

    fn advance(&mut self) -> usize {
        let next = match self.pos {
            Some(pos) if pos == self.slots.len() - 1 => {
                self.looped = true;
                0
            }
            Some(pos) => {
                self.num_used += 1;
                pos + 1
            }
            None => {
                self.num_used += 1;
                0
            }
        };
        self.pos = Some(next);
        next
    }

    fn update_average(&mut self, sweep: &SampleSweep) {
        let average = match &mut self.average {
            Some(average) => average,
            None => {
                self.average = Some(AverageSweep::from(sweep));
                return;
            }
        };

        let width = average.samples.len();
        let mut sums = vec![0u64; width];
        let mut counts = vec![0u64; width];
        // The average carries the newest contributing timestamps
        average.time_start = unix_epoch();
        average.time_end = unix_epoch();

        for slot in populated(&self.slots, self.num_used) {
            for ((sum, count), &raw) in sums.iter_mut().zip(counts.iter_mut()).zip(&slot.samples) {
                *sum += u64::from(raw);
                *count += 1;
            }
            average.time_start = average.time_start.max(slot.time_start);
            average.time_end = average.time_end.max(slot.time_end);
        }

        for ((avg, &sum), &count) in average.samples.iter_mut().zip(&sums).zip(&counts) {
            *avg = bin_mean(sum, count);
        }
    }

    fn update_peak(&mut self, sweep: &SampleSweep) {
        match (&mut self.peak, &mut self.rolling_peak) {
            (Some(peak), Some(rolling)) => {
                max_into(&mut peak.samples, &sweep.samples);

                rolling.copy_from(sweep);
                for slot in populated(&self.slots, self.num_used) {
                    max_into(&mut rolling.samples, &slot.samples);
                }
            }
            _ => {
                self.peak = Some(sweep.clone());
                self.rolling_peak = Some(sweep.clone());
            }
        }
    }

    /// Drop the aggregates and forget the history, keeping the ring's allocations.
    ///
    /// Average and peaks stay unset until the next append, which may also
    /// establish a new geometry.
    pub fn clear(&mut self) {
        debug!(capacity = self.slots.len(), "Clearing sweep cache");
        self.average = None;
        self.peak = None;
        self.rolling_peak = None;
        self.geometry = None;
        self.pos = None;
        self.looped = false;
        self.num_used = 0;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Release every sweep the cache owns
    pub fn destroy(self) {
        trace!(capacity = self.slots.len(), "Destroying sweep cache");
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of populated slots, saturating at the capacity
    pub fn len(&self) -> usize {
        self.num_used
    }

    pub fn is_empty(&self) -> bool {
        self.num_used == 0
    }

    /// Whether the ring has wrapped and started overwriting
    pub fn looped(&self) -> bool {
        self.looped
    }

    /// Slot index of the latest sweep
    pub fn position(&self) -> Option<usize> {
        self.pos
    }

    pub fn calc_peak(&self) -> bool {
        self.calc_peak
    }

    pub fn calc_avg(&self) -> bool {
        self.calc_avg
    }

    pub fn geometry(&self) -> Option<Geometry> {
        self.geometry
    }

    pub fn average(&self) -> Option<&AverageSweep> {
        self.average.as_ref()
    }

    /// All-time per-bin maximum
    pub fn peak(&self) -> Option<&SampleSweep> {
        self.peak.as_ref()
    }

    /// Per-bin maximum over the retained sweeps only
    pub fn rolling_peak(&self) -> Option<&SampleSweep> {
        self.rolling_peak.as_ref()
    }

    pub fn latest(&self) -> Option<&SampleSweep> {
        self.pos.and_then(|pos| self.slots[pos].as_ref())
    }

    /// A detached cursor over the current history, oldest first
    pub fn cursor(&self) -> HistoryCursor {
        HistoryCursor::new(self)
    }

    /// Walk the retained sweeps oldest first
    pub fn iter(&self) -> SweepIter<'_> {
        SweepIter {
            cache: self,
            cursor: self.cursor(),
        }
    }
}

/// Iteration state that doesn't borrow the cache.
///
/// The bounds are fixed when the cursor is made, so a cursor can be held
/// across lock releases. Sweeps appended in between don't extend the walk.
#[derive(Debug, Clone, Copy)]
pub struct HistoryCursor {
    pos_start: usize,
    pos_cur: usize,
    looped_start: bool,
    remaining: usize,
    generation: u64,
}

impl HistoryCursor {
    pub fn new(cache: &SweepCache) -> Self {
        let pos_start = match cache.pos {
            Some(pos) if cache.looped => (pos + 1) % cache.capacity(),
            _ => 0,
        };
        Self {
            pos_start,
            pos_cur: pos_start,
            looped_start: cache.looped,
            remaining: cache.num_used,
            generation: cache.generation,
        }
    }

    /// The next sweep in the walk, or `None` once every slot captured at
    /// creation has been visited
    pub fn next_sweep<'a>(&mut self, cache: &'a SweepCache) -> Option<&'a SampleSweep> {
        // A cache cleared under us has no history left to walk, even if
        // newer sweeps have landed since
        if self.remaining == 0 || self.generation != cache.generation {
            self.remaining = 0;
            return None;
        }
        let sweep = cache.slots.get(self.pos_cur).and_then(Option::as_ref);
        if sweep.is_none() {
            self.remaining = 0;
            return None;
        }
        self.remaining -= 1;
        self.pos_cur = (self.pos_cur + 1) % cache.capacity();
        sweep
    }

    pub fn pos_start(&self) -> usize {
        self.pos_start
    }

    pub fn looped_start(&self) -> bool {
        self.looped_start
    }

    pub fn remaining(&self) -> usize {
        self.remaining
    }
}

pub struct SweepIter<'a> {
    cache: &'a SweepCache,
    cursor: HistoryCursor,
}

impl<'a> Iterator for SweepIter<'a> {
    type Item = &'a SampleSweep;

    fn next(&mut self) -> Option<Self::Item> {
        self.cursor.next_sweep(self.cache)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.cursor.remaining();
        (n, Some(n))
    }
}

impl ExactSizeIterator for SweepIter<'_> {}

impl<'a> IntoIterator for &'a SweepCache {
    type Item = &'a SampleSweep;
    type IntoIter = SweepIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sweep::Sweep;
    use chrono::{Duration, TimeZone, Utc};

    fn sweep(values: &[u8]) -> SampleSweep {
        Sweep {
            start_khz: 2_400_000,
            end_khz: 2_483_000,
            res_hz: 1_000_000,
            samples_per_point: 1,
            filter_bw_hz: 1_000_000,
            amp_offset_mdbm: -97_500,
            amp_res_mdbm: 1500,
            rssi_max: 48,
            min_rssi_seen: 0,
            time_start: unix_epoch(),
            time_end: unix_epoch(),
            samples: values.to_vec(),
        }
    }

    fn first_samples(cache: &SweepCache) -> Vec<u8> {
        cache.iter().map(|s| s.samples[0]).collect()
    }

    #[test]
    fn test_zero_capacity() {
        assert_eq!(
            SweepCache::new(0, true, true).unwrap_err(),
            CacheError::InvalidCapacity(0)
        );
    }

    #[test]
    fn test_new_cache_is_empty() {
        let cache = SweepCache::new(4, true, true).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.position(), None);
        assert!(!cache.looped());
        assert!(cache.average().is_none());
        assert!(cache.peak().is_none());
        assert!(cache.rolling_peak().is_none());
        assert!(cache.latest().is_none());
        assert!(cache.geometry().is_none());
        assert_eq!(cache.iter().count(), 0);
    }

    #[test]
    fn test_ring_saturates() {
        let mut cache = SweepCache::new(3, false, false).unwrap();
        for i in 0..3u8 {
            cache.append(&sweep(&[i])).unwrap();
            assert!(!cache.looped());
            assert_eq!(cache.len(), i as usize + 1);
        }
        cache.append(&sweep(&[3])).unwrap();
        assert!(cache.looped());
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.position(), Some(0));
        for i in 4..10u8 {
            cache.append(&sweep(&[i])).unwrap();
            assert_eq!(cache.len(), 3);
        }
        // FIFO eviction: only the three newest survive
        assert_eq!(first_samples(&cache), vec![7, 8, 9]);
        assert_eq!(cache.latest().unwrap().samples, vec![9]);
    }

    #[test]
    fn test_capacity_one() {
        let mut cache = SweepCache::new(1, true, true).unwrap();
        cache.append(&sweep(&[4])).unwrap();
        assert!(!cache.looped());
        cache.append(&sweep(&[2])).unwrap();
        assert!(cache.looped());
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.average().unwrap().samples, vec![2.0]);
        assert_eq!(cache.peak().unwrap().samples, vec![4]);
        assert_eq!(cache.rolling_peak().unwrap().samples, vec![2]);
    }

    #[test]
    fn test_first_average_is_copy() {
        let mut cache = SweepCache::new(4, false, true).unwrap();
        cache.append(&sweep(&[7, 9, 11])).unwrap();
        assert_eq!(cache.average().unwrap().samples, vec![7.0, 9.0, 11.0]);
        assert!(cache.peak().is_none());
    }

    #[test]
    fn test_average_of_window() {
        let mut cache = SweepCache::new(8, false, true).unwrap();
        let data: [[u8; 3]; 4] = [[1, 10, 0], [2, 20, 0], [4, 30, 1], [5, 41, 0]];
        for d in &data {
            cache.append(&sweep(d)).unwrap();
        }
        let avg = &cache.average().unwrap().samples;
        assert!((avg[0] - 3.0).abs() < 1e-6);
        assert!((avg[1] - 25.25).abs() < 1e-6);
        assert!((avg[2] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_average_forgets_evicted() {
        let mut cache = SweepCache::new(2, false, true).unwrap();
        cache.append(&sweep(&[200])).unwrap();
        cache.append(&sweep(&[10])).unwrap();
        cache.append(&sweep(&[20])).unwrap();
        assert!((cache.average().unwrap().samples[0] - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_timestamps_track_newest() {
        let mut cache = SweepCache::new(2, false, true).unwrap();
        let t0 = Utc.timestamp_opt(1_000, 0).unwrap();
        for i in 0..3 {
            let mut s = sweep(&[1]);
            s.time_start = t0 + Duration::seconds(i * 10);
            s.time_end = s.time_start + Duration::seconds(1);
            cache.append(&s).unwrap();
        }
        let avg = cache.average().unwrap();
        assert_eq!(avg.time_start, t0 + Duration::seconds(20));
        assert_eq!(avg.time_end, t0 + Duration::seconds(21));
    }

    #[test]
    fn test_peak_is_monotonic() {
        let mut cache = SweepCache::new(2, true, false).unwrap();
        let data: [[u8; 2]; 5] = [[5, 1], [3, 9], [8, 2], [1, 1], [0, 0]];
        let mut prev = vec![0u8, 0];
        for d in &data {
            cache.append(&sweep(d)).unwrap();
            let peak = &cache.peak().unwrap().samples;
            assert!(peak.iter().zip(&prev).all(|(p, q)| p >= q));
            prev = peak.clone();
        }
        // All-time, not just retained
        assert_eq!(prev, vec![8, 9]);
        assert!(cache.average().is_none());
    }

    #[test]
    fn test_rolling_peak_ages_out() {
        let mut cache = SweepCache::new(2, true, false).unwrap();
        cache.append(&sweep(&[50, 1])).unwrap();
        cache.append(&sweep(&[10, 2])).unwrap();
        assert_eq!(cache.rolling_peak().unwrap().samples, vec![50, 2]);
        cache.append(&sweep(&[20, 3])).unwrap();
        assert_eq!(cache.rolling_peak().unwrap().samples, vec![20, 3]);
        cache.append(&sweep(&[5, 0])).unwrap();
        assert_eq!(cache.rolling_peak().unwrap().samples, vec![20, 3]);
        assert_eq!(cache.peak().unwrap().samples, vec![50, 3]);
    }

    #[test]
    fn test_wrapping_scenario() {
        let mut cache = SweepCache::new(3, true, true).unwrap();
        for v in [10u8, 20, 30, 5] {
            cache.append(&sweep(&[v])).unwrap();
        }
        assert_eq!(cache.peak().unwrap().samples[0], 30);
        assert_eq!(cache.rolling_peak().unwrap().samples[0], 30);
        assert!((cache.average().unwrap().samples[0] - 55.0 / 3.0).abs() < 1e-4);
        assert!(cache.looped());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_sample_count_mismatch_rejected() {
        let mut cache = SweepCache::new(2, true, true).unwrap();
        cache.append(&sweep(&[1, 2, 3, 4])).unwrap();
        let err = cache.append(&sweep(&[1, 2, 3, 4, 5])).unwrap_err();
        assert!(matches!(err, CacheError::GeometryMismatch { expected, actual }
            if expected.num_samples == 4 && actual.num_samples == 5));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_mismatch_leaves_state_untouched() {
        let mut cache = SweepCache::new(3, true, true).unwrap();
        cache.append(&sweep(&[1, 2])).unwrap();
        cache.append(&sweep(&[3, 4])).unwrap();
        let before = cache.clone();

        let mut shifted = sweep(&[90, 90]);
        shifted.start_khz = 5_150_000;
        assert!(cache.append(&shifted).is_err());
        assert!(cache.append(&sweep(&[90])).is_err());
        let mut narrowed = sweep(&[90, 90]);
        narrowed.end_khz = 2_450_000;
        assert!(matches!(
            cache.append(&narrowed),
            Err(CacheError::GeometryMismatch { expected, actual })
                if expected.end_khz == 2_483_000 && actual.end_khz == 2_450_000
        ));

        assert_eq!(cache.position(), before.position());
        assert_eq!(cache.len(), before.len());
        assert_eq!(cache.average(), before.average());
        assert_eq!(cache.peak(), before.peak());
        assert_eq!(cache.rolling_peak(), before.rolling_peak());
        assert_eq!(cache.latest(), before.latest());
    }

    #[test]
    fn test_mismatch_rejected_without_average() {
        let mut cache = SweepCache::new(3, true, false).unwrap();
        cache.append(&sweep(&[1, 2, 3])).unwrap();
        assert!(cache.append(&sweep(&[9])).is_err());
        assert_eq!(cache.peak().unwrap().samples, vec![1, 2, 3]);
    }

    #[test]
    fn test_clear() {
        let mut cache = SweepCache::new(2, true, true).unwrap();
        cache.append(&sweep(&[1, 2])).unwrap();
        cache.append(&sweep(&[3, 4])).unwrap();
        cache.append(&sweep(&[5, 6])).unwrap();
        cache.clear();
        assert!(cache.average().is_none());
        assert!(cache.peak().is_none());
        assert!(cache.rolling_peak().is_none());
        assert!(cache.latest().is_none());
        assert!(cache.is_empty());
        assert!(!cache.looped());
        assert_eq!(cache.capacity(), 2);
        assert!(cache.calc_peak() && cache.calc_avg());
        assert_eq!(cache.iter().count(), 0);

        // Reusable, and stale slots don't leak into the new aggregates
        cache.append(&sweep(&[9])).unwrap();
        assert_eq!(cache.average().unwrap().samples, vec![9.0]);
        cache.append(&sweep(&[1])).unwrap();
        assert!((cache.average().unwrap().samples[0] - 5.0).abs() < 1e-6);
        assert_eq!(first_samples(&cache), vec![9, 1]);
    }

    #[test]
    fn test_iter_oldest_first() {
        let mut cache = SweepCache::new(4, false, false).unwrap();
        for v in 1..=3u8 {
            cache.append(&sweep(&[v])).unwrap();
        }
        assert_eq!(cache.iter().len(), 3);
        assert_eq!(first_samples(&cache), vec![1, 2, 3]);

        for v in 4..=6u8 {
            cache.append(&sweep(&[v])).unwrap();
        }
        assert_eq!(cache.iter().len(), 4);
        assert_eq!(first_samples(&cache), vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_cursor_bounds_fixed_at_creation() {
        let mut cache = SweepCache::new(4, false, false).unwrap();
        cache.append(&sweep(&[1])).unwrap();
        cache.append(&sweep(&[2])).unwrap();
        let mut cursor = cache.cursor();
        assert_eq!(cursor.pos_start(), 0);
        assert!(!cursor.looped_start());
        assert_eq!(cursor.next_sweep(&cache).unwrap().samples, vec![1]);

        cache.append(&sweep(&[3])).unwrap();
        assert_eq!(cursor.next_sweep(&cache).unwrap().samples, vec![2]);
        assert!(cursor.next_sweep(&cache).is_none());
        // Not restartable
        assert!(cursor.next_sweep(&cache).is_none());
    }

    #[test]
    fn test_cursor_starts_after_wrap() {
        let mut cache = SweepCache::new(3, false, false).unwrap();
        for v in 1..=4u8 {
            cache.append(&sweep(&[v])).unwrap();
        }
        let cursor = cache.cursor();
        assert_eq!(cursor.pos_start(), 1);
        assert!(cursor.looped_start());
        assert_eq!(cursor.remaining(), 3);
    }

    #[test]
    fn test_cursor_after_clear() {
        let mut cache = SweepCache::new(3, false, false).unwrap();
        cache.append(&sweep(&[1])).unwrap();
        let mut cursor = cache.cursor();
        cache.clear();
        assert!(cursor.next_sweep(&cache).is_none());
    }

    #[test]
    fn test_cursor_after_clear_and_refill() {
        let mut cache = SweepCache::new(3, false, false).unwrap();
        for v in 1..=3u8 {
            cache.append(&sweep(&[v])).unwrap();
        }
        let mut cursor = cache.cursor();
        assert_eq!(cursor.next_sweep(&cache).unwrap().samples, vec![1]);

        cache.clear();
        cache.append(&sweep(&[9])).unwrap();
        // The old walk is over, the old sweeps are gone
        assert!(cursor.next_sweep(&cache).is_none());
        assert_eq!(cursor.remaining(), 0);

        let live: Vec<_> = cache.iter().map(|s| s.samples[0]).collect();
        assert_eq!(live, vec![9]);
    }

    #[test]
    fn test_bin_mean_past_u32() {
        // 20M full-scale readings sum to more than a u32 holds
        let count = 20_000_000u64;
        assert_eq!(bin_mean(255 * count, count), 255.0);
        assert_eq!(bin_mean(0, 0), 0.0);
    }

    #[test]
    fn test_destroy() {
        let mut cache = SweepCache::new(3, true, true).unwrap();
        cache.append(&sweep(&[1])).unwrap();
        cache.destroy();
    }
}
