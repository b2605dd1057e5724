/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{remote_bitrate_estimator::BITRATE_WINDOW_MS, Error, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateStatisticsSettings {
    pub window_size_ms: i64,
    // Converts bytes per millisecond into the reported unit.
    pub scale: f64,
}

impl RateStatisticsSettings {
    pub const DEFAULT_WINDOW_SIZE_MS: i64 = BITRATE_WINDOW_MS;
    pub const MAX_WINDOW_SIZE_MS: i64 = 60_000;

    pub fn validate(&mut self) {
        if self.window_size_ms <= 0 || self.window_size_ms > Self::MAX_WINDOW_SIZE_MS {
            tracing::warn!(
                "Rate window must be between 1 and {} ms, using {} ms",
                Self::MAX_WINDOW_SIZE_MS,
                Self::DEFAULT_WINDOW_SIZE_MS
            );
            self.window_size_ms = Self::DEFAULT_WINDOW_SIZE_MS;
        }
        if !(self.scale > 0.0 && self.scale.is_finite()) {
            tracing::warn!("Rate scale must be positive");
            self.scale = RateStatistics::BPS_SCALE;
        }
    }
}

impl Default for RateStatisticsSettings {
    fn default() -> Self {
        Self {
            window_size_ms: Self::DEFAULT_WINDOW_SIZE_MS,
            scale: RateStatistics::BPS_SCALE,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    sum: u64,     // Sum of all samples in this bucket.
    samples: u64, // Number of samples in this bucket.
}

/// Sliding window rate estimate with one bucket per millisecond.
#[derive(Debug, Clone)]
pub struct RateStatistics {
    // Counters are kept in buckets (circular buffer), with one bucket
    // per millisecond.
    buckets: Vec<Bucket>,

    // Total count recorded in buckets.
    accumulated_count: u64,

    // The total number of samples in the buckets.
    num_samples: u64,

    // Oldest time recorded in buckets. None until the first sample.
    oldest_time: Option<i64>,

    // Bucket index of oldest counter recorded in buckets.
    oldest_index: usize,

    // To convert counts/ms to desired units
    scale: f64,

    // The window sizes, in ms, over which the rate is calculated.
    max_window_size_ms: i64,
    current_window_size_ms: i64,
}

impl Default for RateStatistics {
    fn default() -> Self {
        Self::from_settings(RateStatisticsSettings::default())
    }
}

impl RateStatistics {
    /// Bytes per millisecond to bits per second.
    pub const BPS_SCALE: f64 = 8000.0;

    pub fn new(window_size_ms: i64, scale: f64) -> Self {
        Self::from_settings(RateStatisticsSettings {
            window_size_ms,
            scale,
        })
    }

    pub fn from_settings(mut settings: RateStatisticsSettings) -> Self {
        settings.validate();
        Self {
            buckets: vec![Bucket::default(); settings.window_size_ms as usize],
            accumulated_count: 0,
            num_samples: 0,
            oldest_time: None,
            oldest_index: 0,
            scale: settings.scale,
            max_window_size_ms: settings.window_size_ms,
            current_window_size_ms: settings.window_size_ms,
        }
    }

    pub fn reset(&mut self) {
        self.accumulated_count = 0;
        self.num_samples = 0;
        self.oldest_time = None;
        self.oldest_index = 0;
        self.current_window_size_ms = self.max_window_size_ms;
        self.buckets.fill(Bucket::default());
    }

    /// Records `count` units at `now_ms`. Samples older than the window are dropped.
    pub fn update(&mut self, count: u64, now_ms: i64) {
        if self.oldest_time.is_some_and(|oldest_time| now_ms < oldest_time) {
            tracing::trace!(now_ms, "dropping sample older than the rate window");
            return;
        }

        self.erase_old(now_ms);

        // First ever sample, reset window to start now.
        let oldest_time = *self.oldest_time.get_or_insert(now_ms);

        let now_offset = (now_ms - oldest_time) as usize;
        let index = (self.oldest_index + now_offset) % self.buckets.len();
        let bucket = &mut self.buckets[index];
        bucket.sum += count;
        bucket.samples += 1;
        self.accumulated_count += count;
        self.num_samples += 1;
    }

    /// Rate over the active window, or None if there is not enough data.
    ///
    /// Takes `&mut self` because samples that fell out of the window are
    /// evicted as a side effect.
    pub fn rate(&mut self, now_ms: i64) -> Option<u32> {
        self.erase_old(now_ms);
        let oldest_time = self.oldest_time?;

        // If window is a single bucket or there is only one sample in a data set that
        // has not grown to the full window size, treat this as rate unavailable.
        let active_window_size = now_ms - oldest_time + 1;
        if self.num_samples == 0
            || active_window_size <= 1
            || (self.num_samples <= 1 && active_window_size < self.current_window_size_ms)
        {
            return None;
        }

        let scale = self.scale / active_window_size as f64;
        Some((self.accumulated_count as f64 * scale + 0.5) as u32)
    }

    /// Shrinks or grows the active window, up to the size allocated at
    /// construction.
    pub fn set_window_size(&mut self, window_size_ms: i64, now_ms: i64) -> Result<()> {
        if window_size_ms <= 0 || window_size_ms > self.max_window_size_ms {
            return Err(Error::InvalidWindowSize {
                requested: window_size_ms,
                max: self.max_window_size_ms,
            });
        }

        self.current_window_size_ms = window_size_ms;
        self.erase_old(now_ms);
        Ok(())
    }

    fn erase_old(&mut self, now_ms: i64) {
        let Some(mut oldest_time) = self.oldest_time else {
            return;
        };

        // New oldest time that is included in data set.
        let new_oldest_time = now_ms - self.current_window_size_ms + 1;

        // New oldest time is older than the current one, no need to cull data.
        if new_oldest_time <= oldest_time {
            return;
        }

        // Loop over buckets and remove too old data points.
        while self.num_samples > 0 && oldest_time < new_oldest_time {
            let oldest_bucket = std::mem::take(&mut self.buckets[self.oldest_index]);
            self.accumulated_count -= oldest_bucket.sum;
            self.num_samples -= oldest_bucket.samples;
            self.oldest_index += 1;
            if self.oldest_index >= self.buckets.len() {
                self.oldest_index = 0;
            }
            oldest_time += 1;
        }

        self.oldest_time = Some(new_oldest_time);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const WINDOW_MS: i64 = 500;
    const BPS_SCALE: f64 = RateStatistics::BPS_SCALE;

    fn stats() -> RateStatistics {
        RateStatistics::new(WINDOW_MS, BPS_SCALE)
    }

    #[test]
    fn empty_has_no_rate() {
        let mut stats = stats();
        assert_eq!(stats.rate(0), None);
        assert_eq!(stats.rate(10_000), None);
    }

    #[test]
    fn single_sample_needs_full_window() {
        let mut stats = stats();
        stats.update(1500, 0);
        assert_eq!(stats.rate(0), None);
        assert_eq!(stats.rate(1), None);
        assert_eq!(stats.rate(WINDOW_MS - 2), None);
        // 1500 bytes over 500 ms.
        assert_eq!(stats.rate(WINDOW_MS - 1), Some(24_000));
    }

    #[test]
    fn two_samples_in_two_ms() {
        let mut stats = stats();
        stats.update(1500, 0);
        stats.update(1500, 1);
        // 3000 bytes over 2 ms.
        assert_eq!(stats.rate(1), Some(12_000_000));
    }

    #[test]
    fn same_bucket_is_unavailable() {
        let mut stats = stats();
        stats.update(1500, 7);
        stats.update(1500, 7);
        assert_eq!(stats.rate(7), None);
    }

    #[test]
    fn full_window() {
        let mut stats = stats();
        for now_ms in 0..WINDOW_MS {
            stats.update(1000, now_ms);
        }
        assert_eq!(stats.rate(WINDOW_MS - 1), Some(8_000_000));

        // Sliding by one millisecond drops exactly one bucket.
        stats.update(1000, WINDOW_MS);
        assert_eq!(stats.rate(WINDOW_MS), Some(8_000_000));
    }

    #[test]
    fn sparse_samples() {
        let mut stats = stats();
        stats.update(1000, 0);
        stats.update(1000, WINDOW_MS - 1);
        // 2000 bytes over 500 ms.
        assert_eq!(stats.rate(WINDOW_MS - 1), Some(32_000));
    }

    #[test]
    fn window_slides_and_drops_old_samples() {
        let mut stats = stats();
        for now_ms in 0..WINDOW_MS {
            stats.update(1000, now_ms);
        }

        // A whole window of silence empties the buckets.
        assert_eq!(stats.rate(2 * WINDOW_MS - 1), None);

        // Samples from before the window are ignored.
        stats.update(1000, 100);
        assert_eq!(stats.rate(2 * WINDOW_MS - 1), None);

        stats.update(1000, 2 * WINDOW_MS);
        stats.update(1000, 2 * WINDOW_MS + 1);
        assert_eq!(stats.rate(2 * WINDOW_MS + 1), Some(32_000));
    }

    #[test]
    fn reset_clears_everything() {
        let mut stats = stats();
        for now_ms in 0..WINDOW_MS {
            stats.update(1000, now_ms);
        }
        stats.reset();
        assert_eq!(stats.rate(WINDOW_MS - 1), None);

        // Time may restart after a reset.
        stats.update(1500, 0);
        stats.update(1500, 1);
        assert_eq!(stats.rate(1), Some(12_000_000));
    }

    #[test]
    fn shrink_window() {
        let mut stats = stats();
        for now_ms in 0..WINDOW_MS {
            stats.update(1000, now_ms);
        }
        stats.set_window_size(100, WINDOW_MS - 1).unwrap();
        // 100 buckets of 1000 bytes remain.
        assert_eq!(stats.rate(WINDOW_MS - 1), Some(8_000_000));
    }

    #[test]
    fn invalid_window_size() {
        let mut stats = stats();
        assert_eq!(
            stats.set_window_size(0, 0),
            Err(Error::InvalidWindowSize {
                requested: 0,
                max: WINDOW_MS
            })
        );
        assert_eq!(
            stats.set_window_size(WINDOW_MS + 1, 0),
            Err(Error::InvalidWindowSize {
                requested: WINDOW_MS + 1,
                max: WINDOW_MS
            })
        );
        assert!(stats.set_window_size(WINDOW_MS, 0).is_ok());
    }

    #[test]
    fn invalid_settings_fall_back() {
        let stats = RateStatistics::new(-5, f64::NAN);
        assert_eq!(stats.max_window_size_ms, 1000);
        assert_eq!(stats.scale, BPS_SCALE);
    }

    #[test]
    fn oversized_window_falls_back() {
        let mut stats = RateStatistics::new(i64::MAX, BPS_SCALE);
        assert_eq!(stats.max_window_size_ms, BITRATE_WINDOW_MS);
        assert_eq!(stats.buckets.len(), BITRATE_WINDOW_MS as usize);

        // The largest allowed window is kept as is.
        let largest = RateStatistics::new(RateStatisticsSettings::MAX_WINDOW_SIZE_MS, BPS_SCALE);
        assert_eq!(
            largest.max_window_size_ms,
            RateStatisticsSettings::MAX_WINDOW_SIZE_MS
        );

        stats.update(1500, 0);
        stats.update(1500, 1);
        assert_eq!(stats.rate(1), Some(12_000_000));
    }
}
