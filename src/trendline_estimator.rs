/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::collections::VecDeque;

use crate::{api::transport::BandwidthUsage, DelayIncreaseDetectorInterface};

// WebRTC-BweWindowSizeInPackets
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendlineEstimatorSettings {
    // Size (in packets) of the window.
    pub window_size: usize,
    // Exponential smoothing of the accumulated delay, in [0, 1).
    pub smoothing_coef: f64,
    // Gain applied to the slope before comparing it to the threshold.
    pub threshold_gain: f64,
}

impl TrendlineEstimatorSettings {
    pub const DEFAULT_TRENDLINE_WINDOW_SIZE: usize = 20;
    pub const DEFAULT_TRENDLINE_SMOOTHING_COEFF: f64 = 0.9;
    pub const DEFAULT_TRENDLINE_THRESHOLD_GAIN: f64 = 4.0;

    pub fn validate(&mut self) {
        if self.window_size < 3 || 200 < self.window_size {
            tracing::warn!("Window size must be between 3 and 200 packets");
            self.window_size = Self::DEFAULT_TRENDLINE_WINDOW_SIZE;
        }
        if !(0.0..1.0).contains(&self.smoothing_coef) {
            tracing::warn!("Smoothing coefficient must be in [0, 1)");
            self.smoothing_coef = Self::DEFAULT_TRENDLINE_SMOOTHING_COEFF;
        }
        if !(self.threshold_gain > 0.0 && self.threshold_gain.is_finite()) {
            tracing::warn!("Threshold gain must be positive");
            self.threshold_gain = Self::DEFAULT_TRENDLINE_THRESHOLD_GAIN;
        }
    }
}

impl Default for TrendlineEstimatorSettings {
    fn default() -> Self {
        Self {
            window_size: Self::DEFAULT_TRENDLINE_WINDOW_SIZE,
            smoothing_coef: Self::DEFAULT_TRENDLINE_SMOOTHING_COEFF,
            threshold_gain: Self::DEFAULT_TRENDLINE_THRESHOLD_GAIN,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PacketTiming {
    arrival_time_ms: f64,
    smoothed_delay_ms: f64,
}

/// Detects delay increases by fitting a line to the smoothed, accumulated
/// one-way delay of the most recent timestamp groups.
#[derive(Debug, Clone)]
pub struct TrendlineEstimator {
    // Parameters.
    settings: TrendlineEstimatorSettings,
    // Used by the existing threshold.
    num_of_deltas: usize,
    // Keep the arrival times small by using the change from the first packet.
    first_arrival_time_ms: Option<i64>,
    // Exponential backoff filtering.
    accumulated_delay: f64,
    smoothed_delay: f64,
    // Linear least squares regression.
    delay_hist: VecDeque<PacketTiming>,

    k_up: f64,
    k_down: f64,
    overusing_time_threshold: f64,
    threshold: f64,
    last_update_ms: Option<i64>,
    prev_trend: f64,
    time_over_using: Option<f64>,
    overuse_counter: usize,
    hypothesis: BandwidthUsage,
}

impl Default for TrendlineEstimator {
    fn default() -> Self {
        Self::new(TrendlineEstimatorSettings::default())
    }
}

impl DelayIncreaseDetectorInterface for TrendlineEstimator {
    fn update(&mut self, recv_delta_ms: f64, send_delta_ms: f64, arrival_time_ms: i64) {
        self.update_trendline(recv_delta_ms, send_delta_ms, arrival_time_ms);
    }

    fn state(&self) -> BandwidthUsage {
        self.hypothesis
    }
}

// Least squares slope using the "center of mass" of the points. Undefined for
// fewer than three points or when all points share the same arrival time.
fn linear_fit_slope(packets: &VecDeque<PacketTiming>) -> Option<f64> {
    if packets.len() <= 2 {
        return None;
    }
    let n = packets.len() as f64;
    let x_avg: f64 = packets.iter().map(|p| p.arrival_time_ms).sum::<f64>() / n;
    let y_avg: f64 = packets.iter().map(|p| p.smoothed_delay_ms).sum::<f64>() / n;

    // Compute the slope k = \sum (x_i-x_avg)(y_i-y_avg) / \sum (x_i-x_avg)^2
    let mut numerator: f64 = 0.0;
    let mut denominator: f64 = 0.0;
    for packet in packets {
        let x = packet.arrival_time_ms - x_avg;
        numerator += x * (packet.smoothed_delay_ms - y_avg);
        denominator += x * x;
    }
    if denominator == 0.0 {
        return None;
    }
    Some(numerator / denominator)
}

impl TrendlineEstimator {
    const MAX_ADAPT_OFFSET_MS: f64 = 15.0;
    const OVER_USING_TIME_THRESHOLD: f64 = 10.0;
    const MIN_NUM_DELTAS: usize = 60;
    const DELTA_COUNTER_MAX: usize = 1000;
    const MAX_TIME_DELTA_MS: i64 = 100;

    pub fn new(mut settings: TrendlineEstimatorSettings) -> Self {
        settings.validate();

        tracing::info!(
            "Using Trendline filter for delay change estimation with settings {:?}",
            settings
        );
        Self {
            settings,
            num_of_deltas: 0,
            first_arrival_time_ms: None,
            accumulated_delay: 0.0,
            smoothed_delay: 0.0,
            delay_hist: VecDeque::with_capacity(settings.window_size + 1),
            k_up: 0.0087,
            k_down: 0.039,
            overusing_time_threshold: Self::OVER_USING_TIME_THRESHOLD,
            threshold: 12.5,
            last_update_ms: None,
            prev_trend: 0.0,
            time_over_using: None,
            overuse_counter: 0,
            hypothesis: BandwidthUsage::Normal,
        }
    }

    pub fn settings(&self) -> &TrendlineEstimatorSettings {
        &self.settings
    }

    /// The last trend scaled by the threshold gain.
    pub fn modified_trend(&self) -> f64 {
        self.prev_trend * self.settings.threshold_gain
    }

    /// The current adaptive threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn num_of_deltas(&self) -> usize {
        self.num_of_deltas
    }

    fn update_trendline(&mut self, recv_delta_ms: f64, send_delta_ms: f64, arrival_time_ms: i64) {
        let delta_ms: f64 = recv_delta_ms - send_delta_ms;
        self.num_of_deltas = (self.num_of_deltas + 1).min(Self::DELTA_COUNTER_MAX);
        let first_arrival_time_ms = *self.first_arrival_time_ms.get_or_insert(arrival_time_ms);

        // Exponential backoff filter.
        let smoothing_coef = self.settings.smoothing_coef;
        self.accumulated_delay += delta_ms;
        self.smoothed_delay =
            smoothing_coef * self.smoothed_delay + (1.0 - smoothing_coef) * self.accumulated_delay;

        // Maintain packet window
        self.delay_hist.push_back(PacketTiming {
            arrival_time_ms: (arrival_time_ms - first_arrival_time_ms) as f64,
            smoothed_delay_ms: self.smoothed_delay,
        });
        if self.delay_hist.len() > self.settings.window_size {
            self.delay_hist.pop_front();
        }

        // Simple linear regression.
        let mut trend: f64 = self.prev_trend;
        if self.delay_hist.len() == self.settings.window_size {
            // Update trend if it is possible to fit a line to the data. The delay
            // trend can be seen as an estimate of (send_rate - capacity)/capacity.
            // 0 < trend < 1   ->  the delay increases, queues are filling up
            //   trend == 0    ->  the delay does not change
            //   trend < 0     ->  the delay decreases, queues are being emptied
            trend = linear_fit_slope(&self.delay_hist).unwrap_or(0.0);
        }

        self.detect(trend, send_delta_ms, arrival_time_ms);
    }

    fn detect(&mut self, trend: f64, ts_delta: f64, now_ms: i64) {
        if self.num_of_deltas < 2 {
            self.hypothesis = BandwidthUsage::Normal;
            return;
        }

        let prev_hypothesis = self.hypothesis;
        let modified_trend: f64 =
            self.num_of_deltas.min(Self::MIN_NUM_DELTAS) as f64 * trend * self.settings.threshold_gain;
        if modified_trend > self.threshold {
            let time_over_using = match self.time_over_using {
                // Initialize the timer. Assume that we've been
                // over-using half of the time since the previous
                // sample.
                None => ts_delta / 2.0,
                Some(time_over_using) => time_over_using + ts_delta,
            };
            self.time_over_using = Some(time_over_using);
            self.overuse_counter += 1;
            if time_over_using > self.overusing_time_threshold
                && self.overuse_counter > 1
                && trend >= self.prev_trend
            {
                self.time_over_using = Some(0.0);
                self.overuse_counter = 0;
                self.hypothesis = BandwidthUsage::Overusing;
            }
        } else if modified_trend < -self.threshold {
            self.time_over_using = None;
            self.overuse_counter = 0;
            self.hypothesis = BandwidthUsage::Underusing;
        } else {
            self.time_over_using = None;
            self.overuse_counter = 0;
            self.hypothesis = BandwidthUsage::Normal;
        }
        self.prev_trend = trend;

        if self.hypothesis != prev_hypothesis {
            tracing::debug!(
                from = %prev_hypothesis,
                to = %self.hypothesis,
                modified_trend,
                threshold = self.threshold,
                "delay detector state changed"
            );
        }

        self.update_threshold(modified_trend, now_ms);
    }

    fn update_threshold(&mut self, modified_trend: f64, now_ms: i64) {
        let last_update_ms = *self.last_update_ms.get_or_insert(now_ms);

        if modified_trend.abs() > self.threshold + Self::MAX_ADAPT_OFFSET_MS {
            // Avoid adapting the threshold to big latency spikes, caused e.g.,
            // by a sudden capacity drop.
            self.last_update_ms = Some(now_ms);
            return;
        }

        let k: f64 = if modified_trend.abs() < self.threshold {
            self.k_down
        } else {
            self.k_up
        };
        let time_delta_ms: i64 = (now_ms - last_update_ms).min(Self::MAX_TIME_DELTA_MS);
        self.threshold += k * (modified_trend.abs() - self.threshold) * time_delta_ms as f64;
        self.threshold = self.threshold.clamp(6.0, 600.0);
        self.last_update_ms = Some(now_ms);
    }
}
