/*
 *  Copyright (c) 2014 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{api::transport::BandwidthUsage, FieldTrials};

use super::{
    RateControlInput, RateControlRegion, RateControlState, CONGESTION_CONTROLLER_MIN_BITRATE_BPS,
};

// WebRTC-BweBackOffFactor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BweBackOffFactor {
    pub backoff_factor: f64, // Enabled-*
}

impl Default for BweBackOffFactor {
    fn default() -> Self {
        Self {
            backoff_factor: Self::DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl BweBackOffFactor {
    pub const DEFAULT_BACKOFF_FACTOR: f64 = 0.85;

    pub fn validate(&mut self) {
        if self.backoff_factor >= 1.0 {
            tracing::warn!("Back-off factor must be less than 1.");
        } else if self.backoff_factor <= 0.0 || self.backoff_factor.is_nan() {
            tracing::warn!("Back-off factor must be greater than 0.");
        } else {
            return;
        }

        tracing::warn!("Failed to parse parameters for AimdRateControl experiment from field trial string. Using default.");
        self.backoff_factor = Self::DEFAULT_BACKOFF_FACTOR
    }
}

// WebRTC-BweInitialBackOffInterval
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BweInitialBackOffInterval {
    /// Minimum time between back-offs before a throughput has been measured.
    /// When unset the regular reduction interval is used.
    pub interval_ms: Option<i64>, // Enabled-*
}

impl BweInitialBackOffInterval {
    pub const DEFAULT_INTERVAL_MS: i64 = 200;
    const MIN_INTERVAL_MS: i64 = 10;

    pub fn validate(&mut self) {
        if let Some(interval_ms) = self.interval_ms {
            if !(Self::MIN_INTERVAL_MS..=Self::DEFAULT_INTERVAL_MS).contains(&interval_ms) {
                tracing::warn!(
                    "Initial back-off interval must be between {} and {} ms, using {} ms.",
                    Self::MIN_INTERVAL_MS,
                    Self::DEFAULT_INTERVAL_MS,
                    Self::DEFAULT_INTERVAL_MS
                );
                self.interval_ms = Some(Self::DEFAULT_INTERVAL_MS);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AimdRateControlSettings {
    pub min_bitrate_bps: u32,
    /// Also the initial target bitrate.
    pub max_bitrate_bps: u32,
    /// Initial round-trip time estimate.
    pub rtt_ms: i64,
}

impl AimdRateControlSettings {
    pub const DEFAULT_MAX_BITRATE_BPS: u32 = 30_000_000;
    pub const DEFAULT_RTT_MS: i64 = 200;

    pub fn validate(&mut self) {
        if self.max_bitrate_bps < self.min_bitrate_bps {
            tracing::warn!(
                min = self.min_bitrate_bps,
                max = self.max_bitrate_bps,
                "Max bitrate must not be below the min bitrate, using defaults"
            );
            *self = Self {
                rtt_ms: self.rtt_ms,
                ..Self::default()
            };
        }
        if self.rtt_ms <= 0 {
            tracing::warn!("RTT must be positive, using {} ms", Self::DEFAULT_RTT_MS);
            self.rtt_ms = Self::DEFAULT_RTT_MS;
        }
    }
}

impl Default for AimdRateControlSettings {
    fn default() -> Self {
        Self {
            min_bitrate_bps: CONGESTION_CONTROLLER_MIN_BITRATE_BPS,
            max_bitrate_bps: Self::DEFAULT_MAX_BITRATE_BPS,
            rtt_ms: Self::DEFAULT_RTT_MS,
        }
    }
}

// A rate control implementation based on additive increases of
// bitrate when no over-use is detected and multiplicative decreases when
// over-uses are detected. When we think the available bandwidth has changes or
// is unknown, we will switch to a "slow-start mode" where we increase
// multiplicatively.
#[derive(Debug, Clone)]
pub struct AimdRateControl {
    min_configured_bitrate_bps: u32,
    max_configured_bitrate_bps: u32,
    current_bitrate_bps: u32,
    latest_estimated_throughput_bps: u32,
    // Statistics of the throughput seen when over-using, in kbps.
    avg_max_bitrate_kbps: Option<f64>,
    var_max_bitrate_kbps: f64,
    rate_control_state: RateControlState,
    rate_control_region: RateControlRegion,
    time_last_bitrate_change_ms: Option<i64>,
    time_last_bitrate_decrease_ms: Option<i64>,
    bitrate_is_initialized: bool,
    beta: f64,
    rtt_ms: i64,
    // Doubles the response time of the additive increase.
    in_experiment: bool,
    smoothing_experiment: bool,
    initial_backoff_interval_ms: Option<i64>,
    last_decrease_bps: Option<u32>,
}

impl Default for AimdRateControl {
    fn default() -> Self {
        Self::new(&FieldTrials::default())
    }
}

impl AimdRateControl {
    const INITIAL_VAR_MAX_BITRATE_KBPS: f64 = 0.4;
    const MAX_THROUGHPUT_SMOOTHING: f64 = 0.05;

    const MIN_PERIOD_MS: i64 = 2000;
    const DEFAULT_PERIOD_MS: i64 = 3000;
    const MIN_PERIOD_SMOOTHING_MS: i64 = 500;
    const DEFAULT_PERIOD_SMOOTHING_MS: i64 = 500;
    const MAX_PERIOD_MS: i64 = 50000;

    pub fn new(field_trials: &FieldTrials) -> Self {
        let mut settings = field_trials.aimd_rate_control;
        settings.validate();
        let mut back_off = field_trials.bwe_back_off_factor;
        back_off.validate();
        let mut initial_backoff = field_trials.bwe_initial_back_off_interval;
        initial_backoff.validate();

        tracing::info!(
            "Using aimd rate control with back off factor {}",
            back_off.backoff_factor
        );
        if let Some(interval_ms) = initial_backoff.interval_ms {
            tracing::info!(
                "Using aimd rate control with initial back-off interval {} ms.",
                interval_ms
            );
        }

        Self {
            min_configured_bitrate_bps: settings.min_bitrate_bps,
            max_configured_bitrate_bps: settings.max_bitrate_bps,
            current_bitrate_bps: settings.max_bitrate_bps,
            latest_estimated_throughput_bps: settings.max_bitrate_bps,
            avg_max_bitrate_kbps: None,
            var_max_bitrate_kbps: Self::INITIAL_VAR_MAX_BITRATE_KBPS,
            rate_control_state: RateControlState::Hold,
            rate_control_region: RateControlRegion::MaxUnknown,
            time_last_bitrate_change_ms: None,
            time_last_bitrate_decrease_ms: None,
            bitrate_is_initialized: false,
            beta: back_off.backoff_factor,
            rtt_ms: settings.rtt_ms,
            in_experiment: field_trials.adaptive_threshold,
            smoothing_experiment: field_trials.bandwidth_smoothing,
            initial_backoff_interval_ms: initial_backoff.interval_ms,
            last_decrease_bps: None,
        }
    }

    // Returns true if the target bitrate has been initialized. This happens
    // either if it has been explicitly set via set_start_bitrate/set_estimate,
    // or if an over-use has been acted upon.
    pub fn valid_estimate(&self) -> bool {
        self.bitrate_is_initialized
    }

    pub fn set_start_bitrate(&mut self, start_bitrate_bps: u32) {
        self.current_bitrate_bps = start_bitrate_bps;
        self.latest_estimated_throughput_bps = self.current_bitrate_bps;
        self.bitrate_is_initialized = true;
    }

    pub fn set_min_bitrate(&mut self, min_bitrate_bps: u32) {
        self.min_configured_bitrate_bps = min_bitrate_bps;
        self.current_bitrate_bps = self.current_bitrate_bps.max(min_bitrate_bps);
    }

    pub fn max_configured_bitrate_bps(&self) -> u32 {
        self.max_configured_bitrate_bps
    }

    pub fn get_feedback_interval_ms(&self) -> i64 {
        // Estimate how often we can send RTCP if we allocate up to 5% of bandwidth
        // to feedback.
        const RTCP_SIZE_BYTES: f64 = 80.0;
        const MIN_FEEDBACK_INTERVAL_MS: i64 = 200;
        const MAX_FEEDBACK_INTERVAL_MS: i64 = 1000;
        let rtcp_bitrate_bps = self.current_bitrate_bps as f64 * 0.05;
        let interval_ms = (RTCP_SIZE_BYTES * 8.0 * 1000.0 / rtcp_bitrate_bps + 0.5) as i64;
        interval_ms.clamp(MIN_FEEDBACK_INTERVAL_MS, MAX_FEEDBACK_INTERVAL_MS)
    }

    // Returns true if the bitrate estimate hasn't been changed for more than
    // an RTT, or if the estimated_throughput is less than half of the current
    // estimate. Should be used to decide if we should reduce the rate further
    // when over-using.
    pub fn time_to_reduce_further(&self, now_ms: i64, estimated_throughput_bps: u32) -> bool {
        let bitrate_reduction_interval_ms = self.rtt_ms.clamp(10, 200);
        let elapsed = self
            .time_last_bitrate_change_ms
            .map_or(true, |last| now_ms - last >= bitrate_reduction_interval_ms);
        if elapsed {
            return true;
        }
        if self.valid_estimate() {
            // TODO(terelius/holmer): Investigate consequences of increasing
            // the threshold to 0.95 * latest_estimate().
            let threshold_bps = self.latest_estimate() / 2;
            return estimated_throughput_bps < threshold_bps;
        }
        false
    }

    // As above. To be used if overusing before we have measured a throughput.
    pub fn initial_time_to_reduce_further(&self, now_ms: i64) -> bool {
        match self.initial_backoff_interval_ms {
            None => {
                self.valid_estimate()
                    && self.time_to_reduce_further(
                        now_ms,
                        (self.latest_estimate() / 2).saturating_sub(1),
                    )
            }
            // TODO(terelius): We could use the RTT (clamped to suitable limits) instead
            // of a fixed bitrate_reduction_interval.
            Some(interval_ms) => self
                .time_last_bitrate_decrease_ms
                .map_or(true, |last| now_ms - last >= interval_ms),
        }
    }

    pub fn latest_estimate(&self) -> u32 {
        self.current_bitrate_bps
    }

    pub fn set_rtt(&mut self, rtt_ms: i64) {
        self.rtt_ms = rtt_ms;
    }

    pub fn state(&self) -> RateControlState {
        self.rate_control_state
    }

    pub fn region(&self) -> RateControlRegion {
        self.rate_control_region
    }

    pub fn update(&mut self, input: RateControlInput, now_ms: i64) -> u32 {
        self.current_bitrate_bps = self.change_bitrate(self.current_bitrate_bps, input, now_ms);
        self.current_bitrate_bps
    }

    pub fn set_estimate(&mut self, bitrate_bps: u32, now_ms: i64) {
        self.bitrate_is_initialized = true;
        let prev_bitrate_bps = self.current_bitrate_bps;
        self.current_bitrate_bps = self.clamp_bitrate(bitrate_bps, bitrate_bps);
        self.time_last_bitrate_change_ms = Some(now_ms);
        if self.current_bitrate_bps < prev_bitrate_bps {
            self.time_last_bitrate_decrease_ms = Some(now_ms);
        }
    }

    // Returns the increase rate when used bandwidth is near the link capacity.
    pub fn get_near_max_increase_rate_bps(&self) -> u32 {
        const MIN_INCREASE_RATE_BPS: f64 = 4000.0;
        const PACKET_SIZE_BITS: f64 = 8.0 * 1200.0;

        let bits_per_frame = self.current_bitrate_bps as f64 / 30.0;
        let packets_per_frame = (bits_per_frame / PACKET_SIZE_BITS).ceil();
        let avg_packet_size_bits = if packets_per_frame > 0.0 {
            bits_per_frame / packets_per_frame
        } else {
            0.0
        };

        // Approximate the over-use estimator delay to 100 ms.
        let mut response_time_ms = self.rtt_ms + 100;
        if self.in_experiment {
            response_time_ms *= 2;
        }
        let increase_rate_bps = avg_packet_size_bits * 1000.0 / response_time_ms as f64;
        increase_rate_bps.max(MIN_INCREASE_RATE_BPS) as u32
    }

    // Returns the expected time between overuse signals (assuming steady state).
    pub fn get_expected_bandwidth_period_ms(&self) -> i64 {
        let (min_period_ms, default_period_ms) = if self.smoothing_experiment {
            (Self::MIN_PERIOD_SMOOTHING_MS, Self::DEFAULT_PERIOD_SMOOTHING_MS)
        } else {
            (Self::MIN_PERIOD_MS, Self::DEFAULT_PERIOD_MS)
        };

        let Some(last_decrease_bps) = self.last_decrease_bps else {
            return default_period_ms;
        };

        let increase_rate_bps = self.get_near_max_increase_rate_bps() as i64;
        let period_ms = 1000 * last_decrease_bps as i64 / increase_rate_bps;
        period_ms.clamp(min_period_ms, Self::MAX_PERIOD_MS)
    }

    // Update the target bitrate based on, among other things, the current rate
    // control state, the current target bitrate and the estimated throughput.
    // When in the "increase" state the bitrate will be increased either
    // additively or multiplicatively depending on the rate control region. When
    // in the "decrease" state the bitrate will be decreased to slightly below the
    // current throughput. When in the "hold" state the bitrate will be kept
    // constant to allow built up queues to drain.
    fn change_bitrate(&mut self, mut new_bitrate_bps: u32, input: RateControlInput, now_ms: i64) -> u32 {
        let estimated_throughput_bps = input
            .estimated_throughput_bps
            .unwrap_or(self.latest_estimated_throughput_bps);
        if let Some(estimated_throughput_bps) = input.estimated_throughput_bps {
            self.latest_estimated_throughput_bps = estimated_throughput_bps;
        }

        // An over-use should always trigger us to reduce the bitrate, even though
        // we have not yet established our first estimate. By acting on the over-use,
        // we will end up with a valid estimate.
        if !self.bitrate_is_initialized && input.bw_state != BandwidthUsage::Overusing {
            return self.current_bitrate_bps;
        }

        self.change_state(input.bw_state, now_ms);

        let estimated_throughput_kbps = estimated_throughput_bps as f64 / 1000.0;
        let std_max_bitrate = self
            .avg_max_bitrate_kbps
            .map(|avg| (self.var_max_bitrate_kbps * avg).sqrt());

        match self.rate_control_state {
            RateControlState::Hold => {}
            RateControlState::Increase => {
                if let (Some(avg), Some(std)) = (self.avg_max_bitrate_kbps, std_max_bitrate) {
                    if estimated_throughput_kbps > avg + 3.0 * std {
                        tracing::debug!(
                            avg_max_kbps = avg,
                            estimated_throughput_kbps,
                            "throughput far above the max estimate, resetting"
                        );
                        self.rate_control_region = RateControlRegion::MaxUnknown;
                        self.avg_max_bitrate_kbps = None;
                    }
                }

                let increase_bps = match self.rate_control_region {
                    RateControlRegion::NearMax => self.additive_rate_increase(now_ms),
                    RateControlRegion::AboveMax | RateControlRegion::MaxUnknown => {
                        self.multiplicative_rate_increase(now_ms, new_bitrate_bps)
                    }
                };
                new_bitrate_bps = new_bitrate_bps.saturating_add(increase_bps);
                self.time_last_bitrate_change_ms = Some(now_ms);
            }
            RateControlState::Decrease => {
                // Set bit rate to something slightly lower than max to get rid of any
                // self-induced delay.
                new_bitrate_bps = (self.beta * estimated_throughput_bps as f64 + 0.5) as u32;
                if new_bitrate_bps > self.current_bitrate_bps {
                    // Avoid increasing the rate when over-using.
                    if self.rate_control_region != RateControlRegion::MaxUnknown {
                        if let Some(avg) = self.avg_max_bitrate_kbps {
                            new_bitrate_bps = (self.beta * avg * 1000.0 + 0.5) as u32;
                        }
                    }
                    new_bitrate_bps = new_bitrate_bps.min(self.current_bitrate_bps);
                }
                self.rate_control_region = RateControlRegion::NearMax;

                if self.bitrate_is_initialized
                    && estimated_throughput_bps < self.current_bitrate_bps
                {
                    const DEGRADATION_FACTOR: f64 = 0.9;
                    if self.smoothing_experiment
                        && (new_bitrate_bps as f64)
                            < DEGRADATION_FACTOR * self.beta * self.current_bitrate_bps as f64
                    {
                        // If bitrate decreases more than a normal back off after overuse, it
                        // indicates a real network degradation. We do not let such a decrease
                        // to determine the bandwidth estimation period.
                        self.last_decrease_bps = None;
                    } else {
                        self.last_decrease_bps =
                            Some(self.current_bitrate_bps.saturating_sub(new_bitrate_bps));
                    }
                }

                if let (Some(avg), Some(std)) = (self.avg_max_bitrate_kbps, std_max_bitrate) {
                    if estimated_throughput_kbps < avg - 3.0 * std {
                        tracing::debug!(
                            avg_max_kbps = avg,
                            estimated_throughput_kbps,
                            "throughput far below the max estimate, resetting"
                        );
                        self.avg_max_bitrate_kbps = None;
                    }
                }

                tracing::debug!(
                    from = self.current_bitrate_bps,
                    to = new_bitrate_bps,
                    estimated_throughput_bps,
                    "decreasing bitrate"
                );

                self.bitrate_is_initialized = true;
                self.update_max_throughput_estimate(estimated_throughput_kbps);
                // Stay on hold until the pipes are cleared.
                self.rate_control_state = RateControlState::Hold;
                self.time_last_bitrate_change_ms = Some(now_ms);
                self.time_last_bitrate_decrease_ms = Some(now_ms);
            }
        }

        self.clamp_bitrate(new_bitrate_bps, estimated_throughput_bps)
    }

    fn clamp_bitrate(&self, mut new_bitrate_bps: u32, estimated_throughput_bps: u32) -> u32 {
        // Don't change the bit rate if the send side is too far off.
        // We allow a bit more lag at very low rates to not too easily get stuck if
        // the encoder produces uneven outputs.
        let max_bitrate_bps = ((1.5 * estimated_throughput_bps as f64) as u32).saturating_add(10_000);
        if new_bitrate_bps > self.current_bitrate_bps && new_bitrate_bps > max_bitrate_bps {
            new_bitrate_bps = self.current_bitrate_bps.max(max_bitrate_bps);
        }
        new_bitrate_bps.max(self.min_configured_bitrate_bps)
    }

    fn multiplicative_rate_increase(&self, now_ms: i64, current_bitrate_bps: u32) -> u32 {
        let mut alpha: f64 = 1.08;
        if let Some(last_ms) = self.time_last_bitrate_change_ms {
            let time_since_last_update_ms = (now_ms - last_ms).min(1000);
            alpha = alpha.powf(time_since_last_update_ms as f64 / 1000.0);
        }
        (current_bitrate_bps as f64 * (alpha - 1.0)).max(1000.0) as u32
    }

    fn additive_rate_increase(&self, now_ms: i64) -> u32 {
        let last_ms = self.time_last_bitrate_change_ms.unwrap_or(now_ms);
        let increase = (now_ms - last_ms) * self.get_near_max_increase_rate_bps() as i64 / 1000;
        increase.max(0) as u32
    }

    fn update_max_throughput_estimate(&mut self, estimated_throughput_kbps: f64) {
        let alpha = Self::MAX_THROUGHPUT_SMOOTHING;
        let avg = match self.avg_max_bitrate_kbps {
            None => estimated_throughput_kbps,
            Some(avg) => (1.0 - alpha) * avg + alpha * estimated_throughput_kbps,
        };
        self.avg_max_bitrate_kbps = Some(avg);

        // Variance is normalized by the average to make it independent of the
        // bitrate.
        let norm = avg.max(1.0);
        let error = avg - estimated_throughput_kbps;
        self.var_max_bitrate_kbps =
            ((1.0 - alpha) * self.var_max_bitrate_kbps + alpha * error * error / norm).clamp(0.4, 2.5);
    }

    fn change_state(&mut self, bw_state: BandwidthUsage, now_ms: i64) {
        match (bw_state, self.rate_control_state) {
            (BandwidthUsage::Normal, RateControlState::Hold) => {
                self.time_last_bitrate_change_ms = Some(now_ms);
                self.rate_control_state = RateControlState::Increase;
            }
            // Keep increasing. A decrease always returns to hold within the same
            // update, so it is never observed here.
            (BandwidthUsage::Normal, RateControlState::Increase | RateControlState::Decrease) => {}
            (BandwidthUsage::Overusing, _) => {
                self.rate_control_state = RateControlState::Decrease;
            }
            (BandwidthUsage::Underusing, _) => {
                self.rate_control_state = RateControlState::Hold;
            }
        }
    }
}
