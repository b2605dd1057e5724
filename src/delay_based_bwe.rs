/*
 *  Copyright (c) 2016 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::{
    api::transport::BandwidthUsage,
    remote_bitrate_estimator::{AimdRateControl, InterArrival, RateControlInput},
    rtc::RateStatistics,
    DelayIncreaseDetectorInterface, FieldTrials, TrendlineEstimator,
};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DelayBasedBweResult {
    pub updated: bool,
    pub target_bitrate_bps: u32,
    pub recovered_from_overuse: bool,
    pub delay_detector_state: BandwidthUsage,
}

/// Delay based bandwidth estimation: groups packets by send time, detects delay
/// increases and turns the detector state and the acknowledged throughput into
/// a target bitrate.
#[derive(Debug, Clone)]
pub struct DelayBasedBwe {
    field_trials: FieldTrials,
    inter_arrival: InterArrival,
    delay_detector: TrendlineEstimator,
    acknowledged_bitrate: RateStatistics,
    rate_control: AimdRateControl,

    last_seen_packet_ms: Option<i64>,
    // Set when the detector goes from underusing to normal, cleared by the
    // next estimate update.
    recovered_from_overuse: bool,
    prev_bitrate_bps: u32,
    prev_state: BandwidthUsage,
}

impl Default for DelayBasedBwe {
    fn default() -> Self {
        Self::new(&FieldTrials::default())
    }
}

impl DelayBasedBwe {
    const STREAM_TIME_OUT_MS: i64 = 2000;

    pub fn new(field_trials: &FieldTrials) -> Self {
        tracing::info!("Initialized DelayBasedBwe with {:?}", field_trials);
        Self {
            field_trials: field_trials.clone(),
            inter_arrival: InterArrival::new(field_trials.inter_arrival),
            delay_detector: TrendlineEstimator::new(field_trials.trendline_estimator_settings),
            acknowledged_bitrate: RateStatistics::from_settings(field_trials.rate_statistics),
            rate_control: AimdRateControl::new(field_trials),
            last_seen_packet_ms: None,
            recovered_from_overuse: false,
            prev_bitrate_bps: 0,
            prev_state: BandwidthUsage::Normal,
        }
    }

    /// Feeds one received packet into the delay detector.
    ///
    /// `send_timestamp` is in the clock configured for the inter arrival grouping
    /// and `system_time_ms` is the local wall clock at reception.
    pub fn incoming_packet(
        &mut self,
        send_timestamp: u32,
        arrival_time_ms: i64,
        system_time_ms: i64,
        packet_size: usize,
    ) {
        // Reset if the stream has timed out.
        let timed_out = self.last_seen_packet_ms.map_or(true, |last_seen_ms| {
            arrival_time_ms - last_seen_ms > Self::STREAM_TIME_OUT_MS
        });
        if timed_out {
            if self.last_seen_packet_ms.is_some() {
                tracing::debug!(arrival_time_ms, "stream timed out, resetting delay detector");
            }
            self.inter_arrival = InterArrival::new(self.field_trials.inter_arrival);
            self.delay_detector =
                TrendlineEstimator::new(self.field_trials.trendline_estimator_settings);
        }
        self.last_seen_packet_ms = Some(arrival_time_ms);

        let prev_detector_state = self.delay_detector.state();
        if let Some(deltas) = self.inter_arrival.compute_deltas(
            send_timestamp,
            arrival_time_ms,
            system_time_ms,
            packet_size,
        ) {
            let send_delta_ms =
                deltas.timestamp_delta as f64 * self.inter_arrival.settings().timestamp_to_ms_coeff;
            self.delay_detector.update(
                deltas.arrival_time_delta_ms as f64,
                send_delta_ms,
                arrival_time_ms,
            );
        }

        if prev_detector_state == BandwidthUsage::Underusing
            && self.delay_detector.state() == BandwidthUsage::Normal
        {
            self.recovered_from_overuse = true;
        }
    }

    /// Records `bytes` acknowledged by the receiver at `now_ms`.
    pub fn incoming_acknowledged(&mut self, bytes: usize, now_ms: i64) {
        self.acknowledged_bitrate.update(bytes as u64, now_ms);
    }

    pub fn update_estimate(&mut self, now_ms: i64) -> DelayBasedBweResult {
        let mut result = DelayBasedBweResult::default();
        let acked_bitrate_bps = self.acknowledged_bitrate.rate(now_ms);
        let recovered_from_overuse = std::mem::take(&mut self.recovered_from_overuse);

        // Currently overusing the bandwidth.
        if self.delay_detector.state() == BandwidthUsage::Overusing {
            if let Some(acked_bitrate_bps) = acked_bitrate_bps {
                if self.rate_control.time_to_reduce_further(now_ms, acked_bitrate_bps) {
                    result.updated = self.update_rate_control(
                        now_ms,
                        Some(acked_bitrate_bps),
                        &mut result.target_bitrate_bps,
                    );
                }
            } else if self.rate_control.valid_estimate()
                && self.rate_control.initial_time_to_reduce_further(now_ms)
            {
                // Overusing before we have a measured acknowledged bitrate. Reduce send
                // rate by 50% every 200 ms.
                self.rate_control
                    .set_estimate(self.rate_control.latest_estimate() / 2, now_ms);
                result.updated = true;
                result.target_bitrate_bps = self.rate_control.latest_estimate();
            }
        } else {
            result.updated = self.update_rate_control(
                now_ms,
                acked_bitrate_bps,
                &mut result.target_bitrate_bps,
            );
            result.recovered_from_overuse = recovered_from_overuse;
        }

        let detector_state = self.delay_detector.state();
        if (result.updated && self.prev_bitrate_bps != result.target_bitrate_bps)
            || detector_state != self.prev_state
        {
            if result.updated {
                self.prev_bitrate_bps = result.target_bitrate_bps;
            }
            self.prev_state = detector_state;
        }

        result.delay_detector_state = detector_state;
        result
    }

    pub fn on_rtt_update(&mut self, avg_rtt_ms: i64) {
        self.rate_control.set_rtt(avg_rtt_ms);
    }

    /// The current estimate, if one has been established.
    pub fn latest_estimate(&self) -> Option<u32> {
        self.rate_control
            .valid_estimate()
            .then(|| self.rate_control.latest_estimate())
    }

    pub fn set_start_bitrate(&mut self, start_bitrate_bps: u32) {
        tracing::info!("BWE Setting start bitrate to: {} bps", start_bitrate_bps);
        self.rate_control.set_start_bitrate(start_bitrate_bps);
    }

    pub fn set_min_bitrate(&mut self, min_bitrate_bps: u32) {
        self.rate_control.set_min_bitrate(min_bitrate_bps);
    }

    pub fn expected_bwe_period_ms(&self) -> i64 {
        self.rate_control.get_expected_bandwidth_period_ms()
    }

    /// Forces a back-off as if the detector had signaled an over-use.
    pub fn trigger_overuse(&mut self, now_ms: i64, link_capacity_bps: Option<u32>) -> u32 {
        let input = RateControlInput::new(BandwidthUsage::Overusing, link_capacity_bps);
        self.rate_control.update(input, now_ms)
    }

    pub fn last_estimate(&self) -> u32 {
        self.prev_bitrate_bps
    }

    pub fn last_state(&self) -> BandwidthUsage {
        self.prev_state
    }

    // Updates the current remote rate estimate and returns true if a valid
    // estimate exists.
    fn update_rate_control(
        &mut self,
        now_ms: i64,
        acked_bitrate_bps: Option<u32>,
        target_bitrate_bps: &mut u32,
    ) -> bool {
        let input = RateControlInput::new(self.delay_detector.state(), acked_bitrate_bps);
        *target_bitrate_bps = self.rate_control.update(input, now_ms);
        self.rate_control.valid_estimate()
    }
}
