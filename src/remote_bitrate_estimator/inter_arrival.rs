/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::units::latest_timestamp;

use super::bwe_defines::{INTER_ARRIVAL_SHIFT, TIMESTAMP_GROUP_LENGTH_MS};

/// Grouping parameters for [InterArrival].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterArrivalSettings {
    /// Packets whose send timestamp is at most this many ticks after the first
    /// packet of a group belong to that group.
    pub group_length_ticks: u32,
    /// Multiplier converting send timestamp ticks to milliseconds.
    pub timestamp_to_ms_coeff: f64,
    /// Merge packets that arrive in a tight burst into the current group.
    pub enable_burst_grouping: bool,
}

impl InterArrivalSettings {
    /// Settings for the 24 bit absolute send time header extension, shifted up
    /// by 8 bits so that it wraps like a 32 bit timestamp.
    pub fn abs_send_time() -> Self {
        Self {
            group_length_ticks: ((TIMESTAMP_GROUP_LENGTH_MS << INTER_ARRIVAL_SHIFT) / 1000) as u32,
            timestamp_to_ms_coeff: 1000.0 / (1u64 << INTER_ARRIVAL_SHIFT) as f64,
            enable_burst_grouping: true,
        }
    }

    /// Settings for a 90 kHz RTP clock.
    pub fn rtp_video() -> Self {
        Self {
            group_length_ticks: (TIMESTAMP_GROUP_LENGTH_MS * 90) as u32,
            timestamp_to_ms_coeff: 1.0 / 90.0,
            enable_burst_grouping: true,
        }
    }

    pub fn validate(&mut self) {
        if !(self.timestamp_to_ms_coeff.is_finite() && self.timestamp_to_ms_coeff > 0.0) {
            tracing::warn!(
                coeff = self.timestamp_to_ms_coeff,
                "Timestamp to ms coefficient must be positive, using the absolute send time clock"
            );
            *self = Self {
                enable_burst_grouping: self.enable_burst_grouping,
                ..Self::abs_send_time()
            };
        }
    }
}

impl Default for InterArrivalSettings {
    fn default() -> Self {
        Self::abs_send_time()
    }
}

/// Deltas between two consecutive, completed timestamp groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterArrivalDeltas {
    /// Send timestamp delta, in timestamp ticks.
    pub timestamp_delta: u32,
    pub arrival_time_delta_ms: i64,
    pub packet_size_delta: i64,
}

#[derive(Clone, Copy, Debug, Default)]
struct TimestampGroup {
    size: usize,
    first_timestamp: u32,
    timestamp: u32,
    first_arrival_ms: i64,
    // Only set once a packet has been added.
    complete_time_ms: Option<i64>,
    last_system_time_ms: i64,
}

impl TimestampGroup {
    fn is_first_packet(&self) -> bool {
        self.complete_time_ms.is_none()
    }
}

// Helper to compute the inter-arrival time delta and the size delta between
// two timestamp groups. A timestamp is a 32 bit unsigned number with a client
// defined rate.
#[derive(Debug, Clone)]
pub struct InterArrival {
    settings: InterArrivalSettings,
    current_timestamp_group: TimestampGroup,
    prev_timestamp_group: TimestampGroup,
    num_consecutive_reordered_packets: usize,
}

impl Default for InterArrival {
    fn default() -> Self {
        Self::new(InterArrivalSettings::default())
    }
}

impl InterArrival {
    /// After this many packet groups received out of order InterArrival will
    /// reset, assuming that clocks have made a jump.
    pub const REORDERED_RESET_THRESHOLD: usize = 3;
    pub const ARRIVAL_TIME_OFFSET_THRESHOLD_MS: i64 = 3000;

    const BURST_DELTA_THRESHOLD_MS: i64 = 5;
    const MAX_BURST_DURATION_MS: i64 = 100;

    pub fn new(mut settings: InterArrivalSettings) -> Self {
        settings.validate();
        Self {
            settings,
            current_timestamp_group: TimestampGroup::default(),
            prev_timestamp_group: TimestampGroup::default(),
            num_consecutive_reordered_packets: 0,
        }
    }

    // A timestamp group is defined as all packets with a timestamp which are at
    // most group_length_ticks older than the first timestamp in that group.
    pub fn with_group_length(
        group_length_ticks: u32,
        timestamp_to_ms_coeff: f64,
        enable_burst_grouping: bool,
    ) -> Self {
        Self::new(InterArrivalSettings {
            group_length_ticks,
            timestamp_to_ms_coeff,
            enable_burst_grouping,
        })
    }

    pub fn settings(&self) -> &InterArrivalSettings {
        &self.settings
    }

    /// Adds a packet and returns the deltas between the two previous groups once
    /// the packet starts a new group.
    ///
    /// `timestamp` is the send timestamp of the packet, `arrival_time_ms` the
    /// local time it arrived at and `system_time_ms` the local wall time used to
    /// detect jumps in the arrival clock.
    ///
    /// Returns `None` while the current group is still incomplete, when only one
    /// group has been completed, or when the packet was rejected.
    pub fn compute_deltas(
        &mut self,
        timestamp: u32,
        arrival_time_ms: i64,
        system_time_ms: i64,
        packet_size: usize,
    ) -> Option<InterArrivalDeltas> {
        let mut deltas = None;

        if self.current_timestamp_group.is_first_packet() {
            // We don't have enough data to update the filter, so we store it until we
            // have two frames of data to process.
            self.current_timestamp_group.timestamp = timestamp;
            self.current_timestamp_group.first_timestamp = timestamp;
            self.current_timestamp_group.first_arrival_ms = arrival_time_ms;
        } else if !self.packet_in_order(timestamp) {
            tracing::trace!(timestamp, "dropping out of order packet");
            return None;
        } else if self.new_timestamp_group(arrival_time_ms, timestamp) {
            // First packet of a later frame, the previous frame sample is ready.
            let current = self.current_timestamp_group;
            let prev = self.prev_timestamp_group;
            if let (Some(current_complete_ms), Some(prev_complete_ms)) =
                (current.complete_time_ms, prev.complete_time_ms)
            {
                let arrival_time_delta_ms = current_complete_ms - prev_complete_ms;

                // Check system time differences to see if we have an unproportional jump
                // in arrival time. In that case reset the inter-arrival computations.
                let system_time_delta_ms = current.last_system_time_ms - prev.last_system_time_ms;
                if arrival_time_delta_ms - system_time_delta_ms
                    >= Self::ARRIVAL_TIME_OFFSET_THRESHOLD_MS
                {
                    tracing::warn!(
                        "The arrival time clock offset has changed (diff = {} ms), resetting.",
                        arrival_time_delta_ms - system_time_delta_ms
                    );
                    self.reset();
                    return None;
                }

                if arrival_time_delta_ms < 0 {
                    // The group of packets has been reordered since receiving its local
                    // arrival timestamp.
                    self.num_consecutive_reordered_packets += 1;
                    if self.num_consecutive_reordered_packets >= Self::REORDERED_RESET_THRESHOLD {
                        tracing::warn!(
                            "Packets are being reordered on the path from the socket to the \
                             bandwidth estimator. Ignoring this packet for bandwidth estimation, \
                             resetting."
                        );
                        self.reset();
                    }
                    return None;
                }
                self.num_consecutive_reordered_packets = 0;

                deltas = Some(InterArrivalDeltas {
                    timestamp_delta: current.timestamp.wrapping_sub(prev.timestamp),
                    arrival_time_delta_ms,
                    packet_size_delta: current.size as i64 - prev.size as i64,
                });
            }

            self.prev_timestamp_group = self.current_timestamp_group;
            // The new timestamp is now the current frame.
            self.current_timestamp_group.first_timestamp = timestamp;
            self.current_timestamp_group.timestamp = timestamp;
            self.current_timestamp_group.first_arrival_ms = arrival_time_ms;
            self.current_timestamp_group.size = 0;
        } else {
            self.current_timestamp_group.timestamp =
                latest_timestamp(self.current_timestamp_group.timestamp, timestamp);
        }

        // Accumulate the frame size.
        self.current_timestamp_group.size += packet_size;
        self.current_timestamp_group.complete_time_ms = Some(arrival_time_ms);
        self.current_timestamp_group.last_system_time_ms = system_time_ms;

        deltas
    }

    // Returns true if the packet with timestamp `timestamp` arrived in order.
    fn packet_in_order(&self, timestamp: u32) -> bool {
        if self.current_timestamp_group.is_first_packet() {
            return true;
        }
        // Assume that a diff which is bigger than half the timestamp interval
        // (32 bits) must be due to reordering.
        let timestamp_diff = timestamp.wrapping_sub(self.current_timestamp_group.first_timestamp);
        timestamp_diff < 0x8000_0000
    }

    // Returns true if the last packet was the end of the current batch and the
    // packet with `timestamp` is the first of a new batch.
    fn new_timestamp_group(&self, arrival_time_ms: i64, timestamp: u32) -> bool {
        if self.current_timestamp_group.is_first_packet()
            || self.belongs_to_burst(arrival_time_ms, timestamp)
        {
            return false;
        }
        let timestamp_diff = timestamp.wrapping_sub(self.current_timestamp_group.first_timestamp);
        timestamp_diff > self.settings.group_length_ticks
    }

    fn belongs_to_burst(&self, arrival_time_ms: i64, timestamp: u32) -> bool {
        if !self.settings.enable_burst_grouping {
            return false;
        }
        let Some(complete_time_ms) = self.current_timestamp_group.complete_time_ms else {
            return false;
        };

        let arrival_time_delta_ms = arrival_time_ms - complete_time_ms;
        let timestamp_diff = timestamp.wrapping_sub(self.current_timestamp_group.timestamp);
        let ts_delta_ms =
            (self.settings.timestamp_to_ms_coeff * timestamp_diff as f64 + 0.5) as i64;
        if ts_delta_ms == 0 {
            return true;
        }

        let propagation_delta_ms = arrival_time_delta_ms - ts_delta_ms;
        let burst = propagation_delta_ms < 0
            && arrival_time_delta_ms <= Self::BURST_DELTA_THRESHOLD_MS
            && arrival_time_ms - self.current_timestamp_group.first_arrival_ms
                < Self::MAX_BURST_DURATION_MS;
        if burst {
            tracing::trace!(
                propagation_delta_ms,
                arrival_time_delta_ms,
                "packet belongs to the current burst"
            );
        }
        burst
    }

    fn reset(&mut self) {
        self.num_consecutive_reordered_packets = 0;
        self.current_timestamp_group = TimestampGroup::default();
        self.prev_timestamp_group = TimestampGroup::default();
    }
}
