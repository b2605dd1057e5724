/*
 *  Copyright (c) 2012 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use crate::api::transport::BandwidthUsage;

pub const CONGESTION_CONTROLLER_MIN_BITRATE_BPS: u32 = 5_000;
pub const BITRATE_WINDOW_MS: i64 = 1000;

pub const TIMESTAMP_GROUP_LENGTH_MS: i64 = 5;
pub const ABS_SEND_TIME_FRACTION: u32 = 18;
pub const ABS_SEND_TIME_INTER_ARRIVAL_UPSHIFT: u32 = 8;
pub const INTER_ARRIVAL_SHIFT: u32 = ABS_SEND_TIME_FRACTION + ABS_SEND_TIME_INTER_ARRIVAL_UPSHIFT;

/// Bitrate control state.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RateControlState {
    #[default]
    Hold,
    Increase,
    Decrease,
}

/// Where the current bitrate is believed to be relative to the link capacity.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RateControlRegion {
    NearMax,
    AboveMax,
    #[default]
    MaxUnknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateControlInput {
    pub bw_state: BandwidthUsage,
    /// Acknowledged throughput, if one could be measured.
    pub estimated_throughput_bps: Option<u32>,
}

impl RateControlInput {
    pub fn new(bw_state: BandwidthUsage, estimated_throughput_bps: Option<u32>) -> Self {
        RateControlInput {
            bw_state,
            estimated_throughput_bps,
        }
    }
}
