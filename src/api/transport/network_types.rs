/*
 *  Copyright (c) 2018 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::fmt;

/// The delay detector's belief about the state of the link.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BandwidthUsage {
    /// Queueing delay is stable.
    #[default]
    Normal,
    /// Queues are draining; the link has spare capacity.
    Underusing,
    /// Queues are building up.
    Overusing,
}

impl fmt::Display for BandwidthUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::Underusing => "underusing",
            Self::Overusing => "overusing",
        };
        f.write_str(name)
    }
}
