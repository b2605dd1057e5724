/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::fmt::Debug;

/// A fixed-width unsigned counter that rolls over, such as an RTP sequence
/// number or an RTP timestamp. Only types of at most 32 bits are supported so
/// that any unwrapped value fits comfortably in an `i64`.
pub trait WrappingCounter: Copy + Eq + Ord + Debug {
    /// The half-way mark of the value space. For a `u16` it is 0x8000, for a
    /// `u32` it is 0x80000000.
    const BREAKPOINT: Self;

    /// Number of distinct values the counter can take.
    const MODULUS: i64;

    fn wrapping_diff(self, prev: Self) -> Self;
    fn as_i64(self) -> i64;
    fn truncate(value: i64) -> Self;
}

macro_rules! impl_wrapping_counter {
    ($($ty:ty),*) => {
        $(
            impl WrappingCounter for $ty {
                const BREAKPOINT: $ty = (<$ty>::MAX >> 1) + 1;
                const MODULUS: i64 = <$ty>::MAX as i64 + 1;

                fn wrapping_diff(self, prev: Self) -> Self {
                    self.wrapping_sub(prev)
                }

                fn as_i64(self) -> i64 {
                    self as i64
                }

                fn truncate(value: i64) -> Self {
                    value as $ty
                }
            }
        )*
    };
}

impl_wrapping_counter!(u8, u16, u32);

/// Returns true if `value` comes after `prev_value` when the value space is
/// treated as a circle.
///
/// NB: Doesn't fulfill strict weak ordering requirements. Mustn't be used as a
/// sort comparator or an ordered map key comparison.
pub fn is_newer<U: WrappingCounter>(value: U, prev_value: U) -> bool {
    // Distinguish between elements that are exactly BREAKPOINT apart.
    // If t1>t2 and |t1-t2| = BREAKPOINT: is_newer(t1,t2)=true,
    // is_newer(t2,t1)=false
    // rather than having is_newer(t1,t2) = is_newer(t2,t1) = false.
    let diff = value.wrapping_diff(prev_value);
    if diff == U::BREAKPOINT {
        return value > prev_value;
    }
    value != prev_value && diff < U::BREAKPOINT
}

/// Whichever of the two values `is_newer` prefers.
pub fn latest<U: WrappingCounter>(value1: U, value2: U) -> U {
    if is_newer(value1, value2) {
        value1
    } else {
        value2
    }
}

pub fn is_newer_sequence_number(sequence_number: u16, prev_sequence_number: u16) -> bool {
    is_newer(sequence_number, prev_sequence_number)
}

pub fn is_newer_timestamp(timestamp: u32, prev_timestamp: u32) -> bool {
    is_newer(timestamp, prev_timestamp)
}

pub fn latest_sequence_number(sequence_number1: u16, sequence_number2: u16) -> u16 {
    latest(sequence_number1, sequence_number2)
}

pub fn latest_timestamp(timestamp1: u32, timestamp2: u32) -> u32 {
    latest(timestamp1, timestamp2)
}
