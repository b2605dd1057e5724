/*
 *  Copyright (c) 2013 The WebRTC project authors. All Rights Reserved.
 *
 *  Use of this source code is governed by a BSD-style license
 *  that can be found in the LICENSE file in the root of the source
 *  tree. An additional intellectual property rights grant can be found
 *  in the file PATENTS.  All contributing project authors may
 *  be found in the AUTHORS file in the root of the source tree.
 */

use std::marker::PhantomData;

use super::is_newer::{is_newer, WrappingCounter};

/// Turns a wrapping counter into a monotonic 64-bit value, as long as
/// consecutive inputs are less than half the value space apart.
///
/// The first value is passed through unchanged. An unwrapped value never goes
/// below zero; a step backwards past zero is treated as a plain decrease
/// rather than a backwards wrap.
#[derive(Debug, Clone)]
pub struct Unwrapper<U> {
    last_value: Option<i64>,
    _counter: PhantomData<U>,
}

pub type SequenceNumberUnwrapper = Unwrapper<u16>;
pub type TimestampUnwrapper = Unwrapper<u32>;

impl<U> Default for Unwrapper<U> {
    fn default() -> Self {
        Self {
            last_value: None,
            _counter: PhantomData,
        }
    }
}

impl<U: WrappingCounter> Unwrapper<U> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unwraps `value` relative to the last unwrapped value, without storing
    /// the result.
    pub fn unwrap_without_update(&self, value: U) -> i64 {
        let Some(last_value) = self.last_value else {
            return value.as_i64();
        };

        let cropped_last = U::truncate(last_value);
        let mut delta = value.as_i64() - cropped_last.as_i64();
        if is_newer(value, cropped_last) {
            if delta < 0 {
                delta += U::MODULUS; // Wrap forwards.
            }
        } else if delta > 0 && last_value + delta - U::MODULUS >= 0 {
            // If a negative wrap would still leave a non-negative value, wrap
            // backwards.
            delta -= U::MODULUS;
        }

        last_value + delta
    }

    /// Overrides the reference point used by subsequent calls.
    pub fn update_last(&mut self, last_value: i64) {
        self.last_value = Some(last_value);
    }

    pub fn unwrap(&mut self, value: U) -> i64 {
        let unwrapped = self.unwrap_without_update(value);
        self.update_last(unwrapped);
        unwrapped
    }

    pub fn last_value(&self) -> Option<i64> {
        self.last_value
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn first_value_passes_through() {
        let mut unwrapper = SequenceNumberUnwrapper::new();
        assert_eq!(None, unwrapper.last_value());
        assert_eq!(0x1234, unwrapper.unwrap(0x1234));
        assert_eq!(Some(0x1234), unwrapper.last_value());
    }

    #[test]
    fn limits() {
        let mut unwrapper = SequenceNumberUnwrapper::new();

        assert_eq!(0, unwrapper.unwrap(0));
        assert_eq!(0x8000, unwrapper.unwrap(0x8000));
        // Exactly half the space apart with the input lower: step back.
        assert_eq!(0, unwrapper.unwrap(0));

        assert_eq!(0x8000, unwrapper.unwrap(0x8000));
        assert_eq!(0xFFFF, unwrapper.unwrap(0xFFFF));
        assert_eq!(0x10000, unwrapper.unwrap(0));
        assert_eq!(0xFFFF, unwrapper.unwrap(0xFFFF));
        assert_eq!(0x8000, unwrapper.unwrap(0x8000));
        assert_eq!(0, unwrapper.unwrap(0));

        // Never goes negative.
        assert_eq!(0xFFFF, unwrapper.unwrap(0xFFFF));
    }

    #[test]
    fn forward_wraps() {
        let mut unwrapper = SequenceNumberUnwrapper::new();
        let max_increase: i64 = 0x8000 - 1;

        let mut seq: i64 = 0;
        for _ in 0..8 {
            assert_eq!(seq, unwrapper.unwrap((seq & 0xFFFF) as u16));
            seq += max_increase;
        }
        assert!(seq > 3 * 0x10000);
    }

    #[test]
    fn backward_wraps() {
        let mut unwrapper = SequenceNumberUnwrapper::new();
        let max_decrease: i64 = 0x8000 - 1;

        let mut seq: i64 = 8 * max_decrease;
        unwrapper.update_last(seq);
        for _ in 0..=8 {
            assert_eq!(seq, unwrapper.unwrap((seq & 0xFFFF) as u16));
            seq -= max_decrease;
        }
    }

    #[test]
    fn unwrap_without_update_is_pure() {
        let mut unwrapper = SequenceNumberUnwrapper::new();
        unwrapper.unwrap(0xFFF0);

        assert_eq!(0x10005, unwrapper.unwrap_without_update(0x0005));
        assert_eq!(0x10005, unwrapper.unwrap_without_update(0x0005));
        assert_eq!(Some(0xFFF0), unwrapper.last_value());
    }

    #[test]
    fn timestamp_wraps_forward() {
        let mut unwrapper = TimestampUnwrapper::new();
        assert_eq!(0xFFFF_FF00, unwrapper.unwrap(0xFFFF_FF00));
        assert_eq!(0x1_0000_0010, unwrapper.unwrap(0x0000_0010));
        assert_eq!(0x1_0000_0000, unwrapper.unwrap(0x0000_0000));
    }

    #[test]
    fn byte_counter() {
        let mut unwrapper = Unwrapper::<u8>::new();
        let mut expected = 0;
        for step in 0..1000i64 {
            let raw = ((step * 100) & 0xFF) as u8;
            expected = unwrapper.unwrap(raw);
            assert_eq!(step * 100, expected);
        }
        assert_eq!(99_900, expected);
    }
}
