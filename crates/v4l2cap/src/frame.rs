// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use unix_ts::Timestamp;

use crate::negotiate::FieldOrder;

/// A captured video frame.
///
/// The payload is owned: memory-mapped captures copy the driver buffer out
/// before handing it back to the device. Timestamps are taken from the
/// monotonic clock when the frame is emitted; `pts` and `dts` are always
/// equal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    payload: Vec<u8>,
    pub pts: Timestamp,
    pub dts: Timestamp,
    pub field_order: Option<FieldOrder>,
    /// Driver sequence number, or a running count in `read()` mode
    pub sequence: u32,
}

impl Frame {
    /// Create an unstamped frame; the capture loop sets the timestamps.
    pub fn new(payload: Vec<u8>, sequence: u32) -> Self {
        Frame {
            payload,
            pts: Timestamp::new(0, 0),
            dts: Timestamp::new(0, 0),
            field_order: None,
            sequence,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub(crate) fn stamp(&mut self, ts: Timestamp, field_order: Option<FieldOrder>) {
        self.pts = ts;
        self.dts = ts;
        self.field_order = field_order;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_sets_both_timestamps() {
        let mut frame = Frame::new(vec![1, 2, 3], 7);
        frame.stamp(Timestamp::new(12, 500), Some(FieldOrder::TopFieldFirst));
        assert_eq!(frame.pts, frame.dts);
        assert_eq!(frame.pts, Timestamp::new(12, 500));
        assert_eq!(frame.field_order, Some(FieldOrder::TopFieldFirst));
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.into_payload(), vec![1, 2, 3]);
    }
}
