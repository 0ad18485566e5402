// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! One wait/acquire/emit cycle of the capture loop.

use std::{io, time::Duration};

use log::error;
use unix_ts::Timestamp;

use crate::{
    buffer::BufferManager, negotiate::FieldOrder, sink::Sink, v4l2::Driver, Error,
};

/// Default bound on how long one cycle waits for the device
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Outcome of one capture cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// The device did not become ready within the poll timeout
    Idle,
    /// The device was ready but no frame could be taken
    Skipped,
    /// A frame was stamped and delivered to the sink
    Emitted,
}

/// Polls the device and forwards frames to a sink.
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    poll_timeout: Duration,
    field_order: Option<FieldOrder>,
    clock: fn() -> Timestamp,
    last_pts: Option<Timestamp>,
}

impl CaptureLoop {
    pub fn new(poll_timeout: Duration, field_order: Option<FieldOrder>) -> Self {
        CaptureLoop {
            poll_timeout,
            field_order,
            clock: crate::timestamp,
            last_pts: None,
        }
    }

    /// Replace the monotonic clock frames are stamped with.
    pub fn with_clock(mut self, clock: fn() -> Timestamp) -> Self {
        self.clock = clock;
        self
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }

    /// Timestamp of the last emitted frame
    pub fn last_pts(&self) -> Option<Timestamp> {
        self.last_pts
    }

    /// Wait for the device, then take and deliver at most one frame.
    ///
    /// A poll interrupted by a signal is restarted. Any other poll failure
    /// is returned as [`Error::FatalIo`]; per-frame failures are not errors.
    pub fn run_once<D, S>(
        &mut self,
        driver: &mut D,
        buffers: &mut BufferManager<D::Mapping>,
        sink: &mut S,
        stream: &S::Stream,
    ) -> Result<Cycle, Error>
    where
        D: Driver,
        S: Sink,
    {
        let ready = loop {
            match driver.poll(self.poll_timeout) {
                Ok(ready) => break ready,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!("poll error: {}", err);
                    return Err(Error::FatalIo(err));
                }
            }
        };
        if !ready {
            return Ok(Cycle::Idle);
        }

        let mut frame = match buffers.acquire_next_frame(driver) {
            Ok(Some(frame)) => frame,
            Ok(None) | Err(Error::TransientIo(_)) => return Ok(Cycle::Skipped),
            Err(err) => return Err(err),
        };

        let now = (self.clock)();
        let pts = match self.last_pts {
            Some(last) if now < last => last,
            _ => now,
        };
        self.last_pts = Some(pts);

        frame.stamp(pts, self.field_order);
        sink.set_clock(pts);
        sink.send_frame(stream, frame);
        Ok(Cycle::Emitted)
    }
}
