// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use unix_ts::Timestamp;

use crate::{frame::Frame, negotiate::NegotiatedFormat, Error};

/// Downstream consumer of captured frames.
///
/// A session registers exactly one stream when it opens, then for every frame
/// calls [`Sink::set_clock`] with the frame's timestamp followed by
/// [`Sink::send_frame`].
pub trait Sink {
    /// Handle identifying the registered elementary stream
    type Stream;

    /// Declare the video stream. Returning an error aborts the open.
    fn register_stream(&mut self, format: &NegotiatedFormat) -> Result<Self::Stream, Error>;

    /// Advance the consumer's reference clock.
    fn set_clock(&mut self, pts: Timestamp);

    fn send_frame(&mut self, stream: &Self::Stream, frame: Frame);
}

impl<S: Sink + ?Sized> Sink for Box<S> {
    type Stream = S::Stream;

    fn register_stream(&mut self, format: &NegotiatedFormat) -> Result<Self::Stream, Error> {
        (**self).register_stream(format)
    }

    fn set_clock(&mut self, pts: Timestamp) {
        (**self).set_clock(pts)
    }

    fn send_frame(&mut self, stream: &Self::Stream, frame: Frame) {
        (**self).send_frame(stream, frame)
    }
}
