// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 Capture Library for Rust
//!
//! Pulls timestamped video frames out of a Linux V4L2 capture device and
//! hands them to a downstream consumer.
//!
//! A [`Session`](session::Session) owns the device for its whole life. Opening
//! it negotiates the best pixel format the device offers against the
//! [`FormatCatalog`](catalog::FormatCatalog), sets up either `read()` I/O or a
//! memory-mapped buffer ring, and starts streaming. Each call to
//! [`Session::demux`](session::Session::demux) then waits at most one poll
//! interval for the device, pulls one frame and delivers it to the
//! [`Sink`](sink::Sink).
//!
//! # Quick Start
//!
//! ```no_run
//! use v4l2cap::frame::Frame;
//! use v4l2cap::negotiate::NegotiatedFormat;
//! use v4l2cap::session::{Session, SessionConfig};
//! use v4l2cap::sink::Sink;
//! use unix_ts::Timestamp;
//!
//! struct Counter(usize);
//!
//! impl Sink for Counter {
//!     type Stream = ();
//!
//!     fn register_stream(&mut self, _: &NegotiatedFormat) -> Result<(), v4l2cap::Error> {
//!         Ok(())
//!     }
//!     fn set_clock(&mut self, _: Timestamp) {}
//!     fn send_frame(&mut self, _: &(), _: Frame) {
//!         self.0 += 1;
//!     }
//! }
//!
//! let config = SessionConfig::default().with_device("/dev/video0");
//! let mut session = Session::open(&config, Counter(0), ())?;
//! while session.sink().0 < 100 {
//!     session.demux()?;
//! }
//! session.close();
//! # Ok::<(), v4l2cap::Error>(())
//! ```
//!
//! # Features
//!
//! - Format negotiation with native-over-emulated preference
//! - Memory-mapped ring with explicit driver/application buffer ownership
//! - Plain `read()` fallback for devices without streaming I/O
//! - Transparent use of libv4l2 when it is installed
//! - Bounded waits: no call blocks longer than the configured poll timeout

use std::{error, fmt, io, path::PathBuf};
use unix_ts::Timestamp;

use crate::fourcc::FourCC;

/// Error type for capture operations
#[derive(Debug)]
pub enum Error {
    /// The device node could not be opened
    DeviceOpenFailed { path: PathBuf, source: io::Error },

    /// The device has no video capture capability
    UnsupportedDevice(String),

    /// Negotiation found no usable format or I/O method
    NoSupportedFormat {
        reason: &'static str,
        attempted: Vec<FourCC>,
    },

    /// Buffer allocation, mapping or queueing failed during set-up
    BufferSetupFailed {
        operation: &'static str,
        source: io::Error,
    },

    /// The driver refused to start streaming
    StreamStartFailed(io::Error),

    /// A per-frame read or dequeue failed; the loop drops the frame
    TransientIo(io::Error),

    /// Waiting for the device failed for a reason other than a signal
    FatalIo(io::Error),

    /// Any other device request failure during set-up
    Io(io::Error),

    /// A requested output codec name is not known
    UnknownCodec(String),

    /// The downstream consumer refused the stream
    Sink(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::DeviceOpenFailed { path, source } => {
                write!(f, "cannot open device '{}': {}", path.display(), source)
            }
            Error::UnsupportedDevice(card) => {
                write!(f, "{} is not a video capture device", card)
            }
            Error::NoSupportedFormat { reason, attempted } => {
                write!(f, "cannot negotiate video format: {}", reason)?;
                if !attempted.is_empty() {
                    let list: Vec<String> = attempted.iter().map(|f| f.to_string()).collect();
                    write!(f, " (device offers {})", list.join(", "))?;
                }
                Ok(())
            }
            Error::BufferSetupFailed { operation, source } => {
                write!(f, "buffer set-up failed ({}): {}", operation, source)
            }
            Error::StreamStartFailed(err) => write!(f, "cannot start streaming: {}", err),
            Error::TransientIo(err) => write!(f, "cannot grab frame: {}", err),
            Error::FatalIo(err) => write!(f, "poll error: {}", err),
            Error::Io(err) => write!(f, "I/O error: {}", err),
            Error::UnknownCodec(name) => write!(f, "invalid codec {}", name),
            Error::Sink(msg) => write!(f, "stream rejected: {}", msg),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::DeviceOpenFailed { source, .. } => Some(source),
            Error::BufferSetupFailed { source, .. } => Some(source),
            Error::StreamStartFailed(err) => Some(err),
            Error::TransientIo(err) => Some(err),
            Error::FatalIo(err) => Some(err),
            Error::Io(err) => Some(err),
            Error::UnsupportedDevice(_)
            | Error::NoSupportedFormat { .. }
            | Error::UnknownCodec(_)
            | Error::Sink(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

/// The fourcc module provides portable handling of fourcc codes.
pub mod fourcc;

/// The catalog module maps V4L2 pixel formats to output codecs.
pub mod catalog;

/// The negotiate module selects the capture format of a device.
pub mod negotiate;

/// The frame module holds the captured frame type.
pub mod frame;

/// The buffer module owns the read buffer or mmap ring of a session.
pub mod buffer;

/// The capture module implements one wait/acquire/emit cycle.
pub mod capture;

/// The session module ties device, buffers, sink and controls together.
pub mod session;

/// The sink module declares the downstream consumer interface.
pub mod sink;

/// The controls module declares the device controls collaborator.
pub mod controls;

/// The v4l2 module provides the device request interface.
pub mod v4l2;

/// Get the current monotonic time
///
/// This is the clock every captured frame is stamped with.
pub fn timestamp() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: clock_gettime only writes into the provided timespec
    unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) };
    Timestamp::new(ts.tv_sec as i64, ts.tv_nsec as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_monotonic() {
        let a = timestamp();
        let b = timestamp();
        assert!(a <= b);
    }

    #[test]
    fn test_negotiation_error_lists_formats() {
        let err = Error::NoSupportedFormat {
            reason: "no format in catalog",
            attempted: vec![FourCC(*b"SBGG"), FourCC(*b"Y16 ")],
        };
        assert_eq!(
            err.to_string(),
            "cannot negotiate video format: no format in catalog (device offers SBGG, Y16 )"
        );
    }
}
