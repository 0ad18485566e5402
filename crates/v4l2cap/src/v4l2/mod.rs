// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 Device Request Interface
//!
//! The capture core never issues ioctls directly. Every request it makes to
//! the kernel goes through the [`Driver`] trait, which is a typed rendition of
//! the single-planar V4L2 capture surface:
//!
//! | Driver method | Kernel request |
//! |---------------|----------------|
//! | [`Driver::capabilities`] | `VIDIOC_QUERYCAP` |
//! | [`Driver::enum_format`] | `VIDIOC_ENUM_FMT` |
//! | [`Driver::get_format`] / [`Driver::set_format`] | `VIDIOC_G_FMT` / `VIDIOC_S_FMT` |
//! | [`Driver::enum_frame_size`] | `VIDIOC_ENUM_FRAMESIZES` |
//! | [`Driver::enum_frame_interval`] | `VIDIOC_ENUM_FRAMEINTERVALS` |
//! | [`Driver::get_parm`] / [`Driver::set_parm`] | `VIDIOC_G_PARM` / `VIDIOC_S_PARM` |
//! | [`Driver::request_buffers`] | `VIDIOC_REQBUFS` |
//! | [`Driver::query_buffer`] | `VIDIOC_QUERYBUF` |
//! | [`Driver::queue_buffer`] / [`Driver::dequeue_buffer`] | `VIDIOC_QBUF` / `VIDIOC_DQBUF` |
//! | [`Driver::stream_on`] / [`Driver::stream_off`] | `VIDIOC_STREAMON` / `VIDIOC_STREAMOFF` |
//! | [`Driver::map_buffer`] / [`Driver::unmap_buffer`] | `mmap` / `munmap` |
//! | [`Driver::read`] | `read` |
//! | [`Driver::poll`] | `poll` |
//!
//! [`Device`] implements it for real device nodes. Errors are returned as
//! plain [`std::io::Error`] values carrying the kernel errno; the buffer and
//! session layers translate them into [`crate::Error`].

mod device;

#[cfg(test)]
pub(crate) mod testing;

pub use device::{Device, MappedBuffer};

use std::{cmp::Ordering, fmt, io, time::Duration};

use crate::fourcc::FourCC;
use v4l2cap_sys as ffi;

/// Result of `VIDIOC_QUERYCAP`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Driver name (e.g., "uvcvideo")
    pub driver: String,
    /// Card/device name
    pub card: String,
    /// Bus information
    pub bus_info: String,
    /// Driver version as `KERNEL_VERSION(major, minor, patch)`
    pub version: u32,
    /// Capabilities of the physical device as a whole
    pub capabilities: u32,
    /// Capabilities of this device node, valid with `V4L2_CAP_DEVICE_CAPS`
    pub device_caps: u32,
}

impl Capabilities {
    /// Capabilities that apply to the opened node.
    pub fn effective(&self) -> u32 {
        if self.capabilities & ffi::V4L2_CAP_DEVICE_CAPS != 0 {
            self.device_caps
        } else {
            self.capabilities
        }
    }

    pub fn is_video_capture(&self) -> bool {
        self.effective() & ffi::V4L2_CAP_VIDEO_CAPTURE != 0
    }

    pub fn has_streaming(&self) -> bool {
        self.effective() & ffi::V4L2_CAP_STREAMING != 0
    }

    pub fn has_readwrite(&self) -> bool {
        self.effective() & ffi::V4L2_CAP_READWRITE != 0
    }

    /// Driver version as "major.minor.patch"
    pub fn version_string(&self) -> String {
        format!(
            "{}.{}.{}",
            (self.version >> 16) & 0xFF,
            (self.version >> 8) & 0xFF,
            self.version & 0xFF
        )
    }
}

/// One entry of `VIDIOC_ENUM_FMT`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatDesc {
    pub index: u32,
    pub fourcc: FourCC,
    pub description: String,
    pub flags: u32,
}

impl FormatDesc {
    /// Synthesized by a software conversion layer rather than the hardware
    pub fn is_emulated(&self) -> bool {
        self.flags & ffi::V4L2_FMT_FLAG_EMULATED != 0
    }

    pub fn is_compressed(&self) -> bool {
        self.flags & ffi::V4L2_FMT_FLAG_COMPRESSED != 0
    }
}

/// Single-planar pixel format (`struct v4l2_pix_format`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixFormat {
    pub width: u32,
    pub height: u32,
    pub fourcc: FourCC,
    /// Raw `enum v4l2_field` value
    pub field: u32,
    pub bytes_per_line: u32,
    /// Maximum number of bytes of one complete image
    pub size_image: u32,
}

/// Video resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One entry of `VIDIOC_ENUM_FRAMESIZES`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    Discrete(Resolution),
    /// Stepwise or continuous range
    Range {
        min: Resolution,
        max: Resolution,
        step: Resolution,
    },
}

/// A `struct v4l2_fract`, used here for frame intervals in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Fraction {
    pub numerator: u32,
    pub denominator: u32,
}

impl Fraction {
    pub fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// False for the zero denominators drivers report when they do not
    /// know the value.
    pub fn is_valid(&self) -> bool {
        self.denominator != 0
    }

    /// Compare by value. Invalid fractions compare greater than any valid
    /// one, which makes an unknown interval the longest.
    pub fn cmp_value(&self, other: &Fraction) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (true, true) => {
                let lhs = u64::from(self.numerator) * u64::from(other.denominator);
                let rhs = u64::from(other.numerator) * u64::from(self.denominator);
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

/// One entry of `VIDIOC_ENUM_FRAMEINTERVALS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameInterval {
    Discrete(Fraction),
    /// Stepwise or continuous range
    Range {
        min: Fraction,
        max: Fraction,
        step: Fraction,
    },
}

impl FrameInterval {
    /// Shortest interval this entry allows.
    pub fn shortest(&self) -> Fraction {
        match self {
            FrameInterval::Discrete(it) => *it,
            FrameInterval::Range { min, .. } => *min,
        }
    }
}

/// Capture stream parameters (`struct v4l2_captureparm`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamParm {
    pub capability: u32,
    pub time_per_frame: Fraction,
}

impl StreamParm {
    pub fn supports_time_per_frame(&self) -> bool {
        self.capability & ffi::V4L2_CAP_TIMEPERFRAME != 0
    }
}

/// Result of `VIDIOC_QUERYBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub index: u32,
    /// Offset to pass to `mmap`
    pub offset: u32,
    pub length: u32,
}

/// Result of `VIDIOC_DQBUF`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DequeuedBuffer {
    pub index: u32,
    pub bytes_used: u32,
    pub sequence: u32,
    /// `V4L2_BUF_FLAG_*` bits reported by the driver
    pub flags: u32,
}

impl DequeuedBuffer {
    /// The driver filled this buffer but flagged its contents as corrupt.
    pub fn is_error(&self) -> bool {
        self.flags & ffi::V4L2_BUF_FLAG_ERROR != 0
    }
}

/// Typed V4L2 capture-device requests.
///
/// Enumeration methods return `Ok(None)` once the index runs past the last
/// entry (the kernel's `EINVAL`). [`Driver::poll`] returns `Ok(false)` on
/// timeout and an [`io::ErrorKind::Interrupted`] error when a signal arrived.
pub trait Driver {
    /// A buffer mapped into the process address space
    type Mapping: AsRef<[u8]>;

    fn capabilities(&mut self) -> io::Result<Capabilities>;

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDesc>>;

    fn get_format(&mut self) -> io::Result<PixFormat>;

    /// Returns the format the driver actually applied.
    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat>;

    fn enum_frame_size(&mut self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>>;

    fn enum_frame_interval(
        &mut self,
        fourcc: FourCC,
        size: Resolution,
        index: u32,
    ) -> io::Result<Option<FrameInterval>>;

    fn get_parm(&mut self) -> io::Result<StreamParm>;

    /// Returns the parameters the driver actually applied.
    fn set_parm(&mut self, time_per_frame: Fraction) -> io::Result<StreamParm>;

    /// Returns the number of buffers the driver allocated, which may differ
    /// from `count`.
    fn request_buffers(&mut self, count: u32) -> io::Result<u32>;

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo>;

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<Self::Mapping>;

    fn unmap_buffer(&mut self, mapping: Self::Mapping) -> io::Result<()>;

    fn queue_buffer(&mut self, index: u32) -> io::Result<()>;

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer>;

    fn stream_on(&mut self) -> io::Result<()>;

    fn stream_off(&mut self) -> io::Result<()>;

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;

    /// Wait for the device to become readable.
    fn poll(&mut self, timeout: Duration) -> io::Result<bool>;
}
