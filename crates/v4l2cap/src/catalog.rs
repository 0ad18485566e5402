// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Pixel format catalog
//!
//! The catalog lists every V4L2 pixel format the capture path can hand
//! downstream, in order of decreasing preference. Position in the table is
//! the rank used by [`negotiate`](crate::negotiate): rank 0 is the most
//! preferred format. Formats that are not listed have no descriptor and rank
//! after every listed format.

use std::{fmt, str::FromStr, sync::OnceLock};

use crate::{fourcc::FourCC, Error};

/// Output codec identifier handed to the downstream consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// Planar YUV 4:2:0
    I420,
    /// Planar YVU 4:2:0
    Yv12,
    /// Planar YUV 4:2:2
    I422,
    /// Packed YUV 4:2:2, Y-U-Y-V order
    Yuy2,
    /// Packed YUV 4:2:2, U-Y-V-Y order
    Uyvy,
    /// Packed YUV 4:2:2, Y-V-Y-U order
    Yvyu,
    /// Packed YUV 4:2:2, V-Y-U-Y order
    Vyuy,
    /// Planar YUV 4:1:1
    I411,
    /// Planar YUV 4:1:0
    I410,
    /// Semi-planar YUV 4:2:0
    Nv12,
    /// Semi-planar YVU 4:2:0
    Nv21,
    /// Packed 32-bit RGB, layout given by the channel masks
    Rgb32,
    /// Packed 24-bit RGB, layout given by the channel masks
    Rgb24,
    /// Packed 16-bit RGB 5:6:5
    Rgb16,
    /// Packed 15-bit RGB 5:5:5
    Rgb15,
    /// Motion JPEG
    Mjpg,
    /// H.264 elementary stream
    H264,
    /// MPEG-4 part 2 video
    Mp4v,
    /// H.263
    H263,
    /// MPEG-1/2 video
    Mpgv,
    /// VC-1
    Vc1,
    /// 8-bit greyscale
    Grey,
}

impl Codec {
    const ALL: [Codec; 22] = [
        Codec::I420,
        Codec::Yv12,
        Codec::I422,
        Codec::Yuy2,
        Codec::Uyvy,
        Codec::Yvyu,
        Codec::Vyuy,
        Codec::I411,
        Codec::I410,
        Codec::Nv12,
        Codec::Nv21,
        Codec::Rgb32,
        Codec::Rgb24,
        Codec::Rgb16,
        Codec::Rgb15,
        Codec::Mjpg,
        Codec::H264,
        Codec::Mp4v,
        Codec::H263,
        Codec::Mpgv,
        Codec::Vc1,
        Codec::Grey,
    ];

    /// Canonical four-character name
    pub fn name(&self) -> &'static str {
        match self {
            Codec::I420 => "I420",
            Codec::Yv12 => "YV12",
            Codec::I422 => "I422",
            Codec::Yuy2 => "YUY2",
            Codec::Uyvy => "UYVY",
            Codec::Yvyu => "YVYU",
            Codec::Vyuy => "VYUY",
            Codec::I411 => "I411",
            Codec::I410 => "I410",
            Codec::Nv12 => "NV12",
            Codec::Nv21 => "NV21",
            Codec::Rgb32 => "RV32",
            Codec::Rgb24 => "RV24",
            Codec::Rgb16 => "RV16",
            Codec::Rgb15 => "RV15",
            Codec::Mjpg => "MJPG",
            Codec::H264 => "h264",
            Codec::Mp4v => "mp4v",
            Codec::H263 => "h263",
            Codec::Mpgv => "mpgv",
            Codec::Vc1 => "VC-1",
            Codec::Grey => "GREY",
        }
    }

    /// Whether the codec is a compressed bitstream rather than raw pixels
    pub fn is_compressed(&self) -> bool {
        matches!(
            self,
            Codec::Mjpg | Codec::H264 | Codec::Mp4v | Codec::H263 | Codec::Mpgv | Codec::Vc1
        )
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Codec {
    type Err = Error;

    /// Accepts the canonical name in any case plus a few common aliases.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        if let Some(codec) = Codec::ALL.iter().find(|c| c.name().eq_ignore_ascii_case(&upper)) {
            return Ok(*codec);
        }
        match upper.as_str() {
            "YU12" | "IYUV" => Ok(Codec::I420),
            "YUYV" | "YUNV" => Ok(Codec::Yuy2),
            "RGB32" | "RGBA" => Ok(Codec::Rgb32),
            "RGB24" => Ok(Codec::Rgb24),
            "RGB16" | "RGB565" => Ok(Codec::Rgb16),
            "RGB15" | "RGB555" => Ok(Codec::Rgb15),
            "MJPEG" | "JPEG" => Ok(Codec::Mjpg),
            "AVC" | "AVC1" => Ok(Codec::H264),
            "MPEG4" | "XVID" => Ok(Codec::Mp4v),
            "MPEG2" | "MPEG1" | "MPG2" => Ok(Codec::Mpgv),
            "VC1" | "WVC1" => Ok(Codec::Vc1),
            "GRAY" | "Y800" | "GREY" => Ok(Codec::Grey),
            _ => Err(Error::UnknownCodec(s.to_owned())),
        }
    }
}

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// V4L2 pixel format code
    pub fourcc: FourCC,
    /// Codec announced downstream
    pub codec: Codec,
    /// Red channel mask, zero for non-RGB formats
    pub red_mask: u32,
    /// Green channel mask, zero for non-RGB formats
    pub green_mask: u32,
    /// Blue channel mask, zero for non-RGB formats
    pub blue_mask: u32,
    rank: usize,
}

impl FormatDescriptor {
    /// Preference rank, 0 being the most preferred
    pub fn rank(&self) -> usize {
        self.rank
    }
}

type Row = (&'static [u8; 4], Codec, u32, u32, u32);

#[rustfmt::skip]
const YUV_ROWS: &[Row] = &[
    // Planar YUV 4:2:0
    (b"YU12", Codec::I420, 0, 0, 0),
    (b"YV12", Codec::Yv12, 0, 0, 0),
    (b"422P", Codec::I422, 0, 0, 0),
    // Packed YUV 4:2:2
    (b"YUYV", Codec::Yuy2, 0, 0, 0),
    (b"UYVY", Codec::Uyvy, 0, 0, 0),
    (b"YVYU", Codec::Yvyu, 0, 0, 0),
    (b"VYUY", Codec::Vyuy, 0, 0, 0),
    (b"411P", Codec::I411, 0, 0, 0),
    (b"YUV9", Codec::I410, 0, 0, 0),
    (b"NV12", Codec::Nv12, 0, 0, 0),
    (b"NV21", Codec::Nv21, 0, 0, 0),
];

// Masks describe the pixel as a host-order integer.
#[cfg(target_endian = "little")]
#[rustfmt::skip]
const RGB_ROWS: &[Row] = &[
    (b"RGB4", Codec::Rgb32, 0x0000FF, 0x00FF00, 0xFF0000),
    (b"BGR4", Codec::Rgb32, 0xFF0000, 0x00FF00, 0x0000FF),
    (b"RGB3", Codec::Rgb24, 0x0000FF, 0x00FF00, 0xFF0000),
    (b"BGR3", Codec::Rgb24, 0xFF0000, 0x00FF00, 0x0000FF),
    (b"RGBP", Codec::Rgb16, 0x001F, 0x07E0, 0xF800),
    (b"RGBO", Codec::Rgb15, 0x001F, 0x03E0, 0x7C00),
];

#[cfg(target_endian = "big")]
#[rustfmt::skip]
const RGB_ROWS: &[Row] = &[
    (b"RGB4", Codec::Rgb32, 0xFF00, 0xFF0000, 0xFF000000),
    (b"BGR4", Codec::Rgb32, 0xFF000000, 0xFF0000, 0xFF00),
    (b"RGB3", Codec::Rgb24, 0xFF0000, 0x00FF00, 0x0000FF),
    (b"BGR3", Codec::Rgb24, 0x0000FF, 0x00FF00, 0xFF0000),
    (b"RGBR", Codec::Rgb16, 0x001F, 0x07E0, 0xF800),
    (b"RGBQ", Codec::Rgb15, 0x001F, 0x03E0, 0x7C00),
];

#[rustfmt::skip]
const CODED_ROWS: &[Row] = &[
    (b"JPEG", Codec::Mjpg, 0, 0, 0),
    (b"H264", Codec::H264, 0, 0, 0),
    (b"MPG4", Codec::Mp4v, 0, 0, 0),
    (b"XVID", Codec::Mp4v, 0, 0, 0),
    (b"H263", Codec::H263, 0, 0, 0),
    (b"MPG2", Codec::Mpgv, 0, 0, 0),
    (b"MPG1", Codec::Mpgv, 0, 0, 0),
    (b"VC1G", Codec::Vc1, 0, 0, 0),
    (b"VC1L", Codec::Vc1, 0, 0, 0),
    (b"MJPG", Codec::Mjpg, 0, 0, 0),
    // Greyscale
    (b"GREY", Codec::Grey, 0, 0, 0),
];

fn rows() -> impl Iterator<Item = &'static Row> {
    YUV_ROWS.iter().chain(RGB_ROWS).chain(CODED_ROWS)
}

/// Ordered, immutable list of supported formats.
#[derive(Debug)]
pub struct FormatCatalog {
    entries: Vec<FormatDescriptor>,
}

static CATALOG: OnceLock<FormatCatalog> = OnceLock::new();

/// The process-wide catalog, built on first use.
pub fn catalog() -> &'static FormatCatalog {
    CATALOG.get_or_init(FormatCatalog::build)
}

impl FormatCatalog {
    fn build() -> Self {
        let entries = rows()
            .enumerate()
            .map(|(rank, &(code, codec, red_mask, green_mask, blue_mask))| FormatDescriptor {
                fourcc: FourCC(*code),
                codec,
                red_mask,
                green_mask,
                blue_mask,
                rank,
            })
            .collect();
        FormatCatalog { entries }
    }

    /// Find the descriptor of a V4L2 pixel format.
    pub fn lookup(&self, fourcc: FourCC) -> Option<&FormatDescriptor> {
        self.entries.iter().find(|d| d.fourcc == fourcc)
    }

    /// Rank of an optional descriptor; `None` ranks after everything.
    pub fn rank(descriptor: Option<&FormatDescriptor>) -> usize {
        descriptor.map_or(usize::MAX, FormatDescriptor::rank)
    }

    /// All entries in preference order
    pub fn entries(&self) -> &[FormatDescriptor] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
