// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture format negotiation
//!
//! [`FormatNegotiator::negotiate`] walks a device from its capabilities down
//! to one [`NegotiatedFormat`]:
//!
//! 1. the I/O method follows the capability flags, streaming before `read()`;
//! 2. the pixel format is picked from the device's list against the
//!    [`FormatCatalog`](crate::catalog::FormatCatalog);
//! 3. the largest frame size with the highest frame rate is applied;
//! 4. the field mode and sample aspect ratio are derived from the result.
//!
//! # Format selection
//!
//! A format whose codec matches the requested one is taken as soon as it is
//! seen. Otherwise a format produced natively by the hardware is preferred
//! over one emulated in software, and within each group the lowest catalog
//! rank wins. When two candidates rank the same, the first one enumerated is
//! kept.

use std::{cmp::Ordering, fmt, str::FromStr};

use log::{debug, warn};
use v4l2cap_sys as ffi;

use crate::{
    catalog::{catalog, Codec, FormatCatalog, FormatDescriptor},
    fourcc::FourCC,
    v4l2::{Capabilities, Driver, Fraction, FrameSize, PixFormat, Resolution, StreamParm},
    Error,
};

/// How frames are transferred from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMethod {
    /// Synchronous `read()` into an application buffer
    Read,
    /// Ring of driver buffers mapped into the process
    MemoryMapped,
}

impl fmt::Display for IoMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IoMethod::Read => f.write_str("read"),
            IoMethod::MemoryMapped => f.write_str("mmap"),
        }
    }
}

/// Interlacing of the negotiated format (`enum v4l2_field`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldMode {
    Progressive,
    TopOnly,
    BottomOnly,
    /// Both fields interleaved, order not specified by the driver
    Interlaced,
    SequentialTB,
    SequentialBT,
    /// Fields delivered in separate buffers
    Alternate,
    InterleavedTB,
    InterleavedBT,
    Unknown(u32),
}

/// Which field a consumer should display first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOrder {
    TopFieldFirst,
    BottomFieldFirst,
}

impl FieldMode {
    pub fn from_raw(field: u32) -> Self {
        match field {
            ffi::V4L2_FIELD_NONE => FieldMode::Progressive,
            ffi::V4L2_FIELD_TOP => FieldMode::TopOnly,
            ffi::V4L2_FIELD_BOTTOM => FieldMode::BottomOnly,
            ffi::V4L2_FIELD_INTERLACED => FieldMode::Interlaced,
            ffi::V4L2_FIELD_SEQ_TB => FieldMode::SequentialTB,
            ffi::V4L2_FIELD_SEQ_BT => FieldMode::SequentialBT,
            ffi::V4L2_FIELD_ALTERNATE => FieldMode::Alternate,
            ffi::V4L2_FIELD_INTERLACED_TB => FieldMode::InterleavedTB,
            ffi::V4L2_FIELD_INTERLACED_BT => FieldMode::InterleavedBT,
            other => FieldMode::Unknown(other),
        }
    }

    /// Field order flag carried by every frame of this mode.
    ///
    /// Sequential and alternate modes are recognized but not flagged.
    pub fn field_order(&self) -> Option<FieldOrder> {
        match self {
            FieldMode::Interlaced | FieldMode::InterleavedTB => Some(FieldOrder::TopFieldFirst),
            FieldMode::InterleavedBT => Some(FieldOrder::BottomFieldFirst),
            _ => None,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            FieldMode::Progressive => "progressive",
            FieldMode::TopOnly => "top field only",
            FieldMode::BottomOnly => "bottom field only",
            FieldMode::Interlaced => "interleaved",
            FieldMode::SequentialTB => "sequential top bottom",
            FieldMode::SequentialBT => "sequential bottom top",
            FieldMode::Alternate => "alternate fields",
            FieldMode::InterleavedTB => "interleaved top bottom",
            FieldMode::InterleavedBT => "interleaved bottom top",
            FieldMode::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for FieldMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Display aspect ratio given as `"N:D"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AspectRatio {
    pub num: u32,
    pub den: u32,
}

impl Default for AspectRatio {
    fn default() -> Self {
        AspectRatio { num: 4, den: 3 }
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (num, den) = s
            .split_once(':')
            .ok_or_else(|| format!("missing ':' in aspect ratio '{}'", s))?;
        let num: u32 = num
            .trim()
            .parse()
            .map_err(|_| format!("invalid aspect ratio '{}'", s))?;
        let den: u32 = den
            .trim()
            .parse()
            .map_err(|_| format!("invalid aspect ratio '{}'", s))?;
        if num == 0 || den == 0 {
            return Err(format!("aspect ratio '{}' has a zero term", s));
        }
        Ok(AspectRatio { num, den })
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.num, self.den)
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

impl AspectRatio {
    /// Parse `value`, falling back to 4:3 when it is malformed.
    pub fn parse_or_default(value: &str) -> Self {
        value.parse().unwrap_or_else(|err| {
            warn!("{}, using 4:3", err);
            AspectRatio::default()
        })
    }

    /// Pixel aspect ratio that stretches `width`x`height` to this ratio.
    ///
    /// The result is reduced; a zero dimension yields 1:1.
    pub fn sample_aspect(&self, width: u32, height: u32) -> (u32, u32) {
        let num = u64::from(self.num) * u64::from(height);
        let den = u64::from(self.den) * u64::from(width);
        if num == 0 || den == 0 {
            return (1, 1);
        }
        let divisor = gcd(num, den);
        let (num, den) = (num / divisor, den / divisor);
        match (u32::try_from(num), u32::try_from(den)) {
            (Ok(num), Ok(den)) => (num, den),
            _ => (1, 1),
        }
    }
}

/// The capture format a session runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiatedFormat {
    pub descriptor: FormatDescriptor,
    pub width: u32,
    /// Frame height; twice the field height in alternate mode
    pub height: u32,
    pub field: FieldMode,
    /// Frames per `frame_rate_base` seconds; zero when the driver did not say
    pub frame_rate: u32,
    pub frame_rate_base: u32,
    /// Largest payload of one frame in bytes
    pub max_frame_bytes: u32,
    pub bytes_per_line: u32,
    /// Sample (pixel) aspect ratio as numerator and denominator
    pub sample_aspect: (u32, u32),
    pub io_method: IoMethod,
}

impl NegotiatedFormat {
    pub fn codec(&self) -> Codec {
        self.descriptor.codec
    }

    pub fn fourcc(&self) -> FourCC {
        self.descriptor.fourcc
    }

    pub fn field_order(&self) -> Option<FieldOrder> {
        self.field.field_order()
    }

    /// Frames per second, if known
    pub fn fps(&self) -> Option<f64> {
        if self.frame_rate == 0 || self.frame_rate_base == 0 {
            return None;
        }
        Some(f64::from(self.frame_rate) / f64::from(self.frame_rate_base))
    }
}

/// Pick the transfer method from the capability flags.
pub fn select_io_method(caps: &Capabilities) -> Result<IoMethod, Error> {
    if caps.has_streaming() {
        Ok(IoMethod::MemoryMapped)
    } else if caps.has_readwrite() {
        Ok(IoMethod::Read)
    } else {
        Err(Error::NoSupportedFormat {
            reason: "no supported I/O method",
            attempted: Vec::new(),
        })
    }
}

/// What happened to one enumerated format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Matches the requested codec; selection is final
    Matched,
    /// Became the current candidate
    Selected,
    /// Lost against the current candidate
    Ignored,
}

/// Running state of the format selection.
#[derive(Debug, Clone, Default)]
pub struct Selector {
    request: Option<Codec>,
    selected: Option<(FormatDescriptor, bool)>,
    done: bool,
}

impl Selector {
    pub fn new(request: Option<Codec>) -> Self {
        Selector {
            request,
            ..Default::default()
        }
    }

    /// Consider one catalogued format; `emulated` is the driver's flag.
    pub fn offer(&mut self, desc: &FormatDescriptor, emulated: bool) -> Offer {
        if self.done {
            return Offer::Ignored;
        }
        if self.request == Some(desc.codec) {
            self.selected = Some((*desc, emulated));
            self.done = true;
            return Offer::Matched;
        }
        let replace = match self.selected {
            None => true,
            Some((current, current_emulated)) => match (current_emulated, emulated) {
                (false, true) => false,
                (true, false) => true,
                _ => desc.rank() < current.rank(),
            },
        };
        if replace {
            self.selected = Some((*desc, emulated));
            Offer::Selected
        } else {
            Offer::Ignored
        }
    }

    /// True once the requested codec was found
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn selected(&self) -> Option<&FormatDescriptor> {
        self.selected.as_ref().map(|(desc, _)| desc)
    }
}

/// Negotiates the capture format of a device.
#[derive(Debug, Clone)]
pub struct FormatNegotiator {
    catalog: &'static FormatCatalog,
    request: Option<Codec>,
    aspect: AspectRatio,
}

impl Default for FormatNegotiator {
    fn default() -> Self {
        FormatNegotiator {
            catalog: catalog(),
            request: None,
            aspect: AspectRatio::default(),
        }
    }
}

impl FormatNegotiator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prefer `codec` over every other format the device offers.
    pub fn with_request(mut self, codec: Option<Codec>) -> Self {
        self.request = codec;
        self
    }

    pub fn with_aspect_ratio(mut self, aspect: AspectRatio) -> Self {
        self.aspect = aspect;
        self
    }

    /// Run the whole negotiation against an open device.
    pub fn negotiate<D: Driver>(&self, driver: &mut D) -> Result<NegotiatedFormat, Error> {
        let caps = driver.capabilities()?;
        debug!(
            "device {} using driver {} (version {}) on {}",
            caps.card,
            caps.driver,
            caps.version_string(),
            caps.bus_info
        );
        debug!(
            " with capabilities 0x{:08X} (overall 0x{:08X})",
            caps.effective(),
            caps.capabilities
        );
        if !caps.is_video_capture() {
            return Err(Error::UnsupportedDevice(caps.card));
        }
        let io_method = select_io_method(&caps)?;

        let descriptor = self.select_format(driver)?;
        debug!(
            "selected format {} ({})",
            descriptor.fourcc, descriptor.codec
        );

        let (pix, parm) = setup_format(driver, descriptor.fourcc)?;
        debug!("{} bytes maximum for complete image", pix.size_image);

        let field = FieldMode::from_raw(pix.field);
        match field {
            FieldMode::Unknown(raw) => warn!("Interlacing setting: unknown type ({})", raw),
            mode => debug!("Interlacing setting: {}", mode),
        }
        let height = if field == FieldMode::Alternate {
            pix.height.saturating_mul(2)
        } else {
            pix.height
        };

        let format = NegotiatedFormat {
            descriptor,
            width: pix.width,
            height,
            field,
            frame_rate: parm.time_per_frame.denominator,
            frame_rate_base: parm.time_per_frame.numerator,
            max_frame_bytes: pix.size_image,
            bytes_per_line: pix.bytes_per_line,
            sample_aspect: self.aspect.sample_aspect(pix.width, height),
            io_method,
        };
        debug!(
            "negotiated {} {}x{} at {}/{} using {} I/O",
            format.codec(),
            format.width,
            format.height,
            format.frame_rate,
            format.frame_rate_base,
            format.io_method
        );
        Ok(format)
    }

    /// Enumerate the device's formats and pick one.
    pub fn select_format<D: Driver>(&self, driver: &mut D) -> Result<FormatDescriptor, Error> {
        let mut selector = Selector::new(self.request);
        let mut attempted = Vec::new();

        for index in 0.. {
            let Some(desc) = driver.enum_format(index)? else {
                break;
            };
            attempted.push(desc.fourcc);
            let entry = self.catalog.lookup(desc.fourcc);
            debug!(
                " {} {} format {} ({}): {}",
                if desc.is_emulated() { "emulates" } else { "supports" },
                if desc.is_compressed() { "compressed" } else { "raw" },
                desc.fourcc,
                entry.map_or("N.A.".to_owned(), |e| e.codec.to_string()),
                desc.description
            );
            let Some(entry) = entry else {
                continue;
            };
            if selector.offer(entry, desc.is_emulated()) == Offer::Selected {
                debug!("  best candidate so far");
            }
            if selector.is_done() {
                debug!("  matches the requested format");
                break;
            }
        }

        selector.selected().copied().ok_or(Error::NoSupportedFormat {
            reason: "no format in catalog",
            attempted,
        })
    }
}

/// Find the frame size with the shortest frame interval for `fourcc`.
///
/// Returns `None` for the size when the driver does not enumerate sizes, and
/// an invalid fraction for the interval when it does not report one.
fn find_best_size<D: Driver>(driver: &mut D, fourcc: FourCC) -> (Option<Resolution>, Fraction) {
    let mut best_size = None;
    let mut best_interval = Fraction::default();
    let mut best_area = 0;

    for index in 0.. {
        let size = match driver.enum_frame_size(fourcc, index) {
            Ok(Some(size)) => size,
            Ok(None) => break,
            Err(err) => {
                debug!("cannot enumerate frame sizes: {}", err);
                break;
            }
        };
        match size {
            FrameSize::Discrete(res) => {
                let interval = find_max_rate(driver, fourcc, res);
                debug!(" frame size {} at interval {}", res, interval);
                let better = match interval.cmp_value(&best_interval) {
                    Ordering::Less => true,
                    Ordering::Equal => res.area() > best_area,
                    Ordering::Greater => false,
                };
                if better {
                    best_size = Some(res);
                    best_interval = interval;
                    best_area = res.area();
                }
            }
            FrameSize::Range { min, max, .. } => {
                debug!(" frame sizes from {} to {}", min, max);
                best_interval = find_max_rate(driver, fourcc, max);
                best_size = Some(max);
                break;
            }
        }
    }
    (best_size, best_interval)
}

/// Shortest frame interval the driver offers at `size`.
fn find_max_rate<D: Driver>(driver: &mut D, fourcc: FourCC, size: Resolution) -> Fraction {
    let mut best = Fraction::default();
    for index in 0.. {
        match driver.enum_frame_interval(fourcc, size, index) {
            Ok(Some(interval)) => {
                let shortest = interval.shortest();
                if shortest.cmp_value(&best) == Ordering::Less {
                    best = shortest;
                }
            }
            Ok(None) => break,
            Err(err) => {
                debug!("cannot enumerate frame intervals: {}", err);
                break;
            }
        }
    }
    best
}

/// Apply `fourcc` at the best size, then set the frame rate.
fn setup_format<D: Driver>(
    driver: &mut D,
    fourcc: FourCC,
) -> Result<(PixFormat, StreamParm), Error> {
    let mut pix = driver.get_format()?;
    pix.fourcc = fourcc;

    let (size, interval) = find_best_size(driver, fourcc);
    if let Some(size) = size {
        pix.width = size.width;
        pix.height = size.height;
        debug!("best frame size {} at interval {}", size, interval);
    }

    let pix = driver.set_format(&pix)?;

    let parm = match driver.get_parm() {
        Ok(parm) => parm,
        Err(err) => {
            warn!("cannot get streaming parameters: {}", err);
            StreamParm::default()
        }
    };
    if !parm.supports_time_per_frame() || !interval.is_valid() {
        return Ok((pix, parm));
    }
    match driver.set_parm(interval) {
        Ok(applied) => Ok((pix, applied)),
        Err(err) => {
            warn!("cannot set streaming parameters: {}", err);
            Ok((pix, parm))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::v4l2::{
        testing::{emulated, native, Call, ScriptedDriver},
        FormatDesc, FrameInterval,
    };
    use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};

    fn lookup(code: &[u8; 4]) -> FormatDescriptor {
        *catalog().lookup(FourCC(*code)).unwrap()
    }

    fn driver_with(formats: Vec<FormatDesc>) -> ScriptedDriver {
        let mut driver = ScriptedDriver::streaming();
        driver.formats = formats;
        driver
    }

    #[test]
    fn test_requested_codec_wins_and_stops_enumeration() {
        let mut driver = driver_with(vec![
            native(0, b"YU12"),
            native(1, b"MJPG"),
            native(2, b"YUYV"),
        ]);
        let log = driver.log();
        let negotiator = FormatNegotiator::new().with_request(Some(Codec::Mjpg));
        let desc = negotiator.select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"MJPG"));

        let enumerated: Vec<_> = log
            .borrow()
            .iter()
            .filter(|c| matches!(c, Call::EnumFormat(_)))
            .copied()
            .collect();
        assert_eq!(enumerated, vec![Call::EnumFormat(0), Call::EnumFormat(1)]);
    }

    #[test]
    fn test_native_beats_better_ranked_emulated() {
        let mut driver = driver_with(vec![emulated(0, b"YU12"), native(1, b"MJPG")]);
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"MJPG"));

        let mut driver = driver_with(vec![native(0, b"MJPG"), emulated(1, b"YU12")]);
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"MJPG"));
    }

    #[test]
    fn test_native_beats_better_ranked_emulated_with_and_without_request() {
        let formats = || vec![emulated(0, b"YU12"), native(1, b"YUYV")];
        assert!(lookup(b"YU12").rank() < lookup(b"YUYV").rank());

        let mut driver = driver_with(formats());
        let desc = FormatNegotiator::new()
            .with_request(Some(Codec::Yuy2))
            .select_format(&mut driver)
            .unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"YUYV"));

        let mut driver = driver_with(formats());
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"YUYV"));
    }

    #[test]
    fn test_request_stops_the_selector() {
        let mut selector = Selector::new(Some(Codec::Mjpg));
        assert_eq!(selector.offer(&lookup(b"YU12"), false), Offer::Selected);
        assert!(!selector.is_done());
        assert_eq!(selector.offer(&lookup(b"MJPG"), true), Offer::Matched);
        assert!(selector.is_done());
        assert_eq!(selector.offer(&lookup(b"NV12"), false), Offer::Ignored);
        assert_eq!(selector.selected().map(|d| d.codec), Some(Codec::Mjpg));
    }

    #[test]
    fn test_lower_rank_wins_within_tier() {
        let mut driver = driver_with(vec![native(0, b"MJPG"), native(1, b"YUYV")]);
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"YUYV"));

        let mut driver = driver_with(vec![emulated(0, b"RGB3"), emulated(1, b"YU12")]);
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.fourcc, FourCC(*b"YU12"));
    }

    #[test]
    fn test_equal_rank_keeps_first() {
        let yuyv = lookup(b"YUYV");
        let mut selector = Selector::new(None);
        assert_eq!(selector.offer(&yuyv, false), Offer::Selected);
        assert_eq!(selector.offer(&yuyv, false), Offer::Ignored);
        assert_eq!(selector.offer(&lookup(b"MJPG"), false), Offer::Ignored);
        assert_eq!(selector.selected(), Some(&yuyv));
    }

    #[test]
    fn test_uncatalogued_formats_are_skipped() {
        let mut driver = driver_with(vec![native(0, b"SBGG"), native(1, b"GREY")]);
        let desc = FormatNegotiator::new().select_format(&mut driver).unwrap();
        assert_eq!(desc.codec, Codec::Grey);
    }

    #[test]
    fn test_no_candidate_lists_every_format() {
        let mut driver = driver_with(vec![native(0, b"SBGG"), emulated(1, b"Y16 ")]);
        match FormatNegotiator::new().select_format(&mut driver) {
            Err(Error::NoSupportedFormat { attempted, .. }) => {
                assert_eq!(attempted, vec![FourCC(*b"SBGG"), FourCC(*b"Y16 ")]);
            }
            other => panic!("unexpected result: {:?}", other.map(|d| d.fourcc)),
        }
    }

    #[test]
    fn test_selection_is_order_independent() {
        let pool: Vec<(&[u8; 4], bool)> = vec![
            (b"YU12", true),
            (b"NV12", false),
            (b"YUYV", true),
            (b"MJPG", false),
            (b"H264", false),
            (b"RGB3", true),
            (b"SBGG", false),
            (b"GREY", false),
        ];
        let mut rng = StdRng::seed_from_u64(0x5eed);

        for _ in 0..200 {
            let mut formats = pool.clone();
            formats.shuffle(&mut rng);
            let count = rng.random_range(1..=formats.len());
            formats.truncate(count);

            let expected = {
                let known: Vec<_> = formats
                    .iter()
                    .filter_map(|(code, em)| catalog().lookup(FourCC(**code)).map(|d| (*d, *em)))
                    .collect();
                let tier: Vec<_> = if known.iter().any(|(_, em)| !em) {
                    known.iter().filter(|(_, em)| !em).collect()
                } else {
                    known.iter().collect()
                };
                tier.iter().map(|(d, _)| *d).min_by_key(|d| d.rank())
            };

            let descs = formats
                .iter()
                .enumerate()
                .map(|(i, (code, em))| {
                    if *em {
                        emulated(i as u32, code)
                    } else {
                        native(i as u32, code)
                    }
                })
                .collect();
            let mut driver = driver_with(descs);
            let got = FormatNegotiator::new().select_format(&mut driver).ok();
            assert_eq!(got, expected, "formats: {:?}", formats);
        }
    }

    #[test]
    fn test_io_method_from_capabilities() {
        let driver = ScriptedDriver::streaming();
        assert_eq!(select_io_method(&driver.caps).unwrap(), IoMethod::MemoryMapped);
        let driver = ScriptedDriver::read_only();
        assert_eq!(select_io_method(&driver.caps).unwrap(), IoMethod::Read);
        let driver = ScriptedDriver::with_caps(ffi::V4L2_CAP_VIDEO_CAPTURE);
        assert!(matches!(
            select_io_method(&driver.caps),
            Err(Error::NoSupportedFormat { .. })
        ));
    }

    #[test]
    fn test_rejects_non_capture_device() {
        let mut driver = ScriptedDriver::with_caps(ffi::V4L2_CAP_STREAMING);
        assert!(matches!(
            FormatNegotiator::new().negotiate(&mut driver),
            Err(Error::UnsupportedDevice(card)) if card == "Scripted Camera"
        ));
    }

    #[test]
    fn test_alternate_doubles_height() {
        let mut driver = ScriptedDriver::streaming();
        driver.current.height = 240;
        driver.current.field = ffi::V4L2_FIELD_ALTERNATE;
        let format = FormatNegotiator::new().negotiate(&mut driver).unwrap();
        assert_eq!(format.field, FieldMode::Alternate);
        assert_eq!(format.height, 480);
        assert_eq!(format.field_order(), None);
    }

    #[test]
    fn test_field_order_flags() {
        assert_eq!(
            FieldMode::from_raw(ffi::V4L2_FIELD_INTERLACED).field_order(),
            Some(FieldOrder::TopFieldFirst)
        );
        assert_eq!(
            FieldMode::from_raw(ffi::V4L2_FIELD_INTERLACED_TB).field_order(),
            Some(FieldOrder::TopFieldFirst)
        );
        assert_eq!(
            FieldMode::from_raw(ffi::V4L2_FIELD_INTERLACED_BT).field_order(),
            Some(FieldOrder::BottomFieldFirst)
        );
        assert_eq!(FieldMode::from_raw(ffi::V4L2_FIELD_SEQ_TB).field_order(), None);
        assert_eq!(FieldMode::from_raw(42), FieldMode::Unknown(42));
    }

    #[test]
    fn test_picks_fastest_then_largest_size() {
        let mut driver = ScriptedDriver::streaming();
        let small = Resolution::new(320, 240);
        let mid = Resolution::new(640, 480);
        let large = Resolution::new(1280, 720);
        driver.frame_sizes = vec![
            FrameSize::Discrete(small),
            FrameSize::Discrete(mid),
            FrameSize::Discrete(large),
        ];
        driver.intervals = vec![
            (small, vec![FrameInterval::Discrete(Fraction::new(1, 30))]),
            (
                mid,
                vec![
                    FrameInterval::Discrete(Fraction::new(1, 15)),
                    FrameInterval::Discrete(Fraction::new(1, 30)),
                ],
            ),
            (large, vec![FrameInterval::Discrete(Fraction::new(1, 10))]),
        ];
        driver.parm.capability = ffi::V4L2_CAP_TIMEPERFRAME;
        let log = driver.log();

        let format = FormatNegotiator::new().negotiate(&mut driver).unwrap();
        assert_eq!((format.width, format.height), (640, 480));
        assert_eq!((format.frame_rate, format.frame_rate_base), (30, 1));
        assert!(log.borrow().contains(&Call::SetParm(Fraction::new(1, 30))));
    }

    #[test]
    fn test_range_uses_maximum_size() {
        let mut driver = ScriptedDriver::streaming();
        driver.frame_sizes = vec![FrameSize::Range {
            min: Resolution::new(16, 16),
            max: Resolution::new(1920, 1080),
            step: Resolution::new(16, 16),
        }];
        let log = driver.log();
        let format = FormatNegotiator::new().negotiate(&mut driver).unwrap();
        assert_eq!((format.width, format.height), (1920, 1080));
        // no interval known and no TIMEPERFRAME: the driver's rate is kept
        assert!(!log.borrow().iter().any(|c| matches!(c, Call::SetParm(_))));
    }

    #[test]
    fn test_get_parm_failure_is_not_fatal() {
        let mut driver = ScriptedDriver::streaming().fail(Call::GetParm, libc::ENOTTY);
        let format = FormatNegotiator::new().negotiate(&mut driver).unwrap();
        assert_eq!(format.fps(), None);
    }

    #[test]
    fn test_set_format_failure_is_fatal() {
        let mut driver =
            ScriptedDriver::streaming().fail(Call::SetFormat(FourCC(*b"YUYV")), libc::EBUSY);
        assert!(matches!(
            FormatNegotiator::new().negotiate(&mut driver),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_sample_aspect() {
        let ar: AspectRatio = "16:9".parse().unwrap();
        assert_eq!(ar.sample_aspect(640, 480), (4, 3));
        assert_eq!(AspectRatio::default().sample_aspect(640, 480), (1, 1));
        assert_eq!(AspectRatio::default().sample_aspect(720, 576), (16, 15));
    }

    #[test]
    fn test_malformed_aspect_ratio_falls_back() {
        for input in ["garbage", "16/9", "a:b", "0:3", "4:0", ""] {
            assert_eq!(AspectRatio::parse_or_default(input), AspectRatio::default());
        }
        assert_eq!(
            AspectRatio::parse_or_default(" 16 : 10 "),
            AspectRatio { num: 16, den: 10 }
        );
    }

    #[test]
    fn test_negotiated_sar_uses_doubled_height() {
        let mut driver = ScriptedDriver::streaming();
        driver.current.width = 720;
        driver.current.height = 288;
        driver.current.field = ffi::V4L2_FIELD_ALTERNATE;
        let format = FormatNegotiator::new().negotiate(&mut driver).unwrap();
        assert_eq!(format.sample_aspect, (16, 15));
    }
}
