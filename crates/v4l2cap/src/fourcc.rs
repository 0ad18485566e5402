// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies
//
// Taken from https://docs.rs/crate/four-cc/latest and adapted to the V4L2
// packing, which is little-endian regardless of the host.
#![forbid(unsafe_code)]

use core::{fmt, result::Result, str::FromStr};

use crate::Error;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(C, packed)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    /// Build from the kernel's 32-bit code (`v4l2_fourcc(a, b, c, d)`)
    pub const fn from_u32(val: u32) -> FourCC {
        FourCC(val.to_le_bytes())
    }

    /// The kernel's 32-bit code
    pub const fn to_u32(self) -> u32 {
        u32::from_le_bytes(self.0)
    }
}

impl From<&[u8; 4]> for FourCC {
    fn from(buf: &[u8; 4]) -> FourCC {
        FourCC(*buf)
    }
}

impl From<u32> for FourCC {
    fn from(val: u32) -> FourCC {
        FourCC::from_u32(val)
    }
}

impl From<FourCC> for u32 {
    fn from(val: FourCC) -> Self {
        val.to_u32()
    }
}

impl FromStr for FourCC {
    type Err = Error;

    /// Parses exactly four ASCII characters; shorter codes are padded with
    /// spaces as the kernel does (`"Y16"` becomes `"Y16 "`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        if bytes.is_empty() || bytes.len() > 4 || !s.is_ascii() {
            return Err(Error::UnknownCodec(s.to_owned()));
        }
        let mut code = [b' '; 4];
        code[..bytes.len()].copy_from_slice(bytes);
        Ok(FourCC(code))
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        match core::str::from_utf8(&b) {
            Ok(s) if b.iter().all(|c| c.is_ascii_graphic() || *c == b' ') => f.write_str(s),
            _ => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let b = self.0;
        f.debug_tuple("FourCC")
            .field(&format_args!(
                "{}{}{}{}",
                core::ascii::escape_default(b[0]),
                core::ascii::escape_default(b[1]),
                core::ascii::escape_default(b[2]),
                core::ascii::escape_default(b[3])
            ))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_packing() {
        // V4L2_PIX_FMT_YUYV
        assert_eq!(FourCC(*b"YUYV").to_u32(), 0x5659_5559);
        assert_eq!(FourCC::from(0x3231_564e), FourCC(*b"NV12"));
    }

    #[test]
    fn test_parse_pads_short_codes() {
        let code: FourCC = "Y16".parse().unwrap();
        assert_eq!(code, FourCC(*b"Y16 "));
        assert!("TOOLONG".parse::<FourCC>().is_err());
        assert!("".parse::<FourCC>().is_err());
    }

    #[test]
    fn test_display_unprintable() {
        assert_eq!(FourCC(*b"MJPG").to_string(), "MJPG");
        assert_eq!(FourCC([0, 1, 2, 3]).to_string(), "0x03020100");
    }
}
