// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! V4L2 device node
//!
//! [`Device`] issues the [`Driver`] requests against an open `/dev/video*`
//! node. When libv4l2 can be loaded, the descriptor is wrapped with
//! `v4l2_fd_open` and every request, read and mapping goes through the
//! library, which adds format emulation for devices that only produce exotic
//! formats. Without the library the raw kernel interface is used.

use std::{
    ffi::c_void,
    fs::OpenOptions,
    io, mem,
    os::unix::{
        fs::OpenOptionsExt,
        io::{IntoRawFd, RawFd},
    },
    path::{Path, PathBuf},
    ptr::NonNull,
    slice,
    time::Duration,
};

use libc::c_ulong;
use log::{debug, warn};
use v4l2cap_sys as ffi;

use super::{
    BufferInfo, Capabilities, DequeuedBuffer, Driver, FormatDesc, Fraction, FrameInterval,
    FrameSize, PixFormat, Resolution, StreamParm,
};
use crate::{fourcc::FourCC, Error};

/// Open V4L2 capture device
#[derive(Debug)]
pub struct Device {
    fd: RawFd,
    path: PathBuf,
    shim: Option<&'static ffi::Libv4l2>,
}

/// A driver buffer mapped with `mmap`.
///
/// [`Device::unmap_buffer`] releases the mapping and reports failures. A
/// mapping that is dropped instead is released too; a failure is only
/// logged.
#[derive(Debug)]
pub struct MappedBuffer {
    ptr: NonNull<u8>,
    len: usize,
    shim: Option<&'static ffi::Libv4l2>,
}

impl MappedBuffer {
    fn release(&self) -> io::Result<()> {
        let ptr = self.ptr.as_ptr() as *mut c_void;
        // SAFETY: the region was mapped by map_buffer with this length
        let ret = unsafe {
            match self.shim {
                Some(lib) => (lib.v4l2_munmap)(ptr, self.len),
                None => libc::munmap(ptr, self.len),
            }
        };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for MappedBuffer {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            warn!("munmap of {} bytes failed: {}", self.len, err);
        }
    }
}

impl AsRef<[u8]> for MappedBuffer {
    fn as_ref(&self) -> &[u8] {
        // SAFETY: the region stays mapped until the mapping is released
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

impl Device {
    /// Open a device node in non-blocking mode.
    ///
    /// The user-space library is tried next; if it is unavailable or refuses
    /// the descriptor, the raw descriptor is used.
    pub fn open(path: impl AsRef<Path>) -> Result<Device, Error> {
        let path = path.as_ref();
        debug!("opening device '{}'", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|source| Error::DeviceOpenFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let rawfd = file.into_raw_fd();

        let (fd, shim) = match ffi::init() {
            Ok(lib) => {
                // SAFETY: rawfd is an open descriptor we own
                let fd = unsafe { (lib.v4l2_fd_open)(rawfd, 0) };
                if fd == -1 {
                    warn!(
                        "cannot initialize user-space library: {}",
                        io::Error::last_os_error()
                    );
                    (rawfd, None)
                } else {
                    (fd, Some(lib))
                }
            }
            Err(err) => {
                warn!("cannot initialize user-space library: {}", err);
                (rawfd, None)
            }
        };

        Ok(Device {
            fd,
            path: path.to_path_buf(),
            shim,
        })
    }

    /// Device path (e.g., "/dev/video0")
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether requests go through libv4l2
    pub fn uses_shim(&self) -> bool {
        self.shim.is_some()
    }

    fn ioctl<T>(&self, request: c_ulong, arg: &mut T) -> io::Result<()> {
        let arg = arg as *mut T as *mut c_void;
        loop {
            // SAFETY: arg points to the structure the request code encodes
            let ret = unsafe {
                match self.shim {
                    Some(lib) => (lib.v4l2_ioctl)(self.fd, request, arg),
                    None => libc::ioctl(self.fd, request as _, arg),
                }
            };
            if ret != -1 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Run an enumeration request, mapping the end-of-list EINVAL to None.
    fn enumerate<T>(&self, request: c_ulong, arg: &mut T) -> io::Result<bool> {
        match self.ioctl(request, arg) {
            Ok(()) => Ok(true),
            Err(err) if err.raw_os_error() == Some(libc::EINVAL) => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn buffer_request(index: u32) -> ffi::v4l2_buffer {
        ffi::v4l2_buffer {
            index,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        }
    }
}

impl Driver for Device {
    type Mapping = MappedBuffer;

    fn capabilities(&mut self) -> io::Result<Capabilities> {
        let mut cap = ffi::v4l2_capability::default();
        self.ioctl(ffi::VIDIOC_QUERYCAP, &mut cap)?;
        Ok(Capabilities {
            driver: c_string(&cap.driver),
            card: c_string(&cap.card),
            bus_info: c_string(&cap.bus_info),
            version: cap.version,
            capabilities: cap.capabilities,
            device_caps: cap.device_caps,
        })
    }

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDesc>> {
        let mut desc = ffi::v4l2_fmtdesc {
            index,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        if !self.enumerate(ffi::VIDIOC_ENUM_FMT, &mut desc)? {
            return Ok(None);
        }
        Ok(Some(FormatDesc {
            index,
            fourcc: FourCC::from_u32(desc.pixelformat),
            description: c_string(&desc.description),
            flags: desc.flags,
        }))
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        let mut fmt = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        self.ioctl(ffi::VIDIOC_G_FMT, &mut fmt)?;
        // SAFETY: the pix member is active for VIDEO_CAPTURE
        Ok(pix_from_raw(unsafe { &fmt.fmt.pix }))
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat> {
        let mut fmt = ffi::v4l2_format {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        fmt.fmt.pix = ffi::v4l2_pix_format {
            width: format.width,
            height: format.height,
            pixelformat: format.fourcc.to_u32(),
            field: format.field,
            bytesperline: format.bytes_per_line,
            sizeimage: format.size_image,
            ..Default::default()
        };
        self.ioctl(ffi::VIDIOC_S_FMT, &mut fmt)?;
        // SAFETY: the pix member is active for VIDEO_CAPTURE
        Ok(pix_from_raw(unsafe { &fmt.fmt.pix }))
    }

    fn enum_frame_size(&mut self, fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>> {
        let mut size = ffi::v4l2_frmsizeenum {
            index,
            pixel_format: fourcc.to_u32(),
            ..Default::default()
        };
        if !self.enumerate(ffi::VIDIOC_ENUM_FRAMESIZES, &mut size)? {
            return Ok(None);
        }
        // SAFETY: the active member is selected by type_
        let size = unsafe {
            match size.type_ {
                ffi::V4L2_FRMSIZE_TYPE_DISCRETE => FrameSize::Discrete(Resolution::new(
                    size.u.discrete.width,
                    size.u.discrete.height,
                )),
                _ => {
                    let s = size.u.stepwise;
                    FrameSize::Range {
                        min: Resolution::new(s.min_width, s.min_height),
                        max: Resolution::new(s.max_width, s.max_height),
                        step: Resolution::new(s.step_width, s.step_height),
                    }
                }
            }
        };
        Ok(Some(size))
    }

    fn enum_frame_interval(
        &mut self,
        fourcc: FourCC,
        size: Resolution,
        index: u32,
    ) -> io::Result<Option<FrameInterval>> {
        let mut ival = ffi::v4l2_frmivalenum {
            index,
            pixel_format: fourcc.to_u32(),
            width: size.width,
            height: size.height,
            ..Default::default()
        };
        if !self.enumerate(ffi::VIDIOC_ENUM_FRAMEINTERVALS, &mut ival)? {
            return Ok(None);
        }
        let fract = |f: ffi::v4l2_fract| Fraction::new(f.numerator, f.denominator);
        // SAFETY: the active member is selected by type_
        let interval = unsafe {
            match ival.type_ {
                ffi::V4L2_FRMIVAL_TYPE_DISCRETE => FrameInterval::Discrete(fract(ival.u.discrete)),
                _ => {
                    let s = ival.u.stepwise;
                    FrameInterval::Range {
                        min: fract(s.min),
                        max: fract(s.max),
                        step: fract(s.step),
                    }
                }
            }
        };
        Ok(Some(interval))
    }

    fn get_parm(&mut self) -> io::Result<StreamParm> {
        let mut parm = ffi::v4l2_streamparm {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        self.ioctl(ffi::VIDIOC_G_PARM, &mut parm)?;
        // SAFETY: the capture member is active for VIDEO_CAPTURE
        Ok(parm_from_raw(unsafe { &parm.parm.capture }))
    }

    fn set_parm(&mut self, time_per_frame: Fraction) -> io::Result<StreamParm> {
        let mut parm = ffi::v4l2_streamparm {
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            ..Default::default()
        };
        parm.parm.capture = ffi::v4l2_captureparm {
            timeperframe: ffi::v4l2_fract {
                numerator: time_per_frame.numerator,
                denominator: time_per_frame.denominator,
            },
            ..Default::default()
        };
        self.ioctl(ffi::VIDIOC_S_PARM, &mut parm)?;
        // SAFETY: the capture member is active for VIDEO_CAPTURE
        Ok(parm_from_raw(unsafe { &parm.parm.capture }))
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        let mut req = ffi::v4l2_requestbuffers {
            count,
            type_: ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE,
            memory: ffi::V4L2_MEMORY_MMAP,
            ..Default::default()
        };
        self.ioctl(ffi::VIDIOC_REQBUFS, &mut req)?;
        Ok(req.count)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        let mut buf = Self::buffer_request(index);
        self.ioctl(ffi::VIDIOC_QUERYBUF, &mut buf)?;
        Ok(BufferInfo {
            index,
            // SAFETY: offset is the active member for MEMORY_MMAP
            offset: unsafe { buf.m.offset },
            length: buf.length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<MappedBuffer> {
        let len = info.length as usize;
        let prot = libc::PROT_READ | libc::PROT_WRITE;
        // SAFETY: maps a driver-provided region; validity is checked below
        let ptr = unsafe {
            match self.shim {
                Some(lib) => (lib.v4l2_mmap)(
                    std::ptr::null_mut(),
                    len,
                    prot,
                    libc::MAP_SHARED,
                    self.fd,
                    i64::from(info.offset),
                ),
                None => libc::mmap(
                    std::ptr::null_mut(),
                    len,
                    prot,
                    libc::MAP_SHARED,
                    self.fd,
                    info.offset as libc::off_t,
                ),
            }
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }
        NonNull::new(ptr as *mut u8)
            .map(|ptr| MappedBuffer {
                ptr,
                len,
                shim: self.shim,
            })
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }

    fn unmap_buffer(&mut self, mapping: MappedBuffer) -> io::Result<()> {
        let result = mapping.release();
        mem::forget(mapping);
        result
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        let mut buf = Self::buffer_request(index);
        self.ioctl(ffi::VIDIOC_QBUF, &mut buf)
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        let mut buf = Self::buffer_request(0);
        self.ioctl(ffi::VIDIOC_DQBUF, &mut buf)?;
        Ok(DequeuedBuffer {
            index: buf.index,
            bytes_used: buf.bytesused,
            sequence: buf.sequence,
            flags: buf.flags,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        let mut buf_type: libc::c_int = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.ioctl(ffi::VIDIOC_STREAMON, &mut buf_type)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        let mut buf_type: libc::c_int = ffi::V4L2_BUF_TYPE_VIDEO_CAPTURE as libc::c_int;
        self.ioctl(ffi::VIDIOC_STREAMOFF, &mut buf_type)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        let ptr = buffer.as_mut_ptr() as *mut c_void;
        // SAFETY: ptr is valid for buffer.len() bytes of writes
        let ret = unsafe {
            match self.shim {
                Some(lib) => (lib.v4l2_read)(self.fd, ptr, buffer.len()),
                None => libc::read(self.fd, ptr, buffer.len()),
            }
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as usize)
    }

    fn poll(&mut self, timeout: Duration) -> io::Result<bool> {
        let mut ufd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN | libc::POLLPRI,
            revents: 0,
        };
        let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
        // SAFETY: ufd is a single valid pollfd
        let ret = unsafe { libc::poll(&mut ufd, 1, timeout_ms) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        if ret == 0 {
            return Ok(false);
        }
        poll_readiness(ufd.revents)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        // SAFETY: fd is owned by this device and closed exactly once
        unsafe {
            match self.shim {
                Some(lib) => (lib.v4l2_close)(self.fd),
                None => libc::close(self.fd),
            };
        }
    }
}

/// Interpret the `revents` of a capture descriptor.
///
/// Error and hang-up conditions are reported as `ENODEV`.
fn poll_readiness(revents: libc::c_short) -> io::Result<bool> {
    if revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        return Err(io::Error::from_raw_os_error(libc::ENODEV));
    }
    Ok(revents & (libc::POLLIN | libc::POLLPRI) != 0)
}

fn pix_from_raw(pix: &ffi::v4l2_pix_format) -> PixFormat {
    PixFormat {
        width: pix.width,
        height: pix.height,
        fourcc: FourCC::from_u32(pix.pixelformat),
        field: pix.field,
        bytes_per_line: pix.bytesperline,
        size_image: pix.sizeimage,
    }
}

fn parm_from_raw(capture: &ffi::v4l2_captureparm) -> StreamParm {
    StreamParm {
        capability: capture.capability,
        time_per_frame: Fraction::new(
            capture.timeperframe.numerator,
            capture.timeperframe.denominator,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_c_string_stops_at_nul() {
        let mut raw = [0u8; 32];
        raw[..9].copy_from_slice(b"uvcvideo\0");
        raw[10] = b'x';
        assert_eq!(c_string(&raw), "uvcvideo");
        assert_eq!(c_string(b"full"), "full");
    }

    #[test]
    fn test_poll_readiness() {
        assert!(!poll_readiness(0).unwrap());
        assert!(poll_readiness(libc::POLLIN).unwrap());
        assert!(poll_readiness(libc::POLLPRI).unwrap());
        for revents in [
            libc::POLLERR,
            libc::POLLHUP,
            libc::POLLNVAL,
            libc::POLLIN | libc::POLLERR,
        ] {
            let err = poll_readiness(revents).unwrap_err();
            assert_eq!(err.raw_os_error(), Some(libc::ENODEV));
        }
    }

    fn anonymous_mapping(len: usize) -> MappedBuffer {
        // SAFETY: private anonymous mapping with no backing descriptor
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        assert_ne!(ptr, libc::MAP_FAILED);
        MappedBuffer {
            ptr: NonNull::new(ptr as *mut u8).unwrap(),
            len,
            shim: None,
        }
    }

    fn is_mapped(addr: usize, len: usize) -> bool {
        // SAFETY: msync only inspects the range and fails with ENOMEM if unmapped
        unsafe { libc::msync(addr as *mut c_void, len, libc::MS_ASYNC) == 0 }
    }

    #[test]
    fn test_dropped_mapping_is_released() {
        let len = 4096;
        let mapping = anonymous_mapping(len);
        let addr = mapping.ptr.as_ptr() as usize;
        assert_eq!(mapping.as_ref().len(), len);
        assert!(is_mapped(addr, len));
        drop(mapping);
        assert!(!is_mapped(addr, len));
    }

    #[test]
    fn test_unmap_releases_mapping() {
        let len = 4096;
        let mapping = anonymous_mapping(len);
        let addr = mapping.ptr.as_ptr() as usize;
        assert!(mapping.release().is_ok());
        mem::forget(mapping);
        assert!(!is_mapped(addr, len));
    }

    #[test]
    fn test_open_missing_device() {
        let err = Device::open("/dev/v4l2cap-does-not-exist").unwrap_err();
        match err {
            Error::DeviceOpenFailed { path, source } => {
                assert_eq!(path, PathBuf::from("/dev/v4l2cap-does-not-exist"));
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {}", other),
        }
    }
}
