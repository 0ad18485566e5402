// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]
#![allow(clippy::missing_safety_doc)]

mod v4l2;

pub use v4l2::*;

// Re-export libloading for error handling
pub use libloading;

use libc::{c_int, c_ulong, c_void, size_t, ssize_t};
use libloading::Library;
use std::sync::{Mutex, OnceLock};

/// Default soname of the V4L2 user-space conversion library.
pub const LIBV4L2_DEFAULT: &str = "libv4l2.so.0";

/// Environment variable overriding the shim library path.
pub const LIBV4L2_ENV: &str = "V4L2CAP_LIBV4L2";

static LIBRARY: OnceLock<Libv4l2> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());

pub type FdOpenFn = unsafe extern "C" fn(fd: c_int, flags: c_int) -> c_int;
pub type CloseFn = unsafe extern "C" fn(fd: c_int) -> c_int;
pub type IoctlFn = unsafe extern "C" fn(fd: c_int, request: c_ulong, ...) -> c_int;
pub type ReadFn = unsafe extern "C" fn(fd: c_int, buffer: *mut c_void, n: size_t) -> ssize_t;
pub type MmapFn = unsafe extern "C" fn(
    start: *mut c_void,
    length: size_t,
    prot: c_int,
    flags: c_int,
    fd: c_int,
    offset: i64,
) -> *mut c_void;
pub type MunmapFn = unsafe extern "C" fn(start: *mut c_void, length: size_t) -> c_int;

/// Entry points of libv4l2.
///
/// Each function mirrors the libc call of the same name without the `v4l2_`
/// prefix and must only be used on descriptors returned by `v4l2_fd_open`.
pub struct Libv4l2 {
    _lib: Library,
    pub v4l2_fd_open: FdOpenFn,
    pub v4l2_close: CloseFn,
    pub v4l2_ioctl: IoctlFn,
    pub v4l2_read: ReadFn,
    pub v4l2_mmap: MmapFn,
    pub v4l2_munmap: MunmapFn,
}

impl Libv4l2 {
    unsafe fn new(path: &str) -> Result<Self, libloading::Error> {
        let lib = unsafe { Library::new(path)? };
        unsafe {
            let v4l2_fd_open = *lib.get::<FdOpenFn>(b"v4l2_fd_open\0")?;
            let v4l2_close = *lib.get::<CloseFn>(b"v4l2_close\0")?;
            let v4l2_ioctl = *lib.get::<IoctlFn>(b"v4l2_ioctl\0")?;
            let v4l2_read = *lib.get::<ReadFn>(b"v4l2_read\0")?;
            let v4l2_mmap = *lib.get::<MmapFn>(b"v4l2_mmap\0")?;
            let v4l2_munmap = *lib.get::<MunmapFn>(b"v4l2_munmap\0")?;
            Ok(Libv4l2 {
                _lib: lib,
                v4l2_fd_open,
                v4l2_close,
                v4l2_ioctl,
                v4l2_read,
                v4l2_mmap,
                v4l2_munmap,
            })
        }
    }
}

impl std::fmt::Debug for Libv4l2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Libv4l2").finish_non_exhaustive()
    }
}

/// Load the libv4l2 shim.
///
/// The library is loaded once and kept for the life of the process. A failed
/// load is not cached, so a later call may succeed once the library becomes
/// available.
///
/// The environment variable `V4L2CAP_LIBV4L2` can be used to specify a custom
/// path to the library. If not set, searches standard system paths for
/// `libv4l2.so.0`.
pub fn init() -> Result<&'static Libv4l2, libloading::Error> {
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let _guard = INIT_LOCK.lock().unwrap_or_else(|e| e.into_inner());

    // Double-check after acquiring lock
    if let Some(lib) = LIBRARY.get() {
        return Ok(lib);
    }

    let lib_path = std::env::var(LIBV4L2_ENV).unwrap_or_else(|_| LIBV4L2_DEFAULT.to_string());

    let lib = unsafe { Libv4l2::new(lib_path.as_str())? };

    Ok(LIBRARY.get_or_init(|| lib))
}
