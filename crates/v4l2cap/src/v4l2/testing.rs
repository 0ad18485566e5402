// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Scripted [`Driver`] for unit tests.
//!
//! Every request is appended to a shared call log so tests can assert the
//! order of device operations after the driver has been moved into a session.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    rc::Rc,
    time::Duration,
};

use v4l2cap_sys as ffi;

use super::{
    BufferInfo, Capabilities, DequeuedBuffer, Driver, FormatDesc, Fraction, FrameInterval,
    FrameSize, PixFormat, Resolution, StreamParm,
};
use crate::fourcc::FourCC;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Capabilities,
    EnumFormat(u32),
    GetFormat,
    SetFormat(FourCC),
    EnumFrameSize(u32),
    EnumFrameInterval(u32),
    GetParm,
    SetParm(Fraction),
    RequestBuffers(u32),
    QueryBuffer(u32),
    MapBuffer(u32),
    UnmapBuffer(u32),
    QueueBuffer(u32),
    DequeueBuffer,
    StreamOn,
    StreamOff,
    Read,
    Poll,
}

pub(crate) type CallLog = Rc<RefCell<Vec<Call>>>;

/// Buffer mapping backed by heap memory; every byte holds the buffer index.
#[derive(Debug)]
pub(crate) struct FakeMapping {
    pub index: u32,
    data: Vec<u8>,
}

impl AsRef<[u8]> for FakeMapping {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

pub(crate) fn errno(code: i32) -> io::Error {
    io::Error::from_raw_os_error(code)
}

#[derive(Debug)]
pub(crate) struct ScriptedDriver {
    pub caps: Capabilities,
    pub formats: Vec<FormatDesc>,
    pub current: PixFormat,
    pub frame_sizes: Vec<FrameSize>,
    /// Intervals offered for every frame size
    pub intervals: Vec<(Resolution, Vec<FrameInterval>)>,
    pub parm: StreamParm,
    /// Buffers the driver grants for a non-zero request
    pub granted_buffers: u32,
    pub buffer_length: u32,
    /// Payload sizes returned by successive dequeues, or an errno
    pub dequeues: VecDeque<Result<u32, i32>>,
    /// Successive read results, or an errno; empty means EAGAIN
    pub reads: VecDeque<Result<Vec<u8>, i32>>,
    /// Successive poll results, or an errno; empty means ready
    pub polls: VecDeque<Result<bool, i32>>,
    /// One-shot failures: the next matching call fails with the errno
    pub failures: Vec<(Call, i32)>,
    /// Indices currently held by the driver, in queue order
    pub driver_queue: VecDeque<u32>,
    /// Sequence numbers whose buffers come back with `V4L2_BUF_FLAG_ERROR`
    pub corrupt_sequences: Vec<u32>,
    sequence: u32,
    log: CallLog,
}

impl ScriptedDriver {
    /// A streaming-capable capture device offering YUYV at 640x480.
    pub fn streaming() -> Self {
        Self::with_caps(
            ffi::V4L2_CAP_VIDEO_CAPTURE | ffi::V4L2_CAP_STREAMING | ffi::V4L2_CAP_READWRITE,
        )
    }

    /// A capture device that only supports `read()`.
    pub fn read_only() -> Self {
        Self::with_caps(ffi::V4L2_CAP_VIDEO_CAPTURE | ffi::V4L2_CAP_READWRITE)
    }

    pub fn with_caps(capabilities: u32) -> Self {
        ScriptedDriver {
            caps: Capabilities {
                driver: "scripted".to_owned(),
                card: "Scripted Camera".to_owned(),
                bus_info: "platform:scripted".to_owned(),
                version: 6 << 16,
                capabilities,
                device_caps: 0,
            },
            formats: vec![native(0, b"YUYV")],
            current: PixFormat {
                width: 640,
                height: 480,
                fourcc: FourCC(*b"YUYV"),
                field: ffi::V4L2_FIELD_NONE,
                bytes_per_line: 1280,
                size_image: 640 * 480 * 2,
            },
            frame_sizes: Vec::new(),
            intervals: Vec::new(),
            parm: StreamParm::default(),
            granted_buffers: 4,
            buffer_length: 64,
            dequeues: VecDeque::new(),
            reads: VecDeque::new(),
            polls: VecDeque::new(),
            failures: Vec::new(),
            driver_queue: VecDeque::new(),
            corrupt_sequences: Vec::new(),
            sequence: 0,
            log: Rc::default(),
        }
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    pub fn fail(mut self, call: Call, code: i32) -> Self {
        self.failures.push((call, code));
        self
    }

    fn record(&mut self, call: Call) -> io::Result<()> {
        self.log.borrow_mut().push(call);
        if let Some(pos) = self.failures.iter().position(|(c, _)| *c == call) {
            let (_, code) = self.failures.remove(pos);
            return Err(errno(code));
        }
        Ok(())
    }
}

pub(crate) fn native(index: u32, code: &[u8; 4]) -> FormatDesc {
    FormatDesc {
        index,
        fourcc: FourCC(*code),
        description: String::from_utf8_lossy(code).into_owned(),
        flags: 0,
    }
}

pub(crate) fn emulated(index: u32, code: &[u8; 4]) -> FormatDesc {
    FormatDesc {
        flags: ffi::V4L2_FMT_FLAG_EMULATED,
        ..native(index, code)
    }
}

impl Driver for ScriptedDriver {
    type Mapping = FakeMapping;

    fn capabilities(&mut self) -> io::Result<Capabilities> {
        self.record(Call::Capabilities)?;
        Ok(self.caps.clone())
    }

    fn enum_format(&mut self, index: u32) -> io::Result<Option<FormatDesc>> {
        self.record(Call::EnumFormat(index))?;
        Ok(self.formats.get(index as usize).cloned())
    }

    fn get_format(&mut self) -> io::Result<PixFormat> {
        self.record(Call::GetFormat)?;
        Ok(self.current)
    }

    fn set_format(&mut self, format: &PixFormat) -> io::Result<PixFormat> {
        self.record(Call::SetFormat(format.fourcc))?;
        self.current = *format;
        Ok(self.current)
    }

    fn enum_frame_size(&mut self, _fourcc: FourCC, index: u32) -> io::Result<Option<FrameSize>> {
        self.record(Call::EnumFrameSize(index))?;
        Ok(self.frame_sizes.get(index as usize).copied())
    }

    fn enum_frame_interval(
        &mut self,
        _fourcc: FourCC,
        size: Resolution,
        index: u32,
    ) -> io::Result<Option<FrameInterval>> {
        self.record(Call::EnumFrameInterval(index))?;
        Ok(self
            .intervals
            .iter()
            .find(|(res, _)| *res == size)
            .and_then(|(_, list)| list.get(index as usize).copied()))
    }

    fn get_parm(&mut self) -> io::Result<StreamParm> {
        self.record(Call::GetParm)?;
        Ok(self.parm)
    }

    fn set_parm(&mut self, time_per_frame: Fraction) -> io::Result<StreamParm> {
        self.record(Call::SetParm(time_per_frame))?;
        self.parm.time_per_frame = time_per_frame;
        Ok(self.parm)
    }

    fn request_buffers(&mut self, count: u32) -> io::Result<u32> {
        self.record(Call::RequestBuffers(count))?;
        if count == 0 {
            self.driver_queue.clear();
            return Ok(0);
        }
        Ok(self.granted_buffers)
    }

    fn query_buffer(&mut self, index: u32) -> io::Result<BufferInfo> {
        self.record(Call::QueryBuffer(index))?;
        Ok(BufferInfo {
            index,
            offset: index * self.buffer_length,
            length: self.buffer_length,
        })
    }

    fn map_buffer(&mut self, info: &BufferInfo) -> io::Result<FakeMapping> {
        self.record(Call::MapBuffer(info.index))?;
        Ok(FakeMapping {
            index: info.index,
            data: vec![info.index as u8; info.length as usize],
        })
    }

    fn unmap_buffer(&mut self, mapping: FakeMapping) -> io::Result<()> {
        self.record(Call::UnmapBuffer(mapping.index))
    }

    fn queue_buffer(&mut self, index: u32) -> io::Result<()> {
        self.record(Call::QueueBuffer(index))?;
        // the kernel rejects a buffer that is already queued
        if self.driver_queue.contains(&index) {
            return Err(errno(libc::EINVAL));
        }
        self.driver_queue.push_back(index);
        Ok(())
    }

    fn dequeue_buffer(&mut self) -> io::Result<DequeuedBuffer> {
        self.record(Call::DequeueBuffer)?;
        let bytes_used = match self.dequeues.pop_front() {
            Some(Ok(bytes)) => bytes,
            Some(Err(code)) => return Err(errno(code)),
            None => return Err(errno(libc::EAGAIN)),
        };
        let index = self
            .driver_queue
            .pop_front()
            .ok_or_else(|| errno(libc::EINVAL))?;
        self.sequence += 1;
        let flags = if self.corrupt_sequences.contains(&self.sequence) {
            ffi::V4L2_BUF_FLAG_ERROR
        } else {
            0
        };
        Ok(DequeuedBuffer {
            index,
            bytes_used,
            sequence: self.sequence,
            flags,
        })
    }

    fn stream_on(&mut self) -> io::Result<()> {
        self.record(Call::StreamOn)
    }

    fn stream_off(&mut self) -> io::Result<()> {
        self.record(Call::StreamOff)
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.record(Call::Read)?;
        match self.reads.pop_front() {
            Some(Ok(data)) => {
                let len = data.len().min(buffer.len());
                buffer[..len].copy_from_slice(&data[..len]);
                Ok(len)
            }
            Some(Err(code)) => Err(errno(code)),
            None => Err(errno(libc::EAGAIN)),
        }
    }

    fn poll(&mut self, _timeout: Duration) -> io::Result<bool> {
        self.record(Call::Poll)?;
        match self.polls.pop_front() {
            Some(Ok(ready)) => Ok(ready),
            Some(Err(code)) => Err(errno(code)),
            None => Ok(true),
        }
    }
}
