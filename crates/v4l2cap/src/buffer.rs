// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Frame transfer buffers
//!
//! [`BufferManager`] owns the memory frames travel through. In `read()` mode
//! that is a single heap buffer sized for the largest frame. In memory-mapped
//! mode it is a ring of driver buffers, each tagged with its current
//! [`Owner`]. A buffer moves to the driver only by being queued and back to
//! the application only by being dequeued, and its payload is read only while
//! the application owns it.
//!
//! Teardown always runs in the same order: outstanding buffers are dequeued,
//! streaming is stopped, every buffer is unmapped, then the driver's buffer
//! table is released. A failed set-up unwinds through the same path.

use std::io;

use log::{debug, error, warn};

use crate::{
    frame::Frame,
    negotiate::{IoMethod, NegotiatedFormat},
    v4l2::Driver,
    Error,
};

/// Number of buffers requested from the driver
pub const BUFFER_COUNT: u32 = 4;

/// Fewest buffers that still allow capture while one is being copied
pub const MIN_BUFFER_COUNT: u32 = 2;

/// Current holder of a memory-mapped buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// Queued; the driver may write into it at any time
    Driver,
    /// Dequeued; the application may read its payload
    App,
}

#[derive(Debug)]
struct Slot<M> {
    mapping: M,
    owner: Owner,
}

#[derive(Debug)]
enum Transfer<M> {
    Idle,
    Read {
        buffer: Vec<u8>,
        count: u32,
    },
    Mapped {
        slots: Vec<Slot<M>>,
        /// Buffer whose re-queue failed and is retried on the next acquire
        requeue: Option<u32>,
    },
}

/// Owner of the read buffer or mmap ring of one session.
///
/// `M` is the driver's mapping type. The manager never holds the driver
/// itself; every operation borrows it. Because of that, dropping a manager
/// cannot run [`BufferManager::tear_down`]: its mappings are dropped but the
/// driver keeps streaming. [`Session`](crate::session::Session) tears down on drop.
#[derive(Debug)]
pub struct BufferManager<M> {
    transfer: Transfer<M>,
    requested: bool,
}

impl<M> Default for BufferManager<M> {
    fn default() -> Self {
        BufferManager {
            transfer: Transfer::Idle,
            requested: false,
        }
    }
}

impl<M> Drop for BufferManager<M> {
    fn drop(&mut self) {
        if self.requested || matches!(self.transfer, Transfer::Mapped { .. }) {
            warn!("buffer manager dropped before tear down");
        }
    }
}

fn is_errno(err: &io::Error, code: i32) -> bool {
    err.raw_os_error() == Some(code)
}

fn setup_error(operation: &'static str) -> impl FnOnce(io::Error) -> Error {
    move |source| Error::BufferSetupFailed { operation, source }
}

impl<M: AsRef<[u8]>> BufferManager<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the transfer buffers for `io_method`.
    ///
    /// In memory-mapped mode every buffer is queued to the driver on success.
    /// On failure everything acquired so far is torn down again.
    pub fn set_up<D>(
        &mut self,
        driver: &mut D,
        io_method: IoMethod,
        format: &NegotiatedFormat,
    ) -> Result<(), Error>
    where
        D: Driver<Mapping = M>,
    {
        self.tear_down(driver);
        let result = match io_method {
            IoMethod::Read => self.set_up_read(format),
            IoMethod::MemoryMapped => self.set_up_mmap(driver),
        };
        if result.is_err() {
            self.tear_down(driver);
        }
        result
    }

    fn set_up_read(&mut self, format: &NegotiatedFormat) -> Result<(), Error> {
        if format.max_frame_bytes == 0 {
            return Err(Error::BufferSetupFailed {
                operation: "read buffer",
                source: io::Error::new(io::ErrorKind::InvalidInput, "driver reported zero image size"),
            });
        }
        debug!("allocating {} byte read buffer", format.max_frame_bytes);
        self.transfer = Transfer::Read {
            buffer: vec![0; format.max_frame_bytes as usize],
            count: 0,
        };
        Ok(())
    }

    fn set_up_mmap<D>(&mut self, driver: &mut D) -> Result<(), Error>
    where
        D: Driver<Mapping = M>,
    {
        let count = driver
            .request_buffers(BUFFER_COUNT)
            .map_err(setup_error("VIDIOC_REQBUFS"))?;
        self.requested = true;
        if count < MIN_BUFFER_COUNT {
            return Err(Error::BufferSetupFailed {
                operation: "VIDIOC_REQBUFS",
                source: io::Error::new(
                    io::ErrorKind::OutOfMemory,
                    format!("insufficient buffer memory ({} buffers)", count),
                ),
            });
        }
        debug!("driver allocated {} buffers", count);

        let mut slots = Vec::with_capacity(count as usize);
        let mut result = Ok(());
        for index in 0..count {
            let mapped = driver
                .query_buffer(index)
                .map_err(setup_error("VIDIOC_QUERYBUF"))
                .and_then(|info| driver.map_buffer(&info).map_err(setup_error("mmap")));
            match mapped {
                Ok(mapping) => slots.push(Slot {
                    mapping,
                    owner: Owner::App,
                }),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        self.transfer = Transfer::Mapped {
            slots,
            requeue: None,
        };
        result?;

        if let Transfer::Mapped { slots, .. } = &mut self.transfer {
            for (index, slot) in slots.iter_mut().enumerate() {
                driver
                    .queue_buffer(index as u32)
                    .map_err(setup_error("VIDIOC_QBUF"))?;
                slot.owner = Owner::Driver;
            }
        }
        Ok(())
    }

    /// Start the driver filling buffers; a no-op in `read()` mode.
    pub fn start<D>(&mut self, driver: &mut D) -> Result<(), Error>
    where
        D: Driver<Mapping = M>,
    {
        match self.transfer {
            Transfer::Mapped { .. } => driver.stream_on().map_err(Error::StreamStartFailed),
            _ => Ok(()),
        }
    }

    /// Pull one frame if the device has one.
    ///
    /// `Ok(None)` means nothing was ready. [`Error::TransientIo`] reports a
    /// dropped frame; the caller may simply try again.
    pub fn acquire_next_frame<D>(&mut self, driver: &mut D) -> Result<Option<Frame>, Error>
    where
        D: Driver<Mapping = M>,
    {
        match &mut self.transfer {
            Transfer::Idle => Ok(None),
            Transfer::Read { buffer, count } => match driver.read(buffer) {
                Ok(len) => {
                    *count = count.wrapping_add(1);
                    Ok(Some(Frame::new(buffer[..len].to_vec(), *count)))
                }
                Err(err) if is_errno(&err, libc::EAGAIN) => Ok(None),
                Err(err) if is_errno(&err, libc::EIO) => {
                    debug!("transient device error: {}", err);
                    Ok(None)
                }
                Err(err) => {
                    error!("cannot read frame: {}", err);
                    Err(Error::TransientIo(err))
                }
            },
            Transfer::Mapped { slots, requeue } => {
                if let Some(index) = *requeue {
                    if let Err(err) = driver.queue_buffer(index) {
                        error!("cannot queue buffer {}: {}", index, err);
                        return Err(Error::TransientIo(err));
                    }
                    slots[index as usize].owner = Owner::Driver;
                    *requeue = None;
                }

                let buf = match driver.dequeue_buffer() {
                    Ok(buf) => buf,
                    Err(err) if is_errno(&err, libc::EAGAIN) => return Ok(None),
                    Err(err) => {
                        error!("cannot dequeue buffer: {}", err);
                        return Err(Error::TransientIo(err));
                    }
                };

                let slot = match slots.get_mut(buf.index as usize) {
                    Some(slot) if slot.owner == Owner::Driver => slot,
                    _ => {
                        error!("driver returned unexpected buffer {}", buf.index);
                        return Err(Error::TransientIo(io::Error::new(
                            io::ErrorKind::InvalidData,
                            format!("unexpected buffer index {}", buf.index),
                        )));
                    }
                };
                slot.owner = Owner::App;

                let payload = if buf.is_error() {
                    debug!("buffer {} flagged corrupt by driver", buf.index);
                    None
                } else {
                    let data = slot.mapping.as_ref();
                    let len = (buf.bytes_used as usize).min(data.len());
                    Some(data[..len].to_vec())
                };

                if let Err(err) = driver.queue_buffer(buf.index) {
                    error!("cannot queue buffer {}: {}", buf.index, err);
                    *requeue = Some(buf.index);
                    return Err(Error::TransientIo(err));
                }
                slot.owner = Owner::Driver;

                Ok(payload.map(|payload| Frame::new(payload, buf.sequence)))
            }
        }
    }

    /// Release every buffer. Safe to call more than once.
    pub fn tear_down<D>(&mut self, driver: &mut D)
    where
        D: Driver<Mapping = M>,
    {
        let transfer = std::mem::replace(&mut self.transfer, Transfer::Idle);
        if let Transfer::Mapped { mut slots, .. } = transfer {
            let outstanding = slots.iter().filter(|s| s.owner == Owner::Driver).count();
            for _ in 0..outstanding {
                match driver.dequeue_buffer() {
                    Ok(buf) => {
                        if let Some(slot) = slots.get_mut(buf.index as usize) {
                            slot.owner = Owner::App;
                        }
                    }
                    Err(_) => break,
                }
            }

            if let Err(err) = driver.stream_off() {
                debug!("cannot stop streaming: {}", err);
            }

            for (index, slot) in slots.into_iter().enumerate() {
                if let Err(err) = driver.unmap_buffer(slot.mapping) {
                    warn!("cannot unmap buffer {}: {}", index, err);
                }
            }
        }

        if std::mem::take(&mut self.requested) {
            if let Err(err) = driver.request_buffers(0) {
                debug!("cannot release buffers: {}", err);
            }
        }
    }

    /// Owner of mmap buffer `index`; `None` outside memory-mapped mode.
    pub fn owner(&self, index: usize) -> Option<Owner> {
        match &self.transfer {
            Transfer::Mapped { slots, .. } => slots.get(index).map(|s| s.owner),
            _ => None,
        }
    }

    /// Number of buffers currently allocated
    pub fn buffer_count(&self) -> usize {
        match &self.transfer {
            Transfer::Idle => 0,
            Transfer::Read { .. } => 1,
            Transfer::Mapped { slots, .. } => slots.len(),
        }
    }

    pub fn io_method(&self) -> Option<IoMethod> {
        match self.transfer {
            Transfer::Idle => None,
            Transfer::Read { .. } => Some(IoMethod::Read),
            Transfer::Mapped { .. } => Some(IoMethod::MemoryMapped),
        }
    }
}
