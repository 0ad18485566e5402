// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

//! Capture session
//!
//! A [`Session`] owns one device from open to close. Opening runs, in order:
//! format negotiation, stream registration with the sink, buffer set-up,
//! stream start and controls initialization. A failure at any step releases
//! whatever the earlier steps acquired. Each [`Session::demux`] call is one
//! bounded capture cycle.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use log::{debug, info};
use unix_ts::Timestamp;

use crate::{
    buffer::BufferManager,
    capture::{CaptureLoop, Cycle, DEFAULT_POLL_TIMEOUT},
    catalog::Codec,
    controls::Controls,
    negotiate::{AspectRatio, FormatNegotiator, NegotiatedFormat},
    sink::Sink,
    v4l2::{Device, Driver},
    Error,
};

/// Device opened when none is configured
pub const DEFAULT_DEVICE: &str = "/dev/video0";

/// Aspect ratio assumed when none is configured
pub const DEFAULT_ASPECT_RATIO: &str = "4:3";

/// Default latency hint reported by [`Session::pts_delay`]
pub const DEFAULT_LIVE_CACHING: Duration = Duration::from_millis(300);

/// Session settings
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use v4l2cap::catalog::Codec;
/// use v4l2cap::session::SessionConfig;
///
/// let config = SessionConfig::new("/dev/video2")
///     .with_codec(Codec::Mjpg)
///     .with_aspect_ratio("16:9")
///     .with_poll_timeout(Duration::from_millis(100));
/// assert_eq!(config.codec(), Some(Codec::Mjpg));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    device: PathBuf,
    codec: Option<Codec>,
    aspect_ratio: String,
    live_caching: Duration,
    poll_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            device: PathBuf::from(DEFAULT_DEVICE),
            codec: None,
            aspect_ratio: DEFAULT_ASPECT_RATIO.to_owned(),
            live_caching: DEFAULT_LIVE_CACHING,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}

impl SessionConfig {
    pub fn new(device: impl AsRef<Path>) -> Self {
        Self::default().with_device(device)
    }

    pub fn with_device(mut self, device: impl AsRef<Path>) -> Self {
        self.device = device.as_ref().to_path_buf();
        self
    }

    /// Prefer `codec` whenever the device offers it.
    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Display aspect ratio as `"N:D"`; malformed values fall back to 4:3.
    pub fn with_aspect_ratio(mut self, aspect_ratio: impl Into<String>) -> Self {
        self.aspect_ratio = aspect_ratio.into();
        self
    }

    pub fn with_live_caching(mut self, latency: Duration) -> Self {
        self.live_caching = latency;
        self
    }

    /// Longest time one [`Session::demux`] call waits for the device.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn codec(&self) -> Option<Codec> {
        self.codec
    }

    pub fn aspect_ratio(&self) -> &str {
        &self.aspect_ratio
    }

    pub fn live_caching(&self) -> Duration {
        self.live_caching
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}

/// An open, streaming capture device.
pub struct Session<S, C = (), D = Device>
where
    S: Sink,
    D: Driver,
    C: Controls<D>,
{
    driver: D,
    format: NegotiatedFormat,
    buffers: BufferManager<D::Mapping>,
    capture: CaptureLoop,
    sink: S,
    stream: S::Stream,
    controls: C,
    handle: Option<C::Handle>,
    live_caching: Duration,
    closed: bool,
}

impl<S, C> Session<S, C, Device>
where
    S: Sink,
    C: Controls<Device>,
{
    /// Open the configured device node and start capturing.
    pub fn open(config: &SessionConfig, sink: S, controls: C) -> Result<Self, Error> {
        let device = Device::open(config.device())?;
        if !device.uses_shim() {
            debug!("using raw kernel interface for {}", device.path().display());
        }
        Self::with_driver(device, config, sink, controls)
    }
}

impl<S, C, D> Session<S, C, D>
where
    S: Sink,
    D: Driver,
    C: Controls<D>,
{
    /// Start capturing from an already open device.
    pub fn with_driver(
        mut driver: D,
        config: &SessionConfig,
        mut sink: S,
        mut controls: C,
    ) -> Result<Self, Error> {
        let negotiator = FormatNegotiator::new()
            .with_request(config.codec())
            .with_aspect_ratio(AspectRatio::parse_or_default(config.aspect_ratio()));
        let format = negotiator.negotiate(&mut driver)?;
        let stream = sink.register_stream(&format)?;

        let mut buffers = BufferManager::new();
        buffers.set_up(&mut driver, format.io_method, &format)?;
        if let Err(err) = buffers.start(&mut driver) {
            buffers.tear_down(&mut driver);
            return Err(err);
        }

        let handle = match controls.init(&mut driver) {
            Ok(handle) => handle,
            Err(err) => {
                buffers.tear_down(&mut driver);
                return Err(err);
            }
        };

        info!(
            "capturing {} {}x{} from {}",
            format.codec(),
            format.width,
            format.height,
            config.device().display()
        );

        Ok(Session {
            driver,
            format,
            buffers,
            capture: CaptureLoop::new(config.poll_timeout(), format.field_order()),
            sink,
            stream,
            controls,
            handle: Some(handle),
            live_caching: config.live_caching(),
            closed: false,
        })
    }

    /// Run one capture cycle; blocks at most one poll timeout.
    ///
    /// [`Error::FatalIo`] means the device can no longer be waited on. The
    /// session stays open and must still be closed.
    pub fn demux(&mut self) -> Result<Cycle, Error> {
        self.capture.run_once(
            &mut self.driver,
            &mut self.buffers,
            &mut self.sink,
            &self.stream,
        )
    }

    pub fn format(&self) -> &NegotiatedFormat {
        &self.format
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn buffers(&self) -> &BufferManager<D::Mapping> {
        &self.buffers
    }

    /// Live sources cannot seek.
    pub fn can_seek(&self) -> bool {
        false
    }

    pub fn can_pause(&self) -> bool {
        false
    }

    pub fn can_control_pace(&self) -> bool {
        false
    }

    /// Latency downstream should buffer before presenting frames
    pub fn pts_delay(&self) -> Duration {
        self.live_caching
    }

    /// Current time on the clock frames are stamped with
    pub fn time(&self) -> Timestamp {
        crate::timestamp()
    }

    /// Stop streaming and release the device.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.buffers.tear_down(&mut self.driver);
        if let Some(handle) = self.handle.take() {
            self.controls.deinit(handle);
        }
        debug!("capture session closed");
    }
}

impl<S, C, D> Drop for Session<S, C, D>
where
    S: Sink,
    D: Driver,
    C: Controls<D>,
{
    fn drop(&mut self) {
        self.shutdown();
    }
}
