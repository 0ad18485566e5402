// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::metrics::{FrameMetrics, MetricsCollector};
use crate::utils;
use clap::Args as ClapArgs;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};
use unix_ts::Timestamp;
use v4l2cap::{
    capture::Cycle,
    frame::Frame,
    negotiate::NegotiatedFormat,
    session::{Session, SessionConfig, DEFAULT_ASPECT_RATIO, DEFAULT_DEVICE},
    sink::Sink,
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Capture device
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Output chroma to request (e.g. YUY2, MJPG, NV12); best available if unset
    #[arg(short, long)]
    chroma: Option<String>,

    /// Display aspect ratio in N:D form
    #[arg(short, long, default_value = DEFAULT_ASPECT_RATIO)]
    aspect_ratio: String,

    /// Number of frames to capture (0=unlimited)
    #[arg(short, long, default_value = "100")]
    frames: u64,

    /// Fail when no frame arrives for this many seconds (0=wait forever)
    #[arg(short, long, default_value = "5")]
    timeout: u64,

    /// Longest single wait for the device in milliseconds
    #[arg(long, default_value = "500")]
    poll_timeout_ms: u64,

    /// Latency reported to downstream consumers in milliseconds
    #[arg(long, default_value = "300")]
    live_caching_ms: u64,

    /// Append raw frame payloads to this file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

/// Negotiated format as reported to the user
#[derive(Debug, Serialize)]
struct FormatSummary {
    codec: String,
    fourcc: String,
    width: u32,
    height: u32,
    field: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    fps: Option<f64>,
    sample_aspect: String,
    io_method: String,
    max_frame_bytes: u32,
    bytes_per_line: u32,
}

impl From<&NegotiatedFormat> for FormatSummary {
    fn from(format: &NegotiatedFormat) -> Self {
        FormatSummary {
            codec: format.codec().to_string(),
            fourcc: format.fourcc().to_string(),
            width: format.width,
            height: format.height,
            field: format.field.to_string(),
            fps: format.fps(),
            sample_aspect: format!("{}:{}", format.sample_aspect.0, format.sample_aspect.1),
            io_method: format.io_method.to_string(),
            max_frame_bytes: format.max_frame_bytes,
            bytes_per_line: format.bytes_per_line,
        }
    }
}

#[derive(Debug, Serialize)]
struct CaptureReport {
    device: String,
    format: FormatSummary,
    pts_delay_ms: u64,
    metrics: FrameMetrics,
}

/// Sink that measures the stream and optionally dumps payloads to a file
struct CaptureSink {
    metrics: MetricsCollector,
    output: Option<BufWriter<File>>,
    write_error: Option<io::Error>,
    clock: Option<Timestamp>,
}

impl CaptureSink {
    fn new(output: Option<File>) -> Self {
        CaptureSink {
            metrics: MetricsCollector::new(),
            output: output.map(BufWriter::new),
            write_error: None,
            clock: None,
        }
    }

    fn frames(&self) -> u64 {
        self.metrics.frames()
    }

    fn take_write_error(&mut self) -> Option<io::Error> {
        self.write_error.take()
    }

    fn finish(&mut self) -> Result<FrameMetrics, CliError> {
        if let Some(output) = self.output.as_mut() {
            output
                .flush()
                .map_err(|e| CliError::General(format!("Failed to flush output: {}", e)))?;
        }
        Ok(self.metrics.finalize())
    }
}

impl Sink for CaptureSink {
    type Stream = ();

    fn register_stream(&mut self, format: &NegotiatedFormat) -> Result<(), v4l2cap::Error> {
        log::debug!(
            "Stream registered: {} {}x{} ({} I/O)",
            format.codec(),
            format.width,
            format.height,
            format.io_method
        );
        Ok(())
    }

    fn set_clock(&mut self, pts: Timestamp) {
        self.clock = Some(pts);
    }

    fn send_frame(&mut self, _stream: &(), frame: Frame) {
        let drops = self.metrics.track_sequence(frame.sequence);
        if drops > 0 {
            log::debug!("Driver skipped {} frame(s) before #{}", drops, frame.sequence);
        }
        self.metrics.record_frame(Instant::now(), frame.len() as u64);
        log::trace!(
            "Frame #{}: {} bytes at {:?}",
            frame.sequence,
            frame.len(),
            self.clock
        );

        if self.write_error.is_none() {
            if let Some(output) = self.output.as_mut() {
                if let Err(err) = output.write_all(frame.payload()) {
                    self.write_error = Some(err);
                }
            }
        }
    }
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Capture parameters: {:?}", args);

    let mut config = SessionConfig::new(&args.device)
        .with_aspect_ratio(utils::parse_aspect_ratio(&args.aspect_ratio)?)
        .with_poll_timeout(utils::millis("--poll-timeout-ms", args.poll_timeout_ms)?)
        .with_live_caching(Duration::from_millis(args.live_caching_ms));
    if let Some(chroma) = &args.chroma {
        config = config.with_codec(utils::parse_codec(chroma)?);
    }

    let output = match &args.output {
        Some(path) => Some(File::create(path).map_err(|e| {
            CliError::InvalidArgs(format!("Cannot create {}: {}", path.display(), e))
        })?),
        None => None,
    };

    let term = utils::install_signal_handler()?;

    log::info!("Opening capture device: {}", args.device);
    let mut session = Session::open(&config, CaptureSink::new(output), ())?;
    let summary = FormatSummary::from(session.format());

    let limit = if args.frames == 0 {
        u64::MAX
    } else {
        args.frames
    };
    let timeout = Duration::from_secs(args.timeout);

    log::info!(
        "Capturing {} frames (Ctrl+C to stop)...",
        if limit == u64::MAX {
            "unlimited".to_string()
        } else {
            limit.to_string()
        }
    );

    let mut last_frame = Instant::now();
    while session.sink().frames() < limit && !term.load(Ordering::Relaxed) {
        match session.demux()? {
            Cycle::Emitted => last_frame = Instant::now(),
            Cycle::Idle | Cycle::Skipped => {
                if !timeout.is_zero() && last_frame.elapsed() >= timeout {
                    return Err(CliError::Timeout(format!(
                        "no frame from {} in {} s",
                        args.device, args.timeout
                    )));
                }
            }
        }

        if let Some(err) = session.sink_mut().take_write_error() {
            return Err(CliError::General(format!("Failed to write frame: {}", err)));
        }
    }

    if term.load(Ordering::Relaxed) {
        log::info!("Interrupted, stopping capture");
    }

    let metrics = session.sink_mut().finish()?;
    let pts_delay = session.pts_delay();
    session.close();

    if json {
        let report = CaptureReport {
            device: args.device,
            format: summary,
            pts_delay_ms: pts_delay.as_millis() as u64,
            metrics,
        };
        let json = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("JSON serialization failed: {}", e)))?;
        println!("{}", json);
    } else {
        print_format(&args.device, &summary);
        metrics.print_text();
    }

    Ok(())
}

fn print_format(device: &str, format: &FormatSummary) {
    println!("Device:            {}", device);
    println!(
        "Format:            {} ({}) {}x{}",
        format.codec, format.fourcc, format.width, format.height
    );
    println!("Field:             {}", format.field);
    match format.fps {
        Some(fps) => println!("Frame rate:        {:.2} fps", fps),
        None => println!("Frame rate:        unknown"),
    }
    println!("Sample aspect:     {}", format.sample_aspect);
    println!("I/O method:        {}", format.io_method);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u32, len: usize) -> Frame {
        Frame::new(vec![0xAB; len], sequence)
    }

    #[test]
    fn test_sink_counts_frames() {
        let mut sink = CaptureSink::new(None);
        sink.set_clock(Timestamp::new(1, 0));
        sink.send_frame(&(), frame(0, 16));
        sink.send_frame(&(), frame(1, 32));
        sink.send_frame(&(), frame(4, 8));

        assert_eq!(sink.frames(), 3);
        assert_eq!(sink.clock, Some(Timestamp::new(1, 0)));
        let metrics = sink.finish().unwrap();
        assert_eq!(metrics.bytes_captured, 56);
        assert_eq!(metrics.dropped_frames, 2);
    }

    #[test]
    fn test_sink_writes_payloads() {
        let path = std::env::temp_dir().join(format!("v4l2cap-sink-{}.raw", std::process::id()));
        let file = File::create(&path).unwrap();
        let mut sink = CaptureSink::new(Some(file));
        sink.send_frame(&(), frame(0, 4));
        sink.send_frame(&(), frame(1, 4));
        sink.finish().unwrap();
        assert!(sink.take_write_error().is_none());

        let written = std::fs::read(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(written, vec![0xAB; 8]);
    }
}
