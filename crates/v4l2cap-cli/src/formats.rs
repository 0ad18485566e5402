// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use crate::utils;
use clap::Args as ClapArgs;
use serde::Serialize;
use v4l2cap::{
    catalog::catalog,
    fourcc::FourCC,
    negotiate::{select_io_method, FormatNegotiator},
    session::DEFAULT_DEVICE,
    v4l2::{Device, Driver, FrameInterval, FrameSize, Resolution},
};

#[derive(ClapArgs, Debug)]
pub struct Args {
    /// Capture device
    #[arg(short, long, default_value = DEFAULT_DEVICE)]
    device: String,

    /// Show which format a capture requesting this chroma would use
    #[arg(short, long)]
    chroma: Option<String>,

    /// Skip frame size and frame rate enumeration
    #[arg(long)]
    brief: bool,
}

#[derive(Debug, Serialize)]
struct DeviceReport {
    device: String,
    card: String,
    driver: String,
    driver_version: String,
    bus_info: String,
    capabilities: String,
    video_capture: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    io_method: Option<String>,
    formats: Vec<FormatReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected: Option<String>,
}

#[derive(Debug, Serialize)]
struct FormatReport {
    fourcc: String,
    description: String,
    emulated: bool,
    compressed: bool,
    /// Output codec, absent when the format cannot be captured
    #[serde(skip_serializing_if = "Option::is_none")]
    codec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rank: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sizes: Vec<SizeReport>,
}

#[derive(Debug, Serialize)]
struct SizeReport {
    size: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    intervals: Vec<String>,
}

pub fn execute(args: Args, json: bool) -> Result<(), CliError> {
    log::debug!("Executing formats command: {:?}", args);

    let request = args.chroma.as_deref().map(utils::parse_codec).transpose()?;

    let mut device = Device::open(&args.device)?;
    let caps = device.capabilities().map_err(v4l2cap::Error::from)?;

    let mut report = DeviceReport {
        device: args.device.clone(),
        card: caps.card.clone(),
        driver: caps.driver.clone(),
        driver_version: caps.version_string(),
        bus_info: caps.bus_info.clone(),
        capabilities: format!("0x{:08X}", caps.effective()),
        video_capture: caps.is_video_capture(),
        io_method: select_io_method(&caps).ok().map(|m| m.to_string()),
        formats: Vec::new(),
        selected: None,
    };

    if !report.video_capture {
        return Err(v4l2cap::Error::UnsupportedDevice(caps.card).into());
    }

    for index in 0.. {
        let Some(desc) = device.enum_format(index).map_err(v4l2cap::Error::from)? else {
            break;
        };
        let entry = catalog().lookup(desc.fourcc);
        let sizes = if args.brief {
            Vec::new()
        } else {
            enumerate_sizes(&mut device, desc.fourcc)
        };
        report.formats.push(FormatReport {
            fourcc: desc.fourcc.to_string(),
            description: desc.description.clone(),
            emulated: desc.is_emulated(),
            compressed: desc.is_compressed(),
            codec: entry.map(|e| e.codec.to_string()),
            rank: entry.map(|e| e.rank()),
            sizes,
        });
    }

    match FormatNegotiator::new()
        .with_request(request)
        .select_format(&mut device)
    {
        Ok(selected) => {
            report.selected = Some(format!("{} ({})", selected.fourcc, selected.codec));
        }
        Err(err) => log::warn!("{}", err),
    }

    if json {
        let json_str = serde_json::to_string_pretty(&report)
            .map_err(|e| CliError::General(format!("Failed to serialize JSON: {}", e)))?;
        println!("{}", json_str);
    } else {
        print_text_report(&report);
    }

    Ok(())
}

fn enumerate_sizes(device: &mut Device, fourcc: FourCC) -> Vec<SizeReport> {
    let mut sizes = Vec::new();
    for index in 0.. {
        let size = match device.enum_frame_size(fourcc, index) {
            Ok(Some(size)) => size,
            Ok(None) => break,
            Err(err) => {
                log::debug!("Cannot enumerate frame sizes for {}: {}", fourcc, err);
                break;
            }
        };
        match size {
            FrameSize::Discrete(resolution) => sizes.push(SizeReport {
                size: resolution.to_string(),
                intervals: enumerate_intervals(device, fourcc, resolution),
            }),
            FrameSize::Range { min, max, step } => {
                sizes.push(SizeReport {
                    size: format!("{} - {} step {}", min, max, step),
                    intervals: enumerate_intervals(device, fourcc, max),
                });
                break;
            }
        }
    }
    sizes
}

fn enumerate_intervals(device: &mut Device, fourcc: FourCC, size: Resolution) -> Vec<String> {
    let mut intervals = Vec::new();
    for index in 0.. {
        match device.enum_frame_interval(fourcc, size, index) {
            Ok(Some(FrameInterval::Discrete(interval))) => intervals.push(interval.to_string()),
            Ok(Some(FrameInterval::Range { min, max, step })) => {
                intervals.push(format!("{} - {} step {}", min, max, step));
                break;
            }
            Ok(None) => break,
            Err(err) => {
                log::debug!("Cannot enumerate frame intervals for {} {}: {}", fourcc, size, err);
                break;
            }
        }
    }
    intervals
}

fn print_text_report(report: &DeviceReport) {
    println!("=== {} ===", report.device);
    println!("Card:          {}", report.card);
    println!("Driver:        {} {}", report.driver, report.driver_version);
    println!("Bus:           {}", report.bus_info);
    println!("Capabilities:  {}", report.capabilities);
    println!(
        "I/O method:    {}",
        report.io_method.as_deref().unwrap_or("none")
    );

    println!("\nFormats:");
    for format in &report.formats {
        let codec = match (&format.codec, format.rank) {
            (Some(codec), Some(rank)) => format!("{} rank {}", codec, rank),
            _ => "not supported".to_string(),
        };
        println!(
            "  {} {:<24} {}{} [{}]",
            format.fourcc,
            format.description,
            if format.compressed { "compressed" } else { "raw" },
            if format.emulated { ", emulated" } else { "" },
            codec
        );
        for size in &format.sizes {
            if size.intervals.is_empty() {
                println!("      {}", size.size);
            } else {
                println!("      {} @ {}", size.size, size.intervals.join(", "));
            }
        }
    }

    match &report.selected {
        Some(selected) => println!("\nCapture would use: {}", selected),
        None => println!("\nNo capturable format"),
    }
}
