// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use crate::error::CliError;
use signal_hook::consts::SIGINT;
use signal_hook::flag;
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use v4l2cap::{catalog::Codec, negotiate::AspectRatio};

/// Parse an output codec name such as "YUY2", "mjpeg" or "NV12"
pub fn parse_codec(s: &str) -> Result<Codec, CliError> {
    Codec::from_str(s).map_err(|_| CliError::InvalidArgs(format!("Unknown chroma: {}", s)))
}

/// Validate an aspect ratio in "N:D" form and return it normalized
pub fn parse_aspect_ratio(s: &str) -> Result<String, CliError> {
    AspectRatio::from_str(s)
        .map(|ratio| ratio.to_string())
        .map_err(CliError::InvalidArgs)
}

/// Millisecond option to a duration; zero is rejected
pub fn millis(name: &str, value: u64) -> Result<Duration, CliError> {
    if value == 0 {
        return Err(CliError::InvalidArgs(format!(
            "{} must be greater than zero",
            name
        )));
    }
    Ok(Duration::from_millis(value))
}

/// Install signal handler for graceful shutdown on Ctrl+C
///
/// Returns an Arc<AtomicBool> that will be set to true when SIGINT is received.
/// The capture loop checks it between cycles, so a stop request is honored
/// within one poll timeout.
pub fn install_signal_handler() -> Result<Arc<AtomicBool>, CliError> {
    let term = Arc::new(AtomicBool::new(false));

    flag::register(SIGINT, Arc::clone(&term))
        .map_err(|e| CliError::General(format!("Failed to register signal handler: {}", e)))?;

    log::debug!("Installed SIGINT handler");
    Ok(term)
}
