// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

use std::fmt;
use std::process::ExitCode;

/// CLI-specific error type with exit code mapping
#[derive(Debug)]
pub enum CliError {
    /// Invalid command-line arguments
    InvalidArgs(String),
    /// Device node missing or inaccessible
    DeviceNotFound(String),
    /// Device is not a capture device or offers nothing usable
    UnsupportedDevice(String),
    /// No frame arrived in time
    Timeout(String),
    /// Any other capture failure
    General(String),
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::InvalidArgs(msg) => write!(f, "Invalid arguments: {}", msg),
            CliError::DeviceNotFound(msg) => write!(f, "Device not found: {}", msg),
            CliError::UnsupportedDevice(msg) => write!(f, "Unsupported device: {}", msg),
            CliError::Timeout(msg) => write!(f, "Timeout: {}", msg),
            CliError::General(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for CliError {}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    fn code(&self) -> u8 {
        match self {
            CliError::InvalidArgs(_) => 2,
            CliError::DeviceNotFound(_) => 3,
            CliError::UnsupportedDevice(_) => 4,
            CliError::Timeout(_) => 6,
            CliError::General(_) => 1,
        }
    }
}

/// Map v4l2cap::Error to CliError with appropriate exit codes
impl From<v4l2cap::Error> for CliError {
    fn from(err: v4l2cap::Error) -> Self {
        use std::io::ErrorKind;
        use v4l2cap::Error;

        match err {
            Error::DeviceOpenFailed { ref source, .. }
                if matches!(
                    source.kind(),
                    ErrorKind::NotFound | ErrorKind::PermissionDenied
                ) =>
            {
                CliError::DeviceNotFound(err.to_string())
            }
            Error::UnsupportedDevice(_) | Error::NoSupportedFormat { .. } => {
                CliError::UnsupportedDevice(err.to_string())
            }
            Error::UnknownCodec(_) => CliError::InvalidArgs(err.to_string()),
            err => CliError::General(err.to_string()),
        }
    }
}

/// Helper function to convert result to exit code
pub fn result_to_exit_code<T>(result: Result<T, CliError>) -> ExitCode {
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            e.exit_code()
        }
    }
}
