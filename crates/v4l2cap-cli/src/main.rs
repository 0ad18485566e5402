// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Au-Zone Technologies

mod capture;
mod error;
mod formats;
mod metrics;
mod utils;

use clap::{Parser, Subcommand};
use error::result_to_exit_code;
use std::process::ExitCode;

/// v4l2cap CLI - V4L2 format listing and frame capture tool
#[derive(Parser)]
#[command(name = "v4l2cap")]
#[command(version)]
#[command(about = "v4l2cap CLI - V4L2 format listing and frame capture tool")]
#[command(long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (use RUST_LOG=debug for more)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output results in JSON format
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Capture frames from a V4L2 device and report throughput
    Capture(capture::Args),

    /// List the formats, frame sizes and frame rates a device offers
    Formats(formats::Args),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Logging must be up before any device is touched
    init_logging(cli.verbose, cli.quiet);

    // Run the subcommand and map its result to a process exit code
    let result = match cli.command {
        Commands::Capture(args) => capture::execute(args, cli.json),
        Commands::Formats(args) => formats::execute(args, cli.json),
    };

    result_to_exit_code(result)
}

/// Initialize env_logger based on verbosity flags
fn init_logging(verbose: bool, quiet: bool) {
    // RUST_LOG, when set, overrides the level picked from the flags
    let env = env_logger::Env::default();

    let env = if quiet {
        // Quiet mode: errors only
        env.default_filter_or("error")
    } else if verbose {
        // Verbose mode: include per-frame and ioctl debug messages
        env.default_filter_or("debug")
    } else {
        // Default: info and above
        env.default_filter_or("info")
    };

    env_logger::Builder::from_env(env)
        .format_timestamp(None) // Frame reports carry their own timing
        .format_target(false) // Hide module paths in CLI output
        .init();

    log::debug!("Logging initialized");
}
