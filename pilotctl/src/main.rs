//! Control CLI for a running (or stopped) pilot loop.
//!
//! Acts only on the shared on-disk control surface (lock file, stop
//! sentinel, latest iteration record); it never touches the working copy,
//! so it is safe to run while the loop is active.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use pilot::control::{self, WaitOutcome};
use pilot::exit_codes;
use pilot::io::paths::PilotPaths;
use pilot::logging;

#[derive(Parser)]
#[command(
    name = "pilotctl",
    version,
    about = "Control a running pilot loop: stop, status, kill"
)]
struct Cli {
    /// Working copy root (contains `.pilot/`).
    #[arg(long, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Request a graceful stop (idempotent; safe while not running).
    Stop,
    /// Cancel a pending stop request.
    Cancel,
    /// Report current status.
    Status {
        /// Emit machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Force-kill the running instance, bypassing graceful shutdown.
    Kill,
    /// Request a graceful stop and wait for the loop to exit.
    Wait {
        /// Seconds to wait before giving up.
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,

        /// Escalate to force-kill when the wait expires.
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::from(exit_codes::INVALID as u8)
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = PilotPaths::new(&cli.root);

    match cli.command {
        Command::Stop => {
            if control::request_stop(&paths)? {
                println!("stop requested");
            } else {
                println!("stop already pending");
            }
            Ok(exit_codes::OK)
        }
        Command::Cancel => {
            if control::cancel_stop(&paths)? {
                println!("pending stop cancelled");
            } else {
                println!("no stop pending");
            }
            Ok(exit_codes::OK)
        }
        Command::Status { json } => {
            let report = control::status(&paths)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_status(&report);
            }
            Ok(exit_codes::OK)
        }
        Command::Kill => {
            if control::force_kill(&paths)? {
                println!("killed");
            } else {
                println!("not running");
            }
            Ok(exit_codes::OK)
        }
        Command::Wait {
            timeout_secs,
            force,
        } => {
            let outcome = control::wait_stop(&paths, Duration::from_secs(timeout_secs), force)?;
            match outcome {
                WaitOutcome::NotRunning => println!("not running"),
                WaitOutcome::Stopped => println!("stopped"),
                WaitOutcome::Escalated => println!("timed out, force-killed"),
                WaitOutcome::TimedOut => {
                    println!("timed out, still running");
                    return Ok(exit_codes::INVALID);
                }
            }
            Ok(exit_codes::OK)
        }
    }
}

fn print_status(report: &pilot::control::StatusReport) {
    if report.running {
        println!(
            "running (pid {})",
            report.pid.map_or_else(|| "?".to_string(), |p| p.to_string())
        );
    } else {
        println!("not running");
    }
    if report.stop_pending {
        println!("stop pending");
    }
    match &report.last_iteration {
        Some(record) => println!(
            "last iteration: #{} issue {} {} at {}",
            record.iteration,
            record.issue,
            record.status.as_str(),
            record.timestamp.to_rfc3339()
        ),
        None => println!("no iterations recorded"),
    }
}
