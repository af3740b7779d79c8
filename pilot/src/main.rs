//! CLI entry point for the issue loop driver.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use pilot::config::{PilotConfig, load_config, write_config};
use pilot::exit_codes;
use pilot::io::agent::CommandAgent;
use pilot::io::lock::{self, AlreadyRunningError};
use pilot::io::notify;
use pilot::io::paths::PilotPaths;
use pilot::io::stop::StopController;
use pilot::io::tracker::GhTracker;
use pilot::iteration::IterationEngine;
use pilot::logging;
use pilot::session::SessionLoop;
use pilot::workspace::Workspace;

#[derive(Parser)]
#[command(
    name = "pilot",
    version,
    about = "Autonomous issue-to-merge loop for a single repository"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the loop until the iteration bound, an empty queue, or a stop
    /// request.
    Run {
        /// Working copy root (contains `.pilot/`).
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Override the configured iteration bound.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Process at most one issue, then exit.
        #[arg(long)]
        once: bool,
    },
    /// Write a default `.pilot/config.toml`.
    Init {
        /// Working copy root.
        #[arg(long, default_value = ".")]
        root: PathBuf,

        /// Overwrite an existing config file.
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    logging::init();
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<AlreadyRunningError>().is_some() {
                ExitCode::from(exit_codes::ALREADY_RUNNING as u8)
            } else {
                ExitCode::from(exit_codes::INVALID as u8)
            }
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            root,
            max_iterations,
            once,
        } => cmd_run(&root, max_iterations, once),
        Command::Init { root, force } => cmd_init(&root, force),
    }
}

fn cmd_run(root: &Path, max_iterations: Option<u32>, once: bool) -> Result<i32> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolve root {}", root.display()))?;
    let paths = PilotPaths::new(&root);
    paths.ensure_layout()?;

    let mut cfg = load_config(&paths.config_path)?;
    if let Some(bound) = max_iterations {
        cfg.max_iterations = bound;
    }
    if once {
        cfg.max_iterations = 1;
        cfg.stop_when_idle = true;
    }
    cfg.validate()?;

    // Fatal-to-startup failures end here: lock contention and bad config.
    let _lock = lock::acquire(&paths.lock_path)?;
    let stop = StopController::new(paths.stop_path.clone());
    stop.install_interrupt_handler()?;

    let sink = notify::sink_for(&cfg.webhook_url);
    let workspace = Workspace::new(&root, cfg.remote.clone(), cfg.default_branch.clone());
    let tracker = GhTracker::new(&root);
    let agent = CommandAgent::new(cfg.agent.command.clone())?;

    let engine = IterationEngine::new(
        &cfg,
        &paths,
        &tracker,
        &workspace,
        &agent,
        sink.as_ref(),
        &stop,
    );
    let summary = SessionLoop::new(&cfg, engine, sink.as_ref(), &stop).run()?;

    info!(
        completed = summary.completed,
        failed = summary.failed,
        pending_merge = summary.pending_merge,
        stopped = summary.stopped,
        "pilot run finished"
    );
    Ok(exit_codes::OK)
}

fn cmd_init(root: &Path, force: bool) -> Result<i32> {
    let paths = PilotPaths::new(root);
    paths.ensure_layout()?;
    if paths.config_path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", paths.config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(&paths.config_path, &PilotConfig::default())?;
    println!("wrote {}", paths.config_path.display());
    Ok(exit_codes::OK)
}
