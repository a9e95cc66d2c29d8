//! Stagehand: site publishing and shared-state CLI.
//!
//! # Usage
//!
//! ```text
//! stagehand init <source-dir>
//! stagehand init-state
//! stagehand plan publish|promote
//! stagehand sync publish|promote [--dry-run] [--browser-max-age N] [--shared-max-age N] [--local]
//! stagehand lock <owner>
//! stagehand send '<delta json>'
//! stagehand drain [--local]
//! stagehand state [--watch] [--logs]
//! stagehand daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    init::{InitArgs, InitStateArgs},
    lock::LockArgs,
    queue::{DrainArgs, SendArgs},
    state::StateArgs,
    sync::{PlanArgs, SyncArgs},
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "stagehand",
    version,
    about = "Publish a rendered site and keep its shared state document current",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.stagehand/config.yaml for a rendered site directory.
    Init(InitArgs),

    /// Create the empty state document (and log object) if absent.
    InitState(InitStateArgs),

    /// Show what a sync would add, update and delete.
    Plan(PlanArgs),

    /// Reconcile the destination tree of a route with its source.
    Sync(SyncArgs),

    /// Try to take the administrative lock.
    Lock(LockArgs),

    /// Put one delta message on the state queue.
    Send(SendArgs),

    /// Fold queued deltas into the state document.
    Drain(DrainArgs),

    /// Print the state document, optionally polling for changes.
    State(StateArgs),

    /// Run or control the background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Commands::Daemon { .. }) {
        stagehand_state::init_tracing_with("warn");
    }
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::InitState(args) => args.run(),
        Commands::Plan(args) => args.run(),
        Commands::Sync(args) => args.run(),
        Commands::Lock(args) => args.run(),
        Commands::Send(args) => args.run(),
        Commands::Drain(args) => args.run(),
        Commands::State(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
