//! `stagehand send` / `stagehand drain`: produce and consume state deltas.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use stagehand_core::{DeltaMessage, DirQueue, LocalDirStore, MessageQueue, ObjectStore};
use stagehand_state::paths::socket_path;
use stagehand_state::{request_drain, AggregatorConfig, DaemonError, StateAggregator};

use super::{block_on, home, load_config};

/// Put one delta on the queue.
#[derive(Args, Debug)]
pub struct SendArgs {
    /// Delta as JSON, e.g. `{"display":{"building":true}}`.
    pub delta: String,
}

impl SendArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;

        let delta: DeltaMessage =
            serde_json::from_str(&self.delta).context("delta is not a valid message")?;
        let body = delta.to_body().context("failed to encode delta")?;

        let queue = DirQueue::new(&config.state.queue_dir);
        let id = block_on(queue.send(body))?.context("failed to enqueue delta")?;
        println!("✓ Queued {id}");
        Ok(())
    }
}

/// Fold everything currently queued.
#[derive(Args, Debug)]
pub struct DrainArgs {
    /// Drain in this process even when the daemon is up.
    #[arg(long)]
    pub local: bool,
}

impl DrainArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;

        if !self.local && socket_path(&home).exists() {
            match request_drain(&home) {
                Ok(report) => {
                    print_report(&report);
                    return Ok(());
                }
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon drain failed"),
            }
        }

        let store: Arc<dyn ObjectStore> = Arc::new(LocalDirStore::new(&config.state.store_root));
        let queue: Arc<dyn MessageQueue> = Arc::new(DirQueue::new(&config.state.queue_dir));
        let aggregator =
            StateAggregator::new(store, queue, AggregatorConfig::from_settings(&config.state));

        let report = block_on(aggregator.drain_and_fold())?.context("drain failed")?;
        print_report(&serde_json::to_value(&report).context("failed to render drain report")?);
        Ok(())
    }
}

fn print_report(report: &Value) {
    let count = |field: &str| report[field].as_u64().unwrap_or(0);
    let written = |field: &str| report[field].as_bool().unwrap_or(false);
    println!(
        "✓ Drained {} message(s): {} folded, {} malformed",
        count("received"),
        count("folded"),
        count("malformed")
    );
    if written("stateWritten") || written("logsWritten") {
        println!(
            "  state written: {}, logs written: {}",
            written("stateWritten"),
            written("logsWritten")
        );
    }
    let failures = count("deleteFailures");
    if failures > 0 {
        println!(
            "  {} {failures} message(s) could not be deleted and will be redelivered",
            "!".yellow()
        );
    }
}
