//! Subcommand implementations. Each `*Args` struct owns a `run(self)`.

pub mod daemon;
pub mod init;
pub mod lock;
pub mod queue;
pub mod state;
pub mod sync;

use std::future::Future;
use std::path::PathBuf;

use anyhow::{Context, Result};

use stagehand_core::{config, Config};

pub(crate) fn home() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Load `~/.stagehand/config.yaml`, pointing at `stagehand init` when absent.
pub(crate) fn load_config(home: &std::path::Path) -> Result<Config> {
    config::load_at(home).with_context(|| {
        format!(
            "failed to load {} (run `stagehand init <source-dir>` first)",
            config::config_path_at(home).display()
        )
    })
}

/// Drive one async operation to completion on a fresh single-threaded runtime.
pub(crate) fn block_on<F: Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start tokio runtime")?;
    Ok(runtime.block_on(future))
}
