//! `stagehand init <source-dir>` and `stagehand init-state`

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use stagehand_core::{config, LocalDirStore};
use stagehand_state::init_state;

use super::{block_on, home, load_config};

/// Write the default configuration for a rendered site directory.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Directory holding the rendered site output.
    pub source_dir: PathBuf,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let source_dir = self
            .source_dir
            .canonicalize()
            .with_context(|| format!("cannot resolve path '{}'", self.source_dir.display()))?;

        let config = config::init_at(&home, source_dir.clone())
            .with_context(|| format!("failed to init config for '{}'", source_dir.display()))?;

        if config.site.source_dir != source_dir {
            println!(
                "{} config already exists; publishing from '{}'",
                "!".yellow(),
                config.site.source_dir.display()
            );
        } else {
            println!("✓ Publishing from '{}'", source_dir.display());
        }
        println!("  Saved to: {}", config::config_path_at(&home).display());
        Ok(())
    }
}

/// Create the empty state document in the configured state store.
#[derive(Args, Debug)]
pub struct InitStateArgs {}

impl InitStateArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        let store = LocalDirStore::new(&config.state.store_root);

        let created = block_on(init_state(
            &store,
            &config.state.state_key,
            config.state.log_key.as_deref(),
        ))?
        .context("failed to initialize state document")?;

        if created {
            println!(
                "✓ State document created at {}",
                config.state.store_root.join(&config.state.state_key).display()
            );
        } else {
            println!("✓ State document already exists");
        }
        Ok(())
    }
}
