//! `stagehand lock <owner>`

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use stagehand_core::{LocalDirStore, ObjectStore};
use stagehand_state::{LeaseConfig, LeaseLock, LockStatus, LEASE_RENEW_INTERVAL};

use super::{block_on, home, load_config};

/// Take (or renew) the advisory administrative lock.
///
/// Exits non-zero when another owner holds a live lease.
#[derive(Args, Debug)]
pub struct LockArgs {
    /// Owner id; must not contain whitespace.
    pub owner: String,
}

impl LockArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        let store: Arc<dyn ObjectStore> = Arc::new(LocalDirStore::new(&config.state.store_root));
        let lock = LeaseLock::new(
            store,
            LeaseConfig::from_settings(config.state.lock_key.clone(), &config.lease),
        );

        let status = block_on(lock.try_acquire(&self.owner))?
            .with_context(|| format!("failed to acquire lock for '{}'", self.owner))?;

        match status {
            LockStatus::Unlocked => {
                println!(
                    "✓ {} (held by '{}'; renew within {}s)",
                    status.to_string().green(),
                    self.owner,
                    LEASE_RENEW_INTERVAL.as_secs()
                );
                Ok(())
            }
            LockStatus::Locked { .. } => {
                println!("{}", status.to_string().red());
                bail!("lock is held by another session")
            }
        }
    }
}
