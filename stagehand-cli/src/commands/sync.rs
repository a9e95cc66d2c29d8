//! `stagehand plan` / `stagehand sync`: reconcile a destination tree with its source.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;
use serde_json::Value;

use stagehand_core::{Config, DirQueue};
use stagehand_state::paths::socket_path;
use stagehand_state::{request_sync, DaemonError};
use stagehand_sync::pipeline::{self, SyncOptions, SyncRun};
use stagehand_sync::{CachePolicy, LogObserver, SyncPlan, SyncRoute};

use super::{block_on, home, load_config};

/// Arguments for `stagehand plan`.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// `publish` (source dir → test store) or `promote` (test → production).
    pub route: SyncRoute,
}

impl PlanArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        let options = SyncOptions {
            dry_run: true,
            cache_policy: None,
        };
        let run = block_on(pipeline::run(&config, self.route, &options, &LogObserver))?
            .with_context(|| format!("{} plan failed", self.route))?;
        print_plan(self.route, &run.plan);
        Ok(())
    }
}

/// Arguments for `stagehand sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    /// `publish` (source dir → test store) or `promote` (test → production).
    pub route: SyncRoute,

    /// Show what would change without touching the destination.
    #[arg(long)]
    pub dry_run: bool,

    /// Override the browser `max-age` (seconds) for this run.
    #[arg(long, value_name = "SECS")]
    pub browser_max_age: Option<u64>,

    /// Override the shared/CDN `s-maxage` (seconds) for this run.
    #[arg(long, value_name = "SECS")]
    pub shared_max_age: Option<u64>,

    /// Run in this process even when the daemon is up.
    #[arg(long)]
    pub local: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;

        let overridden = self.browser_max_age.is_some() || self.shared_max_age.is_some();
        if !self.local && !overridden && socket_path(&home).exists() {
            match request_sync(&home, self.route, self.dry_run) {
                Ok(summary) => return print_daemon_summary(self.route, &summary),
                Err(DaemonError::DaemonNotRunning { .. }) => {}
                Err(err) => return Err(err).context("daemon sync failed"),
            }
        }

        self.run_local(&config)
    }

    fn run_local(&self, config: &Config) -> Result<()> {
        let options = SyncOptions {
            dry_run: self.dry_run,
            cache_policy: self.cache_policy(config),
        };
        let queue = DirQueue::new(&config.state.queue_dir);
        let run = block_on(pipeline::run_reported(
            config,
            self.route,
            &options,
            &LogObserver,
            &queue,
        ))?
        .with_context(|| format!("{} failed", self.route))?;
        print_run(self.route, &run)
    }

    fn cache_policy(&self, config: &Config) -> Option<CachePolicy> {
        if self.browser_max_age.is_none() && self.shared_max_age.is_none() {
            return None;
        }
        Some(CachePolicy {
            browser_max_age: self
                .browser_max_age
                .unwrap_or(config.sync.browser_max_age_secs),
            shared_max_age: self
                .shared_max_age
                .unwrap_or(config.sync.shared_max_age_secs),
        })
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_plan(route: SyncRoute, plan: &SyncPlan) {
    if plan.is_empty() {
        println!("[dry-run] ✓ {route}: nothing to do");
        return;
    }
    println!(
        "[dry-run] {route}: {} to add, {} to update, {} to delete, {} unchanged",
        plan.to_add.len(),
        plan.to_update.len(),
        plan.to_delete.len(),
        plan.unchanged.len()
    );
    for entry in &plan.to_add {
        println!("  {} {}", "+".green(), entry.rel_path);
    }
    for (source, _) in &plan.to_update {
        println!("  {} {}", "~".yellow(), source.rel_path);
    }
    for entry in &plan.to_delete {
        println!("  {} {}", "-".red(), entry.rel_path);
    }
}

fn print_run(route: SyncRoute, run: &SyncRun) -> Result<()> {
    let Some(report) = &run.report else {
        print_plan(route, &run.plan);
        return Ok(());
    };

    println!(
        "✓ {route}: {} added, {} updated, {} deleted, {} unchanged",
        report.added, report.updated, report.deleted, report.unchanged
    );
    for failure in &report.failures {
        println!(
            "  {} {} ({})",
            "✗".red(),
            failure.dest_path,
            failure.error.dimmed()
        );
    }
    if !report.is_clean() {
        bail!("{} transfer(s) failed", report.failures.len());
    }
    Ok(())
}

fn print_daemon_summary(route: SyncRoute, summary: &Value) -> Result<()> {
    let count = |field: &str| summary[field].as_u64().unwrap_or(0);
    let prefix = if summary["dry_run"].as_bool().unwrap_or(false) {
        "[dry-run] "
    } else {
        ""
    };
    println!(
        "{prefix}✓ {route} (daemon): {} added, {} updated, {} deleted, {} unchanged",
        count("added"),
        count("updated"),
        count("deleted"),
        count("unchanged")
    );
    let failed = count("failed");
    if failed > 0 {
        bail!("{failed} transfer(s) failed");
    }
    Ok(())
}
