//! Shared sync pipeline entrypoint used by CLI and daemon.
//!
//! `list → diff → execute`, with optional status reporting through the queue
//! so polling clients see the run start and finish.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use stagehand_core::{
    Config, DeltaMessage, LocalDirStore, LogMessage, MessageQueue, ObjectStore,
};

use crate::content_type::CachePolicy;
use crate::diff::{diff_trees, SyncPlan};
use crate::listing::{list_tree, Tree, TreeFilter};
use crate::syncer::{SyncObserver, SyncReport, Syncer, SyncerConfig};
use crate::SyncError;

/// Which pair of trees a run reconciles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncRoute {
    /// Local rendered output → test store.
    Publish,
    /// Test store → production store.
    Promote,
}

impl SyncRoute {
    /// The `display` flag raised while this route runs.
    pub fn display_flag(&self) -> &'static str {
        match self {
            SyncRoute::Publish => "preparing",
            SyncRoute::Promote => "deploying",
        }
    }
}

impl fmt::Display for SyncRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncRoute::Publish => write!(f, "publish"),
            SyncRoute::Promote => write!(f, "promote"),
        }
    }
}

impl FromStr for SyncRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "publish" => Ok(SyncRoute::Publish),
            "promote" => Ok(SyncRoute::Promote),
            other => Err(format!(
                "unknown route '{other}'; expected: publish, promote"
            )),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncOptions {
    /// Compute the plan without touching the destination.
    pub dry_run: bool,
    /// Overrides the configured cache policy for this run.
    pub cache_policy: Option<CachePolicy>,
}

/// Result of one pipeline run. `report` is `None` for dry runs.
#[derive(Debug, Clone, Serialize)]
pub struct SyncRun {
    pub route: Option<SyncRoute>,
    pub plan: SyncPlan,
    pub report: Option<SyncReport>,
}

/// Reconcile `dest` with `source`.
pub async fn sync_trees(
    source: Tree<'_>,
    dest: Tree<'_>,
    filter: &TreeFilter,
    syncer: &Syncer,
    options: &SyncOptions,
    observer: &dyn SyncObserver,
) -> Result<SyncRun, SyncError> {
    let source_entries = list_tree(source, filter).await?;
    let dest_entries = list_tree(dest, filter).await?;
    let plan = diff_trees(&source_entries, &dest_entries);
    tracing::info!(
        add = plan.to_add.len(),
        update = plan.to_update.len(),
        delete = plan.to_delete.len(),
        unchanged = plan.unchanged.len(),
        dry_run = options.dry_run,
        "sync plan computed",
    );

    if options.dry_run {
        return Ok(SyncRun {
            route: None,
            plan,
            report: None,
        });
    }

    let policy = options
        .cache_policy
        .unwrap_or(syncer.config().cache_policy);
    let report = syncer
        .execute_with_policy(&plan, source.store, dest, observer, &policy)
        .await;
    Ok(SyncRun {
        route: None,
        plan,
        report: Some(report),
    })
}

/// The syncer and exclude filter described by `config`.
pub fn syncer_from_config(config: &Config) -> Result<(Syncer, TreeFilter), SyncError> {
    let syncer = Syncer::new(SyncerConfig {
        batch_size: config.sync.batch_size,
        cache_policy: CachePolicy {
            browser_max_age: config.sync.browser_max_age_secs,
            shared_max_age: config.sync.shared_max_age_secs,
        },
    });
    let filter = TreeFilter::new(&config.sync.exclude)?;
    Ok((syncer, filter))
}

/// Run `route` against the local-directory stores named in `config`.
///
/// This is the canonical sync entrypoint for both `stagehand sync` and the
/// daemon's sync processor.
pub async fn run(
    config: &Config,
    route: SyncRoute,
    options: &SyncOptions,
    observer: &dyn SyncObserver,
) -> Result<SyncRun, SyncError> {
    let (syncer, filter) = syncer_from_config(config)?;
    let (source_store, source_prefix, dest_store, dest_prefix) = match route {
        SyncRoute::Publish => (
            LocalDirStore::new(&config.site.source_dir),
            String::new(),
            LocalDirStore::new(&config.site.test_store),
            config.site.test_prefix.clone(),
        ),
        SyncRoute::Promote => (
            LocalDirStore::new(&config.site.test_store),
            config.site.test_prefix.clone(),
            LocalDirStore::new(&config.site.prod_store),
            config.site.prod_prefix.clone(),
        ),
    };
    let source: &dyn ObjectStore = &source_store;
    let dest: &dyn ObjectStore = &dest_store;

    let mut run = sync_trees(
        Tree::new(source, &source_prefix),
        Tree::new(dest, &dest_prefix),
        &filter,
        &syncer,
        options,
        observer,
    )
    .await?;
    run.route = Some(route);
    Ok(run)
}

/// [`run`], bracketed by status deltas on `queue`.
///
/// Raises `display.<flag>` before the run and always clears it afterwards,
/// together with `<flag>Error` / `<flag>ErrorMsg`, so a failed run cannot
/// leave clients fast-polling.
pub async fn run_reported(
    config: &Config,
    route: SyncRoute,
    options: &SyncOptions,
    observer: &dyn SyncObserver,
    queue: &dyn MessageQueue,
) -> Result<SyncRun, SyncError> {
    let flag = route.display_flag();
    if !options.dry_run {
        let started = DeltaMessage::with_display(flag, true);
        queue.send(started.to_body()?).await?;
    }

    let result = run(config, route, options, observer).await;
    if options.dry_run {
        return result;
    }

    queue.send(completion_delta(route, &result).to_body()?).await?;
    result
}

/// The delta describing how a run ended.
pub fn completion_delta(route: SyncRoute, result: &Result<SyncRun, SyncError>) -> DeltaMessage {
    let flag = route.display_flag();
    let now = Utc::now().timestamp_millis();
    let (error, log) = match result {
        Ok(run) => match &run.report {
            Some(report) if !report.is_clean() => {
                let msg = format!(
                    "{route}: {} file(s) failed; {} added, {} updated, {} deleted",
                    report.failures.len(),
                    report.added,
                    report.updated,
                    report.deleted,
                );
                (Some(msg.clone()), LogMessage::new(now, "error", msg))
            }
            Some(report) => (
                None,
                LogMessage::new(
                    now,
                    "info",
                    format!(
                        "{route}: {} added, {} updated, {} deleted, {} unchanged",
                        report.added, report.updated, report.deleted, report.unchanged,
                    ),
                ),
            ),
            None => (None, LogMessage::new(now, "info", format!("{route}: dry run"))),
        },
        Err(err) => {
            let msg = format!("{route} failed: {err}");
            (Some(msg.clone()), LogMessage::new(now, "error", msg))
        }
    };

    let mut delta = DeltaMessage::with_display(flag, false);
    if let Some(display) = delta.display.as_mut() {
        display.insert(format!("{flag}Error"), error.is_some().into());
        display.insert(format!("{flag}ErrorMsg"), error.unwrap_or_default().into());
    }
    delta.logs = Some(vec![log]);
    delta
}
