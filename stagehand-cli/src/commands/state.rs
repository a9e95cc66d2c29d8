//! `stagehand state [--watch] [--logs]`

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use clap::Args;
use colored::Colorize;
use serde::Serialize;

use stagehand_core::{Config, LocalDirStore, LogMessage, StateDocument};
use stagehand_state::{read_logs, read_state, PollCadence, PollSession, StateCache, StateRead};

use super::{block_on, home, load_config};

/// Print the state document.
#[derive(Args, Debug)]
pub struct StateArgs {
    /// Keep polling with the client cadence and print each change.
    #[arg(long)]
    pub watch: bool,

    /// Print log lines instead of the document.
    #[arg(long, conflicts_with = "watch")]
    pub logs: bool,
}

#[derive(Serialize)]
struct StateView<'a> {
    fingerprint: &'a str,
    document: &'a StateDocument,
}

impl StateArgs {
    pub fn run(self) -> Result<()> {
        let home = home()?;
        let config = load_config(&home)?;
        let store = LocalDirStore::new(&config.state.store_root);

        if self.watch {
            return block_on(watch(&config, &store))?;
        }

        let read = block_on(read_state(&store, &config.state.state_key, None))?
            .context("failed to read state document")?;
        let StateRead::Modified {
            document,
            fingerprint,
        } = read
        else {
            anyhow::bail!("unconditional state read returned not-modified");
        };

        if self.logs {
            let logs = match &config.state.log_key {
                Some(key) => block_on(read_logs(&store, key))?.context("failed to read logs")?,
                None => document.logs.clone(),
            };
            for log in &logs {
                println!("{}", render_log(log));
            }
            return Ok(());
        }

        let view = StateView {
            fingerprint: &fingerprint,
            document: &document,
        };
        println!(
            "{}",
            serde_json::to_string_pretty(&view).context("failed to render state JSON")?
        );
        Ok(())
    }
}

/// Poll until ctrl-c, fast while an operation is in flight.
async fn watch(config: &Config, store: &LocalDirStore) -> Result<()> {
    let cadence = PollCadence::from_settings(&config.poll);
    let mut cache = StateCache::new(cadence.fast);
    let mut session = PollSession::new(cadence);
    let mut last_fingerprint: Option<String> = None;

    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let cached = cache
            .fetch_at(store, &config.state.state_key, now_ms)
            .await
            .context("failed to read state document")?;

        if last_fingerprint.as_deref() != Some(cached.fingerprint.as_str()) {
            println!("{}", render_change(&cached.fingerprint, &cached.document));
            last_fingerprint = Some(cached.fingerprint.clone());
        }

        let wait = session.observe(&cached.document.display, tokio::time::Instant::now());
        tokio::select! {
            _ = tokio::time::sleep(wait) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

fn render_change(fingerprint: &str, document: &StateDocument) -> String {
    let short = &fingerprint[..fingerprint.len().min(12)];
    let flags: Vec<String> = document
        .display
        .iter()
        .map(|(key, value)| {
            if value.is_true() {
                format!("{key}={value}").green().to_string()
            } else {
                format!("{key}={value}")
            }
        })
        .collect();
    format!(
        "[{}] {} {}",
        Local::now().format("%H:%M:%S"),
        short.dimmed(),
        flags.join(" ")
    )
}

fn render_log(log: &LogMessage) -> String {
    let at = Local
        .timestamp_millis_opt(log.time)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| log.time.to_string());
    let kind = format!("{:>5}", log.kind);
    let kind = match log.kind.as_str() {
        "error" => kind.red().to_string(),
        "warn" | "warning" => kind.yellow().to_string(),
        _ => kind,
    };
    format!("{at} {kind} {}", log.msg)
}
