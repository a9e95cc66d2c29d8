//! Folding delta messages into the state document.
//!
//! Every rule is an overwrite, a full replacement or a prepend of stamped
//! entries, so folding a redelivered message a second time leaves the
//! document equivalent. Collections are rebuilt and swapped in, never edited
//! while being walked.

use std::collections::BTreeMap;

use stagehand_core::{DeltaMessage, LogMessage, StateDocument};

/// Which documents a fold actually changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Dirty {
    pub logs: bool,
    pub state: bool,
}

impl Dirty {
    pub fn merge(&mut self, other: Dirty) {
        self.logs |= other.logs;
        self.state |= other.state;
    }
}

/// Apply one delta. `rcpt_time` stamps incoming log entries.
pub fn fold_delta(
    state: &mut StateDocument,
    logs: &mut Vec<LogMessage>,
    delta: DeltaMessage,
    rcpt_time: i64,
) -> Dirty {
    let mut dirty = Dirty::default();

    if let Some(incoming) = delta.logs.filter(|l| !l.is_empty()) {
        let mut rebuilt = Vec::with_capacity(incoming.len() + logs.len());
        rebuilt.extend(incoming.into_iter().rev().map(|mut log| {
            log.rcpt_time = rcpt_time;
            log
        }));
        rebuilt.append(logs);
        *logs = rebuilt;
        dirty.logs = true;
    }

    if let Some(config) = delta.config {
        dirty.state |= merge_fields(&mut state.config, config);
    }
    if let Some(display) = delta.display {
        dirty.state |= merge_fields(&mut state.display, display);
    }

    if let Some(domains) = delta.available_domains {
        if state.available_domains != domains {
            state.available_domains = domains;
            dirty.state = true;
        }
    }

    if let Some(site) = delta.site_domain {
        let mut domains = state.domains.clone();
        domains.set_current(&site);
        if domains != state.domains {
            state.domains = domains;
            dirty.state = true;
        }
    }

    dirty
}

/// Shallow last-writer-wins per key. Returns whether anything changed.
fn merge_fields<V: PartialEq>(target: &mut BTreeMap<String, V>, incoming: BTreeMap<String, V>) -> bool {
    let mut changed = false;
    let mut merged = std::mem::take(target);
    for (key, value) in incoming {
        if merged.get(&key) != Some(&value) {
            merged.insert(key, value);
            changed = true;
        }
    }
    *target = merged;
    changed
}

/// Keep entries younger than `retention_ms`. Returns whether any were dropped.
pub fn apply_retention(logs: &mut Vec<LogMessage>, now_ms: i64, retention_ms: i64) -> bool {
    let before = logs.len();
    let kept: Vec<LogMessage> = std::mem::take(logs)
        .into_iter()
        .filter(|log| now_ms.saturating_sub(log.time) < retention_ms)
        .collect();
    *logs = kept;
    logs.len() != before
}
