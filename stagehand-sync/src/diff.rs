//! Tree diff: compute the add/update/delete plan between two listings.

use std::collections::{HashMap, HashSet};

use serde::Serialize;

use stagehand_core::FileEntry;

/// What a sync run will do. Computed once, never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncPlan {
    /// Present only in the source.
    pub to_add: Vec<FileEntry>,
    /// `(source, dest)` pairs whose hashes differ.
    pub to_update: Vec<(FileEntry, FileEntry)>,
    /// Present only in the destination.
    pub to_delete: Vec<FileEntry>,
    /// Equal hashes; reported, never transferred.
    pub unchanged: Vec<FileEntry>,
}

impl SyncPlan {
    /// True when the run has nothing to transfer or delete.
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Every entry the run will report on, including unchanged ones.
    pub fn total_count(&self) -> usize {
        self.to_add.len() + self.to_update.len() + self.to_delete.len() + self.unchanged.len()
    }
}

/// Diff `source` against `dest`, both deduplicated by `rel_path`.
///
/// Output lists are sorted by `rel_path`.
pub fn diff_trees(source: &[FileEntry], dest: &[FileEntry]) -> SyncPlan {
    let dest_by_rel: HashMap<&str, &FileEntry> = dest
        .iter()
        .map(|entry| (entry.rel_path.as_str(), entry))
        .collect();

    let mut plan = SyncPlan::default();
    let mut seen: HashSet<&str> = HashSet::with_capacity(source.len());

    for entry in source {
        seen.insert(entry.rel_path.as_str());
        match dest_by_rel.get(entry.rel_path.as_str()) {
            None => plan.to_add.push(entry.clone()),
            Some(existing) if existing.content_hash != entry.content_hash => {
                plan.to_update.push((entry.clone(), (*existing).clone()));
            }
            Some(_) => plan.unchanged.push(entry.clone()),
        }
    }

    plan.to_delete = dest
        .iter()
        .filter(|entry| !seen.contains(entry.rel_path.as_str()))
        .cloned()
        .collect();

    plan.to_add.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    plan.to_update.sort_by(|a, b| a.0.rel_path.cmp(&b.0.rel_path));
    plan.to_delete.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    plan.unchanged.sort_by(|a, b| a.rel_path.cmp(&b.rel_path));
    plan
}
