//! Hashed tree listings.
//!
//! A tree is every key under a prefix in one store. Listing always follows
//! continuation tokens to the end, so a truncated page is never mistaken for
//! the whole tree.

use std::collections::BTreeMap;

use glob::Pattern;

use stagehand_core::types::normalize_rel_path;
use stagehand_core::{FileEntry, ObjectStore};

use crate::SyncError;

/// A store plus the prefix the tree lives under.
#[derive(Clone, Copy)]
pub struct Tree<'a> {
    pub store: &'a dyn ObjectStore,
    pub prefix: &'a str,
}

impl<'a> Tree<'a> {
    pub fn new(store: &'a dyn ObjectStore, prefix: &'a str) -> Self {
        Self { store, prefix }
    }
}

/// Exclude globs matched against tree-relative paths without the leading `/`.
#[derive(Debug, Clone, Default)]
pub struct TreeFilter {
    patterns: Vec<Pattern>,
}

impl TreeFilter {
    pub fn new(patterns: &[String]) -> Result<Self, SyncError> {
        let patterns = patterns
            .iter()
            .map(|raw| {
                Pattern::new(raw).map_err(|source| SyncError::Pattern {
                    pattern: raw.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    pub fn excludes(&self, rel_path: &str) -> bool {
        let candidate = rel_path.trim_start_matches('/');
        self.patterns.iter().any(|p| p.matches(candidate))
    }
}

/// List a tree as [`FileEntry`] values keyed by tree-relative path.
///
/// The result is deduplicated by `rel_path` (later listing entries win) and
/// sorted by `rel_path`.
pub async fn list_tree(tree: Tree<'_>, filter: &TreeFilter) -> Result<Vec<FileEntry>, SyncError> {
    let list_prefix = list_prefix(tree.prefix);
    let objects = tree.store.list_all(&list_prefix).await?;

    let mut by_rel: BTreeMap<String, FileEntry> = BTreeMap::new();
    for object in objects {
        let Some(relative) = object.key.strip_prefix(list_prefix.as_str()) else {
            continue;
        };
        if relative.is_empty() {
            continue;
        }
        let rel_path = normalize_rel_path(relative);
        if filter.excludes(&rel_path) {
            tracing::debug!(key = %object.key, "excluded from tree listing");
            continue;
        }
        by_rel.insert(
            rel_path.clone(),
            FileEntry {
                path: object.key,
                rel_path,
                content_hash: object.hash,
            },
        );
    }
    Ok(by_rel.into_values().collect())
}

/// `"site"` / `"site/"` → `"site/"`; empty stays empty.
pub(crate) fn list_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stagehand_core::MemoryStore;

    #[tokio::test]
    async fn lists_across_pages_with_relative_paths() {
        let store = MemoryStore::with_page_size(1);
        store.insert("site/index.html", "home").await;
        store.insert("site/css/a.css", "css").await;
        store.insert("elsewhere/x", "x").await;

        let entries = list_tree(Tree::new(&store, "site"), &TreeFilter::default())
            .await
            .expect("list");
        let rels: Vec<_> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, ["/css/a.css", "/index.html"]);
        assert_eq!(entries[1].path, "site/index.html");
    }

    #[tokio::test]
    async fn exclude_patterns_drop_entries() {
        let store = MemoryStore::new();
        store.insert("index.html", "home").await;
        store.insert(".DS_Store", "junk").await;
        store.insert("img/.DS_Store", "junk").await;
        store.insert("js/app.js.map", "map").await;

        let filter = TreeFilter::new(&[
            ".DS_Store".to_string(),
            "**/.DS_Store".to_string(),
            "*.map".to_string(),
        ])
        .expect("filter");
        let entries = list_tree(Tree::new(&store, ""), &filter).await.expect("list");
        let rels: Vec<_> = entries.iter().map(|e| e.rel_path.as_str()).collect();
        assert_eq!(rels, ["/index.html"]);
    }

    #[test]
    fn bad_pattern_is_reported() {
        let err = TreeFilter::new(&["[".to_string()]).unwrap_err();
        assert!(err.to_string().contains("invalid exclude pattern"));
    }

    #[test]
    fn prefix_normalization() {
        assert_eq!(list_prefix(""), "");
        assert_eq!(list_prefix("/"), "");
        assert_eq!(list_prefix("site/"), "site/");
        assert_eq!(list_prefix("site"), "site/");
    }
}
