//! Domain types shared by the sync engine and the state aggregator.
//!
//! JSON field names are camelCase because the state document and queue
//! messages are read and produced by non-Rust clients.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DeltaParseError;

// ---------------------------------------------------------------------------
// Content trees
// ---------------------------------------------------------------------------

/// One file in a hashed tree listing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Key of the entry inside its own store.
    pub path: String,
    /// Tree-relative key used for cross-tree comparison; always starts with `/`.
    pub rel_path: String,
    /// Opaque content fingerprint (ETag or computed digest).
    pub content_hash: String,
}

impl FileEntry {
    pub fn new(
        path: impl Into<String>,
        rel_path: impl Into<String>,
        content_hash: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            rel_path: normalize_rel_path(&rel_path.into()),
            content_hash: content_hash.into(),
        }
    }
}

/// Force a single leading `/` and forward slashes.
pub fn normalize_rel_path(rel: &str) -> String {
    let rel = rel.replace('\\', "/");
    format!("/{}", rel.trim_start_matches('/'))
}

/// Join a store prefix and a tree-relative path into a store key.
///
/// `("site", "/a.txt")` → `site/a.txt`; `("", "/a.txt")` → `a.txt`.
pub fn join_key(prefix: &str, rel_path: &str) -> String {
    let prefix = prefix.trim_matches('/');
    let rel = rel_path.trim_start_matches('/');
    if prefix.is_empty() {
        rel.to_string()
    } else {
        format!("{prefix}/{rel}")
    }
}

// ---------------------------------------------------------------------------
// Lease
// ---------------------------------------------------------------------------

/// Advisory claim on the administrative lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub owner_id: String,
    pub acquired_at_ms: i64,
    pub timeout_ms: i64,
}

impl Lease {
    /// A lease is abandoned once `now - acquired_at >= timeout`.
    pub fn is_stale_at(&self, now_ms: i64) -> bool {
        now_ms.saturating_sub(self.acquired_at_ms) >= self.timeout_ms
    }

    /// Persisted form: `"<owner> <acquired_at_ms>"`.
    pub fn to_record(&self) -> String {
        format!("{} {}", self.owner_id, self.acquired_at_ms)
    }

    /// Parse the two-token record. The timeout is supplied by the reader.
    pub fn parse_record(record: &str, timeout_ms: i64) -> Option<Self> {
        let mut tokens = record.split_whitespace();
        let owner_id = tokens.next()?.to_string();
        let acquired_at_ms = tokens.next()?.parse().ok()?;
        if tokens.next().is_some() {
            return None;
        }
        Some(Self {
            owner_id,
            acquired_at_ms,
            timeout_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// State document
// ---------------------------------------------------------------------------

/// A `display` flag value: clients branch on booleans, error messages are strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DisplayValue {
    Flag(bool),
    Text(String),
}

impl DisplayValue {
    pub fn is_true(&self) -> bool {
        matches!(self, DisplayValue::Flag(true))
    }
}

impl From<bool> for DisplayValue {
    fn from(value: bool) -> Self {
        DisplayValue::Flag(value)
    }
}

impl From<&str> for DisplayValue {
    fn from(value: &str) -> Self {
        DisplayValue::Text(value.to_owned())
    }
}

impl From<String> for DisplayValue {
    fn from(value: String) -> Self {
        DisplayValue::Text(value)
    }
}

/// A site domain as reported by the provisioning side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_arn: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Domains {
    #[serde(default)]
    pub base: Option<String>,
    #[serde(default)]
    pub base_test: Option<String>,
    #[serde(default)]
    pub current: Option<String>,
    #[serde(default)]
    pub current_arn: Option<String>,
    #[serde(default)]
    pub current_test: Option<String>,
    #[serde(default)]
    pub current_test_arn: Option<String>,
}

impl Domains {
    /// Rewrite the four `current*` fields as a group.
    pub fn set_current(&mut self, domain: &Domain) {
        self.current = Some(domain.name.clone());
        self.current_arn = domain.arn.clone();
        self.current_test = domain.test_name.clone();
        self.current_test_arn = domain.test_arn.clone();
    }
}

/// A visible captured-log artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFileRef {
    pub key: String,
    pub created_at_ms: i64,
}

/// One user-visible log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMessage {
    /// Producer clock, ms since the epoch.
    pub time: i64,
    /// Aggregator clock at fold time; producers leave it unset.
    #[serde(default)]
    pub rcpt_time: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub msg: String,
}

impl LogMessage {
    pub fn new(time: i64, kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            time,
            rcpt_time: 0,
            kind: kind.into(),
            msg: msg.into(),
        }
    }
}

/// The single document read by every polling client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StateDocument {
    #[serde(default)]
    pub config: BTreeMap<String, Value>,
    #[serde(default)]
    pub display: BTreeMap<String, DisplayValue>,
    #[serde(default)]
    pub domains: Domains,
    #[serde(default)]
    pub available_domains: Vec<Domain>,
    #[serde(default)]
    pub captured_logs: Vec<LogFileRef>,
    /// Only populated when no separate log store is configured.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogMessage>,
}

// ---------------------------------------------------------------------------
// Delta messages
// ---------------------------------------------------------------------------

/// Current version of the queue message schema.
pub const DELTA_SCHEMA_VERSION: u32 = 1;

/// A partial update to the state document. Absent fields mean "no change".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<Vec<LogMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<BTreeMap<String, DisplayValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_domains: Option<Vec<Domain>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_domain: Option<Domain>,
}

impl DeltaMessage {
    pub fn with_display(key: impl Into<String>, value: impl Into<DisplayValue>) -> Self {
        let mut display = BTreeMap::new();
        display.insert(key.into(), value.into());
        Self {
            display: Some(display),
            ..Self::default()
        }
    }

    pub fn with_log(log: LogMessage) -> Self {
        Self {
            logs: Some(vec![log]),
            ..Self::default()
        }
    }

    /// Serialize as a versioned queue body.
    pub fn to_body(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&DeltaEnvelope {
            version: DELTA_SCHEMA_VERSION,
            delta: self.clone(),
        })
    }

    /// Parse and validate a queue body. Unknown fields are ignored.
    pub fn parse_body(body: &str) -> Result<Self, DeltaParseError> {
        let envelope: DeltaEnvelope = serde_json::from_str(body)?;
        if envelope.version != DELTA_SCHEMA_VERSION {
            return Err(DeltaParseError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope.delta)
    }
}

/// Wire form of a [`DeltaMessage`].
#[derive(Debug, Serialize, Deserialize)]
struct DeltaEnvelope {
    version: u32,
    #[serde(flatten)]
    delta: DeltaMessage,
}

impl fmt::Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisplayValue::Flag(flag) => flag.fmt(f),
            DisplayValue::Text(text) => text.fmt(f),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rel_paths_are_normalized() {
        assert_eq!(normalize_rel_path("a.txt"), "/a.txt");
        assert_eq!(normalize_rel_path("//css\\site.css"), "/css/site.css");
        assert_eq!(FileEntry::new("k", "x/y", "h").rel_path, "/x/y");
    }

    #[test]
    fn join_key_handles_empty_prefix() {
        assert_eq!(join_key("", "/a.txt"), "a.txt");
        assert_eq!(join_key("site/", "/css/a.css"), "site/css/a.css");
    }

    #[test]
    fn lease_record_roundtrip_and_rejects_garbage() {
        let lease = Lease {
            owner_id: "alice".into(),
            acquired_at_ms: 1_700_000_000_000,
            timeout_ms: 1000,
        };
        assert_eq!(lease.to_record(), "alice 1700000000000");
        assert_eq!(Lease::parse_record(&lease.to_record(), 1000), Some(lease));
        assert!(Lease::parse_record("alice", 1000).is_none());
        assert!(Lease::parse_record("alice soon", 1000).is_none());
        assert!(Lease::parse_record("alice 1 extra", 1000).is_none());
    }

    #[test]
    fn state_document_uses_camel_case() {
        let mut doc = StateDocument::default();
        doc.domains.base_test = Some("test.example.com".into());
        doc.display.insert("building".into(), true.into());
        let value = serde_json::to_value(&doc).expect("serialize");
        assert_eq!(value["domains"]["baseTest"], json!("test.example.com"));
        assert_eq!(value["display"]["building"], json!(true));
        assert!(value.get("availableDomains").is_some());
        assert!(value.get("logs").is_none(), "empty logs are not serialized");
    }

    #[test]
    fn delta_body_requires_version() {
        let parsed = DeltaMessage::parse_body(r#"{"version":1,"config":{"a":1},"extra":true}"#)
            .expect("valid body");
        assert_eq!(parsed.config.expect("config")["a"], json!(1));

        assert!(matches!(
            DeltaMessage::parse_body(r#"{"config":{"a":1}}"#),
            Err(DeltaParseError::Json(_))
        ));
        assert!(matches!(
            DeltaMessage::parse_body(r#"{"version":2}"#),
            Err(DeltaParseError::UnsupportedVersion(2))
        ));
        assert!(DeltaMessage::parse_body("[1,2,3]").is_err());
        assert!(DeltaMessage::parse_body(r#"{"version":1,"display":"nope"}"#).is_err());
    }

    #[test]
    fn delta_body_roundtrip_keeps_fields() {
        let delta = DeltaMessage::with_display("deploying", true);
        let body = delta.to_body().expect("encode");
        assert!(body.contains(r#""version":1"#));
        assert_eq!(DeltaMessage::parse_body(&body).expect("decode"), delta);
    }

    #[test]
    fn producer_logs_default_receipt_time() {
        let log: LogMessage =
            serde_json::from_str(r#"{"time":5,"type":"info","msg":"hi"}"#).expect("log");
        assert_eq!(log.rcpt_time, 0);
        assert_eq!(log.kind, "info");
    }
}
