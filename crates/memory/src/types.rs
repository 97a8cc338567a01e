//! Memory records, ingest input and configuration.

use std::path::PathBuf;

use beebo_common::{BeeboError, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::normalize::normalize;

pub const DEFAULT_TYPE: &str = "note";
pub const DEFAULT_SOURCE: &str = "manual";

/// A stored memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique ID (UUID v4), fixed at creation
    pub id: String,

    /// The text as it was submitted
    pub text: String,

    /// Trimmed, case-folded text; unique across the store
    pub text_norm: String,

    /// Free-form classification ("note", "event", ...)
    #[serde(rename = "type")]
    pub memory_type: String,

    /// Tags for filtered recall, duplicates already collapsed
    #[serde(default)]
    pub tags: Vec<String>,

    /// Origin label ("manual", "voice", an agent name)
    pub source: String,

    /// When the remembered thing happens, if known
    #[serde(default)]
    pub ts: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    /// Bumped every time an insert resolves to this row
    pub last_updated: DateTime<Utc>,

    /// Vector embedding of `text`, if the provider answered at insert time
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl Memory {
    /// Build a fresh record for `new`, stamped with `now`.
    pub fn from_new(new: NewMemory, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text_norm: normalize(&new.text),
            text: new.text,
            memory_type: new.memory_type.unwrap_or_else(|| DEFAULT_TYPE.into()),
            tags: new.tags.unwrap_or_default(),
            source: new.source.unwrap_or_else(|| DEFAULT_SOURCE.into()),
            ts: new.ts,
            created_at: now,
            last_updated: now,
            embedding: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Option<Vec<f32>>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Validated input for one ingest call.
///
/// Metadata left as `None` takes its default on a new row and keeps the
/// stored value when the text already exists.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMemory {
    pub text: String,
    pub memory_type: Option<String>,
    pub tags: Option<Vec<String>>,
    pub source: Option<String>,
    pub ts: Option<DateTime<Utc>>,
}

/// Which metadata columns an exact-duplicate upsert may overwrite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Supplied {
    pub memory_type: bool,
    pub tags: bool,
    pub source: bool,
}

impl NewMemory {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            memory_type: None,
            tags: None,
            source: None,
            ts: None,
        }
    }

    pub fn supplied(&self) -> Supplied {
        Supplied {
            memory_type: self.memory_type.is_some(),
            tags: self.tags.is_some(),
            source: self.source.is_some(),
        }
    }

    pub fn with_type(mut self, memory_type: impl Into<String>) -> Self {
        self.memory_type = Some(memory_type.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = Some(canonical_tags(tags.into_iter().map(Into::into)));
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_ts(mut self, ts: DateTime<Utc>) -> Self {
        self.ts = Some(ts);
        self
    }
}

/// Raw ingest body as it arrives over HTTP.
///
/// `tags` is kept as loose JSON because callers send arrays, comma-separated
/// strings and JSON-encoded strings; [`parse_tags`] folds them into one shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "type")]
    pub memory_type: Option<String>,
    #[serde(default)]
    pub tags: Option<serde_json::Value>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub ts: Option<String>,
}

impl IngestRequest {
    pub fn into_new_memory(self) -> Result<NewMemory> {
        let text = match self.text {
            Some(text) if !text.trim().is_empty() => text,
            _ => return Err(BeeboError::validation("text required")),
        };

        let mut new = NewMemory::new(text);
        new.memory_type = non_blank(self.memory_type);
        new.source = non_blank(self.source);
        new.tags = match self.tags {
            None | Some(serde_json::Value::Null) => None,
            Some(tags) => Some(parse_tags(&tags)?),
        };
        if let Some(raw) = non_blank(self.ts) {
            let parsed = DateTime::parse_from_rfc3339(&raw).map_err(|e| {
                BeeboError::validation(format!("ts must be an RFC 3339 timestamp: {e}"))
            })?;
            new.ts = Some(parsed.with_timezone(&Utc));
        }
        Ok(new)
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Trim, drop empties, collapse duplicates keeping first-seen order.
pub fn canonical_tags<I>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Coerce the accepted `tags` shapes into a canonical tag list.
///
/// Accepted: `null`, an array of strings, a string holding a JSON array of
/// strings, or a comma-separated string. Everything else is rejected.
pub fn parse_tags(value: &serde_json::Value) -> Result<Vec<String>> {
    use serde_json::Value;

    match value {
        Value::Null => Ok(Vec::new()),
        Value::Array(items) => {
            let mut tags = Vec::with_capacity(items.len());
            for item in items {
                match item {
                    Value::String(s) => tags.push(s.clone()),
                    other => {
                        return Err(BeeboError::validation(format!(
                            "tags must be strings, got {other}"
                        )));
                    }
                }
            }
            Ok(canonical_tags(tags))
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.starts_with('[') {
                let inner: Value = serde_json::from_str(trimmed).map_err(|e| {
                    BeeboError::validation(format!("tags string is not a JSON array: {e}"))
                })?;
                return match inner {
                    Value::Array(_) => parse_tags(&inner),
                    _ => Err(BeeboError::validation("tags string is not a JSON array")),
                };
            }
            Ok(canonical_tags(trimmed.split(',').map(str::to_string)))
        }
        other => Err(BeeboError::validation(format!(
            "tags must be an array of strings or a string, got {other}"
        ))),
    }
}

/// What to do when an insert hits an existing `text_norm`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupPolicy {
    /// Refresh the existing row's metadata and report `updated: true`
    #[default]
    Upsert,
    /// Leave the existing row alone and report a duplicate
    Reject,
}

/// Configuration for storage, deduplication and recall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub dedup_policy: DedupPolicy,

    /// Cosine similarity above which a new memory counts as a semantic duplicate
    #[serde(default = "default_semantic_threshold")]
    pub semantic_threshold: f32,

    /// Default number of recall results
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,

    /// Default number of rows for full listings
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,

    /// Default number of rows for tag/type listings
    #[serde(default = "default_filter_limit")]
    pub filter_limit: usize,

    /// Upper bound on any caller-supplied limit
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    /// IANA time zone that defines "today"
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./data/beebo.db")
}

fn default_semantic_threshold() -> f32 {
    0.9
}

fn default_recall_limit() -> usize {
    5
}

fn default_list_limit() -> usize {
    500
}

fn default_filter_limit() -> usize {
    50
}

fn default_max_limit() -> usize {
    1000
}

fn default_timezone() -> String {
    "UTC".into()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            dedup_policy: DedupPolicy::default(),
            semantic_threshold: default_semantic_threshold(),
            recall_limit: default_recall_limit(),
            list_limit: default_list_limit(),
            filter_limit: default_filter_limit(),
            max_limit: default_max_limit(),
            timezone: default_timezone(),
        }
    }
}

impl MemoryConfig {
    pub fn time_zone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| BeeboError::Config(format!("unknown time zone '{}': {e}", self.timezone)))
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.semantic_threshold > -1.0 && self.semantic_threshold <= 1.0) {
            return Err(BeeboError::Config(format!(
                "semantic_threshold must be in (-1, 1], got {}",
                self.semantic_threshold
            )));
        }
        if self.recall_limit == 0 || self.max_limit == 0 {
            return Err(BeeboError::Config("limits must be positive".into()));
        }
        self.time_zone().map(|_| ())
    }
}
