//! Archive container entry types.
//!
//! The container header and per-entry metadata are serialized as camelCase
//! JSON inside the length-prefixed binary frames, so the same archive can be
//! read by any consumer of the wire format.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Current container format version.
pub const CONTAINER_VERSION: u32 = 1;

/// Kind of data an entry carries, also the dispatch key for providers/sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    Database,
    File,
    SearchIndex,
    Cache,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntryKind::Database => "database",
            EntryKind::File => "file",
            EntryKind::SearchIndex => "search-index",
            EntryKind::Cache => "cache",
        };
        write!(f, "{s}")
    }
}

/// Container header — first frame of every archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerHeader {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub entry_count: u32,
    /// Sum of all entry payload sizes in bytes.
    pub total_size: u64,
}

/// Metadata frame preceding each entry payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMeta {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One named unit of backed-up data: metadata plus raw payload bytes.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    pub meta: EntryMeta,
    pub data: Bytes,
}

impl ArchiveEntry {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        kind: EntryKind,
        data: impl Into<Bytes>,
    ) -> Self {
        let data = data.into();
        Self {
            meta: EntryMeta {
                name: name.into(),
                path: path.into(),
                kind,
                size: data.len() as u64,
                metadata: serde_json::Value::Null,
            },
            data,
        }
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.meta.metadata = metadata;
        self
    }
}
