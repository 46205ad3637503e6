//! Data source and sink capability interfaces.
//!
//! The engine never talks to a database, search index, or cache directly: it
//! consumes `DataSourceProvider` to obtain entries and `DataSink` to put them
//! back, one implementation per [`EntryKind`]. Implementations are registered
//! explicitly and injected into the codecs at construction.

pub mod fs;

use crate::error::{BackupError, Result};
use crate::models::entry::{ArchiveEntry, EntryKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub use fs::{FsSink, FsSourceProvider};

/// Describes where a named source's bytes come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDescriptor {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Provider-specific fetch parameters (connection name, directory, index
    /// name, key prefix, ...).
    #[serde(default)]
    pub params: serde_json::Value,
}

impl SourceDescriptor {
    pub fn new(kind: EntryKind) -> Self {
        Self {
            kind,
            params: serde_json::Value::Null,
        }
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }
}

/// Caller-supplied criteria narrowing a selective backup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectiveCriteria {
    /// Restrict to these configured source names.
    pub sources: Option<Vec<String>>,
    /// Restrict to records owned by this entity.
    pub owner_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

/// Passed to providers on every fetch.
#[derive(Debug, Clone, Default)]
pub struct FetchRequest {
    /// For incremental backups: only entries changed after this instant.
    pub since: Option<DateTime<Utc>>,
    pub criteria: Option<SelectiveCriteria>,
}

/// Entries produced by one provider fetch.
#[derive(Debug, Default)]
pub struct SourceData {
    pub entries: Vec<ArchiveEntry>,
}

#[async_trait]
pub trait DataSourceProvider: Send + Sync {
    async fn fetch(&self, descriptor: &SourceDescriptor, request: &FetchRequest)
        -> Result<SourceData>;
}

/// Destination context handed to sinks during a restore.
#[derive(Debug, Clone)]
pub struct RestoreContext {
    pub restore_path: PathBuf,
    pub overwrite_existing: bool,
}

/// Result of dispatching one entry to a sink.
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    pub kind: EntryKind,
    pub name: String,
    pub destination: PathBuf,
    pub restored: bool,
}

#[async_trait]
pub trait DataSink: Send + Sync {
    async fn restore(&self, entry: &ArchiveEntry, ctx: &RestoreContext) -> Result<SinkOutcome>;
}

/// Providers keyed by the entry kind they serve.
#[derive(Default)]
pub struct SourceRegistry {
    providers: HashMap<EntryKind, Arc<dyn DataSourceProvider>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EntryKind, provider: Arc<dyn DataSourceProvider>) {
        self.providers.insert(kind, provider);
    }

    pub fn get(&self, kind: EntryKind) -> Result<&Arc<dyn DataSourceProvider>> {
        self.providers
            .get(&kind)
            .ok_or_else(|| BackupError::Source(format!("no provider registered for type {kind}")))
    }
}

/// Sinks keyed by the entry kind they accept.
#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<EntryKind, Arc<dyn DataSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: EntryKind, sink: Arc<dyn DataSink>) {
        self.sinks.insert(kind, sink);
    }

    pub fn get(&self, kind: EntryKind) -> Result<&Arc<dyn DataSink>> {
        self.sinks
            .get(&kind)
            .ok_or_else(|| BackupError::Sink(format!("no sink registered for type {kind}")))
    }
}
