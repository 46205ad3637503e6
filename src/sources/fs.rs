//! Built-in filesystem provider and sink for `file` entries.
//!
//! The provider walks a directory tree and emits one entry per regular file;
//! the sink writes entries back out under the restore path. Other entry kinds
//! (database, search-index, cache) are backed by host-supplied
//! implementations.

use crate::error::{BackupError, Result};
use crate::models::entry::{ArchiveEntry, EntryKind};
use crate::sources::{
    DataSink, DataSourceProvider, FetchRequest, RestoreContext, SinkOutcome, SourceData,
    SourceDescriptor,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// Directory names skipped during the walk.
const DEFAULT_EXCLUDES: &[&str] = &[".git", "node_modules", ".DS_Store"];

/// Reads `file` entries from a directory named in the descriptor params
/// (`{"root": "/srv/uploads"}`).
pub struct FsSourceProvider;

impl FsSourceProvider {
    fn root_from(descriptor: &SourceDescriptor) -> Result<PathBuf> {
        descriptor
            .params
            .get("root")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .ok_or_else(|| {
                BackupError::Source("file source descriptor is missing a 'root' param".into())
            })
    }
}

#[async_trait]
impl DataSourceProvider for FsSourceProvider {
    async fn fetch(
        &self,
        descriptor: &SourceDescriptor,
        request: &FetchRequest,
    ) -> Result<SourceData> {
        let root = Self::root_from(descriptor)?;
        if !root.is_dir() {
            return Err(BackupError::Source(format!(
                "file source root {} is not a directory",
                root.display()
            )));
        }

        let since = request.since;
        // Directory walk is blocking work.
        let entries =
            tokio::task::spawn_blocking(move || scan_directory(&root, since))
                .await
                .map_err(|e| BackupError::Source(format!("file scan task failed: {e}")))??;

        Ok(SourceData { entries })
    }
}

fn scan_directory(root: &Path, since: Option<DateTime<Utc>>) -> Result<Vec<ArchiveEntry>> {
    let mut entries = Vec::new();

    for item in WalkDir::new(root).follow_links(false) {
        let item = match item {
            Ok(i) => i,
            Err(e) => {
                warn!("Skipping unreadable path under {}: {}", root.display(), e);
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }
        if item
            .path()
            .components()
            .any(|c| DEFAULT_EXCLUDES.contains(&c.as_os_str().to_string_lossy().as_ref()))
        {
            continue;
        }

        let metadata = item.metadata().map_err(|e| {
            BackupError::Source(format!("failed to stat {}: {e}", item.path().display()))
        })?;

        // Incremental: keep only files modified after the watermark.
        if let Some(since) = since {
            let modified: DateTime<Utc> = metadata
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_else(|_| Utc::now());
            if modified <= since {
                continue;
            }
        }

        let relative = item
            .path()
            .strip_prefix(root)
            .unwrap_or(item.path())
            .to_string_lossy()
            .to_string();
        let data = std::fs::read(item.path())?;

        entries.push(ArchiveEntry::new(
            relative.clone(),
            relative,
            EntryKind::File,
            Bytes::from(data),
        ));
    }

    Ok(entries)
}

/// Writes `file` entries under the restore path.
pub struct FsSink;

#[async_trait]
impl DataSink for FsSink {
    async fn restore(&self, entry: &ArchiveEntry, ctx: &RestoreContext) -> Result<SinkOutcome> {
        let destination = ctx.restore_path.join(&entry.meta.path);

        if !ctx.overwrite_existing && tokio::fs::try_exists(&destination).await? {
            return Ok(SinkOutcome {
                kind: entry.meta.kind,
                name: entry.meta.name.clone(),
                destination,
                restored: false,
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&destination, &entry.data).await?;

        Ok(SinkOutcome {
            kind: entry.meta.kind,
            name: entry.meta.name.clone(),
            destination,
            restored: true,
        })
    }
}
