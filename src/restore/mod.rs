//! Restore codec: decrypts, decompresses and parses a backup container,
//! filters entries, and dispatches them to type-specific data sinks.

use crate::archive::compression::{self, CompressionMethod};
use crate::archive::container::ContainerReader;
use crate::archive::{crypto, hex_encode, sidecar_path_for};
use crate::error::{BackupError, Result};
use crate::models::backup_record::ArchiveManifest;
use crate::models::entry::{ArchiveEntry, EntryKind, EntryMeta};
use crate::sources::{RestoreContext, SinkRegistry};
use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Minimum acceptable success rate when partial restores are not allowed.
const RESTORE_SUCCESS_THRESHOLD: f64 = 0.9;

/// The subset of a backup record the restore codec needs.
#[derive(Debug, Clone)]
pub struct BackupInfo {
    pub id: String,
    pub path: PathBuf,
    pub size: u64,
}

/// Include/exclude filters for a selective restore. Empty include lists mean
/// "everything"; excludes always win.
#[derive(Debug, Clone, Default)]
pub struct SelectiveFilter {
    pub include_types: Vec<EntryKind>,
    pub exclude_types: Vec<EntryKind>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
}

impl SelectiveFilter {
    pub fn matches(&self, meta: &EntryMeta) -> bool {
        if !self.include_types.is_empty() && !self.include_types.contains(&meta.kind) {
            return false;
        }
        if self.exclude_types.contains(&meta.kind) {
            return false;
        }
        if !self.include_paths.is_empty()
            && !self.include_paths.iter().any(|p| meta.path.starts_with(p.as_str()))
        {
            return false;
        }
        if self.exclude_paths.iter().any(|p| meta.path.starts_with(p.as_str())) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct RestoreOptions {
    pub restore_path: PathBuf,
    pub overwrite_existing: bool,
    pub allow_partial_restore: bool,
    pub encryption_key: Option<String>,
    pub selective: Option<SelectiveFilter>,
    /// Skip failing entries instead of aborting the whole restore.
    pub continue_on_error: bool,
    /// Size, checksum and on-disk verification.
    pub validate: bool,
}

impl RestoreOptions {
    pub fn new(restore_path: impl Into<PathBuf>) -> Self {
        Self {
            restore_path: restore_path.into(),
            overwrite_existing: false,
            allow_partial_restore: false,
            encryption_key: None,
            selective: None,
            continue_on_error: true,
            validate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoredEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub size: u64,
    pub destination: PathBuf,
    /// False when the sink skipped an already existing destination.
    pub restored: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct RestoreReport {
    pub success: bool,
    pub restore_id: String,
    pub backup_id: String,
    pub restored_entries: Vec<RestoredEntry>,
    pub failed_entries: Vec<FailedEntry>,
    /// Total payload bytes restored.
    pub total_size: u64,
    pub success_count: usize,
    pub failure_count: usize,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Stateless restore codec. Sinks are injected at construction.
pub struct Restorer {
    sinks: Arc<SinkRegistry>,
}

impl Restorer {
    pub fn new(sinks: Arc<SinkRegistry>) -> Self {
        Self { sinks }
    }

    pub async fn restore_backup(
        &self,
        backup: &BackupInfo,
        options: &RestoreOptions,
    ) -> Result<RestoreReport> {
        let start = Instant::now();
        let restore_id = Uuid::new_v4().to_string();

        if !tokio::fs::try_exists(&backup.path).await? {
            return Err(BackupError::NotFound(format!(
                "backup file {} does not exist",
                backup.path.display()
            )));
        }

        let raw = tokio::fs::read(&backup.path).await?;
        if options.validate && raw.len() as u64 != backup.size {
            return Err(BackupError::Integrity(format!(
                "backup {} is {} bytes on disk but the record declares {}",
                backup.id,
                raw.len(),
                backup.size
            )));
        }

        let manifest = read_sidecar(&backup.path).await;
        if options.validate {
            if let Some(manifest) = &manifest {
                let checksum = hex_encode(&Sha256::digest(&raw));
                if checksum != manifest.checksum {
                    return Err(BackupError::Integrity(format!(
                        "backup {} checksum mismatch: file is corrupted",
                        backup.id
                    )));
                }
            }
        }

        let file_name = backup
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let encrypted = file_name.ends_with(".enc");

        let compressed = if encrypted {
            let key = options.encryption_key.as_deref().ok_or_else(|| {
                BackupError::Crypto(format!(
                    "backup {} is encrypted but no encryption key was given",
                    backup.id
                ))
            })?;
            crypto::decrypt(key, &raw)?
        } else {
            raw
        };

        // Sidecar manifest wins; filename extension is the fallback.
        let method = manifest
            .as_ref()
            .and_then(|m| m.compression_method.parse::<CompressionMethod>().ok())
            .unwrap_or_else(|| CompressionMethod::from_path(&backup.path));

        let container = Bytes::from(compression::decompress(method, &compressed).await?);
        drop(compressed);

        let mut reader = ContainerReader::new(container)?;
        info!(
            backup_id = %backup.id,
            entries = reader.header().entry_count,
            "Restoring backup from {}",
            backup.path.display()
        );

        let ctx = RestoreContext {
            restore_path: options.restore_path.clone(),
            overwrite_existing: options.overwrite_existing,
        };
        let mut restored_entries: Vec<RestoredEntry> = Vec::new();
        let mut failed_entries: Vec<FailedEntry> = Vec::new();
        let mut total_size = 0u64;

        while let Some((meta, data)) = reader.next_entry()? {
            if let Some(filter) = &options.selective {
                if !filter.matches(&meta) {
                    continue;
                }
            }

            let entry = ArchiveEntry {
                meta: meta.clone(),
                data,
            };
            let dispatched = match self.sinks.get(meta.kind) {
                Ok(sink) => sink.restore(&entry, &ctx).await,
                Err(e) => Err(e),
            };

            match dispatched {
                Ok(outcome) => {
                    total_size += meta.size;
                    restored_entries.push(RestoredEntry {
                        name: meta.name,
                        path: meta.path,
                        kind: meta.kind,
                        size: meta.size,
                        destination: outcome.destination,
                        restored: outcome.restored,
                    });
                }
                Err(e) if options.continue_on_error => {
                    warn!(entry = %meta.name, error = %e, "Entry restore failed, skipping");
                    failed_entries.push(FailedEntry {
                        name: meta.name,
                        path: meta.path,
                        kind: meta.kind,
                        error: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        // Restored file entries must actually exist at their destination.
        if options.validate {
            let mut verified = Vec::with_capacity(restored_entries.len());
            for entry in restored_entries {
                if entry.kind == EntryKind::File
                    && entry.restored
                    && !tokio::fs::try_exists(&entry.destination).await?
                {
                    warn!(entry = %entry.name, "Restored file missing at destination");
                    total_size -= entry.size;
                    failed_entries.push(FailedEntry {
                        name: entry.name,
                        path: entry.path,
                        kind: entry.kind,
                        error: format!("missing at {} after restore", entry.destination.display()),
                    });
                } else {
                    verified.push(entry);
                }
            }
            restored_entries = verified;
        }

        let success_count = restored_entries.len();
        let failure_count = failed_entries.len();
        let attempted = success_count + failure_count;
        let success_rate = if attempted > 0 {
            success_count as f64 / attempted as f64
        } else {
            1.0
        };

        if success_rate < RESTORE_SUCCESS_THRESHOLD && !options.allow_partial_restore {
            return Err(BackupError::RestoreThreshold(format!(
                "restore success rate {:.0}% is below {:.0}% ({} of {} entries failed)",
                success_rate * 100.0,
                RESTORE_SUCCESS_THRESHOLD * 100.0,
                failure_count,
                attempted
            )));
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            backup_id = %backup.id,
            restore_id = %restore_id,
            restored = success_count,
            failed = failure_count,
            duration_ms,
            "Restore finished"
        );

        Ok(RestoreReport {
            success: true,
            restore_id,
            backup_id: backup.id.clone(),
            restored_entries,
            failed_entries,
            total_size,
            success_count,
            failure_count,
            duration_ms,
            error: None,
        })
    }
}

async fn read_sidecar(backup_path: &std::path::Path) -> Option<ArchiveManifest> {
    let sidecar = sidecar_path_for(backup_path);
    match tokio::fs::read(&sidecar).await {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(manifest) => Some(manifest),
            Err(e) => {
                warn!("Unreadable sidecar manifest {}: {}", sidecar.display(), e);
                None
            }
        },
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveOptions, Archiver};
    use crate::models::backup_record::BackupKind;
    use crate::sources::{
        DataSink, DataSourceProvider, FetchRequest, SinkOutcome, SourceData, SourceDescriptor,
        SourceRegistry,
    };
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Provider serving a fixed entry list, used to author test archives.
    struct FixtureProvider {
        entries: Vec<ArchiveEntry>,
    }

    #[async_trait]
    impl DataSourceProvider for FixtureProvider {
        async fn fetch(&self, _d: &SourceDescriptor, _r: &FetchRequest) -> Result<SourceData> {
            Ok(SourceData {
                entries: self.entries.clone(),
            })
        }
    }

    /// Sink recording everything it receives.
    #[derive(Default)]
    struct MemorySink {
        received: Mutex<Vec<(EntryMeta, Bytes)>>,
    }

    #[async_trait]
    impl DataSink for MemorySink {
        async fn restore(&self, entry: &ArchiveEntry, ctx: &RestoreContext) -> Result<SinkOutcome> {
            self.received
                .lock()
                .unwrap()
                .push((entry.meta.clone(), entry.data.clone()));
            Ok(SinkOutcome {
                kind: entry.meta.kind,
                name: entry.meta.name.clone(),
                destination: ctx.restore_path.join(&entry.meta.path),
                restored: true,
            })
        }
    }

    /// Sink that fails for entry names in its deny list.
    struct FlakySink {
        deny: Vec<String>,
    }

    #[async_trait]
    impl DataSink for FlakySink {
        async fn restore(&self, entry: &ArchiveEntry, ctx: &RestoreContext) -> Result<SinkOutcome> {
            if self.deny.contains(&entry.meta.name) {
                return Err(BackupError::Sink(format!("refused {}", entry.meta.name)));
            }
            Ok(SinkOutcome {
                kind: entry.meta.kind,
                name: entry.meta.name.clone(),
                destination: ctx.restore_path.join(&entry.meta.path),
                restored: true,
            })
        }
    }

    fn fixture_entries() -> Vec<ArchiveEntry> {
        vec![
            ArchiveEntry::new("users", "db/users", EntryKind::Database, &b"user rows"[..]),
            ArchiveEntry::new("notes", "db/notes", EntryKind::Database, &b"note rows"[..]),
            ArchiveEntry::new("avatar.png", "files/avatar.png", EntryKind::File, vec![1u8, 2, 3]),
            ArchiveEntry::new("notes-idx", "idx/notes", EntryKind::SearchIndex, &b"idx"[..]),
            ArchiveEntry::new("sessions", "cache/sessions", EntryKind::Cache, &b"kv"[..]),
        ]
    }

    /// Writes an archive of the fixture entries, returns its BackupInfo.
    async fn author_archive(
        dir: &TempDir,
        encryption_key: Option<&str>,
        method: CompressionMethod,
    ) -> BackupInfo {
        let mut registry = SourceRegistry::new();
        registry.register(
            EntryKind::Database,
            Arc::new(FixtureProvider {
                entries: fixture_entries(),
            }),
        );
        let archiver = Archiver::new(Arc::new(registry));

        let mut sources = BTreeMap::new();
        sources.insert("all".to_string(), SourceDescriptor::new(EntryKind::Database));

        let mut options = ArchiveOptions::new("backup-1", BackupKind::Full);
        options.compression_method = method;
        options.encryption_key = encryption_key.map(String::from);

        let result = archiver
            .create_archive(
                &sources,
                &FetchRequest::default(),
                &dir.path().join("backup-1.archive"),
                &options,
            )
            .await
            .unwrap();

        BackupInfo {
            id: "backup-1".into(),
            path: result.path.clone(),
            size: std::fs::metadata(&result.path).unwrap().len(),
        }
    }

    fn all_kinds_registry(sink: Arc<dyn DataSink>) -> Arc<SinkRegistry> {
        let mut sinks = SinkRegistry::new();
        for kind in [
            EntryKind::Database,
            EntryKind::File,
            EntryKind::SearchIndex,
            EntryKind::Cache,
        ] {
            sinks.register(kind, sink.clone());
        }
        Arc::new(sinks)
    }

    #[tokio::test]
    async fn test_round_trip_preserves_entries_and_order() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        let sink = Arc::new(MemorySink::default());
        let restorer = Restorer::new(all_kinds_registry(sink.clone()));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        let report = restorer.restore_backup(&backup, &options).await.unwrap();

        assert!(report.success);
        assert_eq!(report.success_count, 5);
        assert_eq!(report.failure_count, 0);

        let received = sink.received.lock().unwrap();
        let originals = fixture_entries();
        assert_eq!(received.len(), originals.len());
        for (original, (meta, data)) in originals.iter().zip(received.iter()) {
            assert_eq!(meta.name, original.meta.name);
            assert_eq!(meta.path, original.meta.path);
            assert_eq!(meta.kind, original.meta.kind);
            assert_eq!(meta.size, original.meta.size);
            assert_eq!(data, &original.data);
        }
    }

    #[tokio::test]
    async fn test_selective_include_types() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        let sink = Arc::new(MemorySink::default());
        let restorer = Restorer::new(all_kinds_registry(sink.clone()));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        options.selective = Some(SelectiveFilter {
            include_types: vec![EntryKind::Database],
            ..Default::default()
        });
        let report = restorer.restore_backup(&backup, &options).await.unwrap();

        assert_eq!(report.success_count, 2);
        assert!(report
            .restored_entries
            .iter()
            .all(|e| e.kind == EntryKind::Database));
    }

    #[tokio::test]
    async fn test_selective_exclude_types() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        options.selective = Some(SelectiveFilter {
            exclude_types: vec![EntryKind::Database],
            ..Default::default()
        });
        let report = restorer.restore_backup(&backup, &options).await.unwrap();

        assert_eq!(report.success_count, 3);
        assert!(report
            .restored_entries
            .iter()
            .all(|e| e.kind != EntryKind::Database));
    }

    #[tokio::test]
    async fn test_selective_path_filters() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Zstd).await;

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        options.selective = Some(SelectiveFilter {
            include_paths: vec!["db/".into()],
            exclude_paths: vec!["db/notes".into()],
            ..Default::default()
        });
        let report = restorer.restore_backup(&backup, &options).await.unwrap();

        assert_eq!(report.success_count, 1);
        assert_eq!(report.restored_entries[0].name, "users");
    }

    #[tokio::test]
    async fn test_encrypted_restore_needs_key() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, Some("secret"), CompressionMethod::Gzip).await;

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));

        // No key at all.
        let options = RestoreOptions::new(dir.path().join("restore"));
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::Crypto(_))));

        // Wrong key.
        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.encryption_key = Some("wrong".into());
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::Crypto(_))));

        // Right key.
        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.encryption_key = Some("secret".into());
        options.validate = false;
        let report = restorer.restore_backup(&backup, &options).await.unwrap();
        assert!(report.success);
        assert_eq!(report.success_count, 5);
    }

    #[tokio::test]
    async fn test_corrupted_backup_detected() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::None).await;

        // Flip a byte in the middle of the container.
        let mut bytes = std::fs::read(&backup.path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&backup.path, &bytes).unwrap();

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));
        let options = RestoreOptions::new(dir.path().join("restore"));
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_declared_size_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let mut backup = author_archive(&dir, None, CompressionMethod::Gzip).await;
        backup.size += 1;

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));
        let options = RestoreOptions::new(dir.path().join("restore"));
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::Integrity(_))));
    }

    #[tokio::test]
    async fn test_missing_backup_file() {
        let dir = TempDir::new().unwrap();
        let backup = BackupInfo {
            id: "ghost".into(),
            path: dir.path().join("ghost.archive.gz"),
            size: 0,
        };

        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));
        let options = RestoreOptions::new(dir.path().join("restore"));
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_partial_restore_threshold() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        // 2 of 5 entries fail: 60% success rate, below the 90% bound.
        let flaky = Arc::new(FlakySink {
            deny: vec!["users".into(), "notes".into()],
        });
        let restorer = Restorer::new(all_kinds_registry(flaky.clone()));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::RestoreThreshold(_))));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        options.allow_partial_restore = true;
        let report = restorer.restore_backup(&backup, &options).await.unwrap();
        assert!(report.success);
        assert_eq!(report.failure_count, 2);
        assert_eq!(report.success_count, 3);
    }

    #[tokio::test]
    async fn test_continue_on_error_false_aborts() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        let flaky = Arc::new(FlakySink {
            deny: vec!["users".into()],
        });
        let restorer = Restorer::new(all_kinds_registry(flaky));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.validate = false;
        options.continue_on_error = false;
        let result = restorer.restore_backup(&backup, &options).await;
        assert!(matches!(result, Err(BackupError::Sink(_))));
    }

    #[tokio::test]
    async fn test_validation_checks_files_on_disk() {
        let dir = TempDir::new().unwrap();
        let backup = author_archive(&dir, None, CompressionMethod::Gzip).await;

        // MemorySink claims restored=true but writes nothing, so the on-disk
        // check demotes the file entry; 4/5 = 80% < 90%.
        let restorer = Restorer::new(all_kinds_registry(Arc::new(MemorySink::default())));

        let mut options = RestoreOptions::new(dir.path().join("restore"));
        options.allow_partial_restore = true;
        let report = restorer.restore_backup(&backup, &options).await.unwrap();

        assert_eq!(report.failure_count, 1);
        assert_eq!(report.failed_entries[0].kind, EntryKind::File);
    }
}
