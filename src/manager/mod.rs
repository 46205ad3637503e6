//! Backup orchestrator.
//!
//! Owns the backup record lifecycle: decides the backup type, drives the
//! archive codec, places finished artifacts in their location directory,
//! tracks statistics, and enforces retention by sweeping old backups into the
//! archived location. Restores are delegated to the restore codec after the
//! record is located. Construct one manager per configuration and share it
//! behind an `Arc`; there are no process-wide singletons.

pub mod jobs;

use crate::archive::compression::CompressionMethod;
use crate::archive::{sidecar_path_for, ArchiveOptions, Archiver};
use crate::config::EngineConfig;
use crate::error::{BackupError, Result};
use crate::models::backup_record::{
    ArchiveManifest, BackupKind, BackupLocation, BackupRecord, CompressionInfo, EncryptionInfo,
};
use crate::restore::{BackupInfo, RestoreOptions, RestoreReport, Restorer};
use crate::sources::{FetchRequest, SelectiveCriteria, SourceDescriptor};
use chrono::{DateTime, Duration, Utc};
use jobs::{JobInfo, JobKind, JobStatus, JobTable};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Options for one `create_backup` invocation. Everything is optional;
/// unset fields fall back to the engine configuration.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Explicit backup type; otherwise resolved from criteria/config.
    pub kind: Option<BackupKind>,
    /// Restrict to this subset of the configured source names.
    pub sources: Option<Vec<String>>,
    pub criteria: Option<SelectiveCriteria>,
    pub compression_method: Option<CompressionMethod>,
    pub compression_level: Option<i32>,
    pub encryption_key: Option<String>,
    pub continue_on_error: Option<bool>,
    /// Set by the scheduler trigger.
    pub automated: bool,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct BackupRunResult {
    pub success: bool,
    pub backup_id: String,
    pub kind: BackupKind,
    /// Final artifact path; `None` when no file was written.
    pub path: Option<PathBuf>,
    pub size: u64,
    pub entry_count: usize,
    pub sources_included: Vec<String>,
    pub warnings: Vec<String>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

impl BackupRunResult {
    fn failed(backup_id: String, kind: BackupKind, error: String, duration_ms: u64) -> Self {
        Self {
            success: false,
            backup_id,
            kind,
            path: None,
            size: 0,
            entry_count: 0,
            sources_included: Vec::new(),
            warnings: Vec::new(),
            message: None,
            error: Some(error),
            duration_ms,
        }
    }
}

/// Running counters, owned by the manager.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackupStats {
    pub total_backups: u64,
    pub successful_backups: u64,
    pub failed_backups: u64,
    pub total_bytes: u64,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub total_restores: u64,
    pub successful_restores: u64,
    pub failed_restores: u64,
}

/// Filters and ordering for `list_backups`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListFilter {
    pub kind: Option<BackupKind>,
    pub location: Option<BackupLocation>,
    pub sort_by: SortField,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortField {
    #[default]
    CreatedAt,
    Size,
    Kind,
}

/// Per-item outcome of an archival sweep.
#[derive(Debug, Serialize)]
pub struct SweepReport {
    pub cutoff: DateTime<Utc>,
    pub archived: Vec<String>,
    pub failed: Vec<SweepFailure>,
}

#[derive(Debug, Serialize)]
pub struct SweepFailure {
    pub id: String,
    pub error: String,
}

pub struct BackupManager {
    config: EngineConfig,
    archiver: Archiver,
    restorer: Restorer,
    sources: BTreeMap<String, SourceDescriptor>,
    jobs: JobTable,
    stats: Mutex<BackupStats>,
    job_semaphore: Semaphore,
}

impl BackupManager {
    /// Creates the manager and its location directories.
    pub fn new(
        config: EngineConfig,
        archiver: Archiver,
        restorer: Restorer,
        sources: BTreeMap<String, SourceDescriptor>,
    ) -> Result<Self> {
        for dir in [
            config.full_dir(),
            config.incremental_dir(),
            config.archived_dir(),
            config.temp_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        let permits = config.max_concurrent_jobs.max(1);
        Ok(Self {
            config,
            archiver,
            restorer,
            sources,
            jobs: JobTable::new(),
            stats: Mutex::new(BackupStats::default()),
            job_semaphore: Semaphore::new(permits),
        })
    }

    pub fn stats(&self) -> BackupStats {
        self.stats.lock().unwrap().clone()
    }

    pub fn active_jobs(&self) -> Vec<JobInfo> {
        self.jobs.active()
    }

    /// Create a backup. Errors are folded into a `{success: false, error}`
    /// result; statistics are updated either way.
    pub async fn create_backup(&self, options: BackupOptions) -> BackupRunResult {
        let backup_id = Uuid::new_v4().to_string();
        let start = Instant::now();
        let kind = self.resolve_kind(&options);

        self.jobs.register(&backup_id, JobKind::Backup);
        if self.jobs.running_count() > 0 {
            // Overlapping backups of the same sources are not mutually
            // excluded; callers needing that must serialize externally.
            warn!(backup_id = %backup_id, "Another job is already in flight");
        }

        let _permit = match self.job_semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => {
                self.jobs.finish(&backup_id, JobStatus::Failed);
                return BackupRunResult::failed(
                    backup_id,
                    kind,
                    "job semaphore closed".into(),
                    start.elapsed().as_millis() as u64,
                );
            }
        };
        self.jobs.mark_running(&backup_id);
        info!(backup_id = %backup_id, kind = %kind, automated = options.automated, "Starting backup");

        let outcome = self.run_backup(&backup_id, kind, &options).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut result) => {
                result.duration_ms = duration_ms;
                {
                    let mut stats = self.stats.lock().unwrap();
                    stats.total_backups += 1;
                    stats.successful_backups += 1;
                    stats.total_bytes += result.size;
                    stats.last_backup_at = Some(Utc::now());
                }
                self.jobs.finish(&backup_id, JobStatus::Completed);
                info!(backup_id = %backup_id, size = result.size, "Backup completed");
                result
            }
            Err(e) => {
                {
                    let mut stats = self.stats.lock().unwrap();
                    stats.total_backups += 1;
                    stats.failed_backups += 1;
                }
                self.jobs.finish(&backup_id, JobStatus::Failed);
                error!(backup_id = %backup_id, error = %e, "Backup failed");
                BackupRunResult::failed(backup_id, kind, e.to_string(), duration_ms)
            }
        }
    }

    fn resolve_kind(&self, options: &BackupOptions) -> BackupKind {
        if let Some(kind) = options.kind {
            return kind;
        }
        if options.criteria.is_some() {
            return BackupKind::Selective;
        }
        if self.config.incremental_enabled {
            return BackupKind::Incremental;
        }
        BackupKind::Full
    }

    async fn run_backup(
        &self,
        backup_id: &str,
        kind: BackupKind,
        options: &BackupOptions,
    ) -> Result<BackupRunResult> {
        let sources = self.select_sources(kind, options)?;
        let continue_on_error = options.continue_on_error.unwrap_or(true);

        let since = match kind {
            BackupKind::Incremental => self.last_backup_timestamp().await,
            _ => None,
        };
        let request = FetchRequest {
            since,
            criteria: options.criteria.clone(),
        };

        let collected = self
            .archiver
            .collect_entries(&sources, &request, continue_on_error)
            .await?;

        if kind == BackupKind::Incremental && collected.entries.is_empty() {
            info!(backup_id = %backup_id, "No changes since last backup, skipping archive");
            return Ok(BackupRunResult {
                success: true,
                backup_id: backup_id.to_string(),
                kind,
                path: None,
                size: 0,
                entry_count: 0,
                sources_included: collected.sources,
                warnings: collected.warnings,
                message: Some("No changes detected since last backup".into()),
                error: None,
                duration_ms: 0,
            });
        }

        let mut archive_options = ArchiveOptions::new(backup_id, kind);
        archive_options.compression_method = options
            .compression_method
            .unwrap_or(self.config.compression_method);
        archive_options.compression_level =
            options.compression_level.or(self.config.compression_level);
        archive_options.encryption_key = options.encryption_key.clone().or_else(|| {
            if self.config.encryption_enabled {
                self.config.encryption_key.clone()
            } else {
                None
            }
        });
        archive_options.continue_on_error = continue_on_error;
        archive_options.metadata = options.metadata.clone();

        // Assemble in temp/ and move into place once finished, so listings
        // never see a partially written file.
        let temp_base = self.config.temp_dir().join(format!("backup-{backup_id}.archive"));
        let result = self
            .archiver
            .write_archive(collected, &temp_base, &archive_options)
            .await?;

        if !tokio::fs::try_exists(&result.path).await? {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("archive file {} missing after write", result.path.display()),
            )));
        }
        let size = tokio::fs::metadata(&result.path).await?.len();

        let mut warnings = result.warnings.clone();
        if size > self.config.max_backup_size {
            let msg = format!(
                "backup size {size} exceeds configured maximum {}",
                self.config.max_backup_size
            );
            warn!(backup_id = %backup_id, "{msg}");
            warnings.push(msg);
        }

        let target_dir = match kind {
            BackupKind::Incremental => self.config.incremental_dir(),
            _ => self.config.full_dir(),
        };
        let file_name = result
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        let final_path = target_dir.join(&file_name);
        tokio::fs::rename(&result.path, &final_path).await?;
        let temp_sidecar = sidecar_path_for(&result.path);
        let final_sidecar = sidecar_path_for(&final_path);
        tokio::fs::rename(&temp_sidecar, &final_sidecar).await?;

        Ok(BackupRunResult {
            success: true,
            backup_id: backup_id.to_string(),
            kind,
            path: Some(final_path),
            size,
            entry_count: result.entry_count,
            sources_included: result.sources,
            warnings,
            message: None,
            error: None,
            duration_ms: 0,
        })
    }

    /// Resolve the configured sources participating in this backup.
    fn select_sources(
        &self,
        kind: BackupKind,
        options: &BackupOptions,
    ) -> Result<BTreeMap<String, SourceDescriptor>> {
        let mut selected = self.sources.clone();

        if let Some(names) = &options.sources {
            for name in names {
                if !self.sources.contains_key(name) {
                    return Err(BackupError::Validation(format!(
                        "unknown data source: {name}"
                    )));
                }
            }
            selected.retain(|name, _| names.contains(name));
        }

        if kind == BackupKind::Selective {
            if let Some(SelectiveCriteria {
                sources: Some(names),
                ..
            }) = &options.criteria
            {
                selected.retain(|name, _| names.contains(name));
            }
        }

        if selected.is_empty() {
            return Err(BackupError::Validation("no data sources given".into()));
        }
        Ok(selected)
    }

    async fn last_backup_timestamp(&self) -> Option<DateTime<Utc>> {
        if let Some(at) = self.stats.lock().unwrap().last_backup_at {
            return Some(at);
        }
        // Fall back to the newest record on disk (fresh manager instance).
        self.list_backups(ListFilter::default())
            .await
            .ok()?
            .first()
            .map(|r| r.created_at)
    }

    /// Restore a backup by id, looking across all locations. Errors are
    /// folded into a failed report; restore statistics update either way.
    pub async fn restore_backup(&self, backup_id: &str, options: RestoreOptions) -> RestoreReport {
        let job_id = Uuid::new_v4().to_string();
        self.jobs.register(&job_id, JobKind::Restore);

        let _permit = match self.job_semaphore.acquire().await {
            Ok(p) => p,
            Err(_) => {
                self.jobs.finish(&job_id, JobStatus::Failed);
                return failed_report(&job_id, backup_id, "job semaphore closed".into());
            }
        };
        self.jobs.mark_running(&job_id);

        let outcome = async {
            let record = self
                .find_record(backup_id)
                .await?
                .ok_or_else(|| BackupError::NotFound(backup_id.to_string()))?;
            let info = BackupInfo {
                id: record.id.clone(),
                path: record.path.clone(),
                size: record.size,
            };
            self.restorer.restore_backup(&info, &options).await
        }
        .await;

        let report = match outcome {
            Ok(report) => {
                self.jobs.finish(&job_id, JobStatus::Completed);
                report
            }
            Err(e) => {
                error!(backup_id = %backup_id, error = %e, "Restore failed");
                self.jobs.finish(&job_id, JobStatus::Failed);
                failed_report(&job_id, backup_id, e.to_string())
            }
        };

        {
            let mut stats = self.stats.lock().unwrap();
            stats.total_restores += 1;
            if report.success {
                stats.successful_restores += 1;
            } else {
                stats.failed_restores += 1;
            }
        }
        report
    }

    /// Locate a record by id across the full, incremental and archived
    /// locations.
    pub async fn find_record(&self, backup_id: &str) -> Result<Option<BackupRecord>> {
        let records = self.list_backups(ListFilter::default()).await?;
        Ok(records.into_iter().find(|r| r.id == backup_id))
    }

    /// Scan the location directories and return records, newest first by
    /// default.
    pub async fn list_backups(&self, filter: ListFilter) -> Result<Vec<BackupRecord>> {
        let locations = [
            (BackupLocation::Full, self.config.full_dir()),
            (BackupLocation::Incremental, self.config.incremental_dir()),
            (BackupLocation::Archived, self.config.archived_dir()),
        ];

        let mut records = Vec::new();
        for (location, dir) in locations {
            if let Some(wanted) = filter.location {
                if wanted != location {
                    continue;
                }
            }
            if !dir.is_dir() {
                continue;
            }

            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(item) = entries.next_entry().await? {
                let path = item.path();
                let name = item.file_name().to_string_lossy().to_string();
                if name.ends_with(".meta.json") || !item.file_type().await?.is_file() {
                    continue;
                }
                match self.record_from_file(location, &path).await {
                    Ok(record) => records.push(record),
                    Err(e) => warn!("Skipping unreadable backup {}: {}", path.display(), e),
                }
            }
        }

        if let Some(kind) = filter.kind {
            records.retain(|r| r.kind == kind);
        }

        match filter.sort_by {
            SortField::CreatedAt => records.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortField::Size => records.sort_by(|a, b| b.size.cmp(&a.size)),
            SortField::Kind => records.sort_by(|a, b| {
                a.kind
                    .to_string()
                    .cmp(&b.kind.to_string())
                    .then_with(|| b.created_at.cmp(&a.created_at))
            }),
        }
        Ok(records)
    }

    async fn record_from_file(
        &self,
        location: BackupLocation,
        path: &Path,
    ) -> Result<BackupRecord> {
        let metadata = tokio::fs::metadata(path).await?;
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let encrypted = file_name.ends_with(".enc");

        let sidecar = sidecar_path_for(path);
        let manifest: Option<ArchiveManifest> = match tokio::fs::read(&sidecar).await {
            Ok(bytes) => serde_json::from_slice(&bytes).ok(),
            Err(_) => None,
        };

        let (id, kind, created_at, sources, ratio, method, level) = match manifest {
            Some(m) => (
                m.backup_id,
                m.backup_kind,
                m.created_at,
                m.sources,
                m.compression_ratio,
                m.compression_method,
                m.compression_level,
            ),
            None => {
                // No sidecar: reconstruct what the filename and fs metadata
                // give us.
                let id = id_from_file_name(file_name).ok_or_else(|| {
                    BackupError::Validation(format!("unrecognized backup file name: {file_name}"))
                })?;
                let kind = match location {
                    BackupLocation::Incremental => BackupKind::Incremental,
                    _ => BackupKind::Full,
                };
                let created_at = metadata
                    .modified()
                    .map(DateTime::<Utc>::from)
                    .unwrap_or_else(|_| Utc::now());
                let method = CompressionMethod::from_path(path).as_str().to_string();
                (id, kind, created_at, Vec::new(), 1.0, method, None)
            }
        };

        Ok(BackupRecord {
            id,
            kind,
            location,
            path: path.to_path_buf(),
            size: metadata.len(),
            created_at,
            sources_included: sources,
            compression: CompressionInfo {
                method,
                level,
                ratio,
            },
            encryption: EncryptionInfo {
                enabled: encrypted,
                algorithm: encrypted.then(|| crate::archive::crypto::ALGORITHM.to_string()),
            },
        })
    }

    /// Remove a backup file and its sidecar. Returns false when no record
    /// matches the id.
    pub async fn delete_backup(&self, backup_id: &str) -> Result<bool> {
        let Some(record) = self.find_record(backup_id).await? else {
            return Ok(false);
        };

        tokio::fs::remove_file(&record.path).await?;
        let _ = tokio::fs::remove_file(sidecar_path_for(&record.path)).await;
        info!(backup_id = %backup_id, "Deleted backup {}", record.path.display());
        Ok(true)
    }

    /// Move every backup older than the retention cutoff into `archived/`.
    /// Individual failures are reported per item and never abort the sweep.
    pub async fn archive_old_backups(&self) -> Result<SweepReport> {
        let cutoff = Utc::now() - Duration::days(self.config.retention_days);
        let archived_dir = self.config.archived_dir();
        let mut report = SweepReport {
            cutoff,
            archived: Vec::new(),
            failed: Vec::new(),
        };

        for dir in [self.config.full_dir(), self.config.incremental_dir()] {
            if !dir.is_dir() {
                continue;
            }
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(item) = entries.next_entry().await? {
                let path = item.path();
                let name = item.file_name().to_string_lossy().to_string();
                if name.ends_with(".meta.json") || !item.file_type().await?.is_file() {
                    continue;
                }

                let modified = match item.metadata().await.and_then(|m| m.modified()) {
                    Ok(t) => DateTime::<Utc>::from(t),
                    Err(e) => {
                        report.failed.push(SweepFailure {
                            id: name.clone(),
                            error: format!("failed to stat: {e}"),
                        });
                        continue;
                    }
                };
                if modified >= cutoff {
                    continue;
                }

                let id = id_from_file_name(&name).unwrap_or_else(|| name.clone());
                let dest = archived_dir.join(&name);
                match tokio::fs::rename(&path, &dest).await {
                    Ok(()) => {
                        // Sidecar follows its backup file when present.
                        let sidecar = sidecar_path_for(&path);
                        if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                            let _ = tokio::fs::rename(&sidecar, sidecar_path_for(&dest)).await;
                        }
                        info!(backup_id = %id, "Archived old backup {}", name);
                        report.archived.push(id);
                    }
                    Err(e) => {
                        warn!(backup_id = %id, error = %e, "Failed to archive backup");
                        report.failed.push(SweepFailure {
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        info!(
            archived = report.archived.len(),
            failed = report.failed.len(),
            "Archival sweep finished"
        );
        Ok(report)
    }
}

fn failed_report(restore_id: &str, backup_id: &str, error: String) -> RestoreReport {
    RestoreReport {
        success: false,
        restore_id: restore_id.to_string(),
        backup_id: backup_id.to_string(),
        restored_entries: Vec::new(),
        failed_entries: Vec::new(),
        total_size: 0,
        success_count: 0,
        failure_count: 0,
        duration_ms: 0,
        error: Some(error),
    }
}

/// `backup-<uuid>.archive.gz.enc` -> `<uuid>`.
fn id_from_file_name(name: &str) -> Option<String> {
    let rest = name.strip_prefix("backup-")?;
    let id = rest.split('.').next()?;
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}
