//! Engine configuration loaded from the environment.

use crate::archive::compression::CompressionMethod;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory holding the `full/`, `incremental/`, `archived/` and
    /// `temp/` backup locations.
    pub backup_root: PathBuf,
    pub retention_days: i64,
    pub compression_method: CompressionMethod,
    pub compression_level: Option<i32>,
    pub encryption_enabled: bool,
    pub encryption_key: Option<String>,
    /// Soft cap: exceeding it only produces a warning after the fact.
    pub max_backup_size: u64,
    pub max_concurrent_jobs: usize,
    pub incremental_enabled: bool,
    pub cron_expression: Option<String>,
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        Self {
            backup_root: PathBuf::from(
                std::env::var("BACKUP_ROOT").unwrap_or_else(|_| "/backup/data/backups".into()),
            ),
            retention_days: std::env::var("RETENTION_DAYS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            compression_method: std::env::var("COMPRESSION_METHOD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(CompressionMethod::Gzip),
            compression_level: std::env::var("COMPRESSION_LEVEL")
                .ok()
                .and_then(|v| v.parse().ok()),
            encryption_enabled: std::env::var("ENCRYPTION_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
            encryption_key: std::env::var("ENCRYPTION_KEY").ok(),
            max_backup_size: std::env::var("MAX_BACKUP_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10 * 1024 * 1024 * 1024),
            max_concurrent_jobs: std::env::var("MAX_CONCURRENT_JOBS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4),
            incremental_enabled: std::env::var("INCREMENTAL_ENABLED")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(true),
            cron_expression: std::env::var("BACKUP_CRON").ok(),
        }
    }

    pub fn full_dir(&self) -> PathBuf {
        self.backup_root.join("full")
    }

    pub fn incremental_dir(&self) -> PathBuf {
        self.backup_root.join("incremental")
    }

    pub fn archived_dir(&self) -> PathBuf {
        self.backup_root.join("archived")
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.backup_root.join("temp")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_dirs() {
        let config = EngineConfig {
            backup_root: PathBuf::from("/backups"),
            retention_days: 30,
            compression_method: CompressionMethod::Gzip,
            compression_level: None,
            encryption_enabled: false,
            encryption_key: None,
            max_backup_size: 1024,
            max_concurrent_jobs: 4,
            incremental_enabled: true,
            cron_expression: None,
        };

        assert_eq!(config.full_dir(), PathBuf::from("/backups/full"));
        assert_eq!(config.incremental_dir(), PathBuf::from("/backups/incremental"));
        assert_eq!(config.archived_dir(), PathBuf::from("/backups/archived"));
        assert_eq!(config.temp_dir(), PathBuf::from("/backups/temp"));
    }
}
