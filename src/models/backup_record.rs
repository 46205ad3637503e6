//! Backup record and sidecar manifest types.
//!
//! Records are not kept in a database: the on-disk layout plus the sidecar
//! `<file>.meta.json` written next to every archive is the source of truth,
//! and listings reconstruct records by scanning the location directories.

use crate::models::entry::EntryKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
    Selective,
}

impl std::fmt::Display for BackupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Selective => "selective",
        };
        write!(f, "{s}")
    }
}

/// Which location directory a backup file currently lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupLocation {
    Full,
    Incremental,
    Archived,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub method: String,
    pub level: Option<i32>,
    /// compressed size / original size, in (0, 1] for compressible input.
    pub ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub enabled: bool,
    pub algorithm: Option<String>,
}

/// One tracked backup. Immutable once written, except that an archival sweep
/// may move the underlying file (changing `location` and `path`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    pub location: BackupLocation,
    pub path: PathBuf,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub sources_included: Vec<String>,
    pub compression: CompressionInfo,
    pub encryption: EncryptionInfo,
}

/// Entry summary stored in the sidecar manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub size: u64,
}

/// Sidecar manifest — serialized as `<archive-file>.meta.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    pub version: u32,
    pub backup_id: String,
    pub backup_kind: BackupKind,
    pub created_at: DateTime<Utc>,
    pub entry_count: usize,
    pub entries: Vec<ManifestEntry>,
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub compression_method: String,
    pub compression_level: Option<i32>,
    pub encrypted: bool,
    /// SHA-256 of the final backup file, hex-encoded.
    pub checksum: String,
    pub sources: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&BackupKind::Incremental).unwrap(), "\"incremental\"");
        let kind: BackupKind = serde_json::from_str("\"selective\"").unwrap();
        assert_eq!(kind, BackupKind::Selective);
    }

    #[test]
    fn test_manifest_round_trip() {
        let manifest = ArchiveManifest {
            version: 1,
            backup_id: "abc".into(),
            backup_kind: BackupKind::Full,
            created_at: Utc::now(),
            entry_count: 1,
            entries: vec![ManifestEntry {
                name: "users".into(),
                path: "db/users".into(),
                kind: EntryKind::Database,
                size: 128,
            }],
            original_size: 128,
            compressed_size: 64,
            compression_ratio: 0.5,
            compression_method: "gzip".into(),
            compression_level: Some(6),
            encrypted: false,
            checksum: "00".into(),
            sources: vec!["users".into()],
            metadata: serde_json::Value::Null,
        };

        let json = serde_json::to_string(&manifest).unwrap();
        let parsed: ArchiveManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.entry_count, 1);
        assert_eq!(parsed.entries[0].kind, EntryKind::Database);
        assert!(json.contains("compressionRatio"));
    }
}
