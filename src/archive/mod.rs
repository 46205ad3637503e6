//! Archive codec: collects entries from data source providers and encodes
//! them into a compressed, optionally encrypted container file.

pub mod compression;
pub mod container;
pub mod crypto;

use crate::error::{BackupError, Result};
use crate::models::backup_record::{ArchiveManifest, BackupKind, ManifestEntry};
use crate::models::entry::{ArchiveEntry, ContainerHeader, CONTAINER_VERSION};
use crate::sources::{FetchRequest, SourceDescriptor, SourceRegistry};
use chrono::Utc;
use compression::CompressionMethod;
use container::ContainerWriter;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, BufWriter};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    pub backup_id: String,
    pub backup_kind: BackupKind,
    pub compression_method: CompressionMethod,
    pub compression_level: Option<i32>,
    pub encryption_key: Option<String>,
    /// Skip failing sources with a warning instead of aborting.
    pub continue_on_error: bool,
    /// Caller metadata copied into the sidecar manifest.
    pub metadata: serde_json::Value,
}

impl ArchiveOptions {
    pub fn new(backup_id: impl Into<String>, backup_kind: BackupKind) -> Self {
        Self {
            backup_id: backup_id.into(),
            backup_kind,
            compression_method: CompressionMethod::Gzip,
            compression_level: None,
            encryption_key: None,
            continue_on_error: true,
            metadata: serde_json::Value::Null,
        }
    }
}

#[derive(Debug)]
pub struct ArchiveResult {
    pub success: bool,
    /// Final on-disk path, including compression and `.enc` suffixes.
    pub path: PathBuf,
    pub entry_count: usize,
    /// Uncompressed container size in bytes.
    pub original_size: u64,
    pub compressed_size: u64,
    pub compression_ratio: f64,
    pub sources: Vec<String>,
    pub warnings: Vec<String>,
    pub manifest: ArchiveManifest,
    pub processing_time_ms: u64,
}

/// Entries gathered from providers before encoding.
#[derive(Debug, Default)]
pub struct CollectedEntries {
    pub entries: Vec<ArchiveEntry>,
    /// Names of sources that contributed at least a successful fetch.
    pub sources: Vec<String>,
    pub warnings: Vec<String>,
}

/// Stateless archive codec. Owns no persistent entities; providers are
/// injected at construction.
pub struct Archiver {
    providers: Arc<SourceRegistry>,
}

impl Archiver {
    pub fn new(providers: Arc<SourceRegistry>) -> Self {
        Self { providers }
    }

    /// Fetch entries for every named source, in name order. A source failure
    /// aborts unless `continue_on_error` is set, in which case it is recorded
    /// as a warning.
    pub async fn collect_entries(
        &self,
        sources: &BTreeMap<String, SourceDescriptor>,
        request: &FetchRequest,
        continue_on_error: bool,
    ) -> Result<CollectedEntries> {
        let mut collected = CollectedEntries::default();

        for (name, descriptor) in sources {
            let fetched = match self.providers.get(descriptor.kind) {
                Ok(provider) => provider.fetch(descriptor, request).await,
                Err(e) => Err(e),
            };

            match fetched {
                Ok(data) => {
                    info!(source = %name, entries = data.entries.len(), "Collected source");
                    collected.sources.push(name.clone());
                    collected.entries.extend(data.entries);
                }
                Err(e) if continue_on_error => {
                    warn!(source = %name, error = %e, "Skipping failed source");
                    collected.warnings.push(format!("source '{name}' failed: {e}"));
                }
                Err(e) => {
                    return Err(BackupError::Source(format!("source '{name}' failed: {e}")));
                }
            }
        }

        Ok(collected)
    }

    /// Collect from all sources and encode the result in one call.
    /// Orchestrators that need to inspect the collection first (incremental
    /// no-change detection) call the two halves themselves.
    pub async fn create_archive(
        &self,
        sources: &BTreeMap<String, SourceDescriptor>,
        request: &FetchRequest,
        output_path: &Path,
        options: &ArchiveOptions,
    ) -> Result<ArchiveResult> {
        if sources.is_empty() {
            return Err(BackupError::Validation("no data sources given".into()));
        }

        let collected = self
            .collect_entries(sources, request, options.continue_on_error)
            .await?;
        self.write_archive(collected, output_path, options).await
    }

    /// Encode already collected entries into the container file at
    /// `output_path` (compression/encryption suffixes are appended).
    pub async fn write_archive(
        &self,
        collected: CollectedEntries,
        output_path: &Path,
        options: &ArchiveOptions,
    ) -> Result<ArchiveResult> {
        let start = Instant::now();
        let created_at = Utc::now();

        let parent = output_path.parent().unwrap_or_else(|| Path::new("."));
        if !parent.is_dir() {
            return Err(BackupError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("output directory {} does not exist", parent.display()),
            )));
        }

        let CollectedEntries {
            entries,
            sources,
            warnings,
        } = collected;

        let compressed_path = match options.compression_method.extension() {
            Some(ext) => append_extension(output_path, ext),
            None => output_path.to_path_buf(),
        };

        // Stream header and entries through the compressor, one frame at a
        // time. Peak memory stays at one entry plus I/O buffers.
        let header = ContainerHeader {
            version: CONTAINER_VERSION,
            created_at,
            entry_count: entries.len() as u32,
            total_size: entries.iter().map(|e| e.meta.size).sum(),
        };

        let file = tokio::fs::File::create(&compressed_path).await?;
        let encoder = compression::wrap_writer(
            options.compression_method,
            options.compression_level,
            BufWriter::new(file),
        );
        let mut writer = ContainerWriter::new(encoder);
        writer.write_header(&header).await?;
        for entry in &entries {
            writer.write_entry(entry).await?;
        }
        let (entry_count, original_size) = writer.finish().await?;

        let compressed_size = tokio::fs::metadata(&compressed_path).await?.len();
        let compression_ratio = if original_size > 0 {
            compressed_size as f64 / original_size as f64
        } else {
            1.0
        };

        // Encrypt the compressed file in place: write `IV ‖ ciphertext ‖ tag`
        // to a `.enc` sibling and drop the plaintext intermediate.
        let (final_path, encrypted) = match &options.encryption_key {
            Some(key) => {
                let plain = tokio::fs::read(&compressed_path).await?;
                let sealed = crypto::encrypt(key, &plain)?;
                let enc_path = append_extension(&compressed_path, "enc");
                tokio::fs::write(&enc_path, &sealed).await?;
                tokio::fs::remove_file(&compressed_path).await?;
                (enc_path, true)
            }
            None => (compressed_path, false),
        };

        let checksum = checksum_file(&final_path).await?;

        let manifest = ArchiveManifest {
            version: CONTAINER_VERSION,
            backup_id: options.backup_id.clone(),
            backup_kind: options.backup_kind,
            created_at,
            entry_count: entries.len(),
            entries: entries
                .iter()
                .map(|e| ManifestEntry {
                    name: e.meta.name.clone(),
                    path: e.meta.path.clone(),
                    kind: e.meta.kind,
                    size: e.meta.size,
                })
                .collect(),
            original_size,
            compressed_size,
            compression_ratio,
            compression_method: options.compression_method.as_str().to_string(),
            compression_level: options.compression_level,
            encrypted,
            checksum,
            sources: sources.clone(),
            metadata: options.metadata.clone(),
        };

        let sidecar_path = sidecar_path_for(&final_path);
        tokio::fs::write(&sidecar_path, serde_json::to_vec_pretty(&manifest)?).await?;

        info!(
            backup_id = %options.backup_id,
            entries = entry_count,
            original = original_size,
            compressed = compressed_size,
            encrypted,
            "Archive written to {}",
            final_path.display()
        );

        Ok(ArchiveResult {
            success: true,
            path: final_path,
            entry_count: entry_count as usize,
            original_size,
            compressed_size,
            compression_ratio,
            sources,
            warnings,
            manifest,
            processing_time_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// `foo.archive` + `gz` -> `foo.archive.gz`.
pub(crate) fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".");
    name.push(ext);
    path.with_file_name(name)
}

/// Sidecar manifest path for a backup file.
pub(crate) fn sidecar_path_for(path: &Path) -> PathBuf {
    append_extension(path, "meta.json")
}

async fn checksum_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex_encode(&hasher.finalize()))
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
