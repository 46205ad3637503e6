pub mod backup_record;
pub mod entry;

pub use backup_record::{
    ArchiveManifest, BackupKind, BackupLocation, BackupRecord, CompressionInfo, EncryptionInfo,
    ManifestEntry,
};
pub use entry::{ArchiveEntry, ContainerHeader, EntryKind, EntryMeta};
