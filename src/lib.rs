//! Backup Engine Library
//!
//! Point-in-time snapshots of operational data packaged into self-describing
//! binary containers, with streaming compression, authenticated encryption,
//! selective restore, and a retention/archival lifecycle.

pub mod archive;
pub mod config;
pub mod error;
pub mod manager;
pub mod models;
pub mod restore;
pub mod scheduler;
pub mod sources;

// Re-export commonly used types
pub use archive::compression::CompressionMethod;
pub use archive::{ArchiveOptions, ArchiveResult, Archiver};
pub use config::EngineConfig;
pub use error::BackupError;
pub use manager::{BackupManager, BackupOptions, BackupRunResult, ListFilter, SortField};
pub use models::{ArchiveEntry, BackupKind, BackupLocation, BackupRecord, EntryKind};
pub use restore::{BackupInfo, RestoreOptions, RestoreReport, Restorer, SelectiveFilter};
pub use scheduler::BackupScheduler;
pub use sources::{
    DataSink, DataSourceProvider, FetchRequest, FsSink, FsSourceProvider, SelectiveCriteria,
    SinkRegistry, SourceDescriptor, SourceRegistry,
};

pub type Result<T> = std::result::Result<T, BackupError>;
