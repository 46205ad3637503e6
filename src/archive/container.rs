//! Length-prefixed binary container codec.
//!
//! Wire layout, all lengths big-endian u32:
//!
//! ```text
//! [u32 headerLen][header JSON]
//! repeat per entry:
//!   [u32 metaLen][entry meta JSON][u32 dataLen][raw payload bytes]
//! ```
//!
//! The writer streams frames into any `AsyncWrite` (normally a compression
//! encoder), so the full container is never assembled in memory. The reader
//! operates on a fully decoded buffer and hands out zero-copy payload slices.

use crate::error::{BackupError, Result};
use crate::models::entry::{ArchiveEntry, ContainerHeader, EntryMeta};
use bytes::{Buf, Bytes};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Streams container frames into an `AsyncWrite`.
pub struct ContainerWriter<W> {
    inner: W,
    entries_written: u32,
    /// Uncompressed container bytes emitted so far.
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> ContainerWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            entries_written: 0,
            bytes_written: 0,
        }
    }

    pub async fn write_header(&mut self, header: &ContainerHeader) -> Result<()> {
        let frame = serde_json::to_vec(header)?;
        self.write_frame(&frame).await
    }

    pub async fn write_entry(&mut self, entry: &ArchiveEntry) -> Result<()> {
        if entry.meta.size != entry.data.len() as u64 {
            return Err(BackupError::Integrity(format!(
                "entry '{}' declares {} bytes but payload is {}",
                entry.meta.name,
                entry.meta.size,
                entry.data.len()
            )));
        }
        let meta_frame = serde_json::to_vec(&entry.meta)?;
        self.write_frame(&meta_frame).await?;
        self.write_frame(&entry.data).await?;
        self.entries_written += 1;
        Ok(())
    }

    /// Flushes and finishes the underlying writer. For compression encoders
    /// this also writes the codec trailer.
    pub async fn finish(mut self) -> Result<(u32, u64)> {
        self.inner.shutdown().await?;
        Ok((self.entries_written, self.bytes_written))
    }

    async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len()).map_err(|_| {
            BackupError::Validation(format!("frame of {} bytes exceeds u32 length", payload.len()))
        })?;
        self.inner.write_u32(len).await?;
        self.inner.write_all(payload).await?;
        self.bytes_written += 4 + payload.len() as u64;
        Ok(())
    }
}

/// Parses a fully decoded container buffer entry by entry.
pub struct ContainerReader {
    buf: Bytes,
    header: ContainerHeader,
    entries_read: u32,
}

impl ContainerReader {
    pub fn new(mut buf: Bytes) -> Result<Self> {
        let frame = take_frame(&mut buf, "header")?;
        let header: ContainerHeader = serde_json::from_slice(&frame)?;
        Ok(Self {
            buf,
            header,
            entries_read: 0,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    /// Next entry as (meta, zero-copy payload slice). Returns `Ok(None)` once
    /// `header.entry_count` entries have been read and the buffer is empty.
    pub fn next_entry(&mut self) -> Result<Option<(EntryMeta, Bytes)>> {
        if self.entries_read == self.header.entry_count {
            if self.buf.has_remaining() {
                return Err(BackupError::Integrity(format!(
                    "container has {} trailing bytes after {} entries",
                    self.buf.remaining(),
                    self.entries_read
                )));
            }
            return Ok(None);
        }

        if !self.buf.has_remaining() {
            return Err(BackupError::Integrity(format!(
                "container truncated: header declares {} entries, found {}",
                self.header.entry_count, self.entries_read
            )));
        }

        let meta_frame = take_frame(&mut self.buf, "entry metadata")?;
        let meta: EntryMeta = serde_json::from_slice(&meta_frame)?;
        let data = take_frame(&mut self.buf, "entry payload")?;

        if meta.size != data.len() as u64 {
            return Err(BackupError::Integrity(format!(
                "entry '{}' declares {} bytes but payload frame is {}",
                meta.name,
                meta.size,
                data.len()
            )));
        }

        self.entries_read += 1;
        Ok(Some((meta, data)))
    }
}

fn take_frame(buf: &mut Bytes, what: &str) -> Result<Bytes> {
    if buf.remaining() < 4 {
        return Err(BackupError::Integrity(format!(
            "container truncated reading {what} length"
        )));
    }
    let len = buf.get_u32() as usize;
    if len > buf.remaining() {
        return Err(BackupError::Integrity(format!(
            "{what} frame length {len} exceeds remaining {} bytes",
            buf.remaining()
        )));
    }
    Ok(buf.split_to(len))
}
