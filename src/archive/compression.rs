//! Streaming compression codecs for archive containers.

use crate::error::{BackupError, Result};
use async_compression::tokio::bufread::{DeflateDecoder, GzipDecoder, ZstdDecoder};
use async_compression::tokio::write::{DeflateEncoder, GzipEncoder, ZstdEncoder};
use async_compression::Level;
use std::path::Path;
use std::str::FromStr;
use tokio::io::{AsyncReadExt, AsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Gzip,
    Deflate,
    Zstd,
    None,
}

impl CompressionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompressionMethod::Gzip => "gzip",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Zstd => "zstd",
            CompressionMethod::None => "none",
        }
    }

    /// Filename extension appended to the container file, if any.
    pub fn extension(&self) -> Option<&'static str> {
        match self {
            CompressionMethod::Gzip => Some("gz"),
            CompressionMethod::Deflate => Some("zz"),
            CompressionMethod::Zstd => Some("zst"),
            CompressionMethod::None => None,
        }
    }

    /// Detect the method from a backup file name (with any `.enc` suffix
    /// already stripped by the caller).
    pub fn from_file_name(name: &str) -> CompressionMethod {
        if name.ends_with(".gz") {
            CompressionMethod::Gzip
        } else if name.ends_with(".zz") {
            CompressionMethod::Deflate
        } else if name.ends_with(".zst") {
            CompressionMethod::Zstd
        } else {
            CompressionMethod::None
        }
    }

    pub fn from_path(path: &Path) -> CompressionMethod {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let name = name.strip_suffix(".enc").unwrap_or(name);
        Self::from_file_name(name)
    }
}

impl FromStr for CompressionMethod {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gzip" => Ok(CompressionMethod::Gzip),
            "deflate" => Ok(CompressionMethod::Deflate),
            "zstd" => Ok(CompressionMethod::Zstd),
            "none" => Ok(CompressionMethod::None),
            other => Err(BackupError::Config(format!(
                "unsupported compression method: {other}"
            ))),
        }
    }
}

fn level(level: Option<i32>) -> Level {
    match level {
        Some(l) => Level::Precise(l),
        None => Level::Default,
    }
}

/// Wrap a writer in the configured compression encoder. The returned writer
/// must be shut down to flush the codec trailer.
pub fn wrap_writer<'a, W>(
    method: CompressionMethod,
    compression_level: Option<i32>,
    writer: W,
) -> Box<dyn AsyncWrite + Send + Unpin + 'a>
where
    W: AsyncWrite + Send + Unpin + 'a,
{
    match method {
        CompressionMethod::Gzip => {
            Box::new(GzipEncoder::with_quality(writer, level(compression_level)))
        }
        CompressionMethod::Deflate => {
            Box::new(DeflateEncoder::with_quality(writer, level(compression_level)))
        }
        CompressionMethod::Zstd => {
            Box::new(ZstdEncoder::with_quality(writer, level(compression_level)))
        }
        CompressionMethod::None => Box::new(writer),
    }
}

/// Decompress a fully buffered payload with the matching decoder.
pub async fn decompress(method: CompressionMethod, input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    match method {
        CompressionMethod::Gzip => {
            GzipDecoder::new(input).read_to_end(&mut out).await?;
        }
        CompressionMethod::Deflate => {
            DeflateDecoder::new(input).read_to_end(&mut out).await?;
        }
        CompressionMethod::Zstd => {
            ZstdDecoder::new(input).read_to_end(&mut out).await?;
        }
        CompressionMethod::None => {
            out.extend_from_slice(input);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn compress(method: CompressionMethod, input: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut encoder = wrap_writer(method, None, &mut out);
        encoder.write_all(input).await.unwrap();
        encoder.shutdown().await.unwrap();
        drop(encoder);
        out
    }

    #[tokio::test]
    async fn test_round_trip_all_methods() {
        let input: Vec<u8> = b"the quick brown fox ".repeat(100);
        for method in [
            CompressionMethod::Gzip,
            CompressionMethod::Deflate,
            CompressionMethod::Zstd,
            CompressionMethod::None,
        ] {
            let compressed = compress(method, &input).await;
            let restored = decompress(method, &compressed).await.unwrap();
            assert_eq!(restored, input, "round trip failed for {method:?}");
        }
    }

    #[tokio::test]
    async fn test_compressible_input_shrinks() {
        let input: Vec<u8> = b"aaaaaaaabbbbbbbb".repeat(512);
        for method in [
            CompressionMethod::Gzip,
            CompressionMethod::Deflate,
            CompressionMethod::Zstd,
        ] {
            let compressed = compress(method, &input).await;
            assert!(
                compressed.len() <= input.len(),
                "{method:?} grew: {} > {}",
                compressed.len(),
                input.len()
            );
        }
    }

    #[test]
    fn test_parse_method() {
        assert_eq!("gzip".parse::<CompressionMethod>().unwrap(), CompressionMethod::Gzip);
        assert_eq!("NONE".parse::<CompressionMethod>().unwrap(), CompressionMethod::None);
        assert!(matches!(
            "lz4".parse::<CompressionMethod>(),
            Err(BackupError::Config(_))
        ));
    }

    #[test]
    fn test_detect_from_path() {
        let p = Path::new("/b/full/backup-1.archive.gz.enc");
        assert_eq!(CompressionMethod::from_path(p), CompressionMethod::Gzip);

        let p = Path::new("/b/full/backup-1.archive.zst");
        assert_eq!(CompressionMethod::from_path(p), CompressionMethod::Zstd);

        let p = Path::new("/b/full/backup-1.archive");
        assert_eq!(CompressionMethod::from_path(p), CompressionMethod::None);

        let p = Path::new("/b/full/backup-1.archive.zz");
        assert_eq!(CompressionMethod::from_path(p), CompressionMethod::Deflate);
    }
}
