//! Single-entry archive extraction.
//!
//! The definitions archive is a standard ZIP container. The payload is the
//! entry at index 0 of the central directory; any further entries are
//! ignored.

use super::engine::LazyHandle;
use crate::{DefsError, Result};
use std::io::{Cursor, Read, Write};
use std::sync::Arc;
use tracing::debug;

/// The archive codec, verified once before first use.
#[derive(Debug)]
pub struct ArchiveDecoder {
    max_entry_size: u64,
}

impl ArchiveDecoder {
    const SELF_TEST: &'static [u8] = b"defsync archive self-test";

    /// Entries larger than this once decompressed are rejected.
    pub const MAX_ENTRY_SIZE: u64 = 2 * 1024 * 1024 * 1024;

    /// Round-trip a small deflated archive to confirm the codec works.
    pub fn initialize() -> Result<Self> {
        let failed =
            |message: String| DefsError::Other(format!("Archive codec unavailable: {}", message));

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);
        writer
            .start_file("self-test", options)
            .map_err(|e| failed(e.to_string()))?;
        writer.write_all(Self::SELF_TEST)?;
        let sample = writer.finish().map_err(|e| failed(e.to_string()))?.into_inner();

        let decoder = Self {
            max_entry_size: Self::MAX_ENTRY_SIZE,
        };
        if decoder.first_entry(&sample)? != Self::SELF_TEST {
            return Err(failed("self-test round-trip mismatch".into()));
        }
        Ok(decoder)
    }

    /// Decompress and return the first entry of `bytes`.
    pub fn first_entry(&self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.is_empty() {
            return Err(DefsError::EmptyArchive);
        }

        let corrupt = |message: String| DefsError::CorruptArchive { message };

        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| corrupt(format!("Failed to read zip: {}", e)))?;
        if archive.len() == 0 {
            return Err(DefsError::EmptyArchive);
        }

        let mut entry = archive
            .by_index(0)
            .map_err(|e| corrupt(format!("Failed to read zip entry: {}", e)))?;
        let name = entry.name().to_string();
        if entry.size() > self.max_entry_size {
            return Err(corrupt(format!(
                "Entry {} declares {} bytes, above the {} byte limit",
                name,
                entry.size(),
                self.max_entry_size
            )));
        }

        // The declared size is not trusted; the read itself is bounded too
        let mut contents = Vec::with_capacity(entry.size().min(512 * 1024 * 1024) as usize);
        (&mut entry)
            .take(self.max_entry_size.saturating_add(1))
            .read_to_end(&mut contents)
            .map_err(|e| corrupt(format!("Failed to decompress {}: {}", name, e)))?;
        if contents.len() as u64 > self.max_entry_size {
            return Err(corrupt(format!(
                "Entry {} inflates past the {} byte limit",
                name, self.max_entry_size
            )));
        }

        debug!(
            "Extracted {} ({} bytes) from {}-byte archive",
            name,
            contents.len(),
            bytes.len()
        );
        Ok(contents)
    }
}

/// Extracts payloads through a lazily initialized [`ArchiveDecoder`].
#[derive(Clone)]
pub struct ArchiveExtractor {
    decoder: Arc<LazyHandle<ArchiveDecoder>>,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::with_handle(Arc::new(LazyHandle::new("archive decoder")))
    }
}

impl ArchiveExtractor {
    pub fn with_handle(decoder: Arc<LazyHandle<ArchiveDecoder>>) -> Self {
        Self { decoder }
    }

    /// The decoder, initializing it on first call.
    pub async fn decoder(&self) -> Result<Arc<ArchiveDecoder>> {
        self.decoder
            .get_or_init(|| async {
                tokio::task::spawn_blocking(ArchiveDecoder::initialize).await?
            })
            .await
    }

    pub fn handle(&self) -> &Arc<LazyHandle<ArchiveDecoder>> {
        &self.decoder
    }

    /// Return the first entry of a ZIP archive.
    ///
    /// Fails with [`DefsError::EmptyArchive`] when the archive has no entries
    /// and [`DefsError::CorruptArchive`] when it cannot be decoded.
    pub async fn extract_first_entry(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        let decoder = self.decoder().await?;
        tokio::task::spawn_blocking(move || decoder.first_entry(&bytes)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in entries {
            writer
                .start_file(*name, zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(body).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[tokio::test]
    async fn test_extracts_first_entry_only() {
        let extractor = ArchiveExtractor::default();
        let bytes = zip_of(&[("world.content", b"payload"), ("extra.txt", b"ignored")]);

        let payload = extractor.extract_first_entry(bytes).await.unwrap();
        assert_eq!(payload, b"payload");
        assert_eq!(extractor.handle().init_attempts(), 1);
    }

    #[tokio::test]
    async fn test_empty_archive() {
        let extractor = ArchiveExtractor::default();

        let err = extractor.extract_first_entry(zip_of(&[])).await.unwrap_err();
        assert!(matches!(err, DefsError::EmptyArchive));

        let err = extractor.extract_first_entry(Vec::new()).await.unwrap_err();
        assert!(matches!(err, DefsError::EmptyArchive));
    }

    #[tokio::test]
    async fn test_corrupt_archive() {
        let extractor = ArchiveExtractor::default();
        let err = extractor
            .extract_first_entry(b"definitely not a zip".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, DefsError::CorruptArchive { .. }));
    }

    #[test]
    fn test_entry_size_limit_ignores_declared_size() {
        let decoder = ArchiveDecoder { max_entry_size: 8 };
        let body = b"sixteen byte pay";

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let stored = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        writer.start_file("world.content", stored).unwrap();
        writer.write_all(body).unwrap();
        let mut bytes = writer.finish().unwrap().into_inner();

        // Declare a 4-byte uncompressed size in both headers
        bytes[22..26].copy_from_slice(&4u32.to_le_bytes());
        let central = bytes
            .windows(4)
            .position(|w| w == b"PK\x01\x02")
            .unwrap();
        bytes[central + 24..central + 28].copy_from_slice(&4u32.to_le_bytes());

        let err = decoder.first_entry(&bytes).unwrap_err();
        assert!(matches!(err, DefsError::CorruptArchive { .. }));

        let honest = zip_of(&[("world.content", body)]);
        let err = decoder.first_entry(&honest).unwrap_err();
        assert!(err.to_string().contains("limit"));
    }

    #[tokio::test]
    async fn test_decoder_initialized_once() {
        let extractor = ArchiveExtractor::default();
        let bytes = zip_of(&[("a", b"1")]);

        let (a, b) = tokio::join!(
            extractor.extract_first_entry(bytes.clone()),
            extractor.extract_first_entry(bytes)
        );
        assert_eq!(a.unwrap(), b"1");
        assert_eq!(b.unwrap(), b"1");
        assert_eq!(extractor.handle().init_attempts(), 1);
    }
}
