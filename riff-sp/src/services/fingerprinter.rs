//! Content fingerprinting for the stem cache
//!
//! SHA-256 over the upload's bytes, read in 1 MiB chunks so memory use stays
//! bounded for arbitrarily large files, truncated to 16 hex characters.

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use riff_common::{Error, Result};

use crate::models::Fingerprint;

/// Read size for each digest update
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Content fingerprinter
#[derive(Debug, Clone)]
pub struct Fingerprinter {
    chunk_size: usize,
}

impl Fingerprinter {
    pub fn new() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Override the read size (tests exercise chunk-boundary behavior)
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Fingerprint any byte stream
    ///
    /// Pure function of content; fails only if the reader does.
    pub fn fingerprint_reader<R: Read>(&self, mut reader: R) -> std::io::Result<Fingerprint> {
        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; self.chunk_size];

        loop {
            let bytes_read = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            hasher.update(&buffer[..bytes_read]);
        }

        let hash_hex = format!("{:x}", hasher.finalize());
        Fingerprint::from_digest_hex(&hash_hex)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
    }

    /// Fingerprint a file without blocking the async runtime
    ///
    /// Hashing runs on the blocking pool; the caller only suspends.
    pub async fn fingerprint_file(&self, file_path: &Path) -> Result<Fingerprint> {
        let path_buf = file_path.to_path_buf();
        tracing::debug!(path = %path_buf.display(), "Calculating content fingerprint");

        let this = self.clone();
        let file_path_clone = path_buf.clone();
        let fingerprint = tokio::task::spawn_blocking(move || -> Result<Fingerprint> {
            let file = std::fs::File::open(&file_path_clone).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to open file for hashing: {}", e),
                ))
            })?;

            this.fingerprint_reader(file).map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to read file for hashing: {}", e),
                ))
            })
        })
        .await
        .map_err(|e| Error::Internal(format!("Fingerprint task failed: {}", e)))??;

        tracing::debug!(
            path = %path_buf.display(),
            fingerprint = %fingerprint,
            "Calculated fingerprint"
        );

        Ok(fingerprint)
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}
