//! Post-processing hooks for snapshot file content.
//!
//! Hooks transform file bytes on their way into a backup and invert the
//! transform on restore. Which hooks participate is decided per backup from
//! the snapshot configuration, and the applied chain is recorded on the
//! backup itself so restores replay it in reverse regardless of the
//! configuration at restore time.

use std::io::{Read, Write};

use anyhow::{Context, Result};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use super::SnapshotConfig;

/// A reversible transform over snapshot file bytes.
pub trait SnapshotHook: Send + Sync {
    /// Stable name recorded in `PhaseBackup::processed_by`.
    fn name(&self) -> &str;

    /// Whether this hook participates under the given configuration.
    fn enabled(&self, config: &SnapshotConfig) -> bool {
        let _ = config;
        true
    }

    /// Forward transform, applied at backup time.
    fn process(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Inverse transform, applied at restore time.
    fn restore(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Gzip compression, gated on `compression_enabled`.
pub struct GzipHook;

impl SnapshotHook for GzipHook {
    fn name(&self) -> &str {
        "gzip"
    }

    fn enabled(&self, config: &SnapshotConfig) -> bool {
        config.compression_enabled
    }

    fn process(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .context("Failed to compress snapshot content")?;
        encoder.finish().context("Failed to finish gzip stream")
    }

    fn restore(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(data);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .context("Failed to decompress snapshot content")?;
        Ok(out)
    }
}
