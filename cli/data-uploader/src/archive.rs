//! In-memory gzip'd tarballs of resource directories.

use std::path::Path;

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Builder;

/// Pack `dir` into a gzip'd tar whose entries all live under `prefix/`.
pub fn pack_directory(dir: &Path, prefix: &str) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    builder
        .append_dir_all(prefix, dir)
        .with_context(|| format!("Failed to archive {}", dir.display()))?;

    let encoder = builder.into_inner().context("Failed to finish tar stream")?;
    encoder.finish().context("Failed to finish gzip stream")
}
