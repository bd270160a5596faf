//! Filesystem archive reader: zip containers (`.cbz`, `.zip`, zip-packed
//! `.cbr`) are read in place, other `.cbr` files go through an external
//! extraction tool.

use async_trait::async_trait;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::info;
use zip::ZipArchive;

use super::rar::{self, ExtractTool, DEFAULT_EXTRACT_TIMEOUT};
use super::{sample_pages, ArchiveContents, ArchiveError, ArchiveReader, SamplingPolicy, ARCHIVE_EXTENSIONS};
use crate::core::SourceRef;

const ZIP_MAGIC: &[u8; 2] = b"PK";

/// Reads comic pages from archives on the local filesystem.
#[derive(Debug, Clone)]
pub struct ZipArchiveReader {
    extractors: Vec<ExtractTool>,
    extract_timeout: Duration,
}

impl Default for ZipArchiveReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipArchiveReader {
    /// Creates a reader using the standard RAR extractors.
    #[must_use]
    pub fn new() -> Self {
        Self {
            extractors: ExtractTool::defaults(),
            extract_timeout: DEFAULT_EXTRACT_TIMEOUT,
        }
    }

    /// Replaces the extractors tried, in order, for non-zip `.cbr` files.
    #[must_use]
    pub fn with_extractors(mut self, extractors: Vec<ExtractTool>) -> Self {
        self.extractors = extractors;
        self
    }

    /// Sets how long one extractor may run.
    #[must_use]
    pub fn with_extract_timeout(mut self, timeout: Duration) -> Self {
        self.extract_timeout = timeout;
        self
    }
}

fn corrupt(path: &Path, err: impl std::fmt::Display) -> ArchiveError {
    ArchiveError::Corrupt {
        path: path.display().to_string(),
        message: err.to_string(),
    }
}

/// True for a `.cbr` whose leading bytes are not a zip header.
async fn is_rar_packed(source: &SourceRef) -> bool {
    if source.extension().as_deref() != Some("cbr") {
        return false;
    }
    let Ok(mut file) = tokio::fs::File::open(source.path()).await else {
        return false;
    };
    let mut magic = [0u8; 2];
    file.read_exact(&mut magic).await.is_ok() && &magic != ZIP_MAGIC
}

/// Blocking read, run on the blocking pool.
fn read_blocking(
    source: &SourceRef,
    policy: SamplingPolicy,
) -> Result<ArchiveContents, ArchiveError> {
    let path = source.path();
    if !path.exists() {
        return Err(ArchiveError::NotFound(path.display().to_string()));
    }
    let ext = source.extension().unwrap_or_default();
    if !ARCHIVE_EXTENSIONS.contains(&ext.as_str()) {
        return Err(ArchiveError::UnsupportedFormat(ext));
    }

    let file = File::open(path)?;
    let mut archive = ZipArchive::new(file).map_err(|e| corrupt(path, e))?;
    let names: Vec<String> = archive.file_names().map(str::to_string).collect();

    let (total_pages, pages) = sample_pages(path, names, policy, |name| {
        let mut entry = archive.by_name(name).map_err(|e| corrupt(path, e))?;
        let mut bytes = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
        entry.read_to_end(&mut bytes).map_err(|e| corrupt(path, e))?;
        Ok(bytes)
    })?;

    info!(
        archive = %source.display_name(),
        total_pages,
        sampled_pages = pages.len(),
        "archive read"
    );

    Ok(ArchiveContents {
        source: source.clone(),
        total_pages,
        pages,
    })
}

#[async_trait]
impl ArchiveReader for ZipArchiveReader {
    async fn read(
        &self,
        source: &SourceRef,
        policy: &SamplingPolicy,
    ) -> Result<ArchiveContents, ArchiveError> {
        if is_rar_packed(source).await {
            return rar::read_extracted(source, *policy, &self.extractors, self.extract_timeout).await;
        }
        let source = source.clone();
        let policy = *policy;
        tokio::task::spawn_blocking(move || read_blocking(&source, policy))
            .await
            .map_err(|e| ArchiveError::Io(std::io::Error::other(e.to_string())))?
    }
}
