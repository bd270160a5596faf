//! Comic archive reading and page sampling.

mod rar;
mod zip_reader;

pub use rar::{ExtractTool, DEFAULT_EXTRACT_TIMEOUT};
pub use zip_reader::ZipArchiveReader;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use crate::core::SourceRef;
use crate::inference::ImagePayload;

/// Image extensions recognised as pages.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

/// Archive extensions the reader accepts.
pub const ARCHIVE_EXTENSIONS: &[&str] = &["cbz", "zip", "cbr"];

/// How many pages are sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SamplingPolicy {
    /// Upper bound on sampled pages.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    /// Video seconds one sampled page is expected to cover.
    #[serde(default = "default_seconds_per_page")]
    pub seconds_per_page: u32,
}

fn default_max_pages() -> usize {
    4
}

fn default_seconds_per_page() -> u32 {
    30
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            seconds_per_page: default_seconds_per_page(),
        }
    }
}

impl SamplingPolicy {
    /// Creates a policy with the given limit.
    #[must_use]
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            ..Self::default()
        }
    }

    /// Page indices to sample from an archive of `total` pages.
    #[must_use]
    pub fn indices(&self, total: usize) -> Vec<usize> {
        sample_indices(total, self.max_pages)
    }

    /// Sampled pages needed to cover a video of `target_secs`.
    #[must_use]
    pub fn required_pages(&self, target_secs: u32) -> usize {
        let per_page = self.seconds_per_page.max(1);
        usize::try_from(target_secs.div_ceil(per_page)).unwrap_or(usize::MAX)
    }
}

/// Picks `limit` indices spread evenly from the first to the last page.
///
/// Returns every index when `total <= limit`.
#[must_use]
pub fn sample_indices(total: usize, limit: usize) -> Vec<usize> {
    if total <= limit {
        return (0..total).collect();
    }
    match limit {
        0 => Vec::new(),
        1 => vec![0],
        _ => {
            let last = total - 1;
            let steps = limit - 1;
            let mut indices: Vec<usize> = (0..limit)
                .map(|i| (i * last + steps / 2) / steps)
                .collect();
            indices.dedup();
            indices
        }
    }
}

/// Returns the MIME type for an image file name, if it is a page.
#[must_use]
pub fn media_type_for(name: &str) -> Option<&'static str> {
    let ext = name.rsplit_once('.')?.1.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// True for entry names that are page images outside macOS metadata.
fn is_page_entry(name: &str) -> bool {
    !name.ends_with('/')
        && !name.split('/').any(|part| part == "__MACOSX" || part.starts_with("._"))
        && media_type_for(name).is_some()
}

/// Orders candidate entries lexically, samples them and loads the bytes of
/// each sampled page through `load`.
fn sample_pages(
    archive: &Path,
    mut names: Vec<String>,
    policy: SamplingPolicy,
    mut load: impl FnMut(&str) -> Result<Vec<u8>, ArchiveError>,
) -> Result<(usize, Vec<PageImage>), ArchiveError> {
    names.retain(|name| is_page_entry(name));
    names.sort();
    if names.is_empty() {
        return Err(ArchiveError::NoImages(archive.display().to_string()));
    }

    let total = names.len();
    let mut pages = Vec::new();
    for index in policy.indices(total) {
        let name = &names[index];
        let bytes = load(name.as_str())?;
        debug!(page = index, name = %name, bytes = bytes.len(), "read page");
        pages.push(PageImage {
            index,
            name: name.clone(),
            media_type: media_type_for(name).unwrap_or("image/jpeg").to_string(),
            bytes,
        });
    }
    Ok((total, pages))
}

/// One page image taken from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    /// Zero-based index among all pages.
    pub index: usize,
    /// Entry name inside the archive.
    pub name: String,
    /// MIME type.
    pub media_type: String,
    /// Raw bytes.
    pub bytes: Vec<u8>,
}

impl PageImage {
    /// Converts the page into an inference attachment.
    #[must_use]
    pub fn to_payload(&self) -> ImagePayload {
        ImagePayload::new(self.media_type.clone(), self.bytes.clone())
    }
}

/// Pages read from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveContents {
    /// The archive the pages came from.
    pub source: SourceRef,
    /// Pages in the archive.
    pub total_pages: usize,
    /// Sampled pages in page order.
    pub pages: Vec<PageImage>,
}

impl ArchiveContents {
    /// Number of sampled pages.
    #[must_use]
    pub fn sampled_pages(&self) -> usize {
        self.pages.len()
    }

    /// Stable identity of the sampled content, for input fingerprints.
    #[must_use]
    pub fn content_key(&self) -> String {
        let names: Vec<String> = self
            .pages
            .iter()
            .map(|p| format!("{}:{}:{}", p.index, p.name, p.bytes.len()))
            .collect();
        format!("{}|{}|{}", self.source, self.total_pages, names.join(","))
    }
}

/// Failures that make an archive unusable.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file does not exist.
    #[error("archive not found: {0}")]
    NotFound(String),

    /// The extension is not a supported archive type.
    #[error("unsupported archive format '{0}' (expected .cbz, .zip or .cbr)")]
    UnsupportedFormat(String),

    /// The archive could not be opened or read.
    #[error("corrupt archive {path}: {message}")]
    Corrupt {
        /// Archive path.
        path: String,
        /// Reader error.
        message: String,
    },

    /// The archive holds no page images.
    #[error("no images found in archive {0}")]
    NoImages(String),

    /// A RAR archive was found but no extraction tool could be started.
    #[error("no RAR extractor available for {path} (tried {tried})")]
    NoExtractor {
        /// Archive path.
        path: String,
        /// Programs that were tried.
        tried: String,
    },

    /// Filesystem failure.
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads page images from a comic archive.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveReader: Send + Sync {
    /// Reads the archive and returns the sampled pages.
    async fn read(
        &self,
        source: &SourceRef,
        policy: &SamplingPolicy,
    ) -> Result<ArchiveContents, ArchiveError>;
}
