//! RAR `.cbr` support through external extraction tools.
//!
//! Each tool is tried in order against a fresh scratch directory. A tool
//! that is not installed is skipped; the first one that exits cleanly wins
//! and its output is walked for page images.

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::{sample_pages, ArchiveContents, ArchiveError, SamplingPolicy};
use crate::core::SourceRef;

/// How long one extractor may run before it is killed.
pub const DEFAULT_EXTRACT_TIMEOUT: Duration = Duration::from_secs(60);

const STDERR_EXCERPT_CHARS: usize = 300;

/// An external program that unpacks an archive into a directory.
///
/// Arguments may contain the placeholders `{archive}` and `{dest}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractTool {
    program: String,
    args: Vec<String>,
}

enum ToolError {
    Missing,
    Failed(String),
}

impl ExtractTool {
    /// Creates a tool invocation.
    #[must_use]
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// `unar`, then `unrar`, then `7z`.
    #[must_use]
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("unar", &["-q", "-f", "-o", "{dest}", "{archive}"]),
            Self::new("unrar", &["x", "-o+", "-inul", "{archive}", "{dest}/"]),
            Self::new("7z", &["x", "-y", "-o{dest}", "{archive}"]),
        ]
    }

    /// Program name.
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    async fn run(&self, archive: &Path, dest: &Path, limit: Duration) -> Result<(), ToolError> {
        let archive = archive.to_string_lossy();
        let dest = dest.to_string_lossy();
        let args = self
            .args
            .iter()
            .map(|a| a.replace("{archive}", &archive).replace("{dest}", &dest));

        let child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(ToolError::Missing),
            Err(e) => return Err(ToolError::Failed(e.to_string())),
        };

        match tokio::time::timeout(limit, child.wait_with_output()).await {
            Err(_) => Err(ToolError::Failed(format!(
                "timed out after {}s",
                limit.as_secs()
            ))),
            Ok(Err(e)) => Err(ToolError::Failed(e.to_string())),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let excerpt: String = stderr.trim().chars().take(STDERR_EXCERPT_CHARS).collect();
                Err(ToolError::Failed(format!("{}: {excerpt}", output.status)))
            }
        }
    }
}

/// Extracts a RAR archive with the first working tool and samples its pages.
pub(super) async fn read_extracted(
    source: &SourceRef,
    policy: SamplingPolicy,
    tools: &[ExtractTool],
    limit: Duration,
) -> Result<ArchiveContents, ArchiveError> {
    let scratch = TempDir::new()?;
    let mut failures = Vec::new();

    for (attempt, tool) in tools.iter().enumerate() {
        let dest = scratch.path().join(format!("attempt-{attempt}"));
        tokio::fs::create_dir_all(&dest).await?;
        match tool.run(source.path(), &dest, limit).await {
            Ok(()) => {
                debug!(tool = tool.program(), "archive extracted");
                let source = source.clone();
                return tokio::task::spawn_blocking(move || {
                    let contents = collect_pages(&source, &dest, policy);
                    drop(scratch);
                    contents
                })
                .await
                .map_err(|e| ArchiveError::Io(std::io::Error::other(e.to_string())))?;
            }
            Err(ToolError::Missing) => debug!(tool = tool.program(), "extractor not installed"),
            Err(ToolError::Failed(message)) => {
                warn!(tool = tool.program(), error = %message, "extractor failed");
                failures.push(format!("{}: {message}", tool.program()));
            }
        }
    }

    let path = source.path().display().to_string();
    if failures.is_empty() {
        let tried: Vec<&str> = tools.iter().map(ExtractTool::program).collect();
        Err(ArchiveError::NoExtractor {
            path,
            tried: tried.join(", "),
        })
    } else {
        Err(ArchiveError::Corrupt {
            path,
            message: failures.join("; "),
        })
    }
}

/// Walks an extraction directory and samples the page images found.
fn collect_pages(
    source: &SourceRef,
    root: &Path,
    policy: SamplingPolicy,
) -> Result<ArchiveContents, ArchiveError> {
    let files = walk(root)?;
    let names: Vec<String> = files
        .iter()
        .filter_map(|path| path.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/")
        })
        .collect();

    let (total_pages, pages) = sample_pages(source.path(), names, policy, |name| {
        Ok(std::fs::read(root.join(name))?)
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

fn walk(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let kind = entry.file_type()?;
            if kind.is_dir() {
                pending.push(entry.path());
            } else if kind.is_file() {
                files.push(entry.path());
            }
        }
    }
    Ok(files)
}
