//! Competitor reference corpus used by the review stage.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

use crate::utils::fingerprint;

/// Reference scripts included in a review prompt.
pub const PROMPT_SAMPLE_SIZE: usize = 10;

/// Description characters kept per reference.
pub const DESCRIPTION_LIMIT: usize = 200;

/// Transcript characters kept per reference.
pub const TRANSCRIPT_LIMIT: usize = 500;

/// One high-performing competitor video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceScript {
    /// Platform video id.
    #[serde(rename = "Video ID", default)]
    pub video_id: String,
    /// Video title.
    #[serde(rename = "Title", default)]
    pub title: String,
    /// Video description.
    #[serde(rename = "Description", default)]
    pub description: String,
    /// Spoken transcript.
    #[serde(rename = "Transcript", default)]
    pub transcript: String,
    /// Video URL.
    #[serde(rename = "URL", default)]
    pub url: String,
}

/// Failures reading a corpus file that exists.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// The CSV could not be parsed.
    #[error("invalid competitor CSV {path}: {message}")]
    Invalid {
        /// File path.
        path: String,
        /// Parser message.
        message: String,
    },
}

/// The loaded competitor dataset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceCorpus {
    scripts: Vec<ReferenceScript>,
}

fn truncate(text: &str, limit: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}

impl ReferenceCorpus {
    /// Creates a corpus from scripts.
    #[must_use]
    pub fn new(scripts: Vec<ReferenceScript>) -> Self {
        Self { scripts }
    }

    /// An empty corpus.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the corpus from a CSV file.
    ///
    /// A missing file yields an empty corpus with a warning, so the review
    /// stage can still run with engagement benchmarking skipped.
    pub fn load_csv(path: &Path) -> Result<Self, CorpusError> {
        if !path.exists() {
            warn!(path = %path.display(), "competitor CSV not found, continuing with an empty corpus");
            return Ok(Self::empty());
        }
        let invalid = |e: csv::Error| CorpusError::Invalid {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_path(path)
            .map_err(invalid)?;
        let mut scripts = Vec::new();
        for record in reader.deserialize::<ReferenceScript>() {
            let script = record.map_err(invalid)?;
            if script.title.trim().is_empty() && script.transcript.trim().is_empty() {
                continue;
            }
            scripts.push(script);
        }
        info!(path = %path.display(), references = scripts.len(), "competitor corpus loaded");
        Ok(Self { scripts })
    }

    /// All references.
    #[must_use]
    pub fn scripts(&self) -> &[ReferenceScript] {
        &self.scripts
    }

    /// Number of references.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Returns true if the corpus holds no references.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// The leading references used in prompts.
    #[must_use]
    pub fn sample(&self) -> &[ReferenceScript] {
        &self.scripts[..self.scripts.len().min(PROMPT_SAMPLE_SIZE)]
    }

    /// Prompt-ready text for the sampled references.
    #[must_use]
    pub fn prompt_excerpt(&self) -> String {
        if self.is_empty() {
            return "No reference scripts are available.".to_string();
        }
        self.sample()
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "Reference {}:\nTitle: {}\nDescription: {}\nTranscript: {}",
                    i + 1,
                    s.title.trim(),
                    truncate(&s.description, DESCRIPTION_LIMIT),
                    truncate(&s.transcript, TRANSCRIPT_LIMIT),
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Fingerprint of the sampled references.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let parts: Vec<String> = self
            .sample()
            .iter()
            .map(|s| format!("{}\u{1e}{}\u{1e}{}", s.video_id, s.title, s.transcript))
            .collect();
        let refs: Vec<&str> = parts.iter().map(String::as_str).collect();
        fingerprint(&refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const CSV: &str = "Video ID,Title,Description,Transcript,URL\n\
        abc,How Did Doom Take Over The World?,A summary,\"Doom, ruler of Latveria, ...\",https://y/abc\n\
        def,Why Storm Left The X-Men,Another,Storm walks away,https://y/def\n\
        ,,,,\n";

    fn write(dir: &TempDir, body: &str) -> std::path::PathBuf {
        let path = dir.path().join("competitors.csv");
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_load_csv() {
        let dir = TempDir::new().unwrap();
        let corpus = ReferenceCorpus::load_csv(&write(&dir, CSV)).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus.scripts()[0].video_id, "abc");
        assert_eq!(corpus.scripts()[0].transcript, "Doom, ruler of Latveria, ...");
        assert_eq!(corpus.scripts()[1].url, "https://y/def");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let corpus = ReferenceCorpus::load_csv(&dir.path().join("missing.csv")).unwrap();
        assert!(corpus.is_empty());
        assert_eq!(corpus.prompt_excerpt(), "No reference scripts are available.");
    }

    #[test]
    fn test_sample_and_truncation() {
        let scripts: Vec<ReferenceScript> = (0..15)
            .map(|i| ReferenceScript {
                video_id: i.to_string(),
                title: format!("Title {i}"),
                description: "d".repeat(300),
                transcript: "t".repeat(600),
                url: String::new(),
            })
            .collect();
        let corpus = ReferenceCorpus::new(scripts);
        assert_eq!(corpus.sample().len(), PROMPT_SAMPLE_SIZE);

        let excerpt = corpus.prompt_excerpt();
        assert!(excerpt.contains(&format!("{}...", "d".repeat(DESCRIPTION_LIMIT))));
        assert!(!excerpt.contains(&"d".repeat(DESCRIPTION_LIMIT + 1)));
        assert!(!excerpt.contains("Title 10"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = ReferenceCorpus::new(vec![ReferenceScript {
            video_id: "a".into(),
            title: "t".into(),
            description: String::new(),
            transcript: "x".into(),
            url: String::new(),
        }]);
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.scripts[0].transcript.push('y');
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), ReferenceCorpus::empty().fingerprint());
    }
}
