//! Append-only persistence for stage artifacts and run records.
//!
//! Artifacts are immutable: a second `put` for the same
//! (run, stage, version) key is rejected. Run records and reports are
//! mutable state and may be overwritten.

mod fs;
mod memory;

pub use fs::FileArtifactStore;
pub use memory::InMemoryArtifactStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::{ArtifactKey, ArtifactStatus, PipelineRun, RunId, StageArtifact, StageName};

/// Failures reported by an artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An artifact already exists under the key.
    #[error("version conflict: artifact {0} already exists")]
    VersionConflict(ArtifactKey),

    /// Filesystem failure.
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A record could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored record is unreadable or inconsistent.
    #[error("corrupt store entry {path}: {message}")]
    Corrupt {
        /// Offending entry.
        path: String,
        /// What is wrong.
        message: String,
    },
}

/// Persists artifacts, run records and reports.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores a new artifact; fails if the key is taken.
    async fn put(&self, artifact: &StageArtifact) -> Result<(), StoreError>;

    /// Every artifact of a run, in stage order then version order.
    async fn list(&self, run_id: RunId) -> Result<Vec<StageArtifact>, StoreError>;

    /// The current artifact for a stage.
    ///
    /// Prefers the highest-version usable artifact, then the highest-version
    /// failed one.
    async fn get(
        &self,
        run_id: RunId,
        stage: StageName,
    ) -> Result<Option<StageArtifact>, StoreError> {
        let artifacts = self.list(run_id).await?;
        Ok(select_current(
            artifacts.into_iter().filter(|a| a.stage == stage),
        ))
    }

    /// Highest stored version for a stage, 0 when none.
    async fn latest_version(&self, run_id: RunId, stage: StageName) -> Result<u32, StoreError> {
        let artifacts = self.list(run_id).await?;
        Ok(artifacts
            .iter()
            .filter(|a| a.stage == stage)
            .map(|a| a.version)
            .max()
            .unwrap_or(0))
    }

    /// Writes or replaces the run record.
    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError>;

    /// Reads a run record.
    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>, StoreError>;

    /// Writes or replaces the human-readable report.
    async fn save_report(&self, run_id: RunId, report: &str) -> Result<(), StoreError>;

    /// Reads the human-readable report.
    async fn load_report(&self, run_id: RunId) -> Result<Option<String>, StoreError>;
}

/// Picks the current artifact among candidates for one stage.
pub fn select_current(candidates: impl IntoIterator<Item = StageArtifact>) -> Option<StageArtifact> {
    let mut best_usable: Option<StageArtifact> = None;
    let mut best_failed: Option<StageArtifact> = None;
    for artifact in candidates {
        let slot = if artifact.status == ArtifactStatus::Failed {
            &mut best_failed
        } else {
            &mut best_usable
        };
        if slot.as_ref().map_or(true, |b| artifact.version > b.version) {
            *slot = Some(artifact);
        }
    }
    best_usable.or(best_failed)
}

/// Orders artifacts by stage, then version.
pub(crate) fn sort_artifacts(artifacts: &mut [StageArtifact]) {
    artifacts.sort_by_key(|a| (a.stage.index(), a.version));
}
