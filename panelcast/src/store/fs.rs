//! Filesystem artifact store.
//!
//! Layout under the root directory:
//!
//! ```text
//! <root>/<run-id>/run.json
//! <root>/<run-id>/report.md
//! <root>/<run-id>/artifacts/<stage>-v<NNNN>.json
//! ```

use async_trait::async_trait;
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use super::{sort_artifacts, ArtifactStore, StoreError};
use crate::core::{PipelineRun, RunId, StageArtifact, StageName};
use crate::utils::generate_uuid_v7;

/// Stores each run in its own directory.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    root: PathBuf,
}

impl FileArtifactStore {
    /// Creates a store rooted at `root`; directories are created lazily.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one run.
    #[must_use]
    pub fn run_dir(&self, run_id: RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn artifacts_dir(&self, run_id: RunId) -> PathBuf {
        self.run_dir(run_id).join("artifacts")
    }

    /// File path of an artifact.
    #[must_use]
    pub fn artifact_path(&self, run_id: RunId, stage: StageName, version: u32) -> PathBuf {
        self.artifacts_dir(run_id)
            .join(format!("{}-v{version:04}.json", stage.as_str()))
    }

    async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Hidden sibling of `path` that `list` never picks up.
    fn staging_path(path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("entry");
        path.with_file_name(format!(".{name}.{}.tmp", generate_uuid_v7()))
    }

    /// Writes a fresh file and flushes it to disk.
    async fn write_synced(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        Ok(())
    }

    /// Writes through a staging file and renames it into place.
    async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let staging = Self::staging_path(path);
        let result = match Self::write_synced(&staging, contents).await {
            Ok(()) => fs::rename(&staging, path).await.map_err(StoreError::from),
            Err(e) => Err(e),
        };
        if result.is_err() {
            let _ = fs::remove_file(&staging).await;
        }
        result
    }
}

#[async_trait]
impl ArtifactStore for FileArtifactStore {
    async fn put(&self, artifact: &StageArtifact) -> Result<(), StoreError> {
        let dir = self.artifacts_dir(artifact.run_id);
        fs::create_dir_all(&dir).await?;
        let path = self.artifact_path(artifact.run_id, artifact.stage, artifact.version);
        let json = serde_json::to_vec_pretty(artifact)?;

        // The final name only ever appears with complete contents.
        let staging = Self::staging_path(&path);
        let linked = match Self::write_synced(&staging, &json).await {
            Ok(()) => match fs::hard_link(&staging, &path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => {
                    Err(StoreError::VersionConflict(artifact.key()))
                }
                Err(e) => Err(e.into()),
            },
            Err(e) => Err(e),
        };
        if let Err(e) = fs::remove_file(&staging).await {
            if e.kind() != IoErrorKind::NotFound {
                warn!(path = %staging.display(), error = %e, "staging file left behind");
            }
        }
        linked?;
        debug!(path = %path.display(), "artifact written");
        Ok(())
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<StageArtifact>, StoreError> {
        let dir = self.artifacts_dir(run_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = fs::read_to_string(&path).await?;
            let artifact: StageArtifact =
                serde_json::from_str(&text).map_err(|e| StoreError::Corrupt {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
            if artifact.run_id != run_id {
                return Err(StoreError::Corrupt {
                    path: path.display().to_string(),
                    message: format!("artifact belongs to run {}", artifact.run_id),
                });
            }
            artifacts.push(artifact);
        }
        sort_artifacts(&mut artifacts);
        Ok(artifacts)
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(run)?;
        Self::write_atomic(&self.run_dir(run.run_id).join("run.json"), &json).await
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>, StoreError> {
        let path = self.run_dir(run_id).join("run.json");
        match Self::read_optional(&path).await? {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn save_report(&self, run_id: RunId, report: &str) -> Result<(), StoreError> {
        Self::write_atomic(&self.run_dir(run_id).join("report.md"), report.as_bytes()).await
    }

    async fn load_report(&self, run_id: RunId) -> Result<Option<String>, StoreError> {
        Self::read_optional(&self.run_dir(run_id).join("report.md")).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ErrorKind, SourceRef};
    use crate::testing::fixtures;
    use tempfile::TempDir;

    fn leftovers(dir: &Path) -> Vec<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.ends_with(".tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_layout_and_conflict() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let run_id = RunId::new();
        let artifact = fixtures::extract_artifact(run_id);

        store.put(&artifact).await.unwrap();
        let path = store.artifact_path(run_id, StageName::Extract, 1);
        assert!(path.ends_with("artifacts/extract-v0001.json"));
        assert!(path.exists());

        let err = store.put(&artifact).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(_)));
        assert_eq!(leftovers(path.parent().unwrap()), Vec::<String>::new());
        assert_eq!(store.list(run_id).await.unwrap(), vec![artifact]);
    }

    #[tokio::test]
    async fn test_interrupted_write_leaves_run_readable() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let run_id = RunId::new();
        let extract = fixtures::extract_artifact(run_id);
        store.put(&extract).await.unwrap();

        // A write cut short before it was linked into place.
        let review_path = store.artifact_path(run_id, StageName::Review, 1);
        let staging = FileArtifactStore::staging_path(&review_path);
        std::fs::write(&staging, b"{\"run_id\": ").unwrap();

        assert_eq!(store.list(run_id).await.unwrap(), vec![extract.clone()]);
        assert_eq!(store.latest_version(run_id, StageName::Review).await.unwrap(), 0);
        assert!(!review_path.exists());

        let review = StageArtifact::failed(run_id, StageName::Review, ErrorKind::TransientUpstream, "slow");
        store.put(&review).await.unwrap();
        assert_eq!(store.get(run_id, StageName::Review).await.unwrap(), Some(review));
    }

    #[tokio::test]
    async fn test_list_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let run_id = RunId::new();
        let extract = fixtures::extract_artifact(run_id);
        let failed = StageArtifact::failed(run_id, StageName::Review, ErrorKind::MalformedResponse, "bad");

        store.put(&failed).await.unwrap();
        store.put(&extract).await.unwrap();

        let listed = store.list(run_id).await.unwrap();
        assert_eq!(listed, vec![extract.clone(), failed.clone()]);
        assert_eq!(store.get(run_id, StageName::Review).await.unwrap(), Some(failed));
        assert!(store.list(RunId::new()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_record_is_replaced_atomically() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let mut run = PipelineRun::new(SourceRef::new("/c/issue.cbz"), 60);
        store.save_run(&run).await.unwrap();

        run.reopen();
        store.save_run(&run).await.unwrap();
        assert_eq!(store.load_run(run.run_id).await.unwrap(), Some(run.clone()));
        assert_eq!(leftovers(&store.run_dir(run.run_id)), Vec::<String>::new());

        store.save_report(run.run_id, "done").await.unwrap();
        assert_eq!(store.load_report(run.run_id).await.unwrap().as_deref(), Some("done"));
        assert!(store.load_run(RunId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_artifact_is_reported() {
        let dir = TempDir::new().unwrap();
        let store = FileArtifactStore::new(dir.path());
        let run_id = RunId::new();
        let path = store.artifact_path(run_id, StageName::Extract, 1);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{not json").unwrap();

        assert!(matches!(
            store.list(run_id).await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
