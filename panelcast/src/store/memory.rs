//! In-memory artifact store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};

use super::{sort_artifacts, ArtifactStore, StoreError};
use crate::core::{ArtifactKey, PipelineRun, RunId, StageArtifact};

#[derive(Debug, Default)]
struct State {
    artifacts: BTreeMap<ArtifactKey, StageArtifact>,
    runs: HashMap<RunId, PipelineRun>,
    reports: HashMap<RunId, String>,
}

/// Keeps everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    state: Mutex<State>,
}

impl InMemoryArtifactStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total artifacts across all runs.
    #[must_use]
    pub fn artifact_count(&self) -> usize {
        self.state.lock().artifacts.len()
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifactStore {
    async fn put(&self, artifact: &StageArtifact) -> Result<(), StoreError> {
        let key = artifact.key();
        let mut state = self.state.lock();
        if state.artifacts.contains_key(&key) {
            return Err(StoreError::VersionConflict(key));
        }
        state.artifacts.insert(key, artifact.clone());
        Ok(())
    }

    async fn list(&self, run_id: RunId) -> Result<Vec<StageArtifact>, StoreError> {
        let mut artifacts: Vec<StageArtifact> = self
            .state
            .lock()
            .artifacts
            .values()
            .filter(|a| a.run_id == run_id)
            .cloned()
            .collect();
        sort_artifacts(&mut artifacts);
        Ok(artifacts)
    }

    async fn save_run(&self, run: &PipelineRun) -> Result<(), StoreError> {
        self.state.lock().runs.insert(run.run_id, run.clone());
        Ok(())
    }

    async fn load_run(&self, run_id: RunId) -> Result<Option<PipelineRun>, StoreError> {
        Ok(self.state.lock().runs.get(&run_id).cloned())
    }

    async fn save_report(&self, run_id: RunId, report: &str) -> Result<(), StoreError> {
        self.state.lock().reports.insert(run_id, report.to_string());
        Ok(())
    }

    async fn load_report(&self, run_id: RunId) -> Result<Option<String>, StoreError> {
        Ok(self.state.lock().reports.get(&run_id).cloned())
    }
}
