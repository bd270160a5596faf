//! Pipeline runs and their per-stage outcomes.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use uuid::Uuid;

use super::artifact::StageArtifact;
use super::status::{ArtifactStatus, ErrorKind, RunStatus, StageName};
use crate::utils::{generate_uuid_v7, now_utc, Timestamp};

/// Default target video length in seconds.
pub const DEFAULT_TARGET_DURATION_SECS: u32 = 75;

/// Time-ordered identifier of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Generates a fresh run id.
    #[must_use]
    pub fn new() -> Self {
        Self(generate_uuid_v7())
    }

    /// The underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Identity of the source archive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceRef {
    /// Path of the archive file.
    pub path: PathBuf,
}

impl SourceRef {
    /// Creates a source reference.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the archive.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without directories, used in prompts and reports.
    #[must_use]
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map_or_else(|| self.path.display().to_string(), |n| n.to_string_lossy().into_owned())
    }

    /// Lowercased extension, if any.
    #[must_use]
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Summary of how a stage resolved within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The stage.
    pub stage: StageName,
    /// Artifact version used.
    pub version: u32,
    /// Artifact status.
    pub status: ArtifactStatus,
    /// Inference attempts spent.
    pub attempts: u32,
    /// Wall time spent.
    pub elapsed_ms: u64,
    /// True when an earlier attempt's artifact was reused.
    #[serde(default)]
    pub reused: bool,
    /// Degraded aspects, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_aspects: Vec<String>,
    /// Error kind for non-ok artifacts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StageOutcome {
    /// Summarizes an artifact.
    #[must_use]
    pub fn from_artifact(artifact: &StageArtifact, reused: bool) -> Self {
        Self {
            stage: artifact.stage,
            version: artifact.version,
            status: artifact.status,
            attempts: artifact.attempts,
            elapsed_ms: artifact.elapsed_ms,
            reused,
            degraded_aspects: artifact.degraded_aspects().to_vec(),
            error_kind: artifact.error_kind(),
        }
    }
}

/// Why a run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    /// First failing stage; absent when the run failed before any stage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable explanation.
    pub message: String,
}

impl RunFailure {
    /// Creates a failure record.
    #[must_use]
    pub fn new(stage: Option<StageName>, kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage {
            Some(stage) => write!(f, "stage '{stage}' failed with {}: {}", self.kind, self.message),
            None => write!(f, "run failed with {}: {}", self.kind, self.message),
        }
    }
}

/// One end-to-end execution against one archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier.
    pub run_id: RunId,
    /// Source archive.
    pub source: SourceRef,
    /// Target video length in seconds.
    pub target_duration_secs: u32,
    /// When the run was created.
    pub created_at: Timestamp,
    /// When the run last reached a terminal status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    /// Current status.
    pub status: RunStatus,
    /// Outcomes of resolved stages in stage order.
    #[serde(default)]
    pub stages: Vec<StageOutcome>,
    /// Failure record for failed runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    /// Content key of the pages last sampled from the archive.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages_key: Option<String>,
}

impl PipelineRun {
    /// Creates a pending run with a fresh id.
    #[must_use]
    pub fn new(source: SourceRef, target_duration_secs: u32) -> Self {
        Self {
            run_id: RunId::new(),
            source,
            target_duration_secs,
            created_at: now_utc(),
            finished_at: None,
            status: RunStatus::Pending,
            stages: Vec::new(),
            failure: None,
            pages_key: None,
        }
    }

    /// Outcome recorded for a stage.
    #[must_use]
    pub fn outcome(&self, stage: StageName) -> Option<&StageOutcome> {
        self.stages.iter().find(|o| o.stage == stage)
    }

    /// Records a stage outcome, replacing any earlier one for that stage.
    pub fn record(&mut self, outcome: StageOutcome) {
        self.stages.retain(|o| o.stage != outcome.stage);
        self.stages.push(outcome);
        self.stages.sort_by_key(|o| o.stage.index());
    }

    /// Drops outcomes of stages after `stage`; they consumed an input that
    /// has just been replaced.
    pub fn discard_after(&mut self, stage: StageName) {
        self.stages.retain(|o| o.stage.index() <= stage.index());
    }

    /// Clears failure state ahead of a new drive.
    pub fn reopen(&mut self) {
        self.status = RunStatus::Running;
        self.failure = None;
        self.finished_at = None;
    }

    /// Marks the run failed.
    pub fn fail(&mut self, failure: RunFailure) {
        self.failure = Some(failure);
        self.status = RunStatus::Failed;
        self.finished_at = Some(now_utc());
    }

    /// Recomputes the status from the recorded outcomes.
    ///
    /// A run with a failure record is `failed`. Otherwise it is `succeeded`
    /// or `partial` once every stage has a usable outcome, and `running`
    /// while some stage is still unresolved.
    pub fn settle(&mut self) -> RunStatus {
        if let Some(failed) = self
            .stages
            .iter()
            .find(|o| o.status == ArtifactStatus::Failed)
        {
            if self.failure.is_none() {
                self.failure = Some(RunFailure::new(
                    Some(failed.stage),
                    failed.error_kind.unwrap_or(ErrorKind::TransientUpstream),
                    "stage resolved failed",
                ));
            }
        }
        self.status = if self.failure.is_some() {
            RunStatus::Failed
        } else if StageName::ALL.iter().all(|s| self.outcome(*s).is_some()) {
            if self.stages.iter().all(|o| o.status == ArtifactStatus::Ok) {
                RunStatus::Succeeded
            } else {
                RunStatus::Partial
            }
        } else {
            RunStatus::Running
        };
        if self.status.is_terminal() {
            self.finished_at = Some(now_utc());
        }
        self.status
    }

    /// First stage without a usable outcome.
    #[must_use]
    pub fn next_stage(&self) -> Option<StageName> {
        StageName::ALL.into_iter().find(|s| {
            self.outcome(*s)
                .map_or(true, |o| !o.status.is_usable())
        })
    }

    /// Degraded aspects across stages, prefixed with the stage name.
    #[must_use]
    pub fn degraded_aspects(&self) -> Vec<String> {
        self.stages
            .iter()
            .flat_map(|o| {
                o.degraded_aspects
                    .iter()
                    .map(move |a| format!("{}: {a}", o.stage))
            })
            .collect()
    }

    /// Total wall time across recorded stages.
    #[must_use]
    pub fn total_elapsed_ms(&self) -> u64 {
        self.stages.iter().map(|o| o.elapsed_ms).sum()
    }
}
