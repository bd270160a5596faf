//! Stage artifacts: the immutable, versioned output record of a stage.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::run::RunId;
use super::status::{ArtifactStatus, ErrorKind, StageName};
use crate::contracts::{contract_version, StagePayload};
use crate::utils::{now_utc, Timestamp};

/// Why an artifact is not `ok`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Error classification.
    pub kind: ErrorKind,
    /// Human-readable explanation.
    pub message: String,
    /// Degraded aspects, empty for failures.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aspects: Vec<String>,
}

impl ErrorDetail {
    /// Creates an error detail.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            aspects: Vec::new(),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Identity of a stored artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArtifactKey {
    /// Owning run.
    pub run_id: RunId,
    /// Producing stage.
    pub stage: StageName,
    /// 1-based version within (run, stage).
    pub version: u32,
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/v{:04}", self.run_id, self.stage, self.version)
    }
}

/// The persisted result of running one stage once.
///
/// An artifact is written once and never mutated. A payload is present
/// unless the status is `failed`; an error detail is present unless the
/// status is `ok`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageArtifact {
    /// Owning run.
    pub run_id: RunId,
    /// Producing stage.
    pub stage: StageName,
    /// 1-based version within (run, stage).
    pub version: u32,
    /// Resolution status.
    pub status: ArtifactStatus,
    /// Stage-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<StagePayload>,
    /// Failure or degradation detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Payload contract version the artifact was produced under.
    pub contract_version: u32,
    /// Fingerprint of the inputs the artifact was produced from.
    pub input_fingerprint: String,
    /// Inference attempts spent, including the corrective retry.
    pub attempts: u32,
    /// Wall time spent resolving the stage.
    pub elapsed_ms: u64,
    /// When the artifact was produced.
    pub produced_at: Timestamp,
}

impl StageArtifact {
    fn base(run_id: RunId, stage: StageName, status: ArtifactStatus) -> Self {
        Self {
            run_id,
            stage,
            version: 1,
            status,
            payload: None,
            error: None,
            contract_version: contract_version(stage),
            input_fingerprint: String::new(),
            attempts: 0,
            elapsed_ms: 0,
            produced_at: now_utc(),
        }
    }

    /// Creates a usable artifact: `ok` when `aspects` is empty, else `degraded`.
    #[must_use]
    pub fn resolved(run_id: RunId, payload: StagePayload, aspects: Vec<String>) -> Self {
        let stage = payload.stage();
        if aspects.is_empty() {
            let mut artifact = Self::base(run_id, stage, ArtifactStatus::Ok);
            artifact.payload = Some(payload);
            return artifact;
        }
        let mut artifact = Self::base(run_id, stage, ArtifactStatus::Degraded);
        artifact.payload = Some(payload);
        artifact.error = Some(ErrorDetail {
            kind: ErrorKind::LowConfidence,
            message: aspects.join("; "),
            aspects,
        });
        artifact
    }

    /// Creates a `failed` artifact.
    #[must_use]
    pub fn failed(
        run_id: RunId,
        stage: StageName,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        let mut artifact = Self::base(run_id, stage, ArtifactStatus::Failed);
        artifact.error = Some(ErrorDetail::new(kind, message));
        artifact
    }

    /// Sets the version.
    #[must_use]
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Sets the input fingerprint.
    #[must_use]
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.input_fingerprint = fingerprint.into();
        self
    }

    /// Sets attempt count and elapsed time.
    #[must_use]
    pub fn with_timing(mut self, attempts: u32, elapsed_ms: u64) -> Self {
        self.attempts = attempts;
        self.elapsed_ms = elapsed_ms;
        self
    }

    /// Storage key of this artifact.
    #[must_use]
    pub fn key(&self) -> ArtifactKey {
        ArtifactKey {
            run_id: self.run_id,
            stage: self.stage,
            version: self.version,
        }
    }

    /// Returns true if the artifact can feed the next stage.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.status.is_usable() && self.payload.is_some()
    }

    /// Error kind, if any.
    #[must_use]
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }

    /// Degraded aspects, empty unless `degraded`.
    #[must_use]
    pub fn degraded_aspects(&self) -> &[String] {
        match (&self.status, &self.error) {
            (ArtifactStatus::Degraded, Some(detail)) => &detail.aspects,
            _ => &[],
        }
    }

    /// Returns true if the artifact may be reused for the given inputs.
    #[must_use]
    pub fn matches_inputs(&self, fingerprint: &str) -> bool {
        self.is_usable()
            && self.contract_version == contract_version(self.stage)
            && self.input_fingerprint == fingerprint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{FinalOutput, ScriptDraft, ScriptSegment, TitleCandidate, ValidationReport};

    fn final_payload() -> StagePayload {
        StagePayload::Integrate(FinalOutput {
            script: ScriptDraft::new(vec![ScriptSegment::new(0.0, "Doom rises.")]),
            titles: vec![TitleCandidate {
                rank: 1,
                text: "How Doom Took Over".into(),
                rationale: None,
            }],
            validation: ValidationReport::default(),
        })
    }

    #[test]
    fn test_resolved_ok_has_no_error() {
        let artifact = StageArtifact::resolved(RunId::new(), final_payload(), vec![]);
        assert_eq!(artifact.status, ArtifactStatus::Ok);
        assert_eq!(artifact.stage, StageName::Integrate);
        assert!(artifact.error.is_none());
        assert!(artifact.is_usable());
    }

    #[test]
    fn test_resolved_degraded_lists_aspects() {
        let artifact = StageArtifact::resolved(
            RunId::new(),
            final_payload(),
            vec!["timing".into(), "title length".into()],
        );
        assert_eq!(artifact.status, ArtifactStatus::Degraded);
        assert_eq!(artifact.error_kind(), Some(ErrorKind::LowConfidence));
        assert_eq!(artifact.degraded_aspects(), ["timing", "title length"]);
    }

    #[test]
    fn test_failed_has_no_payload() {
        let artifact = StageArtifact::failed(
            RunId::new(),
            StageName::Review,
            ErrorKind::TransientUpstream,
            "timed out",
        );
        assert!(!artifact.is_usable());
        assert!(artifact.payload.is_none());
        assert!(artifact.degraded_aspects().is_empty());
        assert_eq!(
            artifact.error.as_ref().map(ToString::to_string).as_deref(),
            Some("TransientUpstreamError: timed out")
        );
    }

    #[test]
    fn test_matches_inputs() {
        let artifact = StageArtifact::resolved(RunId::new(), final_payload(), vec![])
            .with_fingerprint("abc");
        assert!(artifact.matches_inputs("abc"));
        assert!(!artifact.matches_inputs("abd"));

        let mut stale = artifact.clone();
        stale.contract_version += 1;
        assert!(!stale.matches_inputs("abc"));
    }

    #[test]
    fn test_key_display() {
        let run_id = RunId::new();
        let artifact = StageArtifact::failed(run_id, StageName::Extract, ErrorKind::Cancelled, "")
            .with_version(3);
        assert_eq!(artifact.key().to_string(), format!("{run_id}/extract/v0003"));
    }

    #[test]
    fn test_serialization_round_trip() {
        let artifact = StageArtifact::resolved(RunId::new(), final_payload(), vec!["x".into()])
            .with_timing(2, 1500);
        let json = serde_json::to_string(&artifact).unwrap();
        let back: StageArtifact = serde_json::from_str(&json).unwrap();
        assert_eq!(artifact, back);
    }
}
