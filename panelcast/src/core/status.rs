//! Stage names, artifact and run statuses, and error kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the three fixed pipeline phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Page extraction, story summary and first draft.
    Extract,
    /// Fidelity review and competitive scoring.
    Review,
    /// Final script, titles and validation.
    Integrate,
}

impl StageName {
    /// All stages in execution order.
    pub const ALL: [Self; 3] = [Self::Extract, Self::Review, Self::Integrate];

    /// Zero-based position in the pipeline.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Extract => 0,
            Self::Review => 1,
            Self::Integrate => 2,
        }
    }

    /// The stage whose artifact this stage consumes.
    #[must_use]
    pub const fn predecessor(self) -> Option<Self> {
        match self {
            Self::Extract => None,
            Self::Review => Some(Self::Extract),
            Self::Integrate => Some(Self::Review),
        }
    }

    /// Lowercase name used in keys and file names.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Review => "review",
            Self::Integrate => "integrate",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "extract" => Ok(Self::Extract),
            "review" => Ok(Self::Review),
            "integrate" => Ok(Self::Integrate),
            other => Err(format!("unknown stage '{other}'")),
        }
    }
}

/// Resolution status of a stage artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    /// Structurally valid with no low-confidence signals.
    Ok,
    /// Structurally valid but flagged for reduced confidence.
    Degraded,
    /// No usable payload.
    Failed,
}

impl ArtifactStatus {
    /// Returns true if the artifact can feed the next stage.
    #[must_use]
    pub const fn is_usable(self) -> bool {
        matches!(self, Self::Ok | Self::Degraded)
    }
}

impl fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Lifecycle status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Created but not yet driven.
    #[default]
    Pending,
    /// At least one stage remains unresolved.
    Running,
    /// Every stage resolved ok.
    Succeeded,
    /// Every stage resolved, at least one degraded.
    Partial,
    /// A stage failed or the input was unavailable.
    Failed,
}

impl RunStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Partial | Self::Failed)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Partial => write!(f, "partial"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Classification of why an artifact is not `ok`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Timeout, rate limit or upstream failure that outlived the retry budget.
    TransientUpstream,
    /// The response failed shape validation after the corrective retry.
    MalformedResponse,
    /// The source archive is missing, corrupt or has no images.
    InputUnavailable,
    /// The predecessor artifact does not have the shape this stage requires.
    ContractViolation,
    /// The inference endpoint refused the request as malformed.
    RequestRejected,
    /// The run was aborted while the stage was in flight.
    Cancelled,
    /// The payload is valid but carries low-confidence signals.
    LowConfidence,
}

impl ErrorKind {
    /// Name used in user-facing reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TransientUpstream => "TransientUpstreamError",
            Self::MalformedResponse => "MalformedResponseError",
            Self::InputUnavailable => "InputUnavailableError",
            Self::ContractViolation => "ContractViolationError",
            Self::RequestRejected => "RequestRejected",
            Self::Cancelled => "Cancelled",
            Self::LowConfidence => "LowConfidence",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_order() {
        assert_eq!(StageName::ALL.map(StageName::index), [0, 1, 2]);
        assert_eq!(StageName::Extract.predecessor(), None);
        assert_eq!(StageName::Integrate.predecessor(), Some(StageName::Review));
        assert!(StageName::Extract < StageName::Review);
    }

    #[test]
    fn test_stage_name_parse_and_display() {
        assert_eq!("Review".parse::<StageName>(), Ok(StageName::Review));
        assert!("render".parse::<StageName>().is_err());
        assert_eq!(StageName::Integrate.to_string(), "integrate");
    }

    #[test]
    fn test_artifact_status_usable() {
        assert!(ArtifactStatus::Ok.is_usable());
        assert!(ArtifactStatus::Degraded.is_usable());
        assert!(!ArtifactStatus::Failed.is_usable());
    }

    #[test]
    fn test_run_status_terminal() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Partial.is_terminal());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&ArtifactStatus::Degraded).unwrap();
        assert_eq!(json, r#""degraded""#);
        let stage: StageName = serde_json::from_str(r#""extract""#).unwrap();
        assert_eq!(stage, StageName::Extract);
    }

    #[test]
    fn test_error_kind_names() {
        assert_eq!(ErrorKind::TransientUpstream.to_string(), "TransientUpstreamError");
        assert_eq!(ErrorKind::InputUnavailable.as_str(), "InputUnavailableError");
    }
}
