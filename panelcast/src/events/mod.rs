//! Pipeline lifecycle events.
//!
//! The coordinator and stage runner report progress through an
//! [`EventSink`]. Events carry the run id, the stage when relevant, and a
//! small JSON body.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RunId, StageName};
use crate::utils::{now_utc, Timestamp};

/// Kinds of pipeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A run began driving stages.
    #[serde(rename = "run.started")]
    RunStarted,
    /// A stage began executing.
    #[serde(rename = "stage.started")]
    StageStarted,
    /// An inference attempt failed and may be retried.
    #[serde(rename = "stage.attempt_failed")]
    StageAttemptFailed,
    /// A stored artifact was reused instead of executing.
    #[serde(rename = "stage.reused")]
    StageReused,
    /// A stage resolved and its artifact was persisted.
    #[serde(rename = "stage.resolved")]
    StageResolved,
    /// A run reached a terminal status.
    #[serde(rename = "run.completed")]
    RunCompleted,
    /// A run was cancelled.
    #[serde(rename = "run.cancelled")]
    RunCancelled,
}

impl EventKind {
    /// Dotted event name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run.started",
            Self::StageStarted => "stage.started",
            Self::StageAttemptFailed => "stage.attempt_failed",
            Self::StageReused => "stage.reused",
            Self::StageResolved => "stage.resolved",
            Self::RunCompleted => "run.completed",
            Self::RunCancelled => "run.cancelled",
        }
    }

    /// Returns true for events that signal trouble.
    #[must_use]
    pub const fn is_problem(self) -> bool {
        matches!(self, Self::StageAttemptFailed | Self::RunCancelled)
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineEvent {
    /// What happened.
    pub kind: EventKind,
    /// Run the event belongs to.
    pub run_id: RunId,
    /// Stage, for stage events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    /// Event body.
    #[serde(default)]
    pub data: Value,
    /// Emission time.
    pub at: Timestamp,
}

impl PipelineEvent {
    /// Creates a run-level event.
    #[must_use]
    pub fn run(kind: EventKind, run_id: RunId) -> Self {
        Self {
            kind,
            run_id,
            stage: None,
            data: Value::Null,
            at: now_utc(),
        }
    }

    /// Creates a stage-level event.
    #[must_use]
    pub fn stage(kind: EventKind, run_id: RunId, stage: StageName) -> Self {
        Self {
            stage: Some(stage),
            ..Self::run(kind, run_id)
        }
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_names_match_serde() {
        for kind in [
            EventKind::RunStarted,
            EventKind::StageStarted,
            EventKind::StageAttemptFailed,
            EventKind::StageReused,
            EventKind::StageResolved,
            EventKind::RunCompleted,
            EventKind::RunCancelled,
        ] {
            let json = serde_json::to_value(kind).unwrap();
            assert_eq!(json, Value::String(kind.as_str().to_string()));
        }
    }

    #[test]
    fn test_stage_event_builder() {
        let run_id = RunId::new();
        let event = PipelineEvent::stage(EventKind::StageResolved, run_id, StageName::Review)
            .with_data(serde_json::json!({"status": "ok"}));
        assert_eq!(event.stage, Some(StageName::Review));
        assert_eq!(event.data["status"], "ok");
        assert!(!event.kind.is_problem());
    }
}
