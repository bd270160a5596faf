//! Core domain model types.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage names and status enums
//! - Stage artifacts and their storage keys
//! - Pipeline runs and per-stage outcomes

mod artifact;
mod run;
mod status;

pub use artifact::{ArtifactKey, ErrorDetail, StageArtifact};
pub use run::{
    PipelineRun, RunFailure, RunId, SourceRef, StageOutcome, DEFAULT_TARGET_DURATION_SECS,
};
pub use status::{ArtifactStatus, ErrorKind, RunStatus, StageName};
