//! Infrastructure errors returned by coordinator operations.
//!
//! Stage-level failures never appear here: they are recorded as `failed`
//! artifacts and surface through the run status. These errors mean the
//! pipeline itself could not do its bookkeeping or was asked for something
//! impossible.

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::core::{RunId, StageName};
use crate::corpus::CorpusError;
use crate::store::StoreError;

/// The main error type for panelcast operations.
#[derive(Debug, Error)]
pub enum PanelcastError {
    /// The artifact store failed.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// The reference corpus could not be read.
    #[error("{0}")]
    Corpus(#[from] CorpusError),

    /// Another invocation is already resolving this stage.
    #[error("{0}")]
    StageBusy(#[from] StageBusyError),

    /// No run record exists for the id.
    #[error("run {0} not found")]
    RunNotFound(RunId),

    /// A single-stage advance was requested before its predecessor resolved.
    #[error("stage '{stage}' cannot run: '{predecessor}' has no usable artifact")]
    PredecessorUnresolved {
        /// The stage that was requested.
        stage: StageName,
        /// The stage it depends on.
        predecessor: StageName,
    },

    /// Archive failure outside a run, e.g. while probing a source.
    #[error("{0}")]
    Archive(#[from] ArchiveError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A second concurrent invocation for the same (run, stage).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("stage '{stage}' of run {run_id} is already being resolved")]
pub struct StageBusyError {
    /// The run.
    pub run_id: RunId,
    /// The busy stage.
    pub stage: StageName,
}

impl StageBusyError {
    /// Creates a stage-busy error.
    #[must_use]
    pub fn new(run_id: RunId, stage: StageName) -> Self {
        Self { run_id, stage }
    }
}

/// Result alias for panelcast operations.
pub type Result<T, E = PanelcastError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_busy_display() {
        let run_id = RunId::new();
        let err: PanelcastError = StageBusyError::new(run_id, StageName::Review).into();
        assert_eq!(
            err.to_string(),
            format!("stage 'review' of run {run_id} is already being resolved")
        );
    }

    #[test]
    fn test_predecessor_unresolved_display() {
        let err = PanelcastError::PredecessorUnresolved {
            stage: StageName::Integrate,
            predecessor: StageName::Review,
        };
        assert_eq!(
            err.to_string(),
            "stage 'integrate' cannot run: 'review' has no usable artifact"
        );
    }

    #[test]
    fn test_store_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PanelcastError = StoreError::from(io).into();
        assert!(matches!(err, PanelcastError::Store(_)));
    }
}
