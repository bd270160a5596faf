//! # Panelcast
//!
//! Turns a comic-book archive into a short-form video script.
//!
//! A run moves through three inference stages, each producing a versioned
//! artifact:
//!
//! - **extract**: sampled pages become a story summary and a first draft
//! - **review**: the draft is checked for fidelity and benchmarked against
//!   reference scripts
//! - **integrate**: feedback is applied, titles are proposed and the final
//!   script is validated against the target duration
//!
//! Stages are resolved independently, so a failed run resumes from the
//! first stage whose inputs changed or whose artifact is unusable.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use panelcast::prelude::*;
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_env()?;
//! let coordinator = PipelineCoordinator::new(
//!     Arc::new(OpenAiClient::new(config.openai_config()?)?),
//!     Arc::new(FileArtifactStore::new(&config.artifact_dir)),
//!     Arc::new(ZipArchiveReader::new()),
//! )
//! .with_config(config);
//!
//! let run = coordinator.run(SourceRef::new("issue-1.cbz"), 75).await?;
//! println!("{}", coordinator.report(run.run_id).await?);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod archive;
pub mod cancellation;
pub mod config;
pub mod contracts;
pub mod core;
pub mod corpus;
pub mod errors;
pub mod events;
pub mod inference;
pub mod pipeline;
pub mod report;
pub mod stages;
pub mod store;
pub mod telemetry;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::archive::{ArchiveReader, SamplingPolicy, ZipArchiveReader};
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{LogFormat, PipelineConfig};
    pub use crate::contracts::{FinalOutput, ScriptDraft, StagePayload, TimingPolicy};
    pub use crate::core::{
        ArtifactStatus, ErrorKind, PipelineRun, RunId, RunStatus, SourceRef, StageArtifact,
        StageName,
    };
    pub use crate::corpus::ReferenceCorpus;
    pub use crate::errors::{PanelcastError, Result};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::inference::{AdmissionGate, GateConfig, InferenceClient};
    #[cfg(feature = "http")]
    pub use crate::inference::OpenAiClient;
    pub use crate::pipeline::{PipelineCoordinator, StageRunner, StageSpec};
    pub use crate::store::{ArtifactStore, FileArtifactStore, InMemoryArtifactStore};
}
