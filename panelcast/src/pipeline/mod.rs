//! Pipeline execution.
//!
//! This module provides:
//! - Per-stage execution policy (timeouts, deadline, retry budget)
//! - Backoff computation for transient upstream failures
//! - The stage runner, which resolves one stage into an artifact
//! - The coordinator, which sequences stages and owns the run record

mod coordinator;
mod retry;
mod runner;
mod spec;


pub use coordinator::PipelineCoordinator;
pub use retry::{BackoffPolicy, BackoffStrategy, JitterStrategy};
pub use runner::StageRunner;
pub use spec::{StageSpec, DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_RETRIES, DEFAULT_STAGE_DEADLINE};
