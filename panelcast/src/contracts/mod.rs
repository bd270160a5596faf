//! Data contracts exchanged between stages.
//!
//! This module provides:
//! - Timed script drafts and the spoken-duration check
//! - Review feedback and scores
//! - The per-stage payload shapes and their validation
//! - Extraction of JSON payloads from model responses

mod errors;
mod feedback;
mod parse;
mod payload;
mod script;

pub use errors::{ContractViolation, MalformedResponse};
pub use feedback::{CompetitiveFeedback, Deviation, ReviewScores, Severity};
pub use parse::{extract_json_object, parse_payload};
pub use payload::{
    contract_version, CheckCategory, ExtractionPayload, FinalOutput, PageAnalysis, ReviewPayload,
    StagePayload, StorySummary, TitleCandidate, ValidationCheck, ValidationReport,
    MAX_TITLE_CHARS,
};
pub use script::{
    ScriptDraft, ScriptSegment, TimingCheck, TimingPolicy, DEFAULT_DURATION_TOLERANCE,
    DEFAULT_WORDS_PER_MINUTE,
};
