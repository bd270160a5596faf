//! The three stage definitions and the context they run in.
//!
//! A stage definition knows how to turn its inputs into an inference
//! request, how to read the response back into a typed payload, and how
//! confident it is in that payload. Timeouts, retries and persistence are
//! the runner's job.

mod extract;
mod integrate;
mod prompts;
mod review;

pub use extract::ExtractStage;
pub use integrate::IntegrateStage;
pub use review::ReviewStage;

use std::fmt::Debug;
use std::sync::Arc;

use crate::archive::{ArchiveContents, SamplingPolicy};
use crate::contracts::{
    contract_version, ContractViolation, ExtractionPayload, MalformedResponse, ReviewPayload,
    StagePayload, TimingPolicy,
};
use crate::core::{RunId, SourceRef, StageArtifact, StageName};
use crate::corpus::ReferenceCorpus;
use crate::inference::{InferenceRequest, InferenceResponse};

/// Rejected output kept in a corrective prompt.
const REJECTED_EXCERPT_CHARS: usize = 4_000;

/// Everything a stage may read while building and judging its request.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Owning run.
    pub run_id: RunId,
    /// Source archive.
    pub source: SourceRef,
    /// Target video length in seconds.
    pub target_duration_secs: u32,
    /// Narration pace and tolerance.
    pub timing: TimingPolicy,
    /// Page sampling limits.
    pub sampling: SamplingPolicy,
    /// Sampled pages; only the extract stage needs them.
    pub pages: Option<Arc<ArchiveContents>>,
    /// Content key recorded when the pages were last read.
    pub pages_key: Option<String>,
    /// Competitor references for the review stage.
    pub corpus: Arc<ReferenceCorpus>,
    /// Resolved artifacts of earlier stages, in stage order.
    pub upstream: Vec<StageArtifact>,
}

impl StageContext {
    /// Creates a context with no pages and no upstream artifacts.
    #[must_use]
    pub fn new(run_id: RunId, source: SourceRef, target_duration_secs: u32) -> Self {
        Self {
            run_id,
            source,
            target_duration_secs,
            timing: TimingPolicy::default(),
            sampling: SamplingPolicy::default(),
            pages: None,
            pages_key: None,
            corpus: Arc::new(ReferenceCorpus::empty()),
            upstream: Vec::new(),
        }
    }

    /// Sets the timing policy.
    #[must_use]
    pub fn with_timing(mut self, timing: TimingPolicy) -> Self {
        self.timing = timing;
        self
    }

    /// Sets the sampling policy.
    #[must_use]
    pub fn with_sampling(mut self, sampling: SamplingPolicy) -> Self {
        self.sampling = sampling;
        self
    }

    /// Attaches sampled pages.
    #[must_use]
    pub fn with_pages(mut self, pages: Arc<ArchiveContents>) -> Self {
        self.pages = Some(pages);
        self
    }

    /// Sets the content key recorded for pages read on an earlier drive.
    #[must_use]
    pub fn with_pages_key(mut self, key: Option<String>) -> Self {
        self.pages_key = key;
        self
    }

    /// Content key of the sampled pages, falling back to the recorded one.
    #[must_use]
    pub fn content_key(&self) -> Option<String> {
        self.pages
            .as_ref()
            .map(|pages| pages.content_key())
            .or_else(|| self.pages_key.clone())
    }

    /// Attaches the reference corpus.
    #[must_use]
    pub fn with_corpus(mut self, corpus: Arc<ReferenceCorpus>) -> Self {
        self.corpus = corpus;
        self
    }

    /// Adds a resolved upstream artifact.
    #[must_use]
    pub fn with_upstream(mut self, artifact: StageArtifact) -> Self {
        self.upstream.retain(|a| a.stage != artifact.stage);
        self.upstream.push(artifact);
        self.upstream.sort_by_key(|a| a.stage.index());
        self
    }

    /// The usable upstream artifact for a stage.
    #[must_use]
    pub fn upstream_artifact(&self, stage: StageName) -> Option<&StageArtifact> {
        self.upstream
            .iter()
            .find(|a| a.stage == stage && a.is_usable())
    }

    /// The extraction payload, if extract resolved.
    #[must_use]
    pub fn extraction(&self) -> Option<&ExtractionPayload> {
        self.upstream_artifact(StageName::Extract)?
            .payload
            .as_ref()?
            .as_extract()
    }

    /// The review payload, if review resolved.
    #[must_use]
    pub fn review(&self) -> Option<&ReviewPayload> {
        self.upstream_artifact(StageName::Review)?
            .payload
            .as_ref()?
            .as_review()
    }

    /// The predecessor artifact `stage` consumes, checked for shape.
    pub fn predecessor(&self, stage: StageName) -> Result<&StageArtifact, ContractViolation> {
        let Some(expected) = stage.predecessor() else {
            return Err(ContractViolation::new(format!("stage '{stage}' has no predecessor")));
        };
        let artifact = self.upstream_artifact(expected).ok_or_else(|| {
            ContractViolation::new(format!("no usable '{expected}' artifact for stage '{stage}'"))
        })?;
        if artifact.contract_version != contract_version(expected) {
            return Err(ContractViolation::field(
                "contract_version",
                format!(
                    "'{expected}' artifact has contract version {}, expected {}",
                    artifact.contract_version,
                    contract_version(expected)
                ),
            ));
        }
        let payload = artifact.payload.as_ref().ok_or_else(|| {
            ContractViolation::new(format!("'{expected}' artifact has no payload"))
        })?;
        if payload.stage() != expected {
            return Err(ContractViolation::field(
                "payload",
                format!("expected a '{expected}' payload, found '{}'", payload.stage()),
            ));
        }
        payload.validate().map_err(|e| e.within(expected.as_str()))?;
        Ok(artifact)
    }
}

/// One pipeline stage: request construction, response parsing, assessment.
pub trait StageDefinition: Send + Sync + Debug {
    /// The stage this definition implements.
    fn name(&self) -> StageName;

    /// Fingerprint of the inputs, used to decide whether a stored
    /// artifact can be reused.
    fn input_fingerprint(&self, ctx: &StageContext) -> Result<String, ContractViolation>;

    /// Builds the inference request.
    fn build_request(&self, ctx: &StageContext) -> Result<InferenceRequest, ContractViolation>;

    /// Turns the response into a validated payload.
    fn parse_response(
        &self,
        ctx: &StageContext,
        response: &InferenceResponse,
    ) -> Result<StagePayload, MalformedResponse>;

    /// Lists low-confidence aspects of a valid payload; empty means `ok`.
    fn assess(&self, ctx: &StageContext, payload: &StagePayload) -> Vec<String>;

    /// Builds the single follow-up request after a rejected response.
    fn corrective_request(
        &self,
        original: &InferenceRequest,
        rejected: &str,
        error: &MalformedResponse,
    ) -> InferenceRequest {
        let excerpt: String = rejected.chars().take(REJECTED_EXCERPT_CHARS).collect();
        let mut request = original.clone();
        request.prompt = prompts::corrective(&original.prompt, &excerpt, &error.to_string());
        request
    }
}

/// The definition for a stage.
#[must_use]
pub fn definition_for(stage: StageName) -> Arc<dyn StageDefinition> {
    match stage {
        StageName::Extract => Arc::new(ExtractStage),
        StageName::Review => Arc::new(ReviewStage),
        StageName::Integrate => Arc::new(IntegrateStage),
    }
}

/// Key identifying an upstream artifact inside a fingerprint.
pub(crate) fn artifact_identity(artifact: &StageArtifact) -> String {
    format!(
        "{}:{}:{}",
        artifact.key(),
        artifact.contract_version,
        artifact.input_fingerprint
    )
}
