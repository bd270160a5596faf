//! Review stage: fidelity and engagement critique with a revised draft.

use serde::Deserialize;

use super::{artifact_identity, prompts, StageContext, StageDefinition};
use crate::contracts::{
    contract_version, parse_payload, CompetitiveFeedback, ContractViolation, MalformedResponse,
    ReviewPayload, ReviewScores, ScriptDraft, StagePayload,
};
use crate::core::StageName;
use crate::inference::{InferenceRequest, InferenceResponse, ResponseShape};
use crate::utils::fingerprint;

/// Critiques the extract draft against the source and the reference corpus.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReviewStage;

#[derive(Deserialize)]
struct ModelReview {
    draft: ScriptDraft,
    #[serde(default)]
    feedback: CompetitiveFeedback,
    scores: ReviewScores,
    #[serde(default)]
    recommendations: Vec<String>,
}

impl StageDefinition for ReviewStage {
    fn name(&self) -> StageName {
        StageName::Review
    }

    fn input_fingerprint(&self, ctx: &StageContext) -> Result<String, ContractViolation> {
        let extract = ctx.predecessor(StageName::Review)?;
        Ok(fingerprint(&[
            StageName::Review.as_str(),
            &contract_version(StageName::Review).to_string(),
            &artifact_identity(extract),
            &ctx.corpus.fingerprint(),
            &ctx.target_duration_secs.to_string(),
        ]))
    }

    fn build_request(&self, ctx: &StageContext) -> Result<InferenceRequest, ContractViolation> {
        ctx.predecessor(StageName::Review)?;
        let extraction = ctx
            .extraction()
            .ok_or_else(|| ContractViolation::new("review requires an extraction payload"))?;
        let prompt = prompts::review_prompt(
            &ctx.source.display_name(),
            extraction,
            ctx.target_duration_secs,
            ctx.timing.word_range(ctx.target_duration_secs),
            &ctx.corpus.prompt_excerpt(),
        );
        Ok(InferenceRequest::new(
            StageName::Review,
            prompts::REVIEW_SYSTEM,
            prompt,
            ResponseShape {
                name: "review".to_string(),
                example: prompts::review_shape(),
            },
        )
        .with_max_output_tokens(2_500))
    }

    fn parse_response(
        &self,
        ctx: &StageContext,
        response: &InferenceResponse,
    ) -> Result<StagePayload, MalformedResponse> {
        let model: ModelReview = parse_payload(&response.text, "review")?;
        let payload = ReviewPayload {
            draft: model.draft,
            feedback: model.feedback,
            scores: model.scores,
            recommendations: model.recommendations,
            corpus_size: ctx.corpus.sample().len(),
        };
        payload.validate()?;
        Ok(StagePayload::Review(payload))
    }

    fn assess(&self, _ctx: &StageContext, payload: &StagePayload) -> Vec<String> {
        let Some(review) = payload.as_review() else {
            return vec!["unexpected payload type".to_string()];
        };
        let mut aspects: Vec<String> = review
            .feedback
            .high_fidelity_deviations()
            .map(|d| format!("fidelity: {} ({})", d.description, d.category))
            .collect();
        if review.corpus_size == 0 {
            aspects.push("engagement: no reference scripts to benchmark against".to_string());
        }
        aspects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{Deviation, Severity};
    use crate::core::{RunId, SourceRef};
    use crate::corpus::ReferenceCorpus;
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn ctx(corpus: ReferenceCorpus) -> StageContext {
        let run_id = RunId::new();
        StageContext::new(run_id, SourceRef::new("issue-1.cbz"), 75)
            .with_corpus(Arc::new(corpus))
            .with_upstream(fixtures::extract_artifact(run_id))
    }

    #[test]
    fn test_request_includes_draft_and_references() {
        let ctx = ctx(fixtures::corpus(3));
        let request = ReviewStage.build_request(&ctx).unwrap();
        assert!(request.images.is_empty());
        assert!(request.prompt.contains("REFERENCE SCRIPTS"));
        assert!(request.prompt.contains("Reference 3:"));
        assert!(request.prompt.contains(&ctx.extraction().unwrap().draft.narration()));
    }

    #[test]
    fn test_request_requires_extract_artifact() {
        let ctx = StageContext::new(RunId::new(), SourceRef::new("x.cbz"), 75);
        let err = ReviewStage.build_request(&ctx).unwrap_err();
        assert!(err.message.contains("'extract'"));
    }

    #[test]
    fn test_clean_review_is_ok() {
        let ctx = ctx(fixtures::corpus(3));
        let payload = ReviewStage
            .parse_response(&ctx, &InferenceResponse::text(fixtures::review_response(220)))
            .unwrap();
        assert_eq!(payload.as_review().unwrap().corpus_size, 3);
        assert!(ReviewStage.assess(&ctx, &payload).is_empty());
    }

    #[test]
    fn test_high_fidelity_deviation_degrades() {
        let ctx = ctx(ReferenceCorpus::empty());
        let mut payload = ReviewStage
            .parse_response(&ctx, &InferenceResponse::text(fixtures::review_response(220)))
            .unwrap();
        if let StagePayload::Review(review) = &mut payload {
            review.feedback.fidelity.push(Deviation::new(
                "plot",
                "villain's motive reversed",
                Severity::High,
            ));
            review
                .feedback
                .fidelity
                .push(Deviation::new("tone", "slightly upbeat", Severity::Low));
        }
        let aspects = ReviewStage.assess(&ctx, &payload);
        assert_eq!(
            aspects,
            vec![
                "fidelity: villain's motive reversed (plot)".to_string(),
                "engagement: no reference scripts to benchmark against".to_string(),
            ]
        );
    }

    #[test]
    fn test_scores_out_of_range_are_malformed() {
        let ctx = ctx(fixtures::corpus(1));
        let text = r#"{"draft":{"segments":[{"start_secs":0,"narration":"x"}]},
                       "scores":{"fidelity":140,"engagement":50}}"#;
        let err = ReviewStage
            .parse_response(&ctx, &InferenceResponse::text(text))
            .unwrap_err();
        assert!(matches!(err, MalformedResponse::Contract(_)));
    }

    #[test]
    fn test_fingerprint_tracks_corpus() {
        let a = ctx(fixtures::corpus(2));
        let mut b = a.clone();
        b.corpus = Arc::new(fixtures::corpus(3));
        assert_ne!(
            ReviewStage.input_fingerprint(&a).unwrap(),
            ReviewStage.input_fingerprint(&b).unwrap()
        );
    }
}
