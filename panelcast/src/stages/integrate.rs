//! Integrate stage: final script, ranked titles and validation.

use serde::Deserialize;

use super::{artifact_identity, prompts, StageContext, StageDefinition};
use crate::contracts::{
    contract_version, parse_payload, CheckCategory, ContractViolation, FinalOutput,
    MalformedResponse, ScriptDraft, StagePayload, TitleCandidate, ValidationCheck,
    ValidationReport, MAX_TITLE_CHARS,
};
use crate::core::StageName;
use crate::inference::{InferenceRequest, InferenceResponse, ResponseShape};
use crate::utils::fingerprint;

const TIMING_CHECK: &str = "duration";
const TITLE_CHECK: &str = "title_length";

/// Folds review findings into the final script and proposes titles.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegrateStage;

#[derive(Deserialize)]
struct ModelFinal {
    script: ScriptDraft,
    #[serde(default)]
    titles: Vec<TitleCandidate>,
    #[serde(default)]
    validation: ValidationReport,
}

impl IntegrateStage {
    fn title_check(titles: &[TitleCandidate]) -> ValidationCheck {
        let long: Vec<String> = titles
            .iter()
            .filter(|t| t.text.chars().count() > MAX_TITLE_CHARS)
            .map(|t| format!("#{} ({} chars)", t.rank, t.text.chars().count()))
            .collect();
        if long.is_empty() {
            ValidationCheck::new(
                TITLE_CHECK,
                CheckCategory::Titles,
                true,
                format!("all {} titles within {MAX_TITLE_CHARS} characters", titles.len()),
            )
        } else {
            ValidationCheck::new(
                TITLE_CHECK,
                CheckCategory::Titles,
                false,
                format!("over {MAX_TITLE_CHARS} characters: {}", long.join(", ")),
            )
        }
    }
}

impl StageDefinition for IntegrateStage {
    fn name(&self) -> StageName {
        StageName::Integrate
    }

    fn input_fingerprint(&self, ctx: &StageContext) -> Result<String, ContractViolation> {
        let review = ctx.predecessor(StageName::Integrate)?;
        Ok(fingerprint(&[
            StageName::Integrate.as_str(),
            &contract_version(StageName::Integrate).to_string(),
            &artifact_identity(review),
            &ctx.target_duration_secs.to_string(),
        ]))
    }

    fn build_request(&self, ctx: &StageContext) -> Result<InferenceRequest, ContractViolation> {
        ctx.predecessor(StageName::Integrate)?;
        let review = ctx
            .review()
            .ok_or_else(|| ContractViolation::new("integrate requires a review payload"))?;
        let story = ctx.extraction().map(|e| &e.story_summary);
        let prompt = prompts::integrate_prompt(
            &ctx.source.display_name(),
            review,
            story,
            ctx.target_duration_secs,
            ctx.timing.word_range(ctx.target_duration_secs),
            MAX_TITLE_CHARS,
        );
        Ok(InferenceRequest::new(
            StageName::Integrate,
            prompts::INTEGRATE_SYSTEM,
            prompt,
            ResponseShape {
                name: "final_output".to_string(),
                example: prompts::integrate_shape(),
            },
        )
        .with_max_output_tokens(2_500))
    }

    fn parse_response(
        &self,
        ctx: &StageContext,
        response: &InferenceResponse,
    ) -> Result<StagePayload, MalformedResponse> {
        let model: ModelFinal = parse_payload(&response.text, "final_output")?;
        let mut output = FinalOutput {
            script: model.script,
            titles: model.titles,
            validation: model.validation,
        };
        output.validate()?;

        // Local measurements replace whatever the model claimed for these checks.
        let timing = output
            .script
            .timing_check(ctx.target_duration_secs, &ctx.timing);
        output.validation.checks.retain(|c| c.category != CheckCategory::Timing);
        output.validation.upsert(ValidationCheck::new(
            TIMING_CHECK,
            CheckCategory::Timing,
            timing.within_tolerance,
            timing.describe(),
        ));
        output.validation.upsert(Self::title_check(&output.titles));
        Ok(StagePayload::Integrate(output))
    }

    fn assess(&self, _ctx: &StageContext, payload: &StagePayload) -> Vec<String> {
        let Some(output) = payload.as_final() else {
            return vec!["unexpected payload type".to_string()];
        };
        output
            .validation
            .failures()
            .map(|c| match c.category {
                CheckCategory::Fidelity => format!("fidelity: {} ({})", c.detail, c.name),
                CheckCategory::Timing => format!("timing: {}", c.detail),
                CheckCategory::Titles => format!("titles: {}", c.detail),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunId, SourceRef};
    use crate::testing::fixtures;
    use pretty_assertions::assert_eq;

    fn ctx() -> StageContext {
        let run_id = RunId::new();
        StageContext::new(run_id, SourceRef::new("issue-1.cbz"), 75)
            .with_upstream(fixtures::extract_artifact(run_id))
            .with_upstream(fixtures::review_artifact(run_id))
    }

    fn parse(ctx: &StageContext, text: &str) -> StagePayload {
        IntegrateStage
            .parse_response(ctx, &InferenceResponse::text(text))
            .unwrap()
    }

    #[test]
    fn test_request_carries_story_and_findings() {
        let ctx = ctx();
        let request = IntegrateStage.build_request(&ctx).unwrap();
        assert!(request.prompt.contains("Synopsis:"));
        assert!(request.prompt.contains("REVIEW FINDINGS"));
        assert!(request.prompt.contains("under 70 characters"));
        assert_eq!(request.response_shape.name, "final_output");
    }

    #[test]
    fn test_request_requires_review() {
        let run_id = RunId::new();
        let ctx = StageContext::new(run_id, SourceRef::new("x.cbz"), 75)
            .with_upstream(fixtures::extract_artifact(run_id));
        let err = IntegrateStage.build_request(&ctx).unwrap_err();
        assert!(err.message.contains("'review'"));
    }

    #[test]
    fn test_valid_output_is_ok_with_local_checks() {
        let ctx = ctx();
        let payload = parse(&ctx, &fixtures::integrate_response(220));
        let output = payload.as_final().unwrap();
        assert!(output.titles.len() >= 3);
        let names: Vec<&str> = output.validation.checks.iter().map(|c| c.name.as_str()).collect();
        assert!(names.contains(&TIMING_CHECK));
        assert!(names.contains(&TITLE_CHECK));
        assert!(IntegrateStage.assess(&ctx, &payload).is_empty());
    }

    #[test]
    fn test_model_timing_claim_is_overridden() {
        let ctx = ctx();
        let text = r#"{
            "script": {"segments": [{"start_secs": 0, "narration": "Far too short."}]},
            "titles": [{"rank": 1, "text": "A Short Title"}],
            "validation": {"checks": [
                {"name": "runtime", "category": "timing", "passed": true, "detail": "fine"}
            ]}
        }"#;
        let payload = parse(&ctx, text);
        let aspects = IntegrateStage.assess(&ctx, &payload);
        assert_eq!(aspects.len(), 1);
        assert!(aspects[0].starts_with("timing: 3 words"));
        let timing: Vec<_> = payload
            .as_final()
            .unwrap()
            .validation
            .checks
            .iter()
            .filter(|c| c.category == CheckCategory::Timing)
            .collect();
        assert_eq!(timing.len(), 1);
    }

    #[test]
    fn test_long_title_and_failed_fidelity_degrade() {
        let ctx = ctx();
        let long = "x".repeat(MAX_TITLE_CHARS + 1);
        let mut payload = parse(&ctx, &fixtures::integrate_response(220));
        if let StagePayload::Integrate(output) = &mut payload {
            output.titles[1].text = long;
            let check = IntegrateStage::title_check(&output.titles);
            output.validation.upsert(check);
            output.validation.upsert(ValidationCheck::new(
                "story_accuracy",
                CheckCategory::Fidelity,
                false,
                "ending changed",
            ));
        }
        let aspects = IntegrateStage.assess(&ctx, &payload);
        assert_eq!(
            aspects,
            vec![
                "titles: over 70 characters: #2 (71 chars)".to_string(),
                "fidelity: ending changed (story_accuracy)".to_string(),
            ]
        );
    }

    #[test]
    fn test_duplicate_ranks_are_malformed() {
        let ctx = ctx();
        let text = r#"{
            "script": {"segments": [{"start_secs": 0, "narration": "Text."}]},
            "titles": [{"rank": 1, "text": "A"}, {"rank": 1, "text": "B"}]
        }"#;
        let err = IntegrateStage
            .parse_response(&ctx, &InferenceResponse::text(text))
            .unwrap_err();
        assert!(matches!(err, MalformedResponse::Contract(_)));
    }
}
