//! Extract stage: page analysis, story summary and first draft.

use serde::Deserialize;

use super::{prompts, StageContext, StageDefinition};
use crate::contracts::{
    contract_version, parse_payload, ContractViolation, ExtractionPayload, MalformedResponse,
    PageAnalysis, ScriptDraft, StagePayload, StorySummary,
};
use crate::core::StageName;
use crate::inference::{InferenceRequest, InferenceResponse, ResponseShape};
use crate::utils::fingerprint;

/// Reads sampled pages and drafts the first script.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExtractStage;

#[derive(Deserialize)]
struct ModelExtraction {
    #[serde(default)]
    page_analyses: Vec<PageAnalysis>,
    story_summary: StorySummary,
    draft: ScriptDraft,
    #[serde(default)]
    low_confidence: Vec<String>,
}

impl StageDefinition for ExtractStage {
    fn name(&self) -> StageName {
        StageName::Extract
    }

    fn input_fingerprint(&self, ctx: &StageContext) -> Result<String, ContractViolation> {
        let key = ctx
            .content_key()
            .ok_or_else(|| ContractViolation::new("extract requires sampled pages"))?;
        Ok(fingerprint(&[
            StageName::Extract.as_str(),
            &contract_version(StageName::Extract).to_string(),
            &key,
            &ctx.target_duration_secs.to_string(),
        ]))
    }

    fn build_request(&self, ctx: &StageContext) -> Result<InferenceRequest, ContractViolation> {
        let pages = ctx
            .pages
            .as_ref()
            .ok_or_else(|| ContractViolation::new("extract requires sampled pages"))?;
        if pages.pages.is_empty() {
            return Err(ContractViolation::field("pages", "no sampled pages"));
        }
        let indices: Vec<usize> = pages.pages.iter().map(|p| p.index).collect();
        let prompt = prompts::extract_prompt(
            &ctx.source.display_name(),
            &indices,
            pages.total_pages,
            ctx.target_duration_secs,
            ctx.timing.word_range(ctx.target_duration_secs),
        );
        Ok(InferenceRequest::new(
            StageName::Extract,
            prompts::EXTRACT_SYSTEM,
            prompt,
            ResponseShape {
                name: "extraction".to_string(),
                example: prompts::extract_shape(),
            },
        )
        .with_images(pages.pages.iter().map(|p| p.to_payload()).collect())
        .with_max_output_tokens(3_000))
    }

    fn parse_response(
        &self,
        ctx: &StageContext,
        response: &InferenceResponse,
    ) -> Result<StagePayload, MalformedResponse> {
        let model: ModelExtraction = parse_payload(&response.text, "extraction")?;
        let (total_pages, sampled_pages) = ctx
            .pages
            .as_ref()
            .map_or((0, 0), |p| (p.total_pages, p.sampled_pages()));
        let payload = ExtractionPayload {
            total_pages,
            sampled_pages,
            page_analyses: model.page_analyses,
            story_summary: model.story_summary,
            draft: model.draft,
            low_confidence: model.low_confidence,
        };
        payload.validate()?;
        Ok(StagePayload::Extract(payload))
    }

    fn assess(&self, ctx: &StageContext, payload: &StagePayload) -> Vec<String> {
        let Some(extraction) = payload.as_extract() else {
            return vec!["unexpected payload type".to_string()];
        };
        let mut aspects = Vec::new();

        let required = ctx.sampling.required_pages(ctx.target_duration_secs);
        if extraction.sampled_pages < required {
            aspects.push(format!(
                "coverage: {} sampled pages for a {}s video, {required} expected",
                extraction.sampled_pages, ctx.target_duration_secs
            ));
        }
        if extraction.page_analyses.len() < extraction.sampled_pages {
            aspects.push(format!(
                "page analysis: {} of {} sampled pages analyzed",
                extraction.page_analyses.len(),
                extraction.sampled_pages
            ));
        }
        for note in &extraction.low_confidence {
            aspects.push(format!("model: {note}"));
        }
        let timing = extraction
            .draft
            .timing_check(ctx.target_duration_secs, &ctx.timing);
        if !timing.within_tolerance {
            aspects.push(format!("timing: {}", timing.describe()));
        }
        aspects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RunId, SourceRef};
    use crate::testing::fixtures;
    use std::sync::Arc;

    fn ctx(total: usize, sampled: usize) -> StageContext {
        StageContext::new(RunId::new(), SourceRef::new("issue-1.cbz"), 75)
            .with_pages(Arc::new(fixtures::archive_contents(total, sampled)))
    }

    #[test]
    fn test_request_attaches_sampled_pages() {
        let request = ExtractStage.build_request(&ctx(40, 4)).unwrap();
        assert_eq!(request.images.len(), 4);
        assert!(request.prompt.contains("issue-1.cbz"));
        assert!(request.prompt.contains("of 40"));
    }

    #[test]
    fn test_request_without_pages_is_contract_violation() {
        let ctx = StageContext::new(RunId::new(), SourceRef::new("x.cbz"), 75);
        assert!(ExtractStage.build_request(&ctx).is_err());
        assert!(ExtractStage.input_fingerprint(&ctx).is_err());
    }

    #[test]
    fn test_parse_fills_counts_from_archive() {
        let ctx = ctx(40, 4);
        let response = InferenceResponse::text(fixtures::extract_response(4, 220));
        let payload = ExtractStage.parse_response(&ctx, &response).unwrap();
        let extraction = payload.as_extract().unwrap();
        assert_eq!(extraction.total_pages, 40);
        assert_eq!(extraction.sampled_pages, 4);
        assert!(ExtractStage.assess(&ctx, &payload).is_empty());
    }

    #[test]
    fn test_parse_rejects_empty_draft() {
        let ctx = ctx(40, 4);
        let text = r#"{"story_summary":{"synopsis":"x"},"draft":{"segments":[]}}"#;
        let err = ExtractStage
            .parse_response(&ctx, &InferenceResponse::text(text))
            .unwrap_err();
        assert!(matches!(err, MalformedResponse::Contract(_)));
    }

    #[test]
    fn test_assess_flags_each_low_confidence_signal() {
        let ctx = ctx(2, 2);
        let mut payload = ExtractStage
            .parse_response(&ctx, &InferenceResponse::text(fixtures::extract_response(1, 90)))
            .unwrap();
        if let StagePayload::Extract(p) = &mut payload {
            p.low_confidence.push("page 2 lettering illegible".into());
        }
        let aspects = ExtractStage.assess(&ctx, &payload);
        assert_eq!(aspects.len(), 4, "{aspects:?}");
        assert!(aspects[0].starts_with("coverage:"));
        assert!(aspects[1].starts_with("page analysis: 1 of 2"));
        assert_eq!(aspects[2], "model: page 2 lettering illegible");
        assert!(aspects[3].starts_with("timing:"));
    }

    #[test]
    fn test_fingerprint_changes_with_target() {
        let a = ctx(40, 4);
        let mut b = a.clone();
        b.target_duration_secs = 90;
        assert_eq!(
            ExtractStage.input_fingerprint(&a).unwrap(),
            ExtractStage.input_fingerprint(&a.clone()).unwrap()
        );
        assert_ne!(
            ExtractStage.input_fingerprint(&a).unwrap(),
            ExtractStage.input_fingerprint(&b).unwrap()
        );
    }

    #[test]
    fn test_fingerprint_from_recorded_key_matches_read_pages() {
        let read = ctx(40, 4);
        let key = read.content_key();
        let recorded = StageContext::new(read.run_id, read.source.clone(), 75).with_pages_key(key);
        assert!(recorded.pages.is_none());
        assert_eq!(
            ExtractStage.input_fingerprint(&recorded).unwrap(),
            ExtractStage.input_fingerprint(&read).unwrap()
        );
        assert!(ExtractStage.build_request(&recorded).is_err());
    }
}
