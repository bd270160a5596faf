//! Stage payload types and their contract checks.
//!
//! Each stage produces exactly one payload shape. The shapes are versioned
//! through [`contract_version`]; an artifact whose recorded version differs
//! from the current one is never reused on resume.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use super::errors::ContractViolation;
use super::feedback::{CompetitiveFeedback, ReviewScores};
use super::script::ScriptDraft;
use crate::core::StageName;

/// Titles longer than this are flagged by the integrate stage.
pub const MAX_TITLE_CHARS: usize = 70;

/// Current payload contract version for a stage.
#[must_use]
pub const fn contract_version(stage: StageName) -> u32 {
    match stage {
        StageName::Extract | StageName::Review | StageName::Integrate => 1,
    }
}

/// The model's reading of one sampled page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageAnalysis {
    /// Zero-based page index within the archive.
    pub page_index: usize,
    /// What happens on the page.
    pub description: String,
    /// Characters visible on the page.
    #[serde(default)]
    pub characters: Vec<String>,
    /// Dialogue or captions worth quoting.
    #[serde(default)]
    pub dialogue: Vec<String>,
}

/// Condensed story derived from the page analyses.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorySummary {
    /// Issue or story title, when legible.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// A few sentences covering the plot.
    pub synopsis: String,
    /// Named characters in order of importance.
    #[serde(default)]
    pub characters: Vec<String>,
    /// Plot beats in story order.
    #[serde(default)]
    pub key_events: Vec<String>,
}

/// Output of the extract stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionPayload {
    /// Pages in the archive.
    pub total_pages: usize,
    /// Pages sent to the model.
    pub sampled_pages: usize,
    /// One analysis per sampled page, ideally.
    pub page_analyses: Vec<PageAnalysis>,
    /// Story condensed from the analyses.
    pub story_summary: StorySummary,
    /// First timed narration draft.
    pub draft: ScriptDraft,
    /// Aspects the model reported low confidence in.
    #[serde(default)]
    pub low_confidence: Vec<String>,
}

impl ExtractionPayload {
    /// Checks counts, the summary and the draft.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.sampled_pages == 0 {
            return Err(ContractViolation::field("sampled_pages", "no pages were sampled"));
        }
        if self.sampled_pages > self.total_pages {
            return Err(ContractViolation::field(
                "sampled_pages",
                format!(
                    "{} sampled pages exceed {} total pages",
                    self.sampled_pages, self.total_pages
                ),
            ));
        }
        if self.story_summary.synopsis.trim().is_empty() {
            return Err(ContractViolation::field("story_summary.synopsis", "synopsis is empty"));
        }
        self.draft.validate().map_err(|e| e.within("draft"))
    }
}

/// Output of the review stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewPayload {
    /// Draft carried forward, possibly revised.
    pub draft: ScriptDraft,
    /// Fidelity and engagement findings.
    pub feedback: CompetitiveFeedback,
    /// Numeric scores.
    pub scores: ReviewScores,
    /// Concrete edits suggested for the final script.
    #[serde(default)]
    pub recommendations: Vec<String>,
    /// Reference scripts the review was benchmarked against.
    #[serde(default)]
    pub corpus_size: usize,
}

impl ReviewPayload {
    /// Checks the draft, feedback and scores.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        self.draft.validate().map_err(|e| e.within("draft"))?;
        self.feedback.validate().map_err(|e| e.within("feedback"))?;
        self.scores.validate().map_err(|e| e.within("scores"))
    }
}

/// A proposed video title.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleCandidate {
    /// 1 is best.
    pub rank: u32,
    /// The title itself.
    pub text: String,
    /// Why it ranks where it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rationale: Option<String>,
}

/// What a validation check covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckCategory {
    /// Faithfulness to the source.
    Fidelity,
    /// Spoken duration against the target.
    Timing,
    /// Title length and style.
    Titles,
}

/// Pass or fail for a single check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    /// Short identifier.
    pub name: String,
    /// What the check covers.
    pub category: CheckCategory,
    /// Outcome.
    pub passed: bool,
    /// Explanation.
    #[serde(default)]
    pub detail: String,
}

impl ValidationCheck {
    /// Creates a check result.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        category: CheckCategory,
        passed: bool,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            category,
            passed,
            detail: detail.into(),
        }
    }
}

/// All checks run against the final script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Individual check results.
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    /// Returns true if every check passed.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// Checks that did not pass.
    pub fn failures(&self) -> impl Iterator<Item = &ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }

    /// Replaces any existing check of the same name.
    pub fn upsert(&mut self, check: ValidationCheck) {
        self.checks.retain(|c| c.name != check.name);
        self.checks.push(check);
    }
}

/// Output of the integrate stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalOutput {
    /// The resolved script.
    pub script: ScriptDraft,
    /// Ranked title candidates.
    pub titles: Vec<TitleCandidate>,
    /// Fidelity and timing checks.
    #[serde(default)]
    pub validation: ValidationReport,
}

impl FinalOutput {
    /// Checks the script and title ranking.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        self.script.validate().map_err(|e| e.within("script"))?;
        if self.titles.is_empty() {
            return Err(ContractViolation::field("titles", "no title candidates"));
        }
        let mut seen = HashSet::new();
        for (i, title) in self.titles.iter().enumerate() {
            if title.rank == 0 {
                return Err(ContractViolation::field(
                    format!("titles[{i}].rank"),
                    "ranks start at 1",
                ));
            }
            if !seen.insert(title.rank) {
                return Err(ContractViolation::field(
                    format!("titles[{i}].rank"),
                    format!("rank {} is used more than once", title.rank),
                ));
            }
            if title.text.trim().is_empty() {
                return Err(ContractViolation::field(
                    format!("titles[{i}].text"),
                    "title is empty",
                ));
            }
        }
        Ok(())
    }

    /// Titles sorted best first.
    #[must_use]
    pub fn ranked_titles(&self) -> Vec<&TitleCandidate> {
        let mut titles: Vec<_> = self.titles.iter().collect();
        titles.sort_by_key(|t| t.rank);
        titles
    }
}

/// Payload of any stage, tagged by stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "data", rename_all = "snake_case")]
pub enum StagePayload {
    /// Extract stage output.
    Extract(ExtractionPayload),
    /// Review stage output.
    Review(ReviewPayload),
    /// Integrate stage output.
    Integrate(FinalOutput),
}

impl StagePayload {
    /// The stage that produces this payload.
    #[must_use]
    pub const fn stage(&self) -> StageName {
        match self {
            Self::Extract(_) => StageName::Extract,
            Self::Review(_) => StageName::Review,
            Self::Integrate(_) => StageName::Integrate,
        }
    }

    /// Runs the contract checks of the wrapped payload.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        match self {
            Self::Extract(p) => p.validate(),
            Self::Review(p) => p.validate(),
            Self::Integrate(p) => p.validate(),
        }
    }

    /// The draft or final script carried by the payload.
    #[must_use]
    pub fn draft(&self) -> &ScriptDraft {
        match self {
            Self::Extract(p) => &p.draft,
            Self::Review(p) => &p.draft,
            Self::Integrate(p) => &p.script,
        }
    }

    /// Returns the extraction payload, if this is one.
    #[must_use]
    pub fn as_extract(&self) -> Option<&ExtractionPayload> {
        match self {
            Self::Extract(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the review payload, if this is one.
    #[must_use]
    pub fn as_review(&self) -> Option<&ReviewPayload> {
        match self {
            Self::Review(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the final output, if this is one.
    #[must_use]
    pub fn as_final(&self) -> Option<&FinalOutput> {
        match self {
            Self::Integrate(p) => Some(p),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::script::ScriptSegment;

    fn draft() -> ScriptDraft {
        ScriptDraft::new(vec![ScriptSegment::new(0.0, "The city burns.")])
    }

    fn final_output(ranks: &[u32]) -> FinalOutput {
        FinalOutput {
            script: draft(),
            titles: ranks
                .iter()
                .map(|r| TitleCandidate {
                    rank: *r,
                    text: format!("Title {r}"),
                    rationale: None,
                })
                .collect(),
            validation: ValidationReport::default(),
        }
    }

    #[test]
    fn test_extraction_rejects_oversampling() {
        let payload = ExtractionPayload {
            total_pages: 2,
            sampled_pages: 3,
            page_analyses: vec![],
            story_summary: StorySummary {
                synopsis: "x".into(),
                ..StorySummary::default()
            },
            draft: draft(),
            low_confidence: vec![],
        };
        let err = payload.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("sampled_pages"));
    }

    #[test]
    fn test_extraction_nested_draft_error_path() {
        let payload = ExtractionPayload {
            total_pages: 4,
            sampled_pages: 4,
            page_analyses: vec![],
            story_summary: StorySummary {
                synopsis: "x".into(),
                ..StorySummary::default()
            },
            draft: ScriptDraft::default(),
            low_confidence: vec![],
        };
        let err = payload.validate().unwrap_err();
        assert_eq!(err.field.as_deref(), Some("draft"));
    }

    #[test]
    fn test_final_output_unique_ranks() {
        assert!(final_output(&[1, 2, 3]).validate().is_ok());
        assert!(final_output(&[1, 1]).validate().is_err());
        assert!(final_output(&[0, 1]).validate().is_err());
        assert!(final_output(&[]).validate().is_err());
    }

    #[test]
    fn test_ranked_titles_sorted() {
        let output = final_output(&[3, 1, 2]);
        let ranks: Vec<u32> = output.ranked_titles().iter().map(|t| t.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[test]
    fn test_validation_report_upsert() {
        let mut report = ValidationReport::default();
        report.upsert(ValidationCheck::new("timing", CheckCategory::Timing, true, "model"));
        report.upsert(ValidationCheck::new("timing", CheckCategory::Timing, false, "local"));
        assert_eq!(report.checks.len(), 1);
        assert!(!report.all_passed());
        assert_eq!(report.failures().next().map(|c| c.detail.as_str()), Some("local"));
    }

    #[test]
    fn test_stage_payload_tagging() {
        let payload = StagePayload::Integrate(final_output(&[1]));
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["stage"], "integrate");
        let back: StagePayload = serde_json::from_value(value).unwrap();
        assert_eq!(back.stage(), StageName::Integrate);
        assert!(back.as_final().is_some());
        assert!(back.as_review().is_none());
    }
}
