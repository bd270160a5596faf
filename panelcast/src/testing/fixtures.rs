//! Canned payloads, model replies and archives.

use serde_json::{json, Value};

use crate::archive::{sample_indices, ArchiveContents, PageImage};
use crate::contracts::{
    CompetitiveFeedback, ExtractionPayload, PageAnalysis, ReviewPayload, ReviewScores,
    ScriptDraft, ScriptSegment, StagePayload, StorySummary,
};
use crate::core::{RunId, SourceRef, StageArtifact};
use crate::corpus::{ReferenceCorpus, ReferenceScript};

const VOCABULARY: &[&str] = &[
    "the", "hero", "returned", "to", "a", "city", "under", "siege", "while", "old", "allies",
    "turned", "against", "each", "other", "and", "ruin",
];

const SEGMENTS: usize = 4;

/// `count` words of plausible narration.
#[must_use]
pub fn narration(count: usize) -> String {
    (0..count)
        .map(|i| VOCABULARY[i % VOCABULARY.len()])
        .collect::<Vec<_>>()
        .join(" ")
}

/// A draft of `words` words split into timed segments.
#[must_use]
pub fn draft(words: usize) -> ScriptDraft {
    let per_segment = words.div_ceil(SEGMENTS).max(1);
    let mut segments = Vec::new();
    let mut remaining = words.max(1);
    let mut start = 0.0;
    while remaining > 0 {
        let n = remaining.min(per_segment);
        segments.push(
            ScriptSegment::new(start, narration(n))
                .with_visual_cue(format!("panel {}", segments.len() + 1)),
        );
        remaining -= n;
        #[allow(clippy::cast_precision_loss)]
        let secs = n as f64 / 175.0 * 60.0;
        start += secs;
    }
    ScriptDraft::new(segments)
}

fn draft_json(words: usize) -> Value {
    serde_json::to_value(draft(words)).unwrap_or(Value::Null)
}

fn story() -> StorySummary {
    StorySummary {
        title: Some("The Siege".into()),
        synopsis: "A hero returns to find the city besieged by former allies.".into(),
        characters: vec!["Hero".into(), "Warden".into()],
        key_events: vec!["The hero returns".into(), "The allies turn".into()],
    }
}

/// Sampled contents of a synthetic archive of `total` pages.
#[must_use]
pub fn archive_contents(total: usize, max_pages: usize) -> ArchiveContents {
    let pages = sample_indices(total, max_pages)
        .into_iter()
        .map(|index| PageImage {
            index,
            name: format!("page{:03}.png", index + 1),
            media_type: "image/png".into(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47, u8::try_from(index % 256).unwrap_or(0)],
        })
        .collect();
    ArchiveContents {
        source: SourceRef::new("issue-1.cbz"),
        total_pages: total,
        pages,
    }
}

/// Extract reply with `analyses` page analyses and a draft of `words` words.
#[must_use]
pub fn extract_response(analyses: usize, words: usize) -> String {
    let page_analyses: Vec<Value> = (0..analyses)
        .map(|i| {
            json!({
                "page_index": i * 13,
                "description": format!("Scene {} of the siege.", i + 1),
                "characters": ["Hero"],
                "dialogue": []
            })
        })
        .collect();
    json!({
        "page_analyses": page_analyses,
        "story_summary": story(),
        "draft": draft_json(words),
        "low_confidence": []
    })
    .to_string()
}

/// Review reply with no high-severity fidelity findings.
#[must_use]
pub fn review_response(words: usize) -> String {
    json!({
        "draft": draft_json(words),
        "feedback": {
            "fidelity": [{"category": "detail", "description": "Warden's name is misspelled", "severity": "low"}],
            "engagement": [{"category": "hook", "description": "Open on the siege itself", "severity": "medium"}]
        },
        "scores": {"fidelity": 88, "engagement": 74},
        "recommendations": ["Lead with the burning gate"]
    })
    .to_string()
}

/// Integrate reply with five short titles and a passing fidelity check.
#[must_use]
pub fn integrate_response(words: usize) -> String {
    json!({
        "script": draft_json(words),
        "titles": [
            {"rank": 1, "text": "The Hero Comes Home to a City at War", "rationale": "direct"},
            {"rank": 2, "text": "When Allies Turn: The Siege Explained"},
            {"rank": 3, "text": "The Siege in 75 Seconds"},
            {"rank": 4, "text": "Old Friends, New Enemies"},
            {"rank": 5, "text": "Who Betrayed the Hero?"}
        ],
        "validation": {"checks": [
            {"name": "story_accuracy", "category": "fidelity", "passed": true, "detail": "matches the source"}
        ]}
    })
    .to_string()
}

/// Extraction payload for a 40-page archive sampled at four pages.
#[must_use]
pub fn extraction_payload() -> ExtractionPayload {
    ExtractionPayload {
        total_pages: 40,
        sampled_pages: 4,
        page_analyses: (0..4)
            .map(|i| PageAnalysis {
                page_index: i * 13,
                description: format!("Scene {}", i + 1),
                characters: vec!["Hero".into()],
                dialogue: Vec::new(),
            })
            .collect(),
        story_summary: story(),
        draft: draft(220),
        low_confidence: Vec::new(),
    }
}

/// Review payload with clean feedback.
#[must_use]
pub fn review_payload() -> ReviewPayload {
    ReviewPayload {
        draft: draft(220),
        feedback: CompetitiveFeedback::default(),
        scores: ReviewScores {
            fidelity: 90.0,
            engagement: 80.0,
        },
        recommendations: vec!["Lead with the burning gate".into()],
        corpus_size: 3,
    }
}

/// An `ok` extract artifact, version 1.
#[must_use]
pub fn extract_artifact(run_id: RunId) -> StageArtifact {
    StageArtifact::resolved(run_id, StagePayload::Extract(extraction_payload()), Vec::new())
        .with_fingerprint("extract-inputs")
        .with_timing(1, 1_200)
}

/// An `ok` review artifact, version 1.
#[must_use]
pub fn review_artifact(run_id: RunId) -> StageArtifact {
    StageArtifact::resolved(run_id, StagePayload::Review(review_payload()), Vec::new())
        .with_fingerprint("review-inputs")
        .with_timing(1, 900)
}

/// A corpus of `n` reference scripts.
#[must_use]
pub fn corpus(n: usize) -> ReferenceCorpus {
    ReferenceCorpus::new(
        (0..n)
            .map(|i| ReferenceScript {
                video_id: format!("vid{i}"),
                title: format!("Reference video {}", i + 1),
                description: "A fast recap of a classic arc.".into(),
                transcript: narration(60),
                url: format!("https://video.example/watch?v=vid{i}"),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_draft_hits_requested_word_count() {
        let d = draft(220);
        assert_eq!(d.word_count(), 220);
        assert_eq!(d.segments.len(), SEGMENTS);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_canned_payloads_are_valid() {
        assert!(extraction_payload().validate().is_ok());
        assert!(review_payload().validate().is_ok());
        assert!(extract_artifact(RunId::new()).is_usable());
    }

    #[test]
    fn test_archive_contents_samples_evenly() {
        let contents = archive_contents(40, 4);
        let indices: Vec<usize> = contents.pages.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![0, 13, 26, 39]);
    }
}
