//! Prompt text and response-shape examples for each stage.

use serde_json::{json, Value};

use crate::contracts::{ExtractionPayload, ReviewPayload, StorySummary};

pub(crate) const EXTRACT_SYSTEM: &str = "You are a comic book analyst and short-form video \
scriptwriter. You read comic pages and write factual, third-person narrative summaries \
for narrated videos. Never invent events that are not on the pages.";

pub(crate) const REVIEW_SYSTEM: &str = "You are a script editor for comic summary videos. \
You check drafts against the source story for fidelity and against high-performing \
reference scripts for engagement, and you revise the draft accordingly.";

pub(crate) const INTEGRATE_SYSTEM: &str = "You finalize narrated comic summary scripts and \
write factual, direct video titles that accurately reflect the summary. Avoid clickbait.";

pub(crate) fn extract_shape() -> Value {
    json!({
        "page_analyses": [
            {"page_index": 0, "description": "what happens", "characters": ["name"], "dialogue": ["line"]}
        ],
        "story_summary": {
            "title": "issue title if legible",
            "synopsis": "a few sentences",
            "characters": ["name"],
            "key_events": ["event"]
        },
        "draft": {"segments": [{"start_secs": 0.0, "narration": "text", "visual_cue": "page 1"}]},
        "low_confidence": ["aspect you are unsure about"]
    })
}

pub(crate) fn review_shape() -> Value {
    json!({
        "draft": {"segments": [{"start_secs": 0.0, "narration": "revised text"}]},
        "feedback": {
            "fidelity": [{"category": "plot", "description": "what differs", "severity": "low|medium|high"}],
            "engagement": [{"category": "hook", "description": "what is missing", "severity": "low|medium|high"}]
        },
        "scores": {"fidelity": 0, "engagement": 0},
        "recommendations": ["concrete edit"]
    })
}

pub(crate) fn integrate_shape() -> Value {
    json!({
        "script": {"segments": [{"start_secs": 0.0, "narration": "final text", "visual_cue": "cue"}]},
        "titles": [{"rank": 1, "text": "title", "rationale": "why"}],
        "validation": {"checks": [
            {"name": "story_accuracy", "category": "fidelity", "passed": true, "detail": "explanation"}
        ]}
    })
}

pub(crate) fn extract_prompt(
    comic: &str,
    page_indices: &[usize],
    total_pages: usize,
    target_secs: u32,
    words: (usize, usize),
) -> String {
    let pages = page_indices
        .iter()
        .map(|i| (i + 1).to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "Comic: {comic}\n\
         The attached images are pages {pages} of {total_pages}, in order.\n\n\
         1. Analyze each attached page: events, characters, notable dialogue. Use the \
         zero-based page_index of the page within the whole comic.\n\
         2. Summarize the story: synopsis, main characters, key events in order.\n\
         3. Write a narration draft for a {target_secs}-second video: {} to {} words in \
         timed segments, third person, past tense, opening with the central conflict.\n\
         List anything you could not read or are unsure about under low_confidence.",
        words.0, words.1
    )
}

pub(crate) fn review_prompt(
    comic: &str,
    extraction: &ExtractionPayload,
    target_secs: u32,
    words: (usize, usize),
    references: &str,
) -> String {
    format!(
        "Comic: {comic}\n\n\
         SOURCE STORY\n{}\n\n\
         DRAFT NARRATION ({} words)\n{}\n\n\
         REFERENCE SCRIPTS\n{references}\n\n\
         Review the draft:\n\
         - List fidelity deviations from the source story with severity.\n\
         - List engagement gaps against the reference scripts with severity.\n\
         - Score fidelity and engagement from 0 to 100.\n\
         - Return a revised draft for a {target_secs}-second video ({} to {} words) that \
         fixes the high and medium issues.",
        story_block(&extraction.story_summary),
        extraction.draft.word_count(),
        extraction.draft.narration(),
        words.0,
        words.1
    )
}

pub(crate) fn integrate_prompt(
    comic: &str,
    review: &ReviewPayload,
    story: Option<&StorySummary>,
    target_secs: u32,
    words: (usize, usize),
    max_title_chars: usize,
) -> String {
    let findings = review
        .feedback
        .fidelity
        .iter()
        .chain(review.feedback.engagement.iter())
        .map(|d| format!("- [{}] {}: {}", d.severity, d.category, d.description))
        .chain(review.recommendations.iter().map(|r| format!("- {r}")))
        .collect::<Vec<_>>()
        .join("\n");
    let story = story.map_or_else(
        || "Source story unavailable.".to_string(),
        story_block,
    );
    format!(
        "Comic: {comic}\n\n\
         SOURCE STORY\n{story}\n\n\
         REVIEWED DRAFT\n{}\n\n\
         REVIEW FINDINGS\n{findings}\n\n\
         Produce the final {target_secs}-second script ({} to {} words) as timed segments, \
         then 5 to 7 ranked titles under {max_title_chars} characters (rank 1 is best), \
         then fidelity checks comparing the final script with the source story.",
        review.draft.narration(),
        words.0,
        words.1
    )
}

pub(crate) fn corrective(original: &str, rejected: &str, error: &str) -> String {
    format!(
        "{original}\n\n\
         Your previous response was rejected: {error}\n\
         Previous response:\n{rejected}\n\n\
         Return only a corrected JSON object with the requested shape."
    )
}

fn story_block(story: &StorySummary) -> String {
    let mut block = String::new();
    if let Some(title) = &story.title {
        block.push_str(&format!("Title: {title}\n"));
    }
    block.push_str(&format!("Synopsis: {}\n", story.synopsis));
    if !story.characters.is_empty() {
        block.push_str(&format!("Characters: {}\n", story.characters.join(", ")));
    }
    for (i, event) in story.key_events.iter().enumerate() {
        block.push_str(&format!("{}. {event}\n", i + 1));
    }
    block.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prompt_lists_one_based_pages() {
        let prompt = extract_prompt("issue.cbz", &[0, 13, 26, 39], 40, 75, (175, 262));
        assert!(prompt.contains("pages 1, 14, 27, 40 of 40"));
        assert!(prompt.contains("175 to 262 words"));
    }

    #[test]
    fn test_story_block() {
        let story = StorySummary {
            title: Some("Secret Wars".into()),
            synopsis: "Heroes are abducted.".into(),
            characters: vec!["Doom".into(), "Reed".into()],
            key_events: vec!["Battleworld forms".into()],
        };
        let block = story_block(&story);
        assert_eq!(
            block,
            "Title: Secret Wars\nSynopsis: Heroes are abducted.\nCharacters: Doom, Reed\n1. Battleworld forms"
        );
    }

    #[test]
    fn test_corrective_keeps_original() {
        let text = corrective("Do the thing.", "{oops", "response contains no JSON object");
        assert!(text.starts_with("Do the thing."));
        assert!(text.contains("rejected: response contains no JSON object"));
        assert!(text.contains("{oops"));
    }
}
