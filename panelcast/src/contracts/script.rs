//! Timed narration drafts and the spoken-duration gate.

use serde::{Deserialize, Serialize};

use super::errors::ContractViolation;

/// Default narration pace used to estimate spoken duration.
pub const DEFAULT_WORDS_PER_MINUTE: f64 = 175.0;

/// Default accepted deviation from the target duration (fraction of target).
pub const DEFAULT_DURATION_TOLERANCE: f64 = 0.20;

/// One timed piece of narration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSegment {
    /// Offset from the start of the video, in seconds.
    pub start_secs: f64,
    /// Text read by the narrator.
    pub narration: String,
    /// Optional note about what should be on screen.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_cue: Option<String>,
}

impl ScriptSegment {
    /// Creates a segment without a visual cue.
    #[must_use]
    pub fn new(start_secs: f64, narration: impl Into<String>) -> Self {
        Self {
            start_secs,
            narration: narration.into(),
            visual_cue: None,
        }
    }

    /// Sets the visual cue.
    #[must_use]
    pub fn with_visual_cue(mut self, cue: impl Into<String>) -> Self {
        self.visual_cue = Some(cue.into());
        self
    }

    /// Number of whitespace-separated words in the narration.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.narration.split_whitespace().count()
    }
}

/// An ordered sequence of timed segments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptDraft {
    /// Segments in playback order.
    pub segments: Vec<ScriptSegment>,
}

impl ScriptDraft {
    /// Creates a draft from segments.
    #[must_use]
    pub fn new(segments: Vec<ScriptSegment>) -> Self {
        Self { segments }
    }

    /// Total narration word count.
    #[must_use]
    pub fn word_count(&self) -> usize {
        self.segments.iter().map(ScriptSegment::word_count).sum()
    }

    /// Full narration joined into one block of text.
    #[must_use]
    pub fn narration(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.narration.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Checks the structural invariants of a draft.
    ///
    /// A draft needs at least one segment, non-empty narration in every
    /// segment, and finite, non-negative, non-decreasing start offsets.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        if self.segments.is_empty() {
            return Err(ContractViolation::new("draft has no segments"));
        }

        let mut previous = 0.0_f64;
        for (i, segment) in self.segments.iter().enumerate() {
            if !segment.start_secs.is_finite() || segment.start_secs < 0.0 {
                return Err(ContractViolation::field(
                    format!("segments[{i}].start_secs"),
                    format!("offset {} is not a non-negative number", segment.start_secs),
                ));
            }
            if segment.start_secs < previous {
                return Err(ContractViolation::field(
                    format!("segments[{i}].start_secs"),
                    format!(
                        "offset {} precedes previous offset {previous}",
                        segment.start_secs
                    ),
                ));
            }
            if segment.narration.trim().is_empty() {
                return Err(ContractViolation::field(
                    format!("segments[{i}].narration"),
                    "narration is empty",
                ));
            }
            previous = segment.start_secs;
        }
        Ok(())
    }

    /// Estimated spoken duration at the given pace, in seconds.
    #[must_use]
    pub fn estimated_duration_secs(&self, words_per_minute: f64) -> f64 {
        if words_per_minute <= 0.0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let words = self.word_count() as f64;
        words / words_per_minute * 60.0
    }

    /// Compares the estimated spoken duration with a target.
    #[must_use]
    pub fn timing_check(&self, target_secs: u32, policy: &TimingPolicy) -> TimingCheck {
        let estimated_secs = self.estimated_duration_secs(policy.words_per_minute);
        let target = f64::from(target_secs);
        let allowed = target * policy.tolerance;
        TimingCheck {
            target_secs,
            estimated_secs,
            word_count: self.word_count(),
            within_tolerance: (estimated_secs - target).abs() <= allowed,
        }
    }
}

/// Pace and tolerance used to judge whether a draft fits its target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingPolicy {
    /// Narration pace.
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: f64,
    /// Accepted deviation as a fraction of the target duration.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_words_per_minute() -> f64 {
    DEFAULT_WORDS_PER_MINUTE
}

fn default_tolerance() -> f64 {
    DEFAULT_DURATION_TOLERANCE
}

impl Default for TimingPolicy {
    fn default() -> Self {
        Self {
            words_per_minute: default_words_per_minute(),
            tolerance: default_tolerance(),
        }
    }
}

impl TimingPolicy {
    /// Word-count range that satisfies the target, rounded inward.
    #[must_use]
    pub fn word_range(&self, target_secs: u32) -> (usize, usize) {
        let per_sec = self.words_per_minute / 60.0;
        let target = f64::from(target_secs);
        let low = (target * (1.0 - self.tolerance) * per_sec).ceil().max(0.0);
        let high = (target * (1.0 + self.tolerance) * per_sec).floor().max(0.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        (low as usize, high as usize)
    }
}

/// Outcome of comparing a draft's spoken duration with its target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimingCheck {
    /// Target duration in seconds.
    pub target_secs: u32,
    /// Estimated spoken duration in seconds.
    pub estimated_secs: f64,
    /// Narration word count.
    pub word_count: usize,
    /// Whether the estimate falls within tolerance.
    pub within_tolerance: bool,
}

impl TimingCheck {
    /// Human-readable explanation.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "{} words, about {:.0}s spoken against a {}s target",
            self.word_count, self.estimated_secs, self.target_secs
        )
    }
}
