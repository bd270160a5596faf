//! Review findings: fidelity and engagement deviations plus scores.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ContractViolation;

/// How much a deviation matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Cosmetic.
    Low,
    /// Worth fixing.
    Medium,
    /// Misrepresents the source or sinks the video.
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// A single finding against the draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deviation {
    /// Free-form grouping such as "character" or "hook".
    pub category: String,
    /// What differs.
    pub description: String,
    /// How much it matters.
    pub severity: Severity,
}

impl Deviation {
    /// Creates a deviation.
    #[must_use]
    pub fn new(
        category: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
    ) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            severity,
        }
    }
}

/// Fidelity and engagement findings from the review stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompetitiveFeedback {
    /// Mismatches between the draft and the source material.
    #[serde(default)]
    pub fidelity: Vec<Deviation>,
    /// Gaps against high-performing reference scripts.
    #[serde(default)]
    pub engagement: Vec<Deviation>,
}

impl CompetitiveFeedback {
    /// Fidelity deviations rated high.
    pub fn high_fidelity_deviations(&self) -> impl Iterator<Item = &Deviation> {
        self.fidelity
            .iter()
            .filter(|d| d.severity == Severity::High)
    }

    /// Returns true if any fidelity deviation is rated high.
    #[must_use]
    pub fn has_high_fidelity_deviation(&self) -> bool {
        self.high_fidelity_deviations().next().is_some()
    }

    /// Rejects deviations with blank descriptions.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        for (list, name) in [(&self.fidelity, "fidelity"), (&self.engagement, "engagement")] {
            for (i, deviation) in list.iter().enumerate() {
                if deviation.description.trim().is_empty() {
                    return Err(ContractViolation::field(
                        format!("{name}[{i}].description"),
                        "description is empty",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Numeric review scores on a 0-100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReviewScores {
    /// Faithfulness to the source.
    pub fidelity: f64,
    /// Expected audience engagement.
    pub engagement: f64,
}

impl ReviewScores {
    /// Both scores must fall in 0..=100.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        for (value, name) in [(self.fidelity, "fidelity"), (self.engagement, "engagement")] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ContractViolation::field(
                    name,
                    format!("score {value} is outside 0-100"),
                ));
            }
        }
        Ok(())
    }
}
