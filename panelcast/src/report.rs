//! Plain markdown summary of a run.

use std::fmt::Write as _;

use crate::contracts::FinalOutput;
use crate::core::{PipelineRun, StageArtifact, StageName};
use crate::store::select_current;
use crate::utils::format_secs;

/// Renders the run record and its current artifacts as markdown.
#[must_use]
pub fn render_report(run: &PipelineRun, artifacts: &[StageArtifact]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Pipeline run {}\n", run.run_id);
    let _ = writeln!(out, "- Source: {}", run.source);
    let _ = writeln!(out, "- Target duration: {}s", run.target_duration_secs);
    let _ = writeln!(out, "- Status: {:?}", run.status);
    let _ = writeln!(out, "- Created: {}", run.created_at.to_rfc3339());
    if let Some(finished) = run.finished_at {
        let _ = writeln!(out, "- Finished: {}", finished.to_rfc3339());
    }
    let _ = writeln!(out, "- Stage time: {}", format_secs(run.total_elapsed_ms()));

    if let Some(failure) = &run.failure {
        let _ = writeln!(out, "\n## Failure\n\n{failure}");
    }

    out.push_str("\n## Stages\n\n");
    out.push_str("| Stage | Version | Status | Attempts | Time | Reused |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for stage in StageName::ALL {
        match run.outcome(stage) {
            Some(o) => {
                let _ = writeln!(
                    out,
                    "| {stage} | {} | {:?} | {} | {} | {} |",
                    o.version,
                    o.status,
                    o.attempts,
                    format_secs(o.elapsed_ms),
                    if o.reused { "yes" } else { "no" }
                );
            }
            None => {
                let _ = writeln!(out, "| {stage} | - | not run | - | - | - |");
            }
        }
    }

    let degraded = run.degraded_aspects();
    if !degraded.is_empty() {
        out.push_str("\n## Degraded aspects\n\n");
        for aspect in degraded {
            let _ = writeln!(out, "- {aspect}");
        }
    }

    let final_output = select_current(
        artifacts
            .iter()
            .filter(|a| a.stage == StageName::Integrate)
            .cloned(),
    );
    if let Some(output) = final_output
        .as_ref()
        .and_then(|a| a.payload.as_ref())
        .and_then(|p| p.as_final())
    {
        render_final(&mut out, output);
    }
    out
}

fn render_final(out: &mut String, output: &FinalOutput) {
    out.push_str("\n## Titles\n\n");
    for title in output.ranked_titles() {
        let _ = writeln!(out, "{}. {}", title.rank, title.text);
    }

    out.push_str("\n## Script\n\n");
    for segment in &output.script.segments {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let secs = segment.start_secs.max(0.0) as u64;
        let _ = write!(out, "[{}:{:02}] {}", secs / 60, secs % 60, segment.narration.trim());
        if let Some(cue) = &segment.visual_cue {
            let _ = write!(out, " _({cue})_");
        }
        out.push('\n');
    }

    out.push_str("\n## Checks\n\n");
    for check in &output.validation.checks {
        let mark = if check.passed { "pass" } else { "FAIL" };
        let _ = writeln!(out, "- [{mark}] {}: {}", check.name, check.detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ScriptDraft, ScriptSegment, StagePayload, TitleCandidate, ValidationReport};
    use crate::core::{ArtifactStatus, ErrorKind, RunFailure, SourceRef, StageOutcome};

    #[test]
    fn test_failed_run_report() {
        let mut run = PipelineRun::new(SourceRef::new("/comics/issue.cbz"), 75);
        let artifact = StageArtifact::failed(
            run.run_id,
            StageName::Extract,
            ErrorKind::TransientUpstream,
            "timed out",
        );
        run.record(StageOutcome::from_artifact(&artifact, false));
        run.fail(RunFailure::new(
            Some(StageName::Extract),
            ErrorKind::TransientUpstream,
            "timed out",
        ));

        let report = render_report(&run, &[artifact]);
        assert!(report.contains("- Status: Failed"));
        assert!(report.contains("## Failure"));
        assert!(report.contains("| extract | 1 | Failed | 0 | 0.00s | no |"));
        assert!(report.contains("| review | - | not run | - | - | - |"));
        assert!(!report.contains("## Titles"));
    }

    #[test]
    fn test_final_output_is_rendered() {
        let run = PipelineRun::new(SourceRef::new("issue.cbz"), 75);
        let output = FinalOutput {
            script: ScriptDraft::new(vec![
                ScriptSegment::new(0.0, "Doom rises.").with_visual_cue("cover"),
                ScriptSegment::new(65.0, "The end."),
            ]),
            titles: vec![
                TitleCandidate {
                    rank: 2,
                    text: "Second".into(),
                    rationale: None,
                },
                TitleCandidate {
                    rank: 1,
                    text: "First".into(),
                    rationale: None,
                },
            ],
            validation: ValidationReport::default(),
        };
        let artifact = StageArtifact::resolved(run.run_id, StagePayload::Integrate(output), vec![]);
        assert_eq!(artifact.status, ArtifactStatus::Ok);

        let report = render_report(&run, &[artifact]);
        let first = report.find("1. First").unwrap();
        let second = report.find("2. Second").unwrap();
        assert!(first < second);
        assert!(report.contains("[0:00] Doom rises. _(cover)_"));
        assert!(report.contains("[1:05] The end."));
    }
}
