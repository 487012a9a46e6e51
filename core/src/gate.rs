//! The confidence gate: a pure decision function mapping the analysis score
//! and risk flags to auto-apply / manual-review / escalate / reject. First
//! matching clause wins; thresholds are inclusive, so a score exactly on a
//! boundary selects the higher tier.

use forge_diff::UnifiedPatch;
use forge_protocol::decision::GateAction;
use forge_protocol::decision::GateDecision;

use crate::config::GateConfig;
use crate::validate::ValidationReport;

const SECURITY_LEXICON: [&str; 8] = [
    "auth",
    "secret",
    "password",
    "token",
    "credential",
    "permission",
    "access",
    "security",
];

const PERFORMANCE_LEXICON: [&str; 5] = [
    "cache",
    "database",
    "query",
    "optimization",
    "performance",
];

const CRITICAL_PATHS: [&str; 5] = [
    "package.json",
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    ".github/workflows",
];

const MAX_FILES_BEFORE_RISK: usize = 5;
const MAX_NEW_FILES_BEFORE_RISK: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct GateInput<'a> {
    /// Combined confidence score in [0, 1].
    pub score: f64,
    /// True when the primary failure severity is critical.
    pub is_critical_failure: bool,
    pub validation: Option<&'a ValidationReport>,
    pub patches: &'a [UnifiedPatch],
}

fn matches_lexicon(path: &str, lexicon: &[&str]) -> bool {
    let lower = path.to_lowercase();
    lexicon.iter().any(|term| lower.contains(term))
}

fn is_index_entry_point(path: &str) -> bool {
    let lower = path.to_lowercase();
    let name = lower.rsplit('/').next().unwrap_or(&lower);
    name.starts_with("index.") || name.starts_with("main.")
}

/// Decide what to do with a proposed patch set. Pure: the result depends
/// only on the input and the configured thresholds.
pub fn decide(config: &GateConfig, input: &GateInput<'_>) -> GateDecision {
    let risks = collect_risks(input);
    let touched: Vec<&str> = input.patches.iter().map(|p| p.filename.as_str()).collect();

    let (action, reasoning) = decide_action(config, input, &touched);
    let recommendations = recommend(action, &risks);

    GateDecision {
        action,
        confidence: input.score,
        reasoning,
        risks,
        recommendations,
    }
}

fn decide_action(
    config: &GateConfig,
    input: &GateInput<'_>,
    touched: &[&str],
) -> (GateAction, String) {
    if let Some(report) = input.validation {
        if report.has_errors() {
            return (
                GateAction::Reject,
                format!("validation reported errors: {}", report.error_summary()),
            );
        }
    }

    if config.requires_security_review {
        if let Some(path) = touched.iter().find(|p| matches_lexicon(p, &SECURITY_LEXICON)) {
            return (
                GateAction::ManualReview,
                format!("security review required: '{path}' matches the security lexicon"),
            );
        }
    }

    if config.requires_performance_review {
        if let Some(path) = touched
            .iter()
            .find(|p| matches_lexicon(p, &PERFORMANCE_LEXICON) || is_index_entry_point(p))
        {
            return (
                GateAction::ManualReview,
                format!("performance review required: '{path}' matches the performance lexicon"),
            );
        }
    }

    if input.score >= config.auto_apply_threshold {
        if input.is_critical_failure && !config.allow_auto_apply_on_critical {
            // Never a silent downgrade: the reason is recorded here.
            return (
                GateAction::ManualReview,
                format!(
                    "score {:.2} qualifies for auto-apply, downgraded because the failure \
                     is critical and auto-apply on critical failures is disabled",
                    input.score
                ),
            );
        }
        return (
            GateAction::AutoApply,
            format!(
                "score {:.2} meets the auto-apply threshold {:.2}",
                input.score, config.auto_apply_threshold
            ),
        );
    }

    if input.score >= config.manual_review_threshold {
        return (
            GateAction::ManualReview,
            format!(
                "score {:.2} meets the manual-review threshold {:.2}",
                input.score, config.manual_review_threshold
            ),
        );
    }

    if input.score >= config.escalate_threshold {
        return (
            GateAction::Escalate,
            format!(
                "score {:.2} meets only the escalation threshold {:.2}",
                input.score, config.escalate_threshold
            ),
        );
    }

    (
        GateAction::Reject,
        format!("score {:.2} is below every threshold", input.score),
    )
}

fn collect_risks(input: &GateInput<'_>) -> Vec<String> {
    let mut risks = Vec::new();

    if let Some(report) = input.validation {
        let warnings = report.total_warnings();
        if warnings > 0 {
            risks.push(format!("{warnings} validation warning(s)"));
        }
    }

    for patch in input.patches {
        let lower = patch.filename.to_lowercase();
        if CRITICAL_PATHS.iter().any(|c| lower.contains(c))
            || lower.ends_with("cargo.lock")
            || is_index_entry_point(&lower)
        {
            risks.push(format!("touches critical path '{}'", patch.filename));
        }
    }

    if input.patches.len() > MAX_FILES_BEFORE_RISK {
        risks.push(format!("large change set: {} files", input.patches.len()));
    }

    let deletions = input.patches.iter().filter(|p| p.is_deleted).count();
    if deletions > 0 {
        risks.push(format!("{deletions} file deletion(s)"));
    }

    let creations = input.patches.iter().filter(|p| p.is_new).count();
    if creations > MAX_NEW_FILES_BEFORE_RISK {
        risks.push(format!("{creations} new files"));
    }

    risks
}

fn recommend(action: GateAction, risks: &[String]) -> Vec<String> {
    let mut recommendations = Vec::new();
    match action {
        GateAction::AutoApply => {
            recommendations.push("Patch will be applied automatically with rollback support.".to_string());
        }
        GateAction::ManualReview => {
            recommendations.push("Review the proposed diff before applying.".to_string());
        }
        GateAction::Escalate => {
            recommendations.push("Confidence is low; route to a human owner of this pipeline.".to_string());
        }
        GateAction::Reject => {
            recommendations.push("Do not apply; regenerate the fix or investigate manually.".to_string());
        }
    }
    if !risks.is_empty() {
        recommendations.push(format!("Weigh the recorded risks: {}", risks.join("; ")));
    }
    recommendations
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::validate::validate_files;
    use pretty_assertions::assert_eq;

    fn patch(name: &str) -> UnifiedPatch {
        forge_diff::compute_patch(name, "a\n", "b\n", 3)
    }

    fn input<'a>(score: f64, patches: &'a [UnifiedPatch]) -> GateInput<'a> {
        GateInput {
            score,
            is_critical_failure: false,
            validation: None,
            patches,
        }
    }

    #[test]
    fn validation_errors_always_reject() {
        let report = validate_files(&[("x.json".to_string(), "{broken".to_string())]);
        let patches = [patch("src/app.ts")];
        let decision = decide(
            &GateConfig::default(),
            &GateInput {
                score: 0.99,
                is_critical_failure: false,
                validation: Some(&report),
                patches: &patches,
            },
        );
        assert_eq!(decision.action, GateAction::Reject);
    }

    #[test]
    fn security_lexicon_forces_manual_review() {
        let patches = [patch("src/auth/session.ts")];
        let decision = decide(&GateConfig::default(), &input(0.99, &patches));
        assert_eq!(decision.action, GateAction::ManualReview);
        assert!(decision.reasoning.contains("security"));
    }

    #[test]
    fn performance_lexicon_is_opt_in() {
        let patches = [patch("src/cache/layer.ts")];
        let decision = decide(&GateConfig::default(), &input(0.95, &patches));
        assert_eq!(decision.action, GateAction::AutoApply);

        let config = GateConfig {
            requires_performance_review: true,
            ..GateConfig::default()
        };
        let decision = decide(&config, &input(0.95, &patches));
        assert_eq!(decision.action, GateAction::ManualReview);
    }

    #[test]
    fn thresholds_are_inclusive() {
        let patches = [patch("src/app.ts")];
        let config = GateConfig::default();
        assert_eq!(decide(&config, &input(0.9, &patches)).action, GateAction::AutoApply);
        assert_eq!(decide(&config, &input(0.6, &patches)).action, GateAction::ManualReview);
        assert_eq!(decide(&config, &input(0.3, &patches)).action, GateAction::Escalate);
        assert_eq!(decide(&config, &input(0.29, &patches)).action, GateAction::Reject);
    }

    #[test]
    fn zero_score_always_rejects() {
        let patches = [patch("src/app.ts")];
        assert_eq!(
            decide(&GateConfig::default(), &input(0.0, &patches)).action,
            GateAction::Reject
        );
    }

    #[test]
    fn critical_failure_downgrades_auto_apply_with_reason() {
        let patches = [patch("src/app.ts")];
        let decision = decide(
            &GateConfig::default(),
            &GateInput {
                score: 1.0,
                is_critical_failure: true,
                validation: None,
                patches: &patches,
            },
        );
        assert_eq!(decision.action, GateAction::ManualReview);
        assert!(decision.reasoning.contains("downgraded"));

        let permissive = GateConfig {
            allow_auto_apply_on_critical: true,
            ..GateConfig::default()
        };
        let decision = decide(
            &permissive,
            &GateInput {
                score: 1.0,
                is_critical_failure: true,
                validation: None,
                patches: &patches,
            },
        );
        assert_eq!(decision.action, GateAction::AutoApply);
    }

    #[test]
    fn risk_enrichment_flags_critical_paths_and_size() {
        let mut patches: Vec<UnifiedPatch> = (0..6)
            .map(|i| patch(&format!("src/mod{i}.ts")))
            .collect();
        patches.push(patch("package.json"));
        patches.push(UnifiedPatch::delete_file("old.ts", "gone\n"));
        let decision = decide(&GateConfig::default(), &input(0.95, &patches));
        assert!(decision.risks.iter().any(|r| r.contains("package.json")));
        assert!(decision.risks.iter().any(|r| r.contains("large change set")));
        assert!(decision.risks.iter().any(|r| r.contains("deletion")));
    }

    #[test]
    fn decision_is_a_pure_function_of_its_input() {
        let patches = [patch("src/app.ts")];
        let config = GateConfig::default();
        let first = decide(&config, &input(0.75, &patches));
        let second = decide(&config, &input(0.75, &patches));
        assert_eq!(first, second);
    }
}
