//! Side-effect-free application planning. Simulates every patch against the
//! working tree, then runs optional syntax / conflict / performance passes.
//! Nothing here writes a byte; the plan is the product.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::path::Path;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use forge_diff::UnifiedPatch;
use forge_diff::apply_patch;
use forge_protocol::analysis::BlastLevel;
use forge_protocol::decision::DryRunPlan;
use forge_protocol::decision::PlanAction;
use forge_protocol::decision::PlanStep;
use forge_protocol::decision::PlanSummary;
use forge_protocol::decision::StepStatus;

use crate::validate::validate_files;

/// Changes above this many lines downgrade a successful step to a warning.
const LARGE_CHANGE_LINES: usize = 100;

#[derive(Debug, Clone, Copy)]
pub struct DryRunOptions {
    pub validate_syntax: bool,
    pub check_conflicts: bool,
    pub estimate_performance: bool,
}

impl Default for DryRunOptions {
    fn default() -> Self {
        DryRunOptions {
            validate_syntax: true,
            check_conflicts: true,
            estimate_performance: false,
        }
    }
}

/// Simulate applying `patches` under `root`. Cancellation returns the plan
/// accumulated so far with `cancelled` set.
pub fn simulate(
    root: &Path,
    patches: &[UnifiedPatch],
    options: &DryRunOptions,
    cancel: Option<&CancellationToken>,
) -> DryRunPlan {
    let mut steps: Vec<PlanStep> = Vec::new();
    let mut post_images: Vec<(String, String)> = Vec::new();
    let mut cancelled = false;

    for patch in patches {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            debug!("dry run cancelled; returning accumulated plan");
            cancelled = true;
            break;
        }
        let step = simulate_patch(root, patch, steps.len(), &mut post_images);
        steps.push(step);
    }

    if !cancelled {
        if options.check_conflicts {
            steps.push(conflict_step(patches, steps.len()));
        }
        if options.validate_syntax && !post_images.is_empty() {
            steps.push(syntax_step(&post_images, steps.len()));
        }
        if options.estimate_performance {
            steps.push(performance_step(patches, steps.len()));
        }
    }

    let success = steps.iter().all(|s| s.status != StepStatus::Error);
    let summary = summarise(patches, &steps);
    let impact = estimate_impact(patches);
    let rollback_plan = rollback_plan(patches);

    DryRunPlan {
        steps,
        summary,
        success,
        rollback_plan,
        impact,
        cancelled,
    }
}

fn simulate_patch(
    root: &Path,
    patch: &UnifiedPatch,
    index: usize,
    post_images: &mut Vec<(String, String)>,
) -> PlanStep {
    let target = root.join(&patch.filename);
    let exists = target.is_file();
    let lines_changed = patch.lines_changed();

    let mut details = BTreeMap::new();
    details.insert("lines_changed".to_string(), lines_changed.to_string());

    let (action, status, message) = if patch.is_new {
        if exists {
            (
                PlanAction::Create,
                StepStatus::Error,
                format!("{} already exists", patch.filename),
            )
        } else {
            match apply_patch("", patch) {
                Ok(content) => {
                    post_images.push((patch.filename.clone(), content));
                    (
                        PlanAction::Create,
                        StepStatus::Success,
                        format!("create {} ({lines_changed} lines)", patch.filename),
                    )
                }
                Err(e) => (PlanAction::Create, StepStatus::Error, e.to_string()),
            }
        }
    } else if patch.is_deleted {
        if exists {
            (
                PlanAction::Delete,
                StepStatus::Success,
                format!("delete {}", patch.filename),
            )
        } else {
            (
                PlanAction::Delete,
                StepStatus::Error,
                format!("{} does not exist", patch.filename),
            )
        }
    } else if !exists {
        (
            PlanAction::Modify,
            StepStatus::Error,
            format!("{} does not exist", patch.filename),
        )
    } else {
        match std::fs::read_to_string(&target) {
            Ok(current) => match apply_patch(&current, patch) {
                Ok(next) => {
                    post_images.push((patch.filename.clone(), next));
                    (
                        PlanAction::Modify,
                        StepStatus::Success,
                        format!("modify {} ({lines_changed} lines)", patch.filename),
                    )
                }
                Err(e) => (
                    PlanAction::Modify,
                    StepStatus::Error,
                    format!("patch does not apply: {e}"),
                ),
            },
            Err(e) => (
                PlanAction::Modify,
                StepStatus::Error,
                format!("unreadable target: {e}"),
            ),
        }
    };

    let status = if status == StepStatus::Success && lines_changed > LARGE_CHANGE_LINES {
        details.insert(
            "downgrade".to_string(),
            format!("change exceeds {LARGE_CHANGE_LINES} lines"),
        );
        StepStatus::Warning
    } else {
        status
    };

    PlanStep {
        index,
        action,
        target: patch.filename.clone(),
        status,
        message,
        details,
    }
}

fn conflict_step(patches: &[UnifiedPatch], index: usize) -> PlanStep {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let mut deleted: BTreeSet<&str> = BTreeSet::new();
    let mut modified: BTreeSet<&str> = BTreeSet::new();
    for patch in patches {
        *seen.entry(patch.filename.as_str()).or_insert(0) += 1;
        if patch.is_deleted {
            deleted.insert(patch.filename.as_str());
        } else {
            modified.insert(patch.filename.as_str());
        }
    }

    let mut conflicts: Vec<String> = seen
        .iter()
        .filter(|(_, count)| **count > 1)
        .map(|(name, count)| format!("{name} is targeted by {count} patches"))
        .collect();
    conflicts.extend(
        deleted
            .intersection(&modified)
            .map(|name| format!("{name} is both deleted and modified")),
    );
    conflicts.sort();

    if conflicts.is_empty() {
        PlanStep {
            index,
            action: PlanAction::CheckConflicts,
            target: "*".to_string(),
            status: StepStatus::Success,
            message: "no conflicting patches".to_string(),
            details: BTreeMap::new(),
        }
    } else {
        PlanStep {
            index,
            action: PlanAction::CheckConflicts,
            target: "*".to_string(),
            status: StepStatus::Error,
            message: conflicts.join("; "),
            details: BTreeMap::new(),
        }
    }
}

fn syntax_step(post_images: &[(String, String)], index: usize) -> PlanStep {
    let report = validate_files(post_images);
    let status = if report.has_errors() {
        StepStatus::Error
    } else if report.total_warnings() > 0 {
        StepStatus::Warning
    } else {
        StepStatus::Success
    };
    let message = if report.has_errors() {
        format!("post-image validation failed: {}", report.error_summary())
    } else {
        format!(
            "post-images valid ({} warnings)",
            report.total_warnings()
        )
    };
    PlanStep {
        index,
        action: PlanAction::ValidateSyntax,
        target: "*".to_string(),
        status,
        message,
        details: BTreeMap::new(),
    }
}

fn performance_step(patches: &[UnifiedPatch], index: usize) -> PlanStep {
    // Synthetic estimate: write time scales with change volume.
    let lines: usize = patches.iter().map(UnifiedPatch::lines_changed).sum();
    let estimate_ms = 5 + lines / 50;
    let mut details = BTreeMap::new();
    details.insert("estimated_ms".to_string(), estimate_ms.to_string());
    PlanStep {
        index,
        action: PlanAction::EstimatePerformance,
        target: "*".to_string(),
        status: StepStatus::Success,
        message: format!("estimated application time {estimate_ms}ms"),
        details,
    }
}

fn summarise(patches: &[UnifiedPatch], steps: &[PlanStep]) -> PlanSummary {
    let files: BTreeSet<&str> = patches.iter().map(|p| p.filename.as_str()).collect();
    PlanSummary {
        steps_total: steps.len(),
        files_affected: files.len(),
        lines_changed: patches.iter().map(UnifiedPatch::lines_changed).sum(),
    }
}

fn estimate_impact(patches: &[UnifiedPatch]) -> BlastLevel {
    let lines: usize = patches.iter().map(UnifiedPatch::lines_changed).sum();
    let deletions = patches.iter().any(|p| p.is_deleted);
    if patches.len() > 5 || lines > 200 {
        BlastLevel::High
    } else if patches.len() > 1 || lines > 20 || deletions {
        BlastLevel::Medium
    } else {
        BlastLevel::Low
    }
}

fn rollback_plan(patches: &[UnifiedPatch]) -> String {
    let mut lines: Vec<String> = patches
        .iter()
        .rev()
        .map(|p| {
            if p.is_new {
                format!("delete created file {}", p.filename)
            } else if p.is_deleted {
                format!("restore deleted file {} from its backup", p.filename)
            } else {
                format!("restore {} from its backup", p.filename)
            }
        })
        .collect();
    lines.push(
        "Recorded per-application backups allow byte-exact restoration of every target.".to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use forge_diff::compute_patch;
    use pretty_assertions::assert_eq;

    fn seeded_root() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("existing.txt"), "one\ntwo\nthree\n").unwrap();
        dir
    }

    #[test]
    fn empty_patch_set_succeeds_with_zero_steps() {
        let dir = seeded_root();
        let plan = simulate(
            dir.path(),
            &[],
            &DryRunOptions {
                validate_syntax: true,
                check_conflicts: false,
                estimate_performance: false,
            },
            None,
        );
        assert!(plan.success);
        assert_eq!(plan.summary.files_affected, 0);
        assert!(plan.steps.iter().all(|s| s.action != PlanAction::Modify));
    }

    #[test]
    fn modify_of_existing_file_plans_cleanly() {
        let dir = seeded_root();
        let patch = compute_patch("existing.txt", "one\ntwo\nthree\n", "one\nTWO\nthree\n", 3);
        let plan = simulate(dir.path(), &[patch], &DryRunOptions::default(), None);
        assert!(plan.success, "plan: {plan:?}");
        assert_eq!(plan.steps[0].action, PlanAction::Modify);
        assert_eq!(plan.steps[0].status, StepStatus::Success);
        assert_eq!(plan.summary.files_affected, 1);
    }

    #[test]
    fn create_requires_target_absent() {
        let dir = seeded_root();
        let ok = UnifiedPatch::new_file("fresh.txt", "hello\n");
        let clash = UnifiedPatch::new_file("existing.txt", "hello\n");
        let plan = simulate(dir.path(), &[ok, clash], &DryRunOptions::default(), None);
        assert!(!plan.success);
        assert_eq!(plan.steps[0].status, StepStatus::Success);
        assert_eq!(plan.steps[1].status, StepStatus::Error);
    }

    #[test]
    fn delete_requires_target_present() {
        let dir = seeded_root();
        let missing = UnifiedPatch::delete_file("ghost.txt", "x\n");
        let plan = simulate(dir.path(), &[missing], &DryRunOptions::default(), None);
        assert!(!plan.success);
        assert_eq!(plan.steps[0].action, PlanAction::Delete);
    }

    #[test]
    fn inapplicable_patch_is_an_error_step() {
        let dir = seeded_root();
        let drifted = compute_patch("existing.txt", "totally\ndifferent\n", "other\n", 3);
        let plan = simulate(dir.path(), &[drifted], &DryRunOptions::default(), None);
        assert!(!plan.success);
        assert!(plan.steps[0].message.contains("does not apply"));
    }

    #[test]
    fn large_changes_downgrade_to_warning() {
        let dir = seeded_root();
        let big: String = (0..150).map(|i| format!("line {i}\n")).collect();
        let patch = UnifiedPatch::new_file("big.txt", &big);
        let plan = simulate(
            dir.path(),
            &[patch],
            &DryRunOptions {
                validate_syntax: false,
                check_conflicts: false,
                estimate_performance: false,
            },
            None,
        );
        assert!(plan.success);
        assert_eq!(plan.steps[0].status, StepStatus::Warning);
    }

    #[test]
    fn duplicate_targets_are_conflicts() {
        let dir = seeded_root();
        let a = compute_patch("existing.txt", "one\ntwo\nthree\n", "ONE\ntwo\nthree\n", 3);
        let b = compute_patch("existing.txt", "one\ntwo\nthree\n", "one\ntwo\nTHREE\n", 3);
        let plan = simulate(dir.path(), &[a, b], &DryRunOptions::default(), None);
        assert!(!plan.success);
        let conflict = plan
            .steps
            .iter()
            .find(|s| s.action == PlanAction::CheckConflicts)
            .unwrap();
        assert_eq!(conflict.status, StepStatus::Error);
        assert!(conflict.message.contains("2 patches"));
    }

    #[test]
    fn delete_plus_modify_is_a_conflict() {
        let dir = seeded_root();
        let del = UnifiedPatch::delete_file("existing.txt", "one\ntwo\nthree\n");
        let modify = compute_patch("existing.txt", "one\ntwo\nthree\n", "one\nX\nthree\n", 3);
        let plan = simulate(dir.path(), &[del, modify], &DryRunOptions::default(), None);
        let conflict = plan
            .steps
            .iter()
            .find(|s| s.action == PlanAction::CheckConflicts)
            .unwrap();
        assert!(conflict.message.contains("both deleted and modified"));
    }

    #[test]
    fn syntax_pass_catches_broken_post_image() {
        let dir = seeded_root();
        let patch = UnifiedPatch::new_file("broken.json", "{\"a\": 1,,}\n");
        let plan = simulate(dir.path(), &[patch], &DryRunOptions::default(), None);
        assert!(!plan.success);
        let syntax = plan
            .steps
            .iter()
            .find(|s| s.action == PlanAction::ValidateSyntax)
            .unwrap();
        assert_eq!(syntax.status, StepStatus::Error);
    }

    #[test]
    fn cancellation_returns_partial_plan() {
        let dir = seeded_root();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let patch = UnifiedPatch::new_file("fresh.txt", "x\n");
        let plan = simulate(dir.path(), &[patch], &DryRunOptions::default(), Some(&cancel));
        assert!(plan.cancelled);
        assert!(plan.steps.is_empty());
    }

    #[test]
    fn rollback_plan_reverses_order() {
        let dir = seeded_root();
        let a = UnifiedPatch::new_file("a.txt", "x\n");
        let b = UnifiedPatch::delete_file("existing.txt", "one\ntwo\nthree\n");
        let plan = simulate(dir.path(), &[a, b], &DryRunOptions::default(), None);
        let first = plan.rollback_plan.lines().next().unwrap();
        assert!(first.contains("existing.txt"));
        assert!(plan.rollback_plan.contains("backups"));
    }

    #[test]
    fn performance_estimate_is_attached_when_requested() {
        let dir = seeded_root();
        let patch = UnifiedPatch::new_file("fresh.txt", "x\n");
        let plan = simulate(
            dir.path(),
            &[patch],
            &DryRunOptions {
                estimate_performance: true,
                ..DryRunOptions::default()
            },
            None,
        );
        assert!(plan
            .steps
            .iter()
            .any(|s| s.action == PlanAction::EstimatePerformance));
    }
}
