//! Blast-radius estimation: maps a classified failure to the scope of its
//! downstream effect. Escalation is monotone and bounded at `High`.

use std::collections::BTreeSet;

use forge_protocol::analysis::BlastLevel;
use forge_protocol::analysis::BlastRadius;
use forge_protocol::analysis::FailureEvent;
use forge_protocol::analysis::FailureType;
use forge_protocol::analysis::WorkflowMetadata;

/// Step-name keywords that widen the estimate by one level.
const ESCALATING_STEP_KEYWORDS: [&str; 8] = [
    "setup",
    "build",
    "compile",
    "deploy",
    "publish",
    "release",
    "authenticate",
    "login",
];

fn base_level(failure_type: FailureType) -> BlastLevel {
    match failure_type {
        FailureType::Build | FailureType::Deploy | FailureType::Auth => BlastLevel::High,
        FailureType::Test
        | FailureType::Env
        | FailureType::Network
        | FailureType::Timeout
        | FailureType::Unknown => BlastLevel::Medium,
        FailureType::Lint => BlastLevel::Low,
    }
}

pub fn estimate(event: &FailureEvent, metadata: Option<&WorkflowMetadata>) -> BlastRadius {
    let mut level = base_level(event.failure_type);
    let mut affected_areas: BTreeSet<String> = BTreeSet::new();
    let mut dependents: Vec<String> = Vec::new();
    let mut risk_factors: Vec<String> = Vec::new();

    let step_lower = event.step.to_lowercase();
    if ESCALATING_STEP_KEYWORDS.iter().any(|k| step_lower.contains(k)) {
        level = level.escalated();
        risk_factors.push(format!("failure occurred in pivotal step '{}'", event.step));
    }

    match event.failure_type {
        FailureType::Auth => {
            affected_areas.insert("authentication-layer".to_string());
            risk_factors.push("credentials or permissions are involved".to_string());
        }
        FailureType::Build => {
            affected_areas.insert("build-pipeline".to_string());
            risk_factors.push("everything downstream of the build is blocked".to_string());
        }
        FailureType::Deploy => {
            affected_areas.insert("deployment".to_string());
            risk_factors.push("a deployment target may be in a partial state".to_string());
        }
        FailureType::Test => {
            affected_areas.insert("test-suite".to_string());
        }
        FailureType::Env => {
            affected_areas.insert("runner-environment".to_string());
        }
        _ => {}
    }

    if let Some(meta) = metadata {
        if meta.matrix_size > 1 {
            affected_areas.insert("matrix-jobs".to_string());
            risk_factors.push(format!("{} parallel matrix jobs share this failure", meta.matrix_size));
        }
        if !meta.dependent_jobs.is_empty() {
            risk_factors.push(format!("{} dependent jobs will not run", meta.dependent_jobs.len()));
            dependents.extend(meta.dependent_jobs.iter().cloned());
        }
        if meta.critical_path {
            level = level.escalated();
            risk_factors.push("the failing job is on the workflow's critical path".to_string());
        }
    }

    // Deploy failures always carry the widest scope.
    if event.failure_type == FailureType::Deploy {
        level = BlastLevel::High;
    }

    let reasoning = format!(
        "A {} failure in step '{}' has an estimated {} blast radius{}{}",
        event.failure_type,
        event.step,
        level,
        if dependents.is_empty() {
            String::new()
        } else {
            format!(", blocking {} dependent job(s)", dependents.len())
        },
        if risk_factors.is_empty() {
            ".".to_string()
        } else {
            format!(": {}.", risk_factors.join("; "))
        },
    );

    BlastRadius {
        level,
        affected_areas,
        dependents,
        risk_factors,
        reasoning,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use forge_protocol::analysis::Severity;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn event(failure_type: FailureType, step: &str) -> FailureEvent {
        FailureEvent {
            failure_type,
            severity: Severity::Error,
            message: "boom".to_string(),
            line_number: 1,
            step: step.to_string(),
            context: HashMap::new(),
            stack_trace: None,
        }
    }

    #[test]
    fn lint_failures_are_low_impact() {
        let radius = estimate(&event(FailureType::Lint, "lint"), None);
        assert_eq!(radius.level, BlastLevel::Low);
    }

    #[test]
    fn auth_failures_tag_the_authentication_layer() {
        let radius = estimate(&event(FailureType::Auth, "run tests"), None);
        assert_eq!(radius.level, BlastLevel::High);
        assert!(radius.affected_areas.contains("authentication-layer"));
    }

    #[test]
    fn pivotal_step_names_escalate_one_level() {
        let plain = estimate(&event(FailureType::Test, "run unit tests"), None);
        let pivotal = estimate(&event(FailureType::Test, "Build and package"), None);
        assert_eq!(plain.level, BlastLevel::Medium);
        assert_eq!(pivotal.level, BlastLevel::High);
    }

    #[test]
    fn escalation_is_bounded_at_high() {
        let meta = WorkflowMetadata {
            matrix_size: 4,
            dependent_jobs: vec!["deploy".to_string()],
            critical_path: true,
        };
        let radius = estimate(&event(FailureType::Build, "compile"), Some(&meta));
        assert_eq!(radius.level, BlastLevel::High);
        assert_eq!(radius.dependents, vec!["deploy".to_string()]);
        assert!(radius.affected_areas.contains("matrix-jobs"));
    }

    #[test]
    fn deploy_failures_pin_high() {
        let radius = estimate(&event(FailureType::Deploy, "notify"), None);
        assert_eq!(radius.level, BlastLevel::High);
    }

    #[test]
    fn reasoning_is_a_single_paragraph() {
        let radius = estimate(&event(FailureType::Env, "setup toolchain"), None);
        assert!(!radius.reasoning.contains('\n'));
        assert!(radius.reasoning.contains("setup toolchain"));
    }
}
