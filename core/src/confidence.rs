//! Confidence scoring for a classified failure.
//!
//! Three graded signals are averaged: the matched rule's confidence
//! modifier (0.5 when only the generic fallback fired), a severity
//! alignment table, and a per-type certainty table. Context richness and
//! stack-trace presence are additive bonuses on top of that mean. The
//! result is capped at 1.0 and rounded to two decimals.

use forge_protocol::analysis::ConfidenceFactor;
use forge_protocol::analysis::ConfidenceMetrics;
use forge_protocol::analysis::FailureType;
use forge_protocol::analysis::Severity;
use forge_protocol::analysis::SuggestedAction;

use crate::rules::ClassifiedEvent;
use crate::rules::MIN_TRACE_LEN;

const AUTO_FIX_THRESHOLD: f64 = 0.9;
const ESCALATE_THRESHOLD: f64 = 0.6;
const CONTEXT_BONUS_CAP: f64 = 0.3;
const STACK_TRACE_BONUS: f64 = 0.2;
const BOOST_CAP: f64 = 0.2;
const BOOST_PER_SIGNAL: f64 = 0.05;

fn severity_alignment(severity: Severity) -> f64 {
    match severity {
        Severity::Info => 0.40,
        Severity::Warning => 0.65,
        Severity::Error => 0.85,
        Severity::Critical => 0.95,
    }
}

fn type_certainty(failure_type: FailureType) -> f64 {
    match failure_type {
        FailureType::Auth => 0.95,
        FailureType::Env => 0.92,
        FailureType::Build => 0.90,
        FailureType::Deploy => 0.88,
        FailureType::Test => 0.85,
        FailureType::Timeout => 0.80,
        FailureType::Lint => 0.75,
        FailureType::Network => 0.70,
        FailureType::Unknown => 0.30,
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Score one classified event.
pub fn score(classified: &ClassifiedEvent) -> ConfidenceMetrics {
    let event = &classified.event;

    let rule_weight = if classified.fallback {
        0.5
    } else {
        classified.confidence_modifier
    };
    let severity_weight = severity_alignment(event.severity);
    let type_weight = type_certainty(event.failure_type);

    let context_weight = (0.1 * event.context.len() as f64).min(CONTEXT_BONUS_CAP);
    let has_trace = event
        .stack_trace
        .as_deref()
        .is_some_and(|t| t.len() > MIN_TRACE_LEN);
    let trace_weight = if has_trace { STACK_TRACE_BONUS } else { 0.0 };

    let factors = vec![
        ConfidenceFactor {
            name: "rule-match".to_string(),
            weight: rule_weight,
            matched: !classified.fallback,
            reason: if classified.fallback {
                "only the generic fallback rule fired".to_string()
            } else {
                format!("rule {} matched", classified.rule_id)
            },
        },
        ConfidenceFactor {
            name: "severity-alignment".to_string(),
            weight: severity_weight,
            matched: true,
            reason: format!("severity {}", event.severity),
        },
        ConfidenceFactor {
            name: "context-richness".to_string(),
            weight: context_weight,
            matched: !event.context.is_empty(),
            reason: format!("{} context keys extracted", event.context.len()),
        },
        ConfidenceFactor {
            name: "type-certainty".to_string(),
            weight: type_weight,
            matched: true,
            reason: format!("failure type {}", event.failure_type),
        },
        ConfidenceFactor {
            name: "stack-trace".to_string(),
            weight: trace_weight,
            matched: has_trace,
            reason: if has_trace {
                "non-trivial stack trace attached".to_string()
            } else {
                "no stack trace".to_string()
            },
        },
    ];

    let base = (rule_weight + severity_weight + type_weight) / 3.0;
    let score = round2((base + context_weight + trace_weight).min(1.0));

    ConfidenceMetrics {
        score,
        factors,
        suggested_action: suggested_action(score),
    }
}

fn suggested_action(score: f64) -> SuggestedAction {
    if score >= AUTO_FIX_THRESHOLD {
        SuggestedAction::AutoFix
    } else if score < ESCALATE_THRESHOLD {
        SuggestedAction::Escalate
    } else {
        SuggestedAction::ManualReview
    }
}

/// Add up to [`BOOST_CAP`] for externally supplied boolean context signals
/// (e.g. "the workflow is missing the setting the fix would add").
pub fn boost(metrics: &ConfidenceMetrics, signals: &[(&str, bool)]) -> ConfidenceMetrics {
    let confirmed = signals.iter().filter(|(_, on)| *on).count();
    let bonus = (confirmed as f64 * BOOST_PER_SIGNAL).min(BOOST_CAP);
    let score = round2((metrics.score + bonus).min(1.0));
    let mut boosted = metrics.clone();
    boosted.score = score;
    boosted.suggested_action = suggested_action(score);
    if bonus > 0.0 {
        boosted.factors.push(ConfidenceFactor {
            name: "context-signals".to_string(),
            weight: bonus,
            matched: true,
            reason: format!("{confirmed} corroborating signals"),
        });
    }
    boosted
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use forge_protocol::analysis::FailureEvent;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn classified(
        failure_type: FailureType,
        severity: Severity,
        modifier: f64,
        fallback: bool,
        context_keys: usize,
        trace: Option<&str>,
    ) -> ClassifiedEvent {
        let context: HashMap<String, String> = (0..context_keys)
            .map(|i| (format!("k{i}"), "v".to_string()))
            .collect();
        ClassifiedEvent {
            event: FailureEvent {
                failure_type,
                severity,
                message: "boom".to_string(),
                line_number: 1,
                step: "unknown".to_string(),
                context,
                stack_trace: trace.map(str::to_string),
            },
            rule_id: "test-rule",
            confidence_modifier: modifier,
            fallback,
        }
    }

    #[test]
    fn auth_error_with_context_scores_high() {
        let event = classified(FailureType::Auth, Severity::Error, 0.9, false, 2, None);
        let metrics = score(&event);
        assert!(metrics.score >= 0.9, "got {}", metrics.score);
        assert_eq!(metrics.suggested_action, SuggestedAction::AutoFix);
    }

    #[test]
    fn score_is_rounded_to_two_decimals() {
        let event = classified(FailureType::Build, Severity::Error, 0.85, false, 0, None);
        let metrics = score(&event);
        assert_eq!(metrics.score, round2(metrics.score));
        assert_eq!(metrics.score, 0.87);
    }

    #[test]
    fn fallback_only_match_escalates() {
        let event = classified(FailureType::Unknown, Severity::Error, 0.5, true, 0, None);
        let metrics = score(&event);
        assert_eq!(metrics.score, 0.55);
        assert_eq!(metrics.suggested_action, SuggestedAction::Escalate);
    }

    #[test]
    fn stack_trace_bonus_requires_non_trivial_trace() {
        let short = classified(FailureType::Test, Severity::Error, 0.85, false, 0, Some("x"));
        let long_trace = "a".repeat(80);
        let long = classified(
            FailureType::Test,
            Severity::Error,
            0.85,
            false,
            0,
            Some(&long_trace),
        );
        assert!(score(&long).score > score(&short).score);
    }

    #[test]
    fn context_bonus_is_capped() {
        let few = classified(FailureType::Test, Severity::Error, 0.85, false, 3, None);
        let many = classified(FailureType::Test, Severity::Error, 0.85, false, 10, None);
        assert_eq!(score(&few).score, score(&many).score);
    }

    #[test]
    fn score_never_exceeds_one() {
        let trace = "at f (x.js:1:1)\n".repeat(10);
        let event = classified(
            FailureType::Auth,
            Severity::Critical,
            0.95,
            false,
            5,
            Some(&trace),
        );
        let metrics = score(&event);
        assert!(metrics.score <= 1.0);
        let boosted = boost(&metrics, &[("a", true), ("b", true)]);
        assert!(boosted.score <= 1.0);
    }

    #[test]
    fn boost_is_capped_at_twenty_points() {
        let event = classified(FailureType::Network, Severity::Warning, 0.8, false, 0, None);
        let base = score(&event);
        let signals: Vec<(&str, bool)> = vec![("a", true); 10];
        let boosted = boost(&base, &signals);
        assert_eq!(boosted.score, round2((base.score + 0.2).min(1.0)));
    }

    #[test]
    fn exact_threshold_picks_higher_tier() {
        assert_eq!(suggested_action(0.9), SuggestedAction::AutoFix);
        assert_eq!(suggested_action(0.6), SuggestedAction::ManualReview);
        assert_eq!(suggested_action(0.59), SuggestedAction::Escalate);
    }

    #[test]
    fn factors_record_all_five_signals() {
        let event = classified(FailureType::Auth, Severity::Error, 0.9, false, 1, None);
        let metrics = score(&event);
        assert_eq!(metrics.factors.len(), 5);
        assert!(metrics.factors.iter().any(|f| f.name == "rule-match" && f.matched));
        assert!(metrics.factors.iter().any(|f| f.name == "stack-trace" && !f.matched));
    }
}
