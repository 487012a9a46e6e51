//! Types produced by the log-analysis half of the pipeline: redaction and
//! pruning metadata, classified failure events, confidence and blast radius.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

/// Failure taxonomy shared by the rule engine and the agent wire schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureType {
    Auth,
    Build,
    Test,
    Lint,
    Deploy,
    Network,
    Timeout,
    Env,
    Unknown,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// One classified line of the CI log, in order of appearance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEvent {
    #[serde(rename = "type")]
    pub failure_type: FailureType,
    pub severity: Severity,
    /// Trimmed single line that triggered the rule.
    pub message: String,
    /// 1-based line number in the pruned log.
    pub line_number: usize,
    /// Workflow step the line belongs to, or `unknown`.
    pub step: String,
    #[serde(default)]
    pub context: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

/// Overall sensitivity of what the redactor found.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RedactionRisk {
    None,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedactionStats {
    pub secrets_found: usize,
    pub by_category: BTreeMap<String, usize>,
    pub risk: RedactionRisk,
}

/// Per-category hit record with up to two truncated previews.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternHit {
    pub category: String,
    pub count: usize,
    pub previews: Vec<String>,
}

/// The raw log after secret scrubbing. The raw bytes are dropped once this
/// exists; nothing downstream ever sees them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactedLog {
    pub text: String,
    pub stats: RedactionStats,
    pub pattern_hits: Vec<PatternHit>,
}

/// Head/tail-trimmed log. `kept_head + kept_tail + omitted == total_lines`
/// always holds; when `omitted > 0` the text carries exactly one marker line
/// between the two blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrunedLog {
    pub text: String,
    pub total_lines: usize,
    pub kept_head: usize,
    pub kept_tail: usize,
    pub omitted: usize,
}

impl PrunedLog {
    pub fn stats(&self) -> PruningStats {
        PruningStats {
            total_lines: self.total_lines,
            kept_head: self.kept_head,
            kept_tail: self.kept_tail,
            omitted: self.omitted,
        }
    }
}

/// Pruning metadata carried on the analysis once the text is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruningStats {
    pub total_lines: usize,
    pub kept_head: usize,
    pub kept_tail: usize,
    pub omitted: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub name: String,
    /// Contribution in [0, 1].
    pub weight: f64,
    pub matched: bool,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum SuggestedAction {
    AutoFix,
    ManualReview,
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceMetrics {
    /// In [0, 1], rounded to two decimal places.
    pub score: f64,
    pub factors: Vec<ConfidenceFactor>,
    pub suggested_action: SuggestedAction,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlastLevel {
    Low,
    Medium,
    High,
}

impl BlastLevel {
    /// One level up, saturating at `High`.
    pub fn escalated(self) -> BlastLevel {
        match self {
            BlastLevel::Low => BlastLevel::Medium,
            BlastLevel::Medium | BlastLevel::High => BlastLevel::High,
        }
    }
}

/// Estimated scope of a failure's downstream effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlastRadius {
    pub level: BlastLevel,
    pub affected_areas: BTreeSet<String>,
    pub dependents: Vec<String>,
    pub risk_factors: Vec<String>,
    pub reasoning: String,
}

/// Optional workflow facts supplied by the caller to widen the estimate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    #[serde(default)]
    pub matrix_size: usize,
    #[serde(default)]
    pub dependent_jobs: Vec<String>,
    #[serde(default)]
    pub critical_path: bool,
}

/// The immutable result of one classification pass. Created once per
/// invocation, never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub id: Uuid,
    pub events: Vec<FailureEvent>,
    pub primary: FailureEvent,
    pub confidence: ConfidenceMetrics,
    pub blast_radius: BlastRadius,
    pub redaction: RedactionStats,
    pub pruning: PruningStats,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn failure_type_serializes_snake_case() {
        let json = serde_json::to_string(&FailureType::Timeout).unwrap();
        assert_eq!(json, "\"timeout\"");
        assert_eq!(FailureType::Auth.to_string(), "auth");
    }

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Error < Severity::Critical);
    }

    #[test]
    fn blast_level_escalation_is_bounded() {
        assert_eq!(BlastLevel::Low.escalated(), BlastLevel::Medium);
        assert_eq!(BlastLevel::High.escalated(), BlastLevel::High);
    }

    #[test]
    fn suggested_action_uses_kebab_case() {
        let json = serde_json::to_string(&SuggestedAction::AutoFix).unwrap();
        assert_eq!(json, "\"auto-fix\"");
    }
}
