//! Gate decisions, dry-run plans and persisted application records.

use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use forge_diff::UnifiedPatch;
use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;
use uuid::Uuid;

use crate::analysis::BlastLevel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum GateAction {
    AutoApply,
    ManualReview,
    Escalate,
    Reject,
}

/// A pure function of (score, risk flags, thresholds); see the gate module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub action: GateAction,
    pub confidence: f64,
    pub reasoning: String,
    pub risks: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PlanAction {
    Create,
    Modify,
    Delete,
    ValidateSyntax,
    CheckConflicts,
    EstimatePerformance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub index: usize,
    pub action: PlanAction,
    pub target: String,
    pub status: StepStatus,
    pub message: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub steps_total: usize,
    pub files_affected: usize,
    pub lines_changed: usize,
}

/// Side-effect-free application plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DryRunPlan {
    pub steps: Vec<PlanStep>,
    pub summary: PlanSummary,
    /// True when no step reported an error.
    pub success: bool,
    pub rollback_plan: String,
    pub impact: BlastLevel,
    /// Set when cancellation truncated the plan.
    #[serde(default)]
    pub cancelled: bool,
}

/// One applied file change with content hashes of the bytes actually on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedPatch {
    pub filename: String,
    /// SHA-256 hex of the pre-image (hash of "" for created files).
    pub before_hash: String,
    /// SHA-256 hex of the post-image (hash of "" for deleted files).
    pub after_hash: String,
    pub ts: DateTime<Utc>,
    pub patch: UnifiedPatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ApplicationStatus {
    Applied,
    RolledBack,
    Partial,
}

/// Persisted under the workspace state directory, keyed by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub ts: DateTime<Utc>,
    pub patches: Vec<AppliedPatch>,
    pub decision: GateDecision,
    pub status: ApplicationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub restored: Vec<String>,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}
