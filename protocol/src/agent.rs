//! Wire contracts for the expert agents. Responses arrive as untyped text
//! from the backend; the schema validator turns them into these tagged
//! variants before anything else is allowed to look at them.

use serde::Deserialize;
use serde::Serialize;
use strum_macros::Display;

use crate::analysis::FailureType;

/// The four expert roles, in pipeline order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentRole {
    LogAnalyst,
    WorkflowExpert,
    CodeReviewer,
    FixGenerator,
}

impl AgentRole {
    pub const PIPELINE_ORDER: [AgentRole; 4] = [
        AgentRole::LogAnalyst,
        AgentRole::WorkflowExpert,
        AgentRole::CodeReviewer,
        AgentRole::FixGenerator,
    ];
}

/// Severity scale used on the agent wire (distinct from the rule engine's).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentSeverity {
    Critical,
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Log Analyst output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogAnalysis {
    pub failure_type: FailureType,
    pub severity: AgentSeverity,
    /// At most 200 characters.
    pub summary: String,
    pub root_cause_lines: Vec<String>,
    /// At most 5 entries.
    #[serde(default)]
    pub context_lines: Vec<String>,
    /// At most 3 entries.
    #[serde(default)]
    pub suggested_search_terms: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WorkflowIssueType {
    Permissions,
    Secrets,
    EnvVars,
    Matrix,
    Cache,
    Concurrency,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlChange {
    pub path: String,
    pub old_value: String,
    pub new_value: String,
    pub reason: String,
}

/// Workflow Expert output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowAdvice {
    pub issue_type: WorkflowIssueType,
    /// At most 300 characters.
    pub recommendation: String,
    #[serde(default)]
    pub yaml_changes: Vec<YamlChange>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewIssueType {
    Security,
    Performance,
    Style,
    Logic,
    Testing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ReviewSeverity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewIssue {
    #[serde(rename = "type")]
    pub issue_type: ReviewIssueType,
    pub severity: ReviewSeverity,
    pub file: String,
    pub line: usize,
    pub message: String,
    pub suggestion: String,
}

/// Code Reviewer output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeReview {
    #[serde(default)]
    pub issues_found: Vec<ReviewIssue>,
    /// 0 to 100.
    pub overall_score: u8,
    #[serde(default)]
    pub blockers: Vec<String>,
}

/// Fix Generator output. `fix_content` is the full post-image of the target
/// file; the start line is advisory only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixProposal {
    /// In [0, 1].
    pub confidence: f64,
    pub fix_file: String,
    pub fix_start_line: usize,
    pub fix_content: String,
    /// At most 500 characters.
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub test_suggestion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_steps: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutputs {
    pub log_analyst: LogAnalysis,
    pub workflow_expert: WorkflowAdvice,
    pub code_reviewer: CodeReview,
    pub fix_generator: FixProposal,
}

/// Terminal orchestrator output carrying all four expert results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    /// At most 100 characters.
    pub title: String,
    /// At most 500 characters.
    pub summary: String,
    pub agents: AgentOutputs,
    pub overall_confidence: f64,
    pub action_items: Vec<String>,
}

/// A schema-validated agent response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "agent", rename_all = "snake_case")]
pub enum AgentResponse {
    LogAnalyst(LogAnalysis),
    WorkflowExpert(WorkflowAdvice),
    CodeReviewer(CodeReview),
    FixGenerator(FixProposal),
    Summary(AgentSummary),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentState {
    Started,
    Completed,
}

/// One chunk of the streaming orchestrator. Delivered in agent order; within
/// an agent, in call order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    /// Emitted at every role transition.
    Status { role: AgentRole, state: AgentState },
    /// The validated structured output of one agent.
    Output {
        role: AgentRole,
        response: AgentResponse,
    },
    /// Emitted once the fix generator has produced a patch target.
    Fix {
        file: String,
        line: usize,
        content: String,
    },
    /// Terminal chunk.
    Done { summary: AgentSummary },
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn agent_response_round_trips_with_tag() {
        let response = AgentResponse::WorkflowExpert(WorkflowAdvice {
            issue_type: WorkflowIssueType::Secrets,
            recommendation: "add NODE_AUTH_TOKEN".to_string(),
            yaml_changes: vec![],
            risk_level: RiskLevel::Medium,
        });
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"agent\":\"workflow_expert\""));
        assert!(json.contains("\"issueType\":\"secrets\""));
        let back: AgentResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back, response);
    }

    #[test]
    fn workflow_issue_type_uses_kebab_case() {
        let json = serde_json::to_string(&WorkflowIssueType::EnvVars).unwrap();
        assert_eq!(json, "\"env-vars\"");
    }

    #[test]
    fn pipeline_order_ends_with_fix_generator() {
        assert_eq!(AgentRole::PIPELINE_ORDER[3], AgentRole::FixGenerator);
    }

    #[test]
    fn stream_chunk_tags_by_type() {
        let chunk = StreamChunk::Status {
            role: AgentRole::LogAnalyst,
            state: AgentState::Started,
        };
        let json = serde_json::to_string(&chunk).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("\"role\":\"log_analyst\""));
    }
}
