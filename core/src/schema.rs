//! Structured-response contracts for the expert agents.
//!
//! Backend output is untyped text. Parsing is tolerant (raw JSON or JSON
//! fenced in a markdown code block both work) but validation is not: every
//! violation is reported with the path that failed, and those paths are fed
//! back to the backend verbatim in the retry correction directive.

use serde_json::Value;
use std::fmt;

use forge_protocol::agent::AgentResponse;
use forge_protocol::agent::AgentRole;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// JSONPath-style location, e.g. `$.summary`.
    pub path: String,
    pub message: String,
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

fn violation(path: &str, message: impl Into<String>) -> SchemaViolation {
    SchemaViolation {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Pull a JSON object out of `raw`: fenced ```json blocks first, then the
/// outermost brace pair.
pub fn extract_json(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if let Some(fence_start) = trimmed.find("```") {
        let after = &trimmed[fence_start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(fence_end) = body.find("```") {
            let candidate = body[..fence_end].trim();
            if !candidate.is_empty() {
                return Some(candidate.to_string());
            }
        }
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(trimmed[start..=end].to_string())
}

/// Parse and validate one agent response. On success the typed variant is
/// returned; on failure, the full list of path-qualified violations.
pub fn parse_agent_response(
    role: AgentRole,
    raw: &str,
) -> Result<AgentResponse, Vec<SchemaViolation>> {
    let Some(text) = extract_json(raw) else {
        return Err(vec![violation("$", "no JSON object found in response")]);
    };
    let value: Value = serde_json::from_str(&text)
        .map_err(|e| vec![violation("$", format!("response is not valid JSON: {e}"))])?;

    let violations = validate(role, &value);
    if !violations.is_empty() {
        return Err(violations);
    }

    let response = match role {
        AgentRole::LogAnalyst => serde_json::from_value(value).map(AgentResponse::LogAnalyst),
        AgentRole::WorkflowExpert => {
            serde_json::from_value(value).map(AgentResponse::WorkflowExpert)
        }
        AgentRole::CodeReviewer => serde_json::from_value(value).map(AgentResponse::CodeReviewer),
        AgentRole::FixGenerator => serde_json::from_value(value).map(AgentResponse::FixGenerator),
    };
    response.map_err(|e| vec![violation("$", format!("schema mismatch: {e}"))])
}

/// Correction directive injected between retry attempts on a schema failure.
pub fn correction_directive(violations: &[SchemaViolation]) -> String {
    let mut directive = String::from(
        "The previous response violated the required schema. Respond again with pure JSON only: no prose, no markdown fences. Violations:\n",
    );
    for v in violations {
        directive.push_str(&format!("- {v}\n"));
    }
    directive
}

fn validate(role: AgentRole, value: &Value) -> Vec<SchemaViolation> {
    match role {
        AgentRole::LogAnalyst => validate_log_analysis(value),
        AgentRole::WorkflowExpert => validate_workflow_advice(value),
        AgentRole::CodeReviewer => validate_code_review(value),
        AgentRole::FixGenerator => validate_fix_proposal(value),
    }
}

fn require(value: &Value, field: &str, violations: &mut Vec<SchemaViolation>) {
    match value.get(field) {
        Some(v) if !v.is_null() => {}
        _ => violations.push(violation(&format!("$.{field}"), "required field is missing")),
    }
}

fn check_str_max(
    value: &Value,
    field: &str,
    max: usize,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(v) = value.get(field) {
        match v.as_str() {
            Some(s) if s.chars().count() > max => {
                violations.push(violation(
                    &format!("$.{field}"),
                    format!("exceeds {max} characters"),
                ));
            }
            Some(_) => {}
            None if !v.is_null() => {
                violations.push(violation(&format!("$.{field}"), "must be a string"));
            }
            None => {}
        }
    }
}

fn check_array_max(
    value: &Value,
    field: &str,
    max: usize,
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(arr) = value.get(field).and_then(Value::as_array) {
        if arr.len() > max {
            violations.push(violation(
                &format!("$.{field}"),
                format!("at most {max} entries allowed"),
            ));
        }
    }
}

fn check_enum(
    value: &Value,
    field: &str,
    allowed: &[&str],
    violations: &mut Vec<SchemaViolation>,
) {
    if let Some(s) = value.get(field).and_then(Value::as_str) {
        if !allowed.contains(&s) {
            violations.push(violation(
                &format!("$.{field}"),
                format!("must be one of {allowed:?}"),
            ));
        }
    }
}

fn check_unit_interval(value: &Value, field: &str, violations: &mut Vec<SchemaViolation>) {
    if let Some(n) = value.get(field).and_then(Value::as_f64) {
        if !(0.0..=1.0).contains(&n) {
            violations.push(violation(&format!("$.{field}"), "must be in [0, 1]"));
        }
    } else if value.get(field).is_some_and(|v| !v.is_null()) {
        violations.push(violation(&format!("$.{field}"), "must be a number"));
    }
}

fn validate_log_analysis(value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    require(value, "failureType", &mut violations);
    require(value, "severity", &mut violations);
    require(value, "summary", &mut violations);
    require(value, "rootCauseLines", &mut violations);
    check_enum(
        value,
        "failureType",
        &["auth", "build", "test", "deploy", "network", "timeout", "env", "unknown"],
        &mut violations,
    );
    check_enum(value, "severity", &["critical", "high", "medium", "low"], &mut violations);
    check_str_max(value, "summary", 200, &mut violations);
    check_array_max(value, "contextLines", 5, &mut violations);
    check_array_max(value, "suggestedSearchTerms", 3, &mut violations);
    violations
}

fn validate_workflow_advice(value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    require(value, "issueType", &mut violations);
    require(value, "recommendation", &mut violations);
    require(value, "riskLevel", &mut violations);
    check_enum(
        value,
        "issueType",
        &["permissions", "secrets", "env-vars", "matrix", "cache", "concurrency", "none"],
        &mut violations,
    );
    check_str_max(value, "recommendation", 300, &mut violations);
    check_enum(value, "riskLevel", &["low", "medium", "high"], &mut violations);
    if let Some(changes) = value.get("yamlChanges").and_then(Value::as_array) {
        for (i, change) in changes.iter().enumerate() {
            for field in ["path", "oldValue", "newValue", "reason"] {
                if change.get(field).and_then(Value::as_str).is_none() {
                    violations.push(violation(
                        &format!("$.yamlChanges[{i}].{field}"),
                        "required string field is missing",
                    ));
                }
            }
        }
    }
    violations
}

fn validate_code_review(value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    require(value, "overallScore", &mut violations);
    if let Some(score) = value.get("overallScore").and_then(Value::as_i64) {
        if !(0..=100).contains(&score) {
            violations.push(violation("$.overallScore", "must be between 0 and 100"));
        }
    }
    if let Some(issues) = value.get("issuesFound").and_then(Value::as_array) {
        for (i, issue) in issues.iter().enumerate() {
            check_enum(
                issue,
                "type",
                &["security", "performance", "style", "logic", "testing"],
                &mut violations,
            );
            check_enum(issue, "severity", &["critical", "major", "minor"], &mut violations);
            for field in ["file", "message"] {
                if issue.get(field).and_then(Value::as_str).is_none() {
                    violations.push(violation(
                        &format!("$.issuesFound[{i}].{field}"),
                        "required string field is missing",
                    ));
                }
            }
        }
    }
    violations
}

fn validate_fix_proposal(value: &Value) -> Vec<SchemaViolation> {
    let mut violations = Vec::new();
    require(value, "confidence", &mut violations);
    require(value, "fixFile", &mut violations);
    require(value, "fixStartLine", &mut violations);
    require(value, "fixContent", &mut violations);
    require(value, "explanation", &mut violations);
    check_unit_interval(value, "confidence", &mut violations);
    check_str_max(value, "explanation", 500, &mut violations);
    violations
}

/// Best-effort salvage of individually valid fields from a response that
/// failed full validation. Display-only; callers never depend on it.
pub fn partial_salvage(raw: &str) -> serde_json::Map<String, Value> {
    let mut salvaged = serde_json::Map::new();
    let Some(text) = extract_json(raw) else {
        return salvaged;
    };
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text) else {
        return salvaged;
    };
    for (key, value) in map {
        if !value.is_null() {
            salvaged.insert(key, value);
        }
    }
    salvaged
}
