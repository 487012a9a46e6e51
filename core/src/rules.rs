//! Rule-driven failure classification.
//!
//! The engine scans the pruned log line by line; the first rule matching a
//! line wins for that line. Catalogue order is therefore part of the
//! behaviour and is fixed as listed in `CATALOGUE` below: authentication
//! shapes first, then secret/env shapes, runtime/build breaks, tests, lint,
//! network, timeout, deploy, and the generic fallback last. Re-ordering
//! rules is a behavioural change.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex_lite::Regex;

use forge_protocol::analysis::FailureEvent;
use forge_protocol::analysis::FailureType;
use forge_protocol::analysis::Severity;

/// How many preceding lines are searched for a step delimiter.
const STEP_LOOKBACK: usize = 20;
const TRACE_BEFORE: usize = 5;
const TRACE_AFTER: usize = 15;
/// A trace shorter than this is considered trivial by the scorer.
pub const MIN_TRACE_LEN: usize = 50;

type ContextExtractor = fn(&str) -> HashMap<String, String>;

pub struct Rule {
    pub id: &'static str,
    pub name: &'static str,
    pattern: Regex,
    pub failure_type: FailureType,
    pub severity: Severity,
    pub confidence_modifier: f64,
    context: Option<ContextExtractor>,
    /// The catch-all rule; the scorer treats its match signal as 0.5.
    pub fallback: bool,
}

/// A failure event together with the rule bookkeeping the scorer consumes.
#[derive(Debug, Clone)]
pub struct ClassifiedEvent {
    pub event: FailureEvent,
    pub rule_id: &'static str,
    pub confidence_modifier: f64,
    pub fallback: bool,
}

fn rule(
    id: &'static str,
    name: &'static str,
    pattern: &str,
    failure_type: FailureType,
    severity: Severity,
    confidence_modifier: f64,
    context: Option<ContextExtractor>,
) -> Rule {
    #[allow(clippy::expect_used)]
    let pattern = Regex::new(pattern).expect("static rule pattern");
    Rule {
        id,
        name,
        pattern,
        failure_type,
        severity,
        confidence_modifier,
        context,
        fallback: false,
    }
}

static CATALOGUE: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let mut rules = vec![
        rule(
            "registry-forbidden",
            "Package registry rejected the request",
            r"npm ERR!.*E40[13]|40[13] Forbidden|401 Unauthorized.*registry",
            FailureType::Auth,
            Severity::Error,
            0.9,
            Some(extract_registry_context),
        ),
        rule(
            "container-registry-denied",
            "Container registry denied access",
            r"denied: denied|unauthorized: authentication required|denied: permission_denied",
            FailureType::Auth,
            Severity::Critical,
            0.9,
            None,
        ),
        rule(
            "bad-credentials",
            "Credentials rejected",
            r"[Bb]ad credentials|[Aa]uthentication failed|[Ii]nvalid (?:user ?name or )?password",
            FailureType::Auth,
            Severity::Error,
            0.85,
            None,
        ),
        rule(
            "missing-secret",
            "Referenced secret is not defined",
            r#"[Ss]ecret ['"]?[A-Za-z0-9_.-]+['"]? is not (?:defined|set)|[Mm]issing required secret"#,
            FailureType::Env,
            Severity::Error,
            0.9,
            Some(extract_secret_context),
        ),
        rule(
            "missing-env-var",
            "Required environment variable is absent",
            r#"[Ee]nvironment variable ['"]?[A-Za-z0-9_]+['"]? (?:is not set|is not defined|was not found)"#,
            FailureType::Env,
            Severity::Error,
            0.85,
            Some(extract_env_var_context),
        ),
        rule(
            "eol-runtime",
            "Runtime version no longer supported",
            r"is not available in Node \d+|no longer supported\. Please update to Node|requires Node\.js version",
            FailureType::Build,
            Severity::Error,
            0.85,
            Some(extract_runtime_context),
        ),
        rule(
            "compile-error",
            "Compilation failed",
            r"error\[E\d+\]|SyntaxError:|Compilation failed|[Cc]annot find module|TS\d{4}:",
            FailureType::Build,
            Severity::Error,
            0.85,
            None,
        ),
        rule(
            "test-failure",
            "Test suite failed",
            r"AssertionError|\d+ (?:failing|failed)|Tests?:\s+\d+ failed|FAIL\s+\S+",
            FailureType::Test,
            Severity::Error,
            0.85,
            None,
        ),
        rule(
            "lint-failure",
            "Lint check failed",
            r"ESLint found|[Ll]int(?:ing)? (?:failed|errors)|problems? \(\d+ errors?",
            FailureType::Lint,
            Severity::Warning,
            0.8,
            None,
        ),
        rule(
            "network-failure",
            "Network operation failed",
            r"ECONNREFUSED|ENOTFOUND|ECONNRESET|getaddrinfo|Could not resolve host",
            FailureType::Network,
            Severity::Error,
            0.8,
            None,
        ),
        rule(
            "job-timeout",
            "Job or step timed out",
            r"exceeded the maximum execution time|[Tt]imed? ?out after|ETIMEDOUT",
            FailureType::Timeout,
            Severity::Error,
            0.8,
            None,
        ),
        rule(
            "deploy-failure",
            "Deployment failed",
            r"[Dd]eploy(?:ment)? (?:failed|error)|Failed to deploy",
            FailureType::Deploy,
            Severity::Critical,
            0.85,
            None,
        ),
        rule(
            "command-not-found",
            "Command missing from runner image",
            r"command not found|not recognized as an internal or external command",
            FailureType::Env,
            Severity::Error,
            0.8,
            None,
        ),
    ];

    let mut fallback = rule(
        "generic-error",
        "Unclassified error line",
        r"(?i)\berror\b[:!]|^fatal:|##\[error\]",
        FailureType::Unknown,
        Severity::Error,
        0.5,
        None,
    );
    fallback.fallback = true;
    rules.push(fallback);
    rules
});

/// Classify every line of the pruned log. An empty result means no rule
/// matched anywhere; callers must treat that as fatal to the run.
pub fn classify(log: &str) -> Vec<ClassifiedEvent> {
    let lines: Vec<&str> = log.lines().collect();
    let mut events = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let Some(rule) = CATALOGUE.iter().find(|r| r.pattern.is_match(line)) else {
            continue;
        };
        let context = rule.context.map(|f| f(line)).unwrap_or_default();
        events.push(ClassifiedEvent {
            event: FailureEvent {
                failure_type: rule.failure_type,
                severity: rule.severity,
                message: line.trim().to_string(),
                line_number: idx + 1,
                step: resolve_step(&lines, idx),
                context,
                stack_trace: detect_stack_trace(&lines, idx),
            },
            rule_id: rule.id,
            confidence_modifier: rule.confidence_modifier,
            fallback: rule.fallback,
        });
    }

    events
}

/// The event the rest of the pipeline keys on: highest severity, earliest
/// among ties.
pub fn primary_event(events: &[ClassifiedEvent]) -> Option<&ClassifiedEvent> {
    events
        .iter()
        .max_by(|a, b| {
            a.event
                .severity
                .cmp(&b.event.severity)
                .then(b.event.line_number.cmp(&a.event.line_number))
        })
}

static STEP_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    let compile = |p: &str| Regex::new(p).expect("static step pattern");
    vec![
        compile(r"^##\[group\]Run (.+)$"),
        compile(r"^##\[item\](.+)$"),
        compile(r"^\[([A-Za-z0-9 ._/-]+)\]\s*$"),
        compile(r"^([A-Za-z][A-Za-z0-9 _.-]{0,40}):\s*$"),
    ]
});

/// Scan up to [`STEP_LOOKBACK`] preceding lines for a step delimiter of a
/// recognised shape.
fn resolve_step(lines: &[&str], idx: usize) -> String {
    let start = idx.saturating_sub(STEP_LOOKBACK);
    for line in lines[start..idx].iter().rev() {
        for pattern in STEP_PATTERNS.iter() {
            if let Some(caps) = pattern.captures(line) {
                if let Some(m) = caps.get(1) {
                    return m.as_str().trim().to_string();
                }
            }
        }
    }
    "unknown".to_string()
}

/// Attach the surrounding window when it resembles a stack trace: at least
/// two lines besides the match carrying trace keywords.
fn detect_stack_trace(lines: &[&str], idx: usize) -> Option<String> {
    let start = idx.saturating_sub(TRACE_BEFORE);
    let end = (idx + TRACE_AFTER + 1).min(lines.len());
    let window = &lines[start..end];

    let keyword_lines = window
        .iter()
        .enumerate()
        .filter(|(i, line)| {
            start + i != idx
                && (line.trim_start().starts_with("at ")
                    || line.contains("Error:")
                    || line.contains("stack"))
        })
        .count();
    if keyword_lines < 2 {
        return None;
    }
    Some(window.join("\n"))
}

fn extract_registry_context(line: &str) -> HashMap<String, String> {
    let mut context = HashMap::new();
    #[allow(clippy::expect_used)]
    static URL: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"https?://\S+").expect("static pattern"));
    if let Some(m) = URL.find(line) {
        context.insert("registry".to_string(), m.as_str().to_string());
    }
    #[allow(clippy::expect_used)]
    static CODE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\bE?(40[13])\b").expect("static pattern"));
    if let Some(caps) = CODE.captures(line) {
        context.insert("status".to_string(), caps[1].to_string());
    }
    context
}

fn extract_secret_context(line: &str) -> HashMap<String, String> {
    let mut context = HashMap::new();
    #[allow(clippy::expect_used)]
    static NAME: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"[Ss]ecret ['"]?([A-Za-z0-9_.-]+)['"]?"#).expect("static pattern")
    });
    if let Some(caps) = NAME.captures(line) {
        context.insert("secret".to_string(), caps[1].to_string());
    }
    context
}

fn extract_env_var_context(line: &str) -> HashMap<String, String> {
    let mut context = HashMap::new();
    #[allow(clippy::expect_used)]
    static NAME: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r#"[Ee]nvironment variable ['"]?([A-Za-z0-9_]+)"#).expect("static pattern")
    });
    if let Some(caps) = NAME.captures(line) {
        context.insert("variable".to_string(), caps[1].to_string());
    }
    context
}

fn extract_runtime_context(line: &str) -> HashMap<String, String> {
    let mut context = HashMap::new();
    #[allow(clippy::expect_used)]
    static VERSION: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"Node(?:\.js version)? (\d+)").expect("static pattern"));
    if let Some(caps) = VERSION.captures(line) {
        context.insert("runtime_version".to_string(), caps[1].to_string());
    }
    context
}
