//! One expert role, one backend call: role directives, prompt assembly,
//! budget checks, and the mapping from retry outcomes to pipeline errors.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use forge_protocol::agent::AgentResponse;
use forge_protocol::agent::AgentRole;
use forge_protocol::agent::CodeReview;
use forge_protocol::agent::LogAnalysis;
use forge_protocol::agent::WorkflowAdvice;

use crate::budget;
use crate::budget::TruncateStrategy;
use crate::client::CompletionClient;
use crate::config::Config;
use crate::error::ForgeErr;
use crate::error::Result;
use crate::retry::AttemptError;
use crate::retry::RetryError;
use crate::retry::RetryPolicy;
use crate::retry::run_with_retries;
use crate::schema::parse_agent_response;

/// Structured outputs accumulated as the pipeline advances; each agent sees
/// everything its predecessors produced.
#[derive(Debug, Clone, Default)]
pub struct PriorContext {
    pub log_analyst: Option<LogAnalysis>,
    pub workflow_expert: Option<WorkflowAdvice>,
    pub code_reviewer: Option<CodeReview>,
}

/// Input artifacts shared by all four agents.
#[derive(Debug, Clone)]
pub struct AgentInputs {
    pub log_snippet: String,
    pub workflow_config: String,
    pub change_set: String,
}

/// The validated response plus the number of retries it took.
#[derive(Debug)]
pub struct AgentRun {
    pub response: AgentResponse,
    pub retries_used: u32,
}

fn system_directive(role: AgentRole) -> &'static str {
    match role {
        AgentRole::LogAnalyst => {
            "You are a CI log analyst. Examine the failing log excerpt and identify the \
             failure type, severity and root cause. Respond with pure JSON matching: \
             {\"failureType\": \"auth|build|test|deploy|network|timeout|env|unknown\", \
             \"severity\": \"critical|high|medium|low\", \"summary\": \"<=200 chars\", \
             \"rootCauseLines\": [\"...\"], \"contextLines\": [\"up to 5\"], \
             \"suggestedSearchTerms\": [\"up to 3\"]}"
        }
        AgentRole::WorkflowExpert => {
            "You are a CI workflow configuration expert. Given the workflow file and the \
             log analyst's findings, identify the configuration issue. Respond with pure \
             JSON matching: {\"issueType\": \
             \"permissions|secrets|env-vars|matrix|cache|concurrency|none\", \
             \"recommendation\": \"<=300 chars\", \"yamlChanges\": [{\"path\": \"...\", \
             \"oldValue\": \"...\", \"newValue\": \"...\", \"reason\": \"...\"}], \
             \"riskLevel\": \"low|medium|high\"}"
        }
        AgentRole::CodeReviewer => {
            "You are a code reviewer. Review the change set in light of the prior \
             findings. Respond with pure JSON matching: {\"issuesFound\": [{\"type\": \
             \"security|performance|style|logic|testing\", \"severity\": \
             \"critical|major|minor\", \"file\": \"...\", \"line\": 0, \"message\": \
             \"...\", \"suggestion\": \"...\"}], \"overallScore\": 0, \"blockers\": []}"
        }
        AgentRole::FixGenerator => {
            "You are a fix generator. Using the log excerpt and all prior findings, \
             produce the complete corrected content of the single file that fixes the \
             failure. Respond with pure JSON matching: {\"confidence\": 0.0, \
             \"fixFile\": \"path\", \"fixStartLine\": 1, \"fixContent\": \"full file \
             content\", \"explanation\": \"<=500 chars\", \"testSuggestion\": \"...\", \
             \"rollbackSteps\": \"...\"}"
        }
    }
}

/// The role-specific artifact: log excerpt for the analysts, the workflow
/// file for the expert, the change set for the reviewer.
fn primary_artifact<'a>(role: AgentRole, inputs: &'a AgentInputs) -> (&'static str, &'a str) {
    match role {
        AgentRole::LogAnalyst | AgentRole::FixGenerator => ("CI log excerpt", &inputs.log_snippet),
        AgentRole::WorkflowExpert => ("Workflow configuration", &inputs.workflow_config),
        AgentRole::CodeReviewer => ("Change set", &inputs.change_set),
    }
}

/// The fix generator always receives all three predecessors as structured
/// input; earlier agents see whatever exists so far.
fn prior_context_json(prior: &PriorContext) -> Result<String> {
    let mut sections = serde_json::Map::new();
    if let Some(analysis) = &prior.log_analyst {
        sections.insert("logAnalyst".to_string(), serde_json::to_value(analysis)?);
    }
    if let Some(advice) = &prior.workflow_expert {
        sections.insert("workflowExpert".to_string(), serde_json::to_value(advice)?);
    }
    if let Some(review) = &prior.code_reviewer {
        sections.insert("codeReviewer".to_string(), serde_json::to_value(review)?);
    }
    if sections.is_empty() {
        return Ok(String::new());
    }
    Ok(serde_json::to_string_pretty(&serde_json::Value::Object(sections))?)
}

fn build_user_prompt(role: AgentRole, inputs: &AgentInputs, prior: &PriorContext) -> Result<String> {
    let (label, artifact) = primary_artifact(role, inputs);
    let prior_json = prior_context_json(prior)?;
    let mut prompt = format!("{label}:\n```\n{artifact}\n```\n");
    if !prior_json.is_empty() {
        prompt.push_str(&format!("\nPrior agent findings:\n```json\n{prior_json}\n```\n"));
    }
    Ok(prompt)
}

/// Bring the prompt under budget, shrinking only the variable artifact.
fn enforce_budget(
    config: &Config,
    role: AgentRole,
    system: &str,
    user: String,
) -> Result<String> {
    let cap = config
        .budget
        .token_cap_override
        .unwrap_or_else(|| budget::model_cap(&config.backend.model));
    let check = budget::check_budget(system, &user, "", cap, config.budget.safety_fraction);
    if check.within_budget {
        return Ok(user);
    }

    debug!(role = %role, tokens = check.input_tokens, "prompt over budget, truncating");
    let input_allowance = ((cap as f64 * config.budget.safety_fraction) as usize)
        .saturating_sub(check.output_reservation)
        .saturating_sub(budget::estimate_tokens(system));
    let truncated = budget::truncate_to_fit(&user, input_allowance, TruncateStrategy::Middle);
    let recheck = budget::check_budget(system, &truncated, "", cap, config.budget.safety_fraction);
    if !recheck.within_budget {
        return Err(ForgeErr::BudgetExceeded {
            model: config.backend.model.clone(),
            tokens: recheck.input_tokens,
            cap,
        });
    }
    Ok(truncated)
}

/// Run one expert: budget-check, call the backend, validate the schema, and
/// retry per policy. `in_pipeline` selects the tighter per-attempt timeout.
pub async fn run_agent(
    client: &CompletionClient,
    config: &Config,
    role: AgentRole,
    inputs: &AgentInputs,
    prior: &PriorContext,
    cancel: &CancellationToken,
    in_pipeline: bool,
) -> Result<AgentRun> {
    let system = system_directive(role);
    let base_user = build_user_prompt(role, inputs, prior)?;
    let base_user = enforce_budget(config, role, system, base_user)?;

    let policy = RetryPolicy {
        max_attempts: config.retry.max_attempts,
        initial_delay: config.retry.initial_delay,
        max_delay: config.retry.max_delay,
        attempt_timeout: if in_pipeline {
            config.retry.pipeline_attempt_timeout
        } else {
            config.retry.attempt_timeout
        },
    };

    let outcome = run_with_retries(policy, cancel, |attempt, correction| {
        let user = match &correction {
            Some(directive) => format!("{directive}\n{base_user}"),
            None => base_user.clone(),
        };
        async move {
            debug!(role = %role, attempt, "invoking backend");
            let raw = client
                .complete(system, &user)
                .await
                .map_err(|e| AttemptError::Transport(e.to_string()))?;
            parse_agent_response(role, &raw).map_err(AttemptError::Schema)
        }
    })
    .await;

    match outcome {
        Ok(run) => Ok(AgentRun {
            response: run.value,
            retries_used: run.retries_used,
        }),
        Err(RetryError::Cancelled) => Err(ForgeErr::Cancelled),
        Err(RetryError::TimedOut(timeout)) => Err(ForgeErr::TimedOut(timeout)),
        Err(RetryError::Exhausted { attempts, last }) => match last {
            AttemptError::Schema(violations) => Err(ForgeErr::SchemaViolation {
                role,
                attempts,
                violations,
            }),
            AttemptError::Transport(message) => Err(ForgeErr::BackendUnavailable(message)),
        },
    }
}
