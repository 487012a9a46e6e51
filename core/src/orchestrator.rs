//! Multi-expert orchestration: Log Analyst → Workflow Expert → Code
//! Reviewer → Fix Generator, strictly in that order, each consuming its
//! predecessors' structured outputs. A streaming variant yields typed
//! chunks over a capacity-one channel so an unconsumed chunk blocks the
//! producer instead of piling up.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use forge_protocol::agent::AgentOutputs;
use forge_protocol::agent::AgentResponse;
use forge_protocol::agent::AgentRole;
use forge_protocol::agent::AgentState;
use forge_protocol::agent::AgentSummary;
use forge_protocol::agent::CodeReview;
use forge_protocol::agent::FixProposal;
use forge_protocol::agent::LogAnalysis;
use forge_protocol::agent::StreamChunk;
use forge_protocol::agent::WorkflowAdvice;

use crate::agents::AgentInputs;
use crate::agents::PriorContext;
use crate::agents::run_agent;
use crate::client::CompletionClient;
use crate::config::Config;
use crate::error::ForgeErr;

const TITLE_MAX: usize = 100;
const SUMMARY_MAX: usize = 500;

/// The summary plus per-role retry bookkeeping.
#[derive(Debug)]
pub struct ExpertOutcome {
    pub summary: AgentSummary,
    pub retries_used: BTreeMap<AgentRole, u32>,
}

/// The first agent failure, carrying everything that succeeded before it.
#[derive(Debug, Error)]
#[error("{failed_role} agent failed: {source}")]
pub struct OrchestrationError {
    pub failed_role: AgentRole,
    /// Prior successful outputs, returned for display; the pipeline stops.
    pub partial: PriorContext,
    pub source: ForgeErr,
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max.saturating_sub(1)).chain(['…']).collect()
    }
}

fn wrong_variant(role: AgentRole) -> ForgeErr {
    ForgeErr::BackendUnavailable(format!("{role} produced a mismatched response variant"))
}

/// Run all four experts sequentially and assemble the summary. The overall
/// confidence is the fix generator's.
pub async fn run_experts(
    client: &CompletionClient,
    config: &Config,
    inputs: &AgentInputs,
    cancel: &CancellationToken,
    in_pipeline: bool,
) -> Result<ExpertOutcome, Box<OrchestrationError>> {
    let mut prior = PriorContext::default();
    let mut retries_used = BTreeMap::new();
    let mut fix: Option<FixProposal> = None;

    for role in AgentRole::PIPELINE_ORDER {
        let run = run_agent(client, config, role, inputs, &prior, cancel, in_pipeline)
            .await
            .and_then(|run| {
                record(&mut prior, &mut fix, role, run.response)?;
                Ok(run.retries_used)
            });
        match run {
            Ok(retries) => {
                debug!(role = %role, retries, "agent completed");
                retries_used.insert(role, retries);
            }
            Err(source) => {
                warn!(role = %role, error = %source, "agent failed; stopping pipeline");
                return Err(Box::new(OrchestrationError {
                    failed_role: role,
                    partial: prior,
                    source,
                }));
            }
        }
    }

    // All four ran; the options are guaranteed to be filled by `record`.
    let summary = match build_summary(prior, fix) {
        Some(summary) => summary,
        None => {
            return Err(Box::new(OrchestrationError {
                failed_role: AgentRole::FixGenerator,
                partial: PriorContext::default(),
                source: ForgeErr::BackendUnavailable("incomplete expert outputs".to_string()),
            }));
        }
    };

    Ok(ExpertOutcome {
        summary,
        retries_used,
    })
}

fn record(
    prior: &mut PriorContext,
    fix: &mut Option<FixProposal>,
    role: AgentRole,
    response: AgentResponse,
) -> Result<(), ForgeErr> {
    match response {
        AgentResponse::LogAnalyst(analysis) => prior.log_analyst = Some(analysis),
        AgentResponse::WorkflowExpert(advice) => prior.workflow_expert = Some(advice),
        AgentResponse::CodeReviewer(review) => prior.code_reviewer = Some(review),
        AgentResponse::FixGenerator(proposal) => *fix = Some(proposal),
        AgentResponse::Summary(_) => return Err(wrong_variant(role)),
    }
    Ok(())
}

fn build_summary(prior: PriorContext, fix: Option<FixProposal>) -> Option<AgentSummary> {
    let log_analyst = prior.log_analyst?;
    let workflow_expert = prior.workflow_expert?;
    let code_reviewer = prior.code_reviewer?;
    let fix_generator = fix?;

    let title = truncate_chars(
        &format!(
            "{} failure: fix {}",
            log_analyst.failure_type, fix_generator.fix_file
        ),
        TITLE_MAX,
    );
    let summary = truncate_chars(
        &format!("{} {}", log_analyst.summary, workflow_expert.recommendation),
        SUMMARY_MAX,
    );
    let action_items = derive_action_items(&log_analyst, &workflow_expert, &code_reviewer, &fix_generator);
    let overall_confidence = fix_generator.confidence;

    Some(AgentSummary {
        title,
        summary,
        agents: AgentOutputs {
            log_analyst,
            workflow_expert,
            code_reviewer,
            fix_generator,
        },
        overall_confidence,
        action_items,
    })
}

fn derive_action_items(
    analysis: &LogAnalysis,
    advice: &WorkflowAdvice,
    review: &CodeReview,
    fix: &FixProposal,
) -> Vec<String> {
    let mut items = Vec::new();
    items.push(format!("Apply the proposed fix to {}", fix.fix_file));
    for change in &advice.yaml_changes {
        items.push(format!("Update {}: {}", change.path, change.reason));
    }
    for blocker in &review.blockers {
        items.push(format!("Resolve review blocker: {blocker}"));
    }
    if let Some(test) = &fix.test_suggestion {
        items.push(format!("Add a regression test: {test}"));
    }
    for term in &analysis.suggested_search_terms {
        items.push(format!("Search related failures for '{term}'"));
    }
    items
}

/// Streaming variant. Chunks arrive in agent order; the terminal chunk is
/// `done`. A stream that ends without `done` signals a failed run; the
/// join handle carries the failure.
pub fn stream_experts(
    client: Arc<CompletionClient>,
    config: Arc<Config>,
    inputs: AgentInputs,
    cancel: CancellationToken,
) -> (
    mpsc::Receiver<StreamChunk>,
    JoinHandle<Result<(), Box<OrchestrationError>>>,
) {
    // Capacity 1: at most one buffered chunk per agent hop; the producer
    // suspends until the consumer has taken the previous chunk.
    let (tx, rx) = mpsc::channel(1);

    let handle = tokio::spawn(async move {
        let mut prior = PriorContext::default();
        let mut fix: Option<FixProposal> = None;

        for role in AgentRole::PIPELINE_ORDER {
            send_chunk(&tx, StreamChunk::Status { role, state: AgentState::Started }).await;

            let run = run_agent(&client, &config, role, &inputs, &prior, &cancel, true).await;
            let response = match run {
                Ok(run) => run.response,
                Err(source) => {
                    return Err(Box::new(OrchestrationError {
                        failed_role: role,
                        partial: prior,
                        source,
                    }));
                }
            };

            send_chunk(&tx, StreamChunk::Output { role, response: response.clone() }).await;

            if let Err(source) = record(&mut prior, &mut fix, role, response) {
                return Err(Box::new(OrchestrationError {
                    failed_role: role,
                    partial: prior,
                    source,
                }));
            }

            if let Some(proposal) = &fix {
                if role == AgentRole::FixGenerator {
                    send_chunk(
                        &tx,
                        StreamChunk::Fix {
                            file: proposal.fix_file.clone(),
                            line: proposal.fix_start_line,
                            content: proposal.fix_content.clone(),
                        },
                    )
                    .await;
                }
            }

            send_chunk(&tx, StreamChunk::Status { role, state: AgentState::Completed }).await;
        }

        match build_summary(prior, fix) {
            Some(summary) => {
                send_chunk(&tx, StreamChunk::Done { summary }).await;
                Ok(())
            }
            None => Err(Box::new(OrchestrationError {
                failed_role: AgentRole::FixGenerator,
                partial: PriorContext::default(),
                source: ForgeErr::BackendUnavailable("incomplete expert outputs".to_string()),
            })),
        }
    });

    (rx, handle)
}

async fn send_chunk(tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) {
    // A dropped receiver just ends the stream early.
    let _ = tx.send(chunk).await;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use forge_protocol::agent::AgentSeverity;
    use forge_protocol::agent::RiskLevel;
    use forge_protocol::agent::WorkflowIssueType;
    use forge_protocol::analysis::FailureType;
    use pretty_assertions::assert_eq;

    fn sample_prior() -> (PriorContext, FixProposal) {
        let prior = PriorContext {
            log_analyst: Some(LogAnalysis {
                failure_type: FailureType::Auth,
                severity: AgentSeverity::High,
                summary: "publish rejected with E403".to_string(),
                root_cause_lines: vec!["npm ERR! code E403".to_string()],
                context_lines: vec![],
                suggested_search_terms: vec!["E403".to_string()],
            }),
            workflow_expert: Some(WorkflowAdvice {
                issue_type: WorkflowIssueType::Secrets,
                recommendation: "add registry-url and NODE_AUTH_TOKEN".to_string(),
                yaml_changes: vec![],
                risk_level: RiskLevel::Medium,
            }),
            code_reviewer: Some(CodeReview {
                issues_found: vec![],
                overall_score: 92,
                blockers: vec![],
            }),
        };
        let fix = FixProposal {
            confidence: 0.93,
            fix_file: ".github/workflows/publish.yml".to_string(),
            fix_start_line: 12,
            fix_content: "name: publish\n".to_string(),
            explanation: "adds registry auth".to_string(),
            test_suggestion: Some("re-run the publish job".to_string()),
            rollback_steps: None,
        };
        (prior, fix)
    }

    #[test]
    fn summary_confidence_is_the_fix_generators() {
        let (prior, fix) = sample_prior();
        let summary = build_summary(prior, Some(fix)).unwrap();
        assert_eq!(summary.overall_confidence, 0.93);
        assert!(summary.title.contains("auth failure"));
        assert!(summary.title.chars().count() <= TITLE_MAX);
        assert!(summary.summary.chars().count() <= SUMMARY_MAX);
    }

    #[test]
    fn action_items_cover_fix_and_search_terms() {
        let (prior, fix) = sample_prior();
        let summary = build_summary(prior, Some(fix)).unwrap();
        assert!(summary.action_items.iter().any(|i| i.contains("publish.yml")));
        assert!(summary.action_items.iter().any(|i| i.contains("E403")));
        assert!(summary.action_items.iter().any(|i| i.contains("regression test")));
    }

    #[test]
    fn missing_expert_output_yields_no_summary() {
        let (mut prior, fix) = sample_prior();
        prior.code_reviewer = None;
        assert!(build_summary(prior, Some(fix)).is_none());
    }

    #[test]
    fn truncate_respects_char_budget() {
        let long = "x".repeat(300);
        assert_eq!(truncate_chars(&long, 100).chars().count(), 100);
        assert_eq!(truncate_chars("short", 100), "short");
    }
}
