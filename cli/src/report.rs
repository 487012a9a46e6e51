//! Human- and machine-readable rendering of pipeline results.

use owo_colors::OwoColorize;
use serde_json::json;

use forge_common::elapsed::format_millis;
use forge_core::agents::PriorContext;
use forge_core::pipeline::PipelineOutcome;
use forge_protocol::analysis::FailureAnalysis;
use forge_protocol::audit::AuditEntry;
use forge_protocol::decision::ApplicationRecord;
use forge_protocol::decision::DryRunPlan;
use forge_protocol::decision::RollbackOutcome;
use forge_protocol::decision::StepStatus;

pub fn outcome_json(outcome: &PipelineOutcome) -> anyhow::Result<String> {
    let value = json!({
        "analysis": outcome.analysis,
        "summary": outcome.summary,
        "retriesUsed": outcome.retries_used,
        "patches": outcome.patches,
        "validation": outcome.validation,
        "decision": outcome.decision,
        "plan": outcome.plan,
        "applied": outcome.applied,
    });
    Ok(serde_json::to_string_pretty(&value)?)
}

pub fn print_outcome(outcome: &PipelineOutcome) {
    let analysis = &outcome.analysis;
    println!("{}", "Failure analysis".bold());
    println!(
        "  {} {} in step '{}' (line {})",
        severity_badge(&analysis.primary.severity.to_string()),
        analysis.primary.failure_type,
        analysis.primary.step,
        analysis.primary.line_number
    );
    println!("  message: {}", analysis.primary.message);
    println!(
        "  confidence {:.2}, suggested action {}, blast radius {}",
        analysis.confidence.score,
        analysis.confidence.suggested_action,
        analysis.blast_radius.level
    );
    println!(
        "  redaction: {} secret(s), risk {}; pruning: {} of {} lines omitted",
        analysis.redaction.secrets_found,
        analysis.redaction.risk,
        analysis.pruning.omitted,
        analysis.pruning.total_lines
    );
    println!("  classified in {}", format_millis(analysis.duration_ms));

    if let Some(summary) = &outcome.summary {
        println!();
        println!("{} {}", "Proposed fix:".bold(), summary.title);
        println!("  {}", summary.summary);
        println!("  overall confidence {:.2}", summary.overall_confidence);
        for item in &summary.action_items {
            println!("  - {item}");
        }
    }

    for patch in &outcome.patches {
        println!();
        println!("{}", "Patch".bold());
        print!("{}", patch.to_unified_string());
    }

    if let Some(decision) = &outcome.decision {
        println!();
        println!("{} {}", "Gate:".bold(), decision.action.green());
        println!("  {}", decision.reasoning);
        for risk in &decision.risks {
            println!("  {} {risk}", "risk:".yellow());
        }
        for recommendation in &decision.recommendations {
            println!("  {recommendation}");
        }
    }

    if let Some(plan) = &outcome.plan {
        println!();
        print_plan(plan);
    }

    if let Some(record) = &outcome.applied {
        println!();
        print_record(record);
    }
}

pub fn print_partial(analysis: &FailureAnalysis, partial: Option<&PriorContext>) {
    println!("{}", "Partial results (pipeline stopped early)".bold().yellow());
    println!(
        "  classified {} as {} with confidence {:.2}",
        analysis.primary.step, analysis.primary.failure_type, analysis.confidence.score
    );
    if let Some(partial) = partial {
        if let Some(analysis) = &partial.log_analyst {
            println!("  log analyst: {}", analysis.summary);
        }
        if let Some(advice) = &partial.workflow_expert {
            println!("  workflow expert: {}", advice.recommendation);
        }
        if let Some(review) = &partial.code_reviewer {
            println!("  code reviewer scored the change {}", review.overall_score);
        }
    }
}

pub fn print_plan(plan: &DryRunPlan) {
    let verdict = if plan.success {
        "dry run: all steps pass".green().to_string()
    } else {
        "dry run: plan has errors".red().to_string()
    };
    println!("{}", verdict.bold());
    for step in &plan.steps {
        let badge = match step.status {
            StepStatus::Success => "ok".green().to_string(),
            StepStatus::Warning => "warn".yellow().to_string(),
            StepStatus::Error => "fail".red().to_string(),
        };
        println!("  [{badge}] {} {} — {}", step.action, step.target, step.message);
    }
    println!(
        "  {} file(s), {} line(s), impact {}{}",
        plan.summary.files_affected,
        plan.summary.lines_changed,
        plan.impact,
        if plan.cancelled { ", cancelled" } else { "" }
    );
}

pub fn print_record(record: &ApplicationRecord) {
    println!(
        "{} application {} ({})",
        "Applied".bold().green(),
        record.id,
        record.status
    );
    for patch in &record.patches {
        println!(
            "  {}: {} → {}",
            patch.filename,
            &patch.before_hash[..12],
            &patch.after_hash[..12]
        );
    }
    println!("  rollback with: forge rollback {}", record.id);
}

pub fn print_rollback(outcome: &RollbackOutcome) {
    println!(
        "{} {} file(s) restored in {}",
        "Rollback".bold(),
        outcome.restored.len(),
        format_millis(outcome.duration_ms)
    );
    for file in &outcome.restored {
        println!("  restored {file}");
    }
    for error in &outcome.errors {
        println!("  {} {error}", "failed:".red());
    }
}

pub fn print_audit_entries(entries: &[AuditEntry]) {
    for entry in entries {
        println!(
            "{} {} {} {} {} — {}",
            entry.ts.format("%Y-%m-%d %H:%M:%S"),
            entry.event,
            entry.actor,
            entry.resource,
            entry.status,
            entry.details
        );
    }
    println!("{} entries", entries.len());
}

fn severity_badge(severity: &str) -> String {
    match severity {
        "critical" => severity.red().bold().to_string(),
        "error" => severity.red().to_string(),
        "warning" => severity.yellow().to_string(),
        _ => severity.to_string(),
    }
}
