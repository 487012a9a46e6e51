mod report;

use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use forge_core::apply::ApplyOptions;
use forge_core::apply::Applicator;
use forge_core::audit::AuditJournal;
use forge_core::config::Config;
use forge_core::dry_run::DryRunOptions;
use forge_core::dry_run::simulate;
use forge_core::error::ForgeErr;
use forge_core::pipeline::Pipeline;
use forge_core::pipeline::PipelineRequest;
use forge_protocol::audit::AuditStatus;
use forge_protocol::decision::GateAction;
use forge_protocol::decision::GateDecision;
use forge_protocol::decision::PlanAction;
use forge_protocol::decision::StepStatus;

/// Diagnose failed CI runs and produce reviewable, auto-applicable patches.
#[derive(Debug, Parser)]
#[clap(author, version, name = "forge")]
struct ForgeCli {
    /// Explicit configuration file (highest precedence).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Working-tree root patches are resolved against.
    #[arg(long, global = true, value_name = "DIR")]
    cwd: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Analyze a CI log and propose a fix.
    #[clap(visible_alias = "a")]
    Analyze(AnalyzeArgs),

    /// Simulate applying a unified diff without touching the tree.
    DryRun(PatchFileArgs),

    /// Apply a unified diff with snapshot-backed rollback.
    Apply(ApplyArgs),

    /// Restore the tree to its state before a recorded application.
    Rollback(RollbackArgs),

    /// Inspect or export the audit journal.
    Audit(AuditArgs),
}

#[derive(Debug, Parser)]
struct AnalyzeArgs {
    /// CI log file, or `-` for stdin.
    #[arg(value_name = "LOG")]
    log: PathBuf,

    /// Workflow configuration handed to the workflow expert.
    #[arg(long, value_name = "PATH")]
    workflow: Option<PathBuf>,

    /// Change-set diff handed to the code reviewer.
    #[arg(long, value_name = "PATH")]
    changes: Option<PathBuf>,

    /// Backend model slug.
    #[arg(long)]
    model: Option<String>,

    /// Backend base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Name of the env var holding the backend API key.
    #[arg(long)]
    api_key_env: Option<String>,

    /// Auto-apply confidence threshold.
    #[arg(long)]
    auto_apply_threshold: Option<f64>,

    /// Also mask IP addresses and long hex blobs.
    #[arg(long, default_value_t = false)]
    aggressive_redaction: bool,

    /// Classify and validate locally; never call the backend.
    #[arg(long, default_value_t = false)]
    local_only: bool,

    /// Apply the patch when the gate says auto-apply.
    #[arg(long, default_value_t = false)]
    apply: bool,

    /// Overall pipeline deadline in seconds.
    #[arg(long, value_name = "SECS")]
    deadline: Option<u64>,

    /// Emit machine-readable JSON instead of the human report.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Debug, Parser)]
struct PatchFileArgs {
    /// Unified diff file.
    #[arg(value_name = "PATCH")]
    patch: PathBuf,
}

#[derive(Debug, Parser)]
struct ApplyArgs {
    /// Unified diff file.
    #[arg(value_name = "PATCH")]
    patch: PathBuf,

    /// Skip the pre-flight dry run.
    #[arg(long, default_value_t = false)]
    no_dry_run: bool,
}

#[derive(Debug, Parser)]
struct RollbackArgs {
    /// Application id printed when the patch was applied.
    #[arg(value_name = "APPLICATION_ID")]
    id: Uuid,
}

#[derive(Debug, Parser)]
struct AuditArgs {
    #[command(subcommand)]
    cmd: AuditCommand,
}

#[derive(Debug, clap::Subcommand)]
enum AuditCommand {
    /// Print recent journal entries.
    List {
        /// Only entries touching this resource.
        #[arg(long)]
        resource: Option<String>,
        /// Only entries with this status.
        #[arg(long, value_parser = ["success", "failure", "warning"])]
        status: Option<String>,
    },
    /// Export the journal as JSONL or CSV.
    Export {
        #[arg(long, default_value_t = false)]
        csv: bool,
    },
    /// Delete entries older than the given number of days.
    Purge {
        #[arg(long, value_name = "DAYS")]
        days: i64,
    },
}

// Exit codes: 1 configuration, 2 analysis/retrieval, 3 applicator.
fn exit_code_for(err: &ForgeErr) -> i32 {
    match err.kind() {
        "input_invalid" | "json" => 1,
        "apply_failed" | "apply_conflict" | "concurrent_application" => 3,
        _ => 2,
    }
}

#[tokio::main]
async fn main() {
    let default_level = "error";
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(default_level))
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .try_init();

    let cli = ForgeCli::parse();
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(err) => {
            match err.downcast_ref::<ForgeErr>() {
                Some(forge_err) => {
                    eprintln!("error[{}]: {forge_err}", forge_err.kind());
                    eprintln!("  hint: {}", forge_err.recommendation());
                    exit_code_for(forge_err)
                }
                None => {
                    eprintln!("error: {err:#}");
                    1
                }
            }
        }
    };
    std::process::exit(code);
}

async fn run(cli: ForgeCli) -> anyhow::Result<()> {
    let cwd = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config = Config::load(cli.config.as_deref(), &cwd)?;
    let journal = Arc::new(AuditJournal::open(&config.log_dir)?);

    match cli.command {
        Command::Analyze(args) => analyze(config, journal, args).await,
        Command::DryRun(args) => dry_run(&config, &args),
        Command::Apply(args) => apply(&config, journal, &args),
        Command::Rollback(args) => rollback(&config, journal, &args),
        Command::Audit(args) => audit(&journal, args),
    }
}

fn read_input(path: &Path) -> anyhow::Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
    }
}

async fn analyze(mut config: Config, journal: Arc<AuditJournal>, args: AnalyzeArgs) -> anyhow::Result<()> {
    if let Some(model) = args.model {
        config.backend.model = model;
    }
    if let Some(base_url) = args.base_url {
        config.backend.base_url = base_url;
    }
    if let Some(var) = args.api_key_env {
        config.backend.api_key_env = Some(var);
    }
    if let Some(threshold) = args.auto_apply_threshold {
        config.gate.auto_apply_threshold = threshold;
    }
    config.aggressive_redaction |= args.aggressive_redaction;
    config.local_validation_only |= args.local_only;

    let raw_log = read_input(&args.log)?;
    let workflow_config = args.workflow.as_deref().map(read_input).transpose()?.unwrap_or_default();
    let change_set = args.changes.as_deref().map(read_input).transpose()?.unwrap_or_default();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            tokio::signal::ctrl_c().await.ok();
            cancel.cancel();
        }
    });

    let pipeline = Pipeline::new(config, journal)?;
    let request = PipelineRequest {
        raw_log,
        workflow_config,
        change_set,
        workflow_meta: None,
        apply_enabled: args.apply,
    };
    let deadline = args.deadline.map(Duration::from_secs);

    match pipeline.run(request, &cancel, deadline).await {
        Ok(outcome) => {
            if args.json {
                println!("{}", report::outcome_json(&outcome)?);
            } else {
                report::print_outcome(&outcome);
            }
            Ok(())
        }
        Err(failure) => {
            if let Some(analysis) = &failure.analysis {
                report::print_partial(analysis, failure.partial_agents.as_ref());
            }
            Err(failure.source.into())
        }
    }
}

fn load_patch(path: &Path) -> anyhow::Result<forge_diff::UnifiedPatch> {
    let text = read_input(path)?;
    forge_diff::parse_unified(&text).map_err(|e| anyhow::anyhow!("invalid patch file: {e}"))
}

fn dry_run(config: &Config, args: &PatchFileArgs) -> anyhow::Result<()> {
    let patch = load_patch(&args.patch)?;
    let plan = simulate(&config.cwd, &[patch], &DryRunOptions::default(), None);
    report::print_plan(&plan);
    if plan.success {
        return Ok(());
    }
    let syntax_failed = plan
        .steps
        .iter()
        .any(|s| s.action == PlanAction::ValidateSyntax && s.status == StepStatus::Error);
    let err = if syntax_failed {
        ForgeErr::ValidationFailed("post-image failed structural checks".to_string())
    } else {
        ForgeErr::ApplyConflict("dry run reported errors".to_string())
    };
    Err(err.into())
}

fn apply(config: &Config, journal: Arc<AuditJournal>, args: &ApplyArgs) -> anyhow::Result<()> {
    let patch = load_patch(&args.patch)?;
    // A human running `forge apply` is the review; the gate is bypassed on
    // record.
    let decision = GateDecision {
        action: GateAction::ManualReview,
        confidence: 1.0,
        reasoning: "applied manually from the CLI".to_string(),
        risks: vec![],
        recommendations: vec![],
    };
    let applicator = Applicator::new(&config.cwd, journal);
    let record = applicator.apply_patches(
        &[patch],
        &decision,
        &ApplyOptions {
            auto_apply: true,
            dry_run_first: !args.no_dry_run,
        },
    )?;
    report::print_record(&record);
    Ok(())
}

fn rollback(config: &Config, journal: Arc<AuditJournal>, args: &RollbackArgs) -> anyhow::Result<()> {
    let applicator = Applicator::new(&config.cwd, journal);
    let outcome = applicator.rollback(args.id)?;
    report::print_rollback(&outcome);
    if outcome.errors.is_empty() {
        Ok(())
    } else {
        Err(ForgeErr::ApplyFailed(format!("{} file(s) could not be restored", outcome.errors.len())).into())
    }
}

fn audit(journal: &AuditJournal, args: AuditArgs) -> anyhow::Result<()> {
    match args.cmd {
        AuditCommand::List { resource, status } => {
            let entries = match (resource, status) {
                (Some(resource), _) => journal.by_resource(&resource),
                (None, Some(status)) => {
                    let status = match status.as_str() {
                        "failure" => AuditStatus::Failure,
                        "warning" => AuditStatus::Warning,
                        _ => AuditStatus::Success,
                    };
                    journal.by_status(status)
                }
                (None, None) => journal.entries(),
            };
            report::print_audit_entries(&entries);
        }
        AuditCommand::Export { csv } => {
            if csv {
                print!("{}", journal.export_csv()?);
            } else {
                print!("{}", journal.export_jsonl()?);
            }
        }
        AuditCommand::Purge { days } => {
            let purged = journal.purge_older_than(days)?;
            println!("purged {purged} entries older than {days} days");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn cli_parses_analyze_with_overrides() {
        let cli = ForgeCli::parse_from([
            "forge",
            "analyze",
            "build.log",
            "--workflow",
            "ci.yml",
            "--model",
            "gpt-4o",
            "--apply",
            "--json",
        ]);
        let Command::Analyze(args) = cli.command else {
            panic!("expected analyze");
        };
        assert_eq!(args.log, PathBuf::from("build.log"));
        assert_eq!(args.model.as_deref(), Some("gpt-4o"));
        assert!(args.apply);
        assert!(args.json);
    }

    #[test]
    fn cli_parses_rollback_ids() {
        let id = Uuid::new_v4();
        let cli = ForgeCli::parse_from(["forge", "rollback", &id.to_string()]);
        let Command::Rollback(args) = cli.command else {
            panic!("expected rollback");
        };
        assert_eq!(args.id, id);
    }

    #[test]
    fn exit_codes_follow_error_kinds() {
        assert_eq!(exit_code_for(&ForgeErr::InputInvalid("x".into())), 1);
        assert_eq!(exit_code_for(&ForgeErr::NoFailureDetected), 2);
        assert_eq!(exit_code_for(&ForgeErr::ConcurrentApplication), 3);
        assert_eq!(exit_code_for(&ForgeErr::ApplyFailed("x".into())), 3);
    }
}
