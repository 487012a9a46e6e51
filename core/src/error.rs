use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::schema::SchemaViolation;
use forge_protocol::agent::AgentRole;

pub type Result<T> = std::result::Result<T, ForgeErr>;

#[derive(Error, Debug)]
pub enum ForgeErr {
    /// Empty or oversized log, or an unparseable configuration artifact.
    #[error("invalid input: {0}")]
    InputInvalid(String),

    /// The rule engine produced no events; the run cannot proceed.
    #[error("no failure detected in the log")]
    NoFailureDetected,

    /// The prompt could not be brought under the token budget.
    #[error("prompt exceeds the token budget for {model}: {tokens} tokens over a cap of {cap}")]
    BudgetExceeded {
        model: String,
        tokens: usize,
        cap: usize,
    },

    /// Retries exhausted with the backend still returning unparseable or
    /// schema-violating output.
    #[error("{role} response failed schema validation after {attempts} attempts")]
    SchemaViolation {
        role: AgentRole,
        attempts: u32,
        violations: Vec<SchemaViolation>,
    },

    /// Transport errors after retries.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The post-image failed structural validation.
    #[error("patch validation failed: {0}")]
    ValidationFailed(String),

    /// The dry run predicted a conflict.
    #[error("patch application would conflict: {0}")]
    ApplyConflict(String),

    /// The applicator failed; all snapshots were restored.
    #[error("patch application failed (working tree restored): {0}")]
    ApplyFailed(String),

    /// Another application is in flight against the same working-tree root.
    #[error("another patch application holds the lock for this working tree")]
    ConcurrentApplication,

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Diff(#[from] forge_diff::DiffError),
}

impl ForgeErr {
    /// Stable tag for journaling and machine output.
    pub fn kind(&self) -> &'static str {
        match self {
            ForgeErr::InputInvalid(_) => "input_invalid",
            ForgeErr::NoFailureDetected => "no_failure_detected",
            ForgeErr::BudgetExceeded { .. } => "budget_exceeded",
            ForgeErr::SchemaViolation { .. } => "schema_violation",
            ForgeErr::BackendUnavailable(_) => "backend_unavailable",
            ForgeErr::ValidationFailed(_) => "validation_failed",
            ForgeErr::ApplyConflict(_) => "apply_conflict",
            ForgeErr::ApplyFailed(_) => "apply_failed",
            ForgeErr::ConcurrentApplication => "concurrent_application",
            ForgeErr::Cancelled => "cancelled",
            ForgeErr::TimedOut(_) => "timed_out",
            ForgeErr::Io(_) => "io",
            ForgeErr::Json(_) => "json",
            ForgeErr::Reqwest(_) => "transport",
            ForgeErr::Diff(_) => "diff",
        }
    }

    /// One-line recommendation surfaced alongside the message.
    pub fn recommendation(&self) -> &'static str {
        match self {
            ForgeErr::InputInvalid(_) => "Check that the log and configuration inputs are present and well-formed.",
            ForgeErr::NoFailureDetected => "The log matched no known failure pattern; inspect it manually.",
            ForgeErr::BudgetExceeded { .. } => "Raise the token budget or reduce the log snippet size.",
            ForgeErr::SchemaViolation { .. } => "The backend kept returning malformed output; try a different model.",
            ForgeErr::BackendUnavailable(_) => "Verify the backend URL, credentials and network connectivity.",
            ForgeErr::ValidationFailed(_) => "Review the proposed patch by hand before applying.",
            ForgeErr::ApplyConflict(_) => "Resolve the conflicting patches and retry.",
            ForgeErr::ApplyFailed(_) => "The working tree was restored; inspect the failure and retry.",
            ForgeErr::ConcurrentApplication => "Wait for the in-flight application to finish.",
            ForgeErr::Cancelled => "The operation was cancelled; rerun when ready.",
            ForgeErr::TimedOut(_) => "Increase the timeout or check backend latency.",
            ForgeErr::Io(_) => "Check filesystem permissions on the working tree.",
            ForgeErr::Json(_) | ForgeErr::Diff(_) => "Inspect the malformed artifact in the journal.",
            ForgeErr::Reqwest(_) => "Check network connectivity to the backend.",
        }
    }
}
