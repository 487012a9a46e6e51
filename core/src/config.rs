//! Application configuration merged from disk and environment.
//!
//! Load order, first existing value wins per key: explicit path,
//! `~/.forge/config.json`, `<cwd>/.forge.json`,
//! `<cwd>/.github/forge-config.json`, built-in defaults. Environment
//! overrides are applied last. The loaded value is treated as immutable;
//! anything that mutates it must journal a `config_change` entry.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use dirs::home_dir;
use serde::Deserialize;
use tracing::debug;

use crate::error::ForgeErr;
use crate::error::Result;
use crate::flags::FORGE_AGGRESSIVE_REDACTION;
use crate::flags::FORGE_API_BASE;
use crate::flags::FORGE_LOCAL_VALIDATION_ONLY;
use crate::flags::FORGE_LOG_DIR;
use crate::flags::FORGE_MODEL;
use crate::flags::FORGE_TOKEN_BUDGET;

pub const CONFIG_FILE_NAME: &str = "config.json";
const DOTFILE_NAME: &str = ".forge.json";
const WORKFLOW_CONFIG_PATH: &str = ".github/forge-config.json";

/// Name of the state subdirectory under the working-tree root.
pub const STATE_DIR_NAME: &str = ".forge";

#[derive(Debug, Clone, PartialEq)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    /// Env var holding the API key; the key itself never lives in config.
    pub api_key_env: Option<String>,
    pub temperature: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateConfig {
    pub auto_apply_threshold: f64,
    pub manual_review_threshold: f64,
    pub escalate_threshold: f64,
    pub allow_auto_apply_on_critical: bool,
    pub requires_security_review: bool,
    pub requires_performance_review: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        GateConfig {
            auto_apply_threshold: 0.9,
            manual_review_threshold: 0.6,
            escalate_threshold: 0.3,
            allow_auto_apply_on_critical: false,
            requires_security_review: true,
            requires_performance_review: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Per-attempt timeout for standalone backend calls.
    pub attempt_timeout: Duration,
    /// Tighter per-attempt timeout used inside the pipeline.
    pub pipeline_attempt_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            attempt_timeout: *crate::flags::FORGE_REQUEST_TIMEOUT_MS,
            pipeline_attempt_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PrunerConfig {
    pub head: usize,
    pub tail: usize,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        PrunerConfig { head: 100, tail: 500 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BudgetConfig {
    /// Overrides the per-model token cap when set.
    pub token_cap_override: Option<usize>,
    pub safety_fraction: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        BudgetConfig {
            token_cap_override: None,
            safety_fraction: 0.8,
        }
    }
}

/// The merged configuration value threaded through the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub backend: BackendConfig,
    pub gate: GateConfig,
    pub retry: RetryConfig,
    pub pruner: PrunerConfig,
    pub budget: BudgetConfig,
    pub aggressive_redaction: bool,
    pub local_validation_only: bool,
    /// Directory holding the audit journal.
    pub log_dir: PathBuf,
    /// Working-tree root all relative patch paths resolve against.
    pub cwd: PathBuf,
}

impl Config {
    pub fn load(explicit: Option<&Path>, cwd: &Path) -> Result<Config> {
        let mut merged = ConfigFile::default();
        for path in candidate_paths(explicit, cwd) {
            if !path.is_file() {
                continue;
            }
            let text = std::fs::read_to_string(&path)?;
            let file: ConfigFile = serde_json::from_str(&text).map_err(|e| {
                ForgeErr::InputInvalid(format!("unparseable config {}: {e}", path.display()))
            })?;
            debug!(path = %path.display(), "merging config file");
            merged.merge_missing(file);
        }

        let mut config = merged.into_config(cwd);
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

fn candidate_paths(explicit: Option<&Path>, cwd: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    if let Some(home) = home_dir() {
        paths.push(home.join(STATE_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    paths.push(cwd.join(DOTFILE_NAME));
    paths.push(cwd.join(WORKFLOW_CONFIG_PATH));
    paths
}

fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(dir) = *FORGE_LOG_DIR {
        config.log_dir = PathBuf::from(dir);
    }
    if *FORGE_AGGRESSIVE_REDACTION {
        config.aggressive_redaction = true;
    }
    if *FORGE_LOCAL_VALIDATION_ONLY {
        config.local_validation_only = true;
    }
    if let Some(cap) = *FORGE_TOKEN_BUDGET {
        let cap = cap
            .parse::<usize>()
            .map_err(|_| ForgeErr::InputInvalid("FORGE_TOKEN_BUDGET must be an integer".into()))?;
        config.budget.token_cap_override = Some(cap);
    }
    Ok(())
}

pub(crate) fn default_log_dir() -> PathBuf {
    home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(STATE_DIR_NAME)
}

/// On-disk shape; every key optional so files can be sparse.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    base_url: Option<String>,
    model: Option<String>,
    api_key_env: Option<String>,
    temperature: Option<f64>,
    auto_apply_threshold: Option<f64>,
    manual_review_threshold: Option<f64>,
    escalate_threshold: Option<f64>,
    allow_auto_apply_on_critical: Option<bool>,
    requires_security_review: Option<bool>,
    requires_performance_review: Option<bool>,
    max_attempts: Option<u32>,
    prune_head: Option<usize>,
    prune_tail: Option<usize>,
    token_budget: Option<usize>,
    aggressive_redaction: Option<bool>,
    local_validation_only: Option<bool>,
    log_dir: Option<PathBuf>,
}

impl ConfigFile {
    /// Keep existing values; fill holes from `other` (first file wins).
    fn merge_missing(&mut self, other: ConfigFile) {
        macro_rules! take {
            ($($field:ident),* $(,)?) => {
                $(if self.$field.is_none() { self.$field = other.$field; })*
            };
        }
        take!(
            base_url,
            model,
            api_key_env,
            temperature,
            auto_apply_threshold,
            manual_review_threshold,
            escalate_threshold,
            allow_auto_apply_on_critical,
            requires_security_review,
            requires_performance_review,
            max_attempts,
            prune_head,
            prune_tail,
            token_budget,
            aggressive_redaction,
            local_validation_only,
            log_dir,
        );
    }

    fn into_config(self, cwd: &Path) -> Config {
        let gate_defaults = GateConfig::default();
        let retry_defaults = RetryConfig::default();
        let pruner_defaults = PrunerConfig::default();
        Config {
            backend: BackendConfig {
                base_url: self.base_url.unwrap_or_else(|| FORGE_API_BASE.to_string()),
                model: self.model.unwrap_or_else(|| FORGE_MODEL.to_string()),
                api_key_env: self.api_key_env,
                temperature: self.temperature.unwrap_or(0.3),
            },
            gate: GateConfig {
                auto_apply_threshold: self
                    .auto_apply_threshold
                    .unwrap_or(gate_defaults.auto_apply_threshold),
                manual_review_threshold: self
                    .manual_review_threshold
                    .unwrap_or(gate_defaults.manual_review_threshold),
                escalate_threshold: self
                    .escalate_threshold
                    .unwrap_or(gate_defaults.escalate_threshold),
                allow_auto_apply_on_critical: self
                    .allow_auto_apply_on_critical
                    .unwrap_or(gate_defaults.allow_auto_apply_on_critical),
                requires_security_review: self
                    .requires_security_review
                    .unwrap_or(gate_defaults.requires_security_review),
                requires_performance_review: self
                    .requires_performance_review
                    .unwrap_or(gate_defaults.requires_performance_review),
            },
            retry: RetryConfig {
                max_attempts: self.max_attempts.unwrap_or(retry_defaults.max_attempts),
                ..retry_defaults
            },
            pruner: PrunerConfig {
                head: self.prune_head.unwrap_or(pruner_defaults.head),
                tail: self.prune_tail.unwrap_or(pruner_defaults.tail),
            },
            budget: BudgetConfig {
                token_cap_override: self.token_budget,
                ..BudgetConfig::default()
            },
            aggressive_redaction: self.aggressive_redaction.unwrap_or(false),
            local_validation_only: self.local_validation_only.unwrap_or(false),
            log_dir: self.log_dir.unwrap_or_else(default_log_dir),
            cwd: cwd.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_spec() {
        let config = ConfigFile::default().into_config(Path::new("/tmp/work"));
        assert_eq!(config.gate.auto_apply_threshold, 0.9);
        assert_eq!(config.gate.manual_review_threshold, 0.6);
        assert_eq!(config.gate.escalate_threshold, 0.3);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.pruner.head, 100);
        assert_eq!(config.pruner.tail, 500);
        assert_eq!(config.backend.temperature, 0.3);
        assert!(!config.gate.allow_auto_apply_on_critical);
    }

    #[test]
    fn earlier_files_win_per_key() {
        let mut first: ConfigFile = serde_json::from_str(r#"{"model": "gpt-4o"}"#).unwrap();
        let second: ConfigFile =
            serde_json::from_str(r#"{"model": "o3-mini", "pruneHead": 50}"#).unwrap();
        first.merge_missing(second);
        let config = first.into_config(Path::new("/tmp/work"));
        assert_eq!(config.backend.model, "gpt-4o");
        assert_eq!(config.pruner.head, 50);
    }

    #[test]
    fn unparseable_config_is_input_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let err = Config::load(Some(&path), dir.path()).unwrap_err();
        assert_eq!(err.kind(), "input_invalid");
    }
}
