use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TradegraphError};

/// Top-level tradegraph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub model: ModelConfig,
    #[serde(default)]
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Extra HTTP headers sent with every request.
    #[serde(default)]
    pub extra_headers: HashMap<String, String>,
}

fn default_provider() -> String { "openai".to_string() }
fn default_max_tokens() -> u32 { 4096 }
fn default_temperature() -> f32 { 0.0 }

/// Retry configuration for LLM requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 1000 }
fn default_max_backoff() -> u64 { 30000 }

/// Analyst phases that can be enabled for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalystKind {
    Market,
    Social,
    News,
    Fundamentals,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 4] = [Self::Market, Self::Social, Self::News, Self::Fundamentals];
}

/// How tool-call fragments without an identifier are attributed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanFragmentPolicy {
    /// Append to the in-flight call iff exactly one is open; drop otherwise.
    #[default]
    AttachSingleOpen,
    /// Always drop fragments without an identifier.
    Drop,
}

/// Workflow orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Bull/bear rounds; the debate ends after twice this many turns.
    #[serde(default = "default_debate_rounds")]
    pub max_debate_rounds: usize,
    /// Risky/safe/neutral rotations; the discussion ends after three turns each.
    #[serde(default = "default_risk_rounds")]
    pub max_risk_rounds: usize,
    /// Backstop against runaway branch cycles.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Model calls allowed per node when tools are in play.
    #[serde(default = "default_max_tool_steps")]
    pub max_tool_steps: usize,
    #[serde(default = "default_analysts")]
    pub analysts: Vec<AnalystKind>,
    #[serde(default)]
    pub orphan_fragments: OrphanFragmentPolicy,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_debate_rounds: default_debate_rounds(),
            max_risk_rounds: default_risk_rounds(),
            max_iterations: default_max_iterations(),
            max_tool_steps: default_max_tool_steps(),
            analysts: default_analysts(),
            orphan_fragments: OrphanFragmentPolicy::default(),
        }
    }
}

fn default_debate_rounds() -> usize { 1 }
fn default_risk_rounds() -> usize { 1 }
fn default_max_iterations() -> usize { 100 }
fn default_max_tool_steps() -> usize { 8 }
fn default_analysts() -> Vec<AnalystKind> { AnalystKind::ALL.to_vec() }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_workspace")]
    pub workspace: String,
    /// Session database file name inside the workspace.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            workspace: default_workspace(),
            db_file: default_db_file(),
        }
    }
}

fn default_workspace() -> String { "~/.tradegraph".to_string() }
fn default_db_file() -> String { "sessions.db".to_string() }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| TradegraphError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| TradegraphError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the workflow cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.workflow.analysts.is_empty() {
            return Err(TradegraphError::Config(
                "workflow.analysts must name at least one analyst".into(),
            ));
        }
        if self.workflow.max_iterations == 0 {
            return Err(TradegraphError::Config(
                "workflow.max_iterations must be positive".into(),
            ));
        }
        if self.workflow.max_tool_steps == 0 {
            return Err(TradegraphError::Config(
                "workflow.max_tool_steps must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Resolve the workspace directory (expand ~).
    pub fn workspace_dir(&self) -> PathBuf {
        let ws = &self.storage.workspace;
        if let Some(rest) = ws.strip_prefix("~/") {
            if let Some(home) = dirs_home() {
                return home.join(rest);
            }
        }
        PathBuf::from(ws)
    }

    pub fn db_path(&self) -> PathBuf {
        self.workspace_dir().join(&self.storage.db_file)
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_TRADEGRAPH_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_TRADEGRAPH_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_TRADEGRAPH_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_TRADEGRAPH_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_TRADEGRAPH_VAR}\"");
    }

    #[test]
    fn test_workflow_defaults_from_minimal_toml() {
        let toml_str = r#"
[model]
model_id = "gpt-4o-mini"
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.model.provider, "openai");
        assert_eq!(config.workflow.max_debate_rounds, 1);
        assert_eq!(config.workflow.max_risk_rounds, 1);
        assert_eq!(config.workflow.max_iterations, 100);
        assert_eq!(config.workflow.analysts.len(), 4);
        assert_eq!(
            config.workflow.orphan_fragments,
            OrphanFragmentPolicy::AttachSingleOpen
        );
        assert_eq!(config.storage.db_file, "sessions.db");
    }

    #[test]
    fn test_analyst_subset_and_policy() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"

[workflow]
analysts = ["market", "news"]
orphan_fragments = "drop"
max_debate_rounds = 3
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.workflow.analysts,
            vec![AnalystKind::Market, AnalystKind::News]
        );
        assert_eq!(config.workflow.orphan_fragments, OrphanFragmentPolicy::Drop);
        assert_eq!(config.workflow.max_debate_rounds, 3);
    }

    #[test]
    fn test_validate_rejects_empty_analysts() {
        let toml_str = r#"
[model]
model_id = "gpt-4o"

[workflow]
analysts = []
"#;
        let config: AppConfig = toml::from_str(toml_str).unwrap();
        assert!(matches!(config.validate(), Err(TradegraphError::Config(_))));
    }
}
