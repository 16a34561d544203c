use std::io::Write;

use tradegraph_core::config::{AnalystKind, AppConfig, OrphanFragmentPolicy};
use tradegraph_core::error::TradegraphError;

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(content.as_bytes()).expect("write toml");
    tmp
}

#[test]
fn test_load_full_config_from_file() {
    let tmp = write_config(
        r#"
[model]
provider = "openrouter"
model_id = "openai/gpt-4o"
api_key = "sk-test-key"
max_tokens = 2048
temperature = 0.2

[model.retry]
max_retries = 5
initial_backoff_ms = 200

[model.extra_headers]
X-Title = "desk"

[workflow]
max_debate_rounds = 3
max_risk_rounds = 2
max_iterations = 60
max_tool_steps = 4
analysts = ["fundamentals", "market"]
orphan_fragments = "drop"

[storage]
workspace = "/tmp/tradegraph-test"
db_file = "runs.db"
"#,
    );

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openrouter");
    assert_eq!(config.model.model_id, "openai/gpt-4o");
    assert_eq!(config.model.api_key.as_deref(), Some("sk-test-key"));
    assert_eq!(config.model.max_tokens, 2048);
    assert!((config.model.temperature - 0.2).abs() < f32::EPSILON);

    let retry = config.model.retry.as_ref().expect("retry section");
    assert_eq!(retry.max_retries, 5);
    assert_eq!(retry.initial_backoff_ms, 200);
    assert_eq!(retry.max_backoff_ms, 30000);
    assert_eq!(config.model.extra_headers["X-Title"], "desk");

    assert_eq!(config.workflow.max_debate_rounds, 3);
    assert_eq!(config.workflow.max_risk_rounds, 2);
    assert_eq!(config.workflow.max_iterations, 60);
    assert_eq!(config.workflow.max_tool_steps, 4);
    assert_eq!(
        config.workflow.analysts,
        vec![AnalystKind::Fundamentals, AnalystKind::Market]
    );
    assert_eq!(config.workflow.orphan_fragments, OrphanFragmentPolicy::Drop);

    assert_eq!(
        config.db_path(),
        std::path::PathBuf::from("/tmp/tradegraph-test/runs.db")
    );
}

#[test]
fn test_minimal_config_uses_defaults() {
    let tmp = write_config("[model]\nmodel_id = \"gpt-4o-mini\"\n");
    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.model.provider, "openai");
    assert!(config.model.retry.is_none());
    assert_eq!(config.workflow.max_debate_rounds, 1);
    assert_eq!(config.workflow.max_risk_rounds, 1);
    assert_eq!(config.workflow.analysts.len(), 4);
    assert_eq!(config.storage.db_file, "sessions.db");
}

#[test]
fn test_env_var_expansion_in_file() {
    std::env::set_var("TRADEGRAPH_TEST_API_KEY", "sk-from-env");
    let tmp = write_config(
        "[model]\nmodel_id = \"gpt-4o\"\napi_key = \"${TRADEGRAPH_TEST_API_KEY}\"\n",
    );
    let config = AppConfig::load(tmp.path()).expect("load config");
    std::env::remove_var("TRADEGRAPH_TEST_API_KEY");

    assert_eq!(config.model.api_key.as_deref(), Some("sk-from-env"));
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, TradegraphError::ConfigNotFound(_)));
}

#[test]
fn test_invalid_configs_rejected() {
    let unknown_analyst = write_config(
        "[model]\nmodel_id = \"m\"\n[workflow]\nanalysts = [\"astrology\"]\n",
    );
    assert!(matches!(
        AppConfig::load(unknown_analyst.path()),
        Err(TradegraphError::Config(_))
    ));

    let no_iterations = write_config("[model]\nmodel_id = \"m\"\n[workflow]\nmax_iterations = 0\n");
    assert!(matches!(
        AppConfig::load(no_iterations.path()),
        Err(TradegraphError::Config(_))
    ));

    let no_model = write_config("[workflow]\nmax_debate_rounds = 2\n");
    assert!(matches!(
        AppConfig::load(no_model.path()),
        Err(TradegraphError::Config(_))
    ));
}
