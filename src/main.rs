use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tradegraph_core::config::{AppConfig, ModelConfig, RetryConfig, StorageConfig, WorkflowConfig};
use tradegraph_core::event::{EventBus, Notification};
use tradegraph_core::traits::SessionStore;
use tradegraph_core::types::SessionId;
use tradegraph_memory::SqliteStore;
use tradegraph_workflow::{ToolRegistry, TradingSession};

#[derive(Parser)]
#[command(name = "tradegraph", version, about = "Multi-agent trading analysis workflows")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tradegraph.toml", env = "TRADEGRAPH_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze one instrument and print the final decision
    Run {
        /// Ticker or other instrument identifier
        #[arg(long)]
        symbol: String,
        /// As-of date (YYYY-MM-DD); defaults to today
        #[arg(long)]
        date: Option<String>,
        /// Extra instruction for the analysts
        #[arg(long, default_value = "")]
        prompt: String,
        /// Override workflow.max_debate_rounds
        #[arg(long)]
        debate_rounds: Option<usize>,
        /// Override workflow.max_risk_rounds
        #[arg(long)]
        risk_rounds: Option<usize>,
        /// File of reflections from earlier runs, separated by blank lines
        #[arg(long)]
        prior_decisions: Option<PathBuf>,
    },
    /// Show current configuration
    Config,
    /// Print the stored messages of a session
    History {
        /// Session ID; lists recent sessions when omitted
        session: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tradegraph=info,warn")),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Config => {
            if config.model.api_key.is_some() {
                config.model.api_key = Some("********".into());
            }
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::History { session } => {
            let store = SqliteStore::open(&config.db_path())?;
            match session {
                Some(id) => print_history(&store, &SessionId::from_str(&id)).await,
                None => {
                    for s in store.recent_sessions(20)? {
                        println!(
                            "{}  {:<10} {}  {:<9}  {}",
                            s.id,
                            s.subject_id,
                            s.as_of,
                            s.status.as_str(),
                            s.created_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                    Ok(())
                }
            }
        }
        Commands::Run {
            symbol,
            date,
            prompt,
            debate_rounds,
            risk_rounds,
            prior_decisions,
        } => {
            if let Some(n) = debate_rounds {
                config.workflow.max_debate_rounds = n;
            }
            if let Some(n) = risk_rounds {
                config.workflow.max_risk_rounds = n;
            }
            let date = date.unwrap_or_else(|| chrono::Local::now().format("%Y-%m-%d").to_string());
            let prior = match prior_decisions {
                Some(path) => read_prior_decisions(&path)?,
                None => vec![],
            };
            run_analysis(config, &symbol, &date, &prompt, prior).await
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }

    let home_config = dirs_home().map(|h| h.join(".tradegraph").join("config.toml"));
    if let Some(path) = home_config.filter(|p| p.exists()) {
        info!(path = %path.display(), "Loading config from home directory");
        return Ok(AppConfig::load(&path)?);
    }

    eprintln!("Warning: No config file found. Set OPENAI_API_KEY or create tradegraph.toml");
    create_env_config()
}

/// Minimal config from the environment: OpenAI when a key is set, local
/// Ollama otherwise.
fn create_env_config() -> anyhow::Result<AppConfig> {
    let (provider, model_id, api_key) = match std::env::var("OPENAI_API_KEY") {
        Ok(key) => ("openai", "gpt-4o-mini", Some(key)),
        Err(_) => ("ollama", "llama3.2", None),
    };

    let config = AppConfig {
        model: ModelConfig {
            provider: provider.to_string(),
            model_id: model_id.to_string(),
            api_key,
            base_url: None,
            max_tokens: 4096,
            temperature: 0.0,
            retry: Some(RetryConfig::default()),
            extra_headers: Default::default(),
        },
        workflow: WorkflowConfig::default(),
        storage: StorageConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

fn read_prior_decisions(path: &Path) -> anyhow::Result<Vec<String>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}

async fn run_analysis(
    config: AppConfig,
    symbol: &str,
    date: &str,
    prompt: &str,
    prior: Vec<String>,
) -> anyhow::Result<()> {
    let store = Arc::new(SqliteStore::open(&config.db_path())?);
    let tools = Arc::new(ToolRegistry::with_builtins());
    let event_bus = Arc::new(EventBus::default());
    let model = tradegraph_llm::create_client(&config.model)?;

    let session = TradingSession::new(
        config.workflow.clone(),
        model,
        tools,
        store,
        event_bus.clone(),
    )?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted; cancelling run");
            interrupt.cancel();
        }
    });

    let printer = tokio::spawn(print_events(event_bus.subscribe()));

    let state = session
        .new_state(symbol, date, prompt)
        .with_prior_decisions(prior);
    let report = session.run_with_cancel(state, &cancel).await;
    printer.await.ok();

    if let Some(sid) = &report.session_id {
        eprintln!("session: {}", sid);
    }
    if report.persistence_warnings > 0 {
        eprintln!("{} persistence warning(s)", report.persistence_warnings);
    }

    let summary = report.outcome?;
    println!(
        "\n=== {} {} ({} steps, {} ms) ===",
        symbol, date, summary.iterations, summary.elapsed_ms
    );
    if let Some(decision) = report.state.final_decision() {
        println!("{}", decision);
    }
    if let Some(signal) = report.signal {
        println!("\nSIGNAL: {}", signal);
    }
    Ok(())
}

/// Stream events to the terminal until the run finishes or fails.
async fn print_events(mut rx: broadcast::Receiver<Notification>) {
    let mut current_node = String::new();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "Event printer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        let node = event.payload["node"].as_str().unwrap_or_default();

        match event.topic.as_str() {
            "message_chunk" => {
                if node != current_node {
                    current_node = node.to_string();
                    eprintln!("\n--- {} ---", current_node);
                }
                if let Some(text) = event.payload["content"].as_str() {
                    print!("{}", text);
                    io::stdout().flush().ok();
                }
                if let Some(calls) = event.payload["tool_calls"].as_array() {
                    for name in calls.iter().filter_map(|c| c["name"].as_str()) {
                        eprintln!("\n[tool: {}]", name);
                    }
                }
            }
            "text_final" => println!(),
            "tool_call_result_final" => {
                let content = event.payload["content"].as_str().unwrap_or_default();
                eprintln!("[result] {}", truncate(content, 200));
            }
            "persistence_warning" => {
                eprintln!("[warning] {}", event.payload["message"]);
            }
            "error" => {
                eprintln!("\n[error at {}: {}]", node, event.payload["message"]);
                break;
            }
            "finished" => {
                eprintln!("\n[done: {} steps]", event.payload["iterations"]);
                break;
            }
            _ => {}
        }
    }
}

async fn print_history(store: &SqliteStore, sid: &SessionId) -> anyhow::Result<()> {
    let Some(session) = store.session(sid)? else {
        anyhow::bail!("session not found: {}", sid);
    };
    println!(
        "{} {} [{}] {}",
        session.subject_id,
        session.as_of,
        session.status.as_str(),
        session.prompt
    );

    for msg in store.load_messages(sid).await? {
        let r = &msg.record;
        println!(
            "\n#{} {} {} ({})",
            msg.seq,
            r.role.as_str(),
            r.agent,
            msg.timestamp.format("%H:%M:%S")
        );
        for call in &r.tool_calls {
            println!("  -> {}({})", call.name, call.arguments);
        }
        if !r.content.is_empty() {
            println!("{}", r.content);
        }
    }
    Ok(())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
