//! Dealership assistant - command-line REPL
//!
//! Reads one line per turn from stdin and prints the assistant's reply or
//! confirmation prompt.

use dealership_assistant::config::{AppConfig, LogFormat};
use dealership_assistant::db::Database;
use dealership_assistant::llm::build_service;
use dealership_assistant::runtime::Dispatcher;
use dealership_assistant::session::{InMemorySessionStore, SessionStore};
use dealership_assistant::store::DealershipStore;
use dealership_assistant::tools::ToolRegistry;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dealership_assistant=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .init(),
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
    }

    let sessions: Arc<dyn SessionStore> = match &config.db_path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %path.display(), "Opening session database");
            Arc::new(Database::open(path)?)
        }
        None => Arc::new(InMemorySessionStore::new()),
    };

    let store = match &config.store_path {
        Some(path) => {
            tracing::info!(path = %path.display(), "Opening dealership store");
            DealershipStore::open(path)?
        }
        None => DealershipStore::new(),
    };

    let llm = build_service(&config.llm)?;
    tracing::info!(
        model = %config.llm.model,
        base_url = %config.llm.base_url,
        topology = ?config.topology,
        "Starting dealership assistant"
    );

    let dispatcher = Dispatcher::new(sessions, llm, ToolRegistry::standard(), Arc::new(store))
        .with_topology(config.topology)
        .with_max_steps(config.max_steps);

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    stdout
        .write_all(b"Welcome to the dealership! Type 'quit' to leave.\n> ")
        .await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await? {
        let input = line.trim();
        if input.eq_ignore_ascii_case("quit") || input.eq_ignore_ascii_case("exit") {
            break;
        }
        if !input.is_empty() {
            match dispatcher.process_turn(&session_id, input).await {
                Ok(reply) => {
                    stdout.write_all(reply.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                }
                // Logged by the dispatcher
                Err(_) => {
                    stdout
                        .write_all(b"Sorry, something went wrong. Please try again.\n")
                        .await?;
                }
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    tracing::info!(session_id = %session_id, "Goodbye");
    Ok(())
}
